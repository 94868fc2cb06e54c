//! # clgeom FFI
//!
//! C interface to `clgeom-core`. See `include/clgeom.h` for the header.
//!
//! ## Architecture
//!
//! The FFI uses handle-based object management to safely expose Rust objects
//! across the language boundary:
//!
//! - **ContextManager** - device snapshot plus its C device table (u64 handle)
//! - **Context** - native context bound to one device (u64 handle)
//!
//! Results come back as a value plus a `u32` status written through
//! `status_out`; `0` is success. Handles make double drops and use after drop
//! detectable instead of undefined.
//!
//! ## Lifecycle
//!
//! ```text
//! clgeom_create_context_manager → clgeom_create_context → clgeom_drop_context
//!                               → clgeom_drop_context_manager
//! ```
//!
//! A manager with live contexts refuses to be dropped (`ManagerInUse`).

mod c_api;
mod handles;
mod status;
mod types;

pub use c_api::{
    clgeom_create_context, clgeom_create_context_manager, clgeom_drop_context, clgeom_drop_context_manager,
    clgeom_init_logging, clgeom_manager_device, clgeom_status_message, clgeom_version,
    create_context_manager_with_driver,
};
pub use handles::{clear_all_registries, context_count, manager_count};
pub use status::Status;
pub use types::{ClgeomContext, ClgeomContextManager, ClgeomDeviceInfo};

/// Get the version of the clgeom-ffi library
pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
