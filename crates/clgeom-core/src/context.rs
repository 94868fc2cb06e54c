//! Execution context bound to one device

use std::fmt;
use std::sync::Arc;

use crate::device::DeviceKey;
use crate::driver::NativeContext;
use crate::error::{Error, Result};

/// Native execution resources (context + default queue) for one device
///
/// Created by [`crate::ContextManager::create_context`]. The native
/// resources are released exactly once: either explicitly through
/// [`Context::release`], which reports teardown failures, or when the value
/// goes out of scope, which only logs them.
pub struct Context {
    native: Option<Box<dyn NativeContext>>,
    device: DeviceKey,
    device_name: String,
    // Counts this context as live on its manager until dropped.
    _lease: Arc<()>,
}

impl Context {
    pub(crate) fn new(native: Box<dyn NativeContext>, device: DeviceKey, device_name: String, lease: Arc<()>) -> Self {
        Self {
            native: Some(native),
            device,
            device_name,
            _lease: lease,
        }
    }

    /// Diagnostic back-reference to the device this context runs on
    pub fn device(&self) -> DeviceKey {
        self.device
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// False only transiently inside `release`/`drop`
    pub fn is_live(&self) -> bool {
        self.native.is_some()
    }

    /// Release the native context and queue now
    ///
    /// # Errors
    ///
    /// [`Error::ContextTeardown`] when the native layer fails to release the
    /// resources. The handle is consumed either way and is never released a
    /// second time.
    pub fn release(mut self) -> Result<()> {
        self.release_native()
    }

    fn release_native(&mut self) -> Result<()> {
        let Some(native) = self.native.take() else {
            return Ok(());
        };
        match native.release() {
            Ok(()) => {
                tracing::info!(device = %self.device, "context released");
                Ok(())
            }
            Err(e) => {
                tracing::error!(device = %self.device, error = %e, "context teardown failed");
                Err(Error::ContextTeardown(e.to_string()))
            }
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        // Failure is already logged by release_native.
        let _ = self.release_native();
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("device", &self.device)
            .field("device_name", &self.device_name)
            .field("live", &self.is_live())
            .finish()
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Context {{ device: {} ({}) }}", self.device_name, self.device)
    }
}
