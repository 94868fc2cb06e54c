//! Status codes reported through `status_out`

use std::ffi::c_char;

use clgeom_core::Error;

/// Outcome of a boundary call, written as a `u32`
///
/// Codes 1 through 6 mirror the core error kinds; the rest only exist at the
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Status {
    Success = 0,
    Enumeration = 1,
    NoDevices = 2,
    InvalidDevice = 3,
    ContextCreation = 4,
    ContextTeardown = 5,
    ManagerTeardown = 6,
    /// Null pointer, unknown handle or a handle that was already dropped
    InvalidHandle = 7,
    /// Manager drop attempted while contexts created from it are alive
    ManagerInUse = 8,
    InvalidArgument = 9,
    Config = 10,
    /// A panic was caught before it could unwind into the caller
    Panic = 255,
}

impl Status {
    pub const fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        let status = match code {
            0 => Status::Success,
            1 => Status::Enumeration,
            2 => Status::NoDevices,
            3 => Status::InvalidDevice,
            4 => Status::ContextCreation,
            5 => Status::ContextTeardown,
            6 => Status::ManagerTeardown,
            7 => Status::InvalidHandle,
            8 => Status::ManagerInUse,
            9 => Status::InvalidArgument,
            10 => Status::Config,
            255 => Status::Panic,
            _ => return None,
        };
        Some(status)
    }

    /// NUL-terminated, static description
    pub(crate) fn message_bytes(self) -> &'static [u8] {
        match self {
            Status::Success => b"success\0",
            Status::Enumeration => b"platform or device enumeration failed\0",
            Status::NoDevices => b"no compute devices found\0",
            Status::InvalidDevice => b"device does not belong to this context manager\0",
            Status::ContextCreation => b"failed to create compute context\0",
            Status::ContextTeardown => b"failed to release compute context\0",
            Status::ManagerTeardown => b"failed to release context manager\0",
            Status::InvalidHandle => b"invalid or already dropped handle\0",
            Status::ManagerInUse => b"context manager still has live contexts\0",
            Status::InvalidArgument => b"invalid argument\0",
            Status::Config => b"invalid configuration\0",
            Status::Panic => b"internal panic\0",
        }
    }

    pub fn message(self) -> &'static str {
        let bytes = self.message_bytes();
        // Every message is ASCII.
        std::str::from_utf8(&bytes[..bytes.len() - 1]).unwrap_or("")
    }

    pub(crate) fn message_ptr(self) -> *const c_char {
        self.message_bytes().as_ptr().cast()
    }
}

impl From<&Error> for Status {
    fn from(error: &Error) -> Self {
        match error {
            Error::Enumeration(_) => Status::Enumeration,
            Error::NoDevices => Status::NoDevices,
            Error::InvalidDevice { .. } => Status::InvalidDevice,
            Error::ContextCreation(_) => Status::ContextCreation,
            Error::ContextTeardown(_) => Status::ContextTeardown,
            Error::ManagerTeardown(_) => Status::ManagerTeardown,
            Error::DeviceIndexOutOfRange { .. } => Status::InvalidArgument,
            Error::Config(_) => Status::Config,
        }
    }
}

impl From<Status> for u32 {
    fn from(status: Status) -> Self {
        status.code()
    }
}
