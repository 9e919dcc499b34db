use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VmError>;

/// The pool that ran dry when a fault could not be serviced.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Resource {
    Frames,
    SwapSlots,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Frames => write!(f, "physical frames"),
            Resource::SwapSlots => write!(f, "swap slots"),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum VmError {
    /// Fatal to the faulting execution context; nothing reclaims memory in
    /// the background, so retrying cannot succeed.
    #[error("out of {resource}")]
    ResourceExhausted { resource: Resource },

    /// Internal bookkeeping disagrees with itself. Either the caller or this
    /// crate has a bug.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("address {vaddr:#x} (vpn {vpn}) is outside the address space")]
    AddressOutOfRange { vaddr: usize, vpn: usize },

    #[error("write to read-only page at {vaddr:#x} (vpn {vpn})")]
    ReadOnly { vaddr: usize, vpn: usize },

    #[error("invalid machine configuration: {0}")]
    InvalidConfig(String),

    #[error("no live address space with id {0}")]
    NoSuchSpace(usize),

    #[error("no address space is running")]
    NoRunningSpace,

    #[error("reading executable image: {0}")]
    ImageRead(String),
}

// Stringified so `VmError` stays `PartialEq`; `io::Error` is not.
impl From<std::io::Error> for VmError {
    fn from(err: std::io::Error) -> Self {
        VmError::ImageRead(err.to_string())
    }
}

impl VmError {
    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        VmError::InvariantViolation(msg.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VmError::ResourceExhausted { .. } | VmError::InvariantViolation(_)
        )
    }
}
