use thiserror::Error;

pub type LowerResult<T> = Result<T, FaultError>;

/// Internal consistency faults. These indicate a bug in an earlier stage or
/// in the lowering driver itself, never an error in the compiled program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FaultError {
    #[error("no runtime representation registered for {0}")]
    UnrepresentableType(String),
    #[error("{0} was accessed before being attached")]
    UninitializedLink(&'static str),
}
