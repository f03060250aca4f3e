use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowHashError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    #[error("`{0}` already exists")]
    Exists(String),
    #[error("no space left in the table")]
    NoSpace,
    #[error("key not found")]
    NotFound,
    #[error("allocation failed")]
    AllocationFailed,
    #[error("internal fault: {0}")]
    Internal(&'static str),
}

pub type Result<T> = std::result::Result<T, FlowHashError>;
