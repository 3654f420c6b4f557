use thiserror::Error;

/// Domain failures raised inside database tasks.
///
/// They travel through `anyhow::Error` like every other store error and are
/// recovered with `downcast_ref` at the HTTP boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Invalid(String),
}
