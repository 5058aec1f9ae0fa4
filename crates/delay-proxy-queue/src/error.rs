use thiserror::Error;

/// Failure returned when a bounded-wait guard could not be acquired in time.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("timed out waiting to acquire the guard")]
pub struct GuardTimeout;
