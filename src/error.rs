use thiserror::Error;

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced by the cache. The core never swallows a failure:
/// every operation returns one of these at its boundary.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("operation attempted before the first clock tick")]
    NotInitialised,
    #[error(
        "lock word cannot represent {max_threads} threads across {peer_count} peers (max {max})"
    )]
    ResourceOverflow {
        max_threads: u32,
        peer_count: u32,
        max: u32,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("read did not become fresh after {0} retries")]
    Timeout(u32),
}
