use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http request failed: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("failed to serialize/deserialize queue entry: {0}")]
    Postcard(#[from] postcard::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("domain write-lock acquisition timed out after {0:?}")]
    LockTimeout(std::time::Duration),

    #[error("pod {0} is marked fatal and is no longer serviced")]
    PodFatal(usize),
}
