use thiserror::Error;

#[derive(Debug, Error)]
pub enum LiveTailError {
    #[error("invalid console url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("console url '{0}' cannot carry a path")]
    CannotBeABase(String),
    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),
    #[error("unknown level filter '{0}'")]
    UnknownLevel(String),
    #[error("live tail driver has stopped")]
    Closed,
}
