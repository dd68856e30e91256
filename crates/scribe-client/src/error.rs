use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScribeError>;

#[derive(Debug, Error)]
pub enum ScribeError {
    /// Network-level failure: connect, TLS, abrupt termination.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a non-success HTTP status.
    #[error("http status {status}: {body}")]
    Status { status: u16, body: String },

    /// A wire payload that could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// A `type: "error"` payload delivered over an otherwise healthy stream.
    #[error("{0}")]
    Domain(String),

    #[error("{0}")]
    Message(String),
}

impl ScribeError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ScribeError::Transport(_) | ScribeError::Status { .. })
    }
}

impl From<reqwest::Error> for ScribeError {
    fn from(e: reqwest::Error) -> Self {
        ScribeError::Transport(e.to_string())
    }
}
