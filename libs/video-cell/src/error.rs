use thiserror::Error;

#[derive(Error, Debug)]
pub enum VideoSessionError {
    #[error("Host role required for this action")]
    Unauthorized,

    #[error("Invalid call metadata: {0}")]
    InvalidCallMetadata(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Cleanup step failed: {0}")]
    Cleanup(String),
}
