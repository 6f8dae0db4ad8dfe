use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Connection failed after {attempts} attempts")]
    ConnectionFailed { attempts: u32 },

    #[error("A connection attempt is already in progress")]
    ConnectInProgress,

    #[error("Previous message is still awaiting a response")]
    SendPending,

    #[error("Not connected")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session has been shut down")]
    ShutDown,
}
