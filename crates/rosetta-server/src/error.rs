use crate::codec::ProtocolError;
use crate::session::SessionState;
use rosetta_tree::TreeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid settings: {0}")]
    Settings(String),

    #[error("failed to parse settings: {0}")]
    SettingsFormat(#[from] serde_json::Error),

    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("session cannot move from {from} to {to}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },

    #[error("the hub has shut down")]
    HubClosed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Tree(#[from] TreeError),
}

pub type Result<T> = std::result::Result<T, ServerError>;
