//! Per-connection session state.

use crate::error::{Result, ServerError};
use crate::protocol::{PermissionLevel, ServerMessage, SessionId};
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

/// Lifecycle of a session. `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Authenticating,
    Active,
    Disconnected,
}

impl SessionState {
    pub fn can_transition(self, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Connecting, Authenticating)
                | (Connecting, Disconnected)
                | (Authenticating, Active)
                | (Authenticating, Disconnected)
                | (Active, Disconnected)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Active => "active",
            Self::Disconnected => "disconnected",
        };
        write!(f, "{}", s)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The socket closed or failed.
    Transport,
    Logout,
    HeartbeatTimeout,
    /// The outbound buffer passed the watermark.
    Backpressure,
    LoginRejected,
    Kicked(String),
    Banned(String),
}

impl DisconnectReason {
    /// Whether the client should be told with a `Kick` before the socket
    /// is closed.
    pub fn notifies_client(&self) -> bool {
        matches!(
            self,
            DisconnectReason::HeartbeatTimeout
                | DisconnectReason::Kicked(_)
                | DisconnectReason::Banned(_)
        )
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport => write!(f, "connection lost"),
            Self::Logout => write!(f, "logged out"),
            Self::HeartbeatTimeout => write!(f, "heartbeat timed out"),
            Self::Backpressure => write!(f, "too far behind"),
            Self::LoginRejected => write!(f, "login rejected"),
            Self::Kicked(reason) if reason.is_empty() => write!(f, "kicked"),
            Self::Kicked(reason) => write!(f, "kicked: {}", reason),
            Self::Banned(reason) if reason.is_empty() => write!(f, "banned"),
            Self::Banned(reason) => write!(f, "banned: {}", reason),
        }
    }
}

/// Server-side state of one client connection.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub identity: Option<String>,
    pub permission: PermissionLevel,
    state: SessionState,
    /// Highest tree version this client has been sent.
    pub last_ack_version: u64,
    pub last_seen: Instant,
    outbound: mpsc::Sender<ServerMessage>,
}

impl Session {
    pub fn new(id: SessionId, outbound: mpsc::Sender<ServerMessage>, now: Instant) -> Self {
        Self {
            id,
            identity: None,
            permission: PermissionLevel::Observer,
            state: SessionState::Connecting,
            last_ack_version: 0,
            last_seen: now,
            outbound,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn transition(&mut self, to: SessionState) -> Result<()> {
        if !self.state.can_transition(to) {
            return Err(ServerError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Moves an authenticating session to `Active`.
    pub fn activate(
        &mut self,
        identity: String,
        permission: PermissionLevel,
        version: u64,
    ) -> Result<()> {
        self.transition(SessionState::Active)?;
        self.identity = Some(identity);
        self.permission = permission;
        self.last_ack_version = version;
        Ok(())
    }

    pub fn permits(&self, required: PermissionLevel) -> bool {
        self.is_active() && self.permission >= required
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_seen = now;
    }

    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }

    /// Name shown in logs and notices.
    pub fn display_name(&self) -> String {
        match &self.identity {
            Some(identity) => identity.clone(),
            None => self.id.to_string(),
        }
    }

    /// Queues a message without waiting.
    pub fn try_send(
        &self,
        message: ServerMessage,
    ) -> std::result::Result<(), mpsc::error::TrySendError<ServerMessage>> {
        self.outbound.try_send(message)
    }
}
