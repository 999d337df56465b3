//! Typed messages exchanged with clients.
//!
//! Every frame is one JSON object `{"type": ..., "payload": ...}`.

use rosetta_core::{Entry, EntryMapping};
use rosetta_tree::{Change, MappingEdit, Rejection, RuleId, SnapshotEntry};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Version spoken by this server; logins announcing another are refused.
pub const PROTOCOL_VERSION: u32 = 0;

pub type SessionId = Uuid;

/// What a session may do.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    /// Read-only.
    Observer,
    /// Rename, document and remove.
    #[default]
    Editor,
    /// Editor rights plus kick, ban and permission changes.
    Admin,
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Observer => "observer",
            Self::Editor => "editor",
            Self::Admin => "admin",
        };
        write!(f, "{}", s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client → server
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    Login {
        identity: String,
        #[serde(default)]
        password: String,
        #[serde(default)]
        protocol_version: u32,
        /// Checksum of the analysed input the client has open.
        #[serde(default)]
        checksum: Option<String>,
    },

    EditRequest {
        entry: Entry,
        /// Last tree version at which the client observed this entry.
        base_version: u64,
        edit: MappingEdit,
    },

    Heartbeat,

    Message {
        text: String,
    },

    /// Asks for every change after `since`.
    Resync {
        since: u64,
    },

    Kick {
        session: SessionId,
        #[serde(default)]
        reason: String,
    },

    Ban {
        identity: String,
        #[serde(default)]
        reason: String,
    },

    Unban {
        identity: String,
    },

    SetPermission {
        session: SessionId,
        level: PermissionLevel,
    },

    /// Administrative override of the synthetic flag for one entry.
    SetSynthetic {
        entry: Entry,
        synthetic: bool,
    },

    Logout,
}

impl ClientMessage {
    /// Short name used in logs and permission errors.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Login { .. } => "login",
            ClientMessage::EditRequest { .. } => "edit",
            ClientMessage::Heartbeat => "heartbeat",
            ClientMessage::Message { .. } => "message",
            ClientMessage::Resync { .. } => "resync",
            ClientMessage::Kick { .. } => "kick",
            ClientMessage::Ban { .. } => "ban",
            ClientMessage::Unban { .. } => "unban",
            ClientMessage::SetPermission { .. } => "set_permission",
            ClientMessage::SetSynthetic { .. } => "set_synthetic",
            ClientMessage::Logout => "logout",
        }
    }

    /// The lowest level allowed to send this message once logged in.
    pub fn required_permission(&self) -> PermissionLevel {
        match self {
            ClientMessage::EditRequest { .. } => PermissionLevel::Editor,
            ClientMessage::Kick { .. }
            | ClientMessage::Ban { .. }
            | ClientMessage::Unban { .. }
            | ClientMessage::SetPermission { .. }
            | ClientMessage::SetSynthetic { .. } => PermissionLevel::Admin,
            _ => PermissionLevel::Observer,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server → client
// ─────────────────────────────────────────────────────────────────────────────

/// Why a login was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginFailure {
    ProtocolMismatch,
    BadPassword,
    ChecksumMismatch,
    Banned,
    IdentityTaken,
    InvalidIdentity,
}

impl fmt::Display for LoginFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ProtocolMismatch => "protocol version mismatch",
            Self::BadPassword => "wrong password",
            Self::ChecksumMismatch => "input checksum mismatch",
            Self::Banned => "identity is banned",
            Self::IdentityTaken => "identity already in use",
            Self::InvalidIdentity => "identity must not be blank",
        };
        write!(f, "{}", s)
    }
}

/// One row of the user list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub identity: String,
    pub session: SessionId,
    pub permission: PermissionLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    SessionAccepted {
        session: SessionId,
        permission: PermissionLevel,
        version: u64,
    },

    SessionRejected {
        reason: LoginFailure,
        message: String,
    },

    /// Full tree at `version`.
    SyncMappings {
        version: u64,
        mappings: Vec<SnapshotEntry>,
    },

    EditAccepted {
        entry: Entry,
        version: u64,
        /// Advisory findings that did not block the edit.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<Rejection>,
    },

    /// The entry changed after the client's base version.
    EditConflict {
        entry: Entry,
        current: Option<EntryMapping>,
        version: u64,
    },

    EditRejected {
        entry: Entry,
        rule: RuleId,
        reasons: Vec<Rejection>,
    },

    PermissionDenied {
        action: String,
        required: PermissionLevel,
    },

    ChangeBroadcast(Change),

    /// Changes a client missed, oldest first.
    ChangeReplay {
        version: u64,
        changes: Vec<Change>,
    },

    /// Active users sorted by identity.
    UserList {
        users: Vec<UserInfo>,
    },

    /// Chat line. `from` is absent for server notices.
    Message {
        #[serde(default)]
        from: Option<String>,
        text: String,
    },

    Kick {
        session: SessionId,
        reason: String,
    },

    /// A frame that could not be accepted. The connection stays open.
    Nak {
        reason: String,
    },

    HeartbeatAck {
        version: u64,
    },
}

impl ServerMessage {
    pub fn notice(text: impl Into<String>) -> Self {
        ServerMessage::Message {
            from: None,
            text: text.into(),
        }
    }

    pub fn nak(reason: impl Into<String>) -> Self {
        ServerMessage::Nak {
            reason: reason.into(),
        }
    }
}
