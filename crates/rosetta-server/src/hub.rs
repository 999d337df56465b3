//! The mapping hub: the single writer behind every session.
//!
//! All commands from all connections funnel through one mpsc queue into the
//! hub task, which owns the change log, the session registry and every
//! write to the tree. Readers elsewhere take short read locks on the shared
//! tree and always see a state between two changes.

use crate::config::ServerSettings;
use crate::error::{Result, ServerError};
use crate::protocol::{ClientMessage, ServerMessage, SessionId, UserInfo};
use crate::session::{DisconnectReason, Session, SessionState};
use rosetta_core::Entry;
use rosetta_tree::{Change, ChangeLog, ClassIndex, MappingTree, SnapshotEntry, TreeError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Shared tree state. Only the hub takes the write lock.
pub type SharedTree = Arc<RwLock<MappingTree>>;

const COMMAND_QUEUE: usize = 1024;
const CHANGE_FEED: usize = 256;

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// What subscribers to the hub's feed see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEvent {
    /// An edit was committed.
    Changed(Change),
    /// The whole tree was replaced by a snapshot and the log restarted at
    /// `version`.
    Reloaded { version: u64, mappings: usize },
}

#[derive(Debug)]
pub enum HubCommand {
    /// A transport was established. `outbound` feeds that connection's
    /// writer task.
    Connect {
        session: SessionId,
        outbound: mpsc::Sender<ServerMessage>,
    },

    /// A decoded frame from a connection.
    Client {
        session: SessionId,
        message: ClientMessage,
    },

    /// A frame from this connection could not be decoded.
    Nak { session: SessionId, reason: String },

    Disconnect {
        session: SessionId,
        reason: DisconnectReason,
    },

    /// Replaces the whole tree and resets the version to 0.
    LoadSnapshot {
        pairs: Vec<SnapshotEntry>,
        reply: oneshot::Sender<std::result::Result<u64, TreeError>>,
    },

    /// Drops sessions whose heartbeat has lapsed.
    Sweep,
}

/// Cloneable handle for talking to a running hub.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
    tree: SharedTree,
    changes: broadcast::Sender<TreeEvent>,
}

impl HubHandle {
    pub async fn send(&self, command: HubCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ServerError::HubClosed)
    }

    /// Returns the shared tree for read-only lookups and translation.
    pub fn tree(&self) -> SharedTree {
        self.tree.clone()
    }

    /// Subscribes to accepted changes and snapshot reloads. Dropping the
    /// receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.changes.subscribe()
    }

    pub async fn load_snapshot(&self, pairs: Vec<SnapshotEntry>) -> Result<u64> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::LoadSnapshot { pairs, reply }).await?;
        let version = rx.await.map_err(|_| ServerError::HubClosed)??;
        Ok(version)
    }

    pub async fn export_snapshot(&self) -> Vec<SnapshotEntry> {
        self.tree.read().await.export_snapshot()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Hub
// ─────────────────────────────────────────────────────────────────────────────

pub struct Hub {
    pub(crate) settings: Arc<ServerSettings>,
    pub(crate) tree: SharedTree,
    pub(crate) index: Arc<dyn ClassIndex>,
    pub(crate) log: ChangeLog,
    pub(crate) sessions: HashMap<SessionId, Session>,
    pub(crate) banned: HashSet<String>,
    pub(crate) synthetic_overrides: HashMap<Entry, bool>,
    changes: broadcast::Sender<TreeEvent>,
    commands: Option<mpsc::Receiver<HubCommand>>,
}

impl Hub {
    pub fn new(
        settings: Arc<ServerSettings>,
        tree: MappingTree,
        index: Arc<dyn ClassIndex>,
    ) -> (Hub, HubHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        let (changes, _) = broadcast::channel(CHANGE_FEED);

        let mut log = ChangeLog::new(settings.change_log_retention);
        log.reset(tree.version());

        let tree = Arc::new(RwLock::new(tree));
        let handle = HubHandle {
            commands: commands_tx,
            tree: tree.clone(),
            changes: changes.clone(),
        };

        let hub = Hub {
            banned: settings.banned.iter().cloned().collect(),
            settings,
            tree,
            index,
            log,
            sessions: HashMap::new(),
            synthetic_overrides: HashMap::new(),
            changes,
            commands: Some(commands_rx),
        };

        (hub, handle)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Processes commands until every handle is dropped.
    pub async fn run(mut self) {
        let Some(mut commands) = self.commands.take() else {
            warn!("Hub started without a command queue");
            return;
        };

        info!(
            "🧭 Mapping hub started at version {}",
            self.log.latest_version()
        );

        let mut heartbeat = tokio::time::interval(self.settings.heartbeat_interval());

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = heartbeat.tick() => self.sweep_expired(Instant::now()),
            }
        }

        info!("Mapping hub stopped");
    }

    pub async fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Connect { session, outbound } => self.connect(session, outbound),
            HubCommand::Client { session, message } => self.dispatch(session, message).await,
            HubCommand::Nak { session, reason } => {
                debug!("Nak to {}: {}", session, reason);
                self.send_to(session, ServerMessage::nak(reason));
            }
            HubCommand::Disconnect { session, reason } => self.disconnect(session, reason),
            HubCommand::LoadSnapshot { pairs, reply } => {
                let result = self.load_snapshot(pairs).await;
                let _ = reply.send(result);
            }
            HubCommand::Sweep => self.sweep_expired(Instant::now()),
        }
    }

    fn connect(&mut self, id: SessionId, outbound: mpsc::Sender<ServerMessage>) {
        let mut session = Session::new(id, outbound, Instant::now());
        if let Err(e) = session.transition(SessionState::Authenticating) {
            warn!("Session {} could not start: {}", id, e);
            return;
        }
        self.sessions.insert(id, session);
        debug!("Session {} awaiting login", id);
    }

    async fn dispatch(&mut self, id: SessionId, message: ClientMessage) {
        let (state, permission) = match self.sessions.get_mut(&id) {
            Some(session) => {
                session.touch(Instant::now());
                (session.state(), session.permission)
            }
            None => {
                debug!("Dropping {} from closed session {}", message.kind(), id);
                return;
            }
        };

        match (state, message) {
            (
                SessionState::Authenticating,
                ClientMessage::Login {
                    identity,
                    password,
                    protocol_version,
                    checksum,
                },
            ) => {
                self.handle_login(id, identity, password, protocol_version, checksum)
                    .await
            }
            (SessionState::Authenticating, ClientMessage::Heartbeat) => {
                self.handle_heartbeat(id).await
            }
            (SessionState::Authenticating, message) => {
                let reason = format!("log in before sending {}", message.kind());
                self.send_to(id, ServerMessage::nak(reason));
            }
            (SessionState::Active, ClientMessage::Login { .. }) => {
                self.send_to(id, ServerMessage::nak("already logged in"));
            }
            (SessionState::Active, message) => {
                let required = message.required_permission();
                if permission < required {
                    warn!(
                        "🚫 {} denied {} (has {}, needs {})",
                        self.name_of(id),
                        message.kind(),
                        permission,
                        required
                    );
                    self.send_to(
                        id,
                        ServerMessage::PermissionDenied {
                            action: message.kind().to_string(),
                            required,
                        },
                    );
                    return;
                }
                self.dispatch_active(id, message).await;
            }
            (state, message) => {
                debug!("Ignoring {} from {} session {}", message.kind(), state, id);
            }
        }
    }

    async fn dispatch_active(&mut self, id: SessionId, message: ClientMessage) {
        match message {
            ClientMessage::EditRequest {
                entry,
                base_version,
                edit,
            } => self.handle_edit(id, entry, base_version, edit).await,
            ClientMessage::Heartbeat => self.handle_heartbeat(id).await,
            ClientMessage::Message { text } => self.handle_chat(id, text),
            ClientMessage::Resync { since } => self.handle_resync(id, since).await,
            ClientMessage::Kick { session, reason } => self.handle_kick(id, session, reason),
            ClientMessage::Ban { identity, reason } => self.handle_ban(id, identity, reason),
            ClientMessage::Unban { identity } => self.handle_unban(id, identity),
            ClientMessage::SetPermission { session, level } => {
                self.handle_set_permission(id, session, level)
            }
            ClientMessage::SetSynthetic { entry, synthetic } => {
                self.handle_set_synthetic(id, entry, synthetic)
            }
            ClientMessage::Logout => self.disconnect(id, DisconnectReason::Logout),
            ClientMessage::Login { .. } => {}
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Delivery
    // ─────────────────────────────────────────────────────────────────────

    /// Queues a message for one session. A full or closed queue ends the
    /// session.
    pub(crate) fn send_to(&mut self, id: SessionId, message: ServerMessage) -> bool {
        let result = match self.sessions.get(&id) {
            Some(session) => session.try_send(message),
            None => return false,
        };

        match result {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.disconnect(id, DisconnectReason::Backpressure);
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.disconnect(id, DisconnectReason::Transport);
                false
            }
        }
    }

    /// Queues a message for every active session.
    pub(crate) fn fan_out(&mut self, message: ServerMessage) {
        let mut failed = Vec::new();
        for session in self.sessions.values().filter(|s| s.is_active()) {
            if let Err(e) = session.try_send(message.clone()) {
                failed.push((session.id, failure_reason(&e)));
            }
        }
        for (id, reason) in failed {
            self.disconnect(id, reason);
        }
    }

    /// Sends an accepted change to every active session and subscriber.
    pub(crate) fn broadcast_change(&mut self, change: Change) {
        let mut failed = Vec::new();
        for session in self.sessions.values_mut().filter(|s| s.is_active()) {
            match session.try_send(ServerMessage::ChangeBroadcast(change.clone())) {
                Ok(()) => session.last_ack_version = change.version,
                Err(e) => failed.push((session.id, failure_reason(&e))),
            }
        }
        for (id, reason) in failed {
            self.disconnect(id, reason);
        }

        // No subscribers is fine.
        let _ = self.changes.send(TreeEvent::Changed(change));
    }

    pub(crate) fn user_list(&self) -> Vec<UserInfo> {
        let mut users: Vec<UserInfo> = self
            .sessions
            .values()
            .filter(|s| s.is_active())
            .filter_map(|s| {
                s.identity.as_ref().map(|identity| UserInfo {
                    identity: identity.clone(),
                    session: s.id,
                    permission: s.permission,
                })
            })
            .collect();
        users.sort_by(|a, b| a.identity.cmp(&b.identity));
        users
    }

    pub(crate) fn broadcast_user_list(&mut self) {
        let users = self.user_list();
        self.fan_out(ServerMessage::UserList { users });
    }

    pub(crate) fn name_of(&self, id: SessionId) -> String {
        self.sessions
            .get(&id)
            .map(|s| s.display_name())
            .unwrap_or_else(|| id.to_string())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Ends a session. Safe to call for sessions that are already gone.
    pub(crate) fn disconnect(&mut self, id: SessionId, reason: DisconnectReason) {
        let Some(mut session) = self.sessions.remove(&id) else {
            return;
        };
        let was_active = session.is_active();
        let name = session.display_name();

        if reason.notifies_client() {
            let _ = session.try_send(ServerMessage::Kick {
                session: id,
                reason: reason.to_string(),
            });
        }
        if let Err(e) = session.transition(SessionState::Disconnected) {
            debug!("Session {}: {}", id, e);
        }
        // Dropping the session closes its outbound queue.
        drop(session);

        match reason {
            DisconnectReason::Transport | DisconnectReason::Logout => {
                info!("👋 {} disconnected ({})", name, reason)
            }
            _ => warn!("⚠️  {} disconnected ({})", name, reason),
        }

        if was_active {
            self.fan_out(ServerMessage::notice(format!("{} left: {}", name, reason)));
            self.broadcast_user_list();
        }
    }

    /// Disconnects sessions that have not been heard from within the
    /// configured timeout.
    pub fn sweep_expired(&mut self, now: Instant) {
        let timeout = self.settings.heartbeat_timeout();
        let expired: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.is_expired(now, timeout))
            .map(|s| s.id)
            .collect();

        for id in expired {
            self.disconnect(id, DisconnectReason::HeartbeatTimeout);
        }
    }

    async fn load_snapshot(
        &mut self,
        pairs: Vec<SnapshotEntry>,
    ) -> std::result::Result<u64, TreeError> {
        let (version, mappings) = {
            let mut tree = self.tree.write().await;
            tree.load_snapshot(pairs)?;
            (tree.version(), tree.export_snapshot())
        };
        self.log.reset(version);

        info!("📦 Loaded snapshot with {} mappings", mappings.len());

        for session in self.sessions.values_mut() {
            session.last_ack_version = version;
        }
        let count = mappings.len();
        self.fan_out(ServerMessage::SyncMappings { version, mappings });
        let _ = self.changes.send(TreeEvent::Reloaded {
            version,
            mappings: count,
        });
        Ok(version)
    }
}

fn failure_reason<T>(error: &TrySendError<T>) -> DisconnectReason {
    match error {
        TrySendError::Full(_) => DisconnectReason::Backpressure,
        TrySendError::Closed(_) => DisconnectReason::Transport,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
