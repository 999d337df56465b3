//! Handlers for client requests.
//!
//! Each handler implements one message of the protocol on top of the hub's
//! state. Handlers run inside the hub task, so they see and mutate state
//! one command at a time.

use crate::config::RemovalPolicy;
use crate::hub::Hub;
use crate::protocol::{LoginFailure, PermissionLevel, ServerMessage, SessionId};
use crate::session::DisconnectReason;
use rosetta_core::Entry;
use rosetta_tree::{MappingEdit, Rejection, RuleId, Severity, TreeError, Validator};
use tracing::{debug, info, warn};

impl Hub {
    /// Handles a login from an authenticating session.
    pub(crate) async fn handle_login(
        &mut self,
        id: SessionId,
        identity: String,
        password: String,
        protocol_version: u32,
        checksum: Option<String>,
    ) {
        let failure = self.check_login(&identity, &password, protocol_version, checksum.as_deref());
        if let Some(reason) = failure {
            warn!("🚫 Login as '{}' rejected: {}", identity, reason);
            self.send_to(
                id,
                ServerMessage::SessionRejected {
                    reason,
                    message: reason.to_string(),
                },
            );
            self.disconnect(id, DisconnectReason::LoginRejected);
            return;
        }

        let permission = self.settings.permission_for(&identity);
        let (version, mappings) = {
            let tree = self.tree.read().await;
            (tree.version(), tree.export_snapshot())
        };

        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        if let Err(e) = session.activate(identity.clone(), permission, version) {
            warn!("Session {} could not activate: {}", id, e);
            return;
        }

        info!("✅ {} joined as {} at version {}", identity, permission, version);

        self.send_to(
            id,
            ServerMessage::SessionAccepted {
                session: id,
                permission,
                version,
            },
        );
        self.send_to(id, ServerMessage::SyncMappings { version, mappings });
        self.fan_out(ServerMessage::notice(format!("{} joined", identity)));
        self.broadcast_user_list();
    }

    fn check_login(
        &self,
        identity: &str,
        password: &str,
        protocol_version: u32,
        checksum: Option<&str>,
    ) -> Option<LoginFailure> {
        if protocol_version != self.settings.protocol_version {
            return Some(LoginFailure::ProtocolMismatch);
        }
        if identity.trim().is_empty() {
            return Some(LoginFailure::InvalidIdentity);
        }
        if self.banned.contains(identity) {
            return Some(LoginFailure::Banned);
        }
        if !self.settings.password.is_empty() && password != self.settings.password {
            return Some(LoginFailure::BadPassword);
        }
        if let Some(expected) = self.settings.checksum.as_deref() {
            if checksum != Some(expected) {
                return Some(LoginFailure::ChecksumMismatch);
            }
        }
        let taken = self
            .sessions
            .values()
            .any(|s| s.is_active() && s.identity.as_deref() == Some(identity));
        if taken {
            return Some(LoginFailure::IdentityTaken);
        }
        None
    }

    /// Handles an edit: conflict check, validation, commit, broadcast.
    ///
    /// The write lock is held from the conflict check through the commit,
    /// and every rejection path returns before the tree is touched.
    pub(crate) async fn handle_edit(
        &mut self,
        id: SessionId,
        entry: Entry,
        base_version: u64,
        edit: MappingEdit,
    ) {
        let tree = self.tree.clone();
        let mut tree = tree.write().await;

        if tree.entry_version(&entry) > base_version {
            let current = tree.lookup(&entry).cloned();
            let version = tree.version();
            drop(tree);

            debug!("Edit of {} by {} is stale (base {})", entry, id, base_version);
            self.send_to(
                id,
                ServerMessage::EditConflict {
                    entry,
                    current,
                    version,
                },
            );
            return;
        }

        let verdict = Validator::new(&tree, self.index.as_ref(), self.settings.validation_policy())
            .with_overrides(&self.synthetic_overrides)
            .validate_edit(&entry, &edit);

        if let Some(rule) = verdict.errors.first().map(|r| r.rule) {
            drop(tree);
            info!("❌ Edit of {} by {} rejected: {}", entry, self.name_of(id), rule);
            self.send_to(
                id,
                ServerMessage::EditRejected {
                    entry,
                    rule,
                    reasons: verdict.errors,
                },
            );
            return;
        }

        let cascade = self.settings.removal_policy == RemovalPolicy::Cascade;
        let change = match tree.commit(entry.clone(), edit, cascade, Some(id)) {
            Ok(Some(change)) => change,
            Ok(None) => {
                let version = tree.version();
                drop(tree);
                debug!("Edit of {} by {} changes nothing", entry, self.name_of(id));
                self.send_to(
                    id,
                    ServerMessage::EditAccepted {
                        entry,
                        version,
                        warnings: verdict.warnings,
                    },
                );
                return;
            }
            Err(TreeError::WouldOrphan {
                entry: target,
                descendants,
            }) => {
                drop(tree);
                let message = format!(
                    "removing {} would orphan {} mapped descendant(s)",
                    target,
                    descendants.len()
                );
                let mut offending = vec![target];
                offending.extend(descendants);

                self.send_to(
                    id,
                    ServerMessage::EditRejected {
                        entry,
                        rule: RuleId::WouldOrphan,
                        reasons: vec![Rejection {
                            rule: RuleId::WouldOrphan,
                            severity: Severity::Hard,
                            message,
                            offending,
                        }],
                    },
                );
                return;
            }
            Err(e) => {
                drop(tree);
                warn!("Edit of {} failed: {}", entry, e);
                self.send_to(id, ServerMessage::nak(e.to_string()));
                return;
            }
        };
        drop(tree);

        for warning in &verdict.warnings {
            debug!("Advisory on {}: {}", entry, warning.message);
        }
        info!(
            "✏️  {} changed {} (version {})",
            self.name_of(id),
            entry,
            change.version
        );

        self.log.append(change.clone());
        self.send_to(
            id,
            ServerMessage::EditAccepted {
                entry,
                version: change.version,
                warnings: verdict.warnings,
            },
        );
        self.broadcast_change(change);
    }

    pub(crate) async fn handle_heartbeat(&mut self, id: SessionId) {
        let version = self.tree.read().await.version();
        self.send_to(id, ServerMessage::HeartbeatAck { version });
    }

    pub(crate) fn handle_chat(&mut self, id: SessionId, text: String) {
        if text.trim().is_empty() {
            return;
        }
        let from = self.name_of(id);
        debug!("💬 {}: {}", from, text);
        self.fan_out(ServerMessage::Message {
            from: Some(from),
            text,
        });
    }

    /// Sends the changes after `since`, or the full tree when the log no
    /// longer covers that range.
    pub(crate) async fn handle_resync(&mut self, id: SessionId, since: u64) {
        let reply = match self.log.since(since) {
            Some(changes) => ServerMessage::ChangeReplay {
                version: self.log.latest_version(),
                changes,
            },
            None => {
                let tree = self.tree.read().await;
                ServerMessage::SyncMappings {
                    version: tree.version(),
                    mappings: tree.export_snapshot(),
                }
            }
        };

        let version = match &reply {
            ServerMessage::ChangeReplay { version, .. }
            | ServerMessage::SyncMappings { version, .. } => *version,
            _ => 0,
        };
        if self.send_to(id, reply) {
            if let Some(session) = self.sessions.get_mut(&id) {
                session.last_ack_version = version;
            }
        }
    }

    pub(crate) fn handle_kick(&mut self, id: SessionId, target: SessionId, reason: String) {
        if !self.sessions.contains_key(&target) {
            self.send_to(id, ServerMessage::nak(format!("no session {}", target)));
            return;
        }
        info!("👢 {} kicked {}", self.name_of(id), self.name_of(target));
        self.disconnect(target, DisconnectReason::Kicked(reason));
    }

    /// Bans an identity and disconnects every session using it.
    pub(crate) fn handle_ban(&mut self, id: SessionId, identity: String, reason: String) {
        info!("⛔ {} banned '{}'", self.name_of(id), identity);

        let targets: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.identity.as_deref() == Some(identity.as_str()))
            .map(|s| s.id)
            .collect();
        self.banned.insert(identity);

        for target in targets {
            self.disconnect(target, DisconnectReason::Banned(reason.clone()));
        }
    }

    pub(crate) fn handle_unban(&mut self, id: SessionId, identity: String) {
        if self.banned.remove(&identity) {
            info!("{} unbanned '{}'", self.name_of(id), identity);
            self.send_to(id, ServerMessage::notice(format!("{} unbanned", identity)));
        } else {
            self.send_to(id, ServerMessage::nak(format!("'{}' is not banned", identity)));
        }
    }

    pub(crate) fn handle_set_permission(
        &mut self,
        id: SessionId,
        target: SessionId,
        level: PermissionLevel,
    ) {
        let Some(session) = self.sessions.get_mut(&target).filter(|s| s.is_active()) else {
            self.send_to(id, ServerMessage::nak(format!("no session {}", target)));
            return;
        };
        session.permission = level;
        let name = session.display_name();

        info!("🔑 {} set {} to {}", self.name_of(id), name, level);
        self.send_to(
            target,
            ServerMessage::notice(format!("your permission level is now {}", level)),
        );
        self.broadcast_user_list();
    }

    pub(crate) fn handle_set_synthetic(&mut self, id: SessionId, entry: Entry, synthetic: bool) {
        info!(
            "{} marked {} as {}",
            self.name_of(id),
            entry,
            if synthetic { "synthetic" } else { "not synthetic" }
        );
        self.synthetic_overrides.insert(entry.clone(), synthetic);
        self.send_to(
            id,
            ServerMessage::notice(format!(
                "{} is now {}",
                entry,
                if synthetic { "synthetic" } else { "renamable" }
            )),
        );
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ServerSettings;
    use crate::hub::tests::{drain, hub_with, join};
    use crate::hub::HubCommand;
    use crate::protocol::{ClientMessage, PermissionLevel, ServerMessage};
    use rosetta_core::{Entry, EntryMapping};
    use rosetta_tree::{MappingEdit, RuleId, StaticIndex};
    use std::collections::BTreeMap;

    fn settings_with_admin() -> ServerSettings {
        ServerSettings {
            permissions: BTreeMap::from([("root".to_string(), PermissionLevel::Admin)]),
            ..ServerSettings::default()
        }
    }

    #[tokio::test]
    async fn test_kick_requires_admin() {
        let (mut hub, _handle) = hub_with(settings_with_admin(), StaticIndex::empty());
        let (root, mut root_rx) = join(&mut hub, "root", 16).await;
        let (ada, mut ada_rx) = join(&mut hub, "ada", 16).await;
        drain(&mut root_rx);

        hub.handle(HubCommand::Client {
            session: ada,
            message: ClientMessage::Kick { session: root, reason: String::new() },
        })
        .await;
        assert!(matches!(
            drain(&mut ada_rx)[..],
            [ServerMessage::PermissionDenied { required: PermissionLevel::Admin, .. }]
        ));

        hub.handle(HubCommand::Client {
            session: root,
            message: ClientMessage::Kick { session: ada, reason: "spam".into() },
        })
        .await;
        match ada_rx.recv().await {
            Some(ServerMessage::Kick { reason, .. }) => assert_eq!(reason, "kicked: spam"),
            other => panic!("expected kick, got {:?}", other),
        }
        assert!(ada_rx.recv().await.is_none());

        let users = drain(&mut root_rx)
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::UserList { users } => Some(users),
                _ => None,
            })
            .last()
            .unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].identity, "root");
    }

    #[tokio::test]
    async fn test_ban_and_unban() {
        let (mut hub, _handle) = hub_with(settings_with_admin(), StaticIndex::empty());
        let (root, mut root_rx) = join(&mut hub, "root", 16).await;
        let (_ada, mut ada_rx) = join(&mut hub, "ada", 16).await;

        hub.handle(HubCommand::Client {
            session: root,
            message: ClientMessage::Ban { identity: "ada".into(), reason: String::new() },
        })
        .await;
        assert!(matches!(ada_rx.recv().await, Some(ServerMessage::Kick { .. })));
        assert!(hub.banned.contains("ada"));

        hub.handle(HubCommand::Client {
            session: root,
            message: ClientMessage::Unban { identity: "ada".into() },
        })
        .await;
        assert!(!hub.banned.contains("ada"));
        drain(&mut root_rx);

        let (_ada, _ada_rx) = join(&mut hub, "ada", 16).await;
    }

    #[tokio::test]
    async fn test_set_permission() {
        let (mut hub, _handle) = hub_with(settings_with_admin(), StaticIndex::empty());
        let (root, _root_rx) = join(&mut hub, "root", 16).await;
        let (ada, mut ada_rx) = join(&mut hub, "ada", 16).await;

        hub.handle(HubCommand::Client {
            session: root,
            message: ClientMessage::SetPermission {
                session: ada,
                level: PermissionLevel::Observer,
            },
        })
        .await;
        drain(&mut ada_rx);

        let entry = Entry::class("a").unwrap();
        hub.handle(HubCommand::Client {
            session: ada,
            message: ClientMessage::EditRequest {
                entry,
                base_version: 0,
                edit: MappingEdit::set(EntryMapping::named("net/A")),
            },
        })
        .await;
        assert!(matches!(
            drain(&mut ada_rx)[..],
            [ServerMessage::PermissionDenied { .. }]
        ));
    }

    #[tokio::test]
    async fn test_synthetic_override() {
        let bridge = Entry::class("a").unwrap().method("access$000", "()V").unwrap();
        let mut index = StaticIndex::empty();
        index.insert(bridge.clone(), true);

        let (mut hub, _handle) = hub_with(settings_with_admin(), index);
        let (root, mut rx) = join(&mut hub, "root", 16).await;

        let rename = ClientMessage::EditRequest {
            entry: bridge.clone(),
            base_version: 0,
            edit: MappingEdit::set(EntryMapping::named("bridge")),
        };

        hub.handle(HubCommand::Client { session: root, message: rename.clone() }).await;
        assert!(matches!(
            drain(&mut rx).first(),
            Some(ServerMessage::EditRejected { rule: RuleId::SyntheticEntry, .. })
        ));

        hub.handle(HubCommand::Client {
            session: root,
            message: ClientMessage::SetSynthetic { entry: bridge, synthetic: false },
        })
        .await;
        drain(&mut rx);

        hub.handle(HubCommand::Client { session: root, message: rename }).await;
        assert!(matches!(
            drain(&mut rx).first(),
            Some(ServerMessage::EditAccepted { version: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_chat_and_heartbeat() {
        let (mut hub, _handle) = hub_with(ServerSettings::default(), StaticIndex::empty());
        let (ada, mut ada_rx) = join(&mut hub, "ada", 16).await;
        let (_bob, mut bob_rx) = join(&mut hub, "bob", 16).await;
        drain(&mut ada_rx);

        hub.handle(HubCommand::Client {
            session: ada,
            message: ClientMessage::Message { text: "hello".into() },
        })
        .await;
        assert_eq!(
            drain(&mut bob_rx),
            vec![ServerMessage::Message { from: Some("ada".into()), text: "hello".into() }]
        );

        hub.handle(HubCommand::Client { session: ada, message: ClientMessage::Heartbeat }).await;
        let msgs = drain(&mut ada_rx);
        assert_eq!(msgs.last(), Some(&ServerMessage::HeartbeatAck { version: 0 }));
    }

    #[tokio::test]
    async fn test_logout_broadcasts_user_list() {
        let (mut hub, _handle) = hub_with(ServerSettings::default(), StaticIndex::empty());
        let (ada, mut ada_rx) = join(&mut hub, "ada", 16).await;
        let (_bob, mut bob_rx) = join(&mut hub, "bob", 16).await;
        drain(&mut ada_rx);

        hub.handle(HubCommand::Client { session: ada, message: ClientMessage::Logout }).await;
        assert!(ada_rx.recv().await.is_none());

        let msgs = drain(&mut bob_rx);
        assert!(matches!(msgs.last(), Some(ServerMessage::UserList { users }) if users.len() == 1));
    }
}
