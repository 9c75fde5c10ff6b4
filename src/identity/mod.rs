//! Visitor and session identity resolution.
//!
//! Runs once when a session is built. The client id identifies the visitor
//! across visits; the session id counts visits, rolling over after thirty
//! minutes of inactivity. Both are read from (and migrated into) the
//! configured storage location.

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::IdentityConfig;
use crate::storage::{SessionRecord, Slot, StorageAdapter, StorageLocation, DEFAULT_SESSION_ID};

/// Inactivity window after which a visit counts as a new session.
pub const SESSION_IDLE_TIMEOUT_MS: i64 = 30 * 60 * 1000;

/// Resolved identity of the current visitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub client_id: String,
    pub session_id: u64,
    /// `None` when session resolution did not run (headless or explicit id).
    pub session_is_new: Option<bool>,
    pub new_to_beacon: Option<bool>,
}

/// Outcome of session resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub session_id: u64,
    pub session_is_new: Option<bool>,
    pub new_to_beacon: Option<bool>,
}

/// Generate a fresh visitor id in UUID v4 form.
pub fn generate_client_id() -> String {
    Uuid::new_v4().to_string()
}

/// Resolves client and session ids against a storage adapter.
pub struct IdentityResolver<'a> {
    config: &'a IdentityConfig,
    storage: &'a StorageAdapter,
}

impl<'a> IdentityResolver<'a> {
    /// Create a resolver. Persistence is governed by `storage.is_enabled()`.
    pub fn new(config: &'a IdentityConfig, storage: &'a StorageAdapter) -> Self {
        Self { config, storage }
    }

    /// Resolve both identities at the current wall-clock time.
    pub async fn resolve(&self) -> Identity {
        let client_id = self.resolve_client_id().await;
        let session = self.resolve_session(Utc::now().timestamp_millis()).await;

        info!(
            client_id = %client_id,
            session_id = session.session_id,
            session_is_new = ?session.session_is_new,
            persistent = self.storage.is_enabled(),
            "Identity resolved"
        );

        Identity {
            client_id,
            session_id: session.session_id,
            session_is_new: session.session_is_new,
            new_to_beacon: session.new_to_beacon,
        }
    }

    /// Resolve the visitor id.
    pub async fn resolve_client_id(&self) -> String {
        if let Some(explicit) = self.config.client_id.as_ref().filter(|id| !id.is_empty()) {
            return explicit.clone();
        }

        if !self.storage.is_enabled() {
            return generate_client_id();
        }

        let location = self.config.client_id_storage;
        let preferred = Slot::new(location, self.config.client_id_key(location));
        let fallbacks = [
            Slot::new(location.other(), self.config.client_id_key(location.other())),
            Slot::cookie(&self.config.legacy_cookie_name_client_id),
        ];

        match self.storage.take_migrating(preferred, &fallbacks).await {
            Some(found) => {
                if location == StorageLocation::Cookie && !found.migrated {
                    // Re-set so the expiry date moves forward.
                    self.storage.delete(location, preferred.key).await;
                    self.storage.write(location, preferred.key, &found.value).await;
                }
                debug!(
                    source = %found.source,
                    migrated = found.migrated,
                    "Using persisted client id"
                );
                found.value
            }
            None => {
                let client_id = generate_client_id();
                self.storage.write(location, preferred.key, &client_id).await;
                debug!(location = %location, "Issued new client id");
                client_id
            }
        }
    }

    /// Resolve the session id as of `now` (epoch milliseconds).
    pub async fn resolve_session(&self, now: i64) -> SessionState {
        if let Some(explicit) = self.config.session_id {
            return SessionState {
                session_id: explicit.max(DEFAULT_SESSION_ID),
                session_is_new: None,
                new_to_beacon: None,
            };
        }

        if !self.storage.is_enabled() {
            return SessionState {
                session_id: DEFAULT_SESSION_ID,
                session_is_new: None,
                new_to_beacon: None,
            };
        }

        let location = self.config.session_id_storage;
        let data_key = self.config.session_data_key(location);
        let fallbacks = [Slot::new(
            location.other(),
            self.config.session_data_key(location.other()),
        )];

        let record = self
            .storage
            .take_migrating(Slot::new(location, data_key), &fallbacks)
            .await
            .and_then(|found| SessionRecord::parse(&found.value))
            .map(|(format, record)| {
                debug!(format = ?format, session_id = record.session_id, "Read session record");
                record
            });

        let state = next_session_state(record.as_ref(), now);
        self.persist_session(location, &state, now).await;
        state
    }

    async fn persist_session(&self, location: StorageLocation, state: &SessionState, now: i64) {
        let id_key = self.config.session_id_key(location);
        let data_key = self.config.session_data_key(location);
        let record = SessionRecord::new(
            state.session_id,
            now,
            state.session_is_new == Some(true),
        );

        if location == StorageLocation::Cookie && self.storage.cookie_options().domain.is_some() {
            // Re-issue with the domain attribute.
            self.storage.delete(location, id_key).await;
            self.storage.delete(location, data_key).await;
        }

        self.storage
            .write(location, id_key, &state.session_id.to_string())
            .await;
        self.storage.write(location, data_key, &record.to_json()).await;
    }
}

/// Apply the idle-timeout rule to a stored record.
pub fn next_session_state(record: Option<&SessionRecord>, now: i64) -> SessionState {
    let Some(record) = record else {
        return SessionState {
            session_id: DEFAULT_SESSION_ID,
            session_is_new: Some(true),
            new_to_beacon: None,
        };
    };

    let active = record
        .last_time
        .map(|last| now.saturating_sub(last) < SESSION_IDLE_TIMEOUT_MS)
        .unwrap_or(false);

    SessionState {
        session_id: if active {
            record.session_id
        } else {
            // An exhausted counter starts over.
            record
                .session_id
                .checked_add(1)
                .unwrap_or(DEFAULT_SESSION_ID)
        },
        session_is_new: Some(!active),
        new_to_beacon: record.new_to_beacon.filter(|flag| *flag),
    }
}
