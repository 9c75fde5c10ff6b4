//! Storage layer for visitor identity and experiment assignments.
//!
//! Two backing stores are addressed through one [`StorageAdapter`]:
//! the host's cookie jar and a local key-value store. The adapter never
//! fails; an unavailable or erroring backend reads as "absent" and skips
//! writes.

pub mod cookie;
mod memory;
mod sqlite;


pub use cookie::{CookieJar, CookieOptions, MemoryCookieJar, SameSite};
pub use memory::MemoryLocalStore;
pub use sqlite::SqliteLocalStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::StorageResult;

/// Default session id used whenever a stored id cannot be recovered.
pub const DEFAULT_SESSION_ID: u64 = 1;

/// Which backing store a key lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageLocation {
    /// Host cookie jar.
    Cookie,
    /// Local key-value store.
    Local,
}

impl StorageLocation {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageLocation::Cookie => "cookie",
            StorageLocation::Local => "local",
        }
    }

    /// The other backing store.
    pub fn other(&self) -> StorageLocation {
        match self {
            StorageLocation::Cookie => StorageLocation::Local,
            StorageLocation::Local => StorageLocation::Cookie,
        }
    }
}

impl std::fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StorageLocation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cookie" => Ok(StorageLocation::Cookie),
            "local" => Ok(StorageLocation::Local),
            _ => Err(format!("Unknown storage location: {}", s)),
        }
    }
}

/// Local key-value store, the `localStorage` of the host.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Get the value stored under `key`.
    async fn get_item(&self, key: &str) -> StorageResult<Option<String>>;
    /// Store `value` under `key`, replacing any previous value.
    async fn set_item(&self, key: &str, value: &str) -> StorageResult<()>;
    /// Remove `key`.
    async fn remove_item(&self, key: &str) -> StorageResult<()>;
}

/// A key in a specific backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot<'a> {
    pub location: StorageLocation,
    pub key: &'a str,
}

impl<'a> Slot<'a> {
    /// Create a slot.
    pub fn new(location: StorageLocation, key: &'a str) -> Self {
        Self { location, key }
    }

    /// Cookie slot.
    pub fn cookie(key: &'a str) -> Self {
        Self::new(StorageLocation::Cookie, key)
    }

    /// Local store slot.
    pub fn local(key: &'a str) -> Self {
        Self::new(StorageLocation::Local, key)
    }
}

/// Outcome of [`StorageAdapter::take_migrating`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub value: String,
    /// Location the value was read from.
    pub source: StorageLocation,
    /// Whether the value was moved from a fallback slot.
    pub migrated: bool,
}

/// Uniform read/write/delete over the cookie jar and the local store.
#[derive(Clone)]
pub struct StorageAdapter {
    cookies: Option<Arc<dyn CookieJar>>,
    local: Option<Arc<dyn LocalStore>>,
    cookie_options: CookieOptions,
    enabled: bool,
}

impl std::fmt::Debug for StorageAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageAdapter")
            .field("cookies", &self.cookies.is_some())
            .field("local", &self.local.is_some())
            .field("cookie_options", &self.cookie_options)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl StorageAdapter {
    /// Create an adapter over the given backends.
    ///
    /// With `enabled = false` every read is absent and every write skipped.
    pub fn new(
        cookies: Option<Arc<dyn CookieJar>>,
        local: Option<Arc<dyn LocalStore>>,
        cookie_options: CookieOptions,
        enabled: bool,
    ) -> Self {
        Self {
            cookies,
            local,
            cookie_options,
            enabled,
        }
    }

    /// Adapter with persistence turned off.
    pub fn disabled() -> Self {
        Self::new(None, None, CookieOptions::default(), false)
    }

    /// Whether reads and writes reach a backend at all.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Cookie attributes applied on write.
    pub fn cookie_options(&self) -> &CookieOptions {
        &self.cookie_options
    }

    /// Read the raw value under `key`. Empty values read as absent.
    pub async fn read(&self, location: StorageLocation, key: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }

        let value = match location {
            StorageLocation::Cookie => {
                let jar = self.cookies.as_ref()?;
                cookie::find_cookie(&jar.cookie_header(), key)
            }
            StorageLocation::Local => {
                let store = self.local.as_ref()?;
                match store.get_item(key).await {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(key = %key, error = %e, "Local store read failed");
                        None
                    }
                }
            }
        };

        value.filter(|v| !v.is_empty())
    }

    /// Read a structured value; text that is not JSON degrades to a string.
    pub async fn read_value(&self, location: StorageLocation, key: &str) -> Option<Value> {
        let raw = self.read(location, key).await?;
        Some(serde_json::from_str(&raw).unwrap_or(Value::String(raw)))
    }

    /// Write `value` under `key`.
    ///
    /// Returns the committed representation (the full cookie text for the
    /// cookie jar), or `None` when the write was skipped.
    pub async fn write(&self, location: StorageLocation, key: &str, value: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }

        match location {
            StorageLocation::Cookie => {
                let jar = self.cookies.as_ref()?;
                let text = cookie::set_cookie_text(key, value, &self.cookie_options, Utc::now());
                jar.apply(&text);
                Some(text)
            }
            StorageLocation::Local => {
                let store = self.local.as_ref()?;
                match store.set_item(key, value).await {
                    Ok(()) => Some(value.to_string()),
                    Err(e) => {
                        warn!(key = %key, error = %e, "Local store write skipped");
                        None
                    }
                }
            }
        }
    }

    /// Delete `key`.
    pub async fn delete(&self, location: StorageLocation, key: &str) {
        if !self.enabled {
            return;
        }

        match location {
            StorageLocation::Cookie => {
                if let Some(jar) = &self.cookies {
                    jar.apply(&cookie::delete_cookie_text(
                        key,
                        self.cookie_options.domain.as_deref(),
                    ));
                }
            }
            StorageLocation::Local => {
                if let Some(store) = &self.local {
                    if let Err(e) = store.remove_item(key).await {
                        warn!(key = %key, error = %e, "Local store delete failed");
                    }
                }
            }
        }
    }

    /// Read `preferred`, falling back to `fallbacks` in order.
    ///
    /// A value found in a fallback slot is written into `preferred` and
    /// deleted from where it was found.
    pub async fn take_migrating(&self, preferred: Slot<'_>, fallbacks: &[Slot<'_>]) -> Option<Lookup> {
        if let Some(value) = self.read(preferred.location, preferred.key).await {
            return Some(Lookup {
                value,
                source: preferred.location,
                migrated: false,
            });
        }

        for slot in fallbacks.iter().filter(|slot| **slot != preferred) {
            let Some(value) = self.read(slot.location, slot.key).await else {
                continue;
            };

            debug!(
                from = %slot.location,
                from_key = %slot.key,
                to = %preferred.location,
                to_key = %preferred.key,
                "Migrating stored value"
            );
            self.write(preferred.location, preferred.key, &value).await;
            self.delete(slot.location, slot.key).await;

            return Some(Lookup {
                value,
                source: slot.location,
                migrated: true,
            });
        }

        None
    }
}

// ============================================================================
// Session records
// ============================================================================

/// Persisted session state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: u64,
    /// Epoch milliseconds of the last resolution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_time: Option<i64>,
    /// Set while the session is new and not yet acknowledged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_to_beacon: Option<bool>,
}

/// Stored session record layouts, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    /// `{"sessionId": 3, "lastTime": 1700000000000, "newToBeacon": true}`
    V2Json,
    /// `3|1700000000000`
    V1Pipe,
}

type RecordReader = fn(&str) -> Option<SessionRecord>;

/// Reader chain, tried in order.
const RECORD_READERS: [(RecordFormat, RecordReader); 2] = [
    (RecordFormat::V2Json, read_v2_json),
    (RecordFormat::V1Pipe, read_v1_pipe),
];

impl SessionRecord {
    /// Record written by a resolution at `now`.
    pub fn new(session_id: u64, now: i64, new_to_beacon: bool) -> Self {
        Self {
            session_id,
            last_time: Some(now),
            new_to_beacon: new_to_beacon.then_some(true),
        }
    }

    /// Parse stored text with the first reader that accepts it.
    pub fn parse(raw: &str) -> Option<(RecordFormat, SessionRecord)> {
        RECORD_READERS
            .iter()
            .find_map(|(format, reader)| reader(raw).map(|record| (*format, record)))
    }

    /// Serialize in the current format.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"sessionId\":{},\"lastTime\":{}}}",
                self.session_id,
                self.last_time.unwrap_or_default()
            )
        })
    }
}

fn read_v2_json(raw: &str) -> Option<SessionRecord> {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) else {
        return None;
    };

    Some(SessionRecord {
        session_id: coerce_session_id(map.get("sessionId").unwrap_or(&Value::Null)),
        last_time: map.get("lastTime").and_then(coerce_timestamp),
        new_to_beacon: match map.get("newToBeacon") {
            Some(Value::Bool(true)) => Some(true),
            _ => None,
        },
    })
}

fn read_v1_pipe(raw: &str) -> Option<SessionRecord> {
    // A JSON string wrapping the pipe form is accepted too.
    let text = match serde_json::from_str::<Value>(raw) {
        Ok(Value::String(inner)) => inner,
        _ => raw.to_string(),
    };
    let (id, last_time) = text.split_once('|')?;

    Some(SessionRecord {
        session_id: leading_digits(id)
            .filter(|id| *id >= DEFAULT_SESSION_ID)
            .unwrap_or(DEFAULT_SESSION_ID),
        last_time: leading_digits(last_time).and_then(|t| i64::try_from(t).ok()),
        new_to_beacon: None,
    })
}

/// Coerce a stored session id to a positive integer.
///
/// Strings keep only their leading run of digits (`"44,"` is 44); anything
/// that yields no positive integer falls back to [`DEFAULT_SESSION_ID`].
pub fn coerce_session_id(value: &Value) -> u64 {
    let parsed = match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 1.0).map(|f| f as u64)),
        Value::String(s) => leading_digits(s),
        _ => None,
    };

    parsed
        .filter(|id| *id >= DEFAULT_SESSION_ID)
        .unwrap_or(DEFAULT_SESSION_ID)
}

fn coerce_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Value::String(s) => leading_digits(s).and_then(|t| i64::try_from(t).ok()),
        _ => None,
    }
}

/// Leading run of ASCII digits after optional whitespace, as an integer.
pub fn leading_digits(text: &str) -> Option<u64> {
    let digits: String = text
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}
