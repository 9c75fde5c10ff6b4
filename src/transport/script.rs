use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{build_uri, QueryParams, Transport};
use crate::error::{TransportError, TransportResult};

type PendingMap = HashMap<String, oneshot::Sender<Value>>;

/// Page capability to load a script element.
pub trait ScriptHost: Send + Sync {
    /// Append an async `<script>` whose source is `src`.
    fn append_script(&self, src: &str);
}

/// Unique callback names, scoped to one transport.
#[derive(Debug, Default)]
pub struct CallbackIds {
    counter: AtomicU64,
}

impl CallbackIds {
    /// Create a generator starting at `callback1`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next unused callback name.
    pub fn next_name(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("callback{}", n)
    }
}

/// Script-tag (JSONP) transport for page hosts.
///
/// Each request registers a uniquely named callback, appends a script whose
/// URL carries `callback=<namespace>.<name>`, and waits for the host to hand
/// the loaded payload back through [`resolve`](Self::resolve).
pub struct ScriptTagTransport {
    host: Arc<dyn ScriptHost>,
    namespace: String,
    ids: CallbackIds,
    pending: Arc<Mutex<PendingMap>>,
}

impl ScriptTagTransport {
    /// Create a transport whose callbacks live under `namespace`.
    pub fn new(host: Arc<dyn ScriptHost>, namespace: impl Into<String>) -> Self {
        Self {
            host,
            namespace: namespace.into(),
            ids: CallbackIds::new(),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Deliver the payload for `callback`, either the bare name or the
    /// namespaced form. Returns `false` when nothing is waiting for it, e.g.
    /// because the request already timed out.
    pub fn resolve(&self, callback: &str, payload: Value) -> bool {
        let name = callback
            .strip_prefix(&format!("{}.", self.namespace))
            .unwrap_or(callback);

        let Some(sender) = lock(&self.pending).remove(name) else {
            debug!(callback = %name, "Ignoring late or unknown callback");
            return false;
        };

        sender.send(payload).is_ok()
    }

    /// Number of requests still waiting for their callback.
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }
}

#[async_trait]
impl Transport for ScriptTagTransport {
    async fn request(
        &self,
        uri: &str,
        params: &QueryParams,
        _timeout: Duration,
    ) -> TransportResult<Value> {
        let name = self.ids.next_name();
        let (sender, receiver) = oneshot::channel();
        lock(&self.pending).insert(name.clone(), sender);
        let _registration = Registration {
            pending: self.pending.clone(),
            name: name.clone(),
        };

        let params = params
            .clone()
            .with("callback", format!("{}.{}", self.namespace, name));
        self.host.append_script(&build_uri(uri, &params));

        receiver.await.map_err(|_| {
            warn!(callback = %name, "Callback dropped before delivery");
            TransportError::Disconnected { callback: name }
        })
    }
}

/// Removes the callback registration when the request settles or is
/// abandoned, so late deliveries are swallowed.
struct Registration {
    pending: Arc<Mutex<PendingMap>>,
    name: String,
}

impl Drop for Registration {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.name);
    }
}

fn lock(pending: &Mutex<PendingMap>) -> MutexGuard<'_, PendingMap> {
    match pending.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
