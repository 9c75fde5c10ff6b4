//! Experiment participation and conversion.
//!
//! A [`Session`] resolves the visitor's identity once, at construction, and
//! then answers `participate` / `convert` calls. Participation is resolved
//! locally where possible: a forced alternative (explicit or from the page
//! URL) wins, then the cached assignment; only a miss reaches the service.
//! Transport failures never surface as errors: they come back in-band as
//! `status: failed` responses.

mod args;
mod types;
mod validation;

pub use args::{
    normalize_convert, normalize_participate, Callback, ConvertCall, ParticipateCall, TrailingArg,
};
pub use types::{
    Alternative, ConvertResponse, ExperimentRef, ParticipateOptions, ParticipateResponse, Status,
};
pub use validation::{is_valid_name, validate_alternatives, validate_experiment_name};

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{TransportError, TransportResult, ValidationError};
use crate::identity::{Identity, IdentityResolver};
use crate::platform::{HeadlessPlatform, Platform};
use crate::storage::{cookie, CookieOptions, Slot, StorageAdapter};
use crate::transport::{timed_request, HttpTransport, QueryParams, Transport};

/// Identity plus experiment operations for one visitor.
pub struct Session {
    config: Config,
    identity: Identity,
    platform: Arc<dyn Platform>,
    storage: StorageAdapter,
    transport: Arc<dyn Transport>,
    user_agent: Option<String>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("on_node", &self.on_node())
            .field("storage", &self.storage)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl Session {
    /// Build a session on `platform`, resolving identity immediately.
    ///
    /// Persistence is enabled only on page hosts with `identity.persist`
    /// set. When no cookie domain is configured, the root domain of the
    /// page host is used.
    pub async fn new(
        config: Config,
        platform: Arc<dyn Platform>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let persistent = !platform.is_headless() && config.identity.persist;

        let cookie_options = CookieOptions {
            domain: config
                .cookies
                .domain
                .clone()
                .or_else(|| platform.hostname().and_then(|host| cookie::root_domain(&host))),
            secure: config.cookies.secure,
            same_site: config.cookies.same_site,
            days_to_live: config.cookies.days_to_live,
        };

        let storage = StorageAdapter::new(
            platform.cookie_jar(),
            platform.local_store(),
            cookie_options,
            persistent,
        );

        let identity = IdentityResolver::new(&config.identity, &storage)
            .resolve()
            .await;

        let user_agent = config.service.user_agent.clone().or_else(|| {
            if platform.is_headless() {
                None
            } else {
                platform.user_agent()
            }
        });

        Self {
            config,
            identity,
            platform,
            storage,
            transport,
            user_agent,
        }
    }

    /// Server-side session over plain HTTP without persistence.
    pub async fn headless(config: Config) -> TransportResult<Self> {
        let transport = HttpTransport::new(&config.request)?;
        Ok(Self::new(config, Arc::new(HeadlessPlatform), Arc::new(transport)).await)
    }

    /// Visitor id.
    pub fn client_id(&self) -> &str {
        &self.identity.client_id
    }

    /// Replace the visitor id used for subsequent calls. Storage is not touched.
    pub fn set_client_id(&mut self, client_id: impl Into<String>) {
        self.identity.client_id = client_id.into();
    }

    /// Visit counter.
    pub fn session_id(&self) -> u64 {
        self.identity.session_id
    }

    /// Whether this visit started a new session; `None` when session
    /// resolution did not run.
    pub fn session_is_new(&self) -> Option<bool> {
        self.identity.session_is_new
    }

    /// Marker carried over from an earlier, not yet acknowledged, new session.
    pub fn new_to_beacon(&self) -> Option<bool> {
        self.identity.new_to_beacon
    }

    /// Resolved identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Whether the session runs on a headless host.
    pub fn on_node(&self) -> bool {
        self.platform.is_headless()
    }

    /// User agent forwarded with requests.
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Storage adapter used for identity and experiment caching.
    pub fn storage(&self) -> &StorageAdapter {
        &self.storage
    }

    /// Get the alternative to show for `experiment_name`.
    ///
    /// Only validation problems are returned as `Err`. A failed remote call
    /// yields `Ok` with `status: failed` and the first alternative.
    pub async fn participate<S: AsRef<str>>(
        &self,
        experiment_name: &str,
        alternatives: &[S],
        options: ParticipateOptions,
    ) -> Result<ParticipateResponse, ValidationError> {
        let experiment_name = validate_experiment_name(Some(experiment_name))?;
        validate_alternatives(alternatives)?;

        let alternatives: Vec<String> = alternatives
            .iter()
            .map(|alt| alt.as_ref().to_string())
            .collect();
        let contains = |name: &str| alternatives.iter().any(|alt| alt == name);

        let force = options
            .force
            .or_else(|| self.force_from_url(experiment_name));
        if let Some(force) = force.as_deref().filter(|f| contains(f)) {
            debug!(experiment = %experiment_name, alternative = %force, "Using forced alternative");
            return Ok(ParticipateResponse::forced(
                experiment_name,
                force,
                self.client_id(),
            ));
        }

        let cache_key = self.cache_key(experiment_name);
        let location = self.config.experiments.storage;
        let cached = self
            .storage
            .take_migrating(
                Slot::new(location, &cache_key),
                &[Slot::new(location.other(), &cache_key)],
            )
            .await;
        if let Some(cached) = cached.filter(|found| contains(&found.value)) {
            debug!(experiment = %experiment_name, alternative = %cached.value, "Using cached alternative");
            return Ok(ParticipateResponse::cached(
                experiment_name,
                &cached.value,
                self.client_id(),
            ));
        }

        let mut params = QueryParams::new()
            .with("client_id", self.client_id())
            .with("experiment", experiment_name)
            .with("alternatives", alternatives.clone());
        if let Some(fraction) = options.traffic_fraction.filter(|f| !f.is_nan()) {
            params.insert("traffic_fraction", fraction.to_string());
        }
        self.add_request_context(&mut params);

        let start = Instant::now();
        match self
            .call::<ParticipateResponse>("participate", &params)
            .await
        {
            Ok(response) => {
                if let Some(alternative) = response.alternative_name().filter(|_| response.is_ok()) {
                    self.storage.write(location, &cache_key, alternative).await;
                }

                info!(
                    experiment = %experiment_name,
                    status = ?response.status,
                    alternative = ?response.alternative_name(),
                    "Participation resolved"
                );

                if rand::random::<f64>() < self.config.request.telemetry_sample_rate {
                    let elapsed = start.elapsed().as_millis().to_string();
                    self.report(QueryParams::new().with("participate-time", elapsed));
                }

                Ok(response)
            }
            Err(e) => {
                warn!(experiment = %experiment_name, error = %e, "Participate failed, using first alternative");
                self.report(QueryParams::new().with("participate-fail", "1"));
                Ok(ParticipateResponse::failed(e, &alternatives[0]))
            }
        }
    }

    /// Record a conversion for `experiment_name`.
    ///
    /// Only a bad experiment name is returned as `Err`; a failed remote call
    /// yields `Ok` with `status: failed`.
    pub async fn convert(
        &self,
        experiment_name: &str,
        kpi: Option<&str>,
    ) -> Result<ConvertResponse, ValidationError> {
        let experiment_name = validate_experiment_name(Some(experiment_name))?;

        let mut params = QueryParams::new()
            .with("client_id", self.client_id())
            .with("experiment", experiment_name);
        if let Some(kpi) = kpi.filter(|k| !k.is_empty()) {
            params.insert("kpi", kpi);
        }
        self.add_request_context(&mut params);

        match self.call::<ConvertResponse>("convert", &params).await {
            Ok(response) => {
                info!(experiment = %experiment_name, status = ?response.status, "Conversion recorded");
                Ok(response)
            }
            Err(e) => {
                warn!(experiment = %experiment_name, error = %e, "Convert failed");
                Ok(ConvertResponse::failed(e))
            }
        }
    }

    fn cache_key(&self, experiment_name: &str) -> String {
        format!("{}{}", self.config.experiments.cookie_prefix, experiment_name)
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.request.timeout_ms)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.service.base_url.trim_end_matches('/'), path)
    }

    fn add_request_context(&self, params: &mut QueryParams) {
        if let Some(ip) = &self.config.service.ip_address {
            params.insert("ip_address", ip.as_str());
        }
        if let Some(user_agent) = &self.user_agent {
            params.insert("user_agent", user_agent.as_str());
        }
    }

    async fn call<T: DeserializeOwned>(&self, path: &str, params: &QueryParams) -> TransportResult<T> {
        let payload = timed_request(
            self.transport.as_ref(),
            &self.endpoint(path),
            params,
            self.timeout(),
        )
        .await?;

        serde_json::from_value(payload).map_err(|e| TransportError::InvalidResponse {
            message: format!("Unexpected {} response: {}", path, e),
        })
    }

    /// Fire-and-forget telemetry to the service root.
    fn report(&self, params: QueryParams) {
        let transport = self.transport.clone();
        let uri = self.endpoint("");
        let timeout = self.timeout();

        tokio::spawn(async move {
            if let Err(e) = timed_request(transport.as_ref(), &uri, &params, timeout).await {
                debug!(error = %e, "Telemetry request dropped");
            }
        });
    }

    /// Alternative forced through `{prefix}-force-{experiment}=` in the page URL.
    ///
    /// Keys are compared after decoding, so `two%20words` and `two+words`
    /// both name the experiment `two words`.
    fn force_from_url(&self, experiment_name: &str) -> Option<String> {
        if self.platform.is_headless() {
            return None;
        }

        let query = self.platform.query_string()?;
        let wanted = format!(
            "{}-force-{}",
            self.config.experiments.force_prefix, experiment_name
        );

        query
            .trim_start_matches('?')
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| decode_query_component(key).as_deref() == Some(wanted.as_str()))
            .and_then(|(_, value)| decode_query_component(value))
            .filter(|value| !value.is_empty())
    }
}

fn decode_query_component(raw: &str) -> Option<String> {
    cookie::percent_decode(&raw.replace('+', " "))
}
