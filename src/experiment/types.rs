use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::TransportError;

/// Outcome reported by the experiment service.
///
/// Values other than `ok` and `failed` are kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Ok,
    Failed,
    Other(Value),
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Status::Ok => serializer.serialize_str("ok"),
            Status::Failed => serializer.serialize_str("failed"),
            Status::Other(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(match value.as_str() {
            Some("ok") => Status::Ok,
            Some("failed") => Status::Failed,
            _ => Status::Other(value),
        })
    }
}

/// A variant of an experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alternative {
    pub name: String,
}

/// Experiment descriptor echoed in participate responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Optional participate inputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticipateOptions {
    /// Share of traffic to enroll, forwarded to the service as-is.
    pub traffic_fraction: Option<f64>,
    /// Alternative to select without asking the service.
    pub force: Option<String>,
}

impl ParticipateOptions {
    /// Set the traffic fraction.
    pub fn with_traffic_fraction(mut self, fraction: f64) -> Self {
        self.traffic_fraction = Some(fraction);
        self
    }

    /// Force an alternative.
    pub fn with_force(mut self, alternative: impl Into<String>) -> Self {
        self.force = Some(alternative.into());
        self
    }
}

/// Result of `participate`.
///
/// Service responses pass through unchanged: fields this type does not
/// model are kept in `extra`, and a missing or unrecognized `status` is
/// not a failure. A transport failure is reported in-band with
/// `status: failed`, the error message, and the first alternative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipateResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative: Option<Alternative>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment: Option<ExperimentRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    /// Raw body of a server-side error response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    #[serde(skip)]
    failure: Option<Arc<TransportError>>,
}

impl ParticipateResponse {
    /// Response for a forced alternative.
    pub fn forced(experiment: &str, alternative: &str, client_id: &str) -> Self {
        Self {
            status: Some(Status::Ok),
            alternative: Some(Alternative {
                name: alternative.to_string(),
            }),
            experiment: Some(ExperimentRef {
                name: experiment.to_string(),
                version: Some(0),
                extra: Map::new(),
            }),
            client_id: Some(client_id.to_string()),
            error: None,
            response: None,
            extra: Map::new(),
            failure: None,
        }
    }

    /// Response for an alternative found in the participation cache.
    pub fn cached(experiment: &str, alternative: &str, client_id: &str) -> Self {
        Self {
            experiment: Some(ExperimentRef {
                name: experiment.to_string(),
                version: None,
                extra: Map::new(),
            }),
            ..Self::forced(experiment, alternative, client_id)
        }
    }

    /// In-band failure falling back to `fallback`.
    pub fn failed(error: TransportError, fallback: &str) -> Self {
        Self {
            status: Some(Status::Failed),
            alternative: Some(Alternative {
                name: fallback.to_string(),
            }),
            experiment: None,
            client_id: None,
            error: Some(Value::String(error.to_string())),
            response: None,
            extra: Map::new(),
            failure: Some(Arc::new(error)),
        }
    }

    /// Whether the service reported success.
    pub fn is_ok(&self) -> bool {
        self.status == Some(Status::Ok)
    }

    /// Name of the selected alternative.
    pub fn alternative_name(&self) -> Option<&str> {
        self.alternative.as_ref().map(|a| a.name.as_str())
    }

    /// Transport error behind a synthesized failure.
    pub fn failure(&self) -> Option<&TransportError> {
        self.failure.as_deref()
    }
}

/// Result of `convert`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    #[serde(skip)]
    failure: Option<Arc<TransportError>>,
}

impl ConvertResponse {
    /// In-band failure.
    pub fn failed(error: TransportError) -> Self {
        Self {
            status: Some(Status::Failed),
            error: Some(Value::String(error.to_string())),
            response: None,
            extra: Map::new(),
            failure: Some(Arc::new(error)),
        }
    }

    /// Whether the service reported success.
    pub fn is_ok(&self) -> bool {
        self.status == Some(Status::Ok)
    }

    /// Transport error behind a synthesized failure.
    pub fn failure(&self) -> Option<&TransportError> {
        self.failure.as_deref()
    }
}
