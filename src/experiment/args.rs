//! Callback-style entry points.
//!
//! `participate` and `convert` accept their optional trailing inputs
//! positionally, with the callback always last. The normalizers here turn
//! such a trailing list into a canonical call before any validation runs.

use super::types::{ConvertResponse, ParticipateOptions, ParticipateResponse};
use super::Session;
use crate::error::{UsageError, ValidationError};

/// Completion callback. Validation errors arrive in the `Err` channel;
/// transport failures arrive as `Ok` responses with `status: failed`.
pub type Callback<R> = Box<dyn FnOnce(Result<R, ValidationError>) + Send>;

/// One positional trailing argument.
pub enum TrailingArg<R> {
    Number(f64),
    Text(String),
    Callback(Callback<R>),
}

impl<R> TrailingArg<R> {
    /// Wrap a closure as the callback argument.
    pub fn callback<F>(f: F) -> Self
    where
        F: FnOnce(Result<R, ValidationError>) + Send + 'static,
    {
        TrailingArg::Callback(Box::new(f))
    }

    fn is_callback(&self) -> bool {
        matches!(self, TrailingArg::Callback(_))
    }
}

impl<R> From<f64> for TrailingArg<R> {
    fn from(value: f64) -> Self {
        TrailingArg::Number(value)
    }
}

impl<R> From<&str> for TrailingArg<R> {
    fn from(value: &str) -> Self {
        TrailingArg::Text(value.to_string())
    }
}

impl<R> From<String> for TrailingArg<R> {
    fn from(value: String) -> Self {
        TrailingArg::Text(value)
    }
}

/// Canonical participate call.
pub struct ParticipateCall {
    pub options: ParticipateOptions,
    pub callback: Option<Callback<ParticipateResponse>>,
}

/// Canonical convert call.
pub struct ConvertCall {
    pub kpi: Option<String>,
    pub callback: Option<Callback<ConvertResponse>>,
}

/// Resolve `[traffic_fraction], [force], callback`.
///
/// A callback in the fraction slot means neither fraction nor force; text in
/// the fraction slot is the force and shifts the callback left; a callback
/// in the force slot means no force.
pub fn normalize_participate(args: Vec<TrailingArg<ParticipateResponse>>) -> ParticipateCall {
    let mut slots = args.into_iter();
    let (first, second, third) = (slots.next(), slots.next(), slots.next());

    let (fraction, force, callback) = match first {
        Some(arg) if arg.is_callback() => (None, None, Some(arg)),
        Some(TrailingArg::Text(text)) => (None, Some(TrailingArg::Text(text)), second),
        other => (other, second, third),
    };

    let (force, callback) = match force {
        Some(arg) if arg.is_callback() => (None, Some(arg)),
        other => (other, callback),
    };

    ParticipateCall {
        options: ParticipateOptions {
            traffic_fraction: match fraction {
                Some(TrailingArg::Number(n)) if !n.is_nan() => Some(n),
                _ => None,
            },
            force: match force {
                Some(TrailingArg::Text(text)) => Some(text),
                _ => None,
            },
        },
        callback: into_callback(callback),
    }
}

/// Resolve `[kpi], callback`.
pub fn normalize_convert(args: Vec<TrailingArg<ConvertResponse>>) -> ConvertCall {
    let mut slots = args.into_iter();
    let (first, second) = (slots.next(), slots.next());

    let (kpi, callback) = match first {
        Some(arg) if arg.is_callback() => (None, Some(arg)),
        other => (other, second),
    };

    ConvertCall {
        kpi: match kpi {
            Some(TrailingArg::Text(text)) if !text.is_empty() => Some(text),
            Some(TrailingArg::Number(n)) if n != 0.0 && !n.is_nan() => Some(n.to_string()),
            _ => None,
        },
        callback: into_callback(callback),
    }
}

fn into_callback<R>(arg: Option<TrailingArg<R>>) -> Option<Callback<R>> {
    match arg {
        Some(TrailingArg::Callback(callback)) => Some(callback),
        _ => None,
    }
}

impl Session {
    /// Callback-style `participate(experiment_name, alternatives,
    /// [traffic_fraction], [force], callback)`.
    ///
    /// A missing callback is a usage error returned before anything else
    /// happens; every other outcome is delivered to the callback.
    pub async fn participate_with<S: AsRef<str>>(
        &self,
        experiment_name: Option<&str>,
        alternatives: &[S],
        args: Vec<TrailingArg<ParticipateResponse>>,
    ) -> Result<(), UsageError> {
        let call = normalize_participate(args);
        let callback = call.callback.ok_or(UsageError::CallbackNotSpecified)?;

        let result = match experiment_name {
            Some(name) => self.participate(name, alternatives, call.options).await,
            None => Err(ValidationError::BadExperimentName),
        };

        callback(result);
        Ok(())
    }

    /// Callback-style `convert(experiment_name, [kpi], callback)`.
    ///
    /// The callback is optional; without one the outcome is dropped.
    pub async fn convert_with(
        &self,
        experiment_name: Option<&str>,
        args: Vec<TrailingArg<ConvertResponse>>,
    ) {
        let call = normalize_convert(args);

        let result = match experiment_name {
            Some(name) => self.convert(name, call.kpi.as_deref()).await,
            None => Err(ValidationError::BadExperimentName),
        };

        if let Some(callback) = call.callback {
            callback(result);
        }
    }
}
