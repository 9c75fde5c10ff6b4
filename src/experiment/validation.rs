use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ValidationError;

/// Experiment and alternative names: lowercase alphanumerics, then
/// alphanumerics, `-`, `_` or spaces.
static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9\-_ ]*$").expect("name pattern is a valid regex")
});

/// Whether `name` is an acceptable experiment or alternative name.
pub fn is_valid_name(name: &str) -> bool {
    NAME_PATTERN.is_match(name)
}

/// Check an experiment name.
pub fn validate_experiment_name(name: Option<&str>) -> Result<&str, ValidationError> {
    match name {
        Some(name) if is_valid_name(name) => Ok(name),
        _ => Err(ValidationError::BadExperimentName),
    }
}

/// Check the candidate alternatives of a participate call.
pub fn validate_alternatives<S: AsRef<str>>(alternatives: &[S]) -> Result<(), ValidationError> {
    if alternatives.len() < 2 {
        return Err(ValidationError::TooFewAlternatives);
    }

    match alternatives.iter().find(|alt| !is_valid_name(alt.as_ref())) {
        Some(bad) => Err(ValidationError::BadAlternativeName {
            name: bad.as_ref().to_string(),
        }),
        None => Ok(()),
    }
}
