//! Advisory checks on a provider result. A suspect result is still accepted.

use std::sync::LazyLock;

use regex::Regex;

const MIN_LENGTH_RATIO: f64 = 0.3;
const MAX_LENGTH_RATIO: f64 = 3.0;

static FAILURE_PHRASES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)cannot translate|unable to translate|error")
        .expect("failure phrase pattern is valid")
});

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationWarning {
    Empty,
    LengthRatio(f64),
    FailurePhrase(String),
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationWarning::Empty => write!(f, "translation is empty"),
            ValidationWarning::LengthRatio(r) => {
                write!(f, "length ratio {r:.2} outside [{MIN_LENGTH_RATIO}, {MAX_LENGTH_RATIO}]")
            }
            ValidationWarning::FailurePhrase(p) => write!(f, "contains failure phrase '{p}'"),
        }
    }
}

/// Returns every reason `translated` looks suspect; empty means it looks fine.
/// Lengths are counted in characters.
pub fn validate_translation(original: &str, translated: &str) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    if translated.trim().is_empty() {
        warnings.push(ValidationWarning::Empty);
        return warnings;
    }

    let original_len = original.chars().count().max(1) as f64;
    let ratio = translated.chars().count() as f64 / original_len;
    if !(MIN_LENGTH_RATIO..=MAX_LENGTH_RATIO).contains(&ratio) {
        warnings.push(ValidationWarning::LengthRatio(ratio));
    }

    if let Some(m) = FAILURE_PHRASES.find(translated) {
        warnings.push(ValidationWarning::FailurePhrase(m.as_str().to_lowercase()));
    }

    warnings
}
