use std::fmt;
use std::sync::Arc;

use serde_json::Value;

type EquivFn = dyn Fn(&Value, &Value) -> bool + Send + Sync;

/// Decides whether two decisions belong to the same group.
#[derive(Clone, Default)]
pub enum Equivalence {
    /// JSON equality.
    #[default]
    Exact,
    /// Strings compared trimmed and case-insensitive; other values exact.
    Normalized,
    Custom(Arc<EquivFn>),
}

impl Equivalence {
    /// Build from the `equivalence` config value. Unknown names fall back to `Exact`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "exact" => Self::Exact,
            "normalized" => Self::Normalized,
            other => {
                tracing::warn!(equivalence = other, "unknown equivalence, using exact");
                Self::Exact
            }
        }
    }

    pub fn custom(f: impl Fn(&Value, &Value) -> bool + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    pub fn equivalent(&self, a: &Value, b: &Value) -> bool {
        match self {
            Self::Exact => a == b,
            Self::Normalized => match (a, b) {
                (Value::String(x), Value::String(y)) => x.trim().to_lowercase() == y.trim().to_lowercase(),
                _ => a == b,
            },
            Self::Custom(f) => f(a, b),
        }
    }
}

impl fmt::Debug for Equivalence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => f.write_str("Exact"),
            Self::Normalized => f.write_str("Normalized"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exact_compares_json() {
        let eq = Equivalence::Exact;
        assert!(eq.equivalent(&json!({"a": 1}), &json!({"a": 1})));
        assert!(!eq.equivalent(&json!("Respond"), &json!("respond")));
    }

    #[test]
    fn normalized_folds_strings_only() {
        let eq = Equivalence::Normalized;
        assert!(eq.equivalent(&json!("  Respond "), &json!("respond")));
        assert!(!eq.equivalent(&json!(1), &json!(1.5)));
        assert!(eq.equivalent(&json!([1]), &json!([1])));
    }

    #[test]
    fn custom_closure() {
        let eq = Equivalence::custom(|a, b| a.get("action") == b.get("action"));
        assert!(eq.equivalent(&json!({"action": "x", "why": 1}), &json!({"action": "x"})));
    }

    #[test]
    fn from_name_falls_back_to_exact() {
        assert!(matches!(Equivalence::from_name("Normalized"), Equivalence::Normalized));
        assert!(matches!(Equivalence::from_name("fuzzy"), Equivalence::Exact));
    }
}
