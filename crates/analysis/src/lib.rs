pub mod gaps;
pub mod validation;

use serde_json::Value;

pub use gaps::{GapAnalyzer, parse_signals};
pub use validation::{ValidationSynthesizer, parse_questions};

/// Text form of a scalar or composite JSON value; `null` has none.
pub(crate) fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_text() {
        assert_eq!(value_text(&json!("Is it causal?")), Some("Is it causal?".to_string()));
        assert_eq!(value_text(&json!(3)), Some("3".to_string()));
        assert_eq!(value_text(&json!(null)), None);
    }
}
