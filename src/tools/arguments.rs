//! Typed access to tool call arguments.

use crate::error::TurnError;

/// Wrapper around tool call arguments providing typed extraction.
#[derive(Debug, Clone, Default)]
pub struct ToolArguments {
    value: serde_json::Value,
}

impl ToolArguments {
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }

    /// Get the raw JSON value.
    pub fn raw(&self) -> &serde_json::Value {
        &self.value
    }

    pub fn into_raw(self) -> serde_json::Value {
        self.value
    }

    /// Get a string argument by key; blank strings count as missing.
    pub fn get_str(&self, key: &str) -> Result<&str, TurnError> {
        self.get_str_opt(key)
            .ok_or_else(|| TurnError::InvalidArgument(format!("Missing string argument: {key}")))
    }

    /// Get an optional, non-blank string argument.
    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Get an optional unsigned integer; negative numbers are rejected.
    pub fn get_u64_opt(&self, key: &str) -> Result<Option<u64>, TurnError> {
        match self.value.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(v) => v.as_u64().map(Some).ok_or_else(|| {
                TurnError::InvalidArgument(format!("{key} must be a non-negative integer"))
            }),
        }
    }

    /// Get a boolean argument, falling back to `default` when absent.
    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.value
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }

    /// Get a list of strings; non-string entries are an error.
    pub fn get_str_list(&self, key: &str) -> Result<Vec<String>, TurnError> {
        let items = self
            .value
            .get(key)
            .and_then(|v| v.as_array())
            .ok_or_else(|| TurnError::InvalidArgument(format!("Missing array argument: {key}")))?;
        items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    TurnError::InvalidArgument(format!("{key} must contain only strings"))
                })
            })
            .collect()
    }

    /// Deserialize one field into a typed value.
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<T, TurnError> {
        let value = self
            .value
            .get(key)
            .cloned()
            .ok_or_else(|| TurnError::InvalidArgument(format!("Missing argument: {key}")))?;
        serde_json::from_value(value)
            .map_err(|e| TurnError::InvalidArgument(format!("{key}: {e}")))
    }

    /// Deserialize the entire arguments into a typed struct.
    ///
    /// Models sometimes send the arguments as a JSON-encoded string; that form
    /// is decoded first.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, TurnError> {
        let value = match &self.value {
            serde_json::Value::String(raw) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    serde_json::json!({})
                } else {
                    serde_json::from_str::<serde_json::Value>(trimmed).map_err(|e| {
                        TurnError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
                    })?
                }
            }
            other => other.clone(),
        };
        serde_json::from_value(value).map_err(|e| {
            TurnError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_as_errors_name_the_key_once() {
        let args = ToolArguments::new(json!({ "count": "three" }));
        let err = args.get_as::<u32>("count").unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("Invalid argument: count: "), "{text}");
        assert_eq!(text.matches("Invalid argument").count(), 1);

        let missing = args.get_as::<u32>("absent").unwrap_err();
        assert!(matches!(missing, TurnError::InvalidArgument(_)));
    }
}
