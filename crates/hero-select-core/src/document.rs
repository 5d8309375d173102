use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SelectError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// Pick a format from a file extension. Anything that is not `yaml`/`yml` is JSON.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                Self::Yaml
            }
            _ => Self::Json,
        }
    }
}

/// Raw text of a structured key-value document plus the name used in error reports.
///
/// Parsing is deferred to the loader so that a malformed document surfaces as a
/// load error at the point it is used.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DocumentSource {
    name: String,
    text: String,
    format: DocumentFormat,
}

impl DocumentSource {
    #[must_use]
    pub fn json(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self { name: name.into(), text: text.into(), format: DocumentFormat::Json }
    }

    #[must_use]
    pub fn yaml(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self { name: name.into(), text: text.into(), format: DocumentFormat::Yaml }
    }

    /// Read a document from disk, choosing the format by extension.
    ///
    /// # Errors
    /// Returns [`SelectError::UnreadableInput`] when the file cannot be read as UTF-8 text.
    pub fn from_path(path: &Path) -> Result<Self, SelectError> {
        let name = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|err| SelectError::UnreadableInput {
            document: name.clone(),
            cause: err.to_string(),
        })?;
        Ok(Self { name, text, format: DocumentFormat::from_path(path) })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn format(&self) -> DocumentFormat {
        self.format
    }

    /// Parse the document and require a top-level mapping.
    ///
    /// # Errors
    /// Returns [`SelectError::MalformedInput`] when the text is not valid JSON/YAML
    /// or its root is not a mapping.
    pub fn parse_mapping(&self) -> Result<Map<String, Value>, SelectError> {
        let value = match self.format {
            DocumentFormat::Json => serde_json::from_str::<Value>(&self.text)
                .map_err(|err| SelectError::malformed(&self.name, err.to_string()))?,
            DocumentFormat::Yaml => self.parse_yaml()?,
        };
        match value {
            Value::Object(map) => Ok(map),
            other => Err(SelectError::malformed(
                &self.name,
                format!("expected a mapping at the top level, found {}", value_kind(&other)),
            )),
        }
    }
}

impl DocumentSource {
    /// YAML goes through its own value model first: converting straight into
    /// JSON values would turn `.nan` and `.inf` into `null`.
    fn parse_yaml(&self) -> Result<Value, SelectError> {
        let yaml = serde_yaml::from_str::<serde_yaml::Value>(&self.text)
            .map_err(|err| SelectError::malformed(&self.name, err.to_string()))?;
        reject_non_finite(&self.name, &yaml)?;
        serde_json::to_value(&yaml).map_err(|err| SelectError::malformed(&self.name, err.to_string()))
    }
}

fn reject_non_finite(document: &str, value: &serde_yaml::Value) -> Result<(), SelectError> {
    match value {
        serde_yaml::Value::Number(number) => match number.as_f64() {
            Some(float) if !float.is_finite() => Err(SelectError::malformed(
                document,
                format!("`{number}` is not a finite number"),
            )),
            _ => Ok(()),
        },
        serde_yaml::Value::Sequence(items) => {
            items.iter().try_for_each(|item| reject_non_finite(document, item))
        }
        serde_yaml::Value::Mapping(mapping) => mapping.iter().try_for_each(|(key, item)| {
            reject_non_finite(document, key)?;
            reject_non_finite(document, item)
        }),
        serde_yaml::Value::Tagged(tagged) => reject_non_finite(document, &tagged.value),
        serde_yaml::Value::Null | serde_yaml::Value::Bool(_) | serde_yaml::Value::String(_) => {
            Ok(())
        }
    }
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}
