//! Model serialization seam
//!
//! Logged models arrive through a small capability set instead of per-
//! framework integrations: a model knows its framework, its version, and how
//! to serialize itself to a path. The registry gates which frameworks the
//! tracker accepts; unknown frameworks produce a typed error instead of a
//! best-effort upload.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// A model that can be serialized for upload as a run artifact.
pub trait SerializableModel {
    /// Producing framework, e.g. `serde-json`.
    fn framework_name(&self) -> &str;

    /// Framework version recorded on the artifact.
    fn framework_version(&self) -> &str;

    /// Write the serialized model to `path`.
    ///
    /// # Errors
    ///
    /// Serialization or IO errors.
    fn serialize_to(&self, path: &Path) -> Result<()>;

    /// Optional description of the model's input signature.
    fn input_schema(&self) -> Option<serde_json::Value> {
        None
    }
}

/// Built-in model wrapper serializing any JSON value.
#[derive(Debug, Clone)]
pub struct JsonModel {
    value: serde_json::Value,
    input_schema: Option<serde_json::Value>,
}

impl JsonModel {
    /// Framework name the built-in serializer registers under.
    pub const FRAMEWORK: &'static str = "serde-json";

    /// Wrap `value` for logging.
    #[must_use]
    pub const fn new(value: serde_json::Value) -> Self {
        Self {
            value,
            input_schema: None,
        }
    }

    /// Attach an input-signature description.
    #[must_use]
    pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = Some(schema);
        self
    }
}

impl SerializableModel for JsonModel {
    fn framework_name(&self) -> &str {
        Self::FRAMEWORK
    }

    fn framework_version(&self) -> &str {
        "1"
    }

    fn serialize_to(&self, path: &Path) -> Result<()> {
        let payload = serde_json::to_vec_pretty(&self.value)?;
        fs::write(path, payload)?;
        Ok(())
    }

    fn input_schema(&self) -> Option<serde_json::Value> {
        self.input_schema.clone()
    }
}

/// Frameworks the tracker accepts models from.
#[derive(Debug, Clone)]
pub struct SerializerRegistry {
    frameworks: BTreeSet<String>,
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        let mut frameworks = BTreeSet::new();
        frameworks.insert(JsonModel::FRAMEWORK.to_string());
        Self { frameworks }
    }
}

impl SerializerRegistry {
    /// Registry with the built-in frameworks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept models from `framework`.
    pub fn register(&mut self, framework: impl Into<String>) {
        self.frameworks.insert(framework.into());
    }

    /// Whether `framework` is accepted.
    #[must_use]
    pub fn is_registered(&self, framework: &str) -> bool {
        self.frameworks.contains(framework)
    }

    /// Reject models from unregistered frameworks.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] naming the known frameworks.
    pub fn ensure_registered(&self, framework: &str) -> Result<()> {
        if self.is_registered(framework) {
            return Ok(());
        }
        let known: Vec<&str> = self.frameworks.iter().map(String::as_str).collect();
        Err(Error::InvalidArgument(format!(
            "no serializer registered for framework {framework:?}; known frameworks: {}",
            known.join(", ")
        )))
    }
}
