//! Resource description files.
//!
//! ```yaml
//! apiVersion: example.io/v1
//! kind: Widget
//! name: w
//! namespace: default   # optional
//! spec:                # nested mapping, or a literal block of YAML text
//!   size: 3
//! ```

use anyhow::{anyhow, Context, Result};
use multiverse_core::ResourceDescriptor;
use serde::Deserialize;
use serde_yaml::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceFile {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub spec: Value,
}

impl ResourceFile {
    pub fn parse(text: &str) -> Result<Self> {
        let file: Self = serde_yaml::from_str(text).context("parsing resource description")?;
        if file.name.is_empty() {
            return Err(anyhow!("resource description missing name"));
        }
        Ok(file)
    }

    pub fn load(path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
        Self::parse(&text)
    }

    /// `ns_override` wins over the file's namespace.
    pub fn descriptor(&self, ns_override: Option<&str>) -> ResourceDescriptor {
        let ns = ns_override.or(self.namespace.as_deref());
        ResourceDescriptor::new(&self.api_version, &self.kind, &self.name, ns)
    }

    /// Spec as YAML text. A string spec is taken verbatim as the document.
    pub fn spec_text(&self) -> Result<String> {
        match &self.spec {
            Value::Null => Ok(String::new()),
            Value::String(s) => Ok(s.clone()),
            other => serde_yaml::to_string(other).context("rendering spec"),
        }
    }
}
