//! Generated configuration artifacts for the process under test.
//!
//! Two shapes exist: ordered key→value records (the proxy's primary
//! configuration) and remap rule files (the secondary artifact referenced
//! by name from the primary). Records use last-writer-wins on duplicate
//! keys while preserving first-declaration order; an overlay merged over
//! a base wins for every key the overlay defines.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{HarnessError, HarnessResult};

/// Scalar configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl std::fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{}", if *v { 1 } else { 0 }),
            Self::Str(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ConfigValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<u16> for ConfigValue {
    fn from(v: u16) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Ordered key→value records rendered to a file before the owning
/// process starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigRecords {
    entries: Vec<(String, ConfigValue)>,
}

impl ConfigRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key. A repeated key keeps its original position but takes
    /// the newest value (last-writer-wins).
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
        self
    }

    /// Set several keys at once, in iteration order.
    pub fn update<K, V, I>(&mut self, pairs: I) -> &mut Self
    where
        K: Into<String>,
        V: Into<ConfigValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in pairs {
            self.set(key, value);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Merge this record set over a base: the overlay (self) wins for
    /// every key it defines, the base keeps its order for everything
    /// else, overlay-only keys append in overlay order.
    pub fn merge_over(&self, base: &ConfigRecords) -> ConfigRecords {
        let mut merged = base.clone();
        for (key, value) in &self.entries {
            merged.set(key.clone(), value.clone());
        }
        merged
    }

    /// Render as `key value` lines, declaration-ordered.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push(' ');
            out.push_str(&value.to_string());
            out.push('\n');
        }
        out
    }

    pub fn write_to(&self, path: &Path) -> HarnessResult<()> {
        write_artifact(path, self.render().as_bytes())
    }
}

/// One remap rule: requests for `from` are directed at `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemapRule {
    pub from: String,
    pub to: String,
}

/// Remap rule file, rendered as `map <from> <to>` lines. Rules for the
/// same `from` follow the records precedence: the latest declaration
/// wins, position preserved.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemapConfig {
    rules: Vec<RemapRule>,
}

impl RemapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        let from = from.into();
        let to = to.into();
        match self.rules.iter_mut().find(|rule| rule.from == from) {
            Some(rule) => rule.to = to,
            None => self.rules.push(RemapRule { from, to }),
        }
        self
    }

    pub fn rules(&self) -> &[RemapRule] {
        &self.rules
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for rule in &self.rules {
            out.push_str(&format!("map {} {}\n", rule.from, rule.to));
        }
        out
    }

    pub fn write_to(&self, path: &Path) -> HarnessResult<()> {
        write_artifact(path, self.render().as_bytes())
    }
}

fn write_artifact(path: &Path, content: &[u8]) -> HarnessResult<()> {
    let render = || -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(path)?;
        file.write_all(content)?;
        file.flush()
    };
    render().map_err(|source| HarnessError::ConfigRender {
        path: path.to_path_buf(),
        source,
    })
}
