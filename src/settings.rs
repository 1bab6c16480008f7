//! Settings file handling: module search paths, custom instances and the
//! configured module sequence.
//!
//! ```json
//! {
//!   "modules_search": ["/usr/share/modsys/modules", "local"],
//!   "instances": [
//!     { "module": "users", "id": "one", "config": "users-one.conf" }
//!   ],
//!   "sequence": [
//!     { "show": ["welcome", "users@one"] },
//!     { "exec": ["unpack"] },
//!     { "show": ["finished"] }
//!   ]
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use strum::{Display, EnumIter, EnumString};

use crate::instance_key::InstanceKey;

/// What a sequence phase does with its modules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PhaseAction {
    /// Modules present pages to the user
    Show,
    /// Modules run their jobs
    Exec,
}

/// One phase of the sequence: `{ "show": [...] }` or `{ "exec": [...] }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequencePhase {
    Show(Vec<String>),
    Exec(Vec<String>),
}

impl SequencePhase {
    pub fn action(&self) -> PhaseAction {
        match self {
            Self::Show(_) => PhaseAction::Show,
            Self::Exec(_) => PhaseAction::Exec,
        }
    }

    /// Instance-key strings, exactly as written
    pub fn entries(&self) -> &[String] {
        match self {
            Self::Show(entries) | Self::Exec(entries) => entries,
        }
    }
}

/// Declaration of a non-default module instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescription {
    pub module: String,
    pub id: String,
    /// Config file name inside the module directory
    pub config: String,
}

impl InstanceDescription {
    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(self.module.clone(), self.id.clone())
    }
}

/// Top-level settings document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Ordered module search paths
    pub modules_search: Vec<PathBuf>,

    #[serde(default)]
    pub instances: Vec<InstanceDescription>,

    #[serde(default)]
    pub sequence: Vec<SequencePhase>,
}

impl Settings {
    /// Load settings from a JSON file. Relative search paths are resolved
    /// against the file's directory.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {:?}", path))?;

        let mut settings = Self::from_json(&content)
            .with_context(|| format!("Failed to parse settings file {:?}", path))?;

        if let Some(base) = path.parent() {
            settings.resolve_relative_paths(base);
        }
        Ok(settings)
    }

    /// Parse settings from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse settings JSON")
    }

    /// Save settings to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize settings to JSON")?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write settings to {:?}", path.as_ref()))?;
        Ok(())
    }

    fn resolve_relative_paths(&mut self, base: &Path) {
        for search_path in &mut self.modules_search {
            if search_path.is_relative() {
                *search_path = base.join(&*search_path);
            }
        }
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        if self.modules_search.is_empty() {
            anyhow::bail!("At least one module search path must be specified");
        }

        let mut declared = HashSet::new();
        for instance in &self.instances {
            if instance.module.trim().is_empty() || instance.id.trim().is_empty() {
                anyhow::bail!("Custom instances need both a module and an id");
            }
            if instance.config.trim().is_empty() {
                anyhow::bail!("Custom instance {} has no config file", instance.key());
            }
            if !declared.insert(instance.key()) {
                anyhow::bail!("Custom instance {} is declared twice", instance.key());
            }
        }

        for entry in self.modules_sequence() {
            if !InstanceKey::from_string(&entry).is_valid() {
                anyhow::bail!("Sequence entry '{}' is not a valid instance key", entry);
            }
        }

        Ok(())
    }

    /// Flatten the phases into the ordered instance list to load
    pub fn modules_sequence(&self) -> Vec<String> {
        self.sequence
            .iter()
            .flat_map(|phase| phase.entries().iter().cloned())
            .collect()
    }

    /// Declaration for a custom instance, if any
    pub fn custom_instance(&self, key: &InstanceKey) -> Option<&InstanceDescription> {
        find_instance(&self.instances, key)
    }
}

/// Declaration in `instances` for the instance `key` names
pub fn find_instance<'a>(
    instances: &'a [InstanceDescription],
    key: &InstanceKey,
) -> Option<&'a InstanceDescription> {
    instances
        .iter()
        .find(|instance| instance.module == key.module() && instance.id == key.id())
}
