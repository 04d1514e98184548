//! Backup-type registry.
//!
//! Maps a backup-type key to the record types it exports, the fields stripped
//! per record type, and its retention policy. Lookups never fail: an unknown key
//! resolves to a type that exports every record type with no exclusions.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Default number of completed backups kept per type
pub const DEFAULT_MAX_BACKUPS: u32 = 30;

/// Which record types a backup type exports
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ModelSelection {
    /// Every record type the data source knows
    #[default]
    All,
    /// Exactly these record types, in this order
    Only(Vec<String>),
}

impl Serialize for ModelSelection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ModelSelection::All => serializer.serialize_str("*"),
            ModelSelection::Only(models) => models.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ModelSelection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Wildcard(String),
            List(Vec<String>),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Wildcard(s) if s == "*" || s.eq_ignore_ascii_case("all") => Ok(ModelSelection::All),
            Raw::Wildcard(s) => Err(serde::de::Error::custom(format!(
                "expected \"*\" or a list of models, got \"{}\"",
                s
            ))),
            Raw::List(models) => Ok(ModelSelection::Only(models)),
        }
    }
}

/// Retention override for one backup type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Completed backups to keep; `0` disables pruning, absent uses the global default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_count: Option<u32>,
}

/// Trigger for the external scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub hour: u8,
    #[serde(default)]
    pub minute: u8,
    /// 0 = Sunday .. 6 = Saturday; absent means every day
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<u8>,
}

fn default_true() -> bool {
    true
}

/// Configuration of one named backup type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupTypeConfig {
    /// Filled from the registry key
    #[serde(skip)]
    pub key: String,
    #[serde(default, rename = "name", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub models: ModelSelection,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exclude_fields: BTreeMap<String, BTreeSet<String>>,
    /// Models a restore of this type does not import
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_models_from_import: Vec<String>,
    #[serde(default)]
    pub retention: RetentionPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleSpec>,
}

impl BackupTypeConfig {
    /// The all-inclusive type used for unknown keys
    pub fn fallback(key: &str) -> Self {
        Self {
            key: key.to_string(),
            description: "All record types".to_string(),
            ..Default::default()
        }
    }

    /// Configured name, or the key title-cased (`essential_data` -> `Essential Data`)
    pub fn display_name(&self) -> String {
        match &self.display_name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => title_case(&self.key),
        }
    }
}

fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Immutable table of backup types
#[derive(Debug, Clone)]
pub struct BackupTypeRegistry {
    types: BTreeMap<String, BackupTypeConfig>,
    default_max_count: u32,
}

impl BackupTypeRegistry {
    pub fn new(types: BTreeMap<String, BackupTypeConfig>, default_max_count: u32) -> Self {
        let types = types
            .into_iter()
            .map(|(key, mut config)| {
                config.key = key.clone();
                (key, config)
            })
            .collect();

        Self {
            types,
            default_max_count,
        }
    }

    /// Resolve a key, falling back to the all-inclusive type
    pub fn resolve(&self, type_key: &str) -> BackupTypeConfig {
        match self.types.get(type_key) {
            Some(config) => config.clone(),
            None => {
                debug!("Unknown backup type '{}', using all models", type_key);
                BackupTypeConfig::fallback(type_key)
            }
        }
    }

    pub fn contains(&self, type_key: &str) -> bool {
        self.types.contains_key(type_key)
    }

    pub fn models_for(&self, type_key: &str) -> ModelSelection {
        self.types
            .get(type_key)
            .map(|config| config.models.clone())
            .unwrap_or(ModelSelection::All)
    }

    pub fn excluded_fields_for(&self, type_key: &str) -> BTreeMap<String, BTreeSet<String>> {
        self.types
            .get(type_key)
            .map(|config| config.exclude_fields.clone())
            .unwrap_or_default()
    }

    pub fn excluded_import_models_for(&self, type_key: &str) -> Vec<String> {
        self.types
            .get(type_key)
            .map(|config| config.exclude_models_from_import.clone())
            .unwrap_or_default()
    }

    /// Completed backups to keep for a type; `0` means never prune
    pub fn max_count_for(&self, type_key: &str) -> u32 {
        self.types
            .get(type_key)
            .and_then(|config| config.retention.max_count)
            .unwrap_or(self.default_max_count)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BackupTypeConfig> {
        self.types.values()
    }
}
