//! Merge configuration and run settings.
//!
//! Two files drive a run:
//!
//! ## Merge config (`merge-config.json`)
//!
//! Says *what* to build: the output name, which archives take part, and which
//! source page lands in which calendar slot.
//!
//! ```json
//! {
//!   "name": "Family 2025",
//!   "source-mapping": { "anna": "anna-2025.prj", "ben": "ben-2025.prj" },
//!   "pages": {
//!     "Cover":   { "anna": "Cover" },
//!     "January": { "ben": "March" }
//!   }
//! }
//! ```
//!
//! Key order is significant. When several aliases target the same slot the
//! last one listed wins, and the first listed source provides the project
//! header. Both maps are therefore read into an [`OrderedMap`] that keeps
//! document order instead of a hash map.
//!
//! ## Settings (`merge.toml`, optional)
//!
//! Says *how* to build it. Sparse: only the keys that differ from the stock
//! defaults need to be present. Unknown keys are rejected to catch typos.
//!
//! ```toml
//! [output]
//! directory = "."           # Where <name>.prj is written
//! strategy = "archive"      # "archive" (content-addressed) or "directory" (legacy)
//!
//! [images]
//! jpeg_quality = 90         # HEIC → JPEG re-encode quality (1-100)
//! rotation_fix_prefix = "PGFileSystemSourcePrefix+"
//! ```

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fs;
use std::marker::PhantomData;
use std::path::Path;
use thiserror::Error;

use crate::project::parse_document;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("merge config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

// =============================================================================
// Ordered maps
// =============================================================================

/// A string-keyed map that iterates in insertion (document) order.
///
/// A repeated key keeps its first position and takes the latest value, the
/// same way a JSON object with duplicate keys is usually read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedMap<V> {
    entries: Vec<(String, V)>,
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V> OrderedMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for OrderedMap<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedMapVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map with string keys")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut map = OrderedMap::new();
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    map.insert(key, value);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

// =============================================================================
// Merge config
// =============================================================================

/// The declarative merge request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    /// Output project name; also the output file stem (`<name>.prj`).
    pub name: String,
    /// Alias → archive path, in declared order.
    #[serde(rename = "source-mapping")]
    pub source_mapping: OrderedMap<String>,
    /// Destination slot name → (alias → source slot name).
    #[serde(default)]
    pub pages: OrderedMap<OrderedMap<String>>,
}

impl MergeConfig {
    /// Structural checks that do not need the calendar or the archives.
    ///
    /// Alias and slot references are resolved later by
    /// [`planner::resolve_assignments`](crate::planner::resolve_assignments),
    /// which reports them with their own error variants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Validation("name must not be empty".into()));
        }
        if self.name.contains(['/', '\\']) {
            return Err(ConfigError::Validation(format!(
                "name must not contain path separators: {:?}",
                self.name
            )));
        }
        if self.source_mapping.is_empty() {
            return Err(ConfigError::Validation(
                "source-mapping must list at least one archive".into(),
            ));
        }
        if let Some((alias, _)) = self.source_mapping.iter().find(|(_, p)| p.is_empty()) {
            return Err(ConfigError::Validation(format!(
                "source-mapping entry '{alias}' has an empty archive path"
            )));
        }
        Ok(())
    }
}

/// Parse a merge config from JSON text (a leading BOM is accepted).
pub fn parse_merge_config(bytes: &[u8]) -> Result<MergeConfig, ConfigError> {
    let config: MergeConfig = parse_document(bytes)?;
    config.validate()?;
    Ok(config)
}

/// Load and validate a merge config file.
pub fn load_merge_config(path: &Path) -> Result<MergeConfig, ConfigError> {
    let bytes = fs::read(path)?;
    parse_merge_config(&bytes)
}

// =============================================================================
// Settings
// =============================================================================

/// Run settings loaded from `merge.toml`.
///
/// All fields have defaults; a settings file only needs the values it wants
/// to override.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub output: OutputSettings,
    pub images: ImageSettings,
}

impl Settings {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.images.jpeg_quality) {
            return Err(ConfigError::Validation(
                "images.jpeg_quality must be 1-100".into(),
            ));
        }
        if self.images.rotation_fix_prefix.is_empty() {
            return Err(ConfigError::Validation(
                "images.rotation_fix_prefix must not be empty".into(),
            ));
        }
        if self.output.directory.is_empty() {
            return Err(ConfigError::Validation(
                "output.directory must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Where and how the merged project is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSettings {
    /// Directory receiving `<name>.prj`.
    pub directory: String,
    /// Packaging strategy.
    pub strategy: PackagingStrategy,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            directory: ".".to_string(),
            strategy: PackagingStrategy::Archive,
        }
    }
}

/// How the output archive is assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PackagingStrategy {
    /// Write straight into the archive with content-addressed, deduplicated images.
    #[default]
    Archive,
    /// Build a directory tree first, then zip it (MD5 ids, no normalization).
    Directory,
}

impl fmt::Display for PackagingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackagingStrategy::Archive => f.write_str("archive"),
            PackagingStrategy::Directory => f.write_str("directory"),
        }
    }
}

/// Picture normalization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageSettings {
    /// JPEG quality used when re-encoding HEIC pictures.
    pub jpeg_quality: u8,
    /// Picture ids starting with this tag come from the desktop editor's
    /// filesystem source and need their EXIF orientation applied.
    pub rotation_fix_prefix: String,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            jpeg_quality: 90,
            rotation_fix_prefix: "PGFileSystemSourcePrefix+".to_string(),
        }
    }
}

/// Returns the stock default settings as a `toml::Value::Table`.
///
/// This is the base layer that user overrides are merged onto.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(Settings::default()).expect("default settings must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a settings file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_settings(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_settings(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<Settings, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let settings: Settings = merged.try_into()?;
    settings.validate()?;
    Ok(settings)
}

/// Load settings from `path`, layered over the stock defaults.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    resolve_settings(stock_defaults_value(), load_raw_settings(path)?)
}

/// Returns a fully-commented stock `merge.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_settings_toml() -> &'static str {
    r##"# photobook-merge settings
# ========================
# All settings are optional. Values shown below are the defaults.
# Unknown keys cause an error.

# ---------------------------------------------------------------------------
# Output
# ---------------------------------------------------------------------------
[output]
# Directory that receives <name>.prj.
directory = "."

# "archive":   write pictures straight into the archive, named by the SHA-1
#              of their final bytes, each stored once.
# "directory": legacy layout; build a directory tree first, name pictures by
#              the MD5 of their source file, no HEIC or rotation handling.
strategy = "archive"

# ---------------------------------------------------------------------------
# Pictures
# ---------------------------------------------------------------------------
[images]
# JPEG quality for HEIC pictures re-encoded as JPEG (1-100).
jpeg_quality = 90

# Pictures whose id starts with this tag get their EXIF orientation applied.
rotation_fix_prefix = "PGFileSystemSourcePrefix+"
"##
}
