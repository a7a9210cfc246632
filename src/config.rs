//! Derivative configuration module.
//!
//! Handles loading, validating, and merging `derivatives.toml`. The file is
//! sparse: stock defaults are the base layer and user values override them
//! key by key.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! root = "."                 # Base for relative static_dir paths
//! server_url = ""            # Prefix for derivative URLs
//! debug = false              # Default log level to debug
//!
//! [conversion]
//! quality = 50               # WebP quality (0-100)
//! lossless = false
//! metadata = false           # Carry source EXIF into derivatives
//! mime_types = ["image/jpeg", "image/png", "image/webp"]
//! collision = "suffix-increment"   # or "overwrite"
//! mode = "async"             # or "sync": wait for conversion in the change hook
//!
//! [conversion.max_resize]    # Bound the primary derivative (optional)
//! width = 2560
//! fit = "inside"
//!
//! [regeneration]
//! iteration = "sequential"   # or "pipelined"
//! default_sort = "createdAt"
//!
//! [[collections]]
//! slug = "media"
//! static_dir = "media"       # Relative to root, or absolute
//! static_url = "/media"      # Defaults to "/{slug}"
//! disable_local_storage = false
//!
//! [[collections.sizes]]
//! name = "thumbnail"
//! width = 400
//! height = 300
//! crop = "centre"            # Anchor for the cover crop
//! fit = "cover"              # cover | contain | fill | inside | outside
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::{CropAnchor, EncodeParams, Fit, Quality, ResizeSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "derivatives.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Process-wide configuration, loaded once at startup.
///
/// All fields have sensible defaults. User config files need only specify
/// the values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Base directory for relative collection `static_dir` paths.
    pub root: PathBuf,
    /// Prefix for public derivative URLs.
    pub server_url: String,
    /// Lower the default log level to debug.
    pub debug: bool,
    pub conversion: ConversionConfig,
    pub regeneration: RegenerationConfig,
    pub collections: Vec<CollectionConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            server_url: String::new(),
            debug: false,
            conversion: ConversionConfig::default(),
            regeneration: RegenerationConfig::default(),
            collections: Vec::new(),
        }
    }
}

/// What to do when a derivative filename is already taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollisionPolicy {
    /// Delete the existing file and reuse its name.
    Overwrite,
    /// Append `-1`, `-2`, … until a free name is found.
    #[default]
    SuffixIncrement,
}

/// Whether the change hook waits for conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Sync,
    #[default]
    Async,
}

/// How a regeneration walk advances between pages after the first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IterationMode {
    /// Await each page before reading the next.
    #[default]
    Sequential,
    /// Hand each next page to a background task without waiting.
    Pipelined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConversionConfig {
    pub quality: Quality,
    pub lossless: bool,
    /// Keep the source EXIF block in derivatives.
    pub metadata: bool,
    /// Source MIME types that get derivatives.
    pub mime_types: Vec<String>,
    pub collision: CollisionPolicy,
    pub mode: ExecutionMode,
    /// Bound applied to the primary derivative.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_resize: Option<ResizeSpec>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            quality: Quality::default(),
            lossless: false,
            metadata: false,
            mime_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/webp".to_string(),
            ],
            collision: CollisionPolicy::default(),
            mode: ExecutionMode::default(),
            max_resize: None,
        }
    }
}

impl ConversionConfig {
    /// Whether uploads of this MIME type get derivatives. Case-insensitive.
    pub fn accepts(&self, mime_type: &str) -> bool {
        self.mime_types
            .iter()
            .any(|m| m.eq_ignore_ascii_case(mime_type))
    }

    pub fn encode_params(&self, resize: Option<ResizeSpec>) -> EncodeParams {
        EncodeParams {
            quality: self.quality,
            lossless: self.lossless,
            keep_metadata: self.metadata,
            resize,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegenerationConfig {
    pub iteration: IterationMode,
    /// Sort key used when a trigger does not name one.
    pub default_sort: String,
}

impl Default for RegenerationConfig {
    fn default() -> Self {
        Self {
            iteration: IterationMode::default(),
            default_sort: "createdAt".to_string(),
        }
    }
}

/// One upload collection and its derivative sizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionConfig {
    pub slug: String,
    /// Storage directory; defaults to the slug.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<PathBuf>,
    /// Public URL prefix; defaults to `/{slug}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_url: Option<String>,
    /// Encode and record metadata without writing files.
    #[serde(default)]
    pub disable_local_storage: bool,
    #[serde(default)]
    pub sizes: Vec<SizeSpec>,
}

impl CollectionConfig {
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            static_dir: None,
            static_url: None,
            disable_local_storage: false,
            sizes: Vec::new(),
        }
    }

    pub fn static_url(&self) -> String {
        self.static_url
            .clone()
            .unwrap_or_else(|| format!("/{}", self.slug))
    }
}

/// A named derivative size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SizeSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, alias = "position")]
    pub crop: CropAnchor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fit: Option<Fit>,
}

/// Default mapping from a size spec to resize options.
pub fn default_resize(size: &SizeSpec) -> ResizeSpec {
    ResizeSpec {
        width: size.width,
        height: size.height,
        fit: size.fit.unwrap_or_default(),
        crop: size.crop,
    }
}

impl Config {
    pub fn collection(&self, slug: &str) -> Option<&CollectionConfig> {
        self.collections.iter().find(|c| c.slug == slug)
    }

    /// Storage directory of a collection: absolute paths as-is, relative
    /// paths resolved against `root`.
    pub fn static_dir(&self, collection: &CollectionConfig) -> PathBuf {
        let dir = collection
            .static_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(&collection.slug));
        if dir.is_absolute() {
            dir
        } else {
            self.root.join(dir)
        }
    }

    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.conversion.quality.value() > 100 {
            return Err(ConfigError::Validation(
                "conversion.quality must be 0-100".into(),
            ));
        }
        if self.conversion.mime_types.is_empty() {
            return Err(ConfigError::Validation(
                "conversion.mime_types must not be empty".into(),
            ));
        }
        if let Some(max) = &self.conversion.max_resize {
            if max.width == Some(0) || max.height == Some(0) {
                return Err(ConfigError::Validation(
                    "conversion.max_resize dimensions must be non-zero".into(),
                ));
            }
        }

        let mut slugs = HashSet::new();
        for collection in &self.collections {
            let slug = collection.slug.as_str();
            if slug.is_empty() || slug.contains(['/', '\\']) || slug.starts_with('.') {
                return Err(ConfigError::Validation(format!(
                    "collection slug {slug:?} must be a plain non-empty name"
                )));
            }
            if !slugs.insert(slug) {
                return Err(ConfigError::Validation(format!(
                    "duplicate collection slug {slug:?}"
                )));
            }

            let mut names = HashSet::new();
            for size in &collection.sizes {
                if !names.insert(size.name.as_str()) {
                    return Err(ConfigError::Validation(format!(
                        "collection {slug:?}: duplicate size name {:?}",
                        size.name
                    )));
                }
                if size.width.is_none() && size.height.is_none() {
                    return Err(ConfigError::Validation(format!(
                        "collection {slug:?}: size {:?} needs a width or a height",
                        size.name
                    )));
                }
                if size.width == Some(0) || size.height == Some(0) {
                    return Err(ConfigError::Validation(format!(
                        "collection {slug:?}: size {:?} dimensions must be non-zero",
                        size.name
                    )));
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(Config::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely, arrays included.
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

/// Merge an optional overlay onto the stock defaults, then deserialize and validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<Config, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: Config = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from a TOML file.
///
/// A missing file yields the stock defaults. Present files are merged on top
/// of the defaults, unknown keys are rejected, and the result is validated.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return resolve_config(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    resolve_config(Some(value))
}

/// Returns a fully-commented stock `derivatives.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# WebP Derivative Configuration
# =============================
# All settings are optional. Values shown below are the defaults, except
# for the example collection at the bottom.
# Unknown keys will cause an error.

# Base directory for relative collection static_dir paths.
root = "."

# Prefix for derivative URLs, e.g. "https://cms.example.com".
server_url = ""

# Lower the default log level to debug (RUST_LOG still wins).
debug = false

# ---------------------------------------------------------------------------
# Conversion
# ---------------------------------------------------------------------------
[conversion]
# WebP encoding quality (0 = worst, 100 = best). Ignored when lossless.
quality = 50

# Encode losslessly instead.
lossless = false

# Keep the source EXIF block (orientation is reset since pixels are rotated).
metadata = false

# Uploads of these MIME types get derivatives; everything else is skipped.
mime_types = ["image/jpeg", "image/png", "image/webp"]

# When a derivative name is taken: "suffix-increment" (name-WxH-1.webp)
# or "overwrite" (replace the existing file).
collision = "suffix-increment"

# "async": the change hook returns immediately and the record is updated
# once conversion finishes. "sync": the hook waits for conversion.
mode = "async"

# Bound the primary derivative. Omit to keep the source size.
# [conversion.max_resize]
# width = 2560
# height = 2560
# fit = "inside"

# ---------------------------------------------------------------------------
# Regeneration
# ---------------------------------------------------------------------------
[regeneration]
# "sequential" awaits each record before reading the next one.
# "pipelined" hands each next record to a background task.
# The first step is always handed off.
iteration = "sequential"

# Record field to walk the collection by. Prefix with "-" for descending.
default_sort = "createdAt"

# ---------------------------------------------------------------------------
# Collections
# ---------------------------------------------------------------------------
[[collections]]
slug = "media"
# Storage directory, relative to root or absolute. Defaults to the slug.
static_dir = "media"
# Public URL prefix. Defaults to "/{slug}".
# static_url = "/media"
# Compute derivatives and metadata without writing files.
disable_local_storage = false

[[collections.sizes]]
name = "thumbnail"
width = 400
height = 300
# Anchor for cover crops: centre, top, bottom, left, right,
# top-left, top-right, bottom-left, bottom-right.
crop = "centre"
# cover | contain | fill | inside | outside
fit = "cover"

[[collections.sizes]]
name = "card"
width = 768
"##
}
