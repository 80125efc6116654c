// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Configuration utils.
//!
//! The configuration is read from a single TOML file, frozen at process start and passed by
//! reference to every component. The raw serde mirror ([`ConfigFile`]) carries the defaultable
//! keys; [`Config`] is the validated, fully-resolved form.

use crate::rules::parser::Rule;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Encountered when the configuration cannot be loaded.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("Configuration file not found ({0})")]
    NotFound(PathBuf),
    /// The configuration file contains malformed TOML.
    #[error("Failed to decode configuration file: invalid TOML: {0}")]
    Decode(#[from] toml::de::Error),
    /// A key has a value outside its allowed range.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue {
        /// The offending key.
        key: String,
        /// Why the value is rejected.
        message: String,
    },
    /// A stored metadata rule failed to parse.
    #[error("Invalid stored metadata rule: {0}")]
    InvalidStoredRule(String),
    /// No usable home/cache directory could be determined.
    #[error("Could not determine the {0} directory")]
    MissingBaseDirectory(&'static str),
}

/// Path templates that control how releases and tracks are rendered into library-relative paths.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PathTemplateConfig {
    /// Template for release directory names.
    #[serde(default = "default_release_template")]
    pub release: String,
    /// Template for track file stems within a release directory.
    #[serde(default = "default_track_template")]
    pub track: String,
}

/// Default release directory template.
fn default_release_template() -> String {
    "{{ releaseartist }} - {{ releasetitle }}".to_string()
}

/// Default track file stem template.
fn default_track_template() -> String {
    "{{ tracknumber }}. {{ tracktitle }}".to_string()
}

impl Default for PathTemplateConfig {
    fn default() -> Self {
        Self {
            release: default_release_template(),
            track: default_track_template(),
        }
    }
}

/// An artist alias declaration: `artist` is the primary name, `aliases` the alternates.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtistAlias {
    /// The primary artist name.
    pub artist: String,
    /// The alternate names that resolve to the primary.
    pub aliases: Vec<String>,
}

/// A stored metadata rule, as written in the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct StoredRule {
    /// The matcher string.
    pub matcher: String,
    /// One or more action strings.
    pub actions: Vec<String>,
}

/// Raw serde mirror of the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    /// The library root.
    pub music_source_dir: PathBuf,
    /// Where the SQLite cache and the trash live. Defaults to the XDG cache directory.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Scan/refresh parallelism. Defaults to `max(1, ncpu / 2)`.
    #[serde(default)]
    pub max_proc: Option<i64>,
    /// Byte budget for generated file names.
    #[serde(default = "default_max_filename_bytes")]
    pub max_filename_bytes: usize,
    /// File stems that are recognized as cover art.
    #[serde(default = "default_cover_art_stems")]
    pub cover_art_stems: Vec<String>,
    /// File extensions that are recognized as cover art.
    #[serde(default = "default_valid_art_exts")]
    pub valid_art_exts: Vec<String>,
    /// Whether to append the transitive parent genres when writing genre tags.
    #[serde(default)]
    pub write_parent_genres: bool,
    /// Whether mutation operations may rename source files to match the path templates.
    #[serde(default)]
    pub rename_source_files: bool,
    /// Directory names under the library root that the scanner skips.
    #[serde(default)]
    pub ignore_release_directories: Vec<String>,
    /// Artist alias declarations.
    #[serde(default)]
    pub artist_aliases: Vec<ArtistAlias>,
    /// Metadata rules applied by `rules run-stored`.
    #[serde(default)]
    pub stored_metadata_rules: Vec<StoredRule>,
    /// Path templates.
    #[serde(default)]
    pub path_templates: PathTemplateConfig,
}

/// Default for [`ConfigFile::max_filename_bytes`].
fn default_max_filename_bytes() -> usize {
    180
}

/// Default for [`ConfigFile::cover_art_stems`].
fn default_cover_art_stems() -> Vec<String> {
    ["folder", "cover", "art", "front"].map(String::from).to_vec()
}

/// Default for [`ConfigFile::valid_art_exts`].
fn default_valid_art_exts() -> Vec<String> {
    ["jpg", "jpeg", "png"].map(String::from).to_vec()
}

/// The frozen configuration consumed by all components.
#[derive(Debug, Clone)]
pub struct Config {
    /// The library root.
    pub music_source_dir: PathBuf,
    /// Where the SQLite cache and the trash live.
    pub cache_dir: PathBuf,
    /// Scan/refresh parallelism.
    pub max_proc: usize,
    /// Byte budget for generated file names.
    pub max_filename_bytes: usize,
    /// Lowercased file stems that are recognized as cover art.
    pub cover_art_stems: Vec<String>,
    /// Lowercased file extensions that are recognized as cover art.
    pub valid_art_exts: Vec<String>,
    /// Whether to append the transitive parent genres when writing genre tags.
    pub write_parent_genres: bool,
    /// Whether mutation operations may rename source files to match the path templates.
    pub rename_source_files: bool,
    /// Directory names under the library root that the scanner skips.
    pub ignore_release_directories: Vec<String>,
    /// Primary artist → aliases.
    pub artist_aliases_map: HashMap<String, Vec<String>>,
    /// Alias → primary artists.
    pub artist_aliases_parents_map: HashMap<String, Vec<String>>,
    /// Pre-parsed stored metadata rules.
    pub stored_metadata_rules: Vec<Rule>,
    /// Path templates.
    pub path_templates: PathTemplateConfig,
}

impl Config {
    /// The default configuration file location (`$XDG_CONFIG_HOME/rose/config.toml`).
    ///
    /// # Errors
    ///
    /// Fails if no home directory can be determined.
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let base_dirs = xdg::BaseDirectories::with_prefix("rose");
        base_dirs
            .get_config_home()
            .map(|dir| dir.join("config.toml"))
            .ok_or(ConfigError::MissingBaseDirectory("config"))
    }

    /// The default cache directory (`$XDG_CACHE_HOME/rose`).
    ///
    /// # Errors
    ///
    /// Fails if no home directory can be determined.
    pub fn default_cache_dir() -> Result<PathBuf, ConfigError> {
        let base_dirs = xdg::BaseDirectories::with_prefix("rose");
        base_dirs
            .get_cache_home()
            .ok_or(ConfigError::MissingBaseDirectory("cache"))
    }

    /// Load and validate the configuration.
    ///
    /// When `config_path` is [`None`], the default location is used.
    ///
    /// # Errors
    ///
    /// Fails if the file is missing or malformed, a value is out of range, or a stored metadata
    /// rule does not parse.
    pub fn parse(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match config_path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path()?,
        };
        let text = std::fs::read_to_string(&config_path)
            .map_err(|_| ConfigError::NotFound(config_path.clone()))?;
        let file: ConfigFile = toml::from_str(&text)?;
        Self::from_file(file)
    }

    /// Build the frozen configuration from the raw serde mirror.
    ///
    /// # Errors
    ///
    /// See [`Config::parse`].
    pub fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
        let music_source_dir = expand_home(&file.music_source_dir);
        let cache_dir = match file.cache_dir {
            Some(dir) => expand_home(&dir),
            None => Self::default_cache_dir()?,
        };

        let max_proc = match file.max_proc {
            Some(p) if p <= 0 => {
                return Err(ConfigError::InvalidValue {
                    key: "max_proc".to_string(),
                    message: "must be a positive integer".to_string(),
                })
            }
            #[expect(clippy::cast_sign_loss)]
            Some(p) => p as usize,
            None => std::cmp::max(1, num_cpus::get() / 2),
        };

        let mut artist_aliases_map: HashMap<String, Vec<String>> = HashMap::new();
        let mut artist_aliases_parents_map: HashMap<String, Vec<String>> = HashMap::new();
        for entry in &file.artist_aliases {
            artist_aliases_map.insert(entry.artist.clone(), entry.aliases.clone());
            for alias in &entry.aliases {
                artist_aliases_parents_map
                    .entry(alias.clone())
                    .or_default()
                    .push(entry.artist.clone());
            }
        }

        let stored_metadata_rules = file
            .stored_metadata_rules
            .iter()
            .map(|raw| {
                Rule::parse(&raw.matcher, raw.actions.iter().map(String::as_str).collect())
                    .map_err(|e| ConfigError::InvalidStoredRule(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Config {
            music_source_dir,
            cache_dir,
            max_proc,
            max_filename_bytes: file.max_filename_bytes,
            cover_art_stems: file.cover_art_stems.iter().map(|s| s.to_lowercase()).collect(),
            valid_art_exts: file.valid_art_exts.iter().map(|s| s.to_lowercase()).collect(),
            write_parent_genres: file.write_parent_genres,
            rename_source_files: file.rename_source_files,
            ignore_release_directories: file.ignore_release_directories,
            artist_aliases_map,
            artist_aliases_parents_map,
            stored_metadata_rules,
            path_templates: file.path_templates,
        })
    }

    /// The path of the SQLite cache database.
    #[must_use]
    pub fn cache_database_path(&self) -> PathBuf {
        self.cache_dir.join("cache.sqlite3")
    }

    /// The directory that soft-deleted releases and collections are moved to.
    #[must_use]
    pub fn trash_dir(&self) -> PathBuf {
        self.cache_dir.join("trash")
    }

    /// The path of the watchdog PID file.
    #[must_use]
    pub fn watchdog_pid_path(&self) -> PathBuf {
        self.cache_dir.join("watchdog.pid")
    }

    /// Every recognized cover art file name (`{stem}.{ext}`), lowercased.
    #[must_use]
    pub fn valid_cover_arts(&self) -> Vec<String> {
        self.cover_art_stems
            .iter()
            .flat_map(|stem| self.valid_art_exts.iter().map(move |ext| format!("{stem}.{ext}")))
            .collect()
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_home(path: &Path) -> PathBuf {
    path.to_str()
        .filter(|s| s.starts_with('~'))
        .and_then(|s| expanduser::expanduser(s).ok())
        .unwrap_or_else(|| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Parse a config from a TOML string, with `music_source_dir` pointing at a temp dir.
    fn parse_str(text: &str) -> Result<Config, ConfigError> {
        let file: ConfigFile = toml::from_str(text).map_err(ConfigError::from)?;
        Config::from_file(file)
    }

    #[test]
    fn test_minimal_config() {
        let config = parse_str(
            r#"
            music_source_dir = "/tmp/music"
            cache_dir = "/tmp/cache"
            "#,
        )
        .unwrap();
        assert_eq!(config.music_source_dir, PathBuf::from("/tmp/music"));
        assert_eq!(config.max_filename_bytes, 180);
        assert_eq!(config.cover_art_stems, vec!["folder", "cover", "art", "front"]);
        assert_eq!(config.valid_art_exts, vec!["jpg", "jpeg", "png"]);
        assert!(!config.write_parent_genres);
        assert!(config.max_proc >= 1);
    }

    #[test]
    fn test_invalid_max_proc() {
        let err = parse_str(
            r#"
            music_source_dir = "/tmp/music"
            cache_dir = "/tmp/cache"
            max_proc = 0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_proc"));
    }

    #[test]
    fn test_cover_art_values_are_lowercased() {
        let config = parse_str(
            r#"
            music_source_dir = "/tmp/music"
            cache_dir = "/tmp/cache"
            cover_art_stems = ["Folder", "COVER"]
            valid_art_exts = ["JPG"]
            "#,
        )
        .unwrap();
        assert_eq!(config.cover_art_stems, vec!["folder", "cover"]);
        assert_eq!(config.valid_cover_arts(), vec!["folder.jpg", "cover.jpg"]);
    }

    #[test]
    fn test_artist_alias_maps() {
        let config = parse_str(
            r#"
            music_source_dir = "/tmp/music"
            cache_dir = "/tmp/cache"
            [[artist_aliases]]
            artist = "Abakus"
            aliases = ["Cinnamon Chasers"]
            "#,
        )
        .unwrap();
        assert_eq!(
            config.artist_aliases_map["Abakus"],
            vec!["Cinnamon Chasers"]
        );
        assert_eq!(
            config.artist_aliases_parents_map["Cinnamon Chasers"],
            vec!["Abakus"]
        );
    }

    #[test]
    fn test_stored_rules_are_parsed() {
        let config = parse_str(
            r#"
            music_source_dir = "/tmp/music"
            cache_dir = "/tmp/cache"
            [[stored_metadata_rules]]
            matcher = "genre:lo-fi"
            actions = ["replace:Lo-Fi"]
            "#,
        )
        .unwrap();
        assert_eq!(config.stored_metadata_rules.len(), 1);

        let err = parse_str(
            r#"
            music_source_dir = "/tmp/music"
            cache_dir = "/tmp/cache"
            [[stored_metadata_rules]]
            matcher = "nosuchtag:x"
            actions = ["delete"]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Invalid stored metadata rule"));
    }
}
