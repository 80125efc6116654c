// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Shared vocabulary types used across the tag codec, the cache and the rules engine.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::path::Path;

/// Characters that cannot appear in file or directory names on common filesystems.
static ILLEGAL_FS_CHARS_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[:\?<>\\*\|"/]+"#).expect("static regex must compile"));

/// Audio file extensions that the tag codec understands.
pub const SUPPORTED_AUDIO_EXTENSIONS: &[&str] = &[".mp3", ".m4a", ".ogg", ".opus", ".flac"];

/// The closed release type vocabulary.
///
/// Reads normalize everything else to `unknown`; writes lowercase the stored value.
pub const SUPPORTED_RELEASE_TYPES: &[&str] = &[
    "album",
    "single",
    "ep",
    "compilation",
    "anthology",
    "soundtrack",
    "live",
    "remix",
    "djmix",
    "mixtape",
    "other",
    "bootleg",
    "loosetrack",
    "demo",
    "unknown",
];

/// Normalize a raw release type tag value to the closed vocabulary.
#[must_use]
pub fn normalize_releasetype(value: Option<&str>) -> String {
    let Some(value) = value else {
        return "unknown".to_string();
    };
    if value.is_empty() {
        return "unknown".to_string();
    }
    let value = value.to_lowercase();
    if SUPPORTED_RELEASE_TYPES.contains(&value.as_str()) {
        value
    } else {
        "unknown".to_string()
    }
}

/// A single credited artist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Artist {
    /// The artist name as credited.
    pub name: String,
    /// Whether this entry is a configured alias of another artist.
    ///
    /// Aliases are retained for round-trip fidelity and rule matching but are never emitted by
    /// the artist formatter.
    #[serde(default)]
    pub alias: bool,
}

impl Artist {
    /// Create a non-alias artist.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: false,
        }
    }

    /// Create an artist with an explicit alias flag.
    #[must_use]
    pub fn with_alias(name: impl Into<String>, alias: bool) -> Self {
        Self {
            name: name.into(),
            alias,
        }
    }
}

/// The seven artist roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtistRole {
    /// Primary credited artist(s).
    Main,
    /// Featured guest(s).
    Guest,
    /// Remixer(s).
    Remixer,
    /// Producer(s).
    Producer,
    /// Composer(s).
    Composer,
    /// Conductor(s).
    Conductor,
    /// DJ-mix compiler(s).
    DjMixer,
}

impl ArtistRole {
    /// All roles in canonical order.
    pub const ALL: [ArtistRole; 7] = [
        ArtistRole::Main,
        ArtistRole::Guest,
        ArtistRole::Remixer,
        ArtistRole::Producer,
        ArtistRole::Composer,
        ArtistRole::Conductor,
        ArtistRole::DjMixer,
    ];

    /// The lowercase role name used in sidecars, the database and the rules DSL.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ArtistRole::Main => "main",
            ArtistRole::Guest => "guest",
            ArtistRole::Remixer => "remixer",
            ArtistRole::Producer => "producer",
            ArtistRole::Composer => "composer",
            ArtistRole::Conductor => "conductor",
            ArtistRole::DjMixer => "djmixer",
        }
    }

    /// Parse a lowercase role name.
    #[must_use]
    pub fn from_name(value: &str) -> Option<Self> {
        match value {
            "main" => Some(ArtistRole::Main),
            "guest" => Some(ArtistRole::Guest),
            "remixer" => Some(ArtistRole::Remixer),
            "producer" => Some(ArtistRole::Producer),
            "composer" => Some(ArtistRole::Composer),
            "conductor" => Some(ArtistRole::Conductor),
            "djmixer" => Some(ArtistRole::DjMixer),
            _ => None,
        }
    }
}

/// An ordered mapping of artist roles to credited artists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistMapping {
    /// Primary credited artist(s).
    #[serde(default)]
    pub main: Vec<Artist>,
    /// Featured guest(s).
    #[serde(default)]
    pub guest: Vec<Artist>,
    /// Remixer(s).
    #[serde(default)]
    pub remixer: Vec<Artist>,
    /// Producer(s).
    #[serde(default)]
    pub producer: Vec<Artist>,
    /// Composer(s).
    #[serde(default)]
    pub composer: Vec<Artist>,
    /// Conductor(s).
    #[serde(default)]
    pub conductor: Vec<Artist>,
    /// DJ-mix compiler(s).
    #[serde(default)]
    pub djmixer: Vec<Artist>,
}

impl ArtistMapping {
    /// Create an empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow the artist list for a role.
    #[must_use]
    pub fn role(&self, role: ArtistRole) -> &Vec<Artist> {
        match role {
            ArtistRole::Main => &self.main,
            ArtistRole::Guest => &self.guest,
            ArtistRole::Remixer => &self.remixer,
            ArtistRole::Producer => &self.producer,
            ArtistRole::Composer => &self.composer,
            ArtistRole::Conductor => &self.conductor,
            ArtistRole::DjMixer => &self.djmixer,
        }
    }

    /// Mutably borrow the artist list for a role.
    pub fn role_mut(&mut self, role: ArtistRole) -> &mut Vec<Artist> {
        match role {
            ArtistRole::Main => &mut self.main,
            ArtistRole::Guest => &mut self.guest,
            ArtistRole::Remixer => &mut self.remixer,
            ArtistRole::Producer => &mut self.producer,
            ArtistRole::Composer => &mut self.composer,
            ArtistRole::Conductor => &mut self.conductor,
            ArtistRole::DjMixer => &mut self.djmixer,
        }
    }

    /// Iterate over `(role, artists)` pairs in canonical order.
    pub fn items(&self) -> impl Iterator<Item = (ArtistRole, &Vec<Artist>)> {
        ArtistRole::ALL.iter().map(move |&role| (role, self.role(role)))
    }

    /// All artists across roles, de-duplicated, in role order.
    #[must_use]
    pub fn all(&self) -> Vec<Artist> {
        uniq(
            ArtistRole::ALL
                .iter()
                .flat_map(|&role| self.role(role).iter().cloned())
                .collect(),
        )
    }

    /// Whether no role has any artist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        ArtistRole::ALL.iter().all(|&role| self.role(role).is_empty())
    }
}

/// A date whose month and day may be unknown.
///
/// Serialization renders missing components as `01` so that the value stays sortable; parsing is
/// lenient about trailing time-of-day garbage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartialDate {
    /// The year. Always present.
    pub year: i32,
    /// The month, if known.
    pub month: Option<u32>,
    /// The day, if known.
    pub day: Option<u32>,
}

/// Matches a full `YYYY-MM-DD` prefix; anything after the day (e.g. a time) is ignored.
static DATE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})").expect("static regex must compile"));

impl PartialDate {
    /// A year-only date.
    #[must_use]
    pub fn from_year(year: i32) -> Self {
        Self {
            year,
            month: None,
            day: None,
        }
    }

    /// Parse a date tag value.
    ///
    /// Returns [`None`] for absent, empty and unparseable values. A bare integer of at most four
    /// digits is a year; otherwise the value must start with `YYYY-MM-DD`.
    #[must_use]
    pub fn parse(value: Option<&str>) -> Option<Self> {
        let value = value?.trim();
        if value.is_empty() {
            return None;
        }
        if value.len() <= 4 {
            if let Ok(year) = value.parse::<i32>() {
                return Some(Self::from_year(year));
            }
        }
        let m = DATE_REGEX.captures(value)?;
        Some(Self {
            year: m[1].parse().ok()?,
            month: Some(m[2].parse().ok()?),
            day: Some(m[3].parse().ok()?),
        })
    }
}

impl fmt::Display for PartialDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.month.is_none() && self.day.is_none() {
            write!(f, "{:04}", self.year)
        } else {
            write!(
                f,
                "{:04}-{:02}-{:02}",
                self.year,
                self.month.unwrap_or(1),
                self.day.unwrap_or(1)
            )
        }
    }
}

/// De-duplicate while preserving first-occurrence order.
#[must_use]
pub fn uniq<T: Hash + Eq + Clone>(xs: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::new();
    let mut result = Vec::new();
    for x in xs {
        if seen.insert(x.clone()) {
            result.push(x);
        }
    }
    result
}

/// Whether the path has a supported audio extension.
#[must_use]
pub fn is_music_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let name = name.to_lowercase();
    SUPPORTED_AUDIO_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Replace filesystem-hostile characters in a directory name and enforce the byte budget.
#[must_use]
pub fn sanitize_dirname(name: &str, max_filename_bytes: usize) -> String {
    let name = ILLEGAL_FS_CHARS_REGEX.replace_all(name, "_");
    truncate_bytes(&name, max_filename_bytes).trim().to_string()
}

/// Replace filesystem-hostile characters in a file name, preserving a short extension while
/// enforcing the byte budget on the stem.
#[must_use]
pub fn sanitize_filename(name: &str, max_filename_bytes: usize) -> String {
    let name = ILLEGAL_FS_CHARS_REGEX.replace_all(name, "_").into_owned();
    let (stem, ext) = match name.rfind('.') {
        Some(pos) => name.split_at(pos),
        None => (name.as_str(), ""),
    };
    // Anything longer than 6 bytes is not an extension worth preserving.
    let (stem, ext) = if ext.len() > 6 { (name.as_str(), "") } else { (stem, ext) };
    format!("{}{ext}", truncate_bytes(stem, max_filename_bytes).trim_end())
}

/// Truncate a string to at most `max_bytes` without splitting a UTF-8 sequence.
fn truncate_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Stable content digest of a `Debug`-printable value, used for release metahashes.
#[must_use]
pub fn sha256_digest<T: fmt::Debug>(value: &T) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{value:?}").as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_releasetype() {
        assert_eq!(normalize_releasetype(Some("ALBUM")), "album");
        assert_eq!(normalize_releasetype(Some("Single")), "single");
        assert_eq!(normalize_releasetype(Some("lalala")), "unknown");
        assert_eq!(normalize_releasetype(Some("")), "unknown");
        assert_eq!(normalize_releasetype(None), "unknown");
    }

    #[test]
    fn test_partial_date_parse() {
        assert_eq!(
            PartialDate::parse(Some("2023")),
            Some(PartialDate::from_year(2023))
        );
        assert_eq!(
            PartialDate::parse(Some("2023-12-25")),
            Some(PartialDate {
                year: 2023,
                month: Some(12),
                day: Some(25)
            })
        );
        assert_eq!(
            PartialDate::parse(Some("2023-12-25T10:30:00")),
            Some(PartialDate {
                year: 2023,
                month: Some(12),
                day: Some(25)
            })
        );
        assert_eq!(PartialDate::parse(None), None);
        assert_eq!(PartialDate::parse(Some("")), None);
        assert_eq!(PartialDate::parse(Some("invalid")), None);
        assert_eq!(PartialDate::parse(Some("12345")), None);
    }

    #[test]
    fn test_partial_date_display() {
        assert_eq!(PartialDate::from_year(2023).to_string(), "2023");
        assert_eq!(
            PartialDate {
                year: 2023,
                month: Some(12),
                day: Some(25)
            }
            .to_string(),
            "2023-12-25"
        );
        assert_eq!(
            PartialDate {
                year: 2023,
                month: Some(12),
                day: None
            }
            .to_string(),
            "2023-12-01"
        );
    }

    #[test]
    fn test_uniq_preserves_order() {
        assert_eq!(uniq(vec!["a", "b", "a", "c", "b"]), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_sanitize_filename_preserves_extension() {
        let name = format!("{}.flac", "x".repeat(300));
        let sanitized = sanitize_filename(&name, 180);
        assert!(sanitized.ends_with(".flac"));
        assert!(sanitized.len() <= 180 + ".flac".len());
    }

    #[test]
    fn test_sanitize_dirname_replaces_illegal_chars() {
        assert_eq!(sanitize_dirname("AC/DC: Live?", 180), "AC_DC_ Live_");
    }

    #[test]
    fn test_is_music_file() {
        assert!(is_music_file(Path::new("/lib/a/01. Intro.FLAC")));
        assert!(is_music_file(Path::new("track.opus")));
        assert!(!is_music_file(Path::new("cover.jpg")));
    }
}
