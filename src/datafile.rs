// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! The per-release sidecar datafile.
//!
//! Every release directory carries a hidden `.rose.<uuid>.toml` file. The file name encodes the
//! release's identity (a sortable UUIDv7, assigned once and never rewritten); the contents hold
//! the mutable per-release state that has no home in the audio tags.

use crate::error::Result;
use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Matches `.rose.<uuid>.toml` and captures the UUID.
pub static DATAFILE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\.rose\.([a-fA-F0-9\-]+)\.toml$").expect("static regex must compile"));

/// The stored per-release state.
///
/// Unknown fields are dropped on the next write; missing fields are filled with defaults on read.
/// The `added_at` offset is preserved verbatim and never rewritten on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDataFile {
    /// Whether this release is marked as "new".
    #[serde(default = "default_new")]
    pub new: bool,
    /// When this release was added to the library, as an ISO-8601 string with offset.
    #[serde(default = "default_added_at")]
    pub added_at: String,
}

/// Default for [`StoredDataFile::new`].
fn default_new() -> bool {
    true
}

/// Default for [`StoredDataFile::added_at`]: the current local time.
fn default_added_at() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%:z").to_string()
}

impl Default for StoredDataFile {
    fn default() -> Self {
        Self {
            new: default_new(),
            added_at: default_added_at(),
        }
    }
}

/// The sidecar path for a release directory and UUID.
#[must_use]
pub fn datafile_path(dir: &Path, uuid: &Uuid) -> PathBuf {
    dir.join(format!(".rose.{uuid}.toml"))
}

/// Find the sidecar in a release directory. First match wins.
///
/// # Errors
///
/// Returns an error if the directory cannot be enumerated.
pub fn find_datafile(dir: &Path) -> Result<Option<(PathBuf, Uuid)>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let filename = entry.file_name();
        let Some(filename) = filename.to_str() else {
            continue;
        };
        if let Some(captures) = DATAFILE_REGEX.captures(filename) {
            // A mangled UUID means this is not our file.
            if let Ok(uuid) = Uuid::parse_str(&captures[1]) {
                return Ok(Some((entry.path(), uuid)));
            }
        }
    }
    Ok(None)
}

/// Read a sidecar.
///
/// An unparseable file is logged and read as defaults; it is *not* rewritten, so a later version
/// of this program (or the user) can still recover its contents.
///
/// # Errors
///
/// Returns an error if the file cannot be read at all.
pub fn read_datafile(path: &Path) -> Result<StoredDataFile> {
    let contents = fs::read_to_string(path)?;
    match toml::from_str::<StoredDataFile>(&contents) {
        Ok(datafile) => Ok(datafile),
        Err(err) => {
            log::warn!("Failed to parse datafile {}: {err}. Using defaults.", path.display());
            Ok(StoredDataFile::default())
        }
    }
}

/// Write a sidecar atomically (temp file and rename), so concurrent readers never observe a
/// partial file.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_datafile(path: &Path, datafile: &StoredDataFile) -> Result<()> {
    let text = toml::to_string_pretty(datafile)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(text.as_bytes())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Create a fresh sidecar with a new UUIDv7 and default state.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn create_datafile(dir: &Path) -> Result<(PathBuf, Uuid, StoredDataFile)> {
    let uuid = Uuid::now_v7();
    let path = datafile_path(dir, &uuid);
    let datafile = StoredDataFile::default();
    write_datafile(&path, &datafile)?;
    Ok((path, uuid, datafile))
}

/// Resolve the sidecar of a release directory, creating it on first contact.
///
/// A present-but-incomplete file is rewritten with the missing fields filled; a present-but-
/// unparseable file is left untouched on disk and read as defaults.
///
/// # Errors
///
/// Returns an error if the directory cannot be enumerated or the file cannot be written.
pub fn read_or_create_datafile(dir: &Path) -> Result<(PathBuf, Uuid, StoredDataFile)> {
    match find_datafile(dir)? {
        Some((path, uuid)) => {
            let contents = fs::read_to_string(&path)?;
            match toml::from_str::<StoredDataFile>(&contents) {
                Ok(datafile) => {
                    // Fields that serde filled from defaults are missing on disk; detect that by
                    // re-serializing and comparing, and upgrade the file when they differ.
                    let complete = toml::to_string_pretty(&datafile)?;
                    if toml::from_str::<toml::Value>(&contents)
                        .map(|v| v.get("new").is_none() || v.get("added_at").is_none())
                        .unwrap_or(false)
                        && complete != contents
                    {
                        write_datafile(&path, &datafile)?;
                    }
                    Ok((path, uuid, datafile))
                }
                Err(err) => {
                    log::warn!(
                        "Failed to parse datafile {}: {err}. Using defaults.",
                        path.display()
                    );
                    Ok((path, uuid, StoredDataFile::default()))
                }
            }
        }
        None => create_datafile(dir),
    }
}

/// Flip the "new" flag of the sidecar at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or written.
pub fn toggle_new_flag(path: &Path) -> Result<bool> {
    let mut datafile = read_datafile(path)?;
    datafile.new = !datafile.new;
    write_datafile(path, &datafile)?;
    Ok(datafile.new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_find() {
        let dir = TempDir::new().unwrap();
        let (path, uuid, datafile) = read_or_create_datafile(dir.path()).unwrap();
        assert!(path.exists());
        assert!(datafile.new);
        assert!(!datafile.added_at.is_empty());

        let (found_path, found_uuid) = find_datafile(dir.path()).unwrap().unwrap();
        assert_eq!(found_path, path);
        assert_eq!(found_uuid, uuid);
    }

    #[test]
    fn test_read_or_create_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (_, uuid_a, file_a) = read_or_create_datafile(dir.path()).unwrap();
        let (_, uuid_b, file_b) = read_or_create_datafile(dir.path()).unwrap();
        assert_eq!(uuid_a, uuid_b);
        assert_eq!(file_a, file_b);
    }

    #[test]
    fn test_missing_fields_are_filled_and_rewritten() {
        let dir = TempDir::new().unwrap();
        let uuid = Uuid::now_v7();
        let path = datafile_path(dir.path(), &uuid);
        std::fs::write(&path, "new = false\n").unwrap();

        let (_, _, datafile) = read_or_create_datafile(dir.path()).unwrap();
        assert!(!datafile.new);
        assert!(!datafile.added_at.is_empty());
        // The upgrade is persisted.
        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert!(on_disk.contains("added_at"));
    }

    #[test]
    fn test_corrupt_datafile_yields_defaults_without_overwrite() {
        let dir = TempDir::new().unwrap();
        let uuid = Uuid::now_v7();
        let path = datafile_path(dir.path(), &uuid);
        std::fs::write(&path, "this is { not toml").unwrap();

        let (_, parsed_uuid, datafile) = read_or_create_datafile(dir.path()).unwrap();
        assert_eq!(parsed_uuid, uuid);
        assert!(datafile.new);
        // The corrupt file stays untouched on disk.
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "this is { not toml");
    }

    #[test]
    fn test_added_at_offset_is_preserved() {
        let dir = TempDir::new().unwrap();
        let uuid = Uuid::now_v7();
        let path = datafile_path(dir.path(), &uuid);
        std::fs::write(&path, "new = true\nadded_at = \"2023-10-23T00:00:00-04:00\"\n").unwrap();

        let datafile = read_datafile(&path).unwrap();
        assert_eq!(datafile.added_at, "2023-10-23T00:00:00-04:00");
    }

    #[test]
    fn test_toggle_new_flag() {
        let dir = TempDir::new().unwrap();
        let (path, _, _) = read_or_create_datafile(dir.path()).unwrap();
        assert!(!toggle_new_flag(&path).unwrap());
        assert!(toggle_new_flag(&path).unwrap());
    }
}
