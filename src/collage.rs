// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Collages: ordered, user-curated lists of releases.
//!
//! A collage is a TOML file under `<music_source_dir>/!collages/` holding release UUIDs plus
//! derived display text. All operations take the collage's named lock and finish with a targeted
//! cache refresh, so the cache tables never drift from the files.

use crate::cache::update::{update_cache_evict_nonexistent_collages, update_cache_for_collages};
use crate::cache::{collage_lock_name, connect, get_release_or_err, lock, release_logtext, unlock};
use crate::editor::edit_file;
use crate::error::{ExpectedError, Result};
use crate::Config;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// One release reference inside a collage file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CollageRelease {
    /// The referenced release UUID.
    uuid: String,
    /// Derived display text; rewritten on every cache refresh and untrusted on read.
    #[serde(default)]
    description_meta: String,
}

/// The collage file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CollageData {
    /// Ordered release references.
    #[serde(default)]
    releases: Vec<CollageRelease>,
}

/// The path of a collage's TOML file.
fn collage_path(config: &Config, name: &str) -> PathBuf {
    config.music_source_dir.join("!collages").join(format!("{name}.toml"))
}

/// Read and parse a collage file.
fn read_collage(config: &Config, name: &str) -> Result<CollageData> {
    let path = collage_path(config, name);
    if !path.exists() {
        return Err(ExpectedError::CollageDoesNotExist {
            name: name.to_string(),
        }
        .into());
    }
    let text = fs::read_to_string(&path)?;
    if text.trim().is_empty() {
        return Ok(CollageData::default());
    }
    toml::from_str(&text).map_err(|e| {
        ExpectedError::Generic(format!("Failed to parse collage {name}: {e}")).into()
    })
}

/// Write a collage file back.
fn write_collage(config: &Config, name: &str, data: &CollageData) -> Result<()> {
    fs::write(collage_path(config, name), toml::to_string_pretty(data)?)?;
    Ok(())
}

/// Create an empty collage.
///
/// # Errors
///
/// Fails if a collage with this name already exists.
pub fn create_collage(config: &Config, name: &str) -> Result<()> {
    let dir = config.music_source_dir.join("!collages");
    fs::create_dir_all(&dir)?;
    let path = collage_path(config, name);

    let conn = connect(config)?;
    let lock_name = collage_lock_name(name);
    lock(&conn, &lock_name, 60.0)?;
    let result = (|| -> Result<()> {
        if path.exists() {
            return Err(ExpectedError::CollageAlreadyExists {
                name: name.to_string(),
            }
            .into());
        }
        write_collage(config, name, &CollageData::default())
    })();
    unlock(&conn, &lock_name)?;
    result?;

    log::info!("Created collage {name} in source directory");
    update_cache_for_collages(config, Some(vec![name.to_string()]), true)
}

/// Delete a collage: its file moves to the cache-dir trash.
///
/// # Errors
///
/// Fails if the collage does not exist.
pub fn delete_collage(config: &Config, name: &str) -> Result<()> {
    let path = collage_path(config, name);
    let conn = connect(config)?;
    let lock_name = collage_lock_name(name);
    lock(&conn, &lock_name, 60.0)?;
    let result = (|| -> Result<()> {
        if !path.exists() {
            return Err(ExpectedError::CollageDoesNotExist {
                name: name.to_string(),
            }
            .into());
        }
        let trash_dir = config.trash_dir();
        fs::create_dir_all(&trash_dir)?;
        fs::rename(&path, trash_dir.join(format!("{name}.toml")))?;
        Ok(())
    })();
    unlock(&conn, &lock_name)?;
    result?;

    log::info!("Deleted collage {name} from source directory");
    update_cache_evict_nonexistent_collages(config)
}

/// Rename a collage, taking adjacent non-TOML files sharing the stem (cover art) along.
///
/// # Errors
///
/// Fails if the source collage is missing or the target name is taken.
pub fn rename_collage(config: &Config, old_name: &str, new_name: &str) -> Result<()> {
    let old_path = collage_path(config, old_name);
    let new_path = collage_path(config, new_name);

    let conn = connect(config)?;
    let old_lock = collage_lock_name(old_name);
    let new_lock = collage_lock_name(new_name);
    lock(&conn, &old_lock, 60.0)?;
    lock(&conn, &new_lock, 60.0)?;
    let result = (|| -> Result<()> {
        if !old_path.exists() {
            return Err(ExpectedError::CollageDoesNotExist {
                name: old_name.to_string(),
            }
            .into());
        }
        if new_path.exists() {
            return Err(ExpectedError::CollageAlreadyExists {
                name: new_name.to_string(),
            }
            .into());
        }
        fs::rename(&old_path, &new_path)?;
        // Cover art and other adjacent files share the collage's stem.
        let dir = config.music_source_dir.join("!collages");
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let stem_matches =
                path.file_stem().and_then(|s| s.to_str()).is_some_and(|s| s == old_name);
            let is_toml = path.extension().and_then(|e| e.to_str()) == Some("toml");
            if stem_matches && !is_toml {
                let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
                let target = dir.join(format!("{new_name}.{ext}"));
                if !target.exists() {
                    log::debug!(
                        "Renaming collage-adjacent file {} to {}",
                        path.display(),
                        target.display()
                    );
                    fs::rename(&path, &target)?;
                }
            }
        }
        Ok(())
    })();
    unlock(&conn, &new_lock)?;
    unlock(&conn, &old_lock)?;
    result?;

    log::info!("Renamed collage {old_name} to {new_name}");
    update_cache_for_collages(config, Some(vec![new_name.to_string()]), true)?;
    update_cache_evict_nonexistent_collages(config)
}

/// Add a release to a collage. A release that is already present is left alone.
///
/// # Errors
///
/// Fails if the release or the collage does not exist.
pub fn add_release_to_collage(config: &Config, collage_name: &str, release_id: &str) -> Result<()> {
    let release = get_release_or_err(config, release_id)?;
    let logtext = release_logtext(&release);

    let conn = connect(config)?;
    let lock_name = collage_lock_name(collage_name);
    lock(&conn, &lock_name, 60.0)?;
    let result = (|| -> Result<bool> {
        let mut data = read_collage(config, collage_name)?;
        if data.releases.iter().any(|r| r.uuid == release_id) {
            log::info!("No-Op: Release {logtext} already in collage {collage_name}");
            return Ok(false);
        }
        data.releases.push(CollageRelease {
            uuid: release_id.to_string(),
            description_meta: logtext.clone(),
        });
        write_collage(config, collage_name, &data)?;
        Ok(true)
    })();
    unlock(&conn, &lock_name)?;

    if result? {
        log::info!("Added release {logtext} to collage {collage_name}");
        update_cache_for_collages(config, Some(vec![collage_name.to_string()]), true)?;
    }
    Ok(())
}

/// Remove a release from a collage. A release that is absent is a no-op.
///
/// # Errors
///
/// Fails if the release or the collage does not exist.
pub fn remove_release_from_collage(
    config: &Config,
    collage_name: &str,
    release_id: &str,
) -> Result<()> {
    let release = get_release_or_err(config, release_id)?;
    let logtext = release_logtext(&release);

    let conn = connect(config)?;
    let lock_name = collage_lock_name(collage_name);
    lock(&conn, &lock_name, 60.0)?;
    let result = (|| -> Result<bool> {
        let mut data = read_collage(config, collage_name)?;
        let old_len = data.releases.len();
        data.releases.retain(|r| r.uuid != release_id);
        if data.releases.len() == old_len {
            log::info!("No-Op: Release {logtext} not in collage {collage_name}");
            return Ok(false);
        }
        write_collage(config, collage_name, &data)?;
        Ok(true)
    })();
    unlock(&conn, &lock_name)?;

    if result? {
        log::info!("Removed release {logtext} from collage {collage_name}");
        update_cache_for_collages(config, Some(vec![collage_name.to_string()]), true)?;
    }
    Ok(())
}

/// Reorder and prune a collage in the user's editor.
///
/// The editor sees one `description_meta` line per release. Reordering is permitted, duplicates
/// are permitted, omitting a line deletes the entry, and an unknown line rejects the whole edit
/// (the scratch file is retained for the user).
///
/// # Errors
///
/// Fails if the collage does not exist, the editor exits non-zero, or a line does not match a
/// known release.
pub fn edit_collage_in_editor(config: &Config, collage_name: &str) -> Result<()> {
    let conn = connect(config)?;
    let lock_name = collage_lock_name(collage_name);
    lock(&conn, &lock_name, 300.0)?;
    let result = edit_collage_locked(config, collage_name);
    unlock(&conn, &lock_name)?;
    // The refresh re-takes the collage lock, so it must run after the unlock.
    if result? {
        update_cache_for_collages(config, Some(vec![collage_name.to_string()]), true)?;
    }
    Ok(())
}

/// The body of [`edit_collage_in_editor`], under the collage lock. Returns whether the file
/// changed.
fn edit_collage_locked(config: &Config, collage_name: &str) -> Result<bool> {
    let data = read_collage(config, collage_name)?;
    let original_lines: Vec<String> =
        data.releases.iter().map(|r| r.description_meta.clone()).collect();
    let content = original_lines.join("\n");

    let scratch = config.cache_dir.join(format!("rose-edit-collage-{collage_name}.txt"));
    fs::create_dir_all(&config.cache_dir)?;
    fs::write(&scratch, &content)?;
    edit_file(&scratch)?;
    let edited = fs::read_to_string(&scratch)?;

    if edited.trim() == content.trim() {
        log::info!("Aborting: no changes detected in collage edit");
        let _removed = fs::remove_file(&scratch);
        return Ok(false);
    }

    let by_description: HashMap<&str, &CollageRelease> = data
        .releases
        .iter()
        .map(|r| (r.description_meta.as_str(), r))
        .collect();
    let mut edited_releases = Vec::new();
    for line in edited.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some(release) = by_description.get(line) else {
            // The scratch file stays on disk so the user's work is not lost.
            return Err(ExpectedError::InvalidEdit(format!(
                "Line {line:?} does not match a known release in the collage. Was the line \
                 edited? The edit was left at {}",
                scratch.display()
            ))
            .into());
        };
        edited_releases.push((*release).clone());
    }

    write_collage(config, collage_name, &CollageData { releases: edited_releases })?;
    let _removed = fs::remove_file(&scratch);

    log::info!("Edited collage {collage_name} from EDITOR");
    Ok(true)
}
