// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Release mutation operations.
//!
//! Everything here goes through the same shape: resolve the release from the cache, take its
//! named lock, mutate the filesystem (tags, sidecar, files), and finish with a targeted cache
//! refresh. Release identity is never rewritten; a release UUID is assigned once by the scanner
//! and follows the directory for the rest of its life.

use crate::cache::update::{
    update_cache_evict_nonexistent_releases, update_cache_for_collages, update_cache_for_playlists,
    update_cache_for_releases,
};
use crate::cache::{
    connect, get_release_or_err, get_track_or_err, get_tracks_of_release, lock, release_lock_name,
    release_logtext, unlock, CachedRelease,
};
use crate::common::{
    normalize_releasetype, sanitize_dirname, sanitize_filename, Artist, ArtistMapping, ArtistRole,
    PartialDate, SUPPORTED_RELEASE_TYPES,
};
use crate::datafile::{create_datafile, find_datafile, toggle_new_flag};
use crate::editor::edit_file;
use crate::error::{ExpectedError, Result};
use crate::rules::parser::{Action, Matcher};
use crate::rules::{
    execute_metadata_actions, fast_search_for_matching_releases,
    filter_release_false_positives_using_read_cache,
};
use crate::tag::AudioTags;
use crate::Config;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use uuid::Uuid;

/// Delete a release: its directory moves to the cache-dir trash and its rows are evicted.
///
/// # Errors
///
/// Fails if the release does not exist or the directory cannot be moved.
pub fn delete_release(config: &Config, release_id: &str) -> Result<()> {
    let release = get_release_or_err(config, release_id)?;
    let conn = connect(config)?;
    let lock_name = release_lock_name(release_id);
    lock(&conn, &lock_name, 60.0)?;
    let result = (|| -> Result<()> {
        let trash_dir = config.trash_dir();
        fs::create_dir_all(&trash_dir)?;
        let dirname = release.source_path.file_name().ok_or_else(|| {
            crate::error::Error::Generic(format!(
                "Release source path {} has no final component",
                release.source_path.display()
            ))
        })?;
        fs::rename(&release.source_path, trash_dir.join(dirname))?;
        Ok(())
    })();
    unlock(&conn, &lock_name)?;
    result?;

    log::info!("Trashed release {}", release_logtext(&release));
    update_cache_evict_nonexistent_releases(config)?;
    // Collages and playlists may reference the release; their entries flip to missing.
    update_cache_for_collages(config, None, true)?;
    update_cache_for_playlists(config, None, true)
}

/// Flip the release's "new" flag in its sidecar.
///
/// # Errors
///
/// Fails if the release does not exist or the sidecar cannot be rewritten.
pub fn toggle_release_new(config: &Config, release_id: &str) -> Result<()> {
    let release = get_release_or_err(config, release_id)?;
    let conn = connect(config)?;
    let lock_name = release_lock_name(release_id);
    lock(&conn, &lock_name, 60.0)?;
    let result = (|| -> Result<bool> {
        let Some((datafile_path, _)) = find_datafile(&release.source_path)? else {
            return Err(crate::error::Error::Generic(format!(
                "Release {release_id} has no datafile"
            )));
        };
        toggle_new_flag(&datafile_path)
    })();
    unlock(&conn, &lock_name)?;
    let new = result?;

    log::info!(
        "Toggled release {} to {}",
        release_logtext(&release),
        if new { "new" } else { "not new" }
    );
    update_cache_for_releases(config, Some(vec![release.source_path]), false)
}

/// Set the release's cover art, replacing any existing cover file.
///
/// The file's extension must be in `valid_art_exts`. The new cover is written as
/// `cover.<ext>`.
///
/// # Errors
///
/// Fails if the release does not exist, the source file is missing, or the extension is not
/// an allowed art extension.
pub fn set_release_cover_art(config: &Config, release_id: &str, cover_art_path: &Path) -> Result<()> {
    let release = get_release_or_err(config, release_id)?;
    if !cover_art_path.is_file() {
        return Err(ExpectedError::InvalidCoverArtFile(format!(
            "{} is not a file",
            cover_art_path.display()
        ))
        .into());
    }
    let extension = cover_art_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    if !config.valid_art_exts.contains(&extension) {
        return Err(ExpectedError::InvalidCoverArtFile(format!(
            "{} does not have a valid art extension (expected one of: {})",
            cover_art_path.display(),
            config.valid_art_exts.join(", ")
        ))
        .into());
    }

    let conn = connect(config)?;
    let lock_name = release_lock_name(release_id);
    lock(&conn, &lock_name, 60.0)?;
    let result = (|| -> Result<()> {
        remove_existing_covers(config, &release)?;
        let dest = release.source_path.join(format!("cover.{extension}"));
        let _bytes = fs::copy(cover_art_path, &dest)?;
        Ok(())
    })();
    unlock(&conn, &lock_name)?;
    result?;

    log::info!("Set cover art of release {}", release_logtext(&release));
    update_cache_for_releases(config, Some(vec![release.source_path]), true)
}

/// Remove the release's cover art.
///
/// # Errors
///
/// Fails if the release does not exist or has no cover.
pub fn delete_release_cover_art(config: &Config, release_id: &str) -> Result<()> {
    let release = get_release_or_err(config, release_id)?;
    if release.cover_image_path.is_none() {
        return Err(ExpectedError::Generic(format!(
            "Release {release_id} has no cover art"
        ))
        .into());
    }

    let conn = connect(config)?;
    let lock_name = release_lock_name(release_id);
    lock(&conn, &lock_name, 60.0)?;
    let result = remove_existing_covers(config, &release);
    unlock(&conn, &lock_name)?;
    result?;

    log::info!("Deleted cover art of release {}", release_logtext(&release));
    update_cache_for_releases(config, Some(vec![release.source_path]), true)
}

/// Delete every file in the release directory that is recognized as cover art.
fn remove_existing_covers(config: &Config, release: &CachedRelease) -> Result<()> {
    let valid_covers = config.valid_cover_arts();
    for entry in fs::read_dir(&release.source_path)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if valid_covers.iter().any(|c| c == &name) {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// Create a new single release containing a copy of the given track.
///
/// The new directory is named after the track's main artist and title; the copy receives a fresh
/// track id, the new release's id, `releasetype = single` and track/disc number 1. The source
/// release is untouched.
///
/// # Errors
///
/// Fails if the track does not exist or the new directory cannot be created.
pub fn create_single_release(config: &Config, track_id: &str) -> Result<String> {
    let track = get_track_or_err(config, track_id)?;
    let release = get_release_or_err(config, &track.release_id)?;

    let title = track.tracktitle.clone().unwrap_or_else(|| "Unknown Title".to_string());
    let artist = track
        .trackartists
        .main
        .iter()
        .find(|a| !a.alias)
        .or_else(|| release.releaseartists.main.iter().find(|a| !a.alias))
        .map_or_else(|| "Unknown Artist".to_string(), |a| a.name.clone());

    let dirname = sanitize_dirname(&format!("{artist} - {title}"), config.max_filename_bytes);
    let single_dir = config.music_source_dir.join(&dirname);
    if single_dir.exists() {
        return Err(ExpectedError::Generic(format!(
            "Directory {dirname} already exists in the music source directory"
        ))
        .into());
    }
    fs::create_dir_all(&single_dir)?;
    let (_, release_uuid, _) = create_datafile(&single_dir)?;

    let filename = track
        .source_path
        .file_name()
        .and_then(|n| n.to_str())
        .map_or_else(|| "track.flac".to_string(), ToString::to_string);
    let dest_path = single_dir.join(sanitize_filename(&filename, config.max_filename_bytes));
    let _bytes = fs::copy(&track.source_path, &dest_path)?;

    let mut tags = AudioTags::from_file(&dest_path)?;
    tags.id = Some(Uuid::now_v7().to_string());
    tags.release_id = Some(release_uuid.to_string());
    tags.releasetitle = Some(title.clone());
    tags.releasetype = "single".to_string();
    tags.tracknumber = Some("1".to_string());
    tags.discnumber = Some("1".to_string());
    tags.releaseartists = ArtistMapping {
        main: vec![Artist::new(artist)],
        ..ArtistMapping::default()
    };
    tags.flush(config)?;

    log::info!("Created single release {title} from track {track_id}");
    update_cache_for_releases(config, Some(vec![single_dir]), true)?;
    Ok(release_uuid.to_string())
}

/// The TOML view of a release's writable metadata presented to the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct EditableRelease {
    /// Release title.
    title: String,
    /// Release type; must be one of the closed vocabulary.
    releasetype: String,
    /// Release date as `YYYY` or `YYYY-MM-DD`; empty clears it.
    #[serde(default)]
    releasedate: String,
    /// Original release date.
    #[serde(default)]
    originaldate: String,
    /// Composition date.
    #[serde(default)]
    compositiondate: String,
    /// Edition name; empty clears it.
    #[serde(default)]
    edition: String,
    /// Catalog number; empty clears it.
    #[serde(default)]
    catalognumber: String,
    /// Genres.
    #[serde(default)]
    genres: Vec<String>,
    /// Secondary genres.
    #[serde(default)]
    secondarygenres: Vec<String>,
    /// Descriptors.
    #[serde(default)]
    descriptors: Vec<String>,
    /// Labels.
    #[serde(default)]
    labels: Vec<String>,
    /// Release artists: role → names. Roles with no artists are omitted.
    #[serde(default)]
    artists: BTreeMap<String, Vec<String>>,
}

impl EditableRelease {
    /// Build the editable view of a cached release.
    fn from_release(release: &CachedRelease) -> Self {
        let date = |d: Option<PartialDate>| d.map(|d| d.to_string()).unwrap_or_default();
        let mut artists = BTreeMap::new();
        for (role, list) in release.releaseartists.items() {
            let names: Vec<String> =
                list.iter().filter(|a| !a.alias).map(|a| a.name.clone()).collect();
            if !names.is_empty() {
                let _prev = artists.insert(role.as_str().to_string(), names);
            }
        }
        EditableRelease {
            title: release.releasetitle.clone().unwrap_or_default(),
            releasetype: release.releasetype.clone(),
            releasedate: date(release.releasedate),
            originaldate: date(release.originaldate),
            compositiondate: date(release.compositiondate),
            edition: release.edition.clone().unwrap_or_default(),
            catalognumber: release.catalognumber.clone().unwrap_or_default(),
            genres: release.genres.clone(),
            secondarygenres: release.secondary_genres.clone(),
            descriptors: release.descriptors.clone(),
            labels: release.labels.clone(),
            artists,
        }
    }

    /// Validate the edited view.
    fn validate(&self) -> Result<()> {
        let releasetype = self.releasetype.to_lowercase();
        if !SUPPORTED_RELEASE_TYPES.contains(&releasetype.as_str()) {
            return Err(ExpectedError::Generic(format!(
                "Release type {} is not a supported release type.\nSupported release types: {}",
                self.releasetype,
                SUPPORTED_RELEASE_TYPES.join(", ")
            ))
            .into());
        }
        for (field, value) in [
            ("releasedate", &self.releasedate),
            ("originaldate", &self.originaldate),
            ("compositiondate", &self.compositiondate),
        ] {
            if !value.is_empty() && PartialDate::parse(Some(value)).is_none() {
                return Err(ExpectedError::Generic(format!(
                    "Invalid {field} {value:?}: must be YYYY or YYYY-MM-DD"
                ))
                .into());
            }
        }
        for role in self.artists.keys() {
            if ArtistRole::from_name(role).is_none() {
                return Err(ExpectedError::Generic(format!(
                    "Unknown artist role {role:?}"
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Write the edited fields into one track's tag record.
    fn apply_to_tags(&self, tags: &mut AudioTags) {
        let opt = |v: &String| Some(v.clone()).filter(|v| !v.is_empty());
        tags.releasetitle = opt(&self.title);
        tags.releasetype = normalize_releasetype(Some(&self.releasetype));
        tags.releasedate = PartialDate::parse(Some(&self.releasedate));
        tags.originaldate = PartialDate::parse(Some(&self.originaldate));
        tags.compositiondate = PartialDate::parse(Some(&self.compositiondate));
        tags.edition = opt(&self.edition);
        tags.catalognumber = opt(&self.catalognumber);
        tags.genre = self.genres.clone();
        tags.secondarygenre = self.secondarygenres.clone();
        tags.descriptor = self.descriptors.clone();
        tags.label = self.labels.clone();
        let mut mapping = ArtistMapping::new();
        for (role, names) in &self.artists {
            if let Some(role) = ArtistRole::from_name(role) {
                *mapping.role_mut(role) = names.iter().map(Artist::new).collect();
            }
        }
        tags.releaseartists = mapping;
    }
}

/// Edit a release's metadata in the user's editor and fan the changes out to every track.
///
/// When a previous edit failed, its scratch file survives under the cache directory; passing
/// `resume = true` reopens it instead of regenerating the view.
///
/// # Errors
///
/// Fails if the release does not exist, the editor exits non-zero, or the edited TOML does not
/// validate. In these cases the scratch file is retained so the edit can be resumed.
pub fn edit_release(config: &Config, release_id: &str, resume: bool) -> Result<()> {
    let release = get_release_or_err(config, release_id)?;
    let conn = connect(config)?;
    let lock_name = release_lock_name(release_id);
    lock(&conn, &lock_name, 300.0)?;
    let result = edit_release_locked(config, &release, resume);
    unlock(&conn, &lock_name)?;
    // The refresh re-takes the release lock, so it must run after the unlock.
    if result? {
        update_cache_for_releases(config, Some(vec![release.source_path]), true)?;
    }
    Ok(())
}

/// The body of [`edit_release`], under the release lock. Returns whether tags were written.
fn edit_release_locked(config: &Config, release: &CachedRelease, resume: bool) -> Result<bool> {
    let original = EditableRelease::from_release(release);
    let scratch = config.cache_dir.join(format!("rose-edit-{}.toml", release.id));
    fs::create_dir_all(&config.cache_dir)?;
    if resume && scratch.exists() {
        log::info!("Resuming previous edit from {}", scratch.display());
    } else {
        fs::write(&scratch, toml::to_string_pretty(&original)?)?;
    }

    edit_file(&scratch)?;
    let edited_text = fs::read_to_string(&scratch)?;
    let edited: EditableRelease = toml::from_str(&edited_text).map_err(|e| {
        ExpectedError::InvalidEdit(format!(
            "Failed to parse edited release TOML: {e}. The edit was left at {}",
            scratch.display()
        ))
    })?;
    edited.validate()?;

    if edited == original {
        log::info!("Aborting: no changes detected in release edit");
        let _removed = fs::remove_file(&scratch);
        return Ok(false);
    }

    // Fan the new release-level fields out to every track. A failure mid-way leaves the scratch
    // file behind; the next scan reconciles the tracks already written.
    for track in get_tracks_of_release(config, &release.id)? {
        let mut tags = AudioTags::from_file(&track.source_path)?;
        edited.apply_to_tags(&mut tags);
        tags.flush(config)?;
    }

    let _removed = fs::remove_file(&scratch);
    log::info!("Edited release {}", release_logtext(release));
    Ok(true)
}

/// Apply an ad-hoc action list to every track of one release.
///
/// # Errors
///
/// Fails if the release does not exist; see
/// [`execute_metadata_actions`] for the commit semantics.
pub fn run_actions_on_release(
    config: &Config,
    release_id: &str,
    actions: &[Action],
    dry_run: bool,
) -> Result<Vec<crate::rules::TrackDiff>> {
    let _release = get_release_or_err(config, release_id)?;
    let tracks = get_tracks_of_release(config, release_id)?;
    execute_metadata_actions(config, actions, &tracks, dry_run)
}

/// Find the releases matching a matcher: FTS candidates, then the authoritative filter.
///
/// # Errors
///
/// Returns an error if the database cannot be read.
pub fn find_releases_matching_rule(
    config: &Config,
    matcher: &Matcher,
) -> Result<Vec<CachedRelease>> {
    let candidates = fast_search_for_matching_releases(config, matcher)?;
    filter_release_false_positives_using_read_cache(config, matcher, &candidates)
}
