// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Playlists: ordered, user-curated lists of tracks.
//!
//! Same shape as collages, but referencing tracks. The editor round-trip additionally
//! disambiguates identical display lines with a UUID suffix, because two different tracks can
//! share their full display text.

use crate::cache::update::{update_cache_evict_nonexistent_playlists, update_cache_for_playlists};
use crate::cache::{connect, get_track_or_err, lock, playlist_lock_name, track_logtext, unlock};
use crate::editor::edit_file;
use crate::error::{ExpectedError, Result};
use crate::Config;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// One track reference inside a playlist file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlaylistTrack {
    /// The referenced track UUID.
    uuid: String,
    /// Derived display text; rewritten on every cache refresh and untrusted on read.
    #[serde(default)]
    description_meta: String,
}

/// The playlist file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PlaylistData {
    /// Ordered track references.
    #[serde(default)]
    tracks: Vec<PlaylistTrack>,
}

/// The path of a playlist's TOML file.
fn playlist_path(config: &Config, name: &str) -> PathBuf {
    config.music_source_dir.join("!playlists").join(format!("{name}.toml"))
}

/// Read and parse a playlist file.
fn read_playlist(config: &Config, name: &str) -> Result<PlaylistData> {
    let path = playlist_path(config, name);
    if !path.exists() {
        return Err(ExpectedError::PlaylistDoesNotExist {
            name: name.to_string(),
        }
        .into());
    }
    let text = fs::read_to_string(&path)?;
    if text.trim().is_empty() {
        return Ok(PlaylistData::default());
    }
    toml::from_str(&text).map_err(|e| {
        ExpectedError::Generic(format!("Failed to parse playlist {name}: {e}")).into()
    })
}

/// Write a playlist file back.
fn write_playlist(config: &Config, name: &str, data: &PlaylistData) -> Result<()> {
    fs::write(playlist_path(config, name), toml::to_string_pretty(data)?)?;
    Ok(())
}

/// Create an empty playlist.
///
/// # Errors
///
/// Fails if a playlist with this name already exists.
pub fn create_playlist(config: &Config, name: &str) -> Result<()> {
    let dir = config.music_source_dir.join("!playlists");
    fs::create_dir_all(&dir)?;
    let path = playlist_path(config, name);

    let conn = connect(config)?;
    let lock_name = playlist_lock_name(name);
    lock(&conn, &lock_name, 60.0)?;
    let result = (|| -> Result<()> {
        if path.exists() {
            return Err(ExpectedError::PlaylistAlreadyExists {
                name: name.to_string(),
            }
            .into());
        }
        write_playlist(config, name, &PlaylistData::default())
    })();
    unlock(&conn, &lock_name)?;
    result?;

    log::info!("Created playlist {name} in source directory");
    update_cache_for_playlists(config, Some(vec![name.to_string()]), true)
}

/// Delete a playlist: its file moves to the cache-dir trash.
///
/// # Errors
///
/// Fails if the playlist does not exist.
pub fn delete_playlist(config: &Config, name: &str) -> Result<()> {
    let path = playlist_path(config, name);
    let conn = connect(config)?;
    let lock_name = playlist_lock_name(name);
    lock(&conn, &lock_name, 60.0)?;
    let result = (|| -> Result<()> {
        if !path.exists() {
            return Err(ExpectedError::PlaylistDoesNotExist {
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

    log::info!("Deleted playlist {name} from source directory");
    update_cache_evict_nonexistent_playlists(config)
}

/// Rename a playlist, taking adjacent non-TOML files sharing the stem (cover art) along.
///
/// # Errors
///
/// Fails if the source playlist is missing or the target name is taken.
pub fn rename_playlist(config: &Config, old_name: &str, new_name: &str) -> Result<()> {
    let old_path = playlist_path(config, old_name);
    let new_path = playlist_path(config, new_name);

    let conn = connect(config)?;
    let old_lock = playlist_lock_name(old_name);
    let new_lock = playlist_lock_name(new_name);
    lock(&conn, &old_lock, 60.0)?;
    lock(&conn, &new_lock, 60.0)?;
    let result = (|| -> Result<()> {
        if !old_path.exists() {
            return Err(ExpectedError::PlaylistDoesNotExist {
                name: old_name.to_string(),
            }
            .into());
        }
        if new_path.exists() {
            return Err(ExpectedError::PlaylistAlreadyExists {
                name: new_name.to_string(),
            }
            .into());
        }
        fs::rename(&old_path, &new_path)?;
        let dir = config.music_source_dir.join("!playlists");
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
                        "Renaming playlist-adjacent file {} to {}",
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

    log::info!("Renamed playlist {old_name} to {new_name}");
    update_cache_for_playlists(config, Some(vec![new_name.to_string()]), true)?;
    update_cache_evict_nonexistent_playlists(config)
}

/// Add a track to a playlist. A track that is already present is left alone.
///
/// # Errors
///
/// Fails if the track or the playlist does not exist.
pub fn add_track_to_playlist(config: &Config, playlist_name: &str, track_id: &str) -> Result<()> {
    let track = get_track_or_err(config, track_id)?;
    let logtext = track_logtext(&track);

    let conn = connect(config)?;
    let lock_name = playlist_lock_name(playlist_name);
    lock(&conn, &lock_name, 60.0)?;
    let result = (|| -> Result<bool> {
        let mut data = read_playlist(config, playlist_name)?;
        if data.tracks.iter().any(|t| t.uuid == track_id) {
            log::info!("No-Op: Track {logtext} already in playlist {playlist_name}");
            return Ok(false);
        }
        data.tracks.push(PlaylistTrack {
            uuid: track_id.to_string(),
            description_meta: logtext.clone(),
        });
        write_playlist(config, playlist_name, &data)?;
        Ok(true)
    })();
    unlock(&conn, &lock_name)?;

    if result? {
        log::info!("Added track {logtext} to playlist {playlist_name}");
        update_cache_for_playlists(config, Some(vec![playlist_name.to_string()]), true)?;
    }
    Ok(())
}

/// Remove a track from a playlist. A track that is absent is a no-op.
///
/// # Errors
///
/// Fails if the track or the playlist does not exist.
pub fn remove_track_from_playlist(
    config: &Config,
    playlist_name: &str,
    track_id: &str,
) -> Result<()> {
    let track = get_track_or_err(config, track_id)?;
    let logtext = track_logtext(&track);

    let conn = connect(config)?;
    let lock_name = playlist_lock_name(playlist_name);
    lock(&conn, &lock_name, 60.0)?;
    let result = (|| -> Result<bool> {
        let mut data = read_playlist(config, playlist_name)?;
        let old_len = data.tracks.len();
        data.tracks.retain(|t| t.uuid != track_id);
        if data.tracks.len() == old_len {
            log::info!("No-Op: Track {logtext} not in playlist {playlist_name}");
            return Ok(false);
        }
        write_playlist(config, playlist_name, &data)?;
        Ok(true)
    })();
    unlock(&conn, &lock_name)?;

    if result? {
        log::info!("Removed track {logtext} from playlist {playlist_name}");
        update_cache_for_playlists(config, Some(vec![playlist_name.to_string()]), true)?;
    }
    Ok(())
}

/// Render the editor lines for a playlist, disambiguating duplicate display texts with a UUID
/// suffix.
fn editor_lines(data: &PlaylistData) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for track in &data.tracks {
        *counts.entry(track.description_meta.as_str()).or_insert(0) += 1;
    }
    data.tracks
        .iter()
        .map(|t| {
            if counts[t.description_meta.as_str()] > 1 {
                format!("{} [{}]", t.description_meta, t.uuid)
            } else {
                t.description_meta.clone()
            }
        })
        .collect()
}

/// Reorder and prune a playlist in the user's editor.
///
/// Duplicate display lines carry a ` [<uuid>]` suffix so each line resolves to exactly one
/// track. Reordering is permitted, duplicates are permitted, omitting a line deletes the entry,
/// and an unknown line rejects the whole edit (the scratch file is retained for the user).
///
/// # Errors
///
/// Fails if the playlist does not exist, the editor exits non-zero, or a line does not match a
/// known track.
pub fn edit_playlist_in_editor(config: &Config, playlist_name: &str) -> Result<()> {
    let conn = connect(config)?;
    let lock_name = playlist_lock_name(playlist_name);
    lock(&conn, &lock_name, 300.0)?;
    let result = edit_playlist_locked(config, playlist_name);
    unlock(&conn, &lock_name)?;
    // The refresh re-takes the playlist lock, so it must run after the unlock.
    if result? {
        update_cache_for_playlists(config, Some(vec![playlist_name.to_string()]), true)?;
    }
    Ok(())
}

/// The body of [`edit_playlist_in_editor`], under the playlist lock. Returns whether the file
/// changed.
fn edit_playlist_locked(config: &Config, playlist_name: &str) -> Result<bool> {
    let data = read_playlist(config, playlist_name)?;
    let lines = editor_lines(&data);
    let content = lines.join("\n");

    let scratch = config.cache_dir.join(format!("rose-edit-playlist-{playlist_name}.txt"));
    fs::create_dir_all(&config.cache_dir)?;
    fs::write(&scratch, &content)?;
    edit_file(&scratch)?;
    let edited = fs::read_to_string(&scratch)?;

    if edited.trim() == content.trim() {
        log::info!("Aborting: no changes detected in playlist edit");
        let _removed = fs::remove_file(&scratch);
        return Ok(false);
    }

    let by_line: HashMap<&str, &PlaylistTrack> =
        lines.iter().map(String::as_str).zip(data.tracks.iter()).collect();
    let mut edited_tracks = Vec::new();
    for line in edited.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some(track) = by_line.get(line) else {
            return Err(ExpectedError::InvalidEdit(format!(
                "Line {line:?} does not match a known track in the playlist. Was the line \
                 edited? The edit was left at {}",
                scratch.display()
            ))
            .into());
        };
        edited_tracks.push((*track).clone());
    }

    write_playlist(config, playlist_name, &PlaylistData { tracks: edited_tracks })?;
    let _removed = fs::remove_file(&scratch);

    log::info!("Edited playlist {playlist_name} from EDITOR");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_editor_lines_disambiguate_duplicates() {
        let data = PlaylistData {
            tracks: vec![
                PlaylistTrack {
                    uuid: "aaa".to_string(),
                    description_meta: "Artist - Song".to_string(),
                },
                PlaylistTrack {
                    uuid: "bbb".to_string(),
                    description_meta: "Artist - Song".to_string(),
                },
                PlaylistTrack {
                    uuid: "ccc".to_string(),
                    description_meta: "Artist - Other".to_string(),
                },
            ],
        };
        assert_eq!(
            editor_lines(&data),
            vec![
                "Artist - Song [aaa]".to_string(),
                "Artist - Song [bbb]".to_string(),
                "Artist - Other".to_string(),
            ]
        );
    }
}
