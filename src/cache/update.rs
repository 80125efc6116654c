// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! The incremental cache refresh.
//!
//! This is the hot path: the bottleneck is disk access, so each release is checked against its
//! recorded mtimes before any tag file is opened, and all row writes for one release happen in a
//! single transaction. Releases are self-contained units, which lets the full-library scan shard
//! them across worker threads and lets a cancelled scan stop between releases without leaving a
//! torn cache behind.

use crate::cache::{
    collage_lock_name, connect, fs_mtime_nanos, lock, playlist_lock_name, process_string_for_fts,
    release_lock_name, release_logtext, track_logtext, unlock, CachedRelease, CachedTrack,
    CACHE_UPDATE_LOCK,
};
use crate::common::{Artist, ArtistMapping, ArtistRole, PartialDate};
use crate::datafile::{read_or_create_datafile, DATAFILE_REGEX};
use crate::error::Result;
use crate::tag::{is_supported_extension, AudioTags};
use crate::Config;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use uuid::Uuid;

/// Threshold below which a scan is not worth sharding across threads.
const PARALLEL_THRESHOLD: usize = 50;

/// Update the read cache to match the on-disk library, deleting rows whose counterpart no longer
/// exists. Serialized against other full scans by the `cache_update` lock.
///
/// # Errors
///
/// Returns an error on database failures; per-release and per-file problems are logged and
/// skipped instead.
pub fn update_cache(config: &Config, force: bool) -> Result<()> {
    let cancel = AtomicBool::new(false);
    update_cache_with_cancel(config, force, &cancel)
}

/// [`update_cache`], observing a cancellation flag between releases.
///
/// A cancelled scan leaves a consistent intermediate state because each release refresh is one
/// transaction.
///
/// # Errors
///
/// See [`update_cache`].
pub fn update_cache_with_cancel(config: &Config, force: bool, cancel: &AtomicBool) -> Result<()> {
    let conn = connect(config)?;
    lock(&conn, CACHE_UPDATE_LOCK, 60.0)?;
    let result = (|| -> Result<()> {
        update_cache_for_releases_with_cancel(config, None, force, cancel)?;
        update_cache_evict_nonexistent_releases(config)?;
        update_cache_for_collages(config, None, force)?;
        update_cache_evict_nonexistent_collages(config)?;
        update_cache_for_playlists(config, None, force)?;
        update_cache_evict_nonexistent_playlists(config)?;
        Ok(())
    })();
    unlock(&conn, CACHE_UPDATE_LOCK)?;
    result
}

/// Refresh the cache rows of the given release directories (all top-level directories when
/// [`None`]).
///
/// # Errors
///
/// See [`update_cache`].
pub fn update_cache_for_releases(
    config: &Config,
    release_dirs: Option<Vec<PathBuf>>,
    force: bool,
) -> Result<()> {
    let cancel = AtomicBool::new(false);
    update_cache_for_releases_with_cancel(config, release_dirs, force, &cancel)
}

/// [`update_cache_for_releases`], observing a cancellation flag between releases.
///
/// # Errors
///
/// See [`update_cache`].
pub fn update_cache_for_releases_with_cancel(
    config: &Config,
    release_dirs: Option<Vec<PathBuf>>,
    force: bool,
    cancel: &AtomicBool,
) -> Result<()> {
    let release_dirs = match release_dirs {
        Some(dirs) => dirs,
        None => {
            let mut dirs = Vec::new();
            for entry in std::fs::read_dir(&config.music_source_dir)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    dirs.push(entry.path());
                }
            }
            dirs
        }
    };
    let mut release_dirs: Vec<PathBuf> = release_dirs
        .into_iter()
        .filter(|d| {
            d.file_name().and_then(|n| n.to_str()).is_some_and(|name| {
                name != "!collages"
                    && name != "!playlists"
                    && !config.ignore_release_directories.contains(&name.to_string())
            })
        })
        .collect();
    release_dirs.sort();

    if release_dirs.is_empty() {
        log::debug!("No-Op: no whitelisted releases passed into update_cache_for_releases");
        return Ok(());
    }
    log::debug!("Refreshing the read cache for {} releases", release_dirs.len());

    let start = Instant::now();
    if release_dirs.len() < PARALLEL_THRESHOLD || config.max_proc <= 1 {
        let conn = connect(config)?;
        for dir in release_dirs {
            if cancel.load(Ordering::Relaxed) {
                log::info!("Cache update cancelled");
                break;
            }
            refresh_release_logged(config, &conn, &dir, force);
        }
    } else {
        // Shard the directories across worker threads. Each worker owns its connection; releases
        // are self-contained so no further coordination is needed.
        let chunk_size = release_dirs.len().div_ceil(config.max_proc);
        std::thread::scope(|scope| -> Result<()> {
            let mut handles = Vec::new();
            for chunk in release_dirs.chunks(chunk_size) {
                handles.push(scope.spawn(move || -> Result<()> {
                    let conn = connect(config)?;
                    for dir in chunk {
                        if cancel.load(Ordering::Relaxed) {
                            break;
                        }
                        refresh_release_logged(config, &conn, dir, force);
                    }
                    Ok(())
                }));
            }
            for handle in handles {
                handle.join().expect("scan worker panicked")?;
            }
            Ok(())
        })?;
    }
    log::debug!("Release cache refresh took {:?}", start.elapsed());
    Ok(())
}

/// Refresh one release, downgrading its errors to log lines so one broken release does not abort
/// the scan.
fn refresh_release_logged(config: &Config, conn: &Connection, dir: &Path, force: bool) {
    if let Err(err) = refresh_release(config, conn, dir, force) {
        log::error!("Failed to refresh release at {}: {err}", dir.display());
    }
}

/// The on-disk inputs of one release refresh.
struct ReleaseDirSnapshot {
    /// The sidecar path and its mtime.
    datafile_path: PathBuf,
    /// Sidecar mtime in nanoseconds.
    datafile_mtime: i64,
    /// The release UUID from the sidecar filename.
    release_id: String,
    /// Audio file paths, sorted.
    audio_paths: Vec<PathBuf>,
    /// The first discovered cover art path, if any.
    cover_image_path: Option<PathBuf>,
}

/// Refresh the cache rows of one release directory.
fn refresh_release(config: &Config, conn: &Connection, dir: &Path, force: bool) -> Result<bool> {
    if !dir.is_dir() {
        log::debug!("Skipping {} because it is not a directory", dir.display());
        return Ok(false);
    }

    // The UUID comes from the sidecar filename, so the lock can be taken before the sidecar's
    // contents or any tag file is read.
    let preexisting_id = find_release_id_in_dir(dir)?;
    let release_id_for_lock = preexisting_id.clone();
    let lock_name = release_id_for_lock.map(|id| release_lock_name(&id));
    if let Some(name) = &lock_name {
        lock(conn, name, 60.0)?;
    }
    let result = refresh_release_locked(config, conn, dir, force);
    if let Some(name) = &lock_name {
        unlock(conn, name)?;
    }
    result
}

/// Extract the release UUID from the sidecar filename, without reading the file.
fn find_release_id_in_dir(dir: &Path) -> Result<Option<String>> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(captures) = DATAFILE_REGEX.captures(name) {
            return Ok(Some(captures[1].to_string()));
        }
    }
    Ok(None)
}

/// The body of [`refresh_release`], running under the release lock (when the release already has
/// an identity).
fn refresh_release_locked(
    config: &Config,
    conn: &Connection,
    dir: &Path,
    force: bool,
) -> Result<bool> {
    let Some(snapshot) = snapshot_release_dir(config, dir)? else {
        // No audio files: not a release directory. If rows exist for it they are evicted later.
        return Ok(false);
    };

    let cached = fetch_cached_release(conn, &snapshot.release_id)?;

    // Cheap short-circuit: nothing on disk is newer than what the cache recorded.
    if !force {
        if let Some((release, tracks)) = &cached {
            if release.datafile_mtime == snapshot.datafile_mtime
                && disk_matches_cache(&snapshot.audio_paths, tracks)?
                && release.cover_image_path == snapshot.cover_image_path
            {
                log::debug!("Skipping release {} (mtimes unchanged)", dir.display());
                return Ok(false);
            }
        }
    }

    let (_, _, datafile) = read_or_create_datafile(dir)?;

    // Read every track's tags, assigning identifiers on first contact.
    let mut tags_by_path: BTreeMap<PathBuf, AudioTags> = BTreeMap::new();
    for path in &snapshot.audio_paths {
        match read_track_tags(config, path, &snapshot.release_id) {
            Ok(tags) => {
                let _prev = tags_by_path.insert(path.clone(), tags);
            }
            Err(err) => {
                log::warn!("Excluding {} from cache: {err}", path.display());
            }
        }
    }
    if tags_by_path.is_empty() {
        log::warn!("Release {} has no readable audio files", dir.display());
        return Ok(false);
    }

    let release = build_cached_release(config, &snapshot, &datafile, &tags_by_path)?;
    let tracks = build_cached_tracks(config, &release, &tags_by_path)?;

    if let Some((cached_release, _)) = &cached {
        if !force && cached_release.metahash == release.metahash {
            // Content unchanged; only the recorded mtimes moved.
            update_recorded_mtimes(conn, &release, &tracks)?;
            return Ok(false);
        }
    }

    write_release_rows(conn, &release, &tracks)?;
    log::info!("Refreshed release {}", release_logtext(&release));
    Ok(true)
}

/// Enumerate a release directory: sidecar, audio files, cover art.
fn snapshot_release_dir(config: &Config, dir: &Path) -> Result<Option<ReleaseDirSnapshot>> {
    let mut audio_paths = Vec::new();
    let mut cover_image_path = None;
    let valid_covers = config.valid_cover_arts();
    for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(std::result::Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if is_supported_extension(path) {
            audio_paths.push(path.to_path_buf());
        } else if cover_image_path.is_none() {
            let name = entry.file_name().to_string_lossy().to_lowercase();
            if valid_covers.iter().any(|c| c == &name) {
                cover_image_path = Some(path.to_path_buf());
            }
        }
    }
    if audio_paths.is_empty() {
        return Ok(None);
    }
    audio_paths.sort();

    let (datafile_path, release_id) = match crate::datafile::find_datafile(dir)? {
        Some((path, uuid)) => (path, uuid.to_string()),
        None => {
            let (path, uuid, _) = crate::datafile::create_datafile(dir)?;
            (path, uuid.to_string())
        }
    };
    let datafile_mtime = fs_mtime_nanos(&datafile_path)?;
    Ok(Some(ReleaseDirSnapshot {
        datafile_path,
        datafile_mtime,
        release_id,
        audio_paths,
        cover_image_path,
    }))
}

/// Whether the on-disk audio files exactly match the cached track rows (paths and mtimes).
fn disk_matches_cache(audio_paths: &[PathBuf], tracks: &[CachedTrack]) -> Result<bool> {
    if audio_paths.len() != tracks.len() {
        return Ok(false);
    }
    let by_path: HashMap<&Path, &CachedTrack> =
        tracks.iter().map(|t| (t.source_path.as_path(), t)).collect();
    for path in audio_paths {
        let Some(track) = by_path.get(path.as_path()) else {
            return Ok(false);
        };
        if fs_mtime_nanos(path)? != track.source_mtime {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Read one track's tags and assign its identifiers if absent or stale.
fn read_track_tags(config: &Config, path: &Path, release_id: &str) -> Result<AudioTags> {
    let mut tags = AudioTags::from_file(path)?;
    let mut dirty = false;
    if tags.release_id.as_deref() != Some(release_id) {
        tags.release_id = Some(release_id.to_string());
        dirty = true;
    }
    if tags.id.as_deref().unwrap_or("").is_empty() {
        tags.id = Some(Uuid::now_v7().to_string());
        dirty = true;
    }
    if dirty {
        log::debug!("Assigning identifiers to {}", path.display());
        tags.flush(config)?;
    }
    Ok(tags)
}

/// Annotate an artist mapping with the configured aliases: for every credited name that is an
/// alias, its primary artist(s) are appended with `alias = true`.
#[must_use]
pub fn apply_artist_aliases(config: &Config, mapping: &ArtistMapping) -> ArtistMapping {
    let mut result = mapping.clone();
    for role in ArtistRole::ALL {
        let list = result.role_mut(role);
        let mut extended = list.clone();
        for artist in list.iter() {
            if let Some(parents) = config.artist_aliases_parents_map.get(&artist.name) {
                for parent in parents {
                    let entry = Artist::with_alias(parent.clone(), true);
                    if !extended.contains(&entry) {
                        extended.push(entry);
                    }
                }
            }
        }
        *list = extended;
    }
    result
}

/// Derive the release row from the sidecar and the (release-level) tags of its tracks.
fn build_cached_release(
    config: &Config,
    snapshot: &ReleaseDirSnapshot,
    datafile: &crate::datafile::StoredDataFile,
    tags_by_path: &BTreeMap<PathBuf, AudioTags>,
) -> Result<CachedRelease> {
    let first = tags_by_path.values().next().expect("release has at least one track");
    let disctotal = u32::try_from(
        tags_by_path
            .values()
            .map(|t| t.discnumber.clone().unwrap_or_else(|| "1".to_string()))
            .collect::<HashSet<_>>()
            .len(),
    )
    .unwrap_or(1);

    let releaseartists = apply_artist_aliases(config, &first.releaseartists);
    let release = CachedRelease {
        id: snapshot.release_id.clone(),
        source_path: snapshot.datafile_path.parent().unwrap_or(Path::new("")).to_path_buf(),
        cover_image_path: snapshot.cover_image_path.clone(),
        added_at: datafile.added_at.clone(),
        datafile_mtime: snapshot.datafile_mtime,
        releasetitle: first.releasetitle.clone(),
        releasetype: first.releasetype.clone(),
        releasedate: first.releasedate,
        originaldate: first.originaldate,
        compositiondate: first.compositiondate,
        catalognumber: first.catalognumber.clone(),
        edition: first.edition.clone(),
        disctotal,
        new: datafile.new,
        genres: first.genre.clone(),
        secondary_genres: first.secondarygenre.clone(),
        descriptors: first.descriptor.clone(),
        labels: first.label.clone(),
        releaseartists,
        metahash: release_metahash(datafile, tags_by_path),
    };
    Ok(release)
}

/// The stable digest that short-circuits the refresh path: the sidecar state plus every track's
/// canonical tag fields, in sorted path order.
fn release_metahash(
    datafile: &crate::datafile::StoredDataFile,
    tags_by_path: &BTreeMap<PathBuf, AudioTags>,
) -> String {
    let tracks: Vec<&AudioTags> = tags_by_path.values().collect();
    crate::common::sha256_digest(&(&datafile.added_at, datafile.new, tracks))
}

/// Derive the track rows, computing the per-disc track totals.
fn build_cached_tracks(
    config: &Config,
    release: &CachedRelease,
    tags_by_path: &BTreeMap<PathBuf, AudioTags>,
) -> Result<Vec<CachedTrack>> {
    let mut per_disc_counts: HashMap<String, u32> = HashMap::new();
    for tags in tags_by_path.values() {
        let disc = tags.discnumber.clone().unwrap_or_else(|| "1".to_string());
        *per_disc_counts.entry(disc).or_insert(0) += 1;
    }

    let mut tracks = Vec::new();
    for (path, tags) in tags_by_path {
        let discnumber = tags.discnumber.clone().unwrap_or_else(|| "1".to_string());
        let tracktotal = per_disc_counts[&discnumber];
        tracks.push(CachedTrack {
            id: tags.id.clone().expect("track id assigned during read"),
            source_path: path.clone(),
            source_mtime: fs_mtime_nanos(path)?,
            tracktitle: tags.tracktitle.clone(),
            release_id: release.id.clone(),
            tracknumber: tags.tracknumber.clone().unwrap_or_else(|| "1".to_string()),
            tracktotal,
            discnumber,
            duration_seconds: tags.duration_sec,
            trackartists: apply_artist_aliases(config, &tags.trackartists),
            metahash: crate::common::sha256_digest(&tags),
        });
    }
    Ok(tracks)
}

/// Fetch the cached release and track rows for a release id.
fn fetch_cached_release(
    conn: &Connection,
    release_id: &str,
) -> Result<Option<(CachedRelease, Vec<CachedTrack>)>> {
    use rusqlite::OptionalExtension;
    let release = conn
        .query_row("SELECT * FROM releases_view WHERE id = ?1", [release_id], |row| {
            super::cached_release_from_view(row)
        })
        .optional()?;
    let Some(release) = release else {
        return Ok(None);
    };
    let mut stmt = conn.prepare("SELECT * FROM tracks_view WHERE release_id = ?1")?;
    let tracks = stmt
        .query_map([release_id], |row| super::cached_track_from_view(row))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(Some((release, tracks)))
}

/// Refresh only the recorded mtimes of a release whose content hash is unchanged.
fn update_recorded_mtimes(
    conn: &Connection,
    release: &CachedRelease,
    tracks: &[CachedTrack],
) -> Result<()> {
    let _n = conn.execute(
        "UPDATE releases SET datafile_mtime = ?1, new = ?2, added_at = ?3 WHERE id = ?4",
        rusqlite::params![release.datafile_mtime, release.new, release.added_at, release.id],
    )?;
    for track in tracks {
        let _n = conn.execute(
            "UPDATE tracks SET source_mtime = ?1 WHERE id = ?2",
            rusqlite::params![track.source_mtime, track.id],
        )?;
    }
    Ok(())
}

/// Write all rows of one release in a single transaction: the release row, its junction rows,
/// its track rows and the full-text index rows.
fn write_release_rows(
    conn: &Connection,
    release: &CachedRelease,
    tracks: &[CachedTrack],
) -> Result<()> {
    conn.execute_batch("BEGIN IMMEDIATE")?;
    let result = write_release_rows_inner(conn, release, tracks);
    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT")?;
            Ok(())
        }
        Err(err) => {
            let _rollback = conn.execute_batch("ROLLBACK");
            Err(err)
        }
    }
}

/// The body of [`write_release_rows`], inside the transaction.
fn write_release_rows_inner(
    conn: &Connection,
    release: &CachedRelease,
    tracks: &[CachedTrack],
) -> Result<()> {
    let _n = conn.execute(
        "INSERT INTO releases (
            id, source_path, cover_image_path, added_at, datafile_mtime, title, releasetype,
            releasedate, originaldate, compositiondate, catalognumber, edition, disctotal, new,
            metahash
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        ON CONFLICT (id) DO UPDATE SET
            source_path = excluded.source_path,
            cover_image_path = excluded.cover_image_path,
            added_at = excluded.added_at,
            datafile_mtime = excluded.datafile_mtime,
            title = excluded.title,
            releasetype = excluded.releasetype,
            releasedate = excluded.releasedate,
            originaldate = excluded.originaldate,
            compositiondate = excluded.compositiondate,
            catalognumber = excluded.catalognumber,
            edition = excluded.edition,
            disctotal = excluded.disctotal,
            new = excluded.new,
            metahash = excluded.metahash",
        rusqlite::params![
            release.id,
            release.source_path.to_string_lossy(),
            release.cover_image_path.as_ref().map(|p| p.to_string_lossy().into_owned()),
            release.added_at,
            release.datafile_mtime,
            release.releasetitle,
            release.releasetype,
            release.releasedate.map(|d| d.to_string()),
            release.originaldate.map(|d| d.to_string()),
            release.compositiondate.map(|d| d.to_string()),
            release.catalognumber,
            release.edition,
            release.disctotal,
            release.new,
            release.metahash,
        ],
    )?;

    // Junction rows are wholesale-replaced; `position` restarts at 1.
    for (table, column, values) in [
        ("releases_genres", "genre", &release.genres),
        ("releases_secondary_genres", "genre", &release.secondary_genres),
        ("releases_descriptors", "descriptor", &release.descriptors),
        ("releases_labels", "label", &release.labels),
    ] {
        let _n = conn.execute(
            &format!("DELETE FROM {table} WHERE release_id = ?1"),
            [&release.id],
        )?;
        for (position, value) in values.iter().enumerate() {
            let _n = conn.execute(
                &format!(
                    "INSERT INTO {table} (release_id, {column}, position) VALUES (?1, ?2, ?3)"
                ),
                rusqlite::params![release.id, value, position + 1],
            )?;
        }
    }
    let _n = conn.execute("DELETE FROM releases_artists WHERE release_id = ?1", [&release.id])?;
    insert_artist_rows(conn, "releases_artists", "release_id", &release.id, &release.releaseartists)?;

    // Evict tracks whose file disappeared, then upsert the live ones.
    let live_paths: Vec<String> =
        tracks.iter().map(|t| t.source_path.to_string_lossy().into_owned()).collect();
    delete_stale_tracks(conn, &release.id, &live_paths)?;
    for track in tracks {
        let _n = conn.execute(
            "INSERT INTO tracks (
                id, source_path, source_mtime, title, release_id, tracknumber, tracktotal,
                discnumber, duration_seconds, metahash
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT (id) DO UPDATE SET
                source_path = excluded.source_path,
                source_mtime = excluded.source_mtime,
                title = excluded.title,
                release_id = excluded.release_id,
                tracknumber = excluded.tracknumber,
                tracktotal = excluded.tracktotal,
                discnumber = excluded.discnumber,
                duration_seconds = excluded.duration_seconds,
                metahash = excluded.metahash",
            rusqlite::params![
                track.id,
                track.source_path.to_string_lossy(),
                track.source_mtime,
                track.tracktitle,
                track.release_id,
                track.tracknumber,
                track.tracktotal,
                track.discnumber,
                track.duration_seconds,
                track.metahash,
            ],
        )?;
        let _n = conn.execute("DELETE FROM tracks_artists WHERE track_id = ?1", [&track.id])?;
        insert_artist_rows(conn, "tracks_artists", "track_id", &track.id, &track.trackartists)?;
        write_fts_row(conn, release, track)?;
    }
    Ok(())
}

/// Insert the artist junction rows for one mapping, positions dense from 1 in role order.
fn insert_artist_rows(
    conn: &Connection,
    table: &str,
    id_column: &str,
    id: &str,
    mapping: &ArtistMapping,
) -> Result<()> {
    let mut position = 0;
    for (role, artists) in mapping.items() {
        for artist in artists {
            position += 1;
            let _n = conn.execute(
                &format!(
                    "INSERT INTO {table} ({id_column}, artist, role, alias, position)
                     VALUES (?1, ?2, ?3, ?4, ?5)"
                ),
                rusqlite::params![id, artist.name, role.as_str(), artist.alias, position],
            )?;
        }
    }
    Ok(())
}

/// Delete track rows of this release whose file is gone, together with their FTS rows.
fn delete_stale_tracks(conn: &Connection, release_id: &str, live_paths: &[String]) -> Result<()> {
    let mut stmt =
        conn.prepare("SELECT rowid, id, source_path FROM tracks WHERE release_id = ?1")?;
    let rows: Vec<(i64, String, String)> = stmt
        .query_map([release_id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for (rowid, track_id, source_path) in rows {
        if live_paths.contains(&source_path) {
            continue;
        }
        let _n = conn.execute("DELETE FROM rules_engine_fts WHERE rowid = ?1", [rowid])?;
        let _n = conn.execute("DELETE FROM tracks WHERE id = ?1", [&track_id])?;
    }
    Ok(())
}

/// Rebuild the full-text index row of one track.
fn write_fts_row(conn: &Connection, release: &CachedRelease, track: &CachedTrack) -> Result<()> {
    let rowid: i64 =
        conn.query_row("SELECT rowid FROM tracks WHERE id = ?1", [&track.id], |row| row.get(0))?;
    let _n = conn.execute("DELETE FROM rules_engine_fts WHERE rowid = ?1", [rowid])?;

    let tokenize_list =
        |values: &[String]| values.iter().map(|v| process_string_for_fts(v)).collect::<Vec<_>>().join(" ");
    let artist_names = |mapping: &ArtistMapping| {
        mapping
            .all()
            .iter()
            .map(|a| process_string_for_fts(&a.name))
            .collect::<Vec<_>>()
            .join(" ")
    };
    let date_str = |d: Option<PartialDate>| d.map(|d| d.to_string()).unwrap_or_default();

    let _n = conn.execute(
        "INSERT INTO rules_engine_fts (
            rowid, tracktitle, tracknumber, discnumber, releasetitle, releasedate, originaldate,
            compositiondate, catalognumber, edition, releasetype, genre, secondarygenre,
            descriptor, label, releaseartist, trackartist, new
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        rusqlite::params![
            rowid,
            process_string_for_fts(track.tracktitle.as_deref().unwrap_or("")),
            process_string_for_fts(&track.tracknumber),
            process_string_for_fts(&track.discnumber),
            process_string_for_fts(release.releasetitle.as_deref().unwrap_or("")),
            process_string_for_fts(&date_str(release.releasedate)),
            process_string_for_fts(&date_str(release.originaldate)),
            process_string_for_fts(&date_str(release.compositiondate)),
            process_string_for_fts(release.catalognumber.as_deref().unwrap_or("")),
            process_string_for_fts(release.edition.as_deref().unwrap_or("")),
            process_string_for_fts(&release.releasetype),
            tokenize_list(&release.genres),
            tokenize_list(&release.secondary_genres),
            tokenize_list(&release.descriptors),
            tokenize_list(&release.labels),
            artist_names(&release.releaseartists),
            artist_names(&track.trackartists),
            process_string_for_fts(if release.new { "true" } else { "false" }),
        ],
    )?;
    Ok(())
}

/// Delete cached releases whose directory no longer exists under the source root. FK cascades
/// clean the dependent rows; the FTS index is swept afterwards.
///
/// # Errors
///
/// Returns an error on database failures.
pub fn update_cache_evict_nonexistent_releases(config: &Config) -> Result<()> {
    log::debug!("Evicting cached releases that are not on disk");
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(&config.music_source_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path().to_string_lossy().into_owned());
        }
    }
    let conn = connect(config)?;
    let placeholders = vec!["?"; dirs.len()].join(",");
    let sql = if dirs.is_empty() {
        "DELETE FROM releases RETURNING source_path".to_string()
    } else {
        format!("DELETE FROM releases WHERE source_path NOT IN ({placeholders}) RETURNING source_path")
    };
    let mut stmt = conn.prepare(&sql)?;
    let evicted: Vec<String> = stmt
        .query_map(rusqlite::params_from_iter(dirs.iter()), |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for source_path in &evicted {
        log::info!("Evicted release {source_path} from cache");
    }
    if !evicted.is_empty() {
        let _n = conn.execute(
            "DELETE FROM rules_engine_fts WHERE rowid NOT IN (SELECT rowid FROM tracks)",
            [],
        )?;
    }
    Ok(())
}

/// Mark a stale description as missing, exactly once.
fn missing_description(description: &str) -> String {
    if description.ends_with(" [missing]") {
        description.to_string()
    } else {
        format!("{description} [missing]")
    }
}

/// One entry of a collection TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CollectionEntry {
    /// The referenced release/track UUID.
    uuid: String,
    /// Derived display text, rewritten on every refresh; untrusted on read.
    #[serde(default)]
    description_meta: String,
}

/// The shape of a collage TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CollageFile {
    /// Ordered release references.
    #[serde(default)]
    releases: Vec<CollectionEntry>,
}

/// The shape of a playlist TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PlaylistFile {
    /// Ordered track references.
    #[serde(default)]
    tracks: Vec<CollectionEntry>,
}

/// Refresh the cache rows of the given collages (all when [`None`]), rewriting stale
/// `description_meta` texts in the TOML files.
///
/// # Errors
///
/// Returns an error on database failures; unparseable collage files are logged and skipped.
pub fn update_cache_for_collages(
    config: &Config,
    collage_names: Option<Vec<String>>,
    force: bool,
) -> Result<()> {
    let dir = config.music_source_dir.join("!collages");
    let conn = connect(config)?;
    for (name, path) in collection_files(&dir, collage_names.as_deref())? {
        let source_mtime = fs_mtime_nanos(&path)?;
        let cached_mtime: Option<i64> = {
            use rusqlite::OptionalExtension;
            conn.query_row("SELECT source_mtime FROM collages WHERE name = ?1", [&name], |row| {
                row.get(0)
            })
            .optional()?
        };
        if !force && cached_mtime == Some(source_mtime) {
            continue;
        }
        let lock_name = collage_lock_name(&name);
        lock(&conn, &lock_name, 60.0)?;
        let result = refresh_collage(config, &conn, &name, &path);
        unlock(&conn, &lock_name)?;
        if let Err(err) = result {
            log::error!("Failed to refresh collage {name}: {err}");
        }
    }
    Ok(())
}

/// Refresh one collage's rows and description texts.
fn refresh_collage(config: &Config, conn: &Connection, name: &str, path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)?;
    let mut data: CollageFile = match toml::from_str(&text) {
        Ok(data) => data,
        Err(err) => {
            log::warn!("Failed to parse collage {name}: {err}");
            return Ok(());
        }
    };

    let mut changed = false;
    let mut rows: Vec<(String, bool)> = Vec::new();
    for entry in &mut data.releases {
        let (description, missing) = match crate::cache::get_release(config, &entry.uuid)? {
            Some(release) => (release_logtext(&release), false),
            None => (missing_description(&entry.description_meta), true),
        };
        if entry.description_meta != description {
            entry.description_meta = description;
            changed = true;
        }
        rows.push((entry.uuid.clone(), missing));
    }
    if changed {
        std::fs::write(path, toml::to_string_pretty(&data)?)?;
    }
    let source_mtime = fs_mtime_nanos(path)?;

    conn.execute_batch("BEGIN IMMEDIATE")?;
    let result = (|| -> Result<()> {
        let _n = conn.execute(
            "INSERT INTO collages (name, source_mtime) VALUES (?1, ?2)
             ON CONFLICT (name) DO UPDATE SET source_mtime = excluded.source_mtime",
            rusqlite::params![name, source_mtime],
        )?;
        let _n = conn.execute("DELETE FROM collages_releases WHERE collage_name = ?1", [name])?;
        for (position, (release_id, missing)) in rows.iter().enumerate() {
            let _n = conn.execute(
                "INSERT INTO collages_releases (collage_name, release_id, position, missing)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![name, release_id, position + 1, missing],
            )?;
        }
        Ok(())
    })();
    match result {
        Ok(()) => conn.execute_batch("COMMIT")?,
        Err(err) => {
            let _rollback = conn.execute_batch("ROLLBACK");
            return Err(err);
        }
    }
    log::debug!("Refreshed collage {name}");
    Ok(())
}

/// Delete cached collages whose TOML file no longer exists.
///
/// # Errors
///
/// Returns an error on database failures.
pub fn update_cache_evict_nonexistent_collages(config: &Config) -> Result<()> {
    evict_nonexistent_collections(config, "!collages", "collages")
}

/// Refresh the cache rows of the given playlists (all when [`None`]).
///
/// # Errors
///
/// Returns an error on database failures; unparseable playlist files are logged and skipped.
pub fn update_cache_for_playlists(
    config: &Config,
    playlist_names: Option<Vec<String>>,
    force: bool,
) -> Result<()> {
    let dir = config.music_source_dir.join("!playlists");
    let conn = connect(config)?;
    for (name, path) in collection_files(&dir, playlist_names.as_deref())? {
        let source_mtime = fs_mtime_nanos(&path)?;
        let cached_mtime: Option<i64> = {
            use rusqlite::OptionalExtension;
            conn.query_row("SELECT source_mtime FROM playlists WHERE name = ?1", [&name], |row| {
                row.get(0)
            })
            .optional()?
        };
        if !force && cached_mtime == Some(source_mtime) {
            continue;
        }
        let lock_name = playlist_lock_name(&name);
        lock(&conn, &lock_name, 60.0)?;
        let result = refresh_playlist(config, &conn, &name, &path);
        unlock(&conn, &lock_name)?;
        if let Err(err) = result {
            log::error!("Failed to refresh playlist {name}: {err}");
        }
    }
    Ok(())
}

/// Refresh one playlist's rows, description texts and cover path.
fn refresh_playlist(config: &Config, conn: &Connection, name: &str, path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)?;
    let mut data: PlaylistFile = match toml::from_str(&text) {
        Ok(data) => data,
        Err(err) => {
            log::warn!("Failed to parse playlist {name}: {err}");
            return Ok(());
        }
    };

    let mut changed = false;
    let mut rows: Vec<(String, bool)> = Vec::new();
    for entry in &mut data.tracks {
        let (description, missing) = match crate::cache::get_track(config, &entry.uuid)? {
            Some(track) => (track_logtext(&track), false),
            None => (missing_description(&entry.description_meta), true),
        };
        if entry.description_meta != description {
            entry.description_meta = description;
            changed = true;
        }
        rows.push((entry.uuid.clone(), missing));
    }
    if changed {
        std::fs::write(path, toml::to_string_pretty(&data)?)?;
    }
    let source_mtime = fs_mtime_nanos(path)?;

    // An adjacent file with the playlist's stem and a valid art extension is its cover.
    let cover_path = config.valid_art_exts.iter().find_map(|ext| {
        let candidate = path.with_extension(ext);
        candidate.is_file().then_some(candidate)
    });

    conn.execute_batch("BEGIN IMMEDIATE")?;
    let result = (|| -> Result<()> {
        let _n = conn.execute(
            "INSERT INTO playlists (name, source_mtime, cover_path) VALUES (?1, ?2, ?3)
             ON CONFLICT (name) DO UPDATE SET
                source_mtime = excluded.source_mtime,
                cover_path = excluded.cover_path",
            rusqlite::params![
                name,
                source_mtime,
                cover_path.as_ref().map(|p| p.to_string_lossy().into_owned())
            ],
        )?;
        let _n = conn.execute("DELETE FROM playlists_tracks WHERE playlist_name = ?1", [name])?;
        for (position, (track_id, missing)) in rows.iter().enumerate() {
            let _n = conn.execute(
                "INSERT INTO playlists_tracks (playlist_name, track_id, position, missing)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![name, track_id, position + 1, missing],
            )?;
        }
        Ok(())
    })();
    match result {
        Ok(()) => conn.execute_batch("COMMIT")?,
        Err(err) => {
            let _rollback = conn.execute_batch("ROLLBACK");
            return Err(err);
        }
    }
    log::debug!("Refreshed playlist {name}");
    Ok(())
}

/// Delete cached playlists whose TOML file no longer exists.
///
/// # Errors
///
/// Returns an error on database failures.
pub fn update_cache_evict_nonexistent_playlists(config: &Config) -> Result<()> {
    evict_nonexistent_collections(config, "!playlists", "playlists")
}

/// Shared eviction for the two collection tables.
fn evict_nonexistent_collections(config: &Config, dirname: &str, table: &str) -> Result<()> {
    let dir = config.music_source_dir.join(dirname);
    let names: Vec<String> = collection_files(&dir, None)?.into_iter().map(|(name, _)| name).collect();
    let conn = connect(config)?;
    let placeholders = vec!["?"; names.len()].join(",");
    let sql = if names.is_empty() {
        format!("DELETE FROM {table} RETURNING name")
    } else {
        format!("DELETE FROM {table} WHERE name NOT IN ({placeholders}) RETURNING name")
    };
    let mut stmt = conn.prepare(&sql)?;
    let evicted: Vec<String> = stmt
        .query_map(rusqlite::params_from_iter(names.iter()), |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for name in evicted {
        log::info!("Evicted {} {name} from cache", table.trim_end_matches('s'));
    }
    Ok(())
}

/// Enumerate the TOML files of a collection directory, optionally filtered by name.
fn collection_files(dir: &Path, names: Option<&[String]>) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    if !dir.is_dir() {
        return Ok(files);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if names.is_some_and(|ns| !ns.iter().any(|n| n == stem)) {
            continue;
        }
        files.push((stem.to_string(), path));
    }
    files.sort();
    Ok(files)
}
