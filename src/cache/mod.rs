// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! The metadata cache.
//!
//! A SQLite mirror of the on-disk library. The filesystem is authoritative: every row in here is
//! derived from audio tags, sidecar datafiles and collection TOML files, and the whole database
//! can be discarded and rebuilt at any time. The schema is versioned by content hash; a schema
//! change invalidates the database wholesale instead of migrating it.
//!
//! This module owns the connection bootstrap, the named-lock table, the full-text index helpers
//! and the typed read surface. The refresh algorithm lives in [`update`].

pub mod update;

use crate::common::{sha256_digest, Artist, ArtistMapping, ArtistRole, PartialDate};
use crate::error::{Error, ExpectedError, Result};
use crate::Config;
use rusqlite::{Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Delimiter between array elements in the aggregated view columns.
pub const SQL_ARRAY_DELIMITER: &str = " ¬ ";

/// The separator inserted between Unicode scalars for the substring-capable full-text index.
pub const FTS_SEPARATOR: char = '¬';

/// Name of the lock serializing full library scans.
pub const CACHE_UPDATE_LOCK: &str = "cache_update";

/// The embedded schema. Any edit to it invalidates existing cache databases.
const SCHEMA: &str = include_str!("schema.sql");

/// Lock name for a release.
#[must_use]
pub fn release_lock_name(release_id: &str) -> String {
    format!("release:{release_id}")
}

/// Lock name for a collage.
#[must_use]
pub fn collage_lock_name(collage_name: &str) -> String {
    format!("collage:{collage_name}")
}

/// Lock name for a playlist.
#[must_use]
pub fn playlist_lock_name(playlist_name: &str) -> String {
    format!("playlist:{playlist_name}")
}

/// Open a connection to the cache database.
///
/// Each worker thread opens its own connection; connections are never shared across threads.
///
/// # Errors
///
/// Returns an error if the database cannot be opened.
pub fn connect(config: &Config) -> Result<Connection> {
    let conn = Connection::open(config.cache_database_path())?;
    // journal_mode returns the resulting mode as a row, so it cannot go through pragma_update.
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(Duration::from_secs(15))?;
    Ok(conn)
}

/// Create the cache database if missing, or discard and recreate it if its schema hash does not
/// match the embedded schema.
///
/// # Errors
///
/// Schema errors are fatal; any failure here aborts the caller.
pub fn maybe_invalidate_cache_database(config: &Config) -> Result<()> {
    let schema_hash = sha256_digest(&SCHEMA);
    let db_path = config.cache_database_path();

    if db_path.exists() {
        let conn = connect(config)?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT value FROM _schema_hash",
                [],
                |row| row.get(0),
            )
            .optional()
            .unwrap_or(None);
        if existing.as_deref() == Some(schema_hash.as_str()) {
            return Ok(());
        }
        drop(conn);
        log::info!("Schema changed, discarding cache database at {}", db_path.display());
        std::fs::remove_file(&db_path)?;
        // WAL sidecars would otherwise be replayed into the fresh database.
        for suffix in ["-wal", "-shm"] {
            let mut os_string = db_path.clone().into_os_string();
            os_string.push(suffix);
            let _ = std::fs::remove_file(PathBuf::from(os_string));
        }
    }

    std::fs::create_dir_all(&config.cache_dir)?;
    let conn = connect(config)?;
    conn.execute_batch(SCHEMA)?;
    conn.execute_batch("CREATE TABLE _schema_hash (value TEXT PRIMARY KEY)")?;
    conn.execute("INSERT INTO _schema_hash (value) VALUES (?1)", [&schema_hash])?;
    Ok(())
}

/// Seconds since the Unix epoch, as a float.
fn now_unix() -> Result<f64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs_f64())
}

/// Acquire the named lock, spinning with a short backoff until `timeout_sec` elapses.
///
/// Locks are advisory and expire on their own, so a crashed holder cannot wedge the system.
///
/// # Errors
///
/// Returns [`ExpectedError::LockTimeout`] when the lock cannot be acquired in time.
pub fn lock(conn: &Connection, name: &str, timeout_sec: f64) -> Result<()> {
    let deadline = now_unix()? + timeout_sec;
    loop {
        let now = now_unix()?;
        let acquired = conn.execute(
            "INSERT INTO locks (name, valid_until) VALUES (?1, ?2)
             ON CONFLICT (name) DO UPDATE SET valid_until = excluded.valid_until
             WHERE locks.valid_until < ?3",
            rusqlite::params![name, now + timeout_sec, now],
        )?;
        if acquired > 0 {
            log::debug!("Acquired lock {name}");
            return Ok(());
        }
        if now >= deadline {
            return Err(ExpectedError::LockTimeout {
                name: name.to_string(),
            }
            .into());
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Release the named lock. Releasing a lock that is not held is a no-op.
///
/// # Errors
///
/// Returns an error if the database cannot be written.
pub fn unlock(conn: &Connection, name: &str) -> Result<()> {
    let _n = conn.execute("DELETE FROM locks WHERE name = ?1", [name])?;
    log::debug!("Released lock {name}");
    Ok(())
}

/// Tokenize a string for the full-text index by inserting [`FTS_SEPARATOR`] between every
/// Unicode scalar.
///
/// The separator is assumed absent from source metadata; if it does occur it is stripped first
/// (with a warning), keeping the index well-formed at the cost of that one character.
#[must_use]
pub fn process_string_for_fts(value: &str) -> String {
    if value.contains(FTS_SEPARATOR) {
        log::warn!("Stripping FTS separator character from metadata value {value:?}");
    }
    let mut out = String::with_capacity(value.len() * 2);
    for c in value.chars().filter(|&c| c != FTS_SEPARATOR) {
        if !out.is_empty() {
            out.push(FTS_SEPARATOR);
        }
        out.push(c);
    }
    out
}

/// Build an FTS5 phrase literal matching the needle as a substring of a tokenized column.
#[must_use]
pub fn fts_phrase(needle: &str) -> String {
    let tokenized = process_string_for_fts(needle);
    format!("\"{}\"", tokenized.replace('"', "\"\""))
}

/// A cached release with its junction data materialized.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRelease {
    /// The release UUID.
    pub id: String,
    /// The release directory.
    pub source_path: PathBuf,
    /// The discovered cover art file, if any.
    pub cover_image_path: Option<PathBuf>,
    /// When the release was added to the library (verbatim sidecar value).
    pub added_at: String,
    /// Sidecar mtime (nanoseconds) at the last refresh.
    pub datafile_mtime: i64,
    /// Release title.
    pub releasetitle: Option<String>,
    /// Release type, from the closed vocabulary.
    pub releasetype: String,
    /// Release date of this edition.
    pub releasedate: Option<PartialDate>,
    /// Release date of the earliest edition.
    pub originaldate: Option<PartialDate>,
    /// Composition date.
    pub compositiondate: Option<PartialDate>,
    /// Catalog number.
    pub catalognumber: Option<String>,
    /// Edition name.
    pub edition: Option<String>,
    /// Derived number of discs.
    pub disctotal: u32,
    /// The sidecar "new" flag.
    pub new: bool,
    /// Genres, in tag order.
    pub genres: Vec<String>,
    /// Secondary genres, in tag order.
    pub secondary_genres: Vec<String>,
    /// Descriptors, in tag order.
    pub descriptors: Vec<String>,
    /// Labels, in tag order.
    pub labels: Vec<String>,
    /// Release artists by role.
    pub releaseartists: ArtistMapping,
    /// Digest of the release's normalized tag content.
    pub metahash: String,
}

/// A cached track.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedTrack {
    /// The track UUID.
    pub id: String,
    /// The audio file.
    pub source_path: PathBuf,
    /// File mtime (nanoseconds) at the last refresh.
    pub source_mtime: i64,
    /// Track title.
    pub tracktitle: Option<String>,
    /// The owning release.
    pub release_id: String,
    /// Track number, as tagged.
    pub tracknumber: String,
    /// Derived number of tracks on this track's disc.
    pub tracktotal: u32,
    /// Disc number, as tagged.
    pub discnumber: String,
    /// Duration in seconds.
    pub duration_seconds: u32,
    /// Track artists by role.
    pub trackartists: ArtistMapping,
    /// Digest of the track's normalized tag content.
    pub metahash: String,
}

/// A cached collage.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedCollage {
    /// The collage name (the TOML file stem).
    pub name: String,
    /// TOML file mtime (nanoseconds) at the last refresh.
    pub source_mtime: i64,
    /// Ordered release references; `true` marks entries whose release is currently missing.
    pub releases: Vec<(String, bool)>,
}

/// A cached playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPlaylist {
    /// The playlist name (the TOML file stem).
    pub name: String,
    /// TOML file mtime (nanoseconds) at the last refresh.
    pub source_mtime: i64,
    /// The discovered cover art file, if any.
    pub cover_path: Option<PathBuf>,
    /// Ordered track references; `true` marks entries whose track is currently missing.
    pub tracks: Vec<(String, bool)>,
}

/// Split an aggregated view column back into its elements.
fn split_sql_array(value: &str) -> Vec<String> {
    if value.is_empty() {
        Vec::new()
    } else {
        value.split(SQL_ARRAY_DELIMITER).map(String::from).collect()
    }
}

/// Rebuild an [`ArtistMapping`] from the three parallel aggregated artist columns.
fn artist_mapping_from_columns(names: &str, roles: &str, aliases: &str) -> ArtistMapping {
    let names = split_sql_array(names);
    let roles = split_sql_array(roles);
    let aliases = split_sql_array(aliases);
    let mut mapping = ArtistMapping::new();
    for ((name, role), alias) in names.into_iter().zip(roles).zip(aliases) {
        let Some(role) = ArtistRole::from_name(&role) else {
            log::warn!("Ignoring cached artist with unknown role {role:?}");
            continue;
        };
        mapping
            .role_mut(role)
            .push(Artist::with_alias(name, alias == "1"));
    }
    mapping
}

/// Build a [`CachedRelease`] from a `releases_view` row.
fn cached_release_from_view(row: &Row<'_>) -> rusqlite::Result<CachedRelease> {
    Ok(CachedRelease {
        id: row.get("id")?,
        source_path: PathBuf::from(row.get::<_, String>("source_path")?),
        cover_image_path: row.get::<_, Option<String>>("cover_image_path")?.map(PathBuf::from),
        added_at: row.get("added_at")?,
        datafile_mtime: row.get("datafile_mtime")?,
        releasetitle: row.get("title")?,
        releasetype: row.get("releasetype")?,
        releasedate: PartialDate::parse(row.get::<_, Option<String>>("releasedate")?.as_deref()),
        originaldate: PartialDate::parse(row.get::<_, Option<String>>("originaldate")?.as_deref()),
        compositiondate: PartialDate::parse(
            row.get::<_, Option<String>>("compositiondate")?.as_deref(),
        ),
        catalognumber: row.get("catalognumber")?,
        edition: row.get("edition")?,
        disctotal: row.get("disctotal")?,
        new: row.get("new")?,
        genres: split_sql_array(&row.get::<_, String>("genres")?),
        secondary_genres: split_sql_array(&row.get::<_, String>("secondary_genres")?),
        descriptors: split_sql_array(&row.get::<_, String>("descriptors")?),
        labels: split_sql_array(&row.get::<_, String>("labels")?),
        releaseartists: artist_mapping_from_columns(
            &row.get::<_, String>("artist_names")?,
            &row.get::<_, String>("artist_roles")?,
            &row.get::<_, String>("artist_aliases")?,
        ),
        metahash: row.get("metahash")?,
    })
}

/// Build a [`CachedTrack`] from a `tracks_view` row.
fn cached_track_from_view(row: &Row<'_>) -> rusqlite::Result<CachedTrack> {
    Ok(CachedTrack {
        id: row.get("id")?,
        source_path: PathBuf::from(row.get::<_, String>("source_path")?),
        source_mtime: row.get("source_mtime")?,
        tracktitle: row.get("title")?,
        release_id: row.get("release_id")?,
        tracknumber: row.get("tracknumber")?,
        tracktotal: row.get("tracktotal")?,
        discnumber: row.get("discnumber")?,
        duration_seconds: row.get("duration_seconds")?,
        trackartists: artist_mapping_from_columns(
            &row.get::<_, String>("artist_names")?,
            &row.get::<_, String>("artist_roles")?,
            &row.get::<_, String>("artist_aliases")?,
        ),
        metahash: row.get("metahash")?,
    })
}

/// Fetch a release by id.
///
/// # Errors
///
/// Returns an error if the database cannot be read.
pub fn get_release(config: &Config, release_id: &str) -> Result<Option<CachedRelease>> {
    let conn = connect(config)?;
    let release = conn
        .query_row(
            "SELECT * FROM releases_view WHERE id = ?1",
            [release_id],
            |row| cached_release_from_view(row),
        )
        .optional()?;
    Ok(release)
}

/// Fetch a release by id, failing with an expected error when it does not exist.
///
/// # Errors
///
/// Returns [`ExpectedError::ReleaseDoesNotExist`] for unknown ids.
pub fn get_release_or_err(config: &Config, release_id: &str) -> Result<CachedRelease> {
    get_release(config, release_id)?.ok_or_else(|| {
        Error::from(ExpectedError::ReleaseDoesNotExist {
            id: release_id.to_string(),
        })
    })
}

/// List all releases, ordered by source path.
///
/// # Errors
///
/// Returns an error if the database cannot be read.
pub fn list_releases(config: &Config) -> Result<Vec<CachedRelease>> {
    let conn = connect(config)?;
    let mut stmt = conn.prepare("SELECT * FROM releases_view ORDER BY source_path")?;
    let releases = stmt
        .query_map([], |row| cached_release_from_view(row))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(releases)
}

/// Fetch a track by id.
///
/// # Errors
///
/// Returns an error if the database cannot be read.
pub fn get_track(config: &Config, track_id: &str) -> Result<Option<CachedTrack>> {
    let conn = connect(config)?;
    let track = conn
        .query_row(
            "SELECT * FROM tracks_view WHERE id = ?1",
            [track_id],
            |row| cached_track_from_view(row),
        )
        .optional()?;
    Ok(track)
}

/// Fetch a track by id, failing with an expected error when it does not exist.
///
/// # Errors
///
/// Returns [`ExpectedError::TrackDoesNotExist`] for unknown ids.
pub fn get_track_or_err(config: &Config, track_id: &str) -> Result<CachedTrack> {
    get_track(config, track_id)?.ok_or_else(|| {
        Error::from(ExpectedError::TrackDoesNotExist {
            id: track_id.to_string(),
        })
    })
}

/// Fetch the tracks of a release, in disc/track order.
///
/// # Errors
///
/// Returns an error if the database cannot be read.
pub fn get_tracks_of_release(config: &Config, release_id: &str) -> Result<Vec<CachedTrack>> {
    let conn = connect(config)?;
    let mut stmt = conn.prepare(
        "SELECT * FROM tracks_view WHERE release_id = ?1
         ORDER BY CAST(discnumber AS INTEGER), discnumber, CAST(tracknumber AS INTEGER), tracknumber",
    )?;
    let tracks = stmt
        .query_map([release_id], |row| cached_track_from_view(row))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tracks)
}

/// Fetch tracks by id. Unknown ids are silently absent from the result.
///
/// # Errors
///
/// Returns an error if the database cannot be read.
pub fn get_tracks(config: &Config, track_ids: &[String]) -> Result<Vec<CachedTrack>> {
    if track_ids.is_empty() {
        return Ok(Vec::new());
    }
    let conn = connect(config)?;
    let placeholders = vec!["?"; track_ids.len()].join(",");
    let sql = format!("SELECT * FROM tracks_view WHERE id IN ({placeholders})");
    let mut stmt = conn.prepare(&sql)?;
    let tracks = stmt
        .query_map(rusqlite::params_from_iter(track_ids.iter()), |row| {
            cached_track_from_view(row)
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tracks)
}

/// Fetch a collage by name.
///
/// # Errors
///
/// Returns an error if the database cannot be read.
pub fn get_collage(config: &Config, name: &str) -> Result<Option<CachedCollage>> {
    let conn = connect(config)?;
    let Some(source_mtime) = conn
        .query_row("SELECT source_mtime FROM collages WHERE name = ?1", [name], |row| {
            row.get::<_, i64>(0)
        })
        .optional()?
    else {
        return Ok(None);
    };
    let mut stmt = conn.prepare(
        "SELECT release_id, missing FROM collages_releases
         WHERE collage_name = ?1 ORDER BY position",
    )?;
    let releases = stmt
        .query_map([name], |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(Some(CachedCollage {
        name: name.to_string(),
        source_mtime,
        releases,
    }))
}

/// List all collage names.
///
/// # Errors
///
/// Returns an error if the database cannot be read.
pub fn list_collages(config: &Config) -> Result<Vec<String>> {
    let conn = connect(config)?;
    let mut stmt = conn.prepare("SELECT name FROM collages ORDER BY name")?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

/// Fetch a playlist by name.
///
/// # Errors
///
/// Returns an error if the database cannot be read.
pub fn get_playlist(config: &Config, name: &str) -> Result<Option<CachedPlaylist>> {
    let conn = connect(config)?;
    let Some((source_mtime, cover_path)) = conn
        .query_row(
            "SELECT source_mtime, cover_path FROM playlists WHERE name = ?1",
            [name],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?)),
        )
        .optional()?
    else {
        return Ok(None);
    };
    let mut stmt = conn.prepare(
        "SELECT track_id, missing FROM playlists_tracks
         WHERE playlist_name = ?1 ORDER BY position",
    )?;
    let tracks = stmt
        .query_map([name], |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(Some(CachedPlaylist {
        name: name.to_string(),
        source_mtime,
        cover_path: cover_path.map(PathBuf::from),
        tracks,
    }))
}

/// List all playlist names.
///
/// # Errors
///
/// Returns an error if the database cannot be read.
pub fn list_playlists(config: &Config) -> Result<Vec<String>> {
    let conn = connect(config)?;
    let mut stmt = conn.prepare("SELECT name FROM playlists ORDER BY name")?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

/// The display text of a release: `Artists - Title`.
#[must_use]
pub fn release_logtext(release: &CachedRelease) -> String {
    let artists: Vec<&str> = release
        .releaseartists
        .main
        .iter()
        .filter(|a| !a.alias)
        .map(|a| a.name.as_str())
        .collect();
    let artists = if artists.is_empty() {
        "Unknown Artists".to_string()
    } else {
        artists.join(", ")
    };
    let title = release.releasetitle.as_deref().unwrap_or("Unknown Release");
    format!("{artists} - {title}")
}

/// The display text of a track: `Artists - Title`.
#[must_use]
pub fn track_logtext(track: &CachedTrack) -> String {
    let artists: Vec<&str> = track
        .trackartists
        .main
        .iter()
        .filter(|a| !a.alias)
        .map(|a| a.name.as_str())
        .collect();
    let artists = if artists.is_empty() {
        "Unknown Artists".to_string()
    } else {
        artists.join(", ")
    };
    let title = track.tracktitle.as_deref().unwrap_or("Unknown Title");
    format!("{artists} - {title}")
}

/// The mtime of a path in integer nanoseconds since the Unix epoch.
///
/// # Errors
///
/// Returns an error if the file metadata cannot be read.
pub fn fs_mtime_nanos(path: &Path) -> Result<i64> {
    let mtime = std::fs::metadata(path)?.modified()?;
    let nanos = mtime.duration_since(UNIX_EPOCH)?.as_nanos();
    Ok(i64::try_from(nanos).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn test_schema_bootstrap_and_reuse() {
        let (_tmp, config) = testing::seeded_config();
        maybe_invalidate_cache_database(&config).unwrap();
        assert!(config.cache_database_path().exists());
        // A second bootstrap with the same schema keeps the database.
        let conn = connect(&config).unwrap();
        conn.execute(
            "INSERT INTO locks (name, valid_until) VALUES ('x', 1.0)",
            [],
        )
        .unwrap();
        drop(conn);
        maybe_invalidate_cache_database(&config).unwrap();
        let conn = connect(&config).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM locks", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_process_string_for_fts() {
        assert_eq!(process_string_for_fts("rock"), "r¬o¬c¬k");
        assert_eq!(process_string_for_fts(""), "");
        assert_eq!(process_string_for_fts("a"), "a");
        // An embedded separator is stripped rather than corrupting the index.
        assert_eq!(process_string_for_fts("a¬b"), "a¬b");
    }

    #[test]
    fn test_fts_phrase_escapes_quotes() {
        assert_eq!(fts_phrase("ab"), "\"a¬b\"");
        assert_eq!(fts_phrase("a\"b"), "\"a¬\"\"¬b\"");
    }

    #[test]
    fn test_locks_are_mutually_exclusive() {
        let (_tmp, config) = testing::seeded_config();
        maybe_invalidate_cache_database(&config).unwrap();
        let conn_a = connect(&config).unwrap();
        let conn_b = connect(&config).unwrap();

        lock(&conn_a, "release:test", 10.0).unwrap();
        let err = lock(&conn_b, "release:test", 0.2).unwrap_err();
        assert!(err.to_string().contains("Timed out"));

        unlock(&conn_a, "release:test").unwrap();
        lock(&conn_b, "release:test", 0.2).unwrap();
        unlock(&conn_b, "release:test").unwrap();
    }

    #[test]
    fn test_expired_lock_is_stolen() {
        let (_tmp, config) = testing::seeded_config();
        maybe_invalidate_cache_database(&config).unwrap();
        let conn = connect(&config).unwrap();
        // A lock whose valid_until has passed belongs to a crashed holder.
        conn.execute(
            "INSERT INTO locks (name, valid_until) VALUES ('stale', 1.0)",
            [],
        )
        .unwrap();
        lock(&conn, "stale", 0.5).unwrap();
        unlock(&conn, "stale").unwrap();
    }

    #[test]
    fn test_lock_stress_no_overlapping_critical_sections() {
        let (_tmp, config) = testing::seeded_config();
        maybe_invalidate_cache_database(&config).unwrap();
        let counter = std::sync::Arc::new(std::sync::atomic::AtomicI64::new(0));
        std::thread::scope(|scope| {
            for _ in 0..4 {
                let config = config.clone();
                let counter = std::sync::Arc::clone(&counter);
                let _handle = scope.spawn(move || {
                    let conn = connect(&config).unwrap();
                    for _ in 0..5 {
                        lock(&conn, "stress", 30.0).unwrap();
                        let inside =
                            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        assert_eq!(inside, 0, "two holders inside the critical section");
                        std::thread::sleep(std::time::Duration::from_millis(2));
                        let _left = counter.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                        unlock(&conn, "stress").unwrap();
                    }
                });
            }
        });
    }

    #[test]
    fn test_artist_mapping_from_columns() {
        let mapping = artist_mapping_from_columns(
            "Artist A ¬ Artist B ¬ Guest C",
            "main ¬ main ¬ guest",
            "0 ¬ 1 ¬ 0",
        );
        assert_eq!(
            mapping.main,
            vec![Artist::new("Artist A"), Artist::with_alias("Artist B", true)]
        );
        assert_eq!(mapping.guest, vec![Artist::new("Guest C")]);
    }
}
