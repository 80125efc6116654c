// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Test support: throwaway configurations and a seeded cache with fake test data.
//!
//! The seeded fixtures insert rows directly, so cache- and rules-level tests run without real
//! audio files on disk. The files referenced by the seeded rows exist but hold garbage bytes;
//! tests that exercise the codec itself stay within the pure layers instead.

use crate::cache::{connect, maybe_invalidate_cache_database, process_string_for_fts};
use crate::config::{Config, PathTemplateConfig};
use crate::error::Result;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// A configuration rooted at the given directory, with defaults everywhere else.
#[must_use]
pub fn config_for_dir(base: PathBuf) -> Config {
    Config {
        music_source_dir: base.join("source"),
        cache_dir: base.join("cache"),
        max_proc: 2,
        max_filename_bytes: 180,
        cover_art_stems: ["folder", "cover", "art", "front"].map(String::from).to_vec(),
        valid_art_exts: ["jpg", "jpeg", "png"].map(String::from).to_vec(),
        write_parent_genres: false,
        rename_source_files: false,
        ignore_release_directories: vec![],
        artist_aliases_map: HashMap::new(),
        artist_aliases_parents_map: HashMap::new(),
        stored_metadata_rules: vec![],
        path_templates: PathTemplateConfig::default(),
    }
}

/// A temporary directory with `source/` and `cache/` plus a matching configuration.
#[must_use]
pub fn seeded_config() -> (TempDir, Config) {
    let tmp = TempDir::new().expect("failed to create temp dir");
    let config = config_for_dir(tmp.path().to_path_buf());
    fs::create_dir_all(&config.music_source_dir).expect("failed to create source dir");
    fs::create_dir_all(&config.cache_dir).expect("failed to create cache dir");
    (tmp, config)
}

/// Release id of the first seeded release.
pub const R1: &str = "018b6021-0000-7000-8000-000000000001";
/// Release id of the second seeded release.
pub const R2: &str = "018b6021-0000-7000-8000-000000000002";
/// Track id of the first seeded track (release 1).
pub const T1: &str = "018b6021-0000-7000-8000-000000000011";
/// Track id of the second seeded track (release 1).
pub const T2: &str = "018b6021-0000-7000-8000-000000000012";
/// Track id of the third seeded track (release 2).
pub const T3: &str = "018b6021-0000-7000-8000-000000000013";

/// A seeded release for [`seeded_cache`].
struct SeedRelease {
    id: &'static str,
    dirname: &'static str,
    title: &'static str,
    releasetype: &'static str,
    releasedate: Option<&'static str>,
    genres: &'static [&'static str],
    labels: &'static [&'static str],
    artists: &'static [&'static str],
    new: bool,
}

/// A seeded track for [`seeded_cache`].
struct SeedTrack {
    id: &'static str,
    release_id: &'static str,
    filename: &'static str,
    title: &'static str,
    tracknumber: &'static str,
    artists: &'static [&'static str],
}

/// The seeded releases.
const SEED_RELEASES: &[SeedRelease] = &[
    SeedRelease {
        id: R1,
        dirname: "r1",
        title: "Release 1",
        releasetype: "album",
        releasedate: Some("2023"),
        genres: &["Techno", "Deep House"],
        labels: &["Silk Music"],
        artists: &["Techno Man", "Bass Man"],
        new: false,
    },
    SeedRelease {
        id: R2,
        dirname: "r2",
        title: "Release 2",
        releasetype: "album",
        releasedate: Some("2021"),
        genres: &["Classical"],
        labels: &["Native State"],
        artists: &["Violin Woman"],
        new: true,
    },
];

/// The seeded tracks.
const SEED_TRACKS: &[SeedTrack] = &[
    SeedTrack {
        id: T1,
        release_id: R1,
        filename: "01.m4a",
        title: "Track 1",
        tracknumber: "01",
        artists: &["Techno Man", "Bass Man"],
    },
    SeedTrack {
        id: T2,
        release_id: R1,
        filename: "02.m4a",
        title: "Track 2",
        tracknumber: "02",
        artists: &["Techno Man", "Bass Man"],
    },
    SeedTrack {
        id: T3,
        release_id: R2,
        filename: "01.m4a",
        title: "Track 1",
        tracknumber: "01",
        artists: &["Violin Woman"],
    },
];

/// A test environment with a populated cache. The referenced files exist on disk but are not
/// real audio.
///
/// # Panics
///
/// Panics if the fixture cannot be built; tests have no use for a partially-seeded cache.
#[must_use]
pub fn seeded_cache() -> (TempDir, Config) {
    let (tmp, config) = seeded_config();
    maybe_invalidate_cache_database(&config).expect("failed to bootstrap schema");
    seed_rows(&config).expect("failed to seed cache");
    (tmp, config)
}

/// Insert the seed rows and create their on-disk counterparts.
fn seed_rows(config: &Config) -> Result<()> {
    let conn = connect(config)?;
    for release in SEED_RELEASES {
        let dir = config.music_source_dir.join(release.dirname);
        fs::create_dir_all(&dir)?;
        fs::write(
            dir.join(format!(".rose.{}.toml", release.id)),
            format!("new = {}\nadded_at = \"2023-04-20T23:45:00+09:00\"\n", release.new),
        )?;
        let _n = conn.execute(
            "INSERT INTO releases (
                id, source_path, cover_image_path, added_at, datafile_mtime, title, releasetype,
                releasedate, originaldate, compositiondate, catalognumber, edition, disctotal,
                new, metahash
            ) VALUES (?1, ?2, NULL, ?3, 0, ?4, ?5, ?6, NULL, NULL, NULL, NULL, 1, ?7, ?8)",
            rusqlite::params![
                release.id,
                dir.to_string_lossy(),
                "2023-04-20T23:45:00+09:00",
                release.title,
                release.releasetype,
                release.releasedate,
                release.new,
                format!("hash-{}", release.id),
            ],
        )?;
        for (i, genre) in release.genres.iter().enumerate() {
            let _n = conn.execute(
                "INSERT INTO releases_genres (release_id, genre, position) VALUES (?1, ?2, ?3)",
                rusqlite::params![release.id, genre, i + 1],
            )?;
        }
        for (i, label) in release.labels.iter().enumerate() {
            let _n = conn.execute(
                "INSERT INTO releases_labels (release_id, label, position) VALUES (?1, ?2, ?3)",
                rusqlite::params![release.id, label, i + 1],
            )?;
        }
        for (i, artist) in release.artists.iter().enumerate() {
            let _n = conn.execute(
                "INSERT INTO releases_artists (release_id, artist, role, alias, position)
                 VALUES (?1, ?2, 'main', 0, ?3)",
                rusqlite::params![release.id, artist, i + 1],
            )?;
        }
    }
    for track in SEED_TRACKS {
        let release = SEED_RELEASES
            .iter()
            .find(|r| r.id == track.release_id)
            .expect("seed track references a seed release");
        let dir = config.music_source_dir.join(release.dirname);
        let path = dir.join(track.filename);
        fs::write(&path, b"not really audio")?;
        let _n = conn.execute(
            "INSERT INTO tracks (
                id, source_path, source_mtime, title, release_id, tracknumber, tracktotal,
                discnumber, duration_seconds, metahash
            ) VALUES (?1, ?2, 0, ?3, ?4, ?5, ?6, '1', 120, ?7)",
            rusqlite::params![
                track.id,
                path.to_string_lossy(),
                track.title,
                track.release_id,
                track.tracknumber,
                SEED_TRACKS.iter().filter(|t| t.release_id == track.release_id).count(),
                format!("hash-{}", track.id),
            ],
        )?;
        for (i, artist) in track.artists.iter().enumerate() {
            let _n = conn.execute(
                "INSERT INTO tracks_artists (track_id, artist, role, alias, position)
                 VALUES (?1, ?2, 'main', 0, ?3)",
                rusqlite::params![track.id, artist, i + 1],
            )?;
        }
        write_seed_fts_row(&conn, track, release)?;
    }
    Ok(())
}

/// Insert the FTS row for one seeded track.
fn write_seed_fts_row(
    conn: &rusqlite::Connection,
    track: &SeedTrack,
    release: &SeedRelease,
) -> Result<()> {
    let rowid: i64 =
        conn.query_row("SELECT rowid FROM tracks WHERE id = ?1", [track.id], |row| row.get(0))?;
    let list = |values: &[&str]| {
        values.iter().map(|v| process_string_for_fts(v)).collect::<Vec<_>>().join(" ")
    };
    let _n = conn.execute(
        "INSERT INTO rules_engine_fts (
            rowid, tracktitle, tracknumber, discnumber, releasetitle, releasedate, originaldate,
            compositiondate, catalognumber, edition, releasetype, genre, secondarygenre,
            descriptor, label, releaseartist, trackartist, new
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, '', '', '', '', ?7, ?8, '', '', ?9, ?10, ?11, ?12)",
        rusqlite::params![
            rowid,
            process_string_for_fts(track.title),
            process_string_for_fts(track.tracknumber),
            process_string_for_fts("1"),
            process_string_for_fts(release.title),
            process_string_for_fts(release.releasedate.unwrap_or("")),
            process_string_for_fts(release.releasetype),
            list(release.genres),
            list(release.labels),
            list(release.artists),
            list(track.artists),
            process_string_for_fts(if release.new { "true" } else { "false" }),
        ],
    )?;
    Ok(())
}

/// Write a collage TOML referencing the given release ids.
///
/// # Panics
///
/// Panics if the file cannot be written.
pub fn write_collage_file(config: &Config, name: &str, release_ids: &[&str]) {
    let dir = config.music_source_dir.join("!collages");
    fs::create_dir_all(&dir).expect("failed to create collages dir");
    let mut text = String::new();
    for id in release_ids {
        text.push_str(&format!(
            "[[releases]]\nuuid = \"{id}\"\ndescription_meta = \"{id}\"\n\n"
        ));
    }
    fs::write(dir.join(format!("{name}.toml")), text).expect("failed to write collage");
}

/// Write a playlist TOML referencing the given track ids.
///
/// # Panics
///
/// Panics if the file cannot be written.
pub fn write_playlist_file(config: &Config, name: &str, track_ids: &[&str]) {
    let dir = config.music_source_dir.join("!playlists");
    fs::create_dir_all(&dir).expect("failed to create playlists dir");
    let mut text = String::new();
    for id in track_ids {
        text.push_str(&format!(
            "[[tracks]]\nuuid = \"{id}\"\ndescription_meta = \"{id}\"\n\n"
        ));
    }
    fs::write(dir.join(format!("{name}.toml")), text).expect("failed to write playlist");
}

/// The source directory of a seeded release.
#[must_use]
pub fn seeded_release_dir(config: &Config, release_id: &str) -> PathBuf {
    config.music_source_dir.join(release_id)
}
