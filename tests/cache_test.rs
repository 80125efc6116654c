// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Cache refresh and eviction scenarios against a seeded library.

use rose::cache::update::{
    update_cache, update_cache_evict_nonexistent_releases, update_cache_for_playlists,
};
use rose::cache::{get_playlist, get_release, get_track};
use rose::rules::fast_search_for_matching_tracks;
use rose::rules::parser::Matcher;
use rose::testing;

#[test]
fn test_eviction_removes_release_tracks_and_fts_rows() {
    let (_tmp, config) = testing::seeded_cache();

    std::fs::remove_dir_all(config.music_source_dir.join("r1")).unwrap();
    update_cache_evict_nonexistent_releases(&config).unwrap();

    assert!(get_release(&config, testing::R1).unwrap().is_none());
    assert!(get_track(&config, testing::T1).unwrap().is_none());
    assert!(get_track(&config, testing::T2).unwrap().is_none());
    // The surviving release is untouched.
    assert!(get_release(&config, testing::R2).unwrap().is_some());
    assert!(get_track(&config, testing::T3).unwrap().is_some());

    // The FTS rows of the evicted tracks are swept with them: a phrase unique to release 1
    // finds nothing anymore.
    let matcher = Matcher::parse("releasetitle:Release 1").unwrap();
    assert!(fast_search_for_matching_tracks(&config, &matcher).unwrap().is_empty());
}

#[test]
fn test_scan_tolerates_unreadable_audio_files() {
    let (_tmp, config) = testing::seeded_cache();

    // The seeded files are not real audio; a full scan logs and skips them without nuking the
    // cached rows or aborting.
    update_cache(&config, false).unwrap();

    assert!(get_release(&config, testing::R1).unwrap().is_some());
    assert!(get_release(&config, testing::R2).unwrap().is_some());
    assert!(get_track(&config, testing::T3).unwrap().is_some());
}

#[test]
fn test_collage_refresh_rewrites_descriptions_and_flags_missing() {
    let (_tmp, config) = testing::seeded_cache();
    testing::write_collage_file(&config, "Rose Gold", &[testing::R1, "0000-missing"]);

    rose::cache::update::update_cache_for_collages(&config, None, true).unwrap();

    let collage = rose::cache::get_collage(&config, "Rose Gold").unwrap().unwrap();
    assert_eq!(
        collage.releases,
        vec![
            (testing::R1.to_string(), false),
            ("0000-missing".to_string(), true),
        ]
    );

    // The file's description_meta lines are derived: known releases get their display text,
    // missing ones a marker.
    let text = std::fs::read_to_string(
        config.music_source_dir.join("!collages").join("Rose Gold.toml"),
    )
    .unwrap();
    assert!(text.contains("Techno Man, Bass Man - Release 1"));
    assert!(text.contains("[missing]"));
}

#[test]
fn test_playlist_refresh_discovers_cover_and_orders_tracks() {
    let (_tmp, config) = testing::seeded_cache();
    testing::write_playlist_file(&config, "Lala Lisa", &[testing::T1, testing::T3]);
    std::fs::write(
        config.music_source_dir.join("!playlists").join("Lala Lisa.jpg"),
        b"jpg",
    )
    .unwrap();

    update_cache_for_playlists(&config, None, true).unwrap();

    let playlist = get_playlist(&config, "Lala Lisa").unwrap().unwrap();
    assert_eq!(
        playlist.tracks,
        vec![(testing::T1.to_string(), false), (testing::T3.to_string(), false)]
    );
    let cover = playlist.cover_path.expect("cover should be discovered");
    assert!(cover.ends_with("Lala Lisa.jpg"));
}

#[test]
fn test_playlist_refresh_is_skipped_when_mtime_is_unchanged() {
    let (_tmp, config) = testing::seeded_cache();
    testing::write_playlist_file(&config, "Lala Lisa", &[testing::T1]);
    update_cache_for_playlists(&config, None, true).unwrap();
    let before = get_playlist(&config, "Lala Lisa").unwrap().unwrap();

    // Without force and without touching the file, the refresh is a no-op.
    update_cache_for_playlists(&config, None, false).unwrap();
    let after = get_playlist(&config, "Lala Lisa").unwrap().unwrap();
    assert_eq!(before, after);
}
