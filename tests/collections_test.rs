// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Collage and playlist operation scenarios.

use rose::cache::{get_collage, get_playlist, list_collages};
use rose::collage::{
    add_release_to_collage, create_collage, delete_collage, remove_release_from_collage,
    rename_collage,
};
use rose::playlist::{add_track_to_playlist, create_playlist, remove_track_from_playlist};
use rose::testing;

#[test]
fn test_collage_create_add_remove() {
    let (_tmp, config) = testing::seeded_cache();
    create_collage(&config, "Rose Gold").unwrap();
    assert_eq!(list_collages(&config).unwrap(), vec!["Rose Gold"]);

    add_release_to_collage(&config, "Rose Gold", testing::R1).unwrap();
    add_release_to_collage(&config, "Rose Gold", testing::R2).unwrap();
    // Adding again is a no-op, not a duplicate.
    add_release_to_collage(&config, "Rose Gold", testing::R1).unwrap();

    let collage = get_collage(&config, "Rose Gold").unwrap().unwrap();
    assert_eq!(
        collage.releases,
        vec![(testing::R1.to_string(), false), (testing::R2.to_string(), false)]
    );

    remove_release_from_collage(&config, "Rose Gold", testing::R1).unwrap();
    // Removing again is a no-op.
    remove_release_from_collage(&config, "Rose Gold", testing::R1).unwrap();
    let collage = get_collage(&config, "Rose Gold").unwrap().unwrap();
    assert_eq!(collage.releases, vec![(testing::R2.to_string(), false)]);
}

#[test]
fn test_collage_create_twice_fails() {
    let (_tmp, config) = testing::seeded_cache();
    create_collage(&config, "Rose Gold").unwrap();
    let err = create_collage(&config, "Rose Gold").unwrap_err();
    assert!(err.to_string().contains("already exists"));
}

#[test]
fn test_collage_rename_moves_file_cover_and_rows() {
    let (_tmp, config) = testing::seeded_cache();
    create_collage(&config, "Rose Gold").unwrap();
    add_release_to_collage(&config, "Rose Gold", testing::R1).unwrap();
    let collages_dir = config.music_source_dir.join("!collages");
    std::fs::write(collages_dir.join("Rose Gold.jpg"), b"jpg").unwrap();

    rename_collage(&config, "Rose Gold", "Pink").unwrap();

    assert!(!collages_dir.join("Rose Gold.toml").exists());
    assert!(collages_dir.join("Pink.toml").exists());
    // The sibling cover file follows the rename.
    assert!(!collages_dir.join("Rose Gold.jpg").exists());
    assert!(collages_dir.join("Pink.jpg").exists());

    // The cache rows, joined by name, moved with it.
    assert_eq!(list_collages(&config).unwrap(), vec!["Pink"]);
    let collage = get_collage(&config, "Pink").unwrap().unwrap();
    assert_eq!(collage.releases, vec![(testing::R1.to_string(), false)]);
    assert!(get_collage(&config, "Rose Gold").unwrap().is_none());
}

#[test]
fn test_collage_delete_moves_to_trash() {
    let (_tmp, config) = testing::seeded_cache();
    create_collage(&config, "Rose Gold").unwrap();
    delete_collage(&config, "Rose Gold").unwrap();

    assert!(!config.music_source_dir.join("!collages").join("Rose Gold.toml").exists());
    assert!(config.trash_dir().join("Rose Gold.toml").exists());
    assert!(list_collages(&config).unwrap().is_empty());
}

#[test]
fn test_collage_ops_on_unknown_names_fail() {
    let (_tmp, config) = testing::seeded_cache();
    let err = delete_collage(&config, "Nope").unwrap_err();
    assert!(err.to_string().contains("does not exist"));
    let err = add_release_to_collage(&config, "Nope", testing::R1).unwrap_err();
    assert!(err.to_string().contains("does not exist"));
    // An unknown release is rejected before the collage is touched.
    create_collage(&config, "Rose Gold").unwrap();
    let err = add_release_to_collage(&config, "Rose Gold", "0000-unknown").unwrap_err();
    assert!(err.to_string().contains("Release does not exist"));
}

#[test]
fn test_playlist_create_add_remove() {
    let (_tmp, config) = testing::seeded_cache();
    create_playlist(&config, "Lala Lisa").unwrap();
    add_track_to_playlist(&config, "Lala Lisa", testing::T1).unwrap();
    add_track_to_playlist(&config, "Lala Lisa", testing::T3).unwrap();
    add_track_to_playlist(&config, "Lala Lisa", testing::T1).unwrap();

    let playlist = get_playlist(&config, "Lala Lisa").unwrap().unwrap();
    assert_eq!(
        playlist.tracks,
        vec![(testing::T1.to_string(), false), (testing::T3.to_string(), false)]
    );

    remove_track_from_playlist(&config, "Lala Lisa", testing::T1).unwrap();
    let playlist = get_playlist(&config, "Lala Lisa").unwrap().unwrap();
    assert_eq!(playlist.tracks, vec![(testing::T3.to_string(), false)]);
}

#[test]
fn test_playlist_descriptions_use_track_display_text() {
    let (_tmp, config) = testing::seeded_cache();
    create_playlist(&config, "Lala Lisa").unwrap();
    add_track_to_playlist(&config, "Lala Lisa", testing::T3).unwrap();

    let text = std::fs::read_to_string(
        config.music_source_dir.join("!playlists").join("Lala Lisa.toml"),
    )
    .unwrap();
    assert!(text.contains("Violin Woman - Track 1"));
}
