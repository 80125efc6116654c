// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Release mutation scenarios.

use rose::cache::{get_collage, get_release};
use rose::datafile::read_datafile;
use rose::release::{delete_release, set_release_cover_art, toggle_release_new};
use rose::testing;

#[test]
fn test_delete_release_trashes_directory_and_flags_collage_entries() {
    let (_tmp, config) = testing::seeded_cache();
    testing::write_collage_file(&config, "Rose Gold", &[testing::R1, testing::R2]);
    rose::cache::update::update_cache_for_collages(&config, None, true).unwrap();

    delete_release(&config, testing::R1).unwrap();

    assert!(!config.music_source_dir.join("r1").exists());
    assert!(config.trash_dir().join("r1").exists());
    assert!(get_release(&config, testing::R1).unwrap().is_none());

    // The collage keeps the reference, marked missing.
    let collage = get_collage(&config, "Rose Gold").unwrap().unwrap();
    assert_eq!(
        collage.releases,
        vec![(testing::R1.to_string(), true), (testing::R2.to_string(), false)]
    );
}

#[test]
fn test_delete_release_unknown_id_fails() {
    let (_tmp, config) = testing::seeded_cache();
    let err = delete_release(&config, "0000-unknown").unwrap_err();
    assert!(err.to_string().contains("Release does not exist"));
}

#[test]
fn test_toggle_release_new_flips_the_sidecar() {
    let (_tmp, config) = testing::seeded_cache();
    let datafile_path = config
        .music_source_dir
        .join("r2")
        .join(format!(".rose.{}.toml", testing::R2));
    assert!(read_datafile(&datafile_path).unwrap().new);

    toggle_release_new(&config, testing::R2).unwrap();
    assert!(!read_datafile(&datafile_path).unwrap().new);

    toggle_release_new(&config, testing::R2).unwrap();
    assert!(read_datafile(&datafile_path).unwrap().new);
}

#[test]
fn test_set_cover_art_copies_and_replaces() {
    let (_tmp, config) = testing::seeded_cache();
    let release_dir = config.music_source_dir.join("r1");
    std::fs::write(release_dir.join("folder.png"), b"old png").unwrap();
    let new_cover = config.cache_dir.join("new-cover.jpg");
    std::fs::write(&new_cover, b"new jpg").unwrap();

    set_release_cover_art(&config, testing::R1, &new_cover).unwrap();

    // The old cover is gone, the new one is normalized to `cover.<ext>`.
    assert!(!release_dir.join("folder.png").exists());
    let written = release_dir.join("cover.jpg");
    assert_eq!(std::fs::read(written).unwrap(), b"new jpg");
}

#[test]
fn test_set_cover_art_rejects_invalid_extension() {
    let (_tmp, config) = testing::seeded_cache();
    let bad = config.cache_dir.join("cover.bmp");
    std::fs::write(&bad, b"bmp").unwrap();
    let err = set_release_cover_art(&config, testing::R1, &bad).unwrap_err();
    assert!(err.to_string().contains("Invalid cover art file"));
}
