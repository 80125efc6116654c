// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Rules engine search scenarios: the FTS candidate phase and the authoritative filter.

use rose::release::find_releases_matching_rule;
use rose::rules::fast_search_for_matching_tracks;
use rose::rules::parser::Matcher;
use rose::testing;
use rose::track::find_tracks_matching_rule;

/// Track ids returned by the full two-phase search.
fn search(config: &rose::Config, matcher: &str) -> Vec<String> {
    let matcher = Matcher::parse(matcher).unwrap();
    let mut ids: Vec<String> = find_tracks_matching_rule(config, &matcher)
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    ids.sort();
    ids
}

#[test]
fn test_substring_search_on_genre() {
    let (_tmp, config) = testing::seeded_cache();
    assert_eq!(search(&config, "genre:Techno"), vec![testing::T1, testing::T2]);
    // Substrings match: the index is per-character.
    assert_eq!(search(&config, "genre:echn"), vec![testing::T1, testing::T2]);
    assert!(search(&config, "genre:Polka").is_empty());
}

#[test]
fn test_genre_matching_is_case_insensitive() {
    let (_tmp, config) = testing::seeded_cache();
    assert_eq!(search(&config, "genre:techno"), vec![testing::T1, testing::T2]);
}

#[test]
fn test_tracktitle_matching_respects_case() {
    let (_tmp, config) = testing::seeded_cache();
    // The FTS phase is case-folded, so the candidates include both "Track 1" rows; the
    // authoritative filter then drops them because the raw needle is lowercase.
    let matcher = Matcher::parse("tracktitle:track 1").unwrap();
    assert!(!fast_search_for_matching_tracks(&config, &matcher).unwrap().is_empty());
    assert!(search(&config, "tracktitle:track 1").is_empty());
    // With the :i flag the same needle matches.
    assert_eq!(search(&config, "tracktitle:track 1:i"), vec![testing::T1, testing::T3]);
}

#[test]
fn test_anchored_patterns() {
    let (_tmp, config) = testing::seeded_cache();
    assert_eq!(search(&config, "tracktitle:^Track"), vec![testing::T1, testing::T2, testing::T3]);
    assert!(search(&config, r"tracktitle:^rack").is_empty());
    assert_eq!(search(&config, "tracktitle:1$"), vec![testing::T1, testing::T3]);
}

#[test]
fn test_empty_needle_matches_everything() {
    let (_tmp, config) = testing::seeded_cache();
    assert_eq!(search(&config, "genre:"), vec![testing::T1, testing::T2, testing::T3]);
}

#[test]
fn test_artist_shorthand_search() {
    let (_tmp, config) = testing::seeded_cache();
    assert_eq!(search(&config, "artist:Violin"), vec![testing::T3]);
    assert_eq!(search(&config, "releaseartist:Bass Man"), vec![testing::T1, testing::T2]);
}

#[test]
fn test_new_flag_search() {
    let (_tmp, config) = testing::seeded_cache();
    assert_eq!(search(&config, "new:^true$"), vec![testing::T3]);
    assert_eq!(search(&config, "new:^false$"), vec![testing::T1, testing::T2]);
}

#[test]
fn test_release_search_via_matcher() {
    let (_tmp, config) = testing::seeded_cache();
    let matcher = Matcher::parse("label:Native State").unwrap();
    let releases = find_releases_matching_rule(&config, &matcher).unwrap();
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].id, testing::R2);
}

#[test]
fn test_fts_substring_equivalence_invariant() {
    // For every seeded string field, the tokenized FTS query finds the row iff a
    // case-insensitive substring match against the raw value would.
    let (_tmp, config) = testing::seeded_cache();
    let cases = [
        ("releasetitle", "elease 2", vec![testing::T3]),
        ("label", "silk", vec![testing::T1, testing::T2]),
        ("trackartist", "Man", vec![testing::T1, testing::T2, testing::T3]),
        ("releasedate", "2021", vec![testing::T3]),
    ];
    for (tag, needle, expected) in cases {
        let matcher = Matcher::parse(&format!("{tag}:{needle}:i")).unwrap();
        let mut candidates = fast_search_for_matching_tracks(&config, &matcher).unwrap();
        candidates.sort();
        assert_eq!(candidates, expected, "FTS candidates diverged for {tag}:{needle}");
    }
}
