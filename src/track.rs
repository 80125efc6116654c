// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Track operations.

use crate::cache::{get_track_or_err, CachedTrack};
use crate::error::Result;
use crate::rules::parser::{Action, Matcher};
use crate::rules::{
    execute_metadata_actions, fast_search_for_matching_tracks,
    filter_track_false_positives_using_read_cache, TrackDiff,
};
use crate::Config;

/// Apply an ad-hoc action list to a single track.
///
/// # Errors
///
/// Fails if the track does not exist; see [`execute_metadata_actions`] for the commit semantics.
pub fn run_actions_on_track(
    config: &Config,
    track_id: &str,
    actions: &[Action],
    dry_run: bool,
) -> Result<Vec<TrackDiff>> {
    let track = get_track_or_err(config, track_id)?;
    execute_metadata_actions(config, actions, &[track], dry_run)
}

/// Find the tracks matching a matcher: FTS candidates, then the authoritative filter.
///
/// # Errors
///
/// Returns an error if the database cannot be read.
pub fn find_tracks_matching_rule(config: &Config, matcher: &Matcher) -> Result<Vec<CachedTrack>> {
    let candidates = fast_search_for_matching_tracks(config, matcher)?;
    filter_track_false_positives_using_read_cache(config, matcher, &candidates)
}
