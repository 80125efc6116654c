// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! The rules engine.
//!
//! Execution is a two-phase search followed by a per-release commit. The fast phase asks the
//! full-text index for candidate tracks using the per-character-tokenized needle; the
//! authoritative phase re-reads each candidate's cached record and applies the full pattern
//! semantics. Mutations are grouped by release, executed under the release lock, and followed by
//! a targeted cache refresh. Every step supports a no-commit preview.

pub mod parser;

use crate::cache::{
    self, fts_phrase, get_release_or_err, release_lock_name, CachedRelease, CachedTrack,
};
use crate::cache::update::update_cache_for_releases;
use crate::common::{Artist, ArtistRole, PartialDate};
use crate::datafile::{find_datafile, read_datafile, write_datafile};
use crate::error::Result;
use crate::rules::parser::{Action, ActionBehavior, Matcher, Pattern, Rule, Tag};
use crate::tag::AudioTags;
use crate::Config;
use itertools::Itertools;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// The change an action run makes (or would make) to a single field of a single track.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDiff {
    /// The changed tag.
    pub tag: Tag,
    /// The values before.
    pub old: Vec<String>,
    /// The values after.
    pub new: Vec<String>,
}

/// The changes an action run makes (or would make) to a single track.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackDiff {
    /// The track id.
    pub track_id: String,
    /// The track's file.
    pub source_path: PathBuf,
    /// Per-field changes, in action order.
    pub changes: Vec<FieldDiff>,
}

/// Whether any value matches the pattern, honoring the per-tag case rules.
///
/// `genre`, `secondarygenre`, `label` and `descriptor` always match case-insensitively; other
/// tags obey the pattern's `:i` flag.
///
/// # Errors
///
/// Infallible today; tag-specific validation hooks in here.
pub fn matches_pattern(values: &[String], pattern: &Pattern, tag: &Tag) -> Result<bool> {
    let mut pattern = pattern.clone();
    if matches!(
        tag,
        Tag::Genre | Tag::SecondaryGenre | Tag::Label | Tag::Descriptor
    ) {
        pattern.case_insensitive = true;
    }
    Ok(values.iter().any(|v| pattern.matches(v)))
}

/// The FTS column indexing a tag, if the tag is indexed at all.
fn fts_column(tag: Tag) -> Option<&'static str> {
    Some(match tag {
        Tag::TrackTitle => "tracktitle",
        Tag::TrackNumber => "tracknumber",
        Tag::DiscNumber => "discnumber",
        Tag::ReleaseTitle => "releasetitle",
        Tag::ReleaseDate => "releasedate",
        Tag::OriginalDate => "originaldate",
        Tag::CompositionDate => "compositiondate",
        Tag::CatalogNumber => "catalognumber",
        Tag::Edition => "edition",
        Tag::ReleaseType => "releasetype",
        Tag::Genre => "genre",
        Tag::SecondaryGenre => "secondarygenre",
        Tag::Descriptor => "descriptor",
        Tag::Label => "label",
        Tag::New => "new",
        Tag::TrackArtistMain
        | Tag::TrackArtistGuest
        | Tag::TrackArtistRemixer
        | Tag::TrackArtistProducer
        | Tag::TrackArtistComposer
        | Tag::TrackArtistConductor
        | Tag::TrackArtistDjMixer => "trackartist",
        Tag::ReleaseArtistMain
        | Tag::ReleaseArtistGuest
        | Tag::ReleaseArtistRemixer
        | Tag::ReleaseArtistProducer
        | Tag::ReleaseArtistComposer
        | Tag::ReleaseArtistConductor
        | Tag::ReleaseArtistDjMixer => "releaseartist",
        Tag::TrackTotal | Tag::DiscTotal => return None,
    })
}

/// Fast candidate search: the ids of tracks whose FTS row matches the tokenized needle in any of
/// the matcher's tags.
///
/// An empty needle, or a matcher tag outside the index (the derived totals), selects every
/// track; the authoritative filter sorts it out.
///
/// # Errors
///
/// Returns an error if the database cannot be read.
pub fn fast_search_for_matching_tracks(config: &Config, matcher: &Matcher) -> Result<Vec<String>> {
    let conn = cache::connect(config)?;
    let columns: Vec<&str> = matcher.tags.iter().copied().filter_map(fts_column).collect();
    if matcher.pattern.needle.is_empty() || columns.len() < matcher.tags.len() {
        // An unindexed tag or an empty needle: every track is a candidate.
        let mut stmt = conn.prepare("SELECT id FROM tracks")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        return Ok(ids);
    }
    let phrase = fts_phrase(&matcher.pattern.needle);
    let query = columns
        .into_iter()
        .unique()
        .map(|c| format!("{c} : {phrase}"))
        .collect::<Vec<_>>()
        .join(" OR ");
    let mut stmt = conn.prepare(
        "SELECT t.id FROM rules_engine_fts f JOIN tracks t ON t.rowid = f.rowid
         WHERE rules_engine_fts MATCH ?1",
    )?;
    let ids = stmt
        .query_map([&query], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    log::debug!("Fast search matched {} tracks", ids.len());
    Ok(ids)
}

/// Fast candidate search for releases: the distinct releases of the matching tracks.
///
/// # Errors
///
/// Returns an error if the database cannot be read.
pub fn fast_search_for_matching_releases(config: &Config, matcher: &Matcher) -> Result<Vec<String>> {
    let track_ids = fast_search_for_matching_tracks(config, matcher)?;
    let tracks = cache::get_tracks(config, &track_ids)?;
    let mut release_ids: Vec<String> = tracks.into_iter().map(|t| t.release_id).collect();
    release_ids.sort();
    release_ids.dedup();
    Ok(release_ids)
}

/// The values a tag has on a track/release pair, as the engine sees them.
#[must_use]
pub fn tag_values(tag: Tag, track: &CachedTrack, release: &CachedRelease) -> Vec<String> {
    fn opt(value: Option<&str>) -> Vec<String> {
        value.map(|v| vec![v.to_string()]).unwrap_or_default()
    }
    fn date(value: Option<PartialDate>) -> Vec<String> {
        value.map(|d| vec![d.to_string()]).unwrap_or_default()
    }
    fn artists(list: &[Artist]) -> Vec<String> {
        list.iter().map(|a| a.name.clone()).collect()
    }
    match tag {
        Tag::TrackTitle => opt(track.tracktitle.as_deref()),
        Tag::TrackNumber => vec![track.tracknumber.clone()],
        Tag::TrackTotal => vec![track.tracktotal.to_string()],
        Tag::DiscNumber => vec![track.discnumber.clone()],
        Tag::DiscTotal => vec![release.disctotal.to_string()],
        Tag::ReleaseTitle => opt(release.releasetitle.as_deref()),
        Tag::ReleaseDate => date(release.releasedate),
        Tag::OriginalDate => date(release.originaldate),
        Tag::CompositionDate => date(release.compositiondate),
        Tag::CatalogNumber => opt(release.catalognumber.as_deref()),
        Tag::Edition => opt(release.edition.as_deref()),
        Tag::ReleaseType => vec![release.releasetype.clone()],
        Tag::Genre => release.genres.clone(),
        Tag::SecondaryGenre => release.secondary_genres.clone(),
        Tag::Descriptor => release.descriptors.clone(),
        Tag::Label => release.labels.clone(),
        Tag::New => vec![if release.new { "true" } else { "false" }.to_string()],
        Tag::TrackArtistMain => artists(&track.trackartists.main),
        Tag::TrackArtistGuest => artists(&track.trackartists.guest),
        Tag::TrackArtistRemixer => artists(&track.trackartists.remixer),
        Tag::TrackArtistProducer => artists(&track.trackartists.producer),
        Tag::TrackArtistComposer => artists(&track.trackartists.composer),
        Tag::TrackArtistConductor => artists(&track.trackartists.conductor),
        Tag::TrackArtistDjMixer => artists(&track.trackartists.djmixer),
        Tag::ReleaseArtistMain => artists(&release.releaseartists.main),
        Tag::ReleaseArtistGuest => artists(&release.releaseartists.guest),
        Tag::ReleaseArtistRemixer => artists(&release.releaseartists.remixer),
        Tag::ReleaseArtistProducer => artists(&release.releaseartists.producer),
        Tag::ReleaseArtistComposer => artists(&release.releaseartists.composer),
        Tag::ReleaseArtistConductor => artists(&release.releaseartists.conductor),
        Tag::ReleaseArtistDjMixer => artists(&release.releaseartists.djmixer),
    }
}

/// Authoritative filter: drop candidate tracks whose cached record does not actually match the
/// matcher under the full pattern semantics.
///
/// # Errors
///
/// Returns an error if the database cannot be read.
pub fn filter_track_false_positives_using_read_cache(
    config: &Config,
    matcher: &Matcher,
    track_ids: &[String],
) -> Result<Vec<CachedTrack>> {
    let tracks = cache::get_tracks(config, track_ids)?;
    let mut releases: HashMap<String, CachedRelease> = HashMap::new();
    let mut result = Vec::new();
    for track in tracks {
        let release = match releases.get(&track.release_id) {
            Some(release) => release.clone(),
            None => {
                let release = get_release_or_err(config, &track.release_id)?;
                releases.insert(track.release_id.clone(), release.clone());
                release
            }
        };
        let mut matched = false;
        for &tag in &matcher.tags {
            if matches_pattern(&tag_values(tag, &track, &release), &matcher.pattern, &tag)? {
                matched = true;
                break;
            }
        }
        if matched {
            result.push(track);
        }
    }
    Ok(result)
}

/// Authoritative filter for releases: drop candidates whose release-level tags do not match.
///
/// # Errors
///
/// Returns an error if the database cannot be read.
pub fn filter_release_false_positives_using_read_cache(
    config: &Config,
    matcher: &Matcher,
    release_ids: &[String],
) -> Result<Vec<CachedRelease>> {
    let mut result = Vec::new();
    for release_id in release_ids {
        let Some(release) = cache::get_release(config, release_id)? else {
            continue;
        };
        // Track-level tags cannot be judged at the release level; a release passes if any of its
        // tracks matches.
        let tracks = cache::get_tracks_of_release(config, release_id)?;
        let mut matched = false;
        'outer: for track in &tracks {
            for &tag in &matcher.tags {
                if matches_pattern(&tag_values(tag, track, &release), &matcher.pattern, &tag)? {
                    matched = true;
                    break 'outer;
                }
            }
        }
        if matched {
            result.push(release);
        }
    }
    Ok(result)
}

/// Run a rule across the whole library.
///
/// With `dry_run`, nothing is written and the returned diffs describe the planned mutations.
///
/// # Errors
///
/// Returns an error on database failures. A tag-write failure aborts only the affected release's
/// plan; execution continues with the next release.
pub fn execute_metadata_rule(config: &Config, rule: &Rule, dry_run: bool) -> Result<Vec<TrackDiff>> {
    log::info!("Executing rule: {rule}");
    let candidates = fast_search_for_matching_tracks(config, &rule.matcher)?;
    let tracks = filter_track_false_positives_using_read_cache(config, &rule.matcher, &candidates)?;
    if tracks.is_empty() {
        log::debug!("No tracks matched the rule matcher");
        return Ok(Vec::new());
    }
    execute_metadata_actions(config, &rule.actions, &tracks, dry_run)
}

/// Run every stored metadata rule from the configuration.
///
/// # Errors
///
/// See [`execute_metadata_rule`].
pub fn execute_stored_metadata_rules(config: &Config, dry_run: bool) -> Result<Vec<TrackDiff>> {
    let mut diffs = Vec::new();
    for rule in &config.stored_metadata_rules {
        diffs.extend(execute_metadata_rule(config, rule, dry_run)?);
    }
    Ok(diffs)
}

/// Apply a list of actions to the given tracks.
///
/// Mutations are grouped by release. For each release, the release lock is taken, every affected
/// track's tags are rewritten through the codec, and a targeted cache refresh follows. A write
/// failure inside one release abandons that release's remaining writes and moves on.
///
/// # Errors
///
/// Returns an error on database failures.
pub fn execute_metadata_actions(
    config: &Config,
    actions: &[Action],
    tracks: &[CachedTrack],
    dry_run: bool,
) -> Result<Vec<TrackDiff>> {
    let mut by_release: BTreeMap<String, Vec<&CachedTrack>> = BTreeMap::new();
    for track in tracks {
        by_release.entry(track.release_id.clone()).or_default().push(track);
    }

    let conn = cache::connect(config)?;
    let mut all_diffs = Vec::new();
    for (release_id, release_tracks) in by_release {
        if dry_run {
            match plan_release_actions(actions, &release_tracks) {
                Ok(mut diffs) => all_diffs.append(&mut diffs),
                Err(err) => log::error!("Failed to plan actions for release {release_id}: {err}"),
            }
            continue;
        }
        let lock_name = release_lock_name(&release_id);
        cache::lock(&conn, &lock_name, 60.0)?;
        let result = commit_release_actions(config, actions, &release_id, &release_tracks);
        cache::unlock(&conn, &lock_name)?;
        match result {
            Ok((mut diffs, refresh_dir)) => {
                // The refresh re-takes the release lock, so it must run after the unlock.
                if let Some(dir) = refresh_dir {
                    update_cache_for_releases(config, Some(vec![dir]), true)?;
                }
                all_diffs.append(&mut diffs);
            }
            Err(err) => {
                // On-disk state of unwritten tracks is untouched; a later scan reconciles the
                // written ones.
                log::error!("Failed to run actions on release {release_id}: {err}");
            }
        }
    }
    Ok(all_diffs)
}

/// Compute the diffs for one release without writing anything.
fn plan_release_actions(actions: &[Action], tracks: &[&CachedTrack]) -> Result<Vec<TrackDiff>> {
    let mut diffs = Vec::new();
    for track in tracks {
        let mut tags = AudioTags::from_file(&track.source_path)?;
        let mut new_flag = None;
        let changes = apply_actions_to_tags(&mut tags, actions, &mut new_flag)?;
        if !changes.is_empty() {
            diffs.push(TrackDiff {
                track_id: track.id.clone(),
                source_path: track.source_path.clone(),
                changes,
            });
        }
    }
    Ok(diffs)
}

/// Apply and persist the actions for one release.
///
/// Returns the diffs plus the release directory to refresh, when anything was written.
fn commit_release_actions(
    config: &Config,
    actions: &[Action],
    release_id: &str,
    tracks: &[&CachedTrack],
) -> Result<(Vec<TrackDiff>, Option<PathBuf>)> {
    let release = get_release_or_err(config, release_id)?;
    let mut diffs = Vec::new();
    let mut new_flag = None;

    // Plan all writes before touching the first file, so a planning failure costs nothing.
    let mut planned: Vec<(PathBuf, AudioTags, TrackDiff)> = Vec::new();
    for track in tracks {
        let mut tags = AudioTags::from_file(&track.source_path)?;
        let changes = apply_actions_to_tags(&mut tags, actions, &mut new_flag)?;
        if !changes.is_empty() {
            planned.push((
                track.source_path.clone(),
                tags,
                TrackDiff {
                    track_id: track.id.clone(),
                    source_path: track.source_path.clone(),
                    changes,
                },
            ));
        }
    }

    for (path, mut tags, diff) in planned {
        tags.flush(config)?;
        log::info!("Rewrote tags of {}", path.display());
        diffs.push(diff);
    }

    if let Some(new_flag) = new_flag {
        if let Some((datafile_path, _)) = find_datafile(&release.source_path)? {
            let mut datafile = read_datafile(&datafile_path)?;
            if datafile.new != new_flag {
                datafile.new = new_flag;
                write_datafile(&datafile_path, &datafile)?;
                log::info!("Set new={new_flag} on release {release_id}");
            }
        }
    }

    let refresh_dir =
        (!diffs.is_empty() || new_flag.is_some()).then(|| release.source_path.clone());
    Ok((diffs, refresh_dir))
}

/// Apply all actions to one in-memory tag record, returning the per-field diffs.
///
/// Changes to the `new` pseudo-tag have no home in the audio tags; they are reported through
/// `new_flag` and applied to the sidecar by the caller.
fn apply_actions_to_tags(
    tags: &mut AudioTags,
    actions: &[Action],
    new_flag: &mut Option<bool>,
) -> Result<Vec<FieldDiff>> {
    let mut diffs = Vec::new();
    for action in actions {
        for &tag in &action.tags {
            if tag == Tag::New {
                apply_new_action(action, new_flag);
                continue;
            }
            let old = get_tag_values(tags, tag);
            let new = transform_values(&old, action, tag)?;
            if new != old {
                set_tag_values(tags, tag, &new);
                diffs.push(FieldDiff { tag, old, new });
            }
        }
    }
    Ok(diffs)
}

/// Apply an action to the `new` pseudo-tag.
fn apply_new_action(action: &Action, new_flag: &mut Option<bool>) {
    match &action.behavior {
        ActionBehavior::Replace(r) => match r.replacement.as_str() {
            "true" => *new_flag = Some(true),
            "false" => *new_flag = Some(false),
            other => log::warn!("Ignoring replace of `new` with non-boolean value {other:?}"),
        },
        other => {
            log::warn!("Ignoring {} action on the `new` tag: only replace applies", other.kind());
        }
    }
}

/// Compute an action's output values from its input values.
fn transform_values(values: &[String], action: &Action, tag: Tag) -> Result<Vec<String>> {
    let matches = |v: &str| -> bool {
        match &action.pattern {
            None => true,
            Some(pattern) => {
                let mut pattern = pattern.clone();
                if matches!(
                    tag,
                    Tag::Genre | Tag::SecondaryGenre | Tag::Label | Tag::Descriptor
                ) {
                    pattern.case_insensitive = true;
                }
                pattern.matches(v)
            }
        }
    };

    let mut out: Vec<String> = Vec::new();
    match &action.behavior {
        ActionBehavior::Replace(r) => {
            let mut replaced = false;
            for v in values {
                if matches(v) {
                    // All matching values collapse into one replacement.
                    if !replaced {
                        out.push(r.replacement.clone());
                        replaced = true;
                    }
                } else {
                    out.push(v.clone());
                }
            }
            if values.is_empty() && !tag.is_multi_value() {
                // Replacing an absent single-valued tag sets it.
                out.push(r.replacement.clone());
            }
        }
        ActionBehavior::Sed(s) => {
            for v in values {
                if matches(v) {
                    out.push(s.src.replace_all(v, s.dst.as_str()).into_owned());
                } else {
                    out.push(v.clone());
                }
            }
        }
        ActionBehavior::Split(s) => {
            for v in values {
                if matches(v) {
                    out.extend(
                        v.split(&s.delimiter)
                            .map(str::trim)
                            .filter(|p| !p.is_empty())
                            .map(String::from),
                    );
                } else {
                    out.push(v.clone());
                }
            }
        }
        ActionBehavior::Add(a) => {
            out = values.to_vec();
            if !out.contains(&a.value) {
                out.push(a.value.clone());
            }
        }
        ActionBehavior::Delete(_) => {
            for v in values {
                if !matches(v) {
                    out.push(v.clone());
                }
            }
        }
    }
    // Multi-value outputs deduplicate, preserving order.
    if tag.is_multi_value() {
        out = crate::common::uniq(out);
    } else if out.len() > 1 {
        out.truncate(1);
    }
    Ok(out)
}

/// Read a tag's values from an in-memory record.
fn get_tag_values(tags: &AudioTags, tag: Tag) -> Vec<String> {
    fn opt(value: Option<&str>) -> Vec<String> {
        value.map(|v| vec![v.to_string()]).unwrap_or_default()
    }
    fn date(value: Option<PartialDate>) -> Vec<String> {
        value.map(|d| vec![d.to_string()]).unwrap_or_default()
    }
    fn artists(list: &[Artist]) -> Vec<String> {
        list.iter().map(|a| a.name.clone()).collect()
    }
    match tag {
        Tag::TrackTitle => opt(tags.tracktitle.as_deref()),
        Tag::TrackNumber => opt(tags.tracknumber.as_deref()),
        Tag::DiscNumber => opt(tags.discnumber.as_deref()),
        Tag::ReleaseTitle => opt(tags.releasetitle.as_deref()),
        Tag::ReleaseDate => date(tags.releasedate),
        Tag::OriginalDate => date(tags.originaldate),
        Tag::CompositionDate => date(tags.compositiondate),
        Tag::CatalogNumber => opt(tags.catalognumber.as_deref()),
        Tag::Edition => opt(tags.edition.as_deref()),
        Tag::ReleaseType => vec![tags.releasetype.clone()],
        Tag::Genre => tags.genre.clone(),
        Tag::SecondaryGenre => tags.secondarygenre.clone(),
        Tag::Descriptor => tags.descriptor.clone(),
        Tag::Label => tags.label.clone(),
        Tag::TrackArtistMain => artists(&tags.trackartists.main),
        Tag::TrackArtistGuest => artists(&tags.trackartists.guest),
        Tag::TrackArtistRemixer => artists(&tags.trackartists.remixer),
        Tag::TrackArtistProducer => artists(&tags.trackartists.producer),
        Tag::TrackArtistComposer => artists(&tags.trackartists.composer),
        Tag::TrackArtistConductor => artists(&tags.trackartists.conductor),
        Tag::TrackArtistDjMixer => artists(&tags.trackartists.djmixer),
        Tag::ReleaseArtistMain => artists(&tags.releaseartists.main),
        Tag::ReleaseArtistGuest => artists(&tags.releaseartists.guest),
        Tag::ReleaseArtistRemixer => artists(&tags.releaseartists.remixer),
        Tag::ReleaseArtistConductor => artists(&tags.releaseartists.conductor),
        Tag::ReleaseArtistComposer => artists(&tags.releaseartists.composer),
        Tag::ReleaseArtistProducer => artists(&tags.releaseartists.producer),
        Tag::ReleaseArtistDjMixer => artists(&tags.releaseartists.djmixer),
        // Derived totals and the sidecar flag are handled by their own paths.
        Tag::TrackTotal | Tag::DiscTotal | Tag::New => Vec::new(),
    }
}

/// Write a tag's values into an in-memory record.
fn set_tag_values(tags: &mut AudioTags, tag: Tag, values: &[String]) {
    fn single(values: &[String]) -> Option<String> {
        values.first().cloned().filter(|v| !v.is_empty())
    }
    fn date(values: &[String]) -> Option<PartialDate> {
        PartialDate::parse(values.first().map(String::as_str))
    }
    fn artists(existing: &[Artist], values: &[String]) -> Vec<Artist> {
        values
            .iter()
            .map(|name| {
                existing
                    .iter()
                    .find(|a| &a.name == name)
                    .cloned()
                    .unwrap_or_else(|| Artist::new(name.clone()))
            })
            .collect()
    }
    fn set_role(tags: &mut AudioTags, track_level: bool, role: ArtistRole, values: &[String]) {
        let mapping = if track_level { &mut tags.trackartists } else { &mut tags.releaseartists };
        let list = mapping.role_mut(role);
        *list = artists(list, values);
    }
    match tag {
        Tag::TrackTitle => tags.tracktitle = single(values),
        Tag::TrackNumber => tags.tracknumber = single(values),
        Tag::DiscNumber => tags.discnumber = single(values),
        Tag::ReleaseTitle => tags.releasetitle = single(values),
        Tag::ReleaseDate => tags.releasedate = date(values),
        Tag::OriginalDate => tags.originaldate = date(values),
        Tag::CompositionDate => tags.compositiondate = date(values),
        Tag::CatalogNumber => tags.catalognumber = single(values),
        Tag::Edition => tags.edition = single(values),
        Tag::ReleaseType => {
            tags.releasetype = single(values).unwrap_or_else(|| "unknown".to_string());
        }
        Tag::Genre => tags.genre = values.to_vec(),
        Tag::SecondaryGenre => tags.secondarygenre = values.to_vec(),
        Tag::Descriptor => tags.descriptor = values.to_vec(),
        Tag::Label => tags.label = values.to_vec(),
        Tag::TrackArtistMain => set_role(tags, true, ArtistRole::Main, values),
        Tag::TrackArtistGuest => set_role(tags, true, ArtistRole::Guest, values),
        Tag::TrackArtistRemixer => set_role(tags, true, ArtistRole::Remixer, values),
        Tag::TrackArtistProducer => set_role(tags, true, ArtistRole::Producer, values),
        Tag::TrackArtistComposer => set_role(tags, true, ArtistRole::Composer, values),
        Tag::TrackArtistConductor => set_role(tags, true, ArtistRole::Conductor, values),
        Tag::TrackArtistDjMixer => set_role(tags, true, ArtistRole::DjMixer, values),
        Tag::ReleaseArtistMain => set_role(tags, false, ArtistRole::Main, values),
        Tag::ReleaseArtistGuest => set_role(tags, false, ArtistRole::Guest, values),
        Tag::ReleaseArtistRemixer => set_role(tags, false, ArtistRole::Remixer, values),
        Tag::ReleaseArtistProducer => set_role(tags, false, ArtistRole::Producer, values),
        Tag::ReleaseArtistComposer => set_role(tags, false, ArtistRole::Composer, values),
        Tag::ReleaseArtistConductor => set_role(tags, false, ArtistRole::Conductor, values),
        Tag::ReleaseArtistDjMixer => set_role(tags, false, ArtistRole::DjMixer, values),
        Tag::TrackTotal | Tag::DiscTotal | Tag::New => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::parser::{Action, Matcher, Pattern, Rule, Tag};

    fn values(xs: &[&str]) -> Vec<String> {
        xs.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_matches_pattern_substring() {
        let pattern = Pattern::new("hello".to_string());
        assert!(matches_pattern(&values(&["hello world"]), &pattern, &Tag::TrackTitle).unwrap());
        assert!(matches_pattern(&values(&["say hello"]), &pattern, &Tag::TrackTitle).unwrap());
        assert!(!matches_pattern(&values(&["hi world"]), &pattern, &Tag::TrackTitle).unwrap());
    }

    #[test]
    fn test_matches_pattern_strict_start() {
        let pattern = Pattern::new("^hello".to_string());
        assert!(matches_pattern(&values(&["hello world"]), &pattern, &Tag::TrackTitle).unwrap());
        assert!(!matches_pattern(&values(&["say hello"]), &pattern, &Tag::TrackTitle).unwrap());
    }

    #[test]
    fn test_matches_pattern_strict_end() {
        let pattern = Pattern::new("world$".to_string());
        assert!(matches_pattern(&values(&["hello world"]), &pattern, &Tag::TrackTitle).unwrap());
        assert!(!matches_pattern(&values(&["world hello"]), &pattern, &Tag::TrackTitle).unwrap());
    }

    #[test]
    fn test_matches_pattern_case_insensitive_flag() {
        let mut pattern = Pattern::new("hello".to_string());
        pattern.case_insensitive = true;
        assert!(matches_pattern(&values(&["HELLO world"]), &pattern, &Tag::TrackTitle).unwrap());
        assert!(matches_pattern(&values(&["Hello World"]), &pattern, &Tag::TrackTitle).unwrap());
    }

    #[test]
    fn test_matches_pattern_genre_always_case_insensitive() {
        let pattern = Pattern::new("rock".to_string());
        assert!(matches_pattern(&values(&["Rock"]), &pattern, &Tag::Genre).unwrap());
        assert!(matches_pattern(&values(&["ROCK"]), &pattern, &Tag::Genre).unwrap());
        assert!(!matches_pattern(&values(&["Rock"]), &pattern, &Tag::TrackTitle).unwrap());
    }

    #[test]
    fn test_matches_pattern_multi_value() {
        let pattern = Pattern::new("rock".to_string());
        assert!(matches_pattern(&values(&["pop", "rock", "jazz"]), &pattern, &Tag::Genre).unwrap());
        assert!(!matches_pattern(&values(&["pop", "jazz"]), &pattern, &Tag::Genre).unwrap());
    }

    #[test]
    fn test_transform_replace() {
        let rule = Rule::parse("genre:Rock", vec!["replace:Rock & Roll"]).unwrap();
        let out = transform_values(&values(&["Rock", "Pop"]), &rule.actions[0], Tag::Genre).unwrap();
        assert_eq!(out, values(&["Rock & Roll", "Pop"]));
    }

    #[test]
    fn test_transform_replace_is_idempotent() {
        let rule = Rule::parse("genre:^Rock$", vec!["replace:Rock"]).unwrap();
        let action = &rule.actions[0];
        let once = transform_values(&values(&["Rock", "Pop"]), action, Tag::Genre).unwrap();
        let twice = transform_values(&once, action, Tag::Genre).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_transform_sed() {
        let rule = Rule::parse("tracktitle:Track", vec![r"sed:Track:Trap"]).unwrap();
        let out =
            transform_values(&values(&["Track 1"]), &rule.actions[0], Tag::TrackTitle).unwrap();
        assert_eq!(out, values(&["Trap 1"]));
    }

    #[test]
    fn test_transform_split_trims_and_drops_empty() {
        let rule = Rule::parse("label:;", vec!["split:;"]).unwrap();
        let out = transform_values(
            &values(&["A Label; Another Label;"]),
            &rule.actions[0],
            Tag::Label,
        )
        .unwrap();
        assert_eq!(out, values(&["A Label", "Another Label"]));
    }

    #[test]
    fn test_transform_add_is_idempotent() {
        let rule = Rule::parse("genre:Rock", vec!["add:Pop"]).unwrap();
        let action = &rule.actions[0];
        let once = transform_values(&values(&["Rock"]), action, Tag::Genre).unwrap();
        assert_eq!(once, values(&["Rock", "Pop"]));
        let twice = transform_values(&once, action, Tag::Genre).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_transform_delete_with_pattern_removes_matching_values_only() {
        let rule = Rule::parse("genre:^Rock$", vec!["delete"]).unwrap();
        let out =
            transform_values(&values(&["Rock", "Pop"]), &rule.actions[0], Tag::Genre).unwrap();
        assert_eq!(out, values(&["Pop"]));
    }

    #[test]
    fn test_transform_delete_without_pattern_removes_tag() {
        let action = Action::parse("genre/delete", 1, None).unwrap();
        let out = transform_values(&values(&["Rock", "Pop"]), &action, Tag::Genre).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_apply_actions_to_tags_reports_diffs() {
        let mut tags = AudioTags::empty(std::path::Path::new("/dev/null/track.flac"));
        tags.genre = values(&["Rock", "Pop"]);
        let rule = Rule::parse("genre:Rock", vec!["replace:Rock & Roll"]).unwrap();
        let mut new_flag = None;
        let diffs = apply_actions_to_tags(&mut tags, &rule.actions, &mut new_flag).unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].tag, Tag::Genre);
        assert_eq!(diffs[0].old, values(&["Rock", "Pop"]));
        assert_eq!(diffs[0].new, values(&["Rock & Roll", "Pop"]));
        assert_eq!(tags.genre, values(&["Rock & Roll", "Pop"]));
        assert!(new_flag.is_none());
    }

    #[test]
    fn test_new_pseudo_tag_goes_to_the_flag() {
        let mut tags = AudioTags::empty(std::path::Path::new("/dev/null/track.flac"));
        let rule = Rule::parse("new:true", vec!["replace:false"]).unwrap();
        let mut new_flag = None;
        let diffs = apply_actions_to_tags(&mut tags, &rule.actions, &mut new_flag).unwrap();
        assert!(diffs.is_empty());
        assert_eq!(new_flag, Some(false));
    }

    #[test]
    fn test_fts_column_covers_artists() {
        assert_eq!(fts_column(Tag::TrackArtistGuest), Some("trackartist"));
        assert_eq!(fts_column(Tag::ReleaseArtistMain), Some("releaseartist"));
        assert_eq!(fts_column(Tag::TrackTotal), None);
    }

    #[test]
    fn test_matcher_display_round_trip() {
        let matcher = Matcher::parse("tracktitle,genre:Track:i").unwrap();
        assert_eq!(Matcher::parse(&matcher.to_string()).unwrap(), matcher);
    }
}
