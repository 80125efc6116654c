// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Support for FLAC tags.

#![cfg(feature = "flac")]

use crate::common::{normalize_releasetype, PartialDate};
use crate::tag::{
    format_artist_string, format_genre_tag, invalid_file_format, parse_artist_string,
    parse_int_tag, split_genre_tag, split_tag, AudioTags,
};
use crate::{Config, Result};
use std::path::Path;

/// Read the canonical record from a FLAC file's Vorbis comment block.
pub fn read(path: &Path) -> Result<AudioTags> {
    let tag = metaflac::Tag::read_from_path(path).map_err(|e| invalid_file_format(path, e))?;

    let mut tags = AudioTags::empty(path);
    tags.id = first(&tag, &["ROSEID"]);
    tags.release_id = first(&tag, &["ROSERELEASEID"]);
    tags.tracktitle = joined(&tag, &["TITLE"]);
    tags.releasedate = PartialDate::parse(joined(&tag, &["DATE", "YEAR"]).as_deref());
    tags.originaldate =
        PartialDate::parse(joined(&tag, &["ORIGINALDATE", "ORIGINALYEAR"]).as_deref());
    tags.compositiondate = PartialDate::parse(joined(&tag, &["COMPOSITIONDATE"]).as_deref());
    tags.tracknumber = first(&tag, &["TRACKNUMBER"]);
    tags.tracktotal = parse_int_tag(first(&tag, &["TRACKTOTAL", "TOTALTRACKS"]).as_deref());
    tags.discnumber = first(&tag, &["DISCNUMBER"]);
    tags.disctotal = parse_int_tag(first(&tag, &["DISCTOTAL", "TOTALDISCS"]).as_deref());
    tags.releasetitle = joined(&tag, &["ALBUM"]);
    tags.genre = split_genre_tag(joined(&tag, &["GENRE"]).as_deref());
    tags.secondarygenre = split_genre_tag(joined(&tag, &["SECONDARYGENRE"]).as_deref());
    tags.descriptor = split_tag(joined(&tag, &["DESCRIPTOR"]).as_deref());
    tags.label = split_tag(joined(&tag, &["ORGANIZATION", "LABEL", "RECORDLABEL"]).as_deref());
    tags.catalognumber = first(&tag, &["CATALOGNUMBER"]);
    tags.edition = first(&tag, &["EDITION"]);
    tags.releasetype = normalize_releasetype(first(&tag, &["RELEASETYPE"]).as_deref());
    tags.releaseartists =
        parse_artist_string(joined(&tag, &["ALBUMARTIST"]).as_deref(), None, None, None, None, None);
    tags.trackartists = parse_artist_string(
        joined(&tag, &["ARTIST"]).as_deref(),
        joined(&tag, &["REMIXER"]).as_deref(),
        joined(&tag, &["COMPOSER"]).as_deref(),
        joined(&tag, &["CONDUCTOR"]).as_deref(),
        joined(&tag, &["PRODUCER"]).as_deref(),
        joined(&tag, &["DJMIXER"]).as_deref(),
    );
    tags.duration_sec = duration_sec(&tag);
    Ok(tags)
}

/// Write the canonical record back into the FLAC file, leaving unrelated comments untouched.
pub fn write(tags: &AudioTags, config: &Config) -> Result<()> {
    let mut tag =
        metaflac::Tag::read_from_path(&tags.path).map_err(|e| invalid_file_format(&tags.path, e))?;

    set(&mut tag, "ROSEID", tags.id.clone().unwrap_or_default());
    set(&mut tag, "ROSERELEASEID", tags.release_id.clone().unwrap_or_default());
    set(&mut tag, "TITLE", tags.tracktitle.clone().unwrap_or_default());
    set(&mut tag, "DATE", date_string(tags.releasedate));
    set(&mut tag, "ORIGINALDATE", date_string(tags.originaldate));
    set(&mut tag, "COMPOSITIONDATE", date_string(tags.compositiondate));
    set(&mut tag, "TRACKNUMBER", tags.tracknumber.clone().unwrap_or_default());
    set(&mut tag, "DISCNUMBER", tags.discnumber.clone().unwrap_or_default());
    set(&mut tag, "ALBUM", tags.releasetitle.clone().unwrap_or_default());
    set(&mut tag, "GENRE", format_genre_tag(config, &tags.genre));
    set(&mut tag, "SECONDARYGENRE", format_genre_tag(config, &tags.secondarygenre));
    set(&mut tag, "DESCRIPTOR", tags.descriptor.join(";"));
    set(&mut tag, "ORGANIZATION", tags.label.join(";"));
    set(&mut tag, "CATALOGNUMBER", tags.catalognumber.clone().unwrap_or_default());
    set(&mut tag, "EDITION", tags.edition.clone().unwrap_or_default());
    set(&mut tag, "RELEASETYPE", tags.releasetype.clone());
    set(&mut tag, "ALBUMARTIST", format_artist_string(&tags.releaseartists));
    set(&mut tag, "ARTIST", format_artist_string(&tags.trackartists));
    // The full role structure lives in the main artist tag. Wipe the per-role tags so a stale
    // remixer does not reappear on the next read.
    for key in ["REMIXER", "PRODUCER", "COMPOSER", "CONDUCTOR", "DJMIXER"] {
        remove(&mut tag, key);
    }

    tag.save()?;
    Ok(())
}

/// All values for the first key that has any, case-insensitively.
fn values(tag: &metaflac::Tag, keys: &[&str]) -> Vec<String> {
    let Some(comments) = tag.vorbis_comments() else {
        return Vec::new();
    };
    for key in keys {
        let matched: Vec<String> = comments
            .comments
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(key))
            .flat_map(|(_, vs)| vs.iter().cloned())
            .collect();
        if !matched.is_empty() {
            return matched;
        }
    }
    Vec::new()
}

/// The first value for the first key that has any.
fn first(tag: &metaflac::Tag, keys: &[&str]) -> Option<String> {
    values(tag, keys).into_iter().next().filter(|v| !v.is_empty())
}

/// Repeated comments joined with the multi-value separator, so the splitter sees them all.
fn joined(tag: &metaflac::Tag, keys: &[&str]) -> Option<String> {
    Some(values(tag, keys).join(r" \\ ")).filter(|v| !v.is_empty())
}

/// Replace every case-variant of `key` with a single value.
fn set(tag: &mut metaflac::Tag, key: &str, value: String) {
    remove(tag, key);
    tag.set_vorbis(key, vec![value]);
}

/// Remove every case-variant of `key`.
fn remove(tag: &mut metaflac::Tag, key: &str) {
    let variants: Vec<String> = tag
        .vorbis_comments()
        .map(|c| {
            c.comments
                .keys()
                .filter(|k| k.eq_ignore_ascii_case(key))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    for variant in variants {
        tag.remove_vorbis(&variant);
    }
}

/// Track duration from the stream info block, rounded down to whole seconds.
fn duration_sec(tag: &metaflac::Tag) -> u32 {
    tag.get_streaminfo()
        .filter(|s| s.sample_rate > 0)
        .map(|s| u32::try_from(s.total_samples / u64::from(s.sample_rate)).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

/// Render an optional date, writing the empty string for absent dates.
fn date_string(date: Option<PartialDate>) -> String {
    date.map(|d| d.to_string()).unwrap_or_default()
}
