// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Support for Vorbis comments in Ogg containers (Vorbis and Opus streams).
//!
//! Both streams carry the same comment block; the container is probed so that `.ogg` files
//! holding an Opus stream are handled transparently.

#![cfg(feature = "ogg")]

use crate::common::{normalize_releasetype, PartialDate};
use crate::tag::{
    format_artist_string, format_genre_tag, invalid_file_format, parse_artist_string,
    parse_int_tag, split_genre_tag, split_tag, AudioTags,
};
use crate::{Config, Result};
use lofty::config::WriteOptions;
use lofty::file::TaggedFileExt;
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, Tag, TagType};
use std::path::Path;

/// Read the canonical record from an Ogg file's Vorbis comments.
pub fn read(path: &Path) -> Result<AudioTags> {
    let tagged = Probe::open(path)
        .and_then(lofty::probe::Probe::read)
        .map_err(|e| invalid_file_format(path, e))?;
    let duration_sec =
        u32::try_from(tagged.properties().duration().as_secs()).unwrap_or(u32::MAX);
    let empty = Tag::new(TagType::VorbisComments);
    let tag = tagged.tag(TagType::VorbisComments).unwrap_or(&empty);

    let mut tags = AudioTags::empty(path);
    tags.id = first(tag, "ROSEID");
    tags.release_id = first(tag, "ROSERELEASEID");
    tags.tracktitle = joined(tag, &["TITLE"]);
    tags.releasedate = PartialDate::parse(joined(tag, &["DATE", "YEAR"]).as_deref());
    tags.originaldate =
        PartialDate::parse(joined(tag, &["ORIGINALDATE", "ORIGINALYEAR"]).as_deref());
    tags.compositiondate = PartialDate::parse(joined(tag, &["COMPOSITIONDATE"]).as_deref());
    tags.tracknumber = first(tag, "TRACKNUMBER");
    tags.tracktotal = parse_int_tag(first(tag, "TRACKTOTAL").as_deref());
    tags.discnumber = first(tag, "DISCNUMBER");
    tags.disctotal = parse_int_tag(first(tag, "DISCTOTAL").as_deref());
    tags.releasetitle = joined(tag, &["ALBUM"]);
    tags.genre = split_genre_tag(joined(tag, &["GENRE"]).as_deref());
    tags.secondarygenre = split_genre_tag(joined(tag, &["SECONDARYGENRE"]).as_deref());
    tags.descriptor = split_tag(joined(tag, &["DESCRIPTOR"]).as_deref());
    tags.label = split_tag(joined(tag, &["ORGANIZATION", "LABEL", "RECORDLABEL"]).as_deref());
    tags.catalognumber = first(tag, "CATALOGNUMBER");
    tags.edition = first(tag, "EDITION");
    tags.releasetype = normalize_releasetype(first(tag, "RELEASETYPE").as_deref());
    tags.releaseartists =
        parse_artist_string(joined(tag, &["ALBUMARTIST"]).as_deref(), None, None, None, None, None);
    tags.trackartists = parse_artist_string(
        joined(tag, &["ARTIST"]).as_deref(),
        joined(tag, &["REMIXER"]).as_deref(),
        joined(tag, &["COMPOSER"]).as_deref(),
        joined(tag, &["CONDUCTOR"]).as_deref(),
        joined(tag, &["PRODUCER"]).as_deref(),
        joined(tag, &["DJMIXER"]).as_deref(),
    );
    tags.duration_sec = duration_sec;
    Ok(tags)
}

/// Write the canonical record back into the Ogg file, leaving unrelated comments untouched.
pub fn write(tags: &AudioTags, config: &Config) -> Result<()> {
    let mut tagged = Probe::open(&tags.path)
        .and_then(lofty::probe::Probe::read)
        .map_err(|e| invalid_file_format(&tags.path, e))?;
    let mut tag = tagged
        .remove(TagType::VorbisComments)
        .unwrap_or_else(|| Tag::new(TagType::VorbisComments));

    set(&mut tag, "ROSEID", tags.id.clone());
    set(&mut tag, "ROSERELEASEID", tags.release_id.clone());
    set(&mut tag, "TITLE", tags.tracktitle.clone());
    set(&mut tag, "DATE", tags.releasedate.map(|d| d.to_string()));
    set(&mut tag, "ORIGINALDATE", tags.originaldate.map(|d| d.to_string()));
    set(&mut tag, "COMPOSITIONDATE", tags.compositiondate.map(|d| d.to_string()));
    set(&mut tag, "TRACKNUMBER", tags.tracknumber.clone());
    set(&mut tag, "DISCNUMBER", tags.discnumber.clone());
    set(&mut tag, "ALBUM", tags.releasetitle.clone());
    set(&mut tag, "GENRE", non_empty(format_genre_tag(config, &tags.genre)));
    set(
        &mut tag,
        "SECONDARYGENRE",
        non_empty(format_genre_tag(config, &tags.secondarygenre)),
    );
    set(&mut tag, "DESCRIPTOR", non_empty(tags.descriptor.join(";")));
    set(&mut tag, "ORGANIZATION", non_empty(tags.label.join(";")));
    set(&mut tag, "CATALOGNUMBER", tags.catalognumber.clone());
    set(&mut tag, "EDITION", tags.edition.clone());
    set(&mut tag, "RELEASETYPE", Some(tags.releasetype.clone()));
    set(&mut tag, "ALBUMARTIST", non_empty(format_artist_string(&tags.releaseartists)));
    set(&mut tag, "ARTIST", non_empty(format_artist_string(&tags.trackartists)));
    // The full role structure lives in the main artist comment; wipe the per-role comments.
    for name in ["REMIXER", "PRODUCER", "COMPOSER", "CONDUCTOR", "DJMIXER"] {
        set(&mut tag, name, None);
    }

    tag.save_to_path(&tags.path, WriteOptions::default())?;
    Ok(())
}

/// The [`ItemKey`] that lofty files the given Vorbis comment key under.
fn item_key(name: &str) -> ItemKey {
    ItemKey::from_key(TagType::VorbisComments, name)
}

/// The first non-empty value stored under the comment key.
fn first(tag: &Tag, name: &str) -> Option<String> {
    tag.get_strings(&item_key(name))
        .find(|v| !v.is_empty())
        .map(String::from)
}

/// All values for the first key that has any, joined for the splitter.
fn joined(tag: &Tag, names: &[&str]) -> Option<String> {
    for name in names {
        let key = item_key(name);
        let values: Vec<&str> = tag.get_strings(&key).collect();
        let joined = values.join(r" \\ ");
        if !joined.is_empty() {
            return Some(joined);
        }
    }
    None
}

/// Replace the values of a comment key, removing it when the value is absent.
fn set(tag: &mut Tag, name: &str, value: Option<String>) {
    let key = item_key(name);
    tag.take(&key).for_each(drop);
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        let _replaced = tag.insert_text(key, value);
    }
}

/// Treat an empty formatted string as an absent value.
fn non_empty(value: String) -> Option<String> {
    Some(value).filter(|v| !v.is_empty())
}
