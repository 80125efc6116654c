// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Support for ID3 tags.

#![cfg(feature = "id3")]

use crate::common::{normalize_releasetype, PartialDate};
use crate::tag::{
    format_artist_string, format_genre_tag, invalid_file_format, parse_artist_string,
    parse_int_tag, split_genre_tag, split_tag, AudioTags,
};
use crate::{Config, Result};
use id3::frame::ExtendedText;
use id3::{Frame, TagLike};
use std::path::Path;

/// Read the canonical record from an MP3 file's ID3v2 tag.
pub fn read(path: &Path) -> Result<AudioTags> {
    let tag = read_tag(path)?;

    // ID3 returns track/disc numbers as `no/total`. We have to parse.
    let (tracknumber, tracktotal) = split_paired_number(text(&tag, "TRCK"));
    let (discnumber, disctotal) = split_paired_number(text(&tag, "TPOS"));

    let mut tags = AudioTags::empty(path);
    tags.id = extended_text(&tag, "ROSEID");
    tags.release_id = extended_text(&tag, "ROSERELEASEID");
    tags.tracktitle = text(&tag, "TIT2");
    tags.releasedate =
        PartialDate::parse(text(&tag, "TDRC").or_else(|| text(&tag, "TYER")).as_deref());
    tags.originaldate =
        PartialDate::parse(text(&tag, "TDOR").or_else(|| text(&tag, "TORY")).as_deref());
    tags.compositiondate = PartialDate::parse(extended_text(&tag, "COMPOSITIONDATE").as_deref());
    tags.tracknumber = tracknumber;
    tags.tracktotal = tracktotal;
    tags.discnumber = discnumber;
    tags.disctotal = disctotal;
    tags.releasetitle = text(&tag, "TALB");
    tags.genre = split_genre_tag(text(&tag, "TCON").as_deref());
    tags.secondarygenre = split_genre_tag(extended_text(&tag, "SECONDARYGENRE").as_deref());
    tags.descriptor = split_tag(extended_text(&tag, "DESCRIPTOR").as_deref());
    tags.label = split_tag(text(&tag, "TPUB").as_deref());
    tags.catalognumber = extended_text(&tag, "CATALOGNUMBER");
    tags.edition = extended_text(&tag, "EDITION");
    tags.releasetype = normalize_releasetype(
        extended_text(&tag, "RELEASETYPE")
            .or_else(|| extended_text(&tag, "MusicBrainz Album Type"))
            .as_deref(),
    );
    tags.releaseartists =
        parse_artist_string(text(&tag, "TPE2").as_deref(), None, None, None, None, None);
    tags.trackartists = parse_artist_string(
        text(&tag, "TPE1").as_deref(),
        text(&tag, "TPE4").as_deref(),
        text(&tag, "TCOM").as_deref(),
        text(&tag, "TPE3").as_deref(),
        paired_frame_people(&tag, "producer").as_deref(),
        paired_frame_people(&tag, "DJ-mix").as_deref(),
    );
    tags.duration_sec = duration_sec(path);
    Ok(tags)
}

/// Write the canonical record back into the MP3 file.
pub fn write(tags: &AudioTags, config: &Config) -> Result<()> {
    let mut tag = read_tag(&tags.path)?;

    set_extended_text(&mut tag, "ROSEID", tags.id.clone());
    set_extended_text(&mut tag, "ROSERELEASEID", tags.release_id.clone());
    set_text(&mut tag, "TIT2", tags.tracktitle.clone());
    set_text(&mut tag, "TDRC", tags.releasedate.map(|d| d.to_string()));
    set_text(&mut tag, "TDOR", tags.originaldate.map(|d| d.to_string()));
    set_extended_text(
        &mut tag,
        "COMPOSITIONDATE",
        tags.compositiondate.map(|d| d.to_string()),
    );
    set_text(&mut tag, "TRCK", tags.tracknumber.clone());
    set_text(&mut tag, "TPOS", tags.discnumber.clone());
    set_text(&mut tag, "TALB", tags.releasetitle.clone());
    set_text(&mut tag, "TCON", non_empty(format_genre_tag(config, &tags.genre)));
    set_extended_text(
        &mut tag,
        "SECONDARYGENRE",
        non_empty(format_genre_tag(config, &tags.secondarygenre)),
    );
    set_extended_text(&mut tag, "DESCRIPTOR", non_empty(tags.descriptor.join(";")));
    set_text(&mut tag, "TPUB", non_empty(tags.label.join(";")));
    set_extended_text(&mut tag, "CATALOGNUMBER", tags.catalognumber.clone());
    set_extended_text(&mut tag, "EDITION", tags.edition.clone());
    set_extended_text(&mut tag, "RELEASETYPE", Some(tags.releasetype.clone()));
    set_text(&mut tag, "TPE2", non_empty(format_artist_string(&tags.releaseartists)));
    set_text(&mut tag, "TPE1", non_empty(format_artist_string(&tags.trackartists)));
    // The full role structure is encoded in the main artist tag. Wipe the per-role frames and
    // the involved-people lists so stale credits do not resurface on the next read.
    for id in ["TPE4", "TCOM", "TPE3", "TIPL", "IPLS"] {
        let _removed = tag.remove(id);
    }

    tag.write_to_path(&tags.path, id3::Version::Id3v24)?;
    Ok(())
}

/// Read the ID3 tag, tolerating files whose tail is damaged but whose tag parses partially.
fn read_tag(path: &Path) -> Result<id3::Tag> {
    match id3::Tag::read_from_path(path) {
        Ok(tag) => Ok(tag),
        Err(err) if matches!(err.kind, id3::ErrorKind::NoTag) => Ok(id3::Tag::new()),
        Err(err) => match err.partial_tag {
            Some(tag) => Ok(tag),
            None => Err(invalid_file_format(path, err)),
        },
    }
}

/// The content of a text frame, with ID3v2.4 null-separated lists joined for the splitter.
fn text(tag: &id3::Tag, id: &str) -> Option<String> {
    tag.get(id)
        .and_then(|frame| frame.content().text())
        .map(|t| t.split('\0').collect::<Vec<_>>().join(r" \\ "))
        .filter(|t| !t.is_empty())
}

/// The value of a `TXXX` frame with the given description.
fn extended_text(tag: &id3::Tag, description: &str) -> Option<String> {
    tag.extended_texts()
        .find(|t| t.description == description)
        .map(|t| t.value.trim_end_matches('\0').to_string())
        .filter(|t| !t.is_empty())
}

/// Replace a text frame, removing it when the value is absent.
fn set_text(tag: &mut id3::Tag, id: &str, value: Option<String>) {
    let _removed = tag.remove(id);
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        let _replaced = tag.add_frame(Frame::text(id, value));
    }
}

/// Replace the `TXXX` frame with the given description, preserving sibling `TXXX` frames.
fn set_extended_text(tag: &mut id3::Tag, description: &str, value: Option<String>) {
    let keep: Vec<ExtendedText> = tag
        .extended_texts()
        .filter(|t| t.description != description)
        .cloned()
        .collect();
    let _removed = tag.remove("TXXX");
    for frame in keep {
        let _replaced = tag.add_frame(frame);
    }
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        let _replaced = tag.add_frame(ExtendedText {
            description: description.to_string(),
            value,
        });
    }
}

/// Split a `no/total` pair as found in `TRCK`/`TPOS`.
fn split_paired_number(value: Option<String>) -> (Option<String>, Option<u32>) {
    let Some(value) = value else {
        return (None, None);
    };
    match value.split_once('/') {
        Some((number, total)) => (Some(number.to_string()), parse_int_tag(Some(total))),
        None => (Some(value), None),
    }
}

/// Extract the people credited with `role` from the involved-people lists (`TIPL`/`IPLS`).
///
/// The frame text alternates role and name, null-separated.
fn paired_frame_people(tag: &id3::Tag, role: &str) -> Option<String> {
    for id in ["TIPL", "IPLS"] {
        let Some(text) = tag.get(id).and_then(|frame| frame.content().text()) else {
            continue;
        };
        let fields: Vec<&str> = text.split('\0').collect();
        let people: Vec<&str> = fields
            .chunks_exact(2)
            .filter(|pair| pair[0].eq_ignore_ascii_case(role))
            .map(|pair| pair[1])
            .collect();
        return Some(people.join(r" \\ ")).filter(|p| !p.is_empty());
    }
    None
}

/// Scan the MPEG frames for the track duration. Failure is not an error: the duration is
/// informational and a truncated file should still surface its tags.
fn duration_sec(path: &Path) -> u32 {
    match mp3_duration::from_path(path) {
        Ok(duration) => u32::try_from(duration.as_secs()).unwrap_or(u32::MAX),
        Err(err) => {
            log::warn!("Failed to read duration of {}: {err}", path.display());
            0
        }
    }
}

/// Treat an empty formatted string as an absent value.
fn non_empty(value: String) -> Option<String> {
    Some(value).filter(|v| !v.is_empty())
}
