// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Support for MP4 atoms.

#![cfg(feature = "mp4")]

use crate::common::{normalize_releasetype, PartialDate};
use crate::error::ExpectedError;
use crate::tag::{
    format_artist_string, format_genre_tag, invalid_file_format, parse_artist_string,
    split_genre_tag, split_tag, AudioTags,
};
use crate::{Config, Result};
use mp4ameta::{Data, Fourcc, FreeformIdent};
use std::path::Path;

/// `©nam`
const TITLE: Fourcc = Fourcc(*b"\xa9nam");
/// `©alb`
const ALBUM: Fourcc = Fourcc(*b"\xa9alb");
/// `©ART`
const ARTIST: Fourcc = Fourcc(*b"\xa9ART");
/// `aART`
const ALBUM_ARTIST: Fourcc = Fourcc(*b"aART");
/// `©day`
const DAY: Fourcc = Fourcc(*b"\xa9day");
/// `©gen`
const GENRE: Fourcc = Fourcc(*b"\xa9gen");
/// `©pub`
const PUBLISHER: Fourcc = Fourcc(*b"\xa9pub");
/// `©wrt`
const COMPOSER: Fourcc = Fourcc(*b"\xa9wrt");

/// The freeform namespace custom fields are written under.
const ITUNES_MEAN: &str = "com.apple.iTunes";
/// A legacy freeform namespace accepted on read.
const LEGACY_MEAN: &str = "net.sunsetglow.rose";

/// Read the canonical record from an MP4 file's atoms.
pub fn read(path: &Path) -> Result<AudioTags> {
    let tag = mp4ameta::Tag::read_from_path(path).map_err(|e| invalid_file_format(path, e))?;

    let mut tags = AudioTags::empty(path);
    tags.id = freeform(&tag, &["ROSEID", "ID"]);
    tags.release_id = freeform(&tag, &["ROSERELEASEID", "RELEASEID"]);
    tags.tracktitle = fourcc(&tag, TITLE);
    tags.releasedate = PartialDate::parse(fourcc(&tag, DAY).as_deref());
    tags.originaldate =
        PartialDate::parse(freeform(&tag, &["ORIGINALDATE", "ORIGINALYEAR"]).as_deref());
    tags.compositiondate = PartialDate::parse(freeform(&tag, &["COMPOSITIONDATE"]).as_deref());
    tags.tracknumber = tag.track_number().map(|n| n.to_string());
    tags.tracktotal = tag.total_tracks().map(u32::from);
    tags.discnumber = tag.disc_number().map(|n| n.to_string());
    tags.disctotal = tag.total_discs().map(u32::from);
    tags.releasetitle = fourcc(&tag, ALBUM);
    tags.genre = split_genre_tag(fourcc(&tag, GENRE).as_deref());
    tags.secondarygenre = split_genre_tag(freeform(&tag, &["SECONDARYGENRE"]).as_deref());
    tags.descriptor = split_tag(freeform(&tag, &["DESCRIPTOR"]).as_deref());
    tags.label = split_tag(fourcc(&tag, PUBLISHER).or_else(|| freeform(&tag, &["LABEL"])).as_deref());
    tags.catalognumber = freeform(&tag, &["CATALOGNUMBER"]);
    tags.edition = freeform(&tag, &["EDITION"]);
    tags.releasetype = normalize_releasetype(
        freeform(&tag, &["RELEASETYPE", "MusicBrainz Album Type"]).as_deref(),
    );
    tags.releaseartists =
        parse_artist_string(fourcc(&tag, ALBUM_ARTIST).as_deref(), None, None, None, None, None);
    tags.trackartists = parse_artist_string(
        fourcc(&tag, ARTIST).as_deref(),
        freeform(&tag, &["REMIXER"]).as_deref(),
        fourcc(&tag, COMPOSER).as_deref(),
        freeform(&tag, &["CONDUCTOR"]).as_deref(),
        freeform(&tag, &["PRODUCER"]).as_deref(),
        freeform(&tag, &["DJMIXER"]).as_deref(),
    );
    tags.duration_sec =
        u32::try_from(tag.duration().map(|d| d.as_secs()).unwrap_or(0)).unwrap_or(u32::MAX);
    Ok(tags)
}

/// Write the canonical record back into the MP4 file.
pub fn write(tags: &AudioTags, config: &Config) -> Result<()> {
    let mut tag =
        mp4ameta::Tag::read_from_path(&tags.path).map_err(|e| invalid_file_format(&tags.path, e))?;

    set_freeform(&mut tag, "ROSEID", tags.id.clone());
    set_freeform(&mut tag, "ROSERELEASEID", tags.release_id.clone());
    set_fourcc(&mut tag, TITLE, tags.tracktitle.clone());
    set_fourcc(&mut tag, DAY, tags.releasedate.map(|d| d.to_string()));
    set_freeform(&mut tag, "ORIGINALDATE", tags.originaldate.map(|d| d.to_string()));
    set_freeform(&mut tag, "COMPOSITIONDATE", tags.compositiondate.map(|d| d.to_string()));
    set_fourcc(&mut tag, ALBUM, tags.releasetitle.clone());
    set_fourcc(&mut tag, GENRE, non_empty(format_genre_tag(config, &tags.genre)));
    set_freeform(
        &mut tag,
        "SECONDARYGENRE",
        non_empty(format_genre_tag(config, &tags.secondarygenre)),
    );
    set_freeform(&mut tag, "DESCRIPTOR", non_empty(tags.descriptor.join(";")));
    set_fourcc(&mut tag, PUBLISHER, non_empty(tags.label.join(";")));
    set_freeform(&mut tag, "CATALOGNUMBER", tags.catalognumber.clone());
    set_freeform(&mut tag, "EDITION", tags.edition.clone());
    set_freeform(&mut tag, "RELEASETYPE", Some(tags.releasetype.clone()));
    set_fourcc(&mut tag, ALBUM_ARTIST, non_empty(format_artist_string(&tags.releaseartists)));
    set_fourcc(&mut tag, ARTIST, non_empty(format_artist_string(&tags.trackartists)));
    // The full role structure is encoded in the main artist atom; wipe the per-role atoms.
    tag.remove_data_of(&COMPOSER);
    for name in ["REMIXER", "PRODUCER", "CONDUCTOR", "DJMIXER"] {
        tag.remove_data_of(&FreeformIdent::new(ITUNES_MEAN, name));
        tag.remove_data_of(&FreeformIdent::new(LEGACY_MEAN, name));
    }

    // `trkn`/`disk` hold 16-bit pairs. The totals are preserved as-is (the cache derives its own
    // totals); the numbers must be integers that fit the atom.
    if let Some(number) = parse_atom_number(&tags.path, tags.tracknumber.as_deref())? {
        tag.set_track_number(number);
    }
    if let Some(number) = parse_atom_number(&tags.path, tags.discnumber.as_deref())? {
        tag.set_disc_number(number);
    }

    tag.write_to_path(&tags.path)?;
    Ok(())
}

/// The first non-empty string stored under the fourcc atom.
fn fourcc(tag: &mp4ameta::Tag, ident: Fourcc) -> Option<String> {
    let values: Vec<&str> = tag.data_of(&ident).filter_map(Data::string).collect();
    Some(values.join(r" \\ ")).filter(|v| !v.is_empty())
}

/// The first non-empty string stored under any of the freeform names, in either namespace.
fn freeform(tag: &mp4ameta::Tag, names: &[&str]) -> Option<String> {
    for name in names {
        for mean in [ITUNES_MEAN, LEGACY_MEAN] {
            let ident = FreeformIdent::new(mean, name);
            let values: Vec<&str> = tag.data_of(&ident).filter_map(Data::string).collect();
            let joined = values.join(r" \\ ");
            if !joined.is_empty() {
                return Some(joined);
            }
        }
    }
    None
}

/// Replace the string data of a fourcc atom, removing it when the value is absent.
fn set_fourcc(tag: &mut mp4ameta::Tag, ident: Fourcc, value: Option<String>) {
    tag.remove_data_of(&ident);
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        tag.set_data(ident, Data::Utf8(value));
    }
}

/// Replace a freeform atom in the iTunes namespace, clearing any legacy-namespace copy.
fn set_freeform(tag: &mut mp4ameta::Tag, name: &str, value: Option<String>) {
    tag.remove_data_of(&FreeformIdent::new(ITUNES_MEAN, name));
    tag.remove_data_of(&FreeformIdent::new(LEGACY_MEAN, name));
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        tag.set_data(FreeformIdent::new(ITUNES_MEAN, name), Data::Utf8(value));
    }
}

/// Parse a track/disc number for the 16-bit `trkn`/`disk` atoms.
fn parse_atom_number(path: &Path, value: Option<&str>) -> Result<Option<u16>> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty() && *v != "None") else {
        return Ok(None);
    };
    value.parse::<u16>().map(Some).map_err(|_| {
        ExpectedError::UnsupportedTagValue(format!(
            "Could not write m4a track/disc number to {}: must be an integer, got {value:?}",
            path.display()
        ))
        .into()
    })
}

/// Treat an empty formatted string as an absent value.
fn non_empty(value: String) -> Option<String> {
    Some(value).filter(|v| !v.is_empty())
}
