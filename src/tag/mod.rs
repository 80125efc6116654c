// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! The audio tag codec.
//!
//! This module projects the divergent tagging conventions of FLAC/Ogg Vorbis comments, ID3v2
//! frames, MP4 atoms and Opus comments onto one canonical record, [`AudioTags`], and writes it
//! back losslessly. Callers never touch a format-specific tag type; the per-format backends live
//! in the submodules and are selected by file extension (the Ogg backend additionally probes the
//! container to tell Vorbis from Opus streams).

#[cfg(feature = "flac")]
mod flac;
#[cfg(feature = "id3")]
mod id3;
#[cfg(feature = "mp4")]
mod mp4;
#[cfg(feature = "ogg")]
mod ogg;

use crate::common::{
    normalize_releasetype, uniq, Artist, ArtistMapping, PartialDate, SUPPORTED_AUDIO_EXTENSIONS,
};
use crate::error::{Error, ExpectedError, Result};
use crate::genre::transitive_parent_genres;
use crate::Config;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Separators recognized when splitting a multi-valued tag string.
static TAG_SPLITTER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r" \\\\ | / |; ?| vs\. ").expect("static regex must compile"));

/// The literal separator between the user's genres and the appended parent genre tail.
const PARENT_GENRE_SEPARATOR: &str = r"\\PARENTS:\\";

/// The audio formats the codec can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// MPEG-1 Audio Layer III with ID3v2 tags.
    Mp3,
    /// MPEG-4 audio with iTunes-style atoms.
    M4a,
    /// An Ogg container holding a Vorbis or Opus stream with Vorbis comments.
    Ogg,
    /// An Ogg container holding an Opus stream.
    Opus,
    /// FLAC with Vorbis comments.
    Flac,
}

impl AudioFormat {
    /// Determine the format from the file extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "mp3" => Some(AudioFormat::Mp3),
            "m4a" => Some(AudioFormat::M4a),
            "ogg" => Some(AudioFormat::Ogg),
            "opus" => Some(AudioFormat::Opus),
            "flac" => Some(AudioFormat::Flac),
            _ => None,
        }
    }
}

/// The canonical tag record of a single audio file.
///
/// `tracktotal` and `disctotal` are read for informational purposes but never written back; the
/// cache derives them from the release's own tracks.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTags {
    /// Per-track opaque identifier, assigned by the scanner.
    pub id: Option<String>,
    /// Identifier tying this track into its release, assigned by the scanner.
    pub release_id: Option<String>,

    /// Track title.
    pub tracktitle: Option<String>,
    /// Track number within its disc, as tagged (kept as a string: vinyl rips use `A1` etc.).
    pub tracknumber: Option<String>,
    /// Total number of tracks, as tagged. Derived on the cache side; never written.
    pub tracktotal: Option<u32>,
    /// Disc number, as tagged.
    pub discnumber: Option<String>,
    /// Total number of discs, as tagged. Derived on the cache side; never written.
    pub disctotal: Option<u32>,
    /// Track-level artists by role.
    pub trackartists: ArtistMapping,

    /// Release title.
    pub releasetitle: Option<String>,
    /// Release type; always one of the closed vocabulary or `unknown`.
    pub releasetype: String,
    /// Release date of this edition.
    pub releasedate: Option<PartialDate>,
    /// Release date of the earliest edition.
    pub originaldate: Option<PartialDate>,
    /// Composition date (for classical music).
    pub compositiondate: Option<PartialDate>,
    /// Genres.
    pub genre: Vec<String>,
    /// Secondary genres.
    pub secondarygenre: Vec<String>,
    /// Free-form sound descriptors.
    pub descriptor: Vec<String>,
    /// Edition name (e.g. `Japan`, `Deluxe`).
    pub edition: Option<String>,
    /// Record labels.
    pub label: Vec<String>,
    /// Catalog number.
    pub catalognumber: Option<String>,
    /// Release-level artists by role.
    pub releaseartists: ArtistMapping,

    /// Track duration in seconds.
    pub duration_sec: u32,
    /// The file this record was read from.
    pub path: PathBuf,
}

impl AudioTags {
    /// Read the tags of an audio file on disk.
    ///
    /// # Errors
    ///
    /// Returns [`ExpectedError::UnsupportedFiletype`] for unknown extensions and an expected
    /// error when the file cannot be opened by the format backend.
    pub fn from_file(path: &Path) -> Result<Self> {
        let Some(format) = AudioFormat::from_path(path) else {
            return Err(ExpectedError::UnsupportedFiletype {
                path: path.to_path_buf(),
            }
            .into());
        };
        match format {
            #[cfg(feature = "id3")]
            AudioFormat::Mp3 => self::id3::read(path),
            #[cfg(feature = "mp4")]
            AudioFormat::M4a => self::mp4::read(path),
            #[cfg(feature = "ogg")]
            AudioFormat::Ogg | AudioFormat::Opus => self::ogg::read(path),
            #[cfg(feature = "flac")]
            AudioFormat::Flac => self::flac::read(path),
            #[allow(unreachable_patterns)]
            _ => Err(ExpectedError::UnsupportedFiletype {
                path: path.to_path_buf(),
            }
            .into()),
        }
    }

    /// Flush the current record to the file on disk.
    ///
    /// The release type is lowercased before writing; a value outside the closed vocabulary is
    /// written as-is (and will normalize to `unknown` on the next read) with a warning, so that a
    /// bulk operation is never wedged by one stray tag. Interactive paths validate beforehand.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be rewritten by the format backend.
    pub fn flush(&mut self, config: &Config) -> Result<()> {
        self.releasetype = self.releasetype.to_lowercase();
        if normalize_releasetype(Some(&self.releasetype)) == "unknown"
            && self.releasetype != "unknown"
        {
            log::warn!(
                "Writing unrecognized release type {:?} to {}",
                self.releasetype,
                self.path.display()
            );
        }
        let Some(format) = AudioFormat::from_path(&self.path) else {
            return Err(ExpectedError::UnsupportedFiletype {
                path: self.path.clone(),
            }
            .into());
        };
        match format {
            #[cfg(feature = "id3")]
            AudioFormat::Mp3 => self::id3::write(self, config),
            #[cfg(feature = "mp4")]
            AudioFormat::M4a => self::mp4::write(self, config),
            #[cfg(feature = "ogg")]
            AudioFormat::Ogg | AudioFormat::Opus => self::ogg::write(self, config),
            #[cfg(feature = "flac")]
            AudioFormat::Flac => self::flac::write(self, config),
            #[allow(unreachable_patterns)]
            _ => Err(ExpectedError::UnsupportedFiletype {
                path: self.path.clone(),
            }
            .into()),
        }
    }

    /// An empty record for the given path, used by backends as the starting point of a read.
    pub(crate) fn empty(path: &Path) -> Self {
        AudioTags {
            id: None,
            release_id: None,
            tracktitle: None,
            tracknumber: None,
            tracktotal: None,
            discnumber: None,
            disctotal: None,
            trackartists: ArtistMapping::new(),
            releasetitle: None,
            releasetype: "unknown".to_string(),
            releasedate: None,
            originaldate: None,
            compositiondate: None,
            genre: Vec::new(),
            secondarygenre: Vec::new(),
            descriptor: Vec::new(),
            edition: None,
            label: Vec::new(),
            catalognumber: None,
            releaseartists: ArtistMapping::new(),
            duration_sec: 0,
            path: path.to_path_buf(),
        }
    }
}

/// Whether the extension of `path` is one the codec supports.
#[must_use]
pub fn is_supported_extension(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let name = name.to_lowercase();
    SUPPORTED_AUDIO_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Split a multi-valued tag string into its parts.
#[must_use]
pub fn split_tag(value: Option<&str>) -> Vec<String> {
    match value {
        Some(v) if !v.is_empty() => TAG_SPLITTER_REGEX.split(v).map(String::from).collect(),
        _ => Vec::new(),
    }
}

/// Split a genre tag, stripping an appended parent genre tail first.
#[must_use]
pub fn split_genre_tag(value: Option<&str>) -> Vec<String> {
    let Some(value) = value else {
        return Vec::new();
    };
    let value = value
        .split_once(PARENT_GENRE_SEPARATOR)
        .map_or(value, |(own, _parents)| own);
    split_tag(Some(value))
}

/// Join genres for writing, appending the transitive parent genre tail when configured.
#[must_use]
pub fn format_genre_tag(config: &Config, genres: &[String]) -> String {
    let joined = genres.join(";");
    if !config.write_parent_genres {
        return joined;
    }
    let parents = transitive_parent_genres(genres);
    if parents.is_empty() {
        joined
    } else {
        format!("{joined}{PARENT_GENRE_SEPARATOR}{}", parents.join(";"))
    }
}

/// Parse a free-text artist field into a role mapping.
///
/// The string grammar is `ARTISTS := (ROLE_PREFIX ARTISTS)* MAIN (ROLE_SUFFIX ARTISTS)*`: the
/// role markers are peeled off one by one, suffix roles first (in the inverse of the format
/// order), then the prefix roles, and whatever remains is the main credit. Explicit per-role tag
/// values can be passed alongside and are merged in.
#[must_use]
pub fn parse_artist_string(
    main: Option<&str>,
    remixer: Option<&str>,
    composer: Option<&str>,
    conductor: Option<&str>,
    producer: Option<&str>,
    dj: Option<&str>,
) -> ArtistMapping {
    let mut li_conductor = split_tag(conductor);
    let mut li_guests = Vec::new();
    let mut li_remixer = split_tag(remixer);
    let mut li_composer = split_tag(composer);
    let mut li_producer = split_tag(producer);
    let mut li_dj = split_tag(dj);

    let mut main = main.unwrap_or("").to_string();
    if let Some((rest, produced)) = split_once_marker(&main, "produced by ") {
        li_producer.extend(split_tag(Some(&produced)));
        main = rest;
    }
    if let Some((rest, remixed)) = split_once_marker(&main, "remixed by ") {
        li_remixer.extend(split_tag(Some(&remixed)));
        main = rest;
    }
    if let Some((rest, guests)) = split_once_marker(&main, "feat. ") {
        li_guests.extend(split_tag(Some(&guests)));
        main = rest;
    }
    if let Some((rest, guests)) = split_once_marker(&main, "featuring ") {
        li_guests.extend(split_tag(Some(&guests)));
        main = rest;
    }
    if let Some((rest, conductors)) = split_once_marker(&main, "under. ") {
        li_conductor.extend(split_tag(Some(&conductors)));
        main = rest;
    }
    if let Some((composers, rest)) = split_once_marker(&main, "performed by ") {
        li_composer.extend(split_tag(Some(&composers)));
        main = rest;
    }
    if let Some((djs, rest)) = split_once_marker(&main, "pres. ") {
        li_dj.extend(split_tag(Some(&djs)));
        main = rest;
    }
    let li_main = split_tag(Some(&main));

    let to_artists = |xs: Vec<String>| uniq(xs).into_iter().map(Artist::new).collect();
    ArtistMapping {
        main: to_artists(li_main),
        guest: to_artists(li_guests),
        remixer: to_artists(li_remixer),
        composer: to_artists(li_composer),
        conductor: to_artists(li_conductor),
        producer: to_artists(li_producer),
        djmixer: to_artists(li_dj),
    }
}

/// Split `value` at the first occurrence of a role marker, swallowing one optional leading space.
fn split_once_marker(value: &str, marker: &str) -> Option<(String, String)> {
    let idx = value.find(marker)?;
    let before = value[..idx].trim_end_matches(' ');
    let after = &value[idx + marker.len()..];
    Some((before.to_string(), after.to_string()))
}

/// Format a role mapping back into the free-text artist grammar.
///
/// The inverse of [`parse_artist_string`]. Artists flagged as aliases are omitted.
#[must_use]
pub fn format_artist_string(mapping: &ArtistMapping) -> String {
    fn format_role(xs: &[Artist]) -> String {
        xs.iter()
            .filter(|x| !x.alias)
            .map(|x| x.name.as_str())
            .collect::<Vec<_>>()
            .join(";")
    }

    let mut r = format_role(&mapping.main);
    if mapping.djmixer.iter().any(|a| !a.alias) {
        r = format!("{} pres. {r}", format_role(&mapping.djmixer));
    }
    if mapping.composer.iter().any(|a| !a.alias) {
        r = format!("{} performed by {r}", format_role(&mapping.composer));
    }
    if mapping.conductor.iter().any(|a| !a.alias) {
        r = format!("{r} under. {}", format_role(&mapping.conductor));
    }
    if mapping.guest.iter().any(|a| !a.alias) {
        r = format!("{r} feat. {}", format_role(&mapping.guest));
    }
    if mapping.remixer.iter().any(|a| !a.alias) {
        r = format!("{r} remixed by {}", format_role(&mapping.remixer));
    }
    if mapping.producer.iter().any(|a| !a.alias) {
        r = format!("{r} produced by {}", format_role(&mapping.producer));
    }
    r
}

/// Parse an integer tag value, treating garbage as absent.
pub(crate) fn parse_int_tag(value: Option<&str>) -> Option<u32> {
    value.and_then(|v| v.trim().parse().ok())
}

/// Construct the expected error for a file that a backend failed to open.
pub(crate) fn invalid_file_format(path: &Path, err: impl std::fmt::Display) -> Error {
    ExpectedError::Generic(format!(
        "Invalid file format: failed to open {}: {err}",
        path.display()
    ))
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_tag() {
        assert_eq!(split_tag(Some(r"a \\ b")), vec!["a", "b"]);
        assert_eq!(split_tag(Some(r"a \ b")), vec![r"a \ b"]);
        assert_eq!(split_tag(Some("a;b")), vec!["a", "b"]);
        assert_eq!(split_tag(Some("a; b")), vec!["a", "b"]);
        assert_eq!(split_tag(Some("a vs. b")), vec!["a", "b"]);
        assert_eq!(split_tag(Some("a / b")), vec!["a", "b"]);
        assert!(split_tag(None).is_empty());
        assert!(split_tag(Some("")).is_empty());
    }

    #[test]
    fn test_split_genre_tag_strips_parent_tail() {
        assert_eq!(
            split_genre_tag(Some(r"Electronic;House\\PARENTS:\\Dance;EDM")),
            vec!["Electronic", "House"]
        );
        assert_eq!(split_genre_tag(Some("Electronic; House")), vec!["Electronic", "House"]);
        assert!(split_genre_tag(None).is_empty());
    }

    #[test]
    fn test_format_genre_tag_without_parents() {
        let config = crate::testing::config_for_dir(std::env::temp_dir());
        assert_eq!(
            format_genre_tag(&config, &["Electronic".to_string(), "House".to_string()]),
            "Electronic;House"
        );
        assert_eq!(format_genre_tag(&config, &[]), "");
    }

    #[test]
    fn test_format_genre_tag_with_parents() {
        let mut config = crate::testing::config_for_dir(std::env::temp_dir());
        config.write_parent_genres = true;
        let out = format_genre_tag(&config, &["House".to_string()]);
        assert!(out.starts_with("House"));
        assert!(out.contains(PARENT_GENRE_SEPARATOR));
        assert!(out.contains("Electronic Dance Music"));
        // The tail must strip back out on read.
        assert_eq!(split_genre_tag(Some(&out)), vec!["House"]);
    }

    #[test]
    fn test_parse_artist_string() {
        assert_eq!(
            parse_artist_string(Some("A;B feat. C;D"), None, None, None, None, None),
            ArtistMapping {
                main: vec![Artist::new("A"), Artist::new("B")],
                guest: vec![Artist::new("C"), Artist::new("D")],
                ..ArtistMapping::default()
            }
        );
        assert_eq!(
            parse_artist_string(Some("A pres. C;D"), None, None, None, None, None),
            ArtistMapping {
                djmixer: vec![Artist::new("A")],
                main: vec![Artist::new("C"), Artist::new("D")],
                ..ArtistMapping::default()
            }
        );
        assert_eq!(
            parse_artist_string(Some("A performed by C;D"), None, None, None, None, None),
            ArtistMapping {
                composer: vec![Artist::new("A")],
                main: vec![Artist::new("C"), Artist::new("D")],
                ..ArtistMapping::default()
            }
        );
        assert_eq!(
            parse_artist_string(Some("A pres. B;C feat. D;E"), None, None, None, None, None),
            ArtistMapping {
                djmixer: vec![Artist::new("A")],
                main: vec![Artist::new("B"), Artist::new("C")],
                guest: vec![Artist::new("D"), Artist::new("E")],
                ..ArtistMapping::default()
            }
        );
        // The spelled-out guest marker is recognized too.
        assert_eq!(
            parse_artist_string(Some("A featuring C;D"), None, None, None, None, None),
            ArtistMapping {
                main: vec![Artist::new("A")],
                guest: vec![Artist::new("C"), Artist::new("D")],
                ..ArtistMapping::default()
            }
        );
        // An artist both in a marker and in an explicit role tag collapses.
        assert_eq!(
            parse_artist_string(Some("A pres. B"), None, None, None, None, Some("A")),
            ArtistMapping {
                djmixer: vec![Artist::new("A")],
                main: vec![Artist::new("B")],
                ..ArtistMapping::default()
            }
        );
    }

    #[test]
    fn test_parse_artist_string_all_roles() {
        let mapping = parse_artist_string(
            Some(
                "Composer A performed by DJ A pres. Artist A under. Conductor A \
                 feat. Guest A remixed by Remixer A produced by Producer A",
            ),
            None,
            None,
            None,
            None,
            None,
        );
        assert_eq!(mapping.main, vec![Artist::new("Artist A")]);
        assert_eq!(mapping.composer, vec![Artist::new("Composer A")]);
        assert_eq!(mapping.djmixer, vec![Artist::new("DJ A")]);
        assert_eq!(mapping.conductor, vec![Artist::new("Conductor A")]);
        assert_eq!(mapping.guest, vec![Artist::new("Guest A")]);
        assert_eq!(mapping.remixer, vec![Artist::new("Remixer A")]);
        assert_eq!(mapping.producer, vec![Artist::new("Producer A")]);
    }

    #[test]
    fn test_format_artist_string() {
        assert_eq!(
            format_artist_string(&ArtistMapping {
                main: vec![Artist::new("A"), Artist::new("B")],
                guest: vec![Artist::new("C"), Artist::new("D")],
                ..ArtistMapping::default()
            }),
            "A;B feat. C;D"
        );
        assert_eq!(
            format_artist_string(&ArtistMapping {
                djmixer: vec![Artist::new("A")],
                main: vec![Artist::new("C"), Artist::new("D")],
                ..ArtistMapping::default()
            }),
            "A pres. C;D"
        );
        assert_eq!(
            format_artist_string(&ArtistMapping {
                composer: vec![Artist::new("A")],
                main: vec![Artist::new("C"), Artist::new("D")],
                ..ArtistMapping::default()
            }),
            "A performed by C;D"
        );
    }

    #[test]
    fn test_artist_string_round_trip() {
        let input = "Composer A performed by DJ A pres. Artist A under. Conductor A \
                     feat. Guest A remixed by Remixer A produced by Producer A";
        let mapping = parse_artist_string(Some(input), None, None, None, None, None);
        assert_eq!(format_artist_string(&mapping), input);
    }

    #[test]
    fn test_format_artist_string_omits_aliases() {
        let mapping = ArtistMapping {
            main: vec![Artist::new("Artist A"), Artist::with_alias("Artist B", true)],
            ..ArtistMapping::default()
        };
        assert_eq!(format_artist_string(&mapping), "Artist A");
    }

    macro_rules! extension_dispatch_test {
        ($($ext:ident => $format:expr),* $(,)?) => {
            paste::paste! {
                $(
                    #[test]
                    fn [<test_extension_dispatch_ $ext>]() {
                        let lower = format!("track.{}", stringify!($ext));
                        let upper = format!("track.{}", stringify!($ext).to_uppercase());
                        assert_eq!(AudioFormat::from_path(Path::new(&lower)), Some($format));
                        assert_eq!(AudioFormat::from_path(Path::new(&upper)), Some($format));
                    }
                )*
            }
        };
    }

    extension_dispatch_test! {
        mp3 => AudioFormat::Mp3,
        m4a => AudioFormat::M4a,
        ogg => AudioFormat::Ogg,
        opus => AudioFormat::Opus,
        flac => AudioFormat::Flac,
    }

    #[test]
    fn test_audio_format_from_path_rejects_unknown() {
        assert_eq!(AudioFormat::from_path(Path::new("x.wav")), None);
        assert_eq!(AudioFormat::from_path(Path::new("x")), None);
    }

    #[test]
    fn test_from_file_rejects_unknown_extension() {
        let err = AudioTags::from_file(Path::new("/nonexistent/file.wav")).unwrap_err();
        assert!(err.to_string().contains("Unsupported filetype"));
    }
}
