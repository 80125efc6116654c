// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Path formatting and templating.
//!
//! Renders library-relative names for releases and tracks from the configured handlebars
//! templates. Rendered values pass through a path-character escape and the configured filename
//! byte budget, so a template can never produce a name the filesystem rejects.

use crate::cache::{CachedRelease, CachedTrack};
use crate::common::{sanitize_dirname, sanitize_filename};
use crate::error::Result;
use crate::Config;
use handlebars::Handlebars;
use serde::Serialize;

/// Characters that are forbidden in path components (in addition to control characters).
const ILLEGAL_PATH_CHARS: &str = "/";

/// Strips control characters and folds forbidden characters to `_`.
fn escape_path_chars(data: &str) -> String {
    data.chars()
        .filter(|c| !c.is_control())
        .map(|c| if ILLEGAL_PATH_CHARS.contains(c) { '_' } else { c })
        .collect()
}

/// The values a template can reference.
#[derive(Debug, Clone, Default, Serialize)]
struct TemplateValues {
    /// The release's main artists, formatted for display.
    releaseartist: String,
    /// The release title.
    releasetitle: String,
    /// The release type.
    releasetype: String,
    /// The release year, empty when unknown.
    releaseyear: String,
    /// The track's main artists, formatted for display.
    trackartist: String,
    /// The track title.
    tracktitle: String,
    /// The track number.
    tracknumber: String,
    /// The disc number.
    discnumber: String,
}

impl TemplateValues {
    /// Assign fields from a release.
    fn with_release(mut self, release: &CachedRelease) -> Self {
        self.releaseartist = display_artists(release.releaseartists.main.iter());
        self.releasetitle = release.releasetitle.clone().unwrap_or_default();
        self.releasetype = release.releasetype.clone();
        self.releaseyear = release.releasedate.map(|d| d.year.to_string()).unwrap_or_default();
        self
    }

    /// Assign fields from a track.
    fn with_track(mut self, track: &CachedTrack) -> Self {
        self.trackartist = display_artists(track.trackartists.main.iter());
        self.tracktitle = track.tracktitle.clone().unwrap_or_default();
        self.tracknumber = track.tracknumber.clone();
        self.discnumber = track.discnumber.clone();
        self
    }
}

/// Join the non-alias artists for display.
fn display_artists<'a>(artists: impl Iterator<Item = &'a crate::common::Artist>) -> String {
    artists
        .filter(|a| !a.alias)
        .map(|a| a.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A handlebars registry in strict mode with the path escape installed.
fn renderer(template_name: &str, template: &str) -> Result<Handlebars<'static>> {
    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(true);
    handlebars.register_escape_fn(escape_path_chars);
    handlebars
        .register_template_string(template_name, template)
        .map_err(|e| crate::error::Error::Generic(format!("Invalid path template: {e}")))?;
    Ok(handlebars)
}

/// Render the directory name for a release.
///
/// # Errors
///
/// Fails if the configured template does not compile or references unknown values.
pub fn evaluate_release_template(config: &Config, release: &CachedRelease) -> Result<String> {
    let handlebars = renderer("release", &config.path_templates.release)?;
    let values = TemplateValues::default().with_release(release);
    let rendered = handlebars.render("release", &values)?;
    Ok(sanitize_dirname(&rendered, config.max_filename_bytes))
}

/// Render the file stem for a track.
///
/// # Errors
///
/// Fails if the configured template does not compile or references unknown values.
pub fn evaluate_track_template(
    config: &Config,
    track: &CachedTrack,
    release: &CachedRelease,
) -> Result<String> {
    let handlebars = renderer("track", &config.path_templates.track)?;
    let values = TemplateValues::default().with_release(release).with_track(track);
    let rendered = handlebars.render("track", &values)?;
    Ok(sanitize_filename(&rendered, config.max_filename_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Artist, ArtistMapping};
    use std::path::PathBuf;

    fn release() -> CachedRelease {
        CachedRelease {
            id: "r1".to_string(),
            source_path: PathBuf::from("/music/rel"),
            cover_image_path: None,
            added_at: "2023-10-23T00:00:00-04:00".to_string(),
            datafile_mtime: 0,
            releasetitle: Some("A Cool Album".to_string()),
            releasetype: "album".to_string(),
            releasedate: crate::common::PartialDate::parse(Some("1990-02-05")),
            originaldate: None,
            compositiondate: None,
            catalognumber: None,
            edition: None,
            disctotal: 1,
            new: true,
            genres: vec![],
            secondary_genres: vec![],
            descriptors: vec![],
            labels: vec![],
            releaseartists: ArtistMapping {
                main: vec![Artist::new("Artist A"), Artist::new("Artist B")],
                ..ArtistMapping::default()
            },
            metahash: String::new(),
        }
    }

    fn track() -> CachedTrack {
        CachedTrack {
            id: "t1".to_string(),
            source_path: PathBuf::from("/music/rel/01.flac"),
            source_mtime: 0,
            tracktitle: Some("Track 1".to_string()),
            release_id: "r1".to_string(),
            tracknumber: "1".to_string(),
            tracktotal: 5,
            discnumber: "1".to_string(),
            duration_seconds: 120,
            trackartists: ArtistMapping {
                main: vec![Artist::new("Artist A")],
                ..ArtistMapping::default()
            },
            metahash: String::new(),
        }
    }

    #[test]
    fn test_release_template() {
        let config = crate::testing::config_for_dir(std::env::temp_dir());
        let name = evaluate_release_template(&config, &release()).unwrap();
        assert_eq!(name, "Artist A, Artist B - A Cool Album");
    }

    #[test]
    fn test_track_template() {
        let config = crate::testing::config_for_dir(std::env::temp_dir());
        let name = evaluate_track_template(&config, &track(), &release()).unwrap();
        assert_eq!(name, "1. Track 1");
    }

    #[test]
    fn test_rendered_values_are_path_safe() {
        let mut config = crate::testing::config_for_dir(std::env::temp_dir());
        config.path_templates.release = "{{ releasetitle }}".to_string();
        let mut rel = release();
        rel.releasetitle = Some("AC/DC: Back In Black".to_string());
        let name = evaluate_release_template(&config, &rel).unwrap();
        assert!(!name.contains('/'));
    }
}
