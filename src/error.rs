// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Error and result types.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type.
///
/// Errors that a user can remedy (bad input, unknown names, malformed rule DSL) are wrapped in
/// [`Error::Expected`] and printed without a backtrace; everything else is a bug or an
/// environment failure and is reported verbosely.
#[derive(Error, Debug)]
pub enum Error {
    /// An error that is expected during normal operation.
    #[error(transparent)]
    Expected(#[from] ExpectedError),
    /// Configuration error.
    #[error("Configuration Error ({0})")]
    Config(#[from] crate::config::ConfigError),
    /// Database access failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// I/O Error.
    #[error("Input/Output error ({:?})", .0)]
    Io(#[from] io::Error),
    /// XDG BaseDirectories error.
    #[error("BaseDirectories error ({:?})", .0)]
    BaseDirectories(#[from] xdg::BaseDirectoriesError),
    /// TOML decoding failed outside of a user-editable file.
    #[error("TOML decode error: {0}")]
    TomlDe(#[from] toml::de::Error),
    /// TOML encoding failed.
    #[error("TOML encode error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    /// JSON (De-)Serialization Error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Regular expression compilation failed.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
    /// Errors raised by the [`id3`] crate.
    #[cfg(feature = "id3")]
    #[error("Failed to access ID3 tag: {0}")]
    Id3(#[from] id3::Error),
    /// Errors raised by the [`metaflac`] crate.
    #[cfg(feature = "flac")]
    #[error("Failed to access FLAC tag: {0}")]
    Flac(#[from] metaflac::Error),
    /// Errors raised by the [`mp4ameta`] crate.
    #[cfg(feature = "mp4")]
    #[error("Failed to access MP4 tag: {0}")]
    Mp4(#[from] mp4ameta::Error),
    /// Errors raised by the [`lofty`] crate.
    #[cfg(feature = "ogg")]
    #[error("Failed to access Ogg tag: {0}")]
    Ogg(#[from] lofty::error::LoftyError),
    /// An error occurred while formatting a template string.
    #[error("Template formatting failed: {0}")]
    TemplateFormattingFailed(#[from] handlebars::RenderError),
    /// System clock misbehaved.
    #[error("System time error: {0}")]
    SystemTime(#[from] std::time::SystemTimeError),
    /// Catch-all for invariant violations that indicate a bug.
    #[error("{0}")]
    Generic(String),
}

/// Errors that stem from user input or library state and are printed as a single concise line.
#[derive(Error, Debug, Clone)]
pub enum ExpectedError {
    /// Generic expected failure with a preformatted message.
    #[error("{0}")]
    Generic(String),
    /// The file is not one of the supported audio formats.
    #[error("Unsupported filetype: {path}")]
    UnsupportedFiletype {
        /// Path of the offending file.
        path: PathBuf,
    },
    /// A tag value cannot be represented in the target format.
    #[error("{0}")]
    UnsupportedTagValue(String),
    /// A referenced release does not exist in the cache.
    #[error("Release does not exist: {id}")]
    ReleaseDoesNotExist {
        /// The release identifier.
        id: String,
    },
    /// A referenced track does not exist in the cache.
    #[error("Track does not exist: {id}")]
    TrackDoesNotExist {
        /// The track identifier.
        id: String,
    },
    /// A referenced collage does not exist.
    #[error("Collage does not exist: {name}")]
    CollageDoesNotExist {
        /// The collage name.
        name: String,
    },
    /// A collage with this name already exists.
    #[error("Collage already exists: {name}")]
    CollageAlreadyExists {
        /// The collage name.
        name: String,
    },
    /// A referenced playlist does not exist.
    #[error("Playlist does not exist: {name}")]
    PlaylistDoesNotExist {
        /// The playlist name.
        name: String,
    },
    /// A playlist with this name already exists.
    #[error("Playlist already exists: {name}")]
    PlaylistAlreadyExists {
        /// The playlist name.
        name: String,
    },
    /// A rule failed to parse.
    #[error("{0}")]
    InvalidRule(String),
    /// A cover art file has an extension outside `valid_art_exts`.
    #[error("Invalid cover art file: {0}")]
    InvalidCoverArtFile(String),
    /// A named lock could not be acquired before the timeout.
    #[error("Timed out waiting for lock {name}")]
    LockTimeout {
        /// The lock name.
        name: String,
    },
    /// The user's `$EDITOR` exited with a non-zero status.
    #[error("Editor exited with non-zero status")]
    EditorFailed,
    /// An edited document did not round-trip.
    #[error("{0}")]
    InvalidEdit(String),
}

/// Convenience type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for constructing an [`ExpectedError::Generic`] wrapped in [`Error::Expected`].
    pub fn expected(msg: impl Into<String>) -> Self {
        Error::Expected(ExpectedError::Generic(msg.into()))
    }
}
