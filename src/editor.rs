// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Spawning the user's text editor on a scratch file.

use crate::error::{ExpectedError, Result};
use std::path::Path;
use std::process::Command;

/// Open `$EDITOR` (fallback `nano`) on the given file and wait for it.
///
/// The caller owns the scratch file's lifecycle: it is retained on failure so the user's edit
/// state survives an editor crash or a validation error.
///
/// # Errors
///
/// Returns [`ExpectedError::EditorFailed`] if the editor exits non-zero or cannot be spawned.
pub fn edit_file(path: &Path) -> Result<()> {
    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "nano".to_string());
    let status = Command::new(&editor).arg(path).status().map_err(|err| {
        log::error!("Failed to spawn editor {editor}: {err}");
        ExpectedError::EditorFailed
    })?;
    if !status.success() {
        return Err(ExpectedError::EditorFailed.into());
    }
    Ok(())
}
