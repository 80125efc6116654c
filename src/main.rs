// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Command line entry point.

use clap::{Parser, Subcommand};
use log::LevelFilter;
use rose::rules::parser::Rule;
use rose::rules::TrackDiff;
use rose::{Config, Error};
use simplelog::{ColorChoice, Config as LogConfig, TermLogger, TerminalMode};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Show debug information.
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage the read cache.
    #[command(subcommand)]
    Cache(CacheCommand),
    /// Manage releases.
    #[command(subcommand)]
    Releases(ReleasesCommand),
    /// Manage tracks.
    #[command(subcommand)]
    Tracks(TracksCommand),
    /// Run metadata rules across the library.
    #[command(subcommand)]
    Rules(RulesCommand),
    /// Manage collages.
    #[command(subcommand)]
    Collages(CollagesCommand),
    /// Manage playlists.
    #[command(subcommand)]
    Playlists(PlaylistsCommand),
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Synchronize the read cache with the music source directory.
    Update {
        /// Re-read every release even if its mtimes are unchanged.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ReleasesCommand {
    /// Print all releases as text.
    List,
    /// Move a release to the trash.
    Delete {
        /// The release id.
        release_id: String,
    },
    /// Flip a release's "new" flag.
    ToggleNew {
        /// The release id.
        release_id: String,
    },
    /// Set a release's cover art.
    SetCover {
        /// The release id.
        release_id: String,
        /// Path of the new cover art file.
        cover: PathBuf,
    },
    /// Remove a release's cover art.
    DeleteCover {
        /// The release id.
        release_id: String,
    },
    /// Edit a release's metadata in $EDITOR.
    Edit {
        /// The release id.
        release_id: String,
        /// Reopen the scratch file of a previously failed edit.
        #[arg(long)]
        resume: bool,
    },
    /// Create a new single release from one track.
    CreateSingle {
        /// The source track id.
        track_id: String,
    },
    /// Run actions against all tracks of one release.
    RunRule {
        /// The release id.
        release_id: String,
        /// One or more actions.
        #[arg(required = true)]
        actions: Vec<String>,
        /// Print the planned changes without writing them.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand, Debug)]
enum TracksCommand {
    /// Run actions against one track.
    RunRule {
        /// The track id.
        track_id: String,
        /// One or more actions.
        #[arg(required = true)]
        actions: Vec<String>,
        /// Print the planned changes without writing them.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand, Debug)]
enum RulesCommand {
    /// Run an ad-hoc rule across the library.
    Run {
        /// The matcher.
        matcher: String,
        /// One or more actions.
        #[arg(required = true)]
        actions: Vec<String>,
        /// Print the planned changes without writing them.
        #[arg(long)]
        dry_run: bool,
    },
    /// Run the rules stored in the configuration file.
    RunStored {
        /// Print the planned changes without writing them.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand, Debug)]
enum CollagesCommand {
    /// Print all collage names.
    List,
    /// Create a new empty collage.
    Create {
        /// The collage name.
        name: String,
    },
    /// Move a collage to the trash.
    Delete {
        /// The collage name.
        name: String,
    },
    /// Rename a collage (cover art moves along).
    Rename {
        /// The current name.
        old_name: String,
        /// The new name.
        new_name: String,
    },
    /// Add a release to a collage.
    AddRelease {
        /// The collage name.
        name: String,
        /// The release id.
        release_id: String,
    },
    /// Remove a release from a collage.
    RemoveRelease {
        /// The collage name.
        name: String,
        /// The release id.
        release_id: String,
    },
    /// Reorder and prune a collage in $EDITOR.
    Edit {
        /// The collage name.
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum PlaylistsCommand {
    /// Print all playlist names.
    List,
    /// Create a new empty playlist.
    Create {
        /// The playlist name.
        name: String,
    },
    /// Move a playlist to the trash.
    Delete {
        /// The playlist name.
        name: String,
    },
    /// Rename a playlist (cover art moves along).
    Rename {
        /// The current name.
        old_name: String,
        /// The new name.
        new_name: String,
    },
    /// Add a track to a playlist.
    AddTrack {
        /// The playlist name.
        name: String,
        /// The track id.
        track_id: String,
    },
    /// Remove a track from a playlist.
    RemoveTrack {
        /// The playlist name.
        name: String,
        /// The track id.
        track_id: String,
    },
    /// Reorder and prune a playlist in $EDITOR.
    Edit {
        /// The playlist name.
        name: String,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    let log_level = if args.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    TermLogger::init(log_level, LogConfig::default(), TerminalMode::Stderr, ColorChoice::Auto)
        .expect("logger can only be initialized once");

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::Expected(err)) => {
            eprintln!("{err}");
            ExitCode::from(2)
        }
        Err(err) => {
            eprintln!("{err:?}");
            ExitCode::FAILURE
        }
    }
}

/// Load the configuration and dispatch the subcommand.
fn run(args: &Args) -> rose::Result<()> {
    let config = Config::parse(args.config.as_deref())?;
    rose::cache::maybe_invalidate_cache_database(&config)?;

    match &args.command {
        Command::Cache(CacheCommand::Update { force }) => {
            rose::cache::update::update_cache(&config, *force)
        }
        Command::Releases(command) => run_releases(&config, command),
        Command::Tracks(TracksCommand::RunRule { track_id, actions, dry_run }) => {
            let actions = parse_actions(actions)?;
            let diffs = rose::track::run_actions_on_track(&config, track_id, &actions, *dry_run)?;
            print_diffs(&diffs, *dry_run);
            Ok(())
        }
        Command::Rules(command) => run_rules(&config, command),
        Command::Collages(command) => run_collages(&config, command),
        Command::Playlists(command) => run_playlists(&config, command),
    }
}

/// Dispatch `releases` subcommands.
fn run_releases(config: &Config, command: &ReleasesCommand) -> rose::Result<()> {
    match command {
        ReleasesCommand::List => {
            for release in rose::cache::list_releases(config)? {
                println!("{}\t{}", release.id, rose::cache::release_logtext(&release));
            }
            Ok(())
        }
        ReleasesCommand::Delete { release_id } => rose::release::delete_release(config, release_id),
        ReleasesCommand::ToggleNew { release_id } => {
            rose::release::toggle_release_new(config, release_id)
        }
        ReleasesCommand::SetCover { release_id, cover } => {
            rose::release::set_release_cover_art(config, release_id, cover)
        }
        ReleasesCommand::DeleteCover { release_id } => {
            rose::release::delete_release_cover_art(config, release_id)
        }
        ReleasesCommand::Edit { release_id, resume } => {
            rose::release::edit_release(config, release_id, *resume)
        }
        ReleasesCommand::CreateSingle { track_id } => {
            let release_id = rose::release::create_single_release(config, track_id)?;
            println!("{release_id}");
            Ok(())
        }
        ReleasesCommand::RunRule { release_id, actions, dry_run } => {
            let actions = parse_actions(actions)?;
            let diffs =
                rose::release::run_actions_on_release(config, release_id, &actions, *dry_run)?;
            print_diffs(&diffs, *dry_run);
            Ok(())
        }
    }
}

/// Dispatch `rules` subcommands.
fn run_rules(config: &Config, command: &RulesCommand) -> rose::Result<()> {
    match command {
        RulesCommand::Run { matcher, actions, dry_run } => {
            let rule = Rule::parse(matcher, actions.iter().map(String::as_str).collect())?;
            let diffs = rose::rules::execute_metadata_rule(config, &rule, *dry_run)?;
            print_diffs(&diffs, *dry_run);
            Ok(())
        }
        RulesCommand::RunStored { dry_run } => {
            let diffs = rose::rules::execute_stored_metadata_rules(config, *dry_run)?;
            print_diffs(&diffs, *dry_run);
            Ok(())
        }
    }
}

/// Dispatch `collages` subcommands.
fn run_collages(config: &Config, command: &CollagesCommand) -> rose::Result<()> {
    match command {
        CollagesCommand::List => {
            for name in rose::cache::list_collages(config)? {
                println!("{name}");
            }
            Ok(())
        }
        CollagesCommand::Create { name } => rose::collage::create_collage(config, name),
        CollagesCommand::Delete { name } => rose::collage::delete_collage(config, name),
        CollagesCommand::Rename { old_name, new_name } => {
            rose::collage::rename_collage(config, old_name, new_name)
        }
        CollagesCommand::AddRelease { name, release_id } => {
            rose::collage::add_release_to_collage(config, name, release_id)
        }
        CollagesCommand::RemoveRelease { name, release_id } => {
            rose::collage::remove_release_from_collage(config, name, release_id)
        }
        CollagesCommand::Edit { name } => rose::collage::edit_collage_in_editor(config, name),
    }
}

/// Dispatch `playlists` subcommands.
fn run_playlists(config: &Config, command: &PlaylistsCommand) -> rose::Result<()> {
    match command {
        PlaylistsCommand::List => {
            for name in rose::cache::list_playlists(config)? {
                println!("{name}");
            }
            Ok(())
        }
        PlaylistsCommand::Create { name } => rose::playlist::create_playlist(config, name),
        PlaylistsCommand::Delete { name } => rose::playlist::delete_playlist(config, name),
        PlaylistsCommand::Rename { old_name, new_name } => {
            rose::playlist::rename_playlist(config, old_name, new_name)
        }
        PlaylistsCommand::AddTrack { name, track_id } => {
            rose::playlist::add_track_to_playlist(config, name, track_id)
        }
        PlaylistsCommand::RemoveTrack { name, track_id } => {
            rose::playlist::remove_track_from_playlist(config, name, track_id)
        }
        PlaylistsCommand::Edit { name } => rose::playlist::edit_playlist_in_editor(config, name),
    }
}

/// Parse CLI action strings without a matcher context.
fn parse_actions(actions: &[String]) -> rose::Result<Vec<rose::rules::parser::Action>> {
    actions
        .iter()
        .enumerate()
        .map(|(i, a)| rose::rules::parser::Action::parse(a, i + 1, None))
        .collect()
}

/// Print planned or applied per-track changes.
fn print_diffs(diffs: &[TrackDiff], dry_run: bool) {
    let prefix = if dry_run { "would change" } else { "changed" };
    for diff in diffs {
        println!("{}:", diff.source_path.display());
        for change in &diff.changes {
            println!(
                "  {prefix} {}: {:?} -> {:?}",
                change.tag.as_str(),
                change.old,
                change.new
            );
        }
    }
}
