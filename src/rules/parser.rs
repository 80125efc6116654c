// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! The rule DSL parser.
//!
//! A rule is one matcher plus one or more actions. The surface syntax uses `:` to separate
//! sections and `/` to separate an action's target from its kind; both characters are escaped by
//! doubling. Parsing is a single left-to-right scan per section with no backtracking, and every
//! parsed value renders back to an equivalent string via [`std::fmt::Display`].

use crate::error::{Error, ExpectedError, Result};
use regex::Regex;
use std::fmt;

/// A concrete, matchable/mutable tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// `tracktitle`
    TrackTitle,
    /// `tracknumber`
    TrackNumber,
    /// `tracktotal` (matchable, never modifiable)
    TrackTotal,
    /// `discnumber`
    DiscNumber,
    /// `disctotal` (matchable, never modifiable)
    DiscTotal,
    /// `releasetitle`
    ReleaseTitle,
    /// `releasedate`
    ReleaseDate,
    /// `originaldate`
    OriginalDate,
    /// `compositiondate`
    CompositionDate,
    /// `catalognumber`
    CatalogNumber,
    /// `edition`
    Edition,
    /// `releasetype`
    ReleaseType,
    /// `genre`
    Genre,
    /// `secondarygenre`
    SecondaryGenre,
    /// `descriptor`
    Descriptor,
    /// `label`
    Label,
    /// `new`
    New,
    /// `trackartist[main]`
    TrackArtistMain,
    /// `trackartist[guest]`
    TrackArtistGuest,
    /// `trackartist[remixer]`
    TrackArtistRemixer,
    /// `trackartist[producer]`
    TrackArtistProducer,
    /// `trackartist[composer]`
    TrackArtistComposer,
    /// `trackartist[conductor]`
    TrackArtistConductor,
    /// `trackartist[djmixer]`
    TrackArtistDjMixer,
    /// `releaseartist[main]`
    ReleaseArtistMain,
    /// `releaseartist[guest]`
    ReleaseArtistGuest,
    /// `releaseartist[remixer]`
    ReleaseArtistRemixer,
    /// `releaseartist[producer]`
    ReleaseArtistProducer,
    /// `releaseartist[composer]`
    ReleaseArtistComposer,
    /// `releaseartist[conductor]`
    ReleaseArtistConductor,
    /// `releaseartist[djmixer]`
    ReleaseArtistDjMixer,
}

impl Tag {
    /// The DSL name of this tag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Tag::TrackTitle => "tracktitle",
            Tag::TrackNumber => "tracknumber",
            Tag::TrackTotal => "tracktotal",
            Tag::DiscNumber => "discnumber",
            Tag::DiscTotal => "disctotal",
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
            Tag::TrackArtistMain => "trackartist[main]",
            Tag::TrackArtistGuest => "trackartist[guest]",
            Tag::TrackArtistRemixer => "trackartist[remixer]",
            Tag::TrackArtistProducer => "trackartist[producer]",
            Tag::TrackArtistComposer => "trackartist[composer]",
            Tag::TrackArtistConductor => "trackartist[conductor]",
            Tag::TrackArtistDjMixer => "trackartist[djmixer]",
            Tag::ReleaseArtistMain => "releaseartist[main]",
            Tag::ReleaseArtistGuest => "releaseartist[guest]",
            Tag::ReleaseArtistRemixer => "releaseartist[remixer]",
            Tag::ReleaseArtistProducer => "releaseartist[producer]",
            Tag::ReleaseArtistComposer => "releaseartist[composer]",
            Tag::ReleaseArtistConductor => "releaseartist[conductor]",
            Tag::ReleaseArtistDjMixer => "releaseartist[djmixer]",
        }
    }

    /// Whether the tag can hold more than one value.
    #[must_use]
    pub fn is_multi_value(self) -> bool {
        matches!(
            self,
            Tag::Genre
                | Tag::SecondaryGenre
                | Tag::Descriptor
                | Tag::Label
                | Tag::TrackArtistMain
                | Tag::TrackArtistGuest
                | Tag::TrackArtistRemixer
                | Tag::TrackArtistProducer
                | Tag::TrackArtistComposer
                | Tag::TrackArtistConductor
                | Tag::TrackArtistDjMixer
                | Tag::ReleaseArtistMain
                | Tag::ReleaseArtistGuest
                | Tag::ReleaseArtistRemixer
                | Tag::ReleaseArtistProducer
                | Tag::ReleaseArtistComposer
                | Tag::ReleaseArtistConductor
                | Tag::ReleaseArtistDjMixer
        )
    }

    /// Whether actions may modify the tag. The derived totals never are.
    #[must_use]
    pub fn is_modifiable(self) -> bool {
        !matches!(self, Tag::TrackTotal | Tag::DiscTotal)
    }

    /// Parse a concrete tag name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        ALL_TAGS.iter().copied().find(|t| t.as_str() == name)
    }
}

/// Every concrete tag, in canonical order.
pub const ALL_TAGS: &[Tag] = &[
    Tag::TrackTitle,
    Tag::TrackNumber,
    Tag::TrackTotal,
    Tag::DiscNumber,
    Tag::DiscTotal,
    Tag::ReleaseTitle,
    Tag::ReleaseDate,
    Tag::OriginalDate,
    Tag::CompositionDate,
    Tag::CatalogNumber,
    Tag::Edition,
    Tag::ReleaseType,
    Tag::Genre,
    Tag::SecondaryGenre,
    Tag::Descriptor,
    Tag::Label,
    Tag::New,
    Tag::TrackArtistMain,
    Tag::TrackArtistGuest,
    Tag::TrackArtistRemixer,
    Tag::TrackArtistProducer,
    Tag::TrackArtistComposer,
    Tag::TrackArtistConductor,
    Tag::TrackArtistDjMixer,
    Tag::ReleaseArtistMain,
    Tag::ReleaseArtistGuest,
    Tag::ReleaseArtistRemixer,
    Tag::ReleaseArtistProducer,
    Tag::ReleaseArtistComposer,
    Tag::ReleaseArtistConductor,
    Tag::ReleaseArtistDjMixer,
];

/// The expansion of `trackartist`.
const TRACK_ARTIST_TAGS: &[Tag] = &[
    Tag::TrackArtistMain,
    Tag::TrackArtistGuest,
    Tag::TrackArtistRemixer,
    Tag::TrackArtistProducer,
    Tag::TrackArtistComposer,
    Tag::TrackArtistConductor,
    Tag::TrackArtistDjMixer,
];

/// The expansion of `releaseartist`.
const RELEASE_ARTIST_TAGS: &[Tag] = &[
    Tag::ReleaseArtistMain,
    Tag::ReleaseArtistGuest,
    Tag::ReleaseArtistRemixer,
    Tag::ReleaseArtistProducer,
    Tag::ReleaseArtistComposer,
    Tag::ReleaseArtistConductor,
    Tag::ReleaseArtistDjMixer,
];

/// A tag shorthand that expands to several concrete tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandableTag {
    /// `artist`: all fourteen artist tags.
    Artist,
    /// `trackartist`: the seven track artist tags.
    TrackArtist,
    /// `releaseartist`: the seven release artist tags.
    ReleaseArtist,
}

impl ExpandableTag {
    /// The concrete tags this shorthand stands for.
    #[must_use]
    pub fn expand(self) -> Vec<Tag> {
        match self {
            ExpandableTag::Artist => {
                let mut tags = TRACK_ARTIST_TAGS.to_vec();
                tags.extend_from_slice(RELEASE_ARTIST_TAGS);
                tags
            }
            ExpandableTag::TrackArtist => TRACK_ARTIST_TAGS.to_vec(),
            ExpandableTag::ReleaseArtist => RELEASE_ARTIST_TAGS.to_vec(),
        }
    }
}

/// Resolve a tag name (concrete or shorthand) to concrete tags.
fn resolve_tag_name(name: &str) -> Option<Vec<Tag>> {
    match name {
        "artist" => Some(ExpandableTag::Artist.expand()),
        "trackartist" => Some(ExpandableTag::TrackArtist.expand()),
        "releaseartist" => Some(ExpandableTag::ReleaseArtist.expand()),
        _ => Tag::from_name(name).map(|t| vec![t]),
    }
}

/// Render a tag list, compressing full shorthand expansions back to their shorthand.
#[must_use]
pub fn stringify_tags(tags: &[Tag]) -> String {
    let mut parts = Vec::new();
    let mut i = 0;
    while i < tags.len() {
        let rest = &tags[i..];
        let artist = ExpandableTag::Artist.expand();
        if rest.starts_with(&artist) {
            parts.push("artist".to_string());
            i += artist.len();
            continue;
        }
        if rest.starts_with(TRACK_ARTIST_TAGS) {
            parts.push("trackartist".to_string());
            i += TRACK_ARTIST_TAGS.len();
            continue;
        }
        if rest.starts_with(RELEASE_ARTIST_TAGS) {
            parts.push("releaseartist".to_string());
            i += RELEASE_ARTIST_TAGS.len();
            continue;
        }
        parts.push(tags[i].as_str().to_string());
        i += 1;
    }
    parts.join(",")
}

/// Escape a literal value for embedding into rule syntax: `:` and `/` are doubled.
#[must_use]
pub fn escape(value: &str) -> String {
    value.replace(':', "::").replace('/', "//")
}

/// Shorthand for an [`ExpectedError::InvalidRule`].
fn rule_error(message: impl Into<String>) -> Error {
    ExpectedError::InvalidRule(message.into()).into()
}

/// Scan `input` up to the first unescaped occurrence of `until`, unescaping doubled `:` and `/`.
///
/// Returns the unescaped text and the number of bytes consumed (including the delimiter when
/// `including` is set). When no delimiter occurs, the whole input is consumed.
///
/// # Errors
///
/// Infallible today; sections that need lookahead validation hook in here.
pub fn take(input: &str, until: &str, including: bool) -> Result<(String, usize)> {
    let delimiter = until.chars().next();
    let mut text = String::new();
    let mut chars = input.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if c == ':' || c == '/' {
            if chars.peek().is_some_and(|&(_, next)| next == c) {
                // Doubled special character: one literal occurrence.
                text.push(c);
                let _consumed = chars.next();
                continue;
            }
            if Some(c) == delimiter {
                let consumed = if including { idx + c.len_utf8() } else { idx };
                return Ok((text, consumed));
            }
        }
        text.push(c);
    }
    Ok((text, input.len()))
}

/// Whether a `take` result hit the end of the input without finding the delimiter.
fn hit_end(input: &str, consumed: usize) -> bool {
    consumed >= input.len() && !ends_with_unescaped(input, ':')
}

/// Whether the input ends with an unescaped occurrence of the delimiter character.
fn ends_with_unescaped(input: &str, delimiter: char) -> bool {
    let trailing = input.chars().rev().take_while(|&c| c == delimiter).count();
    trailing % 2 == 1
}

/// A match pattern: an opaque needle with optional anchors and a case-insensitivity flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    /// The needle, with anchor escapes resolved.
    pub needle: String,
    /// Whether the match must start at the beginning of the value.
    pub strict_start: bool,
    /// Whether the match must end at the end of the value.
    pub strict_end: bool,
    /// Whether matching ignores case.
    pub case_insensitive: bool,
}

impl Pattern {
    /// Parse a raw needle, resolving `^`/`$` anchors and their `\^`/`\$` escapes.
    #[must_use]
    pub fn new(raw: String) -> Self {
        let mut needle = raw;
        let mut strict_start = false;
        let mut strict_end = false;
        if let Some(stripped) = needle.strip_prefix('^') {
            strict_start = true;
            needle = stripped.to_string();
        } else if let Some(stripped) = needle.strip_prefix("\\^") {
            needle = format!("^{stripped}");
        }
        if let Some(stripped) = needle.strip_suffix("\\$") {
            needle = format!("{stripped}$");
        } else if let Some(stripped) = needle.strip_suffix('$') {
            strict_end = true;
            needle = stripped.to_string();
        }
        Pattern {
            needle,
            strict_start,
            strict_end,
            case_insensitive: false,
        }
    }

    /// Whether the pattern matches the value. An empty needle without anchors matches anything.
    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        let (needle, haystack) = if self.case_insensitive {
            (self.needle.to_lowercase(), value.to_lowercase())
        } else {
            (self.needle.clone(), value.to_string())
        };
        match (self.strict_start, self.strict_end) {
            (true, true) => haystack == needle,
            (true, false) => haystack.starts_with(&needle),
            (false, true) => haystack.ends_with(&needle),
            (false, false) => haystack.contains(&needle),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = escape(&self.needle);
        if self.strict_start {
            out.insert(0, '^');
        } else if out.starts_with('^') {
            out.insert(0, '\\');
        }
        if self.strict_end {
            out.push('$');
        } else if out.ends_with('$') {
            out.insert(out.len() - 1, '\\');
        }
        if self.case_insensitive {
            out.push_str(":i");
        }
        write!(f, "{out}")
    }
}

/// A matcher: the tags to search and the pattern to match against their values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matcher {
    /// The concrete tags, shorthands expanded.
    pub tags: Vec<Tag>,
    /// The pattern.
    pub pattern: Pattern,
}

impl Matcher {
    /// Parse a matcher string: `tags ":" pattern [":i"]`.
    ///
    /// # Errors
    ///
    /// Returns an [`ExpectedError::InvalidRule`] describing the first syntax error.
    pub fn parse(input: &str) -> Result<Self> {
        let (tags, rest) = parse_tags_section(input)?;
        let (raw_needle, consumed) = take(rest, ":", true)?;
        let mut pattern = Pattern::new(raw_needle);
        if !hit_end(rest, consumed) {
            let flags = &rest[consumed..];
            let (flag, flag_consumed) = take(flags, ":", true)?;
            match flag.as_str() {
                "i" => pattern.case_insensitive = true,
                other => {
                    return Err(rule_error(format!(
                        "Failed to parse matcher {input}: Unrecognized flag {other:?}: only the \
                         `i` (case insensitive) flag is supported"
                    )))
                }
            }
            if !hit_end(flags, flag_consumed) || flag_consumed < flags.len() {
                return Err(rule_error(format!(
                    "Failed to parse matcher {input}: Extra input found after end of matcher"
                )));
            }
        }
        Ok(Matcher { tags, pattern })
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", stringify_tags(&self.tags), self.pattern)
    }
}

/// Parse the leading comma-separated tag list of a matcher, consuming the trailing `:`.
fn parse_tags_section(input: &str) -> Result<(Vec<Tag>, &str)> {
    let mut tags = Vec::new();
    let mut idx = 0;
    loop {
        let rest = &input[idx..];
        let delim_pos = rest.find([',', ':']);
        let Some(delim_pos) = delim_pos else {
            if resolve_tag_name(rest).is_some() {
                return Err(rule_error(format!(
                    "Failed to parse matcher {input}: Expected to find ',' or ':', found end of string"
                )));
            }
            return Err(rule_error(format!(
                "Failed to parse matcher {input}: Invalid tag {rest:?}"
            )));
        };
        let name = &rest[..delim_pos];
        let Some(resolved) = resolve_tag_name(name) else {
            return Err(rule_error(format!(
                "Failed to parse matcher {input}: Invalid tag {name:?}"
            )));
        };
        tags.extend(resolved);
        idx += delim_pos + 1;
        if rest.as_bytes()[delim_pos] == b':' {
            return Ok((tags, &input[idx..]));
        }
    }
}

/// The replacement behavior: substitute the whole value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceAction {
    /// The new value.
    pub replacement: String,
}

/// The sed behavior: substitute regex matches within the value.
#[derive(Debug, Clone)]
pub struct SedAction {
    /// The compiled pattern.
    pub src: Regex,
    /// The replacement text (regex capture group syntax allowed).
    pub dst: String,
}

impl PartialEq for SedAction {
    fn eq(&self, other: &Self) -> bool {
        self.src.as_str() == other.src.as_str() && self.dst == other.dst
    }
}

/// The split behavior: turn one value into several.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitAction {
    /// The delimiter to split on.
    pub delimiter: String,
}

/// The add behavior: append a value to a multi-valued tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddAction {
    /// The value to add.
    pub value: String,
}

/// The delete behavior: remove matching values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeleteAction;

/// What an action does to its target tags.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionBehavior {
    /// Substitute the whole value.
    Replace(ReplaceAction),
    /// Substitute regex matches.
    Sed(SedAction),
    /// Split one value into several.
    Split(SplitAction),
    /// Append a value.
    Add(AddAction),
    /// Remove matching values.
    Delete(DeleteAction),
}

impl ActionBehavior {
    /// The DSL kind name.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ActionBehavior::Replace(_) => "replace",
            ActionBehavior::Sed(_) => "sed",
            ActionBehavior::Split(_) => "split",
            ActionBehavior::Add(_) => "add",
            ActionBehavior::Delete(_) => "delete",
        }
    }

    /// Whether the behavior only makes sense on multi-valued tags.
    #[must_use]
    pub fn is_multi_value(&self) -> bool {
        matches!(self, ActionBehavior::Split(_) | ActionBehavior::Add(_))
    }
}

impl fmt::Display for ActionBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionBehavior::Replace(r) => write!(f, "replace:{}", escape(&r.replacement)),
            ActionBehavior::Sed(s) => {
                write!(f, "sed:{}:{}", escape(s.src.as_str()), escape(&s.dst))
            }
            ActionBehavior::Split(s) => write!(f, "split:{}", escape(&s.delimiter)),
            ActionBehavior::Add(a) => write!(f, "add:{}", escape(&a.value)),
            ActionBehavior::Delete(_) => write!(f, "delete"),
        }
    }
}

/// A single action: target tags, an optional value filter, and a behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    /// The concrete target tags.
    pub tags: Vec<Tag>,
    /// Only values matching this pattern are acted upon.
    pub pattern: Option<Pattern>,
    /// What to do.
    pub behavior: ActionBehavior,
}

impl Action {
    /// Parse an action string: `[tags [":" pattern] "/"] kind [":" args]`.
    ///
    /// When the leading target section is omitted (or spelled `matched`), the target is inherited
    /// from the matcher; an action whose target tags equal the matcher's also inherits the
    /// matcher's pattern. `action_number` is used in error messages (1-based).
    ///
    /// # Errors
    ///
    /// Returns an [`ExpectedError::InvalidRule`] describing the first syntax error.
    pub fn parse(input: &str, action_number: usize, matcher: Option<&Matcher>) -> Result<Self> {
        let err = |message: String| {
            rule_error(format!("Failed to parse action {action_number} ({input}): {message}"))
        };

        // Determine whether a target section precedes the kind: scan for an unescaped `/`.
        let (target_section, kind_section) = split_target_and_kind(input);

        let (tags, mut pattern) = match target_section {
            Some(section) => {
                parse_action_target(section, matcher).map_err(|e| err(e.to_string()))?
            }
            None => match matcher {
                Some(matcher) => (
                    modifiable_tags(&matcher.tags),
                    Some(matcher.pattern.clone()),
                ),
                None => {
                    return Err(err(
                        "Tags/pattern section not found. Must specify tags to modify, since \
                         there is no matcher to default to"
                            .to_string(),
                    ))
                }
            },
        };
        // An explicit target without a pattern inherits the matcher's pattern when it targets the
        // same tags.
        if pattern.is_none() {
            if let Some(matcher) = matcher {
                if tags == modifiable_tags(&matcher.tags) {
                    pattern = Some(matcher.pattern.clone());
                }
            }
        }

        let behavior = parse_behavior(kind_section, &err)?;

        if behavior.is_multi_value() {
            let single_valued: Vec<&str> = tags
                .iter()
                .filter(|t| !t.is_multi_value())
                .map(|t| t.as_str())
                .collect();
            if !single_valued.is_empty() {
                return Err(rule_error(format!(
                    "Failed to parse action {action_number} ({input}): Single valued tags {} \
                     cannot be modified by multi-value action {}",
                    single_valued.join(","),
                    behavior.kind(),
                )));
            }
        }

        Ok(Action {
            tags,
            pattern,
            behavior,
        })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", stringify_tags(&self.tags))?;
        if let Some(pattern) = &self.pattern {
            write!(f, ":{pattern}")?;
        }
        write!(f, "/{}", self.behavior)
    }
}

/// Split an action string into its optional target section and its kind section.
fn split_target_and_kind(input: &str) -> (Option<&str>, &str) {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'/' || c == b':' {
            if i + 1 < bytes.len() && bytes[i + 1] == c {
                i += 2;
                continue;
            }
            if c == b'/' {
                return (Some(&input[..i]), &input[i + 1..]);
            }
        }
        i += 1;
    }
    (None, input)
}

/// Filter out the never-modifiable tags inherited from a matcher.
fn modifiable_tags(tags: &[Tag]) -> Vec<Tag> {
    tags.iter().copied().filter(|t| t.is_modifiable()).collect()
}

/// Parse an action's explicit target section: `tags [":" pattern [":i"]]`.
fn parse_action_target(section: &str, matcher: Option<&Matcher>) -> Result<(Vec<Tag>, Option<Pattern>)> {
    // The tag list ends at the first unescaped `:`; the remainder is the pattern.
    let (names_part, pattern_part) = match split_unescaped_colon(section) {
        Some((names, pattern)) => (names, Some(pattern)),
        None => (section, None),
    };

    let mut tags = Vec::new();
    for name in names_part.split(',') {
        if name == "matched" {
            let Some(matcher) = matcher else {
                return Err(rule_error(
                    "Cannot use the `matched` pseudo-tag without a matcher".to_string(),
                ));
            };
            tags.extend(modifiable_tags(&matcher.tags));
            continue;
        }
        let Some(resolved) = resolve_tag_name(name) else {
            return Err(rule_error(format!("Invalid tag {name:?}")));
        };
        // Explicitly naming a derived total is an error; shorthands never expand to one.
        if resolved.iter().any(|t| !t.is_modifiable()) {
            return Err(rule_error(format!("Tag {name} is not modifiable")));
        }
        tags.extend(resolved);
    }

    let pattern = match pattern_part {
        None => None,
        Some(raw) => {
            let (needle, consumed) = take(raw, ":", true)?;
            let mut pattern = Pattern::new(needle);
            if !hit_end(raw, consumed) {
                let flags = &raw[consumed..];
                let (flag, flag_consumed) = take(flags, ":", true)?;
                match flag.as_str() {
                    "i" => pattern.case_insensitive = true,
                    other => {
                        return Err(rule_error(format!(
                            "Unrecognized flag {other:?}: only the `i` (case insensitive) flag \
                             is supported"
                        )))
                    }
                }
                if flag_consumed < flags.len() {
                    return Err(rule_error(
                        "Extra input found after end of matcher".to_string(),
                    ));
                }
            }
            Some(pattern)
        }
    };
    Ok((tags, pattern))
}

/// Find the first unescaped `:` of a target section and split there.
fn split_unescaped_colon(input: &str) -> Option<(&str, &str)> {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b':' || c == b'/' {
            if i + 1 < bytes.len() && bytes[i + 1] == c {
                i += 2;
                continue;
            }
            if c == b':' {
                return Some((&input[..i], &input[i + 1..]));
            }
        }
        i += 1;
    }
    None
}

/// Parse the kind section of an action.
fn parse_behavior(
    section: &str,
    err: &impl Fn(String) -> Error,
) -> Result<ActionBehavior> {
    // Kind names never contain special characters, so the kind/args split does not unescape.
    let (kind, args) = match section.split_once(':') {
        Some((kind, args)) => (kind, Some(args)),
        None => (section, None),
    };
    match kind {
        "replace" => {
            let Some(args) = args else {
                return Err(err("Replacement not found: must specify a non-empty replacement \
                                value after `replace:`"
                    .to_string()));
            };
            let (replacement, consumed) = take(args, ":", true)?;
            if replacement.is_empty() {
                return Err(err("Replacement not found: must specify a non-empty replacement \
                                value after `replace:`"
                    .to_string()));
            }
            if !hit_end(args, consumed) {
                return Err(err("Found another section after the replacement, but the replace \
                                action only takes a single argument"
                    .to_string()));
            }
            Ok(ActionBehavior::Replace(ReplaceAction { replacement }))
        }
        "sed" => {
            let Some(args) = args else {
                return Err(err("Empty sed pattern found: must specify a non-empty pattern"
                    .to_string()));
            };
            let (src, consumed) = take(args, ":", true)?;
            if src.is_empty() {
                return Err(err("Empty sed pattern found: must specify a non-empty pattern"
                    .to_string()));
            }
            let src = Regex::new(&src).map_err(|e| {
                err(format!("Failed to compile the sed pattern regex: invalid pattern {src:?}: {e}"))
            })?;
            if hit_end(args, consumed) {
                return Err(err("Sed replacement not found: must specify a sed replacement \
                                section after the sed pattern"
                    .to_string()));
            }
            let dst_section = &args[consumed..];
            let (dst, dst_consumed) = take(dst_section, ":", true)?;
            if !hit_end(dst_section, dst_consumed) {
                return Err(err("Found another section after the sed replacement, but the sed \
                                action only takes two arguments"
                    .to_string()));
            }
            Ok(ActionBehavior::Sed(SedAction { src, dst }))
        }
        "split" => {
            let Some(args) = args else {
                return Err(err("Delimiter not found: must specify a non-empty delimiter after \
                                `split:`"
                    .to_string()));
            };
            let (delimiter, consumed) = take(args, ":", true)?;
            if delimiter.is_empty() {
                return Err(err("Delimiter not found: must specify a non-empty delimiter after \
                                `split:`"
                    .to_string()));
            }
            if !hit_end(args, consumed) {
                return Err(err("Found another section after the delimiter, but the split \
                                action only takes a single argument"
                    .to_string()));
            }
            Ok(ActionBehavior::Split(SplitAction { delimiter }))
        }
        "add" => {
            let Some(args) = args else {
                return Err(err("Value not found: must specify a non-empty value after `add:`"
                    .to_string()));
            };
            let (value, consumed) = take(args, ":", true)?;
            if value.is_empty() {
                return Err(err("Value not found: must specify a non-empty value after `add:`"
                    .to_string()));
            }
            if !hit_end(args, consumed) {
                return Err(err("Found another section after the value, but the add action \
                                only takes a single argument"
                    .to_string()));
            }
            Ok(ActionBehavior::Add(AddAction { value }))
        }
        "delete" => {
            if args.is_some() {
                return Err(err("Found another section after the action kind, but the delete \
                                action takes no arguments"
                    .to_string()));
            }
            Ok(ActionBehavior::Delete(DeleteAction))
        }
        other => Err(err(format!(
            "Invalid action kind {other:?}: must be one of replace, sed, split, add, delete"
        ))),
    }
}

/// A parsed rule: one matcher and its actions.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    /// The matcher.
    pub matcher: Matcher,
    /// The actions, applied in order.
    pub actions: Vec<Action>,
}

impl Rule {
    /// Parse a rule from its matcher string and action strings.
    ///
    /// # Errors
    ///
    /// Returns an [`ExpectedError::InvalidRule`] describing the first syntax error.
    pub fn parse(matcher: &str, actions: Vec<&str>) -> Result<Self> {
        let matcher = Matcher::parse(matcher)?;
        let actions = actions
            .iter()
            .enumerate()
            .map(|(i, a)| Action::parse(a, i + 1, Some(&matcher)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Rule { matcher, actions })
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "matcher={}", quote(&self.matcher.to_string()))?;
        for action in &self.actions {
            write!(f, " action={}", quote(&action.to_string()))?;
        }
        Ok(())
    }
}

/// Shell-style quoting for rendered sections: values made only of safe characters pass through,
/// everything else is single-quoted.
fn quote(value: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "@%+=:,./-_^$[]".contains(c);
    if !value.is_empty() && value.chars().all(safe) {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_str() {
        let rule = Rule::parse("tracktitle:Track", vec!["releaseartist,genre/replace:lalala"])
            .unwrap();
        assert_eq!(
            rule.to_string(),
            "matcher=tracktitle:Track action=releaseartist,genre/replace:lalala"
        );

        // Sections with whitespace or backslashes are quoted.
        let rule = Rule::parse(r"tracktitle,releaseartist,genre::: ", vec![r"sed::::; "]).unwrap();
        assert_eq!(
            rule.to_string(),
            r"matcher='tracktitle,releaseartist,genre::: ' action='tracktitle,releaseartist,genre::: /sed::::; '"
        );

        // A custom action target renders verbatim.
        let rule = Rule::parse("tracktitle:Track", vec!["genre:lala/replace:lalala"]).unwrap();
        assert_eq!(
            rule.to_string(),
            "matcher=tracktitle:Track action=genre:lala/replace:lalala"
        );

        let rule = Rule::parse("genre:b", vec!["genre:h/replace:hi"]).unwrap();
        assert_eq!(rule.to_string(), "matcher=genre:b action=genre:h/replace:hi");
    }

    #[test]
    fn test_rule_parse_matcher() {
        let matcher = Matcher::parse("tracktitle:Track").unwrap();
        assert_eq!(matcher.tags, vec![Tag::TrackTitle]);
        assert_eq!(matcher.pattern.needle, "Track");
        assert!(!matcher.pattern.case_insensitive);

        let matcher = Matcher::parse("tracktitle,tracknumber:Track").unwrap();
        assert_eq!(matcher.tags, vec![Tag::TrackTitle, Tag::TrackNumber]);
        assert_eq!(matcher.pattern.needle, "Track");

        let matcher = Matcher::parse(r"tracktitle,tracknumber:Tr::ck").unwrap();
        assert_eq!(matcher.tags, vec![Tag::TrackTitle, Tag::TrackNumber]);
        assert_eq!(matcher.pattern.needle, "Tr:ck");

        let matcher = Matcher::parse("tracktitle,tracknumber:Track:i").unwrap();
        assert_eq!(matcher.tags, vec![Tag::TrackTitle, Tag::TrackNumber]);
        assert_eq!(matcher.pattern.needle, "Track");
        assert!(matcher.pattern.case_insensitive);

        let matcher = Matcher::parse("tracktitle:").unwrap();
        assert_eq!(matcher.tags, vec![Tag::TrackTitle]);
        assert_eq!(matcher.pattern.needle, "");

        let matcher = Matcher::parse("tracktitle:^Track").unwrap();
        assert!(matcher.pattern.strict_start);
        assert!(!matcher.pattern.strict_end);
        assert_eq!(matcher.pattern.needle, "Track");

        let matcher = Matcher::parse("tracktitle:Track$").unwrap();
        assert!(!matcher.pattern.strict_start);
        assert!(matcher.pattern.strict_end);
        assert_eq!(matcher.pattern.needle, "Track");

        let matcher = Matcher::parse(r"tracktitle:\^Track").unwrap();
        assert!(!matcher.pattern.strict_start);
        assert_eq!(matcher.pattern.needle, "^Track");

        let matcher = Matcher::parse(r"tracktitle:Track\$").unwrap();
        assert!(!matcher.pattern.strict_end);
        assert_eq!(matcher.pattern.needle, "Track$");

        let matcher = Matcher::parse(r"tracktitle:\^Track\$").unwrap();
        assert!(!matcher.pattern.strict_start);
        assert!(!matcher.pattern.strict_end);
        assert_eq!(matcher.pattern.needle, "^Track$");
    }

    #[test]
    fn test_rule_parse_matcher_errors() {
        let err = Matcher::parse("tracknumber^Track$").unwrap_err();
        assert!(err.to_string().contains("Invalid tag"));

        let err = Matcher::parse("tracknumber").unwrap_err();
        assert!(err
            .to_string()
            .contains("Expected to find ',' or ':', found end of string"));

        let err = Matcher::parse("tracktitle:Tr:ck").unwrap_err();
        assert!(err.to_string().contains("Unrecognized flag"));

        let err = Matcher::parse("tracktitle:hi:i:hihi").unwrap_err();
        assert!(err.to_string().contains("Extra input found after end of matcher"));
    }

    #[test]
    fn test_rule_parse_action() {
        let matcher = Matcher::parse("tracktitle:haha").unwrap();

        let action = Action::parse("replace:lalala", 1, Some(&matcher)).unwrap();
        assert_eq!(action.tags, vec![Tag::TrackTitle]);
        assert_eq!(action.pattern.as_ref().unwrap().needle, "haha");
        match &action.behavior {
            ActionBehavior::Replace(r) => assert_eq!(r.replacement, "lalala"),
            other => panic!("expected replace, got {other:?}"),
        }

        let action = Action::parse("genre/replace:lalala", 1, None).unwrap();
        assert_eq!(action.tags, vec![Tag::Genre]);
        assert!(action.pattern.is_none());

        let action = Action::parse("tracknumber,genre/replace:lalala", 1, None).unwrap();
        assert_eq!(action.tags, vec![Tag::TrackNumber, Tag::Genre]);
        assert!(action.pattern.is_none());

        let action = Action::parse("genre:lala/replace:lalala", 1, None).unwrap();
        assert_eq!(action.tags, vec![Tag::Genre]);
        assert_eq!(action.pattern.as_ref().unwrap().needle, "lala");

        let action = Action::parse("genre:lala:i/replace:lalala", 1, None).unwrap();
        assert_eq!(action.tags, vec![Tag::Genre]);
        assert_eq!(action.pattern.as_ref().unwrap().needle, "lala");
        assert!(action.pattern.as_ref().unwrap().case_insensitive);

        let action = Action::parse("matched:^x/replace:lalala", 1, Some(&matcher)).unwrap();
        assert_eq!(action.tags, vec![Tag::TrackTitle]);
        assert_eq!(action.pattern.as_ref().unwrap().needle, "x");
        assert!(action.pattern.as_ref().unwrap().strict_start);

        // Case insensitivity is inherited together with the pattern.
        let matcher_i = Matcher::parse("tracktitle:haha:i").unwrap();
        let action = Action::parse("replace:lalala", 1, Some(&matcher_i)).unwrap();
        assert!(action.pattern.as_ref().unwrap().case_insensitive);

        // Inherited derived totals are silently filtered.
        let matcher_totals =
            Matcher::parse("tracknumber,tracktotal,discnumber,disctotal:1").unwrap();
        let action = Action::parse("replace:5", 1, Some(&matcher_totals)).unwrap();
        assert_eq!(action.tags, vec![Tag::TrackNumber, Tag::DiscNumber]);

        let matcher = Matcher::parse("genre:haha").unwrap();
        let action = Action::parse("sed:lalala:hahaha", 1, Some(&matcher)).unwrap();
        match &action.behavior {
            ActionBehavior::Sed(s) => {
                assert_eq!(s.src.as_str(), "lalala");
                assert_eq!(s.dst, "hahaha");
            }
            other => panic!("expected sed, got {other:?}"),
        }

        let action = Action::parse(r"split:::", 1, Some(&matcher)).unwrap();
        match &action.behavior {
            ActionBehavior::Split(s) => assert_eq!(s.delimiter, ":"),
            other => panic!("expected split, got {other:?}"),
        }

        let action = Action::parse("add:cute", 1, Some(&matcher)).unwrap();
        match &action.behavior {
            ActionBehavior::Add(a) => assert_eq!(a.value, "cute"),
            other => panic!("expected add, got {other:?}"),
        }

        let action = Action::parse("delete", 1, Some(&matcher)).unwrap();
        assert!(matches!(action.behavior, ActionBehavior::Delete(_)));
    }

    #[test]
    fn test_rule_parse_action_errors() {
        let matcher = Matcher::parse("genre:haha").unwrap();

        let err = Action::parse("tracktitle:hello/:delete", 1, None).unwrap_err();
        assert!(err.to_string().contains("Invalid action kind"));

        let err = Action::parse("haha/delete", 1, None).unwrap_err();
        assert!(err.to_string().contains("Invalid tag"));

        let err = Action::parse("tracktitler/delete", 1, None).unwrap_err();
        assert!(err.to_string().contains("Invalid tag"));

        let err = Action::parse("tracktitle:haha:delete", 1, Some(&matcher)).unwrap_err();
        assert!(err.to_string().contains("Invalid action kind"));

        let err = Action::parse("tracktitle:haha:sed/hi:bye", 1, None).unwrap_err();
        assert!(err.to_string().contains("Unrecognized flag"));

        let err = Action::parse("hahaha", 1, Some(&matcher)).unwrap_err();
        assert!(err.to_string().contains("Invalid action kind"));

        let err = Action::parse("replace", 1, Some(&matcher)).unwrap_err();
        assert!(err.to_string().contains("Replacement not found"));

        let err = Action::parse("replace:haha:", 1, Some(&matcher)).unwrap_err();
        assert!(err.to_string().contains("Found another section after the replacement"));

        let err = Action::parse("sed", 1, Some(&matcher)).unwrap_err();
        assert!(err.to_string().contains("Empty sed pattern found"));

        let err = Action::parse("sed:hihi", 1, Some(&matcher)).unwrap_err();
        assert!(err.to_string().contains("Sed replacement not found"));

        let err = Action::parse("sed:invalid[", 1, Some(&matcher)).unwrap_err();
        assert!(err.to_string().contains("Failed to compile the sed pattern regex"));

        let err = Action::parse("sed:hihi:byebye:", 1, Some(&matcher)).unwrap_err();
        assert!(err.to_string().contains("Found another section after the sed replacement"));

        let err = Action::parse("split", 1, Some(&matcher)).unwrap_err();
        assert!(err.to_string().contains("Delimiter not found"));

        let err = Action::parse("split:hi:", 1, Some(&matcher)).unwrap_err();
        assert!(err.to_string().contains("Found another section after the delimiter"));

        let err = Action::parse("split:", 1, Some(&matcher)).unwrap_err();
        assert!(err.to_string().contains("Delimiter not found"));

        let err = Action::parse("add", 1, Some(&matcher)).unwrap_err();
        assert!(err.to_string().contains("Value not found"));

        let err = Action::parse("add:hi:", 1, Some(&matcher)).unwrap_err();
        assert!(err.to_string().contains("Found another section after the value"));

        let err = Action::parse("add:", 1, Some(&matcher)).unwrap_err();
        assert!(err.to_string().contains("Value not found"));

        let err = Action::parse("delete:h", 1, Some(&matcher)).unwrap_err();
        assert!(err.to_string().contains("Found another section after the action kind"));

        let err = Action::parse("delete", 1, None).unwrap_err();
        assert!(err.to_string().contains("Tags/pattern section not found"));

        let err = Action::parse("tracktotal/replace:1", 1, None).unwrap_err();
        assert!(err.to_string().contains("is not modifiable"));

        let err = Action::parse("disctotal/replace:1", 1, None).unwrap_err();
        assert!(err.to_string().contains("is not modifiable"));
    }

    #[test]
    fn test_rule_parsing_end_to_end() {
        let rule = Rule::parse("tracktitle:Track", vec!["delete"]).unwrap();
        assert_eq!(
            rule.to_string(),
            "matcher=tracktitle:Track action=tracktitle:Track/delete"
        );

        for (matcher, action) in [
            (r"tracktitle:\^Track", "delete"),
            (r"tracktitle:Track\$", "delete"),
            (r"tracktitle:\^Track\$", "delete"),
        ] {
            let rule = Rule::parse(matcher, vec![action]).unwrap();
            assert_eq!(
                rule.to_string(),
                format!("matcher='{matcher}' action='{matcher}/{action}'")
            );
        }

        for (matcher, action) in [
            ("tracktitle:Track", "genre:lala/replace:lalala"),
            ("tracktitle,genre,trackartist:Track", "tracktitle,genre,artist/delete"),
        ] {
            let rule = Rule::parse(matcher, vec![action]).unwrap();
            assert_eq!(rule.to_string(), format!("matcher={matcher} action={action}"));
        }
    }

    #[test]
    fn test_rule_parsing_multi_value_validation() {
        let err = Rule::parse("tracktitle:h", vec!["split:x"]).unwrap_err();
        assert!(err.to_string().contains(
            "Single valued tags tracktitle cannot be modified by multi-value action split"
        ));

        let err = Rule::parse("genre:h", vec!["tracktitle/split:x"]).unwrap_err();
        assert!(err.to_string().contains(
            "Single valued tags tracktitle cannot be modified by multi-value action split"
        ));

        let err = Rule::parse("genre:h", vec!["split:y", "tracktitle/split:x"]).unwrap_err();
        assert!(err.to_string().contains(
            "Single valued tags tracktitle cannot be modified by multi-value action split"
        ));
    }

    #[test]
    fn test_rule_parsing_defaults() {
        let rule = Rule::parse("tracktitle:Track", vec!["replace:hi"]).unwrap();
        assert_eq!(rule.actions[0].pattern.as_ref().unwrap().needle, "Track");

        let rule = Rule::parse("tracktitle:Track", vec!["tracktitle/replace:hi"]).unwrap();
        assert_eq!(rule.actions[0].pattern.as_ref().unwrap().needle, "Track");

        let rule = Rule::parse("tracktitle:Track", vec!["tracktitle:Lack/replace:hi"]).unwrap();
        assert_eq!(rule.actions[0].pattern.as_ref().unwrap().needle, "Lack");
    }

    #[test]
    fn test_parser_take() {
        assert_eq!(take("hello", ":", true).unwrap(), ("hello".to_string(), 5));
        assert_eq!(take("hello:hi", ":", true).unwrap(), ("hello".to_string(), 6));
        assert_eq!(take(r"h::lo:hi", ":", true).unwrap(), ("h:lo".to_string(), 6));
        assert_eq!(take(r"h:://lo:hi", ":", true).unwrap(), ("h:/lo".to_string(), 8));
        assert_eq!(take(r"h::lo/hi", "/", true).unwrap(), ("h:lo".to_string(), 6));
        assert_eq!(take(r"h:://lo/hi", "/", true).unwrap(), ("h:/lo".to_string(), 8));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("hello"), "hello");
        assert_eq!(escape("hello:world"), "hello::world");
        assert_eq!(escape("hello/world"), "hello//world");
        assert_eq!(escape("hello:world/test"), "hello::world//test");
    }

    #[test]
    fn test_stringify_tags() {
        assert_eq!(stringify_tags(&[Tag::TrackTitle, Tag::Genre]), "tracktitle,genre");
        assert_eq!(stringify_tags(&ExpandableTag::Artist.expand()), "artist");
        assert_eq!(stringify_tags(&ExpandableTag::TrackArtist.expand()), "trackartist");
        assert_eq!(stringify_tags(&ExpandableTag::ReleaseArtist.expand()), "releaseartist");
    }

    #[test]
    fn test_pattern_display() {
        assert_eq!(Pattern::new("hello".to_string()).to_string(), "hello");

        let pattern = Pattern::new("^hello".to_string());
        assert!(pattern.strict_start);
        assert_eq!(pattern.to_string(), "^hello");

        let pattern = Pattern::new("hello$".to_string());
        assert!(pattern.strict_end);
        assert_eq!(pattern.to_string(), "hello$");

        let pattern = Pattern::new(r"\^hello".to_string());
        assert!(!pattern.strict_start);
        assert_eq!(pattern.to_string(), r"\^hello");

        let pattern = Pattern::new(r"hello\$".to_string());
        assert!(!pattern.strict_end);
        assert_eq!(pattern.to_string(), r"hello\$");

        let mut pattern = Pattern::new("hello:world".to_string());
        pattern.case_insensitive = true;
        assert_eq!(pattern.to_string(), "hello::world:i");
    }

    #[test]
    fn test_expandable_tags() {
        let expanded = ExpandableTag::Artist.expand();
        assert_eq!(expanded.len(), 14);
        assert!(expanded.contains(&Tag::TrackArtistMain));
        assert!(expanded.contains(&Tag::ReleaseArtistMain));

        let expanded = ExpandableTag::TrackArtist.expand();
        assert_eq!(expanded.len(), 7);
        assert!(expanded.contains(&Tag::TrackArtistMain));
        assert!(!expanded.contains(&Tag::ReleaseArtistMain));

        let expanded = ExpandableTag::ReleaseArtist.expand();
        assert_eq!(expanded.len(), 7);
        assert!(!expanded.contains(&Tag::TrackArtistMain));
        assert!(expanded.contains(&Tag::ReleaseArtistMain));
    }
}
