// Copyright (c) 2024 Jan Holthuis <jan.holthuis@rub.de>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! The genre hierarchy tables.
//!
//! The hierarchy is shipped as a JSON map from genre to immediate parents and expanded to its
//! transitive closure once, on first touch. The tables are read-only afterwards.

use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

/// The genre → immediate parents map, embedded at compile time.
const GENRE_HIERARCHY_JSON: &str = include_str!("genre_hierarchy.json");

/// Immediate parents, straight from the embedded JSON.
static IMMEDIATE_PARENT_GENRES: Lazy<HashMap<String, Vec<String>>> = Lazy::new(|| {
    serde_json::from_str(GENRE_HIERARCHY_JSON).expect("embedded genre hierarchy must parse")
});

/// Transitive parents of every genre, in breadth-first order, without duplicates.
pub static TRANSITIVE_PARENT_GENRES: Lazy<HashMap<String, Vec<String>>> = Lazy::new(|| {
    IMMEDIATE_PARENT_GENRES
        .iter()
        .map(|(genre, parents)| {
            let mut all_parents = Vec::new();
            let mut seen = HashSet::new();
            let mut queue: Vec<&String> = parents.iter().collect();
            while let Some(parent) = queue.pop() {
                if seen.insert(parent.clone()) {
                    all_parents.push(parent.clone());
                    if let Some(grandparents) = IMMEDIATE_PARENT_GENRES.get(parent) {
                        queue.extend(grandparents.iter());
                    }
                }
            }
            (genre.clone(), all_parents)
        })
        .collect()
});

/// Transitive children of every genre, derived by inverting the parent table.
pub static TRANSITIVE_CHILD_GENRES: Lazy<HashMap<String, Vec<String>>> = Lazy::new(|| {
    let mut children: HashMap<String, Vec<String>> = HashMap::new();
    for (child, parents) in TRANSITIVE_PARENT_GENRES.iter() {
        for parent in parents {
            children.entry(parent.clone()).or_default().push(child.clone());
        }
    }
    children
});

/// All transitive parents of the given genres, deduplicated and sorted, excluding the genres
/// themselves.
#[must_use]
pub fn transitive_parent_genres(genres: &[String]) -> Vec<String> {
    let own: HashSet<&String> = genres.iter().collect();
    let mut parents: Vec<String> = genres
        .iter()
        .filter_map(|g| TRANSITIVE_PARENT_GENRES.get(g))
        .flatten()
        .filter(|p| !own.contains(p))
        .cloned()
        .collect();
    parents.sort();
    parents.dedup();
    parents
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_load() {
        assert!(!TRANSITIVE_PARENT_GENRES.is_empty());
        assert!(!TRANSITIVE_CHILD_GENRES.is_empty());
    }

    #[test]
    fn test_transitive_parents() {
        let parents = &TRANSITIVE_PARENT_GENRES["2-Step"];
        assert!(parents.contains(&"UK Garage".to_string()));
        assert!(parents.contains(&"Electronic Dance Music".to_string()));
        assert!(parents.contains(&"Dance".to_string()));
        assert!(parents.contains(&"Electronic".to_string()));
    }

    #[test]
    fn test_transitive_children_inverse() {
        let children = &TRANSITIVE_CHILD_GENRES["Electronic"];
        assert!(children.contains(&"House".to_string()));
        assert!(children.contains(&"2-Step".to_string()));
    }

    #[test]
    fn test_helper_excludes_own_genres_and_sorts() {
        let parents =
            transitive_parent_genres(&["House".to_string(), "Electronic".to_string()]);
        assert!(parents.contains(&"Dance".to_string()));
        assert!(!parents.contains(&"Electronic".to_string()));
        let mut sorted = parents.clone();
        sorted.sort();
        assert_eq!(parents, sorted);
    }
}
