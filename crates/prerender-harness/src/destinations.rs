//! Destination registry and URL-to-slot resolution
//!
//! A campaign declares a fixed set of destinations (name, origin URL,
//! activation selector). During a trial, network requests and speculative
//! sub-targets carry URLs that must be attributed to one of those
//! destinations. Resolution tries a longest-prefix match first, then a
//! scheme+host origin match, and callers that must never drop an event can
//! fall back to the first unused slot.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::Url;

/// A logical destination page a trial may navigate to.
///
/// Destinations are immutable for the lifetime of a campaign; candidate
/// indices derived from a registry stay stable for a trial's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Destination {
    /// Human-readable label used in output rows (e.g. "Light")
    pub name: String,
    /// Origin URL of the destination page
    pub url: String,
    /// CSS selector of the hub-page link that activates this destination
    pub selector: String,
}

/// Registry of destinations with prefix/origin URL resolution.
#[derive(Debug, Clone)]
pub struct DestinationRegistry {
    destinations: Vec<Destination>,
}

impl DestinationRegistry {
    /// Create a registry from an ordered destination list.
    ///
    /// Index positions are the candidate slots used throughout a trial.
    pub fn new(destinations: Vec<Destination>) -> Self {
        Self { destinations }
    }

    /// Number of registered destinations.
    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Destination at `index`, if present.
    pub fn get(&self, index: usize) -> Option<&Destination> {
        self.destinations.get(index)
    }

    /// Iterate over all destinations in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Destination> {
        self.destinations.iter()
    }

    /// Resolve a URL to a destination slot.
    ///
    /// Tries the longest registered URL that is a prefix of `url`; if none
    /// matches, compares scheme+host origins, ignoring the path. Returns
    /// `None` when neither matches.
    pub fn resolve(&self, url: &str) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;
        for (idx, dest) in self.destinations.iter().enumerate() {
            if url.starts_with(dest.url.as_str()) {
                match best {
                    Some((_, len)) if len >= dest.url.len() => {}
                    _ => best = Some((idx, dest.url.len())),
                }
            }
        }
        if let Some((idx, _)) = best {
            return Some(idx);
        }

        let origin = Url::parse(url).ok()?.origin();
        self.destinations.iter().position(|dest| {
            Url::parse(&dest.url)
                .map(|u| u.origin() == origin)
                .unwrap_or(false)
        })
    }

    /// Resolve a URL to a destination slot, never failing.
    ///
    /// Falls back to the first slot not present in `used_slots`, and to
    /// slot 0 when every slot is taken. Misattribution is possible when
    /// more speculative loads are in flight than free slots; that is an
    /// accepted limitation of the fallback, preferred over dropping the
    /// event entirely.
    pub fn resolve_with_fallback(&self, url: &str, used_slots: &HashSet<usize>) -> usize {
        if let Some(idx) = self.resolve(url) {
            return idx;
        }
        (0..self.destinations.len())
            .find(|idx| !used_slots.contains(idx))
            .unwrap_or(0)
    }

    /// Build the candidate registry for a trial: every destination except
    /// the primary one, preserving declaration order.
    pub fn candidates_for(&self, primary: usize) -> DestinationRegistry {
        let destinations = self
            .destinations
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != primary)
            .map(|(_, dest)| dest.clone())
            .collect();
        Self { destinations }
    }
}
