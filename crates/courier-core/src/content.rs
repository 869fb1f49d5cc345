//! Content kinds carried by inbound messages.
//!
//! A message may carry several kinds at once (a captioned photo is both
//! [`ContentKind::Photo`] and [`ContentKind::Text`]). [`ContentSet`] stores them
//! as a compact bit set, which is also what `AnyMessage` registrations use as
//! their filter.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::UnknownContentKind;

/// A recognized kind of message content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    Photo,
    Video,
    Voice,
    Document,
    Animation,
    Sticker,
    /// Part of a multi-item media group.
    GroupMedia,
}

impl ContentKind {
    /// Every kind, in declaration order.
    pub const ALL: [ContentKind; 8] = [
        ContentKind::Text,
        ContentKind::Photo,
        ContentKind::Video,
        ContentKind::Voice,
        ContentKind::Document,
        ContentKind::Animation,
        ContentKind::Sticker,
        ContentKind::GroupMedia,
    ];

    /// Returns the canonical name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "Text",
            Self::Photo => "Photo",
            Self::Video => "Video",
            Self::Voice => "Voice",
            Self::Document => "Document",
            Self::Animation => "Animation",
            Self::Sticker => "Sticker",
            Self::GroupMedia => "GroupMedia",
        }
    }

    const fn bit(self) -> u16 {
        1 << self as u16
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a kind from its name, ignoring case and `_`/`-` separators, so
/// `"GroupMedia"`, `"group_media"` and `"groupmedia"` are all accepted.
impl FromStr for ContentKind {
    type Err = UnknownContentKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(&normalized))
            .ok_or_else(|| UnknownContentKind(s.to_string()))
    }
}

/// A set of [`ContentKind`]s.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<ContentKind>", into = "Vec<ContentKind>")]
pub struct ContentSet {
    bits: u16,
}

impl ContentSet {
    /// The empty set.
    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    /// A set holding a single kind.
    pub const fn only(kind: ContentKind) -> Self {
        Self { bits: kind.bit() }
    }

    pub fn insert(&mut self, kind: ContentKind) {
        self.bits |= kind.bit();
    }

    /// Returns a copy of this set with `kind` added.
    pub fn with(mut self, kind: ContentKind) -> Self {
        self.insert(kind);
        self
    }

    pub fn contains(&self, kind: ContentKind) -> bool {
        self.bits & kind.bit() != 0
    }

    /// Returns `true` if the two sets share at least one kind.
    pub fn intersects(&self, other: &ContentSet) -> bool {
        self.bits & other.bits != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn len(&self) -> usize {
        self.bits.count_ones() as usize
    }

    /// Iterates the kinds in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = ContentKind> + '_ {
        ContentKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(*kind))
    }
}

impl fmt::Debug for ContentSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<ContentKind> for ContentSet {
    fn from_iter<I: IntoIterator<Item = ContentKind>>(iter: I) -> Self {
        let mut set = ContentSet::empty();
        set.extend(iter);
        set
    }
}

impl Extend<ContentKind> for ContentSet {
    fn extend<I: IntoIterator<Item = ContentKind>>(&mut self, iter: I) {
        for kind in iter {
            self.insert(kind);
        }
    }
}

impl<const N: usize> From<[ContentKind; N]> for ContentSet {
    fn from(kinds: [ContentKind; N]) -> Self {
        kinds.into_iter().collect()
    }
}

impl From<Vec<ContentKind>> for ContentSet {
    fn from(kinds: Vec<ContentKind>) -> Self {
        kinds.into_iter().collect()
    }
}

impl From<ContentSet> for Vec<ContentKind> {
    fn from(set: ContentSet) -> Self {
        set.iter().collect()
    }
}
