//! # Segmentation Tags
//!
//! The BMES tag set used for character-level word segmentation and the
//! transition constraints it implies.

use std::fmt;

use crate::alphabet::Alphabet;

/// Position of a character inside its word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegTag {
    /// First character of a multi-character word.
    Begin,
    /// Interior character of a word of three or more characters.
    Middle,
    /// Last character of a multi-character word.
    End,
    /// Single-character word.
    Single,
}

impl SegTag {
    /// Total number of distinct tags.
    pub const NUM_TAGS: usize = 4;

    /// Get all possible tags in order.
    pub fn all_tags() -> &'static [SegTag] {
        &[SegTag::Begin, SegTag::Middle, SegTag::End, SegTag::Single]
    }

    /// Parse a label string: `b`/`m`/`e`/`s`, case-insensitive, optionally
    /// followed by a `-suffix` (e.g. `B-SEG`).
    pub fn from_label(label: &str) -> Option<Self> {
        let head = label.split('-').next().unwrap_or_default();
        match head.to_ascii_lowercase().as_str() {
            "b" => Some(SegTag::Begin),
            "m" | "i" => Some(SegTag::Middle),
            "e" => Some(SegTag::End),
            "s" => Some(SegTag::Single),
            _ => None,
        }
    }

    /// Whether a sentence may start with this tag.
    pub fn can_start(&self) -> bool {
        matches!(self, SegTag::Begin | SegTag::Single)
    }

    /// Whether a sentence may end with this tag.
    pub fn can_end(&self) -> bool {
        matches!(self, SegTag::End | SegTag::Single)
    }

    /// Check if transitioning from `from` tag to `to` tag is valid.
    pub fn is_valid_transition(from: SegTag, to: SegTag) -> bool {
        match from {
            SegTag::Begin | SegTag::Middle => matches!(to, SegTag::Middle | SegTag::End),
            SegTag::End | SegTag::Single => matches!(to, SegTag::Begin | SegTag::Single),
        }
    }
}

impl fmt::Display for SegTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegTag::Begin => write!(f, "b"),
            SegTag::Middle => write!(f, "m"),
            SegTag::End => write!(f, "e"),
            SegTag::Single => write!(f, "s"),
        }
    }
}

/// Allowed transitions between label ids, plus allowed first and last labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionMask {
    pub allowed: Vec<Vec<bool>>,
    pub start: Vec<bool>,
    pub end: Vec<bool>,
}

impl TransitionMask {
    /// Build the BMES mask for a label alphabet. Returns `None` unless every
    /// label is a segmentation tag.
    pub fn from_labels(labels: &Alphabet) -> Option<Self> {
        let tags: Vec<SegTag> = labels
            .entries()
            .iter()
            .map(|label| SegTag::from_label(label))
            .collect::<Option<_>>()?;
        if tags.is_empty() {
            return None;
        }
        let allowed = tags
            .iter()
            .map(|&from| {
                tags.iter()
                    .map(|&to| SegTag::is_valid_transition(from, to))
                    .collect()
            })
            .collect();
        Some(Self {
            allowed,
            start: tags.iter().map(SegTag::can_start).collect(),
            end: tags.iter().map(SegTag::can_end).collect(),
        })
    }

    pub fn num_tags(&self) -> usize {
        self.start.len()
    }
}

/// Split a character sequence into words following its tags.
pub fn segment(chars: &[&str], tags: &[SegTag]) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    for (ch, tag) in chars.iter().zip(tags) {
        if matches!(tag, SegTag::Begin | SegTag::Single) && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        current.push_str(ch);
        if matches!(tag, SegTag::End | SegTag::Single) {
            words.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}
