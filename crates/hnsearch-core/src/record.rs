//! Canonical record model and embedding-text derivation
//!
//! A [`Record`] is one Hacker News item with the columns the rest of the
//! system agrees on. Rows read from columnar inputs parse into
//! `Option<Record>` (corrupt rows decode to `None` and are counted by the
//! caller, never raised). The embedding text for a record is the cleaned
//! concatenation of `title` and `text`; records whose cleaned text is
//! empty are not embeddable.

use serde::{Deserialize, Serialize};

/// HTML entity and tag substitutions applied to stored text, in order.
const ENTITY_SUBSTITUTIONS: &[(&str, &str)] = &[
    ("&#x27;", "'"),
    ("&quot;", "\""),
    ("&#x2F;", "/"),
    ("&amp;", "&"),
    ("<p>", " "),
    ("</p>", " "),
];

/// Item kind of a canonical record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Story,
    Comment,
    Job,
    Poll,
}

impl RecordKind {
    /// Stable lowercase name, matching the upstream `type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Story => "story",
            Self::Comment => "comment",
            Self::Job => "job",
            Self::Poll => "poll",
        }
    }

    /// Parse the upstream `type` column. Unknown kinds yield `None` and the
    /// row is treated as corrupt.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "story" => Some(Self::Story),
            "comment" => Some(Self::Comment),
            "job" => Some(Self::Job),
            "poll" => Some(Self::Poll),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| {
            format!("unknown record kind '{s}'; expected story, comment, job, or poll")
        })
    }
}

/// One canonical Hacker News item.
///
/// Ids are unique across the whole corpus; `deleted`/`dead` are soft-delete
/// flags carried through the corpus but filtered out of the mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: u32,
    pub kind: RecordKind,
    pub author: String,
    /// Epoch seconds
    pub time: u32,
    pub title: Option<String>,
    pub text: Option<String>,
    pub url: Option<String>,
    pub score: Option<u32>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub dead: bool,
}

impl Record {
    /// Whether the record survives soft-delete filtering.
    pub fn is_live(&self) -> bool {
        !self.deleted && !self.dead
    }

    /// Derive the text to embed: `title` + `text` with entity cleanup.
    ///
    /// Returns `None` for soft-deleted records and for records whose
    /// cleaned text trims to empty; such records are skipped, not errors.
    pub fn embedding_text(&self) -> Option<String> {
        if !self.is_live() {
            return None;
        }
        let title = self.title.as_deref().unwrap_or("");
        let text = self.text.as_deref().unwrap_or("");
        let cleaned = clean_entities(format!("{title} {text}").trim());
        let trimmed = cleaned.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

/// Apply the fixed entity substitutions to stored text.
pub fn clean_entities(text: &str) -> String {
    let mut out = text.to_string();
    for (from, to) in ENTITY_SUBSTITUTIONS {
        out = out.replace(from, to);
    }
    out
}

/// Clean a stored text for display: entity substitutions, newlines
/// collapsed, truncated to `max_chars` with an ellipsis.
pub fn display_preview(text: &str, max_chars: usize) -> String {
    let cleaned = clean_entities(text).replace('\n', " ");
    let mut preview: String = cleaned.chars().take(max_chars).collect();
    if cleaned.chars().count() > max_chars {
        preview.push_str("...");
    }
    preview
}
