//! Data models for queue entries and their processed results.
//!
//! - [`TopicEntry`]: a well-formed line claimed from the head of the queue
//! - [`ParsedLine`]: the outcome of classifying a raw queue line
//! - [`AffiliateSource`]: side-loaded material for an affiliate entry
//! - [`Publication`]: what a successfully processed entry produced
//! - [`FrontMatter`]: the subset of the article header used to build its URL

use serde::Deserialize;
use std::path::PathBuf;

/// A unit of work taken from the topic queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicEntry {
    /// A `"title","description"` brief.
    Article { title: String, description: String },
    /// A single affiliate item id, resolved through the affiliate folder.
    Affiliate { item_id: String },
}

impl TopicEntry {
    /// Short human label used in logs and notifications.
    pub fn label(&self) -> &str {
        match self {
            TopicEntry::Article { title, .. } => title,
            TopicEntry::Affiliate { item_id } => item_id,
        }
    }
}

/// Classification of a raw queue line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    Valid(TopicEntry),
    /// Field count other than 1 or 2, or broken quoting. Carries the number of
    /// fields found (`None` when the quoting could not be read at all).
    Malformed { field_count: Option<usize> },
}

/// Material found in `{affiliate_dir}/{item_id}/`.
#[derive(Debug, Clone, PartialEq)]
pub struct AffiliateSource {
    pub item_id: String,
    /// First line of `{item_id}.txt`; always an http(s) URL.
    pub source_url: String,
    /// Full contents of `{item_id}.txt`, fed to the model as product information.
    pub product_text: String,
    pub image: PathBuf,
    /// Extra downloadable files (e.g. PDFs) as `(file name, public URL)`.
    pub attachments: Vec<(String, String)>,
}

/// Result of processing one entry, ready to be archived.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub title: String,
    pub description: String,
    pub article_path: PathBuf,
    pub article_url: String,
    /// `(item_id, source_url)` for affiliate entries.
    pub affiliate: Option<(String, String)>,
}

impl Publication {
    /// Row for `archived_topics.csv`.
    pub fn archive_row(&self) -> [&str; 3] {
        [&self.article_url, &self.title, &self.description]
    }

    /// Row for `archived_affiliate_topics.csv`, if this was an affiliate entry.
    pub fn affiliate_row(&self) -> Option<[&str; 3]> {
        self.affiliate
            .as_ref()
            .map(|(id, url)| [self.article_url.as_str(), id.as_str(), url.as_str()])
    }
}

/// Article header fields read back after the model writes the file.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct FrontMatter {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}
