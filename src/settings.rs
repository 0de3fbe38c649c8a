//! Resolved runtime settings.
//!
//! [`Cli`](crate::cli::Cli) is what the user types; [`Settings`] is what the
//! pipeline consumes. Keeping them apart lets tests build a `Settings` for a
//! scratch directory without going through argument parsing.

use std::path::{Path, PathBuf};

/// Where the queue, ledgers and generated files live.
#[derive(Debug, Clone, PartialEq)]
pub struct Paths {
    pub topics_dir: PathBuf,
    pub images_dir: PathBuf,
    pub articles_dir: PathBuf,
    pub affiliate_dir: PathBuf,
    pub prompts_dir: PathBuf,
}

impl Paths {
    pub fn new_topics(&self) -> PathBuf {
        self.topics_dir.join("new_topics.csv")
    }

    pub fn archived_topics(&self) -> PathBuf {
        self.topics_dir.join("archived_topics.csv")
    }

    pub fn archived_affiliate_topics(&self) -> PathBuf {
        self.topics_dir.join("archived_affiliate_topics.csv")
    }

    pub fn error_topics(&self) -> PathBuf {
        self.topics_dir.join("error_topics.csv")
    }

    /// Directories that must exist and be writable before a run.
    pub fn output_dirs(&self) -> [&Path; 4] {
        [
            &self.topics_dir,
            &self.images_dir,
            &self.articles_dir,
            &self.affiliate_dir,
        ]
    }
}

/// Site metadata substituted into every prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    /// Base URL with trailing slash, e.g. `https://blog.example.com/`.
    pub url: String,
    pub title: String,
    pub description: String,
    pub keywords: String,
    pub audience: String,
    pub language: String,
}

impl Site {
    /// Prompt variables shared by every template.
    pub fn prompt_vars(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("WEBSITE_URL", self.url.as_str()),
            ("WEBSITE_TITLE", self.title.as_str()),
            ("WEBSITE_DESCRIPTION", self.description.as_str()),
            ("WEBSITE_KEYWORDS", self.keywords.as_str()),
            ("WEBSITE_AUDIENCE", self.audience.as_str()),
            ("WEBSITE_LANGUAGE", self.language.as_str()),
        ]
    }

    /// System message pinning the reply language.
    pub fn system_prompt(&self) -> String {
        format!(
            "You are a helpful assistant. You MUST respond in {}.",
            self.language
        )
    }
}

/// Model names per task.
#[derive(Debug, Clone, PartialEq)]
pub struct Models {
    pub text: String,
    pub vision: String,
    pub image: String,
    pub image_size: String,
}

impl Default for Models {
    fn default() -> Self {
        Self {
            text: "gpt-4.1".to_string(),
            vision: "gpt-4o-mini".to_string(),
            image: "dall-e-3".to_string(),
            image_size: "1024x1024".to_string(),
        }
    }
}

/// Per-run limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Budgets {
    /// Failed entries tolerated before the run halts.
    pub max_exceptions: usize,
    /// Topic generation rounds tried while the queue stays empty.
    pub max_refills: usize,
    /// Malformed lines quarantined in a row before giving up.
    pub max_skips: usize,
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            max_exceptions: 3,
            max_refills: 3,
            max_skips: 25,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub paths: Paths,
    pub site: Site,
    pub models: Models,
    pub budgets: Budgets,
    /// Run date as `YYYY-MM-DD`, used in file names and URLs.
    pub date: String,
}
