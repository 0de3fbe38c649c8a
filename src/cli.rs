//! Command-line interface definitions for Topic Press.
//!
//! Every option can be given as a flag or through the environment variable
//! named next to it, which is how the cron job that drives this tool
//! configures it.

use crate::settings::{Budgets, Models, Paths, Settings, Site};
use chrono::Local;
use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for Topic Press.
///
/// # Examples
///
/// ```sh
/// OPENAI_API_KEY=sk-... topic_press \
///     --topics-dir ./topics --images-dir ./assets/images --articles-dir ./_posts \
///     --website-url https://blog.example.com/ --website-title "Example Blog"
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Directory holding the new/archived/error topic CSV files
    #[arg(long, env = "TOPIC_PRESS_TOPICS_DIR", default_value = "AI_topics")]
    pub topics_dir: PathBuf,

    /// Directory generated images are written to
    #[arg(long, env = "TOPIC_PRESS_IMAGES_DIR", default_value = "assets/images")]
    pub images_dir: PathBuf,

    /// Directory generated markdown articles are written to
    #[arg(long, env = "TOPIC_PRESS_ARTICLES_DIR", default_value = "_posts")]
    pub articles_dir: PathBuf,

    /// Directory with one sub-folder per affiliate item id
    #[arg(long, env = "TOPIC_PRESS_AFFILIATE_DIR", default_value = "affiliate_content")]
    pub affiliate_dir: PathBuf,

    /// Directory with the prompt templates
    #[arg(long, env = "TOPIC_PRESS_PROMPTS_DIR", default_value = "prompts")]
    pub prompts_dir: PathBuf,

    /// Append logs to this file instead of stdout
    #[arg(long, env = "TOPIC_PRESS_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Public base URL of the site, with trailing slash
    #[arg(long, env = "WEBSITE_URL")]
    pub website_url: String,

    #[arg(long, env = "WEBSITE_TITLE")]
    pub website_title: String,

    #[arg(long, env = "WEBSITE_DESCRIPTION", default_value = "")]
    pub website_description: String,

    #[arg(long, env = "WEBSITE_KEYWORDS", default_value = "")]
    pub website_keywords: String,

    #[arg(long, env = "WEBSITE_AUDIENCE", default_value = "")]
    pub website_audience: String,

    #[arg(long, env = "WEBSITE_LANGUAGE", default_value = "English")]
    pub website_language: String,

    /// API key for the OpenAI-compatible endpoint
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: String,

    /// Base URL of the OpenAI-compatible endpoint
    #[arg(long, env = "OPENAI_API_BASE", default_value = "https://api.openai.com/v1")]
    pub api_base: String,

    /// Timeout in seconds for a single model request
    #[arg(long, env = "TOPIC_PRESS_MODEL_TIMEOUT", default_value_t = 180)]
    pub model_timeout_secs: u64,

    #[arg(long, env = "TOPIC_PRESS_TEXT_MODEL", default_value = "gpt-4.1")]
    pub text_model: String,

    #[arg(long, env = "TOPIC_PRESS_VISION_MODEL", default_value = "gpt-4o-mini")]
    pub vision_model: String,

    #[arg(long, env = "TOPIC_PRESS_IMAGE_MODEL", default_value = "dall-e-3")]
    pub image_model: String,

    /// Telegram bot token; notifications are skipped when unset
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_bot_token: Option<String>,

    /// Telegram chat id; notifications are skipped when unset
    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    pub telegram_chat_id: Option<String>,

    /// IndexNow key; search engines are not pinged when unset
    #[arg(long, env = "INDEXNOW_API_KEY", hide_env_values = true)]
    pub indexnow_api_key: Option<String>,

    /// Failed entries tolerated before the run stops
    #[arg(long, env = "TOPIC_PRESS_MAX_EXCEPTIONS", default_value_t = 3)]
    pub max_exceptions: usize,

    /// Topic generation rounds tried while the queue stays empty
    #[arg(long, env = "TOPIC_PRESS_MAX_REFILLS", default_value_t = 3)]
    pub max_refills: usize,

    /// Malformed lines quarantined in a row before the run stops
    #[arg(long, env = "TOPIC_PRESS_MAX_SKIPS", default_value_t = 25)]
    pub max_skips: usize,
}

impl Cli {
    /// Resolve into pipeline settings, stamping today's local date.
    pub fn settings(&self) -> Settings {
        let mut url = self.website_url.clone();
        if !url.ends_with('/') {
            url.push('/');
        }
        Settings {
            paths: Paths {
                topics_dir: self.topics_dir.clone(),
                images_dir: self.images_dir.clone(),
                articles_dir: self.articles_dir.clone(),
                affiliate_dir: self.affiliate_dir.clone(),
                prompts_dir: self.prompts_dir.clone(),
            },
            site: Site {
                url,
                title: self.website_title.clone(),
                description: self.website_description.clone(),
                keywords: self.website_keywords.clone(),
                audience: self.website_audience.clone(),
                language: self.website_language.clone(),
            },
            models: Models {
                text: self.text_model.clone(),
                vision: self.vision_model.clone(),
                image: self.image_model.clone(),
                ..Models::default()
            },
            budgets: Budgets {
                max_exceptions: self.max_exceptions.max(1),
                max_refills: self.max_refills,
                max_skips: self.max_skips,
            },
            date: Local::now().date_naive().to_string(),
        }
    }

    /// The Telegram credentials, if both halves are present and non-empty.
    pub fn telegram(&self) -> Option<(String, String)> {
        match (&self.telegram_bot_token, &self.telegram_chat_id) {
            (Some(token), Some(chat)) if !token.is_empty() && !chat.is_empty() => {
                Some((token.clone(), chat.clone()))
            }
            _ => None,
        }
    }
}
