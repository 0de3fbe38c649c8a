//! # Topic Press
//!
//! Drains a CSV queue of topic ideas into illustrated markdown articles for a
//! static site, using an OpenAI-compatible API for text, images and alt text.
//!
//! ## Features
//!
//! - Refills an empty queue with model-generated topic ideas
//! - Generates and downloads an illustration, then asks a vision model for alt text
//! - Writes the article as markdown with YAML front matter
//! - Affiliate entries use side-loaded product folders instead of generated images
//! - Announces new articles on Telegram and pings IndexNow search engines
//! - Malformed and failed entries are quarantined, never silently dropped
//!
//! ## Usage
//!
//! ```sh
//! topic_press --website-url https://blog.example.com/ --website-title "Example Blog"
//! ```
//!
//! ## Architecture
//!
//! Each invocation publishes at most one article:
//! 1. **Claim**: take the head of `new_topics.csv` (refilling or skipping as needed)
//! 2. **Generate**: image, alt text and article through the model API
//! 3. **Announce**: Telegram message and IndexNow pings
//! 4. **Archive**: move the entry to `archived_topics.csv`

use clap::Parser;
use std::error::Error;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod content;
mod models;
mod notify;
mod pipeline;
mod prompts;
mod queue;
mod retry;
mod settings;
mod utils;

use api::OpenAiClient;
use cli::Cli;
use notify::{IndexNow, LogOnly, Notify, Telegram};
use pipeline::Pipeline;

/// Install the global subscriber, writing to `log_file` when given.
fn init_tracing(log_file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(UtcTime::rfc_3339());

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.init(),
    }
    Ok(())
}

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();
    init_tracing(args.log_file.as_deref())?;

    let start_time = Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "topic_press starting up");

    if args.openai_api_key.trim().is_empty() {
        error!("OPENAI_API_KEY is empty");
        return Err("OPENAI_API_KEY must not be empty".into());
    }

    let settings = args.settings();
    debug!(?settings.paths, ?settings.budgets, date = %settings.date, "Resolved settings");

    let model = OpenAiClient::new(
        &args.openai_api_key,
        &args.api_base,
        Duration::from_secs(args.model_timeout_secs),
    )?;

    let indexnow = match &args.indexnow_api_key {
        Some(key) => Some(IndexNow::new(key.as_str())?),
        None => {
            warn!("INDEXNOW_API_KEY not set; search engines will not be notified");
            None
        }
    };

    let outcome = match args.telegram() {
        Some((token, chat_id)) => {
            let telegram = Telegram::new(&token, chat_id, settings.site.url.clone())?;
            publish(Pipeline::new(model, telegram, indexnow, settings)).await
        }
        None => {
            warn!("Telegram token or chat id not set; notifications will only be logged");
            publish(Pipeline::new(model, LogOnly, indexnow, settings)).await
        }
    };

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    outcome
}

async fn publish<N: Notify>(pipeline: Pipeline<OpenAiClient, N>) -> Result<(), Box<dyn Error>> {
    if let Err(e) = pipeline.prepare().await {
        error!(
            error = %e,
            "Output directories are not usable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    match pipeline.run().await {
        Ok(publication) => {
            info!(
                title = %publication.title,
                url = %publication.article_url,
                path = %publication.article_path.display(),
                "Published article"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Run ended without publishing");
            Err(e)
        }
    }
}
