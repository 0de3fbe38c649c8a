//! One processing run: claim a queue entry, turn it into a published article,
//! announce it and archive it.
//!
//! ## Flow
//!
//! 1. **Claim**: peek the queue head. An empty queue is refilled from the
//!    model, a malformed line is quarantined; both loops are bounded.
//! 2. **Process**: image, alt text and article for a topic brief, or the
//!    affiliate folder's image and product text for an affiliate id.
//! 3. **Announce**: notification plus IndexNow pings, never fatal.
//! 4. **Record**: archive the entry and drop it from the queue.
//!
//! A failed entry is quarantined and counts against the exception budget;
//! the run moves on to the next head until the budget is spent.

use crate::api::ContentModel;
use crate::content::article::{self, Brief, Draft};
use crate::content::{Studio, affiliate, image, topics};
use crate::models::{ParsedLine, Publication, TopicEntry};
use crate::notify::{INDEXNOW_ENDPOINTS, IndexNow, Notify};
use crate::prompts::PromptLibrary;
use crate::queue::{Ledger, TopicQueue};
use crate::retry::Backoff;
use crate::settings::Settings;
use crate::utils::ensure_writable_dir;
use std::error::Error;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

/// Reasons a run ends without publishing anything.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunError {
    #[error("maximum number of exceptions reached ({0})")]
    ExceptionBudgetExhausted(usize),

    #[error("topic queue still empty after {0} refill attempts")]
    QueueStarved(usize),

    #[error("quarantined {0} malformed lines without reaching a valid entry")]
    TooManyMalformed(usize),
}

pub struct Pipeline<M, N> {
    model: M,
    notifier: N,
    indexnow: Option<IndexNow>,
    prompts: PromptLibrary,
    settings: Settings,
    queue: TopicQueue,
    archive: Ledger,
    affiliate_archive: Ledger,
    errors: Ledger,
    backoff: Backoff,
}

impl<M: ContentModel, N: Notify> Pipeline<M, N> {
    pub fn new(model: M, notifier: N, indexnow: Option<IndexNow>, settings: Settings) -> Self {
        let paths = &settings.paths;
        Self {
            prompts: PromptLibrary::new(&paths.prompts_dir),
            queue: TopicQueue::new(paths.new_topics()),
            archive: Ledger::new(paths.archived_topics()),
            affiliate_archive: Ledger::new(paths.archived_affiliate_topics()),
            errors: Ledger::new(paths.error_topics()),
            model,
            notifier,
            indexnow,
            settings,
            backoff: Backoff::default(),
        }
    }

    /// Replace the retry policy used for model calls.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    fn studio(&self) -> Studio<'_, M> {
        Studio {
            model: &self.model,
            prompts: &self.prompts,
            settings: &self.settings,
            backoff: &self.backoff,
        }
    }

    /// Make sure every directory is writable and the four CSV files exist.
    #[instrument(level = "info", skip_all)]
    pub async fn prepare(&self) -> Result<(), Box<dyn Error>> {
        for dir in self.settings.paths.output_dirs() {
            ensure_writable_dir(dir).await?;
        }
        self.queue.init().await?;
        for ledger in [&self.archive, &self.affiliate_archive, &self.errors] {
            ledger.init().await?;
        }
        info!(
            queue = %self.queue.path().display(),
            quarantine = %self.errors.path().display(),
            prompts = %self.prompts.dir().display(),
            "Pipeline ready"
        );
        Ok(())
    }

    /// Publish at most one entry.
    #[instrument(level = "info", skip_all, fields(date = %self.settings.date))]
    pub async fn run(&self) -> Result<Publication, Box<dyn Error>> {
        let max_exceptions = self.settings.budgets.max_exceptions;
        info!(
            max_exceptions,
            max_attempts = self.backoff.max_attempts(),
            "Starting run"
        );
        let mut exceptions = 0;

        loop {
            let (raw, entry) = self.claim().await?;
            info!(entry = %entry.label(), "Processing queue entry");

            match self.process(&entry).await {
                Ok(publication) => {
                    self.announce(&publication).await;
                    self.record(&raw, &publication).await?;
                    info!(url = %publication.article_url, "Entry published");
                    return Ok(publication);
                }
                Err(e) => {
                    exceptions += 1;
                    error!(
                        entry = %entry.label(),
                        error = %e,
                        exceptions,
                        max_exceptions,
                        "Error processing entry"
                    );
                    self.queue.quarantine(&raw, &e.to_string(), &self.errors).await?;
                    self.notifier
                        .notify(&format!(
                            "Error processing '{}': {}. Moved to error topics.",
                            entry.label(),
                            e
                        ))
                        .await;

                    if exceptions >= max_exceptions {
                        self.notifier
                            .notify(&format!(
                                "Maximum number of exceptions reached ({max_exceptions}). Halting."
                            ))
                            .await;
                        return Err(RunError::ExceptionBudgetExhausted(exceptions).into());
                    }
                }
            }
        }
    }

    /// Find the next valid entry, refilling an empty queue and quarantining
    /// malformed lines on the way.
    async fn claim(&self) -> Result<(String, TopicEntry), Box<dyn Error>> {
        let budgets = self.settings.budgets;
        let mut refills = 0;
        let mut skips = 0;

        loop {
            let Some(raw) = self.queue.peek_head().await? else {
                if refills >= budgets.max_refills {
                    error!(refills, "Topic queue is still empty");
                    self.notifier
                        .notify("Topic queue is still empty after generating new topics. Halting.")
                        .await;
                    return Err(RunError::QueueStarved(refills).into());
                }
                refills += 1;
                self.refill().await?;
                continue;
            };

            match TopicQueue::parse_line(&raw) {
                ParsedLine::Valid(entry) => return Ok((raw, entry)),
                ParsedLine::Malformed { field_count } => {
                    if skips >= budgets.max_skips {
                        error!(skips, "Too many malformed lines in a row");
                        self.notifier
                            .notify(&format!(
                                "Quarantined {skips} malformed lines, no valid entry. Halting."
                            ))
                            .await;
                        return Err(RunError::TooManyMalformed(skips).into());
                    }
                    skips += 1;
                    let reason = match field_count {
                        Some(n) => format!("expected 1 or 2 fields, found {n}"),
                        None => "unreadable quoting".to_string(),
                    };
                    self.queue.quarantine(&raw, &reason, &self.errors).await?;
                    self.notifier
                        .notify(&format!(
                            "Malformed topic line ({reason}) moved to error topics: {raw}"
                        ))
                        .await;
                }
            }
        }
    }

    async fn refill(&self) -> Result<(), Box<dyn Error>> {
        warn!("Topic queue is empty, generating new topics");
        let rows = topics::generate_topics(&self.studio()).await?;
        self.queue.append(&rows).await?;
        self.notifier
            .notify(&format!("Generated {} new topic ideas.", rows.len()))
            .await;
        Ok(())
    }

    #[instrument(level = "info", skip_all, fields(entry = %entry.label()))]
    async fn process(&self, entry: &TopicEntry) -> Result<Publication, Box<dyn Error>> {
        let studio = self.studio();
        match entry {
            TopicEntry::Article { title, description } => {
                let image = image::create_image(&studio, title, description).await?;
                let alt_text = image::alt_text(&studio, title, description, &image).await;
                let draft = article::write_article(
                    &studio,
                    &Brief {
                        title,
                        description,
                        image: &image,
                        alt_text: &alt_text,
                        affiliate: None,
                    },
                )
                .await?;
                Ok(self.publication(title, description, draft, None))
            }
            TopicEntry::Affiliate { item_id } => {
                let paths = &self.settings.paths;
                let source =
                    affiliate::resolve(&paths.affiliate_dir, item_id, &self.settings.site.url)
                        .await?;
                let (title, description) = match affiliate::propose_topic(&studio, &source).await? {
                    Some(topic) => topic,
                    None => {
                        self.notifier
                            .notify(&format!(
                                "Affiliate item {item_id}: unexpected topic reply, using defaults."
                            ))
                            .await;
                        (
                            affiliate::DEFAULT_TITLE.to_string(),
                            affiliate::DEFAULT_DESCRIPTION.to_string(),
                        )
                    }
                };
                let image = affiliate::stage_image(&studio, &title, &source).await?;
                let alt_text = image::alt_text(&studio, &title, &description, &image).await;
                let draft = article::write_article(
                    &studio,
                    &Brief {
                        title: &title,
                        description: &description,
                        image: &image,
                        alt_text: &alt_text,
                        affiliate: Some(&source),
                    },
                )
                .await?;
                let link = (source.item_id.clone(), source.source_url.clone());
                Ok(self.publication(&title, &description, draft, Some(link)))
            }
        }
    }

    fn publication(
        &self,
        title: &str,
        description: &str,
        draft: Draft,
        affiliate: Option<(String, String)>,
    ) -> Publication {
        let article_url = article::article_url(
            &self.settings.site.url,
            &draft.markdown,
            &self.settings.date,
            title,
        );
        Publication {
            title: title.to_string(),
            description: description.to_string(),
            article_path: draft.path,
            article_url,
            affiliate,
        }
    }

    async fn announce(&self, publication: &Publication) {
        self.notifier
            .notify(&format!(
                "New article published: {}\n{}",
                publication.title, publication.article_url
            ))
            .await;
        match &self.indexnow {
            Some(indexnow) => {
                let accepted = indexnow.submit(&publication.article_url).await;
                info!(accepted, total = INDEXNOW_ENDPOINTS.len(), "IndexNow submission finished");
            }
            None => warn!("IndexNow key not configured, skipping search engine notification"),
        }
    }

    async fn record(&self, raw: &str, publication: &Publication) -> Result<(), Box<dyn Error>> {
        let mut records = vec![(&self.archive, publication.archive_row())];
        if let Some(row) = publication.affiliate_row() {
            records.push((&self.affiliate_archive, row));
        }
        self.queue.archive(raw, &records).await?;
        Ok(())
    }
}
