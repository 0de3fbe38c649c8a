//! Topic generation for an empty queue.

use super::Studio;
use crate::api::{CompletionRequest, ContentModel};
use crate::prompts::GENERATE_TOPICS;
use crate::utils::{split_fields, truncate_for_log};
use itertools::Itertools;
use std::error::Error;
use tracing::{info, instrument, warn};

/// Ask the model for new topic ideas and return them as queue rows.
#[instrument(level = "info", skip_all)]
pub async fn generate_topics<M: ContentModel>(
    studio: &Studio<'_, M>,
) -> Result<Vec<Vec<String>>, Box<dyn Error>> {
    let prompt = studio.prompts.render(GENERATE_TOPICS, &studio.vars(&[])).await?;
    let request = CompletionRequest::new(&studio.settings.models.text, prompt)
        .system(studio.settings.site.system_prompt())
        .max_tokens(1500)
        .temperature(0.7)
        .frequency_penalty(0.1)
        .presence_penalty(0.4);

    let reply = studio.backoff.retry(|| studio.model.complete(&request)).await?;
    let rows = parse_topic_lines(&reply);
    info!(count = rows.len(), "Generated topic ideas");
    Ok(rows)
}

/// Turn a model reply into queue rows.
///
/// Blank lines and code fences are dropped, as are lines whose quoting cannot
/// be read. Other lines are kept whatever their field count: the queue
/// quarantines the bad ones with a proper audit trail.
pub fn parse_topic_lines(reply: &str) -> Vec<Vec<String>> {
    reply
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("```"))
        .filter_map(|line| match split_fields(line) {
            Some(fields) if !fields.is_empty() => Some(fields),
            _ => {
                warn!(line = %truncate_for_log(line, 120), "Dropping unreadable topic line");
                None
            }
        })
        .unique()
        .collect()
}
