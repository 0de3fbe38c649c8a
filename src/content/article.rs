//! Article drafting and public URL derivation.

use super::Studio;
use super::affiliate::attachment_list;
use crate::api::{CompletionRequest, ContentModel};
use crate::models::{AffiliateSource, FrontMatter};
use crate::prompts::{GENERATE_AFFILIATE_ARTICLE, GENERATE_ARTICLE};
use crate::utils::{article_filename, flatten_separators, public_url};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

/// Category path used when the article declares no categories.
pub const DEFAULT_CATEGORY_PATH: &str = "articles";

static CATEGORIES_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"categories: \[(.*?)\]").expect("valid regex"));

/// What the article is about and how it is illustrated.
#[derive(Debug, Clone, Copy)]
pub struct Brief<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub image: &'a Path,
    pub alt_text: &'a str,
    /// Set for affiliate entries; switches to the affiliate template.
    pub affiliate: Option<&'a AffiliateSource>,
}

/// A written article.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub path: PathBuf,
    pub markdown: String,
}

/// Ask the model for the article and write it to
/// `{articles_dir}/{date}-{title}.md`.
#[instrument(
    level = "info",
    skip_all,
    fields(title = %brief.title, affiliate = brief.affiliate.is_some())
)]
pub async fn write_article<M: ContentModel>(
    studio: &Studio<'_, M>,
    brief: &Brief<'_>,
) -> Result<Draft, Box<dyn Error>> {
    let image_path = brief.image.display().to_string();
    let image_url = public_url(&studio.settings.site.url, brief.image);
    let (template, affiliate_url, other_file_urls) = match brief.affiliate {
        Some(source) => (
            GENERATE_AFFILIATE_ARTICLE,
            source.source_url.clone(),
            attachment_list(source),
        ),
        None => (GENERATE_ARTICLE, String::new(), String::new()),
    };

    let prompt = studio
        .prompts
        .render(
            template,
            &studio.vars(&[
                ("topic_idea", brief.title),
                ("description", brief.description),
                ("image_path", &image_path),
                ("image_url", &image_url),
                ("image_alt_text", brief.alt_text),
                ("affiliate_url", &affiliate_url),
                ("other_file_urls", &other_file_urls),
            ]),
        )
        .await?;
    let request = CompletionRequest::new(&studio.settings.models.text, prompt)
        .system(studio.settings.site.system_prompt())
        .max_tokens(3500)
        .temperature(0.7)
        .frequency_penalty(0.1);

    let reply = studio.backoff.retry(|| studio.model.complete(&request)).await?;
    let markdown = clean_article(&reply);
    if markdown.is_empty() {
        return Err("model returned an empty article".into());
    }

    let path = studio
        .settings
        .paths
        .articles_dir
        .join(article_filename(&studio.settings.date, brief.title));
    fs::write(&path, &markdown).await?;
    info!(path = %path.display(), bytes = markdown.len(), "Article saved");
    Ok(Draft { path, markdown })
}

/// Strip code fences and doubled quotes the model tends to wrap its reply in.
pub fn clean_article(reply: &str) -> String {
    reply
        .replace("```markdown", "")
        .replace("```", "")
        .replace("``", "")
        .replace("\"\"\"", "\"")
        .replace("\"\"", "\"")
        .trim()
        .to_string()
}

/// Parse the YAML block between the leading `---` markers, if any.
pub fn front_matter(markdown: &str) -> Option<FrontMatter> {
    let rest = markdown.trim_start().strip_prefix("---")?;
    let end = rest.find("\n---")?;
    match serde_yaml::from_str(&rest[..end]) {
        Ok(fm) => Some(fm),
        Err(e) => {
            debug!(error = %e, "Front matter is not valid YAML");
            None
        }
    }
}

/// Categories declared by the article.
///
/// Reads the front matter first and falls back to scanning for a
/// `categories: [..]` line when the header does not parse.
pub fn categories(markdown: &str) -> Vec<String> {
    if let Some(fm) = front_matter(markdown).filter(|fm| !fm.categories.is_empty()) {
        return fm.categories;
    }
    CATEGORIES_LINE
        .captures(markdown)
        .map(|c| {
            c[1].split(',')
                .map(|s| s.trim().trim_matches(['"', '\'']).to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// `cat-one/cat-two`, lowercased and percent-encoded, or
/// [`DEFAULT_CATEGORY_PATH`] when there is nothing to join.
pub fn category_path(categories: &[String]) -> String {
    let path = categories
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(|c| urlencoding::encode(c).to_lowercase())
        .join("/");
    if path.is_empty() {
        DEFAULT_CATEGORY_PATH.to_string()
    } else {
        path
    }
}

/// Public URL of the rendered article:
/// `{site_url}{category_path}/{yyyy/mm/dd}-{title}.html`.
pub fn article_url(site_url: &str, markdown: &str, date: &str, title: &str) -> String {
    let categories = categories(markdown);
    if categories.is_empty() {
        warn!(%title, "No categories found in article, using default path");
    }
    format!(
        "{}{}/{}-{}.html",
        site_url,
        category_path(&categories),
        date.replace('-', "/"),
        flatten_separators(title).replace(':', "-").replace(' ', "_")
    )
    .replace('\'', "")
}
