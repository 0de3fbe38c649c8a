//! Side-loaded affiliate material.
//!
//! An affiliate queue entry is just an item id. Everything else comes from
//! `{affiliate_dir}/{item_id}/`:
//!
//! ```text
//! affiliate_dir/B00XYZ/
//! ├── B00XYZ.txt     # first line: product URL, rest: product information
//! ├── photo.jpg      # first image (by name) illustrates the article
//! └── manual.pdf     # anything else is linked as a download
//! ```

use super::Studio;
use crate::api::{CompletionRequest, ContentModel};
use crate::models::AffiliateSource;
use crate::prompts::GENERATE_AFFILIATE_TOPIC;
use crate::utils::{image_stem, public_url, truncate_for_log};
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

pub const DEFAULT_TITLE: &str = "Default Topic Idea";
pub const DEFAULT_DESCRIPTION: &str = "Default Description";

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

static TOPIC_REPLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""([^"]*)"\s*,\s*"([^"]*)""#).expect("valid regex"));

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// An item id must name a single folder directly inside the affiliate directory.
fn is_plain_item_id(item_id: &str) -> bool {
    !item_id.trim().is_empty()
        && !item_id.contains(['/', '\\'])
        && item_id != "."
        && !item_id.contains("..")
        && !Path::new(item_id).is_absolute()
}

/// Read the affiliate folder for `item_id`.
///
/// Fails when the id is not a plain folder name, when the folder or its
/// `{item_id}.txt` is missing, when the first line of that file is not an
/// http(s) URL, or when no image is present.
#[instrument(level = "info", skip(affiliate_dir, site_url))]
pub async fn resolve(
    affiliate_dir: &Path,
    item_id: &str,
    site_url: &str,
) -> Result<AffiliateSource, Box<dyn Error>> {
    if !is_plain_item_id(item_id) {
        error!(%item_id, "Affiliate id is not a plain folder name");
        return Err(format!("invalid affiliate id {item_id:?}: must be a plain folder name").into());
    }
    let folder = affiliate_dir.join(item_id);
    let text_path = folder.join(format!("{item_id}.txt"));

    let product_text = fs::read_to_string(&text_path)
        .await
        .map_err(|e| format!("cannot read {}: {e}", text_path.display()))?;
    let first_line = product_text.lines().next().unwrap_or_default().trim();
    if !(first_line.starts_with("http://") || first_line.starts_with("https://")) {
        error!(path = %text_path.display(), %first_line, "Invalid affiliate URL");
        return Err(format!(
            "invalid affiliate URL in first line of {}: {}",
            text_path.display(),
            first_line
        )
        .into());
    }
    let source_url = first_line.to_string();

    let mut names = Vec::new();
    let mut entries = fs::read_dir(&folder).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    info!(files = ?names, "Files in affiliate folder");

    let is_image =
        |name: &str| extension_of(name).is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.as_str()));
    let image_name = names
        .iter()
        .find(|n| is_image(n))
        .ok_or_else(|| format!("no image file found in {}", folder.display()))?;

    let attachments = names
        .iter()
        .filter(|n| !is_image(n) && extension_of(n).as_deref() != Some("txt"))
        .map(|n| (n.clone(), public_url(site_url, &folder.join(n))))
        .collect();

    Ok(AffiliateSource {
        item_id: item_id.to_string(),
        source_url,
        product_text,
        image: folder.join(image_name),
        attachments,
    })
}

/// Pull `"title","description"` out of a model reply.
pub fn parse_topic_reply(reply: &str) -> Option<(String, String)> {
    TOPIC_REPLY
        .captures(reply)
        .map(|c| (c[1].trim().to_string(), c[2].trim().to_string()))
}

/// Ask the model for a title and description for the product.
///
/// Returns `None` when the reply does not follow the expected format; the
/// caller decides what to fall back to.
#[instrument(level = "info", skip_all, fields(item_id = %source.item_id))]
pub async fn propose_topic<M: ContentModel>(
    studio: &Studio<'_, M>,
    source: &AffiliateSource,
) -> Result<Option<(String, String)>, Box<dyn Error>> {
    let template = studio.prompts.render(GENERATE_AFFILIATE_TOPIC, &studio.vars(&[])).await?;
    let prompt = format!("{template}\n\nProduct Information:\n{}", source.product_text);
    let request = CompletionRequest::new(&studio.settings.models.text, prompt)
        .system(studio.settings.site.system_prompt())
        .max_tokens(200)
        .temperature(0.7);

    let reply = studio.backoff.retry(|| studio.model.complete(&request)).await?;
    let parsed = parse_topic_reply(&reply);
    match &parsed {
        Some((title, description)) => info!(%title, %description, "Generated affiliate topic"),
        None => error!(reply = %truncate_for_log(&reply, 200), "Response format unexpected"),
    }
    Ok(parsed)
}

/// Copy the product image into the images directory as
/// `{date}_{title}.{ext}` and return the new path.
#[instrument(level = "info", skip_all, fields(item_id = %source.item_id))]
pub async fn stage_image<M>(
    studio: &Studio<'_, M>,
    title: &str,
    source: &AffiliateSource,
) -> Result<PathBuf, Box<dyn Error>> {
    let ext = source
        .image
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("jpg");
    let target = studio
        .settings
        .paths
        .images_dir
        .join(format!("{}.{}", image_stem(&studio.settings.date, title), ext));
    fs::copy(&source.image, &target).await?;
    info!(from = %source.image.display(), to = %target.display(), "Copied affiliate image");
    Ok(target)
}

/// Markdown list of attachment links for the article prompt.
pub fn attachment_list(source: &AffiliateSource) -> String {
    if source.attachments.is_empty() {
        return "(none)".to_string();
    }
    source
        .attachments
        .iter()
        .map(|(name, url)| format!("- [{name}]({url})"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::testing::{FakeModel, settings_in, write_affiliate_folder};
    use crate::prompts::PromptLibrary;
    use crate::retry::Backoff;
    use std::time::Duration;

    #[test]
    fn test_parse_topic_reply() {
        assert_eq!(
            parse_topic_reply("Sure! \"Best Gadget 2025\", \"Why it rocks\""),
            Some(("Best Gadget 2025".to_string(), "Why it rocks".to_string()))
        );
        assert_eq!(parse_topic_reply("Best Gadget - Why it rocks"), None);
    }

    #[tokio::test]
    async fn test_resolve_reads_folder() {
        let tmp = tempfile::tempdir().unwrap();
        write_affiliate_folder(tmp.path(), "B00X", "https://shop.example/b00x");

        let source = resolve(tmp.path(), "B00X", "https://blog.example.com/").await.unwrap();
        assert_eq!(source.source_url, "https://shop.example/b00x");
        assert!(source.product_text.contains("A sturdy gadget."));
        assert_eq!(source.image, tmp.path().join("B00X/photo.jpg"));
        assert_eq!(source.attachments.len(), 1);
        assert_eq!(source.attachments[0].0, "manual.pdf");
        assert!(source.attachments[0].1.starts_with("https://blog.example.com/"));
        assert!(source.attachments[0].1.ends_with("B00X/manual.pdf"));
    }

    #[tokio::test]
    async fn test_resolve_rejects_bad_url_and_missing_image() {
        let tmp = tempfile::tempdir().unwrap();
        write_affiliate_folder(tmp.path(), "BAD", "not a url");
        let err = resolve(tmp.path(), "BAD", "https://b/").await.unwrap_err();
        assert!(err.to_string().contains("invalid affiliate URL"));

        write_affiliate_folder(tmp.path(), "NOIMG", "https://shop.example/x");
        std::fs::remove_file(tmp.path().join("NOIMG/photo.jpg")).unwrap();
        let err = resolve(tmp.path(), "NOIMG", "https://b/").await.unwrap_err();
        assert!(err.to_string().contains("no image file"));

        assert!(resolve(tmp.path(), "MISSING", "https://b/").await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_rejects_ids_leaving_the_affiliate_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let affiliate_dir = tmp.path().join("affiliate");
        std::fs::create_dir_all(&affiliate_dir).unwrap();
        write_affiliate_folder(tmp.path(), "outside", "https://shop.example/x");

        for id in ["../outside", "/etc", "a/b", "a\\b", "..", ".", "", "x..y"] {
            let err = resolve(&affiliate_dir, id, "https://b/").await.unwrap_err();
            assert!(err.to_string().contains("invalid affiliate id"), "{id}: {err}");
        }
    }

    #[tokio::test]
    async fn test_propose_topic_and_stage_image() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings_in(tmp.path());
        write_affiliate_folder(&settings.paths.affiliate_dir, "B00X", "https://shop.example/b00x");
        let prompts = PromptLibrary::new(&settings.paths.prompts_dir);
        let backoff = Backoff::new(1, Duration::ZERO, 1.0);
        let model = FakeModel {
            affiliate_topic_reply: "\"Best Gadget\",\"Why it rocks\"".to_string(),
            ..FakeModel::new()
        };
        let studio = Studio {
            model: &model,
            prompts: &prompts,
            settings: &settings,
            backoff: &backoff,
        };

        let source = resolve(&settings.paths.affiliate_dir, "B00X", &settings.site.url)
            .await
            .unwrap();
        let topic = propose_topic(&studio, &source).await.unwrap();
        assert_eq!(topic, Some(("Best Gadget".to_string(), "Why it rocks".to_string())));
        let requests = model.requests_starting_with("AFFTOPIC");
        assert!(
            requests[0]
                .user
                .ends_with("Product Information:\nhttps://shop.example/b00x\nA sturdy gadget.\n")
        );

        let staged = stage_image(&studio, "Best Gadget", &source).await.unwrap();
        assert_eq!(staged, settings.paths.images_dir.join("2025-05-06_Best_Gadget.jpg"));
        assert!(staged.exists());

        assert_eq!(
            attachment_list(&source),
            format!("- [manual.pdf]({})", source.attachments[0].1)
        );
    }
}
