//! Illustration generation and alt text.

use super::Studio;
use crate::api::{CompletionRequest, ContentModel, ImageRequest, encode_data_url};
use crate::prompts::{GENERATE_IMAGE, GENERATE_IMAGE_ALT_TEXT};
use crate::utils::image_stem;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

/// Returned when the vision model could not describe the image.
pub const ALT_TEXT_FALLBACK: &str = "Alt text generation failed.";

/// Generate an illustration for a topic, download it and save it as
/// `{images_dir}/{date}_{title}.png`.
///
/// Generation and download are retried independently.
#[instrument(level = "info", skip_all, fields(%title))]
pub async fn create_image<M: ContentModel>(
    studio: &Studio<'_, M>,
    title: &str,
    description: &str,
) -> Result<PathBuf, Box<dyn Error>> {
    let prompt = studio
        .prompts
        .render(
            GENERATE_IMAGE,
            &studio.vars(&[("topic_idea", title), ("description", description)]),
        )
        .await?;
    let request = ImageRequest {
        model: studio.settings.models.image.clone(),
        prompt,
        size: studio.settings.models.image_size.clone(),
    };

    info!("Requesting image generation");
    let url = studio.backoff.retry(|| studio.model.generate_image(&request)).await?;
    let bytes = studio.backoff.retry(|| studio.model.download(&url)).await?;

    let path = studio
        .settings
        .paths
        .images_dir
        .join(format!("{}.png", image_stem(&studio.settings.date, title)));
    fs::write(&path, &bytes).await?;
    info!(path = %path.display(), bytes = bytes.len(), "Saved generated image");
    Ok(path)
}

/// Ask the vision model for alt text. Never fails: problems are logged and
/// [`ALT_TEXT_FALLBACK`] is returned instead.
#[instrument(level = "info", skip_all, fields(image = %image.display()))]
pub async fn alt_text<M: ContentModel>(
    studio: &Studio<'_, M>,
    title: &str,
    description: &str,
    image: &Path,
) -> String {
    match try_alt_text(studio, title, description, image).await {
        Ok(text) => {
            info!(alt_text = %text, "Generated alt text");
            text
        }
        Err(e) => {
            error!(error = %e, "Error generating alt text");
            ALT_TEXT_FALLBACK.to_string()
        }
    }
}

async fn try_alt_text<M: ContentModel>(
    studio: &Studio<'_, M>,
    title: &str,
    description: &str,
    image: &Path,
) -> Result<String, Box<dyn Error>> {
    let bytes = fs::read(image).await?;
    let prompt = studio
        .prompts
        .render(
            GENERATE_IMAGE_ALT_TEXT,
            &studio.vars(&[("topic_idea", title), ("description", description)]),
        )
        .await?;
    let request = CompletionRequest::new(&studio.settings.models.vision, prompt)
        .image(encode_data_url(image_mime(image), &bytes))
        .max_tokens(100)
        .temperature(0.5);
    let reply = studio.model.complete(&request).await?;
    let cleaned = clean_alt_text(&reply);
    if cleaned.is_empty() {
        return Err("model returned empty alt text".into());
    }
    Ok(cleaned)
}

/// Strip an "Alt Text:" label and any quotes from a model reply.
pub fn clean_alt_text(reply: &str) -> String {
    reply
        .replace("Alt Text: ", "")
        .replace("alt text: ", "")
        .replace(['"', '\''], "")
        .trim()
        .to_string()
}

/// MIME type guessed from the file extension.
pub fn image_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}
