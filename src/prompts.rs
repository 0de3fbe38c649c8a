//! Prompt templates loaded from the prompts directory.
//!
//! Templates are plain text with `{NAME}` placeholders. Literal braces are
//! written `{{` and `}}`. Rendering fails on a placeholder that was not
//! supplied, so a typo in a template surfaces as an error instead of leaking
//! `{topic_idea}` into a model request.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, instrument};

pub const GENERATE_TOPICS: &str = "generate_topics.txt";
pub const GENERATE_IMAGE: &str = "generate_image.txt";
pub const GENERATE_IMAGE_ALT_TEXT: &str = "generate_image_alt_text.txt";
pub const GENERATE_ARTICLE: &str = "generate_article.txt";
pub const GENERATE_AFFILIATE_TOPIC: &str = "generate_affiliate_idea_topic.txt";
pub const GENERATE_AFFILIATE_ARTICLE: &str = "generate_affiliate_article.txt";

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read prompt {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("prompt {name} uses unknown placeholder {{{placeholder}}}")]
    UnknownPlaceholder { name: String, placeholder: String },

    #[error("prompt {name} has an unbalanced brace at byte {offset}")]
    Unbalanced { name: String, offset: usize },
}

/// Directory of prompt templates.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    dir: PathBuf,
}

impl PromptLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn load(&self, name: &str) -> Result<Prompt, PromptError> {
        let path = self.dir.join(name);
        match fs::read_to_string(&path).await {
            Ok(template) => {
                debug!(path = %path.display(), bytes = template.len(), "Loaded prompt");
                Ok(Prompt::new(name, template))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                error!(path = %path.display(), "Prompt file not found");
                Err(PromptError::NotFound(path))
            }
            Err(source) => {
                error!(path = %path.display(), error = %source, "Error loading prompt file");
                Err(PromptError::Io { path, source })
            }
        }
    }

    /// Load `name` and render it in one step.
    pub async fn render(&self, name: &str, vars: &[(&str, &str)]) -> Result<String, PromptError> {
        self.load(name).await?.render(vars)
    }
}

/// A loaded template.
#[derive(Debug, Clone)]
pub struct Prompt {
    name: String,
    template: String,
}

impl Prompt {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
        }
    }

    /// Substitute every `{NAME}` with its value from `vars`.
    pub fn render(&self, vars: &[(&str, &str)]) -> Result<String, PromptError> {
        let src = self.template.as_str();
        let mut out = String::with_capacity(src.len());
        let mut rest = src;

        while let Some(pos) = rest.find(['{', '}']) {
            out.push_str(&rest[..pos]);
            let offset = src.len() - rest.len() + pos;
            let tail = &rest[pos..];

            if tail.starts_with("{{") {
                out.push('{');
                rest = &tail[2..];
            } else if tail.starts_with("}}") {
                out.push('}');
                rest = &tail[2..];
            } else if tail.starts_with('}') {
                return Err(self.unbalanced(offset));
            } else {
                let Some(end) = tail.find('}') else {
                    return Err(self.unbalanced(offset));
                };
                let key = &tail[1..end];
                if key.contains('{') {
                    return Err(self.unbalanced(offset));
                }
                let value = vars
                    .iter()
                    .find(|(k, _)| *k == key)
                    .map(|(_, v)| *v)
                    .ok_or_else(|| PromptError::UnknownPlaceholder {
                        name: self.name.clone(),
                        placeholder: key.to_string(),
                    })?;
                out.push_str(value);
                rest = &tail[end + 1..];
            }
        }
        out.push_str(rest);
        Ok(out)
    }

    fn unbalanced(&self, offset: usize) -> PromptError {
        PromptError::Unbalanced {
            name: self.name.clone(),
            offset,
        }
    }
}
