//! Content generation steps.
//!
//! Each submodule wraps one kind of model interaction:
//!
//! - [`topics`]: refill the queue with fresh topic ideas
//! - [`image`]: generate, download and describe the illustration
//! - [`affiliate`]: resolve side-loaded affiliate material
//! - [`article`]: draft the markdown article and derive its public URL
//!
//! # Output structure
//!
//! ```text
//! images_dir/
//! └── 2025-05-06_My_Topic.png
//! articles_dir/
//! └── 2025-05-06-My_Topic.md
//! ```

pub mod affiliate;
pub mod article;
pub mod image;
pub mod topics;

use crate::prompts::PromptLibrary;
use crate::retry::Backoff;
use crate::settings::Settings;

/// Shared handles for one generation step.
pub struct Studio<'a, M> {
    pub model: &'a M,
    pub prompts: &'a PromptLibrary,
    pub settings: &'a Settings,
    pub backoff: &'a Backoff,
}

impl<M> Studio<'_, M> {
    /// Site variables plus `extra`, ready for [`PromptLibrary::render`].
    pub fn vars<'v>(&'v self, extra: &[(&'static str, &'v str)]) -> Vec<(&'static str, &'v str)> {
        let mut vars = self.settings.site.prompt_vars();
        vars.extend_from_slice(extra);
        vars
    }
}
