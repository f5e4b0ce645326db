use std::sync::Arc;

use hero_contracts::config::HeroConfig;

use crate::cancel::CancellationToken;
use crate::error::GenerationError;
use crate::openai::OpenAiImageProvider;
use crate::provider::{
    error_chain_text, CreateImageRequest, EditImageRequest, EncodedImage, ImageProvider,
};
use crate::references::ImageSource;

const ERROR_TEXT_MAX_CHARS: usize = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Reference image plus prompt.
    Edit,
    /// Prompt only.
    Create,
    /// Prompt only, minimal parameters, after a request-shape failure.
    RetryCreate,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Edit => "edit",
            Strategy::Create => "create",
            Strategy::RetryCreate => "retry-create",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyAttempt {
    pub strategy: Strategy,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub image: EncodedImage,
    pub strategy: Strategy,
    /// Prompt sent with the winning attempt.
    pub prompt: String,
    pub attempts: Vec<StrategyAttempt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationSettings {
    pub model: String,
    pub size: String,
    pub quality: String,
}

impl GenerationSettings {
    pub fn from_config(config: &HeroConfig, scope: Option<&str>) -> Self {
        Self {
            model: config.model(scope),
            size: config.image_size(scope),
            quality: config.quality(scope),
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self::from_config(&HeroConfig::default(), None)
    }
}

/// Calls the image provider, choosing between edit and create and falling
/// back on failure.
///
/// Order of attempts:
/// 1. no provider: fail without a network call
/// 2. no references: `create` with the prompt verbatim; a failure is final
/// 3. references: `edit` with the first reference only, then `create` with a
///    prompt naming the reference count
/// 4. if either failure looks like an unsupported parameter or a multipart
///    problem, one last `create` without the quality parameter
pub struct ImageGenerator {
    provider: Option<Arc<dyn ImageProvider>>,
    settings: GenerationSettings,
}

impl ImageGenerator {
    pub fn new(provider: Option<Arc<dyn ImageProvider>>, settings: GenerationSettings) -> Self {
        Self { provider, settings }
    }

    /// OpenAI-backed generator; unconfigured when the scope has no API key.
    pub fn from_config(config: &HeroConfig, scope: Option<&str>) -> anyhow::Result<Self> {
        let provider = OpenAiImageProvider::from_config(config, scope)?
            .map(|provider| Arc::new(provider) as Arc<dyn ImageProvider>);
        Ok(Self::new(
            provider,
            GenerationSettings::from_config(config, scope),
        ))
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    pub fn generate(
        &self,
        prompt: &str,
        references: &[ImageSource],
        cancel: &CancellationToken,
    ) -> Result<GenerationResult, GenerationError> {
        let Some(provider) = self.provider.as_deref() else {
            log::error!("Image generation client not initialized. Check API key configuration.");
            return Err(GenerationError::NotConfigured);
        };
        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }

        let mut attempts = Vec::new();

        let Some(first) = references.first() else {
            log::info!("Generating image with {} from text prompt only", provider.name());
            let request = self.create_request(prompt, true);
            return match provider.create_image(&request, cancel) {
                Ok(image) => Ok(success(image, Strategy::Create, request.prompt, attempts)),
                Err(err) => {
                    log::error!("Error generating image: {}", error_chain_text(&err, ERROR_TEXT_MAX_CHARS));
                    Err(failure(cancel, &[(Strategy::Create, &err)]))
                }
            };
        };

        let total = references.len();
        log::info!(
            "Generating image with {} from text prompt and {total} product images",
            provider.name()
        );
        let edit_request = EditImageRequest {
            model: self.settings.model.clone(),
            prompt: edit_prompt(prompt, total),
            image: first.clone(),
            size: self.settings.size.clone(),
            quality: Some(self.settings.quality.clone()),
            n: 1,
        };
        let edit_err = match provider.edit_image(&edit_request, cancel) {
            Ok(image) => return Ok(success(image, Strategy::Edit, edit_request.prompt, attempts)),
            Err(err) => err,
        };
        let edit_text = error_chain_text(&edit_err, ERROR_TEXT_MAX_CHARS);
        log::error!(
            "Error generating image with reference {}: {edit_text}",
            first.path.display()
        );
        attempts.push(StrategyAttempt {
            strategy: Strategy::Edit,
            error: Some(edit_text),
        });
        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }

        log::warn!("Falling back to text-only generation");
        let fallback_prompt = create_fallback_prompt(prompt, total);
        let create_request = self.create_request(&fallback_prompt, true);
        let create_err = match provider.create_image(&create_request, cancel) {
            Ok(image) => {
                return Ok(success(image, Strategy::Create, create_request.prompt, attempts))
            }
            Err(err) => err,
        };
        let create_text = error_chain_text(&create_err, ERROR_TEXT_MAX_CHARS);
        log::error!("Error generating fallback image: {create_text}");
        attempts.push(StrategyAttempt {
            strategy: Strategy::Create,
            error: Some(create_text),
        });

        if !(is_request_shape_error(&edit_err) || is_request_shape_error(&create_err)) {
            return Err(failure(
                cancel,
                &[(Strategy::Edit, &edit_err), (Strategy::Create, &create_err)],
            ));
        }
        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }

        log::warn!("Request shape rejected by provider; retrying text-only generation with minimal parameters");
        let retry_request = self.create_request(&fallback_prompt, false);
        match provider.create_image(&retry_request, cancel) {
            Ok(image) => Ok(success(image, Strategy::RetryCreate, retry_request.prompt, attempts)),
            Err(retry_err) => {
                log::error!(
                    "Error generating image on final retry: {}",
                    error_chain_text(&retry_err, ERROR_TEXT_MAX_CHARS)
                );
                Err(failure(
                    cancel,
                    &[
                        (Strategy::Edit, &edit_err),
                        (Strategy::Create, &create_err),
                        (Strategy::RetryCreate, &retry_err),
                    ],
                ))
            }
        }
    }

    fn create_request(&self, prompt: &str, with_quality: bool) -> CreateImageRequest {
        CreateImageRequest {
            model: self.settings.model.clone(),
            prompt: prompt.to_string(),
            size: self.settings.size.clone(),
            quality: with_quality.then(|| self.settings.quality.clone()),
            n: 1,
        }
    }
}

fn success(
    image: EncodedImage,
    strategy: Strategy,
    prompt: String,
    mut attempts: Vec<StrategyAttempt>,
) -> GenerationResult {
    attempts.push(StrategyAttempt {
        strategy,
        error: None,
    });
    GenerationResult {
        image,
        strategy,
        prompt,
        attempts,
    }
}

fn failure(cancel: &CancellationToken, errors: &[(Strategy, &anyhow::Error)]) -> GenerationError {
    if cancel.is_cancelled() {
        return GenerationError::Cancelled;
    }
    let summary = errors
        .iter()
        .map(|(strategy, err)| {
            format!(
                "{} failed: {}",
                strategy.as_str(),
                error_chain_text(err, ERROR_TEXT_MAX_CHARS)
            )
        })
        .collect::<Vec<String>>()
        .join("; ");
    GenerationError::Failed(summary)
}

/// Only one reference is attached to an edit; the prompt accounts for the rest.
fn edit_prompt(prompt: &str, total_references: usize) -> String {
    let additional = total_references.saturating_sub(1);
    if additional == 0 {
        return prompt.to_string();
    }
    format!(
        "{prompt} The attached image shows one of the products; {additional} additional product \
         image(s) were selected for this category and should inform the rest of the composition."
    )
}

fn create_fallback_prompt(prompt: &str, total_references: usize) -> String {
    format!(
        "{prompt} Base the composition on the {total_references} product reference image(s) \
         described above."
    )
}

/// Provider rejected the request shape rather than the content: an unsupported
/// or unknown parameter, or a malformed multipart upload.
fn is_request_shape_error(err: &anyhow::Error) -> bool {
    let lowered = error_chain_text(err, 4096).to_ascii_lowercase();
    [
        "unsupported parameter",
        "unsupported_parameter",
        "unknown parameter",
        "unknown_parameter",
        "unrecognized request argument",
        "multipart",
    ]
    .iter()
    .any(|needle| lowered.contains(needle))
}
