use std::sync::Arc;

use hero_contracts::catalog::{CatalogRepository, CategoryId, ProductId};
use hero_contracts::config::HeroConfig;
use hero_contracts::events::{EventPayload, EventWriter};
use hero_contracts::media::FileStore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::cancel::CancellationToken;
use crate::error::{GenerationError, HeroError};
use crate::generator::{ImageGenerator, Strategy};
use crate::persistence::{ImagePersistence, StoredImage};
use crate::prompt::PromptBuilder;
use crate::references::ImageReferenceResolver;
use crate::sampler::ProductSampler;

pub const DEFAULT_NUM_PRODUCTS: usize = 3;
pub const DEFAULT_PREVIEW_PRODUCTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateOptions {
    /// Point the category image at the new file. When false the image is
    /// stored and returned only.
    pub assign_to_category: bool,
    /// Operator-supplied prompt used instead of the built one.
    pub prompt_override: Option<String>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            assign_to_category: true,
            prompt_override: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeroImage {
    pub category_id: CategoryId,
    pub stored: StoredImage,
    pub strategy: Strategy,
    pub prompt: String,
    pub product_ids: Vec<ProductId>,
    pub reference_count: usize,
}

/// Structured outcome handed to callers (CLI, HTTP endpoints).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeroImageResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<StoredImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HeroImageResponse {
    pub fn from_result(result: &Result<HeroImage, HeroError>) -> Self {
        match result {
            Ok(hero) => Self {
                success: true,
                image: Some(hero.stored.clone()),
                strategy: Some(hero.strategy.as_str().to_string()),
                error_kind: None,
                message: None,
            },
            Err(err) => Self {
                success: false,
                image: None,
                strategy: None,
                error_kind: Some(err.kind().as_str().to_string()),
                message: Some(err.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptPreviewResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PromptPreviewResponse {
    pub fn from_result(result: &Result<String, HeroError>) -> Self {
        match result {
            Ok(prompt) => Self {
                success: true,
                default_prompt: Some(prompt.clone()),
                message: None,
            },
            Err(err) => Self {
                success: false,
                default_prompt: None,
                message: Some(format!("Failed to load configuration: {err}")),
            },
        }
    }
}

/// Category hero image generation: sample products, build the prompt,
/// generate, persist.
///
/// Bound to one configuration scope. Every stage runs sequentially on the
/// caller's thread.
pub struct HeroImagePipeline {
    config: HeroConfig,
    scope: Option<String>,
    catalog: Arc<dyn CatalogRepository>,
    sampler: ProductSampler,
    prompt_builder: PromptBuilder,
    resolver: ImageReferenceResolver,
    generator: ImageGenerator,
    persistence: ImagePersistence,
    events: Option<EventWriter>,
    require_api_key: bool,
}

impl HeroImagePipeline {
    pub fn new(
        config: HeroConfig,
        scope: Option<String>,
        catalog: Arc<dyn CatalogRepository>,
        media: Arc<dyn FileStore>,
        generator: ImageGenerator,
    ) -> Self {
        let scope_ref = scope.as_deref();
        let persistence = ImagePersistence::new(
            media.clone(),
            catalog.clone(),
            config.media_base_url(scope_ref),
        )
        .with_fallback_size(generator.settings().size.clone());
        Self {
            sampler: ProductSampler::new(catalog.clone()),
            prompt_builder: PromptBuilder,
            resolver: ImageReferenceResolver::new(media),
            persistence,
            generator,
            catalog,
            config,
            scope,
            events: None,
            require_api_key: true,
        }
    }

    /// Pipeline backed by the OpenAI provider configured for `scope`.
    pub fn from_config(
        config: HeroConfig,
        scope: Option<String>,
        catalog: Arc<dyn CatalogRepository>,
        media: Arc<dyn FileStore>,
    ) -> anyhow::Result<Self> {
        let generator = ImageGenerator::from_config(&config, scope.as_deref())?;
        Ok(Self::new(config, scope, catalog, media, generator))
    }

    /// Drops the API key requirement, for providers that never reach the
    /// network such as [`crate::DryrunProvider`]. The enabled flag still applies.
    pub fn offline(mut self) -> Self {
        self.require_api_key = false;
        self
    }

    /// Appends an audit trail of every invocation to `events`.
    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn generate_category_hero_image(
        &self,
        category_id: CategoryId,
        num_products: usize,
        options: &GenerateOptions,
        cancel: &CancellationToken,
    ) -> Result<HeroImage, HeroError> {
        let events = self.events.as_ref().map(EventWriter::next_invocation);
        let audit = Audit(events.as_ref());
        audit.record(
            "generation_started",
            json!({
                "category_id": category_id,
                "num_products": num_products,
                "assign_to_category": options.assign_to_category,
            }),
        );

        let result = self.run(category_id, num_products, options, cancel, &audit);
        if let Err(err) = &result {
            log::error!("Hero image generation for category {category_id} failed: {err}");
            audit.record(
                "generation_failed",
                json!({
                    "category_id": category_id,
                    "kind": err.kind().as_str(),
                    "message": err.to_string(),
                }),
            );
        }
        result
    }

    /// The prompt the admin form pre-fills for `category_id`.
    pub fn preview_prompt(
        &self,
        category_id: CategoryId,
        num_products: usize,
    ) -> Result<String, HeroError> {
        let category = self
            .catalog
            .get_category(category_id)?
            .ok_or(HeroError::CategoryNotFound(category_id))?;
        let sample = self.sampler.sample(category_id, num_products)?;
        Ok(self.prompt_builder.build(&sample, &category.name))
    }

    fn run(
        &self,
        category_id: CategoryId,
        num_products: usize,
        options: &GenerateOptions,
        cancel: &CancellationToken,
        audit: &Audit<'_>,
    ) -> Result<HeroImage, HeroError> {
        let scope = self.scope.as_deref();
        if !self.config.is_enabled(scope) {
            return Err(HeroError::Disabled);
        }
        if self.require_api_key && self.config.api_key(scope).is_none() {
            return Err(HeroError::MissingApiKey);
        }
        ensure_not_cancelled(cancel)?;

        let mut category = self
            .catalog
            .get_category(category_id)?
            .ok_or(HeroError::CategoryNotFound(category_id))?;
        log::info!("Generating hero image for category: {}", category.name);

        log::info!("Selecting {num_products} random products from the category...");
        let sample = self.sampler.sample(category_id, num_products)?;
        if sample.is_empty() {
            return Err(HeroError::NoProducts(category_id));
        }
        log::info!("Selected {} products.", sample.len());
        audit.record(
            "products_sampled",
            json!({ "category_id": category_id, "product_ids": sample.ids() }),
        );

        let custom_prompt = options
            .prompt_override
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());
        let prompt = match custom_prompt {
            Some(custom) => custom.to_string(),
            None => self.prompt_builder.build(&sample, &category.name),
        };
        log::info!("Generated prompt: {prompt}");
        audit.record(
            "prompt_built",
            json!({
                "prompt": prompt,
                "overridden": custom_prompt.is_some(),
            }),
        );

        let references = self.resolver.resolve(&sample, num_products);
        log::info!("Found {} product images.", references.len());
        audit.record(
            "references_resolved",
            json!({
                "count": references.len(),
                "paths": references
                    .iter()
                    .map(|source| source.path.to_string_lossy().to_string())
                    .collect::<Vec<String>>(),
            }),
        );

        ensure_not_cancelled(cancel)?;
        let generation = self.generator.generate(&prompt, &references, cancel)?;
        audit.record(
            "image_generated",
            json!({
                "strategy": generation.strategy.as_str(),
                "attempts": generation
                    .attempts
                    .iter()
                    .map(|attempt| json!({
                        "strategy": attempt.strategy.as_str(),
                        "error": attempt.error,
                    }))
                    .collect::<Vec<Value>>(),
            }),
        );

        ensure_not_cancelled(cancel)?;
        log::info!("Saving image and setting as category image...");
        let target = if options.assign_to_category {
            Some(&mut category)
        } else {
            None
        };
        let stored = self.persistence.persist(&generation.image, target)?;
        audit.record(
            "image_persisted",
            json!({
                "category_id": category_id,
                "file_name": stored.name,
                "path": stored.path,
                "url": stored.url,
                "size": stored.size,
                "assigned": options.assign_to_category,
            }),
        );
        log::info!(
            "Generated hero image {} for category {}.",
            stored.name,
            category.name
        );

        Ok(HeroImage {
            category_id,
            stored,
            strategy: generation.strategy,
            prompt: generation.prompt,
            product_ids: sample.ids(),
            reference_count: references.len(),
        })
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<(), HeroError> {
    if cancel.is_cancelled() {
        return Err(GenerationError::Cancelled.into());
    }
    Ok(())
}

struct Audit<'a>(Option<&'a EventWriter>);

impl Audit<'_> {
    fn record(&self, event_type: &str, payload: Value) {
        let Some(writer) = self.0 else {
            return;
        };
        let payload: EventPayload = match payload {
            Value::Object(map) => map,
            _ => EventPayload::new(),
        };
        writer.record(event_type, payload);
    }
}
