use std::sync::Once;

pub mod cancel;
pub mod error;
pub mod generator;
pub mod openai;
pub mod persistence;
pub mod pipeline;
pub mod prompt;
pub mod provider;
pub mod references;
pub mod sampler;

#[cfg(test)]
mod testing;

pub use cancel::CancellationToken;
pub use error::{ErrorKind, GenerationError, HeroError, PersistenceError};
pub use generator::{GenerationResult, GenerationSettings, ImageGenerator, Strategy};
pub use openai::OpenAiImageProvider;
pub use persistence::{ImagePersistence, StoredImage};
pub use pipeline::{
    GenerateOptions, HeroImage, HeroImagePipeline, HeroImageResponse, PromptPreviewResponse,
    DEFAULT_NUM_PRODUCTS, DEFAULT_PREVIEW_PRODUCTS,
};
pub use prompt::PromptBuilder;
pub use provider::{DryrunProvider, EncodedImage, ImageProvider};
pub use references::{ImageReferenceResolver, ImageSource};
pub use sampler::{ProductSample, ProductSampler};

static INIT_LOGGER: Once = Once::new();

/// Installs the `env_logger` backend once per process. `RUST_LOG` overrides
/// the default `info` filter.
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        let env = env_logger::Env::default().default_filter_or("info");
        // A host application may already own the global logger.
        let _ = env_logger::Builder::from_env(env).try_init();
    });
}
