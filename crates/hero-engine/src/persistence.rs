use std::io::Cursor;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hero_contracts::catalog::{CatalogRepository, Category};
use hero_contracts::media::{FileStore, CATEGORY_IMAGE_PATH};
use image::{ImageFormat, ImageReader, ImageResult};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::PersistenceError;
use crate::provider::{parse_dims, EncodedImage};

const FILE_NAME_PREFIX: &str = "ai_hero_";
const FILE_NAME_TOKEN_LEN: usize = 10;

/// A generated image written to the media store. Never mutated after creation.
///
/// Field names follow the admin uploader widget's file record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredImage {
    pub name: String,
    /// Path relative to the media root.
    pub path: String,
    pub url: String,
    pub size: u64,
    #[serde(rename = "previewType")]
    pub preview_type: String,
    #[serde(rename = "previewWidth")]
    pub width: u32,
    #[serde(rename = "previewHeight")]
    pub height: u32,
    #[serde(rename = "type")]
    pub mime_type: String,
}

pub struct ImagePersistence {
    media: Arc<dyn FileStore>,
    catalog: Arc<dyn CatalogRepository>,
    media_base_url: String,
    fallback_size: String,
}

impl ImagePersistence {
    pub fn new(
        media: Arc<dyn FileStore>,
        catalog: Arc<dyn CatalogRepository>,
        media_base_url: impl Into<String>,
    ) -> Self {
        Self {
            media,
            catalog,
            media_base_url: media_base_url.into(),
            fallback_size: "1024x1024".to_string(),
        }
    }

    /// Size reported when the payload cannot be introspected.
    pub fn with_fallback_size(mut self, size: impl Into<String>) -> Self {
        self.fallback_size = size.into();
        self
    }

    /// Decodes `image`, writes it under a fresh `ai_hero_<token>.png` name and,
    /// when `category` is given, points the category image at it.
    ///
    /// Either both the file and the category update land, or neither does:
    /// a failed category save removes the written file, and `category` is only
    /// modified on success.
    pub fn persist(
        &self,
        image: &EncodedImage,
        category: Option<&mut Category>,
    ) -> Result<StoredImage, PersistenceError> {
        let bytes = decode_payload(&image.b64_json).map_err(|err| {
            log::error!("Error decoding generated image: {err}");
            err
        })?;
        let file_name = generate_file_name(&mut rand::rng());
        let relative = format!("{CATEGORY_IMAGE_PATH}{file_name}");
        let (width, height, mime_type) = self.inspect(&bytes);

        if let Err(source) = self.media.write_file(&relative, &bytes) {
            log::error!("Error saving category image {relative}: {source}");
            return Err(PersistenceError::Write { file_name, source });
        }
        log::info!(
            "Wrote generated image to {} (sha256 {})",
            self.media.absolute_path(&relative).display(),
            short_digest(&bytes)
        );

        if let Some(category) = category {
            // Only the image field is written; the rest of the stored record may
            // have changed since `category` was read.
            if let Err(source) = self
                .catalog
                .set_category_image(category.id, Some(&file_name))
            {
                log::error!(
                    "Error assigning {file_name} to category {}: {source}",
                    category.id
                );
                if let Err(cleanup) = self.media.remove_file(&relative) {
                    log::error!("Failed removing unreferenced image {relative}: {cleanup}");
                }
                return Err(PersistenceError::CategoryUpdate {
                    file_name,
                    category_id: category.id,
                    source,
                });
            }
            category.image = Some(file_name.clone());
            log::info!("Category {} image set to {file_name}", category.id);
        }

        let size = self.media.file_size(&relative).unwrap_or_else(|err| {
            log::warn!("Could not stat {relative}: {err}; reporting decoded length");
            bytes.len() as u64
        });

        Ok(StoredImage {
            url: self.public_url(&file_name),
            name: file_name,
            path: relative,
            size,
            preview_type: "image".to_string(),
            width,
            height,
            mime_type,
        })
    }

    fn public_url(&self, file_name: &str) -> String {
        let base = self.media_base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return format!("{CATEGORY_IMAGE_PATH}{file_name}");
        }
        format!("{base}/{CATEGORY_IMAGE_PATH}{file_name}")
    }

    /// Reads dimensions from the image header without decoding pixel data.
    fn inspect(&self, bytes: &[u8]) -> (u32, u32, String) {
        match read_header(bytes) {
            Ok((width, height, format)) => (
                width,
                height,
                format
                    .map(|format| format.to_mime_type().to_string())
                    .unwrap_or_else(|| "image/png".to_string()),
            ),
            Err(err) => {
                log::warn!(
                    "Generated image could not be introspected ({err}); reporting {}",
                    self.fallback_size
                );
                let (width, height) = parse_dims(&self.fallback_size);
                (width, height, "image/png".to_string())
            }
        }
    }
}

fn read_header(bytes: &[u8]) -> ImageResult<(u32, u32, Option<ImageFormat>)> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let format = reader.format();
    let (width, height) = reader.into_dimensions()?;
    Ok((width, height, format))
}

/// Accepts raw base64 or a `data:` URI.
fn decode_payload(encoded: &str) -> Result<Vec<u8>, PersistenceError> {
    let trimmed = encoded.trim();
    let payload = if trimmed.starts_with("data:") {
        trimmed
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| PersistenceError::Decode("data URI without payload".to_string()))?
    } else {
        trimmed
    };
    let compact: String = payload.chars().filter(|ch| !ch.is_whitespace()).collect();
    let bytes = BASE64
        .decode(compact.as_bytes())
        .map_err(|err| PersistenceError::Decode(err.to_string()))?;
    if bytes.is_empty() {
        return Err(PersistenceError::Decode("empty image payload".to_string()));
    }
    Ok(bytes)
}

fn generate_file_name<R: Rng + ?Sized>(rng: &mut R) -> String {
    let token: String = rng
        .sample_iter(&Alphanumeric)
        .take(FILE_NAME_TOKEN_LEN)
        .map(char::from)
        .collect();
    format!("{FILE_NAME_PREFIX}{token}.png")
}

fn short_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..8])
}
