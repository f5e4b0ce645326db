use std::io::Cursor;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, Rgb, RgbImage};
use sha2::{Digest, Sha256};

use crate::cancel::CancellationToken;
use crate::references::ImageSource;

/// Base64-transported image returned by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub b64_json: String,
    pub revised_prompt: Option<String>,
}

impl EncodedImage {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            b64_json: BASE64.encode(bytes),
            revised_prompt: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateImageRequest {
    pub model: String,
    pub prompt: String,
    pub size: String,
    /// `None` leaves quality to the provider default.
    pub quality: Option<String>,
    pub n: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditImageRequest {
    pub model: String,
    pub prompt: String,
    pub image: ImageSource,
    pub size: String,
    pub quality: Option<String>,
    pub n: u32,
}

/// External text-to-image / image-edit API.
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;

    fn create_image(
        &self,
        request: &CreateImageRequest,
        cancel: &CancellationToken,
    ) -> Result<EncodedImage>;

    fn edit_image(
        &self,
        request: &EditImageRequest,
        cancel: &CancellationToken,
    ) -> Result<EncodedImage>;
}

/// Offline provider rendering a solid-colour PNG keyed by the prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunProvider;

impl ImageProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn create_image(
        &self,
        request: &CreateImageRequest,
        cancel: &CancellationToken,
    ) -> Result<EncodedImage> {
        ensure_not_cancelled(cancel)?;
        let (width, height) = parse_dims(&request.size);
        let png = render_png(width, height, color_from_bytes(&[request.prompt.as_bytes()]))?;
        Ok(EncodedImage::from_bytes(&png))
    }

    fn edit_image(
        &self,
        request: &EditImageRequest,
        cancel: &CancellationToken,
    ) -> Result<EncodedImage> {
        ensure_not_cancelled(cancel)?;
        let reference = std::fs::read(request.image.path())
            .with_context(|| format!("failed reading {}", request.image.path().display()))?;
        let (width, height) = parse_dims(&request.size);
        let color = color_from_bytes(&[request.prompt.as_bytes(), &reference]);
        let png = render_png(width, height, color)?;
        Ok(EncodedImage::from_bytes(&png))
    }
}

pub(crate) fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        anyhow::bail!("request cancelled");
    }
    Ok(())
}

pub(crate) fn parse_dims(size: &str) -> (u32, u32) {
    let mut parts = size.trim().split(['x', 'X']);
    let width = parts.next().and_then(|value| value.trim().parse::<u32>().ok());
    let height = parts.next().and_then(|value| value.trim().parse::<u32>().ok());
    match (width, height, parts.next()) {
        (Some(width), Some(height), None) if width > 0 && height > 0 => (width, height),
        _ => (1024, 1024),
    }
}

fn render_png(width: u32, height: u32, (r, g, b): (u8, u8, u8)) -> Result<Vec<u8>> {
    let image = RgbImage::from_pixel(width, height, Rgb([r, g, b]));
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .context("failed encoding dryrun image")?;
    Ok(out.into_inner())
}

fn color_from_bytes(chunks: &[&[u8]]) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

/// Flattened cause chain, de-duplicated, for logs and user-facing messages.
pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
