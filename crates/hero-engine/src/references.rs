use std::path::{Path, PathBuf};
use std::sync::Arc;

use hero_contracts::catalog::ProductId;
use hero_contracts::media::{FileStore, PRODUCT_IMAGE_PATH};

use crate::sampler::ProductSample;

/// A readable product image on disk. Bytes are read only when a provider
/// call needs them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSource {
    pub product_id: ProductId,
    pub path: PathBuf,
}

impl ImageSource {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("image.png")
            .to_string()
    }
}

pub struct ImageReferenceResolver {
    media: Arc<dyn FileStore>,
}

impl ImageReferenceResolver {
    pub fn new(media: Arc<dyn FileStore>) -> Self {
        Self { media }
    }

    /// Resolves up to `limit` product images in sample order, skipping
    /// products without an image and images missing from the media store.
    pub fn resolve(&self, sample: &ProductSample, limit: usize) -> Vec<ImageSource> {
        let mut sources = Vec::new();
        if limit == 0 {
            return sources;
        }

        for product in sample.products() {
            let Some(image) = product.image_ref() else {
                continue;
            };
            let relative = product_image_path(image);
            if !self.media.file_exists(&relative) {
                log::warn!(
                    "Image file does not exist for product {}: {}",
                    product.id,
                    self.media.absolute_path(&relative).display()
                );
                continue;
            }
            sources.push(ImageSource {
                product_id: product.id,
                path: self.media.absolute_path(&relative),
            });
            if sources.len() >= limit {
                break;
            }
        }
        sources
    }
}

fn product_image_path(image: &str) -> String {
    format!("{PRODUCT_IMAGE_PATH}/{}", image.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hero_contracts::catalog::{Product, NO_SELECTION};
    use hero_contracts::media::{FileStore, MediaDirectory};

    use super::{product_image_path, ImageReferenceResolver};
    use crate::sampler::ProductSample;

    fn product(id: u64, image: Option<&str>) -> Product {
        Product {
            id,
            name: format!("Product {id}"),
            image: image.map(str::to_string),
            category_ids: vec![42],
        }
    }

    #[test]
    fn product_paths_live_under_product_directory() {
        assert_eq!(product_image_path("/a/b/x.jpg"), "catalog/product/a/b/x.jpg");
        assert_eq!(product_image_path("x.jpg"), "catalog/product/x.jpg");
    }

    #[test]
    fn resolves_existing_files_in_order_and_skips_the_rest() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let media = Arc::new(MediaDirectory::new(temp.path()));
        media.write_file("catalog/product/a/1.jpg", b"one")?;
        media.write_file("catalog/product/c/3.jpg", b"three")?;

        let sample = ProductSample::new(vec![
            product(1, Some("/a/1.jpg")),
            product(2, Some("/b/missing.jpg")),
            product(5, Some(NO_SELECTION)),
            product(3, Some("/c/3.jpg")),
        ]);
        let sources = ImageReferenceResolver::new(media).resolve(&sample, 3);

        let ids: Vec<u64> = sources.iter().map(|source| source.product_id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(sources.iter().all(|source| source.path.is_file()));
        assert_eq!(sources[1].file_name(), "3.jpg");
        Ok(())
    }

    #[test]
    fn stops_at_limit() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let media = Arc::new(MediaDirectory::new(temp.path()));
        let mut products = Vec::new();
        for id in 1..=4 {
            media.write_file(&format!("catalog/product/{id}.jpg"), b"x")?;
            products.push(product(id, Some(&format!("{id}.jpg"))));
        }
        let resolver = ImageReferenceResolver::new(media);
        let sample = ProductSample::new(products);

        assert_eq!(resolver.resolve(&sample, 2).len(), 2);
        assert!(resolver.resolve(&sample, 0).is_empty());
        Ok(())
    }

    #[test]
    fn nothing_resolvable_yields_empty_list() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let resolver = ImageReferenceResolver::new(Arc::new(MediaDirectory::new(temp.path())));
        let sample = ProductSample::new(vec![product(1, Some("/gone.jpg")), product(2, None)]);
        assert!(resolver.resolve(&sample, 3).is_empty());
        Ok(())
    }
}
