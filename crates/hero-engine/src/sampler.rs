use std::sync::Arc;

use hero_contracts::catalog::{
    CatalogError, CatalogRepository, CategoryId, Product, ProductFilter, ProductId,
};
use rand::seq::SliceRandom;
use rand::Rng;

/// Products drawn for one invocation, in the order they were drawn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductSample {
    products: Vec<Product>,
}

impl ProductSample {
    pub fn new(products: Vec<Product>) -> Self {
        Self { products }
    }

    pub fn products(&self) -> &[Product] {
        &self.products
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn ids(&self) -> Vec<ProductId> {
        self.products.iter().map(|product| product.id).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.products
            .iter()
            .map(|product| product.name.as_str())
            .collect()
    }
}

pub struct ProductSampler {
    catalog: Arc<dyn CatalogRepository>,
}

impl ProductSampler {
    pub fn new(catalog: Arc<dyn CatalogRepository>) -> Self {
        Self { catalog }
    }

    pub fn sample(
        &self,
        category_id: CategoryId,
        desired_count: usize,
    ) -> Result<ProductSample, CatalogError> {
        self.sample_with_rng(category_id, desired_count, &mut rand::rng())
    }

    /// Draws a uniform random subset of at most `desired_count` products with an image.
    ///
    /// When the category holds no more eligible products than requested, they
    /// are returned as-is in catalog order. A zero count is an empty sample and
    /// does not touch the catalog.
    pub fn sample_with_rng<R: Rng + ?Sized>(
        &self,
        category_id: CategoryId,
        desired_count: usize,
        rng: &mut R,
    ) -> Result<ProductSample, CatalogError> {
        if desired_count == 0 {
            return Ok(ProductSample::default());
        }

        let mut candidates = self
            .catalog
            .query_products_in_category(category_id, ProductFilter::WithImage)?;
        if candidates.len() <= desired_count {
            log::debug!(
                "category {category_id}: {} eligible products, taking all",
                candidates.len()
            );
            return Ok(ProductSample::new(candidates));
        }

        log::debug!(
            "category {category_id}: drawing {desired_count} of {} eligible products",
            candidates.len()
        );
        candidates.shuffle(rng);
        candidates.truncate(desired_count);
        Ok(ProductSample::new(candidates))
    }
}
