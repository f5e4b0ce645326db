mod json;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use json::JsonCatalog;

pub type CategoryId = u64;
pub type ProductId = u64;

/// Reserved image value meaning "no image assigned". Distinct from an absent image.
pub const NO_SELECTION: &str = "no_selection";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub category_ids: Vec<CategoryId>,
}

impl Product {
    /// The image reference when one is assigned, ignoring blanks and the sentinel.
    pub fn image_ref(&self) -> Option<&str> {
        self.image
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty() && *value != NO_SELECTION)
    }

    pub fn has_image(&self) -> bool {
        self.image_ref().is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductFilter {
    Any,
    /// Image attribute is non-null and not [`NO_SELECTION`].
    WithImage,
}

impl ProductFilter {
    pub fn matches(&self, product: &Product) -> bool {
        match self {
            ProductFilter::Any => true,
            ProductFilter::WithImage => product.has_image(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog I/O error ({path}): {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("catalog document is invalid: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("category with ID {0} not found")]
    CategoryNotFound(CategoryId),
}

/// Persistent catalog store consumed by the generation pipeline.
///
/// The pipeline only reads category identity and products, and writes the
/// category image field back through [`CatalogRepository::save_category`].
pub trait CatalogRepository: Send + Sync {
    fn get_category(&self, id: CategoryId) -> Result<Option<Category>, CatalogError>;

    fn save_category(&self, category: &Category) -> Result<(), CatalogError>;

    /// Sets only the image field of the stored category, leaving every other
    /// field as currently persisted.
    ///
    /// The default re-reads the category and saves it back; repositories that
    /// can be written concurrently should override it with an atomic update.
    fn set_category_image(&self, id: CategoryId, image: Option<&str>) -> Result<(), CatalogError> {
        let mut category = self
            .get_category(id)?
            .ok_or(CatalogError::CategoryNotFound(id))?;
        category.image = image.map(str::to_string);
        self.save_category(&category)
    }

    /// Products assigned to `id` that satisfy `filter`, in catalog order.
    /// An unknown category yields an empty list.
    fn query_products_in_category(
        &self,
        id: CategoryId,
        filter: ProductFilter,
    ) -> Result<Vec<Product>, CatalogError>;
}
