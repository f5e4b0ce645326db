use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::{Category, CatalogError, CatalogRepository, CategoryId, Product, ProductFilter};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    categories: Vec<Category>,
    #[serde(default)]
    products: Vec<Product>,
}

// Serialises read-modify-write cycles of every JsonCatalog in the process,
// including separate handles on the same document.
static WRITE_LOCK: Mutex<()> = Mutex::new(());

/// Catalog backed by a single JSON document.
///
/// The document is re-read on every call so writes from other processes are
/// observed. Updates hold a process-wide lock across read, modify and write,
/// and replace the document through a uniquely named temp file.
#[derive(Debug, Clone)]
pub struct JsonCatalog {
    path: PathBuf,
}

impl JsonCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes a fresh document containing `categories` and `products`.
    pub fn create(
        path: impl Into<PathBuf>,
        categories: Vec<Category>,
        products: Vec<Product>,
    ) -> Result<Self, CatalogError> {
        let catalog = Self::new(path);
        let _guard = write_lock();
        catalog.write(&CatalogDocument {
            categories,
            products,
        })?;
        Ok(catalog)
    }

    fn read(&self) -> Result<CatalogDocument, CatalogError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CatalogDocument::default())
            }
            Err(source) => return Err(self.io_error(source)),
        };
        Ok(serde_json::from_str(&raw)?)
    }

    fn write(&self, document: &CatalogDocument) -> Result<(), CatalogError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut staged = NamedTempFile::new_in(dir).map_err(|source| self.io_error(source))?;
        staged
            .write_all(serde_json::to_string_pretty(document)?.as_bytes())
            .map_err(|source| self.io_error(source))?;
        staged
            .persist(&self.path)
            .map_err(|err| self.io_error(err.error))?;
        Ok(())
    }

    fn update_category<F>(&self, id: CategoryId, apply: F) -> Result<(), CatalogError>
    where
        F: FnOnce(&mut Category),
    {
        let _guard = write_lock();
        let mut document = self.read()?;
        let Some(existing) = document.categories.iter_mut().find(|row| row.id == id) else {
            return Err(CatalogError::CategoryNotFound(id));
        };
        apply(existing);
        self.write(&document)
    }

    fn io_error(&self, source: std::io::Error) -> CatalogError {
        CatalogError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl CatalogRepository for JsonCatalog {
    fn get_category(&self, id: CategoryId) -> Result<Option<Category>, CatalogError> {
        Ok(self
            .read()?
            .categories
            .into_iter()
            .find(|category| category.id == id))
    }

    fn save_category(&self, category: &Category) -> Result<(), CatalogError> {
        self.update_category(category.id, |existing| *existing = category.clone())
    }

    fn set_category_image(&self, id: CategoryId, image: Option<&str>) -> Result<(), CatalogError> {
        self.update_category(id, |existing| existing.image = image.map(str::to_string))
    }

    fn query_products_in_category(
        &self,
        id: CategoryId,
        filter: ProductFilter,
    ) -> Result<Vec<Product>, CatalogError> {
        Ok(self
            .read()?
            .products
            .into_iter()
            .filter(|product| product.category_ids.contains(&id))
            .filter(|product| filter.matches(product))
            .collect())
    }
}

fn write_lock() -> MutexGuard<'static, ()> {
    WRITE_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}
