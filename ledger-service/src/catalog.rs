//! Read side of the item/warehouse catalog, which is owned by another service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{CatalogItem, Warehouse};

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn resolve_item_by_id(&self, id: Uuid) -> LedgerResult<CatalogItem>;

    async fn resolve_item_by_sku(&self, sku: &str) -> LedgerResult<CatalogItem>;

    async fn resolve_warehouse(&self, id: Uuid) -> LedgerResult<Warehouse>;
}

/// Contents of a catalog file, used to seed [`MemoryCatalog`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub items: Vec<CatalogItem>,
    #[serde(default)]
    pub warehouses: Vec<Warehouse>,
}

#[derive(Debug, Default)]
struct CatalogState {
    items: HashMap<Uuid, CatalogItem>,
    skus: HashMap<String, Uuid>,
    warehouses: HashMap<Uuid, Warehouse>,
}

#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: RwLock<CatalogState>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: CatalogSeed) -> LedgerResult<Self> {
        let catalog = Self::new();
        for item in seed.items {
            catalog.register_item(item)?;
        }
        for warehouse in seed.warehouses {
            catalog.register_warehouse(warehouse)?;
        }
        Ok(catalog)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let seed: CatalogSeed = serde_json::from_str(&raw)?;
        Ok(Self::from_seed(seed)?)
    }

    /// Adds an item. SKUs are unique across the catalog.
    pub fn register_item(&self, item: CatalogItem) -> LedgerResult<()> {
        let mut state = self.state.write().map_err(LedgerError::infrastructure_poison)?;
        if let Some(owner) = state.skus.get(&item.sku) {
            if *owner != item.id {
                return Err(LedgerError::invalid(format!("duplicate sku: {}", item.sku)));
            }
        }
        state.skus.insert(item.sku.clone(), item.id);
        state.items.insert(item.id, item);
        Ok(())
    }

    pub fn register_warehouse(&self, warehouse: Warehouse) -> LedgerResult<()> {
        let mut state = self.state.write().map_err(LedgerError::infrastructure_poison)?;
        state.warehouses.insert(warehouse.id, warehouse);
        Ok(())
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn resolve_item_by_id(&self, id: Uuid) -> LedgerResult<CatalogItem> {
        let state = self.state.read().map_err(LedgerError::infrastructure_poison)?;
        state.items.get(&id).cloned().ok_or_else(|| LedgerError::not_found("item", id))
    }

    async fn resolve_item_by_sku(&self, sku: &str) -> LedgerResult<CatalogItem> {
        let state = self.state.read().map_err(LedgerError::infrastructure_poison)?;
        state
            .skus
            .get(sku)
            .and_then(|id| state.items.get(id))
            .cloned()
            .ok_or_else(|| LedgerError::not_found("item", sku))
    }

    async fn resolve_warehouse(&self, id: Uuid) -> LedgerResult<Warehouse> {
        let state = self.state.read().map_err(LedgerError::infrastructure_poison)?;
        state.warehouses.get(&id).cloned().ok_or_else(|| LedgerError::not_found("warehouse", id))
    }
}
