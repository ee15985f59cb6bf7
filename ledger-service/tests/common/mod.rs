#![allow(dead_code)]

use std::sync::Arc;

use ledger_service::catalog::{CatalogSeed, MemoryCatalog};
use ledger_service::models::{CatalogItem, Warehouse};
use ledger_service::store::MemoryStore;
use ledger_service::{InventoryService, ServiceConfig};
use shared::AdjustInventoryRequest;
use uuid::Uuid;

pub struct Fixture {
    pub service: InventoryService,
    pub store: Arc<MemoryStore>,
    pub item_a: CatalogItem,
    pub item_b: CatalogItem,
    pub warehouse: Warehouse,
}

pub fn item(sku: &str) -> CatalogItem {
    CatalogItem {
        id: Uuid::new_v4(),
        sku: sku.to_string(),
        name: format!("Item {}", sku),
        attributes: Default::default(),
    }
}

pub fn fixture_with(config: ServiceConfig) -> Fixture {
    let item_a = item("SKU-A");
    let item_b = item("SKU-B");
    let warehouse = Warehouse { id: Uuid::new_v4(), name: "Main".to_string() };
    let catalog = MemoryCatalog::from_seed(CatalogSeed {
        items: vec![item_a.clone(), item_b.clone()],
        warehouses: vec![warehouse.clone()],
    })
    .unwrap();
    let store = Arc::new(MemoryStore::new());
    let service = InventoryService::in_memory(store.clone(), Arc::new(catalog), config);
    Fixture { service, store, item_a, item_b, warehouse }
}

pub fn fixture() -> Fixture {
    fixture_with(ServiceConfig::default())
}

impl Fixture {
    pub async fn stock(&self, item: &CatalogItem, quantity: i64) {
        self.service
            .adjust_inventory(AdjustInventoryRequest {
                item_id: item.id,
                warehouse_id: self.warehouse.id,
                quantity,
                reason: "initial stock".to_string(),
                reference: "PO-1".to_string(),
                user_id: Some("tester".to_string()),
            })
            .await
            .unwrap();
    }
}
