mod common;

use chrono::{Duration, Utc};
use common::{fixture, fixture_with};
use ledger_service::models::{LevelKey, Page, ReservationStatus, TransactionFilter, TransactionType};
use ledger_service::store::LedgerStore;
use ledger_service::{LedgerError, ServiceConfig};
use shared::{AllocateInventoryRequest, CheckAndReserveRequest, ItemFailure, ProductItem};

fn line_by_id(id: uuid::Uuid, quantity: i64) -> ProductItem {
    ProductItem { product_id: Some(id.to_string()), sku: None, quantity }
}

fn line_by_sku(sku: &str, quantity: i64) -> ProductItem {
    ProductItem { product_id: None, sku: Some(sku.to_string()), quantity }
}

#[tokio::test]
async fn allocate_then_commit_consumes_on_hand_stock() {
    let f = fixture();
    f.stock(&f.item_a, 100).await;

    let level = f
        .service
        .allocate_inventory(AllocateInventoryRequest {
            item_id: f.item_a.id,
            warehouse_id: f.warehouse.id,
            quantity: 10,
            order_id: "order-1".to_string(),
            user_id: None,
        })
        .await
        .unwrap();
    assert_eq!((level.quantity, level.reserved, level.available), (100, 10, 90));

    let result = f.service.commit_reservation("order-1").await.unwrap();
    assert!(result.success, "{}", result.message);

    let level = f.service.get_inventory_level_for_item(f.item_a.id, f.warehouse.id).await.unwrap();
    assert_eq!((level.quantity, level.reserved, level.available), (90, 0, 90));

    let holds = f.service.get_reservation("order-1").await.unwrap();
    assert_eq!(holds.len(), 1);
    assert_eq!(holds[0].status, ReservationStatus::Committed);
    assert!(holds[0].completed_at.is_some());

    // add + allocate, and nothing for the commit
    let page = f
        .service
        .get_inventory_transactions(&TransactionFilter::default(), Page::new(None, None))
        .await
        .unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.transactions[0].kind, TransactionType::Allocate);
    assert_eq!(page.transactions[1].kind, TransactionType::Add);
}

#[tokio::test]
async fn partial_reservation_keeps_lines_that_fit() {
    let f = fixture();
    f.stock(&f.item_a, 5).await;
    f.stock(&f.item_b, 1).await;

    let result = f
        .service
        .check_and_reserve(CheckAndReserveRequest {
            order_id: "order-2".to_string(),
            warehouse_id: f.warehouse.id,
            items: vec![line_by_id(f.item_a.id, 3), line_by_sku("SKU-B", 2)],
        })
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.reservation_id, "order-2");
    assert_eq!(result.message, "Some items could not be reserved");
    assert!(result.items[0].in_stock);
    assert_eq!(result.items[0].available_quantity, 2);
    assert_eq!(result.items[1].error, Some(ItemFailure::InsufficientStock { available: 1 }));

    let a = f.service.get_inventory_level_for_item(f.item_a.id, f.warehouse.id).await.unwrap();
    assert_eq!(a.reserved, 3);
    let b = f.service.get_inventory_level_for_item(f.item_b.id, f.warehouse.id).await.unwrap();
    assert_eq!(b.reserved, 0);

    let holds = f.service.get_reservation("order-2").await.unwrap();
    assert_eq!(holds.len(), 1);
    assert_eq!(holds[0].product_id, f.item_a.id);
}

#[tokio::test]
async fn unknown_products_fail_only_their_line() {
    let f = fixture();
    f.stock(&f.item_a, 5).await;

    let result = f
        .service
        .check_and_reserve(CheckAndReserveRequest {
            order_id: "order-3".to_string(),
            warehouse_id: f.warehouse.id,
            items: vec![
                line_by_sku("SKU-A", 1),
                line_by_sku("NOPE", 1),
                ProductItem { product_id: None, sku: None, quantity: 1 },
                line_by_sku("SKU-A", 0),
            ],
        })
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.items[0].in_stock);
    assert_eq!(result.items[1].error, Some(ItemFailure::ItemNotFound));
    assert!(matches!(result.items[2].error, Some(ItemFailure::InvalidArgument { .. })));
    assert!(matches!(result.items[3].error, Some(ItemFailure::InvalidArgument { .. })));
}

#[tokio::test]
async fn product_id_falls_back_to_sku() {
    let f = fixture();
    f.stock(&f.item_a, 5).await;

    let result = f
        .service
        .check_and_reserve(CheckAndReserveRequest {
            order_id: "order-4".to_string(),
            warehouse_id: f.warehouse.id,
            items: vec![ProductItem {
                product_id: Some(uuid::Uuid::new_v4().to_string()),
                sku: Some("SKU-A".to_string()),
                quantity: 2,
            }],
        })
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.items[0].product_id, Some(f.item_a.id));
}

#[tokio::test]
async fn malformed_reservation_requests_are_rejected_whole() {
    let f = fixture();

    let empty = f
        .service
        .check_and_reserve(CheckAndReserveRequest {
            order_id: "order-5".to_string(),
            warehouse_id: f.warehouse.id,
            items: vec![],
        })
        .await;
    assert!(matches!(empty, Err(LedgerError::InvalidArgument(_))));

    let unknown_warehouse = f
        .service
        .check_and_reserve(CheckAndReserveRequest {
            order_id: "order-5".to_string(),
            warehouse_id: uuid::Uuid::new_v4(),
            items: vec![line_by_sku("SKU-A", 1)],
        })
        .await;
    assert!(matches!(unknown_warehouse, Err(LedgerError::NotFound { .. })));
}

#[tokio::test]
async fn releasing_twice_only_returns_stock_once() {
    let f = fixture();
    f.stock(&f.item_a, 10).await;
    f.service
        .check_and_reserve(CheckAndReserveRequest {
            order_id: "order-6".to_string(),
            warehouse_id: f.warehouse.id,
            items: vec![line_by_sku("SKU-A", 4)],
        })
        .await
        .unwrap();

    let first = f.service.release_reserved_stock("order-6", "payment failed").await.unwrap();
    assert!(first.success);
    let second = f.service.release_reserved_stock("order-6", "payment failed").await.unwrap();
    assert!(!second.success);
    assert!(second.message.contains("order-6"));

    let level = f.service.get_inventory_level_for_item(f.item_a.id, f.warehouse.id).await.unwrap();
    assert_eq!((level.quantity, level.reserved, level.available), (10, 0, 10));
    let holds = f.service.get_reservation("order-6").await.unwrap();
    assert_eq!(holds[0].status, ReservationStatus::Released);

    let released = f
        .service
        .get_inventory_transactions(
            &TransactionFilter { kind: Some(TransactionType::Release), ..Default::default() },
            Page::new(None, None),
        )
        .await
        .unwrap();
    assert_eq!(released.total, 1);
}

#[tokio::test]
async fn release_continues_past_a_row_that_cannot_settle() {
    let f = fixture();
    f.stock(&f.item_a, 4).await;
    f.stock(&f.item_b, 3).await;
    let result = f
        .service
        .check_and_reserve(CheckAndReserveRequest {
            order_id: "order-mixed".to_string(),
            warehouse_id: f.warehouse.id,
            items: vec![line_by_sku("SKU-A", 4), line_by_sku("SKU-B", 3)],
        })
        .await
        .unwrap();
    assert!(result.success);

    // Drain A's reserved counter behind the order's back so its row cannot settle.
    let key_a = LevelKey::new(f.item_a.id, f.warehouse.id);
    f.store.release(key_a, 4).await.unwrap();

    let released = f.service.release_reserved_stock("order-mixed", "payment failed").await.unwrap();
    assert!(released.success, "{}", released.message);
    assert!(released.message.starts_with("Released 1 of 2 reservation(s) for order order-mixed"));
    assert!(released.message.contains("last error: insufficient reserved stock"));

    let holds = f.service.get_reservation("order-mixed").await.unwrap();
    let status_of = |id| holds.iter().find(|h| h.product_id == id).map(|h| h.status);
    assert_eq!(status_of(f.item_a.id), Some(ReservationStatus::Pending));
    assert_eq!(status_of(f.item_b.id), Some(ReservationStatus::Released));

    let b = f.service.get_inventory_level_for_item(f.item_b.id, f.warehouse.id).await.unwrap();
    assert_eq!((b.quantity, b.reserved, b.available), (3, 0, 3));
    let a = f.service.get_inventory_level_for_item(f.item_a.id, f.warehouse.id).await.unwrap();
    assert_eq!((a.quantity, a.reserved, a.available), (4, 0, 4));
}

#[tokio::test]
async fn release_inventory_without_holds_is_an_error() {
    let f = fixture();
    let err = f.service.release_inventory("ghost", "cleanup").await.unwrap_err();
    assert_eq!(err, LedgerError::NoPendingReservations("ghost".to_string()));
}

#[tokio::test]
async fn cancel_marks_holds_cancelled() {
    let f = fixture();
    f.stock(&f.item_a, 3).await;
    f.stock(&f.item_b, 3).await;
    f.service
        .check_and_reserve(CheckAndReserveRequest {
            order_id: "order-7".to_string(),
            warehouse_id: f.warehouse.id,
            items: vec![line_by_sku("SKU-A", 1), line_by_sku("SKU-B", 2)],
        })
        .await
        .unwrap();

    let result = f.service.cancel_reservation("order-7").await.unwrap();
    assert!(result.success);
    for hold in f.service.get_reservation("order-7").await.unwrap() {
        assert_eq!(hold.status, ReservationStatus::Cancelled);
    }
    let b = f.service.get_inventory_level_for_item(f.item_b.id, f.warehouse.id).await.unwrap();
    assert_eq!(b.available, 3);

    // nothing left to commit
    let commit = f.service.commit_reservation("order-7").await.unwrap();
    assert!(!commit.success);
}

#[tokio::test]
async fn removing_more_than_on_hand_is_rejected() {
    let f = fixture();
    f.stock(&f.item_a, 5).await;

    let err = f
        .service
        .adjust_inventory(shared::AdjustInventoryRequest {
            item_id: f.item_a.id,
            warehouse_id: f.warehouse.id,
            quantity: -6,
            reason: "shrinkage".to_string(),
            reference: "CNT-1".to_string(),
            user_id: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NegativeStock { .. }));

    let level = f.service.get_inventory_level_for_item(f.item_a.id, f.warehouse.id).await.unwrap();
    assert_eq!(level.quantity, 5);
}

#[tokio::test]
async fn concurrent_reservations_never_oversell() {
    let f = fixture();
    f.stock(&f.item_a, 10).await;

    let mut tasks = Vec::new();
    for n in 0..25 {
        let service = f.service.clone();
        let warehouse_id = f.warehouse.id;
        tasks.push(tokio::spawn(async move {
            service
                .check_and_reserve(CheckAndReserveRequest {
                    order_id: format!("race-{}", n),
                    warehouse_id,
                    items: vec![line_by_sku("SKU-A", 1)],
                })
                .await
                .unwrap()
                .success
        }));
    }
    let mut won = 0;
    for task in tasks {
        if task.await.unwrap() {
            won += 1;
        }
    }

    assert_eq!(won, 10);
    let level = f.service.get_inventory_level_for_item(f.item_a.id, f.warehouse.id).await.unwrap();
    assert_eq!((level.quantity, level.reserved, level.available), (10, 10, 0));
}

#[tokio::test]
async fn overdue_holds_are_expired() {
    let f = fixture_with(ServiceConfig { reservation_ttl: Duration::seconds(60), ..ServiceConfig::default() });
    f.stock(&f.item_a, 4).await;
    f.service
        .check_and_reserve(CheckAndReserveRequest {
            order_id: "order-8".to_string(),
            warehouse_id: f.warehouse.id,
            items: vec![line_by_sku("SKU-A", 4)],
        })
        .await
        .unwrap();

    assert_eq!(f.service.expire_reservations(Utc::now()).await.unwrap(), 0);
    let later = Utc::now() + Duration::seconds(120);
    assert_eq!(f.service.expire_reservations(later).await.unwrap(), 1);
    assert_eq!(f.service.expire_reservations(later).await.unwrap(), 0);

    let holds = f.service.get_reservation("order-8").await.unwrap();
    assert_eq!(holds[0].status, ReservationStatus::Expired);
    let level = f.service.get_inventory_level_for_item(f.item_a.id, f.warehouse.id).await.unwrap();
    assert_eq!(level.available, 4);
}
