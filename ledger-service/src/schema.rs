diesel::table! {
    warehouses (id) {
        id -> Uuid,
        name -> Varchar,
    }
}

diesel::table! {
    inventory_items (id) {
        id -> Uuid,
        sku -> Varchar,
        name -> Varchar,
        attributes -> Jsonb,
    }
}

diesel::table! {
    inventory_levels (item_id, warehouse_id) {
        item_id -> Uuid,
        warehouse_id -> Uuid,
        quantity -> Int8,
        reserved -> Int8,
        available -> Int8,
        last_updated -> Timestamptz,
    }
}

diesel::table! {
    inventory_transactions (id) {
        id -> Uuid,
        item_id -> Uuid,
        warehouse_id -> Uuid,
        quantity -> Int8,
        #[sql_name = "type"]
        kind -> Varchar,
        reference -> Varchar,
        user_id -> Varchar,
        #[sql_name = "timestamp"]
        recorded_at -> Timestamptz,
    }
}

diesel::table! {
    inventory_reservations (id) {
        id -> Uuid,
        order_id -> Varchar,
        product_id -> Uuid,
        warehouse_id -> Uuid,
        sku -> Varchar,
        quantity -> Int8,
        status -> Varchar,
        created_at -> Timestamptz,
        completed_at -> Nullable<Timestamptz>,
        expires_at -> Timestamptz,
    }
}

diesel::table! {
    processed_commands (idempotency_key) {
        idempotency_key -> Varchar,
        command_id -> Uuid,
        reply -> Jsonb,
        processed_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    warehouses,
    inventory_items,
    inventory_levels,
    inventory_transactions,
    inventory_reservations,
    processed_commands,
);
