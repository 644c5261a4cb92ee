diesel::table! {
    cart_items (id) {
        id -> Uuid,
        product_id -> Uuid,
        quantity -> Int4,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    products (id) {
        id -> Uuid,
        name -> Varchar,
        price -> Numeric,
        description -> Nullable<Text>,
        stock -> Int4,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(cart_items -> products (product_id));

diesel::allow_tables_to_appear_in_same_query!(
    cart_items,
    products,
);
