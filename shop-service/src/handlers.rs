use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::PoolError;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use tracing::{info, warn};
use uuid::Uuid;
use shared::*;
use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

/// Postgres-backed shop. Every write runs in a single transaction; product
/// rows are locked (`FOR UPDATE`) before cart rows so concurrent carts on the
/// same product serialize instead of losing stock updates.
#[derive(Clone)]
pub struct PgShop {
    pool: DbPool,
}

impl PgShop {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> ShopResult<PooledConnection<'_, AsyncPgConnection>> {
        self.pool.get().await.map_err(pool_error)
    }
}

fn pool_error(err: bb8::RunError<PoolError>) -> ShopError {
    ShopError::Storage(format!("Failed to acquire database connection: {}", err))
}

async fn find_product(conn: &mut AsyncPgConnection, id: Uuid) -> ShopResult<Option<DbProduct>> {
    let product = products::table
        .find(id)
        .get_result::<DbProduct>(conn)
        .await
        .optional()?;
    Ok(product)
}

async fn lock_product(conn: &mut AsyncPgConnection, id: Uuid) -> ShopResult<Option<DbProduct>> {
    let product = products::table
        .find(id)
        .for_update()
        .get_result::<DbProduct>(conn)
        .await
        .optional()?;
    Ok(product)
}

async fn name_taken(conn: &mut AsyncPgConnection, name: &str, except: Option<Uuid>) -> ShopResult<bool> {
    let owner = products::table
        .filter(products::name.eq(name))
        .select(products::id)
        .get_result::<Uuid>(conn)
        .await
        .optional()?;
    Ok(matches!(owner, Some(id) if Some(id) != except))
}

async fn set_stock(conn: &mut AsyncPgConnection, id: Uuid, stock: i32) -> ShopResult<DbProduct> {
    let product = diesel::update(products::table.find(id))
        .set((products::stock.eq(stock), products::updated_at.eq(Utc::now())))
        .get_result::<DbProduct>(conn)
        .await?;
    Ok(product)
}

/// Gives `item.quantity` back to its locked product. A product that no longer
/// exists is skipped.
async fn release(
    conn: &mut AsyncPgConnection,
    item: &DbCartItem,
    product: Option<&DbProduct>,
) -> ShopResult<()> {
    let Some(product) = product else {
        warn!(
            "Product {} no longer exists, skipping stock restore for cart item {}",
            item.product_id, item.id
        );
        return Ok(());
    };

    let stock = reservation::restore(product.stock, item.quantity)?;
    set_stock(conn, product.id, stock).await?;
    info!("Restored {} units of product {}", item.quantity, item.product_id);
    Ok(())
}

/// Locks a cart item together with its product, product first.
async fn lock_line(
    conn: &mut AsyncPgConnection,
    item_id: Uuid,
) -> ShopResult<(DbCartItem, Option<DbProduct>)> {
    let product_id = cart_items::table
        .find(item_id)
        .select(cart_items::product_id)
        .get_result::<Uuid>(conn)
        .await
        .optional()?
        .ok_or_else(|| ShopError::cart_item_not_found(item_id))?;

    let product = lock_product(conn, product_id).await?;

    let item = cart_items::table
        .find(item_id)
        .for_update()
        .get_result::<DbCartItem>(conn)
        .await
        .optional()?
        .ok_or_else(|| ShopError::cart_item_not_found(item_id))?;

    Ok((item, product))
}

async fn create_product(conn: &mut AsyncPgConnection, new: NewProduct) -> ShopResult<DbProduct> {
    if name_taken(conn, &new.name, None).await? {
        return Err(ShopError::duplicate_product());
    }

    let product = diesel::insert_into(products::table)
        .values(&NewDbProduct::from(new))
        .get_result::<DbProduct>(conn)
        .await?;

    info!("Created product {} ({})", product.id, product.name);
    Ok(product)
}

async fn update_product(
    conn: &mut AsyncPgConnection,
    id: Uuid,
    update: ProductUpdate,
) -> ShopResult<DbProduct> {
    let product = lock_product(conn, id)
        .await?
        .ok_or_else(|| ShopError::product_not_found(id))?;

    if update.is_empty() {
        return Ok(product);
    }
    if let Some(name) = &update.name {
        if name_taken(conn, name, Some(id)).await? {
            return Err(ShopError::duplicate_product());
        }
    }

    let product = diesel::update(products::table.find(id))
        .set(&ProductChangeset::from(update))
        .get_result::<DbProduct>(conn)
        .await?;
    Ok(product)
}

async fn delete_product(conn: &mut AsyncPgConnection, id: Uuid) -> ShopResult<()> {
    let deleted = diesel::delete(products::table.find(id))
        .execute(conn)
        .await?;
    if deleted == 0 {
        return Err(ShopError::product_not_found(id));
    }

    let orphaned = cart_items::table
        .filter(cart_items::product_id.eq(id))
        .count()
        .get_result::<i64>(conn)
        .await?;
    if orphaned > 0 {
        warn!("Deleted product {} is still referenced by {} cart item(s)", id, orphaned);
    }
    info!("Deleted product {}", id);
    Ok(())
}

async fn add_to_cart(
    conn: &mut AsyncPgConnection,
    product_id: Uuid,
    quantity: i32,
) -> ShopResult<CartLine> {
    let product = lock_product(conn, product_id)
        .await?
        .ok_or_else(|| ShopError::product_not_found(product_id))?;

    let existing = cart_items::table
        .filter(cart_items::product_id.eq(product_id))
        .for_update()
        .get_result::<DbCartItem>(conn)
        .await
        .optional()?;

    let plan = reservation::plan_add(
        product.id,
        product.stock,
        existing.as_ref().map(|item| item.quantity),
        quantity,
    )?;

    let product = set_stock(conn, product_id, plan.stock).await?;
    let item = match existing {
        Some(item) => {
            diesel::update(cart_items::table.find(item.id))
                .set(cart_items::quantity.eq(plan.quantity))
                .get_result::<DbCartItem>(conn)
                .await?
        }
        None => {
            let new_item = NewDbCartItem {
                id: Uuid::new_v4(),
                product_id,
                quantity: plan.quantity,
            };
            diesel::insert_into(cart_items::table)
                .values(&new_item)
                .get_result::<DbCartItem>(conn)
                .await?
        }
    };

    info!(
        "Reserved {} units of product {}, {} left in stock",
        quantity, product_id, plan.stock
    );
    Ok(item.into_line(Some(product)))
}

async fn update_cart_item(
    conn: &mut AsyncPgConnection,
    item_id: Uuid,
    quantity: i32,
) -> ShopResult<CartLine> {
    let (item, product) = lock_line(conn, item_id).await?;
    let product = product.ok_or_else(|| ShopError::product_not_found(item.product_id))?;

    let plan = reservation::plan_quantity_change(product.id, product.stock, item.quantity, quantity)?;

    let product = set_stock(conn, product.id, plan.stock).await?;
    let item = diesel::update(cart_items::table.find(item.id))
        .set(cart_items::quantity.eq(plan.quantity))
        .get_result::<DbCartItem>(conn)
        .await?;

    info!(
        "Cart item {} now holds {} units of product {}",
        item.id, item.quantity, item.product_id
    );
    Ok(item.into_line(Some(product)))
}

async fn remove_cart_item(conn: &mut AsyncPgConnection, item_id: Uuid) -> ShopResult<()> {
    let (item, product) = lock_line(conn, item_id).await?;

    release(conn, &item, product.as_ref()).await?;
    diesel::delete(cart_items::table.find(item.id))
        .execute(conn)
        .await?;
    Ok(())
}

async fn clear_cart(conn: &mut AsyncPgConnection) -> ShopResult<()> {
    // Same lock order as the single-item operations: products, then items.
    let locked: HashMap<Uuid, DbProduct> = products::table
        .filter(products::id.eq_any(cart_items::table.select(cart_items::product_id)))
        .order(products::id)
        .for_update()
        .load::<DbProduct>(conn)
        .await?
        .into_iter()
        .map(|product| (product.id, product))
        .collect();

    let items = cart_items::table
        .order(cart_items::created_at.asc())
        .for_update()
        .load::<DbCartItem>(conn)
        .await?;

    // Lines for products we did not lock were added after the lock was taken
    // and belong to a concurrent add; only dangling lines join the clear.
    let unlocked: Vec<Uuid> = items
        .iter()
        .map(|item| item.product_id)
        .filter(|id| !locked.contains_key(id))
        .collect();
    let live: HashSet<Uuid> = if unlocked.is_empty() {
        HashSet::new()
    } else {
        products::table
            .filter(products::id.eq_any(unlocked))
            .select(products::id)
            .load::<Uuid>(conn)
            .await?
            .into_iter()
            .collect()
    };
    let items: Vec<DbCartItem> = items
        .into_iter()
        .filter(|item| !live.contains(&item.product_id))
        .collect();

    for item in &items {
        release(conn, item, locked.get(&item.product_id)).await?;
    }

    let item_ids: Vec<Uuid> = items.iter().map(|item| item.id).collect();
    diesel::delete(cart_items::table.filter(cart_items::id.eq_any(item_ids)))
        .execute(conn)
        .await?;

    info!("Cleared {} cart item(s)", items.len());
    Ok(())
}

async fn checkout(conn: &mut AsyncPgConnection) -> ShopResult<CheckoutSummary> {
    let items = cart_items::table
        .order(cart_items::created_at.asc())
        .for_update()
        .load::<DbCartItem>(conn)
        .await?;
    if items.is_empty() {
        return Err(ShopError::empty_cart());
    }

    let product_ids: Vec<Uuid> = items.iter().map(|item| item.product_id).collect();
    let prices: HashMap<Uuid, BigDecimal> = products::table
        .filter(products::id.eq_any(product_ids))
        .select((products::id, products::price))
        .load::<(Uuid, BigDecimal)>(conn)
        .await?
        .into_iter()
        .collect();

    let mut lines = Vec::with_capacity(items.len());
    for item in &items {
        let price = prices
            .get(&item.product_id)
            .ok_or_else(|| ShopError::product_not_found(item.product_id))?;
        lines.push((price, item.quantity));
    }
    let total_amount = reservation::checkout_total(lines);

    let item_ids: Vec<Uuid> = items.iter().map(|item| item.id).collect();
    diesel::delete(cart_items::table.filter(cart_items::id.eq_any(item_ids)))
        .execute(conn)
        .await?;

    info!("Checked out {} cart item(s), total {}", items.len(), total_amount);
    Ok(CheckoutSummary {
        total_amount,
        items_purchased: items.len(),
    })
}

#[async_trait]
impl Catalog for PgShop {
    async fn create_product(&self, product: NewProduct) -> ShopResult<Product> {
        reservation::validate_new_product(&product)?;
        let mut conn = self.conn().await?;

        let product = conn
            .transaction::<_, ShopError, _>(|conn| {
                Box::pin(async move { create_product(conn, product).await })
            })
            .await?;
        Ok(product.into())
    }

    async fn get_product(&self, id: Uuid) -> ShopResult<Product> {
        let mut conn = self.conn().await?;
        find_product(&mut conn, id)
            .await?
            .map(Product::from)
            .ok_or_else(|| ShopError::product_not_found(id))
    }

    async fn list_products(&self) -> ShopResult<Vec<Product>> {
        let mut conn = self.conn().await?;
        let rows = products::table
            .order((products::created_at.asc(), products::id.asc()))
            .load::<DbProduct>(&mut conn)
            .await?;
        Ok(rows.into_iter().map(Product::from).collect())
    }

    async fn update_product(&self, id: Uuid, update: ProductUpdate) -> ShopResult<Product> {
        reservation::validate_update(&update)?;
        let mut conn = self.conn().await?;

        let product = conn
            .transaction::<_, ShopError, _>(|conn| {
                Box::pin(async move { update_product(conn, id, update).await })
            })
            .await?;
        Ok(product.into())
    }

    async fn delete_product(&self, id: Uuid) -> ShopResult<()> {
        let mut conn = self.conn().await?;
        conn.transaction::<_, ShopError, _>(|conn| {
            Box::pin(async move { delete_product(conn, id).await })
        })
        .await
    }
}

#[async_trait]
impl Cart for PgShop {
    async fn list_cart(&self) -> ShopResult<Vec<CartLine>> {
        let mut conn = self.conn().await?;
        let rows = cart_items::table
            .left_join(products::table)
            .select((cart_items::all_columns, products::all_columns.nullable()))
            .order((cart_items::created_at.asc(), cart_items::id.asc()))
            .load::<(DbCartItem, Option<DbProduct>)>(&mut conn)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(item, product)| item.into_line(product))
            .collect())
    }

    async fn add_to_cart(&self, product_id: Uuid, quantity: i32) -> ShopResult<CartLine> {
        let mut conn = self.conn().await?;
        conn.transaction::<_, ShopError, _>(|conn| {
            Box::pin(async move { add_to_cart(conn, product_id, quantity).await })
        })
        .await
    }

    async fn update_cart_item(&self, item_id: Uuid, quantity: i32) -> ShopResult<CartLine> {
        let mut conn = self.conn().await?;
        conn.transaction::<_, ShopError, _>(|conn| {
            Box::pin(async move { update_cart_item(conn, item_id, quantity).await })
        })
        .await
    }

    async fn remove_cart_item(&self, item_id: Uuid) -> ShopResult<()> {
        let mut conn = self.conn().await?;
        conn.transaction::<_, ShopError, _>(|conn| {
            Box::pin(async move { remove_cart_item(conn, item_id).await })
        })
        .await
    }

    async fn clear_cart(&self) -> ShopResult<()> {
        let mut conn = self.conn().await?;
        conn.transaction::<_, ShopError, _>(|conn| Box::pin(async move { clear_cart(conn).await }))
            .await
    }

    async fn checkout(&self) -> ShopResult<CheckoutSummary> {
        let mut conn = self.conn().await?;
        conn.transaction::<_, ShopError, _>(|conn| Box::pin(async move { checkout(conn).await }))
            .await
    }
}
