use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::*;
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::products)]
pub struct DbProduct {
    pub id: Uuid,
    pub name: String,
    pub price: BigDecimal,
    pub description: Option<String>,
    pub stock: i32,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::products)]
pub struct NewDbProduct {
    pub id: Uuid,
    pub name: String,
    pub price: BigDecimal,
    pub description: Option<String>,
    pub stock: i32,
}

/// Only the `Some` fields are written; `description: Some(None)` sets NULL.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = crate::schema::products)]
pub struct ProductChangeset {
    pub name: Option<String>,
    pub price: Option<BigDecimal>,
    pub description: Option<Option<String>>,
    pub stock: Option<i32>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::cart_items)]
pub struct DbCartItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::cart_items)]
pub struct NewDbCartItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
}

impl From<DbProduct> for Product {
    fn from(row: DbProduct) -> Self {
        Self {
            id: row.id,
            name: row.name,
            price: row.price,
            description: row.description,
            stock: row.stock,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<DbCartItem> for CartItem {
    fn from(row: DbCartItem) -> Self {
        Self {
            id: row.id,
            product_id: row.product_id,
            quantity: row.quantity,
            created_at: row.created_at,
        }
    }
}

impl From<NewProduct> for NewDbProduct {
    fn from(product: NewProduct) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: product.name,
            price: product.price,
            description: product.description,
            stock: product.stock,
        }
    }
}

impl From<ProductUpdate> for ProductChangeset {
    fn from(update: ProductUpdate) -> Self {
        Self {
            name: update.name,
            price: update.price,
            description: update.description,
            stock: update.stock,
            updated_at: Some(Utc::now()),
        }
    }
}

impl DbCartItem {
    pub fn into_line(self, product: Option<DbProduct>) -> CartLine {
        CartLine::new(self.into(), product.map(Product::from))
    }
}
