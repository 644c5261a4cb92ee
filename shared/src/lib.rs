use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

pub mod error;
pub mod memory;
pub mod price;
pub mod reservation;
pub mod store;

pub use error::{ShopError, ShopResult};
pub use memory::MemoryShop;
pub use store::{Cart, Catalog, Shop};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    #[serde(with = "price")]
    pub price: BigDecimal,
    pub description: Option<String>,
    pub stock: i32,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    #[serde(with = "price")]
    pub price: BigDecimal,
    #[serde(default)]
    pub description: Option<String>,
    pub stock: i32,
}

/// Partial product edit. Absent fields are left untouched; for `description`
/// an explicit `null` clears the stored value while an absent key keeps it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(
        default,
        deserialize_with = "price::deserialize_option",
        serialize_with = "price::serialize_option"
    )]
    pub price: Option<BigDecimal>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub stock: Option<i32>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl ProductUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.price.is_none()
            && self.description.is_none()
            && self.stock.is_none()
    }

    /// Applies the present fields onto `product`.
    pub fn apply_to(&self, product: &mut Product) {
        if let Some(name) = &self.name {
            product.name = name.clone();
        }
        if let Some(price) = &self.price {
            product.price = price.clone();
        }
        if let Some(description) = &self.description {
            product.description = description.clone();
        }
        if let Some(stock) = self.stock {
            product.stock = stock;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub created_at: Option<DateTime<Utc>>,
}

/// A cart item joined with its product. `product` is `None` when the product
/// was deleted while the item was still in the cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub product: Option<Product>,
}

impl CartLine {
    pub fn new(item: CartItem, product: Option<Product>) -> Self {
        Self {
            id: item.id,
            product_id: item.product_id,
            quantity: item.quantity,
            product,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSummary {
    #[serde(with = "price")]
    pub total_amount: BigDecimal,
    pub items_purchased: usize,
}
