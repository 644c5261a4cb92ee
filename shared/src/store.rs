use async_trait::async_trait;
use uuid::Uuid;

use crate::{CartLine, CheckoutSummary, NewProduct, Product, ProductUpdate, ShopResult};

/// Products and their live stock.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Fails with `Conflict` when the name is already registered.
    async fn create_product(&self, product: NewProduct) -> ShopResult<Product>;

    async fn get_product(&self, id: Uuid) -> ShopResult<Product>;

    async fn list_products(&self) -> ShopResult<Vec<Product>>;

    async fn update_product(&self, id: Uuid, update: ProductUpdate) -> ShopResult<Product>;

    /// Removes the product even if cart items still reference it.
    async fn delete_product(&self, id: Uuid) -> ShopResult<()>;
}

/// The shopping cart. Every operation that changes a cart line changes the
/// referenced product's stock in the same atomic step.
#[async_trait]
pub trait Cart: Send + Sync {
    async fn list_cart(&self) -> ShopResult<Vec<CartLine>>;

    async fn add_to_cart(&self, product_id: Uuid, quantity: i32) -> ShopResult<CartLine>;

    async fn update_cart_item(&self, item_id: Uuid, quantity: i32) -> ShopResult<CartLine>;

    async fn remove_cart_item(&self, item_id: Uuid) -> ShopResult<()>;

    async fn clear_cart(&self) -> ShopResult<()>;

    /// Totals and empties the cart. Stock was already taken at add time.
    async fn checkout(&self) -> ShopResult<CheckoutSummary>;
}

pub trait Shop: Catalog + Cart {}

impl<T: Catalog + Cart> Shop for T {}
