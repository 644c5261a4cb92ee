//! In-memory shop, for tests and for running the service without a database.
//!
//! All operations are serialized behind one async mutex. Each operation
//! validates and plans before it mutates anything, so a failed call leaves
//! products and cart exactly as they were.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::reservation;
use crate::{
    Cart, CartItem, CartLine, Catalog, CheckoutSummary, NewProduct, Product, ProductUpdate,
    ShopError, ShopResult,
};

#[derive(Debug, Default)]
struct State {
    products: Vec<Product>,
    items: Vec<CartItem>,
}

impl State {
    fn product(&self, id: Uuid) -> Option<&Product> {
        self.products.iter().find(|p| p.id == id)
    }

    fn product_mut(&mut self, id: Uuid) -> Option<&mut Product> {
        self.products.iter_mut().find(|p| p.id == id)
    }

    fn name_taken(&self, name: &str, except: Option<Uuid>) -> bool {
        self.products
            .iter()
            .any(|p| p.name == name && Some(p.id) != except)
    }

    fn line(&self, item: &CartItem) -> CartLine {
        CartLine::new(item.clone(), self.product(item.product_id).cloned())
    }

    /// Gives the item's units back to its product; leaves everything
    /// untouched when that would overflow the stock.
    fn release(&mut self, item: &CartItem) -> ShopResult<()> {
        match self.product_mut(item.product_id) {
            Some(product) => {
                product.stock = reservation::restore(product.stock, item.quantity)?;
                product.updated_at = Some(Utc::now());
                info!(
                    "Restored {} units of product {}",
                    item.quantity, item.product_id
                );
            }
            None => warn!(
                "Product {} no longer exists, skipping stock restore for cart item {}",
                item.product_id, item.id
            ),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryShop {
    state: Arc<Mutex<State>>,
}

impl MemoryShop {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Catalog for MemoryShop {
    async fn create_product(&self, new: NewProduct) -> ShopResult<Product> {
        reservation::validate_new_product(&new)?;
        let mut state = self.state.lock().await;

        if state.name_taken(&new.name, None) {
            return Err(ShopError::duplicate_product());
        }

        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4(),
            name: new.name,
            price: new.price,
            description: new.description,
            stock: new.stock,
            created_at: Some(now),
            updated_at: Some(now),
        };
        state.products.push(product.clone());
        Ok(product)
    }

    async fn get_product(&self, id: Uuid) -> ShopResult<Product> {
        let state = self.state.lock().await;
        state
            .product(id)
            .cloned()
            .ok_or_else(|| ShopError::product_not_found(id))
    }

    async fn list_products(&self) -> ShopResult<Vec<Product>> {
        Ok(self.state.lock().await.products.clone())
    }

    async fn update_product(&self, id: Uuid, update: ProductUpdate) -> ShopResult<Product> {
        reservation::validate_update(&update)?;
        let mut state = self.state.lock().await;

        if state.product(id).is_none() {
            return Err(ShopError::product_not_found(id));
        }
        if let Some(name) = &update.name {
            if state.name_taken(name, Some(id)) {
                return Err(ShopError::duplicate_product());
            }
        }

        let product = state
            .product_mut(id)
            .ok_or_else(|| ShopError::product_not_found(id))?;
        if !update.is_empty() {
            update.apply_to(product);
            product.updated_at = Some(Utc::now());
        }
        Ok(product.clone())
    }

    async fn delete_product(&self, id: Uuid) -> ShopResult<()> {
        let mut state = self.state.lock().await;
        let index = state
            .products
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| ShopError::product_not_found(id))?;
        state.products.remove(index);

        let orphaned = state.items.iter().filter(|i| i.product_id == id).count();
        if orphaned > 0 {
            warn!("Deleted product {} is still referenced by {} cart item(s)", id, orphaned);
        }
        Ok(())
    }
}

#[async_trait]
impl Cart for MemoryShop {
    async fn list_cart(&self) -> ShopResult<Vec<CartLine>> {
        let state = self.state.lock().await;
        Ok(state.items.iter().map(|item| state.line(item)).collect())
    }

    async fn add_to_cart(&self, product_id: Uuid, quantity: i32) -> ShopResult<CartLine> {
        let mut state = self.state.lock().await;

        let stock = state
            .product(product_id)
            .map(|p| p.stock)
            .ok_or_else(|| ShopError::product_not_found(product_id))?;
        let existing = state.items.iter().position(|i| i.product_id == product_id);
        let in_cart = existing.map(|index| state.items[index].quantity);

        let plan = reservation::plan_add(product_id, stock, in_cart, quantity)?;

        if let Some(product) = state.product_mut(product_id) {
            product.stock = plan.stock;
            product.updated_at = Some(Utc::now());
        }
        let item = match existing {
            Some(index) => {
                state.items[index].quantity = plan.quantity;
                state.items[index].clone()
            }
            None => {
                let item = CartItem {
                    id: Uuid::new_v4(),
                    product_id,
                    quantity: plan.quantity,
                    created_at: Some(Utc::now()),
                };
                state.items.push(item.clone());
                item
            }
        };

        info!(
            "Reserved {} units of product {}, {} left in stock",
            quantity, product_id, plan.stock
        );
        Ok(state.line(&item))
    }

    async fn update_cart_item(&self, item_id: Uuid, quantity: i32) -> ShopResult<CartLine> {
        let mut state = self.state.lock().await;

        let index = state
            .items
            .iter()
            .position(|i| i.id == item_id)
            .ok_or_else(|| ShopError::cart_item_not_found(item_id))?;
        let item = state.items[index].clone();
        let stock = state
            .product(item.product_id)
            .map(|p| p.stock)
            .ok_or_else(|| ShopError::product_not_found(item.product_id))?;

        let plan = reservation::plan_quantity_change(item.product_id, stock, item.quantity, quantity)?;

        if let Some(product) = state.product_mut(item.product_id) {
            product.stock = plan.stock;
            product.updated_at = Some(Utc::now());
        }
        state.items[index].quantity = plan.quantity;

        let item = state.items[index].clone();
        Ok(state.line(&item))
    }

    async fn remove_cart_item(&self, item_id: Uuid) -> ShopResult<()> {
        let mut state = self.state.lock().await;

        let index = state
            .items
            .iter()
            .position(|i| i.id == item_id)
            .ok_or_else(|| ShopError::cart_item_not_found(item_id))?;
        let item = state.items[index].clone();
        state.release(&item)?;
        state.items.remove(index);
        Ok(())
    }

    async fn clear_cart(&self) -> ShopResult<()> {
        let mut state = self.state.lock().await;

        for item in &state.items {
            if let Some(product) = state.product(item.product_id) {
                reservation::restore(product.stock, item.quantity)?;
            }
        }

        let items = std::mem::take(&mut state.items);
        for item in &items {
            state.release(item)?;
        }
        info!("Cleared {} cart item(s)", items.len());
        Ok(())
    }

    async fn checkout(&self) -> ShopResult<CheckoutSummary> {
        let mut state = self.state.lock().await;

        if state.items.is_empty() {
            return Err(ShopError::empty_cart());
        }

        let mut lines = Vec::with_capacity(state.items.len());
        for item in &state.items {
            let product = state
                .product(item.product_id)
                .ok_or_else(|| ShopError::product_not_found(item.product_id))?;
            lines.push((&product.price, item.quantity));
        }
        let total_amount = reservation::checkout_total(lines);

        let items_purchased = state.items.len();
        state.items.clear();

        info!("Checked out {} cart item(s), total {}", items_purchased, total_amount);
        Ok(CheckoutSummary {
            total_amount,
            items_purchased,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    async fn product(shop: &MemoryShop, name: &str, price: &str, stock: i32) -> Product {
        shop.create_product(NewProduct {
            name: name.to_string(),
            price: dec(price),
            description: None,
            stock,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn add_merge_and_checkout_walkthrough() {
        let shop = MemoryShop::new();
        let a = product(&shop, "A", "10.0", 5).await;

        let line = shop.add_to_cart(a.id, 3).await.unwrap();
        assert_eq!(line.quantity, 3);
        assert_eq!(shop.get_product(a.id).await.unwrap().stock, 2);

        let merged = shop.add_to_cart(a.id, 1).await.unwrap();
        assert_eq!(merged.id, line.id);
        assert_eq!(merged.quantity, 4);
        assert_eq!(merged.product.as_ref().map(|p| p.stock), Some(1));
        assert_eq!(shop.list_cart().await.unwrap().len(), 1);

        let summary = shop.checkout().await.unwrap();
        assert_eq!(summary.total_amount, dec("40.0"));
        assert_eq!(summary.items_purchased, 1);
        assert!(shop.list_cart().await.unwrap().is_empty());
        assert_eq!(shop.get_product(a.id).await.unwrap().stock, 1);
    }

    #[tokio::test]
    async fn insufficient_stock_leaves_state_unchanged() {
        let shop = MemoryShop::new();
        let a = product(&shop, "A", "1", 2).await;

        let err = shop.add_to_cart(a.id, 3).await.unwrap_err();
        assert!(matches!(err, ShopError::InsufficientStock { .. }));
        assert_eq!(shop.get_product(a.id).await.unwrap().stock, 2);
        assert!(shop.list_cart().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_unknown_product_is_not_found() {
        let shop = MemoryShop::new();
        let err = shop.add_to_cart(Uuid::new_v4(), 1).await.unwrap_err();
        assert!(matches!(err, ShopError::NotFound { entity: "Product", .. }));
    }

    #[tokio::test]
    async fn update_quantity_moves_stock_both_ways() {
        let shop = MemoryShop::new();
        let a = product(&shop, "A", "1", 5).await;
        let line = shop.add_to_cart(a.id, 2).await.unwrap();

        shop.update_cart_item(line.id, 5).await.unwrap();
        assert_eq!(shop.get_product(a.id).await.unwrap().stock, 0);

        let err = shop.update_cart_item(line.id, 6).await.unwrap_err();
        assert!(matches!(err, ShopError::InsufficientStock { .. }));

        let line = shop.update_cart_item(line.id, 1).await.unwrap();
        assert_eq!(line.quantity, 1);
        assert_eq!(shop.get_product(a.id).await.unwrap().stock, 4);

        let err = shop.update_cart_item(line.id, 0).await.unwrap_err();
        assert!(matches!(err, ShopError::InvalidInput(_)));
        assert_eq!(shop.get_product(a.id).await.unwrap().stock, 4);
    }

    #[tokio::test]
    async fn remove_then_add_restores_prior_stock() {
        let shop = MemoryShop::new();
        let a = product(&shop, "A", "1", 5).await;
        let line = shop.add_to_cart(a.id, 2).await.unwrap();
        let reserved = shop.get_product(a.id).await.unwrap().stock;

        shop.remove_cart_item(line.id).await.unwrap();
        assert_eq!(shop.get_product(a.id).await.unwrap().stock, 5);

        shop.add_to_cart(a.id, 2).await.unwrap();
        assert_eq!(shop.get_product(a.id).await.unwrap().stock, reserved);

        let err = shop.remove_cart_item(line.id).await.unwrap_err();
        assert!(matches!(err, ShopError::NotFound { entity: "Cart item", .. }));
    }

    #[tokio::test]
    async fn overflowing_restore_fails_and_keeps_the_line() {
        let shop = MemoryShop::new();
        let a = product(&shop, "A", "1", 5).await;
        let line = shop.add_to_cart(a.id, 5).await.unwrap();
        let bump = ProductUpdate {
            stock: Some(i32::MAX),
            ..Default::default()
        };
        shop.update_product(a.id, bump).await.unwrap();

        let err = shop.remove_cart_item(line.id).await.unwrap_err();
        assert!(matches!(err, ShopError::InvalidInput(_)));
        assert_eq!(shop.get_product(a.id).await.unwrap().stock, i32::MAX);
        assert_eq!(shop.list_cart().await.unwrap().len(), 1);

        let err = shop.clear_cart().await.unwrap_err();
        assert!(matches!(err, ShopError::InvalidInput(_)));
        assert_eq!(shop.get_product(a.id).await.unwrap().stock, i32::MAX);
        assert_eq!(shop.list_cart().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn clear_restores_every_line() {
        let shop = MemoryShop::new();
        let a = product(&shop, "A", "1", 5).await;
        let b = product(&shop, "B", "2", 3).await;
        shop.add_to_cart(a.id, 4).await.unwrap();
        shop.add_to_cart(b.id, 3).await.unwrap();

        shop.clear_cart().await.unwrap();
        assert!(shop.list_cart().await.unwrap().is_empty());
        assert_eq!(shop.get_product(a.id).await.unwrap().stock, 5);
        assert_eq!(shop.get_product(b.id).await.unwrap().stock, 3);
    }

    #[tokio::test]
    async fn dangling_items_are_skipped_on_restore() {
        let shop = MemoryShop::new();
        let a = product(&shop, "A", "1", 5).await;
        let b = product(&shop, "B", "1", 5).await;
        let gone = shop.add_to_cart(a.id, 1).await.unwrap();
        shop.add_to_cart(b.id, 2).await.unwrap();

        shop.delete_product(a.id).await.unwrap();
        let lines = shop.list_cart().await.unwrap();
        let dangling = lines.iter().find(|l| l.id == gone.id).unwrap();
        assert!(dangling.product.is_none());

        let err = shop.checkout().await.unwrap_err();
        assert!(matches!(err, ShopError::NotFound { .. }));
        assert_eq!(shop.list_cart().await.unwrap().len(), 2);

        shop.clear_cart().await.unwrap();
        assert_eq!(shop.get_product(b.id).await.unwrap().stock, 5);
    }

    #[tokio::test]
    async fn checkout_of_empty_cart_is_invalid() {
        let shop = MemoryShop::new();
        let err = shop.checkout().await.unwrap_err();
        assert!(matches!(err, ShopError::InvalidState(_)));
    }

    #[tokio::test]
    async fn catalog_crud() {
        let shop = MemoryShop::new();
        let a = product(&shop, "A", "1.50", 5).await;
        product(&shop, "B", "2", 1).await;

        let dup = shop
            .create_product(NewProduct {
                name: "A".to_string(),
                price: dec("3"),
                description: None,
                stock: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(dup, ShopError::Conflict(_)));

        let rename = ProductUpdate {
            name: Some("B".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            shop.update_product(a.id, rename).await,
            Err(ShopError::Conflict(_))
        ));

        let update = ProductUpdate {
            price: Some(dec("2.00")),
            description: Some(Some("updated".to_string())),
            ..Default::default()
        };
        let updated = shop.update_product(a.id, update).await.unwrap();
        assert_eq!(updated.name, "A");
        assert_eq!(updated.price, dec("2"));
        assert_eq!(updated.description.as_deref(), Some("updated"));
        assert_eq!(updated.stock, 5);

        assert_eq!(shop.list_products().await.unwrap().len(), 2);
        shop.delete_product(a.id).await.unwrap();
        assert!(matches!(
            shop.get_product(a.id).await,
            Err(ShopError::NotFound { .. })
        ));
        assert!(matches!(
            shop.delete_product(a.id).await,
            Err(ShopError::NotFound { .. })
        ));
    }
}
