//! Stock reservation rules.
//!
//! Stock is reserved the moment an item enters the cart: adding decrements
//! `product.stock`, removing or clearing gives it back, checkout leaves it
//! alone. For every product, `stock + quantity in cart` stays equal to the
//! stock it had before the cart touched it. Storage backends call these
//! functions to decide what to write and then apply the result atomically.

use bigdecimal::BigDecimal;
use num_traits::{Signed, Zero};
use uuid::Uuid;

use crate::{NewProduct, ProductUpdate, ShopError, ShopResult};

/// The stock and cart quantity a product should hold after an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub stock: i32,
    pub quantity: i32,
}

pub fn validate_quantity(quantity: i32) -> ShopResult<()> {
    if quantity < 1 {
        return Err(ShopError::InvalidInput(
            "Quantity must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Reserve `quantity` more units of a product, merging into the existing cart
/// quantity when the product is already in the cart.
pub fn plan_add(
    product_id: Uuid,
    stock: i32,
    in_cart: Option<i32>,
    quantity: i32,
) -> ShopResult<Reservation> {
    validate_quantity(quantity)?;

    if stock < quantity {
        return Err(ShopError::InsufficientStock {
            product_id,
            requested: quantity,
            available: stock,
        });
    }

    let new_quantity = in_cart
        .unwrap_or(0)
        .checked_add(quantity)
        .ok_or_else(|| ShopError::InvalidInput("Cart quantity is too large".to_string()))?;

    Ok(Reservation {
        stock: stock - quantity,
        quantity: new_quantity,
    })
}

/// Move a cart line from `current` to `requested` units. Growing the line
/// reserves the difference, shrinking it releases the difference.
pub fn plan_quantity_change(
    product_id: Uuid,
    stock: i32,
    current: i32,
    requested: i32,
) -> ShopResult<Reservation> {
    validate_quantity(requested)?;

    let diff = requested - current;
    if diff > 0 && stock < diff {
        return Err(ShopError::InsufficientStock {
            product_id,
            requested: diff,
            available: stock,
        });
    }

    let stock = stock
        .checked_sub(diff)
        .ok_or_else(|| ShopError::InvalidInput("Stock is too large".to_string()))?;

    Ok(Reservation {
        stock,
        quantity: requested,
    })
}

/// Stock after `quantity` reserved units come back.
pub fn restore(stock: i32, quantity: i32) -> ShopResult<i32> {
    stock
        .checked_add(quantity)
        .ok_or_else(|| ShopError::InvalidInput("Stock is too large".to_string()))
}

/// Sum of `price * quantity` over the cart lines.
pub fn checkout_total<'a, I>(lines: I) -> BigDecimal
where
    I: IntoIterator<Item = (&'a BigDecimal, i32)>,
{
    lines
        .into_iter()
        .fold(BigDecimal::zero(), |total, (price, quantity)| {
            total + price * BigDecimal::from(quantity)
        })
}

fn validate_name(name: &str) -> ShopResult<()> {
    if name.trim().is_empty() {
        return Err(ShopError::InvalidInput("Name must not be empty".to_string()));
    }
    Ok(())
}

fn validate_price(price: &BigDecimal) -> ShopResult<()> {
    if price.is_negative() {
        return Err(ShopError::InvalidInput(
            "Price must not be negative".to_string(),
        ));
    }
    Ok(())
}

fn validate_stock(stock: i32) -> ShopResult<()> {
    if stock < 0 {
        return Err(ShopError::InvalidInput(
            "Stock must not be negative".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_new_product(product: &NewProduct) -> ShopResult<()> {
    validate_name(&product.name)?;
    validate_price(&product.price)?;
    validate_stock(product.stock)
}

pub fn validate_update(update: &ProductUpdate) -> ShopResult<()> {
    if let Some(name) = &update.name {
        validate_name(name)?;
    }
    if let Some(price) = &update.price {
        validate_price(price)?;
    }
    if let Some(stock) = update.stock {
        validate_stock(stock)?;
    }
    Ok(())
}
