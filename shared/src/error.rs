use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;
use uuid::Uuid;

pub type ShopResult<T> = Result<T, ShopError>;

#[derive(Debug, Error)]
pub enum ShopError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("{0}")]
    Conflict(String),

    #[error("Not enough stock available")]
    InsufficientStock {
        product_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl ShopError {
    pub fn product_not_found(id: Uuid) -> Self {
        Self::NotFound {
            entity: "Product",
            id,
        }
    }

    pub fn cart_item_not_found(id: Uuid) -> Self {
        Self::NotFound {
            entity: "Cart item",
            id,
        }
    }

    pub fn duplicate_product() -> Self {
        Self::Conflict("Product is already registered".to_string())
    }

    pub fn empty_cart() -> Self {
        Self::InvalidState("Cart is empty".to_string())
    }
}

impl From<DieselError> for ShopError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                match info.constraint_name() {
                    Some("products_name_key") => Self::duplicate_product(),
                    _ => Self::Conflict(info.message().to_string()),
                }
            }
            other => Self::Storage(other.to_string()),
        }
    }
}
