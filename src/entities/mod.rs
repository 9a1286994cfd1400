//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod product;
pub mod tag;
pub mod transaction;

// Re-export specific types to avoid conflicts
pub use product::{Column as ProductColumn, Entity as Product, Model as ProductModel};
pub use tag::{Column as TagColumn, Entity as Tag, Model as TagModel, TagStatus};
pub use transaction::{
    ApprovalStatus, Column as TransactionColumn, Entity as Transaction, Model as TransactionModel,
    PaymentMethod, TransactionKind,
};
