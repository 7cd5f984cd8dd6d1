//! Aggregates module
pub mod catalog;
pub mod cart;
pub mod purchase;
pub mod profile;

pub use catalog::{ItemCategory, Rank, StoreItem};
pub use cart::{CartError, CartItem, CartLine, PricingSnapshot};
pub use purchase::{LedgerWrite, PurchaseStatus, StoreItemPurchase, UserPurchase, WebhookError};
pub use profile::UserProfile;
