//! Pure pricing rules
pub mod discount;
pub mod pricing;

pub use discount::DiscountPolicy;
pub use pricing::{BuyerPricing, LineTarget, PricingEngine, RankOffer, RankQuote};
