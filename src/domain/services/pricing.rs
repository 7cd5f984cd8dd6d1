//! Pricing engine
//!
//! Ranks and store items are priced by two independent mechanisms:
//! - ranks get an *upgrade credit* equal to the price of the buyer's highest
//!   owned rank, when that rank is strictly cheaper than the one being bought;
//! - store items get the buyer's loyalty percentage from [`DiscountPolicy`].

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use uuid::Uuid;
use crate::domain::aggregates::{CartItem, CartLine, PricingSnapshot, Rank, StoreItem};
use crate::domain::services::DiscountPolicy;
use crate::domain::value_objects::{DiscountPercent, Money};

/// Everything pricing needs to know about one buyer.
#[derive(Clone, Debug, Default)]
pub struct BuyerPricing {
    pub owned: Vec<Rank>,
    pub discount: DiscountPercent,
}

impl BuyerPricing {
    pub fn anonymous() -> Self { Self::default() }

    pub fn highest_owned(&self) -> Option<&Rank> { self.owned.iter().max_by_key(|r| r.price) }

    pub fn owns(&self, rank_id: Uuid) -> bool { self.owned.iter().any(|r| r.id == rank_id) }

    /// Only ranks priced strictly above the highest owned one are for sale to this buyer.
    pub fn can_upgrade_to(&self, rank: &Rank) -> bool {
        self.highest_owned().map_or(true, |owned| owned.price < rank.price)
    }
}

/// Price a buyer pays for a rank right now.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RankQuote {
    pub original: Money,
    pub price: Money,
    pub credit_from: Option<Uuid>,
}

impl RankQuote {
    pub fn full_price(rank: &Rank) -> Self { Self { original: rank.price, price: rank.price, credit_from: None } }

    pub fn snapshot(&self) -> PricingSnapshot {
        let credit = self.original.saturating_sub(&self.price);
        let percent = if self.original.is_zero() {
            0
        } else {
            (credit.amount() * Decimal::ONE_HUNDRED / self.original.amount())
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                .to_u8()
                .unwrap_or(0)
        };
        PricingSnapshot {
            original_price: self.original,
            discounted_price: self.price,
            discount_percent: DiscountPercent::new(percent),
            previous_rank_id: self.credit_from,
        }
    }
}

/// Ranks a buyer may still purchase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "ranks", rename_all = "snake_case")]
pub enum RankOffer {
    Available(Vec<Rank>),
    /// The buyer already holds the top of the ladder.
    NoFurtherRanks,
}

/// The catalog entry a cart line points at.
#[derive(Clone, Copy, Debug)]
pub enum LineTarget<'a> {
    Rank(&'a Rank),
    StoreItem(&'a StoreItem),
}

#[derive(Clone, Debug, Default)]
pub struct PricingEngine {
    policy: DiscountPolicy,
}

impl PricingEngine {
    pub fn new(policy: DiscountPolicy) -> Self { Self { policy } }

    pub fn buyer(&self, owned: Vec<Rank>) -> BuyerPricing {
        let discount = self.policy.discount_for(&owned);
        BuyerPricing { owned, discount }
    }

    pub fn quote_rank(&self, rank: &Rank, buyer: &BuyerPricing) -> RankQuote {
        match buyer.highest_owned() {
            Some(owned) if owned.price < rank.price => RankQuote {
                original: rank.price,
                price: rank.price.saturating_sub(&owned.price),
                credit_from: Some(owned.id),
            },
            _ => RankQuote::full_price(rank),
        }
    }

    pub fn store_unit_price(&self, item: &StoreItem, buyer: &BuyerPricing) -> Money {
        item.price.percent_off(buyer.discount)
    }

    /// Subtotal of one cart line. Rank lines honour their pricing snapshot; store lines are
    /// always recomputed from the current discount.
    pub fn line_subtotal(&self, line: &CartItem, target: LineTarget<'_>, buyer: &BuyerPricing) -> Money {
        match (line.line, target) {
            (CartLine::Rank { .. }, LineTarget::Rank(rank)) => match &line.snapshot {
                Some(snapshot) => snapshot.discounted_price,
                None => self.quote_rank(rank, buyer).price,
            },
            (CartLine::StoreItem { quantity, .. }, LineTarget::StoreItem(item)) => {
                self.store_unit_price(item, buyer).multiply(u32::from(quantity.value()))
            }
            _ => Money::zero(),
        }
    }

    /// Ranks strictly more expensive than the buyer's highest owned rank, cheapest first.
    pub fn available_ranks(&self, all: &[Rank], buyer: &BuyerPricing) -> RankOffer {
        let mut ranks: Vec<Rank> = all.iter().filter(|r| buyer.can_upgrade_to(r)).cloned().collect();
        if ranks.is_empty() {
            return RankOffer::NoFurtherRanks;
        }
        ranks.sort_by_key(|r| r.price);
        RankOffer::Available(ranks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::ItemCategory;
    use crate::domain::value_objects::{LineQuantity, Stock};
    use rust_decimal_macros::dec;

    fn rank(name: &str, price: Decimal) -> Rank { Rank::new(name, Money::new(price)) }

    #[test]
    fn test_can_upgrade_only_upwards() {
        let engine = PricingEngine::default();
        let hero = rank("Hero", dec!(10));
        let buyer = engine.buyer(vec![hero.clone()]);
        assert!(buyer.can_upgrade_to(&rank("Champion", dec!(25))));
        assert!(!buyer.can_upgrade_to(&hero));
        assert!(!buyer.can_upgrade_to(&rank("Twin", dec!(10))));
        assert!(!buyer.can_upgrade_to(&rank("Starter", dec!(2))));
        assert!(BuyerPricing::anonymous().can_upgrade_to(&hero));
    }

    #[test]
    fn test_upgrade_credit_from_cheaper_rank() {
        let engine = PricingEngine::default();
        let owned = rank("Hero", dec!(10));
        let buyer = engine.buyer(vec![owned.clone()]);
        let quote = engine.quote_rank(&rank("Champion", dec!(25)), &buyer);
        assert_eq!(quote.price.amount(), dec!(15));
        assert_eq!(quote.credit_from, Some(owned.id));
    }

    #[test]
    fn test_no_credit_from_pricier_rank() {
        let engine = PricingEngine::default();
        let buyer = engine.buyer(vec![rank("Titan", dec!(30))]);
        let quote = engine.quote_rank(&rank("Champion", dec!(25)), &buyer);
        assert_eq!(quote.price.amount(), dec!(25));
        assert_eq!(quote.credit_from, None);
    }

    #[test]
    fn test_credit_uses_highest_owned() {
        let engine = PricingEngine::default();
        let buyer = engine.buyer(vec![rank("Hero", dec!(5)), rank("Champion", dec!(15))]);
        assert_eq!(engine.quote_rank(&rank("Titan", dec!(30)), &buyer).price.amount(), dec!(15));
    }

    #[test]
    fn test_snapshot_records_credit() {
        let engine = PricingEngine::default();
        let buyer = engine.buyer(vec![rank("Hero", dec!(5))]);
        let snapshot = engine.quote_rank(&rank("Champion", dec!(15)), &buyer).snapshot();
        assert_eq!(snapshot.original_price.amount(), dec!(15));
        assert_eq!(snapshot.discounted_price.amount(), dec!(10));
        assert_eq!(snapshot.discount_percent.value(), 33);
        assert!(snapshot.previous_rank_id.is_some());
    }

    #[test]
    fn test_store_line_uses_percentage() {
        let engine = PricingEngine::default();
        let buyer = BuyerPricing { owned: vec![], discount: DiscountPercent::new(15) };
        let item = StoreItem::new("Hat", Money::new(dec!(20.00)), ItemCategory::Cosmetic, Stock::Unlimited);
        assert_eq!(engine.store_unit_price(&item, &buyer).amount(), dec!(17.00));
        let (qty, _) = LineQuantity::clamp(3);
        let line = CartItem::store_item(Uuid::now_v7(), item.id, qty);
        assert_eq!(engine.line_subtotal(&line, LineTarget::StoreItem(&item), &buyer).amount(), dec!(51.00));
    }

    #[test]
    fn test_rank_line_prefers_snapshot() {
        let engine = PricingEngine::default();
        let champion = rank("Champion", dec!(15));
        let snapshot = RankQuote { original: champion.price, price: Money::new(dec!(10)), credit_from: None }.snapshot();
        let line = CartItem::rank(Uuid::now_v7(), champion.id, Some(snapshot));
        let buyer = BuyerPricing::anonymous();
        assert_eq!(engine.line_subtotal(&line, LineTarget::Rank(&champion), &buyer).amount(), dec!(10));
    }

    #[test]
    fn test_available_ranks_filter() {
        let engine = PricingEngine::default();
        let ladder = vec![rank("Titan", dec!(30)), rank("Hero", dec!(5)), rank("Champion", dec!(15))];
        let buyer = engine.buyer(vec![ladder[1].clone()]);
        match engine.available_ranks(&ladder, &buyer) {
            RankOffer::Available(ranks) => {
                let names: Vec<_> = ranks.iter().map(|r| r.name.as_str()).collect();
                assert_eq!(names, ["Champion", "Titan"]);
            }
            RankOffer::NoFurtherRanks => panic!("expected ranks"),
        }
        let top = engine.buyer(vec![ladder[0].clone()]);
        assert_eq!(engine.available_ranks(&ladder, &top), RankOffer::NoFurtherRanks);
    }
}
