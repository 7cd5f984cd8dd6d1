//! Loyalty discount ladder

use crate::domain::aggregates::Rank;
use crate::domain::value_objects::DiscountPercent;

/// Rank name to store discount, highest tier first.
pub const DISCOUNT_LADDER: [(&str, u8); 4] = [
    ("legend", 20),
    ("titan", 15),
    ("champion", 10),
    ("hero", 5),
];

/// Maps the ranks a buyer owns to the percentage discount they get on store items.
///
/// The highest tier named in the ladder wins; ranks outside the ladder give nothing.
#[derive(Clone, Debug)]
pub struct DiscountPolicy {
    ladder: Vec<(String, DiscountPercent)>,
}

impl Default for DiscountPolicy {
    fn default() -> Self {
        Self::new(DISCOUNT_LADDER.iter().map(|(name, pct)| (name.to_string(), DiscountPercent::new(*pct))))
    }
}

impl DiscountPolicy {
    /// Builds a policy from `(rank name, discount)` pairs ordered highest tier first.
    pub fn new(ladder: impl IntoIterator<Item = (String, DiscountPercent)>) -> Self {
        Self { ladder: ladder.into_iter().map(|(name, pct)| (normalize(&name), pct)).collect() }
    }

    pub fn discount_for(&self, owned: &[Rank]) -> DiscountPercent {
        let owned: Vec<String> = owned.iter().map(|r| normalize(&r.name)).collect();
        self.ladder
            .iter()
            .find(|(tier, _)| owned.iter().any(|name| name == tier))
            .map(|(_, pct)| *pct)
            .unwrap_or(DiscountPercent::NONE)
    }
}

fn normalize(name: &str) -> String { name.trim().to_lowercase() }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::Money;
    use rust_decimal_macros::dec;

    fn rank(name: &str) -> Rank { Rank::new(name, Money::new(dec!(5))) }

    #[test]
    fn test_no_ranks_no_discount() {
        assert_eq!(DiscountPolicy::default().discount_for(&[]).value(), 0);
    }

    #[test]
    fn test_highest_tier_wins() {
        let policy = DiscountPolicy::default();
        assert_eq!(policy.discount_for(&[rank("Hero")]).value(), 5);
        assert_eq!(policy.discount_for(&[rank("Hero"), rank("Titan"), rank("Champion")]).value(), 15);
        assert_eq!(policy.discount_for(&[rank("LEGEND")]).value(), 20);
    }

    #[test]
    fn test_unknown_rank_ignored() {
        assert_eq!(DiscountPolicy::default().discount_for(&[rank("Builder")]).value(), 0);
    }
}
