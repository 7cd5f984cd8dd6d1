//! Catalog: ranks and store items

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::{Money, Stock};

/// A purchasable perk tier. Ordering by price defines the rank ladder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rank {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub price: Money,
    pub color_code: String,
}

impl Rank {
    pub fn new(name: impl Into<String>, price: Money) -> Self {
        Self { id: Uuid::now_v7(), name: name.into(), description: String::new(), price, color_code: "#FFFFFF".into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemCategory { Collectible, Cosmetic, Utility, Special }

impl ItemCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collectible => "collectible",
            Self::Cosmetic => "cosmetic",
            Self::Utility => "utility",
            Self::Special => "special",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "collectible" => Some(Self::Collectible),
            "cosmetic" => Some(Self::Cosmetic),
            "utility" => Some(Self::Utility),
            "special" => Some(Self::Special),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreItem {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub price: Money,
    pub category: ItemCategory,
    pub stock: Stock,
}

impl StoreItem {
    pub fn new(name: impl Into<String>, price: Money, category: ItemCategory, stock: Stock) -> Self {
        Self { id: Uuid::now_v7(), name: name.into(), description: String::new(), price, category, stock }
    }

    pub fn is_available(&self) -> bool { !self.stock.is_sold_out() }
}
