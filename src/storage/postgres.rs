//! Postgres storefront (sqlx)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;
use crate::domain::aggregates::{
    CartItem, CartLine, ItemCategory, LedgerWrite, PricingSnapshot, PurchaseStatus, Rank, StoreItem, StoreItemPurchase, UserProfile,
    UserPurchase, WebhookError,
};
use crate::domain::value_objects::{LineQuantity, MinecraftUsername, Money, Stock};
use crate::storage::{StoreLineWrite, Storefront};
use crate::{Result, StoreError};

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, sqlx::FromRow)]
struct RankRow { id: Uuid, name: String, description: String, price: Decimal, color_code: String }

impl From<RankRow> for Rank {
    fn from(r: RankRow) -> Self {
        Rank { id: r.id, name: r.name, description: r.description, price: Money::new(r.price), color_code: r.color_code }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StoreItemRow { id: Uuid, name: String, description: String, price: Decimal, category: String, quantity: i32 }

impl TryFrom<StoreItemRow> for StoreItem {
    type Error = StoreError;
    fn try_from(r: StoreItemRow) -> Result<Self> {
        let category = ItemCategory::parse(&r.category).ok_or_else(|| StoreError::Storage(format!("unknown item category {}", r.category)))?;
        Ok(StoreItem { id: r.id, name: r.name, description: r.description, price: Money::new(r.price), category, stock: Stock::from_column(r.quantity) })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProfileRow { user_id: Uuid, minecraft_username: Option<String>, minecraft_uuid: Option<String> }

impl From<ProfileRow> for UserProfile {
    fn from(r: ProfileRow) -> Self {
        // Rows written before name validation existed are treated as unlinked.
        let minecraft_username = r.minecraft_username.and_then(|u| MinecraftUsername::new(u).ok());
        UserProfile { user_id: r.user_id, minecraft_username, minecraft_uuid: r.minecraft_uuid }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CartRow {
    id: Uuid, user_id: Uuid, rank_id: Option<Uuid>, store_item_id: Option<Uuid>, quantity: i32,
    snapshot: Option<Json<PricingSnapshot>>, created_at: DateTime<Utc>,
}

impl TryFrom<CartRow> for CartItem {
    type Error = StoreError;
    fn try_from(r: CartRow) -> Result<Self> {
        let line = match (r.rank_id, r.store_item_id) {
            (Some(rank_id), None) => CartLine::Rank { rank_id },
            (None, Some(store_item_id)) => CartLine::StoreItem { store_item_id, quantity: LineQuantity::clamp(i64::from(r.quantity)).0 },
            _ => return Err(StoreError::Storage(format!("cart line {} must reference exactly one of rank or store item", r.id))),
        };
        Ok(CartItem { id: r.id, user_id: r.user_id, line, snapshot: r.snapshot.map(|Json(s)| s), created_at: r.created_at })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StoreLineRow {
    #[sqlx(flatten)]
    line: CartRow,
    created: bool,
    previous: Option<i32>,
}

#[derive(Debug, sqlx::FromRow)]
struct UserPurchaseRow {
    id: Uuid, user_id: Uuid, rank_id: Option<Uuid>, amount: Decimal, payment_ref: String, line_key: String, status: String,
    is_gift: bool, gifted_by: Option<Uuid>, created_at: DateTime<Utc>,
}

impl TryFrom<UserPurchaseRow> for UserPurchase {
    type Error = StoreError;
    fn try_from(r: UserPurchaseRow) -> Result<Self> {
        Ok(UserPurchase {
            id: r.id, user_id: r.user_id, rank_id: r.rank_id, amount: Money::new(r.amount), payment_ref: r.payment_ref, line_key: r.line_key,
            status: parse_status(&r.status)?, is_gift: r.is_gift, gifted_by: r.gifted_by, created_at: r.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StorePurchaseRow {
    id: Uuid, user_id: Uuid, store_item_id: Option<Uuid>, quantity: i32, amount: Decimal, payment_ref: String, line_key: String,
    status: String, created_at: DateTime<Utc>,
}

impl TryFrom<StorePurchaseRow> for StoreItemPurchase {
    type Error = StoreError;
    fn try_from(r: StorePurchaseRow) -> Result<Self> {
        Ok(StoreItemPurchase {
            id: r.id, user_id: r.user_id, store_item_id: r.store_item_id, quantity: u32::try_from(r.quantity).unwrap_or(0),
            amount: Money::new(r.amount), payment_ref: r.payment_ref, line_key: r.line_key, status: parse_status(&r.status)?, created_at: r.created_at,
        })
    }
}

fn parse_status(value: &str) -> Result<PurchaseStatus> {
    PurchaseStatus::parse(value).ok_or_else(|| StoreError::Storage(format!("unknown purchase status {value}")))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error().and_then(|d| d.code()).is_some_and(|code| code == UNIQUE_VIOLATION)
}

#[derive(Clone)]
pub struct PgStore { db: PgPool }

impl PgStore {
    pub fn new(db: PgPool) -> Self { Self { db } }
}

#[async_trait]
impl Storefront for PgStore {
    async fn list_ranks(&self) -> Result<Vec<Rank>> {
        let rows = sqlx::query_as::<_, RankRow>("SELECT * FROM ranks ORDER BY price").fetch_all(&self.db).await?;
        Ok(rows.into_iter().map(Rank::from).collect())
    }

    async fn rank(&self, id: Uuid) -> Result<Option<Rank>> {
        let row = sqlx::query_as::<_, RankRow>("SELECT * FROM ranks WHERE id = $1").bind(id).fetch_optional(&self.db).await?;
        Ok(row.map(Rank::from))
    }

    async fn list_store_items(&self) -> Result<Vec<StoreItem>> {
        let rows = sqlx::query_as::<_, StoreItemRow>("SELECT * FROM store_items ORDER BY name").fetch_all(&self.db).await?;
        rows.into_iter().map(StoreItem::try_from).collect()
    }

    async fn store_item(&self, id: Uuid) -> Result<Option<StoreItem>> {
        let row = sqlx::query_as::<_, StoreItemRow>("SELECT * FROM store_items WHERE id = $1").bind(id).fetch_optional(&self.db).await?;
        row.map(StoreItem::try_from).transpose()
    }

    async fn owned_ranks(&self, user_id: Uuid) -> Result<Vec<Rank>> {
        let rows = sqlx::query_as::<_, RankRow>(
            "SELECT DISTINCT r.* FROM ranks r JOIN user_purchases p ON p.rank_id = r.id WHERE p.user_id = $1 AND p.status = 'completed'",
        )
        .bind(user_id).fetch_all(&self.db).await?;
        Ok(rows.into_iter().map(Rank::from).collect())
    }

    async fn profile(&self, user_id: Uuid) -> Result<Option<UserProfile>> {
        let row = sqlx::query_as::<_, ProfileRow>("SELECT * FROM user_profiles WHERE user_id = $1").bind(user_id).fetch_optional(&self.db).await?;
        Ok(row.map(UserProfile::from))
    }

    async fn profile_by_username(&self, username: &str) -> Result<Option<UserProfile>> {
        let row = sqlx::query_as::<_, ProfileRow>("SELECT * FROM user_profiles WHERE LOWER(minecraft_username) = LOWER($1)")
            .bind(username).fetch_optional(&self.db).await?;
        Ok(row.map(UserProfile::from))
    }

    async fn save_profile(&self, profile: &UserProfile) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO user_profiles (user_id, minecraft_username, minecraft_uuid) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id) DO UPDATE SET minecraft_username = EXCLUDED.minecraft_username, minecraft_uuid = EXCLUDED.minecraft_uuid",
        )
        .bind(profile.user_id)
        .bind(profile.minecraft_username.as_ref().map(|u| u.as_str()))
        .bind(&profile.minecraft_uuid)
        .execute(&self.db)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::validation("Minecraft username already linked to another account")),
            Err(e) => Err(e.into()),
        }
    }

    async fn cart_items(&self, user_id: Uuid) -> Result<Vec<CartItem>> {
        let rows = sqlx::query_as::<_, CartRow>("SELECT * FROM cart_items WHERE user_id = $1 ORDER BY created_at")
            .bind(user_id).fetch_all(&self.db).await?;
        rows.into_iter().map(CartItem::try_from).collect()
    }

    async fn cart_item(&self, id: Uuid) -> Result<Option<CartItem>> {
        let row = sqlx::query_as::<_, CartRow>("SELECT * FROM cart_items WHERE id = $1").bind(id).fetch_optional(&self.db).await?;
        row.map(CartItem::try_from).transpose()
    }

    async fn insert_rank_line(&self, item: &CartItem) -> Result<bool> {
        let rank_id = item.rank_id().ok_or_else(|| StoreError::validation("Not a rank line"))?;
        let inserted = sqlx::query(
            "INSERT INTO cart_items (id, user_id, rank_id, quantity, snapshot, created_at) VALUES ($1, $2, $3, 1, $4, $5) \
             ON CONFLICT (user_id, rank_id) DO NOTHING",
        )
        .bind(item.id).bind(item.user_id).bind(rank_id).bind(item.snapshot.clone().map(Json)).bind(item.created_at)
        .execute(&self.db).await?
        .rows_affected();
        Ok(inserted == 1)
    }

    async fn add_store_line(&self, user_id: Uuid, store_item_id: Uuid, quantity: LineQuantity) -> Result<StoreLineWrite> {
        let row = sqlx::query_as::<_, StoreLineRow>(
            "WITH prev AS (SELECT quantity FROM cart_items WHERE user_id = $2 AND store_item_id = $3) \
             INSERT INTO cart_items (id, user_id, store_item_id, quantity, created_at) VALUES ($1, $2, $3, $4, NOW()) \
             ON CONFLICT (user_id, store_item_id) DO UPDATE SET quantity = LEAST(cart_items.quantity + EXCLUDED.quantity, $5) \
             RETURNING cart_items.*, (cart_items.xmax = 0) AS created, (SELECT quantity FROM prev) AS previous",
        )
        .bind(Uuid::now_v7()).bind(user_id).bind(store_item_id).bind(i32::from(quantity.value())).bind(i32::from(LineQuantity::MAX))
        .fetch_one(&self.db).await?;
        let adjustment = row.previous.and_then(|prev| LineQuantity::clamp(i64::from(prev)).0.merge(quantity).1);
        Ok(StoreLineWrite { item: CartItem::try_from(row.line)?, created: row.created, adjustment })
    }

    async fn set_line_quantity(&self, user_id: Uuid, id: Uuid, quantity: LineQuantity) -> Result<bool> {
        let updated = sqlx::query("UPDATE cart_items SET quantity = $3 WHERE id = $1 AND user_id = $2 AND store_item_id IS NOT NULL")
            .bind(id).bind(user_id).bind(i32::from(quantity.value()))
            .execute(&self.db).await?
            .rows_affected();
        Ok(updated == 1)
    }

    async fn delete_cart_item(&self, user_id: Uuid, id: Uuid) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM cart_items WHERE id = $1 AND user_id = $2").bind(id).bind(user_id).execute(&self.db).await?.rows_affected();
        Ok(deleted == 1)
    }

    async fn ledger_contains(&self, payment_ref: &str, line_key: &str) -> Result<bool> {
        let found: (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM user_purchases WHERE payment_ref = $1 AND line_key = $2) \
             OR EXISTS (SELECT 1 FROM store_item_purchases WHERE payment_ref = $1 AND line_key = $2)",
        )
        .bind(payment_ref).bind(line_key).fetch_one(&self.db).await?;
        Ok(found.0)
    }

    async fn record_rank_purchase(&self, p: &UserPurchase) -> Result<LedgerWrite> {
        // No conflict target: both the payment-line key and the completed-ownership index apply.
        let inserted = sqlx::query(
            "INSERT INTO user_purchases (id, user_id, rank_id, amount, payment_ref, line_key, status, is_gift, gifted_by, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) ON CONFLICT DO NOTHING",
        )
        .bind(p.id).bind(p.user_id).bind(p.rank_id).bind(p.amount.amount()).bind(&p.payment_ref).bind(&p.line_key)
        .bind(p.status.as_str()).bind(p.is_gift).bind(p.gifted_by).bind(p.created_at)
        .execute(&self.db).await?
        .rows_affected();
        Ok(if inserted == 1 { LedgerWrite::Inserted } else { LedgerWrite::Duplicate })
    }

    async fn record_store_purchase(&self, p: &StoreItemPurchase) -> Result<LedgerWrite> {
        let mut tx = self.db.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO store_item_purchases (id, user_id, store_item_id, quantity, amount, payment_ref, line_key, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) ON CONFLICT (payment_ref, line_key) DO NOTHING",
        )
        .bind(p.id).bind(p.user_id).bind(p.store_item_id).bind(i32::try_from(p.quantity).unwrap_or(i32::MAX)).bind(p.amount.amount())
        .bind(&p.payment_ref).bind(&p.line_key).bind(p.status.as_str()).bind(p.created_at)
        .execute(&mut *tx).await?
        .rows_affected();
        if inserted == 0 {
            tx.rollback().await?;
            return Ok(LedgerWrite::Duplicate);
        }
        if p.is_completed() {
            sqlx::query("UPDATE store_items SET quantity = GREATEST(quantity - $2, 0) WHERE id = $1 AND quantity <> $3")
                .bind(p.store_item_id).bind(i32::try_from(p.quantity).unwrap_or(i32::MAX)).bind(Stock::UNLIMITED_SENTINEL)
                .execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(LedgerWrite::Inserted)
    }

    async fn rank_purchases(&self, user_id: Uuid) -> Result<Vec<UserPurchase>> {
        let rows = sqlx::query_as::<_, UserPurchaseRow>("SELECT * FROM user_purchases WHERE user_id = $1 ORDER BY created_at DESC")
            .bind(user_id).fetch_all(&self.db).await?;
        rows.into_iter().map(UserPurchase::try_from).collect()
    }

    async fn store_purchases(&self, user_id: Uuid) -> Result<Vec<StoreItemPurchase>> {
        let rows = sqlx::query_as::<_, StorePurchaseRow>("SELECT * FROM store_item_purchases WHERE user_id = $1 ORDER BY created_at DESC")
            .bind(user_id).fetch_all(&self.db).await?;
        rows.into_iter().map(StoreItemPurchase::try_from).collect()
    }

    async fn record_webhook_error(&self, e: &WebhookError) -> Result<()> {
        sqlx::query("INSERT INTO webhook_errors (id, event_type, session_id, error, created_at) VALUES ($1, $2, $3, $4, $5)")
            .bind(e.id).bind(&e.event_type).bind(&e.session_id).bind(&e.error).bind(e.created_at)
            .execute(&self.db).await?;
        Ok(())
    }
}
