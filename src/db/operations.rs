use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::models::{
    IssuedRedemption, Redemption, RedemptionRequest, Reward, RewardPatch,
};
use crate::db::store::RewardStore;
use crate::error::{AppError, RewardError};
use crate::Result;

const REWARD_COLUMNS: &str = "id, name, description, category, image_url, points_cost, \
     valid_from, valid_until, quantity, is_active, created_at, updated_at";

const REDEMPTION_COLUMNS: &str = "id, reward_id, user_id, points_spent, redemption_code, \
     redeemed_at, expires_at, is_used, used_at, used_by";

/// Row shape of `rewards`; the category is stored as text.
#[derive(Debug, FromRow)]
struct RewardRow {
    id: Uuid,
    name: String,
    description: String,
    category: String,
    image_url: Option<String>,
    points_cost: i64,
    valid_from: Option<DateTime<Utc>>,
    valid_until: Option<DateTime<Utc>>,
    quantity: i64,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RewardRow> for Reward {
    type Error = AppError;

    fn try_from(row: RewardRow) -> Result<Self> {
        Ok(Reward {
            id: row.id,
            name: row.name,
            description: row.description,
            category: row.category.parse()?,
            image_url: row.image_url,
            points_cost: row.points_cost,
            valid_from: row.valid_from,
            valid_until: row.valid_until,
            quantity: row.quantity,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_rewards(rows: Vec<RewardRow>) -> Result<Vec<Reward>> {
    rows.into_iter().map(Reward::try_from).collect()
}

/// Postgres-backed [`RewardStore`].
pub struct DbOperations {
    pool: Arc<PgPool>,
}

impl DbOperations {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn new_with_options(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await?;

        Ok(Self::new(Arc::new(pool)))
    }

    /// Adds points to a user's balance and returns the new total.
    /// Stands in for the platform's external earning events.
    pub async fn credit_points(&self, user_id: Uuid, amount: i64) -> Result<i64> {
        let points = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO user_points (user_id, points, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id)
            DO UPDATE SET points = user_points.points + EXCLUDED.points, updated_at = NOW()
            RETURNING points
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(points)
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(self.pool.as_ref()).await?;
        info!("Database migrations applied");
        Ok(())
    }

    pub async fn begin_transaction(&self) -> Result<Transaction<'_, Postgres>> {
        Ok(self.pool.as_ref().begin().await?)
    }

    async fn fetch_reward_for_update(
        transaction: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Option<Reward>> {
        let sql = format!("SELECT {} FROM rewards WHERE id = $1 FOR UPDATE", REWARD_COLUMNS);
        sqlx::query_as::<_, RewardRow>(&sql)
            .bind(id)
            .fetch_optional(&mut **transaction)
            .await?
            .map(Reward::try_from)
            .transpose()
    }

    async fn redeem_with_transaction(
        transaction: &mut Transaction<'_, Postgres>,
        request: &RedemptionRequest,
    ) -> Result<IssuedRedemption> {
        // Check and decrement in one statement; the row lock it takes
        // serializes concurrent redemptions of the same reward.
        let claimed: Option<(i64, Option<DateTime<Utc>>)> = sqlx::query_as(
            r#"
            UPDATE rewards
            SET quantity = CASE WHEN quantity = -1 THEN -1 ELSE quantity - 1 END
            WHERE id = $1
              AND is_active
              AND (valid_from IS NULL OR valid_from <= $2)
              AND (valid_until IS NULL OR valid_until >= $2)
              AND (quantity = -1 OR quantity > 0)
            RETURNING points_cost, valid_until
            "#,
        )
        .bind(request.reward_id)
        .bind(request.now)
        .fetch_optional(&mut **transaction)
        .await?;

        let Some((points_cost, valid_until)) = claimed else {
            let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM rewards WHERE id = $1)")
                .bind(request.reward_id)
                .fetch_one(&mut **transaction)
                .await?;
            return Err(if exists {
                RewardError::RewardUnavailable.into()
            } else {
                RewardError::RewardNotFound.into()
            });
        };

        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE user_points
            SET points = points - $2, updated_at = $3
            WHERE user_id = $1 AND points >= $2
            RETURNING points
            "#,
        )
        .bind(request.user_id)
        .bind(points_cost)
        .bind(request.now)
        .fetch_optional(&mut **transaction)
        .await?;

        let Some(remaining_points) = remaining else {
            return Err(RewardError::InsufficientBalance.into());
        };

        let redemption = Redemption::issue(request, points_cost, valid_until);
        let sql = format!(
            "INSERT INTO redemptions ({cols}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {cols}",
            cols = REDEMPTION_COLUMNS
        );
        let redemption = sqlx::query_as::<_, Redemption>(&sql)
            .bind(redemption.id)
            .bind(redemption.reward_id)
            .bind(redemption.user_id)
            .bind(redemption.points_spent)
            .bind(&redemption.redemption_code)
            .bind(redemption.redeemed_at)
            .bind(redemption.expires_at)
            .bind(redemption.is_used)
            .bind(redemption.used_at)
            .bind(redemption.used_by)
            .fetch_one(&mut **transaction)
            .await?;

        Ok(IssuedRedemption {
            redemption,
            remaining_points,
        })
    }
}

#[async_trait]
impl RewardStore for DbOperations {
    async fn list_rewards(&self) -> Result<Vec<Reward>> {
        let sql = format!("SELECT {} FROM rewards ORDER BY created_at DESC", REWARD_COLUMNS);
        let rows = sqlx::query_as::<_, RewardRow>(&sql)
            .fetch_all(self.pool.as_ref())
            .await?;

        into_rewards(rows)
    }

    async fn get_reward(&self, id: Uuid) -> Result<Option<Reward>> {
        let sql = format!("SELECT {} FROM rewards WHERE id = $1", REWARD_COLUMNS);
        sqlx::query_as::<_, RewardRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?
            .map(Reward::try_from)
            .transpose()
    }

    async fn get_rewards_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Reward>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!("SELECT {} FROM rewards WHERE id = ANY($1)", REWARD_COLUMNS);
        let rows = sqlx::query_as::<_, RewardRow>(&sql)
            .bind(ids)
            .fetch_all(self.pool.as_ref())
            .await?;

        into_rewards(rows)
    }

    async fn create_reward(&self, reward: &Reward) -> Result<Reward> {
        let sql = format!(
            "INSERT INTO rewards ({cols}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) RETURNING {cols}",
            cols = REWARD_COLUMNS
        );
        let row = sqlx::query_as::<_, RewardRow>(&sql)
            .bind(reward.id)
            .bind(&reward.name)
            .bind(&reward.description)
            .bind(reward.category.as_str())
            .bind(&reward.image_url)
            .bind(reward.points_cost)
            .bind(reward.valid_from)
            .bind(reward.valid_until)
            .bind(reward.quantity)
            .bind(reward.is_active)
            .bind(reward.created_at)
            .bind(reward.updated_at)
            .fetch_one(self.pool.as_ref())
            .await?;

        row.try_into()
    }

    async fn update_reward(&self, id: Uuid, patch: &RewardPatch, now: DateTime<Utc>) -> Result<Reward> {
        let mut transaction = self.begin_transaction().await?;

        let Some(mut reward) = Self::fetch_reward_for_update(&mut transaction, id).await? else {
            transaction.rollback().await?;
            return Err(RewardError::RewardNotFound.into());
        };
        if let Err(e) = patch.apply(&mut reward, now) {
            transaction.rollback().await?;
            return Err(e);
        }

        let sql = format!(
            r#"
            UPDATE rewards
            SET name = $2, description = $3, category = $4, image_url = $5, points_cost = $6,
                valid_from = $7, valid_until = $8, quantity = $9, is_active = $10, updated_at = $11
            WHERE id = $1
            RETURNING {}
            "#,
            REWARD_COLUMNS
        );
        let row = sqlx::query_as::<_, RewardRow>(&sql)
            .bind(reward.id)
            .bind(&reward.name)
            .bind(&reward.description)
            .bind(reward.category.as_str())
            .bind(&reward.image_url)
            .bind(reward.points_cost)
            .bind(reward.valid_from)
            .bind(reward.valid_until)
            .bind(reward.quantity)
            .bind(reward.is_active)
            .bind(reward.updated_at)
            .fetch_one(&mut *transaction)
            .await?;

        transaction.commit().await?;
        row.try_into()
    }

    async fn points_balance(&self, user_id: Uuid) -> Result<i64> {
        let points: Option<i64> = sqlx::query_scalar("SELECT points FROM user_points WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(points.unwrap_or(0))
    }

    async fn redeem(&self, request: &RedemptionRequest) -> Result<IssuedRedemption> {
        let mut transaction = self.begin_transaction().await?;

        let result = Self::redeem_with_transaction(&mut transaction, request).await;

        match result {
            Ok(issued) => {
                transaction.commit().await?;
                Ok(issued)
            }
            Err(e) => {
                debug!(reward_id = %request.reward_id, error = %e, "rolling back redemption");
                transaction.rollback().await?;
                Err(e)
            }
        }
    }

    async fn list_redemptions_for_user(&self, user_id: Uuid) -> Result<Vec<Redemption>> {
        let sql = format!(
            "SELECT {} FROM redemptions WHERE user_id = $1 ORDER BY redeemed_at DESC",
            REDEMPTION_COLUMNS
        );
        let redemptions = sqlx::query_as::<_, Redemption>(&sql)
            .bind(user_id)
            .fetch_all(self.pool.as_ref())
            .await?;

        Ok(redemptions)
    }

    async fn find_redemption_by_code(&self, code: &str) -> Result<Option<Redemption>> {
        let sql = format!("SELECT {} FROM redemptions WHERE redemption_code = $1", REDEMPTION_COLUMNS);
        let redemption = sqlx::query_as::<_, Redemption>(&sql)
            .bind(code)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(redemption)
    }

    async fn mark_redemption_used(
        &self,
        id: Uuid,
        used_by: Uuid,
        now: DateTime<Utc>,
        allow_expired: bool,
    ) -> Result<Redemption> {
        let sql = format!(
            r#"
            UPDATE redemptions
            SET is_used = TRUE, used_at = $2, used_by = $3
            WHERE id = $1 AND NOT is_used AND ($4 OR expires_at >= $2)
            RETURNING {}
            "#,
            REDEMPTION_COLUMNS
        );
        let updated = sqlx::query_as::<_, Redemption>(&sql)
            .bind(id)
            .bind(now)
            .bind(used_by)
            .bind(allow_expired)
            .fetch_optional(self.pool.as_ref())
            .await?;

        if let Some(redemption) = updated {
            return Ok(redemption);
        }

        // Nothing matched; work out why for the caller.
        let sql = format!("SELECT {} FROM redemptions WHERE id = $1", REDEMPTION_COLUMNS);
        let existing = sqlx::query_as::<_, Redemption>(&sql)
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Err(match existing {
            None => RewardError::RedemptionNotFound,
            Some(r) if r.is_used => RewardError::AlreadyUsed,
            Some(_) => RewardError::Expired,
        }
        .into())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

// Runs against a live Postgres; skipped unless DATABASE_URL is set.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{RewardCategory, UNLIMITED_QUANTITY};
    use crate::error::DatabaseError;
    use chrono::Duration as ChronoDuration;

    async fn setup_test_db() -> Option<DbOperations> {
        let Ok(database_url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL not set, skipping Postgres test");
            return None;
        };

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&database_url)
            .await
            .expect("Failed to connect to test database");
        let db = DbOperations::new(Arc::new(pool));
        db.run_migrations().await.expect("Failed to run migrations");
        Some(db)
    }

    fn reward(points_cost: i64, quantity: i64) -> Reward {
        let now = Utc::now();
        Reward {
            id: Uuid::new_v4(),
            name: "Sticker pack".to_string(),
            description: String::new(),
            category: RewardCategory::Merchandise,
            image_url: None,
            points_cost,
            valid_from: None,
            valid_until: None,
            quantity,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn request(user_id: Uuid, reward_id: Uuid) -> RedemptionRequest {
        RedemptionRequest {
            user_id,
            reward_id,
            code: crate::rewards::code::generate(),
            now: Utc::now(),
            code_validity: ChronoDuration::days(30),
        }
    }

    async fn quantity(db: &DbOperations, id: Uuid) -> i64 {
        db.get_reward(id).await.unwrap().unwrap().quantity
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_last_unit_goes_to_exactly_one_user() {
        let Some(db) = setup_test_db().await else { return };
        let db = Arc::new(db);
        let r = db.create_reward(&reward(100, 1)).await.unwrap();

        let mut users = Vec::new();
        for _ in 0..8 {
            let user = Uuid::new_v4();
            db.credit_points(user, 150).await.unwrap();
            users.push(user);
        }

        let attempts = users.iter().map(|user| {
            let db = db.clone();
            let req = request(*user, r.id);
            tokio::spawn(async move { db.redeem(&req).await })
        });
        let results = futures::future::join_all(attempts).await;

        let mut winners = 0;
        for result in results {
            match result.unwrap() {
                Ok(issued) => {
                    winners += 1;
                    assert_eq!(issued.remaining_points, 50);
                }
                Err(AppError::RewardError(RewardError::RewardUnavailable)) => {}
                Err(e) => panic!("Unexpected error: {}", e),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(quantity(&db, r.id).await, 0);

        let mut untouched = 0;
        for user in &users {
            if db.points_balance(*user).await.unwrap() == 150 {
                untouched += 1;
            }
        }
        assert_eq!(untouched, users.len() - 1);
        db.close().await;
    }

    #[tokio::test]
    async fn test_insufficient_balance_rolls_back_stock() {
        let Some(db) = setup_test_db().await else { return };
        let user = Uuid::new_v4();
        let r = db.create_reward(&reward(500, 5)).await.unwrap();
        db.credit_points(user, 40).await.unwrap();

        let result = db.redeem(&request(user, r.id)).await;

        assert!(matches!(
            result,
            Err(AppError::RewardError(RewardError::InsufficientBalance))
        ));
        assert_eq!(quantity(&db, r.id).await, 5);
        assert_eq!(db.points_balance(user).await.unwrap(), 40);
        assert!(db.list_redemptions_for_user(user).await.unwrap().is_empty());
        db.close().await;
    }

    #[tokio::test]
    async fn test_unknown_and_unavailable_rewards() {
        let Some(db) = setup_test_db().await else { return };
        let user = Uuid::new_v4();
        db.credit_points(user, 100).await.unwrap();

        let missing = db.redeem(&request(user, Uuid::new_v4())).await;
        assert!(matches!(missing, Err(AppError::RewardError(RewardError::RewardNotFound))));

        let sold_out = db.create_reward(&reward(10, 0)).await.unwrap();
        let result = db.redeem(&request(user, sold_out.id)).await;
        assert!(matches!(result, Err(AppError::RewardError(RewardError::RewardUnavailable))));

        assert_eq!(db.points_balance(user).await.unwrap(), 100);
        db.close().await;
    }

    #[tokio::test]
    async fn test_duplicate_code_is_rejected_and_rolled_back() {
        let Some(db) = setup_test_db().await else { return };
        let first_user = Uuid::new_v4();
        let second_user = Uuid::new_v4();
        let r = db.create_reward(&reward(10, 5)).await.unwrap();
        db.credit_points(first_user, 100).await.unwrap();
        db.credit_points(second_user, 100).await.unwrap();

        let first = request(first_user, r.id);
        db.redeem(&first).await.unwrap();

        let clash = RedemptionRequest {
            user_id: second_user,
            ..first.clone()
        };
        let result = db.redeem(&clash).await;

        assert!(matches!(result, Err(AppError::DatabaseError(DatabaseError::Duplicate))));
        assert_eq!(db.points_balance(second_user).await.unwrap(), 100);
        assert_eq!(quantity(&db, r.id).await, 4);
        db.close().await;
    }

    #[tokio::test]
    async fn test_unlimited_reward_keeps_sentinel() {
        let Some(db) = setup_test_db().await else { return };
        let user = Uuid::new_v4();
        let r = db.create_reward(&reward(1, UNLIMITED_QUANTITY)).await.unwrap();
        db.credit_points(user, 20).await.unwrap();

        for _ in 0..20 {
            db.redeem(&request(user, r.id)).await.unwrap();
        }

        assert_eq!(quantity(&db, r.id).await, UNLIMITED_QUANTITY);
        assert_eq!(db.points_balance(user).await.unwrap(), 0);
        db.close().await;
    }

    #[tokio::test]
    async fn test_mark_used_only_once() {
        let Some(db) = setup_test_db().await else { return };
        let user = Uuid::new_v4();
        let admin = Uuid::new_v4();
        let r = db.create_reward(&reward(10, UNLIMITED_QUANTITY)).await.unwrap();
        db.credit_points(user, 10).await.unwrap();
        let issued = db.redeem(&request(user, r.id)).await.unwrap();
        let id = issued.redemption.id;

        let used = db.mark_redemption_used(id, admin, Utc::now(), true).await.unwrap();
        assert!(used.is_used);
        assert_eq!(used.used_by, Some(admin));

        let again = db.mark_redemption_used(id, admin, Utc::now(), true).await;
        assert!(matches!(again, Err(AppError::RewardError(RewardError::AlreadyUsed))));

        let missing = db.mark_redemption_used(Uuid::new_v4(), admin, Utc::now(), true).await;
        assert!(matches!(missing, Err(AppError::RewardError(RewardError::RedemptionNotFound))));
        db.close().await;
    }

    #[tokio::test]
    async fn test_expired_policy_is_respected() {
        let Some(db) = setup_test_db().await else { return };
        let user = Uuid::new_v4();
        let admin = Uuid::new_v4();
        let r = db.create_reward(&reward(10, UNLIMITED_QUANTITY)).await.unwrap();
        db.credit_points(user, 10).await.unwrap();
        let issued = db.redeem(&request(user, r.id)).await.unwrap();
        let later = issued.redemption.expires_at + ChronoDuration::days(1);

        let blocked = db.mark_redemption_used(issued.redemption.id, admin, later, false).await;
        assert!(matches!(blocked, Err(AppError::RewardError(RewardError::Expired))));
        let found = db
            .find_redemption_by_code(&issued.redemption.redemption_code)
            .await
            .unwrap()
            .unwrap();
        assert!(!found.is_used);

        let allowed = db.mark_redemption_used(issued.redemption.id, admin, later, true).await;
        assert!(allowed.unwrap().is_used);
        db.close().await;
    }
}
