use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use tracing::debug;

use super::{ClaimLedger, CouponStore, StoreError, UserStore};
use crate::entities::prelude::*;
use crate::entities::{claim, coupon, rotation_cursor, user};
use crate::models::claim::{Claim as ClaimRecord, NewClaim};
use crate::models::coupon::Coupon as CouponRecord;

/// The rotation has exactly one cursor row.
const CURSOR_ID: i32 = 1;

pub struct DatabaseStore {
    database: DatabaseConnection,
}

impl DatabaseStore {
    pub fn new(database: DatabaseConnection) -> Self {
        Self { database }
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        Ok(self.database.ping().await?)
    }

    /// Lock the cursor row for the rest of `txn`, creating it on first use.
    async fn lock_cursor(&self, txn: &DatabaseTransaction) -> Result<rotation_cursor::Model, DbErr> {
        if let Some(cursor) = RotationCursor::find_by_id(CURSOR_ID)
            .lock_exclusive()
            .one(txn)
            .await?
        {
            return Ok(cursor);
        }

        debug!("Rotation cursor row missing, creating it");
        insert_cursor_row(txn).await?;
        RotationCursor::find_by_id(CURSOR_ID)
            .lock_exclusive()
            .one(txn)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound("rotation cursor".to_string()))
    }
}

async fn insert_cursor_row<C: sea_orm::ConnectionTrait>(connection: &C) -> Result<(), DbErr> {
    let row = rotation_cursor::ActiveModel {
        id: Set(CURSOR_ID),
        position: Set(0),
        updated_at: Set(Utc::now().fixed_offset()),
    };
    RotationCursor::insert(row)
        .on_conflict(
            OnConflict::column(rotation_cursor::Column::Id)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(connection)
        .await?;
    Ok(())
}

fn to_coupon(model: coupon::Model) -> CouponRecord {
    CouponRecord {
        id: model.id,
        code: model.code,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

fn to_claim(model: claim::Model) -> ClaimRecord {
    ClaimRecord {
        id: model.id,
        user_id: model.user_id,
        coupon_id: model.coupon_id,
        coupon_code: model.coupon_code,
        ip_address: model.ip_address,
        claimed_at: model.claimed_at.with_timezone(&Utc),
    }
}

#[async_trait]
impl UserStore for DatabaseStore {
    async fn ensure_user(
        &self,
        user_id: &str,
        ip_address: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let model = user::ActiveModel {
            id: Set(user_id.to_string()),
            ip_address: Set(ip_address.to_string()),
            created_at: Set(now.fixed_offset()),
        };
        // A row inserted by a racing request is as good as ours
        User::insert(model)
            .on_conflict(OnConflict::column(user::Column::Id).do_nothing().to_owned())
            .exec_without_returning(&self.database)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CouponStore for DatabaseStore {
    /// Steps run inside one transaction holding the cursor row lock, so
    /// concurrent claims across every process queue on that row.
    async fn next_coupon(&self, now: DateTime<Utc>) -> Result<Option<CouponRecord>, StoreError> {
        let txn = self.database.begin().await?;
        // Held until commit or rollback: every other claim queues here
        let cursor = self.lock_cursor(&txn).await?;

        let count = Coupon::find().count(&txn).await?;
        if count == 0 {
            txn.rollback().await?;
            return Ok(None);
        }

        let position = u64::try_from(cursor.position).map_err(|_| {
            StoreError::Corrupt(format!("negative rotation cursor {}", cursor.position))
        })?;
        let index = position % count;

        let selected = Coupon::find()
            .order_by_asc(coupon::Column::Id)
            .offset(index)
            .limit(1)
            .one(&txn)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("no coupon at index {index} of {count}")))?;

        let next = (index + 1) % count;
        let next = i64::try_from(next)
            .map_err(|_| StoreError::Corrupt(format!("rotation cursor {next} overflows i64")))?;
        RotationCursor::update_many()
            .col_expr(rotation_cursor::Column::Position, Expr::value(next))
            .col_expr(rotation_cursor::Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(rotation_cursor::Column::Id.eq(CURSOR_ID))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(Some(to_coupon(selected)))
    }

    async fn create_coupon(&self, code: &str, now: DateTime<Utc>) -> Result<CouponRecord, StoreError> {
        let model = coupon::ActiveModel {
            id: NotSet,
            code: Set(code.to_string()),
            created_at: Set(now.fixed_offset()),
        };
        // An existing code makes the insert a no-op that returns no id
        let inserted = Coupon::insert(model)
            .on_conflict(OnConflict::column(coupon::Column::Code).do_nothing().to_owned())
            .exec(&self.database)
            .await;
        match inserted {
            Ok(result) => Ok(CouponRecord {
                id: result.last_insert_id,
                code: code.to_string(),
                created_at: now,
            }),
            Err(DbErr::RecordNotInserted) => Err(StoreError::DuplicateCoupon(code.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    async fn seed(&self, codes: &[String], now: DateTime<Utc>) -> Result<usize, StoreError> {
        let txn = self.database.begin().await?;
        insert_cursor_row(&txn).await?;

        let mut inserted = 0usize;
        for code in codes {
            let model = coupon::ActiveModel {
                id: NotSet,
                code: Set(code.clone()),
                created_at: Set(now.fixed_offset()),
            };
            let rows = Coupon::insert(model)
                .on_conflict(OnConflict::column(coupon::Column::Code).do_nothing().to_owned())
                .exec_without_returning(&txn)
                .await?;
            inserted += rows as usize;
        }

        txn.commit().await?;
        Ok(inserted)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(Coupon::find().count(&self.database).await?)
    }

    async fn cursor(&self) -> Result<u64, StoreError> {
        let position = RotationCursor::find_by_id(CURSOR_ID)
            .one(&self.database)
            .await?
            .map(|row| row.position)
            .unwrap_or(0);
        u64::try_from(position)
            .map_err(|_| StoreError::Corrupt(format!("negative rotation cursor {position}")))
    }
}

#[async_trait]
impl ClaimLedger for DatabaseStore {
    async fn record(&self, claim: NewClaim) -> Result<ClaimRecord, StoreError> {
        let model = claim::ActiveModel {
            id: NotSet,
            user_id: Set(claim.user_id),
            coupon_id: Set(claim.coupon_id),
            coupon_code: Set(claim.coupon_code),
            ip_address: Set(claim.ip_address),
            claimed_at: Set(claim.claimed_at.fixed_offset()),
        };
        let inserted = model.insert(&self.database).await?;
        Ok(to_claim(inserted))
    }

    async fn latest(&self, user_id: &str) -> Result<Option<ClaimRecord>, StoreError> {
        let latest = Claim::find()
            .filter(claim::Column::UserId.eq(user_id))
            .order_by_desc(claim::Column::ClaimedAt)
            .order_by_desc(claim::Column::Id)
            .one(&self.database)
            .await?;
        Ok(latest.map(to_claim))
    }

    async fn latest_for_ip(&self, ip_address: &str) -> Result<Option<ClaimRecord>, StoreError> {
        let latest = Claim::find()
            .filter(claim::Column::IpAddress.eq(ip_address))
            .order_by_desc(claim::Column::ClaimedAt)
            .order_by_desc(claim::Column::Id)
            .one(&self.database)
            .await?;
        Ok(latest.map(to_claim))
    }

    async fn history(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<String>, StoreError> {
        let codes = Claim::find()
            .select_only()
            .column(claim::Column::CouponCode)
            .filter(claim::Column::UserId.eq(user_id))
            .filter(claim::Column::ClaimedAt.gte(since.fixed_offset()))
            .order_by_desc(claim::Column::ClaimedAt)
            .order_by_desc(claim::Column::Id)
            .limit(limit)
            .into_tuple::<String>()
            .all(&self.database)
            .await?;
        Ok(codes)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::TimeZone;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult, Statement, Value};

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn cursor_row(position: i64) -> rotation_cursor::Model {
        rotation_cursor::Model {
            id: CURSOR_ID,
            position,
            updated_at: t0().fixed_offset(),
        }
    }

    fn coupon_row(id: i64, code: &str) -> coupon::Model {
        coupon::Model {
            id,
            code: code.to_string(),
            created_at: t0().fixed_offset(),
        }
    }

    fn count_row(count: i64) -> BTreeMap<&'static str, Value> {
        BTreeMap::from([("num_items", Value::BigInt(Some(count)))])
    }

    fn executed(store: DatabaseStore) -> Vec<Statement> {
        store
            .database
            .into_transaction_log()
            .iter()
            .flat_map(|txn| txn.statements().to_vec())
            .collect()
    }

    fn binds(statement: &Statement, value: &Value) -> bool {
        statement
            .values
            .as_ref()
            .is_some_and(|values| values.0.contains(value))
    }

    #[tokio::test]
    async fn empty_rotation_leaves_cursor_row_alone() {
        let database = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[cursor_row(5)]])
            .append_query_results([[count_row(0)]])
            .into_connection();
        let store = DatabaseStore::new(database);

        assert!(store.next_coupon(t0()).await.unwrap().is_none());

        let statements = executed(store);
        assert!(statements.iter().any(|s| s.sql.contains("FOR UPDATE")));
        assert!(!statements.iter().any(|s| s.sql.starts_with("UPDATE")));
    }

    #[tokio::test]
    async fn stale_cursor_is_normalized_before_select() {
        let database = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[cursor_row(12)]])
            .append_query_results([[count_row(5)]])
            .append_query_results([[coupon_row(3, "C")]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();
        let store = DatabaseStore::new(database);

        let coupon = store.next_coupon(t0()).await.unwrap().unwrap();
        assert_eq!(coupon.code, "C");
        assert_eq!(coupon.id, 3);

        let statements = executed(store);
        let select = statements
            .iter()
            .find(|s| s.sql.contains("OFFSET"))
            .expect("coupon select");
        assert!(binds(select, &Value::BigUnsigned(Some(2))));
        let update = statements
            .iter()
            .find(|s| s.sql.starts_with("UPDATE"))
            .expect("cursor update");
        assert!(update.sql.contains("rotation_cursor"));
        assert!(binds(update, &Value::BigInt(Some(3))));
    }

    #[tokio::test]
    async fn conflicting_code_is_duplicate() {
        let database = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[BTreeMap::from([("id", Value::BigInt(Some(4)))])]])
            .append_query_results([Vec::<BTreeMap<&str, Value>>::new()])
            .into_connection();
        let store = DatabaseStore::new(database);

        let created = store.create_coupon("NEWCUST25", t0()).await.unwrap();
        assert_eq!(created.id, 4);
        assert_eq!(created.code, "NEWCUST25");

        let err = store.create_coupon("NEWCUST25", t0()).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateCoupon(code) if code == "NEWCUST25"));

        let statements = executed(store);
        assert_eq!(statements.len(), 2);
        assert!(statements.iter().all(|s| s.sql.contains("ON CONFLICT")));
    }

    #[tokio::test]
    async fn history_filters_by_window_and_limit() {
        let since = t0() - chrono::Duration::days(7);
        let database = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[
                BTreeMap::from([("coupon_code", Value::from("C"))]),
                BTreeMap::from([("coupon_code", Value::from("B"))]),
            ]])
            .into_connection();
        let store = DatabaseStore::new(database);

        let codes = store.history("alice", since, 2).await.unwrap();
        assert_eq!(codes, ["C", "B"]);

        let statements = executed(store);
        let query = &statements[0];
        assert!(query.sql.contains(r#""claimed_at" >="#));
        assert!(query.sql.contains("LIMIT"));
        assert!(query.sql.contains("ORDER BY"));
        assert!(binds(query, &Value::from("alice")));
        assert!(binds(query, &Value::from(since.fixed_offset())));
        assert!(binds(query, &Value::BigUnsigned(Some(2))));
    }

    #[tokio::test]
    async fn racing_user_insert_is_success() {
        let database = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();
        let store = DatabaseStore::new(database);

        store.ensure_user("u1", "203.0.113.1", t0()).await.unwrap();
        let statements = executed(store);
        assert!(statements[0].sql.contains("ON CONFLICT"));
    }

    #[tokio::test]
    async fn cursor_reads_stored_position() {
        let database = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[cursor_row(7)]])
            .append_query_results([Vec::<rotation_cursor::Model>::new()])
            .into_connection();
        let store = DatabaseStore::new(database);

        assert_eq!(store.cursor().await.unwrap(), 7);
        assert_eq!(store.cursor().await.unwrap(), 0);
    }
}
