//! PostgreSQL [`IncomeStore`] backend.
//!
//! Each shard owns a destination table `{shard_table_prefix}{i}` and a staging
//! table `{staging_table_prefix}{i}`; consolidation writes into one shared table.
//! Table names come from configuration, so every identifier is validated before
//! it is interpolated into SQL. Every transaction sets a local statement timeout.

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, Postgres};
use sqlx::{PgPool, QueryBuilder, Transaction};
use std::time::Duration;
use tracing::{debug, info};

use super::IncomeStore;
use crate::config::DatabaseConfig;
use crate::error::{StoreError, StoreResult};
use crate::models::{RunKey, ShardIndex, ShardLayout, StagedRecord};

const RECORD_COLUMNS: &str = "client_no, asset_acc, ta_client, prd_code, real_prd_code, reg_date, \
     allot_amt, redeem_amt, div_income, redeem_income, force_add_amt, create_time, update_time";

const BINDS_PER_RECORD: usize = 13;

/// Postgres caps bind parameters per statement at 65535
const MAX_ROWS_PER_STATEMENT: usize = 65_535 / BINDS_PER_RECORD;

const MAX_IDENTIFIER_LEN: usize = 63;

/// Validated physical table names
#[derive(Debug, Clone)]
pub struct TableNames {
    shard_prefix: String,
    staging_prefix: String,
    consolidated: String,
}

impl TableNames {
    pub fn from_config(config: &DatabaseConfig, layout: ShardLayout) -> StoreResult<Self> {
        // Validate the widest suffix once so per-call formatting cannot fail
        let widest = layout.shard_count().saturating_sub(1);
        validate_identifier(&format!("{}{widest}", config.shard_table_prefix))?;
        validate_identifier(&format!("{}{widest}", config.staging_table_prefix))?;
        Ok(Self {
            shard_prefix: config.shard_table_prefix.clone(),
            staging_prefix: config.staging_table_prefix.clone(),
            consolidated: validate_identifier(&config.consolidated_table)?,
        })
    }

    pub fn destination(&self, shard: ShardIndex) -> String {
        format!("{}{shard}", self.shard_prefix)
    }

    pub fn staging(&self, shard: ShardIndex) -> String {
        format!("{}{shard}", self.staging_prefix)
    }

    pub fn consolidated(&self) -> &str {
        &self.consolidated
    }
}

/// Reject anything but a plain lower-case SQL identifier
pub fn validate_identifier(name: &str) -> StoreResult<String> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid_start && valid_rest && name.len() <= MAX_IDENTIFIER_LEN {
        Ok(name.to_string())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// sqlx-backed store over a shared connection pool
#[derive(Debug, Clone)]
pub struct PgIncomeStore {
    pool: PgPool,
    layout: ShardLayout,
    tables: TableNames,
    statement_timeout: Duration,
}

impl PgIncomeStore {
    pub fn new(
        pool: PgPool,
        layout: ShardLayout,
        tables: TableNames,
        statement_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            layout,
            tables,
            statement_timeout,
        }
    }

    /// Open a pool sized from configuration
    pub async fn connect(
        config: &DatabaseConfig,
        layout: ShardLayout,
        statement_timeout: Duration,
    ) -> StoreResult<Self> {
        let tables = TableNames::from_config(config, layout)?;
        let database_url = config
            .database_url()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&database_url)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            shard_count = layout.shard_count(),
            consolidated_table = %tables.consolidated(),
            "🗄️ DATABASE: Income store pool initialized"
        );

        Ok(Self::new(pool, layout, tables, statement_timeout))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn check_shard(&self, shard: ShardIndex) -> StoreResult<()> {
        if self.layout.contains(shard) {
            Ok(())
        } else {
            Err(StoreError::InvalidIdentifier(format!("shard {shard}")))
        }
    }
}

fn push_record_values(builder: &mut QueryBuilder<'_, Postgres>, records: &[StagedRecord]) {
    builder.push_values(records, |mut row, record| {
        row.push_bind(record.client_id.clone())
            .push_bind(record.account_id.clone())
            .push_bind(record.counterparty_id.clone())
            .push_bind(record.product_code.clone())
            .push_bind(record.real_product_code.clone())
            .push_bind(record.run_key)
            .push_bind(record.allot_amount.clone())
            .push_bind(record.redeem_amount.clone())
            .push_bind(record.dividend_income.clone())
            .push_bind(record.redeem_income.clone())
            .push_bind(record.force_add_amount.clone())
            .push_bind(record.created_at)
            .push_bind(record.updated_at);
    });
}

#[async_trait]
impl IncomeStore for PgIncomeStore {
    type Tx = Transaction<'static, Postgres>;

    fn shard_table_name(&self, shard: ShardIndex) -> String {
        self.tables.destination(shard)
    }

    async fn begin(&self) -> StoreResult<Self::Tx> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::database("begin", e))?;
        let timeout_ms = self.statement_timeout.as_millis();
        sqlx::query(&format!("SET LOCAL statement_timeout = {timeout_ms}"))
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::database("set_statement_timeout", e))?;
        Ok(tx)
    }

    async fn commit(&self, tx: Self::Tx) -> StoreResult<()> {
        tx.commit()
            .await
            .map_err(|e| StoreError::database("commit", e))
    }

    async fn rollback(&self, tx: Self::Tx) -> StoreResult<()> {
        tx.rollback()
            .await
            .map_err(|e| StoreError::database("rollback", e))
    }

    async fn truncate_staging(&self, tx: &mut Self::Tx, shard: ShardIndex) -> StoreResult<u64> {
        self.check_shard(shard)?;
        let sql = format!("DELETE FROM {}", self.tables.staging(shard));
        let result = sqlx::query(&sql)
            .execute(&mut **tx)
            .await
            .map_err(|e| StoreError::database("truncate_staging", e))?;
        Ok(result.rows_affected())
    }

    async fn insert_staging(
        &self,
        tx: &mut Self::Tx,
        shard: ShardIndex,
        records: &[StagedRecord],
    ) -> StoreResult<u64> {
        self.check_shard(shard)?;
        let table = self.tables.staging(shard);
        let mut inserted = 0;
        for chunk in records.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut builder =
                QueryBuilder::<Postgres>::new(format!("INSERT INTO {table} ({RECORD_COLUMNS}) "));
            push_record_values(&mut builder, chunk);
            let result = builder
                .build()
                .execute(&mut **tx)
                .await
                .map_err(|e| StoreError::database("insert_staging", e))?;
            inserted += result.rows_affected();
        }
        debug!(shard = shard.value(), rows = inserted, "Staged records");
        Ok(inserted)
    }

    async fn delete_by_run_key(
        &self,
        tx: &mut Self::Tx,
        shard: ShardIndex,
        run_key: RunKey,
    ) -> StoreResult<u64> {
        self.check_shard(shard)?;
        let sql = format!(
            "DELETE FROM {} WHERE reg_date = $1",
            self.tables.destination(shard)
        );
        let result = sqlx::query(&sql)
            .bind(run_key)
            .execute(&mut **tx)
            .await
            .map_err(|e| StoreError::database("delete_by_run_key", e))?;
        Ok(result.rows_affected())
    }

    async fn promote_staging(
        &self,
        tx: &mut Self::Tx,
        shard: ShardIndex,
        run_key: RunKey,
    ) -> StoreResult<u64> {
        self.check_shard(shard)?;
        let sql = format!(
            "INSERT INTO {dest} ({RECORD_COLUMNS}) SELECT {RECORD_COLUMNS} FROM {staging} \
             WHERE reg_date = $1",
            dest = self.tables.destination(shard),
            staging = self.tables.staging(shard),
        );
        let result = sqlx::query(&sql)
            .bind(run_key)
            .execute(&mut **tx)
            .await
            .map_err(|e| StoreError::database("promote_staging", e))?;
        Ok(result.rows_affected())
    }

    async fn count_pending(
        &self,
        tx: &mut Self::Tx,
        shard: ShardIndex,
        run_key: RunKey,
    ) -> StoreResult<u64> {
        self.check_shard(shard)?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE reg_date = $1",
            self.tables.destination(shard)
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(run_key)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| StoreError::database("count_pending", e))?;
        Ok(count.max(0) as u64)
    }

    async fn select_page(
        &self,
        tx: &mut Self::Tx,
        shard: ShardIndex,
        run_key: RunKey,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<StagedRecord>> {
        self.check_shard(shard)?;
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {} WHERE reg_date = $1 \
             ORDER BY client_no, prd_code LIMIT $2 OFFSET $3",
            self.tables.destination(shard)
        );
        sqlx::query_as::<_, StagedRecord>(&sql)
            .bind(run_key)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| StoreError::database("select_page", e))
    }

    async fn insert_consolidated(
        &self,
        tx: &mut Self::Tx,
        rows: &[StagedRecord],
    ) -> StoreResult<u64> {
        let table = self.tables.consolidated();
        let mut affected = 0;
        for chunk in rows.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut builder =
                QueryBuilder::<Postgres>::new(format!("INSERT INTO {table} ({RECORD_COLUMNS}) "));
            push_record_values(&mut builder, chunk);
            builder.push(
                " ON CONFLICT (client_no, prd_code, reg_date) DO UPDATE SET \
                 asset_acc = EXCLUDED.asset_acc, \
                 ta_client = EXCLUDED.ta_client, \
                 real_prd_code = EXCLUDED.real_prd_code, \
                 allot_amt = EXCLUDED.allot_amt, \
                 redeem_amt = EXCLUDED.redeem_amt, \
                 div_income = EXCLUDED.div_income, \
                 redeem_income = EXCLUDED.redeem_income, \
                 force_add_amt = EXCLUDED.force_add_amt, \
                 update_time = EXCLUDED.update_time",
            );
            let result = builder
                .build()
                .execute(&mut **tx)
                .await
                .map_err(|e| StoreError::database("insert_consolidated", e))?;
            affected += result.rows_affected();
        }
        Ok(affected)
    }

    async fn delete_consolidated(&self, tx: &mut Self::Tx, run_key: RunKey) -> StoreResult<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE reg_date = $1",
            self.tables.consolidated()
        );
        let result = sqlx::query(&sql)
            .bind(run_key)
            .execute(&mut **tx)
            .await
            .map_err(|e| StoreError::database("delete_consolidated", e))?;
        Ok(result.rows_affected())
    }

    async fn count_consolidated(&self, tx: &mut Self::Tx, run_key: RunKey) -> StoreResult<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE reg_date = $1",
            self.tables.consolidated()
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(run_key)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| StoreError::database("count_consolidated", e))?;
        Ok(count.max(0) as u64)
    }
}
