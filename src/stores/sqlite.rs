use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::BTreeMap;
use std::str::FromStr;

use super::{
    duration_millis, hours_ago_millis, millis_to_datetime, now_millis, NewOrder, Order, StateStore, StatusEntry,
    StoreError, StoreOptions, Table,
};
use crate::OrderStatus;

/// SQLite-backed state store.
///
/// Every operation checks a connection out of the pool for its own duration; the
/// composite operations each run inside one transaction.
pub struct SqliteStateStore {
    pool: SqlitePool,
    options: StoreOptions,
}

impl SqliteStateStore {
    /// Connect to a SQLite database.
    ///
    /// # Arguments
    /// * `database_url` - SQLite connection string (e.g., "sqlite:orders.db" or "sqlite::memory:")
    /// * `options` - Store options (stuck threshold)
    ///
    /// File databases are created if missing. Tables are not created here; call the
    /// `create_*_table` operations (the service does this on startup).
    ///
    /// # Errors
    ///
    /// Returns a retryable error if the database cannot be opened.
    pub async fn new(database_url: &str, options: StoreOptions) -> Result<Self, StoreError> {
        let is_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let connect = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::permanent("connect", format!("invalid database url '{database_url}': {e}")))?
            .create_if_missing(true);

        let mut pool_options = SqlitePoolOptions::new().max_connections(5);
        if is_memory {
            // one long-lived connection: the database disappears with its last connection,
            // and shared-cache table locks do not honor busy_timeout
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    if is_memory {
                        sqlx::query("PRAGMA journal_mode = MEMORY").execute(&mut *conn).await?;
                        sqlx::query("PRAGMA synchronous = OFF").execute(&mut *conn).await?;
                    } else {
                        sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                        sqlx::query("PRAGMA synchronous = NORMAL").execute(&mut *conn).await?;
                    }
                    // wait on locks held by the other loop instead of failing fast
                    sqlx::query("PRAGMA busy_timeout = 60000").execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .connect_with(connect)
            .await
            .map_err(|e| StoreError::from_sqlx("connect", e))?;

        tracing::debug!(target: "orderflow::stores", url = %database_url, "Opened SQLite state store");
        Ok(Self { pool, options })
    }

    /// Private in-memory database, shared by the pool's connections.
    pub async fn new_in_memory(options: StoreOptions) -> Result<Self, StoreError> {
        Self::new("sqlite::memory:", options).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn order_from_row(operation: &str, row: &SqliteRow) -> Result<Order, StoreError> {
        let order_id: String = row.try_get("order_id").map_err(|e| StoreError::from_sqlx(operation, e))?;
        let label: String = row.try_get("status").map_err(|e| StoreError::from_sqlx(operation, e))?;
        let details: String = row
            .try_get("order_details")
            .map_err(|e| StoreError::from_sqlx(operation, e))?;
        let created_at: i64 = row.try_get("created_at").map_err(|e| StoreError::from_sqlx(operation, e))?;
        let updated_at: i64 = row.try_get("updated_at").map_err(|e| StoreError::from_sqlx(operation, e))?;

        Ok(Order {
            customer_id: row
                .try_get("customer_id")
                .map_err(|e| StoreError::from_sqlx(operation, e))?,
            status: parse_status(operation, &order_id, &label)?,
            order_details: serde_json::from_str(&details).map_err(|e| {
                StoreError::permanent(operation, format!("Corrupt order_details for '{order_id}': {e}"))
            })?,
            created_at: millis_to_datetime(created_at),
            updated_at: millis_to_datetime(updated_at),
            order_id,
        })
    }

    fn entry_from_row(operation: &str, row: &SqliteRow) -> Result<(String, StatusEntry), StoreError> {
        let order_id: String = row.try_get("order_id").map_err(|e| StoreError::from_sqlx(operation, e))?;
        let label: String = row.try_get("status").map_err(|e| StoreError::from_sqlx(operation, e))?;
        let first_seen_at: i64 = row
            .try_get("first_seen_at")
            .map_err(|e| StoreError::from_sqlx(operation, e))?;
        let updated_at: i64 = row.try_get("updated_at").map_err(|e| StoreError::from_sqlx(operation, e))?;
        let entry = StatusEntry {
            status: parse_status(operation, &order_id, &label)?,
            first_seen_at: millis_to_datetime(first_seen_at),
            updated_at: millis_to_datetime(updated_at),
        };
        Ok((order_id, entry))
    }
}

fn parse_status(operation: &str, order_id: &str, label: &str) -> Result<OrderStatus, StoreError> {
    label
        .parse()
        .map_err(|e: String| StoreError::permanent(operation, format!("Corrupt status for '{order_id}': {e}")))
}

const UPSERT_STATUS: &str = r#"
    INSERT INTO status_events (order_id, status, first_seen_at, updated_at)
    VALUES (?, ?, ?, ?)
    ON CONFLICT(order_id) DO UPDATE SET status = excluded.status, updated_at = excluded.updated_at
"#;

const ORDER_COLUMNS: &str = "order_id, customer_id, order_details, status, created_at, updated_at";

/// Rows of `orders` that carry customer `?1` or are linked to it in `customers`.
const BELONGS_TO_CUSTOMER: &str =
    "(customer_id = ?1 OR order_id IN (SELECT order_id FROM customers WHERE customer_id = ?1))";

#[async_trait::async_trait]
impl StateStore for SqliteStateStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_order_table(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                order_id TEXT PRIMARY KEY,
                customer_id TEXT,
                order_details TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx("create_order_table", e))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_customer ON orders(customer_id)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx("create_order_table", e))?;
        Ok(())
    }

    async fn create_customer_table(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS customers (
                customer_id TEXT NOT NULL,
                order_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (customer_id, order_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx("create_customer_table", e))?;
        Ok(())
    }

    async fn create_status_table(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS status_events (
                order_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                first_seen_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx("create_status_table", e))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_status_events_first_seen ON status_events(first_seen_at)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx("create_status_table", e))?;
        Ok(())
    }

    async fn delete_past_timestamp(&self, table: Table, field: &str, hours: u64) -> Result<u64, StoreError> {
        // field is checked against a fixed column list before it reaches the SQL text
        table.check_timestamp_field(field)?;
        let sql = format!("DELETE FROM {} WHERE {field} < ?", table.name());
        let result = sqlx::query(&sql)
            .bind(hours_ago_millis(hours))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx("delete_past_timestamp", e))?;
        Ok(result.rows_affected())
    }

    async fn get_order_id(&self, order_id: &str) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = ?"))
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx("get_order_id", e))?;
        row.map(|r| Self::order_from_row("get_order_id", &r)).transpose()
    }

    async fn get_order_for_customer(&self, order_id: &str, customer_id: &str) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE {BELONGS_TO_CUSTOMER} AND order_id = ?2"
        ))
        .bind(customer_id)
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx("get_order_for_customer", e))?;
        row.map(|r| Self::order_from_row("get_order_for_customer", &r)).transpose()
    }

    async fn get_orders(&self, customer_id: &str) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE {BELONGS_TO_CUSTOMER} ORDER BY created_at, order_id"
        ))
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx("get_orders", e))?;
        rows.iter().map(|r| Self::order_from_row("get_orders", r)).collect()
    }

    async fn add_order(&self, order: NewOrder) -> Result<(), StoreError> {
        let now = now_millis();
        let details = serde_json::to_string(&order.order_details)
            .map_err(|e| StoreError::permanent("add_order", format!("Unserializable order_details: {e}")))?;
        sqlx::query(&format!("INSERT INTO orders ({ORDER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)"))
            .bind(&order.order_id)
            .bind(order.customer_id.as_deref())
            .bind(details)
            .bind(order.status.as_str())
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx("add_order", e))?;
        Ok(())
    }

    async fn update_customer(&self, order_id: &str, customer_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE orders SET customer_id = ?, updated_at = ? WHERE order_id = ?")
            .bind(customer_id)
            .bind(now_millis())
            .bind(order_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx("update_customer", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_customer(&self, order_id: &str, customer_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("INSERT OR IGNORE INTO customers (customer_id, order_id, created_at) VALUES (?, ?, ?)")
            .bind(customer_id)
            .bind(order_id)
            .bind(now_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx("add_customer", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_order_status(&self, order_id: &str, status: OrderStatus) -> Result<(), StoreError> {
        sqlx::query("UPDATE orders SET status = ?, updated_at = ? WHERE order_id = ?")
            .bind(status.as_str())
            .bind(now_millis())
            .bind(order_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx("update_order_status", e))?;
        Ok(())
    }

    async fn upsert_status(&self, order_id: &str, status: OrderStatus) -> Result<(), StoreError> {
        let now = now_millis();
        sqlx::query(UPSERT_STATUS)
            .bind(order_id)
            .bind(status.as_str())
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx("upsert_status", e))?;
        Ok(())
    }

    async fn delete_stuck_status(&self, order_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM status_events WHERE order_id = ?")
            .bind(order_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx("delete_stuck_status", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn check_status_stuck(&self) -> Result<BTreeMap<String, StatusEntry>, StoreError> {
        let cutoff = now_millis().saturating_sub(duration_millis(self.options.stuck_after));
        let rows = sqlx::query(
            "SELECT order_id, status, first_seen_at, updated_at FROM status_events WHERE first_seen_at <= ?",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx("check_status_stuck", e))?;
        rows.iter()
            .map(|r| Self::entry_from_row("check_status_stuck", r))
            .collect()
    }

    async fn get_status_entry(&self, order_id: &str) -> Result<Option<StatusEntry>, StoreError> {
        let row = sqlx::query("SELECT order_id, status, first_seen_at, updated_at FROM status_events WHERE order_id = ?")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx("get_status_entry", e))?;
        row.map(|r| Self::entry_from_row("get_status_entry", &r).map(|(_, entry)| entry))
            .transpose()
    }

    async fn apply_status_transition(&self, order_id: &str, status: OrderStatus) -> Result<bool, StoreError> {
        const OP: &str = "apply_status_transition";
        let now = now_millis();
        let mut tx = self.pool.begin().await.map_err(|e| StoreError::from_sqlx(OP, e))?;

        let updated = sqlx::query("UPDATE orders SET status = ?, updated_at = ? WHERE order_id = ?")
            .bind(status.as_str())
            .bind(now)
            .bind(order_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::from_sqlx(OP, e))?
            .rows_affected();

        if updated == 0 {
            tx.rollback().await.map_err(|e| StoreError::from_sqlx(OP, e))?;
            return Ok(false);
        }

        if status.is_terminal() {
            sqlx::query("DELETE FROM status_events WHERE order_id = ?")
                .bind(order_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::from_sqlx(OP, e))?;
        } else {
            sqlx::query(UPSERT_STATUS)
                .bind(order_id)
                .bind(status.as_str())
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::from_sqlx(OP, e))?;
        }

        tx.commit().await.map_err(|e| StoreError::from_sqlx(OP, e))?;
        Ok(true)
    }

    async fn mark_stuck_if_present(
        &self,
        order_id: &str,
        observed_first_seen_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        const OP: &str = "mark_stuck_if_present";
        let mut tx = self.pool.begin().await.map_err(|e| StoreError::from_sqlx(OP, e))?;

        let deleted = sqlx::query("DELETE FROM status_events WHERE order_id = ? AND first_seen_at = ?")
            .bind(order_id)
            .bind(observed_first_seen_at.timestamp_millis())
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::from_sqlx(OP, e))?
            .rows_affected();

        if deleted == 0 {
            tx.rollback().await.map_err(|e| StoreError::from_sqlx(OP, e))?;
            return Ok(false);
        }

        // the orders row may already be gone to retention; the orphaned entry goes with it
        let updated = sqlx::query("UPDATE orders SET status = ?, updated_at = ? WHERE order_id = ?")
            .bind(OrderStatus::Stuck.as_str())
            .bind(now_millis())
            .bind(order_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::from_sqlx(OP, e))?
            .rows_affected();

        tx.commit().await.map_err(|e| StoreError::from_sqlx(OP, e))?;
        Ok(updated > 0)
    }
}
