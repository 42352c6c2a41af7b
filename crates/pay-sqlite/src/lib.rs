//! # pay-sqlite
//!
//! Durable [`CartStore`] on SQLite.
//!
//! Status changes are a single conditional statement,
//! `UPDATE carts SET … WHERE id = ? AND payment_status = 'new'`, so two
//! racing completion signals cannot both observe `new`, even across
//! processes sharing the database file. Blocking calls run on tokio's
//! blocking pool.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use pay_core::{
    Cart, CartItem, CartStore, Currency, PaymentError, PaymentProvider, PaymentResult,
    PaymentStatus, StatusUpdate, TransitionOutcome,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS carts (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL,
        items TEXT NOT NULL,
        amount_total INTEGER NOT NULL,
        currency TEXT NOT NULL,
        payment_provider TEXT NOT NULL,
        payment_status TEXT NOT NULL DEFAULT 'new',
        provider_reference TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_carts_status ON carts(payment_status);
    CREATE INDEX IF NOT EXISTS idx_carts_created ON carts(created_at);";

const SELECT_CART: &str = "SELECT id, email, items, amount_total, currency, payment_provider,
        payment_status, provider_reference, created_at, updated_at
     FROM carts";

/// SQLite-backed cart store
#[derive(Clone)]
pub struct SqliteCartStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCartStore {
    /// Open (or create) the database file and apply the schema
    pub fn open(path: impl AsRef<Path>) -> PaymentResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(persistence)?;
        info!(path = %path.display(), "Opened cart database");
        Self::with_connection(conn)
    }

    /// Private in-memory database, mostly for tests
    pub fn in_memory() -> PaymentResult<Self> {
        Self::with_connection(Connection::open_in_memory().map_err(persistence)?)
    }

    fn with_connection(conn: Connection) -> PaymentResult<Self> {
        conn.execute_batch(SCHEMA).map_err(persistence)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, op: F) -> PaymentResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> PaymentResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            op(&guard)
        })
        .await
        .map_err(|e| PaymentError::Internal(format!("store task failed: {}", e)))?
    }
}

impl std::fmt::Debug for SqliteCartStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCartStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl CartStore for SqliteCartStore {
    async fn create(&self, cart: &Cart) -> PaymentResult<()> {
        let cart = cart.clone();
        self.run(move |conn| {
            let items = serde_json::to_string(&cart.items)
                .map_err(|e| PaymentError::Serialization(e.to_string()))?;
            let inserted = conn.execute(
                "INSERT INTO carts (id, email, items, amount_total, currency, payment_provider,
                    payment_status, provider_reference, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    cart.id,
                    cart.email,
                    items,
                    cart.amount_total,
                    cart.currency.as_str(),
                    cart.payment_provider.as_str(),
                    cart.payment_status.as_str(),
                    cart.provider_reference,
                    timestamp(&cart.created_at),
                    timestamp(&cart.updated_at),
                ],
            );
            match inserted {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(PaymentError::DuplicateCart {
                        cart_id: cart.id.clone(),
                    })
                }
                Err(e) => Err(persistence(e)),
            }
        })
        .await
    }

    async fn get(&self, cart_id: &str) -> PaymentResult<Cart> {
        let cart_id = cart_id.to_string();
        self.run(move |conn| load(conn, &cart_id)).await
    }

    async fn update_status(
        &self,
        cart_id: &str,
        update: &StatusUpdate,
    ) -> PaymentResult<TransitionOutcome> {
        let cart_id = cart_id.to_string();
        let update = update.clone();
        self.run(move |conn| {
            if !update.status.is_terminal() {
                return Err(PaymentError::Validation(format!(
                    "cart {} cannot be moved to status {}",
                    cart_id, update.status
                )));
            }

            let current = load(conn, &cart_id)?;
            if current.payment_provider != update.provider {
                return Err(PaymentError::Validation(format!(
                    "cart {} belongs to {}, not {}",
                    cart_id, current.payment_provider, update.provider
                )));
            }

            let changed = conn
                .execute(
                    "UPDATE carts
                     SET payment_status = ?1,
                         provider_reference = COALESCE(NULLIF(TRIM(?2), ''), provider_reference),
                         updated_at = ?3
                     WHERE id = ?4 AND payment_status = 'new' AND payment_provider = ?5",
                    params![
                        update.status.as_str(),
                        update.reference(),
                        timestamp(&Utc::now()),
                        cart_id,
                        update.provider.as_str(),
                    ],
                )
                .map_err(persistence)?;

            let cart = load(conn, &cart_id)?;
            if changed == 0 {
                debug!(cart_id = %cart_id, status = %cart.payment_status, "Conditional update skipped");
                return Ok(TransitionOutcome::Unchanged(cart));
            }
            Ok(TransitionOutcome::Applied {
                previous: current.payment_status,
                cart,
            })
        })
        .await
    }

    async fn list(&self) -> PaymentResult<Vec<Cart>> {
        self.run(|conn| {
            let mut stmt = conn
                .prepare(&format!("{} ORDER BY created_at DESC", SELECT_CART))
                .map_err(persistence)?;
            let rows = stmt
                .query_map([], CartRow::from_row)
                .map_err(persistence)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(persistence)?;
            rows.into_iter().map(CartRow::into_cart).collect()
        })
        .await
    }
}

/// Raw column values; decoded outside rusqlite's row callback
struct CartRow {
    id: String,
    email: String,
    items: String,
    amount_total: i64,
    currency: String,
    payment_provider: String,
    payment_status: String,
    provider_reference: Option<String>,
    created_at: String,
    updated_at: String,
}

impl CartRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            items: row.get(2)?,
            amount_total: row.get(3)?,
            currency: row.get(4)?,
            payment_provider: row.get(5)?,
            payment_status: row.get(6)?,
            provider_reference: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_cart(self) -> PaymentResult<Cart> {
        let items: Vec<CartItem> = serde_json::from_str(&self.items)
            .map_err(|e| PaymentError::Serialization(format!("cart {} items: {}", self.id, e)))?;
        Ok(Cart {
            email: self.email,
            items,
            amount_total: self.amount_total,
            currency: self.currency.parse::<Currency>().map_err(corrupt)?,
            payment_provider: self
                .payment_provider
                .parse::<PaymentProvider>()
                .map_err(corrupt)?,
            payment_status: self
                .payment_status
                .parse::<PaymentStatus>()
                .map_err(corrupt)?,
            provider_reference: self.provider_reference,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            id: self.id,
        })
    }
}

fn load(conn: &Connection, cart_id: &str) -> PaymentResult<Cart> {
    conn.query_row(
        &format!("{} WHERE id = ?1", SELECT_CART),
        params![cart_id],
        CartRow::from_row,
    )
    .optional()
    .map_err(persistence)?
    .ok_or_else(|| PaymentError::CartNotFound {
        cart_id: cart_id.to_string(),
    })?
    .into_cart()
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> PaymentResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PaymentError::Serialization(format!("bad timestamp {}: {}", raw, e)))
}

fn persistence(e: rusqlite::Error) -> PaymentError {
    PaymentError::Persistence(e.to_string())
}

fn corrupt(message: String) -> PaymentError {
    PaymentError::Serialization(message)
}
