use futures::stream::{BoxStream, StreamExt};
use sqlx::SqlitePool;

use crate::errors::{DomainError, DomainResult};

use super::types::Customer;

/// Fixed extraction query. No ORDER BY: rows arrive in store order.
pub const SELECT_CUSTOMERS: &str = "SELECT customer_id, name, email, mobile_number, created_at, created_by, updated_at, updated_by FROM customer";

/// Forward-only stream of customers; not restartable.
pub type CustomerStream<'a> = BoxStream<'a, DomainResult<Customer>>;

/// Source of customer records for one export run.
pub trait CustomerSource: Send + Sync {
    /// Opens a cursor over the customer table. Each call reads a fresh snapshot.
    fn stream_customers(&self) -> CustomerStream<'_>;
}

/// Cursor-backed reader over the customer table.
pub struct SqliteCustomerRepository {
    pool: SqlitePool,
}

impl SqliteCustomerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl CustomerSource for SqliteCustomerRepository {
    fn stream_customers(&self) -> CustomerStream<'_> {
        sqlx::query(SELECT_CUSTOMERS)
            .fetch(&self.pool)
            .map(|row| {
                row.map_err(DomainError::from)
                    .and_then(|row| Customer::from_row(&row))
            })
            .boxed()
    }
}
