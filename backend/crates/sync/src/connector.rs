use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::shopify::models::SourceOrder;
use crate::transform::DestinationRecord;
use mirra_common::error::MirraResult;

/// One page of an update-time ordered listing.
#[derive(Debug, Default)]
pub struct OrderPage {
    pub orders: Vec<SourceOrder>,
    /// Opaque position of the following page; `None` on the last page.
    pub next_cursor: Option<String>,
}

/// Upstream commerce platform. Errors are fatal to a run.
#[async_trait]
pub trait OrderSource: Send + Sync {
    /// Look up specific orders, e.g. previously failed ones. Order of the result is unspecified.
    async fn fetch_by_ids(&self, ids: &[String]) -> MirraResult<Vec<SourceOrder>>;

    /// Up to `first` orders updated at or after `checkpoint` (all orders when `None`),
    /// sorted by update time, continuing after the cursor of a previous page.
    async fn fetch_page(
        &self,
        checkpoint: Option<DateTime<Utc>>,
        ascending: bool,
        first: usize,
        after: Option<&str>,
    ) -> MirraResult<OrderPage>;

    /// Orders updated at or after `checkpoint` (all orders when `None`), sorted by
    /// update time, at most `limit` of them.
    async fn fetch_since(
        &self,
        checkpoint: Option<DateTime<Utc>>,
        ascending: bool,
        limit: usize,
    ) -> MirraResult<Vec<SourceOrder>> {
        let mut orders = Vec::new();
        let mut after: Option<String> = None;
        while orders.len() < limit {
            let page = self
                .fetch_page(checkpoint, ascending, limit - orders.len(), after.as_deref())
                .await?;
            let empty = page.orders.is_empty();
            orders.extend(page.orders);
            match page.next_cursor {
                Some(cursor) if !empty => after = Some(cursor),
                _ => break,
            }
        }
        orders.truncate(limit);
        Ok(orders)
    }

    /// Cheap authenticated call; returns a display name for the account.
    async fn check_connection(&self) -> MirraResult<String>;
}

/// Document store receiving the flattened records.
#[async_trait]
pub trait DestinationWriter: Send + Sync {
    /// Create a record and return its destination ID.
    async fn create(&self, record: &DestinationRecord) -> MirraResult<String>;

    /// Soft-delete a record.
    async fn archive(&self, destination_id: &str) -> MirraResult<()>;

    async fn update(&self, destination_id: &str, record: &DestinationRecord) -> MirraResult<()>;

    /// Returns the title of the target database.
    async fn check_connection(&self) -> MirraResult<String>;
}
