//! Read-only projections over the local order cache.

use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;

use crate::error::Result;
use crate::models::OrderStatus;

/// Quantities of one menu item across today's cached orders.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSummary {
    pub menu_configuration_id: Option<i64>,
    pub item_id: i64,
    pub item_name: String,
    pub total_qty: i64,
    pub completed_qty: i64,
}

/// Group order lines by `(menu_configuration_id, item_id)`.
///
/// `total_qty` counts every status, `completed_qty` only completed orders.
/// Groups come out in order of first occurrence.
pub fn compute_item_summary(conn: &Connection) -> Result<Vec<ItemSummary>> {
    let mut stmt = conn.prepare(
        "SELECT o.menu_configuration_id, oi.item_id, oi.item_name, oi.quantity, o.status
         FROM orders o
         JOIN order_items oi ON oi.order_id = o.id
         ORDER BY o.id, oi.id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, Option<i64>>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, OrderStatus>(4)?,
        ))
    })?;

    let mut summaries: Vec<ItemSummary> = Vec::new();
    let mut index: HashMap<(Option<i64>, i64), usize> = HashMap::new();
    for row in rows {
        let (menu_configuration_id, item_id, item_name, quantity, status) = row?;
        let slot = *index.entry((menu_configuration_id, item_id)).or_insert_with(|| {
            summaries.push(ItemSummary {
                menu_configuration_id,
                item_id,
                item_name: item_name.clone(),
                total_qty: 0,
                completed_qty: 0,
            });
            summaries.len() - 1
        });
        let entry = &mut summaries[slot];
        if entry.item_name.is_empty() {
            entry.item_name = item_name;
        }
        entry.total_qty += quantity;
        if status == OrderStatus::Completed {
            entry.completed_qty += quantity;
        }
    }
    Ok(summaries)
}

/// Order counts by status in the local cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalOrderCounts {
    pub total: i64,
    pub placed: i64,
    pub completed: i64,
    pub cancelled: i64,
}

pub fn local_order_counts(conn: &Connection) -> Result<LocalOrderCounts> {
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM orders GROUP BY status")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, OrderStatus>(0)?, row.get::<_, i64>(1)?)))?;
    let mut counts = LocalOrderCounts::default();
    for row in rows {
        let (status, n) = row?;
        match status {
            OrderStatus::Placed => counts.placed = n,
            OrderStatus::Completed => counts.completed = n,
            OrderStatus::Cancelled => counts.cancelled = n,
        }
        counts.total += n;
    }
    Ok(counts)
}
