//! Local store access for pre-paid orders (`orders` / `order_items`).
//!
//! Helpers take a `&Connection` so callers can compose them inside one
//! transaction (`Connection::unchecked_transaction` derefs to a connection).

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use tracing::debug;

use crate::error::Result;
use crate::models::{Order, OrderItem, OrderStatus, OrderWithItems, RemoteOrder};

const ORDER_COLUMNS: &str = "id, order_id, user_id, total_amount, status, canteen_id,
     menu_configuration_id, created_by_id, updated_by_id, qr_code, created_at, updated_at";

const ITEM_COLUMNS: &str =
    "id, order_id, item_id, quantity, price, total, item_name, created_at, updated_at";

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn order_from_row(row: &Row<'_>) -> rusqlite::Result<Order> {
    Ok(Order {
        id: row.get(0)?,
        order_id: row.get(1)?,
        user_id: row.get(2)?,
        total_amount: row.get(3)?,
        status: row.get(4)?,
        canteen_id: row.get(5)?,
        menu_configuration_id: row.get(6)?,
        created_by_id: row.get(7)?,
        updated_by_id: row.get(8)?,
        qr_code: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<OrderItem> {
    Ok(OrderItem {
        id: row.get(0)?,
        order_id: row.get(1)?,
        item_id: row.get(2)?,
        quantity: row.get(3)?,
        price: row.get(4)?,
        total: row.get(5)?,
        item_name: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Snapshot of every order primary key currently cached.
pub fn existing_order_ids(conn: &Connection) -> Result<HashSet<i64>> {
    let mut stmt = conn.prepare("SELECT id FROM orders")?;
    let ids = stmt
        .query_map([], |row| row.get::<_, i64>(0))?
        .collect::<rusqlite::Result<HashSet<_>>>()?;
    Ok(ids)
}

pub fn get_order(conn: &Connection, id: i64) -> Result<Option<Order>> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1");
    let order = conn
        .query_row(&sql, params![id], order_from_row)
        .optional()?;
    Ok(order)
}

pub fn get_order_items(conn: &Connection, order_id: i64) -> Result<Vec<OrderItem>> {
    let sql = format!("SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = ?1 ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(params![order_id], item_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(items)
}

/// An order and its line items, if the order is cached.
pub fn find_order_with_items(conn: &Connection, id: i64) -> Result<Option<OrderWithItems>> {
    let Some(order) = get_order(conn, id)? else {
        return Ok(None);
    };
    let items = get_order_items(conn, id)?;
    Ok(Some(OrderWithItems { order, items }))
}

/// Resolve a scanned QR payload to an order id.
pub fn find_order_id_by_qr(conn: &Connection, qr_code: &str) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT id FROM orders WHERE qr_code = ?1 ORDER BY id LIMIT 1",
            params![qr_code],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

pub fn list_orders(conn: &Connection, status: Option<OrderStatus>) -> Result<Vec<Order>> {
    let mut orders = Vec::new();
    match status {
        Some(status) => {
            let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE status = ?1 ORDER BY id");
            let mut stmt = conn.prepare(&sql)?;
            for order in stmt.query_map(params![status], order_from_row)? {
                orders.push(order?);
            }
        }
        None => {
            let sql = format!("SELECT {ORDER_COLUMNS} FROM orders ORDER BY id");
            let mut stmt = conn.prepare(&sql)?;
            for order in stmt.query_map([], order_from_row)? {
                orders.push(order?);
            }
        }
    }
    Ok(orders)
}

/// Ids of orders completed at this counter and awaiting push-back. Orders
/// the server already reported as completed carry no `completed_at`.
pub fn completed_order_ids(conn: &Connection) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM orders WHERE status = 'completed' AND completed_at IS NOT NULL ORDER BY id",
    )?;
    let ids = stmt
        .query_map([], |row| row.get::<_, i64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// Insert a pulled order, then each of its items (parent before children).
pub fn insert_order_with_items(conn: &Connection, order: &RemoteOrder, status: OrderStatus) -> Result<()> {
    conn.execute(
        "INSERT INTO orders (
            id, order_id, user_id, total_amount, status, canteen_id, menu_configuration_id,
            created_by_id, updated_by_id, qr_code, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            order.id,
            order.display_order_id(),
            order.user_id,
            order.total_amount,
            status,
            order.canteen_id,
            order.menu_configuration_id,
            order.created_by_id,
            order.updated_by_id,
            order.qr_code,
            order.created_at,
            order.updated_at,
        ],
    )?;
    insert_items(conn, order)?;
    debug!(order_id = order.id, items = order.order_items.len(), "order cached");
    Ok(())
}

/// Replace a cached order's header and items in place with the pulled copy.
pub fn replace_order_with_items(conn: &Connection, order: &RemoteOrder, status: OrderStatus) -> Result<()> {
    conn.execute(
        "UPDATE orders SET
            order_id = ?2, user_id = ?3, total_amount = ?4, status = ?5, canteen_id = ?6,
            menu_configuration_id = ?7, created_by_id = ?8, updated_by_id = ?9, qr_code = ?10,
            created_at = ?11, updated_at = ?12
         WHERE id = ?1",
        params![
            order.id,
            order.display_order_id(),
            order.user_id,
            order.total_amount,
            status,
            order.canteen_id,
            order.menu_configuration_id,
            order.created_by_id,
            order.updated_by_id,
            order.qr_code,
            order.created_at,
            order.updated_at,
        ],
    )?;
    conn.execute("DELETE FROM order_items WHERE order_id = ?1", params![order.id])?;
    insert_items(conn, order)?;
    debug!(order_id = order.id, "order refreshed in place");
    Ok(())
}

fn insert_items(conn: &Connection, order: &RemoteOrder) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT OR REPLACE INTO order_items (
            id, order_id, item_id, quantity, price, total, created_by_id, updated_by_id,
            item_name, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )?;
    for item in &order.order_items {
        // Items are always filed under the order being written, whatever
        // their own parent reference says.
        stmt.execute(params![
            item.id,
            order.id,
            item.item_id,
            item.quantity,
            item.price,
            item.total,
            item.created_by_id,
            item.updated_by_id,
            item.item_name(),
            item.created_at,
            item.updated_at,
        ])?;
    }
    Ok(())
}

/// Flip a `placed` order to `completed`. Returns `false` when the order is
/// missing or no longer `placed`, leaving it untouched.
pub fn mark_completed(conn: &Connection, id: i64) -> Result<bool> {
    let now = now_rfc3339();
    let changed = conn.execute(
        "UPDATE orders SET status = 'completed', completed_at = ?2, updated_at = ?2
         WHERE id = ?1 AND status = 'placed'",
        params![id, now],
    )?;
    Ok(changed == 1)
}

/// Delete the given orders (and, by cascade, their items), restricted to
/// rows that are still `completed`.
pub fn delete_completed_orders(conn: &Connection, ids: &[i64]) -> Result<usize> {
    let mut stmt = conn.prepare("DELETE FROM orders WHERE id = ?1 AND status = 'completed'")?;
    let mut deleted = 0;
    for id in ids {
        deleted += stmt.execute(params![id])?;
    }
    Ok(deleted)
}
