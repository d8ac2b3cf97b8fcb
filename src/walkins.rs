//! Walk-in (counter) sales.
//!
//! A walk-in is rung up from the cached menu, printed, and completed locally
//! with no server round trip. Completed walk-ins are pushed back in batches
//! by the sync reconciler and deleted once acknowledged.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::completion::CompletionReceipt;
use crate::db::DbState;
use crate::error::{PosError, Result};
use crate::menu;
use crate::models::{MenuItem, OrderStatus, Walkin, WalkinItem, WalkinWithItems};
use crate::orders::now_rfc3339;
use crate::print::ReceiptPrinter;
use crate::receipt_renderer::{LayoutConfig, ReceiptDocument, RenderedReceipt, WalkinReceiptDoc};

const CONTACT_NUMBER_LEN: usize = 10;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WalkinLine {
    /// Catalog item id on the cached menu.
    pub item_id: i64,
    pub quantity: i64,
}

/// Counter order as entered by the operator.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WalkinDraft {
    pub contact_number: String,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub number_of_people: Option<i64>,
    #[serde(default)]
    pub table_number: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub lines: Vec<WalkinLine>,
}

pub fn validate_contact_number(raw: &str) -> Result<&str> {
    let trimmed = raw.trim();
    if trimmed.len() == CONTACT_NUMBER_LEN && trimmed.chars().all(|c| c.is_ascii_digit()) {
        Ok(trimmed)
    } else {
        Err(PosError::Validation(
            "Please enter a valid 10-digit mobile number".to_string(),
        ))
    }
}

struct PricedLine<'a> {
    item: &'a MenuItem,
    quantity: i64,
}

/// Price each line from the menu cache, clamping quantities to the item's
/// allowed range.
fn price_lines<'a>(lines: &[WalkinLine], menu_items: &'a [MenuItem]) -> Result<Vec<PricedLine<'a>>> {
    if lines.is_empty() {
        return Err(PosError::Validation(
            "Select at least one item".to_string(),
        ));
    }
    lines
        .iter()
        .map(|line| {
            let item = menu_items
                .iter()
                .find(|item| item.item_id == line.item_id)
                .ok_or_else(|| {
                    PosError::Validation(format!("Item {} is not on the current menu", line.item_id))
                })?;
            Ok(PricedLine {
                item,
                quantity: item.clamp_quantity(line.quantity),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Store access
// ---------------------------------------------------------------------------

/// Insert a walk-in as `placed` together with its items. Returns its id.
pub fn insert_walkin(conn: &Connection, draft: &WalkinDraft, menu_items: &[MenuItem]) -> Result<i64> {
    let contact = validate_contact_number(&draft.contact_number)?;
    let priced = price_lines(&draft.lines, menu_items)?;
    let total: f64 = priced
        .iter()
        .map(|line| line.item.price * line.quantity as f64)
        .sum();
    let menu_id = priced.first().map(|line| line.item.menu_id);
    let now = now_rfc3339();

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO walkins (
            contact_number, customer_name, number_of_people, table_number, order_status,
            menu_id, total_amount, discount_amount, tax_amount, final_amount,
            payment_method, payment_status, notes, created_at, updated_at, is_synced
         ) VALUES (?1, ?2, ?3, ?4, 'placed', ?5, ?6, 0, 0, ?6, 'Cash', 'unpaid', ?7, ?8, ?8, 0)",
        params![
            contact,
            draft.customer_name.as_deref().unwrap_or("").trim(),
            draft.number_of_people.unwrap_or(1).max(1),
            draft.table_number.as_deref().unwrap_or("").trim(),
            menu_id,
            total,
            draft.notes.as_deref().unwrap_or(""),
            now,
        ],
    )?;
    let walkin_id = tx.last_insert_rowid();

    {
        let mut stmt = tx.prepare(
            "INSERT INTO walkin_items (
                walkin_id, menu_item_id, item_name, quantity, unit_price, total_price,
                special_instructions, status, phone_number, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, '', 'pending', ?7, ?8)",
        )?;
        for line in &priced {
            stmt.execute(params![
                walkin_id,
                line.item.item_id,
                line.item.item_name,
                line.quantity,
                line.item.price,
                line.item.price * line.quantity as f64,
                contact,
                now,
            ])?;
        }
    }
    tx.commit()?;
    info!(walkin_id, lines = priced.len(), total, "walk-in recorded");
    Ok(walkin_id)
}

const WALKIN_COLUMNS: &str = "id, contact_number, customer_name, number_of_people, table_number,
     order_status, menu_id, total_amount, discount_amount, tax_amount, final_amount,
     payment_method, payment_status, notes, created_at, updated_at, is_synced";

fn walkin_from_row(row: &Row<'_>) -> rusqlite::Result<Walkin> {
    Ok(Walkin {
        id: row.get(0)?,
        contact_number: row.get(1)?,
        customer_name: row.get(2)?,
        number_of_people: row.get(3)?,
        table_number: row.get(4)?,
        order_status: row.get(5)?,
        menu_id: row.get(6)?,
        total_amount: row.get(7)?,
        discount_amount: row.get(8)?,
        tax_amount: row.get(9)?,
        final_amount: row.get(10)?,
        payment_method: row.get(11)?,
        payment_status: row.get(12)?,
        notes: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
        is_synced: row.get(16)?,
    })
}

fn walkin_items(conn: &Connection, walkin_id: i64) -> Result<Vec<WalkinItem>> {
    let mut stmt = conn.prepare(
        "SELECT id, walkin_id, menu_item_id, item_name, quantity, unit_price, total_price,
                special_instructions, status, phone_number, created_at
         FROM walkin_items WHERE walkin_id = ?1 ORDER BY id",
    )?;
    let items = stmt
        .query_map(params![walkin_id], |row| {
            Ok(WalkinItem {
                id: row.get(0)?,
                walkin_id: row.get(1)?,
                menu_item_id: row.get(2)?,
                item_name: row.get(3)?,
                quantity: row.get(4)?,
                unit_price: row.get(5)?,
                total_price: row.get(6)?,
                special_instructions: row.get(7)?,
                status: row.get(8)?,
                phone_number: row.get(9)?,
                created_at: row.get(10)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(items)
}

pub fn get_walkin_with_items(conn: &Connection, id: i64) -> Result<Option<WalkinWithItems>> {
    let sql = format!("SELECT {WALKIN_COLUMNS} FROM walkins WHERE id = ?1");
    let Some(walkin) = conn.query_row(&sql, params![id], walkin_from_row).optional()? else {
        return Ok(None);
    };
    let order_items = walkin_items(conn, id)?;
    Ok(Some(WalkinWithItems {
        walkin,
        order_items,
    }))
}

/// Completed walk-ins that carry at least one item, oldest first.
pub fn completed_walkins_with_items(conn: &Connection, limit: usize) -> Result<Vec<WalkinWithItems>> {
    let sql = format!(
        "SELECT {WALKIN_COLUMNS} FROM walkins w
         WHERE w.order_status = 'completed'
           AND EXISTS (SELECT 1 FROM walkin_items i WHERE i.walkin_id = w.id)
         ORDER BY w.id ASC
         LIMIT ?1"
    );
    let walkins = {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![limit as i64], walkin_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };
    walkins
        .into_iter()
        .map(|walkin| {
            let order_items = walkin_items(conn, walkin.id)?;
            Ok(WalkinWithItems {
                walkin,
                order_items,
            })
        })
        .collect()
}

pub fn mark_walkin_completed(conn: &Connection, id: i64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE walkins SET order_status = 'completed', updated_at = ?2
         WHERE id = ?1 AND order_status = 'placed'",
        params![id, now_rfc3339()],
    )?;
    Ok(changed == 1)
}

/// Delete acknowledged walk-ins (items cascade), restricted to `completed`.
pub fn delete_completed_walkins(conn: &Connection, ids: &[i64]) -> Result<usize> {
    let mut stmt = conn.prepare("DELETE FROM walkins WHERE id = ?1 AND order_status = 'completed'")?;
    let mut deleted = 0;
    for id in ids {
        deleted += stmt.execute(params![id])?;
    }
    Ok(deleted)
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// Ring up a walk-in from the cached menu, print its receipt and complete it.
///
/// The walk-in is stored before printing; on `PrintFailed` it stays `placed`
/// and can be retried with [`complete_walkin`].
#[instrument(skip_all, fields(lines = draft.lines.len()))]
pub fn record_walkin<P: ReceiptPrinter + ?Sized>(
    db: &DbState,
    printer: &P,
    layout: &LayoutConfig,
    draft: &WalkinDraft,
) -> Result<CompletionReceipt> {
    let walkin_id = {
        let conn = db.conn.lock()?;
        let menu_items = menu::list_menu_items(&conn)?;
        if menu_items.is_empty() {
            return Err(PosError::Validation(
                "No menu is cached; pull the menu first".to_string(),
            ));
        }
        insert_walkin(&conn, draft, &menu_items)?
    };
    complete_walkin(db, printer, layout, walkin_id)
}

/// Print and complete a `placed` walk-in.
pub fn complete_walkin<P: ReceiptPrinter + ?Sized>(
    db: &DbState,
    printer: &P,
    layout: &LayoutConfig,
    walkin_id: i64,
) -> Result<CompletionReceipt> {
    let walkin = {
        let conn = db.conn.lock()?;
        get_walkin_with_items(&conn, walkin_id)?
            .ok_or_else(|| PosError::NotFound(format!("walk-in {walkin_id}")))?
    };
    match walkin.walkin.order_status {
        OrderStatus::Placed => {}
        OrderStatus::Completed => return Err(PosError::AlreadyCompleted(walkin_id)),
        OrderStatus::Cancelled => return Err(PosError::Cancelled(walkin_id)),
    }

    let doc = WalkinReceiptDoc::from_walkin(&walkin);
    let total = doc.total;
    let rendered = RenderedReceipt::render(&ReceiptDocument::WalkinReceipt(doc), layout);
    let printed_to = printer.print(&rendered).map_err(|e| {
        warn!(walkin_id, error = %e, "walk-in receipt print failed, left placed");
        match e {
            PosError::PrintFailed(_) => e,
            other => PosError::PrintFailed(other.to_string()),
        }
    })?;

    let conn = db.conn.lock()?;
    if !mark_walkin_completed(&conn, walkin_id)? {
        return Err(PosError::AlreadyCompleted(walkin_id));
    }
    info!(walkin_id, total, "walk-in completed");
    Ok(CompletionReceipt {
        id: walkin_id,
        total,
        printed_to,
    })
}
