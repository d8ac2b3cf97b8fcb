//! Order completion at the counter.
//!
//! A scanned or typed identifier is resolved to a cached order, its receipt
//! is printed, and only then is the order flipped to `completed`. A failed
//! print leaves the order `placed`.

use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::db::DbState;
use crate::error::{PosError, Result};
use crate::models::{OrderStatus, OrderWithItems};
use crate::orders;
use crate::print::ReceiptPrinter;
use crate::receipt_renderer::{LayoutConfig, OrderReceiptDoc, ReceiptDocument, RenderedReceipt};

/// What was printed for a completed order or walk-in.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionReceipt {
    pub id: i64,
    pub total: f64,
    /// Printer-specific reference to the output, e.g. a file path.
    pub printed_to: String,
}

/// Parse the numeric part of an identifier: `NV101`, `nv 101` or `101`.
fn parse_order_number(identifier: &str) -> Option<i64> {
    let trimmed = identifier.trim();
    let digits = match trimmed.get(..2) {
        Some(prefix) if prefix.eq_ignore_ascii_case("nv") => trimmed[2..].trim_start(),
        _ => trimmed,
    };
    digits.parse::<i64>().ok()
}

/// Resolve an identifier to a cached order: by primary key first, then by
/// the stored QR payload.
pub fn resolve_order(conn: &Connection, identifier: &str) -> Result<OrderWithItems> {
    if let Some(id) = parse_order_number(identifier) {
        if let Some(order) = orders::find_order_with_items(conn, id)? {
            return Ok(order);
        }
    }
    let trimmed = identifier.trim();
    if !trimmed.is_empty() {
        if let Some(id) = orders::find_order_id_by_qr(conn, trimmed)? {
            if let Some(order) = orders::find_order_with_items(conn, id)? {
                return Ok(order);
            }
        }
    }
    Err(PosError::NotFound(trimmed.to_string()))
}

fn ensure_placed(id: i64, status: OrderStatus) -> Result<()> {
    match status {
        OrderStatus::Placed => Ok(()),
        OrderStatus::Completed => Err(PosError::AlreadyCompleted(id)),
        OrderStatus::Cancelled => Err(PosError::Cancelled(id)),
    }
}

/// Complete the order named by `identifier`.
///
/// Fails with `NotFound`, `AlreadyCompleted` or `Cancelled` without touching
/// the store or the printer. The receipt total is Σ price × quantity over the
/// cached items.
#[instrument(skip(db, printer, layout))]
pub fn complete_order<P: ReceiptPrinter + ?Sized>(
    db: &DbState,
    printer: &P,
    layout: &LayoutConfig,
    identifier: &str,
) -> Result<CompletionReceipt> {
    let order = {
        let conn = db.conn.lock()?;
        resolve_order(&conn, identifier)?
    };
    let id = order.order.id;
    ensure_placed(id, order.order.status)?;

    let doc = OrderReceiptDoc::from_order(&order);
    let total = doc.total;
    let rendered = RenderedReceipt::render(&ReceiptDocument::OrderReceipt(doc), layout);
    let printed_to = printer.print(&rendered).map_err(|e| {
        warn!(order_id = id, error = %e, "receipt print failed, order left placed");
        match e {
            PosError::PrintFailed(_) => e,
            other => PosError::PrintFailed(other.to_string()),
        }
    })?;

    let conn = db.conn.lock()?;
    if !orders::mark_completed(&conn, id)? {
        // Completed or removed by another caller while the receipt printed.
        let status = orders::get_order(&conn, id)?
            .map(|o| o.status)
            .ok_or_else(|| PosError::NotFound(id.to_string()))?;
        ensure_placed(id, status)?;
    }
    info!(order_id = id, total, "order completed");
    Ok(CompletionReceipt {
        id,
        total,
        printed_to,
    })
}
