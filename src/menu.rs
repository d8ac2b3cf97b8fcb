//! Menu cache for walk-in sales.
//!
//! The active menu is fetched by id from the server and stored in the
//! `menus` / `menu_items` tables. Walk-in entry prices lines from this cache
//! only, so counter sales keep working offline once a menu has been pulled.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use crate::api::OrderGateway;
use crate::db::{self, DbState};
use crate::error::Result;
use crate::models::{Menu, MenuItem, RemoteMenu};
use crate::session::Session;

const SETTINGS_CATEGORY: &str = "menu";
const KEY_IS_SYNCED: &str = "is_synced";
const KEY_MENU_ID: &str = "menu_id";

/// Outcome of a menu pull.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuPullReport {
    pub menu_id: i64,
    pub name: String,
    pub items: usize,
}

// ---------------------------------------------------------------------------
// Pull
// ---------------------------------------------------------------------------

/// Fetch menu `menu_id` and replace the local menu cache with it.
///
/// The network call happens before the connection lock is taken; the
/// replacement itself is a single transaction.
pub async fn pull_menu<G: OrderGateway>(
    db: &DbState,
    gateway: &G,
    session: &Session,
    menu_id: i64,
) -> Result<MenuPullReport> {
    let remote = gateway.fetch_menu(session, menu_id).await?;
    if remote.id != menu_id {
        warn!(requested = menu_id, received = remote.id, "menu id mismatch in response");
    }

    let conn = db.conn.lock()?;
    let tx = conn.unchecked_transaction()?;
    let items = replace_menu(&tx, &remote)?;
    db::set_setting(&tx, SETTINGS_CATEGORY, KEY_IS_SYNCED, "true")?;
    db::set_setting(&tx, SETTINGS_CATEGORY, KEY_MENU_ID, &remote.id.to_string())?;
    tx.commit()?;

    info!(menu_id = remote.id, items, "menu cached");
    Ok(MenuPullReport {
        menu_id: remote.id,
        name: remote.name,
        items,
    })
}

/// Drop every cached menu and store `remote` in their place.
fn replace_menu(conn: &Connection, remote: &RemoteMenu) -> Result<usize> {
    conn.execute("DELETE FROM menus", [])?;
    conn.execute(
        "INSERT INTO menus (
            id, name, description, start_time, end_time, menu_configuration_id,
            created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            remote.id,
            remote.name,
            remote.description,
            remote.start_time,
            remote.end_time,
            remote.menu_configuration_id,
            remote.created_at,
            remote.updated_at,
        ],
    )?;

    let mut stmt = conn.prepare(
        "INSERT OR REPLACE INTO menu_items (
            menu_id, item_id, item_name, min_quantity, max_quantity, price
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    let mut count = 0;
    for item in &remote.menu_items {
        let (name, price) = item
            .item
            .as_ref()
            .map(|i| (i.name.clone(), i.pricing.as_ref().map(|p| p.price).unwrap_or(0.0)))
            .unwrap_or_default();
        let min = item.min_quantity.unwrap_or(1).max(1);
        let max = item.max_quantity.unwrap_or(min).max(min);
        // Items are always filed under the menu being stored.
        stmt.execute(params![remote.id, item.item_id, name, min, max, price])?;
        count += 1;
    }
    Ok(count)
}

// ---------------------------------------------------------------------------
// Readers
// ---------------------------------------------------------------------------

/// Whether a menu has been pulled since the last logout.
pub fn is_menu_synced(conn: &Connection) -> bool {
    db::get_setting(conn, SETTINGS_CATEGORY, KEY_IS_SYNCED).as_deref() == Some("true")
}

pub fn cached_menu(conn: &Connection) -> Result<Option<Menu>> {
    let menu = conn
        .query_row(
            "SELECT id, name, description, start_time, end_time, menu_configuration_id
             FROM menus ORDER BY id LIMIT 1",
            [],
            |row| {
                Ok(Menu {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    start_time: row.get(3)?,
                    end_time: row.get(4)?,
                    menu_configuration_id: row.get(5)?,
                })
            },
        )
        .optional()?;
    Ok(menu)
}

/// Cached items of the active menu, in catalog order.
pub fn list_menu_items(conn: &Connection) -> Result<Vec<MenuItem>> {
    let mut stmt = conn.prepare(
        "SELECT id, menu_id, item_id, item_name, min_quantity, max_quantity, price
         FROM menu_items ORDER BY id",
    )?;
    let items = stmt
        .query_map([], |row| {
            Ok(MenuItem {
                id: row.get(0)?,
                menu_id: row.get(1)?,
                item_id: row.get(2)?,
                item_name: row.get(3)?,
                min_quantity: row.get(4)?,
                max_quantity: row.get(5)?,
                price: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(items)
}

/// Forget the cached menu (logout).
pub fn clear_menu(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM menus", [])?;
    db::delete_settings_category(conn, SETTINGS_CATEGORY)?;
    Ok(())
}
