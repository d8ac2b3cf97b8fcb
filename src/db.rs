//! Local SQLite store for the canteen POS.
//!
//! Uses rusqlite with WAL mode. Holds the six cache tables (`orders`,
//! `order_items`, `menus`, `menu_items`, `walkins`, `walkin_items`) plus the
//! `local_settings` key/value table. The store carries no business rules of
//! its own; callers lock `DbState::conn` for the shortest span possible and
//! never hold the guard across an await point.

use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::{PosError, Result};

/// Shared handle to the single local database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
pub(crate) const CURRENT_SCHEMA_VERSION: i32 = 2;

const DB_FILE_NAME: &str = "canteen.db";

/// Initialize the database at `{data_dir}/canteen.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas and
/// runs pending migrations. If the file cannot be opened it is moved aside
/// (never deleted: it may still hold completed orders that were not pushed)
/// and a fresh database is created.
pub fn init(data_dir: &Path) -> Result<DbState> {
    fs::create_dir_all(data_dir)?;

    let db_path = data_dir.join(DB_FILE_NAME);
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), moving file aside and retrying once",
                first_err
            );
            if db_path.exists() {
                let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
                let aside = db_path.with_extension(format!("db.corrupt-{stamp}"));
                fs::rename(&db_path, &aside)?;
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
                warn!("Unreadable database preserved at {}", aside.display());
            }
            open_and_configure(&db_path)?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: settings, pre-paid order cache and menu cache.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- local_settings (category/key/value store)
        CREATE TABLE IF NOT EXISTS local_settings (
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            updated_at TEXT DEFAULT (datetime('now')),
            PRIMARY KEY (setting_category, setting_key)
        );

        -- orders (pulled from the server, completed locally)
        CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY,
            order_id INTEGER NOT NULL,
            user_id INTEGER,
            total_amount REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'placed'
                CHECK (status IN ('placed', 'completed', 'cancelled')),
            canteen_id INTEGER,
            menu_configuration_id INTEGER,
            created_by_id INTEGER,
            updated_by_id INTEGER,
            qr_code TEXT,
            created_at TEXT,
            updated_at TEXT,
            completed_at TEXT
        );

        -- order_items (children of orders)
        CREATE TABLE IF NOT EXISTS order_items (
            id INTEGER PRIMARY KEY,
            order_id INTEGER NOT NULL,
            item_id INTEGER NOT NULL,
            quantity INTEGER NOT NULL DEFAULT 0,
            price REAL NOT NULL DEFAULT 0,
            total REAL NOT NULL DEFAULT 0,
            item_name TEXT NOT NULL DEFAULT '',
            created_by_id INTEGER,
            updated_by_id INTEGER,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(order_id) REFERENCES orders(id) ON DELETE CASCADE
        );

        -- menus
        CREATE TABLE IF NOT EXISTS menus (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL DEFAULT '',
            description TEXT,
            start_time TEXT,
            end_time TEXT,
            menu_configuration_id INTEGER,
            created_at TEXT,
            updated_at TEXT
        );

        -- menu_items (local catalog)
        CREATE TABLE IF NOT EXISTS menu_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            menu_id INTEGER NOT NULL,
            item_id INTEGER NOT NULL,
            item_name TEXT NOT NULL DEFAULT '',
            min_quantity INTEGER NOT NULL DEFAULT 1,
            max_quantity INTEGER NOT NULL DEFAULT 1,
            price REAL NOT NULL DEFAULT 0,
            UNIQUE(menu_id, item_id),
            FOREIGN KEY(menu_id) REFERENCES menus(id) ON DELETE CASCADE
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);
        CREATE INDEX IF NOT EXISTS idx_orders_qr_code ON orders(qr_code);
        CREATE INDEX IF NOT EXISTS idx_order_items_order_id ON order_items(order_id);
        CREATE INDEX IF NOT EXISTS idx_menu_items_menu_id ON menu_items(menu_id);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        PosError::Storage(e)
    })?;

    info!("Applied migration v1");
    Ok(())
}

/// Migration v2: walk-in (counter) orders.
///
/// Items are bound to their walk-in by foreign key; the contact number is
/// kept on each item only because the upstream payload carries it.
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS walkins (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            contact_number TEXT NOT NULL,
            customer_name TEXT NOT NULL DEFAULT '',
            number_of_people INTEGER NOT NULL DEFAULT 1,
            table_number TEXT NOT NULL DEFAULT '',
            order_status TEXT NOT NULL DEFAULT 'placed'
                CHECK (order_status IN ('placed', 'completed', 'cancelled')),
            menu_id INTEGER,
            total_amount REAL NOT NULL DEFAULT 0,
            discount_amount REAL NOT NULL DEFAULT 0,
            tax_amount REAL NOT NULL DEFAULT 0,
            final_amount REAL NOT NULL DEFAULT 0,
            payment_method TEXT NOT NULL DEFAULT 'Cash',
            payment_status TEXT NOT NULL DEFAULT 'unpaid',
            notes TEXT NOT NULL DEFAULT '',
            created_by_id INTEGER,
            updated_by_id INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            is_synced INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS walkin_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            walkin_id INTEGER NOT NULL,
            menu_item_id INTEGER NOT NULL,
            item_name TEXT NOT NULL DEFAULT '',
            quantity INTEGER NOT NULL DEFAULT 1,
            unit_price REAL NOT NULL DEFAULT 0,
            total_price REAL NOT NULL DEFAULT 0,
            special_instructions TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'pending',
            phone_number TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            FOREIGN KEY(walkin_id) REFERENCES walkins(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_walkins_order_status ON walkins(order_status);
        CREATE INDEX IF NOT EXISTS idx_walkin_items_walkin_id ON walkin_items(walkin_id);

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        PosError::Storage(e)
    })?;

    info!("Applied migration v2 (walk-in tables)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Read a single setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .optional()
    .unwrap_or_else(|e| {
        warn!(category, key, error = %e, "failed to read setting");
        None
    })
}

/// Upsert a setting value.
pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )?;
    Ok(())
}

/// Remove every setting in a category (used on logout).
pub fn delete_settings_category(conn: &Connection, category: &str) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM local_settings WHERE setting_category = ?1",
        params![category],
    )?;
    Ok(removed)
}

/// In-memory database with migrations applied, for unit tests across modules.
#[cfg(test)]
pub fn test_db() -> DbState {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
    .expect("pragma setup");
    run_migrations(&conn).expect("run_migrations should succeed in test");
    DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
