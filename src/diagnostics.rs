//! Local diagnostics: log retention and a health snapshot of the store.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::db::{self, DbState};
use crate::error::Result;
use crate::menu;
use crate::summary::{self, LocalOrderCounts};

/// Maximum number of rolled log files to keep.
pub const MAX_LOG_FILES: usize = 10;

/// Prefix of files written by the rolling appender.
pub const LOG_FILE_PREFIX: &str = "pos";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealth {
    pub version: &'static str,
    pub schema_version: i64,
    pub db_path: String,
    pub orders: LocalOrderCounts,
    /// Completed walk-ins not yet acknowledged upstream.
    pub pending_walkins: i64,
    pub menu_synced: bool,
    pub last_pull_at: Option<String>,
    pub last_push_at: Option<String>,
}

pub fn system_health(db: &DbState) -> Result<SystemHealth> {
    let conn = db.conn.lock()?;
    let schema_version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| row.get(0))?;
    let pending_walkins: i64 = conn.query_row(
        "SELECT COUNT(*) FROM walkins WHERE order_status = 'completed'",
        [],
        |row| row.get(0),
    )?;
    Ok(SystemHealth {
        version: env!("CARGO_PKG_VERSION"),
        schema_version,
        db_path: db.db_path.to_string_lossy().to_string(),
        orders: summary::local_order_counts(&conn)?,
        pending_walkins,
        menu_synced: menu::is_menu_synced(&conn),
        last_pull_at: db::get_setting(&conn, "sync", "last_pull_at"),
        last_push_at: db::get_setting(&conn, "sync", "last_push_at"),
    })
}

/// Delete all but the newest [`MAX_LOG_FILES`] log files in `log_dir`.
pub fn prune_old_logs(log_dir: &Path) {
    if !log_dir.exists() {
        return;
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.starts_with(&format!("{LOG_FILE_PREFIX}.")));
            if is_log {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(std::time::UNIX_EPOCH);
                log_files.push((path, modified));
            }
        }
    }

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}
