//! Receipt output.
//!
//! Workflows render a [`ReceiptDocument`](crate::receipt_renderer::ReceiptDocument)
//! and hand the result to a [`ReceiptPrinter`]. The shipped printer writes an
//! HTML artifact under `{data_dir}/receipts/` that the shell opens or sends to
//! the OS print dialog.

use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{PosError, Result};
use crate::receipt_renderer::RenderedReceipt;

pub const RECEIPTS_DIR: &str = "receipts";

/// Something that can put a rendered receipt in front of the customer.
///
/// Returns a printer-specific reference to the output (a file path for
/// [`HtmlFilePrinter`]). Any failure is reported as `PrintFailed`.
pub trait ReceiptPrinter: Send + Sync {
    fn print(&self, receipt: &RenderedReceipt) -> Result<String>;
}

/// Writes each receipt as a standalone HTML file.
#[derive(Debug, Clone)]
pub struct HtmlFilePrinter {
    dir: PathBuf,
}

impl HtmlFilePrinter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Printer rooted at `{data_dir}/receipts`.
    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(RECEIPTS_DIR))
    }
}

impl ReceiptPrinter for HtmlFilePrinter {
    fn print(&self, receipt: &RenderedReceipt) -> Result<String> {
        write_print_html_file(&self.dir, receipt.entity_type, &receipt.entity_id, &receipt.html)
            .map_err(|e| {
                warn!(
                    entity = receipt.entity_type,
                    id = %receipt.entity_id,
                    error = %e,
                    "receipt write failed"
                );
                PosError::PrintFailed(e.to_string())
            })
    }
}

fn write_print_html_file(
    receipts_dir: &Path,
    entity_type: &str,
    entity_id: &str,
    html: &str,
) -> std::io::Result<String> {
    fs::create_dir_all(receipts_dir)?;
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%3f");
    let filename = format!("{entity_type}_{entity_id}_{timestamp}.html");
    let file_path = receipts_dir.join(filename);
    fs::write(&file_path, html)?;
    let path_str = file_path.to_string_lossy().to_string();
    info!(entity = entity_type, id = %entity_id, path = %path_str, "receipt file generated");
    Ok(path_str)
}
