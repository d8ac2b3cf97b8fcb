use serde::{Deserialize, Serialize};

use crate::models::{OrderWithItems, WalkinWithItems};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ReceiptItem {
    pub name: String,
    pub quantity: i64,
    pub unit_price: f64,
    pub total: f64,
}

impl ReceiptItem {
    fn new(name: &str, quantity: i64, unit_price: f64) -> Self {
        Self {
            name: name.to_string(),
            quantity,
            unit_price,
            total: unit_price * quantity as f64,
        }
    }
}

/// Receipt for a pre-paid order handed over at the counter.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct OrderReceiptDoc {
    pub order_id: i64,
    pub order_number: String,
    pub created_at: String,
    #[serde(default)]
    pub qr_code: Option<String>,
    #[serde(default)]
    pub items: Vec<ReceiptItem>,
    pub total: f64,
}

impl OrderReceiptDoc {
    /// Build from a cached order. The total is recomputed from the lines,
    /// not taken from the stored header.
    pub fn from_order(order: &OrderWithItems) -> Self {
        let items: Vec<ReceiptItem> = order
            .items
            .iter()
            .map(|item| ReceiptItem::new(&item.item_name, item.quantity, item.price))
            .collect();
        let total = items.iter().map(|item| item.total).sum();
        Self {
            order_id: order.order.id,
            order_number: format!("NV{}", order.order.order_id),
            created_at: order.order.created_at.clone().unwrap_or_default(),
            qr_code: order.order.qr_code.clone(),
            items,
            total,
        }
    }
}

/// Receipt for a walk-in sale rung up at the counter.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct WalkinReceiptDoc {
    pub walkin_id: i64,
    pub contact_number: String,
    #[serde(default)]
    pub customer_name: Option<String>,
    pub created_at: String,
    pub payment_method: String,
    #[serde(default)]
    pub items: Vec<ReceiptItem>,
    pub total: f64,
}

impl WalkinReceiptDoc {
    pub fn from_walkin(walkin: &WalkinWithItems) -> Self {
        let items: Vec<ReceiptItem> = walkin
            .order_items
            .iter()
            .map(|item| ReceiptItem::new(&item.item_name, item.quantity, item.unit_price))
            .collect();
        let total = items.iter().map(|item| item.total).sum();
        let name = walkin.walkin.customer_name.trim();
        Self {
            walkin_id: walkin.walkin.id,
            contact_number: walkin.walkin.contact_number.clone(),
            customer_name: (!name.is_empty()).then(|| name.to_string()),
            created_at: walkin.walkin.created_at.clone(),
            payment_method: walkin.walkin.payment_method.clone(),
            items,
            total,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "doc", rename_all = "snake_case")]
pub enum ReceiptDocument {
    OrderReceipt(OrderReceiptDoc),
    WalkinReceipt(WalkinReceiptDoc),
}

impl ReceiptDocument {
    /// `(entity_type, entity_id)` used to name the printed artifact.
    pub fn entity(&self) -> (&'static str, String) {
        match self {
            Self::OrderReceipt(doc) => ("order", doc.order_id.to_string()),
            Self::WalkinReceipt(doc) => ("walkin", doc.walkin_id.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LayoutConfig {
    pub canteen_name: String,
    pub currency_symbol: String,
    pub footer_text: Option<String>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            canteen_name: "Welfare Canteen".to_string(),
            currency_symbol: "\u{20b9}".to_string(),
            footer_text: Some("Thank you".to_string()),
        }
    }
}

/// A document rendered and ready for a printer.
#[derive(Debug, Clone)]
pub struct RenderedReceipt {
    pub entity_type: &'static str,
    pub entity_id: String,
    pub html: String,
}

impl RenderedReceipt {
    pub fn render(document: &ReceiptDocument, cfg: &LayoutConfig) -> Self {
        let (entity_type, entity_id) = document.entity();
        Self {
            entity_type,
            entity_id,
            html: render_html(document, cfg),
        }
    }
}

fn esc(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn money(cfg: &LayoutConfig, value: f64) -> String {
    format!("{}{value:.2}", esc(&cfg.currency_symbol))
}

fn line(label: &str, value: &str) -> String {
    format!("<div class=\"line\"><span>{label}</span><span>{value}</span></div>")
}

fn html_shell(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8"/>
<meta name="viewport" content="width=device-width, initial-scale=1.0"/>
<title>{}</title>
<style>
body {{ font-family: ui-monospace, SFMono-Regular, Menlo, monospace; margin: 0; padding: 12px; background: #fff; color: #111; }}
.line {{ display: flex; justify-content: space-between; gap: 8px; font-size: 10px; }}
.line strong {{ font-size: 11px; }}
.section {{ margin-top: 8px; border-top: 1px dashed #111; padding-top: 6px; }}
.section h3 {{ margin: 0 0 4px 0; font-size: 11px; text-transform: uppercase; }}
.note {{ color: #666; font-size: 9px; }}
.center {{ text-align: center; }}
</style>
</head>
<body>{}</body>
</html>"#,
        esc(title),
        body
    )
}

fn append_items(body: &mut String, items: &[ReceiptItem], total: f64, cfg: &LayoutConfig) {
    body.push_str("<div class=\"section\"><h3>Items</h3>");
    if items.is_empty() {
        body.push_str("<div class=\"note\">No items</div>");
    }
    for item in items {
        body.push_str(&line(
            &format!("{}x {}", item.quantity, esc(&item.name)),
            &money(cfg, item.total),
        ));
    }
    body.push_str("</div><div class=\"section\">");
    body.push_str(&line("<strong>Total</strong>", &format!("<strong>{}</strong>", money(cfg, total))));
    body.push_str("</div>");
}

pub fn render_html(document: &ReceiptDocument, cfg: &LayoutConfig) -> String {
    let mut body = format!("<div class=\"center\">{}</div>", esc(&cfg.canteen_name));
    let title = match document {
        ReceiptDocument::OrderReceipt(doc) => {
            body.push_str("<div class=\"section\">");
            body.push_str(&line("Order", &format!("#{}", esc(&doc.order_number))));
            body.push_str(&line("Date", &esc(&doc.created_at)));
            body.push_str("</div>");
            append_items(&mut body, &doc.items, doc.total, cfg);
            format!("Order {}", doc.order_number)
        }
        ReceiptDocument::WalkinReceipt(doc) => {
            body.push_str("<div class=\"section\">");
            body.push_str(&line("Walk-in", &format!("#{}", doc.walkin_id)));
            if let Some(name) = doc.customer_name.as_deref() {
                body.push_str(&line("Customer", &esc(name)));
            }
            body.push_str(&line("Contact", &esc(&doc.contact_number)));
            body.push_str(&line("Date", &esc(&doc.created_at)));
            body.push_str(&line("Payment", &esc(&doc.payment_method)));
            body.push_str("</div>");
            append_items(&mut body, &doc.items, doc.total, cfg);
            format!("Walk-in {}", doc.walkin_id)
        }
    };
    if let Some(footer) = cfg.footer_text.as_deref().filter(|f| !f.trim().is_empty()) {
        body.push_str(&format!(
            "<div class=\"section center note\">{}</div>",
            esc(footer)
        ));
    }
    html_shell(&title, &body)
}
