//! Domain rows of the local store and the wire shapes exchanged with the
//! canteen server.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Order status
// ---------------------------------------------------------------------------

/// Lifecycle of a pre-paid or walk-in order.
///
/// `placed` is the only non-terminal state; `completed` and `cancelled`
/// never transition further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Placed,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Placed => "placed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a stored or remote status. Unknown values yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "placed" => Some(Self::Placed),
            "completed" => Some(Self::Completed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// `placed -> completed | cancelled`; a status may also be re-applied.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        *self == next || *self == Self::Placed
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl rusqlite::types::FromSql for OrderStatus {
    fn column_result(value: rusqlite::types::ValueRef<'_>) -> rusqlite::types::FromSqlResult<Self> {
        let raw = value.as_str()?;
        OrderStatus::parse(raw).ok_or_else(|| {
            rusqlite::types::FromSqlError::Other(format!("unknown order status {raw}").into())
        })
    }
}

impl rusqlite::types::ToSql for OrderStatus {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        Ok(rusqlite::types::ToSqlOutput::from(self.as_str()))
    }
}

// ---------------------------------------------------------------------------
// Local rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i64,
    pub order_id: i64,
    pub user_id: Option<i64>,
    pub total_amount: f64,
    pub status: OrderStatus,
    pub canteen_id: Option<i64>,
    pub menu_configuration_id: Option<i64>,
    pub created_by_id: Option<i64>,
    pub updated_by_id: Option<i64>,
    pub qr_code: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub item_id: i64,
    pub quantity: i64,
    pub price: f64,
    pub total: f64,
    pub item_name: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl OrderItem {
    pub fn line_total(&self) -> f64 {
        self.price * self.quantity as f64
    }
}

/// An order together with its line items.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

impl OrderWithItems {
    /// Σ price × quantity over the line items.
    pub fn computed_total(&self) -> f64 {
        self.items.iter().map(OrderItem::line_total).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Walkin {
    pub id: i64,
    pub contact_number: String,
    pub customer_name: String,
    pub number_of_people: i64,
    pub table_number: String,
    pub order_status: OrderStatus,
    pub menu_id: Option<i64>,
    pub total_amount: f64,
    pub discount_amount: f64,
    pub tax_amount: f64,
    pub final_amount: f64,
    pub payment_method: String,
    pub payment_status: String,
    pub notes: String,
    pub created_at: String,
    pub updated_at: String,
    pub is_synced: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkinItem {
    pub id: i64,
    pub walkin_id: i64,
    pub menu_item_id: i64,
    pub item_name: String,
    pub quantity: i64,
    pub unit_price: f64,
    pub total_price: f64,
    pub special_instructions: String,
    pub status: String,
    pub phone_number: String,
    pub created_at: String,
}

/// A walk-in with its items, shaped as the server's walk-in status endpoint
/// expects it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkinWithItems {
    #[serde(flatten)]
    pub walkin: Walkin,
    pub order_items: Vec<WalkinItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Menu {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub menu_configuration_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: i64,
    pub menu_id: i64,
    pub item_id: i64,
    pub item_name: String,
    pub min_quantity: i64,
    pub max_quantity: i64,
    pub price: f64,
}

impl MenuItem {
    /// Clamp a requested quantity into `[min_quantity, max_quantity]`.
    pub fn clamp_quantity(&self, requested: i64) -> i64 {
        let min = self.min_quantity.max(1);
        let max = self.max_quantity.max(min);
        requested.clamp(min, max)
    }
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

/// Order as returned by the today's-orders endpoint.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteOrder {
    pub id: i64,
    #[serde(default)]
    pub order_id: Option<i64>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub total_amount: f64,
    pub status: String,
    #[serde(default)]
    pub canteen_id: Option<i64>,
    #[serde(default)]
    pub menu_configuration_id: Option<i64>,
    #[serde(default)]
    pub created_by_id: Option<i64>,
    #[serde(default)]
    pub updated_by_id: Option<i64>,
    #[serde(default)]
    pub qr_code: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub order_items: Vec<RemoteOrderItem>,
}

impl RemoteOrder {
    /// Display order number: explicit `orderId`, else the first item's
    /// parent reference, else the primary key.
    pub fn display_order_id(&self) -> i64 {
        self.order_id
            .or_else(|| self.order_items.first().map(|item| item.order_id))
            .unwrap_or(self.id)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteOrderItem {
    pub id: i64,
    pub order_id: i64,
    pub item_id: i64,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub total: f64,
    #[serde(default)]
    pub created_by_id: Option<i64>,
    #[serde(default)]
    pub updated_by_id: Option<i64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub menu_item_item: Option<RemoteItemRef>,
}

impl RemoteOrderItem {
    pub fn item_name(&self) -> String {
        self.menu_item_item
            .as_ref()
            .map(|item| item.name.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct RemoteItemRef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub pricing: Option<RemotePricing>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct RemotePricing {
    #[serde(default)]
    pub price: f64,
}

/// Menu as returned by `getMenuById`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMenu {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub menu_configuration_id: Option<i64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub menu_items: Vec<RemoteMenuItem>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMenuItem {
    #[serde(default)]
    pub menu_id: Option<i64>,
    pub item_id: i64,
    #[serde(default)]
    pub min_quantity: Option<i64>,
    #[serde(default)]
    pub max_quantity: Option<i64>,
    #[serde(default)]
    pub item: Option<RemoteItemRef>,
}

/// Acknowledgement returned by both status-update endpoints.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateAck {
    #[serde(default)]
    pub updated_count: u64,
    /// Ids the server actually updated, when it reports them.
    #[serde(default)]
    pub updated_ids: Option<Vec<i64>>,
}

/// Admin dashboard counters.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DashboardData {
    #[serde(default)]
    pub total_orders: i64,
    #[serde(default)]
    pub total_amount: f64,
    #[serde(default)]
    pub completed_orders: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_are_monotonic() {
        use OrderStatus::*;
        assert!(Placed.can_transition_to(Completed));
        assert!(Placed.can_transition_to(Cancelled));
        assert!(Completed.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Placed));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Placed));
        assert!(!Cancelled.can_transition_to(Completed));
    }

    #[test]
    fn test_status_parse_accepts_spelling_variants() {
        assert_eq!(OrderStatus::parse(" Completed "), Some(OrderStatus::Completed));
        assert_eq!(OrderStatus::parse("canceled"), Some(OrderStatus::Cancelled));
        assert_eq!(OrderStatus::parse("pending"), None);
    }

    #[test]
    fn test_remote_order_deserializes_server_shape() {
        let raw = serde_json::json!({
            "id": 101,
            "userId": 7,
            "totalAmount": 130,
            "status": "placed",
            "canteenId": 3,
            "menuConfigurationId": 2,
            "qrCode": "QR-101",
            "orderItems": [
                { "id": 1, "orderId": 101, "itemId": 11, "quantity": 2, "price": 50, "total": 100,
                  "menuItemItem": { "name": "Idli" } },
                { "id": 2, "orderId": 101, "itemId": 12, "quantity": 1, "price": 30, "total": 30 }
            ]
        });
        let order: RemoteOrder = serde_json::from_value(raw).expect("deserialize");
        assert_eq!(order.display_order_id(), 101);
        assert_eq!(order.order_items[0].item_name(), "Idli");
        assert_eq!(order.order_items[1].item_name(), "");
    }

    #[test]
    fn test_computed_total_is_price_times_quantity() {
        let item = |id, price, quantity| OrderItem {
            id,
            order_id: 101,
            item_id: id,
            quantity,
            price,
            total: 0.0,
            item_name: String::new(),
            created_at: None,
            updated_at: None,
        };
        let order = OrderWithItems {
            order: Order {
                id: 101,
                order_id: 101,
                user_id: None,
                total_amount: 0.0,
                status: OrderStatus::Placed,
                canteen_id: None,
                menu_configuration_id: None,
                created_by_id: None,
                updated_by_id: None,
                qr_code: None,
                created_at: None,
                updated_at: None,
            },
            items: vec![item(1, 50.0, 2), item(2, 30.0, 1)],
        };
        assert_eq!(order.computed_total(), 130.0);
    }

    #[test]
    fn test_menu_item_quantity_clamp() {
        let item = MenuItem {
            id: 1,
            menu_id: 1,
            item_id: 4,
            item_name: "Tea".into(),
            min_quantity: 1,
            max_quantity: 3,
            price: 10.0,
        };
        assert_eq!(item.clamp_quantity(0), 1);
        assert_eq!(item.clamp_quantity(2), 2);
        assert_eq!(item.clamp_quantity(9), 3);
    }

    #[test]
    fn test_walkin_payload_flattens_header() {
        let walkin = WalkinWithItems {
            walkin: Walkin {
                id: 4,
                contact_number: "9876543210".into(),
                customer_name: String::new(),
                number_of_people: 1,
                table_number: String::new(),
                order_status: OrderStatus::Completed,
                menu_id: Some(1),
                total_amount: 20.0,
                discount_amount: 0.0,
                tax_amount: 0.0,
                final_amount: 20.0,
                payment_method: "Cash".into(),
                payment_status: "unpaid".into(),
                notes: String::new(),
                created_at: "2026-01-01T00:00:00Z".into(),
                updated_at: "2026-01-01T00:00:00Z".into(),
                is_synced: false,
            },
            order_items: vec![],
        };
        let value = serde_json::to_value(&walkin).unwrap();
        assert_eq!(value["contactNumber"], "9876543210");
        assert_eq!(value["orderStatus"], "completed");
        assert!(value["orderItems"].is_array());
    }
}
