use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Stock levels for one SKU as reported by `GET /inventories/{sku}`.
///
/// Quantities are signed so that a broken service reporting negative stock can be detected
/// rather than failing to parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryState {
    pub sku: String,
    #[serde(rename = "quantity")]
    pub total_quantity: i64,
    pub reserved_quantity: i64,
    pub available_quantity: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub sku: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub user_id: i64,
    pub customer_email: String,
    pub amount: f64,
    pub items: Vec<OrderItem>,
}

/// Order ids are numeric today but treated as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum OrderId {
    Number(i64),
    Text(String),
}

impl Display for OrderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderId::Number(id) => write!(f, "{id}"),
            OrderId::Text(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: OrderId,
    #[serde(default)]
    pub payment_url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn inventory_state_uses_service_field_names() {
        let state: InventoryState = serde_json::from_str(
            r#"{"sku":"test","quantity":1000,"reservedQuantity":1200,"availableQuantity":-200}"#,
        )
        .unwrap();

        assert_eq!(
            InventoryState {
                sku: "test".to_string(),
                total_quantity: 1000,
                reserved_quantity: 1200,
                available_quantity: -200,
            },
            state
        );
    }

    #[test]
    fn order_request_is_camel_case() {
        let request = OrderRequest {
            user_id: 1,
            customer_email: "user@test.com".to_string(),
            amount: 149.99,
            items: vec![OrderItem {
                sku: "test".to_string(),
                quantity: 1,
            }],
        };

        assert_eq!(
            serde_json::json!({
                "userId": 1,
                "customerEmail": "user@test.com",
                "amount": 149.99,
                "items": [{"sku": "test", "quantity": 1}]
            }),
            serde_json::to_value(&request).unwrap()
        );
    }

    #[test]
    fn order_ids_may_be_numbers_or_strings() {
        let numeric: OrderResponse =
            serde_json::from_str(r#"{"id":42,"paymentUrl":"https://checkout.stripe.com/x"}"#)
                .unwrap();
        let text: OrderResponse =
            serde_json::from_str(r#"{"id":"ord-7","status":"PENDING"}"#).unwrap();

        assert_eq!("42", numeric.id.to_string());
        assert_eq!("ord-7", text.id.to_string());
        assert_eq!(Some("PENDING".to_string()), text.status);
        assert_eq!(None, numeric.status);
    }
}
