use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Treat an explicit `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Deserialize)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct OrdersData {
    pub orders: OrderConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderConnection {
    #[serde(default, deserialize_with = "null_as_default")]
    pub edges: Vec<OrderEdge>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
pub struct OrderEdge {
    pub node: SourceOrder,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(default)]
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ShopData {
    pub shop: Shop,
}

#[derive(Debug, Deserialize)]
pub struct Shop {
    pub name: String,
}

/// One order as returned by the Admin GraphQL API. Every nested field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceOrder {
    /// Global ID, e.g. `gid://shopify/Order/5001`.
    pub id: String,
    pub legacy_resource_id: Option<String>,
    /// Display name, e.g. `#1001`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub email: Option<String>,
    pub display_financial_status: Option<String>,
    pub customer: Option<Customer>,
    pub total_tax_set: Option<MoneyBag>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub transactions: Vec<Transaction>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub line_items: LineItemConnection,
}

impl SourceOrder {
    /// Stable identifier used for state bookkeeping and ID lookups.
    pub fn source_id(&self) -> String {
        match &self.legacy_resource_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => self
                .id
                .rsplit('/')
                .next()
                .unwrap_or(&self.id)
                .to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoneyBag {
    pub presentment_money: Option<Money>,
}

impl MoneyBag {
    pub fn amount(&self) -> f64 {
        self.presentment_money
            .as_ref()
            .map(Money::value)
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Money {
    /// Decimal scalar; usually a string, occasionally a bare number.
    pub amount: Option<serde_json::Value>,
    pub currency_code: Option<String>,
}

impl Money {
    pub fn value(&self) -> f64 {
        match &self.amount {
            Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0.0),
            Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub kind: Option<String>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fees: Vec<TransactionFee>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionFee {
    pub amount: Option<Money>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LineItemConnection {
    #[serde(default, deserialize_with = "null_as_default")]
    pub edges: Vec<LineItemEdge>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineItemEdge {
    pub node: LineItem,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub title: Option<String>,
    pub quantity: Option<i64>,
    pub variant: Option<Variant>,
    pub original_unit_price_set: Option<MoneyBag>,
    pub discounted_unit_price_set: Option<MoneyBag>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Variant {
    pub title: Option<String>,
    pub sku: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_sparse_order() {
        let order: SourceOrder = serde_json::from_value(serde_json::json!({
            "id": "gid://shopify/Order/5001",
            "name": "#1001",
            "customer": null,
            "transactions": null,
            "lineItems": null,
            "totalTaxSet": { "presentmentMoney": null }
        }))
        .unwrap();

        assert_eq!(order.source_id(), "5001");
        assert!(order.transactions.is_empty());
        assert!(order.line_items.edges.is_empty());
        assert_eq!(order.total_tax_set.unwrap().amount(), 0.0);
    }

    #[test]
    fn legacy_id_wins_over_gid() {
        let order = SourceOrder {
            id: "gid://shopify/Order/5001".to_owned(),
            legacy_resource_id: Some("42".to_owned()),
            ..Default::default()
        };
        assert_eq!(order.source_id(), "42");
    }

    #[test]
    fn money_accepts_string_and_number() {
        let s: Money = serde_json::from_value(serde_json::json!({ "amount": "12.50" })).unwrap();
        let n: Money = serde_json::from_value(serde_json::json!({ "amount": 3.25 })).unwrap();
        let bad: Money = serde_json::from_value(serde_json::json!({ "amount": "n/a" })).unwrap();
        assert_eq!(s.value(), 12.5);
        assert_eq!(n.value(), 3.25);
        assert_eq!(bad.value(), 0.0);
    }
}
