use serde_json::{json, Map, Value};

use crate::transform::DestinationRecord;

pub const ORDER_ID: &str = "Order ID";
pub const PRODUCT_NAME: &str = "Product name";
pub const LISTED_FOR: &str = "Listed for";
pub const SOLD_FOR: &str = "Sold for";
pub const TAX: &str = "Tax";
pub const FEE: &str = "Fee";
pub const NET_EARNING: &str = "Net earning";
pub const TO_PAYOUTS: &str = "To payouts";
pub const DATE: &str = "Date";
pub const CUSTOMER_NAME: &str = "Customer name";
pub const CUSTOMER_EMAIL: &str = "Customer Email";
pub const SKU: &str = "SKU";
pub const SHOPIFY_URL: &str = "Shopify URL";
pub const PAYMENT_STATUS: &str = "Payment status";
pub const PARENT_ITEM: &str = "Parent item";

fn text(content: &str) -> Value {
    json!([{ "text": { "content": content } }])
}

/// Page properties for the order database. Optional fields are omitted when empty.
pub fn record_properties(record: &DestinationRecord) -> Map<String, Value> {
    let mut props = Map::new();
    props.insert(ORDER_ID.into(), json!({ "title": text(&record.title) }));
    props.insert(PRODUCT_NAME.into(), json!({ "rich_text": text(&record.product_name) }));
    props.insert(LISTED_FOR.into(), json!({ "number": record.listed }));
    props.insert(SOLD_FOR.into(), json!({ "number": record.sold }));
    props.insert(TAX.into(), json!({ "number": record.tax }));
    props.insert(FEE.into(), json!({ "number": record.fee }));
    props.insert(NET_EARNING.into(), json!({ "number": record.net_earning() }));
    props.insert(TO_PAYOUTS.into(), json!({ "number": record.to_payouts() }));

    if let Some(date) = record.date {
        props.insert(DATE.into(), json!({ "date": { "start": date.to_rfc3339() } }));
    }
    if let Some(name) = record.customer_name.as_deref().filter(|s| !s.is_empty()) {
        props.insert(CUSTOMER_NAME.into(), json!({ "rich_text": text(name) }));
    }
    if let Some(email) = record.customer_email.as_deref().filter(|s| !s.is_empty()) {
        props.insert(CUSTOMER_EMAIL.into(), json!({ "email": email }));
    }
    if let Some(sku) = record.sku.as_deref().filter(|s| !s.is_empty()) {
        props.insert(SKU.into(), json!({ "rich_text": text(sku) }));
    }
    if let Some(url) = record.admin_url.as_deref().filter(|s| !s.is_empty()) {
        props.insert(SHOPIFY_URL.into(), json!({ "url": url }));
    }
    if let Some(status) = record.payment_status {
        props.insert(
            PAYMENT_STATUS.into(),
            json!({ "select": { "name": status.label() } }),
        );
    }
    if let Some(parent) = record.parent_id.as_deref() {
        props.insert(PARENT_ITEM.into(), json!({ "relation": [{ "id": parent }] }));
    }

    props
}
