use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::shopify::models::{LineItem, SourceOrder, Transaction};

/// Variant title Shopify uses for products without options.
const DEFAULT_VARIANT_TITLE: &str = "Default Title";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Authorized,
    PartiallyPaid,
    Paid,
    PartiallyRefunded,
    Refunded,
    Voided,
    Expired,
    Unknown,
}

impl PaymentStatus {
    /// Map an explicit financial status (`PAID`, `partially_refunded`, ...).
    pub fn from_source(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "authorized" => Some(Self::Authorized),
            "partially_paid" => Some(Self::PartiallyPaid),
            "paid" => Some(Self::Paid),
            "partially_refunded" => Some(Self::PartiallyRefunded),
            "refunded" => Some(Self::Refunded),
            "voided" => Some(Self::Voided),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Infer a status from the successful transactions of an order.
    pub fn derive(transactions: &[Transaction]) -> Self {
        let succeeded = |kinds: &[&str]| {
            transactions.iter().any(|t| {
                is_status(t, "success")
                    && t.kind
                        .as_deref()
                        .is_some_and(|k| kinds.iter().any(|want| k.eq_ignore_ascii_case(want)))
            })
        };

        let voided = succeeded(&["void"]);
        let refunded = succeeded(&["refund"]);
        let sold = succeeded(&["sale", "capture"]);
        let pending = succeeded(&["authorization"])
            || transactions
                .iter()
                .any(|t| is_status(t, "pending") || is_status(t, "awaiting_response"));

        if voided {
            Self::Voided
        } else if refunded && sold {
            Self::PartiallyRefunded
        } else if refunded {
            Self::Refunded
        } else if sold {
            Self::Paid
        } else if pending {
            Self::Pending
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Authorized => "authorized",
            Self::PartiallyPaid => "partially_paid",
            Self::Paid => "paid",
            Self::PartiallyRefunded => "partially_refunded",
            Self::Refunded => "refunded",
            Self::Voided => "voided",
            Self::Expired => "expired",
            Self::Unknown => "unknown",
        }
    }

    /// Human-readable option name for the destination's select property.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Authorized => "Authorized",
            Self::PartiallyPaid => "Partially paid",
            Self::Paid => "Paid",
            Self::PartiallyRefunded => "Partially refunded",
            Self::Refunded => "Refunded",
            Self::Voided => "Voided",
            Self::Expired => "Expired",
            Self::Unknown => "Unknown",
        }
    }
}

fn is_status(t: &Transaction, want: &str) -> bool {
    t.status
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case(want))
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedLineItem {
    pub product_name: String,
    pub sku: String,
    pub listed_amount: f64,
    pub sold_amount: f64,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedOrder {
    pub source_order_id: String,
    pub display_name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub source_updated_at: Option<DateTime<Utc>>,
    pub customer_name: String,
    pub customer_email: String,
    pub admin_url: Option<String>,
    pub total_tax: f64,
    pub total_fees: f64,
    pub payment_status: PaymentStatus,
    pub line_items: Vec<NormalizedLineItem>,
    pub total_listed: f64,
    pub total_sold: f64,
}

/// Flat property set for one destination record.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationRecord {
    pub title: String,
    pub product_name: String,
    pub date: Option<DateTime<Utc>>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub sku: Option<String>,
    pub admin_url: Option<String>,
    pub payment_status: Option<PaymentStatus>,
    pub listed: f64,
    pub sold: f64,
    pub tax: f64,
    pub fee: f64,
    /// Destination ID of the parent record, filled in once the parent exists.
    pub parent_id: Option<String>,
}

impl DestinationRecord {
    pub fn net_earning(&self) -> f64 {
        self.sold - self.fee
    }

    pub fn to_payouts(&self) -> f64 {
        self.sold + self.tax - self.fee
    }
}

/// Records to create for one order: the primary first, then any children.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordPlan {
    pub primary: DestinationRecord,
    pub children: Vec<DestinationRecord>,
}

impl RecordPlan {
    pub fn len(&self) -> usize {
        1 + self.children.len()
    }
}

impl NormalizedOrder {
    pub fn is_multi_item(&self) -> bool {
        self.line_items.len() > 1
    }

    pub fn plan(&self) -> RecordPlan {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_owned());

        let mut primary = DestinationRecord {
            title: self.display_name.clone(),
            product_name: String::new(),
            date: self.created_at,
            customer_name: non_empty(&self.customer_name),
            customer_email: non_empty(&self.customer_email),
            sku: None,
            admin_url: self.admin_url.clone(),
            payment_status: Some(self.payment_status),
            listed: self.total_listed,
            sold: self.total_sold,
            tax: self.total_tax,
            fee: self.total_fees,
            parent_id: None,
        };

        if !self.is_multi_item() {
            if let Some(item) = self.line_items.first() {
                primary.product_name = item.product_name.clone();
                primary.sku = non_empty(&item.sku);
            }
            return RecordPlan {
                primary,
                children: Vec::new(),
            };
        }

        primary.product_name = format!("{} items", self.line_items.len());
        let children = self
            .line_items
            .iter()
            .enumerate()
            .map(|(idx, item)| DestinationRecord {
                title: format!("{}.{}", self.display_name, idx + 1),
                product_name: item.product_name.clone(),
                date: None,
                customer_name: None,
                customer_email: None,
                sku: non_empty(&item.sku),
                admin_url: None,
                payment_status: None,
                listed: item.listed_amount,
                sold: item.sold_amount,
                tax: 0.0,
                fee: fee_share(self.total_fees, item.sold_amount, self.total_sold),
                parent_id: None,
            })
            .collect();

        RecordPlan { primary, children }
    }
}

fn fee_share(total_fees: f64, sold: f64, total_sold: f64) -> f64 {
    if total_sold > 0.0 {
        total_fees * (sold / total_sold)
    } else {
        0.0
    }
}

fn product_name(item: &LineItem) -> String {
    let title = item.title.clone().unwrap_or_default();
    match item.variant.as_ref().and_then(|v| v.title.as_deref()) {
        Some(variant) if !variant.is_empty() && variant != DEFAULT_VARIANT_TITLE => {
            format!("{title} – {variant}")
        }
        _ => title,
    }
}

fn normalize_line_item(item: &LineItem) -> NormalizedLineItem {
    let quantity = item.quantity.unwrap_or(1);
    let unit = |set: &Option<crate::shopify::models::MoneyBag>| {
        set.as_ref().map(|s| s.amount()).unwrap_or(0.0)
    };

    NormalizedLineItem {
        product_name: product_name(item),
        sku: item
            .variant
            .as_ref()
            .and_then(|v| v.sku.clone())
            .unwrap_or_default(),
        listed_amount: unit(&item.original_unit_price_set) * quantity as f64,
        sold_amount: unit(&item.discounted_unit_price_set) * quantity as f64,
        quantity,
    }
}

/// Normalize one source order. Pure; missing nested data becomes zero or empty.
///
/// `admin_order_url_base` is the admin orders listing (no trailing slash); the
/// order's legacy ID is appended to it.
pub fn transform(order: &SourceOrder, admin_order_url_base: Option<&str>) -> NormalizedOrder {
    let line_items: Vec<NormalizedLineItem> = order
        .line_items
        .edges
        .iter()
        .map(|edge| normalize_line_item(&edge.node))
        .collect();

    let total_fees = order
        .transactions
        .iter()
        .flat_map(|t| t.fees.iter())
        .filter_map(|fee| fee.amount.as_ref())
        .map(|money| money.value())
        .sum();

    let payment_status = order
        .display_financial_status
        .as_deref()
        .and_then(PaymentStatus::from_source)
        .unwrap_or_else(|| PaymentStatus::derive(&order.transactions));

    let admin_url = match (admin_order_url_base, order.legacy_resource_id.as_deref()) {
        (Some(base), Some(id)) if !id.is_empty() => {
            Some(format!("{}/{id}", base.trim_end_matches('/')))
        }
        _ => None,
    };

    NormalizedOrder {
        source_order_id: order.source_id(),
        display_name: order.name.clone(),
        created_at: order.created_at,
        source_updated_at: order.updated_at,
        customer_name: order
            .customer
            .as_ref()
            .and_then(|c| c.display_name.clone())
            .unwrap_or_default(),
        customer_email: order.email.clone().unwrap_or_default(),
        admin_url,
        total_tax: order
            .total_tax_set
            .as_ref()
            .map(|s| s.amount())
            .unwrap_or(0.0),
        total_fees,
        payment_status,
        total_listed: line_items.iter().map(|i| i.listed_amount).sum(),
        total_sold: line_items.iter().map(|i| i.sold_amount).sum(),
        line_items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order(value: serde_json::Value) -> SourceOrder {
        serde_json::from_value(value).expect("valid order json")
    }

    fn line(title: &str, variant: &str, sku: &str, original: &str, sold: &str, qty: i64) -> serde_json::Value {
        json!({
            "node": {
                "title": title,
                "quantity": qty,
                "variant": { "title": variant, "sku": sku },
                "originalUnitPriceSet": { "presentmentMoney": { "amount": original, "currencyCode": "EUR" } },
                "discountedUnitPriceSet": { "presentmentMoney": { "amount": sold, "currencyCode": "EUR" } }
            }
        })
    }

    fn txn(kind: &str, status: &str) -> Transaction {
        Transaction {
            kind: Some(kind.to_owned()),
            status: Some(status.to_owned()),
            fees: Vec::new(),
        }
    }

    #[test]
    fn single_item_order_becomes_one_record() {
        let o = order(json!({
            "id": "gid://shopify/Order/5001",
            "legacyResourceId": "5001",
            "name": "#1001",
            "createdAt": "2026-03-01T10:00:00Z",
            "email": "ana@example.com",
            "customer": { "displayName": "Ana" },
            "totalTaxSet": { "presentmentMoney": { "amount": "4.00" } },
            "transactions": [
                { "kind": "SALE", "status": "SUCCESS", "fees": [ { "amount": { "amount": "1.50" } } ] }
            ],
            "lineItems": { "edges": [ line("Mug", "Default Title", "MUG-1", "12.00", "10.00", 2) ] }
        }));

        let n = transform(&o, Some("https://admin.shopify.com/store/shop/orders/"));
        assert!(!n.is_multi_item());
        assert_eq!(n.source_order_id, "5001");
        assert_eq!(n.line_items[0].product_name, "Mug");
        assert_eq!(n.total_listed, 24.0);
        assert_eq!(n.total_sold, 20.0);
        assert_eq!(n.total_fees, 1.5);
        assert_eq!(n.payment_status, PaymentStatus::Paid);
        assert_eq!(
            n.admin_url.as_deref(),
            Some("https://admin.shopify.com/store/shop/orders/5001")
        );

        let plan = n.plan();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.primary.title, "#1001");
        assert_eq!(plan.primary.product_name, "Mug");
        assert_eq!(plan.primary.sku.as_deref(), Some("MUG-1"));
        assert_eq!(plan.primary.tax, 4.0);
        assert_eq!(plan.primary.net_earning(), 18.5);
        assert_eq!(plan.primary.to_payouts(), 22.5);
    }

    #[test]
    fn multi_item_order_becomes_parent_and_children() {
        let o = order(json!({
            "id": "gid://shopify/Order/5002",
            "legacyResourceId": "5002",
            "name": "#1002",
            "totalTaxSet": { "presentmentMoney": { "amount": "6.00" } },
            "transactions": [
                { "kind": "SALE", "status": "SUCCESS", "fees": [ { "amount": { "amount": "3.00" } } ] },
                { "kind": "CAPTURE", "status": "SUCCESS", "fees": [] }
            ],
            "lineItems": { "edges": [
                line("Shirt", "M / Blue", "SH-M", "20.00", "15.00", 1),
                line("Socks", "Default Title", "SO-1", "5.00", "5.00", 1),
                line("Cap", "", "", "10.00", "10.00", 1)
            ] }
        }));

        let n = transform(&o, None);
        assert!(n.is_multi_item());
        assert_eq!(n.line_items[0].product_name, "Shirt – M / Blue");
        assert_eq!(n.line_items[1].product_name, "Socks");
        assert_eq!(n.line_items[2].product_name, "Cap");

        let plan = n.plan();
        assert_eq!(plan.len(), 4);
        assert_eq!(plan.primary.product_name, "3 items");
        assert_eq!(plan.primary.tax, 6.0);

        let titles: Vec<&str> = plan.children.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["#1002.1", "#1002.2", "#1002.3"]);

        let listed: f64 = plan.children.iter().map(|c| c.listed).sum();
        let sold: f64 = plan.children.iter().map(|c| c.sold).sum();
        assert_eq!(plan.primary.listed, listed);
        assert_eq!(plan.primary.sold, sold);

        for child in &plan.children {
            assert_eq!(child.tax, 0.0);
            assert!(child.date.is_none());
            assert!(child.admin_url.is_none());
        }
        let fees: f64 = plan.children.iter().map(|c| c.fee).sum();
        assert!((fees - 3.0).abs() < 1e-9);
        assert!((plan.children[0].fee - 1.5).abs() < 1e-9);
    }

    #[test]
    fn empty_order_still_yields_one_record() {
        let o = order(json!({ "id": "gid://shopify/Order/9", "name": "#9" }));
        let n = transform(&o, None);
        assert!(n.line_items.is_empty());
        assert_eq!(n.payment_status, PaymentStatus::Unknown);

        let plan = n.plan();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.primary.product_name, "");
        assert_eq!(plan.primary.sold, 0.0);
        assert!(plan.primary.customer_name.is_none());
    }

    #[test]
    fn zero_sold_children_get_no_fee() {
        assert_eq!(fee_share(3.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn explicit_status_wins_over_transactions() {
        let o = order(json!({
            "id": "gid://shopify/Order/1",
            "name": "#1",
            "displayFinancialStatus": "PARTIALLY_REFUNDED",
            "transactions": [ { "kind": "SALE", "status": "SUCCESS" } ]
        }));
        assert_eq!(transform(&o, None).payment_status, PaymentStatus::PartiallyRefunded);
    }

    #[test]
    fn unmapped_explicit_status_falls_back_to_derivation() {
        let o = order(json!({
            "id": "gid://shopify/Order/1",
            "name": "#1",
            "displayFinancialStatus": "SOMETHING_NEW",
            "transactions": [ { "kind": "SALE", "status": "SUCCESS" } ]
        }));
        assert_eq!(transform(&o, None).payment_status, PaymentStatus::Paid);
    }

    #[test]
    fn derivation_precedence() {
        use PaymentStatus::*;
        assert_eq!(PaymentStatus::derive(&[txn("SALE", "SUCCESS"), txn("VOID", "SUCCESS")]), Voided);
        assert_eq!(
            PaymentStatus::derive(&[txn("SALE", "SUCCESS"), txn("REFUND", "SUCCESS")]),
            PartiallyRefunded
        );
        assert_eq!(PaymentStatus::derive(&[txn("REFUND", "SUCCESS")]), Refunded);
        assert_eq!(PaymentStatus::derive(&[txn("SALE", "SUCCESS"), txn("REFUND", "FAILURE")]), Paid);
        assert_eq!(PaymentStatus::derive(&[txn("AUTHORIZATION", "SUCCESS")]), Pending);
        assert_eq!(PaymentStatus::derive(&[txn("SALE", "PENDING")]), Pending);
        assert_eq!(PaymentStatus::derive(&[txn("SALE", "FAILURE")]), Unknown);
        assert_eq!(PaymentStatus::derive(&[]), Unknown);
    }
}
