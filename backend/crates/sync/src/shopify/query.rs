use chrono::{DateTime, SecondsFormat, Utc};

/// Shopify caps a connection page at 250 nodes.
pub const MAX_PAGE_SIZE: usize = 250;

/// How many `id:` terms go into one search string.
pub const ID_LOOKUP_CHUNK: usize = 50;

pub const ORDERS_QUERY: &str = r#"
query Orders($first: Int!, $after: String, $query: String, $reverse: Boolean!) {
  orders(first: $first, after: $after, query: $query, sortKey: UPDATED_AT, reverse: $reverse) {
    pageInfo {
      hasNextPage
      endCursor
    }
    edges {
      node {
        id
        legacyResourceId
        name
        createdAt
        updatedAt
        email
        displayFinancialStatus
        customer {
          displayName
        }
        totalTaxSet {
          presentmentMoney {
            amount
            currencyCode
          }
        }
        transactions {
          kind
          status
          fees {
            amount {
              amount
              currencyCode
            }
          }
        }
        lineItems(first: 250) {
          edges {
            node {
              title
              quantity
              variant {
                title
                sku
              }
              originalUnitPriceSet {
                presentmentMoney {
                  amount
                  currencyCode
                }
              }
              discountedUnitPriceSet {
                presentmentMoney {
                  amount
                  currencyCode
                }
              }
            }
          }
        }
      }
    }
  }
}
"#;

pub const SHOP_QUERY: &str = "query { shop { name } }";

/// Search string for orders updated at or after `since`.
///
/// Generates: `updated_at:>='2026-02-15T00:00:00Z'`
pub fn updated_since_filter(since: DateTime<Utc>) -> String {
    format!(
        "updated_at:>='{}'",
        since.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

/// Search string matching any of the given legacy order IDs.
///
/// Generates: `id:1001 OR id:1002`. Non-numeric IDs are dropped.
pub fn ids_filter(ids: &[String]) -> Option<String> {
    let terms: Vec<String> = ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
        .map(|id| format!("id:{id}"))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}
