use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::json;

use super::models::{GraphQlResponse, OrdersData, ShopData, SourceOrder};
use super::query::{
    ids_filter, updated_since_filter, ID_LOOKUP_CHUNK, MAX_PAGE_SIZE, ORDERS_QUERY, SHOP_QUERY,
};
use crate::connector::{OrderPage, OrderSource};
use crate::http::{send_with_retry, HttpError, RetryPolicy};
use mirra_common::error::{MirraError, MirraResult};
use mirra_config::{ensure_present, get_var_or, require_var};

#[derive(Debug, Clone)]
pub struct ShopifyClientConfig {
    /// `my-shop.myshopify.com`, with or without scheme.
    pub store_url: String,
    pub access_token: String,
    pub api_version: String,
    /// Admin orders listing used to build per-order links; derived from the store handle when unset.
    pub admin_order_url: Option<String>,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl ShopifyClientConfig {
    /// Load Shopify config from environment, failing on missing credentials.
    pub fn from_env() -> MirraResult<Self> {
        let mut missing = Vec::new();
        let config = Self::from_env_collecting(&mut missing);
        ensure_present(&missing)?;
        Ok(config)
    }

    /// Like [`from_env`](Self::from_env) but records missing names instead of failing,
    /// so several connectors can report together.
    pub fn from_env_collecting(missing: &mut Vec<String>) -> Self {
        Self {
            store_url: require_var("SHOPIFY_STORE_URL", missing),
            access_token: require_var("SHOPIFY_ACCESS_TOKEN", missing),
            api_version: get_var_or("SHOPIFY_API_VERSION", "2024-01"),
            admin_order_url: std::env::var("SHOPIFY_ADMIN_ORDER_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            max_retries: std::env::var("SHOPIFY_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            timeout_secs: std::env::var("SHOPIFY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        }
    }

    pub fn base_url(&self) -> String {
        let trimmed = self.store_url.trim().trim_end_matches('/');
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_owned()
        } else {
            format!("https://{trimmed}")
        }
    }

    pub fn graphql_url(&self) -> String {
        format!("{}/admin/api/{}/graphql.json", self.base_url(), self.api_version)
    }

    /// `https://admin.shopify.com/store/{handle}/orders` unless configured explicitly.
    pub fn admin_order_url_base(&self) -> Option<String> {
        if let Some(url) = &self.admin_order_url {
            return Some(url.trim_end_matches('/').to_owned());
        }
        let host = self
            .store_url
            .trim()
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        let handle = host.split('.').next().filter(|h| !h.is_empty())?;
        host.contains(".myshopify.com")
            .then(|| format!("https://admin.shopify.com/store/{handle}/orders"))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ShopifyClientError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("GraphQL errors: {0}")]
    GraphQl(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<ShopifyClientError> for MirraError {
    fn from(e: ShopifyClientError) -> Self {
        MirraError::Source(format!("shopify: {e}"))
    }
}

#[derive(Clone)]
pub struct ShopifyClient {
    client: Client,
    config: ShopifyClientConfig,
    retry: RetryPolicy,
}

impl ShopifyClient {
    pub fn new(config: ShopifyClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let retry = RetryPolicy::new(config.max_retries);
        Ok(Self {
            client,
            config,
            retry,
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &ShopifyClientConfig {
        &self.config
    }

    async fn post_graphql<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, ShopifyClientError> {
        let url = self.config.graphql_url();
        let body = json!({ "query": query, "variables": variables });

        let response = send_with_retry(&self.retry, || {
            self.client
                .post(&url)
                .header("X-Shopify-Access-Token", &self.config.access_token)
                .json(&body)
        })
        .await?;

        let parsed: GraphQlResponse<T> = response
            .json()
            .await
            .map_err(|e| ShopifyClientError::Malformed(e.to_string()))?;

        if let Some(errors) = parsed.errors.filter(|e| !e.is_null()) {
            return Err(ShopifyClientError::GraphQl(errors.to_string()));
        }
        parsed
            .data
            .ok_or_else(|| ShopifyClientError::Malformed("response carried no data".to_owned()))
    }

    /// One page of `orders`. `first` is clamped to the connection's page cap.
    pub async fn fetch_orders_page(
        &self,
        search: Option<&str>,
        reverse: bool,
        first: usize,
        after: Option<&str>,
    ) -> Result<OrderPage, ShopifyClientError> {
        let first = first.clamp(1, MAX_PAGE_SIZE);
        let data: OrdersData = self
            .post_graphql(
                ORDERS_QUERY,
                json!({
                    "first": first,
                    "after": after,
                    "query": search,
                    "reverse": reverse,
                }),
            )
            .await?;

        let page_info = data.orders.page_info;
        let orders: Vec<SourceOrder> = data.orders.edges.into_iter().map(|edge| edge.node).collect();
        tracing::debug!(page_len = orders.len(), has_next = page_info.has_next_page, "fetched orders page");

        let next_cursor = page_info
            .end_cursor
            .filter(|_| page_info.has_next_page && !orders.is_empty());
        Ok(OrderPage {
            orders,
            next_cursor,
        })
    }

    /// Page through `orders` until `limit` nodes or the end of the connection.
    pub async fn fetch_orders(
        &self,
        search: Option<&str>,
        reverse: bool,
        limit: usize,
    ) -> Result<Vec<SourceOrder>, ShopifyClientError> {
        let mut orders = Vec::new();
        let mut after: Option<String> = None;

        while orders.len() < limit {
            let page = self
                .fetch_orders_page(search, reverse, limit - orders.len(), after.as_deref())
                .await?;
            orders.extend(page.orders);
            match page.next_cursor {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        orders.truncate(limit);
        Ok(orders)
    }

    pub async fn shop_name(&self) -> Result<String, ShopifyClientError> {
        let data: ShopData = self.post_graphql(SHOP_QUERY, json!({})).await?;
        Ok(data.shop.name)
    }
}

#[async_trait]
impl OrderSource for ShopifyClient {
    async fn fetch_by_ids(&self, ids: &[String]) -> MirraResult<Vec<SourceOrder>> {
        let mut orders = Vec::new();
        for chunk in ids.chunks(ID_LOOKUP_CHUNK) {
            let Some(search) = ids_filter(chunk) else {
                tracing::warn!(?chunk, "skipping order ids that cannot be searched");
                continue;
            };
            orders.extend(self.fetch_orders(Some(&search), false, chunk.len()).await?);
        }
        Ok(orders)
    }

    async fn fetch_page(
        &self,
        checkpoint: Option<DateTime<Utc>>,
        ascending: bool,
        first: usize,
        after: Option<&str>,
    ) -> MirraResult<OrderPage> {
        let search = checkpoint.map(updated_since_filter);
        Ok(self
            .fetch_orders_page(search.as_deref(), !ascending, first, after)
            .await?)
    }

    async fn check_connection(&self) -> MirraResult<String> {
        Ok(self.shop_name().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reqwest::StatusCode;
    use serde_json::Value;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const GRAPHQL_PATH: &str = "/admin/api/2024-01/graphql.json";

    fn test_config(store_url: &str) -> ShopifyClientConfig {
        ShopifyClientConfig {
            store_url: store_url.to_string(),
            access_token: "shpat_test".to_string(),
            api_version: "2024-01".to_string(),
            admin_order_url: None,
            max_retries: 2,
            timeout_secs: 5,
        }
    }

    fn test_client(server: &MockServer) -> ShopifyClient {
        ShopifyClient::new(test_config(&server.uri()))
            .unwrap()
            .with_retry_policy(RetryPolicy {
                max_retries: 2,
                backoff_unit: Duration::from_millis(1),
            })
    }

    fn order_node(n: usize) -> Value {
        json!({
            "node": {
                "id": format!("gid://shopify/Order/{n}"),
                "legacyResourceId": n.to_string(),
                "name": format!("#{n}"),
                "updatedAt": "2026-03-01T10:00:00Z",
                "lineItems": { "edges": [] }
            }
        })
    }

    fn orders_page(range: std::ops::Range<usize>, next: Option<&str>) -> Value {
        json!({
            "data": {
                "orders": {
                    "pageInfo": { "hasNextPage": next.is_some(), "endCursor": next },
                    "edges": range.map(order_node).collect::<Vec<_>>()
                }
            }
        })
    }

    #[tokio::test]
    async fn fetch_since_single_page_ascending() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GRAPHQL_PATH))
            .and(header("X-Shopify-Access-Token", "shpat_test"))
            .and(body_partial_json(json!({
                "variables": {
                    "reverse": false,
                    "query": "updated_at:>='2026-03-01T00:00:00Z'"
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(orders_page(1..4, None)))
            .mount(&server)
            .await;

        let since = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let orders = test_client(&server)
            .fetch_since(Some(since), true, 50)
            .await
            .unwrap();
        assert_eq!(orders.len(), 3);
        assert_eq!(orders[0].source_id(), "1");
    }

    #[tokio::test]
    async fn follows_cursor_until_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GRAPHQL_PATH))
            .and(body_partial_json(json!({ "variables": { "after": "c1" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(orders_page(3..6, Some("c2"))))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(GRAPHQL_PATH))
            .and(body_partial_json(json!({ "variables": { "after": null, "first": 4 } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(orders_page(0..3, Some("c1"))))
            .mount(&server)
            .await;

        let orders = test_client(&server).fetch_orders(None, false, 4).await.unwrap();
        let ids: Vec<String> = orders.iter().map(|o| o.source_id()).collect();
        assert_eq!(ids, vec!["0", "1", "2", "3"]);
    }

    #[tokio::test]
    async fn page_hands_back_cursor_only_when_more_remain() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GRAPHQL_PATH))
            .and(body_partial_json(json!({ "variables": { "after": "c1" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(orders_page(2..3, None)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(GRAPHQL_PATH))
            .and(body_partial_json(json!({ "variables": { "after": null, "first": 2, "reverse": false } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(orders_page(0..2, Some("c1"))))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let first = client.fetch_page(None, true, 2, None).await.unwrap();
        assert_eq!(first.orders.len(), 2);
        assert_eq!(first.next_cursor.as_deref(), Some("c1"));

        let last = client.fetch_page(None, true, 2, Some("c1")).await.unwrap();
        assert_eq!(last.orders[0].source_id(), "2");
        assert!(last.next_cursor.is_none());
    }

    #[tokio::test]
    async fn graphql_errors_are_fetch_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GRAPHQL_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": [ { "message": "Throttled" } ]
            })))
            .mount(&server)
            .await;

        let err = test_client(&server).fetch_orders(None, false, 10).await.unwrap_err();
        assert!(matches!(err, ShopifyClientError::GraphQl(ref m) if m.contains("Throttled")));

        let mirra: MirraError = err.into();
        assert!(matches!(mirra, MirraError::Source(_)));
    }

    #[tokio::test]
    async fn malformed_body_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GRAPHQL_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = test_client(&server).fetch_orders(None, false, 10).await.unwrap_err();
        assert!(matches!(err, ShopifyClientError::Malformed(_)));
    }

    #[tokio::test]
    async fn unauthorized_fails_fast() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GRAPHQL_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .expect(1)
            .mount(&server)
            .await;

        let err = test_client(&server).shop_name().await.unwrap_err();
        match err {
            ShopifyClientError::Http(HttpError::Status { status, .. }) => {
                assert_eq!(status, StatusCode::UNAUTHORIZED)
            }
            other => panic!("expected Status, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_by_ids_searches_legacy_ids() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GRAPHQL_PATH))
            .and(body_partial_json(json!({
                "variables": { "query": "id:7 OR id:9", "first": 2 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "orders": {
                    "pageInfo": { "hasNextPage": false, "endCursor": null },
                    "edges": [ order_node(7), order_node(9) ]
                } }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let orders = test_client(&server)
            .fetch_by_ids(&["7".to_string(), "9".to_string()])
            .await
            .unwrap();
        assert_eq!(orders.len(), 2);
    }

    #[tokio::test]
    async fn check_connection_returns_shop_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GRAPHQL_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "shop": { "name": "Lil Nice Thing" } }
            })))
            .mount(&server)
            .await;

        let name = test_client(&server).check_connection().await.unwrap();
        assert_eq!(name, "Lil Nice Thing");
    }

    #[test]
    fn urls_from_bare_store_domain() {
        let config = test_config("lil-nice-thing.myshopify.com/");
        assert_eq!(
            config.graphql_url(),
            "https://lil-nice-thing.myshopify.com/admin/api/2024-01/graphql.json"
        );
        assert_eq!(
            config.admin_order_url_base().as_deref(),
            Some("https://admin.shopify.com/store/lil-nice-thing/orders")
        );
    }

    #[test]
    fn admin_url_override_and_unknown_host() {
        let mut config = test_config("http://127.0.0.1:9999");
        assert_eq!(config.admin_order_url_base(), None);

        config.admin_order_url = Some("https://admin.example.com/orders/".to_string());
        assert_eq!(
            config.admin_order_url_base().as_deref(),
            Some("https://admin.example.com/orders")
        );
    }
}
