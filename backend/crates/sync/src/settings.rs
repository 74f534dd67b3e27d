use std::sync::Arc;

use crate::connector::{DestinationWriter, OrderSource};
use crate::notion::{NotionClient, NotionClientConfig};
use crate::shopify::{ShopifyClient, ShopifyClientConfig};
use mirra_common::error::{MirraError, MirraResult};
use mirra_config::ensure_present;

/// Credentials and tuning for both ends of the sync.
#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    pub shopify: ShopifyClientConfig,
    pub notion: NotionClientConfig,
}

/// Live clients built from [`ConnectorSettings`].
#[derive(Clone)]
pub struct Connectors {
    pub source: Arc<dyn OrderSource>,
    pub destination: Arc<dyn DestinationWriter>,
    pub admin_order_url_base: Option<String>,
}

impl ConnectorSettings {
    /// Load both connector configs, reporting every missing variable at once.
    pub fn from_env() -> MirraResult<Self> {
        let mut missing = Vec::new();
        let shopify = ShopifyClientConfig::from_env_collecting(&mut missing);
        let notion = NotionClientConfig::from_env_collecting(&mut missing);
        ensure_present(&missing)?;
        Ok(Self { shopify, notion })
    }

    pub fn connect(&self) -> MirraResult<Connectors> {
        let shopify = ShopifyClient::new(self.shopify.clone())
            .map_err(|e| MirraError::Config(format!("failed to build shopify client: {e}")))?;
        let notion = NotionClient::new(self.notion.clone())
            .map_err(|e| MirraError::Config(format!("failed to build notion client: {e}")))?;
        Ok(Connectors {
            source: Arc::new(shopify),
            destination: Arc::new(notion),
            admin_order_url_base: self.shopify.admin_order_url_base(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const VARS: [&str; 4] = [
        "SHOPIFY_STORE_URL",
        "SHOPIFY_ACCESS_TOKEN",
        "NOTION_TOKEN",
        "NOTION_DATABASE_ID",
    ];

    #[test]
    fn reports_all_missing_variables() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        for key in VARS {
            env::remove_var(key);
        }
        env::set_var("SHOPIFY_STORE_URL", "shop.myshopify.com");

        let err = ConnectorSettings::from_env().unwrap_err().to_string();
        assert!(err.contains("SHOPIFY_ACCESS_TOKEN"), "got: {err}");
        assert!(err.contains("NOTION_TOKEN"), "got: {err}");
        assert!(err.contains("NOTION_DATABASE_ID"), "got: {err}");
        assert!(!err.contains("SHOPIFY_STORE_URL"), "got: {err}");
        env::remove_var("SHOPIFY_STORE_URL");
    }

    #[test]
    fn loads_defaults_when_credentials_present() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        for key in VARS {
            env::set_var(key, "x");
        }
        env::set_var("SHOPIFY_STORE_URL", "lil-nice-thing.myshopify.com");
        env::remove_var("SHOPIFY_API_VERSION");
        env::remove_var("NOTION_MIN_INTERVAL_MS");

        let settings = ConnectorSettings::from_env().expect("should load");
        assert_eq!(settings.shopify.api_version, "2024-01");
        assert_eq!(settings.notion.min_interval_ms, 350);
        assert_eq!(settings.shopify.max_retries, 3);

        let connectors = settings.connect().expect("clients build");
        assert_eq!(
            connectors.admin_order_url_base.as_deref(),
            Some("https://admin.shopify.com/store/lil-nice-thing/orders")
        );
        for key in VARS {
            env::remove_var(key);
        }
    }
}
