//! Integration tests against a real Chrome installation.

use quarry_browser::ChromiumFactory;
use quarry_core::config::BrowserSettings;
use quarry_pool::{AcquireOptions, BrowserPool, ClientFactory, PoolConfig};
use std::sync::Arc;

#[tokio::test]
#[ignore = "Requires Chrome browser to be installed"]
async fn test_launch_and_mint_page() {
    let factory = ChromiumFactory::new(BrowserSettings::default());
    let client = factory.connect().await.expect("launch browser");
    assert!(client.is_connected());

    let page = client
        .create_page(&AcquireOptions::default())
        .await
        .expect("create page");
    let url = page.url().await.expect("query url");
    assert_eq!(url.as_deref(), Some("about:blank"));

    page.close().await.expect("close page");
    client.disconnect().await.expect("disconnect");
    assert!(!client.is_connected());
}

#[tokio::test]
#[ignore = "Requires Chrome browser to be installed"]
async fn test_pool_over_real_browser() {
    let factory = Arc::new(ChromiumFactory::new(BrowserSettings::default()));
    let pool = BrowserPool::new(PoolConfig::default(), factory);

    let page = pool
        .acquire_page(&AcquireOptions {
            incognito: true,
            user_agent: Some("quarry-integration-test".to_string()),
        })
        .await
        .expect("acquire page");

    let stats = pool.stats();
    assert_eq!(stats.total_entries, 1);
    assert_eq!(stats.active_contexts, 1);

    page.close().await;
    pool.shutdown().await;
}
