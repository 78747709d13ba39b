mod common;

use std::time::Duration;

use anyhow::Result;
use common::ServerEnv;
use key_pool::PoolConfig;
use serde_json::Value;
use tracing_test::traced_test;

#[traced_test]
#[tokio::test]
/// runs through the standard create / checkout / release / remove flow
/// against a running server
async fn test_basic_lifecycle() -> Result<()> {
    let srv = ServerEnv::start(8895, PoolConfig::default(), Duration::from_secs(1)).await;
    let client = reqwest::Client::new();
    let base = &srv.base_url;

    // server reports healthy after startup
    let resp = client.get(format!("{base}/health")).send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    // nothing to check out yet
    let resp = client.get(format!("{base}/keys")).send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    let body: Value = client
        .post(format!("{base}/keys"))
        .send()
        .await?
        .json()
        .await?;
    let key = body["keyId"].as_str().unwrap().to_owned();

    let body: Value = client
        .get(format!("{base}/keys"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(body["keyId"], key.as_str());

    // the sole key is blocked now
    let resp = client.get(format!("{base}/keys")).send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    // release, then the same key comes back out
    client
        .put(format!("{base}/keys/{key}"))
        .send()
        .await?
        .error_for_status()?;
    let body: Value = client
        .get(format!("{base}/keys"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(body["keyId"], key.as_str());

    client
        .delete(format!("{base}/keys/{key}"))
        .send()
        .await?
        .error_for_status()?;
    let resp = client.get(format!("{base}/keys/{key}")).send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
/// a key that is checked out and never released comes back on its own once
/// the block timeout passes
async fn test_block_timeout_reclamation() -> Result<()> {
    let srv = ServerEnv::start(
        8896,
        PoolConfig {
            block_timeout: Duration::from_millis(200),
            idle_timeout: Duration::from_secs(60),
        },
        Duration::from_millis(50),
    )
    .await;
    let client = reqwest::Client::new();
    let base = &srv.base_url;

    let body: Value = client
        .post(format!("{base}/keys"))
        .send()
        .await?
        .json()
        .await?;
    let key = body["keyId"].as_str().unwrap().to_owned();
    let body: Value = client
        .get(format!("{base}/keys"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(body["keyId"], key.as_str());

    // never released; the reclaimer must bring it back
    tokio::time::sleep(Duration::from_millis(800)).await;
    let body: Value = client
        .get(format!("{base}/keys"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(body["keyId"], key.as_str());

    Ok(())
}

#[tokio::test]
/// a key nobody touches is destroyed once the idle timeout passes
async fn test_idle_expiry() -> Result<()> {
    let srv = ServerEnv::start(
        8897,
        PoolConfig {
            block_timeout: Duration::from_secs(60),
            idle_timeout: Duration::from_millis(200),
        },
        Duration::from_millis(50),
    )
    .await;
    let client = reqwest::Client::new();
    let base = &srv.base_url;

    let body: Value = client
        .post(format!("{base}/keys"))
        .send()
        .await?
        .json()
        .await?;
    let key = body["keyId"].as_str().unwrap().to_owned();

    tokio::time::sleep(Duration::from_millis(800)).await;
    let resp = client.get(format!("{base}/keys/{key}")).send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    let body: Value = resp.json().await?;
    assert_eq!(body["error"], format!("key does not exist: {key}"));

    Ok(())
}
