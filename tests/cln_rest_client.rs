use std::time::Duration;

use anyhow::{Context as _, Result};
use mockito::Matcher;
use serde_json::json;

use splice_orchestrator::config::DEFAULT_VERBATIM_MIN_LEN;
use splice_orchestrator::lightning::backend::{BackendError, SpliceBackend};
use splice_orchestrator::lightning::cln::ClnRestClient;
use splice_orchestrator::splice::classify::{FailureKind, classify_backend_error};

const TXID: &str = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";

fn client(url: &str) -> Result<ClnRestClient> {
    ClnRestClient::new(url, "rune-secret".to_string(), Duration::from_secs(5), false)
        .context("build cln client")
}

#[test]
fn rest_address_is_normalized() -> Result<()> {
    assert_eq!(client("node.local:3010/")?.base_url(), "https://node.local:3010");
    assert_eq!(
        client("http://127.0.0.1:3010")?.base_url(),
        "http://127.0.0.1:3010"
    );
    Ok(())
}

#[tokio::test]
async fn dev_splice_posts_script_with_rune() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/dev-splice")
        .match_header("rune", "rune-secret")
        .match_body(Matcher::Json(json!({
            "script_or_json": "c1 -> 1000sat+fee@500",
            "dryrun": true,
            "force_feerate": false,
        })))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "txid": TXID,
                "psbt": "cHNidP8BAA==",
                "dryrun": ["inputs: 1", "fee: 420 sat"],
            })
            .to_string(),
        )
        .create_async()
        .await;

    let resp = client(&server.url())?
        .dev_splice("c1 -> 1000sat+fee@500", true, false)
        .await
        .context("dev-splice")?;

    mock.assert_async().await;
    assert_eq!(resp.txid.as_deref(), Some(TXID));
    assert_eq!(resp.psbt.as_deref(), Some("cHNidP8BAA=="));
    assert!(resp.tx.is_none());
    assert_eq!(resp.dryrun, ["inputs: 1", "fee: 420 sat"]);
    Ok(())
}

#[tokio::test]
async fn streamed_reply_uses_last_document() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/dev-splice")
        .with_status(200)
        .with_body(format!(
            "{{\"dryrun\":[\"partial\"]}}\n{{\"txid\":\"{TXID}\",\"tx\":\"0200\"}}\n\n"
        ))
        .create_async()
        .await;

    let resp = client(&server.url())?
        .dev_splice("c1 -> 1sat+fee", false, true)
        .await
        .context("dev-splice")?;
    assert_eq!(resp.txid.as_deref(), Some(TXID));
    assert_eq!(resp.tx.as_deref(), Some("0200"));
    assert!(resp.dryrun.is_empty());
    Ok(())
}

#[tokio::test]
async fn error_reply_maps_to_rejection_and_classifies() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/dev-splice")
        .with_status(500)
        .with_body(
            json!({
                "error": {
                    "code": -1,
                    "message": "{\"message\":\"Error broadcasting: rejecting replacement 00ff\"}",
                }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let err = client(&server.url())?
        .dev_splice("c1 -> 1000sat+fee", false, false)
        .await
        .unwrap_err();

    let BackendError::Rejected { status, payload } = &err else {
        anyhow::bail!("expected rejection, got {err:?}");
    };
    assert_eq!(*status, Some(500));
    assert!(payload.is_string());

    let classified = classify_backend_error(&err, DEFAULT_VERBATIM_MIN_LEN);
    assert_eq!(classified.kind, FailureKind::ReplacementRejected);
    assert_eq!(
        classified.detail.as_deref(),
        Some("Error broadcasting: rejecting replacement 00ff")
    );
    Ok(())
}

#[tokio::test]
async fn empty_error_body_reports_status() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/dev-splice")
        .with_status(401)
        .create_async()
        .await;

    let err = client(&server.url())?
        .dev_splice("c1 -> 1sat+fee", true, false)
        .await
        .unwrap_err();
    assert_eq!(err.payload(), json!("HTTP 401"));
    Ok(())
}

#[tokio::test]
async fn garbage_success_body_is_a_decode_error() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/dev-splice")
        .with_status(200)
        .with_body("<html>proxy</html>")
        .create_async()
        .await;

    let err = client(&server.url())?
        .dev_splice("c1 -> 1sat+fee", true, false)
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Decode(_)), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn unreachable_node_is_a_transport_error() -> Result<()> {
    let err = client("http://127.0.0.1:1")?
        .dev_splice("c1 -> 1sat+fee", true, false)
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Transport(_)), "{err:?}");
    Ok(())
}
