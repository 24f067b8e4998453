use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::backend::{BackendError, DevSpliceResponse, SpliceBackend};

const DEV_SPLICE_ROUTE: &str = "/v1/dev-splice";

#[derive(Debug, Serialize)]
struct DevSpliceRequest<'a> {
    script_or_json: &'a str,
    dryrun: bool,
    force_feerate: bool,
}

/// Core Lightning `clnrest` client, authenticated with a rune.
#[derive(Clone)]
pub struct ClnRestClient {
    http: reqwest::Client,
    base_url: String,
    rune: String,
    timeout: Duration,
}

impl ClnRestClient {
    pub fn new(
        rest_address: &str,
        rune: String,
        timeout: Duration,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .context("build http client")?;

        Ok(Self {
            http,
            base_url: normalize_base_url(rest_address),
            rune,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_send_error(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl SpliceBackend for ClnRestClient {
    async fn dev_splice(
        &self,
        script: &str,
        dry_run: bool,
        force_feerate: bool,
    ) -> Result<DevSpliceResponse, BackendError> {
        let url = format!("{}{DEV_SPLICE_ROUTE}", self.base_url);
        tracing::debug!(%url, dry_run, force_feerate, "dev-splice request");

        let resp = self
            .http
            .post(&url)
            .header("Rune", &self.rune)
            .json(&DevSpliceRequest {
                script_or_json: script,
                dryrun: dry_run,
                force_feerate,
            })
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.map_send_error(e))?;

        if status.as_u16() >= 300 {
            return Err(BackendError::Rejected {
                status: Some(status.as_u16()),
                payload: rejection_payload(status.as_u16(), &body),
            });
        }

        decode_response(&body)
    }
}

fn normalize_base_url(rest_address: &str) -> String {
    let with_scheme = if rest_address.contains("://") {
        rest_address.to_string()
    } else {
        format!("https://{rest_address}")
    };
    with_scheme.trim_end_matches('/').to_string()
}

// clnrest may stream several JSON documents; the last complete one is the reply.
fn decode_response(body: &str) -> Result<DevSpliceResponse, BackendError> {
    let doc = body
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("");
    serde_json::from_str(doc).map_err(|e| BackendError::Decode(format!("{e}: {doc}")))
}

fn rejection_payload(status: u16, body: &str) -> Value {
    if body.trim().is_empty() {
        return Value::String(format!("HTTP {status}"));
    }

    match serde_json::from_str::<Value>(body) {
        Ok(json) => {
            let nested = json
                .get("error")
                .and_then(|e| e.get("message"))
                .filter(|m| !m.is_null());
            let picked = nested
                .or_else(|| json.get("message").filter(|m| !m.is_null()))
                .or_else(|| json.get("error").filter(|m| !m.is_null()));
            picked.cloned().unwrap_or(json)
        }
        Err(_) => Value::String(body.to_string()),
    }
}
