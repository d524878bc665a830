use std::{sync::Arc, time::Duration};

use anyhow::Context;
use futures_util::future::BoxFuture;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Clear,
    Flagged { reason: String },
}

/// Reputation lookup for a joining player's identity token.
///
/// The returned future must not borrow `self`; callers run it on a separate
/// task under their own timeout.
pub trait ReputationGate: Send + Sync + 'static {
    fn lookup(&self, xuid: &str) -> BoxFuture<'static, anyhow::Result<Verdict>>;
}

#[derive(Debug, serde::Deserialize)]
struct LookupResponse {
    #[serde(default)]
    exists: bool,
    #[serde(default)]
    reason: String,
}

impl From<LookupResponse> for Verdict {
    fn from(r: LookupResponse) -> Self {
        if r.exists {
            let reason = r.reason.trim();
            Verdict::Flagged {
                reason: if reason.is_empty() {
                    "flagged".to_string()
                } else {
                    reason.to_string()
                },
            }
        } else {
            Verdict::Clear
        }
    }
}

/// `GET <endpoint>?xuid=<xuid>` returning `{"exists": bool, "reason": string}`.
#[derive(Debug, Clone)]
pub struct HttpReputationGate {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpReputationGate {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("zephyr-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build reputation http client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

impl ReputationGate for HttpReputationGate {
    fn lookup(&self, xuid: &str) -> BoxFuture<'static, anyhow::Result<Verdict>> {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let xuid = xuid.to_string();
        Box::pin(async move {
            let resp = client
                .get(&endpoint)
                .query(&[("xuid", xuid.as_str())])
                .send()
                .await
                .with_context(|| format!("reputation lookup for {xuid}"))?
                .error_for_status()
                .context("reputation service returned an error status")?;
            let body: LookupResponse = resp
                .json()
                .await
                .context("decode reputation response")?;
            Ok(body.into())
        })
    }
}

/// Builds the configured gate; an empty endpoint disables lookups.
pub fn from_endpoint(
    endpoint: &str,
    timeout: Duration,
) -> anyhow::Result<Option<Arc<dyn ReputationGate>>> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Ok(None);
    }
    let gate = HttpReputationGate::new(endpoint, timeout)?;
    Ok(Some(Arc::new(gate)))
}
