//! The per-platform capability the relay supervisor drives

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

use spreadify_core::{
    models::{DestinationCredential, Platform, StreamRecord},
    Error, Result,
};

/// Where a platform expects the stream to be pushed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteTarget {
    pub platform: Platform,
    /// Remote broadcast / live video id, needed to end the broadcast
    pub broadcast_id: String,
    pub ingest_url: String,
    #[serde(skip_serializing)]
    pub stream_key: String,
}

impl RemoteTarget {
    /// Full publish URL (`<ingest_url>/<stream_key>`)
    #[must_use]
    pub fn publish_url(&self) -> String {
        format!(
            "{}/{}",
            self.ingest_url.trim_end_matches('/'),
            self.stream_key
        )
    }
}

/// A live-streaming platform a broadcast can be relayed to.
#[async_trait]
pub trait Destination: Send + Sync {
    fn platform(&self) -> Platform;

    /// Create the remote broadcast and return its ingest target
    async fn provision(
        &self,
        credential: &DestinationCredential,
        stream: &StreamRecord,
    ) -> Result<RemoteTarget>;

    /// Tell the platform the broadcast is over
    async fn end_broadcast(
        &self,
        credential: &DestinationCredential,
        target: &RemoteTarget,
    ) -> Result<()>;

    /// Copy-only forwarding from the local feed to the remote target
    fn forwarding_args(&self, local_url: &str, target: &RemoteTarget) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "warning".into(),
            "-i".into(),
            local_url.into(),
            "-c".into(),
            "copy".into(),
            "-f".into(),
            "flv".into(),
            target.publish_url(),
        ]
    }
}

/// Shared HTTP client for platform API calls
pub fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {e}")))
}

pub(crate) fn transport_error(platform: Platform, err: &reqwest::Error) -> Error {
    Error::PlatformRejected {
        platform,
        status: err.status().map(|s| s.as_u16()),
        message: format!("request failed: {err}"),
    }
}

/// Pass 2xx responses through; anything else becomes `PlatformRejected`
pub(crate) async fn check_status(platform: Platform, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::PlatformRejected {
        platform,
        status: Some(status.as_u16()),
        message: if body.is_empty() {
            status.to_string()
        } else {
            body
        },
    })
}

pub(crate) async fn read_json<T: DeserializeOwned>(
    platform: Platform,
    response: Response,
) -> Result<T> {
    let status = response.status().as_u16();
    response
        .json()
        .await
        .map_err(|e| Error::PlatformRejected {
            platform,
            status: Some(status),
            message: format!("unexpected response: {e}"),
        })
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
