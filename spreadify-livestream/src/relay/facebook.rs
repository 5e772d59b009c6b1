//! Facebook Live destination

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use spreadify_core::{
    models::{DestinationCredential, Platform, StreamRecord},
    Error, Result,
};

use super::destination::{check_status, join_url, read_json, transport_error, Destination, RemoteTarget};

const PLATFORM: Platform = Platform::Facebook;

pub struct FacebookDestination {
    http: Client,
    api_base: String,
}

#[derive(Deserialize)]
struct LiveVideo {
    id: String,
    stream_url: String,
    #[serde(default)]
    stream_key: Option<String>,
}

impl FacebookDestination {
    pub fn new(http: Client, api_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into(),
        }
    }
}

/// Split a Graph API `stream_url` into ingest base and key (its last path segment)
fn split_stream_url(stream_url: &str) -> Result<(String, String)> {
    let mut url = Url::parse(stream_url).map_err(|e| Error::PlatformRejected {
        platform: PLATFORM,
        status: None,
        message: format!("invalid stream_url: {e}"),
    })?;

    let mut segments: Vec<String> = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).map(String::from).collect())
        .unwrap_or_default();
    let key = segments.pop().ok_or_else(|| Error::PlatformRejected {
        platform: PLATFORM,
        status: None,
        message: "stream_url carries no stream key".to_string(),
    })?;
    let query = url.query().map(str::to_string);

    url.set_query(None);
    url.set_path(&segments.join("/"));
    let key = match query {
        Some(q) => format!("{key}?{q}"),
        None => key,
    };
    Ok((url.to_string().trim_end_matches('/').to_string(), key))
}

#[async_trait]
impl Destination for FacebookDestination {
    fn platform(&self) -> Platform {
        PLATFORM
    }

    async fn provision(
        &self,
        credential: &DestinationCredential,
        stream: &StreamRecord,
    ) -> Result<RemoteTarget> {
        let response = self
            .http
            .post(join_url(&self.api_base, "me/live_videos"))
            .query(&[("access_token", credential.access_token.as_str())])
            .json(&json!({
                "title": stream.title,
                "description": stream.description,
                "status": "LIVE_NOW",
            }))
            .send()
            .await
            .map_err(|e| transport_error(PLATFORM, &e))?;
        let video: LiveVideo = read_json(PLATFORM, check_status(PLATFORM, response).await?).await?;

        let (ingest_url, stream_key) = match video.stream_key {
            Some(key) if !key.is_empty() => {
                let (base, _) = split_stream_url(&video.stream_url)?;
                (base, key)
            }
            _ => split_stream_url(&video.stream_url)?,
        };

        Ok(RemoteTarget {
            platform: PLATFORM,
            broadcast_id: video.id,
            ingest_url,
            stream_key,
        })
    }

    async fn end_broadcast(
        &self,
        credential: &DestinationCredential,
        target: &RemoteTarget,
    ) -> Result<()> {
        let response = self
            .http
            .post(join_url(&self.api_base, &target.broadcast_id))
            .query(&[
                ("access_token", credential.access_token.as_str()),
                ("end_live_video", "true"),
            ])
            .send()
            .await
            .map_err(|e| transport_error(PLATFORM, &e))?;
        check_status(PLATFORM, response).await?;
        Ok(())
    }
}
