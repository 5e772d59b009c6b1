//! Twitch destination

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;

use spreadify_core::{
    models::{DestinationCredential, Platform, StreamRecord},
    Error, Result,
};

use super::destination::{check_status, join_url, read_json, transport_error, Destination, RemoteTarget};

const PLATFORM: Platform = Platform::Twitch;

pub const TWITCH_INGEST_URL: &str = "rtmp://live.twitch.tv/app";

/// Twitch has no per-broadcast resource: provisioning retitles the channel
/// and fetches the channel's stream key.
pub struct TwitchDestination {
    http: Client,
    api_base: String,
    client_id: String,
}

#[derive(Deserialize)]
struct Page<T> {
    data: Vec<T>,
}

#[derive(Deserialize)]
struct User {
    id: String,
}

#[derive(Deserialize)]
struct StreamKey {
    stream_key: String,
}

impl TwitchDestination {
    pub fn new(http: Client, api_base: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            client_id: client_id.into(),
        }
    }

    fn request(&self, builder: RequestBuilder, token: &str) -> RequestBuilder {
        builder
            .bearer_auth(token)
            .header("Client-ID", &self.client_id)
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.api_base, path)
    }
}

fn first<T>(page: Page<T>, what: &str) -> Result<T> {
    page.data.into_iter().next().ok_or_else(|| Error::PlatformRejected {
        platform: PLATFORM,
        status: None,
        message: format!("empty {what} response"),
    })
}

#[async_trait]
impl Destination for TwitchDestination {
    fn platform(&self) -> Platform {
        PLATFORM
    }

    async fn provision(
        &self,
        credential: &DestinationCredential,
        stream: &StreamRecord,
    ) -> Result<RemoteTarget> {
        let token = &credential.access_token;

        let response = self
            .request(self.http.get(self.url("users")), token)
            .send()
            .await
            .map_err(|e| transport_error(PLATFORM, &e))?;
        let user = first(
            read_json::<Page<User>>(PLATFORM, check_status(PLATFORM, response).await?).await?,
            "users",
        )?;

        let response = self
            .request(self.http.patch(self.url("channels")), token)
            .query(&[("broadcaster_id", user.id.as_str())])
            .json(&json!({
                "title": stream.title,
                "broadcaster_language": "en",
            }))
            .send()
            .await
            .map_err(|e| transport_error(PLATFORM, &e))?;
        check_status(PLATFORM, response).await?;

        let response = self
            .request(self.http.get(self.url("streams/key")), token)
            .query(&[("broadcaster_id", user.id.as_str())])
            .send()
            .await
            .map_err(|e| transport_error(PLATFORM, &e))?;
        let key = first(
            read_json::<Page<StreamKey>>(PLATFORM, check_status(PLATFORM, response).await?).await?,
            "stream key",
        )?;

        Ok(RemoteTarget {
            platform: PLATFORM,
            broadcast_id: user.id,
            ingest_url: TWITCH_INGEST_URL.to_string(),
            stream_key: key.stream_key,
        })
    }

    async fn end_broadcast(
        &self,
        credential: &DestinationCredential,
        target: &RemoteTarget,
    ) -> Result<()> {
        let response = self
            .request(self.http.delete(self.url("streams")), &credential.access_token)
            .query(&[("broadcaster_id", target.broadcast_id.as_str())])
            .send()
            .await
            .map_err(|e| transport_error(PLATFORM, &e))?;
        check_status(PLATFORM, response).await?;
        Ok(())
    }
}
