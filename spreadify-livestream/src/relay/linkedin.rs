//! LinkedIn Live destination

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use spreadify_core::{
    models::{DestinationCredential, Platform, StreamRecord},
    Error, Result,
};

use super::destination::{check_status, join_url, read_json, transport_error, Destination, RemoteTarget};

const PLATFORM: Platform = Platform::LinkedIn;

pub struct LinkedInDestination {
    http: Client,
    api_base: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveStream {
    id: String,
    rtmp_url: String,
    stream_key: String,
}

impl LinkedInDestination {
    pub fn new(http: Client, api_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into(),
        }
    }
}

#[async_trait]
impl Destination for LinkedInDestination {
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
            .post(join_url(&self.api_base, "livestreams"))
            .bearer_auth(&credential.access_token)
            .json(&json!({
                "title": stream.title,
                "description": stream.description,
                "visibility": "PUBLIC",
            }))
            .send()
            .await
            .map_err(|e| transport_error(PLATFORM, &e))?;
        let response = check_status(PLATFORM, response).await?;

        // Creation is only confirmed by 201
        if response.status() != StatusCode::CREATED {
            return Err(Error::PlatformRejected {
                platform: PLATFORM,
                status: Some(response.status().as_u16()),
                message: "live stream was not created".to_string(),
            });
        }

        let created: LiveStream = read_json(PLATFORM, response).await?;
        Ok(RemoteTarget {
            platform: PLATFORM,
            broadcast_id: created.id,
            ingest_url: created.rtmp_url,
            stream_key: created.stream_key,
        })
    }

    async fn end_broadcast(
        &self,
        credential: &DestinationCredential,
        target: &RemoteTarget,
    ) -> Result<()> {
        let response = self
            .http
            .post(join_url(
                &self.api_base,
                &format!("livestreams/{}/end", target.broadcast_id),
            ))
            .bearer_auth(&credential.access_token)
            .send()
            .await
            .map_err(|e| transport_error(PLATFORM, &e))?;
        check_status(PLATFORM, response).await?;
        Ok(())
    }
}
