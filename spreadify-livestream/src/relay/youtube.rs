//! YouTube Live destination

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use spreadify_core::{
    models::{DestinationCredential, Platform, StreamRecord},
    Result,
};

use super::destination::{check_status, join_url, read_json, transport_error, Destination, RemoteTarget};

const PLATFORM: Platform = Platform::YouTube;

/// Creates a broadcast and an ingest stream, then binds them together.
pub struct YouTubeDestination {
    http: Client,
    api_base: String,
}

impl YouTubeDestination {
    pub fn new(http: Client, api_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.api_base, path)
    }
}

#[derive(Deserialize)]
struct Resource {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveStream {
    id: String,
    cdn: Cdn,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Cdn {
    ingestion_info: IngestionInfo,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestionInfo {
    ingestion_address: String,
    stream_name: String,
}

#[async_trait]
impl Destination for YouTubeDestination {
    fn platform(&self) -> Platform {
        PLATFORM
    }

    async fn provision(
        &self,
        credential: &DestinationCredential,
        stream: &StreamRecord,
    ) -> Result<RemoteTarget> {
        let token = &credential.access_token;
        let start_time = stream.scheduled_for.unwrap_or_else(Utc::now);

        let response = self
            .http
            .post(self.url("liveBroadcasts"))
            .bearer_auth(token)
            .query(&[("part", "snippet,status,contentDetails")])
            .json(&json!({
                "snippet": {
                    "title": stream.title,
                    "description": stream.description,
                    "scheduledStartTime": start_time.to_rfc3339(),
                },
                "status": { "privacyStatus": "public" },
                "contentDetails": { "enableAutoStart": true },
            }))
            .send()
            .await
            .map_err(|e| transport_error(PLATFORM, &e))?;
        let broadcast: Resource = read_json(PLATFORM, check_status(PLATFORM, response).await?).await?;

        let response = self
            .http
            .post(self.url("liveStreams"))
            .bearer_auth(token)
            .query(&[("part", "snippet,cdn")])
            .json(&json!({
                "snippet": { "title": stream.title },
                "cdn": {
                    "frameRate": "variable",
                    "ingestionType": "rtmp",
                    "resolution": "variable",
                },
            }))
            .send()
            .await
            .map_err(|e| transport_error(PLATFORM, &e))?;
        let live_stream: LiveStream =
            read_json(PLATFORM, check_status(PLATFORM, response).await?).await?;

        let response = self
            .http
            .post(self.url("liveBroadcasts/bind"))
            .bearer_auth(token)
            .query(&[
                ("id", broadcast.id.as_str()),
                ("streamId", live_stream.id.as_str()),
                ("part", "id,contentDetails"),
            ])
            .send()
            .await
            .map_err(|e| transport_error(PLATFORM, &e))?;
        check_status(PLATFORM, response).await?;

        debug!(broadcast_id = %broadcast.id, stream_id = %live_stream.id, "YouTube broadcast bound");

        let ingestion = live_stream.cdn.ingestion_info;
        Ok(RemoteTarget {
            platform: PLATFORM,
            broadcast_id: broadcast.id,
            ingest_url: ingestion.ingestion_address,
            stream_key: ingestion.stream_name,
        })
    }

    async fn end_broadcast(
        &self,
        credential: &DestinationCredential,
        target: &RemoteTarget,
    ) -> Result<()> {
        let response = self
            .http
            .post(self.url("liveBroadcasts/transition"))
            .bearer_auth(&credential.access_token)
            .query(&[
                ("id", target.broadcast_id.as_str()),
                ("broadcastStatus", "complete"),
                ("part", "id,status"),
            ])
            .send()
            .await
            .map_err(|e| transport_error(PLATFORM, &e))?;
        check_status(PLATFORM, response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spreadify_core::Error;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credential() -> DestinationCredential {
        DestinationCredential {
            platform: PLATFORM,
            access_token: "yt-token".to_string(),
            refresh_token: None,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_provision_binds_broadcast_and_stream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/liveBroadcasts"))
            .and(header("authorization", "Bearer yt-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "bc1" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/liveStreams"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "ls1",
                "cdn": { "ingestionInfo": {
                    "ingestionAddress": "rtmp://a.rtmp.youtube.com/live2",
                    "streamName": "abcd-efgh"
                }}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/liveBroadcasts/bind"))
            .and(query_param("id", "bc1"))
            .and(query_param("streamId", "ls1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "bc1" })))
            .expect(1)
            .mount(&server)
            .await;

        let destination = YouTubeDestination::new(Client::new(), server.uri());
        let stream = StreamRecord::new("owner", "My show");
        let target = destination.provision(&credential(), &stream).await.unwrap();

        assert_eq!(target.broadcast_id, "bc1");
        assert_eq!(target.publish_url(), "rtmp://a.rtmp.youtube.com/live2/abcd-efgh");
    }

    #[tokio::test]
    async fn test_provision_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/liveBroadcasts"))
            .respond_with(ResponseTemplate::new(403).set_body_string("liveStreamingNotEnabled"))
            .mount(&server)
            .await;

        let destination = YouTubeDestination::new(Client::new(), server.uri());
        let err = destination
            .provision(&credential(), &StreamRecord::new("owner", "t"))
            .await
            .unwrap_err();

        match err {
            Error::PlatformRejected { platform, status, message } => {
                assert_eq!(platform, Platform::YouTube);
                assert_eq!(status, Some(403));
                assert_eq!(message, "liveStreamingNotEnabled");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_end_broadcast_transitions_to_complete() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/liveBroadcasts/transition"))
            .and(query_param("broadcastStatus", "complete"))
            .and(query_param("id", "bc1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let destination = YouTubeDestination::new(Client::new(), server.uri());
        let target = RemoteTarget {
            platform: PLATFORM,
            broadcast_id: "bc1".to_string(),
            ingest_url: "rtmp://x".to_string(),
            stream_key: "k".to_string(),
        };
        destination.end_broadcast(&credential(), &target).await.unwrap();
    }
}
