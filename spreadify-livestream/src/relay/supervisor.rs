//! Relay supervisor
//!
//! One relay per (stream, platform): provision the remote broadcast, then
//! forward the local feed to it with a copy-only ffmpeg process. Relays of
//! different platforms never affect each other.

use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use spreadify_core::{
    config::RelayConfig,
    models::{DestinationCredential, Platform, StreamRecord},
    repository::CredentialStore,
    Error, Result,
};

use super::destination::{http_client, Destination, RemoteTarget};
use super::{FacebookDestination, LinkedInDestination, TwitchDestination, YouTubeDestination};
use crate::process::{ProcessTracker, SupervisedProcess};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    Idle,
    Provisioning,
    Forwarding,
    Stopped,
}

type RelayKey = (String, Platform);

struct Relay {
    state: RelayState,
    credential: Option<DestinationCredential>,
    target: Option<RemoteTarget>,
    process: Option<Arc<SupervisedProcess>>,
}

impl Relay {
    const fn provisioning() -> Self {
        Self {
            state: RelayState::Provisioning,
            credential: None,
            target: None,
            process: None,
        }
    }
}

pub struct RelaySupervisor {
    destinations: HashMap<Platform, Arc<dyn Destination>>,
    credentials: Arc<dyn CredentialStore>,
    relays: Arc<DashMap<RelayKey, Relay>>,
    tracker: ProcessTracker,
    ffmpeg_path: String,
    stop_grace: Duration,
    refresh_skew: chrono::Duration,
}

impl RelaySupervisor {
    /// Supervisor with the built-in destinations for every platform
    pub fn new(
        config: &RelayConfig,
        credentials: Arc<dyn CredentialStore>,
        tracker: ProcessTracker,
    ) -> Result<Self> {
        let http = http_client(config.request_timeout())?;
        let destinations: Vec<Arc<dyn Destination>> = vec![
            Arc::new(YouTubeDestination::new(
                http.clone(),
                config.youtube.api_base.clone(),
            )),
            Arc::new(TwitchDestination::new(
                http.clone(),
                config.twitch.api_base.clone(),
                config.twitch.client_id.clone(),
            )),
            Arc::new(FacebookDestination::new(
                http.clone(),
                config.facebook.api_base.clone(),
            )),
            Arc::new(LinkedInDestination::new(
                http,
                config.linkedin.api_base.clone(),
            )),
        ];
        Ok(Self::with_destinations(
            config,
            credentials,
            tracker,
            destinations,
        ))
    }

    #[must_use]
    pub fn with_destinations(
        config: &RelayConfig,
        credentials: Arc<dyn CredentialStore>,
        tracker: ProcessTracker,
        destinations: Vec<Arc<dyn Destination>>,
    ) -> Self {
        Self {
            destinations: destinations
                .into_iter()
                .map(|d| (d.platform(), d))
                .collect(),
            credentials,
            relays: Arc::new(DashMap::new()),
            tracker,
            ffmpeg_path: config.ffmpeg_path.clone(),
            stop_grace: config.stop_grace(),
            refresh_skew: chrono::Duration::seconds(config.refresh_skew_seconds),
        }
    }

    fn destination(&self, platform: Platform) -> Result<Arc<dyn Destination>> {
        self.destinations
            .get(&platform)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("No destination registered for {platform}")))
    }

    /// A usable credential for `user_id` on `platform`.
    ///
    /// Credentials close to expiry are refreshed first. A failed refresh is
    /// retried once before giving up with `CredentialMissing`.
    pub async fn credential(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<DestinationCredential> {
        let missing = || Error::CredentialMissing {
            platform,
            user_id: user_id.to_string(),
        };

        let credential = self
            .credentials
            .get_credential(user_id, platform)
            .await?
            .ok_or_else(missing)?;
        if !credential.expires_within(self.refresh_skew) {
            return Ok(credential);
        }

        debug!(user_id = %user_id, platform = %platform, "Credential near expiry, refreshing");
        match self.credentials.refresh_credential(user_id, platform).await {
            Ok(refreshed) => Ok(refreshed),
            Err(first) => {
                warn!(user_id = %user_id, platform = %platform, error = %first, "Credential refresh failed, retrying");
                self.credentials
                    .refresh_credential(user_id, platform)
                    .await
                    .map_err(|e| {
                        warn!(user_id = %user_id, platform = %platform, error = %e, "Credential refresh failed again");
                        missing()
                    })
            }
        }
    }

    /// Create the remote broadcast for `stream` on `platform`.
    pub async fn provision(&self, stream: &StreamRecord, platform: Platform) -> Result<RemoteTarget> {
        if !stream.platforms.contains(&platform) {
            return Err(Error::InvalidInput(format!(
                "Stream {} is not configured for {platform}",
                stream.id
            )));
        }

        let key = (stream.id.clone(), platform);
        match self.relays.entry(key.clone()) {
            Entry::Occupied(_) => {
                return Err(Error::InvalidState(format!(
                    "{platform} relay for {} is already running",
                    stream.id
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(Relay::provisioning());
            }
        }

        let provisioned = async {
            let destination = self.destination(platform)?;
            let credential = self.credential(&stream.owner_id, platform).await?;
            let target = destination.provision(&credential, stream).await?;
            Ok::<_, Error>((destination, credential, target))
        }
        .await;

        let (destination, credential, target) = match provisioned {
            Ok(provisioned) => provisioned,
            Err(e) => {
                self.relays.remove(&key);
                warn!(stream_id = %stream.id, platform = %platform, error = %e, "Relay provisioning failed");
                return Err(e);
            }
        };

        let stored = if let Some(mut relay) = self.relays.get_mut(&key) {
            relay.credential = Some(credential.clone());
            relay.target = Some(target.clone());
            true
        } else {
            false
        };

        if !stored {
            // Stopped while the remote call was in flight
            if let Err(e) = destination.end_broadcast(&credential, &target).await {
                debug!(platform = %platform, error = %e, "Failed to end orphaned broadcast");
            }
            return Err(Error::InvalidState(format!(
                "{platform} relay for {} was stopped during provisioning",
                stream.id
            )));
        }

        info!(
            stream_id = %stream.id,
            platform = %platform,
            broadcast_id = %target.broadcast_id,
            "Relay provisioned"
        );
        Ok(target)
    }

    /// Launch the forwarding process for a provisioned relay.
    pub async fn start_forwarding(
        &self,
        stream_id: &str,
        platform: Platform,
        local_url: &str,
    ) -> Result<()> {
        let key = (stream_id.to_string(), platform);
        let target = {
            let relay = self.relays.get(&key).ok_or_else(|| {
                Error::NotFound(format!("{platform} relay for {stream_id}"))
            })?;
            match (relay.state, &relay.target) {
                (RelayState::Provisioning, Some(target)) => target.clone(),
                (state, _) => {
                    return Err(Error::InvalidState(format!(
                        "{platform} relay for {stream_id} is {state:?}"
                    )));
                }
            }
        };

        let destination = self.destination(platform)?;
        let process = Arc::new(SupervisedProcess::spawn(
            format!("relay:{stream_id}/{platform}"),
            &self.ffmpeg_path,
            &destination.forwarding_args(local_url, &target),
            &self.tracker,
        )?);

        let stored = if let Some(mut relay) = self.relays.get_mut(&key) {
            relay.process = Some(Arc::clone(&process));
            relay.state = RelayState::Forwarding;
            true
        } else {
            false
        };

        if !stored {
            process.stop(self.stop_grace).await;
            return Err(Error::InvalidState(format!(
                "{platform} relay for {stream_id} was stopped while starting"
            )));
        }

        self.watch_forwarder(key, process, destination);
        info!(stream_id = %stream_id, platform = %platform, "Relay forwarding");
        Ok(())
    }

    /// Provision and start forwarding. On a forwarding failure the remote
    /// broadcast is ended again.
    pub async fn start(
        &self,
        stream: &StreamRecord,
        platform: Platform,
        local_url: &str,
    ) -> Result<RemoteTarget> {
        let target = self.provision(stream, platform).await?;
        if let Err(e) = self.start_forwarding(&stream.id, platform, local_url).await {
            self.stop(&stream.id, platform).await;
            return Err(e);
        }
        Ok(target)
    }

    /// When the forwarder exits on its own, mark the relay stopped, release
    /// the process and end the remote broadcast. The entry stays until
    /// [`stop`](Self::stop) so the failure remains visible.
    fn watch_forwarder(
        &self,
        key: RelayKey,
        process: Arc<SupervisedProcess>,
        destination: Arc<dyn Destination>,
    ) {
        let relays = Arc::clone(&self.relays);
        tokio::spawn(async move {
            let exit = process.wait().await;
            let remote = {
                let Some(mut relay) = relays.get_mut(&key) else {
                    return;
                };
                let current = relay
                    .process
                    .as_ref()
                    .is_some_and(|p| Arc::ptr_eq(p, &process));
                if !current || relay.state != RelayState::Forwarding {
                    return;
                }
                relay.state = RelayState::Stopped;
                relay.process = None;
                relay.credential.take().zip(relay.target.take())
            };
            warn!(
                stream_id = %key.0,
                platform = %key.1,
                exit = %exit,
                reason = %process.failure_reason(),
                "Relay forwarder exited"
            );

            if let Some((credential, target)) = remote {
                if let Err(e) = destination.end_broadcast(&credential, &target).await {
                    warn!(stream_id = %key.0, platform = %key.1, error = %e, "Failed to end remote broadcast");
                }
            }
        });
    }

    /// End the remote broadcast (best effort) and stop the forwarder.
    ///
    /// Returns false when no relay existed. Safe to call repeatedly.
    pub async fn stop(&self, stream_id: &str, platform: Platform) -> bool {
        let Some((_, relay)) = self.relays.remove(&(stream_id.to_string(), platform)) else {
            return false;
        };

        if let (Some(credential), Some(target)) = (&relay.credential, &relay.target) {
            match self.destination(platform) {
                Ok(destination) => {
                    if let Err(e) = destination.end_broadcast(credential, target).await {
                        warn!(stream_id = %stream_id, platform = %platform, error = %e, "Failed to end remote broadcast");
                    }
                }
                Err(e) => warn!(platform = %platform, error = %e, "Cannot end remote broadcast"),
            }
        }

        if let Some(process) = relay.process {
            let exit = process.stop(self.stop_grace).await;
            debug!(stream_id = %stream_id, platform = %platform, exit = %exit, "Forwarder stopped");
        }

        info!(stream_id = %stream_id, platform = %platform, "Relay stopped");
        true
    }

    /// Stop every relay of a stream concurrently. Returns how many were stopped.
    pub async fn stop_all(&self, stream_id: &str) -> usize {
        let platforms = self.platforms(stream_id);
        join_all(platforms.into_iter().map(|p| self.stop(stream_id, p)))
            .await
            .into_iter()
            .filter(|stopped| *stopped)
            .count()
    }

    #[must_use]
    pub fn state(&self, stream_id: &str, platform: Platform) -> RelayState {
        self.relays
            .get(&(stream_id.to_string(), platform))
            .map_or(RelayState::Idle, |r| r.state)
    }

    #[must_use]
    pub fn target(&self, stream_id: &str, platform: Platform) -> Option<RemoteTarget> {
        self.relays
            .get(&(stream_id.to_string(), platform))
            .and_then(|r| r.target.clone())
    }

    /// Platforms with a relay (in any state) for this stream
    #[must_use]
    pub fn platforms(&self, stream_id: &str) -> Vec<Platform> {
        self.relays
            .iter()
            .filter(|entry| entry.key().0 == stream_id)
            .map(|entry| entry.key().1)
            .collect()
    }
}
