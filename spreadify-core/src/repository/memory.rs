use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

use super::{BlockList, ChatStore, CredentialStore, StreamRepository, TokenRefresher};
use crate::{
    models::{ChatMessage, DestinationCredential, Platform, StreamRecord},
    Error, Result,
};

/// Stream records kept in memory, keyed by record id
#[derive(Clone, Default)]
pub struct MemoryStreamRepository {
    records: Arc<DashMap<String, StreamRecord>>,
}

impl MemoryStreamRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: StreamRecord) {
        self.records.insert(record.id.clone(), record);
    }

    #[must_use]
    pub fn get_by_key(&self, stream_key: &str) -> Option<StreamRecord> {
        self.records
            .iter()
            .find(|r| r.stream_key == stream_key)
            .map(|r| r.value().clone())
    }
}

#[async_trait]
impl StreamRepository for MemoryStreamRepository {
    async fn find_by_key(&self, stream_key: &str) -> Result<Option<StreamRecord>> {
        Ok(self.get_by_key(stream_key))
    }

    async fn find_by_id(&self, stream_id: &str) -> Result<Option<StreamRecord>> {
        Ok(self.records.get(stream_id).map(|r| r.value().clone()))
    }

    async fn save(&self, record: &StreamRecord) -> Result<()> {
        self.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn update_viewer_count(&self, stream_key: &str, count: u32) -> Result<()> {
        let mut record = self
            .records
            .iter_mut()
            .find(|r| r.stream_key == stream_key)
            .ok_or_else(|| Error::NotFound(format!("Stream key {stream_key}")))?;
        record.viewer_count = count;
        record.peak_viewer_count = record.peak_viewer_count.max(count);
        Ok(())
    }
}

/// Linked accounts kept in memory, refreshed through an optional
/// [`TokenRefresher`].
#[derive(Clone, Default)]
pub struct MemoryCredentialStore {
    credentials: Arc<DashMap<(String, Platform), DestinationCredential>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn link(&self, user_id: &str, credential: DestinationCredential) {
        self.credentials
            .insert((user_id.to_string(), credential.platform), credential);
    }

    pub fn unlink(&self, user_id: &str, platform: Platform) {
        self.credentials.remove(&(user_id.to_string(), platform));
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get_credential(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<DestinationCredential>> {
        Ok(self
            .credentials
            .get(&(user_id.to_string(), platform))
            .map(|c| c.value().clone()))
    }

    async fn refresh_credential(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<DestinationCredential> {
        let missing = || Error::CredentialMissing {
            platform,
            user_id: user_id.to_string(),
        };

        let current = self
            .get_credential(user_id, platform)
            .await?
            .ok_or_else(missing)?;
        let refresh_token = current.refresh_token.clone().ok_or_else(missing)?;
        let refresher = self.refresher.as_ref().ok_or_else(missing)?;

        let refreshed = refresher
            .refresh(platform, &refresh_token)
            .await?
            .into_credential(&current);
        self.link(user_id, refreshed.clone());
        Ok(refreshed)
    }
}

/// Chat messages kept in memory
#[derive(Clone, Default)]
pub struct MemoryChatStore {
    messages: Arc<RwLock<Vec<ChatMessage>>>,
}

impl MemoryChatStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn store_message(&self, message: &ChatMessage) -> Result<()> {
        self.messages.write().push(message.clone());
        Ok(())
    }

    async fn recent_messages(&self, stream_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let messages = self.messages.read();
        let matching: Vec<_> = messages
            .iter()
            .filter(|m| m.stream_id == stream_id)
            .cloned()
            .collect();
        let skip = matching.len().saturating_sub(limit);
        Ok(matching.into_iter().skip(skip).collect())
    }
}

/// Block relations kept in memory, keyed by the blocking user
#[derive(Clone, Default)]
pub struct MemoryBlockList {
    blocks: Arc<DashMap<String, HashSet<String>>>,
}

impl MemoryBlockList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlockList for MemoryBlockList {
    async fn blocked_by(&self, user_id: &str) -> Result<HashSet<String>> {
        Ok(self
            .blocks
            .iter()
            .filter(|entry| entry.value().contains(user_id))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn block(&self, blocker_id: &str, blocked_id: &str) -> Result<()> {
        if blocker_id == blocked_id {
            return Err(Error::InvalidInput("Cannot block yourself".to_string()));
        }
        self.blocks
            .entry(blocker_id.to_string())
            .or_default()
            .insert(blocked_id.to_string());
        Ok(())
    }

    async fn unblock(&self, blocker_id: &str, blocked_id: &str) -> Result<bool> {
        let removed = self
            .blocks
            .get_mut(blocker_id)
            .is_some_and(|mut set| set.remove(blocked_id));
        self.blocks.remove_if(blocker_id, |_, set| set.is_empty());
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatUser, StreamStatus, TokenGrant};
    use chrono::Utc;

    struct StaticRefresher;

    #[async_trait]
    impl TokenRefresher for StaticRefresher {
        async fn refresh(&self, _platform: Platform, refresh_token: &str) -> Result<TokenGrant> {
            Ok(TokenGrant {
                access_token: format!("fresh-{refresh_token}"),
                refresh_token: None,
                expires_in: Some(3600),
            })
        }
    }

    fn credential(refresh_token: Option<&str>) -> DestinationCredential {
        DestinationCredential {
            platform: Platform::YouTube,
            access_token: "stale".to_string(),
            refresh_token: refresh_token.map(ToString::to_string),
            expires_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn test_viewer_count_tracks_peak() {
        let repo = MemoryStreamRepository::new();
        let record = StreamRecord::new("owner", "show").with_status(StreamStatus::Live);
        let key = record.stream_key.clone();
        repo.insert(record);

        repo.update_viewer_count(&key, 12).await.unwrap();
        repo.update_viewer_count(&key, 4).await.unwrap();

        let stored = repo.find_by_key(&key).await.unwrap().unwrap();
        assert_eq!(stored.viewer_count, 4);
        assert_eq!(stored.peak_viewer_count, 12);
        assert!(repo.update_viewer_count("nope", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_credential() {
        let store = MemoryCredentialStore::new().with_refresher(Arc::new(StaticRefresher));
        store.link("u1", credential(Some("r1")));

        let refreshed = store
            .refresh_credential("u1", Platform::YouTube)
            .await
            .unwrap();
        assert_eq!(refreshed.access_token, "fresh-r1");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("r1"));

        let stored = store
            .get_credential("u1", Platform::YouTube)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.access_token, "fresh-r1");
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_is_missing() {
        let store = MemoryCredentialStore::new().with_refresher(Arc::new(StaticRefresher));
        store.link("u1", credential(None));

        let err = store
            .refresh_credential("u1", Platform::YouTube)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CredentialMissing { .. }));

        let err = store
            .refresh_credential("u2", Platform::Twitch)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CredentialMissing { .. }));
    }

    #[tokio::test]
    async fn test_recent_messages_limit() {
        let store = MemoryChatStore::new();
        let user = ChatUser::new("u1", "alice");
        for i in 0..5 {
            store
                .store_message(&ChatMessage::new("s1", &user, &format!("m{i}")))
                .await
                .unwrap();
        }
        store
            .store_message(&ChatMessage::new("s2", &user, "other"))
            .await
            .unwrap();

        let recent = store.recent_messages("s1", 2).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);
    }

    #[tokio::test]
    async fn test_block_list() {
        let blocks = MemoryBlockList::new();
        blocks.block("bob", "alice").await.unwrap();
        blocks.block("carol", "alice").await.unwrap();
        assert!(blocks.block("alice", "alice").await.is_err());

        let blockers = blocks.blocked_by("alice").await.unwrap();
        assert_eq!(blockers.len(), 2);
        assert!(blockers.contains("bob"));

        assert!(blocks.unblock("bob", "alice").await.unwrap());
        assert!(!blocks.unblock("bob", "alice").await.unwrap());
        assert_eq!(blocks.blocked_by("alice").await.unwrap().len(), 1);
    }
}
