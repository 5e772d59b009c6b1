//! Interfaces to the collaborators this core depends on but does not own:
//! stream persistence, linked platform accounts, chat storage and block lists.
//!
//! The `memory` module provides process-local implementations used by the
//! server binary and by tests.

pub mod memory;

use async_trait::async_trait;
use std::collections::HashSet;

use crate::{
    models::{ChatMessage, DestinationCredential, Platform, StreamRecord, TokenGrant},
    Result,
};

pub use memory::{MemoryBlockList, MemoryChatStore, MemoryCredentialStore, MemoryStreamRepository};

/// Persistence of stream records
#[async_trait]
pub trait StreamRepository: Send + Sync {
    async fn find_by_key(&self, stream_key: &str) -> Result<Option<StreamRecord>>;

    async fn find_by_id(&self, stream_id: &str) -> Result<Option<StreamRecord>>;

    /// Insert or replace the record with the same id
    async fn save(&self, record: &StreamRecord) -> Result<()>;

    /// Persist the current viewer count and raise the recorded peak if exceeded
    async fn update_viewer_count(&self, stream_key: &str, count: u32) -> Result<()>;
}

/// Linked destination accounts
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_credential(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<DestinationCredential>>;

    /// Exchange the stored refresh token for a new access token and persist it
    async fn refresh_credential(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<DestinationCredential>;
}

/// OAuth refresh-token exchange against a platform's token endpoint
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, platform: Platform, refresh_token: &str) -> Result<TokenGrant>;
}

/// Chat message storage
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn store_message(&self, message: &ChatMessage) -> Result<()>;

    /// Most recent messages of a stream, oldest first
    async fn recent_messages(&self, stream_id: &str, limit: usize) -> Result<Vec<ChatMessage>>;
}

/// User-to-user block relations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlockList: Send + Sync {
    /// Users who have blocked `user_id`
    async fn blocked_by(&self, user_id: &str) -> Result<HashSet<String>>;

    async fn block(&self, blocker_id: &str, blocked_id: &str) -> Result<()>;

    /// Returns false when no such block existed
    async fn unblock(&self, blocker_id: &str, blocked_id: &str) -> Result<bool>;
}
