//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be used by the binary.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Conversation, ConversationSummary, Post, PostDraft, PostFilter, Reply};
use crate::relay::RelayMessage;

/// Data persistence contract for posts, conversations, and replies.
///
/// Methods that return `bool` report whether a row matched; callers turn
/// `false` into a not-found error.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PostRepo: Send + Sync {
    /// Flips every active post with `expires_at <= now` to expired.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> anyhow::Result<u64>;

    // Post Operations
    async fn create_post(&self, post: &Post) -> anyhow::Result<()>;
    /// Active, unexpired posts matching `filter`, newest first.
    async fn list_active_posts(&self, filter: &PostFilter, now: DateTime<Utc>) -> anyhow::Result<Vec<Post>>;
    async fn get_public_post(&self, id: &str, now: DateTime<Utc>) -> anyhow::Result<Option<Post>>;
    /// Unrestricted by status, so owners can revive expired or inactive posts.
    async fn get_post_by_manage_token(&self, token: &str) -> anyhow::Result<Option<Post>>;
    async fn update_post(&self, token: &str, draft: &PostDraft) -> anyhow::Result<bool>;
    async fn renew_post(&self, token: &str, duration_days: u32, expires_at: DateTime<Utc>) -> anyhow::Result<bool>;
    async fn deactivate_post(&self, token: &str) -> anyhow::Result<bool>;
    /// Cascades to conversations and replies.
    async fn delete_post(&self, token: &str) -> anyhow::Result<bool>;
    async fn delete_post_by_id(&self, id: &str) -> anyhow::Result<bool>;

    // Conversation Operations
    async fn create_conversation(&self, conversation: &Conversation) -> anyhow::Result<()>;
    async fn get_conversation(&self, post_id: &str, conversation_id: &str) -> anyhow::Result<Option<Conversation>>;
    /// Newest first, each with its reply count.
    async fn list_conversations(&self, post_id: &str) -> anyhow::Result<Vec<ConversationSummary>>;
    async fn create_reply(&self, reply: &Reply) -> anyhow::Result<()>;
}

/// Outcome of presenting the global owner key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerKeyCheck {
    NotConfigured,
    Denied,
    Granted,
}

/// Identity contract: opaque identifiers and the owner override.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait AuthProvider: Send + Sync {
    /// Public, shareable post id.
    fn generate_post_id(&self) -> anyhow::Result<String>;

    /// Secret bearer credential. Must carry more entropy than the post id.
    fn generate_manage_token(&self) -> anyhow::Result<String>;

    fn generate_conversation_id(&self) -> anyhow::Result<String>;

    /// Compares a presented key against the configured owner delete key.
    fn verify_owner_key(&self, provided: &str) -> OwnerKeyCheck;
}

/// Outbound email contract for the relay.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RelayTransport: Send + Sync {
    async fn send(&self, message: &RelayMessage) -> anyhow::Result<()>;
}

/// A ceiling on recorded events within a trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max: usize,
    pub window: Duration,
}

pub const CREATE_POST_LIMIT: RateLimit = RateLimit {
    max: 8,
    window: Duration::from_secs(10 * 60),
};

pub const RESPOND_LIMIT: RateLimit = RateLimit {
    max: 20,
    window: Duration::from_secs(10 * 60),
};

/// Abuse deterrent for the public write endpoints.
pub trait RateLimiter: Send + Sync {
    /// Records an event for `key` and returns `true`, or returns `false`
    /// without recording when the key is already at its ceiling.
    fn check_and_record(&self, key: &str, limit: RateLimit) -> bool;
}
