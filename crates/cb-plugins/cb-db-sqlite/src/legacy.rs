//! # Legacy flat-file import
//!
//! Before SQLite, posts lived in a single JSON array with conversations and
//! replies nested inside each post. The import loads such a file in one
//! transaction, fills gaps the old format allowed, and records itself in
//! `app_meta` so it never runs twice.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

use cb_core::models::{
    format_timestamp, now, parse_timestamp, Conversation, Format, Post, PostStatus, Reply,
};
use cb_core::traits::AuthProvider;
use cb_core::validation::{clean, parse_slots, title_case};

pub(crate) const IMPORT_KEY: &str = "legacy_json_import";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct LegacyPost {
    id: Option<String>,
    manage_token: Option<String>,
    category: Option<String>,
    sefer_name: Option<String>,
    topic: Option<String>,
    learning_style: Option<String>,
    familiarity_level: Option<String>,
    time_zone: Option<String>,
    availability_notes: Option<String>,
    availability: Option<String>,
    availability_slots: Value,
    open_to_other_times: Value,
    format: Option<String>,
    city: Option<String>,
    state: Option<String>,
    contact_method: Option<String>,
    poster_name: Option<String>,
    email: Option<String>,
    duration_days: Value,
    created_at: Option<String>,
    expires_at: Option<String>,
    status: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    conversations: Vec<LegacyConversation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct LegacyConversation {
    id: Option<String>,
    responder_email: Option<String>,
    message: Option<String>,
    time_zone: Option<String>,
    availability: Option<String>,
    created_at: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    replies: Vec<LegacyReply>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct LegacyReply {
    message: Option<String>,
    created_at: Option<String>,
}

/// Reads every entry that fits `T`, logging and skipping the rest.
fn entries<T: DeserializeOwned>(items: Vec<Value>, kind: &str) -> Vec<T> {
    items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value(item) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(kind, index, error = %err, "skipping malformed legacy entry");
                None
            }
        })
        .collect()
}

/// Old files hold `null` or scalars where lists belong; those read as empty.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => entries(items, "nested"),
        _ => Vec::new(),
    })
}

/// The posts of a legacy file's top-level array.
pub(crate) fn legacy_posts(items: Vec<Value>) -> Vec<LegacyPost> {
    entries(items, "post")
}

fn or_generate(value: &Option<String>, generate: impl FnOnce() -> anyhow::Result<String>) -> anyhow::Result<String> {
    match clean(value.as_deref()) {
        Some(value) => Ok(value),
        None => generate(),
    }
}

fn or(value: &Option<String>, fallback: &str) -> String {
    clean(value.as_deref()).unwrap_or_else(|| fallback.to_owned())
}

/// Old timestamps that do not parse become `fallback`.
fn timestamp(value: &Option<String>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    match clean(value.as_deref()) {
        Some(raw) if DateTime::parse_from_rfc3339(&raw).is_ok() => parse_timestamp(&raw),
        _ => fallback,
    }
}

fn legacy_duration(value: &Value) -> u32 {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|days| *days > 0)
    .unwrap_or(7)
}

fn legacy_flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        Value::String(s) => !s.is_empty(),
        _ => false,
    }
}

impl LegacyPost {
    /// Maps an old record to a post. Missing identifiers are generated.
    pub(crate) fn to_post(&self, auth: &dyn AuthProvider) -> anyhow::Result<Post> {
        let now = now();
        let topic = or(&self.topic, "Untitled");
        let duration_days = legacy_duration(&self.duration_days);
        Ok(Post {
            id: or_generate(&self.id, || auth.generate_post_id())?,
            manage_token: or_generate(&self.manage_token, || auth.generate_manage_token())?,
            category: or(&self.category, "Other"),
            sefer_name: or(&self.sefer_name, &topic),
            learning_style: or(&self.learning_style, ""),
            familiarity_level: or(&self.familiarity_level, "Beginner"),
            time_zone: or(&self.time_zone, "America/New_York"),
            availability_notes: clean(self.availability_notes.as_deref())
                .or_else(|| clean(self.availability.as_deref()))
                .unwrap_or_default(),
            availability_slots: parse_slots(&self.availability_slots),
            open_to_other_times: legacy_flag(&self.open_to_other_times),
            format: clean(self.format.as_deref())
                .and_then(|f| Format::parse(&f))
                .unwrap_or(Format::Flexible),
            city: or(&self.city, ""),
            state: or(&self.state, ""),
            contact_method: or(&self.contact_method, "relay"),
            poster_name: title_case(&or(&self.poster_name, "")),
            email: or(&self.email, "missing@example.com"),
            duration_days,
            created_at: timestamp(&self.created_at, now),
            // Without a recorded expiry the post is treated as already over.
            expires_at: timestamp(&self.expires_at, now),
            status: clean(self.status.as_deref())
                .and_then(|s| PostStatus::parse(&s))
                .unwrap_or(PostStatus::Active),
            topic,
        })
    }

    pub(crate) fn conversations(&self) -> &[LegacyConversation] {
        &self.conversations
    }
}

impl LegacyConversation {
    pub(crate) fn to_conversation(&self, post_id: &str, auth: &dyn AuthProvider) -> anyhow::Result<Conversation> {
        Ok(Conversation {
            id: or_generate(&self.id, || auth.generate_conversation_id())?,
            post_id: post_id.to_owned(),
            responder_email: or(&self.responder_email, "missing@example.com"),
            message: or(&self.message, ""),
            time_zone: or(&self.time_zone, ""),
            availability: or(&self.availability, ""),
            created_at: timestamp(&self.created_at, now()),
        })
    }

    pub(crate) fn replies(&self, conversation_id: &str) -> Vec<Reply> {
        self.replies
            .iter()
            .map(|reply| Reply {
                conversation_id: conversation_id.to_owned(),
                message: or(&reply.message, ""),
                created_at: timestamp(&reply.created_at, now()),
            })
            .collect()
    }
}

/// Summary stored in `app_meta` once the import has run.
pub(crate) fn import_record(posts: usize, at: DateTime<Utc>) -> String {
    format!("imported {posts} post(s) at {}", format_timestamp(at))
}

#[cfg(test)]
mod tests {
    use super::*;

    use cb_core::traits::MockAuthProvider;

    fn auth() -> MockAuthProvider {
        let mut auth = MockAuthProvider::new();
        auth.expect_generate_post_id().returning(|| Ok("0".repeat(16)));
        auth.expect_generate_manage_token().returning(|| Ok("1".repeat(32)));
        auth.expect_generate_conversation_id().returning(|| Ok("2".repeat(12)));
        auth
    }

    #[test]
    fn test_fills_missing_fields() {
        let legacy: LegacyPost = serde_json::from_str(
            r#"{"topic": "Chumash", "availability": "Evenings", "durationDays": "14", "openToOtherTimes": 1}"#,
        )
        .unwrap();
        let post = legacy.to_post(&auth()).unwrap();
        assert_eq!(post.id.len(), 16);
        assert_eq!(post.manage_token.len(), 32);
        assert_eq!(post.sefer_name, "Chumash");
        assert_eq!(post.familiarity_level, "Beginner");
        assert_eq!(post.email, "missing@example.com");
        assert_eq!(post.availability_notes, "Evenings");
        assert_eq!(post.duration_days, 14);
        assert!(post.open_to_other_times);
        assert_eq!(post.format, Format::Flexible);
        assert_eq!(post.status, PostStatus::Active);
    }

    #[test]
    fn test_keeps_recorded_values() {
        let legacy: LegacyPost = serde_json::from_str(
            r#"{"id": "abc", "manageToken": "tok", "format": "in_person_only", "city": "Monsey", "state": "NY",
                "status": "inactive", "createdAt": "2025-05-01T12:00:00.000Z", "expiresAt": "2025-05-31T12:00:00.000Z"}"#,
        )
        .unwrap();
        let post = legacy.to_post(&auth()).unwrap();
        assert_eq!(post.id, "abc");
        assert_eq!(post.manage_token, "tok");
        assert_eq!(post.format, Format::InPersonOnly);
        assert_eq!(post.status, PostStatus::Inactive);
        assert_eq!(format_timestamp(post.expires_at), "2025-05-31T12:00:00.000Z");
    }

    #[test]
    fn test_null_lists_read_as_empty() {
        let legacy: LegacyPost = serde_json::from_str(
            r#"{"topic": "Tanya", "conversations": [{"message": "hi", "replies": null}, {"message": "yo", "replies": "none"}]}"#,
        )
        .unwrap();
        assert_eq!(legacy.conversations().len(), 2);
        assert!(legacy.conversations()[0].replies("c").is_empty());
        assert!(legacy.conversations()[1].replies("c").is_empty());

        let bare: LegacyPost = serde_json::from_str(r#"{"topic": "Chumash", "conversations": null}"#).unwrap();
        assert!(bare.conversations().is_empty());
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let items: Vec<Value> = serde_json::from_str(
            r#"[{"topic": "Tanya", "conversations": [{"message": "hi"}, 42]}, "not a post", {"topic": 7}, {"topic": "Gemara"}]"#,
        )
        .unwrap();
        let posts = legacy_posts(items);
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].conversations().len(), 1);
        assert_eq!(posts[1].to_post(&auth()).unwrap().topic, "Gemara");
    }

    #[test]
    fn test_id_generation_failure_is_returned() {
        let mut auth = MockAuthProvider::new();
        auth.expect_generate_post_id().returning(|| Err(anyhow::anyhow!("no entropy")));
        let legacy: LegacyPost = serde_json::from_str(r#"{"topic": "Chumash"}"#).unwrap();
        assert!(legacy.to_post(&auth).is_err());
    }
}
