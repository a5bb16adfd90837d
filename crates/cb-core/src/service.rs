//! # BoardService
//!
//! Every board operation, expressed against the ports in `traits`. The API
//! layer only extracts request data, applies rate limits and renders the
//! results.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::availability::{rank, AvailabilityFilter};
use crate::error::{AppError, Result};
use crate::models::{expiry_from, now, Conversation, ConversationSummary, ManagePost, Post, PostFilter, PublicPost, Reply};
use crate::relay::{self, Delivery, OnFailure, Relay};
use crate::traits::{AuthProvider, OwnerKeyCheck, PostRepo};
use crate::validation::{clean, parse_duration, validate_post, PostInput, ValidationMode, ValidationPolicy};

const MANAGE_NOT_FOUND: &str = "Manage link not found.";
const POST_NOT_FOUND: &str = "Post not found.";

/// Query-string filters for the listing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListQuery {
    pub category: Option<String>,
    pub format: Option<String>,
    pub time_zone: Option<String>,
    pub familiarity_level: Option<String>,
    pub q: Option<String>,
    pub day: Option<String>,
    pub time: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseInput {
    pub message: Option<String>,
    pub time_zone: Option<String>,
    pub availability: Option<String>,
    pub responder_email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenewInput {
    pub duration_days: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplyInput {
    pub conversation_id: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdminDeleteInput {
    pub post_id: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostList {
    pub posts: Vec<PublicPost>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostDetail {
    pub post: PublicPost,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedPost {
    pub post: PublicPost,
    /// The only time the manage token leaves the server.
    pub manage_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ack {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl Ack {
    pub fn ok() -> Self {
        Self { ok: true, warning: None }
    }

    pub fn warn(warning: &str) -> Self {
        Self {
            ok: true,
            warning: Some(warning.to_owned()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Renewed {
    pub ok: bool,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManageView {
    pub post: ManagePost,
    pub conversations: Vec<ConversationSummary>,
}

pub struct BoardService {
    repo: Arc<dyn PostRepo>,
    auth: Arc<dyn AuthProvider>,
    relay: Relay,
    policy: ValidationPolicy,
}

impl BoardService {
    pub fn new(repo: Arc<dyn PostRepo>, auth: Arc<dyn AuthProvider>, relay: Relay, policy: ValidationPolicy) -> Self {
        Self {
            repo,
            auth,
            relay,
            policy,
        }
    }

    pub fn relay_configured(&self) -> bool {
        self.relay.is_configured()
    }

    /// Active posts matching the equality filters. A day/time filter only
    /// reorders: available posts first, newest first within each group.
    pub async fn list_posts(&self, query: &ListQuery) -> Result<PostList> {
        let availability = AvailabilityFilter::parse(query.day.as_deref(), query.time.as_deref())?;
        let filter = PostFilter {
            category: clean(query.category.as_deref()),
            format: clean(query.format.as_deref()),
            time_zone: clean(query.time_zone.as_deref()),
            familiarity_level: clean(query.familiarity_level.as_deref()),
            search: clean(query.q.as_deref()),
        };

        let now = now();
        self.repo.sweep_expired(now).await?;
        let mut posts = self.repo.list_active_posts(&filter, now).await?;
        rank(&mut posts, &availability);

        Ok(PostList {
            posts: posts.iter().map(Post::to_public).collect(),
        })
    }

    pub async fn get_post(&self, id: &str) -> Result<PostDetail> {
        let post = self.public_post(id).await?;
        Ok(PostDetail { post: post.to_public() })
    }

    pub async fn create_post(&self, input: &PostInput, base_url: &str) -> Result<CreatedPost> {
        let draft = validate_post(input, self.policy, ValidationMode::Create)?;
        let post = Post::from_draft(
            self.auth.generate_post_id()?,
            self.auth.generate_manage_token()?,
            draft,
            now(),
        );
        self.repo.create_post(&post).await?;
        info!(post_id = %post.id, category = %post.category, "post created");

        let manage_url = relay::manage_url(base_url, &post.manage_token);
        let warning = match self.relay.dispatch(&relay::post_live(&post, &manage_url), OnFailure::Warn).await? {
            Delivery::Failed => {
                Some("Post created, but the confirmation email could not be sent. Save your manage link.".to_owned())
            }
            Delivery::Sent | Delivery::NotConfigured => None,
        };

        Ok(CreatedPost {
            post: post.to_public(),
            manage_url,
            warning,
        })
    }

    /// Opens a conversation. The conversation is kept whatever happens to the
    /// notification email.
    pub async fn respond(&self, post_id: &str, input: &ResponseInput, base_url: &str) -> Result<Ack> {
        let message = clean(input.message.as_deref()).ok_or_else(|| AppError::validation("Message is required."))?;
        let responder_email = clean(input.responder_email.as_deref())
            .ok_or_else(|| AppError::validation("Your email is required for relay replies."))?;

        let post = self.public_post(post_id).await?;
        let conversation = Conversation {
            id: self.auth.generate_conversation_id()?,
            post_id: post.id.clone(),
            responder_email,
            message,
            time_zone: clean(input.time_zone.as_deref()).unwrap_or_default(),
            availability: clean(input.availability.as_deref()).unwrap_or_default(),
            created_at: now(),
        };
        self.repo.create_conversation(&conversation).await?;
        info!(post_id = %post.id, conversation_id = %conversation.id, "response received");

        if post.email.is_empty() {
            return Ok(Ack::warn(
                "Message saved, but this post has no email address for notifications. Use the manage link to view responses.",
            ));
        }

        let manage_url = relay::manage_url(base_url, &post.manage_token);
        let notice = relay::response_notice(&post, &conversation, &manage_url);
        Ok(match self.relay.dispatch(&notice, OnFailure::Warn).await? {
            Delivery::Sent => Ack::ok(),
            Delivery::NotConfigured => Ack::warn("Message saved, but email relay is not configured yet."),
            Delivery::Failed => Ack::warn("Message saved, but relay email delivery failed."),
        })
    }

    pub async fn manage_view(&self, token: &str) -> Result<ManageView> {
        self.repo.sweep_expired(now()).await?;
        let post = self.managed_post(token).await?;
        let conversations = self.repo.list_conversations(&post.id).await?;
        Ok(ManageView {
            post: post.to_manage(),
            conversations,
        })
    }

    pub async fn update_post(&self, token: &str, input: &PostInput) -> Result<Ack> {
        let draft = validate_post(input, self.policy, ValidationMode::Update)?;
        if !self.repo.update_post(token, &draft).await? {
            return Err(AppError::not_found(MANAGE_NOT_FOUND));
        }
        Ok(Ack::ok())
    }

    /// Restarts the listing period from now and reactivates the post,
    /// whatever its current status.
    pub async fn renew_post(&self, token: &str, input: &RenewInput) -> Result<Renewed> {
        let duration_days = parse_duration(&input.duration_days, self.policy)?;
        let expires_at = expiry_from(now(), duration_days);
        if !self.repo.renew_post(token, duration_days, expires_at).await? {
            return Err(AppError::not_found(MANAGE_NOT_FOUND));
        }
        Ok(Renewed { ok: true, expires_at })
    }

    pub async fn deactivate_post(&self, token: &str) -> Result<Ack> {
        if !self.repo.deactivate_post(token).await? {
            return Err(AppError::not_found(MANAGE_NOT_FOUND));
        }
        Ok(Ack::ok())
    }

    pub async fn delete_post(&self, token: &str) -> Result<Ack> {
        if !self.repo.delete_post(token).await? {
            return Err(AppError::not_found(MANAGE_NOT_FOUND));
        }
        Ok(Ack::ok())
    }

    /// Owner override: deletes any post by public id with the global key.
    pub async fn admin_delete(&self, input: &AdminDeleteInput) -> Result<Ack> {
        let key = clean(input.key.as_deref()).unwrap_or_default();
        match self.auth.verify_owner_key(&key) {
            OwnerKeyCheck::NotConfigured => {
                return Err(AppError::NotConfigured("Owner delete key is not configured.".into()))
            }
            OwnerKeyCheck::Denied => return Err(AppError::Forbidden("Unauthorized.".into())),
            OwnerKeyCheck::Granted => {}
        }

        let post_id = clean(input.post_id.as_deref()).ok_or_else(|| AppError::validation("Post id is required."))?;
        if !self.repo.delete_post_by_id(&post_id).await? {
            return Err(AppError::not_found(POST_NOT_FOUND));
        }
        info!(post_id = %post_id, "post removed with owner key");
        Ok(Ack::ok())
    }

    /// Relays the poster's reply to the respondent. Unlike the other
    /// notifications, the request fails when the email cannot go out, and
    /// the reply is only recorded once it has.
    pub async fn reply(&self, token: &str, input: &ReplyInput) -> Result<Ack> {
        let (Some(conversation_id), Some(message)) =
            (clean(input.conversation_id.as_deref()), clean(input.message.as_deref()))
        else {
            return Err(AppError::validation("Conversation and message are required."));
        };

        let post = self.managed_post(token).await?;
        let conversation = self
            .repo
            .get_conversation(&post.id, &conversation_id)
            .await?
            .ok_or_else(|| AppError::not_found("Conversation not found."))?;

        self.relay
            .dispatch(&relay::owner_reply(&post, &conversation, &message), OnFailure::Fail)
            .await?;

        self.repo
            .create_reply(&Reply {
                conversation_id: conversation.id,
                message,
                created_at: now(),
            })
            .await?;
        Ok(Ack::ok())
    }

    async fn public_post(&self, id: &str) -> Result<Post> {
        let now = now();
        self.repo.sweep_expired(now).await?;
        self.repo
            .get_public_post(id, now)
            .await?
            .ok_or_else(|| AppError::not_found(POST_NOT_FOUND))
    }

    async fn managed_post(&self, token: &str) -> Result<Post> {
        self.repo
            .get_post_by_manage_token(token)
            .await?
            .ok_or_else(|| AppError::not_found(MANAGE_NOT_FOUND))
    }
}
