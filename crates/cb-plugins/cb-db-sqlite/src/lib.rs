//! # cb-db-sqlite Implementation
//!
//! Maps posts, conversations, and replies onto SQLite. Timestamps are stored
//! as fixed-width RFC 3339 strings so expiry checks can compare them in SQL.

mod legacy;
mod migrations;

use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::{debug, info, warn};

use cb_core::models::{
    format_timestamp, now, parse_timestamp, Conversation, ConversationSummary, Format, Post, PostDraft,
    PostFilter, PostStatus, Reply, DEFAULT_DURATION_DAYS,
};
use cb_core::traits::{AuthProvider, PostRepo};
use cb_core::validation::parse_slots;

use legacy::{import_record, legacy_posts, IMPORT_KEY};

const POST_COLUMNS: &str = "id, manageToken, category, seferName, topic, learningStyle, familiarityLevel, \
    timeZone, availabilityNotes, availabilitySlots, openToOtherTimes, format, city, state, contactMethod, \
    posterName, email, durationDays, createdAt, expiresAt, status";

pub struct SqlitePostRepo {
    pool: SqlitePool,
}

impl SqlitePostRepo {
    /// Opens a pool without touching the schema.
    ///
    /// An in-memory database lives only as long as its connection, so those
    /// get a single connection that is never recycled.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = if url.contains(":memory:") || url.contains("mode=memory") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options.journal_mode(SqliteJournalMode::Wal))
                .await?
        };
        Ok(Self { pool })
    }

    /// Connects and brings the schema up to date.
    pub async fn new(url: &str) -> anyhow::Result<Self> {
        let repo = Self::connect(url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// Opens (creating if needed) the database file at `path`. Call
    /// [`Self::migrate`] before use.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating data directory {}", dir.display()))?;
        }
        Self::connect(&format!("sqlite://{}", path.display())).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Applies pending migrations and returns how many ran.
    pub async fn migrate(&self) -> anyhow::Result<usize> {
        migrations::run(&self.pool).await
    }

    /// One-time import of the old flat JSON store.
    ///
    /// Does nothing if the import already ran, the file is missing, or it
    /// holds no posts. A store that already has posts is never merged into;
    /// the import is marked as skipped instead. Returns the number of posts
    /// imported.
    pub async fn import_legacy_file(&self, path: &Path, auth: &dyn AuthProvider) -> anyhow::Result<usize> {
        if let Some(record) = self.meta(IMPORT_KEY).await? {
            debug!(%record, "legacy import already recorded");
            return Ok(0);
        }

        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
        };
        let parsed: Value = serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        let Value::Array(items) = parsed else {
            warn!(path = %path.display(), "legacy file is not an array, ignoring");
            return Ok(0);
        };
        let posts = legacy_posts(items);
        if posts.is_empty() {
            return Ok(0);
        }

        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts")
            .fetch_one(&self.pool)
            .await?;

        let mut tx = self.pool.begin().await?;
        if existing > 0 {
            set_meta(&mut *tx, IMPORT_KEY, "skipped: store already had posts").await?;
            tx.commit().await?;
            info!(existing, "store already populated, skipping legacy import");
            return Ok(0);
        }

        for record in &posts {
            let post = record.to_post(auth)?;
            insert_post_row(&mut *tx, &post).await?;
            for legacy_conversation in record.conversations() {
                let conversation = legacy_conversation.to_conversation(&post.id, auth)?;
                insert_conversation_row(&mut *tx, &conversation).await?;
                for reply in legacy_conversation.replies(&conversation.id) {
                    insert_reply_row(&mut *tx, &reply).await?;
                }
            }
        }
        set_meta(&mut *tx, IMPORT_KEY, &import_record(posts.len(), now())).await?;
        tx.commit().await?;

        info!(posts = posts.len(), path = %path.display(), "imported legacy posts");
        Ok(posts.len())
    }

    async fn meta(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(sqlx::query_scalar("SELECT value FROM app_meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?)
    }
}

async fn set_meta(conn: &mut SqliteConnection, key: &str, value: &str) -> sqlx::Result<()> {
    sqlx::query("INSERT INTO app_meta (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value")
        .bind(key)
        .bind(value)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn slots_json(post: &Post) -> sqlx::Result<String> {
    serde_json::to_string(&post.availability_slots).map_err(|err| sqlx::Error::Encode(Box::new(err)))
}

async fn insert_post_row(conn: &mut SqliteConnection, post: &Post) -> sqlx::Result<()> {
    sqlx::query(&format!(
        "INSERT INTO posts ({POST_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&post.id)
    .bind(&post.manage_token)
    .bind(&post.category)
    .bind(&post.sefer_name)
    .bind(&post.topic)
    .bind(&post.learning_style)
    .bind(&post.familiarity_level)
    .bind(&post.time_zone)
    .bind(&post.availability_notes)
    .bind(slots_json(post)?)
    .bind(post.open_to_other_times)
    .bind(post.format.as_str())
    .bind(&post.city)
    .bind(&post.state)
    .bind(&post.contact_method)
    .bind(&post.poster_name)
    .bind(&post.email)
    .bind(i64::from(post.duration_days))
    .bind(format_timestamp(post.created_at))
    .bind(format_timestamp(post.expires_at))
    .bind(post.status.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_conversation_row(conn: &mut SqliteConnection, conversation: &Conversation) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO conversations (id, postId, responderEmail, message, timeZone, availability, createdAt)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&conversation.id)
    .bind(&conversation.post_id)
    .bind(&conversation.responder_email)
    .bind(&conversation.message)
    .bind(&conversation.time_zone)
    .bind(&conversation.availability)
    .bind(format_timestamp(conversation.created_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_reply_row(conn: &mut SqliteConnection, reply: &Reply) -> sqlx::Result<()> {
    sqlx::query("INSERT INTO replies (conversationId, message, createdAt) VALUES (?, ?, ?)")
        .bind(&reply.conversation_id)
        .bind(&reply.message)
        .bind(format_timestamp(reply.created_at))
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn is_missing_column(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("has no column named"))
}

/// Rows written by older versions may hold values the current model does
/// not know; those fall back rather than fail the whole read.
fn post_from_row(row: &SqliteRow) -> anyhow::Result<Post> {
    let format: String = row.try_get("format")?;
    let status: String = row.try_get("status")?;
    let slots: String = row.try_get("availabilitySlots")?;
    let duration: i64 = row.try_get("durationDays")?;
    let open: i64 = row.try_get("openToOtherTimes")?;

    Ok(Post {
        id: row.try_get("id")?,
        manage_token: row.try_get("manageToken")?,
        category: row.try_get("category")?,
        sefer_name: row.try_get("seferName")?,
        topic: row.try_get("topic")?,
        learning_style: row.try_get("learningStyle")?,
        familiarity_level: row.try_get("familiarityLevel")?,
        time_zone: row.try_get("timeZone")?,
        availability_notes: row.try_get("availabilityNotes")?,
        availability_slots: parse_slots(&Value::String(slots)),
        open_to_other_times: open != 0,
        format: Format::parse(&format).unwrap_or(Format::Flexible),
        city: row.try_get("city")?,
        state: row.try_get("state")?,
        contact_method: row.try_get("contactMethod")?,
        poster_name: row.try_get("posterName")?,
        email: row.try_get("email")?,
        duration_days: u32::try_from(duration).unwrap_or(DEFAULT_DURATION_DAYS),
        created_at: parse_timestamp(&row.try_get::<String, _>("createdAt")?),
        expires_at: parse_timestamp(&row.try_get::<String, _>("expiresAt")?),
        status: PostStatus::parse(&status).unwrap_or(PostStatus::Inactive),
    })
}

fn conversation_from_row(row: &SqliteRow) -> anyhow::Result<Conversation> {
    Ok(Conversation {
        id: row.try_get("id")?,
        post_id: row.try_get("postId")?,
        responder_email: row.try_get("responderEmail")?,
        message: row.try_get("message")?,
        time_zone: row.try_get("timeZone")?,
        availability: row.try_get("availability")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("createdAt")?),
    })
}

#[async_trait]
impl PostRepo for SqlitePostRepo {
    async fn sweep_expired(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        let result = sqlx::query("UPDATE posts SET status = 'expired' WHERE status = 'active' AND expiresAt <= ?")
            .bind(format_timestamp(now))
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            debug!(expired = result.rows_affected(), "swept expired posts");
        }
        Ok(result.rows_affected())
    }

    /// Inserts a post. A table that has lost columns since the ledger last
    /// ran is repaired and the insert retried once.
    async fn create_post(&self, post: &Post) -> anyhow::Result<()> {
        // The connection goes back to the pool before any repair runs.
        let first = insert_post_row(&mut *self.pool.acquire().await?, post).await;
        match first {
            Err(err) if is_missing_column(&err) => {
                warn!(error = %err, "posts table is missing columns, repairing schema");
                migrations::repair(&self.pool).await?;
                insert_post_row(&mut *self.pool.acquire().await?, post).await?;
            }
            other => other?,
        }
        Ok(())
    }

    async fn list_active_posts(&self, filter: &PostFilter, now: DateTime<Utc>) -> anyhow::Result<Vec<Post>> {
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE status = 'active' AND expiresAt > "
        ));
        query.push_bind(format_timestamp(now));

        let equalities = [
            ("category", &filter.category),
            ("format", &filter.format),
            ("timeZone", &filter.time_zone),
            ("familiarityLevel", &filter.familiarity_level),
        ];
        for (column, value) in equalities {
            if let Some(value) = value {
                query.push(format!(" AND {column} = ")).push_bind(value.clone());
            }
        }
        if let Some(search) = &filter.search {
            query
                .push(" AND instr(lower(seferName || ' ' || topic), ")
                .push_bind(search.to_lowercase())
                .push(") > 0");
        }
        query.push(" ORDER BY createdAt DESC");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(post_from_row).collect()
    }

    async fn get_public_post(&self, id: &str, now: DateTime<Utc>) -> anyhow::Result<Option<Post>> {
        let row = sqlx::query(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE id = ? AND status = 'active' AND expiresAt > ?"
        ))
        .bind(id)
        .bind(format_timestamp(now))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(post_from_row).transpose()
    }

    async fn get_post_by_manage_token(&self, token: &str) -> anyhow::Result<Option<Post>> {
        let row = sqlx::query(&format!("SELECT {POST_COLUMNS} FROM posts WHERE manageToken = ?"))
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(post_from_row).transpose()
    }

    async fn update_post(&self, token: &str, draft: &PostDraft) -> anyhow::Result<bool> {
        let slots = serde_json::to_string(&draft.availability_slots)?;
        let result = sqlx::query(
            "UPDATE posts SET
                category = ?, seferName = ?, topic = ?, learningStyle = ?, familiarityLevel = ?,
                timeZone = ?, availabilityNotes = ?, availabilitySlots = ?, openToOtherTimes = ?,
                format = ?, city = ?, state = ?, contactMethod = ?, posterName = ?, email = ?
             WHERE manageToken = ?",
        )
        .bind(&draft.category)
        .bind(&draft.sefer_name)
        .bind(&draft.topic)
        .bind(&draft.learning_style)
        .bind(&draft.familiarity_level)
        .bind(&draft.time_zone)
        .bind(&draft.availability_notes)
        .bind(slots)
        .bind(draft.open_to_other_times)
        .bind(draft.format.as_str())
        .bind(&draft.city)
        .bind(&draft.state)
        .bind(&draft.contact_method)
        .bind(&draft.poster_name)
        .bind(&draft.email)
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn renew_post(&self, token: &str, duration_days: u32, expires_at: DateTime<Utc>) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE posts SET durationDays = ?, expiresAt = ?, status = 'active' WHERE manageToken = ?",
        )
        .bind(i64::from(duration_days))
        .bind(format_timestamp(expires_at))
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn deactivate_post(&self, token: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("UPDATE posts SET status = 'inactive' WHERE manageToken = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_post(&self, token: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM posts WHERE manageToken = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_post_by_id(&self, id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_conversation(&self, conversation: &Conversation) -> anyhow::Result<()> {
        insert_conversation_row(&mut *self.pool.acquire().await?, conversation).await?;
        Ok(())
    }

    async fn get_conversation(&self, post_id: &str, conversation_id: &str) -> anyhow::Result<Option<Conversation>> {
        let row = sqlx::query(
            "SELECT id, postId, responderEmail, message, timeZone, availability, createdAt
             FROM conversations WHERE id = ? AND postId = ?",
        )
        .bind(conversation_id)
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn list_conversations(&self, post_id: &str) -> anyhow::Result<Vec<ConversationSummary>> {
        let rows = sqlx::query(
            "SELECT c.id, c.createdAt, c.message, c.timeZone, c.availability, COUNT(r.id) AS replyCount
             FROM conversations c
             LEFT JOIN replies r ON r.conversationId = c.id
             WHERE c.postId = ?
             GROUP BY c.id
             ORDER BY c.createdAt DESC",
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ConversationSummary {
                    id: row.try_get("id")?,
                    created_at: parse_timestamp(&row.try_get::<String, _>("createdAt")?),
                    message: row.try_get("message")?,
                    time_zone: row.try_get("timeZone")?,
                    availability: row.try_get("availability")?,
                    reply_count: row.try_get("replyCount")?,
                })
            })
            .collect()
    }

    async fn create_reply(&self, reply: &Reply) -> anyhow::Result<()> {
        insert_reply_row(&mut *self.pool.acquire().await?, reply).await?;
        Ok(())
    }
}
