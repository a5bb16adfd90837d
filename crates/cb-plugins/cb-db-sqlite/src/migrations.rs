//! # Schema Migrations
//!
//! An explicit, versioned migration ledger. Applied versions are recorded in
//! `schema_migrations`; every step is also safe to repeat, because databases
//! written before the ledger existed already carry some of these columns.

use chrono::Utc;
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use sqlx::Row;
use tracing::{info, warn};

use cb_core::models::format_timestamp;

pub(crate) enum Step {
    Sql(&'static str),
    AddColumn {
        table: &'static str,
        column: &'static str,
        definition: &'static str,
    },
    /// Fills blank `to` values from `from`, if `from` exists.
    Backfill {
        table: &'static str,
        from: &'static str,
        to: &'static str,
    },
    DropColumn {
        table: &'static str,
        column: &'static str,
    },
}

pub(crate) struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub steps: &'static [Step],
}

const LEDGER: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    description TEXT NOT NULL,
    appliedAt TEXT NOT NULL
)";

pub(crate) const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create posts, conversations and replies",
        steps: &[
            Step::Sql(
                "CREATE TABLE IF NOT EXISTS posts (
                    id TEXT PRIMARY KEY,
                    manageToken TEXT UNIQUE NOT NULL,
                    category TEXT NOT NULL,
                    topic TEXT NOT NULL,
                    learningStyle TEXT NOT NULL,
                    familiarityLevel TEXT NOT NULL,
                    timeZone TEXT NOT NULL,
                    format TEXT NOT NULL,
                    city TEXT NOT NULL DEFAULT '',
                    state TEXT NOT NULL DEFAULT '',
                    contactMethod TEXT NOT NULL,
                    email TEXT NOT NULL
                )",
            ),
            Step::Sql(
                "CREATE TABLE IF NOT EXISTS conversations (
                    id TEXT PRIMARY KEY,
                    postId TEXT NOT NULL,
                    responderEmail TEXT NOT NULL,
                    message TEXT NOT NULL,
                    timeZone TEXT NOT NULL DEFAULT '',
                    availability TEXT NOT NULL DEFAULT '',
                    createdAt TEXT NOT NULL,
                    FOREIGN KEY (postId) REFERENCES posts(id) ON DELETE CASCADE
                )",
            ),
            Step::Sql(
                "CREATE TABLE IF NOT EXISTS replies (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    conversationId TEXT NOT NULL,
                    message TEXT NOT NULL,
                    createdAt TEXT NOT NULL,
                    FOREIGN KEY (conversationId) REFERENCES conversations(id) ON DELETE CASCADE
                )",
            ),
        ],
    },
    Migration {
        version: 2,
        description: "add sefer name and structured availability",
        steps: &[
            Step::AddColumn {
                table: "posts",
                column: "seferName",
                definition: "TEXT NOT NULL DEFAULT ''",
            },
            Step::AddColumn {
                table: "posts",
                column: "availabilityNotes",
                definition: "TEXT NOT NULL DEFAULT ''",
            },
            Step::AddColumn {
                table: "posts",
                column: "availabilitySlots",
                definition: "TEXT NOT NULL DEFAULT '[]'",
            },
            Step::AddColumn {
                table: "posts",
                column: "openToOtherTimes",
                definition: "INTEGER NOT NULL DEFAULT 0",
            },
        ],
    },
    Migration {
        version: 3,
        description: "add poster name and listing lifecycle",
        steps: &[
            Step::AddColumn {
                table: "posts",
                column: "posterName",
                definition: "TEXT NOT NULL DEFAULT ''",
            },
            Step::AddColumn {
                table: "posts",
                column: "durationDays",
                definition: "INTEGER NOT NULL DEFAULT 30",
            },
            Step::AddColumn {
                table: "posts",
                column: "createdAt",
                definition: "TEXT NOT NULL DEFAULT ''",
            },
            Step::AddColumn {
                table: "posts",
                column: "expiresAt",
                definition: "TEXT NOT NULL DEFAULT ''",
            },
            Step::AddColumn {
                table: "posts",
                column: "status",
                definition: "TEXT NOT NULL DEFAULT 'active'",
            },
        ],
    },
    Migration {
        version: 4,
        description: "fold retired post columns into their replacements",
        steps: &[
            Step::Backfill {
                table: "posts",
                from: "availability",
                to: "availabilityNotes",
            },
            Step::DropColumn {
                table: "posts",
                column: "availability",
            },
            // Now derived from the id.
            Step::DropColumn {
                table: "posts",
                column: "postCode",
            },
        ],
    },
    Migration {
        version: 5,
        description: "index listing and conversation lookups",
        steps: &[
            Step::Sql("CREATE INDEX IF NOT EXISTS idx_posts_status_expires ON posts (status, expiresAt)"),
            Step::Sql("CREATE INDEX IF NOT EXISTS idx_conversations_post ON conversations (postId)"),
            Step::Sql("CREATE INDEX IF NOT EXISTS idx_replies_conversation ON replies (conversationId)"),
        ],
    },
    Migration {
        version: 6,
        description: "key/value ledger for one-time jobs",
        steps: &[Step::Sql(
            "CREATE TABLE IF NOT EXISTS app_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )],
    },
];

/// Applies every migration not yet in the ledger, each in its own
/// transaction. Returns how many were applied.
pub(crate) async fn run(pool: &SqlitePool) -> anyhow::Result<usize> {
    sqlx::query(LEDGER).execute(pool).await?;
    let applied: Vec<i64> = sqlx::query_scalar("SELECT version FROM schema_migrations")
        .fetch_all(pool)
        .await?;

    let mut count = 0;
    for migration in MIGRATIONS.iter().filter(|m| !applied.contains(&m.version)) {
        let mut tx = pool.begin().await?;
        for step in migration.steps {
            apply(&mut tx, step).await?;
        }
        sqlx::query("INSERT INTO schema_migrations (version, description, appliedAt) VALUES (?, ?, ?)")
            .bind(migration.version)
            .bind(migration.description)
            .bind(format_timestamp(Utc::now()))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(version = migration.version, description = migration.description, "applied migration");
        count += 1;
    }
    Ok(count)
}

/// Re-adds any column the ledger believes exists but the table lacks.
/// Used when an insert hits a table that has drifted from the ledger.
pub(crate) async fn repair(pool: &SqlitePool) -> anyhow::Result<()> {
    let mut conn = pool.acquire().await?;
    for step in MIGRATIONS.iter().flat_map(|m| m.steps) {
        if matches!(step, Step::AddColumn { .. }) {
            apply(&mut conn, step).await?;
        }
    }
    Ok(())
}

async fn apply(conn: &mut SqliteConnection, step: &Step) -> anyhow::Result<()> {
    match step {
        Step::Sql(sql) => {
            sqlx::query(sql).execute(&mut *conn).await?;
        }
        Step::AddColumn {
            table,
            column,
            definition,
        } => {
            if !has_column(conn, table, column).await? {
                warn!(table, column, "adding missing column");
                sqlx::query(&format!("ALTER TABLE {table} ADD COLUMN {column} {definition}"))
                    .execute(&mut *conn)
                    .await?;
            }
        }
        Step::Backfill { table, from, to } => {
            if has_column(conn, table, from).await? {
                sqlx::query(&format!(
                    "UPDATE {table} SET {to} = CASE WHEN TRIM({to}) = '' THEN {from} ELSE {to} END"
                ))
                .execute(&mut *conn)
                .await?;
            }
        }
        Step::DropColumn { table, column } => {
            if has_column(conn, table, column).await? {
                sqlx::query(&format!("ALTER TABLE {table} DROP COLUMN {column}"))
                    .execute(&mut *conn)
                    .await?;
            }
        }
    }
    Ok(())
}

pub(crate) async fn has_column(conn: &mut SqliteConnection, table: &str, column: &str) -> anyhow::Result<bool> {
    let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows
        .iter()
        .any(|row| row.try_get::<String, _>("name").is_ok_and(|name| name == column)))
}
