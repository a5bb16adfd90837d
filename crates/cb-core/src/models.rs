//! # Domain Models
//!
//! These structs represent the entities of the board: learning-partner posts,
//! their availability slots, and the relay conversations attached to them.
//!
//! `Post` carries the poster's email and manage token, so it is never
//! serialized directly. Clients only ever see a `PublicPost` or a `ManagePost`.

use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::validation::title_case;

/// Listing periods a poster may choose from.
pub const ALLOWED_DURATIONS: [u32; 3] = [7, 14, 30];
pub const DEFAULT_DURATION_DAYS: u32 = 30;

/// The only contact transport implemented.
pub const RELAY_CONTACT: &str = "relay";

/// Day names a slot can be scheduled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Day {
    Daily,
    Sun,
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    #[serde(rename = "Motzei Shabbos")]
    MotzeiShabbos,
}

impl Day {
    pub const ALL: [Day; 8] = [
        Day::Daily,
        Day::Sun,
        Day::Mon,
        Day::Tue,
        Day::Wed,
        Day::Thu,
        Day::Fri,
        Day::MotzeiShabbos,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Day::Daily => "Daily",
            Day::Sun => "Sun",
            Day::Mon => "Mon",
            Day::Tue => "Tue",
            Day::Wed => "Wed",
            Day::Thu => "Thu",
            Day::Fri => "Fri",
            Day::MotzeiShabbos => "Motzei Shabbos",
        }
    }

    pub fn parse(value: &str) -> Option<Day> {
        Day::ALL.into_iter().find(|day| day.as_str() == value)
    }
}

/// How the pair intends to meet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    InPersonOnly,
    InPersonPreferred,
    RemoteOnly,
    Flexible,
}

impl Format {
    pub const ALL: [Format; 4] = [
        Format::InPersonOnly,
        Format::InPersonPreferred,
        Format::RemoteOnly,
        Format::Flexible,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Format::InPersonOnly => "in_person_only",
            Format::InPersonPreferred => "in_person_preferred",
            Format::RemoteOnly => "remote_only",
            Format::Flexible => "flexible",
        }
    }

    pub fn parse(value: &str) -> Option<Format> {
        Format::ALL.into_iter().find(|format| format.as_str() == value)
    }

    /// In-person formats are the only ones that carry a city and state.
    pub fn needs_location(self) -> bool {
        matches!(self, Format::InPersonOnly | Format::InPersonPreferred)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Active,
    Expired,
    Inactive,
}

impl PostStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PostStatus::Active => "active",
            PostStatus::Expired => "expired",
            PostStatus::Inactive => "inactive",
        }
    }

    pub fn parse(value: &str) -> Option<PostStatus> {
        match value {
            "active" => Some(PostStatus::Active),
            "expired" => Some(PostStatus::Expired),
            "inactive" => Some(PostStatus::Inactive),
            _ => None,
        }
    }
}

/// A single availability window. `start` and `end` are `HH:MM` and are
/// both empty when the slot is flexible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub day: Day,
    pub start: String,
    pub end: String,
    pub flexible: bool,
}

/// A sanitized post as produced by validation, before identity and
/// lifecycle fields are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct PostDraft {
    pub category: String,
    pub sefer_name: String,
    pub topic: String,
    pub learning_style: String,
    pub familiarity_level: String,
    pub time_zone: String,
    pub availability_notes: String,
    pub availability_slots: Vec<AvailabilitySlot>,
    pub open_to_other_times: bool,
    pub format: Format,
    pub city: String,
    pub state: String,
    pub poster_name: String,
    pub email: String,
    pub contact_method: String,
    /// Absent on updates; the listing period only changes through renewal.
    pub duration_days: Option<u32>,
}

/// A learning-partner request.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: String,
    /// Bearer credential for edit/renew/deactivate/delete/reply.
    pub manage_token: String,
    pub category: String,
    pub sefer_name: String,
    pub topic: String,
    pub learning_style: String,
    pub familiarity_level: String,
    pub time_zone: String,
    pub availability_notes: String,
    pub availability_slots: Vec<AvailabilitySlot>,
    pub open_to_other_times: bool,
    pub format: Format,
    pub city: String,
    pub state: String,
    pub contact_method: String,
    pub poster_name: String,
    /// Relay destination. Never exposed publicly.
    pub email: String,
    pub duration_days: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: PostStatus,
}

impl Post {
    /// Builds a fresh, active post from a validated draft.
    pub fn from_draft(id: String, manage_token: String, draft: PostDraft, now: DateTime<Utc>) -> Self {
        let duration_days = draft.duration_days.unwrap_or(DEFAULT_DURATION_DAYS);
        Self {
            id,
            manage_token,
            category: draft.category,
            sefer_name: draft.sefer_name,
            topic: draft.topic,
            learning_style: draft.learning_style,
            familiarity_level: draft.familiarity_level,
            time_zone: draft.time_zone,
            availability_notes: draft.availability_notes,
            availability_slots: draft.availability_slots,
            open_to_other_times: draft.open_to_other_times,
            format: draft.format,
            city: draft.city,
            state: draft.state,
            contact_method: draft.contact_method,
            poster_name: draft.poster_name,
            email: draft.email,
            duration_days,
            created_at: now,
            expires_at: expiry_from(now, duration_days),
            status: PostStatus::Active,
        }
    }

    /// Short human-friendly reference, e.g. `CB-1A2B3C`.
    pub fn post_code(&self) -> String {
        let prefix: String = self.id.chars().take(6).collect();
        format!("CB-{}", prefix.to_uppercase())
    }

    pub fn is_publicly_visible(&self, now: DateTime<Utc>) -> bool {
        self.status == PostStatus::Active && self.expires_at > now
    }

    pub fn to_public(&self) -> PublicPost {
        let show_location = self.format.needs_location();
        PublicPost {
            id: self.id.clone(),
            post_code: self.post_code(),
            category: self.category.clone(),
            sefer_name: self.sefer_name.clone(),
            topic: self.topic.clone(),
            learning_style: self.learning_style.clone(),
            familiarity_level: self.familiarity_level.clone(),
            time_zone: self.time_zone.clone(),
            availability_notes: self.availability_notes.clone(),
            availability_slots: self.availability_slots.clone(),
            open_to_other_times: self.open_to_other_times,
            format: self.format,
            city: if show_location { self.city.clone() } else { String::new() },
            state: if show_location { self.state.clone() } else { String::new() },
            poster_name: title_case(&self.poster_name),
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }

    pub fn to_manage(&self) -> ManagePost {
        ManagePost {
            id: self.id.clone(),
            post_code: self.post_code(),
            category: self.category.clone(),
            sefer_name: self.sefer_name.clone(),
            topic: self.topic.clone(),
            learning_style: self.learning_style.clone(),
            familiarity_level: self.familiarity_level.clone(),
            time_zone: self.time_zone.clone(),
            availability_notes: self.availability_notes.clone(),
            availability_slots: self.availability_slots.clone(),
            open_to_other_times: self.open_to_other_times,
            format: self.format,
            city: self.city.clone(),
            state: self.state.clone(),
            duration_days: self.duration_days,
            status: self.status,
            created_at: self.created_at,
            expires_at: self.expires_at,
            email: self.email.clone(),
            poster_name: title_case(&self.poster_name),
            contact_method: self.contact_method.clone(),
        }
    }
}

/// What anyone browsing the board may see.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicPost {
    pub id: String,
    pub post_code: String,
    pub category: String,
    pub sefer_name: String,
    pub topic: String,
    pub learning_style: String,
    pub familiarity_level: String,
    pub time_zone: String,
    pub availability_notes: String,
    pub availability_slots: Vec<AvailabilitySlot>,
    pub open_to_other_times: bool,
    pub format: Format,
    pub city: String,
    pub state: String,
    pub poster_name: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// What the manage-token holder sees. The token itself is omitted; the
/// caller already has it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagePost {
    pub id: String,
    pub post_code: String,
    pub category: String,
    pub sefer_name: String,
    pub topic: String,
    pub learning_style: String,
    pub familiarity_level: String,
    pub time_zone: String,
    pub availability_notes: String,
    pub availability_slots: Vec<AvailabilitySlot>,
    pub open_to_other_times: bool,
    pub format: Format,
    pub city: String,
    pub state: String,
    pub duration_days: u32,
    pub status: PostStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub email: String,
    pub poster_name: String,
    pub contact_method: String,
}

/// A private exchange opened by a respondent against a post.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub post_id: String,
    /// Used server-side for reply routing only.
    pub responder_email: String,
    pub message: String,
    pub time_zone: String,
    pub availability: String,
    pub created_at: DateTime<Utc>,
}

/// A conversation as listed on the manage page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub message: String,
    pub time_zone: String,
    pub availability: String,
    pub reply_count: i64,
}

/// A poster's message relayed into an existing conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub conversation_id: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Optional equality constraints applied by the listing query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostFilter {
    pub category: Option<String>,
    pub format: Option<String>,
    pub time_zone: Option<String>,
    pub familiarity_level: Option<String>,
    /// Case-insensitive substring over sefer name and topic.
    pub search: Option<String>,
}

/// Current time at the millisecond resolution timestamps are stored with.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

pub fn expiry_from(now: DateTime<Utc>, duration_days: u32) -> DateTime<Utc> {
    now + Duration::days(i64::from(duration_days))
}

/// Storage form of a timestamp: `2026-01-31T18:00:00.000Z`. Strings in this
/// form sort in time order, which the expiry queries rely on.
pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Unparseable or blank timestamps (old rows) read as the epoch, which
/// makes such posts count as already expired.
pub fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|parsed| parsed.with_timezone(&Utc))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> PostDraft {
        PostDraft {
            category: "Gemara".into(),
            sefer_name: "Bava Metzia".into(),
            topic: "Perek Hamafkid".into(),
            learning_style: "Iyun".into(),
            familiarity_level: "Intermediate".into(),
            time_zone: "America/New_York".into(),
            availability_notes: String::new(),
            availability_slots: vec![],
            open_to_other_times: true,
            format: Format::InPersonOnly,
            city: "Lakewood".into(),
            state: "NJ".into(),
            poster_name: "Moshe Levi".into(),
            email: "moshe@mail.test".into(),
            contact_method: RELAY_CONTACT.into(),
            duration_days: Some(14),
        }
    }

    #[test]
    fn test_from_draft_sets_lifecycle() {
        let now = parse_timestamp("2026-03-01T10:00:00.000Z");
        let post = Post::from_draft("abcdef0123456789".into(), "t".repeat(32), draft(), now);
        assert_eq!(post.status, PostStatus::Active);
        assert_eq!(post.duration_days, 14);
        assert_eq!(format_timestamp(post.expires_at), "2026-03-15T10:00:00.000Z");
        assert_eq!(post.post_code(), "CB-ABCDEF");
    }

    #[test]
    fn test_public_view_hides_location_for_remote_posts() {
        let now = now();
        let mut post = Post::from_draft("0011aabbccdd".into(), "secret".into(), draft(), now);
        assert_eq!(post.to_public().city, "Lakewood");

        post.format = Format::RemoteOnly;
        let public = post.to_public();
        assert_eq!(public.city, "");
        assert_eq!(public.state, "");

        let json = serde_json::to_value(&public).unwrap();
        assert!(json.get("email").is_none());
        assert!(json.get("manageToken").is_none());
        assert_eq!(json["format"], "remote_only");
    }

    #[test]
    fn test_visibility_requires_active_and_unexpired() {
        let now = now();
        let mut post = Post::from_draft("id".into(), "token".into(), draft(), now);
        assert!(post.is_publicly_visible(now));
        assert!(!post.is_publicly_visible(post.expires_at));

        post.status = PostStatus::Inactive;
        assert!(!post.is_publicly_visible(now));
    }

    #[test]
    fn test_day_serde_names() {
        let slot = AvailabilitySlot {
            day: Day::MotzeiShabbos,
            start: String::new(),
            end: String::new(),
            flexible: true,
        };
        let json = serde_json::to_string(&slot).unwrap();
        assert!(json.contains("\"Motzei Shabbos\""));
        assert_eq!(Day::parse("Mon"), Some(Day::Mon));
        assert_eq!(Day::parse("Monday"), None);
    }

    #[test]
    fn test_blank_timestamp_reads_as_epoch() {
        assert_eq!(parse_timestamp(""), DateTime::<Utc>::default());
    }
}
