//! # Availability Matching
//!
//! Decides whether a post is free at a requested day and/or time, and
//! orders listings so that matching posts come first.

use crate::error::{AppError, Result};
use crate::models::{AvailabilitySlot, Day, Post};
use crate::validation::{clean, parse_clock};

/// A requested day and/or time of day (minutes since midnight).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AvailabilityFilter {
    pub day: Option<Day>,
    pub time: Option<u16>,
}

impl AvailabilityFilter {
    /// Parses query-string values. Blank values mean "no constraint".
    pub fn parse(day: Option<&str>, time: Option<&str>) -> Result<Self> {
        let day = match clean(day) {
            Some(raw) => Some(Day::parse(&raw).ok_or_else(|| AppError::validation(format!("Unknown day: {raw}.")))?),
            None => None,
        };
        let time = match clean(time) {
            Some(raw) => Some(parse_clock(&raw).ok_or_else(|| AppError::validation("Time must be HH:MM."))?),
            None => None,
        };
        Ok(Self { day, time })
    }

    pub fn is_empty(&self) -> bool {
        self.day.is_none() && self.time.is_none()
    }

    /// Whether `post` is available under this filter.
    ///
    /// No filter always matches, and so does a post that is open to other
    /// times. Otherwise some slot must be on the requested day (if any) and
    /// either flexible or spanning the requested time, bounds inclusive.
    pub fn matches(&self, post: &Post) -> bool {
        if self.is_empty() || post.open_to_other_times {
            return true;
        }
        post.availability_slots.iter().any(|slot| self.slot_matches(slot))
    }

    fn slot_matches(&self, slot: &AvailabilitySlot) -> bool {
        if self.day.is_some_and(|day| day != slot.day) {
            return false;
        }
        if slot.flexible {
            return true;
        }
        let Some(time) = self.time else {
            return true;
        };
        match (parse_clock(&slot.start), parse_clock(&slot.end)) {
            (Some(start), Some(end)) => start <= time && time <= end,
            _ => false,
        }
    }
}

/// Stable two-key ordering: matches first, then newest first.
pub fn rank(posts: &mut [Post], filter: &AvailabilityFilter) {
    posts.sort_by(|a, b| {
        filter
            .matches(b)
            .cmp(&filter.matches(a))
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{parse_timestamp, Format, PostStatus};

    fn slot(day: Day, start: &str, end: &str) -> AvailabilitySlot {
        AvailabilitySlot {
            day,
            start: start.into(),
            end: end.into(),
            flexible: false,
        }
    }

    fn flexible(day: Day) -> AvailabilitySlot {
        AvailabilitySlot {
            day,
            start: String::new(),
            end: String::new(),
            flexible: true,
        }
    }

    fn post(id: &str, created_at: &str, slots: Vec<AvailabilitySlot>, open: bool) -> Post {
        Post {
            id: id.into(),
            manage_token: format!("token-{id}"),
            category: "Gemara".into(),
            sefer_name: String::new(),
            topic: "Topic".into(),
            learning_style: String::new(),
            familiarity_level: String::new(),
            time_zone: "America/New_York".into(),
            availability_notes: String::new(),
            availability_slots: slots,
            open_to_other_times: open,
            format: Format::RemoteOnly,
            city: String::new(),
            state: String::new(),
            contact_method: "relay".into(),
            poster_name: String::new(),
            email: "a@mail.test".into(),
            duration_days: 30,
            created_at: parse_timestamp(created_at),
            expires_at: parse_timestamp("2099-01-01T00:00:00.000Z"),
            status: PostStatus::Active,
        }
    }

    fn filter(day: Option<&str>, time: Option<&str>) -> AvailabilityFilter {
        AvailabilityFilter::parse(day, time).unwrap()
    }

    #[test]
    fn test_no_filter_matches_everything() {
        let p = post("a", "2026-01-01T00:00:00.000Z", vec![], false);
        assert!(filter(None, None).matches(&p));
        assert!(filter(Some("  "), Some("")).matches(&p));
    }

    #[test]
    fn test_open_to_other_times_overrides_slots() {
        let p = post("a", "2026-01-01T00:00:00.000Z", vec![slot(Day::Mon, "18:00", "20:00")], true);
        for day in Day::ALL {
            for time in ["00:00", "12:00", "23:59"] {
                assert!(filter(Some(day.as_str()), Some(time)).matches(&p));
            }
        }
    }

    #[test]
    fn test_empty_slots_never_match_a_filter() {
        let p = post("a", "2026-01-01T00:00:00.000Z", vec![], false);
        assert!(!filter(Some("Mon"), None).matches(&p));
        assert!(!filter(None, Some("18:00")).matches(&p));
    }

    #[test]
    fn test_time_window_is_inclusive() {
        let p = post("a", "2026-01-01T00:00:00.000Z", vec![slot(Day::Mon, "18:00", "20:00")], false);
        assert!(filter(Some("Mon"), Some("18:00")).matches(&p));
        assert!(filter(Some("Mon"), Some("20:00")).matches(&p));
        assert!(filter(None, Some("19:15")).matches(&p));
        assert!(!filter(Some("Mon"), Some("20:01")).matches(&p));
        assert!(!filter(Some("Mon"), Some("17:59")).matches(&p));
        assert!(!filter(Some("Tue"), Some("19:00")).matches(&p));
        assert!(filter(Some("Mon"), None).matches(&p));
    }

    #[test]
    fn test_flexible_slot_matches_any_time_on_its_day() {
        let p = post("a", "2026-01-01T00:00:00.000Z", vec![flexible(Day::Thu)], false);
        assert!(filter(Some("Thu"), Some("03:00")).matches(&p));
        assert!(!filter(Some("Fri"), Some("03:00")).matches(&p));
        assert!(filter(None, Some("03:00")).matches(&p));
    }

    #[test]
    fn test_parse_rejects_unknown_values() {
        assert!(AvailabilityFilter::parse(Some("Someday"), None).is_err());
        assert!(AvailabilityFilter::parse(None, Some("25:00")).is_err());
    }

    #[test]
    fn test_rank_puts_matches_first_then_newest() {
        let mut posts = vec![
            post("old-match", "2026-01-01T00:00:00.000Z", vec![slot(Day::Mon, "18:00", "20:00")], false),
            post("new-miss", "2026-01-03T00:00:00.000Z", vec![slot(Day::Tue, "18:00", "20:00")], false),
            post("new-match", "2026-01-02T00:00:00.000Z", vec![], true),
            post("newest-miss", "2026-01-04T00:00:00.000Z", vec![], false),
        ];
        rank(&mut posts, &filter(Some("Mon"), Some("19:00")));
        let order: Vec<&str> = posts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(order, ["new-match", "old-match", "newest-miss", "new-miss"]);
    }
}
