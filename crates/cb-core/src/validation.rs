//! # Validation & Normalization
//!
//! Turns raw submitted fields into a `PostDraft` or a single human-readable
//! rejection. Strings are trimmed and blank means absent. Fields that
//! clients send in more than one shape (slots, booleans, durations) arrive as
//! `serde_json::Value` and are coerced here.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{
    AvailabilitySlot, Day, Format, PostDraft, ALLOWED_DURATIONS, DEFAULT_DURATION_DAYS, RELAY_CONTACT,
};

pub const DEFAULT_CATEGORY: &str = "Other";
pub const DEFAULT_TOPIC: &str = "Untitled request";
pub const DEFAULT_TIME_ZONE: &str = "America/New_York";

/// How out-of-set `format` and `durationDays` values are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationPolicy {
    /// Reject, and require at least one availability slot on creation.
    #[default]
    Strict,
    /// Substitute `flexible` / 30 days and accept an empty slot list.
    Lenient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    Create,
    /// Duration is ignored; it only changes through renewal.
    Update,
}

/// Submitted post fields, as loose as clients send them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PostInput {
    pub category: Option<String>,
    pub sefer_name: Option<String>,
    pub topic: Option<String>,
    pub learning_style: Option<String>,
    pub familiarity_level: Option<String>,
    pub time_zone: Option<String>,
    pub availability_notes: Option<String>,
    /// Older clients send free-text availability under this name.
    pub availability: Option<String>,
    pub availability_slots: Value,
    pub open_to_other_times: Value,
    pub format: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub email: Option<String>,
    pub poster_name: Option<String>,
    pub contact_method: Option<String>,
    pub duration_days: Value,
}

/// Trimmed value, or `None` when absent or blank.
pub fn clean(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_owned)
}

fn text(value: &Option<String>) -> String {
    clean(value.as_deref()).unwrap_or_default()
}

fn text_or(value: &Option<String>, fallback: &str) -> String {
    clean(value.as_deref()).unwrap_or_else(|| fallback.to_owned())
}

pub fn validate_post(input: &PostInput, policy: ValidationPolicy, mode: ValidationMode) -> Result<PostDraft> {
    let contact_method = text_or(&input.contact_method, RELAY_CONTACT);
    if contact_method != RELAY_CONTACT {
        return Err(AppError::validation("Only relay contact is supported."));
    }

    let format = parse_format(input.format.as_deref(), policy)?;
    let duration_days = match mode {
        ValidationMode::Create => Some(parse_duration(&input.duration_days, policy)?),
        ValidationMode::Update => None,
    };

    let (city, state) = if format.needs_location() {
        let city = text(&input.city);
        let state = text(&input.state);
        if city.is_empty() || state.is_empty() {
            return Err(AppError::validation("City and state are required for in-person formats."));
        }
        (city, state)
    } else {
        (String::new(), String::new())
    };

    let email = text(&input.email);
    if email.is_empty() {
        return Err(AppError::validation("Email is required so responses can be relayed to you."));
    }

    let availability_slots = parse_slots(&input.availability_slots);
    if mode == ValidationMode::Create && policy == ValidationPolicy::Strict && availability_slots.is_empty() {
        return Err(AppError::validation("Add at least one availability slot."));
    }

    let availability_notes = clean(input.availability_notes.as_deref())
        .or_else(|| clean(input.availability.as_deref()))
        .unwrap_or_default();

    Ok(PostDraft {
        category: text_or(&input.category, DEFAULT_CATEGORY),
        sefer_name: text(&input.sefer_name),
        topic: text_or(&input.topic, DEFAULT_TOPIC),
        learning_style: text(&input.learning_style),
        familiarity_level: text(&input.familiarity_level),
        time_zone: text_or(&input.time_zone, DEFAULT_TIME_ZONE),
        availability_notes,
        availability_slots,
        open_to_other_times: to_bool(&input.open_to_other_times),
        format,
        city,
        state,
        poster_name: title_case(&text(&input.poster_name)),
        email,
        contact_method,
        duration_days,
    })
}

pub fn parse_format(value: Option<&str>, policy: ValidationPolicy) -> Result<Format> {
    match (clean(value).as_deref().and_then(Format::parse), policy) {
        (Some(format), _) => Ok(format),
        (None, ValidationPolicy::Lenient) => Ok(Format::Flexible),
        (None, ValidationPolicy::Strict) => Err(AppError::validation(
            "Format must be one of in_person_only, in_person_preferred, remote_only, flexible.",
        )),
    }
}

/// Accepts a JSON number or a numeric string.
pub fn parse_duration(value: &Value, policy: ValidationPolicy) -> Result<u32> {
    let days = match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    }
    .filter(|days| ALLOWED_DURATIONS.contains(days));

    match (days, policy) {
        (Some(days), _) => Ok(days),
        (None, ValidationPolicy::Lenient) => Ok(DEFAULT_DURATION_DAYS),
        (None, ValidationPolicy::Strict) => Err(AppError::validation("Duration must be 7, 14, or 30 days.")),
    }
}

/// `true`, or the string `"true"` in any case. Everything else is false.
pub fn to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Minutes since midnight for a strict `HH:MM` (24-hour, two-digit) time.
pub fn parse_clock(value: &str) -> Option<u16> {
    let (hours, minutes) = value.trim().split_once(':')?;
    if hours.len() != 2 || minutes.len() != 2 {
        return None;
    }
    if !hours.bytes().chain(minutes.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: u16 = hours.parse().ok()?;
    let minutes: u16 = minutes.parse().ok()?;
    (hours < 24 && minutes < 60).then_some(hours * 60 + minutes)
}

fn normalize_time(value: Option<&Value>) -> Option<(String, u16)> {
    let raw = value?.as_str()?.trim();
    parse_clock(raw).map(|minutes| (raw.to_owned(), minutes))
}

/// Accepts an array of slot objects or a JSON string holding one. Entries
/// without a known day, and non-flexible entries without an ordered
/// `start < end` pair, are dropped.
pub fn parse_slots(value: &Value) -> Vec<AvailabilitySlot> {
    let decoded;
    let entries: &[Value] = match value {
        Value::Array(entries) => entries,
        Value::String(raw) => {
            decoded = match serde_json::from_str::<Value>(raw) {
                Ok(Value::Array(entries)) => entries,
                _ => return Vec::new(),
            };
            &decoded
        }
        _ => return Vec::new(),
    };

    entries.iter().filter_map(normalize_slot).collect()
}

fn normalize_slot(entry: &Value) -> Option<AvailabilitySlot> {
    let day = entry.get("day")?.as_str().map(str::trim).and_then(Day::parse)?;
    let flexible = entry.get("flexible").is_some_and(truthy);
    if flexible {
        return Some(AvailabilitySlot {
            day,
            start: String::new(),
            end: String::new(),
            flexible,
        });
    }

    let (start, start_minutes) = normalize_time(entry.get("start"))?;
    let (end, end_minutes) = normalize_time(entry.get("end"))?;
    if start_minutes >= end_minutes {
        return None;
    }
    Some(AvailabilitySlot {
        day,
        start,
        end,
        flexible,
    })
}

/// Capitalizes each whitespace-delimited word and collapses runs of
/// whitespace. Display only; never used for lookup.
pub fn title_case(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(body: Value) -> PostInput {
        serde_json::from_value(body).unwrap()
    }

    fn base() -> Value {
        json!({
            "category": "Gemara",
            "seferName": "Berachos",
            "topic": "  Daf Yomi  ",
            "format": "remote_only",
            "email": "  learner@mail.test ",
            "posterName": "yAAKOV   cohen",
            "durationDays": 14,
            "availabilitySlots": [{"day": "Mon", "start": "18:00", "end": "20:00", "flexible": false}]
        })
    }

    #[test]
    fn test_normalizes_strings_and_defaults() {
        let mut body = base();
        body["category"] = json!("   ");
        let draft = validate_post(&input(body), ValidationPolicy::Strict, ValidationMode::Create).unwrap();
        assert_eq!(draft.category, DEFAULT_CATEGORY);
        assert_eq!(draft.topic, "Daf Yomi");
        assert_eq!(draft.email, "learner@mail.test");
        assert_eq!(draft.poster_name, "Yaakov Cohen");
        assert_eq!(draft.time_zone, DEFAULT_TIME_ZONE);
        assert_eq!(draft.duration_days, Some(14));
        assert_eq!(draft.contact_method, "relay");
    }

    #[test]
    fn test_rejects_non_relay_contact_under_both_policies() {
        for policy in [ValidationPolicy::Strict, ValidationPolicy::Lenient] {
            let mut body = base();
            body["contactMethod"] = json!("phone");
            let err = validate_post(&input(body), policy, ValidationMode::Create).unwrap_err();
            assert_eq!(err.to_string(), "Only relay contact is supported.");
        }
    }

    #[test]
    fn test_format_policy() {
        let mut body = base();
        body["format"] = json!("zoom");
        assert!(matches!(
            validate_post(&input(body.clone()), ValidationPolicy::Strict, ValidationMode::Create),
            Err(AppError::Validation(_))
        ));
        let draft = validate_post(&input(body), ValidationPolicy::Lenient, ValidationMode::Create).unwrap();
        assert_eq!(draft.format, Format::Flexible);
    }

    #[test]
    fn test_duration_policy() {
        assert_eq!(parse_duration(&json!("7"), ValidationPolicy::Strict).unwrap(), 7);
        assert!(parse_duration(&json!(10), ValidationPolicy::Strict).is_err());
        assert!(parse_duration(&Value::Null, ValidationPolicy::Strict).is_err());
        assert_eq!(parse_duration(&json!(10), ValidationPolicy::Lenient).unwrap(), DEFAULT_DURATION_DAYS);
    }

    #[test]
    fn test_update_ignores_duration() {
        let mut body = base();
        body["durationDays"] = json!(99);
        let draft = validate_post(&input(body), ValidationPolicy::Strict, ValidationMode::Update).unwrap();
        assert_eq!(draft.duration_days, None);
    }

    #[test]
    fn test_location_required_for_in_person() {
        let mut body = base();
        body["format"] = json!("in_person_only");
        body["city"] = json!("");
        body["state"] = json!("NJ");
        let err = validate_post(&input(body.clone()), ValidationPolicy::Lenient, ValidationMode::Create).unwrap_err();
        assert_eq!(err.to_string(), "City and state are required for in-person formats.");

        body["city"] = json!("Lakewood");
        let draft = validate_post(&input(body), ValidationPolicy::Strict, ValidationMode::Create).unwrap();
        assert_eq!((draft.city.as_str(), draft.state.as_str()), ("Lakewood", "NJ"));
    }

    #[test]
    fn test_location_cleared_for_remote() {
        let mut body = base();
        body["city"] = json!("Lakewood");
        body["state"] = json!("NJ");
        let draft = validate_post(&input(body), ValidationPolicy::Strict, ValidationMode::Create).unwrap();
        assert!(draft.city.is_empty());
        assert!(draft.state.is_empty());
    }

    #[test]
    fn test_email_required_but_not_parsed() {
        let mut body = base();
        body["email"] = json!("   ");
        assert!(validate_post(&input(body.clone()), ValidationPolicy::Strict, ValidationMode::Create).is_err());
        body["email"] = json!("not an address");
        assert!(validate_post(&input(body), ValidationPolicy::Strict, ValidationMode::Create).is_ok());
    }

    #[test]
    fn test_strict_create_requires_slots() {
        let mut body = base();
        body["availabilitySlots"] = json!([{"day": "Mon", "start": "20:00", "end": "18:00"}]);
        let err = validate_post(&input(body.clone()), ValidationPolicy::Strict, ValidationMode::Create).unwrap_err();
        assert_eq!(err.to_string(), "Add at least one availability slot.");
        assert!(validate_post(&input(body.clone()), ValidationPolicy::Lenient, ValidationMode::Create).is_ok());
        assert!(validate_post(&input(body), ValidationPolicy::Strict, ValidationMode::Update).is_ok());
    }

    #[test]
    fn test_parse_slots_drops_bad_entries() {
        let slots = parse_slots(&json!([
            {"day": "Mon", "start": "18:00", "end": "20:00"},
            {"day": "", "start": "18:00", "end": "20:00"},
            {"day": "Saturday", "flexible": true},
            {"day": "Tue", "start": "9:00", "end": "10:00"},
            {"day": "Wed", "start": "10:00", "end": "10:00"},
            {"day": "Thu", "start": "24:00", "end": "23:00"},
            {"day": "Fri", "start": "07:00", "end": "08:00", "flexible": true},
            {"start": "07:00", "end": "08:00"},
            "Sun"
        ]));
        assert_eq!(
            slots,
            vec![
                AvailabilitySlot { day: Day::Mon, start: "18:00".into(), end: "20:00".into(), flexible: false },
                AvailabilitySlot { day: Day::Fri, start: String::new(), end: String::new(), flexible: true },
            ]
        );
    }

    #[test]
    fn test_parse_slots_from_json_string() {
        let raw = json!(r#"[{"day":"Motzei Shabbos","start":"21:30","end":"23:00","flexible":false}]"#);
        let slots = parse_slots(&raw);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].day, Day::MotzeiShabbos);
        assert!(parse_slots(&json!("not json")).is_empty());
        assert!(parse_slots(&json!({"day": "Mon"})).is_empty());
    }

    #[test]
    fn test_parse_clock() {
        assert_eq!(parse_clock("00:00"), Some(0));
        assert_eq!(parse_clock("23:59"), Some(23 * 60 + 59));
        assert_eq!(parse_clock("24:00"), None);
        assert_eq!(parse_clock("7:30"), None);
        assert_eq!(parse_clock("07:60"), None);
        assert_eq!(parse_clock("ab:cd"), None);
    }

    #[test]
    fn test_to_bool() {
        assert!(to_bool(&json!(true)));
        assert!(to_bool(&json!("TRUE")));
        assert!(!to_bool(&json!("yes")));
        assert!(!to_bool(&json!(1)));
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("  rivka  BAT  sarah "), "Rivka Bat Sarah");
        assert_eq!(title_case(""), "");
    }
}
