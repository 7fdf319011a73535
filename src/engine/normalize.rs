//! Shared normalization helpers: numeric coercion, timestamp parsing, and
//! the derived combo/challenge enumerations.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("record is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` has unusable value `{value}`")]
    InvalidField { field: &'static str, value: String },
}

/// Fetch a required field. A JSON `null` counts as absent.
pub fn require<'v>(record: &'v Value, field: &'static str) -> Result<&'v Value, NormalizeError> {
    match record.get(field) {
        Some(Value::Null) | None => Err(NormalizeError::MissingField(field)),
        Some(v) => Ok(v),
    }
}

pub fn require_i64(record: &Value, field: &'static str) -> Result<i64, NormalizeError> {
    let v = require(record, field)?;
    v.as_i64().ok_or_else(|| NormalizeError::InvalidField {
        field,
        value: v.to_string(),
    })
}

pub fn require_str<'v>(record: &'v Value, field: &'static str) -> Result<&'v str, NormalizeError> {
    let v = require(record, field)?;
    v.as_str().ok_or_else(|| NormalizeError::InvalidField {
        field,
        value: v.to_string(),
    })
}

/// Interpret a field as a 0/1 flag. Accepts booleans and integers.
pub fn require_flag(record: &Value, field: &'static str) -> Result<i64, NormalizeError> {
    let v = require(record, field)?;
    match v {
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::Number(n) if n.as_i64().is_some() => Ok(i64::from(n.as_i64() != Some(0))),
        _ => Err(NormalizeError::InvalidField {
            field,
            value: v.to_string(),
        }),
    }
}

/// Coerce a value to a float. Absent, null, or non-numeric values normalize
/// to 0.0 (a null performance-point entry is a real case, not an error).
pub fn coerce_f64(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Coerce a value to an integer, defaulting to 0 for absent or non-numeric
/// values (mirrors [`coerce_f64`] for count-like fields).
pub fn coerce_i64(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Parse a play timestamp from either a Unix epoch integer (UTC) or an
/// ISO-8601 string with an explicit offset. Anything else is `None`, the
/// unknown sentinel, never the current time.
pub fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        Value::String(s) => DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.to_utc()),
        _ => None,
    }
}

/// Render a parsed timestamp for storage: an RFC 3339 string, or the `null`
/// unknown sentinel.
pub fn timestamp_value(ts: Option<DateTime<Utc>>) -> Value {
    match ts {
        Some(t) => Value::String(t.to_rfc3339_opts(SecondsFormat::Secs, true)),
        None => Value::Null,
    }
}

fn flag_set(record: &Value, field: &str) -> bool {
    match record.get(field) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64() != Some(0),
        _ => false,
    }
}

/// Combo status codes, highest prestige last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComboStatus {
    None = 0,
    FullCombo = 1,
    FullComboPlus = 2,
    AllPerfect = 3,
    AllPerfectPlus = 4,
}

/// Boolean-flag rules in strict priority order: the first set flag wins, so
/// a record carrying both all-perfect and full-combo resolves to all-perfect.
const COMBO_FLAG_RULES: &[(&str, ComboStatus)] = &[
    ("is_all_perfect_plus", ComboStatus::AllPerfectPlus),
    ("is_all_perfect", ComboStatus::AllPerfect),
    ("is_full_combo_plus", ComboStatus::FullComboPlus),
    ("is_full_combo", ComboStatus::FullCombo),
];

/// String-code rules in the same priority order, for sources that export a
/// single code instead of flags.
const COMBO_CODE_RULES: &[(&str, ComboStatus)] = &[
    ("app", ComboStatus::AllPerfectPlus),
    ("ap", ComboStatus::AllPerfect),
    ("fcp", ComboStatus::FullComboPlus),
    ("fc", ComboStatus::FullCombo),
];

impl ComboStatus {
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_flags(record: &Value) -> Self {
        COMBO_FLAG_RULES
            .iter()
            .find(|(field, _)| flag_set(record, field))
            .map_or(ComboStatus::None, |&(_, status)| status)
    }

    pub fn from_code(code: &str) -> Self {
        COMBO_CODE_RULES
            .iter()
            .find(|(c, _)| *c == code)
            .map_or(ComboStatus::None, |&(_, status)| status)
    }
}

/// Challenge-mode codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeType {
    None = 0,
    PerfectChallenge = 1,
    Course = 2,
    Kaleidoscope = 3,
}

const CHALLENGE_FLAG_RULES: &[(&str, ChallengeType)] = &[
    ("is_perfect_challenge", ChallengeType::PerfectChallenge),
    ("is_course", ChallengeType::Course),
    ("is_kaleidx", ChallengeType::Kaleidoscope),
];

impl ChallengeType {
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_flags(record: &Value) -> Self {
        CHALLENGE_FLAG_RULES
            .iter()
            .find(|(field, _)| flag_set(record, field))
            .map_or(ChallengeType::None, |&(_, ty)| ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn higher_prestige_combo_flag_wins() {
        let record = json!({"is_full_combo": true, "is_all_perfect": true});
        assert_eq!(ComboStatus::from_flags(&record), ComboStatus::AllPerfect);

        let record = json!({"is_full_combo": true, "is_full_combo_plus": true, "is_all_perfect_plus": true});
        assert_eq!(ComboStatus::from_flags(&record), ComboStatus::AllPerfectPlus);
    }

    #[test]
    fn no_combo_flags_means_none() {
        assert_eq!(
            ComboStatus::from_flags(&json!({"is_full_combo": false})),
            ComboStatus::None
        );
        assert_eq!(ComboStatus::from_flags(&json!({})), ComboStatus::None);
    }

    #[test]
    fn combo_codes_map_to_statuses() {
        assert_eq!(ComboStatus::from_code("fc").code(), 1);
        assert_eq!(ComboStatus::from_code("fcp").code(), 2);
        assert_eq!(ComboStatus::from_code("ap").code(), 3);
        assert_eq!(ComboStatus::from_code("app").code(), 4);
        assert_eq!(ComboStatus::from_code("").code(), 0);
        assert_eq!(ComboStatus::from_code("sync").code(), 0);
    }

    #[test]
    fn challenge_priority_follows_rule_order() {
        let record = json!({"is_perfect_challenge": true, "is_course": true});
        assert_eq!(
            ChallengeType::from_flags(&record),
            ChallengeType::PerfectChallenge
        );
        assert_eq!(
            ChallengeType::from_flags(&json!({"is_kaleidx": 1})),
            ChallengeType::Kaleidoscope
        );
        assert_eq!(ChallengeType::from_flags(&json!({})), ChallengeType::None);
    }

    #[test]
    fn epoch_timestamps_are_utc() {
        let ts = parse_timestamp(Some(&json!(1_700_000_000))).unwrap();
        assert_eq!(ts.to_rfc3339(), "2023-11-14T22:13:20+00:00");
    }

    #[test]
    fn offset_strings_convert_to_utc() {
        let ts = parse_timestamp(Some(&json!("2024-03-01T09:30:00+09:00"))).unwrap();
        assert_eq!(timestamp_value(Some(ts)), json!("2024-03-01T00:30:00Z"));
    }

    #[test]
    fn unparsable_dates_are_the_unknown_sentinel() {
        assert_eq!(parse_timestamp(Some(&json!("last tuesday"))), None);
        assert_eq!(parse_timestamp(Some(&json!(null))), None);
        assert_eq!(parse_timestamp(None), None);
        assert_eq!(timestamp_value(None), Value::Null);
    }

    #[test]
    fn non_numeric_values_coerce_to_zero() {
        assert_eq!(coerce_f64(Some(&json!(null))), 0.0);
        assert_eq!(coerce_f64(None), 0.0);
        assert_eq!(coerce_f64(Some(&json!("12.5"))), 12.5);
        assert_eq!(coerce_f64(Some(&json!("n/a"))), 0.0);
        assert_eq!(coerce_f64(Some(&json!(3))), 3.0);
    }

    #[test]
    fn required_fields_report_their_name() {
        let record = json!({"present": 1, "nulled": null});
        assert_eq!(
            require(&record, "absent"),
            Err(NormalizeError::MissingField("absent"))
        );
        assert_eq!(
            require(&record, "nulled"),
            Err(NormalizeError::MissingField("nulled"))
        );
        assert!(require(&record, "present").is_ok());
    }

    #[test]
    fn flags_accept_bools_and_integers() {
        assert_eq!(require_flag(&json!({"f": true}), "f"), Ok(1));
        assert_eq!(require_flag(&json!({"f": false}), "f"), Ok(0));
        assert_eq!(require_flag(&json!({"f": 1}), "f"), Ok(1));
        assert_eq!(require_flag(&json!({"f": 0}), "f"), Ok(0));
        assert!(require_flag(&json!({"f": "DX"}), "f").is_err());
    }
}
