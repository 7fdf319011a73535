//! Otogame portal export: numbered JSON files of recent maimai plays.
//!
//! Each play carries a nested `music` object (the song natural key) plus the
//! full judgment breakdown. Files are numbered by export batch; records
//! inside a file are newest-first, so they are replayed in reverse to apply
//! oldest-first.

use super::{SONGS, SourceReport};
use crate::config::Config;
use crate::engine::normalize::{
    ChallengeType, ComboStatus, NormalizeError, coerce_f64, coerce_i64, parse_timestamp,
    require_flag, require_i64, require_str, timestamp_value,
};
use crate::engine::{EntityResolver, FactKind, MergeEngine};
use crate::store::Store;
use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const PLAYS: FactKind = FactKind {
    collection: "otogame_plays",
    key_fields: &["song_id", "difficulty", "track", "played_at"],
    mutable_fields: &[
        "achievement",
        "deluxe_score",
        "combo",
        "challenge",
        "fast",
        "late",
        "judgments",
    ],
};

pub async fn sync(store: &dyn Store, config: &Config) -> Result<SourceReport> {
    let files = export_files(&config.otogame_export_dir)?;
    if files.is_empty() {
        warn!(
            dir = %config.otogame_export_dir.display(),
            "no otogame export files found"
        );
        return Ok(SourceReport::default());
    }

    let mut resolver = EntityResolver::new(store);
    let mut report = SourceReport::default();
    let mut facts = Vec::new();

    for &(batch, ref path) in &files {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read export file {}", path.display()))?;
        let records: Value = serde_json::from_str(&raw)
            .with_context(|| format!("export file {} is not valid JSON", path.display()))?;
        let records = records
            .as_array()
            .with_context(|| format!("export file {} is not a JSON array", path.display()))?;

        debug!(batch, plays = records.len(), "processing export file");

        // Export batches list the newest play first; apply oldest-first.
        for item in records.iter().rev() {
            let Some(music) = item.get("music") else {
                warn!(batch, "play record has no music object, skipping");
                report.merge.skipped += 1;
                continue;
            };

            let song_doc = match normalize_song(music) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(batch, error = %e, "malformed song in play record, skipping");
                    report.merge.skipped += 1;
                    continue;
                }
            };
            if let Some(name) = song_doc.get("name").and_then(Value::as_str) {
                debug!(song = name, "processing play");
            }

            let song_ref = match resolver.resolve_or_create(&SONGS, song_doc).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(batch, error = %e, "failed to resolve song, skipping play");
                    report.failed_items += 1;
                    continue;
                }
            };

            match normalize_play(item, song_ref) {
                Ok(fact) => facts.push(fact),
                Err(e) => {
                    warn!(batch, error = %e, "malformed play record, skipping");
                    report.merge.skipped += 1;
                }
            }
        }
    }

    report.merge += MergeEngine::new(store).merge(&PLAYS, facts).await?;
    report.entities_created = resolver.created();
    info!(files = files.len(), "otogame export processed");
    Ok(report)
}

/// Locate numbered export files (`1.json`, `2.json`, ...), oldest batch
/// first so newer observations land last and win any same-key merge.
fn export_files(dir: &Path) -> Result<Vec<(u32, PathBuf)>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("failed to read export directory {}", dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e == "json")
            && let Some(batch) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u32>().ok())
        {
            files.push((batch, path));
        }
    }
    files.sort_by_key(|&(batch, _)| batch);
    Ok(files)
}

fn normalize_song(music: &Value) -> Result<Value, NormalizeError> {
    Ok(json!({
        "name": require_str(music, "name")?,
        "artist": require_str(music, "artist")?,
        "deluxe": require_flag(music, "is_deluxe")?,
    }))
}

fn normalize_play(item: &Value, song_ref: i64) -> Result<Value, NormalizeError> {
    Ok(json!({
        "song_id": song_ref,
        "difficulty": require_i64(item, "difficulty")?,
        "track": require_i64(item, "track_no")?,
        "played_at": timestamp_value(parse_timestamp(item.get("play_date"))),
        "achievement": coerce_f64(item.get("achievement")),
        "deluxe_score": require_i64(item, "deluxe_score")?,
        "combo": {
            "status": ComboStatus::from_flags(item).code(),
            "actual": coerce_i64(item.get("max_combo")),
            "max": coerce_i64(item.get("total_combo")),
        },
        "challenge": {
            "type": ChallengeType::from_flags(item).code(),
            "result_life": coerce_i64(item.get("life")),
            "start_life": coerce_i64(item.get("total_life")),
        },
        "fast": coerce_i64(item.get("fast_count")),
        "late": coerce_i64(item.get("late_count")),
        "judgments": {
            "tap": judgment_row(item, "tap"),
            "hold": judgment_row(item, "hold"),
            "slide": judgment_row(item, "slide"),
            "touch": judgment_row(item, "touch"),
            "break": judgment_row(item, "break"),
        },
    }))
}

/// Collapse one note type's five judgment counters into an array, ordered
/// critical-perfect down to miss.
fn judgment_row(item: &Value, kind: &str) -> Value {
    let grades = ["critical_perfect", "perfect", "great", "good", "miss"];
    Value::Array(
        grades
            .iter()
            .map(|grade| json!(coerce_i64(item.get(format!("{kind}_{grade}").as_str()))))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn play_record() -> Value {
        json!({
            "music": {"name": "Pandora Paradoxxx", "artist": "masayoshi iimori", "is_deluxe": true},
            "difficulty": 4,
            "track_no": 2,
            "play_date": 1_700_000_000,
            "achievement": 100.1234,
            "deluxe_score": 2345,
            "is_full_combo": true,
            "is_all_perfect": true,
            "max_combo": 870,
            "total_combo": 871,
            "is_course": true,
            "life": 80,
            "total_life": 100,
            "fast_count": 12,
            "late_count": 3,
            "tap_critical_perfect": 400, "tap_perfect": 30, "tap_great": 2, "tap_good": 0, "tap_miss": 1,
            "hold_critical_perfect": 90, "hold_perfect": 4, "hold_great": 0, "hold_good": 0, "hold_miss": 0,
            "slide_critical_perfect": 60, "slide_perfect": 0, "slide_great": 0, "slide_good": 0, "slide_miss": 0,
            "touch_critical_perfect": 20, "touch_perfect": 0, "touch_great": 0, "touch_good": 0, "touch_miss": 0,
            "break_critical_perfect": 5, "break_perfect": 1, "break_great": 0, "break_good": 0, "break_miss": 0,
        })
    }

    #[test]
    fn play_normalizes_with_derived_codes() {
        let fact = normalize_play(&play_record(), 42).unwrap();

        assert_eq!(fact["song_id"], 42);
        assert_eq!(fact["difficulty"], 4);
        assert_eq!(fact["played_at"], "2023-11-14T22:13:20Z");
        // Both combo flags set: all-perfect outranks full-combo.
        assert_eq!(fact["combo"]["status"], 3);
        assert_eq!(fact["challenge"]["type"], 2);
        assert_eq!(fact["judgments"]["tap"], json!([400, 30, 2, 0, 1]));
        assert_eq!(fact["judgments"]["break"], json!([5, 1, 0, 0, 0]));
    }

    #[test]
    fn missing_required_field_names_it() {
        let mut record = play_record();
        record.as_object_mut().unwrap().remove("deluxe_score");
        assert_eq!(
            normalize_play(&record, 1),
            Err(NormalizeError::MissingField("deluxe_score"))
        );
    }

    #[test]
    fn song_key_normalizes_deluxe_flag_to_integer() {
        let doc =
            normalize_song(&json!({"name": "A", "artist": "B", "is_deluxe": true})).unwrap();
        assert_eq!(doc["deluxe"], 1);
        let doc = normalize_song(&json!({"name": "A", "artist": "B", "is_deluxe": 0})).unwrap();
        assert_eq!(doc["deluxe"], 0);
    }
}
