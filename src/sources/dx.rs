//! Offline music-db export: a song catalogue (`music.json`) plus best-score
//! records (`record.json`).
//!
//! Records reference songs by the game's own id, so the catalogue pass runs
//! first and the record pass resolves parents through the stored `game_id`.

use super::{SONGS, SourceReport};
use crate::config::Config;
use crate::engine::normalize::{
    ComboStatus, NormalizeError, coerce_f64, require, require_i64, require_str,
};
use crate::engine::{EntityResolver, FactKind, MergeEngine};
use crate::store::Store;
use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

pub const RECORDS: FactKind = FactKind {
    collection: "dx_records",
    key_fields: &["song_id", "difficulty"],
    mutable_fields: &["achievement", "deluxe_score", "combo_status", "rating"],
};

pub async fn sync(store: &dyn Store, config: &Config) -> Result<SourceReport> {
    let mut resolver = EntityResolver::new(store);
    let mut report = SourceReport::default();

    sync_catalogue(&mut resolver, &mut report, &config.dx_export_dir).await?;
    sync_records(store, &mut report, &config.dx_export_dir).await?;

    report.entities_created = resolver.created();
    Ok(report)
}

/// Resolve or create every catalogue song. Existing songs keep their stored
/// metadata; only unseen ones are inserted.
async fn sync_catalogue(
    resolver: &mut EntityResolver<'_>,
    report: &mut SourceReport,
    dir: &Path,
) -> Result<()> {
    let songs = read_json_array(&dir.join("music.json"))?;
    info!(songs = songs.len(), "processing song catalogue");

    for music in &songs {
        let doc = match normalize_catalogue_song(music) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(error = %e, "malformed catalogue song, skipping");
                report.merge.skipped += 1;
                continue;
            }
        };
        if let Some(name) = doc.get("name").and_then(Value::as_str) {
            debug!(song = name, "processing catalogue song");
        }
        if let Err(e) = resolver.resolve_or_create(&SONGS, doc).await {
            warn!(error = %e, "failed to resolve catalogue song");
            report.failed_items += 1;
        }
    }
    Ok(())
}

/// Normalize best-score records and merge them, keyed by song and
/// difficulty index.
async fn sync_records(store: &dyn Store, report: &mut SourceReport, dir: &Path) -> Result<()> {
    let records = read_json_array(&dir.join("record.json"))?;
    info!(records = records.len(), "processing score records");

    let mut facts = Vec::new();
    for record in &records {
        let game_id = match require_i64(record, "song_id") {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "malformed score record, skipping");
                report.merge.skipped += 1;
                continue;
            }
        };
        debug!(game_id, "processing score record");

        // Records key songs by game id, which is catalogue metadata; a
        // record for an uncatalogued song has no parent to attach to.
        let song_ref = match store.find_one(SONGS.collection, &json!({"game_id": game_id})).await
        {
            Ok(Some(doc)) => doc.id,
            Ok(None) => {
                warn!(game_id, "score record references unknown song, skipping");
                report.failed_items += 1;
                continue;
            }
            Err(e) => {
                warn!(game_id, error = %e, "song lookup failed, skipping record");
                report.failed_items += 1;
                continue;
            }
        };

        match normalize_record(record, song_ref) {
            Ok(fact) => facts.push(fact),
            Err(e) => {
                warn!(game_id, error = %e, "malformed score record, skipping");
                report.merge.skipped += 1;
            }
        }
    }

    report.merge += MergeEngine::new(store).merge(&RECORDS, facts).await?;
    Ok(())
}

fn read_json_array(path: &Path) -> Result<Vec<Value>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    match value {
        Value::Array(items) => Ok(items),
        _ => anyhow::bail!("{} is not a JSON array", path.display()),
    }
}

fn normalize_catalogue_song(music: &Value) -> Result<Value, NormalizeError> {
    let info = require(music, "basic_info")?;
    let deluxe = i64::from(require_str(music, "type")? == "DX");
    Ok(json!({
        "name": require_str(info, "title")?,
        "artist": require_str(info, "artist")?,
        "deluxe": deluxe,
        "genre": info.get("genre").and_then(Value::as_str).unwrap_or_default(),
        "bpm": coerce_f64(info.get("bpm")),
        "version": info.get("from").and_then(Value::as_str).unwrap_or_default(),
        "game_id": require_i64(music, "id")?,
        "levels": music.get("ds").cloned().unwrap_or_else(|| json!([])),
        "charts": music.get("charts").cloned().unwrap_or_else(|| json!([])),
    }))
}

fn normalize_record(record: &Value, song_ref: i64) -> Result<Value, NormalizeError> {
    let combo = record.get("fc").and_then(Value::as_str).unwrap_or_default();
    Ok(json!({
        "song_id": song_ref,
        "difficulty": require_i64(record, "level_index")?,
        "achievement": coerce_f64(record.get("achievements")),
        "deluxe_score": require_i64(record, "dxScore")?,
        "combo_status": ComboStatus::from_code(combo).code(),
        "rating": require_i64(record, "ra")?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_song_normalizes_type_to_deluxe_flag() {
        let music = json!({
            "id": 11663,
            "type": "DX",
            "basic_info": {
                "title": "Valsqotch",
                "artist": "Noah",
                "genre": "maimai",
                "bpm": 190,
                "from": "maimai でらっくす BUDDiES",
            },
            "ds": [7.0, 9.2, 12.4, 14.6],
            "charts": [{"notes": [500, 30, 20, 10]}],
        });

        let doc = normalize_catalogue_song(&music).unwrap();
        assert_eq!(doc["name"], "Valsqotch");
        assert_eq!(doc["deluxe"], 1);
        assert_eq!(doc["game_id"], 11663);
        assert_eq!(doc["bpm"], 190.0);

        let standard = json!({
            "id": 100,
            "type": "SD",
            "basic_info": {"title": "A", "artist": "B"},
        });
        assert_eq!(normalize_catalogue_song(&standard).unwrap()["deluxe"], 0);
    }

    #[test]
    fn record_normalizes_combo_code() {
        let record = json!({
            "song_id": 11663,
            "level_index": 3,
            "achievements": 99.8765,
            "dxScore": 2800,
            "fc": "ap",
            "ra": 301,
        });

        let fact = normalize_record(&record, 7).unwrap();
        assert_eq!(fact["song_id"], 7);
        assert_eq!(fact["difficulty"], 3);
        assert_eq!(fact["combo_status"], 3);
        assert_eq!(fact["rating"], 301);
    }

    #[test]
    fn null_achievement_coerces_to_zero() {
        let record = json!({
            "song_id": 1,
            "level_index": 0,
            "achievements": null,
            "dxScore": 100,
            "ra": 0,
        });
        let fact = normalize_record(&record, 1).unwrap();
        assert_eq!(fact["achievement"], 0.0);
        assert_eq!(fact["combo_status"], 0);
    }
}
