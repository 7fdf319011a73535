//! osu! profile sync: mapset/map metadata and per-map user scores.
//!
//! The v2 API has no endpoint listing every map a user has played, so a
//! saved profile-page export supplies the id list; everything else comes
//! from the API. Scores are kept one per (map, mode) and replaced in place
//! by newer observations.

use super::SourceReport;
use crate::config::Config;
use crate::engine::normalize::{
    NormalizeError, coerce_f64, coerce_i64, parse_timestamp, require_i64, require_str,
    timestamp_value,
};
use crate::engine::{EntityKind, EntityResolver, FactKind, MergeEngine};
use crate::osu::{CredentialManager, OsuApi};
use crate::store::Store;
use anyhow::{Context, Result};
use html_scraper::{Html, Selector};
use regex::Regex;
use serde_json::{Value, json};
use std::fs;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

pub const MAPSETS: EntityKind = EntityKind {
    collection: "mapsets",
    key_fields: &["mapset_id"],
    refreshable_fields: &[],
};

pub const MAPS: EntityKind = EntityKind {
    collection: "maps",
    key_fields: &["map_id"],
    refreshable_fields: &["self_play_count"],
};

pub const SCORES: FactKind = FactKind {
    collection: "osu_scores",
    key_fields: &["map_id", "mode"],
    mutable_fields: &[
        "score",
        "accuracy",
        "pp",
        "mods",
        "played_at",
        "replay",
        "rank",
        "full_combo",
        "max_combo",
        "judgments",
        "pinned_id",
    ],
};

pub async fn sync(store: &dyn Store, config: &Config) -> Result<SourceReport> {
    let manager = CredentialManager::new(
        config.oauth()?,
        config.credentials_path.clone(),
        config.fetch_timeout(),
    )
    .context("failed to build credential manager")?;
    let credentials = manager.load()?;
    let token = credentials.access_token.as_str();

    let user_id = config
        .osu_user_id
        .clone()
        .context("OSU_USER_ID must be set for the osu source")?;
    let api = OsuApi::new(
        config.osu_base_url.clone(),
        config.retry_policy(),
        config.fetch_timeout(),
    )
    .context("failed to build osu API client")?;

    let html = fs::read_to_string(&config.osu_export_path).with_context(|| {
        format!(
            "failed to read profile export {}",
            config.osu_export_path.display()
        )
    })?;
    let (mapset_ids, map_ids) = extract_map_ids(&html);
    info!(
        mapsets = mapset_ids.len(),
        maps = map_ids.len(),
        "profile export parsed"
    );

    let mut resolver = EntityResolver::new(store);
    let mut report = SourceReport::default();

    // Pass 1: mapset metadata, which carries the nested map list.
    for &mapset_id in &mapset_ids {
        info!(mapset_id, "processing beatmapset");
        let raw = match api.get_mapset(mapset_id, token).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(mapset_id, error = %e, "mapset fetch failed, skipping");
                report.failed_items += 1;
                continue;
            }
        };
        if let Err(e) = ingest_mapset(&mut resolver, &raw, &mut report).await {
            warn!(mapset_id, error = %e, "mapset ingest failed, skipping");
            report.failed_items += 1;
        }
    }

    // Pass 2: per-map user scores plus the own-playcount refresh.
    let mut facts = Vec::new();
    for &map_id in &map_ids {
        info!(map_id, "processing beatmap");
        let map_ref = match store
            .find_one(MAPS.collection, &json!({"map_id": map_id}))
            .await
        {
            Ok(Some(doc)) => doc.id,
            Ok(None) => {
                warn!(map_id, "map entity not stored (mapset fetch failed?), skipping");
                report.failed_items += 1;
                continue;
            }
            Err(e) => {
                warn!(map_id, error = %e, "map lookup failed, skipping");
                report.failed_items += 1;
                continue;
            }
        };

        match api.get_user_scores(map_id, &user_id, token).await {
            Ok(raw) => {
                let scores = raw
                    .get("scores")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                for item in &scores {
                    match normalize_score(item, map_ref) {
                        Ok(fact) => facts.push(fact),
                        Err(e) => {
                            warn!(map_id, error = %e, "malformed score, skipping");
                            report.merge.skipped += 1;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(map_id, error = %e, "score fetch failed, skipping");
                report.failed_items += 1;
            }
        }

        refresh_self_play_count(&api, &resolver, map_id, token).await;
    }

    report.merge += MergeEngine::new(store).merge(&SCORES, facts).await?;
    report.entities_created = resolver.created();
    Ok(report)
}

/// Resolve the mapset entity and each nested map entity.
async fn ingest_mapset(
    resolver: &mut EntityResolver<'_>,
    raw: &Value,
    report: &mut SourceReport,
) -> Result<()> {
    let mapset_doc = normalize_mapset(raw)?;
    let mapset_ref = resolver.resolve_or_create(&MAPSETS, mapset_doc).await?;

    let maps = raw
        .get("beatmaps")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for item in &maps {
        let map_doc = match normalize_map(item, mapset_ref) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(error = %e, "malformed beatmap in mapset payload, skipping");
                report.merge.skipped += 1;
                continue;
            }
        };
        if let Err(e) = resolver.resolve_or_create(&MAPS, map_doc).await {
            warn!(error = %e, "failed to resolve map entity");
            report.failed_items += 1;
        }
    }
    Ok(())
}

/// Best-effort refresh of the user's own play count on the map entity; a
/// failure here loses one statistic, not the run.
async fn refresh_self_play_count(
    api: &OsuApi,
    resolver: &EntityResolver<'_>,
    map_id: u64,
    token: &str,
) {
    let raw = match api.get_map(map_id, token).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(map_id, error = %e, "map detail fetch failed, playcount not refreshed");
            return;
        }
    };
    let count = coerce_i64(raw.get("current_user_playcount"));
    match resolver
        .refresh(
            &MAPS,
            &json!({"map_id": map_id}),
            &json!({"self_play_count": count}),
        )
        .await
    {
        Ok(true) => debug!(map_id, count, "own play count refreshed"),
        Ok(false) => warn!(map_id, "own play count refresh matched no map"),
        Err(e) => warn!(map_id, error = %e, "own play count refresh failed"),
    }
}

static PLAYCOUNT_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.beatmap-playcount__title").unwrap());
static ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]+").unwrap());

/// Pull `(mapset_ids, map_ids)` out of the saved profile page. Playcount
/// rows link to `/beatmapsets/<mapset>#<mode>/<map>`; mapset ids repeat per
/// difficulty and are deduplicated preserving first-seen order.
pub fn extract_map_ids(html: &str) -> (Vec<u64>, Vec<u64>) {
    let document = Html::parse_document(html);
    let mut mapsets = Vec::new();
    let mut maps = Vec::new();

    for link in document.select(&PLAYCOUNT_LINK) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let mut ids = ID_RE
            .find_iter(href)
            .filter_map(|m| m.as_str().parse::<u64>().ok());
        let (Some(mapset_id), Some(map_id)) = (ids.next(), ids.next()) else {
            continue;
        };
        if !mapsets.contains(&mapset_id) {
            mapsets.push(mapset_id);
        }
        maps.push(map_id);
    }

    (mapsets, maps)
}

fn normalize_mapset(raw: &Value) -> Result<Value, NormalizeError> {
    let tags: Vec<String> = raw
        .get("tags")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_owned)
        .collect();

    Ok(json!({
        "mapset_id": require_i64(raw, "id")?,
        "title": require_str(raw, "title_unicode")?,
        "artist": require_str(raw, "artist_unicode")?,
        "source": raw.get("source").and_then(Value::as_str).unwrap_or_default(),
        "status": require_i64(raw, "ranked")?,
        "creator_id": require_i64(raw, "user_id")?,
        "submitted_at": timestamp_value(parse_timestamp(raw.get("submitted_date"))),
        "updated_at": timestamp_value(parse_timestamp(raw.get("last_updated"))),
        "ranked_at": timestamp_value(parse_timestamp(raw.get("ranked_date"))),
        "video": raw.get("video").and_then(Value::as_bool).unwrap_or(false),
        "storyboard": raw.get("storyboard").and_then(Value::as_bool).unwrap_or(false),
        "nsfw": raw.get("nsfw").and_then(Value::as_bool).unwrap_or(false),
        "genre": coerce_i64(raw.pointer("/genre/id")),
        "language": coerce_i64(raw.pointer("/language/id")),
        "tags": tags,
        "play_count": coerce_i64(raw.get("play_count")),
        "favourite_count": coerce_i64(raw.get("favourite_count")),
        "rating": coerce_f64(raw.get("rating")),
    }))
}

fn normalize_map(item: &Value, mapset_ref: i64) -> Result<Value, NormalizeError> {
    Ok(json!({
        "map_id": require_i64(item, "id")?,
        "mapset_id": require_i64(item, "beatmapset_id")?,
        "mapset_ref": mapset_ref,
        "name": require_str(item, "version")?,
        "mode": require_i64(item, "mode_int")?,
        "status": coerce_i64(item.get("ranked")),
        "creator_id": coerce_i64(item.get("user_id")),
        "updated_at": timestamp_value(parse_timestamp(item.get("last_updated"))),
        "star_rating": coerce_f64(item.get("difficulty_rating")),
        "bpm": coerce_f64(item.get("bpm")),
        "length": coerce_i64(item.get("total_length")),
        "hit_length": coerce_i64(item.get("hit_length")),
        "max_combo": item.get("max_combo").cloned().unwrap_or(Value::Null),
        "circles": coerce_i64(item.get("count_circles")),
        "sliders": coerce_i64(item.get("count_sliders")),
        "spinners": coerce_i64(item.get("count_spinners")),
        "circle_size": coerce_f64(item.get("cs")),
        "hp_drain": coerce_f64(item.get("drain")),
        "overall_difficulty": coerce_f64(item.get("accuracy")),
        "approach_rate": coerce_f64(item.get("ar")),
        "play_count": coerce_i64(item.get("playcount")),
        "pass_count": coerce_i64(item.get("passcount")),
        "self_play_count": 0,
    }))
}

fn normalize_score(item: &Value, map_ref: i64) -> Result<Value, NormalizeError> {
    Ok(json!({
        "map_id": map_ref,
        "mode": require_i64(item, "mode_int")?,
        "score": require_i64(item, "score")?,
        "accuracy": coerce_f64(item.get("accuracy")),
        "pp": coerce_f64(item.get("pp")),
        "mods": item.get("mods").cloned().unwrap_or_else(|| json!([])),
        "played_at": timestamp_value(parse_timestamp(item.get("created_at"))),
        "replay": item.get("replay").and_then(Value::as_bool).unwrap_or(false),
        "rank": item.get("rank").and_then(Value::as_str).unwrap_or_default(),
        "full_combo": item.get("perfect").and_then(Value::as_bool).unwrap_or(false),
        "max_combo": coerce_i64(item.get("max_combo")),
        "judgments": item.get("statistics").cloned().unwrap_or_else(|| json!({})),
        "pinned_id": item
            .pointer("/current_user_attributes/pin/score_id")
            .cloned()
            .unwrap_or(Value::Null),
    }))
}
