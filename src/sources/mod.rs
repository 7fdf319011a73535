//! Ingest sources. Each module maps one external data source onto the
//! generic engine: it supplies the entity/fact kinds and the iteration
//! order, nothing else.

pub mod dx;
pub mod osu;
pub mod otogame;

use crate::cli::SourceName;
use crate::config::Config;
use crate::engine::{EntityKind, MergeReport};
use crate::osu::AuthError;
use crate::store::Store;
use anyhow::Result;
use tracing::{error, info};

/// Songs are shared between the otogame and dx sources: both key on the
/// title, artist, and the deluxe-chart flag.
pub const SONGS: EntityKind = EntityKind {
    collection: "songs",
    key_fields: &["name", "artist", "deluxe"],
    refreshable_fields: &[],
};

/// Outcome of one source's sync.
#[derive(Debug, Default, Clone, Copy)]
pub struct SourceReport {
    /// Entities created (not merely found) while resolving parents.
    pub entities_created: u64,
    /// Fact-level merge counts, including records skipped as malformed.
    pub merge: MergeReport,
    /// Parent items abandoned wholesale (fetch failures, unknown parents).
    pub failed_items: u64,
}

/// Aggregate outcome of a sync run, for the final summary.
#[derive(Debug, Default)]
pub struct RunReport {
    pub completed: Vec<(SourceName, SourceReport)>,
    pub failed_sources: Vec<SourceName>,
}

impl RunReport {
    pub fn log_summary(&self) {
        for (name, report) in &self.completed {
            info!(
                source = name.as_str(),
                entities_created = report.entities_created,
                inserted = report.merge.inserted,
                updated = report.merge.updated,
                skipped = report.merge.skipped,
                deduplicated = report.merge.deduplicated,
                failed_items = report.failed_items,
                "source sync complete"
            );
        }
        for name in &self.failed_sources {
            error!(source = name.as_str(), "source sync failed");
        }

        let mut totals = SourceReport::default();
        for (_, report) in &self.completed {
            totals.entities_created += report.entities_created;
            totals.merge += report.merge;
            totals.failed_items += report.failed_items;
        }
        info!(
            sources = self.completed.len(),
            failed_sources = self.failed_sources.len(),
            entities_created = totals.entities_created,
            inserted = totals.merge.inserted,
            updated = totals.merge.updated,
            skipped = totals.merge.skipped,
            failed_items = totals.failed_items,
            "sync run complete"
        );
    }
}

/// Run the selected sources in order.
///
/// A source failure is contained: it is recorded and the run moves on to the
/// next source. The exception is authentication: without a valid token no
/// later call can succeed, so an [`AuthError`] aborts the whole run.
pub async fn run_all(
    store: &dyn Store,
    config: &Config,
    selected: &[SourceName],
) -> Result<RunReport> {
    let mut report = RunReport::default();

    for &name in selected {
        info!(source = name.as_str(), "starting source sync");
        let result = match name {
            SourceName::Osu => osu::sync(store, config).await,
            SourceName::Otogame => otogame::sync(store, config).await,
            SourceName::Dx => dx::sync(store, config).await,
        };
        match result {
            Ok(source_report) => report.completed.push((name, source_report)),
            Err(e) => {
                if e.downcast_ref::<AuthError>().is_some() {
                    return Err(e.context("authentication failed, aborting run"));
                }
                error!(source = name.as_str(), error = ?e, "source sync failed");
                report.failed_sources.push(name);
            }
        }
    }

    Ok(report)
}
