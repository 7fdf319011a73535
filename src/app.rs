//! Application bootstrap and subcommand dispatch.

use crate::cli::{Command, SourceName};
use crate::config::Config;
use crate::osu::CredentialManager;
use crate::sources;
use crate::store::{MemoryStore, PgStore, Store};
use anyhow::{Context, Result};
use tracing::info;

pub struct App {
    config: Config,
}

impl App {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn run(self, command: Command) -> Result<()> {
        match command {
            Command::Auth { code } => self.auth(&code).await,
            Command::Refresh => self.refresh().await,
            Command::Sync { sources, dry_run } => self.sync(sources, dry_run).await,
        }
    }

    /// One-time authorization-code exchange.
    async fn auth(&self, code: &str) -> Result<()> {
        self.credential_manager()?
            .obtain(code)
            .await
            .context("authorization-code exchange failed")?;
        Ok(())
    }

    /// Rotate the persisted token pair. Intended to run periodically (the
    /// access token expires daily); a sync itself never refreshes.
    async fn refresh(&self) -> Result<()> {
        self.credential_manager()?
            .refresh()
            .await
            .context("token refresh failed")?;
        Ok(())
    }

    async fn sync(&self, selected: Vec<SourceName>, dry_run: bool) -> Result<()> {
        let selected = if selected.is_empty() {
            SourceName::all().to_vec()
        } else {
            selected
        };

        let store: Box<dyn Store> = if dry_run {
            info!("dry run: using in-memory store");
            Box::new(MemoryStore::new())
        } else {
            let url = self
                .config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set (or pass --dry-run)")?;
            Box::new(PgStore::connect(url).await?)
        };

        let report = sources::run_all(store.as_ref(), &self.config, &selected).await?;
        report.log_summary();
        Ok(())
    }

    fn credential_manager(&self) -> Result<CredentialManager> {
        CredentialManager::new(
            self.config.oauth()?,
            self.config.credentials_path.clone(),
            self.config.fetch_timeout(),
        )
        .context("failed to build credential manager")
    }
}
