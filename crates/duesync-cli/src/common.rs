//! Shared wiring for the subcommands: config, database, vault, and the
//! orchestrator over a JSON-file work item source.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use duesync_core::calendar::GoogleProvider;
use duesync_core::{
    AppConfig, CalendarClient, CredentialVault, Database, OAuthClient, SyncOrchestrator, WorkItem,
    WorkItemSource,
};

/// The (owner, student) pair every command operates on.
#[derive(Debug, Clone, Copy)]
pub struct Pair {
    pub owner_id: i64,
    pub student_id: i64,
}

/// Work items read from a JSON array file, stands in for the upstream
/// fetch layer when driving the engine from the command line.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

#[async_trait]
impl WorkItemSource for FileSource {
    async fn list_work_items(&self, student_id: i64) -> duesync_core::error::Result<Vec<WorkItem>> {
        let raw = std::fs::read_to_string(&self.path)?;
        let items: Vec<WorkItem> = serde_json::from_str(&raw)?;
        Ok(items
            .into_iter()
            .filter(|i| i.student_id == student_id)
            .collect())
    }
}

pub struct AppContext {
    pub config: AppConfig,
    pub db: Arc<Database>,
    pub vault: CredentialVault,
    pub oauth: OAuthClient,
}

impl AppContext {
    pub fn init() -> Result<Self, Box<dyn Error>> {
        let config = AppConfig::load()?;
        let db = Arc::new(Database::open()?);
        tracing::debug!("opened data directory database");
        let vault = CredentialVault::from_config(Arc::clone(&db), &config)?;
        let oauth = OAuthClient::new(&config.google);
        Ok(Self {
            config,
            db,
            vault,
            oauth,
        })
    }

    pub fn orchestrator(&self, items: &Path) -> SyncOrchestrator<GoogleProvider, FileSource> {
        let client = CalendarClient::new(
            GoogleProvider::new(),
            self.vault.clone(),
            self.oauth.clone(),
        );
        SyncOrchestrator::new(
            Arc::clone(&self.db),
            self.vault.clone(),
            client,
            FileSource::new(items),
        )
    }
}
