//! The reconciliation core.
//!
//! For each candidate work item and each connected, settings-enabled
//! role, compares current item state against the last-synced mapping and
//! issues the resulting create/update/complete/delete through the
//! calendar client. Per-item and per-role operations are independent: one
//! failure never aborts the rest of a run; every outcome is folded into
//! the returned [`SyncResult`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::calendar::client::CalendarClient;
use crate::calendar::provider::CalendarProvider;
use crate::error::{CoreError, Result};
use crate::model::{AccountRole, WorkItem};
use crate::storage::{
    ConnectionStatus, CredentialVault, Database, EventMapping, EventMappingStore, SettingsStore,
    SyncSettings,
};
use crate::sync::executor::{BatchHandle, TaskSpawner, TokioSpawner};
use crate::sync::gate::SyncGate;
use crate::sync::types::{SyncAction, SyncResult, SyncRunStatus, WorkItemSource};

/// Default number of items reconciled per batch chunk.
const DEFAULT_BATCH_SIZE: usize = 50;
/// Pause between batch chunks to stay under provider rate limits.
const DEFAULT_BATCH_PAUSE: Duration = Duration::from_millis(500);

/// Pure reconciliation decision, matched exhaustively by the runner.
///
/// `eligible` is the outcome of the settings filters, `fresh` means the
/// mapping's last-synced timestamp is not older than the item's upstream
/// change. Filtered-out items with a surviving mapping are deleted so a
/// settings change cleans up previously synced events.
pub(crate) fn decide(
    eligible: bool,
    mapped: bool,
    submitted: bool,
    keep_completed: bool,
    fresh: bool,
) -> SyncAction {
    match (eligible, mapped) {
        (false, false) => SyncAction::Skip,
        (false, true) => SyncAction::Delete,
        (true, false) => {
            if submitted && !keep_completed {
                SyncAction::Skip
            } else {
                SyncAction::Create
            }
        }
        (true, true) => {
            if submitted {
                if !keep_completed {
                    SyncAction::Delete
                } else if fresh {
                    SyncAction::Skip
                } else {
                    SyncAction::Complete
                }
            } else if fresh {
                SyncAction::Skip
            } else {
                SyncAction::Update
            }
        }
    }
}

/// Reconciliation orchestrator over a calendar provider `P` and a work
/// item source `S`.
pub struct SyncOrchestrator<P, S> {
    vault: CredentialVault,
    settings: SettingsStore,
    mappings: EventMappingStore,
    client: Arc<CalendarClient<P>>,
    source: Arc<S>,
    gate: Arc<SyncGate>,
    spawner: Arc<dyn TaskSpawner>,
    batch_size: usize,
    batch_pause: Duration,
}

impl<P, S> Clone for SyncOrchestrator<P, S> {
    fn clone(&self) -> Self {
        Self {
            vault: self.vault.clone(),
            settings: self.settings.clone(),
            mappings: self.mappings.clone(),
            client: Arc::clone(&self.client),
            source: Arc::clone(&self.source),
            gate: Arc::clone(&self.gate),
            spawner: Arc::clone(&self.spawner),
            batch_size: self.batch_size,
            batch_pause: self.batch_pause,
        }
    }
}

impl<P, S> SyncOrchestrator<P, S>
where
    P: CalendarProvider + 'static,
    S: WorkItemSource + 'static,
{
    pub fn new(
        db: Arc<Database>,
        vault: CredentialVault,
        client: CalendarClient<P>,
        source: S,
    ) -> Self {
        Self {
            vault,
            settings: SettingsStore::new(Arc::clone(&db)),
            mappings: EventMappingStore::new(db),
            client: Arc::new(client),
            source: Arc::new(source),
            gate: Arc::new(SyncGate::new()),
            spawner: Arc::new(TokioSpawner),
            batch_size: DEFAULT_BATCH_SIZE,
            batch_pause: DEFAULT_BATCH_PAUSE,
        }
    }

    /// Substitute the background executor (tests, embedding runtimes).
    pub fn with_spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn with_batching(mut self, batch_size: usize, batch_pause: Duration) -> Self {
        self.batch_size = batch_size.max(1);
        self.batch_pause = batch_pause;
        self
    }

    pub fn settings_store(&self) -> &SettingsStore {
        &self.settings
    }

    #[cfg(test)]
    pub(crate) fn mapping_store(&self) -> &EventMappingStore {
        &self.mappings
    }

    #[cfg(test)]
    pub(crate) fn client_ref(&self) -> &CalendarClient<P> {
        &self.client
    }

    #[cfg(test)]
    pub(crate) fn gate_ref(&self) -> &Arc<SyncGate> {
        &self.gate
    }

    /// Reconcile every stored work item for the student against both roles.
    pub async fn sync_full(&self, owner_id: i64, student_id: i64) -> Result<SyncResult> {
        let _permit = self
            .gate
            .try_acquire(owner_id, student_id)
            .ok_or(CoreError::SyncInProgress {
                owner_id,
                student_id,
            })?;
        let items = self.source.list_work_items(student_id).await?;
        let result = self.reconcile(owner_id, student_id, &items).await?;
        tracing::info!(
            owner_id,
            student_id,
            created = result.created,
            updated = result.updated,
            deleted = result.deleted,
            filtered = result.filtered,
            errored = result.errored,
            "full sync finished"
        );
        Ok(result)
    }

    /// Reconcile a single work item after an immediate status change.
    ///
    /// Unlike batch modes, per-operation failures propagate to the caller.
    pub async fn sync_one(
        &self,
        owner_id: i64,
        student_id: i64,
        item: &WorkItem,
    ) -> Result<SyncResult> {
        let _permit = self
            .gate
            .try_acquire(owner_id, student_id)
            .ok_or(CoreError::SyncInProgress {
                owner_id,
                student_id,
            })?;
        let result = self
            .reconcile(owner_id, student_id, std::slice::from_ref(item))
            .await?;
        if result.errored > 0 {
            return Err(CoreError::SyncFailed {
                errors: result.errors,
            });
        }
        Ok(result)
    }

    /// Reconcile recently-changed items, then clean up orphaned mappings
    /// whose work item no longer exists upstream.
    pub async fn sync_incremental(
        &self,
        owner_id: i64,
        student_id: i64,
        since: DateTime<Utc>,
    ) -> Result<SyncResult> {
        let _permit = self
            .gate
            .try_acquire(owner_id, student_id)
            .ok_or(CoreError::SyncInProgress {
                owner_id,
                student_id,
            })?;
        let all_items = self.source.list_work_items(student_id).await?;
        let changed: Vec<WorkItem> = all_items
            .iter()
            .filter(|item| item.updated_at >= since)
            .cloned()
            .collect();

        let mut result = self.reconcile(owner_id, student_id, &changed).await?;
        if matches!(
            result.status,
            SyncRunStatus::Disabled | SyncRunStatus::NoCalendarsConnected
        ) {
            return Ok(result);
        }

        self.cleanup_orphans(owner_id, student_id, &all_items, &mut result)
            .await?;
        result.finalize();
        Ok(result)
    }

    /// Chunked reconciliation of a large item list on the injected
    /// executor; returns a handle instead of blocking the caller.
    pub fn sync_batch(
        &self,
        owner_id: i64,
        student_id: i64,
        items: Vec<WorkItem>,
    ) -> BatchHandle {
        let (tx, handle) = BatchHandle::channel();
        let this = self.clone();
        self.spawner.spawn(Box::pin(async move {
            let result = this.run_batches(owner_id, student_id, items).await;
            // Receiver may have been dropped; nothing to do then.
            let _ = tx.send(result);
        }));
        handle
    }

    async fn run_batches(
        &self,
        owner_id: i64,
        student_id: i64,
        items: Vec<WorkItem>,
    ) -> Result<SyncResult> {
        let _permit = self
            .gate
            .try_acquire(owner_id, student_id)
            .ok_or(CoreError::SyncInProgress {
                owner_id,
                student_id,
            })?;
        let mut merged = SyncResult::default();
        let mut chunks = items.chunks(self.batch_size).peekable();
        while let Some(chunk) = chunks.next() {
            merged.merge(self.reconcile(owner_id, student_id, chunk).await?);
            if chunks.peek().is_some() {
                tokio::time::sleep(self.batch_pause).await;
            }
        }
        // Chunk statuses were derived per chunk; reclassify from the
        // merged counters so one all-filtered chunk cannot relabel a run
        // that performed operations. Short-circuit markers stay as-is.
        if !matches!(
            merged.status,
            SyncRunStatus::Disabled | SyncRunStatus::NoCalendarsConnected
        ) {
            merged.finalize();
        }
        Ok(merged)
    }

    /// Persist new settings; trigger a full re-sync iff a filter-relevant
    /// field changed.
    pub async fn apply_settings(
        &self,
        owner_id: i64,
        student_id: i64,
        new_settings: &SyncSettings,
    ) -> Result<SyncResult> {
        let old = self.settings.resolve(owner_id, student_id)?;
        self.settings.update(owner_id, student_id, new_settings)?;
        if old.filters_differ(new_settings) {
            tracing::info!(owner_id, student_id, "filter settings changed, re-syncing");
            self.sync_full(owner_id, student_id).await
        } else {
            Ok(SyncResult::default())
        }
    }

    pub fn connection_status(&self, owner_id: i64, student_id: i64) -> Result<ConnectionStatus> {
        Ok(self.vault.connection_status(owner_id, student_id)?)
    }

    /// Revoke one role's calendar connection.
    ///
    /// Mappings are kept: remote events cannot be deleted without the
    /// credential, and a later reconnect resumes from the same state.
    pub fn disconnect(&self, owner_id: i64, student_id: i64, role: AccountRole) -> Result<()> {
        self.vault.revoke(owner_id, student_id, role)?;
        Ok(())
    }

    /// Reconcile a set of items for every connected, enabled role.
    async fn reconcile(
        &self,
        owner_id: i64,
        student_id: i64,
        items: &[WorkItem],
    ) -> Result<SyncResult> {
        let settings = self.settings.resolve(owner_id, student_id)?;
        if !settings.sync_enabled {
            return Ok(SyncResult::with_status(SyncRunStatus::Disabled));
        }

        let status = self.vault.connection_status(owner_id, student_id)?;
        let roles: Vec<AccountRole> = AccountRole::ALL
            .into_iter()
            .filter(|role| settings.role_enabled(*role) && status.is_connected(*role))
            .collect();
        if roles.is_empty() {
            return Ok(SyncResult::with_status(SyncRunStatus::NoCalendarsConnected));
        }

        let mut result = SyncResult::default();
        for role in roles {
            let display_name = calendar_display_name(role);
            let calendar_id = match self
                .client
                .ensure_calendar(owner_id, student_id, role, &display_name)
                .await
            {
                Ok(id) => id,
                Err(err) => {
                    result.record_error(format!("{role}: ensure calendar: {err}"));
                    continue;
                }
            };
            for item in items {
                self.reconcile_item(owner_id, role, &calendar_id, item, &settings, &mut result)
                    .await;
            }
        }
        result.finalize();
        Ok(result)
    }

    /// Reconcile one item against one role. Never fails the run; errors
    /// are folded into `result`.
    async fn reconcile_item(
        &self,
        owner_id: i64,
        role: AccountRole,
        calendar_id: &str,
        item: &WorkItem,
        settings: &SyncSettings,
        result: &mut SyncResult,
    ) {
        let mapping = match self.mappings.get(item.plannable_id, item.student_id, role) {
            Ok(mapping) => mapping,
            Err(err) => {
                result.record_error(format!("{role}: mapping lookup {}: {err}", item.plannable_id));
                return;
            }
        };
        let eligible = settings.should_sync(item);
        let fresh = mapping
            .as_ref()
            .is_some_and(|m| m.synced_at >= item.updated_at);
        let action = decide(
            eligible,
            mapping.is_some(),
            item.submitted,
            settings.sync_completed,
            fresh,
        );

        // Update/Complete/Delete are only ever decided for mapped items.
        let outcome = match (action, mapping) {
            (SyncAction::Skip, _) => {
                result.filtered += 1;
                Ok(())
            }
            (SyncAction::Create, _) => {
                self.create_item(owner_id, role, calendar_id, item, settings, result)
                    .await
            }
            (SyncAction::Update, Some(mapping)) => {
                self.update_item(owner_id, role, item, settings, &mapping, result)
                    .await
            }
            (SyncAction::Complete, Some(mapping)) => {
                self.complete_item(owner_id, role, item, &mapping, result).await
            }
            (SyncAction::Delete, Some(mapping)) => {
                self.delete_item(owner_id, role, &mapping, result).await
            }
            (_, None) => Ok(()),
        };
        if let Err(err) = outcome {
            result.record_error(format!("{role}: item {}: {err}", item.plannable_id));
        }
    }

    async fn create_item(
        &self,
        owner_id: i64,
        role: AccountRole,
        calendar_id: &str,
        item: &WorkItem,
        settings: &SyncSettings,
        result: &mut SyncResult,
    ) -> Result<()> {
        let event_id = self
            .client
            .create_event(
                owner_id,
                item.student_id,
                role,
                calendar_id,
                item,
                settings.reminders_for(role),
            )
            .await?;
        self.mappings.upsert(&EventMapping {
            plannable_id: item.plannable_id,
            student_id: item.student_id,
            role,
            calendar_id: calendar_id.to_string(),
            event_id: event_id.clone(),
            synced_at: Utc::now(),
        })?;
        // A completed item may be newly eligible under keep-completed
        // settings; create it already marked done.
        if item.submitted {
            self.client
                .mark_completed(owner_id, item.student_id, role, calendar_id, &event_id, item)
                .await?;
        }
        result.created += 1;
        Ok(())
    }

    async fn update_item(
        &self,
        owner_id: i64,
        role: AccountRole,
        item: &WorkItem,
        settings: &SyncSettings,
        mapping: &EventMapping,
        result: &mut SyncResult,
    ) -> Result<()> {
        let found = self
            .client
            .update_event(
                owner_id,
                item.student_id,
                role,
                &mapping.calendar_id,
                &mapping.event_id,
                item,
                settings.reminders_for(role),
            )
            .await?;
        if found {
            self.mappings
                .touch(item.plannable_id, item.student_id, role, Utc::now())?;
            result.updated += 1;
        } else {
            // Event vanished remotely (user deleted it, or a mapping write
            // survived a lost event). Re-create to converge.
            self.mappings
                .delete(item.plannable_id, item.student_id, role)?;
            self.create_item(owner_id, role, &mapping.calendar_id, item, settings, result)
                .await?;
        }
        Ok(())
    }

    async fn complete_item(
        &self,
        owner_id: i64,
        role: AccountRole,
        item: &WorkItem,
        mapping: &EventMapping,
        result: &mut SyncResult,
    ) -> Result<()> {
        let found = self
            .client
            .mark_completed(
                owner_id,
                item.student_id,
                role,
                &mapping.calendar_id,
                &mapping.event_id,
                item,
            )
            .await?;
        if found {
            self.mappings
                .touch(item.plannable_id, item.student_id, role, Utc::now())?;
            result.updated += 1;
        } else {
            self.mappings
                .delete(item.plannable_id, item.student_id, role)?;
            result.deleted += 1;
        }
        Ok(())
    }

    async fn delete_item(
        &self,
        owner_id: i64,
        role: AccountRole,
        mapping: &EventMapping,
        result: &mut SyncResult,
    ) -> Result<()> {
        // False means already gone at the provider; either way the
        // mapping row goes.
        self.client
            .delete_event(
                owner_id,
                mapping.student_id,
                role,
                &mapping.calendar_id,
                &mapping.event_id,
            )
            .await?;
        self.mappings
            .delete(mapping.plannable_id, mapping.student_id, role)?;
        result.deleted += 1;
        Ok(())
    }

    /// Delete events for mappings whose work item disappeared upstream.
    async fn cleanup_orphans(
        &self,
        owner_id: i64,
        student_id: i64,
        current_items: &[WorkItem],
        result: &mut SyncResult,
    ) -> Result<()> {
        let live: HashSet<i64> = current_items.iter().map(|i| i.plannable_id).collect();
        for mapping in self.mappings.for_student(student_id)? {
            if live.contains(&mapping.plannable_id) {
                continue;
            }
            tracing::debug!(
                plannable_id = mapping.plannable_id,
                role = %mapping.role,
                "deleting orphaned calendar event"
            );
            if let Err(err) = self
                .delete_item(owner_id, mapping.role, &mapping, result)
                .await
            {
                // Keep the mapping so a later run can retry the delete.
                result.record_error(format!(
                    "{}: orphan {}: {err}",
                    mapping.role, mapping.plannable_id
                ));
            }
        }
        Ok(())
    }
}

fn calendar_display_name(role: AccountRole) -> String {
    match role {
        AccountRole::Guardian => "Assignments (Guardian)".to_string(),
        AccountRole::Student => "Assignments (Student)".to_string(),
    }
}

#[cfg(test)]
mod decide_tests {
    use super::decide;
    use crate::sync::types::SyncAction;

    #[test]
    fn unmapped_eligible_items_are_created() {
        assert_eq!(decide(true, false, false, false, false), SyncAction::Create);
        // Completed item under keep-completed policy still gets created.
        assert_eq!(decide(true, false, true, true, false), SyncAction::Create);
    }

    #[test]
    fn unmapped_completed_item_under_drop_policy_is_skipped() {
        assert_eq!(decide(false, false, true, false, false), SyncAction::Skip);
    }

    #[test]
    fn mapped_completed_item_follows_policy() {
        assert_eq!(decide(true, true, true, true, false), SyncAction::Complete);
        assert_eq!(decide(false, true, true, false, false), SyncAction::Delete);
        assert_eq!(decide(true, true, true, false, false), SyncAction::Delete);
    }

    #[test]
    fn mapped_open_item_is_updated_unless_fresh() {
        assert_eq!(decide(true, true, false, false, false), SyncAction::Update);
        assert_eq!(decide(true, true, false, false, true), SyncAction::Skip);
    }

    #[test]
    fn filtered_out_item_with_mapping_is_deleted() {
        assert_eq!(decide(false, true, false, false, true), SyncAction::Delete);
    }
}
