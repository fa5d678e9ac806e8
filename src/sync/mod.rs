pub mod clips;
pub mod state;

pub use clips::ClipSyncEngine;
pub use state::SyncStateManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A completed sync ran within the cooldown window.
    Skipped,
    /// The sync record could not be written, nothing was fetched.
    Aborted,
    Completed(u64),
    Failed,
}

/// Runs a clip sync inside the sync-state envelope.
pub struct ClipSyncService {
    state: SyncStateManager,
    engine: ClipSyncEngine,
}

impl ClipSyncService {
    pub fn new(state: SyncStateManager, engine: ClipSyncEngine) -> Self {
        Self { state, engine }
    }

    /// Never returns an error: a failed sync is recorded as `failed` and
    /// logged so that the webhook delivery still succeeds.
    #[tracing::instrument(name = "Run clip sync", skip(self))]
    pub async fn run(&self, user_id: &str) -> SyncOutcome {
        if self.state.should_skip(user_id).await {
            return SyncOutcome::Skipped;
        }

        if !self.state.begin(user_id).await {
            return SyncOutcome::Aborted;
        }

        match self.engine.sync(user_id).await {
            Ok(total) => {
                self.state.complete(user_id, total).await;
                SyncOutcome::Completed(total)
            }
            Err(e) => {
                tracing::error!("Sync failed: {:?}", e);
                self.state.fail(user_id).await;
                SyncOutcome::Failed
            }
        }
    }
}
