use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::AppError;

use super::models::{
    AppToken, ClipRow, Integration, LiveStatus, SyncPreference, SyncState, SyncStateUpdate,
    SyncStatus, TokenGrant,
};
use super::RecordStore;

#[derive(Default)]
struct Tables {
    integrations: Vec<Integration>,
    preferences: HashMap<String, SyncPreference>,
    sync_states: HashMap<String, SyncState>,
    clips: HashMap<String, ClipRow>,
    live_statuses: HashMap<String, LiveStatus>,
    app_token: Option<AppToken>,
    clip_upserts: usize,
    live_status_upserts: usize,
}

/// In-memory `RecordStore` with failure injection for tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    /// Clip upsert number (1-based) that fails instead of writing.
    fail_clip_upsert_at: Mutex<Option<usize>>,
    fail_sync_state_writes: Mutex<bool>,
}

fn injected(what: &str) -> AppError {
    AppError::Database(anyhow::anyhow!("injected failure: {}", what))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_integration(self, user_id: &str, channel_id: &str, access_token: &str) -> Self {
        self.tables.lock().unwrap().integrations.push(Integration {
            user_id: user_id.to_string(),
            channel_id: channel_id.to_string(),
            access_token: Some(secrecy::Secret::new(access_token.to_string())),
            refresh_token: Some(secrecy::Secret::new(format!("refresh-{}", channel_id))),
            token_expires_at: None,
        });
        self
    }

    pub fn with_preference(self, user_id: &str, sync_clips_on_end: bool) -> Self {
        self.tables.lock().unwrap().preferences.insert(
            user_id.to_string(),
            SyncPreference {
                user_id: user_id.to_string(),
                sync_clips_on_end,
            },
        );
        self
    }

    pub fn with_sync_state(self, state: SyncState) -> Self {
        self.tables
            .lock()
            .unwrap()
            .sync_states
            .insert(state.user_id.clone(), state);
        self
    }

    pub fn with_app_token(self, token: AppToken) -> Self {
        self.tables.lock().unwrap().app_token = Some(token);
        self
    }

    pub fn fail_clip_upsert_at(&self, call: usize) {
        *self.fail_clip_upsert_at.lock().unwrap() = Some(call);
    }

    pub fn fail_sync_state_writes(&self) {
        *self.fail_sync_state_writes.lock().unwrap() = true;
    }

    pub fn sync_state(&self, user_id: &str) -> Option<SyncState> {
        self.tables.lock().unwrap().sync_states.get(user_id).cloned()
    }

    /// Waits for a background sync to reach `completed` or `failed`.
    pub async fn settled_sync_state(&self, user_id: &str) -> Option<SyncState> {
        for _ in 0..200 {
            let settled = self
                .sync_state(user_id)
                .filter(|s| matches!(s.status, SyncStatus::Completed | SyncStatus::Failed));
            if settled.is_some() {
                return settled;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.sync_state(user_id)
    }

    pub fn clip(&self, clip_id: &str) -> Option<ClipRow> {
        self.tables.lock().unwrap().clips.get(clip_id).cloned()
    }

    pub fn clip_count(&self) -> usize {
        self.tables.lock().unwrap().clips.len()
    }

    pub fn clip_upserts(&self) -> usize {
        self.tables.lock().unwrap().clip_upserts
    }

    pub fn live_status(&self, broadcaster_id: &str) -> Option<LiveStatus> {
        self.tables
            .lock()
            .unwrap()
            .live_statuses
            .get(broadcaster_id)
            .cloned()
    }

    pub fn live_status_upserts(&self) -> usize {
        self.tables.lock().unwrap().live_status_upserts
    }

    pub fn integration(&self, channel_id: &str) -> Option<Integration> {
        self.tables
            .lock()
            .unwrap()
            .integrations
            .iter()
            .find(|i| i.channel_id == channel_id)
            .cloned()
    }

    pub fn app_token(&self) -> Option<AppToken> {
        self.tables.lock().unwrap().app_token.clone()
    }

    fn sync_state_writes_fail(&self) -> bool {
        *self.fail_sync_state_writes.lock().unwrap()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find_integration_by_user(
        &self,
        user_id: &str,
    ) -> Result<Option<Integration>, AppError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .integrations
            .iter()
            .find(|i| i.user_id == user_id)
            .cloned())
    }

    async fn find_integration_by_channel(
        &self,
        channel_id: &str,
    ) -> Result<Option<Integration>, AppError> {
        Ok(self.integration(channel_id))
    }

    async fn update_integration_tokens(
        &self,
        channel_id: &str,
        grant: &TokenGrant,
    ) -> Result<(), AppError> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(integration) = tables
            .integrations
            .iter_mut()
            .find(|i| i.channel_id == channel_id)
        {
            integration.access_token = Some(grant.access_token.clone());
            if let Some(refresh) = &grant.refresh_token {
                integration.refresh_token = Some(refresh.clone());
            }
            integration.token_expires_at = Some(grant.expires_at);
        }
        Ok(())
    }

    async fn find_sync_preference(
        &self,
        user_id: &str,
    ) -> Result<Option<SyncPreference>, AppError> {
        Ok(self.tables.lock().unwrap().preferences.get(user_id).cloned())
    }

    async fn find_sync_state(&self, user_id: &str) -> Result<Option<SyncState>, AppError> {
        Ok(self.sync_state(user_id))
    }

    async fn insert_sync_state(&self, state: &SyncState) -> Result<(), AppError> {
        if self.sync_state_writes_fail() {
            return Err(injected("insert sync state"));
        }
        let mut tables = self.tables.lock().unwrap();
        if tables.sync_states.contains_key(&state.user_id) {
            return Err(AppError::Database(anyhow::anyhow!(
                "duplicate key value violates unique constraint on user_id"
            )));
        }
        tables
            .sync_states
            .insert(state.user_id.clone(), state.clone());
        Ok(())
    }

    async fn update_sync_state(
        &self,
        user_id: &str,
        update: &SyncStateUpdate,
    ) -> Result<(), AppError> {
        if self.sync_state_writes_fail() {
            return Err(injected("update sync state"));
        }
        let mut tables = self.tables.lock().unwrap();
        if let Some(state) = tables.sync_states.get_mut(user_id) {
            if let Some(status) = update.status {
                state.status = status;
            }
            if let Some(last_sync_at) = update.last_sync_at {
                state.last_sync_at = Some(last_sync_at);
            }
            if let Some(clip_count) = update.clip_count {
                state.clip_count = clip_count;
            }
        }
        Ok(())
    }

    async fn upsert_clips(&self, clips: &[ClipRow]) -> Result<(), AppError> {
        let fail_at = *self.fail_clip_upsert_at.lock().unwrap();
        let mut tables = self.tables.lock().unwrap();
        tables.clip_upserts += 1;
        if fail_at == Some(tables.clip_upserts) {
            return Err(injected("upsert clips"));
        }
        let mut batch = HashSet::with_capacity(clips.len());
        if !clips.iter().all(|clip| batch.insert(clip.twitch_clip_id.as_str())) {
            return Err(AppError::Database(anyhow::anyhow!(
                "ON CONFLICT DO UPDATE command cannot affect row a second time"
            )));
        }
        for clip in clips {
            tables
                .clips
                .insert(clip.twitch_clip_id.clone(), clip.clone());
        }
        Ok(())
    }

    async fn upsert_live_status(&self, status: &LiveStatus) -> Result<(), AppError> {
        let mut tables = self.tables.lock().unwrap();
        tables.live_status_upserts += 1;
        tables
            .live_statuses
            .insert(status.broadcaster_id.clone(), status.clone());
        Ok(())
    }

    async fn find_app_token(&self) -> Result<Option<AppToken>, AppError> {
        Ok(self.app_token())
    }

    async fn save_app_token(&self, token: &AppToken) -> Result<(), AppError> {
        self.tables.lock().unwrap().app_token = Some(token.clone());
        Ok(())
    }
}
