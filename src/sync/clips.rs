//! Clip synchronization
//!
//! Drains a broadcaster's clip listing page by page and upserts every clip
//! keyed by its Twitch id. Re-running a sync rewrites identical rows, so a
//! duplicate webhook delivery costs redundant writes but never duplicates.
//!
//! The Helix cursor is opaque and not guaranteed to be acyclic, so the page
//! sequence stops on its own after `MAX_PAGES` fetches or when a cursor comes
//! back a second time. Both stops are warnings, not errors: the clips written
//! so far are kept and counted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, Stream, TryStreamExt};

use crate::errors::AppError;
use crate::store::{ClipRow, RecordStore};
use crate::twitch::{Clip, TwitchApi, MAX_CLIPS_PER_PAGE};

/// Upper bound on page fetches per sync (100,000 clips at 100 per page).
pub const MAX_PAGES: usize = 1000;

/// Maps a Helix clip to its storage row owned by `user_id`.
pub fn clip_row(clip: &Clip, user_id: &str) -> ClipRow {
    ClipRow {
        twitch_clip_id: clip.id.clone(),
        url: clip.url.clone(),
        embed_url: clip.embed_url.clone(),
        broadcaster_id: clip.broadcaster_id.clone(),
        broadcaster_name: clip.broadcaster_name.clone(),
        creator_id: clip.creator_id.clone(),
        creator_name: clip.creator_name.clone(),
        video_id: Some(clip.video_id.clone()).filter(|id| !id.is_empty()),
        game_id: clip.game_id.clone(),
        language: clip.language.clone(),
        title: clip.title.clone(),
        view_count: clip.view_count,
        created_at_twitch: clip.created_at.clone(),
        thumbnail_url: clip.thumbnail_url.clone(),
        duration: clip.duration,
        vod_offset: clip.vod_offset,
        is_featured: clip.is_featured,
        user_id: user_id.to_string(),
    }
}

/// Maps one page to storage rows with at most one row per clip id.
///
/// Helix can list the same clip twice within a page, and a single
/// `INSERT ... ON CONFLICT DO UPDATE` may not touch a row twice. The last
/// occurrence wins; first-seen order is kept.
pub fn page_rows(clips: &[Clip], user_id: &str) -> Vec<ClipRow> {
    let mut position: HashMap<&str, usize> = HashMap::with_capacity(clips.len());
    let mut rows: Vec<ClipRow> = Vec::with_capacity(clips.len());

    for clip in clips {
        match position.get(clip.id.as_str()) {
            Some(&index) => rows[index] = clip_row(clip, user_id),
            None => {
                position.insert(clip.id.as_str(), rows.len());
                rows.push(clip_row(clip, user_id));
            }
        }
    }

    if rows.len() < clips.len() {
        tracing::debug!(
            "Dropped {} duplicate clips from page",
            clips.len() - rows.len()
        );
    }
    rows
}

struct PageCursor {
    cursor: Option<String>,
    seen: HashSet<Option<String>>,
    fetched: usize,
    exhausted: bool,
}

/// Lazily fetches the broadcaster's clips one page at a time.
///
/// The sequence ends when a page is empty, when a page carries no next
/// cursor, after `max_pages` fetches, or when a cursor repeats. Each call
/// starts a fresh listing from the first page.
pub fn clip_pages<'a>(
    api: &'a dyn TwitchApi,
    broadcaster_id: &'a str,
    page_size: usize,
    max_pages: usize,
) -> impl Stream<Item = Result<Vec<Clip>, AppError>> + Send + 'a {
    let start = PageCursor {
        cursor: None,
        seen: HashSet::new(),
        fetched: 0,
        exhausted: false,
    };

    stream::try_unfold(start, move |mut state| async move {
        if state.exhausted {
            return Ok(None);
        }

        if state.fetched >= max_pages {
            tracing::warn!(
                broadcaster_id,
                pages = state.fetched,
                "Clip sync stopped at page limit, possible pagination loop"
            );
            return Ok(None);
        }

        if !state.seen.insert(state.cursor.clone()) {
            tracing::warn!(
                broadcaster_id,
                cursor = ?state.cursor,
                "Duplicate pagination cursor, stopping clip sync"
            );
            return Ok(None);
        }

        state.fetched += 1;
        let page = api
            .get_clips(broadcaster_id, page_size, state.cursor.as_deref())
            .await?;

        if page.clips.is_empty() {
            return Ok(None);
        }

        state.exhausted = page.cursor.is_none();
        state.cursor = page.cursor;
        Ok::<_, AppError>(Some((page.clips, state)))
    })
}

pub struct ClipSyncEngine {
    store: Arc<dyn RecordStore>,
    api: Arc<dyn TwitchApi>,
    page_size: usize,
    max_pages: usize,
}

impl ClipSyncEngine {
    pub fn new(store: Arc<dyn RecordStore>, api: Arc<dyn TwitchApi>) -> Self {
        Self {
            store,
            api,
            page_size: MAX_CLIPS_PER_PAGE,
            max_pages: MAX_PAGES,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, MAX_CLIPS_PER_PAGE);
        self
    }

    /// Stores every clip of the user's linked channel and returns how many
    /// were written. Any upsert failure aborts the whole run.
    #[tracing::instrument(name = "Sync Twitch clips", skip(self))]
    pub async fn sync(&self, user_id: &str) -> Result<u64, AppError> {
        let integration = self
            .store
            .find_integration_by_user(user_id)
            .await?
            .filter(|i| !i.channel_id.is_empty() && i.access_token.is_some())
            .ok_or_else(|| {
                tracing::error!("No usable Twitch integration for user {}", user_id);
                AppError::IntegrationNotFound(format!("user {}", user_id))
            })?;

        tracing::info!("Starting clip sync for channel {}", integration.channel_id);

        let store = self.store.as_ref();
        let total = clip_pages(
            self.api.as_ref(),
            &integration.channel_id,
            self.page_size,
            self.max_pages,
        )
        .try_fold(0u64, move |total, clips| async move {
            let rows = page_rows(&clips, user_id);
            store.upsert_clips(&rows).await?;
            Ok::<u64, AppError>(total + rows.len() as u64)
        })
        .await?;

        tracing::info!("Clip sync completed for user {}: {} clips", user_id, total);
        Ok(total)
    }
}
