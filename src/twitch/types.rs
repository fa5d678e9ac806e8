use serde::{Deserialize, Serialize};

/// A clip as returned by `GET /helix/clips`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: String,
    pub url: String,
    pub embed_url: String,
    pub broadcaster_id: String,
    pub broadcaster_name: String,
    pub creator_id: String,
    pub creator_name: String,
    #[serde(default)]
    pub video_id: String,
    pub game_id: String,
    pub language: String,
    pub title: String,
    pub view_count: i64,
    pub created_at: String,
    pub thumbnail_url: String,
    pub duration: f64,
    pub vod_offset: Option<i64>,
    #[serde(default)]
    pub is_featured: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pagination {
    pub cursor: Option<String>,
}

/// Envelope shared by Helix list endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct HelixResponse<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub pagination: Pagination,
}

/// One page of clips plus the cursor for the next page. `cursor` is `None`
/// once the listing is exhausted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClipPage {
    pub clips: Vec<Clip>,
    pub cursor: Option<String>,
}

impl From<HelixResponse<Clip>> for ClipPage {
    fn from(response: HelixResponse<Clip>) -> Self {
        ClipPage {
            clips: response.data,
            // Helix sends `"pagination": {}` or an empty cursor on the last page.
            cursor: response.pagination.cursor.filter(|c| !c.is_empty()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub id: String,
    pub user_id: String,
    pub user_login: String,
    pub user_name: String,
    pub game_id: String,
    pub game_name: String,
    #[serde(rename = "type")]
    pub stream_type: String,
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub viewer_count: i64,
    pub started_at: String,
    pub language: String,
    pub thumbnail_url: String,
    #[serde(default)]
    pub is_mature: bool,
}
