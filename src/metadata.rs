//! Game metadata lookup
//!
//! Small HTTP client for the catalogue endpoint that describes the title
//! being streamed. Strictly presentational: lookup failures never affect
//! the streaming session.

use serde::Deserialize;
use tracing::debug;

use crate::error::{ClientError, Result};

/// Catalogue entry for a streamable title
#[derive(Debug, Clone, Deserialize)]
pub struct GameMetadata {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default, rename = "wideImage")]
    pub wide_image: Option<String>,
}

impl GameMetadata {
    /// Preferred artwork: the wide image when present, else the standard one
    pub fn artwork(&self) -> Option<&str> {
        self.wide_image.as_deref().or(self.image.as_deref())
    }
}

/// Fetch metadata for one title from the catalogue API.
pub async fn fetch_game_metadata(base_url: &str, game_id: &str) -> Result<GameMetadata> {
    let url = format!("{}/api/games/{game_id}", base_url.trim_end_matches('/'));
    debug!(%url, "fetching game metadata");

    let response = reqwest::get(&url)
        .await
        .map_err(|e| ClientError::Metadata(format!("metadata request failed: {e}")))?;
    if !response.status().is_success() {
        return Err(ClientError::Metadata(format!(
            "metadata request to {url} returned {}",
            response.status()
        )));
    }
    response
        .json::<GameMetadata>()
        .await
        .map_err(|e| ClientError::Metadata(format!("invalid metadata payload: {e}")))
}
