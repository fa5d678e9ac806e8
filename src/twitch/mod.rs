//! Twitch integration
//!
//! Helix API access, EventSub payloads and credential handling.

pub mod cache;
pub mod client;
pub mod eventsub;
pub mod signature;
pub mod tokens;
pub mod types;

pub use cache::{TtlCache, TOKEN_CACHE_TTL};
pub use client::{HelixClient, TwitchApi, MAX_CLIPS_PER_PAGE};
pub use tokens::{StoreTokenProvider, TokenProvider};
pub use types::{Clip, ClipPage, Stream};

#[cfg(test)]
pub(crate) mod testing {
    use axum::Router;

    /// Serves `router` on an ephemeral local port and returns its base URL.
    pub async fn spawn_server(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Could not bind test listener");
        let addr = listener
            .local_addr()
            .expect("Could not read test listener address");
        tokio::spawn(async move {
            axum::serve(listener, router)
                .await
                .expect("Test server failed");
        });
        format!("http://{}", addr)
    }
}
