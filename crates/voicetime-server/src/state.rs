//! Shared application state.

use std::sync::Arc;

use voicetime_tracking::application::tracker::VoiceTracker;

use crate::presence::PresenceCache;

/// Application state shared across all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The engine owning every guild.
    pub tracker: Arc<VoiceTracker>,
    /// Voice presences seen on ingest, also the tracker's platform.
    pub presence: Arc<PresenceCache>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(tracker: Arc<VoiceTracker>, presence: Arc<PresenceCache>) -> Self {
        Self { tracker, presence }
    }
}
