//! Contracts with the excluded subsystems
//!
//! Rendering, screen capture, and social posting happen outside this crate,
//! behind these traits. The workflows only ever see the narrow surface
//! defined here, so tests can substitute scripted fakes and the real
//! integrations can live in their own binaries.

use crate::monitor::TrafficMonitor;
use crate::storage::RecordingRecord;
use async_trait::async_trait;
use thiserror::Error;

/// Ways a render or capture attempt can fail.
///
/// All of these abort only the current snapshot, which goes to the
/// record-failed state for a later retry.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("plugin crashed during rendering")]
    PluginCrash,

    #[error("page redirected away to {0}")]
    RedirectDetected(String),

    #[error("render timed out")]
    Timeout,

    #[error("renderer failure: {0}")]
    Other(String),
}

/// Ways the publish target can fail a post.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publish target rate limited the post")]
    RateLimited,

    #[error("publish target rejected the post: {0}")]
    Rejected(String),

    #[error("transient publish failure: {0}")]
    Transient(String),
}

impl PublishError {
    /// Whether retrying with backoff makes sense.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Transient(_))
    }
}

/// A finished screen capture on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub path: String,
    pub has_audio: bool,
}

/// The external rendering and capture surface.
///
/// One exclusive instance per host: the workflows drive it one snapshot at
/// a time and never concurrently.
#[async_trait]
pub trait Renderer: Send {
    /// Loads a playback URL in the rendering surface, reporting every
    /// request and response to the monitor as it happens. Returns once the
    /// load is underway; deciding when the page has settled is the
    /// monitor's job, not the renderer's.
    async fn load(
        &mut self,
        url: &str,
        monitor: &TrafficMonitor,
    ) -> std::result::Result<(), CaptureError>;

    /// Captures the currently loaded page to a media file. Called only
    /// after the monitor signals settle.
    async fn capture(&mut self) -> std::result::Result<Capture, CaptureError>;
}

/// The external posting surface.
#[async_trait]
pub trait PublishTarget: Send {
    /// Posts one recording with its caption. Returns the public URL of the
    /// post when the target reports one.
    async fn publish(
        &mut self,
        recording: &RecordingRecord,
        caption: &str,
        sensitive: bool,
    ) -> std::result::Result<Option<String>, PublishError>;
}
