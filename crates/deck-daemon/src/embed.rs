//! Embedded-video playback.
//!
//! [`EmbeddedVideoHost`] is the seam to whatever actually renders catalog
//! videos.  The production host is a second mpv instance resolving video ids
//! through yt-dlp.  It must complete a one-time handshake before it accepts
//! loads, and it never pushes progress: the core polls it on every tick.

use crate::backend::{BackendSignal, LoadRequest, LoadedHandle, PlaybackBackend};
use crate::error::LoadError;
use crate::mpv::{MpvDriver, MpvSession};
use deck_proto::protocol::BackendKind;
use serde_json::json;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

const FIRST_FRAME_POLL: Duration = Duration::from_millis(100);

pub trait EmbeddedVideoHost: Send + Sync + 'static {
    /// True once the handshake has completed.  Never goes back to false.
    fn is_ready(&self) -> bool;

    /// Cue `video_id` paused at `start_secs`.
    fn load(&self, video_id: &str, start_secs: f64)
        -> impl Future<Output = anyhow::Result<()>> + Send;

    fn play(&self) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn pause(&self) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn seek_to(&self, secs: f64) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn stop(&self) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Undo any mute/volume the host picked up from previous sessions.
    fn set_volume_max_unmuted(&self) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn current_time(&self) -> impl Future<Output = anyhow::Result<Option<f64>>> + Send;

    fn duration(&self) -> impl Future<Output = anyhow::Result<Option<f64>>> + Send;

    fn is_paused(&self) -> impl Future<Output = anyhow::Result<bool>> + Send;

    fn has_ended(&self) -> impl Future<Output = anyhow::Result<bool>> + Send;
}

/// [`PlaybackBackend`] over an embed host.
pub struct EmbeddedVideo<H> {
    host: Arc<H>,
    load_timeout: Duration,
}

impl<H> Clone for EmbeddedVideo<H> {
    fn clone(&self) -> Self {
        Self {
            host: Arc::clone(&self.host),
            load_timeout: self.load_timeout,
        }
    }
}

impl<H: EmbeddedVideoHost> EmbeddedVideo<H> {
    pub fn new(host: Arc<H>, load_timeout: Duration) -> Self {
        Self { host, load_timeout }
    }
}

impl<H: EmbeddedVideoHost> PlaybackBackend for EmbeddedVideo<H> {
    fn kind(&self) -> BackendKind {
        BackendKind::EmbeddedVideo
    }

    fn supports_push_progress(&self) -> bool {
        false
    }

    fn seek_buffers(&self) -> bool {
        true
    }

    fn is_ready(&self) -> bool {
        self.host.is_ready()
    }

    async fn load(&self, request: LoadRequest) -> Result<LoadedHandle, LoadError> {
        if !self.host.is_ready() {
            return Err(LoadError::NotReady);
        }

        self.host.load(&request.target, 0.0).await?;
        self.host.set_volume_max_unmuted().await?;

        // The host reports a duration once the first frame is decodable.
        let first_frame = async {
            loop {
                match self.host.duration().await {
                    Ok(Some(d)) if d > 0.0 => return Ok(d),
                    Ok(_) => tokio::time::sleep(FIRST_FRAME_POLL).await,
                    Err(e) => return Err(LoadError::from(e)),
                }
            }
        };
        let duration = tokio::time::timeout(self.load_timeout, first_frame)
            .await
            .map_err(|_| LoadError::Timeout(self.load_timeout))??;

        if request.autoplay {
            self.host.play().await?;
        } else {
            self.host.pause().await?;
        }
        let playing = request.autoplay && !self.host.is_paused().await?;

        Ok(LoadedHandle {
            duration_secs: Some(duration),
            playing,
        })
    }

    async fn play(&self) -> anyhow::Result<()> {
        self.host.play().await
    }

    async fn pause(&self) -> anyhow::Result<()> {
        self.host.pause().await
    }

    async fn seek_to(&self, secs: f64) -> anyhow::Result<()> {
        self.host.seek_to(secs).await
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.host.stop().await
    }

    async fn position(&self) -> Option<f64> {
        self.host.current_time().await.ok().flatten()
    }

    async fn duration(&self) -> Option<f64> {
        self.host.duration().await.ok().flatten()
    }

    async fn has_ended(&self) -> bool {
        self.host.has_ended().await.unwrap_or(false)
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<BackendSignal>> {
        None
    }
}

// ── mpv + yt-dlp host ─────────────────────────────────────────────────────────

pub struct MpvEmbedHost {
    session: MpvSession,
    ready: AtomicBool,
    watch_url_prefix: String,
}

impl MpvEmbedHost {
    pub fn new(watch_url_prefix: String) -> Self {
        let mut args = vec![
            "--no-video".to_string(),
            "--ytdl=yes".to_string(),
            "--ytdl-format=bestaudio/best".to_string(),
            // Leave the finished file loaded so eof-reached can be polled.
            "--keep-open=yes".to_string(),
        ];
        if let Some(yt_dlp) = deck_proto::platform::find_yt_dlp_binary() {
            args.push(format!(
                "--script-opts=ytdl_hook-ytdl_path={}",
                yt_dlp.display()
            ));
        }

        // Poll-only: events are dropped.
        let (event_tx, _) = mpsc::channel(1);
        Self {
            session: MpvSession::new(MpvDriver::new("embed", args), event_tx, &[]),
            ready: AtomicBool::new(false),
            watch_url_prefix,
        }
    }

    /// Start the embed player and confirm it answers.  Readiness is latched
    /// for the rest of the process lifetime.
    pub async fn handshake(&self) -> anyhow::Result<()> {
        if deck_proto::platform::find_yt_dlp_binary().is_none() {
            anyhow::bail!("yt-dlp not found; embedded playback disabled");
        }
        let handle = self.session.handle().await?;
        handle.ping().await?;
        if !self.ready.swap(true, Ordering::SeqCst) {
            info!("embed: host ready");
        }
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.session.shutdown().await;
    }
}

impl EmbeddedVideoHost for MpvEmbedHost {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn load(&self, video_id: &str, start_secs: f64) -> anyhow::Result<()> {
        let url = format!("{}{}", self.watch_url_prefix, video_id);
        debug!("embed: loading {} at {:.1}s", url, start_secs);
        let h = self.session.handle().await?;
        h.set_pause(true).await?;
        h.set_property("start", json!(format!("{}", start_secs.max(0.0))))
            .await?;
        h.load_file(&url).await
    }

    async fn play(&self) -> anyhow::Result<()> {
        self.session.handle().await?.set_pause(false).await
    }

    async fn pause(&self) -> anyhow::Result<()> {
        self.session.handle().await?.set_pause(true).await
    }

    async fn seek_to(&self, secs: f64) -> anyhow::Result<()> {
        self.session.handle().await?.seek_to(secs).await
    }

    async fn stop(&self) -> anyhow::Result<()> {
        match self.session.current().await {
            Some(h) => h.stop().await,
            None => Ok(()),
        }
    }

    async fn set_volume_max_unmuted(&self) -> anyhow::Result<()> {
        let h = self.session.handle().await?;
        h.set_property("mute", json!(false)).await?;
        h.set_property("volume", json!(100)).await
    }

    async fn current_time(&self) -> anyhow::Result<Option<f64>> {
        self.session.handle().await?.get_f64("time-pos").await
    }

    async fn duration(&self) -> anyhow::Result<Option<f64>> {
        self.session.handle().await?.get_f64("duration").await
    }

    async fn is_paused(&self) -> anyhow::Result<bool> {
        Ok(self
            .session
            .handle()
            .await?
            .get_bool("pause")
            .await?
            .unwrap_or(true))
    }

    async fn has_ended(&self) -> anyhow::Result<bool> {
        Ok(self
            .session
            .handle()
            .await?
            .get_bool("eof-reached")
            .await?
            .unwrap_or(false))
    }
}
