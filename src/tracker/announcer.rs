use super::error::TrackerError;
use super::http::HttpAnnouncer;
use super::response::{AnnounceRequest, AnnounceResponse, TrackerEvent};
use super::udp::UdpAnnouncer;
use crate::constants::{DEFAULT_ANNOUNCE_INTERVAL, MIN_ANNOUNCE_INTERVAL, SEEDING_ANNOUNCE_INTERVAL};
use crate::error::ValidationError;
use crate::metainfo::InfoHash;
use crate::peer::PeerId;
use crate::torrent::TorrentContext;
use parking_lot::{Mutex, RwLock};
use rand::Rng as _;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Transport used to reach one tracker.
pub enum Announcer {
    Http(HttpAnnouncer),
    Udp(UdpAnnouncer),
}

impl Announcer {
    /// Picks the transport from the URL scheme.
    pub fn from_url(url: &str) -> Result<Self, TrackerError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            Ok(Announcer::Http(HttpAnnouncer::new(url)?))
        } else if url.starts_with("udp://") {
            Ok(Announcer::Udp(UdpAnnouncer::new(url)?))
        } else {
            Err(TrackerError::UnsupportedProtocol(url.to_string()))
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Announcer::Http(http) => http.url(),
            Announcer::Udp(udp) => udp.url(),
        }
    }

    pub async fn announce(
        &self,
        request: &AnnounceRequest,
        local_ip: Option<IpAddr>,
    ) -> Result<AnnounceResponse, TrackerError> {
        match self {
            Announcer::Http(http) => http.announce(request, local_ip).await,
            Announcer::Udp(udp) => udp.announce(request, local_ip).await,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerStatus {
    Stopped,
    Running,
    /// The last announce failed. Announces stay scheduled and a later
    /// success returns the tracker to `Running`.
    Stalled,
}

impl fmt::Display for TrackerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrackerStatus::Stopped => "stopped",
            TrackerStatus::Running => "running",
            TrackerStatus::Stalled => "stalled",
        };
        f.write_str(s)
    }
}

/// Per-announce client settings taken from the agent configuration.
#[derive(Debug, Clone)]
pub struct AnnounceParams {
    pub peer_id: PeerId,
    pub port: u16,
    pub num_want: u32,
    pub local_ip: Option<IpAddr>,
}

/// Passed to the tracker callback after every announce.
#[derive(Debug, Clone)]
pub struct TrackerReport {
    pub info_hash: InfoHash,
    pub event: TrackerEvent,
    pub status: TrackerStatus,
    pub peers: usize,
    pub interval: Duration,
    pub error: Option<String>,
}

pub type TrackerCallback = Arc<dyn Fn(&TrackerReport) + Send + Sync>;

/// Announce state machine for one torrent.
///
/// `start` sends `started` synchronously and then spawns a timer task that
/// announces every interval until `stop`. Learned peers are pushed into the
/// swarm queue.
pub struct Tracker {
    ctx: Arc<TorrentContext>,
    announcer: Announcer,
    params: AnnounceParams,
    peers_tx: mpsc::UnboundedSender<Vec<SocketAddr>>,
    key: u32,
    status: Mutex<TrackerStatus>,
    interval: Mutex<Duration>,
    tracker_id: Mutex<Option<String>>,
    seeding: AtomicBool,
    timer: Mutex<Option<CancellationToken>>,
    callback: RwLock<Option<TrackerCallback>>,
}

impl Tracker {
    pub fn new(
        ctx: Arc<TorrentContext>,
        announcer: Announcer,
        params: AnnounceParams,
        peers_tx: mpsc::UnboundedSender<Vec<SocketAddr>>,
    ) -> Self {
        Self {
            ctx,
            announcer,
            params,
            peers_tx,
            key: rand::rng().random(),
            status: Mutex::new(TrackerStatus::Stopped),
            interval: Mutex::new(DEFAULT_ANNOUNCE_INTERVAL),
            tracker_id: Mutex::new(None),
            seeding: AtomicBool::new(false),
            timer: Mutex::new(None),
            callback: RwLock::new(None),
        }
    }

    pub fn url(&self) -> &str {
        self.announcer.url()
    }

    pub fn status(&self) -> TrackerStatus {
        *self.status.lock()
    }

    /// True between `start` and `stop`, whether or not the last announce
    /// succeeded.
    pub fn is_running(&self) -> bool {
        self.timer.lock().is_some()
    }

    pub fn interval(&self) -> Duration {
        *self.interval.lock()
    }

    pub fn set_callback(&self, callback: Option<TrackerCallback>) {
        *self.callback.write() = callback;
    }

    /// Sends `started`, opens the torrent's tracker gate and schedules the
    /// periodic announces. A failed first announce leaves the tracker
    /// `Stalled` but still scheduled.
    pub async fn start(self: &Arc<Self>) -> Result<(), ValidationError> {
        let token = {
            let mut timer = self.timer.lock();
            if timer.is_some() {
                return Err(ValidationError::TrackerRunning);
            }
            let token = self.ctx.token().child_token();
            *timer = Some(token.clone());
            token
        };
        *self.status.lock() = TrackerStatus::Running;

        info!("{}: starting tracker {}", self.ctx.name(), self.url());
        if let Err(e) = self.announce(TrackerEvent::Started).await {
            warn!("{}: started announce failed: {}", self.ctx.name(), e);
        }
        self.ctx.signal_tracker_started();

        tokio::spawn(self.clone().run(token));
        Ok(())
    }

    async fn run(self: Arc<Self>, token: CancellationToken) {
        loop {
            let interval = self.interval();
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            if let Err(e) = self.announce(TrackerEvent::None).await {
                warn!("{}: announce failed: {}", self.ctx.name(), e);
            }
        }
        debug!("{}: tracker timer stopped", self.ctx.name());
    }

    /// Cancels the timer and sends `stopped`. Does nothing when the tracker
    /// is not running.
    pub async fn stop(&self) {
        let Some(token) = self.timer.lock().take() else {
            return;
        };
        token.cancel();

        if let Err(e) = self.announce(TrackerEvent::Stopped).await {
            debug!("{}: stopped announce failed: {}", self.ctx.name(), e);
        }
        *self.status.lock() = TrackerStatus::Stopped;
        info!("{}: tracker stopped", self.ctx.name());
    }

    /// Announces at the seeding interval from now on.
    pub fn set_seeding(&self) {
        self.seeding.store(true, Ordering::Relaxed);
        let mut interval = self.interval.lock();
        *interval = (*interval).max(SEEDING_ANNOUNCE_INTERVAL);
    }

    /// Performs one announce round-trip and applies the result: interval,
    /// tracker id, status, and learned peers.
    pub async fn announce(&self, event: TrackerEvent) -> Result<AnnounceResponse, TrackerError> {
        let request = AnnounceRequest {
            info_hash: self.ctx.info_hash(),
            peer_id: self.params.peer_id,
            port: self.params.port,
            uploaded: self.ctx.bytes_uploaded(),
            downloaded: self.ctx.bytes_downloaded(),
            left: self.ctx.bytes_left_to_download(),
            event,
            num_want: self.params.num_want,
            key: self.key,
            tracker_id: self.tracker_id.lock().clone(),
        };

        let result = self.announcer.announce(&request, self.params.local_ip).await;

        match &result {
            Ok(response) => {
                self.apply(response);
                info!(
                    "{}: announce {:?} ok, {} peers, next in {:?}",
                    self.ctx.name(),
                    event,
                    response.peers.len(),
                    self.interval()
                );
            }
            Err(e) => {
                *self.status.lock() = TrackerStatus::Stalled;
                warn!("{}: tracker {} stalled: {}", self.ctx.name(), self.url(), e);
            }
        }

        self.report(event, &result);
        result
    }

    fn apply(&self, response: &AnnounceResponse) {
        *self.status.lock() = TrackerStatus::Running;

        let mut interval = Duration::from_secs(response.interval as u64)
            .max(Duration::from_secs(response.min_interval.unwrap_or(0) as u64))
            .max(MIN_ANNOUNCE_INTERVAL);
        if self.seeding.load(Ordering::Relaxed) {
            interval = interval.max(SEEDING_ANNOUNCE_INTERVAL);
        }
        *self.interval.lock() = interval;

        if let Some(id) = &response.tracker_id {
            *self.tracker_id.lock() = Some(id.clone());
        }
        if let Some(warning) = &response.warning {
            warn!("{}: tracker warning: {}", self.ctx.name(), warning);
        }
        if !response.peers.is_empty() && self.peers_tx.send(response.peers.clone()).is_err() {
            debug!("{}: swarm queue closed", self.ctx.name());
        }
    }

    fn report(&self, event: TrackerEvent, result: &Result<AnnounceResponse, TrackerError>) {
        let Some(callback) = self.callback.read().clone() else {
            return;
        };
        let report = TrackerReport {
            info_hash: self.ctx.info_hash(),
            event,
            status: self.status(),
            peers: result.as_ref().map(|r| r.peers.len()).unwrap_or(0),
            interval: self.interval(),
            error: result.as_ref().err().map(|e| e.to_string()),
        };
        if catch_unwind(AssertUnwindSafe(|| callback(&report))).is_err() {
            warn!("{}: tracker callback panicked", self.ctx.name());
        }
    }
}
