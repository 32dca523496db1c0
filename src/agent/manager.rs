use super::config::AgentConfig;
use super::status::TorrentSnapshot;
use crate::error::{Result, ValidationError};
use crate::metainfo::{InfoHash, Metainfo};
use crate::peer::{
    answer_handshake, connect, receive_handshake, spawn_session, FrameReader, FrameWriter,
    PeerError, PeerHandle, PeerId,
};
use crate::storage::{create_local_structure, create_torrent_bitfield, fully_downloaded_bitfield, DiskIo};
use crate::torrent::selector::local_piece_suggestions;
use crate::torrent::{Assembler, Progress, TorrentContext, TorrentStatus};
use crate::tracker::{AnnounceParams, Announcer, Tracker, TrackerReport};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct ManagedTorrent {
    ctx: Arc<TorrentContext>,
    tracker: Arc<Tracker>,
}

/// Top-level coordinator: the torrent registry, peer connection
/// lifecycle and the two disk workers shared by every torrent.
///
/// Must be created inside a Tokio runtime.
pub struct Agent {
    config: AgentConfig,
    torrents: DashMap<InfoHash, Arc<ManagedTorrent>>,
    disk: DiskIo,
    shutdown: CancellationToken,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Arc<Self> {
        let shutdown = CancellationToken::new();
        let disk = DiskIo::start(shutdown.clone());

        info!("agent started with peer id {}", config.peer_id);

        Arc::new(Self {
            config,
            torrents: DashMap::new(),
            disk,
            shutdown,
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn torrent(&self, info_hash: &InfoHash) -> Result<Arc<ManagedTorrent>, ValidationError> {
        self.torrents
            .get(info_hash)
            .map(|t| t.value().clone())
            .ok_or(ValidationError::TorrentNotFound(*info_hash))
    }

    /// Registers a torrent, prepares its files and works out which pieces
    /// are already local. With `seeding` set the data is assumed complete
    /// and nothing is hashed. The torrent stays paused until
    /// [`start_torrent`](Self::start_torrent).
    pub async fn add_torrent(self: &Arc<Self>, metainfo: &Metainfo, seeding: bool) -> Result<InfoHash> {
        let info_hash = metainfo.info_hash;
        let Some(url) = metainfo.announce.as_deref() else {
            return Err(ValidationError::MissingTracker(info_hash).into());
        };
        if self.torrents.contains_key(&info_hash) {
            return Err(ValidationError::TorrentExists(info_hash).into());
        }
        let announcer = Announcer::from_url(url)?;

        let ctx = Arc::new(TorrentContext::new(
            metainfo,
            &self.config.download_dir,
            self.config.max_swarm_size,
            self.shutdown.child_token(),
        ));

        create_local_structure(&ctx).await?;
        if seeding {
            fully_downloaded_bitfield(&ctx)?;
        } else {
            create_torrent_bitfield(&ctx).await?;
        }

        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        let params = AnnounceParams {
            peer_id: self.config.peer_id,
            port: self.config.listen_port,
            num_want: self.config.num_want,
            local_ip: self.config.local_ip,
        };
        let tracker = Arc::new(Tracker::new(ctx.clone(), announcer, params, peers_tx));

        match self.torrents.entry(info_hash) {
            Entry::Occupied(_) => return Err(ValidationError::TorrentExists(info_hash).into()),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(ManagedTorrent {
                    ctx: ctx.clone(),
                    tracker: tracker.clone(),
                }));
            }
        }

        Assembler::new(
            ctx.clone(),
            self.disk.clone(),
            Some(tracker),
            self.config.max_peers_per_piece,
        )
        .spawn();
        tokio::spawn(self.clone().feed_swarm(ctx.clone(), peers_rx));

        info!(
            "added {} ({}), {} of {} pieces missing",
            ctx.name(),
            info_hash,
            ctx.missing_piece_count(),
            ctx.num_pieces()
        );
        Ok(info_hash)
    }

    /// Opens the pause gate and, the first time, starts the tracker.
    pub async fn start_torrent(&self, info_hash: &InfoHash) -> Result<()> {
        let torrent = self.torrent(info_hash)?;
        let ctx = &torrent.ctx;

        if ctx.status() == TorrentStatus::Ended {
            return Err(ValidationError::AlreadyClosed(*info_hash).into());
        }
        if ctx.is_running() {
            return Err(ValidationError::AlreadyStarted(*info_hash).into());
        }

        ctx.resume();
        if !torrent.tracker.is_running() {
            torrent.tracker.start().await?;
        }
        info!("started {}", ctx.name());
        Ok(())
    }

    /// Stops the assembler at its next iteration. Peers stay connected and
    /// keep being served.
    pub fn pause_torrent(&self, info_hash: &InfoHash) -> Result<()> {
        let torrent = self.torrent(info_hash)?;
        let ctx = &torrent.ctx;

        if ctx.status() == TorrentStatus::Ended {
            return Err(ValidationError::AlreadyClosed(*info_hash).into());
        }
        if !ctx.is_running() {
            return Err(ValidationError::NotRunning(*info_hash).into());
        }

        ctx.pause();
        info!("paused {}", ctx.name());
        Ok(())
    }

    /// Stops all activity of a torrent: sends `stopped`, cancels the
    /// assembler and peer tasks, then closes the peers. The torrent stays
    /// registered with status `Ended`.
    pub async fn close_torrent(&self, info_hash: &InfoHash) -> Result<()> {
        let torrent = self.torrent(info_hash)?;
        self.close(&torrent).await
    }

    async fn close(&self, torrent: &ManagedTorrent) -> Result<()> {
        let ctx = &torrent.ctx;
        if !ctx.mark_ended() {
            return Err(ValidationError::AlreadyClosed(ctx.info_hash()).into());
        }

        torrent.tracker.stop().await;
        ctx.token().cancel();
        ctx.close_all_peers();

        info!("closed {}", ctx.name());
        Ok(())
    }

    /// Closes the torrent if needed and unregisters it.
    pub async fn remove_torrent(&self, info_hash: &InfoHash) -> Result<()> {
        let torrent = self.torrent(info_hash)?;
        if torrent.ctx.status() != TorrentStatus::Ended {
            // A concurrent close may win the race; the torrent is ended either way.
            if let Err(e) = self.close(&torrent).await {
                debug!("remove {}: {}", info_hash, e);
            }
        }
        self.torrents.remove(info_hash);
        info!("removed {}", info_hash);
        Ok(())
    }

    pub fn torrents(&self) -> Vec<InfoHash> {
        self.torrents.iter().map(|t| *t.key()).collect()
    }

    pub fn torrent_status(&self, info_hash: &InfoHash) -> Result<TorrentSnapshot> {
        let torrent = self.torrent(info_hash)?;
        let ctx = &torrent.ctx;

        Ok(TorrentSnapshot {
            file_name: ctx.name().to_string(),
            status: ctx.status(),
            peer_list: ctx.peers().iter().map(|p| p.addr()).collect(),
            bytes_downloaded: ctx.bytes_downloaded(),
            bytes_uploaded: ctx.bytes_uploaded(),
            info_hash: *info_hash,
            missing_piece_count: ctx.missing_piece_count(),
            swarm_size: ctx.swarm_size(),
            dead_peer_count: ctx.dead_peer_count(),
            tracker_status: torrent.tracker.status(),
        })
    }

    /// Registers a callback invoked after every successful piece write.
    pub fn set_progress_callback<F>(&self, info_hash: &InfoHash, callback: F) -> Result<()>
    where
        F: Fn(&Progress) + Send + Sync + 'static,
    {
        let torrent = self.torrent(info_hash)?;
        torrent.ctx.set_progress_callback(Some(Arc::new(callback)));
        Ok(())
    }

    /// Registers a callback invoked after every announce.
    pub fn set_tracker_callback<F>(&self, info_hash: &InfoHash, callback: F) -> Result<()>
    where
        F: Fn(&TrackerReport) + Send + Sync + 'static,
    {
        let torrent = self.torrent(info_hash)?;
        torrent.tracker.set_callback(Some(Arc::new(callback)));
        Ok(())
    }

    /// Binds the listen port and accepts incoming peers until shutdown.
    /// Returns the bound address.
    pub async fn listen(self: &Arc<Self>) -> Result<SocketAddr> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.listen_port)).await?;
        let addr = listener.local_addr()?;
        info!("listening for peers on {}", addr);

        tokio::spawn(self.clone().accept_loop(listener));
        Ok(addr)
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            let (stream, addr) = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                result = listener.accept() => match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        continue;
                    }
                },
            };

            let agent = self.clone();
            tokio::spawn(async move {
                if let Err(e) = agent.accept(stream, addr).await {
                    debug!("incoming peer {} rejected: {}", addr, e);
                }
            });
        }
        debug!("listener stopped");
    }

    /// The remote speaks first on incoming connections: read its handshake,
    /// find the torrent, then answer with ours.
    async fn accept(&self, mut stream: TcpStream, addr: SocketAddr) -> Result<(), PeerError> {
        let handshake = receive_handshake(&mut stream).await?;
        let info_hash = InfoHash::from(handshake.info_hash);

        let Ok(torrent) = self.torrent(&info_hash) else {
            debug!("{} asked for unknown torrent {}", addr, info_hash);
            return Ok(());
        };
        let ctx = torrent.ctx.clone();
        if ctx.token().is_cancelled() || !ctx.is_space_in_swarm(addr.ip()) {
            return Ok(());
        }

        answer_handshake(&mut stream, info_hash, self.config.peer_id).await?;
        stream.set_nodelay(true)?;
        self.admit(ctx, stream, addr, PeerId(handshake.peer_id)).await;
        Ok(())
    }

    /// Dials `addr` for a registered torrent in the background.
    pub fn connect_peer(self: &Arc<Self>, info_hash: &InfoHash, addr: SocketAddr) -> Result<()> {
        let torrent = self.torrent(info_hash)?;
        self.spawn_connect(torrent.ctx.clone(), addr);
        Ok(())
    }

    fn spawn_connect(self: &Arc<Self>, ctx: Arc<TorrentContext>, addr: SocketAddr) {
        let agent = self.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = ctx.token().cancelled() => return,
                result = connect(addr, ctx.info_hash(), agent.config.peer_id) => result,
            };
            match result {
                Ok((stream, peer_id)) => {
                    agent.admit(ctx, stream, addr, peer_id).await;
                }
                Err(e) => debug!("connect to {} failed: {}", addr, e),
            }
        });
    }

    /// Feeds peers learned from the tracker into the swarm until the
    /// torrent ends.
    async fn feed_swarm(
        self: Arc<Self>,
        ctx: Arc<TorrentContext>,
        mut peers_rx: mpsc::UnboundedReceiver<Vec<SocketAddr>>,
    ) {
        loop {
            let peers = tokio::select! {
                biased;
                _ = ctx.token().cancelled() => break,
                peers = peers_rx.recv() => match peers {
                    Some(peers) => peers,
                    None => break,
                },
            };

            for addr in peers {
                if ctx.is_space_in_swarm(addr.ip()) {
                    self.spawn_connect(ctx.clone(), addr);
                }
            }
        }
    }

    /// Admits an already handshaken stream into the torrent's swarm and
    /// starts its session. Returns `None` when the swarm is full, the
    /// address is already connected or the torrent is closed.
    pub async fn attach_stream<S>(
        &self,
        info_hash: &InfoHash,
        stream: S,
        addr: SocketAddr,
        peer_id: PeerId,
    ) -> Result<Option<Arc<PeerHandle>>>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let torrent = self.torrent(info_hash)?;
        Ok(self.admit(torrent.ctx.clone(), stream, addr, peer_id).await)
    }

    async fn admit<S>(
        &self,
        ctx: Arc<TorrentContext>,
        stream: S,
        addr: SocketAddr,
        peer_id: PeerId,
    ) -> Option<Arc<PeerHandle>>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        if ctx.token().is_cancelled() {
            return None;
        }

        let (reader, writer) = tokio::io::split(stream);
        let peer = Arc::new(PeerHandle::new(
            addr,
            peer_id,
            FrameWriter::new(Box::new(writer)),
            ctx.num_pieces(),
            ctx.peer_token(),
        ));

        if !ctx.admit_peer(peer.clone()) {
            debug!("no room for {} in {}", addr, ctx.name());
            peer.close();
            peer.shutdown().await;
            return None;
        }

        spawn_session(
            ctx.clone(),
            peer.clone(),
            FrameReader::new(Box::new(reader)),
            self.disk.clone(),
        );

        if let Err(e) = self.prime(&ctx, &peer).await {
            debug!("priming {} failed: {}", addr, e);
            ctx.close_peer(&peer);
            return None;
        }
        Some(peer)
    }

    /// Tells a new peer about pieces we have, whether we want anything,
    /// and lets it request from us.
    async fn prime(&self, ctx: &TorrentContext, peer: &PeerHandle) -> Result<(), PeerError> {
        for piece in local_piece_suggestions(ctx, peer, self.config.admission_have_count, 0) {
            peer.send_have(piece).await?;
        }
        if ctx.missing_piece_count() > 0 {
            peer.send_interested().await?;
        }
        peer.send_unchoke().await
    }

    /// Closes every torrent, then stops the listener and disk workers.
    pub async fn shutdown(&self) {
        let torrents: Vec<_> = self.torrents.iter().map(|t| t.value().clone()).collect();
        for torrent in torrents {
            if torrent.ctx.status() != TorrentStatus::Ended {
                if let Err(e) = self.close(&torrent).await {
                    debug!("shutdown: {}", e);
                }
            }
        }
        self.shutdown.cancel();
        info!("agent stopped");
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
