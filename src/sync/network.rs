//! Link I/O: dialing, accepting, and the per-link reader and writer tasks.
//!
//! Each link runs as two tasks over one framed transport. The reader owns
//! the [`LinkSession`] and executes its actions; the writer owns the sink.
//! The writer takes lines from an unbounded control channel (handshake
//! replies, keepalives, the burst) ahead of the bounded send queue the rest
//! of the server relays into, and only starts draining that queue once the
//! burst has been written.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use slirc_proto::line::MAX_LINE_LEN;
use slirc_proto::{LineCodec, Message};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::config::LinkBlock;
use crate::error::LinkError;
use crate::sync::burst;
use crate::sync::events::NetworkEvent;
use crate::sync::link::LinkHandle;
use crate::sync::manager::SyncManager;
use crate::sync::protocol;
use crate::sync::session::{Action, LinkPhase, LinkSession, PeerIdentity};
use crate::telemetry::spans;

/// How long the writer gets to flush the final `ERROR` before it is aborted.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Any bidirectional byte stream a link can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Opens outbound transports. Swapped out in tests for in-memory pipes.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, link: &LinkBlock) -> io::Result<BoxedStream>;
}

/// Plain TCP dialer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, link: &LinkBlock) -> io::Result<BoxedStream> {
        let stream = TcpStream::connect((link.hostname.as_str(), link.port)).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

/// How a link ended.
#[derive(Debug)]
pub struct LinkReport {
    /// The authenticated peer, if the handshake got that far.
    pub peer: Option<PeerIdentity>,
    /// Whether the link ever reached [`LinkPhase::Established`].
    pub established: bool,
    pub reason: LinkError,
}

// ============================================================================
// Listening and dialing
// ============================================================================

/// Bind `address` and accept inbound links until shutdown.
pub async fn listen(manager: Arc<SyncManager>, address: SocketAddr) -> io::Result<()> {
    let listener = TcpListener::bind(address).await?;
    info!(address = %address, "Listening for server links");
    listen_on(manager, listener).await
}

/// Accept inbound links on an already bound listener until shutdown.
pub async fn listen_on(manager: Arc<SyncManager>, listener: TcpListener) -> io::Result<()> {
    let shutdown = manager.shutdown_token().clone();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Link listener stopping");
                return Ok(());
            }
            res = listener.accept() => match res {
                Ok((stream, remote)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(remote = %remote, error = %e, "Failed to set TCP_NODELAY");
                    }
                    info!(remote = %remote, "Inbound server connection");
                    let span = spans::link("inbound", &remote.to_string());
                    tokio::spawn(serve_inbound(Arc::clone(&manager), Box::new(stream)).instrument(span));
                }
                Err(e) => warn!(error = %e, "Failed to accept server connection"),
            }
        }
    }
}

/// Run an accepted connection to completion.
pub async fn serve_inbound(manager: Arc<SyncManager>, stream: BoxedStream) -> LinkReport {
    let session = LinkSession::inbound(
        manager.local().clone(),
        manager.config().links.clone(),
        Instant::now(),
    );
    let report = run_link(Arc::clone(&manager), stream, session).await;
    if report.established
        && let Some(peer) = &report.peer
    {
        manager.autoconnect().on_closed(&peer.name, Instant::now());
    }
    report
}

/// Dial `link` and run the link to completion, then report the outcome to
/// the autoconnect scheduler.
pub async fn connect_to_peer(manager: Arc<SyncManager>, link: LinkBlock) {
    let span = spans::link("outbound", &link.name);
    async move {
        crate::metrics::record_autoconnect("dialed");
        let dial = tokio::time::timeout(
            manager.config().timeouts.handshake(),
            manager.dialer().dial(&link),
        );
        let report = match dial.await {
            Ok(Ok(stream)) => {
                info!(address = %link.address(), "Connected");
                let session = LinkSession::outbound(
                    manager.local().clone(),
                    manager.config().links.clone(),
                    link.clone(),
                    Instant::now(),
                );
                Some(run_link(Arc::clone(&manager), stream, session).await)
            }
            Ok(Err(e)) => {
                warn!(address = %link.address(), error = %e, "Connect failed");
                None
            }
            Err(_) => {
                warn!(address = %link.address(), "Connect timed out");
                None
            }
        };

        let now = Instant::now();
        if report.is_some_and(|r| r.established) {
            manager.autoconnect().on_closed(&link.name, now);
        } else {
            crate::metrics::record_autoconnect("failed");
            let retry_in = manager.autoconnect().on_failure(&link.name, now);
            debug!(retry_in = ?retry_in, "Link attempt failed");
        }
    }
    .instrument(span)
    .await
}

// ============================================================================
// Link tasks
// ============================================================================

type LinkSink = SplitSink<Framed<BoxedStream, LineCodec>, String>;

/// Instructions from the reader to the writer.
enum Control {
    Line(Message),
    /// Write the burst, signal `done`, then start draining `queue`.
    Burst {
        lines: Vec<Message>,
        queue: mpsc::Receiver<Arc<Message>>,
        done: oneshot::Sender<()>,
        handle: LinkHandle,
    },
}

/// Reader-side state of one link.
struct LinkTask {
    manager: Arc<SyncManager>,
    session: LinkSession,
    control: mpsc::UnboundedSender<Control>,
    cancel: CancellationToken,
    handle: Option<LinkHandle>,
    peer: Option<PeerIdentity>,
    burst_done: Option<oneshot::Sender<()>>,
    /// Set when the local burst was handed to the writer; consumed by the
    /// loop to arm the burst deadline.
    burst_started: Option<Instant>,
    established: bool,
}

impl LinkTask {
    fn send(&self, msg: Message) -> Result<(), LinkError> {
        self.control
            .send(Control::Line(msg))
            .map_err(|_| writer_stopped())
    }

    fn on_line(&mut self, line: String) -> Result<(), LinkError> {
        if let Some(handle) = &self.handle {
            handle.record_received(line.len() + 2);
        }
        if line.is_empty() {
            return Ok(());
        }
        let msg: Message = line.parse()?;
        let actions = self.session.on_message(msg, Instant::now())?;
        self.execute(actions)
    }

    fn execute(&mut self, actions: Vec<Action>) -> Result<(), LinkError> {
        // our SERVER reply carries the link password; settle the peer's
        // place in the tree before anything goes out
        let admitting = actions.iter().find_map(|action| match action {
            Action::BeginBurst(peer) => Some(peer),
            _ => None,
        });
        if let Some(peer) = admitting {
            self.manager.check_admission(peer)?;
        }

        for action in actions {
            match action {
                Action::Send(msg) => self.send(msg)?,
                Action::BeginBurst(peer) => self.begin_burst(peer)?,
                Action::Apply(msg) => {
                    let from = self
                        .peer
                        .as_ref()
                        .map(|p| p.sid.clone())
                        .ok_or_else(|| LinkError::ProtocolViolation("command before authentication".to_string()))?;
                    protocol::handle(&self.manager, msg, &from)?;
                }
                Action::Established => {
                    if let Some(peer) = &self.peer {
                        self.manager.link_established(&peer.sid);
                    }
                    self.established = true;
                }
            }
        }
        Ok(())
    }

    fn begin_burst(&mut self, peer: PeerIdentity) -> Result<(), LinkError> {
        tracing::Span::current().record("peer", peer.name.as_str());
        let done = self
            .burst_done
            .take()
            .ok_or_else(|| LinkError::ProtocolViolation("second burst".to_string()))?;

        let (handle, queue) = LinkHandle::new(
            peer.sid.clone(),
            peer.name.clone(),
            self.manager.config().limits.sendq_lines,
            self.cancel.clone(),
        );
        self.manager.attach_peer(&peer, handle.clone())?;
        self.handle = Some(handle.clone());
        self.peer = Some(peer.clone());

        let lines = burst::generate(
            self.manager.topology(),
            self.manager.store().as_ref(),
            &peer.sid,
        );
        debug!(lines = lines.len(), "Sending burst");
        self.control
            .send(Control::Burst {
                lines,
                queue,
                done,
                handle,
            })
            .map_err(|_| writer_stopped())?;
        self.burst_started = Some(Instant::now());

        self.manager.events().publish(NetworkEvent::LinkStateChanged {
            peer: peer.name,
            phase: LinkPhase::Bursting,
        });
        Ok(())
    }

    /// Why the link token fired.
    fn cancelled_reason(&self) -> LinkError {
        self.handle
            .as_ref()
            .and_then(LinkHandle::take_close_reason)
            .unwrap_or_else(|| {
                if self.manager.is_shutting_down() {
                    LinkError::Closed("Server shutting down".to_string())
                } else {
                    LinkError::Closed("link cancelled".to_string())
                }
            })
    }
}

fn writer_stopped() -> LinkError {
    LinkError::Transport(io::Error::new(io::ErrorKind::BrokenPipe, "link writer stopped"))
}

fn in_handshake(phase: LinkPhase) -> bool {
    matches!(
        phase,
        LinkPhase::Connecting | LinkPhase::AwaitingCapability | LinkPhase::AwaitingServerIntroduction
    )
}

/// Drive one link from connect to close.
///
/// On return the peer's subtree has been split off and the transport
/// released.
pub async fn run_link(
    manager: Arc<SyncManager>,
    stream: BoxedStream,
    mut session: LinkSession,
) -> LinkReport {
    let timeouts = manager.config().timeouts.clone();
    let (sink, mut lines) = Framed::new(stream, LineCodec::new()).split();
    let (control, control_rx) = mpsc::unbounded_channel();
    let mut writer = tokio::spawn(write_loop(sink, control_rx).in_current_span());
    let mut writer_finished = false;

    let (burst_done, mut burst_written) = oneshot::channel();
    let cancel = manager.shutdown_token().child_token();

    let initial = session.on_connected();
    let mut task = LinkTask {
        manager: Arc::clone(&manager),
        session,
        control,
        cancel: cancel.clone(),
        handle: None,
        peer: None,
        burst_done: Some(burst_done),
        burst_started: None,
        established: false,
    };

    let handshake_timer = tokio::time::sleep(timeouts.handshake());
    let burst_timer = tokio::time::sleep(timeouts.burst());
    tokio::pin!(handshake_timer, burst_timer);

    let tick_every = (timeouts.ping_interval() / 4).max(Duration::from_millis(250));
    let mut ticker = tokio::time::interval(tick_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut burst_in_flight = false;
    let reason = match initial.and_then(|actions| task.execute(actions)) {
        Err(e) => e,
        Ok(()) => loop {
            if let Some(started) = task.burst_started.take() {
                burst_timer.as_mut().reset(started + timeouts.burst());
                burst_in_flight = true;
            }
            let phase = task.session.phase();

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break task.cancelled_reason(),
                res = &mut writer => {
                    writer_finished = true;
                    break match res {
                        Ok(Err(e)) => e,
                        _ => writer_stopped(),
                    };
                }
                line = lines.next() => {
                    let result = match line {
                        Some(Ok(line)) => task.on_line(line),
                        Some(Err(e)) => Err(e.into()),
                        None => Err(LinkError::Transport(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed by peer",
                        ))),
                    };
                    if let Err(e) = result {
                        break e;
                    }
                }
                written = &mut burst_written, if burst_in_flight => {
                    burst_in_flight = false;
                    if written.is_err() {
                        break writer_stopped();
                    }
                    let actions = task.session.on_burst_sent();
                    if let Err(e) = task.execute(actions) {
                        break e;
                    }
                }
                _ = ticker.tick() => {
                    let result = task
                        .session
                        .on_tick(Instant::now(), timeouts.ping_interval(), timeouts.ping_timeout())
                        .and_then(|actions| task.execute(actions));
                    if let Err(e) = result {
                        break e;
                    }
                }
                _ = &mut handshake_timer, if in_handshake(phase) => break LinkError::HandshakeTimeout,
                _ = &mut burst_timer, if phase == LinkPhase::Bursting => break LinkError::BurstTimeout,
            }
        },
    };

    close_link(task, reason, writer, writer_finished).await
}

async fn close_link(
    task: LinkTask,
    reason: LinkError,
    mut writer: tokio::task::JoinHandle<Result<(), LinkError>>,
    writer_finished: bool,
) -> LinkReport {
    let LinkTask {
        manager,
        mut session,
        control,
        handle,
        peer,
        established,
        ..
    } = task;

    for action in session.force_close(&reason) {
        if let Action::Send(msg) = action {
            let _ = control.send(Control::Line(msg));
        }
    }
    drop(control);

    // Split before the transport goes so nothing more is routed here.
    if let Some(handle) = &handle {
        manager.detach_link(&handle.sid, &reason.to_string());
    }

    if !writer_finished && tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }
    session.finish();

    crate::metrics::record_link_error(reason.error_code());
    if established {
        info!(reason = %reason, "Link closed");
    } else if reason.is_handshake_rejection() {
        warn!(error = %reason, code = reason.error_code(), "Link refused");
    } else {
        info!(error = %reason, "Link failed");
    }
    if let Some(peer) = &peer {
        manager.events().publish(NetworkEvent::LinkStateChanged {
            peer: peer.name.clone(),
            phase: LinkPhase::Closed,
        });
    }

    LinkReport {
        peer,
        established,
        reason,
    }
}

async fn recv_queued(queue: &mut Option<mpsc::Receiver<Arc<Message>>>) -> Option<Arc<Message>> {
    match queue {
        Some(queue) => queue.recv().await,
        None => std::future::pending().await,
    }
}

async fn write_line(sink: &mut LinkSink, msg: &Message, handle: Option<&LinkHandle>) -> Result<(), LinkError> {
    let line = match msg.to_line() {
        Ok(line) if line.len() + 2 <= MAX_LINE_LEN => line,
        Ok(line) => {
            warn!(command = msg.command.name(), len = line.len(), "Dropping over-long line");
            return Ok(());
        }
        Err(e) => {
            warn!(error = %e, "Dropping unserializable line");
            return Ok(());
        }
    };
    let len = line.len() + 2;
    sink.send(line).await?;
    if let Some(handle) = handle {
        handle.record_sent(len);
    }
    Ok(())
}

/// Owns the sink until the reader drops the control channel.
async fn write_loop(
    mut sink: LinkSink,
    mut control: mpsc::UnboundedReceiver<Control>,
) -> Result<(), LinkError> {
    let mut queue: Option<mpsc::Receiver<Arc<Message>>> = None;
    let mut handle: Option<LinkHandle> = None;

    loop {
        tokio::select! {
            biased;
            ctl = control.recv() => match ctl {
                Some(Control::Line(msg)) => write_line(&mut sink, &msg, handle.as_ref()).await?,
                Some(Control::Burst { lines, queue: q, done, handle: h }) => {
                    for msg in &lines {
                        write_line(&mut sink, msg, Some(&h)).await?;
                    }
                    let _ = done.send(());
                    queue = Some(q);
                    handle = Some(h);
                }
                None => break,
            },
            queued = recv_queued(&mut queue) => match queued {
                Some(msg) => write_line(&mut sink, &msg, handle.as_ref()).await?,
                None => queue = None,
            },
        }
    }

    sink.close().await?;
    Ok(())
}
