//! Per-client connection handler.
//!
//! Each TCP connection gets one task that performs the LOGIN handshake,
//! registers the player in the league and then drives the read→dispatch
//! loop. The handler is split into submodules:
//! - [`login`]: LOGIN parsing and registration
//! - [`dispatch`]: deferred-turn handling and the command table
//! - [`queries`]: SHOW, MONITOR, LIST, WHO, RATING, HELP, VERSION, CHAT
//! - [`pending`]: lines held back until it is the player's turn
//!
//! Reads happen outside the league lock. A dedicated reader task feeds
//! complete lines into a channel, so a read wait that times out never loses
//! a partly received line. Bytes that are not UTF-8 are decoded lossily and
//! lines longer than `MAX_LINE_LEN` are dropped without being buffered.

mod dispatch;
mod login;
mod pending;
mod queries;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::player::SessionId;
use crate::server::SharedState;
use crate::write_guard::WriteGuard;

pub use dispatch::{Flow, step};
pub use login::{LoginError, LoginRequest, is_good_login_name};
pub use pending::PendingInputQueue;

const MAX_LINE_LEN: usize = 8192;

/// One input event for the read loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// A received line, terminator removed.
    Line(String),
    /// The full read wait expired.
    Timeout,
    /// The short wait used while lines are pending expired.
    Poll,
    /// The peer closed the connection or the read failed.
    Failed,
}

/// Connection-local state of a logged-in player.
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub(crate) pending: PendingInputQueue,
    pub(crate) rng: StdRng,
}

impl Session {
    pub fn new(id: SessionId, name: impl Into<String>) -> Self {
        Self::with_rng(id, name, StdRng::from_entropy())
    }

    /// Session with a fixed random source for the side coin flip.
    pub fn with_rng(id: SessionId, name: impl Into<String>, rng: StdRng) -> Self {
        Self {
            id,
            name: name.into(),
            pending: PendingInputQueue::default(),
            rng,
        }
    }

    pub fn pending(&self) -> &PendingInputQueue {
        &self.pending
    }
}

struct LineReader {
    rx: mpsc::Receiver<String>,
    task: JoinHandle<()>,
}

impl LineReader {
    fn spawn<R>(reader: R, peer: String) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(64);
        let task = tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            let mut overlong = false;
            loop {
                buf.clear();
                let limit = (MAX_LINE_LEN + 1) as u64;
                match (&mut reader).take(limit).read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(%peer, "Read error: {e}");
                        break;
                    }
                }
                let complete = buf.ends_with(b"\n");
                if overlong {
                    // Rest of a line that was already dropped.
                    overlong = !complete;
                    continue;
                }
                if !complete && buf.len() > MAX_LINE_LEN {
                    tracing::warn!(%peer, "Line too long, dropping");
                    overlong = true;
                    continue;
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(line).await.is_err() {
                    break;
                }
            }
        });
        Self { rx, task }
    }

    async fn next(&mut self, wait: Duration, polling: bool) -> Input {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(raw)) => Input::Line(chomp(&raw).to_string()),
            Ok(None) => Input::Failed,
            Err(_) if polling => Input::Poll,
            Err(_) => Input::Timeout,
        }
    }
}

fn chomp(raw: &str) -> &str {
    raw.strip_suffix('\n')
        .map(|s| s.strip_suffix('\r').unwrap_or(s))
        .unwrap_or(raw)
}

/// Handle a plain TCP connection.
pub async fn handle(stream: TcpStream, state: Arc<SharedState>) -> Result<()> {
    let peer = stream.peer_addr()?.to_string();
    tracing::info!(%peer, "New connection");
    let (reader, writer) = stream.into_split();
    handle_io(reader, writer, peer, state).await
}

/// Handle any split byte stream: LOGIN, then the read loop until it stops.
pub async fn handle_io<R, W>(
    reader: R,
    writer: W,
    peer: String,
    state: Arc<SharedState>,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let config = &state.config;
    let mut lines = LineReader::spawn(reader, peer.clone());

    let first = tokio::time::timeout(config.login_timeout(), lines.rx.recv()).await;
    let eol = match &first {
        Ok(Some(raw)) if raw.ends_with("\r\n") => "\r\n",
        _ => "\n",
    };
    let request = match first {
        Err(_) => Err(LoginError::Timeout),
        Ok(None) => Err(LoginError::Closed),
        Ok(Some(raw)) => LoginRequest::parse(chomp(&raw)),
    };
    let label = request
        .as_ref()
        .map_or_else(|_| peer.clone(), |r| r.name.clone());
    let (out, outbox) = WriteGuard::channel(&label, config.outbox_capacity);
    let writer_task = outbox.spawn(writer, eol, config.write_timeout());

    let (cancel, mut cancelled) = watch::channel(false);
    let registered = request.and_then(|request| {
        let mut league = state.league.lock();
        login::register(&mut league, &request, &out, cancel).map(|id| (id, request.name))
    });
    let (id, name) = match registered {
        Ok(registered) => registered,
        Err(e) => {
            tracing::info!(%peer, "Login failed: {e}");
            if e != LoginError::Closed {
                out.write_safe(login::LOGIN_INCORRECT);
            }
            drop(out);
            close(lines, writer_task, config.write_timeout()).await;
            return Ok(());
        }
    };
    // The league's copy of the guard is the only one left.
    drop(out);

    let mut session = Session::new(id, name);
    loop {
        if *cancelled.borrow_and_update() {
            tracing::debug!(session = %id, "Cancelled");
            break;
        }
        let polling = !session.pending.is_empty();
        let wait = if polling {
            config.pending_poll()
        } else {
            config.read_timeout()
        };
        let input = tokio::select! {
            changed = cancelled.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            input = lines.next(wait, polling) => input,
        };
        tracing::trace!(session = %id, ?input, pending = session.pending.len(), "<-");

        let flow = {
            let mut league = state.league.lock();
            step(&mut session, &mut league, input)
        };
        if flow == Flow::Stop {
            break;
        }
    }

    {
        let mut league = state.league.lock();
        league.disconnect(id);
    }
    tracing::info!(session = %id, player = %session.name, "Connection closed");
    close(lines, writer_task, config.write_timeout()).await;
    Ok(())
}

/// Stops the reader and lets the writer drain what is already queued.
async fn close(lines: LineReader, writer_task: JoinHandle<()>, wait: Duration) {
    lines.task.abort();
    drop(lines.rx);
    if tokio::time::timeout(wait, writer_task).await.is_err() {
        tracing::debug!("Writer did not finish draining in time");
    }
}
