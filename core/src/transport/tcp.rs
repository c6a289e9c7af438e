/// TCP channel client talking to the relay with line-delimited JSON frames
use super::frame::RelayFrame;
use super::{dispatch_raw, ChatPayload, EventFanout, Transport};
use crate::error::{Result, SyncError};
use crate::model::ConnectionState;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

struct Session {
    writer: OwnedWriteHalf,
    reader: JoinHandle<()>,
}

pub struct TcpTransport {
    addr: SocketAddr,
    channel: String,
    event_name: String,
    connect_timeout: Duration,
    events: EventFanout,
    errors: broadcast::Sender<String>,
    state: Arc<watch::Sender<ConnectionState>>,
    joined: Arc<AtomicBool>,
    /// Bumped by every `disconnect`. State changes from a connect attempt or
    /// a reader of an older generation are discarded.
    lifecycle: Arc<StdMutex<u64>>,
    session: Mutex<Option<Session>>,
}

impl TcpTransport {
    /// `capacity` bounds the transport notice buffer
    pub fn new(
        addr: SocketAddr,
        channel: impl Into<String>,
        event_name: impl Into<String>,
        connect_timeout: Duration,
        capacity: usize,
    ) -> Self {
        let (errors, _) = broadcast::channel(capacity.max(1));
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            addr,
            channel: channel.into(),
            event_name: event_name.into(),
            connect_timeout,
            events: EventFanout::default(),
            errors,
            state: Arc::new(state),
            joined: Arc::new(AtomicBool::new(false)),
            lifecycle: Arc::new(StdMutex::new(0)),
            session: Mutex::new(None),
        }
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, u64> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Caller holds the lifecycle lock
    fn fail(&self, reason: String) -> SyncError {
        error!("Error connecting to relay {}: {}", self.addr, reason);
        self.joined.store(false, Ordering::SeqCst);
        self.state.send_replace(ConnectionState::Error(reason.clone()));
        SyncError::Connection(reason)
    }

    /// Dial, send `join`, wait for `joined`
    async fn open(&self) -> Result<(OwnedWriteHalf, Lines<BufReader<OwnedReadHalf>>)> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(self.addr))
            .await
            .map_err(|_| SyncError::Timeout(format!("connect to {}", self.addr)))??;
        let (read_half, mut writer) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let join = RelayFrame::Join {
            channel: self.channel.clone(),
        };
        writer.write_all(join.to_line()?.as_bytes()).await?;

        loop {
            let line = timeout(self.connect_timeout, lines.next_line())
                .await
                .map_err(|_| SyncError::Timeout("waiting for join ack".to_string()))??;
            let Some(line) = line else {
                return Err(SyncError::Connection("relay closed during join".to_string()));
            };
            match RelayFrame::from_line(&line)? {
                RelayFrame::Joined { channel } if channel == self.channel => {
                    return Ok((writer, lines));
                }
                RelayFrame::Error { message } => return Err(SyncError::Connection(message)),
                other => debug!("Ignoring frame before join ack: {:?}", other),
            }
        }
    }

    fn spawn_reader(
        &self,
        mut lines: Lines<BufReader<OwnedReadHalf>>,
        generation: u64,
    ) -> JoinHandle<()> {
        let events = self.events.clone();
        let errors = self.errors.clone();
        let state = self.state.clone();
        let joined = self.joined.clone();
        let lifecycle = self.lifecycle.clone();
        let event_name = self.event_name.clone();

        tokio::spawn(async move {
            let end_session = |next: ConnectionState| {
                let current = lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
                if *current == generation {
                    joined.store(false, Ordering::SeqCst);
                    state.send_replace(next);
                }
            };

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match RelayFrame::from_line(&line) {
                            Ok(RelayFrame::Event { event, data, .. }) if event == event_name => {
                                dispatch_raw(&data, &events, &errors);
                            }
                            Ok(RelayFrame::Error { message }) => {
                                warn!("Relay error: {}", message);
                                let _ = errors.send(message);
                            }
                            Ok(other) => debug!("Ignoring frame: {:?}", other),
                            Err(e) => {
                                warn!("Bad frame from relay: {}", e);
                                let _ = errors.send(format!("Failed to parse payload: {}", line));
                            }
                        }
                    }
                    Ok(None) => {
                        info!("Relay closed the connection");
                        end_session(ConnectionState::Disconnected);
                        break;
                    }
                    Err(e) => {
                        error!("Relay read error: {}", e);
                        end_session(ConnectionState::Error(e.to_string()));
                        break;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.is_some() && self.joined.load(Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(stale) = session.take() {
            stale.reader.abort();
        }

        let generation = {
            let lifecycle = self.lock_lifecycle();
            self.state.send_replace(ConnectionState::Connecting);
            *lifecycle
        };
        let opened = self.open().await;

        // No await past this point; the lifecycle lock is held until the
        // session is installed.
        let lifecycle = self.lock_lifecycle();
        if *lifecycle != generation {
            info!("Disconnected while connecting to {}", self.addr);
            return Err(SyncError::Connection("disconnected while connecting".to_string()));
        }
        let (writer, lines) = match opened {
            Ok(parts) => parts,
            Err(SyncError::Connection(reason)) => return Err(self.fail(reason)),
            Err(e) => return Err(self.fail(e.to_string())),
        };

        self.joined.store(true, Ordering::SeqCst);
        self.state.send_replace(ConnectionState::Connected);
        let reader = self.spawn_reader(lines, generation);
        *session = Some(Session { writer, reader });
        drop(lifecycle);

        info!("Joined channel {} on {}", self.channel, self.addr);
        Ok(())
    }

    fn disconnect(&self) {
        {
            let mut lifecycle = self.lock_lifecycle();
            *lifecycle = lifecycle.wrapping_add(1);
            self.joined.store(false, Ordering::SeqCst);
            self.state.send_replace(ConnectionState::Disconnected);
        }
        match self.session.try_lock() {
            Ok(mut session) => {
                if let Some(s) = session.take() {
                    s.reader.abort();
                    // writer drops here and closes our half
                }
            }
            // a connect in flight sees the new generation and backs out;
            // a send in flight leaves a stale session the next connect replaces
            Err(_) => debug!("disconnect: session busy"),
        }
    }

    async fn send(&self, payload: &ChatPayload) -> Result<()> {
        let mut session = self.session.lock().await;
        let Some(s) = session.as_mut().filter(|_| self.joined.load(Ordering::SeqCst)) else {
            warn!("send: channel is not joined");
            return Err(SyncError::Send("channel not joined".to_string()));
        };

        let frame = RelayFrame::Publish {
            channel: self.channel.clone(),
            event: self.event_name.clone(),
            data: payload.to_json()?,
        };
        let line = frame.to_line()?;
        s.writer.write_all(line.as_bytes()).await.map_err(|e| {
            error!("Failed to publish payload: {}", e);
            SyncError::Send(e.to_string())
        })?;
        debug!("Published {}: {}", payload.kind.as_str(), payload.text);
        Ok(())
    }

    fn subscribe_events(&self) -> mpsc::UnboundedReceiver<ChatPayload> {
        self.events.subscribe()
    }

    fn subscribe_errors(&self) -> broadcast::Receiver<String> {
        self.errors.subscribe()
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}
