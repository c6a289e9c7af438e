/// Channel relay: fans published events out to every member of a channel
///
/// The publisher is a member too, which is what produces the echo the
/// reconciliation pipeline relies on.
use crate::error::{Result, SyncError};
use crate::transport::RelayFrame;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

type ClientId = u64;
type Outbox = mpsc::UnboundedSender<String>;

/// Channel membership
#[derive(Clone, Default)]
struct Hub {
    channels: Arc<RwLock<HashMap<String, Vec<(ClientId, Outbox)>>>>,
}

impl Hub {
    async fn join(&self, channel: &str, client: ClientId, outbox: Outbox) {
        let mut channels = self.channels.write().await;
        let members = channels.entry(channel.to_string()).or_default();
        if !members.iter().any(|(id, _)| *id == client) {
            members.push((client, outbox));
        }
    }

    async fn leave(&self, channel: &str, client: ClientId) {
        let mut channels = self.channels.write().await;
        if let Some(members) = channels.get_mut(channel) {
            members.retain(|(id, _)| *id != client);
        }
    }

    async fn remove_client(&self, client: ClientId) {
        let mut channels = self.channels.write().await;
        for members in channels.values_mut() {
            members.retain(|(id, _)| *id != client);
        }
        channels.retain(|_, members| !members.is_empty());
    }

    async fn is_member(&self, channel: &str, client: ClientId) -> bool {
        let channels = self.channels.read().await;
        channels
            .get(channel)
            .map(|m| m.iter().any(|(id, _)| *id == client))
            .unwrap_or(false)
    }

    /// Deliver a line to every member. Returns the number of recipients.
    async fn publish(&self, channel: &str, line: &str) -> usize {
        let channels = self.channels.read().await;
        let Some(members) = channels.get(channel) else {
            return 0;
        };
        members
            .iter()
            .filter(|(_, outbox)| outbox.send(line.to_string()).is_ok())
            .count()
    }
}

pub struct Relay {
    listener: TcpListener,
    hub: Hub,
    next_client: AtomicU64,
}

impl Relay {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(SyncError::Io)?;
        Ok(Self {
            listener,
            hub: Hub::default(),
            next_client: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(SyncError::Io)
    }

    /// Accept clients until the task is dropped
    pub async fn run(self) -> Result<()> {
        info!("Relay listening on {}", self.local_addr()?);

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let client = self.next_client.fetch_add(1, Ordering::Relaxed);
                    debug!("Relay client {} connected from {}", client, addr);
                    let hub = self.hub.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, client, hub.clone()).await {
                            error!("Error handling relay client {}: {}", client, e);
                        }
                        hub.remove_client(client).await;
                        debug!("Relay client {} disconnected", client);
                    });
                }
                Err(e) => {
                    error!("Failed to accept relay connection: {}", e);
                }
            }
        }
    }
}

async fn handle_client(stream: TcpStream, client: ClientId, hub: Hub) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer_task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                debug!("Relay write to client failed: {}", e);
                break;
            }
        }
    });

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await.map_err(SyncError::Io)? {
        if line.trim().is_empty() {
            continue;
        }

        let reply = match RelayFrame::from_line(&line) {
            Ok(RelayFrame::Join { channel }) => {
                hub.join(&channel, client, tx.clone()).await;
                info!("Client {} joined {}", client, channel);
                Some(RelayFrame::Joined { channel })
            }
            Ok(RelayFrame::Leave { channel }) => {
                hub.leave(&channel, client).await;
                None
            }
            Ok(RelayFrame::Publish {
                channel,
                event,
                data,
            }) => {
                if hub.is_member(&channel, client).await {
                    let out = RelayFrame::Event {
                        channel: channel.clone(),
                        event,
                        data,
                    }
                    .to_line()?;
                    let delivered = hub.publish(&channel, &out).await;
                    debug!("Relayed event on {} to {} members", channel, delivered);
                    None
                } else {
                    Some(RelayFrame::Error {
                        message: format!("not joined to channel {}", channel),
                    })
                }
            }
            Ok(other) => Some(RelayFrame::Error {
                message: format!("unexpected frame from client: {:?}", other),
            }),
            Err(e) => {
                warn!("Malformed frame from client {}: {}", client, e);
                Some(RelayFrame::Error {
                    message: e.to_string(),
                })
            }
        };

        if let Some(frame) = reply {
            let _ = tx.send(frame.to_line()?);
        }
    }

    drop(tx);
    hub.remove_client(client).await;
    let _ = writer_task.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hub_membership() {
        let hub = Hub::default();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        hub.join("room", 1, tx1.clone()).await;
        hub.join("room", 1, tx1).await;
        hub.join("room", 2, tx2).await;
        assert!(hub.is_member("room", 2).await);

        assert_eq!(hub.publish("room", "hi\n").await, 2);
        assert_eq!(rx1.recv().await.unwrap(), "hi\n");
        assert_eq!(rx2.recv().await.unwrap(), "hi\n");

        hub.leave("room", 2).await;
        assert!(!hub.is_member("room", 2).await);
        assert_eq!(hub.publish("room", "again\n").await, 1);

        hub.remove_client(1).await;
        assert_eq!(hub.publish("room", "gone\n").await, 0);
    }
}
