use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use concord_store::Payload;
use concord_types::models::UserProfile;

use crate::registry::ConnectionHandle;
use crate::relay::{Relay, RelayError};

/// Socket liveness settings.
#[derive(Debug, Clone, Copy)]
pub struct SocketTimings {
    /// The server sends a Ping this often. Two consecutive missed Pongs
    /// drop the connection.
    pub heartbeat_interval: Duration,
    /// Upper bound on a single socket write.
    pub write_timeout: Duration,
    /// How long the writer gets to flush a Close frame after unregistering.
    pub close_grace: Duration,
}

impl Default for SocketTimings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            write_timeout: Duration::from_secs(10),
            close_grace: Duration::from_secs(2),
        }
    }
}

/// Runs one authenticated socket on `channel_id` until the client leaves,
/// the transport fails, the heartbeat lapses or the server shuts down.
/// The connection is unregistered on every one of those paths.
pub async fn handle_connection(socket: WebSocket, relay: Relay, author: UserProfile, channel_id: i64) {
    let (sender, receiver) = socket.split();
    serve(sender, receiver, relay, author, channel_id, SocketTimings::default()).await;
}

/// [`handle_connection`] over any split message transport.
pub async fn serve<S, R, E>(
    sender: S,
    receiver: R,
    relay: Relay,
    author: UserProfile,
    channel_id: i64,
    timings: SocketTimings,
) where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    let (handle, outbound) = ConnectionHandle::new(author.user_id);
    let connection_id = handle.id();
    if let Err(e) = relay.registry().register(channel_id, handle).await {
        warn!(
            "{} ({}) could not join channel {}: {:#}",
            author.username, author.user_id, channel_id, e
        );
        return;
    }

    info!(
        "{} ({}) connected to channel {}",
        author.username, author.user_id, channel_id
    );

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));

    let mut send_task = tokio::spawn(write_loop(sender, outbound, pong_received.clone(), timings));
    let mut recv_task = tokio::spawn(read_loop(
        receiver,
        relay.clone(),
        author.clone(),
        channel_id,
        pong_received,
    ));

    // Wait for either task to finish
    tokio::select! {
        _ = &mut recv_task => {}
        _ = &mut send_task => recv_task.abort(),
        _ = relay.shutdown_token().cancelled() => recv_task.abort(),
    }

    // Dropping the registry's sender lets the writer send Close and exit.
    relay.registry().unregister(channel_id, connection_id).await;
    if !send_task.is_finished() && timeout(timings.close_grace, &mut send_task).await.is_err() {
        send_task.abort();
    }

    info!(
        "{} ({}) disconnected from channel {}",
        author.username, author.user_id, channel_id
    );
}

async fn write_loop<S>(
    mut sender: S,
    mut outbound: mpsc::Receiver<Payload>,
    pong_received: Arc<AtomicBool>,
    timings: SocketTimings,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut heartbeat = tokio::time::interval(timings.heartbeat_interval);
    heartbeat.tick().await;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            payload = outbound.recv() => {
                let Some(payload) = payload else {
                    let _ = timeout(timings.write_timeout, sender.send(Message::Close(None))).await;
                    break;
                };

                let frame = Message::Text(payload.to_string().into());
                if !send_with_deadline(&mut sender, frame, timings.write_timeout).await {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if pong_received.swap(false, Ordering::Acquire) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        break;
                    }
                }
                let ping = Message::Ping(Vec::<u8>::new().into());
                if !send_with_deadline(&mut sender, ping, timings.write_timeout).await {
                    break;
                }
            }
        }
    }
}

/// Returns false when the socket should be considered dead.
async fn send_with_deadline<S>(sender: &mut S, message: Message, deadline: Duration) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match timeout(deadline, sender.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!("Socket write failed: {}", e);
            false
        }
        Err(_) => {
            warn!("Socket write exceeded {:?}, dropping connection", deadline);
            false
        }
    }
}

async fn read_loop<R, E>(
    mut receiver: R,
    relay: Relay,
    author: UserProfile,
    channel_id: i64,
    pong_received: Arc<AtomicBool>,
) where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(frame) = receiver.next().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(e) => {
                debug!("{} ({}) read error: {}", author.username, author.user_id, e);
                break;
            }
        };

        match msg {
            Message::Text(text) => match relay.handle_frame(&author, channel_id, text.as_str()).await {
                Ok(_) => {}
                Err(RelayError::MalformedFrame(e)) => {
                    warn!(
                        "{} ({}) bad frame: {} -- raw: {}",
                        author.username,
                        author.user_id,
                        e,
                        truncate(text.as_str(), 200)
                    );
                }
                Err(e) => {
                    warn!(
                        "{} ({}) message on channel {} dropped: {}",
                        author.username, author.user_id, channel_id, e
                    );
                }
            },
            Message::Binary(_) => {
                debug!("{} ({}) sent a binary frame, ignoring", author.username, author.user_id);
            }
            Message::Pong(_) => {
                pong_received.store(true, Ordering::Release);
            }
            Message::Close(_) => break,
            Message::Ping(_) => {}
        }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
