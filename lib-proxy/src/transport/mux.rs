//! Channel multiplexing over a secret connection
//!
//! Every encrypted frame carries `[channel_id u8][payload]`. Outbound
//! traffic goes through bounded per-channel queues drained in priority
//! order by a single writer task; [`Mux::send`] never blocks and reports a
//! full queue with `false`. Inbound frames are delivered as [`MuxEvent`]s in
//! wire order.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::ProxyError;
use crate::transport::secret::{SecretConnection, SecretReader, SecretWriter};
use crate::transport::ChannelDescriptor;

/// One frame received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub channel_id: u8,
    pub payload: Vec<u8>,
}

/// Mux lifecycle events, delivered in order.
#[derive(Debug)]
pub enum MuxEvent {
    Frame(InboundFrame),
    /// Transport failure; the mux is dead.
    Error(ProxyError),
    /// Clean end of stream.
    Closed,
}

struct OutboundChannel {
    descriptor: ChannelDescriptor,
    queue: mpsc::Sender<Vec<u8>>,
}

/// Handle to a running multiplexed connection. Cheap to clone.
#[derive(Clone)]
pub struct Mux {
    channels: Arc<HashMap<u8, OutboundChannel>>,
    wakeup: Arc<Notify>,
    stop_tx: Arc<watch::Sender<bool>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    remote_id: String,
}

impl Mux {
    /// Start the reader and writer tasks for an authenticated connection.
    ///
    /// Inbound frames and transport errors arrive on `events`.
    pub fn spawn<S>(
        conn: SecretConnection<S>,
        descriptors: Vec<ChannelDescriptor>,
        events: mpsc::Sender<MuxEvent>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let remote_id = conn.remote_id();
        let (reader, writer, _) = conn.into_split();
        let (stop_tx, stop_rx) = watch::channel(false);
        let wakeup = Arc::new(Notify::new());

        let mut channels = HashMap::new();
        let mut queues = Vec::new();
        let mut ordered = descriptors;
        // Higher priority drains first; stable order keeps ties deterministic.
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority));
        for descriptor in ordered {
            let (tx, rx) = mpsc::channel(descriptor.send_queue_capacity.max(1));
            channels.insert(descriptor.id, OutboundChannel { descriptor, queue: tx });
            queues.push((descriptor, rx));
        }

        let recv_caps: HashMap<u8, usize> = channels
            .values()
            .map(|c| (c.descriptor.id, c.descriptor.recv_message_capacity))
            .collect();

        let read_task = tokio::spawn(read_loop(reader, recv_caps, events.clone(), stop_rx.clone()));
        let write_task = tokio::spawn(write_loop(writer, queues, events, stop_rx, wakeup.clone()));

        Self {
            channels: Arc::new(channels),
            wakeup,
            stop_tx: Arc::new(stop_tx),
            tasks: Arc::new(Mutex::new(vec![read_task, write_task])),
            remote_id,
        }
    }

    /// Peer identity derived from the handshake.
    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    /// Queue a frame for sending. Returns `false` when the channel is
    /// unknown, its queue is full, or the mux has stopped.
    pub fn send(&self, channel_id: u8, payload: Vec<u8>) -> bool {
        let Some(channel) = self.channels.get(&channel_id) else {
            debug!(channel = format_args!("0x{channel_id:02X}"), "send on unknown channel");
            return false;
        };
        match channel.queue.try_send(payload) {
            Ok(()) => {
                self.wakeup.notify_one();
                true
            }
            Err(_) => false,
        }
    }

    /// Drain queued frames, then stop both tasks.
    pub async fn flush_and_stop(&self) {
        let _ = self.stop_tx.send(true);
        self.wakeup.notify_one();
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
    }
}

async fn read_loop<R>(
    mut reader: SecretReader<R>,
    recv_caps: HashMap<u8, usize>,
    events: mpsc::Sender<MuxEvent>,
    mut stop_rx: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin + Send,
{
    loop {
        let frame = tokio::select! {
            frame = reader.recv_frame() => frame,
            _ = stop_rx.changed() => break,
        };
        match frame {
            Ok(bytes) => {
                if bytes.is_empty() {
                    let _ = events
                        .send(MuxEvent::Error(ProxyError::Transport("empty frame".into())))
                        .await;
                    break;
                }
                let channel_id = bytes[0];
                let payload = bytes[1..].to_vec();
                if let Some(cap) = recv_caps.get(&channel_id) {
                    if payload.len() > *cap {
                        let _ = events
                            .send(MuxEvent::Error(ProxyError::Transport(format!(
                                "frame of {} bytes exceeds channel 0x{channel_id:02X} capacity {cap}",
                                payload.len()
                            ))))
                            .await;
                        break;
                    }
                }
                if events
                    .send(MuxEvent::Frame(InboundFrame { channel_id, payload }))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(ProxyError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                let _ = events.send(MuxEvent::Closed).await;
                break;
            }
            Err(e) => {
                let _ = events.send(MuxEvent::Error(e)).await;
                break;
            }
        }
    }
}

async fn write_loop<W>(
    mut writer: SecretWriter<W>,
    mut queues: Vec<(ChannelDescriptor, mpsc::Receiver<Vec<u8>>)>,
    events: mpsc::Sender<MuxEvent>,
    mut stop_rx: watch::Receiver<bool>,
    wakeup: Arc<Notify>,
) where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        // One frame per channel per sweep, highest priority first.
        let mut wrote = false;
        for (descriptor, queue) in queues.iter_mut() {
            let Ok(payload) = queue.try_recv() else { continue };
            let mut frame = Vec::with_capacity(1 + payload.len());
            frame.push(descriptor.id);
            frame.extend_from_slice(&payload);
            if let Err(e) = writer.send_frame(&frame).await {
                let _ = events.send(MuxEvent::Error(e)).await;
                return;
            }
            wrote = true;
        }
        if wrote {
            continue;
        }
        if *stop_rx.borrow() {
            break;
        }
        tokio::select! {
            _ = wakeup.notified() => {}
            _ = stop_rx.changed() => {}
        }
    }
    let _ = writer.shutdown().await;
}
