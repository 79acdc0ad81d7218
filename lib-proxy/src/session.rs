//! Proxy session
//!
//! One session per accepted peer: two authenticated multiplexed channels
//! (downstream peer, upstream validator) and the mutation pipeline between
//! them. Consensus frames are decoded, matched against the trigger, run
//! through the hook pipeline and the Byzantine mutator, re-encoded and
//! forwarded; everything else is copied through unchanged.
//!
//! Per `(direction, channel)` the pipeline is strictly FIFO: each direction
//! is processed by a single serial task. The first fatal transport error is
//! latched and cancels the session; later errors are swallowed.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use lib_codec::adapters::CometBftAdapter;
use lib_codec::{apply_action, ByzantineAction, CanonicalMessage, ChainAdapter, CodecError};

use crate::config::ProxyConfig;
use crate::consensus::{
    decode_envelope, default_descriptors, envelope_to_raw, is_consensus_channel, raw_to_frame,
};
use crate::error::ProxyError;
use crate::metrics::Metrics;
use crate::transport::{InboundFrame, Mux, MuxEvent, SecretConnection};

/// Which side a frame arrived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlowDirection {
    /// From the upstream validator, heading to external peers.
    Upstream,
    /// From the downstream peer, heading to the upstream validator.
    Downstream,
}

impl fmt::Display for FlowDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowDirection::Upstream => f.write_str("upstream"),
            FlowDirection::Downstream => f.write_str("downstream"),
        }
    }
}

/// A single downstream-to-upstream proxy link
#[derive(Clone)]
pub struct Session {
    cfg: Arc<ProxyConfig>,
    adapter: Arc<CometBftAdapter>,
    metrics: Arc<Metrics>,
}

impl Session {
    pub fn new(cfg: Arc<ProxyConfig>, adapter: Arc<CometBftAdapter>, metrics: Arc<Metrics>) -> Self {
        Self { cfg, adapter, metrics }
    }

    /// Run the session until a fatal error or external shutdown.
    ///
    /// Returns the latched fatal error; a clean peer close or an external
    /// shutdown returns `Ok`.
    pub async fn run<D, U>(
        &self,
        downstream: SecretConnection<D>,
        upstream: SecretConnection<U>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ProxyError>
    where
        D: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        U: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let latched: Arc<Mutex<Option<ProxyError>>> = Arc::new(Mutex::new(None));

        let (down_events_tx, down_events) = mpsc::channel(1024);
        let (up_events_tx, up_events) = mpsc::channel(1024);
        let mux_down = Mux::spawn(downstream, default_descriptors(), down_events_tx);
        let mux_up = Mux::spawn(upstream, default_descriptors(), up_events_tx);

        let downstream_worker = tokio::spawn(self.clone().direction_loop(
            FlowDirection::Downstream,
            down_events,
            mux_up.clone(),
            cancel_tx.clone(),
            cancel_rx.clone(),
            latched.clone(),
        ));
        let upstream_worker = tokio::spawn(self.clone().direction_loop(
            FlowDirection::Upstream,
            up_events,
            mux_down.clone(),
            cancel_tx.clone(),
            cancel_rx.clone(),
            latched.clone(),
        ));

        let mut cancel_watch = cancel_rx.clone();
        tokio::select! {
            _ = cancel_watch.changed() => {}
            _ = shutdown.changed() => {
                let _ = cancel_tx.send(true);
            }
        }

        mux_down.flush_and_stop().await;
        mux_up.flush_and_stop().await;
        let _ = downstream_worker.await;
        let _ = upstream_worker.await;

        let result = match latched.lock().expect("latch poisoned").take() {
            Some(err) => Err(err),
            None => Ok(()),
        };
        result
    }

    /// Serial processing of one direction. Serialism is what gives the
    /// per-channel FIFO guarantee.
    async fn direction_loop(
        self,
        direction: FlowDirection,
        mut events: mpsc::Receiver<MuxEvent>,
        target: Mux,
        cancel_tx: watch::Sender<bool>,
        mut cancel_rx: watch::Receiver<bool>,
        latched: Arc<Mutex<Option<ProxyError>>>,
    ) {
        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = cancel_rx.changed() => break,
            };
            match event {
                Some(MuxEvent::Frame(frame)) => {
                    self.handle_frame(direction, frame, &target, &mut cancel_rx).await;
                }
                Some(MuxEvent::Closed) => {
                    info!(direction = %direction, "peer closed the connection");
                    break;
                }
                Some(MuxEvent::Error(err)) => {
                    let mut slot = latched.lock().expect("latch poisoned");
                    if slot.is_none() {
                        *slot = Some(ProxyError::Fatal(format!("{direction}: {err}")));
                    }
                    break;
                }
                None => break,
            }
        }
        let _ = cancel_tx.send(true);
    }

    async fn handle_frame(
        &self,
        direction: FlowDirection,
        frame: InboundFrame,
        target: &Mux,
        cancel: &mut watch::Receiver<bool>,
    ) {
        let mutate_here = match direction {
            FlowDirection::Upstream => self.cfg.direction.should_mutate_upstream(),
            FlowDirection::Downstream => self.cfg.direction.should_mutate_downstream(),
        };
        if !mutate_here || !is_consensus_channel(frame.channel_id) {
            self.forward_raw(target, frame.channel_id, frame.payload);
            return;
        }

        if let Err(err) = self.process_consensus(direction, &frame, target, cancel).await {
            warn!(
                direction = %direction,
                channel = format_args!("0x{:02X}", frame.channel_id),
                code = err.code(),
                error = %err,
                "failed to process consensus frame, forwarding raw"
            );
            self.forward_raw(target, frame.channel_id, frame.payload);
        }
    }

    /// The decode -> trigger -> hooks -> mutate -> re-encode pipeline.
    ///
    /// `Ok` means the frame reached a terminal outcome (forwarded, dropped
    /// or mutated); `Err` means the caller must forward it raw.
    async fn process_consensus(
        &self,
        direction: FlowDirection,
        frame: &InboundFrame,
        target: &Mux,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), CodecError> {
        let envelope = decode_envelope(&frame.payload)?;
        let raw = match envelope_to_raw(&envelope, &self.cfg.chain_id) {
            Ok(raw) => raw,
            Err(CodecError::UnsupportedMessage) => {
                self.forward_raw(target, frame.channel_id, frame.payload.clone());
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        let canonical = self.adapter.to_canonical(&raw)?;

        if !self.cfg.trigger.matches(&canonical) {
            self.forward_raw(target, frame.channel_id, frame.payload.clone());
            return Ok(());
        }

        if !self.cfg.hooks.delay.is_zero() {
            self.metrics.inc_delayed();
            tokio::select! {
                _ = tokio::time::sleep(self.cfg.hooks.delay) => {}
                // Cancellation aborts the sleep with no partial sends.
                _ = cancel.changed() => return Ok(()),
            }
        }

        if self.cfg.hooks.drop {
            self.metrics.inc_dropped();
            info!(
                direction = %direction,
                channel = format_args!("0x{:02X}", frame.channel_id),
                height = %canonical.height_dec(),
                round = %canonical.round_dec(),
                msg_type = %canonical.msg_type,
                "dropped consensus message"
            );
            return Ok(());
        }

        let outputs = self.apply_byzantine_action(&canonical)?;

        let mut sent: u64 = 0;
        let mut duplicates: u64 = 0;
        for output in &outputs {
            let raw_out = self.adapter.from_canonical(output)?;
            let bytes = raw_to_frame(&raw_out)?;
            self.forward_raw(target, frame.channel_id, bytes.clone());
            sent += 1;
            if self.cfg.hooks.duplicate {
                self.forward_raw(target, frame.channel_id, bytes);
                sent += 1;
                duplicates += 1;
            }
        }

        self.metrics.inc_mutated(sent);
        self.metrics.inc_duplicated(duplicates);

        info!(
            direction = %direction,
            channel = format_args!("0x{:02X}", frame.channel_id),
            height = %canonical.height_dec(),
            round = %canonical.round_dec(),
            msg_type = %canonical.msg_type,
            action = %self.cfg.action,
            count = sent,
            duplicates = duplicates,
            "mutated consensus message"
        );

        Ok(())
    }

    fn apply_byzantine_action(
        &self,
        canonical: &CanonicalMessage,
    ) -> Result<Vec<CanonicalMessage>, CodecError> {
        if self.cfg.action == ByzantineAction::None {
            return Ok(vec![canonical.clone()]);
        }
        apply_action(canonical, self.cfg.action, &self.cfg.options)
    }

    fn forward_raw(&self, target: &Mux, channel_id: u8, payload: Vec<u8>) {
        if !target.send(channel_id, payload) {
            warn!(
                channel = format_args!("0x{channel_id:02X}"),
                "failed to forward frame, send queue unavailable"
            );
        }
    }
}
