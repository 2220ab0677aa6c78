use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::{
    error::{EbikeError, Result},
    gatt::{CharacteristicUpdate, Rebroadcaster},
    protocol::FrameDecoder,
    stats::MessageStats,
    status::{BatteryAlert, StatusAggregator, StatusUpdate},
    types::{BikeStatus, SessionConfig},
};

/// Events delivered by the transport collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Link to the bike established
    Connected,
    /// Payload of one status characteristic notification
    Notification(Bytes),
    /// Link to the bike lost
    Disconnected,
}

/// Receives everything the session produces
///
/// Implementations typically update UI state, post OS notifications or push
/// values to a GATT server. Errors are logged and do not stop the session.
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// A batch of messages changed the snapshot
    async fn status_changed(&self, update: &StatusUpdate) -> Result<()>;

    /// The battery level changed after a known reading
    async fn battery_alert(&self, alert: &BatteryAlert) -> Result<()>;

    /// A re-broadcast characteristic has a new value
    async fn characteristic_changed(&self, update: &CharacteristicUpdate) -> Result<()>;
}

/// Everything produced by one notification
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutput {
    /// Folded status and summary
    pub update: StatusUpdate,
    /// Characteristic values to notify
    pub characteristics: Vec<CharacteristicUpdate>,
}

/// Counters reported when a session ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionSummary {
    /// Notifications processed
    pub notifications: u64,
    /// Messages decoded
    pub messages: u64,
    /// Disconnects seen
    pub disconnects: u64,
}

/// Decoding session for one bike
///
/// The session owns the snapshot and processes transport events strictly one
/// at a time. Hosts with several callback threads feed it through
/// [`EbikeSession::channel`] or any other single stream.
pub struct EbikeSession {
    decoder: FrameDecoder,
    aggregator: StatusAggregator,
    rebroadcaster: Option<Rebroadcaster>,
    stats: MessageStats,
    status_tx: watch::Sender<BikeStatus>,
    started: Instant,
    summary: SessionSummary,
}

impl EbikeSession {
    /// Create a session
    ///
    /// # Errors
    ///
    /// Returns [`EbikeError::InvalidConfig`] if the profile maps nothing or
    /// the channel capacity is zero.
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.profile.validate()?;
        if config.channel_capacity == 0 {
            return Err(EbikeError::InvalidConfig(
                "channel capacity must be positive".to_string(),
            ));
        }

        info!("Starting session with profile '{}'", config.profile.name);

        let (status_tx, _) = watch::channel(BikeStatus::default());
        Ok(Self {
            decoder: FrameDecoder::new(config.profile.payload_fallback),
            aggregator: StatusAggregator::new(config.profile),
            rebroadcaster: config.rebroadcast.then(Rebroadcaster::new),
            stats: MessageStats::new(),
            status_tx,
            started: Instant::now(),
            summary: SessionSummary::default(),
        })
    }

    /// Bounded channel sized from the config, for hosts that push events
    ///
    /// # Errors
    ///
    /// Returns [`EbikeError::InvalidConfig`] if the capacity is zero.
    pub fn channel(
        config: &SessionConfig,
    ) -> Result<(mpsc::Sender<TransportEvent>, mpsc::Receiver<TransportEvent>)> {
        if config.channel_capacity == 0 {
            return Err(EbikeError::InvalidConfig(
                "channel capacity must be positive".to_string(),
            ));
        }
        Ok(mpsc::channel(config.channel_capacity))
    }

    /// Watch the latest snapshot
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<BikeStatus> {
        self.status_tx.subscribe()
    }

    /// Current snapshot
    #[must_use]
    pub const fn status(&self) -> &BikeStatus {
        self.aggregator.status()
    }

    /// Statistics over all decoded messages
    #[must_use]
    pub const fn stats(&self) -> &MessageStats {
        &self.stats
    }

    /// Counters so far
    #[must_use]
    pub const fn summary(&self) -> SessionSummary {
        self.summary
    }

    /// Decode and fold one notification
    pub fn handle_notification(&mut self, data: &[u8]) -> SessionOutput {
        let messages = self.decoder.decode(data);
        self.stats.record_all(&messages);
        self.summary.notifications += 1;
        self.summary.messages += messages.len() as u64;

        let update = self.aggregator.apply(&messages);
        if update.has_changes() {
            self.status_tx.send_replace(update.status.clone());
        }

        let now_ms = self.elapsed_ms();
        let characteristics = match self.rebroadcaster.as_mut() {
            Some(rebroadcaster) => rebroadcaster.updates_for(&update, now_ms),
            None => Vec::new(),
        };

        SessionOutput {
            update,
            characteristics,
        }
    }

    /// Reset everything tied to the connection
    pub fn handle_disconnect(&mut self) {
        info!("Bike disconnected, resetting status");
        self.summary.disconnects += 1;
        self.reset_connection_state();
    }

    /// Start a new connection from defaults
    ///
    /// A reconnect without a preceding disconnect event must not inherit the
    /// old snapshot or crank state. Watchers are only notified if the
    /// snapshot actually changes.
    pub fn handle_connect(&mut self) {
        info!("Bike connected");
        self.reset_connection_state();
    }

    /// Drain `events` until the stream ends
    ///
    /// # Errors
    ///
    /// Sink failures are logged, not returned; this currently always
    /// succeeds.
    pub async fn run<S, K>(&mut self, mut events: S, sink: &K) -> Result<SessionSummary>
    where
        S: Stream<Item = TransportEvent> + Unpin,
        K: StatusSink + ?Sized,
    {
        while let Some(event) = events.next().await {
            match event {
                TransportEvent::Connected => self.handle_connect(),
                TransportEvent::Notification(data) => {
                    let output = self.handle_notification(&data);
                    Self::deliver(sink, &output).await;
                }
                TransportEvent::Disconnected => self.handle_disconnect(),
            }
        }

        debug!("Event stream ended");
        Ok(self.summary)
    }

    /// Drain a channel receiver until every sender is dropped
    ///
    /// # Errors
    ///
    /// See [`EbikeSession::run`].
    pub async fn run_channel<K>(
        &mut self,
        mut events: mpsc::Receiver<TransportEvent>,
        sink: &K,
    ) -> Result<SessionSummary>
    where
        K: StatusSink + ?Sized,
    {
        let stream = futures::stream::poll_fn(move |cx| events.poll_recv(cx));
        self.run(Box::pin(stream), sink).await
    }

    async fn deliver<K: StatusSink + ?Sized>(sink: &K, output: &SessionOutput) {
        if output.update.has_changes() {
            if let Err(e) = sink.status_changed(&output.update).await {
                Self::log_sink_error("Status sink", &e);
            }
        }
        for alert in &output.update.battery_alerts {
            if let Err(e) = sink.battery_alert(alert).await {
                Self::log_sink_error("Battery alert delivery", &e);
            }
        }
        for characteristic in &output.characteristics {
            if let Err(e) = sink.characteristic_changed(characteristic).await {
                Self::log_sink_error("Characteristic update", &e);
            }
        }
    }

    // The session keeps running either way; only the log level differs.
    fn log_sink_error(what: &str, e: &EbikeError) {
        if e.is_recoverable() {
            warn!("{what} failed: {e}");
        } else {
            error!("{what} failed: {e}");
        }
    }

    fn reset_connection_state(&mut self) {
        self.aggregator.reset();
        if let Some(rebroadcaster) = self.rebroadcaster.as_mut() {
            rebroadcaster.reset();
        }
        self.status_tx.send_if_modified(|status| {
            if *status == BikeStatus::default() {
                return false;
            }
            *status = BikeStatus::default();
            true
        });
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}
