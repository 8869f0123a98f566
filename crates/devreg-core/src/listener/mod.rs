//! Event-driven home association mutator
//!
//! The AssociationListener consumes home association notifications delivered in
//! batches and applies each one through [`MutationEngine::update_home_association`].
//!
//! ## Event Flow
//!
//! 1. Decode the message body into an [`AssociationEvent`]
//! 2. Call the engine with `deviceId` and `homeId`
//! 3. Record success or failure for that message only
//! 4. Report the failed message ids so the delivery mechanism can redeliver
//!    just those
//!
//! Messages are processed one at a time in delivery order. There is no retry
//! inside the listener; redelivery is the caller's decision, guided by
//! [`MessageFailure::retryable`].

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::config::ListenerConfig;
use crate::engine::MutationEngine;
use crate::error::{Error, Layer, Result};

/// Home association change notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationEvent {
    pub device_id: String,
    pub home_id: String,
    /// Free-form label from the producer; logged, never interpreted
    #[serde(default)]
    pub action: String,
}

/// One message as handed over by the delivery mechanism
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredMessage {
    pub message_id: String,
    pub body: String,
}

impl DeliveredMessage {
    pub fn new(message_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            body: body.into(),
        }
    }
}

/// A message that could not be applied
#[derive(Debug)]
pub struct MessageFailure {
    pub message_id: String,
    pub error: Error,
}

impl MessageFailure {
    /// Whether redelivering this message may succeed
    pub fn retryable(&self) -> bool {
        self.error.is_retryable()
    }
}

/// Outcome of one batch
#[derive(Debug, Default)]
pub struct BatchReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failures: Vec<MessageFailure>,
}

impl BatchReport {
    /// Ids of every message that failed
    pub fn failed_message_ids(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.message_id.as_str()).collect()
    }

    /// Ids of the failed messages worth redelivering
    pub fn retryable_message_ids(&self) -> Vec<&str> {
        self.failures
            .iter()
            .filter(|f| f.retryable())
            .map(|f| f.message_id.as_str())
            .collect()
    }

    pub fn is_complete_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Totals over the lifetime of one [`AssociationListener::run`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub batches: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl RunSummary {
    fn record(&mut self, report: &BatchReport) {
        self.batches += 1;
        self.processed += report.processed;
        self.succeeded += report.succeeded;
        self.failed += report.failures.len();
    }
}

/// Events emitted by the AssociationListener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    /// Listener started consuming
    Started,

    /// A home association was applied
    MessageApplied {
        message_id: String,
        device_id: String,
        home_id: String,
    },

    /// A message could not be applied
    MessageFailed {
        message_id: String,
        error: String,
        retryable: bool,
    },

    /// A batch finished
    BatchCompleted { processed: usize, failed: usize },

    /// Listener stopped consuming
    Stopped { reason: String },
}

/// Consumer of home association notifications
///
/// ## Lifecycle
///
/// 1. Create with [`AssociationListener::new()`]
/// 2. Either call [`process_batch`](AssociationListener::process_batch) per
///    delivery, or hand a stream of batches to
///    [`run`](AssociationListener::run)
/// 3. `run` returns when the stream ends or the shutdown signal fires
#[derive(Clone)]
pub struct AssociationListener {
    engine: MutationEngine,
    event_tx: mpsc::Sender<ListenerEvent>,
}

impl AssociationListener {
    /// Create a listener and the receiving end of its event channel
    pub fn new(
        engine: MutationEngine,
        config: ListenerConfig,
    ) -> Result<(Self, mpsc::Receiver<ListenerEvent>)> {
        config.validate()?;
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
        Ok((Self { engine, event_tx }, event_rx))
    }

    /// Decode and apply a single message body
    pub async fn process_message(&self, body: &str) -> Result<AssociationEvent> {
        let event: AssociationEvent = serde_json::from_str(body).map_err(|e| {
            Error::invalid(format!("association event is malformed: {e}"))
                .tagged(Layer::Listener, "decode")
        })?;

        debug!(
            device_id = %event.device_id,
            home_id = %event.home_id,
            action = %event.action,
            "applying home association"
        );

        self.engine
            .update_home_association(&event.device_id, &event.home_id)
            .await
            .map_err(|e| e.tagged(Layer::Listener, "process_message"))?;

        Ok(event)
    }

    /// Apply every message of a batch in order
    ///
    /// A failing message is recorded in the report and processing moves on to
    /// the next one.
    pub async fn process_batch(&self, messages: &[DeliveredMessage]) -> BatchReport {
        let mut report = BatchReport::default();

        for message in messages {
            report.processed += 1;
            match self.process_message(&message.body).await {
                Ok(event) => {
                    report.succeeded += 1;
                    self.emit_event(ListenerEvent::MessageApplied {
                        message_id: message.message_id.clone(),
                        device_id: event.device_id,
                        home_id: event.home_id,
                    });
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    if retryable {
                        warn!(message_id = %message.message_id, error = %e, "message failed, redelivery may succeed");
                    } else {
                        error!(message_id = %message.message_id, error = %e, "message failed permanently");
                    }
                    self.emit_event(ListenerEvent::MessageFailed {
                        message_id: message.message_id.clone(),
                        error: e.to_string(),
                        retryable,
                    });
                    report.failures.push(MessageFailure {
                        message_id: message.message_id.clone(),
                        error: e,
                    });
                }
            }
        }

        self.emit_event(ListenerEvent::BatchCompleted {
            processed: report.processed,
            failed: report.failures.len(),
        });
        report
    }

    /// Consume batches until the stream ends or `shutdown` fires
    ///
    /// A dropped shutdown sender counts as a shutdown signal. A batch already
    /// in progress is finished before the signal is observed.
    pub async fn run<S>(&self, batches: S, mut shutdown: oneshot::Receiver<()>) -> Result<RunSummary>
    where
        S: Stream<Item = Vec<DeliveredMessage>> + Send,
    {
        self.emit_event(ListenerEvent::Started);
        info!("association listener started");

        tokio::pin!(batches);
        let mut summary = RunSummary::default();

        let reason = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break "shutdown signal";
                }

                batch = batches.next() => {
                    let Some(batch) = batch else {
                        break "stream ended";
                    };
                    let report = self.process_batch(&batch).await;
                    if !report.is_complete_success() {
                        warn!(
                            processed = report.processed,
                            failed = report.failures.len(),
                            retryable = report.retryable_message_ids().len(),
                            "batch completed with failures"
                        );
                    }
                    summary.record(&report);
                }
            }
        };

        self.emit_event(ListenerEvent::Stopped {
            reason: reason.to_string(),
        });
        info!(
            reason,
            batches = summary.batches,
            processed = summary.processed,
            failed = summary.failed,
            "association listener stopped"
        );
        Ok(summary)
    }

    fn emit_event(&self, event: ListenerEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Event receiver dropped, discarding event");
            }
        }
    }
}
