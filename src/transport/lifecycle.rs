//! Connection lifecycle: pairs a connection with its writer pipeline and
//! coordinates their shutdown.

use super::connection::{CloseStatus, Connection, ConnectionState};
use super::message::OperationMessage;
use super::pipeline::WriterPipeline;
use super::writer::DocumentWriter;
use crate::config::PipelineConfig;
use crate::error::DeliveryError;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Reason sent with a graceful close.
pub const CLOSE_REASON: &str = "Closed";

/// A duplex connection and the pipeline that owns its write path.
pub struct Transport {
    connection: Arc<dyn Connection>,
    writer: Arc<WriterPipeline>,
    keep_alive: Option<JoinHandle<()>>,
}

impl Transport {
    /// Create the transport and its writer pipeline. Starts keep-alive
    /// messages when the configuration sets an interval.
    pub fn new(
        connection: Arc<dyn Connection>,
        document_writer: Arc<dyn DocumentWriter>,
        config: &PipelineConfig,
    ) -> Self {
        let writer = Arc::new(WriterPipeline::new(
            connection.clone(),
            document_writer,
            config.capacity,
        ));
        let mut transport = Self {
            connection,
            writer,
            keep_alive: None,
        };
        if let Some(interval) = config.keep_alive_interval() {
            transport.start_keep_alive(interval);
        }
        transport
    }

    /// Post keep-alive messages every `interval`, replacing any running
    /// keep-alive task.
    pub fn start_keep_alive(&mut self, interval: Duration) {
        if let Some(previous) = self.keep_alive.take() {
            previous.abort();
        }
        self.keep_alive = Some(spawn_keep_alive(self.writer.clone(), interval));
    }

    pub fn writer(&self) -> &Arc<WriterPipeline> {
        &self.writer
    }

    pub fn close_status(&self) -> Option<CloseStatus> {
        self.connection.close_status()
    }

    /// Close the connection.
    ///
    /// Does nothing unless the connection is open. A connection that already
    /// reported an abnormal close status is aborted instead of going through
    /// a close handshake. Queued messages are not drained; see
    /// [`Transport::shutdown`].
    pub async fn close(&self) -> Result<(), DeliveryError> {
        if self.connection.state() != ConnectionState::Open {
            return Ok(());
        }

        match self.connection.close_status() {
            Some(status) if !status.is_normal() => {
                warn!(code = status.code(), "Aborting connection in error state");
                self.connection.abort();
                Ok(())
            }
            _ => {
                self.connection
                    .close(CloseStatus::NormalClosure, CLOSE_REASON)
                    .await
            }
        }
    }

    /// Stop keep-alives, drain the writer pipeline, then close the connection.
    pub async fn shutdown(&self) -> Result<(), DeliveryError> {
        if let Some(keep_alive) = &self.keep_alive {
            keep_alive.abort();
        }
        self.writer.complete();
        self.writer.completion().await;
        info!(
            written = self.writer.stats().written(),
            dropped = self.writer.stats().dropped(),
            failed = self.writer.stats().failed(),
            "Transport drained"
        );
        self.close().await
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(keep_alive) = &self.keep_alive {
            keep_alive.abort();
        }
    }
}

/// Post a keep-alive message every `interval` until the pipeline stops
/// accepting messages. Ticks that find the queue full are skipped.
pub fn spawn_keep_alive(writer: Arc<WriterPipeline>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if !writer.is_accepting() {
                break;
            }
            if !writer.post(OperationMessage::keep_alive()) {
                debug!("Keep-alive skipped, queue full");
            }
        }
        debug!("Keep-alive stopped");
    })
}
