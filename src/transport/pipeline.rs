//! Ordered delivery of outbound messages.
//!
//! A [`WriterPipeline`] is a single-consumer actor: any number of producers
//! submit messages, one worker task writes them to the connection in
//! submission order with at most one write in flight. The worker count is
//! fixed at one because the connection forbids overlapping writes.

use super::connection::{Connection, ConnectionState};
use super::message::OperationMessage;
use super::writer::DocumentWriter;
use crate::error::DeliveryError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Pipeline lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Accepting submissions
    Open,
    /// Completion requested; queued messages are still being written
    Draining,
    /// Queue drained and worker stopped
    Completed,
}

/// Delivery counters.
#[derive(Debug, Default)]
pub struct PipelineStats {
    written: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

impl PipelineStats {
    /// Messages completely written and flushed.
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Messages skipped because the connection had already closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Messages whose serialization, write or flush failed.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Single-writer, ordered outbound message queue for one connection.
pub struct WriterPipeline {
    sender: mpsc::Sender<OperationMessage>,
    state: Arc<watch::Sender<PipelineState>>,
    stats: Arc<PipelineStats>,
}

impl WriterPipeline {
    /// Spawn the worker for `connection`. `capacity` bounds the queue.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        connection: Arc<dyn Connection>,
        writer: Arc<dyn DocumentWriter>,
        capacity: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (state, _) = watch::channel(PipelineState::Open);
        let state = Arc::new(state);
        let stats = Arc::new(PipelineStats::default());

        tokio::spawn(run_worker(
            receiver,
            connection,
            writer,
            state.clone(),
            stats.clone(),
        ));

        Self {
            sender,
            state,
            stats,
        }
    }

    /// Queue `message` without waiting. Returns false when the queue is full
    /// or completion has been requested.
    pub fn post(&self, message: OperationMessage) -> bool {
        debug!(message_id = %message.log_id(), "Message posted to pipeline");
        if !self.is_accepting() {
            return false;
        }
        self.sender.try_send(message).is_ok()
    }

    /// Queue `message`, waiting for room in the queue.
    pub async fn send(&self, message: OperationMessage) -> Result<(), DeliveryError> {
        debug!(message_id = %message.log_id(), "Message sent to pipeline");
        if !self.is_accepting() {
            return Err(DeliveryError::PipelineCompleted);
        }
        let permit = self
            .sender
            .reserve()
            .await
            .map_err(|_| DeliveryError::PipelineCompleted)?;
        // completion may have been requested while waiting for room
        if !self.is_accepting() {
            return Err(DeliveryError::PipelineCompleted);
        }
        permit.send(message);
        Ok(())
    }

    /// Stop accepting messages. Already queued messages are still written.
    /// Calling this more than once has no further effect.
    pub fn complete(&self) {
        let requested = self.state.send_if_modified(|state| {
            if *state == PipelineState::Open {
                *state = PipelineState::Draining;
                true
            } else {
                false
            }
        });
        if requested {
            debug!("Pipeline completion requested");
        }
    }

    /// Resolves once the queue is drained and the worker has stopped.
    pub async fn completion(&self) {
        let mut state = self.state.subscribe();
        let _ = state
            .wait_for(|state| *state == PipelineState::Completed)
            .await;
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    pub fn is_accepting(&self) -> bool {
        self.state() == PipelineState::Open
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<OperationMessage>,
    connection: Arc<dyn Connection>,
    writer: Arc<dyn DocumentWriter>,
    state: Arc<watch::Sender<PipelineState>>,
    stats: Arc<PipelineStats>,
) {
    let mut state_changes = state.subscribe();

    loop {
        tokio::select! {
            biased;
            message = receiver.recv() => match message {
                Some(message) => write_message(&*connection, &*writer, &stats, message).await,
                None => break,
            },
            _ = draining(&mut state_changes) => {
                receiver.close();
                while let Some(message) = receiver.recv().await {
                    write_message(&*connection, &*writer, &stats, message).await;
                }
                break;
            }
        }
    }

    state.send_replace(PipelineState::Completed);
    debug!(
        written = stats.written(),
        dropped = stats.dropped(),
        failed = stats.failed(),
        "Writer pipeline completed"
    );
}

async fn draining(state: &mut watch::Receiver<PipelineState>) {
    let _ = state.wait_for(|state| *state != PipelineState::Open).await;
}

async fn write_message(
    connection: &dyn Connection,
    writer: &dyn DocumentWriter,
    stats: &PipelineStats,
    message: OperationMessage,
) {
    let message_id = message.log_id();

    let state = connection.state();
    let close_status = connection.close_status();
    if state == ConnectionState::Closed || close_status.is_some() {
        stats.dropped.fetch_add(1, Ordering::Relaxed);
        debug!(
            message_id = %message_id,
            ?state,
            ?close_status,
            "Connection closed, message dropped"
        );
        return;
    }

    debug!(message_id = %message_id, "Writing message to connection");
    let mut stream = connection.open_output_stream();
    let written = writer.write(&mut stream, &message).await;
    // the stream is flushed and released whether or not the write succeeded
    let flushed = stream.flush().await;
    drop(stream);

    match (written, flushed) {
        (Ok(()), Ok(())) => {
            stats.written.fetch_add(1, Ordering::Relaxed);
            debug!(message_id = %message_id, "Message completely written to connection");
        }
        (Err(error), _) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            warn!(message_id = %message_id, error = %error, "Failed to write message");
        }
        (Ok(()), Err(error)) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            warn!(message_id = %message_id, error = %error, "Failed to flush message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::connection::{ChannelConnection, CloseStatus, OutputStream};
    use crate::transport::message::MessageType;
    use crate::transport::writer::JsonDocumentWriter;
    use async_trait::async_trait;
    use std::io;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::AsyncWrite;

    /// Connection recording stream lifecycle events and written payloads.
    #[derive(Default)]
    struct RecordingConnection {
        events: Arc<Mutex<Vec<String>>>,
        close_status: Mutex<Option<CloseStatus>>,
        fail_flush: bool,
    }

    impl RecordingConnection {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn payloads(&self) -> Vec<String> {
            self.events()
                .into_iter()
                .filter_map(|e| e.strip_prefix("flush ").map(str::to_string))
                .collect()
        }
    }

    struct RecordingStream {
        events: Arc<Mutex<Vec<String>>>,
        buffer: Vec<u8>,
        fail_flush: bool,
    }

    impl AsyncWrite for RecordingStream {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.get_mut().buffer.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            let this = self.get_mut();
            if this.fail_flush {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone")));
            }
            let text = String::from_utf8_lossy(&this.buffer).to_string();
            this.events.lock().unwrap().push(format!("flush {}", text));
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            self.poll_flush(cx)
        }
    }

    impl Drop for RecordingStream {
        fn drop(&mut self) {
            self.events.lock().unwrap().push("release".to_string());
        }
    }

    #[async_trait]
    impl Connection for RecordingConnection {
        fn state(&self) -> ConnectionState {
            ConnectionState::Open
        }

        fn close_status(&self) -> Option<CloseStatus> {
            *self.close_status.lock().unwrap()
        }

        fn open_output_stream(&self) -> OutputStream {
            self.events.lock().unwrap().push("open".to_string());
            Box::new(RecordingStream {
                events: self.events.clone(),
                buffer: Vec::new(),
                fail_flush: self.fail_flush,
            })
        }

        async fn close(&self, _status: CloseStatus, _reason: &str) -> Result<(), DeliveryError> {
            Ok(())
        }

        fn abort(&self) {}
    }

    /// Writer that is slow for some messages and fails for others.
    struct ScriptedWriter;

    #[async_trait]
    impl DocumentWriter for ScriptedWriter {
        async fn write(
            &self,
            stream: &mut OutputStream,
            message: &OperationMessage,
        ) -> Result<(), DeliveryError> {
            match message.id.as_deref() {
                Some("slow") => tokio::time::sleep(Duration::from_millis(20)).await,
                Some("broken") => {
                    return Err(DeliveryError::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "cannot serialize",
                    )))
                }
                _ => {}
            }
            stream.write_all(message.log_id().as_bytes()).await?;
            Ok(())
        }
    }

    fn message(id: &str) -> OperationMessage {
        OperationMessage::new(MessageType::Data).with_id(id)
    }

    fn pipeline(connection: &Arc<RecordingConnection>, capacity: usize) -> WriterPipeline {
        WriterPipeline::new(connection.clone(), Arc::new(ScriptedWriter), capacity)
    }

    #[tokio::test]
    async fn test_writes_in_submission_order_one_at_a_time() {
        let connection = Arc::new(RecordingConnection::default());
        let pipeline = pipeline(&connection, 16);

        assert!(pipeline.post(message("slow")));
        assert!(pipeline.post(message("b")));
        pipeline.send(message("c")).await.unwrap();
        pipeline.complete();
        pipeline.completion().await;

        assert_eq!(connection.payloads(), ["slow", "b", "c"]);
        assert_eq!(
            connection.events(),
            [
                "open", "flush slow", "release",
                "open", "flush b", "release",
                "open", "flush c", "release",
            ]
        );
        assert_eq!(pipeline.stats().written(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_keep_per_producer_order() {
        let connection = Arc::new(RecordingConnection::default());
        let pipeline = Arc::new(pipeline(&connection, 8));

        let mut producers = Vec::new();
        for producer in 0..4 {
            let pipeline = pipeline.clone();
            producers.push(tokio::spawn(async move {
                for seq in 0..25 {
                    pipeline
                        .send(message(&format!("{}-{}", producer, seq)))
                        .await
                        .unwrap();
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }
        pipeline.complete();
        pipeline.completion().await;

        let payloads = connection.payloads();
        assert_eq!(payloads.len(), 100);
        for producer in 0..4 {
            let prefix = format!("{}-", producer);
            let seqs: Vec<u32> = payloads
                .iter()
                .filter_map(|p| p.strip_prefix(&prefix))
                .map(|s| s.parse().unwrap())
                .collect();
            assert_eq!(seqs, (0..25).collect::<Vec<_>>());
        }

        // no stream is opened before the previous one is released
        let events = connection.events();
        for pair in events.chunks(3) {
            assert_eq!(pair[0], "open");
            assert!(pair[1].starts_with("flush "));
            assert_eq!(pair[2], "release");
        }
    }

    #[tokio::test]
    async fn test_complete_flushes_queue_and_rejects_new_work() {
        let connection = Arc::new(RecordingConnection::default());
        let pipeline = pipeline(&connection, 16);

        assert!(pipeline.post(message("slow")));
        assert!(pipeline.post(message("queued")));
        pipeline.complete();
        pipeline.complete();

        assert!(!pipeline.post(message("late")));
        assert!(matches!(
            pipeline.send(message("late")).await,
            Err(DeliveryError::PipelineCompleted)
        ));
        assert_ne!(pipeline.state(), PipelineState::Open);

        pipeline.completion().await;
        assert_eq!(pipeline.state(), PipelineState::Completed);
        assert_eq!(connection.payloads(), ["slow", "queued"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_waits_for_last_message() {
        let connection = Arc::new(RecordingConnection::default());
        let pipeline = pipeline(&connection, 16);

        pipeline.post(message("slow"));
        pipeline.complete();
        let waited = tokio::time::timeout(Duration::from_millis(5), pipeline.completion()).await;
        assert!(waited.is_err());

        pipeline.completion().await;
        assert_eq!(connection.payloads(), ["slow"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_fails_when_queue_is_full() {
        let connection = Arc::new(RecordingConnection::default());
        let pipeline = pipeline(&connection, 1);

        // the worker picks up the first message and sleeps inside the write
        assert!(pipeline.post(message("slow")));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(pipeline.post(message("queued")));
        assert!(!pipeline.post(message("overflow")));

        pipeline.complete();
        pipeline.completion().await;
        assert_eq!(connection.payloads(), ["slow", "queued"]);
    }

    #[tokio::test]
    async fn test_messages_after_close_are_dropped_silently() {
        let connection = Arc::new(RecordingConnection::default());
        *connection.close_status.lock().unwrap() = Some(CloseStatus::NormalClosure);
        let pipeline = pipeline(&connection, 16);

        assert!(pipeline.post(message("a")));
        pipeline.send(message("b")).await.unwrap();
        pipeline.complete();
        pipeline.completion().await;

        assert!(connection.events().is_empty());
        assert_eq!(pipeline.stats().dropped(), 2);
        assert_eq!(pipeline.stats().written(), 0);
    }

    #[tokio::test]
    async fn test_messages_after_abort_are_dropped_silently() {
        let (connection, mut frames) = ChannelConnection::new();
        connection.abort();
        assert!(connection.close_status().is_none());
        let pipeline = WriterPipeline::new(
            Arc::new(connection.clone()),
            Arc::new(JsonDocumentWriter),
            16,
        );

        assert!(pipeline.post(OperationMessage::complete("1")));
        pipeline.complete();
        pipeline.completion().await;

        assert_eq!(pipeline.stats().dropped(), 1);
        assert_eq!(pipeline.stats().failed(), 0);
        assert_eq!(pipeline.stats().written(), 0);
        assert!(frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_write_failure_does_not_stop_worker() {
        let connection = Arc::new(RecordingConnection::default());
        let pipeline = pipeline(&connection, 16);

        pipeline.post(message("a"));
        pipeline.post(message("broken"));
        pipeline.post(message("c"));
        pipeline.complete();
        pipeline.completion().await;

        // the failed message still had its stream flushed and released
        assert_eq!(connection.payloads(), ["a", "", "c"]);
        assert_eq!(
            connection.events().iter().filter(|e| *e == "release").count(),
            3
        );
        assert_eq!(pipeline.stats().failed(), 1);
        assert_eq!(pipeline.stats().written(), 2);
    }

    #[tokio::test]
    async fn test_flush_failure_is_counted() {
        let connection = Arc::new(RecordingConnection {
            fail_flush: true,
            ..Default::default()
        });
        let pipeline = pipeline(&connection, 16);

        pipeline.post(message("a"));
        pipeline.post(message("b"));
        pipeline.complete();
        pipeline.completion().await;

        assert_eq!(pipeline.stats().failed(), 2);
        assert_eq!(connection.events(), ["open", "release", "open", "release"]);
    }

    #[tokio::test]
    async fn test_json_writer_through_pipeline() {
        let connection = Arc::new(RecordingConnection::default());
        let pipeline = WriterPipeline::new(connection.clone(), Arc::new(JsonDocumentWriter), 4);

        pipeline.post(OperationMessage::complete("9"));
        pipeline.complete();
        pipeline.completion().await;

        assert_eq!(connection.payloads(), [r#"{"id":"9","type":"complete"}"#]);
    }
}
