use super::connection::OutputStream;
use super::message::OperationMessage;
use crate::error::DeliveryError;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

/// Serializes a message onto an output stream.
///
/// Implementations write the whole message and leave flushing to the caller.
#[async_trait]
pub trait DocumentWriter: Send + Sync {
    async fn write(
        &self,
        stream: &mut OutputStream,
        message: &OperationMessage,
    ) -> Result<(), DeliveryError>;
}

/// Writes messages as compact JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDocumentWriter;

#[async_trait]
impl DocumentWriter for JsonDocumentWriter {
    async fn write(
        &self,
        stream: &mut OutputStream,
        message: &OperationMessage,
    ) -> Result<(), DeliveryError> {
        let encoded = serde_json::to_vec(message)?;
        stream.write_all(&encoded).await?;
        Ok(())
    }
}
