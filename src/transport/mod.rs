//! Outbound message delivery over a long-lived connection.
//!
//! All writes to a [`Connection`] go through one [`WriterPipeline`], which
//! serializes them in submission order. [`Transport`] owns the pipeline and
//! handles closing the connection.

pub mod connection;
pub mod lifecycle;
pub mod message;
pub mod pipeline;
pub mod writer;

pub use connection::{ChannelConnection, CloseStatus, Connection, ConnectionState, Frame, OutputStream};
pub use lifecycle::{spawn_keep_alive, Transport, CLOSE_REASON};
pub use message::{MessageType, OperationMessage};
pub use pipeline::{PipelineState, PipelineStats, WriterPipeline};
pub use writer::{DocumentWriter, JsonDocumentWriter};
