//! flurry: a partitioned streaming object writer.
//!
//! Records are routed to one output stream per topic partition and persisted
//! as (optionally compressed) objects in S3-compatible storage, with object
//! keys rendered from templates over record metadata.
//!
//! # Example
//!
//! ```ignore
//! use flurry::{PartitionKey, Record, StreamWriter, WriterConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = WriterConfig::from_file("flurry.yaml")?;
//!     let mut writer = StreamWriter::new(&config).await?;
//!
//!     let partition = PartitionKey::new("orders", 0);
//!     writer.write(&partition, &Record::new("orders", 0, 10, "payload")).await?;
//!     writer.close_all().await?;
//!     Ok(())
//! }
//! ```

pub mod compression;
pub mod config;
pub mod error;
pub mod format;
pub mod metrics;
pub mod record;
pub mod registry;
pub mod storage;
pub mod template;
pub mod writer;

// Re-export main types
pub use compression::CompressionKind;
pub use config::WriterConfig;
pub use record::{PartitionKey, Record};
pub use registry::ClosedObject;
pub use storage::StorageProvider;
pub use writer::StreamWriter;
