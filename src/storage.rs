//! Chunk byte storage.
//!
//! The engine never touches item bytes directly; it goes through a
//! [`ChunkStore`], which writes chunks at their offsets, reads them back to
//! serve other peers, and hashes the whole item to validate an assembly.
//!
//! # Components
//!
//! - [`ChunkStore`] - Storage interface consumed by the engine
//! - [`MemoryStore`] - In-memory store
//! - [`FileStore`] - Single-file store on disk
//! - [`ItemChecksum`] - SHA-256 content identity of an item
//!
//! # Examples
//!
//! ```
//! use dswarm::storage::{ChunkStore, ItemChecksum, MemoryStore};
//! use bytes::Bytes;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryStore::with_len(8);
//! store.write_at(4, Bytes::from_static(b"tail")).await?;
//! store.write_at(0, Bytes::from_static(b"head")).await?;
//!
//! assert_eq!(store.content_hash().await?, ItemChecksum::of(b"headtail"));
//! # Ok(())
//! # }
//! ```

mod checksum;
mod error;
mod file;
mod memory;
mod store;

pub use checksum::ItemChecksum;
pub use error::StorageError;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::ChunkStore;
