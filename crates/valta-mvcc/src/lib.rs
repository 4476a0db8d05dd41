//! Multi-version in-memory storage for sensor streams.
//!
//! Two layers: [`VersionStore`] is the per-key ordered index over immutable
//! messages (sorted by creation time, floor/ceiling lookup plus neighbor
//! traversal), and [`Memtable`] maps stream keys to their stores and turns
//! a point-in-time read into an OK / ODV / HOLE / NOTFOUND classification.
//!
//! Messages are never modified or removed here; archival and compaction are
//! extension points that must preserve reference stability for live queries.

pub mod memtable;
pub mod version_store;

pub use memtable::Memtable;
pub use version_store::VersionStore;
