pub mod cache;
pub mod memory;
pub mod mirror;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod traits;

pub use cache::LocalCache;
pub use memory::MemoryMirror;
pub use mirror::DurableMirror;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteMirror;
pub use traits::MirrorBackend;
