//! 产物层：两层存储（Ephemeral / Durable）与 Durable 持久化后端

pub mod persistence;
pub mod store;

pub use persistence::{sanitize_thread_id, DurablePersistence, FilePersistence, InMemoryPersistence};
pub use store::{
    apply_edit, normalize_path, Artifact, ArtifactStore, EditOutcome, Tier, FINAL_REPORT_PATH,
};
