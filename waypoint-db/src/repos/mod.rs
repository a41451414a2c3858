//! Repository modules for database operations

pub mod events;
pub mod settings;
pub mod snapshots;

pub use events::EventRepository;
pub use settings::SettingsRepository;
pub use snapshots::SnapshotRepository;
