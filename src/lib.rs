/// The round-to-round bracket state machine: preview, idempotent confirm and
/// time-boxed revert.
pub mod advance;
/// The HTTP and socket.io surface.
pub mod api;
/// Admin override for disputed (or any) matches.
pub mod dispute;
/// The crate's domain error taxonomy.
pub mod error;
/// Outbound domain events consumed by delivery collaborators.
pub mod events;
/// Live participant presence from periodic heartbeats.
pub mod presence;
/// Turns independent score submissions into an authoritative match result.
pub mod reconcile;
/// Traits and types used for interacting with the database.
pub mod store;

pub use error::Error;

/// A thread-safe error type for infrastructure faults (storage, transport).
///
/// Domain failures use [`Error`] instead so callers get a machine-readable kind.
pub type AppError = anyhow::Error;
