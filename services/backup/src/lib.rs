//! Biofield Backup Service
//!
//! Bridges sensor data published over MQTT into S3-compatible object storage.
//! Each message on `{root}/{device}/{sensor}` carries a MessagePack envelope
//! with sensor metadata and a raw payload; both are written under a
//! minute-partitioned key so the bucket can be browsed by device, sensor and
//! time.
//!
//! ## Architecture
//!
//! ```text
//! MQTT Broker              Backup Service                     S3 / MinIO
//! ┌──────────────┐        ┌──────────────┐                   ┌──────────────────┐
//! │ {root}/+/+   │───────▶│ Intake       │                   │ {device}/        │
//! └──────────────┘        │ Listener     │◀── Supervisor     │   {sensor}/      │
//!                         └──────────────┘    (backoff)      │   {YYYY}/{MM}/   │
//!                                │                           │   {DD}/{HH}-{mm}/│
//!                                ▼                           │     metadata.json│
//!                         ┌──────────────┐   ┌────────────┐  │     data.h5      │
//!                         │ Backup       │──▶│ Placement  │─▶│                  │
//!                         │ Handler      │   │ Writer     │  └──────────────────┘
//!                         └──────────────┘   └────────────┘
//! ```
//!
//! Messages are processed strictly in order by one listener task. Per-message
//! failures are classified (see [`error::Disposition`]), logged and counted;
//! they never stop the listener.

pub mod api;
pub mod config;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod listener;
pub mod placement;
pub mod store;
pub mod supervisor;
pub mod topic;

pub use config::{CollisionPolicy, Config};
pub use envelope::Envelope;
pub use error::{Disposition, ProcessError};
pub use handler::BackupHandler;
pub use listener::{ConnectionState, IntakeListener, ListenerError};
pub use placement::{base_path, ObjectPlacementWriter, Placement};
pub use store::{BucketStatus, MemoryObjectStore, ObjectStore, S3ObjectStore, StoreError};
pub use supervisor::spawn_supervised_listener;
pub use topic::{TopicError, TopicIdentity};
