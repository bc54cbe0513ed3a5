//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods
//! that accept `&SqlitePool` as the first argument.

pub mod device_repo;
pub mod payload_repo;
pub mod project_repo;
pub mod target_system_repo;

pub use device_repo::DeviceRepo;
pub use payload_repo::PayloadRepo;
pub use project_repo::ProjectRepo;
pub use target_system_repo::TargetSystemRepo;
