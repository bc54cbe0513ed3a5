//! Domain logic for the device simulator.
//!
//! Everything here is free of database and network dependencies. The only
//! I/O performed by this crate is the Python sandbox subprocess used by
//! [`payload::python`].

pub mod device;
pub mod error;
pub mod payload;
pub mod target_system;
pub mod types;
