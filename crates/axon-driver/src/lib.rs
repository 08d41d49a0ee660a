//! Host-side driver for a chain of self-describing hardware modules
//!
//! The driver splits into three actors: a transport worker pumping raw
//! bytes over the serial link, a single-consumer executor owning all
//! protocol state, and the [`Bus`] facade the application holds.
//! Everything the facade exposes is a cheap clone of the snapshot the
//! executor publishes after each tick.

pub mod bus;
pub mod config;
mod executor;
mod worker;

pub use bus::{Bus, BusOptions, DriverError};
pub use config::{load_config, ConnMode, DriverConfig};
pub use executor::DriverSnapshot;
