//! Bridge from an EtherNet/IP field device to an OPC UA server.
//!
//! The bridge polls the device's input assembly, decodes the configured
//! float channels and status words, and writes them to OPC UA nodes. A
//! watchdog flag on the server is toggled after every published cycle.
//!
//! # Slots
//!
//! ```text
//! AI1 = bytes 0..=3, AI2 = bytes 4..=7, ..., AI<n> = bytes 4(n-1)..=4n-1
//! ```
//!
//! Protocol engines are plugged in through [`device::DeviceClient`] and
//! [`server::ServerClient`]; [`sim`] provides in-process implementations.

pub mod bridge;
pub mod channels;
pub mod config;
pub mod decoder;
pub mod device;
pub mod eds;
pub mod health;
pub mod offsets;
pub mod server;
pub mod sim;
