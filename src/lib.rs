#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # Ebikers 🚲
//!
//! A Rust library for decoding the status broadcast of Bosch eBike drive units
//! and re-encoding it as standard Bluetooth fitness characteristics.
//!
//! The drive unit exposes a notify characteristic
//! ([`gatt::BOSCH_STATUS_CHAR_UUID`]) whose payloads carry small framed
//! messages: a `0x30` marker, a length byte, a big-endian message ID and an
//! optional varint value. This crate turns those payloads into one coherent
//! [`BikeStatus`] snapshot.
//!
//! ## Layers
//!
//! - [`protocol`]: frame and varint decoding, tolerant of noise and
//!   truncation
//! - [`status`]: message ID table, unit conversion and the snapshot fold
//! - [`gatt`]: Cycling Power, CSC and eBike characteristic encoders
//! - `session` (feature `tokio`): single-consumer actor wiring a transport
//!   event stream to a `StatusSink`
//! - [`replay`] and [`stats`]: captured logs and per-ID statistics
//!
//! Bluetooth transport, scanning and OS notifications are left to the host.
//!
//! ## Quick Start
//!
//! ```
//! use ebikers::{decode, StatusAggregator, FirmwareProfile};
//!
//! let mut aggregator = StatusAggregator::new(FirmwareProfile::standard());
//!
//! // cadence frame: id 0x985A, varint 10 (half-RPM)
//! let update = aggregator.apply(&decode(&[0x30, 0x04, 0x98, 0x5A, 0x08, 0x0A]));
//!
//! assert_eq!(update.status.cadence, 5);
//! assert_eq!(update.summary, "Cadence: 5 RPM");
//! ```

/// Error types and handling
pub mod error;
/// Standard characteristic encoders for re-broadcast
pub mod gatt;
/// Frame and varint decoding
pub mod protocol;
/// Capture file parsing
pub mod replay;
/// Event loop connecting transport, core and collaborators
#[cfg(feature = "tokio")]
pub mod session;
/// Per-ID message statistics
pub mod stats;
/// Snapshot aggregation
pub mod status;
/// Type definitions and data structures
pub mod types;

// Re-export the main types for convenient usage
pub use error::{EbikeError, Result};
pub use gatt::{
    encode_assist, encode_battery, encode_power, encode_power_feature, encode_speed_cadence,
    Characteristic, CharacteristicUpdate, CscState, Rebroadcaster,
};
pub use protocol::{decode, decode_varint, FrameDecoder, Message};
pub use replay::MessageRecord;
#[cfg(feature = "tokio")]
pub use session::{EbikeSession, StatusSink, TransportEvent};
pub use stats::MessageStats;
pub use status::{apply, BatteryAlert, StatusAggregator, StatusUpdate};
pub use types::{
    AssistMode, BikeStatus, Field, FirmwareProfile, PayloadFallback, SessionConfig,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
