//! Board-agnostic core of the Pulsetrain waveform engine
//!
//! Everything here is independent of concrete timing hardware and runs in
//! host tests against a simulated backend:
//!
//! - Clock divider / resolution negotiation
//! - Channel configuration and state machine
//! - Lane arbitration across logical channels
//! - The transfer engine (transmit, capture, completion handling)
//! - Status, capability and statistics reporting
//! - Completion hand-off types for async consumers

#![no_std]
#![deny(unsafe_code)]

pub mod arbiter;
pub mod channel;
pub mod clock;
pub mod engine;
pub mod error;
pub mod notify;
pub mod stats;

pub use channel::{ChannelConfig, ChannelStatus, Polarity};
pub use engine::{PulseEngine, SymbolBuffer, MAX_BUFFER_SYMBOLS, MAX_CHANNELS};
pub use error::PulseError;
pub use stats::Statistics;

// The HAL this engine drives, re-exported for downstream crates
pub use pulsetrain_hal as hal;
