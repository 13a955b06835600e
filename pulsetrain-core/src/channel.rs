//! Channel configuration and state machine
//!
//! A channel binds one pin, a direction, a negotiated resolution and an
//! idle level to a leased hardware lane. All transfer behavior is a
//! function of the channel's phase; the phase moves only through the
//! transitions here.

use pulsetrain_hal::{Direction, LaneId, Level};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::clock::TickClock;
use crate::engine::{ErrorCallback, ReceiveCallback, SymbolBuffer, TransmitCallback};
use crate::error::PulseError;

/// Signal polarity of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Polarity {
    /// Symbols are driven as given
    #[default]
    Normal,
    /// Every symbol level is flipped on the wire, in both directions
    Inverted,
}

/// Channel configuration
///
/// Immutable while the channel is configured; changing anything requires
/// releasing the channel (legal only while idle) and configuring it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChannelConfig {
    /// GPIO pin carrying the waveform
    pub pin: u8,
    /// Transfer direction
    pub direction: Direction,
    /// Requested tick period in nanoseconds; the achieved period is
    /// negotiated and may differ by up to one divider step
    pub resolution_ns: u32,
    /// Signal polarity
    pub polarity: Polarity,
    /// Level the pin rests at between transfers
    pub idle_state: Level,
    /// Bound on blocking completion waits, in microseconds (0 = unbounded)
    pub timeout_us: u32,
    /// Capture capacity in symbols
    pub buffer_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            pin: 0,
            direction: Direction::Transmit,
            resolution_ns: 1_000, // 1 µs
            polarity: Polarity::Normal,
            idle_state: Level::Low,
            timeout_us: 10_000,
            buffer_capacity: 64,
        }
    }
}

/// Channel phase
///
/// ```text
/// Unconfigured ──configure──▶ Idle ◀──────────────┐
///       ▲                      │                  │
///       │                  transmit /         completion,
///    release              start_receive       timeout, stop
///       │                      ▼                  │
///       └───────────── Transmitting/Receiving ────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    /// No lane bound; the initial state
    #[default]
    Unconfigured,
    /// Configured and resting between transfers
    Idle,
    /// Symbol playback in flight
    Transmitting,
    /// Capture armed
    Receiving,
}

impl Phase {
    /// Check if a transfer is in flight
    pub fn is_busy(self) -> bool {
        matches!(self, Phase::Transmitting | Phase::Receiving)
    }

    /// Check if the channel holds a lane lease
    pub fn is_configured(self) -> bool {
        !matches!(self, Phase::Unconfigured)
    }
}

/// Read-only snapshot of a channel's live state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelStatus {
    /// A lane is leased and the configuration applied
    pub is_configured: bool,
    /// A transfer is in flight
    pub is_busy: bool,
    /// The in-flight transfer is a transmission
    pub is_transmitting: bool,
    /// The in-flight transfer is a capture
    pub is_receiving: bool,
    /// Symbols handed to the hardware by the current/last transfer
    pub symbols_queued: usize,
    /// Symbols completed by the current/last transfer
    pub symbols_processed: usize,
    /// Most recent error on this channel, if any
    pub last_error: Option<PulseError>,
    /// Timestamp of the last activity, in backend microseconds
    pub last_activity_us: u64,
}

/// Per-channel runtime state, owned by the engine
///
/// Mutated only by the thread issuing calls on the channel or by the
/// completion handler, never both at once: the busy phase is the
/// single-writer gate.
pub(crate) struct ChannelSlot {
    pub config: ChannelConfig,
    pub phase: Phase,
    /// Negotiated tick clock, present while configured
    pub clock: Option<TickClock>,
    /// Leased hardware lane, present while configured
    pub lane: Option<LaneId>,
    pub symbols_queued: usize,
    pub symbols_processed: usize,
    pub last_error: Option<PulseError>,
    pub last_activity_us: u64,
    /// When the in-flight transfer was armed
    pub started_us: u64,
    /// Capture storage; contents owned by the engine until handed back
    pub capture: SymbolBuffer,
    /// Symbol capacity the current/last capture was armed with
    pub capture_capacity: usize,
    pub on_transmit: Option<TransmitCallback>,
    pub on_receive: Option<ReceiveCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl Default for ChannelSlot {
    fn default() -> Self {
        Self {
            config: ChannelConfig::default(),
            phase: Phase::Unconfigured,
            clock: None,
            lane: None,
            symbols_queued: 0,
            symbols_processed: 0,
            last_error: None,
            last_activity_us: 0,
            started_us: 0,
            capture: SymbolBuffer::new(),
            capture_capacity: 0,
            on_transmit: None,
            on_receive: None,
            on_error: None,
        }
    }
}

impl ChannelSlot {
    /// Enter the configured state with a fresh lease
    pub fn configure(&mut self, config: ChannelConfig, clock: TickClock, lane: LaneId, now_us: u64) {
        self.config = config;
        self.phase = Phase::Idle;
        self.clock = Some(clock);
        self.lane = Some(lane);
        self.symbols_queued = 0;
        self.symbols_processed = 0;
        self.last_error = None;
        self.last_activity_us = now_us;
        self.capture.clear();
    }

    /// Drop the lease; callbacks and the last error survive for post-mortem
    pub fn release(&mut self) {
        self.phase = Phase::Unconfigured;
        self.clock = None;
        self.lane = None;
        self.symbols_queued = 0;
        self.symbols_processed = 0;
        self.capture.clear();
    }

    /// Enter the transmitting phase
    pub fn begin_transmit(&mut self, symbols: usize, now_us: u64) {
        self.phase = Phase::Transmitting;
        self.symbols_queued = symbols;
        self.symbols_processed = 0;
        self.started_us = now_us;
        self.last_activity_us = now_us;
    }

    /// Enter the receiving phase
    pub fn begin_receive(&mut self, capacity: usize, now_us: u64) {
        self.phase = Phase::Receiving;
        self.symbols_queued = 0;
        self.symbols_processed = 0;
        self.capture.clear();
        self.capture_capacity = capacity;
        self.started_us = now_us;
        self.last_activity_us = now_us;
    }

    /// Return to idle after a successful transfer
    pub fn finish(&mut self, symbols_processed: usize, now_us: u64) {
        self.phase = Phase::Idle;
        self.symbols_processed = symbols_processed;
        self.last_error = None;
        self.last_activity_us = now_us;
    }

    /// Return to idle recording a failure
    pub fn fail(&mut self, error: PulseError, now_us: u64) {
        self.phase = Phase::Idle;
        self.last_error = Some(error);
        self.last_activity_us = now_us;
    }

    /// Snapshot for the status reporter
    pub fn status(&self) -> ChannelStatus {
        ChannelStatus {
            is_configured: self.phase.is_configured(),
            is_busy: self.phase.is_busy(),
            is_transmitting: self.phase == Phase::Transmitting,
            is_receiving: self.phase == Phase::Receiving,
            symbols_queued: self.symbols_queued,
            symbols_processed: self.symbols_processed,
            last_error: self.last_error,
            last_activity_us: self.last_activity_us,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock;

    #[test]
    fn test_default_config_matches_hardware_defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.resolution_ns, 1_000);
        assert_eq!(config.direction, Direction::Transmit);
        assert_eq!(config.polarity, Polarity::Normal);
        assert_eq!(config.idle_state, Level::Low);
        assert_eq!(config.timeout_us, 10_000);
        assert_eq!(config.buffer_capacity, 64);
    }

    #[test]
    fn test_phase_predicates() {
        assert!(!Phase::Unconfigured.is_configured());
        assert!(!Phase::Unconfigured.is_busy());
        assert!(Phase::Idle.is_configured());
        assert!(!Phase::Idle.is_busy());
        assert!(Phase::Transmitting.is_busy());
        assert!(Phase::Receiving.is_busy());
    }

    #[test]
    fn test_slot_lifecycle() {
        let mut slot = ChannelSlot::default();
        assert_eq!(slot.phase, Phase::Unconfigured);

        let tick = clock::resolve(1_000, 80_000_000).unwrap();
        slot.configure(ChannelConfig::default(), tick, 2, 100);
        assert_eq!(slot.phase, Phase::Idle);
        assert_eq!(slot.lane, Some(2));
        assert_eq!(slot.last_activity_us, 100);

        slot.begin_transmit(24, 150);
        assert_eq!(slot.phase, Phase::Transmitting);
        assert_eq!(slot.symbols_queued, 24);

        slot.finish(24, 200);
        assert_eq!(slot.phase, Phase::Idle);
        assert_eq!(slot.symbols_processed, 24);
        assert_eq!(slot.last_error, None);

        slot.release();
        assert_eq!(slot.phase, Phase::Unconfigured);
        assert_eq!(slot.lane, None);
    }

    #[test]
    fn test_failure_records_error_and_returns_to_idle() {
        let mut slot = ChannelSlot::default();
        let tick = clock::resolve(1_000, 80_000_000).unwrap();
        slot.configure(ChannelConfig::default(), tick, 0, 0);

        slot.begin_transmit(8, 10);
        slot.fail(PulseError::CommunicationTimeout, 20);
        assert_eq!(slot.phase, Phase::Idle);
        assert_eq!(slot.last_error, Some(PulseError::CommunicationTimeout));

        let status = slot.status();
        assert!(status.is_configured);
        assert!(!status.is_busy);
        assert_eq!(status.last_error, Some(PulseError::CommunicationTimeout));
    }
}
