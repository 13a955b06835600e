//! Timing-block trait and lane-level types
//!
//! A timing block owns a small number of independent lanes, each capable of
//! autonomous symbol playback or capture once armed. The CPU's role is
//! limited to arming a lane and servicing the completion events the block
//! raises.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::caps::Capabilities;
use crate::symbol::{Level, Symbol};

/// Index of a hardware lane within a timing block
pub type LaneId = u8;

/// Direction a lane is driven in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Direction {
    /// Waveform generation (output)
    Transmit,
    /// Waveform capture (input)
    Receive,
}

/// Low-level lane programming parameters
///
/// Produced by the engine from a negotiated channel configuration; the
/// divider has already been resolved against the source clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LaneConfig {
    /// GPIO pin the lane drives or samples
    pub pin: u8,
    /// Lane direction
    pub direction: Direction,
    /// Integer divider applied to the source clock (1..=255)
    pub clock_divider: u8,
    /// Level the pin rests at outside active transfers
    pub idle_level: Level,
}

/// Errors surfaced by a timing backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LaneError {
    /// Lane index outside the block's range
    InvalidLane,
    /// Lane is mid-transfer and cannot accept the request
    Busy,
    /// A bounded wait expired before the lane finished
    Timeout,
    /// The lane cannot be driven as requested on this hardware
    Unsupported,
    /// The peripheral rejected the operation
    HardwareFault,
    /// The peripheral stopped answering
    NotResponding,
    /// No memory left for transfer buffers
    OutOfMemory,
}

/// Completion notification raised by an armed lane
///
/// Delivered from interrupt-equivalent context: the glue that services the
/// block's interrupt hands these to the engine's event handler. Handlers
/// must not block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LaneEvent {
    /// Playback reached the end of the armed symbol sequence
    TransmitDone {
        /// Lane that finished
        lane: LaneId,
        /// Symbols emitted
        symbols: usize,
    },
    /// Capture ended because the frame completed or capacity was reached
    ReceiveDone {
        /// Lane that finished
        lane: LaneId,
        /// Symbols captured and readable via `read_captured`
        symbols: usize,
        /// Data was still arriving when capacity ran out
        overflow: bool,
    },
    /// Capture ended because the line stayed idle past the armed window
    ReceiveTimeout {
        /// Lane that timed out
        lane: LaneId,
    },
    /// The lane failed mid-transfer
    Fault {
        /// Lane that failed
        lane: LaneId,
        /// What went wrong
        error: LaneError,
    },
}

impl LaneEvent {
    /// Lane the event concerns
    pub fn lane(&self) -> LaneId {
        match *self {
            LaneEvent::TransmitDone { lane, .. }
            | LaneEvent::ReceiveDone { lane, .. }
            | LaneEvent::ReceiveTimeout { lane }
            | LaneEvent::Fault { lane, .. } => lane,
        }
    }
}

/// Multi-lane timing hardware
///
/// Implementations program the actual peripheral (or a simulation of one).
/// All methods return immediately except [`TimingBlock::wait_transmit_done`],
/// which is the single blocking suspension point of the whole engine.
pub trait TimingBlock {
    /// Static capabilities of this instance
    fn capabilities(&self) -> Capabilities;

    /// Monotonic microsecond timestamp
    ///
    /// Used for transfer-duration statistics and activity timestamps.
    fn now_us(&self) -> u64;

    /// Bind a lane to a pin, direction, divider and idle level
    fn configure_lane(&mut self, lane: LaneId, config: &LaneConfig) -> Result<(), LaneError>;

    /// Return a lane to the unbound state
    ///
    /// Releasing an unbound lane is a no-op.
    fn release_lane(&mut self, lane: LaneId);

    /// Arm symbol playback on a transmit lane
    ///
    /// Emission starts from the configured idle level, plays the symbols
    /// strictly in order, and returns the pin to idle after the last one.
    /// A [`LaneEvent::TransmitDone`] is raised on completion.
    fn arm_transmit(&mut self, lane: LaneId, symbols: &[Symbol]) -> Result<(), LaneError>;

    /// Block until an armed transmission completes
    ///
    /// `timeout_us == 0` waits indefinitely. On `Ok` the completion has been
    /// consumed; no separate event is raised for it. On
    /// [`LaneError::Timeout`] the lane keeps running and may still raise its
    /// completion event later.
    fn wait_transmit_done(&mut self, lane: LaneId, timeout_us: u32) -> Result<(), LaneError>;

    /// Arm capture on a receive lane
    ///
    /// Capture ends when `capacity` symbols have been stored, when the line
    /// has been idle for `idle_timeout_us` (0 = no idle window, wait for an
    /// explicit abort), or when [`TimingBlock::abort`] is called.
    fn arm_receive(
        &mut self,
        lane: LaneId,
        capacity: usize,
        idle_timeout_us: u32,
    ) -> Result<(), LaneError>;

    /// Copy the symbols captured so far into `out`, returning the count
    fn read_captured(&mut self, lane: LaneId, out: &mut [Symbol]) -> usize;

    /// Cancel whatever transfer the lane is running
    ///
    /// Pending completion events for the lane are dropped. Aborting an idle
    /// lane is a no-op. Captured data survives until the next arm.
    fn abort(&mut self, lane: LaneId);
}
