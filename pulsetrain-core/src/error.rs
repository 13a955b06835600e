//! Engine error taxonomy
//!
//! Every public entry point returns a distinguishable kind rather than a
//! bare boolean, so callers can tell a retryable condition (the channel was
//! busy, the line timed out) from a programming error (bad channel id, pin
//! conflict) that retrying will never fix.

use pulsetrain_hal::LaneError;

/// Errors returned by the waveform engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PulseError {
    // Configuration
    /// Channel id outside the engine's range
    InvalidChannel,
    /// A parameter is out of range or nonsensical (zero capacity, empty buffer)
    InvalidParameter,
    /// The channel is not set up for the requested operation
    InvalidConfiguration,

    // Resources
    /// The channel already holds a lease or has a transfer in flight
    ChannelBusy,
    /// Every hardware lane is leased
    InsufficientChannels,
    /// The pin is already claimed by another channel
    PinConflict,
    /// A shared hardware resource is temporarily unavailable
    ResourceBusy,

    // Timing
    /// Requested resolution is finer than the hardware can divide to
    ResolutionTooHigh,
    /// Requested resolution is coarser than the largest divider allows
    ResolutionTooLow,
    /// A symbol duration exceeds the hardware's tick field
    DurationTooLong,
    /// A symbol duration is zero
    DurationTooShort,

    // Transfer
    /// More symbols than a transfer can carry
    BufferTooLarge,
    /// The transfer ran out of data mid-flight
    BufferUnderflow,
    /// Capture filled its capacity while data was still arriving
    BufferOverflow,
    /// The transfer did not complete within the configured window
    CommunicationTimeout,
    /// The transfer failed in flight
    CommunicationFailure,
    /// The transfer was cancelled by teardown
    OperationAborted,

    // Hardware
    /// The timing block rejected an operation
    HardwareFault,
    /// The timing block stopped answering
    DeviceNotResponding,

    // System
    /// No memory left for transfer buffers
    OutOfMemory,
    /// The caller is not allowed to drive this resource
    PermissionDenied,
}

impl PulseError {
    /// Whether retrying the same call later can plausibly succeed
    ///
    /// Busy and timeout conditions clear on their own; everything else
    /// signals a configuration or hardware problem the caller must fix.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            PulseError::ChannelBusy | PulseError::ResourceBusy | PulseError::CommunicationTimeout
        )
    }
}

impl From<LaneError> for PulseError {
    fn from(err: LaneError) -> Self {
        match err {
            LaneError::InvalidLane => PulseError::InvalidChannel,
            LaneError::Busy => PulseError::ResourceBusy,
            LaneError::Timeout => PulseError::CommunicationTimeout,
            LaneError::Unsupported => PulseError::InvalidConfiguration,
            LaneError::HardwareFault => PulseError::HardwareFault,
            LaneError::NotResponding => PulseError::DeviceNotResponding,
            LaneError::OutOfMemory => PulseError::OutOfMemory,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(PulseError::ChannelBusy.is_retryable());
        assert!(PulseError::CommunicationTimeout.is_retryable());
        assert!(!PulseError::PinConflict.is_retryable());
        assert!(!PulseError::InvalidChannel.is_retryable());
        assert!(!PulseError::DurationTooLong.is_retryable());
    }

    #[test]
    fn test_lane_error_mapping() {
        assert_eq!(
            PulseError::from(LaneError::Timeout),
            PulseError::CommunicationTimeout
        );
        assert_eq!(
            PulseError::from(LaneError::HardwareFault),
            PulseError::HardwareFault
        );
        assert_eq!(
            PulseError::from(LaneError::OutOfMemory),
            PulseError::OutOfMemory
        );
    }
}
