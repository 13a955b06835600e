//! Completion hand-off for async consumers
//!
//! Hardware completions reach the engine in interrupt-equivalent context.
//! Async code wants to await them instead of registering raw callbacks, so
//! the bridge is a queue: the callback posts a [`CompletionEvent`] with
//! `try_send`, the task awaits `receive` on the other end. Firmware declares
//! the queue as a static, the same way its other inter-task channels are
//! declared:
//!
//! ```ignore
//! static COMPLETIONS: CompletionQueue<CriticalSectionRawMutex, 8> = Channel::new();
//!
//! fn on_transmit_done(channel: u8, symbols_sent: usize) {
//!     let _ = COMPLETIONS.try_send(CompletionEvent {
//!         channel,
//!         outcome: TransferOutcome::TransmitComplete { symbols: symbols_sent },
//!     });
//! }
//!
//! // task side
//! let event = COMPLETIONS.receive().await;
//! ```
//!
//! A full queue rejects the post (`try_send` fails); the completion is
//! still visible through the channel's status and statistics, so nothing is
//! silently lost.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;

use crate::engine::PulseEngine;
use crate::error::PulseError;

/// Outcome of a finished transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferOutcome {
    /// Playback finished
    TransmitComplete {
        /// Symbols emitted
        symbols: usize,
    },
    /// Capture finished
    ReceiveComplete {
        /// Symbols captured
        symbols: usize,
    },
    /// The transfer failed
    Failed(PulseError),
}

/// Completion message posted from the event-handling context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CompletionEvent {
    /// Channel the transfer ran on
    pub channel: u8,
    /// How it ended
    pub outcome: TransferOutcome,
}

/// Queue carrying completions from interrupt glue to async tasks
pub type CompletionQueue<M, const N: usize> = Channel<M, CompletionEvent, N>;

/// An engine shared between task context and interrupt glue
///
/// The interrupt side locks it only for [`PulseEngine::handle_lane_event`],
/// which never blocks; the task side holds it across whole API calls.
pub type SharedEngine<M, B> = Mutex<M, RefCell<PulseEngine<B>>>;

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    #[test]
    fn test_queue_round_trip() {
        let queue: CompletionQueue<NoopRawMutex, 4> = Channel::new();

        queue
            .try_send(CompletionEvent {
                channel: 2,
                outcome: TransferOutcome::TransmitComplete { symbols: 24 },
            })
            .unwrap();

        let event = queue.try_receive().unwrap();
        assert_eq!(event.channel, 2);
        assert_eq!(
            event.outcome,
            TransferOutcome::TransmitComplete { symbols: 24 }
        );
        assert!(queue.try_receive().is_err());
    }

    #[test]
    fn test_full_queue_rejects_without_blocking() {
        let queue: CompletionQueue<NoopRawMutex, 1> = Channel::new();
        let event = CompletionEvent {
            channel: 0,
            outcome: TransferOutcome::Failed(PulseError::CommunicationTimeout),
        };
        queue.try_send(event).unwrap();
        assert!(queue.try_send(event).is_err());
    }
}
