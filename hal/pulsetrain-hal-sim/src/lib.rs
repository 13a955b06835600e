//! Software-simulated timing block
//!
//! A deterministic [`TimingBlock`] implementation with a manually advanced
//! microsecond clock. Lane geometry mirrors a small RMT-class peripheral:
//! an 80 MHz source clock behind an 8-bit divider, four lanes, and a 15-bit
//! symbol duration field.
//!
//! Nothing here runs on a timer. Time only moves when [`SimTimingBlock::advance`]
//! is called (or inside a blocking completion wait), and completions become
//! visible through [`SimTimingBlock::pop_event`] once their due time has
//! passed. Tests drive the interrupt-glue loop themselves:
//!
//! ```ignore
//! block.advance(1_000);
//! while let Some(event) = block.pop_event() {
//!     engine.handle_lane_event(event);
//! }
//! ```
//!
//! Capture input is injected with [`SimTimingBlock::inject_frame`]; an armed
//! receive lane then captures the frame, honoring its capacity limit and
//! flagging overflow when the frame is longer than the armed capacity.

#![no_std]
#![deny(unsafe_code)]

use heapless::{Deque, Vec};

use pulsetrain_hal::{
    Capabilities, Direction, LaneConfig, LaneError, LaneEvent, LaneId, Symbol, TimingBlock,
};

/// Number of simulated lanes
pub const SIM_LANES: u8 = 4;

/// Simulated source clock in Hz
pub const SOURCE_CLOCK_HZ: u32 = 80_000_000;

/// Largest representable symbol duration (15-bit field)
pub const MAX_SYMBOL_TICKS: u32 = 32_767;

/// Largest symbol count a lane can hold per transfer
pub const MAX_TRANSFER_SYMBOLS: usize = 256;

/// Scheduled + ready completion events the block can hold
const EVENT_DEPTH: usize = 8;

/// Armed capture parameters
#[derive(Debug, Clone, Copy)]
struct RxArm {
    capacity: usize,
}

/// Per-lane simulation state
struct LaneSlot {
    config: Option<LaneConfig>,
    /// Symbols in flight on an armed transmission
    tx_armed: Option<usize>,
    rx_armed: Option<RxArm>,
    /// Symbols captured by the most recent capture
    captured: Vec<Symbol, MAX_TRANSFER_SYMBOLS>,
    /// Symbols armed by the most recent transmission, as seen on the wire
    outgoing: Vec<Symbol, MAX_TRANSFER_SYMBOLS>,
    /// Injected frame waiting to be captured
    inbox: Vec<Symbol, MAX_TRANSFER_SYMBOLS>,
    has_inbox: bool,
}

impl LaneSlot {
    const fn new() -> Self {
        Self {
            config: None,
            tx_armed: None,
            rx_armed: None,
            captured: Vec::new(),
            outgoing: Vec::new(),
            inbox: Vec::new(),
            has_inbox: false,
        }
    }

    fn is_armed(&self) -> bool {
        self.tx_armed.is_some() || self.rx_armed.is_some()
    }
}

/// Deterministic simulated timing block
pub struct SimTimingBlock {
    now_us: u64,
    lanes: [LaneSlot; SIM_LANES as usize],
    /// Completions waiting for their due time, `(due_us, event)`
    scheduled: Vec<(u64, LaneEvent), EVENT_DEPTH>,
    /// Completions whose due time has passed
    ready: Deque<LaneEvent, EVENT_DEPTH>,
}

impl Default for SimTimingBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl SimTimingBlock {
    /// Create a block with all lanes unbound and the clock at zero
    pub const fn new() -> Self {
        Self {
            now_us: 0,
            lanes: [
                LaneSlot::new(),
                LaneSlot::new(),
                LaneSlot::new(),
                LaneSlot::new(),
            ],
            scheduled: Vec::new(),
            ready: Deque::new(),
        }
    }

    /// Move the clock forward, releasing completions that fall due
    pub fn advance(&mut self, us: u64) {
        self.advance_to(self.now_us + us);
    }

    /// Pop the next due completion event, oldest first
    pub fn pop_event(&mut self) -> Option<LaneEvent> {
        self.ready.pop_front()
    }

    /// Symbols the lane's most recent transmission put on the wire
    pub fn transmitted(&self, lane: LaneId) -> &[Symbol] {
        if lane >= SIM_LANES {
            return &[];
        }
        &self.lanes[lane as usize].outgoing
    }

    /// Queue an incoming frame on a lane
    ///
    /// If the lane has a capture armed, capture starts immediately;
    /// otherwise the frame waits for the next `arm_receive`.
    pub fn inject_frame(&mut self, lane: LaneId, symbols: &[Symbol]) {
        if lane >= SIM_LANES {
            return;
        }
        {
            let slot = &mut self.lanes[lane as usize];
            slot.inbox.clear();
            let take = symbols.len().min(MAX_TRANSFER_SYMBOLS);
            let _ = slot.inbox.extend_from_slice(&symbols[..take]);
            slot.has_inbox = true;
        }
        if self.lanes[lane as usize].rx_armed.is_some() {
            self.begin_capture(lane);
        }
    }

    /// Microseconds one symbol sequence occupies at the lane's divider
    fn frame_duration_us(&self, lane: LaneId, symbols: &[Symbol]) -> u64 {
        let divider = self.lanes[lane as usize]
            .config
            .map(|c| c.clock_divider as u64)
            .unwrap_or(1);
        let ticks: u64 = symbols.iter().map(|s| s.duration as u64).sum();
        // Round up so a transfer is never reported done early
        let num = ticks * divider * 1_000_000;
        num.div_ceil(SOURCE_CLOCK_HZ as u64)
    }

    fn advance_to(&mut self, deadline_us: u64) {
        self.now_us = self.now_us.max(deadline_us);
        // Release due events in due-time order
        loop {
            let mut next: Option<usize> = None;
            for (i, (due, _)) in self.scheduled.iter().enumerate() {
                if *due <= self.now_us && next.is_none_or(|n| *due < self.scheduled[n].0) {
                    next = Some(i);
                }
            }
            let Some(i) = next else { break };
            let (_, event) = self.scheduled.swap_remove(i);
            self.settle(event);
            let _ = self.ready.push_back(event);
        }
    }

    /// Clear the armed state a completion event finishes
    fn settle(&mut self, event: LaneEvent) {
        let slot = &mut self.lanes[event.lane() as usize];
        match event {
            LaneEvent::TransmitDone { .. } => slot.tx_armed = None,
            LaneEvent::ReceiveDone { .. } | LaneEvent::ReceiveTimeout { .. } => {
                slot.rx_armed = None
            }
            LaneEvent::Fault { .. } => {
                slot.tx_armed = None;
                slot.rx_armed = None;
            }
        }
    }

    fn schedule(&mut self, due_us: u64, event: LaneEvent) {
        let _ = self.scheduled.push((due_us, event));
    }

    fn drop_scheduled(&mut self, lane: LaneId) {
        while let Some(i) = self
            .scheduled
            .iter()
            .position(|(_, e)| e.lane() == lane)
        {
            self.scheduled.swap_remove(i);
        }
    }

    /// Start capturing the lane's queued frame
    fn begin_capture(&mut self, lane: LaneId) {
        let Some(arm) = self.lanes[lane as usize].rx_armed else {
            return;
        };
        let idx = lane as usize;
        let frame_len = self.lanes[idx].inbox.len();
        let take = frame_len.min(arm.capacity);
        let overflow = frame_len > arm.capacity;

        let mut frame: Vec<Symbol, MAX_TRANSFER_SYMBOLS> = Vec::new();
        core::mem::swap(&mut frame, &mut self.lanes[idx].inbox);
        self.lanes[idx].has_inbox = false;
        self.lanes[idx].captured.clear();
        let _ = self.lanes[idx]
            .captured
            .extend_from_slice(&frame[..take]);

        // Data arrival supersedes the idle window
        self.drop_scheduled(lane);
        let due = self.now_us + self.frame_duration_us(lane, &frame[..take]);
        self.schedule(
            due,
            LaneEvent::ReceiveDone {
                lane,
                symbols: take,
                overflow,
            },
        );
    }

    fn check_lane(&self, lane: LaneId) -> Result<(), LaneError> {
        if lane >= SIM_LANES {
            return Err(LaneError::InvalidLane);
        }
        Ok(())
    }
}

impl TimingBlock for SimTimingBlock {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            max_channels: SIM_LANES,
            source_clock_hz: SOURCE_CLOCK_HZ,
            // divider 1 and 255 at 80 MHz
            min_resolution_ns: 13,
            max_resolution_ns: 3187,
            max_symbol_ticks: MAX_SYMBOL_TICKS,
            max_buffer_symbols: MAX_TRANSFER_SYMBOLS,
            supports_bidirectional: false,
            supports_loopback: true,
            supports_carrier: false,
        }
    }

    fn now_us(&self) -> u64 {
        self.now_us
    }

    fn configure_lane(&mut self, lane: LaneId, config: &LaneConfig) -> Result<(), LaneError> {
        self.check_lane(lane)?;
        if config.clock_divider == 0 {
            return Err(LaneError::Unsupported);
        }
        let slot = &mut self.lanes[lane as usize];
        if slot.is_armed() {
            return Err(LaneError::Busy);
        }
        slot.config = Some(*config);
        slot.captured.clear();
        Ok(())
    }

    fn release_lane(&mut self, lane: LaneId) {
        if lane >= SIM_LANES {
            return;
        }
        self.abort(lane);
        let slot = &mut self.lanes[lane as usize];
        slot.config = None;
        slot.captured.clear();
        slot.outgoing.clear();
        slot.inbox.clear();
        slot.has_inbox = false;
    }

    fn arm_transmit(&mut self, lane: LaneId, symbols: &[Symbol]) -> Result<(), LaneError> {
        self.check_lane(lane)?;
        let config = self.lanes[lane as usize]
            .config
            .ok_or(LaneError::Unsupported)?;
        if config.direction != Direction::Transmit {
            return Err(LaneError::Unsupported);
        }
        if self.lanes[lane as usize].is_armed() {
            return Err(LaneError::Busy);
        }
        if symbols.len() > MAX_TRANSFER_SYMBOLS {
            return Err(LaneError::OutOfMemory);
        }
        let due = self.now_us + self.frame_duration_us(lane, symbols);
        {
            let slot = &mut self.lanes[lane as usize];
            slot.tx_armed = Some(symbols.len());
            slot.outgoing.clear();
            let _ = slot.outgoing.extend_from_slice(symbols);
        }
        self.schedule(
            due,
            LaneEvent::TransmitDone {
                lane,
                symbols: symbols.len(),
            },
        );
        Ok(())
    }

    fn wait_transmit_done(&mut self, lane: LaneId, timeout_us: u32) -> Result<(), LaneError> {
        self.check_lane(lane)?;
        let pending = self.scheduled.iter().position(|(_, e)| {
            e.lane() == lane && matches!(e, LaneEvent::TransmitDone { .. })
        });
        let Some(i) = pending else {
            // Already completed (or never armed): nothing to wait for
            return Ok(());
        };
        let due = self.scheduled[i].0;
        if timeout_us != 0 && due > self.now_us + timeout_us as u64 {
            self.now_us += timeout_us as u64;
            return Err(LaneError::Timeout);
        }
        self.scheduled.swap_remove(i);
        self.now_us = self.now_us.max(due);
        self.lanes[lane as usize].tx_armed = None;
        Ok(())
    }

    fn arm_receive(
        &mut self,
        lane: LaneId,
        capacity: usize,
        idle_timeout_us: u32,
    ) -> Result<(), LaneError> {
        self.check_lane(lane)?;
        let config = self.lanes[lane as usize]
            .config
            .ok_or(LaneError::Unsupported)?;
        if config.direction != Direction::Receive {
            return Err(LaneError::Unsupported);
        }
        if self.lanes[lane as usize].is_armed() {
            return Err(LaneError::Busy);
        }
        if capacity == 0 || capacity > MAX_TRANSFER_SYMBOLS {
            return Err(LaneError::OutOfMemory);
        }
        self.lanes[lane as usize].captured.clear();
        self.lanes[lane as usize].rx_armed = Some(RxArm { capacity });
        if self.lanes[lane as usize].has_inbox {
            self.begin_capture(lane);
        } else if idle_timeout_us != 0 {
            self.schedule(
                self.now_us + idle_timeout_us as u64,
                LaneEvent::ReceiveTimeout { lane },
            );
        }
        Ok(())
    }

    fn read_captured(&mut self, lane: LaneId, out: &mut [Symbol]) -> usize {
        if lane >= SIM_LANES {
            return 0;
        }
        let captured = &self.lanes[lane as usize].captured;
        let n = captured.len().min(out.len());
        out[..n].copy_from_slice(&captured[..n]);
        n
    }

    fn abort(&mut self, lane: LaneId) {
        if lane >= SIM_LANES {
            return;
        }
        self.drop_scheduled(lane);
        let slot = &mut self.lanes[lane as usize];
        slot.tx_armed = None;
        slot.rx_armed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsetrain_hal::Level;

    fn tx_config() -> LaneConfig {
        LaneConfig {
            pin: 5,
            direction: Direction::Transmit,
            clock_divider: 4, // 50 ns ticks at 80 MHz
            idle_level: Level::Low,
        }
    }

    fn rx_config() -> LaneConfig {
        LaneConfig {
            direction: Direction::Receive,
            ..tx_config()
        }
    }

    #[test]
    fn test_capabilities_geometry() {
        let block = SimTimingBlock::new();
        let caps = block.capabilities();
        assert_eq!(caps.max_channels, SIM_LANES);
        assert_eq!(caps.source_clock_hz, SOURCE_CLOCK_HZ);
        assert_eq!(caps.max_symbol_ticks, 32_767);
        assert!(caps.supports_loopback);
    }

    #[test]
    fn test_transmit_completes_at_due_time() {
        let mut block = SimTimingBlock::new();
        block.configure_lane(0, &tx_config()).unwrap();

        // 400 ticks * 50 ns = 20 us
        let symbols = [Symbol::high(300), Symbol::low(100)];
        block.arm_transmit(0, &symbols).unwrap();

        block.advance(19);
        assert!(block.pop_event().is_none());

        block.advance(1);
        assert_eq!(
            block.pop_event(),
            Some(LaneEvent::TransmitDone { lane: 0, symbols: 2 })
        );
    }

    #[test]
    fn test_wait_consumes_completion() {
        let mut block = SimTimingBlock::new();
        block.configure_lane(0, &tx_config()).unwrap();
        block.arm_transmit(0, &[Symbol::high(400)]).unwrap();

        block.wait_transmit_done(0, 10_000).unwrap();
        assert_eq!(block.now_us(), 20);

        // No duplicate event after a successful wait
        block.advance(100);
        assert!(block.pop_event().is_none());
    }

    #[test]
    fn test_wait_times_out_before_due() {
        let mut block = SimTimingBlock::new();
        block.configure_lane(0, &tx_config()).unwrap();
        block.arm_transmit(0, &[Symbol::high(32_000)]).unwrap(); // 1.6 ms

        assert_eq!(block.wait_transmit_done(0, 100), Err(LaneError::Timeout));
        // The lane keeps running and completes later
        block.advance(2_000);
        assert!(matches!(
            block.pop_event(),
            Some(LaneEvent::TransmitDone { lane: 0, .. })
        ));
    }

    #[test]
    fn test_receive_idle_timeout() {
        let mut block = SimTimingBlock::new();
        block.configure_lane(1, &rx_config()).unwrap();
        block.arm_receive(1, 16, 1_000).unwrap();

        block.advance(1_000);
        assert_eq!(block.pop_event(), Some(LaneEvent::ReceiveTimeout { lane: 1 }));

        let mut out = [Symbol::default(); 16];
        assert_eq!(block.read_captured(1, &mut out), 0);
    }

    #[test]
    fn test_injected_frame_is_captured_with_overflow_flag() {
        let mut block = SimTimingBlock::new();
        block.configure_lane(1, &rx_config()).unwrap();
        block.arm_receive(1, 2, 1_000).unwrap();

        let frame = [Symbol::high(100), Symbol::low(100), Symbol::high(100)];
        block.inject_frame(1, &frame);
        block.advance(1_000);

        assert_eq!(
            block.pop_event(),
            Some(LaneEvent::ReceiveDone { lane: 1, symbols: 2, overflow: true })
        );
        let mut out = [Symbol::default(); 4];
        assert_eq!(block.read_captured(1, &mut out), 2);
        assert_eq!(out[0], Symbol::high(100));
        assert_eq!(out[1], Symbol::low(100));
    }

    #[test]
    fn test_abort_cancels_pending_events() {
        let mut block = SimTimingBlock::new();
        block.configure_lane(0, &tx_config()).unwrap();
        block.arm_transmit(0, &[Symbol::high(400)]).unwrap();

        block.abort(0);
        block.advance(10_000);
        assert!(block.pop_event().is_none());

        // Lane is free to arm again
        block.arm_transmit(0, &[Symbol::high(1)]).unwrap();
    }

    #[test]
    fn test_direction_enforced() {
        let mut block = SimTimingBlock::new();
        block.configure_lane(0, &tx_config()).unwrap();
        assert_eq!(
            block.arm_receive(0, 8, 0),
            Err(LaneError::Unsupported)
        );
    }
}
