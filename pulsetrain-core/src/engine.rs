//! Transfer engine
//!
//! [`PulseEngine`] owns the timing backend, the lane arbiter and the
//! per-channel state. Callers configure channels, hand over symbol buffers
//! for playback, or arm captures; the hardware runs the transfer
//! autonomously and the completion event comes back through
//! [`PulseEngine::handle_lane_event`].
//!
//! # Execution contexts
//!
//! Every method takes `&mut self`: the engine has a single writer at any
//! instant. Firmware shares one engine between task context and the
//! interrupt glue with a blocking mutex (see [`crate::notify::SharedEngine`]);
//! the interrupt glue calls only [`PulseEngine::handle_lane_event`], which
//! never blocks. Registered callbacks run in whatever context delivers the
//! event - treat them as interrupt context and keep them short.
//!
//! # Failure semantics
//!
//! Errors detected before a lane is armed return synchronously, always.
//! In-flight failures surface through the error callback (asynchronous
//! transfers) or the return value (blocking transmits); either way they are
//! recorded in the channel's `last_error` and the statistics, so a poller
//! discovers them even with no callback registered. The engine never
//! retries a busy condition and never queues a second transfer behind an
//! in-flight one - both are the caller's decisions.

use heapless::Vec;

use pulsetrain_hal::{
    Capabilities, Direction, LaneConfig, LaneEvent, LaneId, Symbol, TimingBlock,
};

use crate::arbiter::LaneArbiter;
use crate::channel::{ChannelConfig, ChannelSlot, ChannelStatus, Phase, Polarity};
use crate::clock::{self, TickClock};
use crate::error::PulseError;
use crate::stats::Statistics;

/// Number of logical channels an engine tracks
pub const MAX_CHANNELS: usize = 8;

/// Largest symbol count a transfer buffer can hold
pub const MAX_BUFFER_SYMBOLS: usize = 128;

/// Symbol storage sized for one transfer
pub type SymbolBuffer = Vec<Symbol, MAX_BUFFER_SYMBOLS>;

/// Invoked when an asynchronous transmission completes
///
/// Runs in the context that delivered the completion event.
pub type TransmitCallback = fn(channel: u8, symbols_sent: usize);

/// Invoked when a capture completes naturally, with the captured symbols
pub type ReceiveCallback = fn(channel: u8, symbols: &[Symbol]);

/// Invoked when an in-flight transfer fails
pub type ErrorCallback = fn(channel: u8, error: PulseError);

/// Waveform engine over a fixed timing backend
///
/// The backend is a generic parameter: it is chosen at construction and
/// dispatched statically, since production firmware has exactly one per
/// target.
pub struct PulseEngine<B: TimingBlock> {
    backend: B,
    caps: Capabilities,
    arbiter: LaneArbiter,
    channels: [ChannelSlot; MAX_CHANNELS],
    stats: Statistics,
}

impl<B: TimingBlock> PulseEngine<B> {
    /// Create an engine driving `backend`
    pub fn new(backend: B) -> Self {
        let mut caps = backend.capabilities();
        caps.max_buffer_symbols = caps.max_buffer_symbols.min(MAX_BUFFER_SYMBOLS);
        // The resolution range follows from the source clock; deriving it
        // here keeps backend-reported bounds consistent with the resolver
        let (min_ns, max_ns) = clock::resolution_bounds_ns(caps.source_clock_hz);
        caps.min_resolution_ns = min_ns;
        caps.max_resolution_ns = max_ns;
        Self {
            arbiter: LaneArbiter::new(caps.max_channels),
            caps,
            backend,
            channels: core::array::from_fn(|_| ChannelSlot::default()),
            stats: Statistics::default(),
        }
    }

    /// Access the backend (sim backends expose event injection here)
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable backend access
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    fn index(id: u8) -> Result<usize, PulseError> {
        if (id as usize) < MAX_CHANNELS {
            Ok(id as usize)
        } else {
            Err(PulseError::InvalidChannel)
        }
    }

    fn channel_for_lane(&self, lane: LaneId) -> Option<usize> {
        self.channels.iter().position(|slot| slot.lane == Some(lane))
    }

    fn validate_symbols(symbols: &[Symbol], max_ticks: u32) -> Result<(), PulseError> {
        for symbol in symbols {
            if symbol.duration == 0 {
                return Err(PulseError::DurationTooShort);
            }
            if symbol.duration > max_ticks {
                return Err(PulseError::DurationTooLong);
            }
        }
        Ok(())
    }

    /// Move the lane's captured symbols into the channel's buffer
    fn pull_captured(&mut self, idx: usize, lane: LaneId) -> usize {
        let capacity = self.channels[idx].capture_capacity;
        let capture = &mut self.channels[idx].capture;
        let _ = capture.resize_default(capacity);
        let n = self.backend.read_captured(lane, capture);
        capture.truncate(n);
        n
    }

    //
    // Configuration and teardown
    //

    /// Configure a channel, leasing a hardware lane for it
    ///
    /// Fails with [`PulseError::ChannelBusy`] if the channel already holds a
    /// lease - release it first, which is legal only while idle.
    pub fn configure_channel(&mut self, id: u8, config: ChannelConfig) -> Result<(), PulseError> {
        let idx = Self::index(id)?;
        if self.channels[idx].phase.is_configured() {
            return Err(PulseError::ChannelBusy);
        }
        if config.buffer_capacity == 0 {
            return Err(PulseError::InvalidParameter);
        }
        if config.buffer_capacity > self.caps.max_buffer_symbols {
            return Err(PulseError::BufferTooLarge);
        }
        let tick = clock::resolve(config.resolution_ns, self.caps.source_clock_hz)?;

        let lane = self.arbiter.acquire(id, config.pin)?;
        let lane_config = LaneConfig {
            pin: config.pin,
            direction: config.direction,
            clock_divider: tick.divider,
            idle_level: config.idle_state,
        };
        if let Err(e) = self.backend.configure_lane(lane, &lane_config) {
            // Failed lease must not leak a lane
            self.arbiter.release(lane);
            return Err(e.into());
        }

        let now = self.backend.now_us();
        self.channels[idx].configure(config, tick, lane, now);
        #[cfg(feature = "defmt")]
        defmt::debug!(
            "channel {=u8} on pin {=u8}: requested {=u32} ns, achieved {=u32} ns",
            id,
            config.pin,
            config.resolution_ns,
            tick.resolution_ns()
        );
        Ok(())
    }

    /// Release a channel's lane lease
    ///
    /// From idle this is a plain teardown; on an unconfigured channel it is
    /// a no-op. A busy channel is cancelled first: the in-flight transfer is
    /// aborted, [`PulseError::OperationAborted`] goes to the error callback
    /// and `last_error`, and only then is the lane freed.
    pub fn release_channel(&mut self, id: u8) -> Result<(), PulseError> {
        let idx = Self::index(id)?;
        let Some(lane) = self.channels[idx].lane else {
            return Ok(());
        };
        if self.channels[idx].phase.is_busy() {
            self.backend.abort(lane);
            match self.channels[idx].phase {
                Phase::Transmitting => self.stats.failed_transmissions += 1,
                Phase::Receiving => self.stats.failed_receptions += 1,
                _ => {}
            }
            let now = self.backend.now_us();
            self.channels[idx].fail(PulseError::OperationAborted, now);
            if let Some(on_error) = self.channels[idx].on_error {
                on_error(id, PulseError::OperationAborted);
            }
        }
        self.backend.release_lane(lane);
        self.arbiter.release(lane);
        self.channels[idx].release();
        Ok(())
    }

    //
    // Transmit
    //

    /// Play a symbol sequence on a transmit channel
    ///
    /// The buffer is borrowed for the duration of the call; durations are
    /// ticks of the channel's *achieved* resolution. With `wait_completion`
    /// the call blocks until the hardware finishes or `timeout_us` expires;
    /// otherwise it returns once the lane is armed and completion arrives
    /// through the transmit callback.
    pub fn transmit(
        &mut self,
        id: u8,
        symbols: &[Symbol],
        wait_completion: bool,
    ) -> Result<(), PulseError> {
        let idx = Self::index(id)?;
        let (lane, timeout_us, polarity) = {
            let slot = &self.channels[idx];
            match slot.phase {
                Phase::Unconfigured => return Err(PulseError::InvalidConfiguration),
                Phase::Transmitting | Phase::Receiving => return Err(PulseError::ChannelBusy),
                Phase::Idle => {}
            }
            if slot.config.direction != Direction::Transmit {
                return Err(PulseError::InvalidConfiguration);
            }
            let Some(lane) = slot.lane else {
                return Err(PulseError::InvalidConfiguration);
            };
            (lane, slot.config.timeout_us, slot.config.polarity)
        };
        if symbols.is_empty() {
            return Err(PulseError::InvalidParameter);
        }
        if symbols.len() > self.caps.max_buffer_symbols {
            return Err(PulseError::BufferTooLarge);
        }
        if let Err(e) = Self::validate_symbols(symbols, self.caps.max_symbol_ticks) {
            self.stats.timing_errors += 1;
            return Err(e);
        }

        // Inverted polarity is applied here so backends stay level-literal
        let mut flipped = SymbolBuffer::new();
        let wire: &[Symbol] = match polarity {
            Polarity::Normal => symbols,
            Polarity::Inverted => {
                for symbol in symbols {
                    let _ = flipped.push(symbol.inverted());
                }
                &flipped
            }
        };

        let now = self.backend.now_us();
        self.stats.total_transmissions += 1;
        self.channels[idx].begin_transmit(symbols.len(), now);
        if let Err(e) = self.backend.arm_transmit(lane, wire) {
            let error = PulseError::from(e);
            self.stats.failed_transmissions += 1;
            let now = self.backend.now_us();
            self.channels[idx].fail(error, now);
            return Err(error);
        }
        if !wait_completion {
            return Ok(());
        }

        match self.backend.wait_transmit_done(lane, timeout_us) {
            Ok(()) => {
                let now = self.backend.now_us();
                let elapsed = now.saturating_sub(self.channels[idx].started_us) as u32;
                self.channels[idx].finish(symbols.len(), now);
                self.stats.successful_transmissions += 1;
                self.stats.symbols_transmitted += symbols.len() as u64;
                self.stats.transfer_durations.record(elapsed);
                Ok(())
            }
            Err(e) => {
                let error = PulseError::from(e);
                self.backend.abort(lane);
                self.stats.failed_transmissions += 1;
                let now = self.backend.now_us();
                self.channels[idx].fail(error, now);
                if let Some(on_error) = self.channels[idx].on_error {
                    on_error(id, error);
                }
                Err(error)
            }
        }
    }

    //
    // Receive
    //

    /// Arm capture on a receive channel
    ///
    /// Returns immediately. Capture ends when `capacity` symbols have been
    /// stored, when the line has been idle for `timeout_us` (0 = no idle
    /// window), or on [`PulseEngine::stop_receive`].
    pub fn start_receive(
        &mut self,
        id: u8,
        capacity: usize,
        timeout_us: u32,
    ) -> Result<(), PulseError> {
        let idx = Self::index(id)?;
        let lane = {
            let slot = &self.channels[idx];
            match slot.phase {
                Phase::Unconfigured => return Err(PulseError::InvalidConfiguration),
                Phase::Transmitting | Phase::Receiving => return Err(PulseError::ChannelBusy),
                Phase::Idle => {}
            }
            if slot.config.direction != Direction::Receive {
                return Err(PulseError::InvalidConfiguration);
            }
            let Some(lane) = slot.lane else {
                return Err(PulseError::InvalidConfiguration);
            };
            lane
        };
        if capacity == 0 {
            return Err(PulseError::InvalidParameter);
        }
        if capacity > self.caps.max_buffer_symbols {
            return Err(PulseError::BufferTooLarge);
        }

        let now = self.backend.now_us();
        self.stats.total_receptions += 1;
        self.channels[idx].begin_receive(capacity, now);
        if let Err(e) = self.backend.arm_receive(lane, capacity, timeout_us) {
            let error = PulseError::from(e);
            self.stats.failed_receptions += 1;
            let now = self.backend.now_us();
            self.channels[idx].fail(error, now);
            return Err(error);
        }
        Ok(())
    }

    /// End a capture, returning how many symbols arrived
    ///
    /// Succeeds whether or not capture was still running, and zero captured
    /// symbols is not an error. Captured data stays available through
    /// [`PulseEngine::take_captured`].
    pub fn stop_receive(&mut self, id: u8) -> Result<usize, PulseError> {
        let idx = Self::index(id)?;
        let slot = &self.channels[idx];
        if !slot.phase.is_configured() || slot.config.direction != Direction::Receive {
            return Err(PulseError::InvalidConfiguration);
        }
        if slot.phase != Phase::Receiving {
            // Capture already ended naturally
            return Ok(self.channels[idx].capture.len());
        }
        let Some(lane) = slot.lane else {
            return Err(PulseError::InvalidConfiguration);
        };
        self.backend.abort(lane);
        let n = self.pull_captured(idx, lane);
        let now = self.backend.now_us();
        let elapsed = now.saturating_sub(self.channels[idx].started_us) as u32;
        self.channels[idx].finish(n, now);
        self.stats.successful_receptions += 1;
        self.stats.symbols_received += n as u64;
        self.stats.transfer_durations.record(elapsed);
        Ok(n)
    }

    /// Hand the captured symbols back to the caller
    ///
    /// The channel's capture buffer is left empty. Fails with
    /// [`PulseError::ChannelBusy`] while a capture is still running.
    pub fn take_captured(&mut self, id: u8) -> Result<SymbolBuffer, PulseError> {
        let idx = Self::index(id)?;
        if !self.channels[idx].phase.is_configured() {
            return Err(PulseError::InvalidConfiguration);
        }
        if self.channels[idx].phase == Phase::Receiving {
            return Err(PulseError::ChannelBusy);
        }
        Ok(core::mem::take(&mut self.channels[idx].capture))
    }

    //
    // Completion handling
    //

    /// Service one completion event from the timing block
    ///
    /// Called by the interrupt glue for every event the hardware raises.
    /// Never blocks. Events for lanes that already settled (a blocking wait
    /// consumed the completion, or the channel was released) are ignored.
    pub fn handle_lane_event(&mut self, event: LaneEvent) {
        let Some(idx) = self.channel_for_lane(event.lane()) else {
            return;
        };
        let id = idx as u8;
        match event {
            LaneEvent::TransmitDone { symbols, .. } => {
                if self.channels[idx].phase != Phase::Transmitting {
                    return;
                }
                let now = self.backend.now_us();
                let elapsed = now.saturating_sub(self.channels[idx].started_us) as u32;
                self.channels[idx].finish(symbols, now);
                self.stats.successful_transmissions += 1;
                self.stats.symbols_transmitted += symbols as u64;
                self.stats.transfer_durations.record(elapsed);
                if let Some(on_transmit) = self.channels[idx].on_transmit {
                    on_transmit(id, symbols);
                }
            }
            LaneEvent::ReceiveDone { lane, overflow, .. } => {
                if self.channels[idx].phase != Phase::Receiving {
                    return;
                }
                let n = self.pull_captured(idx, lane);
                if overflow {
                    self.stats.buffer_overflows += 1;
                }
                let now = self.backend.now_us();
                let elapsed = now.saturating_sub(self.channels[idx].started_us) as u32;
                self.channels[idx].finish(n, now);
                self.stats.successful_receptions += 1;
                self.stats.symbols_received += n as u64;
                self.stats.transfer_durations.record(elapsed);
                if let Some(on_receive) = self.channels[idx].on_receive {
                    on_receive(id, self.channels[idx].capture.as_slice());
                }
            }
            LaneEvent::ReceiveTimeout { lane } => {
                if self.channels[idx].phase != Phase::Receiving {
                    return;
                }
                // Partial capture survives for stop_receive / take_captured
                let n = self.pull_captured(idx, lane);
                let now = self.backend.now_us();
                self.channels[idx].fail(PulseError::CommunicationTimeout, now);
                self.channels[idx].symbols_processed = n;
                self.stats.failed_receptions += 1;
                if let Some(on_error) = self.channels[idx].on_error {
                    on_error(id, PulseError::CommunicationTimeout);
                }
            }
            LaneEvent::Fault { error, .. } => {
                let error = PulseError::from(error);
                match self.channels[idx].phase {
                    Phase::Transmitting => self.stats.failed_transmissions += 1,
                    Phase::Receiving => self.stats.failed_receptions += 1,
                    _ => return,
                }
                let now = self.backend.now_us();
                self.channels[idx].fail(error, now);
                #[cfg(feature = "defmt")]
                defmt::warn!("channel {=u8} fault: {}", id, error);
                if let Some(on_error) = self.channels[idx].on_error {
                    on_error(id, error);
                }
            }
        }
    }

    //
    // Callbacks
    //

    /// Register the transmit-complete callback for a channel
    ///
    /// Refused on a receive-direction channel.
    pub fn set_transmit_callback(
        &mut self,
        id: u8,
        callback: TransmitCallback,
    ) -> Result<(), PulseError> {
        let idx = Self::index(id)?;
        if self.channels[idx].config.direction == Direction::Receive {
            return Err(PulseError::InvalidConfiguration);
        }
        self.channels[idx].on_transmit = Some(callback);
        Ok(())
    }

    /// Register the receive-complete callback for a channel
    ///
    /// Refused on a transmit-direction channel.
    pub fn set_receive_callback(
        &mut self,
        id: u8,
        callback: ReceiveCallback,
    ) -> Result<(), PulseError> {
        let idx = Self::index(id)?;
        if self.channels[idx].config.direction == Direction::Transmit {
            return Err(PulseError::InvalidConfiguration);
        }
        self.channels[idx].on_receive = Some(callback);
        Ok(())
    }

    /// Register the error callback for a channel (any direction)
    pub fn set_error_callback(&mut self, id: u8, callback: ErrorCallback) -> Result<(), PulseError> {
        let idx = Self::index(id)?;
        self.channels[idx].on_error = Some(callback);
        Ok(())
    }

    /// Drop every callback registered on one channel
    pub fn clear_channel_callbacks(&mut self, id: u8) -> Result<(), PulseError> {
        let idx = Self::index(id)?;
        self.channels[idx].on_transmit = None;
        self.channels[idx].on_receive = None;
        self.channels[idx].on_error = None;
        Ok(())
    }

    /// Drop every callback on every channel
    pub fn clear_callbacks(&mut self) {
        for slot in self.channels.iter_mut() {
            slot.on_transmit = None;
            slot.on_receive = None;
            slot.on_error = None;
        }
    }

    //
    // Reporting (pure reads, safe from any context)
    //

    /// Check if a transfer is in flight on the channel
    ///
    /// Unknown ids read as not busy, mirroring the hardware register.
    pub fn is_channel_busy(&self, id: u8) -> bool {
        Self::index(id)
            .map(|idx| self.channels[idx].phase.is_busy())
            .unwrap_or(false)
    }

    /// Snapshot of a channel's live state
    pub fn channel_status(&self, id: u8) -> Result<ChannelStatus, PulseError> {
        let idx = Self::index(id)?;
        Ok(self.channels[idx].status())
    }

    /// The tick clock a configured channel actually runs at
    pub fn resolved_resolution(&self, id: u8) -> Result<TickClock, PulseError> {
        let idx = Self::index(id)?;
        self.channels[idx]
            .clock
            .ok_or(PulseError::InvalidConfiguration)
    }

    /// Negotiated capabilities of this engine/backend pair
    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    /// Snapshot of the transfer statistics
    pub fn statistics(&self) -> Statistics {
        self.stats
    }

    /// Clear the transfer statistics
    pub fn reset_statistics(&mut self) {
        self.stats.reset();
    }

    /// Lanes not currently leased to any channel
    pub fn free_lanes(&self) -> usize {
        self.arbiter.free_lanes()
    }
}
