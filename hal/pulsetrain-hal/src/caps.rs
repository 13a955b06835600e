//! Backend capability reporting

/// Static description of a timing-block instance
///
/// Filled in once by the backend; the engine caches it and callers may do
/// the same. Nothing in here changes at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Capabilities {
    /// Number of independent hardware lanes
    pub max_channels: u8,
    /// Source clock feeding the per-lane dividers, in Hz
    pub source_clock_hz: u32,
    /// Finest achievable tick period in nanoseconds (rounded up)
    pub min_resolution_ns: u32,
    /// Coarsest achievable tick period in nanoseconds (rounded down)
    pub max_resolution_ns: u32,
    /// Largest representable single-symbol duration in ticks
    pub max_symbol_ticks: u32,
    /// Largest symbol count accepted per transfer
    pub max_buffer_symbols: usize,
    /// A single lane can both transmit and receive
    pub supports_bidirectional: bool,
    /// Captured buffers can be replayed through a transmit lane
    pub supports_loopback: bool,
    /// Hardware carrier modulation is available
    pub supports_carrier: bool,
}
