//! Process-wide tracing setup shared by every DDMRP binary.

/// Install the JSON log subscriber with the default `info` filter.
///
/// Safe to call more than once; only the first call installs anything.
pub fn init() {
    tracing::init(tracing::DEFAULT_FILTER);
}

/// Subscriber construction and filters.
pub mod tracing;
