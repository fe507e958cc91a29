use crate::NZU32;
use std::num::NonZeroU32;

/// Default command buffer capacity, in bytes.
pub const DEFAULT_CAPACITY: u64 = 32 * 1024;

/// Configuration for a [crate::BufferPool].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Number of buffers allocated (at the default capacity) on initialization.
    pub initial_count: u32,
    /// Number of buffers allocated in one batch when no free buffer is left.
    pub growth_step: NonZeroU32,
    /// Maximum number of buffers the pool will ever track at once.
    pub max_count: NonZeroU32,
}

impl Default for Config {
    /// Sized for a driver submitting to several engines: 32 buffers pre-warmed, growth by 8,
    /// at most 1098 buffers.
    fn default() -> Self {
        Self {
            initial_count: 32,
            growth_step: NZU32!(8),
            max_count: NZU32!(1098),
        }
    }
}

impl Config {
    /// Nothing pre-warmed, growth by a single buffer, at most 16 buffers.
    pub fn minimal() -> Self {
        Self {
            initial_count: 0,
            growth_step: NZU32!(1),
            max_count: NZU32!(16),
        }
    }

    /// Validates the configuration, panicking on invalid values.
    ///
    /// # Panics
    ///
    /// - `initial_count > max_count`
    pub(crate) fn validate(&self) {
        assert!(
            self.initial_count <= self.max_count.get(),
            "initial_count ({}) must be <= max_count ({})",
            self.initial_count,
            self.max_count
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        Config::default().validate();
        Config::minimal().validate();
    }

    #[test]
    #[should_panic(expected = "initial_count (5) must be <= max_count (4)")]
    fn test_initial_exceeds_max() {
        let config = Config {
            initial_count: 5,
            growth_step: NZU32!(1),
            max_count: NZU32!(4),
        };
        config.validate();
    }
}
