use serde::{Deserialize, Serialize};

/// Point-in-time view of permit pool occupancy.
///
/// Recomputed on every read; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Pool capacity
    pub max: usize,
    /// Permits currently checked out
    pub current: usize,
    /// Permits free to be acquired
    pub available: usize,
    /// Occupancy as a whole percentage in `[0, 100]`
    pub usage: u32,
}

impl PoolStats {
    /// Project raw counters into a snapshot. `in_use` is clamped to `max`.
    pub fn new(max: usize, in_use: usize) -> Self {
        let current = in_use.min(max);
        Self {
            max,
            current,
            available: max - current,
            usage: usage_percent(current, max),
        }
    }

    /// True when no permit is free
    pub fn is_saturated(&self) -> bool {
        self.available == 0
    }
}

/// Round-half-up percentage of `current` over `max`, clamped to `[0, 100]`.
pub(crate) fn usage_percent(current: usize, max: usize) -> u32 {
    if max == 0 {
        return 0;
    }
    let pct = (current as f64 / max as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u32
}
