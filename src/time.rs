/*
 * SPDX-License-Identifier: MIT OR Apache-2.0
 */

//! Bounded polling.
//!
//! Hardware status bits that are expected to flip "soon" are waited on with
//! a fixed iteration budget and a fixed per-iteration delay. The delay
//! source is injected ([`embedded_hal::delay::DelayNs`]) so that tests can
//! drive the condition deterministically instead of burning wall-clock time.

use embedded_hal::delay::DelayNs;

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// A bounded spin-wait: at most `budget` polls of a condition, separated by
/// `interval_us` microseconds.
#[derive(Copy, Clone, Debug)]
pub struct SpinWait {
    budget: u32,
    interval_us: u32,
}

/// The condition did not come true within the poll budget.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WaitTimedOut;

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

impl SpinWait {
    /// Create an instance.
    pub const fn new(budget: u32, interval_us: u32) -> Self {
        Self {
            budget,
            interval_us,
        }
    }

    /// Total wait budget in microseconds.
    pub const fn budget_us(&self) -> u64 {
        self.budget as u64 * self.interval_us as u64
    }

    /// Poll `condition` until it returns true or the budget is exhausted.
    ///
    /// The condition is checked once per iteration, before delaying, so an
    /// already-true condition completes without any delay at all.
    pub fn wait_for<D, F>(&self, delay: &mut D, mut condition: F) -> Result<(), WaitTimedOut>
    where
        D: DelayNs,
        F: FnMut() -> bool,
    {
        for _ in 0..self.budget {
            if condition() {
                return Ok(());
            }
            delay.delay_us(self.interval_us);
        }

        Err(WaitTimedOut)
    }
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------
