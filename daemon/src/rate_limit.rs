use governor::{clock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use std::num::NonZeroU32;
use tracing::warn;

use crate::config::RateLimitConfig;

/// Command rate limiter to prevent command flooding on the control socket.
/// Uses a token bucket algorithm via governor crate.
pub struct CommandRateLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, clock::DefaultClock>,
    enabled: bool,
}

impl CommandRateLimiter {
    /// Create a new rate limiter.
    ///
    /// # Arguments
    /// * `commands_per_second` - Maximum sustained rate of commands (e.g., 10)
    /// * `burst_capacity` - Maximum burst of commands (e.g., 20)
    /// * `enabled` - Whether rate limiting is enabled
    ///
    /// Zero rates are raised to one.
    pub fn new(commands_per_second: u32, burst_capacity: u32, enabled: bool) -> Self {
        let quota = Quota::per_second(Self::non_zero("commands_per_second", commands_per_second))
            .allow_burst(Self::non_zero("burst_capacity", burst_capacity));

        Self {
            limiter: RateLimiter::direct(quota),
            enabled,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.commands_per_second,
            config.burst_capacity,
            config.enabled,
        )
    }

    /// Check if a command is allowed to proceed without waiting.
    ///
    /// # Returns
    /// * `true` - Command is allowed to proceed
    /// * `false` - Command is rate limited and should be rejected
    pub fn check(&self) -> bool {
        if !self.enabled {
            return true;
        }

        self.limiter.check().is_ok()
    }

    fn non_zero(name: &str, value: u32) -> NonZeroU32 {
        NonZeroU32::new(value).unwrap_or_else(|| {
            warn!("Rate limit {} is zero, using 1", name);
            NonZeroU32::MIN
        })
    }
}
