use std::time::Duration;

use aliri_clock::{Clock, DurationSecs, System, UnixTime};

/// Configuration for when tokens are refreshed and how long a refresh may take
#[derive(Clone, Debug)]
pub struct CoordinatorConfig<C = System> {
    safety_margin: DurationSecs,
    refresh_timeout: Duration,
    clock: C,
}

impl Default for CoordinatorConfig {
    /// Default coordinator configuration
    ///
    /// Uses a safety margin of 10 seconds, bounds each refresh attempt at 30
    /// seconds, and uses the system clock.
    fn default() -> Self {
        Self {
            safety_margin: DurationSecs(10),
            refresh_timeout: Duration::from_secs(30),
            clock: System,
        }
    }
}

impl CoordinatorConfig {
    /// Constructs a new configuration
    ///
    /// A token will not be handed out once it is within `safety_margin` of
    /// its expiry. A refresh attempt which takes longer than `refresh_timeout`
    /// is abandoned and reported as a timeout.
    pub fn new(safety_margin: DurationSecs, refresh_timeout: Duration) -> Self {
        Self {
            safety_margin,
            refresh_timeout,
            clock: System,
        }
    }
}

impl<C> CoordinatorConfig<C> {
    /// Sets the safety margin
    pub fn with_safety_margin(mut self, safety_margin: DurationSecs) -> Self {
        self.safety_margin = safety_margin;
        self
    }

    /// Sets the bound on a single refresh attempt
    pub fn with_refresh_timeout(mut self, refresh_timeout: Duration) -> Self {
        self.refresh_timeout = refresh_timeout;
        self
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> CoordinatorConfig<D> {
        CoordinatorConfig {
            safety_margin: self.safety_margin,
            refresh_timeout: self.refresh_timeout,
            clock,
        }
    }

    /// The safety margin before expiry
    #[inline]
    pub fn safety_margin(&self) -> DurationSecs {
        self.safety_margin
    }

    /// The bound on a single refresh attempt
    #[inline]
    pub fn refresh_timeout(&self) -> Duration {
        self.refresh_timeout
    }
}

impl<C: Clock> CoordinatorConfig<C> {
    /// The current time according to the configured clock
    #[inline]
    pub fn now(&self) -> UnixTime {
        self.clock.now()
    }
}
