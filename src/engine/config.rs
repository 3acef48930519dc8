use std::time::Duration;

/// Tunable knobs for the engine.
///
/// Values resolve from the environment (via a `.env` file when present)
/// with sensible defaults, so deployments can retune without code changes:
///
/// - `DRAFTLOOM_MAX_ITERATIONS` - revision cap per thread (default 3)
/// - `DRAFTLOOM_SEND_TIMEOUT_MS` - per-observer delivery budget (default 1500)
/// - `DRAFTLOOM_STEP_TIMEOUT_MS` - per-step execution budget (default none)
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Hard cap on drafts per thread; routing finalizes once reached.
    pub max_iterations: u64,
    /// Budget for delivering one progress message to one observer.
    pub send_timeout: Duration,
    /// Budget for one step execution; `None` means unbounded.
    pub step_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            send_timeout: Duration::from_millis(1500),
            step_timeout: None,
        }
    }
}

impl EngineConfig {
    /// Resolve configuration from the environment, falling back to defaults
    /// for anything unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        Self {
            max_iterations: env_u64("DRAFTLOOM_MAX_ITERATIONS")
                .unwrap_or(defaults.max_iterations)
                .max(1),
            send_timeout: env_u64("DRAFTLOOM_SEND_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.send_timeout),
            step_timeout: env_u64("DRAFTLOOM_STEP_TIMEOUT_MS").map(Duration::from_millis),
        }
    }

    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    #[must_use]
    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    #[must_use]
    pub fn with_step_timeout(mut self, step_timeout: Duration) -> Self {
        self.step_timeout = Some(step_timeout);
        self
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
