//! The debug switch and the state shared by all instrumented locks.
use std::env;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use crate::registry::TimerRegistry;
use crate::reporting::LogSink;
use crate::reporting::TracingSink;
use crate::timer::TimerService;

/// Environment variable enabling diagnostics for [`Diagnostics::global`].
pub const DEBUG_ENV: &str = "LOCKWATCH_DEBUG";
/// Environment variable holding the watchdog timeout in milliseconds.
pub const TIMEOUT_ENV: &str = "LOCKWATCH_TIMEOUT_MS";

/// Settings for the lock watchdogs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugConfig {
    /// Whether locks are instrumented at all.
    pub enabled: bool,
    /// How long an acquisition may block, or a lock may stay held, before it is reported.
    pub timeout: Duration,
}

impl DebugConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

    /// Configuration with diagnostics switched on.
    pub fn enabled(timeout: Duration) -> Self {
        Self {
            enabled: true,
            timeout,
        }
    }

    /// Read the configuration from `LOCKWATCH_DEBUG` and `LOCKWATCH_TIMEOUT_MS`.
    ///
    /// `LOCKWATCH_DEBUG` accepts `1`, `true`, `on` and `yes` in any case. Missing or unparsable
    /// values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_vars(
            env::var(DEBUG_ENV).ok().as_deref(),
            env::var(TIMEOUT_ENV).ok().as_deref(),
        )
    }

    fn from_vars(debug: Option<&str>, timeout_ms: Option<&str>) -> Self {
        let enabled = debug.is_some_and(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "on" | "yes"
            )
        });
        let timeout = timeout_ms
            .and_then(|value| value.trim().parse::<u64>().ok())
            .filter(|&ms| ms > 0)
            .map_or(Self::DEFAULT_TIMEOUT, Duration::from_millis);

        Self { enabled, timeout }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }
}

struct Shared {
    enabled: AtomicBool,
    timeout_nanos: AtomicU64,
    registry: Arc<TimerRegistry>,
    timers: TimerService,
    sink: Arc<dyn LogSink>,
}

/// Debug switch, timeout, timer registry and log sink shared by a group of locks.
///
/// Cloning is cheap and yields a handle to the same state. Locks created through
/// [`Mutex::new`][crate::parkinglot::Mutex] and friends use [`Diagnostics::global`]; locks created
/// through [`mutex_with`][crate::parkinglot::mutex_with] and friends use the instance they were
/// given, which keeps tests isolated from each other.
#[derive(Clone)]
pub struct Diagnostics {
    shared: Arc<Shared>,
}

static GLOBAL: OnceLock<Diagnostics> = OnceLock::new();

impl Diagnostics {
    /// Create diagnostics that report through [`TracingSink`].
    pub fn new(config: DebugConfig) -> Self {
        Self::with_sink(config, TracingSink)
    }

    /// Create diagnostics that report through `sink`.
    pub fn with_sink(config: DebugConfig, sink: impl LogSink + 'static) -> Self {
        let diagnostics = Self {
            shared: Arc::new(Shared {
                enabled: AtomicBool::new(false),
                timeout_nanos: AtomicU64::new(0),
                registry: Arc::default(),
                timers: TimerService::new(),
                sink: Arc::new(sink),
            }),
        };
        diagnostics.set_debug(config.enabled, Some(config.timeout));

        diagnostics
    }

    /// The process-wide instance, configured from the environment on first use.
    pub fn global() -> &'static Diagnostics {
        GLOBAL.get_or_init(|| Self::new(DebugConfig::from_env()))
    }

    /// Switch diagnostics on or off, optionally changing the timeout.
    ///
    /// Watchdogs armed for locks that are currently held stay armed until the lock is released,
    /// even when diagnostics are switched off in the meantime. Releasing stops them either way.
    pub fn set_debug(&self, enabled: bool, timeout: Option<Duration>) {
        if let Some(timeout) = timeout {
            let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
            self.shared.timeout_nanos.store(nanos, Ordering::Relaxed);
        }
        self.shared.enabled.store(enabled, Ordering::Release);
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_nanos(self.shared.timeout_nanos.load(Ordering::Relaxed))
    }

    /// Snapshot of the current settings.
    pub fn config(&self) -> DebugConfig {
        DebugConfig {
            enabled: self.is_enabled(),
            timeout: self.timeout(),
        }
    }

    /// The held-lock watchdogs currently armed.
    pub fn registry(&self) -> &TimerRegistry {
        &self.shared.registry
    }

    pub(crate) fn shared_registry(&self) -> Arc<TimerRegistry> {
        Arc::clone(&self.shared.registry)
    }

    pub(crate) fn timers(&self) -> &TimerService {
        &self.shared.timers
    }

    pub(crate) fn sink(&self) -> Arc<dyn LogSink> {
        Arc::clone(&self.shared.sink)
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(DebugConfig::default())
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("enabled", &self.is_enabled())
            .field("timeout", &self.timeout())
            .field("registry", &self.shared.registry)
            .finish_non_exhaustive()
    }
}

/// Configure the process-wide diagnostics.
///
/// Switches lock instrumentation on or off and, when `timeout` is given, changes how long an
/// acquisition or hold may last before it is reported. Affects every lock that was not bound to
/// its own [`Diagnostics`].
pub fn set_debug(enabled: bool, timeout: Option<Duration>) {
    Diagnostics::global().set_debug(enabled, timeout);
}
