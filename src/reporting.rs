//! Watchdog reports and where they go.
//!
//! Reports are rendered to text up front and handed to a [`LogSink`]. The default sink,
//! [`TracingSink`], forwards them to [`tracing`] at warn level.
use std::fmt;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Line delimiting every report.
pub(crate) const SEPARATOR: &str = "----------------------------------------";

/// Destination for watchdog reports.
///
/// Each call receives one complete, multi-line report. Sinks are called from the timer thread, so
/// they should not block for long.
pub trait LogSink: Send + Sync {
    /// Record a single report.
    fn log(&self, message: &str);
}

impl<F> LogSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, message: &str) {
        self(message)
    }
}

/// Sink that emits reports as `tracing` warnings under the `lockwatch` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, message: &str) {
        tracing::warn!(target: "lockwatch", "{message}");
    }
}

/// Kind of primitive a report is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Primitive {
    Mutex,
    RwLock,
}

/// Locking mode of the acquisition a report is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Exclusive,
    Shared,
}

/// The lock operation a watchdog was armed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Site {
    primitive: Primitive,
    mode: Mode,
}

impl Site {
    pub const MUTEX: Self = Self {
        primitive: Primitive::Mutex,
        mode: Mode::Exclusive,
    };
    pub const RWLOCK_EXCLUSIVE: Self = Self {
        primitive: Primitive::RwLock,
        mode: Mode::Exclusive,
    };
    pub const RWLOCK_SHARED: Self = Self {
        primitive: Primitive::RwLock,
        mode: Mode::Shared,
    };

    fn primitive_name(&self) -> &'static str {
        match self.primitive {
            Primitive::Mutex => "Mutex",
            Primitive::RwLock => "RwLock",
        }
    }

    fn acquire_name(&self) -> &'static str {
        match (self.primitive, self.mode) {
            (Primitive::Mutex, _) => "lock",
            (Primitive::RwLock, Mode::Exclusive) => "lock_exclusive",
            (Primitive::RwLock, Mode::Shared) => "lock_shared",
        }
    }

    fn release_name(&self) -> &'static str {
        match (self.primitive, self.mode) {
            (Primitive::Mutex, _) => "unlock",
            (Primitive::RwLock, Mode::Exclusive) => "unlock_exclusive",
            (Primitive::RwLock, Mode::Shared) => "unlock_shared",
        }
    }
}

/// A single watchdog report, formatted through [`fmt::Display`].
pub(crate) enum Report<'a> {
    /// An acquisition has been blocked for longer than the timeout.
    Acquire {
        site: Site,
        elapsed: Duration,
        since: SystemTime,
        this_call: &'a str,
        last_call: &'a str,
    },
    /// A lock has been held for longer than the timeout.
    Release {
        site: Site,
        elapsed: Duration,
        since: SystemTime,
        last_call: &'a str,
    },
}

impl Report<'_> {
    /// Render this report and hand it to `sink`.
    pub fn emit(&self, sink: &dyn LogSink) {
        sink.log(&self.to_string());
    }
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "{SEPARATOR}")?;

        match *self {
            Report::Acquire {
                site,
                elapsed,
                since,
                this_call,
                last_call,
            } => {
                writeln!(
                    f,
                    "{} {}() Timeout ({:.3}s), possible deadlock",
                    site.primitive_name(),
                    site.acquire_name(),
                    elapsed.as_secs_f64()
                )?;
                writeln!(f, "  since: {}", Timestamp(since))?;
                writeln!(f, "  this call:")?;
                f.write_str(this_call)?;
                writeln!(f, "  last call:")?;
                f.write_str(last_call)?;
            }
            Report::Release {
                site,
                elapsed,
                since,
                last_call,
            } => {
                writeln!(
                    f,
                    "{} {}() Wait Timeout ({:.3}s), possible deadlock",
                    site.primitive_name(),
                    site.release_name(),
                    elapsed.as_secs_f64()
                )?;
                writeln!(f, "  since: {}", Timestamp(since))?;
                writeln!(f, "  last call:")?;
                f.write_str(last_call)?;
            }
        }

        f.write_str(SEPARATOR)
    }
}

/// Wall clock time as seconds since the Unix epoch, with millisecond precision.
struct Timestamp(SystemTime);

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let since_epoch = self.0.duration_since(UNIX_EPOCH).unwrap_or_default();
        write!(
            f,
            "{}.{:03}",
            since_epoch.as_secs(),
            since_epoch.subsec_millis()
        )
    }
}

/// Sink collecting reports in memory.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub(crate) struct Recorder {
    messages: std::sync::Arc<parking_lot::Mutex<Vec<String>>>,
}

#[cfg(test)]
impl Recorder {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    /// Number of recorded reports containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|message| message.contains(needle))
            .count()
    }

    /// Poll until `count(needle)` reaches `expected`, giving up after a few seconds.
    pub fn wait_for(&self, needle: &str, expected: usize) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while std::time::Instant::now() < deadline {
            if self.count(needle) >= expected {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

#[cfg(test)]
impl LogSink for Recorder {
    fn log(&self, message: &str) {
        self.messages.lock().push(message.to_owned());
    }
}

/// Extract the elapsed seconds from a rendered report header.
#[cfg(test)]
pub(crate) fn reported_elapsed(message: &str) -> Option<f64> {
    let start = message.find("Timeout (")? + "Timeout (".len();
    let end = start + message[start..].find("s)")?;
    message[start..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn test_acquire_report() {
        let report = Report::Acquire {
            site: Site::RWLOCK_SHARED,
            elapsed: Duration::from_millis(3_250),
            since: UNIX_EPOCH + Duration::from_millis(1_500),
            this_call: "    stack: 1 [file: a.rs] [func: a] [line: 1]\n",
            last_call: "    stack: 1 [file: b.rs] [func: b] [line: 2]\n",
        };

        let expected = format!(
            "\n{SEPARATOR}\n\
             RwLock lock_shared() Timeout (3.250s), possible deadlock\n  \
             since: 1.500\n  \
             this call:\n    stack: 1 [file: a.rs] [func: a] [line: 1]\n  \
             last call:\n    stack: 1 [file: b.rs] [func: b] [line: 2]\n\
             {SEPARATOR}"
        );

        assert_eq!(report.to_string(), expected);
    }

    #[test]
    fn test_release_report() {
        let report = Report::Release {
            site: Site::MUTEX,
            elapsed: Duration::from_millis(100),
            since: UNIX_EPOCH,
            last_call: "",
        };

        let rendered = report.to_string();

        assert!(rendered.contains("Mutex unlock() Wait Timeout (0.100s), possible deadlock\n"));
        assert!(!rendered.contains("this call:"));
        assert!(rendered.starts_with(&format!("\n{SEPARATOR}\n")));
        assert!(rendered.ends_with(SEPARATOR));
        assert_eq!(reported_elapsed(&rendered), Some(0.1));
    }

    #[test]
    fn test_closure_sink() {
        let messages = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&messages);
        let sink = move |message: &str| recorder.lock().push(message.to_owned());

        Report::Release {
            site: Site::RWLOCK_EXCLUSIVE,
            elapsed: Duration::from_secs(1),
            since: UNIX_EPOCH,
            last_call: "",
        }
        .emit(&sink);

        let messages = messages.lock();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("RwLock unlock_exclusive() Wait Timeout"));
    }
}
