//! Call stack snapshots for reports.
//!
//! [`capture`] renders the calling thread's stack as text, one line per frame:
//!
//! ```text
//!     stack: 1 [file: src/main.rs] [func: app::worker] [line: 42]
//! ```
//!
//! Frames belonging to the stack walker and to the lock wrappers themselves are dropped, so the
//! first line is the code that called `lock()`, `read()` or `write()`. At most [`MAX_FRAMES`]
//! frames are rendered.
//!
//! Without the `backtraces` feature, [`capture`] is free and always returns an empty string.

/// Maximum number of frames rendered by [`capture`].
pub const MAX_FRAMES: usize = 50;

/// Capture the current call stack as text.
///
/// Every line, including the last one, ends in a newline. Returns an empty string when no frames
/// can be resolved.
#[cfg(feature = "backtraces")]
#[cfg_attr(docsrs, doc(cfg(feature = "backtraces")))]
#[inline(never)]
pub fn capture() -> String {
    use std::fmt::Write;

    let mut frames = Vec::with_capacity(MAX_FRAMES);
    let mut leading = true;

    backtrace::trace(|frame| {
        backtrace::resolve_frame(frame, |symbol| {
            let resolved = Frame::from_symbol(symbol);
            if leading && resolved.is_internal() {
                return;
            }
            leading = false;

            if frames.len() < MAX_FRAMES {
                frames.push(resolved);
            }
        });

        frames.len() < MAX_FRAMES
    });

    let mut rendered = String::new();
    for (index, frame) in frames.iter().enumerate() {
        let _ = writeln!(
            rendered,
            "    stack: {} [file: {}] [func: {}] [line: {}]",
            index + 1,
            frame.file,
            frame.function,
            frame.line
        );
    }

    rendered
}

/// Capture the current call stack as text.
///
/// The `backtraces` feature is disabled, so this is always empty.
#[cfg(not(feature = "backtraces"))]
#[inline]
pub fn capture() -> String {
    String::new()
}

/// Name fragments of the frames that sit between user code and the stack walker.
#[cfg(feature = "backtraces")]
const INTERNAL_FRAMES: &[&str] = &[
    "backtrace::",
    "lockwatch::stack::capture",
    "WatchdogRaw",
    "lock_api::",
];

#[cfg(feature = "backtraces")]
struct Frame {
    file: String,
    function: String,
    line: u32,
}

#[cfg(feature = "backtraces")]
impl Frame {
    fn from_symbol(symbol: &backtrace::Symbol) -> Self {
        Self {
            file: symbol
                .filename()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "?".to_owned()),
            // Alternate formatting drops the trailing symbol hash
            function: symbol
                .name()
                .map(|name| format!("{name:#}"))
                .unwrap_or_else(|| "?".to_owned()),
            line: symbol.lineno().unwrap_or(0),
        }
    }

    fn is_internal(&self) -> bool {
        INTERNAL_FRAMES
            .iter()
            .any(|fragment| self.function.contains(fragment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[inline(never)]
    fn nested_capture(depth: usize) -> String {
        if depth == 0 {
            capture()
        } else {
            nested_capture(depth - 1)
        }
    }

    #[test]
    fn test_capture_is_bounded() {
        let stack = nested_capture(2 * MAX_FRAMES);

        assert!(stack.lines().count() <= MAX_FRAMES);
    }

    #[cfg(feature = "backtraces")]
    #[test]
    fn test_capture_format() {
        let stack = capture();

        // Debug info may be unavailable, but the walker itself must not show up.
        assert!(!stack.contains("[func: backtrace::"));
        assert!(!stack.contains("[func: lockwatch::stack::capture"));

        for (index, line) in stack.lines().enumerate() {
            assert!(line.starts_with(&format!("    stack: {} [file: ", index + 1)));
            assert!(line.contains("] [func: "));
            assert!(line.ends_with(']'));
        }

        if !stack.is_empty() {
            assert!(stack.ends_with('\n'));
        }
    }

    #[cfg(not(feature = "backtraces"))]
    #[test]
    fn test_capture_disabled() {
        assert!(capture().is_empty());
    }
}
