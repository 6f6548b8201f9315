//! Compiler logging.
//!
//! - `log_phase!` for top level progress (`-v`)
//! - `log_trace!` for per pass details (`-vv`)
//!
//! All output goes to stderr so it never mixes with `--emit` dumps on stdout.

use std::sync::atomic::{AtomicU8, Ordering};

static VERBOSITY: AtomicU8 = AtomicU8::new(0);

pub fn set_verbosity(level: u8) {
    VERBOSITY.store(level, Ordering::Relaxed);
}

pub fn verbosity() -> u8 {
    VERBOSITY.load(Ordering::Relaxed)
}

pub fn log_phase_enabled() -> bool {
    verbosity() >= 1
}

pub fn log_trace_enabled() -> bool {
    verbosity() >= 2
}

/// Log a compiler phase message with an arrow prefix.
///
/// ```ignore
/// log_phase!("lowering function {}", name);
/// ```
#[macro_export]
macro_rules! log_phase {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{
        if $crate::log::log_phase_enabled() {
            use colored::Colorize;
            eprintln!("{} {}", "-->".bright_green().bold(), format!($fmt $(, $arg)*));
        }
    }};
}

/// Log a detail below the current phase, indented under its arrow.
#[macro_export]
macro_rules! log_trace {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{
        if $crate::log::log_trace_enabled() {
            use colored::Colorize;
            eprintln!(
                "{:indent$}{} {}",
                "",
                "-->".bright_black(),
                format!($fmt $(, $arg)*),
                indent = 4
            );
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_gates_the_levels() {
        set_verbosity(2);
        assert!(log_phase_enabled());
        assert!(log_trace_enabled());

        set_verbosity(1);
        assert!(log_phase_enabled());
        assert!(!log_trace_enabled());

        set_verbosity(0);
        assert!(!log_phase_enabled());
    }
}
