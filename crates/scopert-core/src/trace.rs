//! Fixed-depth call-site traces for leaked-allocation reports.
//!
//! Captured only with the `alloc-traces` feature in debug builds. The trace is
//! rendered eagerly and cut to [`TRACE_DEPTH`] frames so a leak report never
//! grows with the depth of the allocating stack.

use crate::config::TRACE_DEPTH;

/// Rendered frames of one allocation site, innermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocTrace {
    frames: Vec<String>,
}

impl AllocTrace {
    /// Capture the current call stack, or `None` when traces are compiled out.
    #[must_use]
    pub fn capture() -> Option<Self> {
        #[cfg(all(feature = "alloc-traces", debug_assertions))]
        {
            let rendered = std::backtrace::Backtrace::force_capture().to_string();
            Some(Self::from_rendered(&rendered))
        }
        #[cfg(not(all(feature = "alloc-traces", debug_assertions)))]
        {
            None
        }
    }

    /// Build a trace from `std::backtrace::Backtrace`'s display form.
    ///
    /// Frame header lines look like `  3: crate::module::function`; the
    /// `at file:line` continuation lines are folded into their frame.
    #[must_use]
    pub fn from_rendered(rendered: &str) -> Self {
        let mut frames: Vec<String> = Vec::new();
        for line in rendered.lines() {
            let trimmed = line.trim_start();
            if let Some(location) = trimmed.strip_prefix("at ") {
                if let Some(last) = frames.last_mut() {
                    last.push_str(" @ ");
                    last.push_str(location);
                }
                continue;
            }
            if frames.len() == TRACE_DEPTH {
                break;
            }
            let Some((index, symbol)) = trimmed.split_once(": ") else {
                continue;
            };
            if index.chars().all(|c| c.is_ascii_digit()) {
                frames.push(symbol.to_string());
            }
        }
        Self { frames }
    }

    #[must_use]
    pub fn frames(&self) -> &[String] {
        &self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_frames_fold_locations() {
        let rendered = "   0: app::make\n             at ./src/app.rs:10:5\n   1: app::main\n";
        let trace = AllocTrace::from_rendered(rendered);
        assert_eq!(
            trace.frames(),
            &["app::make @ ./src/app.rs:10:5".to_string(), "app::main".to_string()]
        );
    }

    #[test]
    fn depth_is_capped() {
        let rendered: String = (0..64).map(|i| format!("  {i}: f{i}\n")).collect();
        let trace = AllocTrace::from_rendered(&rendered);
        assert_eq!(trace.frames().len(), TRACE_DEPTH);
        assert_eq!(trace.frames()[0], "f0");
    }

    #[test]
    fn capture_respects_build_mode() {
        let trace = AllocTrace::capture();
        assert_eq!(
            trace.is_some(),
            cfg!(all(feature = "alloc-traces", debug_assertions))
        );
    }
}
