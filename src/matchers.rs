//! Build-output problem matching seam.
//!
//! The client treats matchers as collaborators with a narrow contract:
//! `clear()` before a build, `match_line()` per output line, and
//! `diagnostics()` after exit. The matching grammar itself is external;
//! one stock GCC-style matcher ships for convenience.

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::types::{BuildDiagnostic, DiagnosticSeverity};

/// Turns raw build output lines into structured diagnostics.
pub trait ProblemMatcher: Send {
    /// Reset accumulated state before a new build.
    fn clear(&mut self);

    /// Feed one line of build output.
    fn match_line(&mut self, line: &str);

    /// Collect the diagnostics gathered since the last `clear()`.
    fn diagnostics(&self) -> Vec<BuildDiagnostic>;
}

/// Matcher for the `file:line:col: severity: message` shape emitted by
/// gcc and clang.
pub struct GccMatcher {
    pattern: Regex,
    base_directory: PathBuf,
    collected: Vec<BuildDiagnostic>,
}

impl GccMatcher {
    /// `base_directory` resolves relative paths in the output, typically
    /// the build directory.
    #[must_use]
    pub fn new(base_directory: impl Into<PathBuf>) -> Self {
        Self {
            pattern: Regex::new(
                r"^(.+?):(\d+):(\d+):\s+(?:fatal\s+)?(error|warning|note):\s+(.*)$",
            )
            .expect("valid gcc diagnostic regex"),
            base_directory: base_directory.into(),
            collected: Vec::new(),
        }
    }

    fn resolve(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_directory.join(path)
        }
    }
}

impl ProblemMatcher for GccMatcher {
    fn clear(&mut self) {
        self.collected.clear();
    }

    fn match_line(&mut self, line: &str) {
        let Some(caps) = self.pattern.captures(line) else {
            return;
        };
        let (Ok(line_no), Ok(col)) = (caps[2].parse::<u32>(), caps[3].parse::<u32>()) else {
            return;
        };
        let severity = match &caps[4] {
            "error" => DiagnosticSeverity::Error,
            "warning" => DiagnosticSeverity::Warning,
            _ => DiagnosticSeverity::Information,
        };
        self.collected.push(BuildDiagnostic::new(
            self.resolve(&caps[1]),
            line_no.saturating_sub(1),
            col.saturating_sub(1),
            severity,
            caps[5].to_string(),
        ));
    }

    fn diagnostics(&self) -> Vec<BuildDiagnostic> {
        self.collected.clone()
    }
}
