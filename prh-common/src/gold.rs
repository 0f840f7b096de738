//! Gold comparison: judging a captured output stream against a recorded
//! expectation.
//!
//! Comparison is pure and stateless. A gold expectation is either the
//! literal expected content of a stream or a predicate (substring
//! containment, optionally negated, or a regex). Literal comparison is
//! against the full captured stream, not line-by-line; the diff rendered
//! on failure is line-oriented for readability.

use regex::Regex;

/// Which captured stream a gold expectation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamSelector {
    Stdout,
    Stderr,
    /// stdout and stderr, concatenated in that order.
    All,
}

impl std::fmt::Display for StreamSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
            Self::All => write!(f, "all"),
        }
    }
}

/// Expected content for one stream.
#[derive(Debug, Clone)]
pub enum GoldExpectation {
    /// Exact equality with the full captured text.
    Literal(String),
    /// Stream must contain the substring.
    Contains {
        needle: String,
        message: Option<String>,
    },
    /// Stream must NOT contain the substring.
    NotContains {
        needle: String,
        message: Option<String>,
    },
    /// Stream must match the pattern somewhere.
    Matches {
        pattern: Regex,
        message: Option<String>,
    },
}

impl GoldExpectation {
    pub fn literal(content: impl Into<String>) -> Self {
        Self::Literal(content.into())
    }

    pub fn contains(needle: impl Into<String>) -> Self {
        Self::Contains {
            needle: needle.into(),
            message: None,
        }
    }

    pub fn not_contains(needle: impl Into<String>) -> Self {
        Self::NotContains {
            needle: needle.into(),
            message: None,
        }
    }

    pub fn matches(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::Matches {
            pattern: Regex::new(pattern)?,
            message: None,
        })
    }

    /// Attach an explanation surfaced only when the predicate fails.
    pub fn with_message(mut self, text: impl Into<String>) -> Self {
        match &mut self {
            Self::Literal(_) => {}
            Self::Contains { message, .. }
            | Self::NotContains { message, .. }
            | Self::Matches { message, .. } => *message = Some(text.into()),
        }
        self
    }

    /// Load a gold file from disk.
    pub fn load(path: &std::path::Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_gold_text(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Parse gold-file text. A first line of `%% contains`, `%% excludes`
    /// or `%% matches` makes the remaining lines a predicate payload;
    /// anything else is a literal expectation of the whole file content.
    pub fn from_gold_text(text: &str) -> Result<Self, regex::Error> {
        let Some((first, rest)) = text.split_once('\n') else {
            return Ok(Self::literal(text.to_string()));
        };
        let payload = rest.strip_suffix('\n').unwrap_or(rest);
        match first.trim() {
            "%% contains" => Ok(Self::contains(payload)),
            "%% excludes" => Ok(Self::not_contains(payload)),
            "%% matches" => Self::matches(payload),
            _ => Ok(Self::literal(text.to_string())),
        }
    }
}

/// Outcome of one comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail(String),
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

/// Compare a captured stream against an expectation.
pub fn compare(actual: &str, expectation: &GoldExpectation) -> Verdict {
    match expectation {
        GoldExpectation::Literal(expected) => {
            if actual == expected {
                Verdict::Pass
            } else {
                Verdict::Fail(render_diff(expected, actual))
            }
        }
        GoldExpectation::Contains { needle, message } => {
            if actual.contains(needle) {
                Verdict::Pass
            } else {
                Verdict::Fail(explain(
                    message,
                    format!("stream does not contain {needle:?}"),
                ))
            }
        }
        GoldExpectation::NotContains { needle, message } => {
            if actual.contains(needle) {
                Verdict::Fail(explain(message, format!("stream contains {needle:?}")))
            } else {
                Verdict::Pass
            }
        }
        GoldExpectation::Matches { pattern, message } => {
            if pattern.is_match(actual) {
                Verdict::Pass
            } else {
                Verdict::Fail(explain(
                    message,
                    format!("stream does not match /{}/", pattern.as_str()),
                ))
            }
        }
    }
}

fn explain(message: &Option<String>, detail: String) -> String {
    match message {
        Some(message) => format!("{message}: {detail}"),
        None => detail,
    }
}

/// Line-oriented diff naming the first divergence. Never empty for
/// unequal inputs.
fn render_diff(expected: &str, actual: &str) -> String {
    let expected_lines: Vec<&str> = expected.lines().collect();
    let actual_lines: Vec<&str> = actual.lines().collect();

    for (index, (e, a)) in expected_lines.iter().zip(actual_lines.iter()).enumerate() {
        if e != a {
            return format!(
                "first difference at line {}:\n- expected: {e:?}\n- actual:   {a:?}",
                index + 1
            );
        }
    }

    if expected_lines.len() != actual_lines.len() {
        let boundary = expected_lines.len().min(actual_lines.len());
        let (side, line) = if expected_lines.len() > actual_lines.len() {
            ("expected", expected_lines[boundary])
        } else {
            ("actual", actual_lines[boundary])
        };
        return format!(
            "streams diverge at line {}: {side} has extra line {line:?}",
            boundary + 1
        );
    }

    // Same lines but different raw text (trailing newline or \r\n).
    format!(
        "streams differ only in line endings or trailing whitespace \
         (expected {} bytes, actual {} bytes)",
        expected.len(),
        actual.len()
    )
}
