use std::fmt;
use std::fmt::Formatter;

use serde::{Deserialize, Serialize};

/// Severity of a single risk signal
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Indicator {
    /// Nothing suspicious found
    Safe,
    /// Potentially suspicious
    Warning,
    /// Identified as risky, or could not be verified
    Danger,
    /// Information not found
    NotFound,
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Indicator::Safe => write!(f, "safe"),
            Indicator::Warning => write!(f, "warning"),
            Indicator::Danger => write!(f, "danger"),
            Indicator::NotFound => write!(f, "not-found"),
        }
    }
}

impl Indicator {
    /// Icon of indicator in ASCII or Unicode
    ///
    /// ```
    /// # use antiphish::Indicator;
    /// assert_eq!("[v]", Indicator::Safe.icon(true));
    /// assert_eq!("\u{274c}", Indicator::Danger.icon(false));
    /// ```
    pub fn icon(&self, ascii: bool) -> &'static str {
        match self {
            Indicator::Safe => {
                if ascii {
                    "[v]"
                } else {
                    "\u{2705}"
                }
            }
            Indicator::Warning => {
                if ascii {
                    "[-]"
                } else {
                    "\u{26a0}\u{fe0f}"
                }
            }
            Indicator::Danger => {
                if ascii {
                    "[x]"
                } else {
                    "\u{274c}"
                }
            }
            Indicator::NotFound => {
                if ascii {
                    "[?]"
                } else {
                    "\u{2753}"
                }
            }
        }
    }
}

/// Text explanation paired with its severity
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RiskSignal {
    /// Human-readable outcome
    pub message: String,
    /// Severity of the outcome
    pub indicator: Indicator,
}

impl RiskSignal {
    /// Create a signal
    pub fn new<T>(message: T, indicator: Indicator) -> Self
    where
        T: Into<String>,
    {
        RiskSignal {
            message: message.into(),
            indicator,
        }
    }
}

impl fmt::Display for RiskSignal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.indicator.icon(false), self.message)
    }
}
