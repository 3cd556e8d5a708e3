#![deny(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications
)]

//! Phishing risk check for URLs and HTTPS certificates

use thiserror::Error;

pub use age::{age_signal, classify_age, CreationDate};
pub use certificate::{CertificateJSON, CertificateRecord};
pub use checker::{RiskChecker, Verdict, VerdictJSON};
pub use hostname::{format_signal, is_suspicious, HostnameQuery};
pub use inspector::{explain_connectivity_failure, CertificateInspector};
pub use reputation::{ReputationVerdict, SafeBrowsing, ThreatList, DEFAULT_THREAT_LIST_URL};
pub use settings::Settings;
pub use signal::{Indicator, RiskSignal};
pub use whois::{parse_creation_date, RegistrationLookup, WhoisResolver};

mod age;
mod certificate;
mod checker;
mod hostname;
mod inspector;
mod reputation;
mod settings;
mod signal;
mod whois;

/// Error surfaced to the caller of a check
#[derive(Debug, Error)]
pub enum Error {
    /// Input could not be turned into a hostname. Terminal, not retried.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    /// DNS, TCP or TLS failure while probing a host. The caller may retry.
    #[error("{explanation} ({reason})")]
    Connectivity {
        /// Human-readable explanation picked from the reason
        explanation: &'static str,
        /// Underlying failure text
        reason: String,
    },
    /// Unexpected failure, e.g. a certificate that cannot be decoded
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a [`Error::Connectivity`] whose explanation is derived from the reason.
    ///
    /// ```
    /// # use antiphish::Error;
    /// let e = Error::connectivity("no such host: example.invalid");
    /// assert!(matches!(e, Error::Connectivity { .. }));
    /// ```
    pub fn connectivity<T>(reason: T) -> Self
    where
        T: Into<String>,
    {
        let reason = reason.into();
        Error::Connectivity {
            explanation: explain_connectivity_failure(&reason),
            reason,
        }
    }
}

/// Failure of an upstream collaborator. Degrades a single signal and never
/// reaches the caller of [`RiskChecker::check`].
#[derive(Debug, Error)]
pub enum CheckError {
    /// Error from [`reqwest`] crate.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Upstream did not answer in time.
    #[error("timed out after {0}s")]
    Timeout(u64),
    /// Threat list cannot be queried without a key.
    #[error("no API key configured for the threat list")]
    MissingApiKey,
}
