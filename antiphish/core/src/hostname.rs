use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::{Error, Indicator, RiskSignal};

static HOSTNAME_CHARACTERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w.-]+$").expect("hostname pattern"));

static IPV4_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,3}(\.\d{1,3}){3}$").expect("IPv4 pattern"));

/// Raw input, corrected URL and the hostname extracted from it
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostnameQuery {
    /// Input as given by the user
    pub raw: String,
    /// Input with an explicit scheme
    pub url: String,
    /// Host component of [`HostnameQuery::url`]
    pub hostname: String,
}

impl HostnameQuery {
    /// Extract hostname from a URL or a bare hostname. `https://` is assumed
    /// when no scheme is given.
    ///
    /// ```
    /// # use antiphish::HostnameQuery;
    /// let query = HostnameQuery::parse("example.com/login").unwrap();
    /// assert_eq!("https://example.com/login", query.url);
    /// assert_eq!("example.com", query.hostname);
    /// ```
    pub fn parse<T>(raw: T) -> Result<Self, Error>
    where
        T: AsRef<str>,
    {
        let raw = raw.as_ref();
        let trimmed = raw.trim();
        let url = if has_http_scheme(trimmed) {
            trimmed.to_string()
        } else {
            format!("https://{trimmed}")
        };

        let parsed = Url::parse(&url).map_err(|e| Error::InvalidUrl(format!("{raw}: {e}")))?;
        let hostname = match parsed.host_str() {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => return Err(Error::InvalidUrl(format!("{raw}: no hostname found"))),
        };

        Ok(HostnameQuery {
            raw: raw.to_string(),
            url,
            hostname,
        })
    }
}

fn has_http_scheme(s: &str) -> bool {
    ["http://", "https://"].iter().any(|prefix| {
        s.get(..prefix.len())
            .map_or(false, |head| head.eq_ignore_ascii_case(prefix))
    })
}

/// Is the hostname a dotted-quad IPv4 literal?
pub(crate) fn is_ip_literal(hostname: &str) -> bool {
    IPV4_LITERAL.is_match(hostname)
}

/// Does the hostname, without a leading `www.`, contain anything other than
/// word characters, dots and hyphens?
pub(crate) fn has_special_characters(hostname: &str) -> bool {
    let stripped = hostname.strip_prefix("www.").unwrap_or(hostname);
    !HOSTNAME_CHARACTERS.is_match(stripped)
}

/// Lexical anomaly check on a hostname
///
/// ```
/// # use antiphish::is_suspicious;
/// assert!(is_suspicious("192.168.1.1"));
/// assert!(!is_suspicious("www.example.com"));
/// ```
pub fn is_suspicious(hostname: &str) -> bool {
    is_ip_literal(hostname) || has_special_characters(hostname)
}

/// Format signal of a hostname
pub fn format_signal(hostname: &str) -> RiskSignal {
    if is_ip_literal(hostname) {
        RiskSignal::new(
            "Warning: the address is a raw IP address instead of a domain name, which may indicate phishing",
            Indicator::Warning,
        )
    } else if has_special_characters(hostname) {
        RiskSignal::new(
            "Warning: the domain contains special characters, which may indicate phishing",
            Indicator::Warning,
        )
    } else {
        RiskSignal::new("The domain looks normal in terms of format", Indicator::Safe)
    }
}
