use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use futures::future::BoxFuture;
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::age::CREATION_DATE_FORMAT;
use crate::hostname::is_ip_literal;
use crate::{CheckError, CreationDate};

const WHOIS_PORT: u16 = 43;

// upper bound of one WHOIS response
const MAX_RECORD_SIZE: u64 = 256 * 1024;

const CREATION_DATE_KEYS: &[&str] = &[
    "creation date",
    "created",
    "created on",
    "domain registration date",
    "registered",
    "registered on",
    "registration date",
    "registration time",
];

const DATE_TIME_FORMATS: &[&str] = &[
    CREATION_DATE_FORMAT,
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%d-%b-%Y %H:%M:%S",
];

const COUNTRY_SECOND_LEVELS: &[&str] = &["ac", "co", "com", "edu", "gov", "net", "or", "org"];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d-%b-%Y", "%Y.%m.%d", "%d.%m.%Y", "%Y/%m/%d"];

/// Source of registration creation dates
pub trait RegistrationLookup: Send + Sync {
    /// Creation date of the domain that `hostname` belongs to
    fn creation_date<'a>(
        &'a self,
        hostname: &'a str,
    ) -> BoxFuture<'a, Result<CreationDate, CheckError>>;
}

/// WHOIS client speaking the port 43 protocol
#[derive(Clone, Debug)]
pub struct WhoisResolver {
    /// Server asked first, usually IANA, which refers to the registry
    pub server: String,
    /// Port of every server asked
    pub port: u16,
    /// Timeout of each query
    pub timeout: Duration,
}

impl Default for WhoisResolver {
    fn default() -> Self {
        WhoisResolver {
            server: "whois.iana.org".to_string(),
            port: WHOIS_PORT,
            timeout: Duration::from_secs(10),
        }
    }
}

impl WhoisResolver {
    /// Registry record of a domain, following the referral of the first
    /// server. `None` when no registry is referred to, since the record of
    /// the first server describes the TLD rather than the domain.
    pub async fn lookup(&self, domain: &str) -> Result<Option<String>, CheckError> {
        let root = self.query(&self.server, domain).await?;
        match referral(&root) {
            Some(server) if !server.eq_ignore_ascii_case(&self.server) => {
                debug!("{} refers {} to {}", self.server, domain, server);
                self.query(&server, domain).await.map(Some)
            }
            _ => {
                debug!("{} refers {} to no registry", self.server, domain);
                Ok(None)
            }
        }
    }

    async fn query(&self, server: &str, domain: &str) -> Result<String, CheckError> {
        let exchange = async {
            let mut stream = TcpStream::connect((server, self.port)).await?;
            stream.write_all(format!("{domain}\r\n").as_bytes()).await?;
            let mut buf = Vec::new();
            stream.take(MAX_RECORD_SIZE).read_to_end(&mut buf).await?;
            Ok::<_, std::io::Error>(String::from_utf8_lossy(&buf).into_owned())
        };
        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| CheckError::Timeout(self.timeout.as_secs()))?
            .map_err(CheckError::Io)
    }
}

impl RegistrationLookup for WhoisResolver {
    fn creation_date<'a>(
        &'a self,
        hostname: &'a str,
    ) -> BoxFuture<'a, Result<CreationDate, CheckError>> {
        Box::pin(async move {
            if is_ip_literal(hostname) {
                return Ok(CreationDate::Missing);
            }
            let domain = registered_domain(hostname);
            match self.lookup(&domain).await? {
                Some(record) => Ok(parse_creation_date(&record)),
                None => Ok(CreationDate::Missing),
            }
        })
    }
}

fn referral(record: &str) -> Option<String> {
    record.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        let key = key.trim();
        let value = value.trim();
        if (key.eq_ignore_ascii_case("refer") || key.eq_ignore_ascii_case("whois"))
            && !value.is_empty()
        {
            Some(value.to_string())
        } else {
            None
        }
    })
}

/// Approximate the registered domain: the last two labels, or three under a
/// country-code suffix such as `co.uk` or `com.br`.
fn registered_domain(hostname: &str) -> String {
    let hostname = hostname.trim_end_matches('.');
    let labels: Vec<&str> = hostname.split('.').collect();
    if labels.len() <= 2 {
        return hostname.to_string();
    }
    let top_level = labels[labels.len() - 1];
    let second_level = labels[labels.len() - 2];
    let take = if top_level.len() == 2 && COUNTRY_SECOND_LEVELS.contains(&second_level) {
        3
    } else {
        2
    };
    labels[labels.len() - take..].join(".")
}

fn parse_date(value: &str) -> Option<NaiveDateTime> {
    if let Ok(d) = DateTime::parse_from_rfc3339(value) {
        return Some(d.naive_utc());
    }
    for format in DATE_TIME_FORMATS {
        if let Ok(d) = NaiveDateTime::parse_from_str(value, format) {
            return Some(d);
        }
    }
    DATE_FORMATS.iter().find_map(|format| {
        NaiveDate::parse_from_str(value, format)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
    })
}

/// Collect creation dates from a raw WHOIS record
///
/// ```
/// # use antiphish::{parse_creation_date, CreationDate};
/// let record = "Domain Name: EXAMPLE.COM\r\nCreation Date: 1995-08-14T04:00:00Z\r\n";
/// assert!(matches!(parse_creation_date(record), CreationDate::Single(..)));
/// ```
pub fn parse_creation_date(record: &str) -> CreationDate {
    let mut raw = vec![];
    let mut parsed = vec![];
    for line in record.lines() {
        let (key, value) = match line.split_once(':') {
            Some(kv) => kv,
            None => continue,
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();
        if value.is_empty() || !CREATION_DATE_KEYS.contains(&key.as_str()) {
            continue;
        }
        match parse_date(value) {
            Some(d) if !parsed.contains(&d) => parsed.push(d),
            Some(_) => (),
            None => raw.push(value.to_string()),
        }
    }

    match parsed.len() {
        0 => match raw.into_iter().next() {
            Some(text) => CreationDate::Text(text),
            None => CreationDate::Missing,
        },
        1 => CreationDate::Single(parsed[0]),
        _ => CreationDate::Many(parsed),
    }
}
