use std::time::Duration;

use futures::future::BoxFuture;
use log::{debug, warn};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::{CheckError, Indicator, RiskSignal};

/// Google Safe Browsing v4 lookup endpoint
pub const DEFAULT_THREAT_LIST_URL: &str =
    "https://safebrowsing.googleapis.com/v4/threatMatches:find";

const CLIENT_ID: &str = "anti-phishing-tool";
const CLIENT_VERSION: &str = "0.0.0";

/// Outcome of a threat list lookup
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReputationVerdict {
    /// URL is a known phishing or malware entry
    Listed,
    /// URL is not listed
    NotListed,
    /// Threat list could not be asked
    LookupFailed(String),
}

impl ReputationVerdict {
    /// Signal of the verdict. A lookup that failed is never reported safe.
    pub fn signal(&self) -> RiskSignal {
        match self {
            ReputationVerdict::Listed => {
                RiskSignal::new("Phishing or malicious content detected!", Indicator::Danger)
            }
            ReputationVerdict::NotListed => {
                RiskSignal::new("URL not found in threat lists", Indicator::Safe)
            }
            ReputationVerdict::LookupFailed(reason) => {
                RiskSignal::new(format!("Could not verify: {reason}"), Indicator::Danger)
            }
        }
    }
}

/// Threat-intelligence list
pub trait ThreatList: Send + Sync {
    /// Look up a scheme-qualified URL
    fn lookup<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<ReputationVerdict, CheckError>>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThreatMatchesRequest<'a> {
    client: ClientInfo,
    threat_info: ThreatInfo<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientInfo {
    client_id: &'static str,
    client_version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThreatInfo<'a> {
    threat_types: [&'static str; 4],
    platform_types: [&'static str; 1],
    threat_entry_types: [&'static str; 1],
    threat_entries: [ThreatEntry<'a>; 1],
}

#[derive(Serialize)]
struct ThreatEntry<'a> {
    url: &'a str,
}

impl<'a> ThreatMatchesRequest<'a> {
    fn new(url: &'a str) -> Self {
        ThreatMatchesRequest {
            client: ClientInfo {
                client_id: CLIENT_ID,
                client_version: CLIENT_VERSION,
            },
            threat_info: ThreatInfo {
                threat_types: [
                    "MALWARE",
                    "SOCIAL_ENGINEERING",
                    "UNWANTED_SOFTWARE",
                    "POTENTIALLY_HARMFUL_APPLICATION",
                ],
                platform_types: ["ANY_PLATFORM"],
                threat_entry_types: ["URL"],
                threat_entries: [ThreatEntry { url }],
            },
        }
    }
}

/// Safe Browsing style threat list client
#[derive(Clone, Debug)]
pub struct SafeBrowsing {
    client: reqwest::Client,
    /// Lookup endpoint, the API key is appended as `key` query parameter
    pub endpoint: String,
    /// API key
    pub api_key: Option<String>,
}

impl SafeBrowsing {
    /// Create a client whose requests give up after `timeout`
    ///
    /// ```
    /// # use std::time::Duration;
    /// # use antiphish::{SafeBrowsing, DEFAULT_THREAT_LIST_URL};
    /// let client = SafeBrowsing::new(DEFAULT_THREAT_LIST_URL, None, Duration::from_secs(5));
    /// assert!(client.is_ok());
    /// ```
    pub fn new<T>(endpoint: T, api_key: Option<String>, timeout: Duration) -> Result<Self, CheckError>
    where
        T: Into<String>,
    {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(SafeBrowsing {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    /// Ask the threat list about one URL. Exactly one request is sent.
    pub async fn find_threat_matches(&self, url: &str) -> Result<ReputationVerdict, CheckError> {
        let key = self.api_key.as_deref().ok_or(CheckError::MissingApiKey)?;

        let response = match self
            .client
            .post(&self.endpoint)
            .query(&[("key", key)])
            .json(&ThreatMatchesRequest::new(url))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                // the request URL carries the API key
                let e = e.without_url();
                warn!("threat list unreachable for {url}: {e}");
                return Ok(ReputationVerdict::LookupFailed(e.to_string()));
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            debug!("threat list answered {status} for {url}");
            return Ok(ReputationVerdict::NotListed);
        }

        match response.text().await {
            Ok(body) => Ok(verdict_from_body(&body)),
            Err(e) => Ok(ReputationVerdict::LookupFailed(e.without_url().to_string())),
        }
    }
}

impl ThreatList for SafeBrowsing {
    fn lookup<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<ReputationVerdict, CheckError>> {
        Box::pin(self.find_threat_matches(url))
    }
}

fn verdict_from_body(body: &str) -> ReputationVerdict {
    if body.trim().is_empty() {
        return ReputationVerdict::NotListed;
    }
    match serde_json::from_str::<Value>(body) {
        Ok(value) if is_present(&value) => ReputationVerdict::Listed,
        Ok(_) => ReputationVerdict::NotListed,
        Err(e) => ReputationVerdict::LookupFailed(format!("undecodable response: {e}")),
    }
}

// empty objects, arrays and strings, null, false and zero carry no match
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
