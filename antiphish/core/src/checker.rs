use std::fmt;
use std::fmt::Formatter;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    age_signal, format_signal, Error, HostnameQuery, Indicator, RegistrationLookup, RiskSignal,
    ThreatList,
};

const FORMAT_FAILED: &str = "Format check failed";
const REPUTATION_FAILED: &str = "Could not reach verification server";
const AGE_FAILED: &str = "Domain age check failed";

/// Risk verdict of one URL, always with all three signals
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Verdict {
    /// Hostname extracted from the input
    pub hostname: String,
    /// Lexical anomaly signal
    pub format: RiskSignal,
    /// Threat list signal
    pub reputation: RiskSignal,
    /// Domain age signal
    pub age: RiskSignal,
}

impl Verdict {
    /// Verdict whose signals are all failure sentinels
    pub fn sentinel<T>(hostname: T) -> Self
    where
        T: Into<String>,
    {
        Verdict {
            hostname: hostname.into(),
            format: RiskSignal::new(FORMAT_FAILED, Indicator::Danger),
            reputation: RiskSignal::new(REPUTATION_FAILED, Indicator::Danger),
            age: RiskSignal::new(AGE_FAILED, Indicator::Danger),
        }
    }

    /// Multi-line summary with ASCII or Unicode icons
    pub fn render(&self, ascii: bool) -> String {
        let mut s = String::with_capacity(200);
        s.push_str(&self.hostname);
        for (name, signal) in [
            ("format", &self.format),
            ("reputation", &self.reputation),
            ("age", &self.age),
        ] {
            s.push_str(&format!(
                "\n  {} {}: {}",
                signal.indicator.icon(ascii),
                name,
                signal.message
            ));
        }
        s
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render(false))
    }
}

/// Verdict in JSON format
#[derive(Debug, Deserialize, Serialize)]
pub struct VerdictJSON {
    /// Hostname extracted from the input
    pub hostname: String,
    /// Lexical anomaly outcome
    pub format_check: String,
    /// Lexical anomaly severity
    pub format_indicator: Indicator,
    /// Threat list outcome
    pub api_check: String,
    /// Threat list severity
    pub api_indicator: Indicator,
    /// Domain age outcome
    pub age_check: String,
    /// Domain age severity
    pub age_indicator: Indicator,
}

impl VerdictJSON {
    /// Convert verdict to JSON
    pub fn new(verdict: &Verdict) -> VerdictJSON {
        VerdictJSON {
            hostname: verdict.hostname.clone(),
            format_check: verdict.format.message.clone(),
            format_indicator: verdict.format.indicator,
            api_check: verdict.reputation.message.clone(),
            api_indicator: verdict.reputation.indicator,
            age_check: verdict.age.message.clone(),
            age_indicator: verdict.age.indicator,
        }
    }
}

/// Aggregates lexical, reputation and age signals of a URL
#[derive(Clone)]
pub struct RiskChecker {
    threat_list: Arc<dyn ThreatList>,
    registry: Arc<dyn RegistrationLookup>,
}

impl fmt::Debug for RiskChecker {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "RiskChecker {{ .. }}")
    }
}

impl RiskChecker {
    /// Create a checker from its two upstream collaborators
    pub fn new(threat_list: Arc<dyn ThreatList>, registry: Arc<dyn RegistrationLookup>) -> Self {
        RiskChecker {
            threat_list,
            registry,
        }
    }

    /// Check one URL or hostname. Only an input without a hostname is an error;
    /// any failing signal is replaced by its sentinel.
    pub async fn check(&self, raw: &str) -> Result<Verdict, Error> {
        let query = HostnameQuery::parse(raw)?;
        let mut verdict = Verdict::sentinel(query.hostname.as_str());

        let start = Instant::now();

        let hostname = query.hostname.clone();
        let format = tokio::spawn(async move { format_signal(&hostname) });

        let threat_list = self.threat_list.clone();
        let url = query.url.clone();
        let reputation = tokio::spawn(async move { threat_list.lookup(&url).await });

        let registry = self.registry.clone();
        let hostname = query.hostname.clone();
        let age = tokio::spawn(async move {
            age_signal(registry.as_ref(), &hostname, Utc::now().naive_utc()).await
        });

        let (format, reputation, age) = futures::join!(format, reputation, age);

        match format {
            Ok(signal) => verdict.format = signal,
            Err(e) => warn!("format check of {} failed: {}", query.hostname, e),
        }
        match reputation {
            Ok(Ok(v)) => verdict.reputation = v.signal(),
            Ok(Err(e)) => warn!("reputation check of {} failed: {}", query.url, e),
            Err(e) => warn!("reputation check of {} failed: {}", query.url, e),
        }
        match age {
            Ok(signal) => verdict.age = signal,
            Err(e) => warn!("age check of {} failed: {}", query.hostname, e),
        }

        debug!(
            "took {}ms to check {}",
            start.elapsed().as_millis(),
            query.hostname
        );
        Ok(verdict)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use chrono::{Duration, NaiveDateTime, Utc};
    use futures::future::BoxFuture;

    use crate::checker::{RiskChecker, Verdict, VerdictJSON};
    use crate::{
        CheckError, CreationDate, Error, Indicator, RegistrationLookup, ReputationVerdict,
        ThreatList,
    };

    struct StaticThreatList(Result<ReputationVerdict, ()>);

    impl ThreatList for StaticThreatList {
        fn lookup<'a>(
            &'a self,
            _url: &'a str,
        ) -> BoxFuture<'a, Result<ReputationVerdict, CheckError>> {
            let result = self.0.clone().map_err(|_| CheckError::MissingApiKey);
            Box::pin(async move { result })
        }
    }

    struct PanickingThreatList;

    async fn explode(url: &str) -> Result<ReputationVerdict, CheckError> {
        panic!("threat list exploded while looking up {url}")
    }

    impl ThreatList for PanickingThreatList {
        fn lookup<'a>(
            &'a self,
            url: &'a str,
        ) -> BoxFuture<'a, Result<ReputationVerdict, CheckError>> {
            Box::pin(explode(url))
        }
    }

    struct StaticRegistry(Option<NaiveDateTime>);

    impl RegistrationLookup for StaticRegistry {
        fn creation_date<'a>(
            &'a self,
            _hostname: &'a str,
        ) -> BoxFuture<'a, Result<CreationDate, CheckError>> {
            let date = match self.0 {
                Some(d) => CreationDate::Single(d),
                None => CreationDate::Missing,
            };
            Box::pin(async move { Ok(date) })
        }
    }

    fn years_ago(years: i64) -> Option<NaiveDateTime> {
        Some(Utc::now().naive_utc() - Duration::days(365 * years))
    }

    fn build_checker(threat_list: Arc<dyn ThreatList>) -> RiskChecker {
        RiskChecker::new(threat_list, Arc::new(StaticRegistry(years_ago(3))))
    }

    #[tokio::test]
    async fn test_check() -> Result<(), Error> {
        let checker = build_checker(Arc::new(StaticThreatList(Ok(ReputationVerdict::NotListed))));
        let verdict = checker.check("paypa1-secure.com").await?;
        assert_eq!("paypa1-secure.com", verdict.hostname);
        assert_eq!(Indicator::Safe, verdict.format.indicator);
        assert_eq!(Indicator::Safe, verdict.reputation.indicator);
        assert_eq!(Indicator::Safe, verdict.age.indicator);
        assert!(verdict.age.message.starts_with("Likely safe"));
        Ok(())
    }

    #[tokio::test]
    async fn test_listed() -> Result<(), Error> {
        let checker = build_checker(Arc::new(StaticThreatList(Ok(ReputationVerdict::Listed))));
        let verdict = checker.check("https://192.168.1.1/login").await?;
        assert_eq!("192.168.1.1", verdict.hostname);
        assert_eq!(Indicator::Warning, verdict.format.indicator);
        assert_eq!(Indicator::Danger, verdict.reputation.indicator);
        Ok(())
    }

    #[tokio::test]
    async fn test_reputation_error_keeps_other_signals() -> Result<(), Error> {
        let checker = build_checker(Arc::new(StaticThreatList(Err(()))));
        let verdict = checker.check("example.com").await?;
        let sentinel = Verdict::sentinel("example.com");
        assert_eq!(sentinel.reputation, verdict.reputation);
        assert_eq!(Indicator::Safe, verdict.format.indicator);
        assert!(verdict.age.message.starts_with("Likely safe"));
        Ok(())
    }

    #[tokio::test]
    async fn test_reputation_panic_keeps_other_signals() -> Result<(), Error> {
        let checker = build_checker(Arc::new(PanickingThreatList));
        let verdict = checker.check("exa$mple.com").await?;
        assert_eq!("Could not reach verification server", verdict.reputation.message);
        assert_eq!(Indicator::Danger, verdict.reputation.indicator);
        assert_eq!(Indicator::Warning, verdict.format.indicator);
        assert!(verdict.age.message.starts_with("Likely safe"));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_age() -> Result<(), Error> {
        let checker = RiskChecker::new(
            Arc::new(StaticThreatList(Ok(ReputationVerdict::NotListed))),
            Arc::new(StaticRegistry(None)),
        );
        let verdict = checker.check("example.com").await?;
        assert_eq!("Age not found", verdict.age.message);
        assert_eq!(Indicator::NotFound, verdict.age.indicator);
        Ok(())
    }

    #[tokio::test]
    async fn test_deterministic() -> Result<(), Error> {
        let checker = build_checker(Arc::new(StaticThreatList(Ok(ReputationVerdict::NotListed))));
        let first = checker.check("www.example.com").await?;
        let second = checker.check("www.example.com").await?;
        assert_eq!(first.format, second.format);
        assert_eq!(first.age.indicator, second.age.indicator);
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let checker = build_checker(Arc::new(StaticThreatList(Ok(ReputationVerdict::NotListed))));
        let result = checker.check("https://").await;
        assert!(matches!(result, Err(Error::InvalidUrl(..))));
    }

    #[test]
    fn test_json() {
        let verdict = Verdict::sentinel("example.com");
        let json = serde_json::to_value(VerdictJSON::new(&verdict)).unwrap();
        assert_eq!("example.com", json["hostname"]);
        assert_eq!("Format check failed", json["format_check"]);
        assert_eq!("danger", json["format_indicator"]);
        assert_eq!("danger", json["api_indicator"]);
        assert_eq!("Domain age check failed", json["age_check"]);
        assert_eq!(7, json.as_object().unwrap().len());
    }

    #[test]
    fn test_render() {
        let verdict = Verdict::sentinel("example.com");
        assert_eq!(
            concat!(
                "example.com\n",
                "  [x] format: Format check failed\n",
                "  [x] reputation: Could not reach verification server\n",
                "  [x] age: Domain age check failed"
            ),
            verdict.render(true)
        );
    }
}
