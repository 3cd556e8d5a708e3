use std::sync::Arc;
use std::time::Duration;

use crate::{
    CertificateInspector, CheckError, RiskChecker, SafeBrowsing, WhoisResolver,
    DEFAULT_THREAT_LIST_URL,
};

/// Injected configuration of the checks
#[derive(Clone, Debug)]
pub struct Settings {
    /// Threat list API key
    pub api_key: Option<String>,
    /// Threat list lookup endpoint
    pub threat_list_url: String,
    /// Timeout of the threat list lookup
    pub lookup_timeout: Duration,
    /// First WHOIS server to ask
    pub whois_server: String,
    /// Timeout of each WHOIS query
    pub whois_timeout: Duration,
    /// Port of certificate inspection
    pub port: u16,
    /// Timeout of certificate inspection
    pub tls_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        let whois = WhoisResolver::default();
        Settings {
            api_key: None,
            threat_list_url: DEFAULT_THREAT_LIST_URL.to_string(),
            lookup_timeout: Duration::from_secs(5),
            whois_server: whois.server,
            whois_timeout: whois.timeout,
            port: 443,
            tls_timeout: Duration::from_secs(8),
        }
    }
}

impl Settings {
    /// Risk checker backed by Safe Browsing and WHOIS
    ///
    /// ```
    /// # use antiphish::Settings;
    /// let checker = Settings::default().risk_checker();
    /// assert!(checker.is_ok());
    /// ```
    pub fn risk_checker(&self) -> Result<RiskChecker, CheckError> {
        let threat_list = SafeBrowsing::new(
            self.threat_list_url.as_str(),
            self.api_key.clone(),
            self.lookup_timeout,
        )?;
        let registry = WhoisResolver {
            server: self.whois_server.clone(),
            timeout: self.whois_timeout,
            ..Default::default()
        };
        Ok(RiskChecker::new(Arc::new(threat_list), Arc::new(registry)))
    }

    /// Certificate inspector with the configured port and timeout
    pub fn certificate_inspector(&self) -> CertificateInspector {
        let mut inspector = CertificateInspector::default();
        inspector.port = self.port;
        inspector.timeout = self.tls_timeout;
        inspector
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crate::Settings;

    #[test]
    fn test_certificate_inspector() {
        let settings = Settings {
            port: 8443,
            tls_timeout: Duration::from_secs(3),
            ..Default::default()
        };
        let inspector = settings.certificate_inspector();
        assert_eq!(8443, inspector.port);
        assert_eq!(Duration::from_secs(3), inspector.timeout);
    }
}
