use std::fmt;
use std::fmt::Formatter;
use std::net::IpAddr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::objects::{oid2sn, oid_registry};
use x509_parser::parse_x509_certificate;
use x509_parser::x509::X509Name;

use crate::{Error, Indicator};

const ISSUER_UNSPECIFIED: &str = "Issuer unspecified";

const COMMON_NAME: &str = "commonName";

/// Certificate of one host, evaluated at one instant
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CertificateRecord {
    /// Hostname that got checked
    pub hostname: String,
    /// Issuer, common name first
    pub issuer: String,
    /// Exact expiration time
    pub expiration_date: DateTime<Utc>,
    /// Expired at evaluation time?
    pub is_expired: bool,
    /// Does the certificate cover the hostname?
    pub domain_matches_certificate: bool,
    /// Human-readable status
    pub status_message: String,
}

impl CertificateRecord {
    /// Evaluate certificate fields against `now`
    ///
    /// ```
    /// # use antiphish::CertificateRecord;
    /// use chrono::{Duration, Utc};
    /// let now = Utc::now();
    /// let record = CertificateRecord::new("example.com", "R3", now + Duration::days(30), None, now);
    /// assert_eq!("Certificate Valid", record.status_message);
    /// ```
    pub fn new<T, U>(
        hostname: T,
        issuer: U,
        expiration_date: DateTime<Utc>,
        hostname_mismatch: Option<String>,
        now: DateTime<Utc>,
    ) -> Self
    where
        T: Into<String>,
        U: Into<String>,
    {
        let is_expired = expiration_date < now;
        let status_message = status_message(is_expired, hostname_mismatch.as_deref());
        CertificateRecord {
            hostname: hostname.into(),
            issuer: issuer.into(),
            expiration_date,
            is_expired,
            domain_matches_certificate: hostname_mismatch.is_none(),
            status_message,
        }
    }

    /// Decode the leaf certificate of `hostname` and evaluate it against `now`
    pub fn from_der(hostname: &str, der: &[u8], now: DateTime<Utc>) -> Result<Self, Error> {
        let (_, cert) = parse_x509_certificate(der)
            .map_err(|e| Error::Internal(format!("unable to parse certificate of {hostname}: {e}")))?;

        let issuer = format_issuer(&issuer_attributes(cert.issuer()));

        let not_after = cert.validity().not_after.timestamp();
        let expiration_date = Utc.timestamp_opt(not_after, 0).single().ok_or_else(|| {
            Error::Internal(format!("unable to parse expiration date of {hostname}"))
        })?;

        let hostname_mismatch = match_hostname(&cert, der, hostname).err();

        Ok(CertificateRecord::new(
            hostname,
            issuer,
            expiration_date,
            hostname_mismatch,
            now,
        ))
    }

    /// Expired is danger, a mismatch is a warning, everything else is safe
    pub fn indicator(&self) -> Indicator {
        if self.is_expired {
            Indicator::Danger
        } else if !self.domain_matches_certificate {
            Indicator::Warning
        } else {
            Indicator::Safe
        }
    }

    /// Expiration date as `YYYY-MM-DD HH:MM:SS UTC`
    pub fn expiration_timestamp(&self) -> String {
        self.expiration_date
            .format("%Y-%m-%d %H:%M:%S %Z")
            .to_string()
    }

    /// One line summary with an ASCII or Unicode icon
    pub fn render(&self, ascii: bool) -> String {
        format!(
            "{} {}: {} (issued by {}, expires at {})",
            self.indicator().icon(ascii),
            self.hostname,
            self.status_message,
            self.issuer,
            self.expiration_timestamp()
        )
    }
}

impl fmt::Display for CertificateRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render(false))
    }
}

/// Status message, first match wins: expiry, then the kind of hostname mismatch
fn status_message(is_expired: bool, hostname_mismatch: Option<&str>) -> String {
    if is_expired {
        return "Certificate EXPIRED".to_string();
    }
    match hostname_mismatch {
        None => "Certificate Valid".to_string(),
        Some(reason) if reason.contains("Hostname mismatch") => {
            "ALERT: the domain you typed does not match the domain in the certificate".to_string()
        }
        Some(reason) if reason.contains("not valid for") => format!("ALERT: {reason}"),
        Some(_) => "ALERT: the domain does not match the certificate".to_string(),
    }
}

/// Validate the leaf against the host: IP literals against the IP address
/// entries of the SAN, DNS names the way webpki does
fn match_hostname(cert: &X509Certificate<'_>, der: &[u8], hostname: &str) -> Result<(), String> {
    let literal = hostname.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        return match_ip_address(cert, ip, hostname);
    }

    let cert = webpki::EndEntityCert::try_from(der)
        .map_err(|e| format!("unreadable certificate: {e:?}"))?;
    let dns_name = webpki::DnsNameRef::try_from_ascii_str(hostname)
        .map_err(|_| format!("certificate is not valid for {hostname}, which is not a DNS name"))?;
    cert.verify_is_valid_for_dns_name(dns_name).map_err(|e| match e {
        webpki::Error::CertNotValidForName => mismatch(hostname),
        e => format!("certificate is not valid for {hostname}: {e:?}"),
    })
}

fn match_ip_address(cert: &X509Certificate<'_>, ip: IpAddr, hostname: &str) -> Result<(), String> {
    let octets = match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    };
    let san = cert
        .subject_alternative_name()
        .map_err(|e| format!("unreadable certificate: {e}"))?;
    let matched = san.map_or(false, |ext| {
        ext.value.general_names.iter().any(|name| match name {
            GeneralName::IPAddress(bytes) => *bytes == octets.as_slice(),
            _ => false,
        })
    });
    if matched {
        Ok(())
    } else {
        Err(mismatch(hostname))
    }
}

fn mismatch(hostname: &str) -> String {
    format!("Hostname mismatch, certificate is not valid for {hostname}")
}

fn issuer_attributes(name: &X509Name<'_>) -> Vec<(String, String)> {
    let mut attributes = vec![];
    for rdn in name.iter_rdn() {
        for attr in rdn.iter() {
            let key = match oid2sn(attr.attr_type(), oid_registry()) {
                Ok(name) => name.to_string(),
                Err(_) => attr.attr_type().to_id_string(),
            };
            let value = match attr.as_str() {
                Ok(s) => s.to_string(),
                Err(_) => String::from_utf8_lossy(attr.attr_value().data).into_owned(),
            };
            attributes.push((key, value));
        }
    }
    attributes
}

/// Issuer display string: common names first, then `key=value` pairs in
/// certificate order
fn format_issuer(attributes: &[(String, String)]) -> String {
    if attributes.is_empty() {
        return ISSUER_UNSPECIFIED.to_string();
    }
    let (common_names, others): (Vec<_>, Vec<_>) =
        attributes.iter().partition(|(key, _)| key == COMMON_NAME);
    common_names
        .into_iter()
        .map(|(_, value)| value.clone())
        .chain(others.into_iter().map(|(key, value)| format!("{key}={value}")))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Certificate record in JSON format
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CertificateJSON {
    /// Hostname that got checked
    pub hostname: String,
    /// Issuer, common name first
    pub issuer: String,
    /// Expiration time as `YYYY-MM-DD HH:MM:SS UTC`
    pub expiration_date: String,
    /// Expired at evaluation time?
    pub is_expired: bool,
    /// Reserved, always null
    pub expires_in_days: Option<i64>,
    /// Does the certificate cover the hostname?
    pub domain_matches_certificate: bool,
    /// Human-readable status
    pub status_message: String,
}

impl CertificateJSON {
    /// Convert record to JSON
    ///
    /// ```
    /// # use antiphish::{CertificateJSON, CertificateRecord};
    /// use chrono::Utc;
    /// let now = Utc::now();
    /// let record = CertificateRecord::new("example.com", "R3", now, None, now);
    /// let json = CertificateJSON::new(&record);
    /// assert!(json.expires_in_days.is_none());
    /// ```
    pub fn new(record: &CertificateRecord) -> CertificateJSON {
        CertificateJSON {
            hostname: record.hostname.clone(),
            issuer: record.issuer.clone(),
            expiration_date: record.expiration_timestamp(),
            is_expired: record.is_expired,
            expires_in_days: None,
            domain_matches_certificate: record.domain_matches_certificate,
            status_message: record.status_message.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use chrono::{Duration, SubsecRound, TimeZone, Utc};

    use crate::certificate::{format_issuer, status_message, CertificateJSON, CertificateRecord};
    use crate::Indicator;

    const VALID: &[u8] = include_bytes!("../fixtures/valid.der");
    const EXPIRED: &[u8] = include_bytes!("../fixtures/expired.der");
    const IP_ADDRESS: &[u8] = include_bytes!("../fixtures/ip.der");

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_format_issuer() {
        let attributes = pairs(&[
            ("countryName", "US"),
            ("organizationName", "Let's Encrypt"),
            ("commonName", "R3"),
        ]);
        assert_eq!(
            "R3, countryName=US, organizationName=Let's Encrypt",
            format_issuer(&attributes)
        );
    }

    #[test]
    fn test_format_issuer_without_common_name() {
        let attributes = pairs(&[("organizationName", "Acme"), ("2.5.4.97", "VATUS-1")]);
        assert_eq!(
            "organizationName=Acme, 2.5.4.97=VATUS-1",
            format_issuer(&attributes)
        );
        assert_eq!("Issuer unspecified", format_issuer(&[]));
    }

    #[test]
    fn test_status_priority() {
        let mismatch = Some("Hostname mismatch, certificate is not valid for a.example");
        assert_eq!("Certificate EXPIRED", status_message(true, mismatch));
        assert_eq!("Certificate EXPIRED", status_message(true, None));

        let message = status_message(false, mismatch);
        assert!(message.contains("does not match the domain in the certificate"));

        let message = status_message(false, Some("certificate is not valid for 10.0.0.1"));
        assert_eq!("ALERT: certificate is not valid for 10.0.0.1", message);

        let message = status_message(false, Some("unreadable certificate: BadDer"));
        assert_eq!("ALERT: the domain does not match the certificate", message);

        assert_eq!("Certificate Valid", status_message(false, None));
    }

    #[test]
    fn test_expired_and_mismatched() {
        let now = Utc::now();
        let record = CertificateRecord::new(
            "wrong.host.example",
            "R3",
            now - Duration::days(1),
            Some("Hostname mismatch, certificate is not valid for wrong.host.example".into()),
            now,
        );
        assert!(record.is_expired);
        assert!(!record.domain_matches_certificate);
        assert_eq!("Certificate EXPIRED", record.status_message);
        assert_eq!(Indicator::Danger, record.indicator());
    }

    #[test]
    fn test_mismatch_indicator() {
        let now = Utc::now();
        let record = CertificateRecord::new(
            "a.example",
            "R3",
            now + Duration::days(10),
            Some("Hostname mismatch".into()),
            now,
        );
        assert!(!record.is_expired);
        assert_eq!(Indicator::Warning, record.indicator());
    }

    #[test]
    fn test_json() {
        let now = Utc::now().round_subsecs(0);
        let expiration_date = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
        let record = CertificateRecord::new("example.com", "R3", expiration_date, None, now);
        let json = serde_json::to_value(CertificateJSON::new(&record)).unwrap();
        assert_eq!("2030-01-02 03:04:05 UTC", json["expiration_date"]);
        assert_eq!(false, json["is_expired"]);
        assert!(json["expires_in_days"].is_null());
        assert_eq!(true, json["domain_matches_certificate"]);
        assert_eq!("Certificate Valid", json["status_message"]);
    }

    #[test]
    fn test_from_der_rejects_garbage() {
        let result = CertificateRecord::from_der("example.com", b"not a certificate", Utc::now());
        assert!(matches!(result, Err(crate::Error::Internal(..))));
    }

    #[test]
    fn test_display() {
        let now = Utc::now();
        let expiration_date = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
        let record = CertificateRecord::new("example.com", "R3", expiration_date, None, now);
        assert_eq!(
            "[v] example.com: Certificate Valid (issued by R3, expires at 2030-01-02 03:04:05 UTC)",
            record.render(true)
        );
    }

    #[test]
    fn test_from_der() {
        let record = CertificateRecord::from_der("example.com", VALID, Utc::now()).unwrap();
        assert_eq!(
            "Antiphish Test CA, countryName=US, organizationName=Antiphish Test",
            record.issuer
        );
        assert_eq!("2046-10-12 01:10:46 UTC", record.expiration_timestamp());
        assert!(!record.is_expired);
        assert!(record.domain_matches_certificate);
        assert_eq!("Certificate Valid", record.status_message);
    }

    #[test]
    fn test_from_der_mismatch() {
        let record = CertificateRecord::from_der("www.example.com", VALID, Utc::now()).unwrap();
        assert!(!record.domain_matches_certificate);
        assert_eq!(
            "ALERT: the domain you typed does not match the domain in the certificate",
            record.status_message
        );
    }

    #[test]
    fn test_from_der_expired_and_mismatched() {
        let record = CertificateRecord::from_der("example.com", EXPIRED, Utc::now()).unwrap();
        assert_eq!(
            Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap(),
            record.expiration_date
        );
        assert_eq!(
            "Expired Test, countryName=US, organizationName=Antiphish Test",
            record.issuer
        );
        assert!(record.is_expired);
        assert!(!record.domain_matches_certificate);
        assert_eq!("Certificate EXPIRED", record.status_message);
    }

    #[test]
    fn test_from_der_ip_address() {
        let record = CertificateRecord::from_der("1.1.1.1", IP_ADDRESS, Utc::now()).unwrap();
        assert!(record.domain_matches_certificate);
        assert_eq!("Certificate Valid", record.status_message);

        let record = CertificateRecord::from_der("1.0.0.1", IP_ADDRESS, Utc::now()).unwrap();
        assert!(!record.domain_matches_certificate);

        let record = CertificateRecord::from_der("1.1.1.1", VALID, Utc::now()).unwrap();
        assert!(!record.domain_matches_certificate);
        assert!(record.status_message.starts_with("ALERT"));
    }
}
