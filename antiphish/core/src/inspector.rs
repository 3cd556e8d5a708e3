use std::fmt;
use std::fmt::Formatter;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use log::{debug, error};
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, ClientConnection, ServerName};
use x509_parser::parse_x509_certificate;

use crate::{CertificateRecord, Error, HostnameQuery};

const UNTRUSTED: &str =
    "The certificate is not trusted. It may be self-signed or issued by an unknown authority";
const HOSTNAME_MISMATCH: &str =
    "Security alert: the certificate was issued for a different domain";
const TIMEOUT: &str = "The server took too long to respond or is unreachable";
const NO_SUCH_HOST: &str = "The domain does not exist or cannot be resolved";
const UNREACHABLE: &str = "Could not connect to the server to fetch its certificate";

static SUPPORTED_SIG_ALGS: &[&webpki::SignatureAlgorithm] = &[
    &webpki::ECDSA_P256_SHA256,
    &webpki::ECDSA_P256_SHA384,
    &webpki::ECDSA_P384_SHA256,
    &webpki::ECDSA_P384_SHA384,
    &webpki::ED25519,
    &webpki::RSA_PSS_2048_8192_SHA256_LEGACY_KEY,
    &webpki::RSA_PSS_2048_8192_SHA384_LEGACY_KEY,
    &webpki::RSA_PSS_2048_8192_SHA512_LEGACY_KEY,
    &webpki::RSA_PKCS1_2048_8192_SHA256,
    &webpki::RSA_PKCS1_2048_8192_SHA384,
    &webpki::RSA_PKCS1_2048_8192_SHA512,
    &webpki::RSA_PKCS1_3072_8192_SHA384,
];

/// Pick a user-facing explanation for a connectivity failure
///
/// ```
/// # use antiphish::explain_connectivity_failure;
/// let explanation = explain_connectivity_failure("no such host: example.invalid");
/// assert!(explanation.contains("does not exist"));
/// ```
pub fn explain_connectivity_failure(reason: &str) -> &'static str {
    let lowered = reason.to_lowercase();
    if reason.contains("CERTIFICATE_VERIFY_FAILED") {
        UNTRUSTED
    } else if lowered.contains("hostname mismatch") {
        HOSTNAME_MISMATCH
    } else if lowered.contains("timeout") || lowered.contains("timed out") {
        TIMEOUT
    } else if lowered.contains("no such host") {
        NO_SUCH_HOST
    } else {
        UNREACHABLE
    }
}

/// Enforces the chain of trust against the web PKI roots only. Expiry and
/// hostname match are judged afterwards on the leaf so they can be reported.
struct TrustChainVerifier;

impl ServerCertVerifier for TrustChainVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        verify_chain(end_entity, intermediates, now)
            .map(|_| ServerCertVerified::assertion())
            .map_err(|e| rustls::Error::General(format!("CERTIFICATE_VERIFY_FAILED: {e:?}")))
    }
}

fn verify_chain(
    end_entity: &Certificate,
    intermediates: &[Certificate],
    now: SystemTime,
) -> Result<(), webpki::Error> {
    let cert = webpki::EndEntityCert::try_from(end_entity.as_ref())?;
    let chain: Vec<&[u8]> = intermediates.iter().map(|c| c.as_ref()).collect();
    let seconds = now
        .duration_since(UNIX_EPOCH)
        .map_err(|_| webpki::Error::BadDerTime)?
        .as_secs();

    let verify = |seconds: u64| {
        cert.verify_is_valid_tls_server_cert(
            SUPPORTED_SIG_ALGS,
            &webpki_roots::TLS_SERVER_ROOTS,
            &chain,
            webpki::Time::from_seconds_since_unix_epoch(seconds),
        )
    };

    match verify(seconds) {
        // trust of an expired leaf is judged at its last valid second
        Err(webpki::Error::CertExpired) => {
            let not_after = parse_x509_certificate(end_entity.as_ref())
                .map_err(|_| webpki::Error::BadDer)?
                .1
                .validity()
                .not_after
                .timestamp();
            let not_after = u64::try_from(not_after).map_err(|_| webpki::Error::BadDerTime)?;
            verify(not_after)
        }
        result => result,
    }
}

/// Live TLS certificate inspector
pub struct CertificateInspector {
    config: Arc<ClientConfig>,
    /// Port to connect to
    pub port: u16,
    /// Upper bound of DNS resolution, TCP connect and TLS handshake together
    pub timeout: Duration,
}

impl fmt::Debug for CertificateInspector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CertificateInspector {{ port: {:?}, timeout: {:?} }}",
            self.port, self.timeout
        )
    }
}

impl Default for CertificateInspector {
    fn default() -> CertificateInspector {
        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(TrustChainVerifier))
            .with_no_client_auth();

        CertificateInspector {
            config: Arc::new(config),
            port: 443,
            timeout: Duration::from_secs(8),
        }
    }
}

impl CertificateInspector {
    /// Inspect the certificate served for a hostname. URLs are accepted too,
    /// only their host is used.
    ///
    /// ```no_run
    /// # use antiphish::CertificateInspector;
    /// # async fn run() -> Result<(), antiphish::Error> {
    /// let inspector = CertificateInspector::default();
    /// let record = inspector.inspect("sha256.badssl.com").await?;
    /// println!("{}", record);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn inspect(&self, hostname: &str) -> Result<CertificateRecord, Error> {
        let query = HostnameQuery::parse(hostname)?;
        let hostname = query.hostname;

        let start = Instant::now();
        let deadline = start + self.timeout;
        let addrs = self.resolve(&hostname).await?;

        let config = self.config.clone();
        let host = hostname.clone();
        let timeout = self.timeout;
        let certificates = tokio::task::spawn_blocking(move || {
            fetch_certificates(config, &host, &addrs, deadline, timeout)
        })
        .await
        .map_err(|e| Error::Internal(format!("certificate probe of {hostname} aborted: {e}")))??;
        debug!(
            "took {}ms to fetch certificates of {}",
            start.elapsed().as_millis(),
            hostname
        );

        let leaf = certificates
            .first()
            .ok_or_else(|| Error::Internal(format!("no peer certificate found for {hostname}")))?;

        CertificateRecord::from_der(&hostname, leaf.as_ref(), Utc::now()).map_err(|e| {
            error!("failed to read certificate of {hostname}: {e}");
            e
        })
    }

    async fn resolve(&self, hostname: &str) -> Result<Vec<SocketAddr>, Error> {
        let lookup = tokio::net::lookup_host((hostname, self.port));
        let addrs: Vec<SocketAddr> = tokio::time::timeout(self.timeout, lookup)
            .await
            .map_err(|_| {
                Error::connectivity(format!(
                    "timeout while resolving {hostname} after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| Error::connectivity(format!("no such host: {hostname} ({e})")))?
            .collect();
        if addrs.is_empty() {
            return Err(Error::connectivity(format!("no such host: {hostname}")));
        }
        Ok(addrs)
    }
}

fn io_failure(e: io::Error, hostname: &str, timeout: Duration) -> Error {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Error::connectivity(format!(
            "timeout: {hostname} did not complete the handshake within {}s",
            timeout.as_secs()
        )),
        _ => Error::connectivity(format!("{hostname}: {e}")),
    }
}

fn remaining(deadline: Instant, hostname: &str, timeout: Duration) -> Result<Duration, Error> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|d| !d.is_zero())
        .ok_or_else(|| io_failure(io::ErrorKind::TimedOut.into(), hostname, timeout))
}

/// Connect to the first address that accepts before the deadline
fn connect(
    addrs: &[SocketAddr],
    hostname: &str,
    deadline: Instant,
    timeout: Duration,
) -> Result<TcpStream, Error> {
    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(addr, remaining(deadline, hostname, timeout)?) {
            Ok(sock) => return Ok(sock),
            Err(e) => {
                debug!("failed to connect to {hostname} at {addr}: {e}");
                last_error = Some(e);
            }
        }
    }
    let e = last_error.unwrap_or_else(|| io::ErrorKind::NotFound.into());
    Err(io_failure(e, hostname, timeout))
}

/// Connect, handshake and collect the peer chain. The socket and TLS session
/// are owned here and dropped on every return path.
fn fetch_certificates(
    config: Arc<ClientConfig>,
    hostname: &str,
    addrs: &[SocketAddr],
    deadline: Instant,
    timeout: Duration,
) -> Result<Vec<Certificate>, Error> {
    let server_name = ServerName::try_from(hostname)
        .map_err(|e| Error::connectivity(format!("invalid server name {hostname}: {e}")))?;
    let mut conn = ClientConnection::new(config, server_name)
        .map_err(|e| Error::Internal(format!("unable to start TLS session: {e}")))?;

    let mut sock = connect(addrs, hostname, deadline, timeout)?;

    while conn.is_handshaking() {
        let left = remaining(deadline, hostname, timeout)?;
        sock.set_read_timeout(Some(left))
            .and_then(|_| sock.set_write_timeout(Some(left)))
            .map_err(|e| io_failure(e, hostname, timeout))?;
        conn.complete_io(&mut sock)
            .map_err(|e| io_failure(e, hostname, timeout))?;
    }

    let certificates = conn
        .peer_certificates()
        .map(<[Certificate]>::to_vec)
        .unwrap_or_default();

    conn.send_close_notify();
    if let Err(e) = conn.complete_io(&mut sock) {
        debug!("close notify to {hostname} not delivered: {e}");
    }

    Ok(certificates)
}
