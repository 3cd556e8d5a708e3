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

//! Check phishing risk of URLs and HTTPS certificates

use std::time::Duration;

use antiphish::{CertificateJSON, Settings, VerdictJSON, DEFAULT_THREAT_LIST_URL};
use clap::{Parser, Subcommand};
use log::{debug, warn};

#[derive(Debug, Parser)]
#[command(author, about, version)]
struct Opts {
    /// ASCII
    #[arg(long, global = true)]
    ascii: bool,
    /// Print results in JSON format
    #[arg(long, global = true)]
    json: bool,
    /// Threat list API key
    #[arg(long, env = "THREAT_LIST_API_KEY")]
    api_key: Option<String>,
    /// Threat list lookup endpoint
    #[arg(long, env = "THREAT_LIST_URL", default_value = DEFAULT_THREAT_LIST_URL)]
    threat_list_url: String,
    /// Threat list timeout in seconds
    #[arg(long, default_value = "5")]
    lookup_timeout: u64,
    /// First WHOIS server to ask
    #[arg(long, env = "WHOIS_SERVER", default_value = "whois.iana.org")]
    whois_server: String,
    /// WHOIS timeout in seconds
    #[arg(long, default_value = "10")]
    whois_timeout: u64,
    /// Certificate inspection timeout in seconds
    #[arg(long, default_value = "8")]
    tls_timeout: u64,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check phishing risk of URL(s)
    Check {
        /// One or many URLs or hostnames to check
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Inspect HTTPS certificate(s)
    Cert {
        /// Port to connect to
        #[arg(short, long, default_value = "443")]
        port: u16,
        /// One or many hostnames to inspect
        #[arg(required = true)]
        hostnames: Vec<String>,
    },
}

impl Opts {
    fn settings(&self) -> Settings {
        let mut settings = Settings {
            api_key: self.api_key.clone(),
            threat_list_url: self.threat_list_url.clone(),
            lookup_timeout: Duration::from_secs(self.lookup_timeout),
            whois_server: self.whois_server.clone(),
            whois_timeout: Duration::from_secs(self.whois_timeout),
            tls_timeout: Duration::from_secs(self.tls_timeout),
            ..Default::default()
        };
        if let Commands::Cert { port, .. } = self.command {
            settings.port = port;
        }
        settings
    }
}

/// Printable outcome of a command, one entry per input
#[derive(Debug, Default)]
struct Report {
    lines: Vec<String>,
    failures: usize,
}

impl Report {
    fn push_failure(&mut self, input: &str, error: impl std::fmt::Display) {
        warn!("failed to check {}: {}", input, error);
        self.lines.push(format!("{}: {}", input, error));
        self.failures += 1;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let opts: Opts = Opts::parse();
    let report = match &opts.command {
        Commands::Check { urls } => check_command(&opts, urls).await?,
        Commands::Cert { hostnames, .. } => cert_command(&opts, hostnames).await?,
    };
    for line in report.lines.iter() {
        println!("{}", line);
    }
    if report.failures > 0 {
        anyhow::bail!("{} of the inputs could not be checked", report.failures);
    }

    Ok(())
}

async fn check_command(opts: &Opts, urls: &[String]) -> anyhow::Result<Report> {
    let checker = opts.settings().risk_checker()?;
    if opts.api_key.is_none() {
        warn!("no threat list API key set, reputation checks will always fail");
    }

    let results = futures::future::join_all(urls.iter().map(|url| checker.check(url))).await;

    let mut report = Report::default();
    for (url, result) in urls.iter().zip(results) {
        match result {
            Ok(verdict) if opts.json => report
                .lines
                .push(serde_json::to_string(&VerdictJSON::new(&verdict))?),
            Ok(verdict) => report.lines.push(verdict.render(opts.ascii)),
            Err(e) => report.push_failure(url, e),
        }
    }
    debug!("checked {} URL(s)", urls.len());
    Ok(report)
}

async fn cert_command(opts: &Opts, hostnames: &[String]) -> anyhow::Result<Report> {
    let inspector = opts.settings().certificate_inspector();

    let results =
        futures::future::join_all(hostnames.iter().map(|hostname| inspector.inspect(hostname)))
            .await;

    let mut report = Report::default();
    for (hostname, result) in hostnames.iter().zip(results) {
        match result {
            Ok(record) if opts.json => report
                .lines
                .push(serde_json::to_string(&CertificateJSON::new(&record))?),
            Ok(record) => report.lines.push(record.render(opts.ascii)),
            Err(e) => report.push_failure(hostname, e),
        }
    }
    debug!("inspected {} certificate(s)", hostnames.len());
    Ok(report)
}
