#![forbid(unsafe_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use antiphish::{
    CertificateInspector, CertificateJSON, Error, RiskChecker, Settings, VerdictJSON,
    DEFAULT_THREAT_LIST_URL,
};
use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use warp::http::StatusCode;
use warp::Filter;

#[derive(Debug, Parser)]
#[command(author, about, version)]
struct Opts {
    /// host:port to be bound to the server
    #[arg(short, long, env = "BIND", default_value = "127.0.0.1:8000")]
    bind: String,
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
}

impl Opts {
    fn settings(&self) -> Settings {
        Settings {
            api_key: self.api_key.clone(),
            threat_list_url: self.threat_list_url.clone(),
            lookup_timeout: Duration::from_secs(self.lookup_timeout),
            whois_server: self.whois_server.clone(),
            whois_timeout: Duration::from_secs(self.whois_timeout),
            tls_timeout: Duration::from_secs(self.tls_timeout),
            ..Default::default()
        }
    }
}

#[derive(Serialize)]
struct ErrorJSON {
    error: String,
}

#[derive(Deserialize)]
struct UrlRequest {
    url: String,
}

#[derive(Deserialize)]
struct HostnameRequest {
    hostname: String,
}

struct AppState {
    checker: RiskChecker,
    inspector: CertificateInspector,
}

fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

#[derive(Debug)]
enum Rejection {
    BadRequest(String),
    ServiceUnavailable(String),
    Internal(String),
}

impl warp::reject::Reject for Rejection {}

impl From<Error> for Rejection {
    fn from(e: Error) -> Self {
        match &e {
            Error::InvalidUrl(..) => Rejection::BadRequest(e.to_string()),
            Error::Connectivity { .. } => Rejection::ServiceUnavailable(e.to_string()),
            Error::Internal(..) => Rejection::Internal(e.to_string()),
        }
    }
}

async fn check_url(
    state: Arc<AppState>,
    request: UrlRequest,
) -> Result<impl warp::Reply, warp::Rejection> {
    match state.checker.check(&request.url).await {
        Ok(verdict) => Ok(warp::reply::json(&VerdictJSON::new(&verdict))),
        Err(e) => {
            warn!("failed to check {:?}: {}", request.url, e);
            Err(warp::reject::custom(Rejection::from(e)))
        }
    }
}

async fn check_certificate(
    state: Arc<AppState>,
    request: HostnameRequest,
) -> Result<impl warp::Reply, warp::Rejection> {
    match state.inspector.inspect(&request.hostname).await {
        Ok(record) => Ok(warp::reply::json(&CertificateJSON::new(&record))),
        Err(e) => {
            warn!("failed to inspect {:?}: {}", request.hostname, e);
            Err(warp::reject::custom(Rejection::from(e)))
        }
    }
}

fn check_filter(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::post()
        .and(warp::path("check"))
        .and(warp::path::end())
        .and(with_state(state))
        .and(warp::body::json())
        .and_then(check_url)
}

fn certificate_filter(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::post()
        .and(warp::path("check_certificate"))
        .and(warp::path::end())
        .and(with_state(state))
        .and(warp::body::json())
        .and_then(check_certificate)
}

fn app(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl warp::Reply, Error = Infallible> + Clone {
    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["POST", "OPTIONS"])
        .allow_headers(vec!["content-type"]);
    check_filter(state.clone())
        .or(certificate_filter(state))
        .with(cors)
        .recover(handle_rejection)
}

async fn handle_rejection(
    err: warp::reject::Rejection,
) -> Result<impl warp::reply::Reply, Infallible> {
    let status_code;
    let error;

    if let Some(rejection) = err.find::<Rejection>() {
        match rejection {
            Rejection::BadRequest(s) => {
                status_code = StatusCode::BAD_REQUEST;
                error = s.to_string();
            }
            Rejection::ServiceUnavailable(s) => {
                status_code = StatusCode::SERVICE_UNAVAILABLE;
                error = s.to_string();
            }
            Rejection::Internal(s) => {
                error!("{s}");
                status_code = StatusCode::INTERNAL_SERVER_ERROR;
                error = s.to_string();
            }
        }
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        status_code = StatusCode::BAD_REQUEST;
        error = e.to_string();
    } else if err.is_not_found() {
        status_code = StatusCode::NOT_FOUND;
        error = "not found".to_string();
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        status_code = StatusCode::METHOD_NOT_ALLOWED;
        error = "method not allowed".to_string();
    } else {
        status_code = StatusCode::INTERNAL_SERVER_ERROR;
        error = "unknown error".to_string();
    }

    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorJSON { error }),
        status_code,
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let opts: Opts = Opts::parse();
    if opts.api_key.is_none() {
        warn!("no threat list API key set, reputation checks will always fail");
    }

    let settings = opts.settings();
    let state = Arc::new(AppState {
        checker: settings.risk_checker()?,
        inspector: settings.certificate_inspector(),
    });

    let routes = app(state).with(warp::log("antiphish-server"));

    let bind: SocketAddr = opts.bind.parse()?;
    let (addr, server) = warp::serve(routes).try_bind_with_graceful_shutdown(bind, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for shutdown signal: {e}");
        }
    })?;
    info!("running on {}", addr);
    server.await;
    info!("shut down");

    Ok(())
}
