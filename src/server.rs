//! HTTP surface.
//!
//! Plain HTTP/1.1 on `0.0.0.0:{port}`:
//!   OPTIONS *               CORS preflight
//!   GET /api/getSolat       ?latitude=<float>&longitude=<float>
//!
//! Upstream calls are blocking and run on the blocking pool.

use anyhow::{Context, Result};
use hyper::header::{self, HeaderValue};
use hyper::{body::Body, server::conn::Http, service::service_fn, Method, Request, Response, StatusCode};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::fetch::Upstream;
use crate::solat::{parse_coordinates, SolatService};

fn json_response(status: StatusCode, body: String) -> Response<Body> {
    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() = status;
    let headers = resp.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    resp
}

fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    json_response(status, json!({ "error": message }).to_string())
}

fn preflight() -> Response<Body> {
    let mut resp = Response::new(Body::empty());
    let headers = resp.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("GET, OPTIONS"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("Content-Type"));
    resp
}

async fn handle_get_solat<U>(req: Request<Body>, service: Arc<SolatService<U>>) -> Response<Body>
where
    U: Upstream + 'static,
{
    let mut latitude = None;
    let mut longitude = None;
    for (key, value) in url::form_urlencoded::parse(req.uri().query().unwrap_or("").as_bytes()) {
        match key.as_ref() {
            "latitude" => latitude = Some(value.into_owned()),
            "longitude" => longitude = Some(value.into_owned()),
            _ => {}
        }
    }

    let (lat, lng) = match parse_coordinates(latitude.as_deref(), longitude.as_deref()) {
        Ok(c) => c,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    let result = tokio::task::spawn_blocking(move || service.get_solat(lat, lng)).await;
    match result {
        Ok(Ok((response, _))) => match serde_json::to_string(&response) {
            Ok(body) => json_response(StatusCode::OK, body),
            Err(e) => {
                log::error!("serializing getSolat response: {e}");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode response")
            }
        },
        Ok(Err(e)) => {
            let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            if status.is_server_error() {
                log::warn!("getSolat {lat},{lng}: {e}");
            }
            error_response(status, &e.to_string())
        }
        Err(e) => {
            log::error!("getSolat worker failed: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to retrieve prayer times")
        }
    }
}

/// Top-level router.
pub async fn handle<U>(req: Request<Body>, service: Arc<SolatService<U>>) -> Result<Response<Body>, Infallible>
where
    U: Upstream + 'static,
{
    log::debug!("{} {}", req.method(), req.uri());

    if req.method() == Method::OPTIONS {
        return Ok(preflight());
    }

    match (req.method(), req.uri().path()) {
        (&Method::GET, "/api/getSolat") => Ok(handle_get_solat(req, service).await),
        _ => Ok(error_response(StatusCode::NOT_FOUND, "Not Found")),
    }
}

async fn serve<U>(addr: SocketAddr, service: Arc<SolatService<U>>) -> Result<()>
where
    U: Upstream + 'static,
{
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    log::info!("listening on http://{addr}");

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted.context("accept")?,
            _ = tokio::signal::ctrl_c() => {
                log::info!("shutting down");
                return Ok(());
            }
        };
        stream.set_nodelay(true).ok();

        let service = Arc::clone(&service);
        tokio::spawn(async move {
            let svc = service_fn(move |req| handle(req, Arc::clone(&service)));
            if let Err(e) = Http::new().http1_only(true).serve_connection(stream, svc).await {
                log::debug!("connection {peer}: {e}");
            }
        });
    }
}

pub fn run<U>(port: u16, service: SolatService<U>) -> Result<()>
where
    U: Upstream + 'static,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting tokio runtime")?;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    runtime.block_on(serve(addr, Arc::new(service)))
}
