use std::future::Future;
use std::net::SocketAddr;

use prometheus::{Encoder, Registry, TextEncoder};
use warp::http::{header::CONTENT_TYPE, Response, StatusCode};
use warp::{Filter, Rejection, Reply};

use crate::error::Result;

/// `GET /metrics`, rendered in the Prometheus text format.
pub fn routes(registry: Registry) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .map(move || render(&registry))
}

fn render(registry: &Registry) -> Response<String> {
    let encoder = TextEncoder::new();
    let mut body = Vec::new();
    let response = match encoder.encode(&registry.gather(), &mut body) {
        Ok(()) => Response::builder()
            .header(CONTENT_TYPE, encoder.format_type())
            .body(String::from_utf8_lossy(&body).into_owned()),
        Err(e) => {
            log::error!("unable to encode metrics: {}", e);
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(String::new())
        }
    };
    response.unwrap_or_else(|e| {
        log::error!("unable to build metrics response: {}", e);
        let mut response = Response::new(String::new());
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response
    })
}

/// Binds the metrics endpoint. The returned future serves until the
/// process exits.
pub fn bind(
    listen: SocketAddr,
    registry: Registry,
) -> Result<(SocketAddr, impl Future<Output = ()>)> {
    Ok(warp::serve(routes(registry)).try_bind_ephemeral(listen)?)
}
