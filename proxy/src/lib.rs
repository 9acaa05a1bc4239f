//! The HTTP data plane: accepts requests on a bound socket, resolves each one
//! against the shared route index, and performs a single-hop reverse-proxy
//! transfer to the matched upstream.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use std::convert::Infallible;
use std::net::SocketAddr;

use annogate_core::{Method, RouteMatch, SharedRouteIndex};
use hyper::client::HttpConnector;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Client, Request, Response, StatusCode, Uri};
use tracing::{debug, info, warn};

/// Hop-by-hop headers are stripped in both directions; everything else is
/// relayed verbatim.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Serves proxied traffic on `addr` until `drain` fires, then stops accepting
/// and lets in-flight requests complete.
///
/// Bind failures surface immediately; everything after that is handled
/// per-request.
pub async fn serve(
    addr: SocketAddr,
    index: SharedRouteIndex,
    drain: drain::Watch,
) -> hyper::Result<()> {
    let client: Client<HttpConnector> = Client::new();

    let server = hyper::Server::try_bind(&addr)?.serve(make_service_fn(
        move |conn: &hyper::server::conn::AddrStream| {
            let client = client.clone();
            let index = index.clone();
            let peer = conn.remote_addr();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let client = client.clone();
                    let index = index.clone();
                    async move { Ok::<_, Infallible>(proxy(client, index, peer, req).await) }
                }))
            }
        },
    ));
    info!(%addr, "HTTP proxy listening");

    let (close_tx, close_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::pin! {
        let server = server.with_graceful_shutdown(async move {
            let _ = close_rx.await;
        });
    }

    tokio::select! {
        res = &mut server => res,
        handle = drain.signaled() => {
            let _ = close_tx.send(());
            handle.release_after(server).await
        }
    }
}

/// Resolves one request against the route index and relays the exchange.
async fn proxy(
    client: Client<HttpConnector>,
    index: SharedRouteIndex,
    peer: SocketAddr,
    mut req: Request<Body>,
) -> Response<Body> {
    let method = match Method::from_http(req.method()) {
        Some(method) => method,
        None => return text_response(StatusCode::NOT_FOUND, "not found"),
    };

    let matched = index.read().find(method, req.uri().path());
    let RouteMatch { origin, path } = match matched {
        Some(matched) => matched,
        None => return text_response(StatusCode::NOT_FOUND, "not found"),
    };

    let uri = match upstream_uri(&origin, &path, req.uri().query()) {
        Ok(uri) => uri,
        Err(error) => {
            warn!(%error, %origin, "unparseable upstream origin");
            return text_response(StatusCode::BAD_REQUEST, "bad request");
        }
    };

    debug!(method = %req.method(), path = %req.uri().path(), %uri, "forwarding");
    *req.uri_mut() = uri;
    strip_hop_by_hop_headers(req.headers_mut());
    append_forwarded_for(req.headers_mut(), peer);

    match client.request(req).await {
        Ok(mut rsp) => {
            strip_hop_by_hop_headers(rsp.headers_mut());
            rsp
        }
        Err(error) => {
            warn!(%error, "upstream request failed");
            text_response(StatusCode::BAD_GATEWAY, "bad gateway")
        }
    }
}

/// Builds the upstream request URI from the matched origin, the rewritten
/// path, and the inbound query string, preserved verbatim.
fn upstream_uri(origin: &str, path: &str, query: Option<&str>) -> Result<Uri, http::Error> {
    let origin = origin.parse::<Uri>()?;
    let parts = origin.into_parts();

    let mut builder = Uri::builder();
    if let Some(scheme) = parts.scheme {
        builder = builder.scheme(scheme);
    }
    if let Some(authority) = parts.authority {
        builder = builder.authority(authority);
    }

    let path_and_query = match query {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    };
    builder.path_and_query(path_and_query).build()
}

/// Removes the headers named by `Connection`, then the fixed hop-by-hop set.
fn strip_hop_by_hop_headers(headers: &mut HeaderMap) {
    let connection_headers: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| name.trim().parse::<HeaderName>().ok())
        .collect();
    for name in connection_headers {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

/// Accumulates the client address onto `X-Forwarded-For`.
fn append_forwarded_for(headers: &mut HeaderMap, peer: SocketAddr) {
    let client_ip = peer.ip().to_string();
    let value = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{}, {}", prior, client_ip),
        None => client_ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::from(body))
        .unwrap()
}
