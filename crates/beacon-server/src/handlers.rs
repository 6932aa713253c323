//! Public request handling.
//!
//! One fallback handler serves every public request: it classifies the
//! request with [`routing::classify`] and acts on the result.

use std::net::SocketAddr;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use beacon_core::{Notification, NotificationEvent, Target, Token};
use bytes::Bytes;
use metrics::counter;
use tracing::debug;

use crate::metrics::REQUESTS_TOTAL;
use crate::notifier::spawn_publish;
use crate::pixel;
use crate::routing::{self, Route};
use crate::server::AppState;
use crate::websocket;

const UNKNOWN_ADDRESS: &str = "unknown";

/// Route and answer one public request.
pub async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    let is_upgrade = is_websocket_upgrade(request.headers());
    let path_and_query = request
        .uri()
        .path_and_query()
        .map_or_else(|| request.uri().path(), |pq| pq.as_str());
    let route = routing::classify(request.method(), path_and_query, is_upgrade);
    counter!(REQUESTS_TOTAL, "kind" => route.kind()).increment(1);
    debug!(method = %request.method(), path = path_and_query, kind = route.kind(), "request");

    let (mut parts, _body) = request.into_parts();
    match route {
        Route::Subscribe(token) => subscribe(state, &mut parts, token).await,
        Route::Image(token) => {
            notify(&state, &parts, token, Target::Image);
            image_response()
        }
        Route::Link { token, location } => match HeaderValue::from_str(&location) {
            Ok(location) => {
                notify(&state, &parts, token, Target::Link);
                (StatusCode::TEMPORARY_REDIRECT, [(header::LOCATION, location)]).into_response()
            }
            Err(_) => {
                debug!("redirect target is not a valid header value");
                StatusCode::NOT_FOUND.into_response()
            }
        },
        Route::MtaSts { domain } => match &state.mta_sts {
            Some(proxy) => proxy.fetch(&domain).await,
            None => StatusCode::NOT_FOUND.into_response(),
        },
        Route::NotFound => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn subscribe(state: AppState, parts: &mut Parts, token: Token) -> Response {
    match WebSocketUpgrade::from_request_parts(parts, &state).await {
        Ok(upgrade) => upgrade
            .on_upgrade(move |socket| websocket::serve(socket, state, token))
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

fn notify(state: &AppState, parts: &Parts, token: Token, target: Target) {
    let address = client_address(parts, state.settings.trust_forwarded_for);
    let client = parts
        .headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let event = NotificationEvent::new(token, Notification::new(target, address, client));
    let _ = spawn_publish(state.notifier.clone(), event);
}

fn image_response() -> Response {
    (
        [(header::CONTENT_TYPE, pixel::CONTENT_TYPE)],
        Bytes::from_static(&pixel::PIXEL),
    )
        .into_response()
}

/// Whether the request asks for a WebSocket upgrade.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"))
}

/// Best-known origin address of the request.
///
/// With `trust_forwarded_for`, the first `X-Forwarded-For` entry wins;
/// otherwise the transport peer address is used.
pub fn client_address(parts: &Parts, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(address) = forwarded {
            return address.to_owned();
        }
    }
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| UNKNOWN_ADDRESS.to_owned(), |ConnectInfo(addr)| addr.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::Request as HttpRequest;

    fn parts(build: impl FnOnce(axum::http::request::Builder) -> axum::http::request::Builder) -> Parts {
        let (parts, ()) = build(HttpRequest::builder().uri("/T.png"))
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[test]
    fn upgrade_header_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        assert!(!is_websocket_upgrade(&headers));
        let _ = headers.insert(header::UPGRADE, HeaderValue::from_static("WebSocket"));
        assert!(is_websocket_upgrade(&headers));
        let _ = headers.insert(header::UPGRADE, HeaderValue::from_static("h2c"));
        assert!(!is_websocket_upgrade(&headers));
    }

    #[test]
    fn forwarded_for_ignored_unless_trusted() {
        let mut p = parts(|b| b.header("x-forwarded-for", "203.0.113.5, 10.0.0.1"));
        let _ = p
            .extensions
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 7], 40000))));
        assert_eq!(client_address(&p, false), "192.0.2.7");
        assert_eq!(client_address(&p, true), "203.0.113.5");
    }

    #[test]
    fn empty_forwarded_for_falls_back_to_peer() {
        let mut p = parts(|b| b.header("x-forwarded-for", " "));
        let _ = p
            .extensions
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 7], 40000))));
        assert_eq!(client_address(&p, true), "192.0.2.7");
    }

    #[test]
    fn missing_peer_is_unknown() {
        let p = parts(|b| b);
        assert_eq!(client_address(&p, false), UNKNOWN_ADDRESS);
    }

    #[tokio::test]
    async fn image_response_is_the_pixel() {
        let response = image_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], &pixel::PIXEL[..]);
    }
}
