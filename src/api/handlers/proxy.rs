//! Reverse proxy to the credential engine.

use axum::{
    body::{Body, to_bytes},
    extract::{ConnectInfo, Extension, Request},
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode, Uri,
        header::{CONNECTION, CONTENT_LENGTH, HOST},
    },
    response::{IntoResponse, Response},
};
use reqwest::{Client, redirect::Policy};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing::{debug, error, instrument};
use url::Url;

use crate::api::admission::{exceeds_limit, response::error_response};

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("failed to read request body: {0}")]
    Body(#[from] axum::Error),
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
    #[error("credential engine request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            Self::Body(_) => {
                error_response(StatusCode::BAD_REQUEST, "Request body could not be read.")
            }
            Self::BodyTooLarge { .. } => {
                error_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large.")
            }
            Self::Upstream(_) => error_response(
                StatusCode::BAD_GATEWAY,
                "Authentication service unavailable.",
            ),
        }
    }
}

/// The credential engine behind the gateway.
#[derive(Debug)]
pub struct Upstream {
    client: Client,
    base: Url,
    body_limit: usize,
}

impl Upstream {
    /// Request bodies larger than `body_limit` are refused, not forwarded.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base: Url, timeout: Duration, body_limit: usize) -> Result<Self, reqwest::Error> {
        // Redirects and cookies belong to the browser, not the gateway.
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base,
            body_limit,
        })
    }

    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Upstream URL for an inbound URI: base path + request path + query.
    #[must_use]
    pub fn target(&self, uri: &Uri) -> Url {
        let mut url = self.base.clone();
        let path = format!("{}{}", self.base.path().trim_end_matches('/'), uri.path());
        url.set_path(&path);
        url.set_query(uri.query());
        url
    }

    /// Whether the credential engine answers at all. Any HTTP status counts.
    pub async fn reachable(&self) -> bool {
        match self.client.get(self.base.clone()).send().await {
            Ok(_) => true,
            Err(err) => {
                error!("credential engine unreachable: {err}");
                false
            }
        }
    }

    /// Forward `request` and relay the answer.
    ///
    /// # Errors
    /// Returns an error if the request body cannot be read or the credential
    /// engine does not answer.
    #[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
    pub async fn forward(&self, request: Request) -> Result<Response, ProxyError> {
        let (parts, body) = request.into_parts();
        let limit = self.body_limit;
        let body = to_bytes(body, limit).await.map_err(|err| {
            if exceeds_limit(&err) {
                ProxyError::BodyTooLarge { limit }
            } else {
                ProxyError::Body(err)
            }
        })?;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(HOST);
        headers.remove(CONTENT_LENGTH);
        if let Some(ConnectInfo(peer)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            append_forwarded_for(&mut headers, peer);
        }

        let url = self.target(&parts.uri);
        debug!("forwarding to {url}");
        let upstream = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(CONTENT_LENGTH);
        let body = upstream.bytes().await?;

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers listed in `Connection` are hop-by-hop as well.
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: &SocketAddr) {
    let chain = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{existing}, {}", peer.ip()),
        None => peer.ip().to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&chain) {
        headers.insert(HeaderName::from_static(X_FORWARDED_FOR), value);
    }
}

// axum handler for every proxied route
pub async fn forward(Extension(upstream): Extension<Arc<Upstream>>, request: Request) -> Response {
    match upstream.forward(request).await {
        Ok(response) => response,
        Err(err) => {
            error!("{err}");
            err.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn target_keeps_base_path_and_query() -> Result<()> {
        let upstream = Upstream::new(
            Url::parse("http://engine.internal:3000/")?,
            Duration::from_secs(1),
            64,
        )?;
        let uri: Uri = "/api/auth/callback/github?code=abc&state=xyz".parse()?;
        assert_eq!(
            upstream.target(&uri).as_str(),
            "http://engine.internal:3000/api/auth/callback/github?code=abc&state=xyz"
        );

        let prefixed = Upstream::new(
            Url::parse("http://engine.internal:3000/identity")?,
            Duration::from_secs(1),
            64,
        )?;
        let uri: Uri = "/api/auth/sign-in/email".parse()?;
        assert_eq!(
            prefixed.target(&uri).as_str(),
            "http://engine.internal:3000/identity/api/auth/sign-in/email"
        );
        Ok(())
    }

    #[test]
    fn hop_by_hop_headers_are_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, x-trace-hop"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-trace-hop", HeaderValue::from_static("1"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("cookie", HeaderValue::from_static("session_token=abc"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("cookie"));
    }

    #[test]
    fn forwarded_for_is_appended() {
        let peer = SocketAddr::from(([198, 51, 100, 4], 4000));
        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, &peer);
        assert_eq!(
            headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()),
            Some("198.51.100.4")
        );

        append_forwarded_for(&mut headers, &peer);
        assert_eq!(
            headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()),
            Some("198.51.100.4, 198.51.100.4")
        );
    }

    #[tokio::test]
    async fn unreachable_engine_is_bad_gateway() -> Result<()> {
        let upstream = Upstream::new(
            Url::parse("http://127.0.0.1:9/")?,
            Duration::from_millis(500),
            64,
        )?;
        let request = axum::http::Request::get("/api/auth/get-session").body(Body::empty())?;
        let response = forward(Extension(Arc::new(upstream)), request).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        Ok(())
    }

    #[tokio::test]
    async fn oversized_body_is_not_forwarded() -> Result<()> {
        // Nothing listens on the discard port; the limit must trip first.
        let upstream = Upstream::new(
            Url::parse("http://127.0.0.1:9/")?,
            Duration::from_millis(500),
            16,
        )?;
        let request = axum::http::Request::get("/api/auth/get-session")
            .body(Body::from(vec![b'a'; 17]))?;
        let response = forward(Extension(Arc::new(upstream)), request).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        Ok(())
    }
}
