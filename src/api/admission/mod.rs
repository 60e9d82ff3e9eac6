//! Request admission pipeline.
//!
//! Every `POST` to an authentication route is snapshotted, keyed on an
//! identity token and evaluated by the configured [`Protector`] before the
//! untouched request continues to the credential engine. Other methods pass
//! straight through.

pub mod identity;
pub mod policy;
pub mod response;
pub mod session;

use axum::{
    body::{Body, Bytes, to_bytes},
    extract::{ConnectInfo, Request, State},
    http::{
        HeaderMap, Method,
        header::{CONTENT_LENGTH, USER_AGENT},
        request::Parts,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body_util::LengthLimitError;
use serde_json::Value;
use std::{
    net::{IpAddr, SocketAddr},
    str::FromStr,
    sync::Arc,
};
use tracing::{error, info, instrument, warn};

use self::{
    identity::{IdentityToken, find_ip, resolve_identity},
    policy::Policies,
    response::{AdmissionError, denial_response},
    session::SessionLookup,
};
use crate::protect::{Conclusion, Decision, Mode, ProtectContext, ProtectError, Protector, Reason};

pub const DEFAULT_SIGN_UP_ROUTE: &str = "/auth/sign-up";
pub const DEFAULT_BODY_LIMIT: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteClass {
    SignUp,
    Other,
}

impl RouteClass {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SignUp => "sign_up",
            Self::Other => "other",
        }
    }
}

/// What happens when the protector cannot reach a decision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailMode {
    /// Answer 503 and keep the request away from the credential engine.
    #[default]
    Closed,
    /// Log the failure and forward the request.
    Open,
}

impl FromStr for FailMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "closed" => Ok(Self::Closed),
            "open" => Ok(Self::Open),
            other => Err(format!("invalid fail mode: {other} (expected closed or open)")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdmissionSettings {
    pub sign_up_route: String,
    pub fail_mode: FailMode,
    pub trust_proxy_headers: bool,
    pub body_limit: usize,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            sign_up_route: DEFAULT_SIGN_UP_ROUTE.to_string(),
            fail_mode: FailMode::Closed,
            trust_proxy_headers: false,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

/// The original request, held as head plus fully read body.
#[derive(Debug)]
pub struct Snapshot {
    parts: Parts,
    body: Bytes,
}

impl Snapshot {
    /// Read the body once, bounded by `limit`.
    ///
    /// # Errors
    /// Returns an error if the body is larger than `limit` or cannot be read.
    pub async fn capture(request: Request, limit: usize) -> Result<Self, AdmissionError> {
        let declared = request
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<usize>().ok());
        if declared.is_some_and(|length| length > limit) {
            return Err(AdmissionError::BodyTooLarge { limit });
        }

        let (parts, body) = request.into_parts();
        let body = to_bytes(body, limit).await.map_err(|err| {
            if exceeds_limit(&err) {
                AdmissionError::BodyTooLarge { limit }
            } else {
                AdmissionError::BodyUnreadable(err.to_string())
            }
        })?;
        Ok(Self { parts, body })
    }

    #[must_use]
    pub const fn parts(&self) -> &Parts {
        &self.parts
    }

    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Rebuild the request from the same head and bytes.
    #[must_use]
    pub fn into_request(self) -> Request {
        Request::from_parts(self.parts, Body::from(self.body))
    }
}

pub(crate) fn exceeds_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = source {
        if current.is::<LengthLimitError>() {
            return true;
        }
        source = current.source();
    }
    false
}

#[must_use]
pub fn classify(path: &str, sign_up_route: &str) -> RouteClass {
    if path.ends_with(sign_up_route) {
        RouteClass::SignUp
    } else {
        RouteClass::Other
    }
}

/// The `email` member of a JSON object body, if it is a string.
#[must_use]
pub fn extract_email(body: &[u8]) -> Option<String> {
    match serde_json::from_slice::<Value>(body).ok()? {
        Value::Object(mut members) => match members.remove("email") {
            Some(Value::String(email)) => Some(email),
            _ => None,
        },
        _ => None,
    }
}

pub struct Admission {
    policies: Policies,
    protector: Arc<dyn Protector>,
    sessions: Arc<dyn SessionLookup>,
    settings: AdmissionSettings,
}

impl Admission {
    #[must_use]
    pub fn new(
        policies: Policies,
        protector: Arc<dyn Protector>,
        sessions: Arc<dyn SessionLookup>,
        settings: AdmissionSettings,
    ) -> Self {
        Self {
            policies,
            protector,
            sessions,
            settings,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &AdmissionSettings {
        &self.settings
    }

    async fn identity(&self, headers: &HeaderMap, ip: Option<IpAddr>) -> IdentityToken {
        let user = match self.sessions.lookup(headers).await {
            Ok(user) => user,
            Err(err) => {
                warn!("session lookup failed, keying on client address: {err}");
                None
            }
        };
        resolve_identity(user.as_ref().map(|user| user.id.as_str()), ip)
    }

    /// Evaluate a snapshotted request. `Ok(None)` means admitted.
    ///
    /// # Errors
    /// Returns an error when the protector cannot reach a decision.
    #[instrument(skip_all, fields(path = %snapshot.parts().uri.path()))]
    pub async fn check(
        &self,
        snapshot: &Snapshot,
        peer: Option<SocketAddr>,
    ) -> Result<Option<Reason>, ProtectError> {
        let parts = snapshot.parts();
        let path = parts.uri.path();
        let ip = find_ip(&parts.headers, peer, self.settings.trust_proxy_headers);
        let identity = self.identity(&parts.headers, ip).await;
        let route = classify(path, &self.settings.sign_up_route);

        let email = match route {
            RouteClass::SignUp => {
                let email = extract_email(snapshot.body());
                if email.is_none() {
                    warn!("sign-up request without a string email, skipping email validation");
                }
                email
            }
            RouteClass::Other => None,
        };

        let rules = self.policies.rule_set(route, email.is_some());
        let context = ProtectContext {
            key: identity.value().to_string(),
            email,
            method: parts.method.to_string(),
            path: path.to_string(),
            query: parts.uri.query().map(str::to_string),
            user_agent: parts
                .headers
                .get(USER_AGENT)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
            ip: ip.map(|ip| ip.to_string()),
            body: String::from_utf8_lossy(snapshot.body()).into_owned(),
        };

        let decision = self.protector.protect(&rules, &context).await?;
        log_dry_run(&decision);

        if !decision.is_denied() {
            return Ok(None);
        }
        let reason = decision.reason().cloned().unwrap_or(Reason::Other);
        info!(
            decision = %decision.id,
            identity = identity.kind().as_str(),
            route = route.as_str(),
            reason = reason.label(),
            "request denied"
        );
        Ok(Some(reason))
    }
}

fn log_dry_run(decision: &Decision) {
    for result in decision
        .results
        .iter()
        .filter(|result| result.conclusion == Conclusion::Deny && result.mode == Mode::DryRun)
    {
        info!(
            decision = %decision.id,
            rule = ?result.rule,
            reason = result.reason.label(),
            "dry-run rule would deny"
        );
    }
}

/// Middleware running the admission pipeline in front of the proxy.
pub async fn admit(
    State(admission): State<Arc<Admission>>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::POST {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let snapshot = match Snapshot::capture(request, admission.settings.body_limit).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!("rejecting request: {err}");
            return err.into_response();
        }
    };

    match admission.check(&snapshot, peer).await {
        Ok(None) => next.run(snapshot.into_request()).await,
        Ok(Some(reason)) => denial_response(&reason),
        Err(err) => match admission.settings.fail_mode {
            FailMode::Open => {
                error!("security check failed, forwarding request: {err}");
                next.run(snapshot.into_request()).await
            }
            FailMode::Closed => {
                error!("security check failed, rejecting request: {err}");
                AdmissionError::Unavailable(err).into_response()
            }
        },
    }
}
