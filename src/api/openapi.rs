use super::{admission::response::ErrorBody, handlers::health};
use utoipa::openapi::{ComponentsBuilder, Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Proxied `/api/auth/*` routes belong to the credential engine and are not
/// documented here; denials they may produce are described by `ErrorBody`.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(cargo_openapi()).routes(routes!(health::health));

    let mut gateway_tag = Tag::new("authgate");
    gateway_tag.description = Some("Request admission gateway".to_string());

    let mut health_tag = Tag::new("health");
    health_tag.description = Some("Liveness and build information".to_string());

    router.get_openapi_mut().tags = Some(vec![gateway_tag, health_tag]);

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Cargo.toml metadata instead of the utoipa-axum defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new()
        .info(info)
        .components(Some(ComponentsBuilder::new().schema_from::<ErrorBody>().build()))
        .build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    fn non_empty(value: &str) -> Option<&str> {
        let value = value.trim();
        (!value.is_empty()).then_some(value)
    }

    match author.split_once('<') {
        Some((name, email)) => (non_empty(name), non_empty(email.trim_end_matches('>'))),
        None => (non_empty(author), None),
    }
}
