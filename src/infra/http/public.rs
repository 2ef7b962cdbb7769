use axum::{
    Router,
    body::Body,
    extract::{RawQuery, State},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use tracing::debug;
use url::{Url, form_urlencoded};

use crate::{
    application::{error::HttpError, pipeline::content_type_for},
    cache::GeneratorPool,
    domain::signature::{
        ContentIdentity, DEFAULT_LENGTH_SECS, DEFAULT_OFFSET_SECS, RequestSignature,
        SignatureError, parse_seconds, parse_source, parse_width,
    },
};

use super::middleware::{log_responses, set_request_context};

pub const SOURCE_URL_HEADER: &str = "x-source-url";
pub const INFO_HASH_HEADER: &str = "x-info-hash";
pub const PATH_HEADER: &str = "x-path";

#[derive(Clone)]
pub struct HttpState {
    pub pool: GeneratorPool,
    /// Overrides `X-Source-Url` when configured.
    pub default_source: Option<Url>,
}

impl HttpState {
    pub fn new(pool: GeneratorPool, default_source: Option<Url>) -> Self {
        Self {
            pool,
            default_source,
        }
    }
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(thumbnail))
        .route("/favicon.ico", get(favicon))
        .fallback(thumbnail)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn thumbnail(
    State(state): State<HttpState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    let signature =
        match signature_from_request(state.default_source.as_ref(), &headers, query.as_deref()) {
            Ok(signature) => signature,
            Err(err) => return HttpError::from(err).into_response(),
        };

    let content_type = content_type_for(signature.format());
    let generator = state.pool.get(signature).await;
    match generator.get().await {
        Ok(bytes) => {
            debug!(
                target = "infra::http::public::thumbnail",
                key = %generator.key(),
                image_bytes = bytes.len(),
                "Serving thumbnail"
            );
            build_image_response(content_type, bytes)
        }
        Err(err) => HttpError::from(err).into_response(),
    }
}

async fn favicon() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Assemble the request signature from headers and the raw query string.
///
/// Repeated query parameters resolve to their first occurrence.
pub(crate) fn signature_from_request(
    default_source: Option<&Url>,
    headers: &HeaderMap,
    query: Option<&str>,
) -> Result<RequestSignature, SignatureError> {
    let source = match default_source {
        Some(url) => url.clone(),
        None => parse_source(header_str(headers, SOURCE_URL_HEADER).unwrap_or_default())?,
    };

    let params = QueryParams::parse(query.unwrap_or_default());
    let offset = parse_seconds("offset", params.get("offset"), DEFAULT_OFFSET_SECS)?;
    let length = parse_seconds("length", params.get("length"), DEFAULT_LENGTH_SECS)?;
    let width = parse_width(params.get("width"))?;

    let identity = ContentIdentity::from_parts(
        header_str(headers, INFO_HASH_HEADER).unwrap_or_default(),
        header_str(headers, PATH_HEADER).unwrap_or_default(),
    );

    let mut signature = RequestSignature::new(source)
        .with_offset_secs(offset)
        .with_length_secs(length)
        .with_width(width)
        .with_identity(identity);
    if let Some(format) = params.get("format") {
        signature = signature.with_format(format);
    }
    Ok(signature)
}

struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    fn parse(query: &str) -> Self {
        Self(
            form_urlencoded::parse(query.as_bytes())
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect(),
        )
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn build_image_response(content_type: Option<&'static str>, bytes: Bytes) -> Response {
    let length = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(content_type.unwrap_or("application/octet-stream")),
    );
    if let Ok(value) = HeaderValue::from_str(&length.to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );

    response
}
