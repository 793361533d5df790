//! # HTTP Adapter
//!
//! Conversion between hyper types and the pipeline's [`RequestInput`] /
//! [`Output`]. The pipeline itself stays synchronous; only body collection
//! is async.

use crate::error::{Error, Result};
use crate::request::RequestInput;
use crate::response::Output;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use std::fmt;
use tracing::warn;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Build request input from a hyper request
///
/// The body is collected up to `max_body_size` bytes. Urlencoded bodies
/// become form fields; any other body is kept raw.
///
/// # Errors
///
/// Returns `Error::PayloadTooLarge` if the declared or actual body size
/// exceeds the limit.
pub async fn from_hyper<B>(req: Request<B>, max_body_size: usize) -> Result<RequestInput>
where
    B: Body,
    B::Error: fmt::Display,
{
    if let Some(declared) = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|len| len.to_str().ok())
        .and_then(|len| len.parse::<usize>().ok())
    {
        if declared > max_body_size {
            return Err(Error::PayloadTooLarge {
                limit: max_body_size,
                actual: declared,
            });
        }
    }

    let (parts, body) = req.into_parts();
    let uri = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_string(), ToString::to_string);

    let mut input = RequestInput::new(parts.method.as_str(), uri);
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            input = input.with_header(name.as_str(), value);
        }
    }

    let bytes = match BodyExt::collect(body).await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            warn!(error = %err, "Failed to read request body");
            Bytes::new()
        }
    };
    if bytes.len() > max_body_size {
        return Err(Error::PayloadTooLarge {
            limit: max_body_size,
            actual: bytes.len(),
        });
    }

    let is_form = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|ct| ct.to_str().ok())
        .is_some_and(|ct| ct.trim().to_ascii_lowercase().starts_with(FORM_CONTENT_TYPE));

    if is_form {
        input = input.with_form_body(&String::from_utf8_lossy(&bytes));
    } else if !bytes.is_empty() {
        input = input.with_body(bytes);
    }
    Ok(input)
}

impl Output {
    /// Convert to a hyper response
    ///
    /// Always `200 OK`; the envelope carries the outcome. Header lines that
    /// hyper rejects are skipped.
    #[must_use]
    pub fn into_hyper(self) -> Response<Full<Bytes>> {
        let mut builder = Response::builder().status(StatusCode::OK);
        if !self.body.is_empty() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        for (name, value) in self.header_pairs() {
            if hyper::header::HeaderName::from_bytes(name.as_bytes()).is_ok()
                && hyper::header::HeaderValue::from_str(value).is_ok()
            {
                builder = builder.header(name, value);
            } else {
                warn!(header = name, "Skipping invalid response header");
            }
        }

        builder
            .body(Full::new(Bytes::from(self.body)))
            .unwrap_or_else(|_| {
                let mut fallback = Response::new(Full::new(Bytes::from("Internal Server Error")));
                *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                fallback
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::block_on;

    fn request(method: &str, uri: &str, content_type: Option<&str>, body: &'static str) -> Request<Full<Bytes>> {
        let mut builder = Request::builder().method(method).uri(uri).header("SpryTest", "1");
        if let Some(content_type) = content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        builder.body(Full::new(Bytes::from_static(body.as_bytes()))).unwrap()
    }

    #[test]
    fn test_from_hyper_json_body() {
        let req = request("POST", "/Users/?page=2", Some("application/json"), r#"{"id":1}"#);
        let input = block_on(from_hyper(req, 1024)).unwrap();
        assert_eq!(input.method(), Some("POST"));
        assert_eq!(input.path(), "/users/");
        assert_eq!(input.query()["page"], "2");
        assert_eq!(input.body_str(), r#"{"id":1}"#);
        assert!(input.is_test());
    }

    #[test]
    fn test_from_hyper_form_body() {
        let req = request("POST", "/form/", Some("application/x-www-form-urlencoded"), "a=1&b=two+words");
        let input = block_on(from_hyper(req, 1024)).unwrap();
        assert_eq!(input.body_str(), "");
        assert_eq!(input.form()["a"], "1");
        assert_eq!(input.form()["b"], "two words");
    }

    #[test]
    fn test_from_hyper_body_limit() {
        let req = request("POST", "/", None, "0123456789");
        let err = block_on(from_hyper(req, 4)).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { limit: 4, actual: 10 }));
    }

    #[test]
    fn test_output_into_hyper() {
        let output = Output {
            headers: vec![
                "Access-Control-Allow-Origin: *".to_string(),
                "not a header".to_string(),
            ],
            body: "{}".to_string(),
        };
        let response = output.into_hyper();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");

        let body = block_on(response.into_body().collect()).unwrap().to_bytes();
        assert_eq!(&body[..], b"{}");
    }

    #[test]
    fn test_preflight_output_has_no_content_type() {
        let output = Output {
            headers: vec!["Access-Control-Allow-Methods: GET".to_string()],
            body: String::new(),
        };
        let response = output.into_hyper();
        assert!(response.headers().get(CONTENT_TYPE).is_none());
    }
}
