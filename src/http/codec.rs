//! HTTP/1.1 head encoding and parsing.
//!
//! # Responsibilities
//! - Encode a request line and headers, choosing body framing
//! - Parse a response status line and headers
//! - Decide whether, and how, a response carries a body

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, Version};

use crate::hijack::types::{HijackError, HijackResult};
use crate::http::body::{Body, RequestBody};

/// Maximum number of response headers accepted.
pub const MAX_HEADERS: usize = 64;

/// Maximum size of a response head in bytes.
pub const MAX_HEAD_BYTES: usize = 64 * 1024;

/// How a response body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body at all.
    None,
    /// Exactly this many bytes follow.
    Length(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// Body runs until the peer closes the connection.
    UntilClose,
}

/// Whether a response to `method` with `status` may carry a body.
pub fn can_have_body(method: &Method, status: StatusCode) -> bool {
    if method == Method::HEAD {
        return false;
    }
    if method == Method::CONNECT && status.is_success() {
        return false;
    }
    status.as_u16() >= 200
        && status != StatusCode::NO_CONTENT
        && status != StatusCode::NOT_MODIFIED
}

/// Determine the framing of a response body from its headers.
pub fn response_framing(
    method: &Method,
    response: &Response<Body>,
) -> HijackResult<BodyFraming> {
    if !can_have_body(method, response.status()) {
        return Ok(BodyFraming::None);
    }

    let headers = response.headers();
    if let Some(te) = headers.get(TRANSFER_ENCODING) {
        let chunked = te
            .to_str()
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false);
        if chunked {
            return Ok(BodyFraming::Chunked);
        }
    }

    match headers.get(CONTENT_LENGTH) {
        Some(value) => {
            let len = value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .ok_or_else(|| {
                    HijackError::MalformedResponse(format!("invalid Content-Length: {:?}", value))
                })?;
            Ok(BodyFraming::Length(len))
        }
        None => Ok(BodyFraming::UntilClose),
    }
}

/// Encode the request line and headers.
///
/// `default_host` is used when neither the headers nor the URI carry a host.
/// In `raw` mode no framing header is added, since no HTTP body follows.
pub fn encode_request_head(
    request: &Request<RequestBody>,
    default_host: &str,
    raw: bool,
) -> HijackResult<Bytes> {
    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .filter(|pq| !pq.is_empty())
        .unwrap_or("/");

    let mut out = BytesMut::with_capacity(256);
    out.put_slice(request.method().as_str().as_bytes());
    out.put_u8(b' ');
    out.put_slice(target.as_bytes());
    out.put_slice(b" HTTP/1.1\r\n");

    let headers = request.headers();
    if !headers.contains_key(HOST) {
        let host = request
            .uri()
            .authority()
            .map(|a| a.as_str())
            .unwrap_or(default_host);
        put_header(&mut out, &HOST, host.as_bytes());
    }

    for (name, value) in headers.iter() {
        if name == CONTENT_LENGTH || name == TRANSFER_ENCODING {
            continue;
        }
        put_header(&mut out, name, value.as_bytes());
    }

    if !raw {
        match request.body() {
            RequestBody::Empty => {
                if body_expected(request.method()) {
                    put_header(&mut out, &CONTENT_LENGTH, b"0");
                }
            }
            RequestBody::Full(bytes) => {
                put_header(&mut out, &CONTENT_LENGTH, bytes.len().to_string().as_bytes());
            }
            RequestBody::Streaming(_) => {
                put_header(&mut out, &TRANSFER_ENCODING, b"chunked");
            }
        }
    }

    out.put_slice(b"\r\n");
    Ok(out.freeze())
}

fn body_expected(method: &Method) -> bool {
    method == Method::POST || method == Method::PUT || method == Method::PATCH
}

fn put_header(out: &mut BytesMut, name: &HeaderName, value: &[u8]) {
    out.put_slice(name.as_str().as_bytes());
    out.put_slice(b": ");
    out.put_slice(value);
    out.put_slice(b"\r\n");
}

/// Parse a complete response head (terminated by an empty line).
pub fn parse_response_head(raw: &[u8]) -> HijackResult<Response<Body>> {
    let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut storage);
    match parsed.parse(raw) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(HijackError::MalformedResponse(
                "incomplete response head".to_string(),
            ))
        }
        Err(e) => return Err(HijackError::MalformedResponse(e.to_string())),
    }

    let code = parsed
        .code
        .ok_or_else(|| HijackError::MalformedResponse("missing status code".to_string()))?;
    let status = StatusCode::from_u16(code)
        .map_err(|_| HijackError::MalformedResponse(format!("invalid status code {}", code)))?;
    let version = match parsed.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let mut headers = HeaderMap::with_capacity(parsed.headers.len());
    for header in parsed.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|e| HijackError::MalformedResponse(e.to_string()))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|e| HijackError::MalformedResponse(e.to_string()))?;
        headers.append(name, value);
    }

    let mut response = Response::new(Body::Empty);
    *response.status_mut() = status;
    *response.version_mut() = version;
    *response.headers_mut() = headers;
    Ok(response)
}
