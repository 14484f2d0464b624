//! The request/response pair carried through the pipeline
//!
//! An [`Exchange`] is created fresh per inbound request, moved to exactly one
//! worker for the duration of that request, and moved back on completion.
//! Nothing here is shared; the transfer itself is the synchronization.

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use uuid::Uuid;

/// Framework-level view of the inbound request.
pub struct ServerRequest {
    pub id: Uuid,
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ServerRequest {
    pub fn new(method: Method, path: String, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            path,
            headers,
            body,
        }
    }
}

/// Accumulates response state as valves run. Copied back to the transport
/// response losslessly: status, headers and body all survive the trip.
#[derive(Debug)]
pub struct ServerResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    body: Vec<u8>,
}

impl ServerResponse {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn append_body(&mut self, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl Default for ServerResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl IntoResponse for ServerResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// A single request/response pair with its short-circuit flag.
pub struct Exchange {
    pub request: ServerRequest,
    pub response: ServerResponse,
    dispatched: bool,
}

impl Exchange {
    pub fn new(request: ServerRequest) -> Self {
        Self {
            request,
            response: ServerResponse::new(),
            dispatched: false,
        }
    }

    /// Mark the exchange as fully handled; remaining pipeline stages are
    /// skipped.
    pub fn mark_dispatched(&mut self) {
        self.dispatched = true;
    }

    pub fn is_dispatched(&self) -> bool {
        self.dispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header;

    fn exchange() -> Exchange {
        Exchange::new(ServerRequest::new(
            Method::GET,
            "/apps/demo/hello".to_string(),
            HeaderMap::new(),
            Bytes::new(),
        ))
    }

    #[test]
    fn starts_undispatched() {
        let mut ex = exchange();
        assert!(!ex.is_dispatched());
        ex.mark_dispatched();
        assert!(ex.is_dispatched());
    }

    #[test]
    fn response_copies_back_losslessly() {
        let mut res = ServerResponse::new();
        res.status = StatusCode::CREATED;
        res.headers
            .insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());
        res.append_body(b"hello ");
        res.append_body(b"world");

        let http = res.into_response();
        assert_eq!(http.status(), StatusCode::CREATED);
        assert_eq!(http.headers()[header::CONTENT_TYPE], "text/plain");
    }
}
