//! Built-in valves
//!
//! A minimal default chain: access logging, a server header, and a terminal
//! echo stage that renders a response for anything not already dispatched.

use crate::exchange::Exchange;
use crate::pipeline::{Valve, ValveError};
use chrono::Utc;
use http::{header, HeaderValue};
use tracing::info;

/// Logs one line per request, Tomcat-access-log style.
pub struct AccessLogValve;

impl Valve for AccessLogValve {
    fn name(&self) -> &str {
        "access-log"
    }

    fn invoke(&self, exchange: &mut Exchange) -> Result<(), ValveError> {
        info!(
            target: "valvehost::access",
            time = %Utc::now().to_rfc3339(),
            id = %exchange.request.id,
            method = %exchange.request.method,
            path = %exchange.request.path,
            "request"
        );
        Ok(())
    }
}

/// Stamps the Server header on every response.
pub struct ServerHeaderValve;

impl Valve for ServerHeaderValve {
    fn name(&self) -> &str {
        "server-header"
    }

    fn invoke(&self, exchange: &mut Exchange) -> Result<(), ValveError> {
        exchange
            .response
            .headers
            .insert(header::SERVER, HeaderValue::from_static("valvehost/0.1"));
        Ok(())
    }
}

/// Terminal stage: echoes the request back as JSON and marks the exchange
/// dispatched.
pub struct EchoValve;

impl Valve for EchoValve {
    fn name(&self) -> &str {
        "echo"
    }

    fn invoke(&self, exchange: &mut Exchange) -> Result<(), ValveError> {
        let body = serde_json::json!({
            "id": exchange.request.id.to_string(),
            "method": exchange.request.method.as_str(),
            "path": exchange.request.path,
            "body_bytes": exchange.request.body.len(),
        });
        exchange.response.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        exchange.response.append_body(body.to_string().as_bytes());
        exchange.mark_dispatched();
        Ok(())
    }
}
