//! The valve pipeline: ordered request-processing stages
//!
//! One pipeline instance is shared read-only by every worker of every
//! application. That is safe because valves must not keep per-request
//! mutable state; everything request-scoped lives on the [`Exchange`].

use crate::exchange::Exchange;
use std::sync::Arc;
use thiserror::Error;

/// Failure of a single pipeline stage. Recovered inside the worker loop;
/// never crosses the dispatch boundary.
#[derive(Error, Debug)]
#[error("valve '{valve}' failed: {message}")]
pub struct ValveError {
    pub valve: String,
    pub message: String,
}

impl ValveError {
    pub fn new(valve: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            valve: valve.into(),
            message: message.into(),
        }
    }
}

/// A single unit of request processing.
///
/// Valves run to completion within one worker turn; they must not block on
/// other requests or suspend across the dispatch boundary.
pub trait Valve: Send + Sync {
    fn name(&self) -> &str;

    fn invoke(&self, exchange: &mut Exchange) -> Result<(), ValveError>;
}

/// An ordered, immutable chain of valves.
#[derive(Clone)]
pub struct Pipeline {
    valves: Arc<[Box<dyn Valve>]>,
}

impl Pipeline {
    pub fn new(valves: Vec<Box<dyn Valve>>) -> Self {
        Self {
            valves: valves.into(),
        }
    }

    /// Run each valve in declared order, stopping early once the exchange is
    /// marked dispatched. The first stage error aborts the remainder.
    pub fn run(&self, exchange: &mut Exchange) -> Result<(), ValveError> {
        for valve in self.valves.iter() {
            if exchange.is_dispatched() {
                break;
            }
            valve.invoke(exchange)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.valves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.valves.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ServerRequest;
    use bytes::Bytes;
    use http::{HeaderMap, Method};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn exchange() -> Exchange {
        Exchange::new(ServerRequest::new(
            Method::GET,
            "/x".to_string(),
            HeaderMap::new(),
            Bytes::new(),
        ))
    }

    /// Appends its tag to the body; optionally marks the exchange dispatched
    /// or fails, and counts invocations.
    struct TagValve {
        tag: &'static str,
        dispatch: bool,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    impl TagValve {
        fn new(tag: &'static str) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    tag,
                    dispatch: false,
                    fail: false,
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    impl Valve for TagValve {
        fn name(&self) -> &str {
            self.tag
        }

        fn invoke(&self, exchange: &mut Exchange) -> Result<(), ValveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ValveError::new(self.tag, "boom"));
            }
            exchange.response.append_body(self.tag.as_bytes());
            if self.dispatch {
                exchange.mark_dispatched();
            }
            Ok(())
        }
    }

    #[test]
    fn runs_stages_in_declared_order() {
        let (a, _) = TagValve::new("a");
        let (b, _) = TagValve::new("b");
        let (c, _) = TagValve::new("c");
        let pipeline = Pipeline::new(vec![Box::new(a), Box::new(b), Box::new(c)]);

        let mut ex = exchange();
        assert!(!pipeline.is_empty());
        pipeline.run(&mut ex).unwrap();
        assert_eq!(ex.response.body(), b"abc");
    }

    #[test]
    fn dispatched_exchange_short_circuits_later_stages() {
        let (a, _) = TagValve::new("a");
        let (mut b, _) = TagValve::new("b");
        b.dispatch = true;
        let (c, c_calls) = TagValve::new("c");
        let pipeline = Pipeline::new(vec![Box::new(a), Box::new(b), Box::new(c)]);

        let mut ex = exchange();
        pipeline.run(&mut ex).unwrap();
        assert_eq!(ex.response.body(), b"ab");
        assert_eq!(c_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stage_error_stops_the_chain() {
        let (mut a, _) = TagValve::new("a");
        a.fail = true;
        let (b, b_calls) = TagValve::new("b");
        let pipeline = Pipeline::new(vec![Box::new(a), Box::new(b)]);

        let mut ex = exchange();
        let err = pipeline.run(&mut ex).unwrap_err();
        assert_eq!(err.valve, "a");
        assert_eq!(b_calls.load(Ordering::SeqCst), 0);
    }
}
