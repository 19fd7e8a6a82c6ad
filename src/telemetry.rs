//! Request timing and span helpers.

use std::time::Instant;

/// Guard for timing a request and recording metrics.
///
/// Records latency when [`RequestTimer::finish`] is called with the final
/// status; a timer dropped without finishing records nothing.
pub struct RequestTimer {
    method: String,
    route: String,
    start: Instant,
}

impl RequestTimer {
    pub fn new(method: impl Into<String>, route: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            route: route.into(),
            start: Instant::now(),
        }
    }

    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();
        crate::metrics::record_request(&self.method, &self.route, status, duration);
    }
}

/// Standardized span constructors.
pub mod spans {
    use tracing::{Span, info_span};

    /// Span for background e-mail delivery.
    pub fn email(kind: &str, to: &str) -> Span {
        info_span!("email", kind = %kind, to = %to)
    }
}
