//! Observer hooks for handshake outcomes
//!
//! Reporters only observe; nothing they do changes whether a handshake
//! succeeds.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::HandshakeError;

/// Counter keys emitted by the credentials in this crate
pub mod keys {
    pub const CLIENT_WRAPPED_ERRORS: &str = "handshake.client.wrapped.errors";
    pub const CLIENT_UNSUCCESSFUL: &str = "handshake.client.unsuccessful";
    pub const SERVER_WRAPPED_ERRORS: &str = "handshake.server.wrapped.errors";
    pub const SERVER_REJECTED: &str = "handshake.server.rejected";
    pub const INSTANCE_IDENTITY_SERVER_INVALID: &str = "instance_identity.server.invalid";
}

pub trait ErrorReporter: Send + Sync {
    fn report_error(&self, err: &HandshakeError);
}

pub trait MetricsReporter: Send + Sync {
    fn count(&self, key: &str, by: i64);

    fn gauge(&self, key: &str, value: i64);
}

pub type SharedErrorReporter = Arc<dyn ErrorReporter>;
pub type SharedMetricsReporter = Arc<dyn MetricsReporter>;

/// Forwards everything to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report_error(&self, err: &HandshakeError) {
        warn!("Handshake error: {}", err);
    }
}

impl MetricsReporter for TracingReporter {
    fn count(&self, key: &str, by: i64) {
        debug!(counter = key, by, "count");
    }

    fn gauge(&self, key: &str, value: i64) {
        debug!(gauge = key, value, "gauge");
    }
}

/// Optional reporters carried by a credential
#[derive(Clone, Default)]
pub(crate) struct Reporters {
    pub errors: Option<SharedErrorReporter>,
    pub metrics: Option<SharedMetricsReporter>,
}

impl Reporters {
    pub fn error(&self, err: &HandshakeError) {
        if let Some(r) = &self.errors {
            r.report_error(err);
        }
    }

    pub fn count(&self, key: &str, by: i64) {
        if let Some(m) = &self.metrics {
            m.count(key, by);
        }
    }
}
