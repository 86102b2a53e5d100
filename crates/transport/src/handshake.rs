//! Claims handshake credentials
//!
//! After the (optional) inner handshake the client sends one claims frame and
//! the server answers with one `HandshakeResponse` frame. The server decides by
//! running its `ClaimsValidator`; the value the validator returns becomes the
//! client's identity on the server side.

use async_trait::async_trait;
use serde_json::Value;
use shakehand_protocol::{
    Claims, DEFAULT_MAX_FRAME_SIZE, HandshakeResponse, read_frame, write_frame,
};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::credentials::{close, wrapped_client_handshake, wrapped_server_handshake};
use crate::reporters::{Reporters, keys};
use crate::{
    AuthInfo, BoxedCredentials, BoxedStream, HandshakeError, HandshakeOutput, ProtocolInfo,
    SharedErrorReporter, SharedMetricsReporter, TransportCredentials,
};

/// Decides whether a client's claims are acceptable
///
/// `Ok` carries the identity to attach to the connection; `Err` carries the
/// reason sent back to the client.
pub trait ClaimsValidator: Send + Sync {
    fn validate(&self, claims: &Claims) -> Result<Value, String>;
}

impl<F> ClaimsValidator for F
where
    F: Fn(&Claims) -> Result<Value, String> + Send + Sync,
{
    fn validate(&self, claims: &Claims) -> Result<Value, String> {
        self(claims)
    }
}

/// Options shared by the handshake credentials
#[derive(Clone)]
pub struct HandshakeOptions {
    pub(crate) reporters: Reporters,

    /// Largest handshake frame accepted from the peer
    pub(crate) max_frame_size: usize,
}

impl Default for HandshakeOptions {
    fn default() -> Self {
        Self {
            reporters: Reporters::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl HandshakeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_error_reporter(mut self, reporter: SharedErrorReporter) -> Self {
        self.reporters.errors = Some(reporter);
        self
    }

    pub fn with_metrics_reporter(mut self, reporter: SharedMetricsReporter) -> Self {
        self.reporters.metrics = Some(reporter);
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

#[derive(Clone)]
enum Role {
    Client { claims: Claims },
    Server { validator: Arc<dyn ClaimsValidator> },
}

#[derive(Clone)]
pub struct HandshakeCredentials {
    role: Role,
    inner: Option<BoxedCredentials>,
    options: HandshakeOptions,
}

impl HandshakeCredentials {
    /// Client credentials sending `claims`
    pub fn client(claims: Claims) -> Self {
        Self {
            role: Role::Client { claims },
            inner: None,
            options: HandshakeOptions::default(),
        }
    }

    /// Server credentials deciding with `validator`
    pub fn server(validator: impl ClaimsValidator + 'static) -> Self {
        Self {
            role: Role::Server {
                validator: Arc::new(validator),
            },
            inner: None,
            options: HandshakeOptions::default(),
        }
    }

    /// Run `inner` first and exchange claims over its stream
    pub fn wrapping(mut self, inner: impl TransportCredentials + 'static) -> Self {
        self.inner = Some(Box::new(inner));
        self
    }

    pub fn with_options(mut self, options: HandshakeOptions) -> Self {
        self.options = options;
        self
    }

    fn fail(&self, err: HandshakeError) -> HandshakeError {
        self.options.reporters.error(&err);
        err
    }

    async fn send_claims(&self, conn: &mut BoxedStream, claims: &Claims) -> Result<(), HandshakeError> {
        write_frame(conn, claims).await?;

        let response: HandshakeResponse = read_frame(conn, self.options.max_frame_size).await?;
        response.into_result().map_err(HandshakeError::Rejected)
    }
}

#[async_trait]
impl TransportCredentials for HandshakeCredentials {
    async fn client_handshake(
        &self,
        authority: &str,
        conn: BoxedStream,
    ) -> Result<HandshakeOutput, HandshakeError> {
        let Role::Client { claims } = &self.role else {
            error!("Claims server credentials used to dial {}", authority);
            return Err(self.fail(HandshakeError::Configuration(
                "server credentials used for a client handshake".to_string(),
            )));
        };

        let (mut conn, inner_info) =
            match wrapped_client_handshake(self.inner.as_deref(), authority, conn).await {
                Ok(out) => out,
                Err(e) => {
                    self.options.reporters.count(keys::CLIENT_WRAPPED_ERRORS, 1);
                    return Err(self.fail(e));
                }
            };

        match self.send_claims(&mut conn, claims).await {
            Ok(()) => {
                debug!("Claims accepted by {}", authority);
                Ok((conn, inner_info))
            }
            Err(e) => {
                if let HandshakeError::Rejected(reason) = &e {
                    warn!("Claims rejected by {}: {}", authority, reason);
                    self.options.reporters.count(keys::CLIENT_UNSUCCESSFUL, 1);
                }
                close(conn).await;
                Err(self.fail(e))
            }
        }
    }

    async fn server_handshake(&self, conn: BoxedStream) -> Result<HandshakeOutput, HandshakeError> {
        let Role::Server { validator } = &self.role else {
            error!("Claims client credentials used to accept a connection");
            return Err(self.fail(HandshakeError::Configuration(
                "client credentials used for a server handshake".to_string(),
            )));
        };

        let (mut conn, inner_info) = match wrapped_server_handshake(self.inner.as_deref(), conn).await {
            Ok(out) => out,
            Err(e) => {
                self.options.reporters.count(keys::SERVER_WRAPPED_ERRORS, 1);
                return Err(self.fail(e));
            }
        };

        // Peers encode an absent map as `null`
        let claims = match read_frame::<Option<Claims>, _>(&mut conn, self.options.max_frame_size).await {
            Ok(claims) => claims.unwrap_or_default(),
            Err(e) => {
                close(conn).await;
                return Err(self.fail(e.into()));
            }
        };

        match validator.validate(&claims) {
            Ok(identity) => {
                if let Err(e) = write_frame(&mut conn, &HandshakeResponse::accepted()).await {
                    close(conn).await;
                    return Err(self.fail(e.into()));
                }

                debug!("Accepted claims handshake");

                let info = AuthInfo::Handshake {
                    identity,
                    wrapped: inner_info.map(Box::new),
                };
                Ok((conn, Some(info)))
            }
            Err(reason) => {
                warn!("Rejected claims handshake: {}", reason);
                self.options.reporters.count(keys::SERVER_REJECTED, 1);

                if let Err(e) = write_frame(&mut conn, &HandshakeResponse::rejected(reason.as_str())).await {
                    debug!("Could not deliver rejection: {}", e);
                }
                close(conn).await;
                Err(self.fail(HandshakeError::Rejected(reason)))
            }
        }
    }

    fn info(&self) -> ProtocolInfo {
        match &self.inner {
            Some(inner) => inner.info(),
            None => ProtocolInfo::new("handshake", "1"),
        }
    }

    fn box_clone(&self) -> Box<dyn TransportCredentials> {
        Box::new(self.clone())
    }

    fn override_server_name(&mut self, name: &str) -> Result<(), HandshakeError> {
        match &mut self.inner {
            Some(inner) => inner.override_server_name(name),
            None => Ok(()),
        }
    }
}
