//! Mounts delegated to an out-of-process proxy over QUIC.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::{ExecutorError, MountExecutor};
use crate::credentials::redact_env;
use crate::message::{MountRequest, MountResponse};
use crate::transport::{QuicClient, RequestHandler};

/// [`MountExecutor`] that forwards each mount to a `mount-proxy` server.
///
/// Every call dials a fresh connection bounded by the connect timeout; the
/// call itself is bounded by the mount timeout.
pub struct ProxyMountExecutor {
    endpoint: SocketAddr,
    server_name: String,
    tls_config: rustls::ClientConfig,
    connect_timeout: Duration,
    mount_timeout: Duration,
}

impl ProxyMountExecutor {
    pub fn new(
        endpoint: SocketAddr,
        server_name: impl Into<String>,
        tls_config: rustls::ClientConfig,
        connect_timeout: Duration,
        mount_timeout: Duration,
    ) -> Self {
        Self {
            endpoint,
            server_name: server_name.into(),
            tls_config,
            connect_timeout,
            mount_timeout,
        }
    }
}

#[async_trait]
impl MountExecutor for ProxyMountExecutor {
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    async fn mount(&self, args: &str, auth_env: &[String]) -> Result<String, ExecutorError> {
        let client = tokio::time::timeout(
            self.connect_timeout,
            QuicClient::connect(self.endpoint, &self.server_name, self.tls_config.clone()),
        )
        .await
        .map_err(|_| ExecutorError::Timeout(self.connect_timeout))?
        .map_err(|e| ExecutorError::Unavailable(e.to_string()))?;

        let request = MountRequest {
            args: args.to_owned(),
            auth_env: auth_env.to_vec(),
        };
        debug!(?request, "forwarding mount to proxy");

        let result = tokio::time::timeout(
            self.mount_timeout,
            client.request::<_, MountResponse>(&request),
        )
        .await;
        client.close();

        let response = result
            .map_err(|_| ExecutorError::Timeout(self.mount_timeout))?
            .map_err(|e| ExecutorError::Unavailable(e.to_string()))?;
        match response.error {
            Some(reason) => Err(ExecutorError::Failed {
                reason,
                output: response.output,
            }),
            None => Ok(response.output),
        }
    }
}

/// Server side of the mount proxy: runs each [`MountRequest`] on a local
/// executor.
pub struct MountProxyHandler {
    executor: Arc<dyn MountExecutor>,
}

impl MountProxyHandler {
    pub fn new(executor: Arc<dyn MountExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl RequestHandler for MountProxyHandler {
    type Request = MountRequest;
    type Response = MountResponse;

    async fn handle(&self, request: MountRequest) -> MountResponse {
        info!(args = %request.args, env = ?redact_env(&request.auth_env), "proxied mount");
        match self.executor.mount(&request.args, &request.auth_env).await {
            Ok(output) => MountResponse {
                output,
                error: None,
            },
            Err(ExecutorError::Failed { reason, output }) => {
                warn!(%reason, "proxied mount failed");
                MountResponse {
                    output,
                    error: Some(reason),
                }
            }
            Err(e) => {
                warn!(error = %e, "proxied mount failed");
                MountResponse {
                    output: String::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    fn malformed(&self, reason: String) -> MountResponse {
        MountResponse {
            output: String::new(),
            error: Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted(Result<String, ExecutorError>);

    #[async_trait]
    impl MountExecutor for Scripted {
        async fn mount(&self, _: &str, _: &[String]) -> Result<String, ExecutorError> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn handler_reports_helper_failure() {
        let handler = MountProxyHandler::new(Arc::new(Scripted(Err(ExecutorError::Failed {
            reason: "exit status: 1".into(),
            output: "invalid account key".into(),
        }))));
        let resp = handler
            .handle(MountRequest {
                args: "/target".into(),
                auth_env: vec![],
            })
            .await;
        assert_eq!(resp.error.as_deref(), Some("exit status: 1"));
        assert_eq!(resp.output, "invalid account key");
    }

    #[tokio::test]
    async fn handler_passes_output_through() {
        let handler = MountProxyHandler::new(Arc::new(Scripted(Ok("mounted".into()))));
        let resp = handler
            .handle(MountRequest {
                args: "/target".into(),
                auth_env: vec![],
            })
            .await;
        assert_eq!(
            resp,
            MountResponse {
                output: "mounted".into(),
                error: None,
            }
        );
    }
}
