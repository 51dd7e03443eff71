//! HTTP transport: carries atom and bond dispatches to peer services.

pub mod resolver;

use crate::config::Config;
use crate::core::executor::{DispatchError, Dispatcher, ExecContext};
use crate::core::types::Capture;
use async_trait::async_trait;
use resolver::Resolver;
use thiserror::Error;

/// Failure of one HTTP hop. Reaches the engine boxed inside
/// [`DispatchError::Transport`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("cannot decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl From<TransportError> for DispatchError {
    fn from(e: TransportError) -> Self {
        DispatchError::Transport(Box::new(e))
    }
}

/// [`Dispatcher`] that issues `GET` requests and decodes [`Capture`] bodies.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
    resolver: Resolver,
}

impl HttpDispatcher {
    pub fn new(config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.call_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            resolver: Resolver::new(config),
        }
    }

    async fn get(
        &self,
        ctx: &ExecContext,
        url: String,
        param: &str,
        value: &str,
    ) -> Result<Capture, TransportError> {
        let mut request = self.client.get(&url).query(&[(param, value)]);
        for (name, value) in ctx.outbound_headers().iter() {
            request = request.header(name, value);
        }

        tracing::debug!(url = %url, param, value, "dispatching");
        let response = request
            .send()
            .await
            .map_err(|source| TransportError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url,
                status: status.as_u16(),
            });
        }
        response
            .json::<Capture>()
            .await
            .map_err(|source| TransportError::Decode { url, source })
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    type Output = Capture;

    async fn dispatch_atom(&self, ctx: &ExecContext, content: &str) -> Result<Capture, DispatchError> {
        // content was validated as `symbol[,k:v...]` when the plan was parsed
        let symbol = content.split(',').next().unwrap_or(content);
        let url = self.resolver.atom_url(symbol);
        Ok(self.get(ctx, url, "symbol", content).await?)
    }

    async fn dispatch_bond(&self, ctx: &ExecContext, fragment: &str) -> Result<Capture, DispatchError> {
        let url = self.resolver.bond_url();
        Ok(self.get(ctx, url, "molecule", fragment).await?)
    }
}
