//! Request middleware for the HTTP transport.
//!
//! Every request the [`HttpTransport`](crate::http::HttpTransport) makes
//! (POST, the SSE GET and the session DELETE) runs through its middleware
//! chain. A middleware receives the request and a [`Next`] handle; it may
//! rewrite the request, call `next.run` any number of times, or answer
//! without calling it at all.
//!
//! - [`RetryMiddleware`]: exponential backoff on transient failures
//! - [`OAuthMiddleware`]: bearer tokens, refresh and re-authorization on 401
//!
//! # Example
//!
//! ```rust
//! use mcpwire_transport::http::HttpTransport;
//! use mcpwire_transport::middleware::{RetryConfig, RetryMiddleware};
//! use url::Url;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = HttpTransport::builder(Url::parse("http://localhost:8080/mcp")?)
//!     .middleware(RetryMiddleware::new(RetryConfig::default().with_max_retries(5)))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

mod oauth;
mod retry;

pub use oauth::OAuthMiddleware;
pub use retry::{DefaultRetryPolicy, RetryConfig, RetryMiddleware, RetryPolicy};

use crate::error::TransportError;
use async_trait::async_trait;
use reqwest::{Client, Request, Response};
use std::sync::Arc;

/// A wrapper around the HTTP requests a transport sends.
#[async_trait]
pub trait HttpMiddleware: Send + Sync {
    /// Handle one request, usually by calling `next.run`.
    ///
    /// # Errors
    ///
    /// Returns whatever error the rest of the chain produced, or one of the
    /// middleware's own.
    async fn handle(&self, request: Request, next: Next<'_>) -> Result<Response, TransportError>;
}

/// The remainder of a middleware chain.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    client: &'a Client,
    middleware: &'a [Arc<dyn HttpMiddleware>],
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.middleware.len())
            .finish_non_exhaustive()
    }
}

impl<'a> Next<'a> {
    /// A chain that runs `middleware` in order and then sends on `client`.
    #[must_use]
    pub fn new(client: &'a Client, middleware: &'a [Arc<dyn HttpMiddleware>]) -> Self {
        Self { client, middleware }
    }

    /// Pass the request down the chain.
    ///
    /// # Errors
    ///
    /// Returns the first error raised further down the chain.
    pub async fn run(self, request: Request) -> Result<Response, TransportError> {
        match self.middleware.split_first() {
            Some((first, rest)) => {
                first
                    .handle(
                        request,
                        Next {
                            client: self.client,
                            middleware: rest,
                        },
                    )
                    .await
            }
            None => Ok(self.client.execute(request).await?),
        }
    }

    /// The HTTP client at the end of the chain.
    #[must_use]
    pub const fn client(&self) -> &'a Client {
        self.client
    }
}
