//! Subscription façade over a stream session.
//!
//! [`BetfairStreamClient`] owns the endpoint, certificate and application key,
//! hands out request ids, and turns subscribe calls into queued requests for
//! the session's write pump.

use std::sync::atomic::{AtomicU32, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::auth::{ClientCertificate, Credentials};
use crate::config::{ExchangeConfig, StreamConfig};
use crate::network::Endpoint;
use crate::stream::error::{StreamError, StreamResult};
use crate::stream::handlers::StreamClock;
use crate::stream::session::{Session, StreamOutputs};
use crate::stream::transport::Transport;
use crate::stream::types::{
    MarketDataFilter, MarketFilter, MarketSubscriptionMessage, OrderFilter,
    OrderSubscriptionMessage,
};

/// Client for the Betfair Exchange Stream API
#[derive(Debug)]
pub struct BetfairStreamClient {
    endpoint: Endpoint,
    certificate: ClientCertificate,
    app_key: String,
    config: StreamConfig,
    /// Last request id handed out; ids start at 1 and are never reused
    request_id: AtomicU32,
    session: Option<Session>,
}

impl BetfairStreamClient {
    pub fn new(
        endpoint: Endpoint,
        certificate: ClientCertificate,
        app_key: impl Into<String>,
        config: StreamConfig,
    ) -> Self {
        Self {
            endpoint,
            certificate,
            app_key: app_key.into(),
            config,
            request_id: AtomicU32::new(0),
            session: None,
        }
    }

    /// Build a client from an account config file.
    ///
    /// Fails before any network activity when the configured endpoint is
    /// neither the live nor the integration stream.
    pub fn from_config(config: &ExchangeConfig, stream_config: StreamConfig) -> StreamResult<Self> {
        let endpoint = config.endpoint()?;
        let certificate = config.client_certificate()?;
        Ok(Self::new(endpoint, certificate, config.api_key.clone(), stream_config))
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Connect, authenticate with `session_token`, and start streaming.
    ///
    /// A session that is already running is stopped first.
    pub async fn start(&mut self, session_token: &str) -> StreamResult<StreamOutputs> {
        self.stop();
        let credentials = Credentials::new(self.app_key.clone(), session_token);
        let (session, outputs) = Session::start(
            self.endpoint,
            &self.certificate,
            &credentials,
            self.next_id(),
            &self.config,
        )
        .await?;
        self.session = Some(session);
        Ok(outputs)
    }

    /// Authenticate over a transport the caller has already connected
    pub async fn start_with_transport<S>(
        &mut self,
        transport: Transport<S>,
        session_token: &str,
    ) -> StreamResult<StreamOutputs>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        self.stop();
        let credentials = Credentials::new(self.app_key.clone(), session_token);
        let (session, outputs) =
            Session::start_with_transport(transport, &credentials, self.next_id(), &self.config)
                .await?;
        self.session = Some(session);
        Ok(outputs)
    }

    /// Queue a market subscription and return its request id
    pub async fn subscribe_to_markets(
        &self,
        market_filter: MarketFilter,
        market_data_filter: MarketDataFilter,
    ) -> StreamResult<u32> {
        let session = self.session()?;
        let id = self.next_id();
        session
            .subscribe_markets(MarketSubscriptionMessage::new(id, market_filter, market_data_filter))
            .await?;
        tracing::debug!("Market subscription {} queued", id);
        Ok(id)
    }

    /// Queue an order subscription and return its request id
    pub async fn subscribe_to_orders(&self, order_filter: Option<OrderFilter>) -> StreamResult<u32> {
        let session = self.session()?;
        let id = self.next_id();
        session
            .subscribe_orders(OrderSubscriptionMessage::new(id, order_filter))
            .await?;
        tracing::debug!("Order subscription {} queued", id);
        Ok(id)
    }

    /// Stop the running session, if any
    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop();
        }
    }

    /// Whether a session is running
    pub fn is_running(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_running)
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.session.as_ref().map(Session::connection_id)
    }

    /// Latest market stream clocks, for callers resuming from a cursor
    pub fn market_clock(&self) -> Option<StreamClock> {
        self.session.as_ref().map(Session::market_clock)
    }

    /// Latest order stream clocks
    pub fn order_clock(&self) -> Option<StreamClock> {
        self.session.as_ref().map(Session::order_clock)
    }

    fn session(&self) -> StreamResult<&Session> {
        self.session.as_ref().ok_or(StreamError::NoConnection)
    }

    fn next_id(&self) -> u32 {
        self.request_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Drop for BetfairStreamClient {
    fn drop(&mut self) {
        self.stop();
    }
}
