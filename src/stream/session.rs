//! Stream session: authentication plus the read and write pumps.
//!
//! After authenticating, a session runs two tasks. The read pump owns the
//! caches and turns frames into snapshots on the output queues; the write
//! pump drains the subscription request queues onto the socket. Errors after
//! start-up are delivered on [`StreamOutputs::errors`] and end the pump that
//! hit them.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::auth::{ClientCertificate, Credentials};
use crate::config::StreamConfig;
use crate::network::Endpoint;
use crate::stream::error::{StreamError, StreamResult};
use crate::stream::handlers::{MarketSubscriptionResponse, MessageHandler, StreamClock, StreamEvent};
use crate::stream::state::{MarketBook, OrderBookCache};
use crate::stream::transport::{FrameReader, FrameWriter, Transport};
use crate::stream::types::{
    AuthenticationMessage, MarketSubscriptionMessage, OrderSubscriptionMessage, RequestMessage,
    StatusMessage,
};

/// Receiving ends of a session's output queues
#[derive(Debug)]
pub struct StreamOutputs {
    /// One snapshot per market per applied change message
    pub market_updates: mpsc::Receiver<MarketBook>,
    /// One order cache copy per market per applied change message
    pub order_updates: mpsc::Receiver<OrderBookCache>,
    /// Markets active after (re)subscription
    pub subscriptions: mpsc::Receiver<MarketSubscriptionResponse>,
    /// Status frames received after authentication
    pub status: mpsc::Receiver<StatusMessage>,
    /// Session-fatal errors; the session must be recreated after one arrives
    pub errors: mpsc::Receiver<StreamError>,
}

/// Sending ends of the output queues, owned by the pumps
#[derive(Debug)]
struct OutputSenders {
    market_updates: mpsc::Sender<MarketBook>,
    order_updates: mpsc::Sender<OrderBookCache>,
    subscriptions: mpsc::Sender<MarketSubscriptionResponse>,
    status: mpsc::Sender<StatusMessage>,
    errors: mpsc::Sender<StreamError>,
}

fn output_channels(config: &StreamConfig) -> (OutputSenders, StreamOutputs) {
    let (market_tx, market_rx) = mpsc::channel(config.market_update_capacity);
    let (order_tx, order_rx) = mpsc::channel(config.order_update_capacity);
    let (subscription_tx, subscription_rx) = mpsc::channel(config.subscription_capacity);
    let (status_tx, status_rx) = mpsc::channel(config.status_capacity);
    let (error_tx, error_rx) = mpsc::channel(config.error_capacity);

    (
        OutputSenders {
            market_updates: market_tx,
            order_updates: order_tx,
            subscriptions: subscription_tx,
            status: status_tx,
            errors: error_tx,
        },
        StreamOutputs {
            market_updates: market_rx,
            order_updates: order_rx,
            subscriptions: subscription_rx,
            status: status_rx,
            errors: error_rx,
        },
    )
}

/// Send with backpressure; a dropped receiver only loses that output
async fn deliver<T>(tx: &mpsc::Sender<T>, value: T, output: &str) {
    if tx.send(value).await.is_err() {
        tracing::warn!("{} receiver dropped, output discarded", output);
    }
}

impl OutputSenders {
    async fn publish(&self, event: StreamEvent) {
        match event {
            StreamEvent::MarketUpdate(book) => deliver(&self.market_updates, book, "Market update").await,
            StreamEvent::OrderUpdate(cache) => deliver(&self.order_updates, cache, "Order update").await,
            StreamEvent::Subscribed(response) => {
                deliver(&self.subscriptions, response, "Subscription").await
            }
            StreamEvent::Status(status) => deliver(&self.status, status, "Status").await,
        }
    }

    async fn report(&self, error: StreamError) {
        deliver(&self.errors, error, "Error").await;
    }
}

/// A running, authenticated stream session
#[derive(Debug)]
pub struct Session {
    connection_id: String,
    market_requests: mpsc::Sender<MarketSubscriptionMessage>,
    order_requests: mpsc::Sender<OrderSubscriptionMessage>,
    stop_tx: watch::Sender<bool>,
    read_task: JoinHandle<()>,
    write_task: JoinHandle<()>,
    market_clock: watch::Receiver<StreamClock>,
    order_clock: watch::Receiver<StreamClock>,
}

impl Session {
    /// Dial `endpoint`, authenticate, and start the pumps
    pub async fn start(
        endpoint: Endpoint,
        certificate: &ClientCertificate,
        credentials: &Credentials,
        auth_id: u32,
        config: &StreamConfig,
    ) -> StreamResult<(Self, StreamOutputs)> {
        let transport = Transport::connect(endpoint, certificate, config.frame_buffer_capacity).await?;
        Self::start_with_transport(transport, credentials, auth_id, config).await
    }

    /// Authenticate over an already handshaken transport and start the pumps.
    ///
    /// On authentication failure the transport is closed and no task is
    /// left running.
    pub async fn start_with_transport<S>(
        mut transport: Transport<S>,
        credentials: &Credentials,
        auth_id: u32,
        config: &StreamConfig,
    ) -> StreamResult<(Self, StreamOutputs)>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        if let Err(e) = authenticate(&mut transport, credentials, auth_id).await {
            transport.stop().await;
            return Err(e);
        }

        let connection_id = transport.connection_id().to_string();
        let (reader, writer) = transport.into_split()?;

        let (market_requests, market_rx) = mpsc::channel(config.market_request_capacity);
        let (order_requests, order_rx) = mpsc::channel(config.order_request_capacity);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (senders, outputs) = output_channels(config);

        let handler = MessageHandler::new();
        let market_clock = handler.markets().clock();
        let order_clock = handler.orders().clock();

        let write_task = tokio::spawn(write_pump(
            writer,
            market_rx,
            order_rx,
            senders.errors.clone(),
            stop_rx.clone(),
        ));
        let read_task = tokio::spawn(read_pump(reader, handler, senders, stop_rx));

        tracing::info!("Stream session {} started", connection_id);
        Ok((
            Self {
                connection_id,
                market_requests,
                order_requests,
                stop_tx,
                read_task,
                write_task,
                market_clock,
                order_clock,
            },
            outputs,
        ))
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Queue a market subscription; waits while the queue is full
    pub async fn subscribe_markets(&self, request: MarketSubscriptionMessage) -> StreamResult<()> {
        self.market_requests.send(request).await?;
        Ok(())
    }

    /// Queue an order subscription; waits while the queue is full
    pub async fn subscribe_orders(&self, request: OrderSubscriptionMessage) -> StreamResult<()> {
        self.order_requests.send(request).await?;
        Ok(())
    }

    /// Latest clocks seen on the market stream
    pub fn market_clock(&self) -> StreamClock {
        self.market_clock.borrow().clone()
    }

    /// Latest clocks seen on the order stream
    pub fn order_clock(&self) -> StreamClock {
        self.order_clock.borrow().clone()
    }

    /// Whether both pumps are still running
    pub fn is_running(&self) -> bool {
        !self.read_task.is_finished() && !self.write_task.is_finished()
    }

    /// Signal both pumps to stop and abort them, closing the socket.
    ///
    /// Returns without waiting for the tasks to exit.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
        self.read_task.abort();
        self.write_task.abort();
        tracing::info!("Stream session {} stopped", self.connection_id);
    }
}

/// Send the authentication frame and require a `SUCCESS` status in reply
async fn authenticate<S>(
    transport: &mut Transport<S>,
    credentials: &Credentials,
    id: u32,
) -> StreamResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = RequestMessage::Authentication(AuthenticationMessage {
        id,
        app_key: credentials.app_key.clone(),
        session: credentials.session_token.clone(),
    });
    transport.write(&request.to_frame()?).await?;
    tracing::debug!("Authentication request {} sent", id);

    let frame = transport.read_frame().await?;
    let status: StatusMessage = serde_json::from_slice(&frame)?;

    if !status.is_success() {
        tracing::error!(
            "Authentication failed: {} ({})",
            status.error_message.as_deref().unwrap_or("no message"),
            status.error_code.as_deref().unwrap_or("no code")
        );
        return Err(StreamError::AuthenticationFailed {
            code: status.error_code,
            message: status.error_message,
        });
    }

    tracing::debug!(
        "Authenticated, {} connections available",
        status.connections_available.unwrap_or_default()
    );
    Ok(())
}

/// Read frames, apply them to the caches and publish the results
async fn read_pump<R>(
    mut reader: FrameReader<R>,
    mut handler: MessageHandler,
    outputs: OutputSenders,
    mut stop: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        if *stop.borrow() {
            break;
        }

        let frame = tokio::select! {
            biased;
            _ = stop.changed() => break,
            frame = reader.read_frame() => frame,
        };

        let events = match frame.and_then(|frame| handler.handle_frame(&frame)) {
            Ok(events) => events,
            Err(e) => {
                tracing::error!("Read pump failed: {}", e);
                outputs.report(e).await;
                break;
            }
        };

        for event in events {
            let closed = match &event {
                StreamEvent::Status(status) if status.connection_closed => {
                    Some(StreamError::ServerClosed {
                        code: status.error_code.clone(),
                        message: status.error_message.clone(),
                    })
                }
                _ => None,
            };

            outputs.publish(event).await;

            if let Some(e) = closed {
                tracing::error!("{}", e);
                outputs.report(e).await;
                return;
            }
        }
    }
    tracing::debug!("Read pump exited");
}

/// Drain subscription requests onto the socket
async fn write_pump<W>(
    mut writer: FrameWriter<W>,
    mut market_requests: mpsc::Receiver<MarketSubscriptionMessage>,
    mut order_requests: mpsc::Receiver<OrderSubscriptionMessage>,
    errors: mpsc::Sender<StreamError>,
    mut stop: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        if *stop.borrow() {
            break;
        }

        let request = tokio::select! {
            biased;
            _ = stop.changed() => break,
            Some(request) = market_requests.recv() => RequestMessage::MarketSubscription(request),
            Some(request) = order_requests.recv() => RequestMessage::OrderSubscription(request),
            else => break,
        };

        let sent = match request.to_frame() {
            Ok(frame) => writer.write_frame(&frame).await,
            Err(e) => Err(e),
        };
        match sent {
            Ok(()) => tracing::debug!("Subscription request {} sent", request.id()),
            Err(e) => {
                tracing::error!("Write pump failed: {}", e);
                deliver(&errors, e, "Error").await;
                break;
            }
        }
    }

    if let Err(e) = writer.shutdown().await {
        tracing::debug!("Error closing stream socket: {}", e);
    }
    tracing::debug!("Write pump exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream, ReadHalf, WriteHalf};
    use crate::stream::types::{MarketDataFilter, MarketFilter};

    const CONNECTION_FRAME: &[u8] = b"{\"op\":\"connection\",\"connectionId\":\"002-1\"}";

    /// Server half of an in-memory stream plus a handshaken client transport
    async fn connected() -> (
        Transport<DuplexStream>,
        FrameReader<ReadHalf<DuplexStream>>,
        FrameWriter<WriteHalf<DuplexStream>>,
    ) {
        let (client, server) = duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let mut server_writer = FrameWriter::new(server_write);
        server_writer.write_frame(CONNECTION_FRAME).await.unwrap();

        let transport = Transport::handshake(client, 4096).await.unwrap();
        (transport, FrameReader::new(server_read, 4096), server_writer)
    }

    fn credentials() -> Credentials {
        Credentials::new("app-key", "token")
    }

    #[tokio::test]
    async fn test_authentication_success_starts_pumps() {
        let (transport, mut server_reader, mut server_writer) = connected().await;

        let server = tokio::spawn(async move {
            let frame = server_reader.read_frame().await.unwrap();
            let auth: serde_json::Value = serde_json::from_slice(&frame).unwrap();
            assert_eq!(auth["op"], "authentication");
            assert_eq!(auth["id"], 1);
            assert_eq!(auth["appKey"], "app-key");
            assert_eq!(auth["session"], "token");
            server_writer
                .write_frame(br#"{"op":"status","id":1,"statusCode":"SUCCESS","connectionClosed":false}"#)
                .await
                .unwrap();
            (server_reader, server_writer)
        });

        let (session, _outputs) =
            Session::start_with_transport(transport, &credentials(), 1, &StreamConfig::default())
                .await
                .unwrap();
        let _server_halves = server.await.unwrap();

        assert_eq!(session.connection_id(), "002-1");
        assert!(session.is_running());
        session.stop();
    }

    #[tokio::test]
    async fn test_authentication_failure() {
        let (transport, mut server_reader, mut server_writer) = connected().await;

        let server = tokio::spawn(async move {
            server_reader.read_frame().await.unwrap();
            server_writer
                .write_frame(br#"{"op":"status","id":1,"statusCode":"FAILURE","errorCode":"INVALID_SESSION_INFORMATION","errorMessage":"Session is invalid","connectionClosed":true}"#)
                .await
                .unwrap();
            // Client closes its side after the failure
            assert!(matches!(
                server_reader.read_frame().await,
                Err(StreamError::ConnectionClosed)
            ));
        });

        let result =
            Session::start_with_transport(transport, &credentials(), 1, &StreamConfig::default()).await;
        match result {
            Err(StreamError::AuthenticationFailed { code, message }) => {
                assert_eq!(code.as_deref(), Some("INVALID_SESSION_INFORMATION"));
                assert_eq!(message.as_deref(), Some("Session is invalid"));
            }
            other => panic!("expected authentication failure, got {:?}", other.map(|_| ())),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_error_reported_and_pump_ends() {
        let (transport, mut server_reader, mut server_writer) = connected().await;

        let server = tokio::spawn(async move {
            server_reader.read_frame().await.unwrap();
            server_writer
                .write_frame(br#"{"op":"status","id":1,"statusCode":"SUCCESS"}"#)
                .await
                .unwrap();
            server_writer.write_frame(b"{\"op\":\"mcm\",\"mc\":[{").await.unwrap();
            (server_reader, server_writer)
        });

        let (session, mut outputs) =
            Session::start_with_transport(transport, &credentials(), 1, &StreamConfig::default())
                .await
                .unwrap();
        let _server_halves = server.await.unwrap();

        let error = outputs.errors.recv().await.unwrap();
        assert!(matches!(error, StreamError::MessageParseError(_)));
        session.stop();
    }

    #[tokio::test]
    async fn test_server_closed_status() {
        let (transport, mut server_reader, mut server_writer) = connected().await;

        let server = tokio::spawn(async move {
            server_reader.read_frame().await.unwrap();
            server_writer
                .write_frame(br#"{"op":"status","id":1,"statusCode":"SUCCESS"}"#)
                .await
                .unwrap();
            server_writer
                .write_frame(br#"{"op":"status","statusCode":"FAILURE","errorCode":"TIMEOUT","errorMessage":"Timed out","connectionClosed":true}"#)
                .await
                .unwrap();
            (server_reader, server_writer)
        });

        let (_session, mut outputs) =
            Session::start_with_transport(transport, &credentials(), 1, &StreamConfig::default())
                .await
                .unwrap();
        let _server_halves = server.await.unwrap();

        let status = outputs.status.recv().await.unwrap();
        assert!(status.connection_closed);
        match outputs.errors.recv().await.unwrap() {
            StreamError::ServerClosed { code, .. } => assert_eq!(code.as_deref(), Some("TIMEOUT")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stop_ends_pumps() {
        let (transport, mut server_reader, mut server_writer) = connected().await;

        let server = tokio::spawn(async move {
            server_reader.read_frame().await.unwrap();
            server_writer
                .write_frame(br#"{"op":"status","id":1,"statusCode":"SUCCESS"}"#)
                .await
                .unwrap();
            server_reader
        });

        let (session, mut outputs) =
            Session::start_with_transport(transport, &credentials(), 1, &StreamConfig::default())
                .await
                .unwrap();
        let mut server_reader = server.await.unwrap();

        session.stop();

        // Both pump tasks are gone, so every output sender is dropped
        assert!(outputs.market_updates.recv().await.is_none());
        assert!(outputs.errors.recv().await.is_none());
        assert!(matches!(
            server_reader.read_frame().await,
            Err(StreamError::ConnectionClosed)
        ));
        assert!(matches!(
            session
                .subscribe_orders(OrderSubscriptionMessage::new(2, None))
                .await,
            Err(StreamError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_write_error_reported_and_pump_ends() {
        let mock = tokio_test::io::Builder::new()
            .write_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let (market_tx, market_rx) = mpsc::channel(4);
        let (_order_tx, order_rx) = mpsc::channel(1);
        let (error_tx, mut error_rx) = mpsc::channel(4);
        let (_stop_tx, stop_rx) = watch::channel(false);

        let pump = tokio::spawn(write_pump(
            FrameWriter::new(mock),
            market_rx,
            order_rx,
            error_tx,
            stop_rx,
        ));
        market_tx
            .send(MarketSubscriptionMessage::new(
                2,
                MarketFilter::markets(["1.23456789"]),
                MarketDataFilter::default(),
            ))
            .await
            .unwrap();

        match error_rx.recv().await {
            Some(StreamError::Io(message)) => assert_eq!(message, "gone"),
            other => panic!("expected write error, got {:?}", other),
        }
        pump.await.unwrap();
        assert!(error_rx.recv().await.is_none());
        assert!(market_tx.is_closed());
    }
}
