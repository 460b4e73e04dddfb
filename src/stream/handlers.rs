//! Message handlers for stream frames.
//!
//! Frames are decoded in two passes: the `op` field first, then the full
//! message for that op. Market and order change messages are routed by
//! change type to a [`ChangeHandler`], which updates its caches and returns
//! the events to publish.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::watch;

use crate::stream::error::StreamResult;
use crate::stream::state::{MarketBook, MarketCache, OrderBookCache};
use crate::stream::types::{
    op, ChangeType, ConnectionMessage, MarketChangeMessage, OpEnvelope, OrderChangeMessage,
    StatusMessage,
};

// ============================================================================
// Events
// ============================================================================

/// Markets active after a subscription image or resubscription
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MarketSubscriptionResponse {
    pub subscribed_market_ids: Vec<String>,
}

/// Output produced by handling one frame
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Snapshot of a market after a change was applied
    MarketUpdate(MarketBook),
    /// Order cache of a market after a change was applied
    OrderUpdate(OrderBookCache),
    /// Markets confirmed by a subscription image or resubscription
    Subscribed(MarketSubscriptionResponse),
    /// Status frame received after authentication
    Status(StatusMessage),
}

/// Last clock tokens seen on one stream kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamClock {
    /// First clock seen; set once
    pub initial_clk: Option<String>,
    /// Most recent clock
    pub clk: Option<String>,
}

impl StreamClock {
    /// Record the clocks carried by a change message; returns whether anything changed
    pub fn observe(&mut self, initial_clk: Option<&str>, clk: Option<&str>) -> bool {
        let mut changed = false;
        if self.initial_clk.is_none() {
            if let Some(first) = initial_clk.or(clk) {
                self.initial_clk = Some(first.to_string());
                changed = true;
            }
        }
        if let Some(clk) = clk {
            if self.clk.as_deref() != Some(clk) {
                self.clk = Some(clk.to_string());
                changed = true;
            }
        }
        changed
    }
}

// ============================================================================
// Two-stage frame parse
// ============================================================================

/// A fully decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Connection(ConnectionMessage),
    Status(StatusMessage),
    MarketChange(MarketChangeMessage),
    OrderChange(OrderChangeMessage),
    /// Frame with an op code this client does not handle
    Unknown(String),
}

/// Decode only the `op` field of a frame
pub fn peek_op(frame: &[u8]) -> StreamResult<String> {
    let envelope: OpEnvelope = serde_json::from_slice(frame)?;
    Ok(envelope.op)
}

/// Decode a frame into the message its op code names
pub fn parse_frame(frame: &[u8]) -> StreamResult<Frame> {
    let op = peek_op(frame)?;
    let parsed = match op.as_str() {
        op::CONNECTION => Frame::Connection(serde_json::from_slice(frame)?),
        op::STATUS => Frame::Status(serde_json::from_slice(frame)?),
        op::MARKET_CHANGE => Frame::MarketChange(serde_json::from_slice(frame)?),
        op::ORDER_CHANGE => Frame::OrderChange(serde_json::from_slice(frame)?),
        _ => Frame::Unknown(op),
    };
    Ok(parsed)
}

// ============================================================================
// Change handlers
// ============================================================================

/// The four change-type operations every change-message handler provides
pub trait ChangeHandler {
    type Message;

    /// `SUB_IMAGE`: initial image after a subscription
    fn on_subscribe(&mut self, message: &Self::Message) -> Vec<StreamEvent>;

    /// `RESUB_DELTA`: image after the exchange resubscribed the stream
    fn on_resubscribe(&mut self, message: &Self::Message) -> Vec<StreamEvent>;

    /// `HEARTBEAT`: keep-alive with no data
    fn on_heartbeat(&mut self, message: &Self::Message) -> Vec<StreamEvent>;

    /// Absent change type: incremental update
    fn on_update(&mut self, message: &Self::Message) -> Vec<StreamEvent>;
}

/// Route a message to the operation matching its change type
pub fn route<H: ChangeHandler>(
    handler: &mut H,
    change_type: ChangeType,
    message: &H::Message,
) -> Vec<StreamEvent> {
    match change_type {
        ChangeType::SubImage => handler.on_subscribe(message),
        ChangeType::ResubDelta => handler.on_resubscribe(message),
        ChangeType::Heartbeat => handler.on_heartbeat(message),
        ChangeType::Update => handler.on_update(message),
    }
}

/// Owns the market caches
#[derive(Debug)]
pub struct MarketHandler {
    caches: HashMap<String, MarketCache>,
    clock: watch::Sender<StreamClock>,
}

impl MarketHandler {
    pub fn new() -> Self {
        let (clock, _) = watch::channel(StreamClock::default());
        Self {
            caches: HashMap::new(),
            clock,
        }
    }

    /// Receiver for the latest market stream clock
    pub fn clock(&self) -> watch::Receiver<StreamClock> {
        self.clock.subscribe()
    }

    pub fn cache(&self, market_id: &str) -> Option<&MarketCache> {
        self.caches.get(market_id)
    }

    pub fn market_count(&self) -> usize {
        self.caches.len()
    }

    /// Merge every market record and snapshot each touched market
    fn apply(&mut self, message: &MarketChangeMessage) -> Vec<StreamEvent> {
        message
            .mc
            .iter()
            .map(|change| {
                let cache = self
                    .caches
                    .entry(change.id.clone())
                    .or_insert_with(|| MarketCache::new(change.id.clone()));
                cache.apply(message.pt, change);
                StreamEvent::MarketUpdate(cache.snapshot())
            })
            .collect()
    }

    fn subscribed(message: &MarketChangeMessage) -> StreamEvent {
        StreamEvent::Subscribed(MarketSubscriptionResponse {
            subscribed_market_ids: message.mc.iter().map(|change| change.id.clone()).collect(),
        })
    }
}

impl Default for MarketHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeHandler for MarketHandler {
    type Message = MarketChangeMessage;

    fn on_subscribe(&mut self, message: &MarketChangeMessage) -> Vec<StreamEvent> {
        tracing::debug!("Market subscription image for {} markets", message.mc.len());
        let mut events = self.apply(message);
        events.push(Self::subscribed(message));
        events
    }

    fn on_resubscribe(&mut self, message: &MarketChangeMessage) -> Vec<StreamEvent> {
        tracing::debug!("Market resubscription for {} markets", message.mc.len());
        vec![Self::subscribed(message)]
    }

    fn on_heartbeat(&mut self, _message: &MarketChangeMessage) -> Vec<StreamEvent> {
        tracing::trace!("Market heartbeat");
        vec![]
    }

    fn on_update(&mut self, message: &MarketChangeMessage) -> Vec<StreamEvent> {
        self.apply(message)
    }
}

/// Owns the order caches
#[derive(Debug)]
pub struct OrderHandler {
    caches: HashMap<String, OrderBookCache>,
    clock: watch::Sender<StreamClock>,
}

impl OrderHandler {
    pub fn new() -> Self {
        let (clock, _) = watch::channel(StreamClock::default());
        Self {
            caches: HashMap::new(),
            clock,
        }
    }

    /// Receiver for the latest order stream clock
    pub fn clock(&self) -> watch::Receiver<StreamClock> {
        self.clock.subscribe()
    }

    pub fn cache(&self, market_id: &str) -> Option<&OrderBookCache> {
        self.caches.get(market_id)
    }

    /// Rebuild on full images or unseen markets, merge otherwise
    fn apply(&mut self, message: &OrderChangeMessage) -> Vec<StreamEvent> {
        message
            .oc
            .iter()
            .map(|change| {
                let cache = match self.caches.entry(change.id.clone()) {
                    Entry::Occupied(entry) if !change.full_image => {
                        let cache = entry.into_mut();
                        cache.apply(message.pt, change);
                        cache
                    }
                    Entry::Occupied(entry) => {
                        let cache = entry.into_mut();
                        *cache = OrderBookCache::from_change(message.pt, change);
                        cache
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(OrderBookCache::from_change(message.pt, change))
                    }
                };
                StreamEvent::OrderUpdate(cache.clone())
            })
            .collect()
    }
}

impl Default for OrderHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeHandler for OrderHandler {
    type Message = OrderChangeMessage;

    fn on_subscribe(&mut self, message: &OrderChangeMessage) -> Vec<StreamEvent> {
        tracing::debug!("Order subscription image for {} markets", message.oc.len());
        self.apply(message)
    }

    fn on_resubscribe(&mut self, message: &OrderChangeMessage) -> Vec<StreamEvent> {
        tracing::debug!("Order resubscription for {} markets", message.oc.len());
        self.apply(message)
    }

    fn on_heartbeat(&mut self, _message: &OrderChangeMessage) -> Vec<StreamEvent> {
        tracing::trace!("Order heartbeat");
        vec![]
    }

    fn on_update(&mut self, message: &OrderChangeMessage) -> Vec<StreamEvent> {
        self.apply(message)
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Routes decoded frames to the market and order handlers.
///
/// Owned by the read pump; the caches it holds have no other writer.
#[derive(Debug, Default)]
pub struct MessageHandler {
    markets: MarketHandler,
    orders: OrderHandler,
}

impl MessageHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn markets(&self) -> &MarketHandler {
        &self.markets
    }

    pub fn orders(&self) -> &OrderHandler {
        &self.orders
    }

    /// Handle one frame and return the events to publish.
    ///
    /// A decode failure is returned as an error; the stream cannot be
    /// trusted after it.
    pub fn handle_frame(&mut self, frame: &[u8]) -> StreamResult<Vec<StreamEvent>> {
        let events = match parse_frame(frame)? {
            Frame::Connection(message) => {
                tracing::debug!("Ignoring connection frame {}", message.connection_id);
                vec![]
            }
            Frame::Status(status) => vec![StreamEvent::Status(status)],
            Frame::MarketChange(message) => {
                self.markets.clock.send_if_modified(|clock| {
                    clock.observe(message.initial_clk.as_deref(), message.clk.as_deref())
                });
                route(&mut self.markets, message.ct, &message)
            }
            Frame::OrderChange(message) => {
                self.orders.clock.send_if_modified(|clock| {
                    clock.observe(message.initial_clk.as_deref(), message.clk.as_deref())
                });
                route(&mut self.orders, message.ct, &message)
            }
            Frame::Unknown(op) => {
                tracing::warn!("Unknown op code: {}", op);
                vec![]
            }
        };
        Ok(events)
    }
}
