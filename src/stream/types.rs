//! Message types for the Betfair Exchange Stream protocol.
//!
//! Every frame is a JSON object carrying an `op` discriminator. Outbound
//! requests are modelled as [`RequestMessage`]; inbound frames are decoded in
//! two passes (see [`OpEnvelope`]) into the message structs below.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::stream::error::StreamResult;

// ============================================================================
// OP CODES
// ============================================================================

/// Operation codes found in the `op` field of stream frames
pub mod op {
    pub const CONNECTION: &str = "connection";
    pub const AUTHENTICATION: &str = "authentication";
    pub const STATUS: &str = "status";
    pub const MARKET_SUBSCRIPTION: &str = "marketSubscription";
    pub const ORDER_SUBSCRIPTION: &str = "orderSubscription";
    pub const MARKET_CHANGE: &str = "mcm";
    pub const ORDER_CHANGE: &str = "ocm";
}

/// First-pass decode of an inbound frame: the op code only
#[derive(Debug, Clone, Deserialize)]
pub struct OpEnvelope {
    #[serde(default)]
    pub op: String,
}

// ============================================================================
// REQUEST TYPES (Client → Server)
// ============================================================================

/// Outbound request, serialized with its `op` tag
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum RequestMessage {
    Authentication(AuthenticationMessage),
    MarketSubscription(MarketSubscriptionMessage),
    OrderSubscription(OrderSubscriptionMessage),
}

impl RequestMessage {
    /// Request id carried by the envelope
    pub fn id(&self) -> u32 {
        match self {
            Self::Authentication(msg) => msg.id,
            Self::MarketSubscription(msg) => msg.id,
            Self::OrderSubscription(msg) => msg.id,
        }
    }

    /// Serialize to a frame body (without the line terminator)
    pub fn to_frame(&self) -> StreamResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Authentication request sent right after the connection handshake
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationMessage {
    pub id: u32,
    pub app_key: String,
    pub session: String,
}

/// Market subscription request
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSubscriptionMessage {
    pub id: u32,
    pub market_filter: MarketFilter,
    pub market_data_filter: MarketDataFilter,
    /// Clock to resume from; only set by callers driving their own resume
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_clk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflate_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segmentation_enabled: Option<bool>,
}

impl MarketSubscriptionMessage {
    pub fn new(id: u32, market_filter: MarketFilter, market_data_filter: MarketDataFilter) -> Self {
        Self {
            id,
            market_filter,
            market_data_filter,
            ..Default::default()
        }
    }
}

/// Order subscription request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSubscriptionMessage {
    pub id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_filter: Option<OrderFilter>,
    pub segmentation_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_clk: Option<String>,
}

impl OrderSubscriptionMessage {
    pub fn new(id: u32, order_filter: Option<OrderFilter>) -> Self {
        Self {
            id,
            order_filter,
            segmentation_enabled: true,
            clk: None,
            initial_clk: None,
        }
    }
}

/// Selects which markets a subscription covers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub market_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bsp_market: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub betting_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_type_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_in_play_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub market_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub venues: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub country_codes: Vec<String>,
}

impl MarketFilter {
    /// Filter matching exactly the given market ids
    pub fn markets<I, S>(market_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            market_ids: market_ids.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// Fields the exchange should include in market change messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketDataField {
    /// Best prices with virtual bets, depth set by `ladder_levels`
    ExBestOffersDisp,
    /// Best prices without virtual bets
    ExBestOffers,
    /// Full available-to-back and available-to-lay ladders
    ExAllOffers,
    /// Traded ladder
    ExTraded,
    /// Market and runner traded volume
    ExTradedVol,
    /// Last traded price
    ExLtp,
    /// Market definition
    ExMarketDef,
    /// Starting price ladders
    SpTraded,
    /// Starting price projections
    SpProjected,
}

/// Data-field selection for a market subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDataFilter {
    #[serde(default)]
    pub fields: Vec<MarketDataField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ladder_levels: Option<u32>,
}

impl Default for MarketDataFilter {
    fn default() -> Self {
        Self {
            fields: vec![
                MarketDataField::ExBestOffers,
                MarketDataField::ExTradedVol,
                MarketDataField::ExLtp,
                MarketDataField::ExMarketDef,
            ],
            ladder_levels: Some(3),
        }
    }
}

impl MarketDataFilter {
    pub fn new(fields: Vec<MarketDataField>, ladder_levels: Option<u32>) -> Self {
        Self {
            fields,
            ladder_levels,
        }
    }
}

/// Restricts which orders an order subscription reports
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_overall_position: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub customer_strategy_refs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition_matched_by_strategy_ref: Option<bool>,
}

// ============================================================================
// RESPONSE TYPES (Server → Client)
// ============================================================================

/// Handshake frame sent by the exchange as soon as the socket opens
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMessage {
    #[serde(default)]
    pub op: String,
    #[serde(default)]
    pub connection_id: String,
}

/// Outcome reported by a status frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    Success,
    Failure,
}

/// Status frame, sent in reply to authentication and subscription requests
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    #[serde(default)]
    pub id: Option<u32>,
    pub status_code: StatusCode,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub connection_closed: bool,
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub connections_available: Option<i64>,
}

impl StatusMessage {
    pub fn is_success(&self) -> bool {
        self.status_code == StatusCode::Success
    }
}

/// Change type of an `mcm`/`ocm` frame; absent means an incremental update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    SubImage,
    ResubDelta,
    Heartbeat,
    #[default]
    #[serde(other)]
    Update,
}

/// Market change message (`op: "mcm"`)
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MarketChangeMessage {
    pub id: Option<u32>,
    #[serde(deserialize_with = "change_type_or_update")]
    pub ct: ChangeType,
    pub clk: Option<String>,
    pub initial_clk: Option<String>,
    /// Publish time, epoch milliseconds
    pub pt: i64,
    pub conflate_ms: Option<i64>,
    pub heartbeat_ms: Option<i64>,
    pub status: Option<i32>,
    pub segment_type: Option<String>,
    #[serde(deserialize_with = "vec_or_null")]
    pub mc: Vec<MarketChange>,
}

/// Change record for a single market
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MarketChange {
    pub id: String,
    pub market_definition: Option<MarketDefinition>,
    #[serde(deserialize_with = "vec_or_null")]
    pub rc: Vec<RunnerChange>,
    /// Image flag: the record replaces rather than patches the market
    pub img: bool,
    pub tv: Option<f64>,
    pub con: Option<bool>,
}

/// Change record for a single runner; ladder fields use compact wire names
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RunnerChange {
    pub id: i64,
    pub hc: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub ltp: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub tv: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub spn: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub spf: Option<f64>,
    /// Traded `[price, size]`
    #[serde(deserialize_with = "vec_or_null")]
    pub trd: Vec<[f64; 2]>,
    /// Available to back `[price, size]`
    #[serde(deserialize_with = "vec_or_null")]
    pub atb: Vec<[f64; 2]>,
    /// Available to lay `[price, size]`
    #[serde(deserialize_with = "vec_or_null")]
    pub atl: Vec<[f64; 2]>,
    /// Starting price back `[price, size]`
    #[serde(deserialize_with = "vec_or_null")]
    pub spb: Vec<[f64; 2]>,
    /// Starting price lay `[price, size]`
    #[serde(deserialize_with = "vec_or_null")]
    pub spl: Vec<[f64; 2]>,
    /// Best available to back `[position, price, size]`
    #[serde(deserialize_with = "vec_or_null")]
    pub batb: Vec<[f64; 3]>,
    /// Best available to lay `[position, price, size]`
    #[serde(deserialize_with = "vec_or_null")]
    pub batl: Vec<[f64; 3]>,
    /// Best display available to back `[position, price, size]`
    #[serde(deserialize_with = "vec_or_null")]
    pub bdatb: Vec<[f64; 3]>,
    /// Best display available to lay `[position, price, size]`
    #[serde(deserialize_with = "vec_or_null")]
    pub bdatl: Vec<[f64; 3]>,
}

/// Market definition block, replaced wholesale whenever it is sent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MarketDefinition {
    pub status: String,
    pub bet_delay: i32,
    pub bsp_reconciled: bool,
    pub bsp_market: bool,
    pub complete: bool,
    pub in_play: bool,
    pub turn_in_play_enabled: bool,
    pub persistence_enabled: bool,
    pub number_of_winners: i32,
    pub number_of_active_runners: i32,
    pub cross_matching: bool,
    pub runners_voidable: bool,
    pub discount_allowed: bool,
    pub version: i64,
    pub market_base_rate: Option<f64>,
    pub market_type: Option<String>,
    pub betting_type: Option<String>,
    pub event_id: Option<String>,
    pub event_type_id: Option<String>,
    pub country_code: Option<String>,
    pub venue: Option<String>,
    pub timezone: Option<String>,
    pub regulators: Vec<String>,
    pub market_time: Option<DateTime<Utc>>,
    pub open_date: Option<DateTime<Utc>>,
    pub suspend_time: Option<DateTime<Utc>>,
    pub settled_time: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "vec_or_null")]
    pub runners: Vec<RunnerDefinition>,
}

/// Per-runner entry of a market definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunnerDefinition {
    pub id: i64,
    pub status: String,
    pub sort_priority: i32,
    pub hc: f64,
    pub adjustment_factor: f64,
    pub removal_date: Option<DateTime<Utc>>,
    pub bsp: Option<f64>,
}

/// Order change message (`op: "ocm"`)
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrderChangeMessage {
    pub id: Option<u32>,
    #[serde(deserialize_with = "change_type_or_update")]
    pub ct: ChangeType,
    pub clk: Option<String>,
    pub initial_clk: Option<String>,
    /// Publish time, epoch milliseconds
    pub pt: i64,
    pub conflate_ms: Option<i64>,
    pub heartbeat_ms: Option<i64>,
    pub status: Option<i32>,
    pub segment_type: Option<String>,
    #[serde(deserialize_with = "vec_or_null")]
    pub oc: Vec<OrderMarketChange>,
}

/// Order change record for a single market
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrderMarketChange {
    pub id: String,
    pub account_id: Option<i64>,
    pub closed: Option<bool>,
    pub full_image: bool,
    #[serde(deserialize_with = "vec_or_null")]
    pub orc: Vec<OrderRunnerChange>,
}

/// Order change record for a single runner
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrderRunnerChange {
    pub id: i64,
    pub hc: Option<f64>,
    pub full_image: bool,
    /// Matched backs `[price, size]`
    #[serde(deserialize_with = "vec_or_null")]
    pub mb: Vec<[f64; 2]>,
    /// Matched lays `[price, size]`
    #[serde(deserialize_with = "vec_or_null")]
    pub ml: Vec<[f64; 2]>,
    /// Unmatched orders; `None` when the frame leaves them untouched
    pub uo: Option<Vec<UnmatchedOrder>>,
}

/// An order that is still (at least partially) unmatched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UnmatchedOrder {
    pub id: String,
    /// Price
    pub p: f64,
    /// Size
    pub s: f64,
    /// BSP liability
    pub bsp: Option<f64>,
    /// Side, `B` or `L`
    pub side: String,
    /// Status, `E` (executable) or `EC` (execution complete)
    pub status: String,
    /// Persistence type
    pub pt: String,
    /// Order type
    pub ot: String,
    /// Placed date, epoch milliseconds
    pub pd: i64,
    /// Matched date, epoch milliseconds
    pub md: Option<i64>,
    /// Average price matched
    pub avp: Option<f64>,
    /// Size matched
    pub sm: f64,
    /// Size remaining
    pub sr: f64,
    /// Size lapsed
    pub sl: f64,
    /// Size cancelled
    pub sc: f64,
    /// Size voided
    pub sv: f64,
    /// Regulator auth code
    pub rac: Option<String>,
    /// Regulator code
    pub rc: Option<String>,
    /// Strategy reference
    pub rfo: Option<String>,
    /// Order reference
    pub rfs: Option<String>,
}

// ============================================================================
// SERDE HELPERS
// ============================================================================

/// Treats `null` the same as an absent array
fn vec_or_null<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Treats `null` the same as an absent change type
fn change_type_or_update<'de, D>(deserializer: D) -> Result<ChangeType, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<ChangeType>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts numbers as well as the string forms `"NaN"` / `"Infinity"` the
/// exchange uses for starting-price projections
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        String(String),
    }

    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrString::Number(value)) => Ok(Some(value)),
        Some(NumberOrString::String(text)) => text
            .parse::<f64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("Invalid number: {}", text))),
    }
}
