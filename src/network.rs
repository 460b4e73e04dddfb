//! Network endpoint constants for the Betfair Exchange Stream API.

use std::fmt;
use std::str::FromStr;

use crate::stream::error::StreamError;

/// Production streaming endpoint.
pub const LIVE_STREAM_ENDPOINT: &str = "stream-api.betfair.com:443";

/// Integration (test) streaming endpoint.
pub const INTEGRATION_STREAM_ENDPOINT: &str = "stream-api-integration.betfair.com:443";

/// Which streaming endpoint a client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Production exchange
    Live,
    /// Integration exchange, for testing
    Integration,
}

impl Endpoint {
    /// `host:port` address to dial
    pub fn address(&self) -> &'static str {
        match self {
            Self::Live => LIVE_STREAM_ENDPOINT,
            Self::Integration => INTEGRATION_STREAM_ENDPOINT,
        }
    }

    /// Host name used for TLS server name verification
    pub fn host(&self) -> &'static str {
        let address = self.address();
        address
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(address)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.address())
    }
}

impl FromStr for Endpoint {
    type Err = StreamError;

    /// Accepts `live`, `integration`, or the exact address of either endpoint.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "live" | LIVE_STREAM_ENDPOINT => Ok(Self::Live),
            "integration" | INTEGRATION_STREAM_ENDPOINT => Ok(Self::Integration),
            other => Err(StreamError::InvalidEndpoint(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_address_and_host() {
        assert_eq!(Endpoint::Live.address(), "stream-api.betfair.com:443");
        assert_eq!(Endpoint::Live.host(), "stream-api.betfair.com");
        assert_eq!(
            Endpoint::Integration.host(),
            "stream-api-integration.betfair.com"
        );
    }

    #[test]
    fn test_endpoint_from_str() {
        assert_eq!("live".parse::<Endpoint>().unwrap(), Endpoint::Live);
        assert_eq!(
            INTEGRATION_STREAM_ENDPOINT.parse::<Endpoint>().unwrap(),
            Endpoint::Integration
        );
    }

    #[test]
    fn test_unknown_endpoint_rejected() {
        let result = "stream-api.example.com:443".parse::<Endpoint>();
        assert!(matches!(result, Err(StreamError::InvalidEndpoint(_))));
    }
}
