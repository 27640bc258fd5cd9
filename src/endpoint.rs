//! Dashboard server endpoint address.

use std::{fmt::Display, str::FromStr};

use serde::Deserialize;
use snafu::prelude::*;

/// Parse string as endpoint error
#[derive(Debug, Snafu)]
#[snafu(
    visibility(pub(crate)),
    module(parse_endpoint_error_variant),
    context(suffix(false))
)]
pub enum ParseEndpointError {
    #[snafu(display("{s} is an invalid url: {source}"))]
    /// the str is not a valid url
    InvalidURL {
        /// string be parsed
        s: String,
        /// source error
        source: url::ParseError,
    },

    /// the parsed url scheme is not websocket
    #[snafu(display("the url {s} has invalid scheme {scheme}, only ws or wss is ok"))]
    InvalidScheme {
        /// the url
        s: String,
        /// invalid scheme
        scheme: String,
    },

    /// the parsed url has no host
    #[snafu(display("the endpoint url {s} has no host"))]
    NoHost {
        /// the url
        s: String,
    },

    /// the parsed url has no port
    #[snafu(display("the endpoint url {s} has no port"))]
    NoPort {
        /// the url
        s: String,
    },
}

/// Where the companion server lives, a `(host, port)` pair plus the
/// websocket scheme used to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Endpoint {
    /// url scheme, `ws` or `wss`
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// server host(domain or ip)
    pub host: String,
    /// server port
    pub port: u16,
}

fn default_scheme() -> String {
    "ws".to_string()
}

impl Endpoint {
    /// Construct a plain-websocket endpoint from a host and port.
    pub fn new<H: Into<String>>(host: H, port: u16) -> Self {
        Self {
            scheme: default_scheme(),
            host: host.into(),
            port,
        }
    }

    /// construct final url
    pub fn url(&self) -> url::Url {
        let mut u = url::Url::parse(&format!("{}://{}/", self.scheme, self.host)).unwrap();
        let _ = u.set_port(Some(self.port));
        u
    }
}

impl FromStr for Endpoint {
    type Err = ParseEndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = url::Url::parse(s)
            .with_context(|_| parse_endpoint_error_variant::InvalidURL { s: s.to_string() })?;

        ensure!(
            url.scheme() == "wss" || url.scheme() == "ws",
            parse_endpoint_error_variant::InvalidScheme {
                s,
                scheme: url.scheme(),
            }
        );

        let host = url
            .host_str()
            .with_context(|| parse_endpoint_error_variant::NoHost { s })?;

        let port = url
            .port_or_known_default()
            .with_context(|| parse_endpoint_error_variant::NoPort { s })?;

        Ok(Endpoint {
            scheme: url.scheme().to_string(),
            host: host.to_string(),
            port,
        })
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.url().fmt(f)
    }
}
