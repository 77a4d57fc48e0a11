//! Client identity resolution shared by the rate limiter and per-identity
//! cache scoping.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap};

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Subject of an authenticated request.
///
/// Inserted as a request extension by the authentication layer that runs in
/// front of this crate's middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSubject(pub String);

// == Trusted Proxies ==
/// Peers allowed to report the client address through `X-Forwarded-For`.
///
/// Parsed from a comma separated list of IP addresses. Empty by default, in
/// which case the header is never read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedProxies(Arc<Vec<IpAddr>>);

impl TrustedProxies {
    pub fn new(addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        Self(Arc::new(addrs.into_iter().collect()))
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        self.0.contains(&addr)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for TrustedProxies {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .map(|addr| {
                addr.parse::<IpAddr>()
                    .map_err(|_| format!("'{addr}' is not an IP address"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }
}

/// Who a request is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientIdentity {
    Subject(String),
    Address(String),
    Anonymous,
}

impl ClientIdentity {
    /// Authenticated subject first, then the client network address.
    ///
    /// The address is the socket peer. `X-Forwarded-For` is consulted only
    /// when that peer is a trusted proxy, and then the right-most hop that
    /// is not itself a trusted proxy wins. Hops further left were written
    /// by the client and are never believed.
    pub fn resolve(headers: &HeaderMap, extensions: &Extensions, trusted: &TrustedProxies) -> Self {
        if let Some(AuthenticatedSubject(subject)) = extensions.get::<AuthenticatedSubject>() {
            if !subject.is_empty() {
                return ClientIdentity::Subject(subject.clone());
            }
        }

        let peer = match extensions.get::<ConnectInfo<SocketAddr>>() {
            Some(ConnectInfo(addr)) => addr.ip(),
            None => return ClientIdentity::Anonymous,
        };
        if !trusted.contains(peer) {
            return ClientIdentity::Address(peer.to_string());
        }

        let hops: Vec<&str> = headers
            .get_all(FORWARDED_FOR)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .collect();

        let mut client = peer;
        for hop in hops.iter().rev() {
            // An unparseable hop ends the chain at the proxy that appended it.
            let Ok(addr) = hop.parse::<IpAddr>() else {
                break;
            };
            client = addr;
            if !trusted.contains(addr) {
                break;
            }
        }
        ClientIdentity::Address(client.to_string())
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientIdentity::Subject(subject) => write!(f, "sub:{subject}"),
            ClientIdentity::Address(addr) => write!(f, "ip:{addr}"),
            ClientIdentity::Anonymous => f.write_str("anonymous"),
        }
    }
}
