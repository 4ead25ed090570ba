//! Uplink detection
//!
//! Binding subscriber objects to the interface that carries the router's
//! own internet traffic can cut the router off. Callers ask the session
//! first and refuse with [`Error::UnsupportedTopology`].

use std::net::Ipv4Addr;

use tracing::{debug, warn};

use crate::traits::Filter;
use crate::{Error, Result};

use super::paths;
use super::records::{InterfaceAddress, Route};
use super::session::DeviceSession;

const DEFAULT_ROUTE: &str = "0.0.0.0/0";

/// True for globally routable IPv4 addresses
pub fn is_public_ipv4(addr: Ipv4Addr) -> bool {
    let [a, b, ..] = addr.octets();
    let cgnat = a == 100 && (64..128).contains(&b);
    !(addr.is_private()
        || addr.is_loopback()
        || addr.is_link_local()
        || addr.is_unspecified()
        || addr.is_broadcast()
        || addr.is_documentation()
        || addr.is_multicast()
        || cgnat)
}

impl DeviceSession {
    /// Whether `interface` looks like the router's uplink
    ///
    /// An interface is the uplink when an active default route leaves
    /// through it or when it holds a public IPv4 address. Probe failures are
    /// logged and answered with `false`.
    pub async fn is_uplink(&self, interface: &str) -> bool {
        match self.probe_uplink(interface).await {
            Ok(uplink) => uplink,
            Err(e) => {
                warn!(
                    router_id = self.router_id(),
                    interface, "Uplink detection failed, assuming access interface: {}", e
                );
                false
            }
        }
    }

    /// Refuse with [`Error::UnsupportedTopology`] when `interface` is the uplink
    pub async fn guard_not_uplink(&self, interface: &str, allow_uplink: bool) -> Result<()> {
        if allow_uplink || !self.is_uplink(interface).await {
            return Ok(());
        }
        Err(Error::unsupported_topology(format!(
            "Interface {} on router {} carries the uplink",
            interface,
            self.router_id()
        )))
    }

    async fn probe_uplink(&self, interface: &str) -> Result<bool> {
        let main_table_only = match self.capabilities().await {
            Ok(caps) => Some(caps.routing_table_field),
            Err(e) => {
                debug!(router_id = self.router_id(), "Capabilities unavailable: {}", e);
                None
            }
        };

        let routes: Vec<Route> = self
            .list_as(paths::IP_ROUTE, &Filter::new().eq("dst-address", DEFAULT_ROUTE))
            .await?;
        let via_default_route = routes.iter().any(|route| {
            let main = match main_table_only {
                Some(true) => route.routing_table.as_deref().is_none_or(|t| t == "main"),
                Some(false) => route.routing_mark.is_none(),
                None => true,
            };
            route.dst_address == DEFAULT_ROUTE
                && route.active
                && !route.disabled
                && main
                && route.leaves_through(interface)
        });
        if via_default_route {
            return Ok(true);
        }

        let addresses: Vec<InterfaceAddress> = self
            .list_as(paths::IP_ADDRESS, &Filter::new().eq("interface", interface))
            .await?;
        Ok(addresses.iter().any(|entry| {
            !entry.disabled
                && entry.interface == interface
                && entry
                    .address
                    .split('/')
                    .next()
                    .and_then(|ip| ip.parse::<Ipv4Addr>().ok())
                    .is_some_and(is_public_ipv4)
        }))
    }
}
