use std::collections::BTreeMap;

use telelink_frame::{CONTROL, MEDIA};

use crate::config::RouteConfig;
use crate::error::{Result, SessionError};

/// Where a host-side record goes on the peripheral side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Index into the bridge's peripheral list.
    pub peripheral: usize,
    /// Identifier the record is re-tagged with.
    pub identifier: u8,
}

/// Static host identifier → peripheral route map. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    routes: BTreeMap<u8, Route>,
}

impl RoutingTable {
    /// Build a table for a bridge with `peripherals` links.
    ///
    /// Rejects routes to a missing peripheral, routes on reserved
    /// identifiers, and duplicate host identifiers.
    pub fn new(
        routes: impl IntoIterator<Item = (u8, Route)>,
        peripherals: usize,
    ) -> Result<Self> {
        let mut table = BTreeMap::new();
        for (host_identifier, route) in routes {
            if host_identifier == MEDIA || host_identifier == CONTROL {
                return Err(SessionError::Routing(format!(
                    "host identifier {host_identifier:#04x} is reserved"
                )));
            }
            if route.identifier == MEDIA {
                return Err(SessionError::Routing(format!(
                    "route for {host_identifier:#04x} targets the media identifier"
                )));
            }
            if route.peripheral >= peripherals {
                return Err(SessionError::Routing(format!(
                    "route for {host_identifier:#04x} targets peripheral {} of {peripherals}",
                    route.peripheral
                )));
            }
            if table.insert(host_identifier, route).is_some() {
                return Err(SessionError::Routing(format!(
                    "host identifier {host_identifier:#04x} routed twice"
                )));
            }
        }
        Ok(Self { routes: table })
    }

    pub fn from_config(routes: &[RouteConfig], peripherals: usize) -> Result<Self> {
        Self::new(
            routes.iter().map(|route| {
                (
                    route.host_identifier,
                    Route {
                        peripheral: route.peripheral,
                        identifier: route.peripheral_identifier,
                    },
                )
            }),
            peripherals,
        )
    }

    pub fn lookup(&self, host_identifier: u8) -> Option<Route> {
        self.routes.get(&host_identifier).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, Route)> + '_ {
        self.routes.iter().map(|(id, route)| (*id, *route))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
