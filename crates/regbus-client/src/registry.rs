//! Scheme-keyed client registry.
//!
//! Clients are constructed from a URI whose scheme picks the protocol
//! stack. The registry is an explicit value handed to whatever creates
//! clients; there is no process-wide factory.

use std::collections::HashMap;

use regbus_core::{
    config::ClientConfig,
    error::{ErrorKind, Result},
};

use crate::{
    client::{ClientInterface, IpbusLayer, StreamFramingLayer},
    controlhub::ControlHubLayer,
    socket::{TcpTransport, UdpTransport},
};

/// Builds a client for one URI scheme.
pub type ClientBuilder = fn(&str, &str, &ClientConfig) -> Result<ClientInterface>;

/// Maps URI schemes to client builders.
pub struct ClientRegistry {
    builders: HashMap<String, ClientBuilder>,
}

impl ClientRegistry {
    /// A registry with the stock schemes registered:
    /// `ipbusudp-2.0`, `ipbustcp-2.0` (bare IPbus stacks) and `chtcp-2.0`
    /// (IPbus through the ControlHub relay).
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("ipbusudp-2.0", build_ipbus_udp);
        registry.register("ipbustcp-2.0", build_ipbus_tcp);
        registry.register("chtcp-2.0", build_controlhub_tcp);
        registry
    }

    /// A registry with no schemes registered.
    pub fn empty() -> Self {
        Self { builders: HashMap::new() }
    }

    /// Registers (or replaces) the builder for a scheme.
    pub fn register(&mut self, scheme: &str, builder: ClientBuilder) {
        self.builders.insert(scheme.to_string(), builder);
    }

    /// Creates a client for the URI with default configuration.
    pub fn create(&self, id: &str, uri: &str) -> Result<ClientInterface> {
        self.create_with_config(id, uri, &ClientConfig::default())
    }

    /// Creates a client for the URI.
    pub fn create_with_config(
        &self,
        id: &str,
        uri: &str,
        config: &ClientConfig,
    ) -> Result<ClientInterface> {
        let scheme = uri
            .split_once("://")
            .map(|(scheme, _)| scheme)
            .ok_or_else(|| ErrorKind::UnknownScheme(uri.to_string()))?;
        let builder = self
            .builders
            .get(scheme)
            .ok_or_else(|| ErrorKind::UnknownScheme(scheme.to_string()))?;
        builder(id, uri, config)
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn build_ipbus_udp(id: &str, uri: &str, config: &ClientConfig) -> Result<ClientInterface> {
    let transport = UdpTransport::new(uri, config)?;
    Ok(ClientInterface::new(
        id,
        uri,
        Box::new(IpbusLayer::new()),
        Box::new(transport),
        config.clone(),
    ))
}

fn build_ipbus_tcp(id: &str, uri: &str, config: &ClientConfig) -> Result<ClientInterface> {
    // TCP is a byte stream: the bare stack needs the per-packet byte-count
    // framing so packet boundaries survive the wire.
    let transport = TcpTransport::new(uri, config)?;
    Ok(ClientInterface::new(
        id,
        uri,
        Box::new(StreamFramingLayer::new()),
        Box::new(transport),
        config.clone(),
    ))
}

fn build_controlhub_tcp(id: &str, uri: &str, config: &ClientConfig) -> Result<ClientInterface> {
    let layer = ControlHubLayer::new(uri)?;
    let transport = TcpTransport::new(uri, config)?;
    Ok(ClientInterface::new(id, uri, Box::new(layer), Box::new(transport), config.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_scheme_is_rejected() {
        let registry = ClientRegistry::new();
        assert!(matches!(
            registry.create("c0", "carrier-pigeon://192.168.0.1:50001"),
            Err(ErrorKind::UnknownScheme(_))
        ));
        assert!(matches!(
            registry.create("c0", "not a uri"),
            Err(ErrorKind::UnknownScheme(_))
        ));
    }

    #[test]
    fn test_stock_schemes_build_clients() {
        let registry = ClientRegistry::new();

        // UDP connects locally only; TCP stacks connect lazily on dispatch.
        let udp = registry.create("c0", "ipbusudp-2.0://127.0.0.1:50001").unwrap();
        assert_eq!(udp.id(), "c0");

        let hub = registry
            .create("c1", "chtcp-2.0://127.0.0.1:10203?target=192.168.0.1:50001")
            .unwrap();
        assert_eq!(hub.uri(), "chtcp-2.0://127.0.0.1:10203?target=192.168.0.1:50001");
    }

    #[test]
    fn test_controlhub_scheme_requires_target_id() {
        let registry = ClientRegistry::new();
        assert!(matches!(
            registry.create("c2", "chtcp-2.0://hub.example.org:10203"),
            Err(ErrorKind::XmlFileMissingRequiredParameters(_))
        ));
    }
}
