//! Hardware-interface façade.
//!
//! Binds an address tree to a client: on construction every descendant of
//! the tree is stamped with a weak back-reference to the client, after
//! which node operations route through it. All other methods are thin
//! forwards.

use std::{cell::RefCell, rc::Rc, time::Duration};

use regbus_core::error::Result;

use crate::{client::ClientInterface, node::Node};

/// A device: an address tree bound to the client that reaches it.
pub struct HardwareInterface {
    client: Rc<RefCell<ClientInterface>>,
    root: Node,
}

impl HardwareInterface {
    /// Takes shared ownership of the client and exclusive ownership of the
    /// tree, and claims every node for this interface. The tree must not be
    /// mutated once handed over.
    pub fn new(client: ClientInterface, mut root: Node) -> Self {
        let client = Rc::new(RefCell::new(client));
        root.claim(&client);
        Self { client, root }
    }

    /// The root of the address tree.
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Resolves a dotted path from the root.
    pub fn get_node(&self, path: &str) -> Result<&Node> {
        self.root.get_node(path)
    }

    /// All dotted descendant paths.
    pub fn list_nodes(&self) -> Vec<String> {
        self.root.list_nodes()
    }

    /// Descendant paths matching a full-string pattern, sorted.
    pub fn list_nodes_matching(&self, pattern: &str) -> Result<Vec<String>> {
        self.root.list_nodes_matching(pattern)
    }

    /// Flushes every queued operation of the underlying client.
    pub fn dispatch(&self) -> Result<()> {
        self.client.borrow_mut().dispatch()
    }

    /// The client's identifier.
    pub fn id(&self) -> String {
        self.client.borrow().id().to_string()
    }

    /// The client's URI.
    pub fn uri(&self) -> String {
        self.client.borrow().uri().to_string()
    }

    /// The client's reply timeout period.
    pub fn timeout(&self) -> Duration {
        self.client.borrow().timeout()
    }

    /// Updates the client's reply timeout period.
    pub fn set_timeout(&self, timeout: Duration) -> Result<()> {
        self.client.borrow_mut().set_timeout(timeout)
    }

    /// Shared handle to the underlying client.
    pub fn client(&self) -> Rc<RefCell<ClientInterface>> {
        self.client.clone()
    }
}

#[cfg(test)]
mod tests {
    use regbus_core::{
        config::ClientConfig,
        error::{ErrorKind, Result as CoreResult},
        transport::Transport,
    };

    use super::*;
    use crate::client::IpbusLayer;

    /// Transport double that never answers.
    struct SilentTransport;

    impl Transport for SilentTransport {
        fn uri(&self) -> &str {
            "ipbusudp-2.0://127.0.0.1:50001"
        }
        fn set_timeout(&mut self, _timeout: Duration) -> CoreResult<()> {
            Ok(())
        }
        fn send_bytes(&mut self, _bytes: &[u8]) -> CoreResult<()> {
            Ok(())
        }
        fn receive_bytes(&mut self, _max_bytes: usize) -> CoreResult<Vec<u8>> {
            Err(ErrorKind::TransportTimeout)
        }
        fn flush_and_wait(&mut self) -> CoreResult<()> {
            Ok(())
        }
    }

    fn silent_client() -> ClientInterface {
        ClientInterface::new(
            "board0",
            "ipbusudp-2.0://127.0.0.1:50001",
            Box::new(IpbusLayer::new()),
            Box::new(SilentTransport),
            ClientConfig::default(),
        )
    }

    #[test]
    fn test_claim_routes_node_operations_to_the_client() {
        let mut root = Node::new("TOP");
        root.add_child(Node::new("reg").with_partial_addr(0x1000));

        let hw = HardwareInterface::new(silent_client(), root);
        let word = hw.get_node("reg").unwrap().read().unwrap();

        assert!(!word.valid());
        assert_eq!(hw.client().borrow().queued_transactions(), 1);
    }

    #[test]
    fn test_thin_forwards() {
        let hw = HardwareInterface::new(silent_client(), Node::new("TOP"));
        assert_eq!(hw.id(), "board0");
        assert_eq!(hw.uri(), "ipbusudp-2.0://127.0.0.1:50001");

        hw.set_timeout(Duration::from_millis(250)).unwrap();
        assert_eq!(hw.timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_unclaimed_tree_rejects_operations() {
        let mut root = Node::new("TOP");
        root.add_child(Node::new("reg"));
        let node = root.get_node("reg").unwrap();
        assert!(matches!(node.read(), Err(ErrorKind::NoClientBound(_))));
    }
}
