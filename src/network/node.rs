use std::sync::{PoisonError, RwLock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    addr: String,
}

impl Node {
    fn new(addr: String) -> Node {
        Node { addr }
    }

    pub fn get_addr(&self) -> &str {
        self.addr.as_str()
    }
}

/// Known peers in insertion order. The first entry is the network's seed node.
pub struct Nodes {
    inner: RwLock<Vec<Node>>,
}

impl Default for Nodes {
    fn default() -> Self {
        Self::new()
    }
}

impl Nodes {
    pub fn new() -> Nodes {
        Nodes {
            inner: RwLock::new(vec![]),
        }
    }

    /// Adds `addr` unless it is already known; returns whether it was added.
    pub fn add_node(&self, addr: &str) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.iter().any(|x| x.get_addr() == addr) {
            return false;
        }
        inner.push(Node::new(addr.to_string()));
        true
    }

    pub fn evict_node(&self, addr: &str) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(idx) = inner.iter().position(|x| x.get_addr() == addr) {
            inner.remove(idx);
        }
    }

    pub fn first(&self) -> Option<Node> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .first()
            .cloned()
    }

    pub fn get_nodes(&self) -> Vec<Node> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .to_vec()
    }

    pub fn get_addrs(&self) -> Vec<String> {
        self.get_nodes()
            .into_iter()
            .map(|node| node.addr)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn node_is_known(&self, addr: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|x| x.get_addr() == addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nodes_keep_order_and_dedup() {
        let nodes = Nodes::new();
        assert!(nodes.add_node("localhost:3000"));
        assert!(nodes.add_node("localhost:3001"));
        assert!(!nodes.add_node("localhost:3000"));

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes.first().unwrap().get_addr(), "localhost:3000");
        assert_eq!(nodes.get_addrs(), vec!["localhost:3000", "localhost:3001"]);
    }

    #[test]
    fn test_evict_node() {
        let nodes = Nodes::new();
        nodes.add_node("localhost:3000");
        nodes.evict_node("localhost:3000");
        nodes.evict_node("localhost:9999");

        assert!(nodes.is_empty());
        assert!(!nodes.node_is_known("localhost:3000"));
    }
}
