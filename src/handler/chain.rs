//! Ordered handler chains.
//!
//! A chain is an arena of nodes linked by index. Links are never exposed as
//! references, so rebuilding or cloning a chain cannot leave a dangling node.
//! Chains are immutable once shared: the registry edits a copy and swaps it in.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, NotFoundKind, Result};

use super::MibHandler;

/// Index of a node within its chain's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// A named handler plus its opaque per-node data.
#[derive(Clone)]
pub struct HandlerNode {
    name: Cow<'static, str>,
    handler: Arc<dyn MibHandler>,
    data: Option<Arc<dyn Any + Send + Sync>>,
}

impl HandlerNode {
    /// Create a node for `handler`.
    pub fn new(name: impl Into<Cow<'static, str>>, handler: impl MibHandler) -> Self {
        Self::from_arc(name, Arc::new(handler))
    }

    /// Create a node for a handler that is already shared.
    pub fn from_arc(name: impl Into<Cow<'static, str>>, handler: Arc<dyn MibHandler>) -> Self {
        Self {
            name: name.into(),
            handler,
            data: None,
        }
    }

    /// Attach handler-owned data readable through
    /// [`HandlerContext::node_data`](super::HandlerContext::node_data).
    pub fn with_data<T: Any + Send + Sync>(mut self, data: T) -> Self {
        self.data = Some(Arc::new(data));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> &Arc<dyn MibHandler> {
        &self.handler
    }

    /// Per-node data, if present and of type `T`.
    pub fn data<T: Any>(&self) -> Option<&T> {
        self.data.as_deref()?.downcast_ref::<T>()
    }
}

impl fmt::Debug for HandlerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerNode")
            .field("name", &self.name)
            .field("has_data", &self.data.is_some())
            .finish()
    }
}

/// Where to insert a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Position {
    Head,
    Tail,
    /// Immediately before the named node.
    Before(Cow<'static, str>),
    /// Immediately after the named node.
    After(Cow<'static, str>),
}

impl Position {
    pub fn before(name: impl Into<Cow<'static, str>>) -> Self {
        Position::Before(name.into())
    }

    pub fn after(name: impl Into<Cow<'static, str>>) -> Self {
        Position::After(name.into())
    }
}

#[derive(Clone)]
struct Link {
    node: HandlerNode,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

/// Doubly-linked sequence of handler nodes.
#[derive(Clone, Default)]
pub struct HandlerChain {
    links: Vec<Link>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
}

impl HandlerChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `node` at `position`.
    ///
    /// Fails with `DuplicateHandler` if the name is taken and with `NotFound`
    /// if a `Before`/`After` anchor does not exist.
    pub fn inject(&mut self, node: HandlerNode, position: Position) -> Result<NodeId> {
        if self.id_of(node.name()).is_some() {
            return Err(Error::DuplicateHandler {
                name: node.name().into(),
            });
        }

        let (prev, next) = match &position {
            Position::Head => (None, self.head),
            Position::Tail => (self.tail, None),
            Position::Before(anchor) => {
                let at = self.require(anchor)?;
                (self.links[at.0].prev, Some(at))
            }
            Position::After(anchor) => {
                let at = self.require(anchor)?;
                (Some(at), self.links[at.0].next)
            }
        };

        let id = NodeId(self.links.len());
        self.links.push(Link { node, prev, next });

        match prev {
            Some(p) => self.links[p.0].next = Some(id),
            None => self.head = Some(id),
        }
        match next {
            Some(n) => self.links[n.0].prev = Some(id),
            None => self.tail = Some(id),
        }
        Ok(id)
    }

    /// Append `node` at the tail.
    pub fn push(&mut self, node: HandlerNode) -> Result<NodeId> {
        self.inject(node, Position::Tail)
    }

    /// Look a node up by name.
    pub fn find_by_name(&self, name: &str) -> Result<&HandlerNode> {
        self.require(name).map(|id| self.node(id))
    }

    pub fn head(&self) -> Option<NodeId> {
        self.head
    }

    pub fn tail(&self) -> Option<NodeId> {
        self.tail
    }

    /// The node behind an ID handed out by this chain.
    pub fn node(&self, id: NodeId) -> &HandlerNode {
        &self.links[id.0].node
    }

    pub fn next_of(&self, id: NodeId) -> Option<NodeId> {
        self.links[id.0].next
    }

    pub fn prev_of(&self, id: NodeId) -> Option<NodeId> {
        self.links[id.0].prev
    }

    /// Find the named node strictly after `from`.
    pub fn find_after(&self, from: NodeId, name: &str) -> Option<NodeId> {
        let mut cursor = self.next_of(from);
        while let Some(id) = cursor {
            if self.node(id).name() == name {
                return Some(id);
            }
            cursor = self.next_of(id);
        }
        None
    }

    /// Nodes from head to tail.
    pub fn iter(&self) -> impl Iterator<Item = &HandlerNode> {
        std::iter::successors(self.head, |id| self.next_of(*id)).map(|id| self.node(id))
    }

    /// Node names from head to tail.
    pub fn names(&self) -> Vec<&str> {
        self.iter().map(HandlerNode::name).collect()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub(crate) fn id_of(&self, name: &str) -> Option<NodeId> {
        self.links
            .iter()
            .position(|l| l.node.name() == name)
            .map(NodeId)
    }

    fn require(&self, name: &str) -> Result<NodeId> {
        self.id_of(name)
            .ok_or_else(|| Error::not_found(NotFoundKind::Handler, name))
    }
}

impl fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{BoxFuture, HandlerContext, Outcome};

    struct Nop;

    impl MibHandler for Nop {
        fn handle<'a>(&'a self, _ctx: &'a mut HandlerContext<'_>) -> BoxFuture<'a, Outcome> {
            Box::pin(async { Outcome::Continue })
        }
    }

    fn node(name: &'static str) -> HandlerNode {
        HandlerNode::new(name, Nop)
    }

    #[test]
    fn test_inject_positions() {
        let mut chain = HandlerChain::new();
        chain.inject(node("table"), Position::Head).unwrap();
        chain.inject(node("debug"), Position::Head).unwrap();
        chain.inject(node("serialize"), Position::after("debug")).unwrap();
        chain.inject(node("cache"), Position::before("table")).unwrap();
        chain.inject(node("tail"), Position::Tail).unwrap();

        assert_eq!(
            chain.names(),
            vec!["debug", "serialize", "cache", "table", "tail"]
        );
        assert_eq!(chain.node(chain.tail().unwrap()).name(), "tail");
    }

    #[test]
    fn test_links_are_consistent_both_ways() {
        let mut chain = HandlerChain::new();
        for name in ["a", "b", "c"] {
            chain.push(node(name)).unwrap();
        }
        chain.inject(node("x"), Position::after("a")).unwrap();

        let forward = chain.names();
        let mut backward = Vec::new();
        let mut cursor = chain.tail();
        while let Some(id) = cursor {
            backward.push(chain.node(id).name());
            cursor = chain.prev_of(id);
        }
        backward.reverse();
        assert_eq!(forward, backward);
        assert_eq!(forward, vec!["a", "x", "b", "c"]);
    }

    #[test]
    fn test_inject_missing_anchor() {
        let mut chain = HandlerChain::new();
        chain.push(node("a")).unwrap();
        let err = chain
            .inject(node("b"), Position::before("missing"))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::NotFound {
                kind: NotFoundKind::Handler,
                ..
            }
        ));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_inject_duplicate_name() {
        let mut chain = HandlerChain::new();
        chain.push(node("a")).unwrap();
        assert!(matches!(
            chain.push(node("a")),
            Err(Error::DuplicateHandler { .. })
        ));
    }

    #[test]
    fn test_find_by_name_and_after() {
        let mut chain = HandlerChain::new();
        for name in ["a", "b", "c"] {
            chain.push(node(name)).unwrap();
        }
        assert_eq!(chain.find_by_name("b").unwrap().name(), "b");
        assert!(chain.find_by_name("z").unwrap_err().is_not_found());

        let b = chain.id_of("b").unwrap();
        assert_eq!(chain.find_after(b, "c"), chain.id_of("c"));
        assert_eq!(chain.find_after(b, "a"), None);
        assert_eq!(chain.find_after(b, "b"), None);
    }

    #[test]
    fn test_node_data() {
        let n = node("a").with_data(5u8);
        assert_eq!(n.data::<u8>(), Some(&5));
        assert_eq!(n.data::<u16>(), None);
        assert_eq!(node("b").data::<u8>(), None);
    }
}
