//! Registration registry.
//!
//! Maps (subtree, context) pairs to handler chains. The registry is an owned
//! value shared through `Arc`; the dispatcher never consults a global.
//!
//! # Concurrency
//!
//! Registrations are stored as immutable `Arc<Registration>` snapshots behind
//! a read-mostly lock. Lookups clone the `Arc` and release the lock before any
//! handler runs, so a walk always sees one consistent chain. Chain edits
//! ([`Registry::inject`]) build a new snapshot and swap it in; walks already in
//! flight, including suspended ones, finish on the chain they started with.
//!
//! # Precedence
//!
//! Within a context, registrations are ordered by root length (longest first),
//! then ascending priority, then registration order. Every lookup that returns
//! "the" match returns the first covering registration in that order.

use std::borrow::Cow;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::ops::BitOr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::{Error, NotFoundKind, Result, context_label};
use crate::handler::{HandlerChain, HandlerNode, MibHandler, Position};
use crate::oid::Oid;

/// Default registration priority.
pub const DEFAULT_PRIORITY: u8 = 127;

/// Operation classes a registration accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Modes(u8);

impl Modes {
    /// GET and GETNEXT.
    pub const GET_AND_NEXT: Modes = Modes(0b001);
    /// All SET phases.
    pub const SET: Modes = Modes(0b010);
    /// GETBULK walked natively instead of as GETNEXT.
    pub const BULK: Modes = Modes(0b100);
    /// Read-only access.
    pub const READ_ONLY: Modes = Modes(0b001);
    /// Read-write access, without native bulk support.
    pub const READ_WRITE: Modes = Modes(0b011);

    /// Returns `true` if every class in `other` is present.
    pub fn contains(&self, other: Modes) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for Modes {
    fn default() -> Self {
        Modes::READ_WRITE
    }
}

impl BitOr for Modes {
    type Output = Modes;

    fn bitor(self, rhs: Modes) -> Modes {
        Modes(self.0 | rhs.0)
    }
}

/// An iterable sub-identifier position of a range registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubidRange {
    /// 1-based arc position within the root OID.
    pub subid: usize,
    /// Largest accepted value at that position (the smallest is 1).
    pub ubound: u32,
}

impl SubidRange {
    /// 0-based arc position.
    pub(crate) fn position(&self) -> usize {
        self.subid - 1
    }

    /// Returns `true` if `oid` carries an in-range value at the position.
    pub fn accepts(&self, oid: &Oid) -> bool {
        oid.arcs()
            .get(self.position())
            .is_some_and(|arc| (1..=self.ubound).contains(arc))
    }
}

/// One subtree bound to a handler chain.
#[derive(Debug, Clone)]
pub struct Registration {
    name: Box<str>,
    root: Oid,
    context: Bytes,
    priority: u8,
    range: Option<SubidRange>,
    timeout: Option<Duration>,
    modes: Modes,
    chain: HandlerChain,
    seq: u64,
}

impl Registration {
    /// Start building a registration for the subtree at `root`.
    pub fn builder(name: impl Into<Box<str>>, root: Oid) -> RegistrationBuilder {
        RegistrationBuilder::new(name, root)
    }

    /// Registration name, unique within its context.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Root OID of the registered subtree.
    pub fn root(&self) -> &Oid {
        &self.root
    }

    /// Processing context (empty for the default context).
    pub fn context(&self) -> &Bytes {
        &self.context
    }

    /// Precedence among equal-length matches (lower wins).
    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Iterable sub-identifier, for range registrations.
    pub fn range(&self) -> Option<SubidRange> {
        self.range
    }

    /// Maximum time a delegated batch may stay suspended.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Operation classes this registration accepts.
    pub fn modes(&self) -> Modes {
        self.modes
    }

    /// Handler chain snapshot.
    pub fn chain(&self) -> &HandlerChain {
        &self.chain
    }

    /// Lowest OID this registration can answer for.
    ///
    /// For a range registration that is the root with the range arc at 1.
    pub fn lower_bound(&self) -> Oid {
        self.root_with_range_arc(1)
    }

    /// Exclusive upper bound of the OIDs this registration can answer for,
    /// or `None` if nothing sorts after them.
    pub fn upper_bound(&self) -> Option<Oid> {
        match self.range {
            Some(range) => self.root_with_range_arc(range.ubound).successor(),
            None => self.root.successor(),
        }
    }

    fn root_with_range_arc(&self, value: u32) -> Oid {
        let Some(range) = self.range else {
            return self.root.clone();
        };
        let mut arcs = self.root.arcs().to_vec();
        if let Some(arc) = arcs.get_mut(range.position()) {
            *arc = value;
        }
        Oid::from_arcs(arcs)
    }

    /// Returns `true` if `oid` is an object this registration may answer
    /// for: covered, and inside the range if there is one.
    pub fn accepts(&self, oid: &Oid) -> bool {
        self.covers(oid) && self.range.is_none_or(|range| range.accepts(oid))
    }

    /// Returns `true` if `oid` lies within this registration's subtree.
    ///
    /// The range position, if any, matches any arc value here; bounds are
    /// enforced at dispatch time.
    pub fn covers(&self, oid: &Oid) -> bool {
        let wildcard = self.range.map(|r| r.position());
        oid.len() >= self.root.len()
            && self
                .root
                .arcs()
                .iter()
                .zip(oid.arcs())
                .enumerate()
                .all(|(i, (root, arc))| Some(i) == wildcard || root == arc)
    }

    /// Summary for introspection.
    pub fn summary(&self) -> RegistrationSummary {
        RegistrationSummary {
            name: self.name.clone(),
            root: self.root.clone(),
            context: self.context.clone(),
            priority: self.priority,
            range: self.range,
            handlers: self.chain.names().into_iter().map(Into::into).collect(),
        }
    }

    fn sort_key(&self) -> (Reverse<usize>, u8, u64) {
        (Reverse(self.root.len()), self.priority, self.seq)
    }
}

/// Builder for [`Registration`].
pub struct RegistrationBuilder {
    name: Box<str>,
    root: Oid,
    context: Bytes,
    priority: u8,
    range: Option<SubidRange>,
    timeout: Option<Duration>,
    modes: Modes,
    nodes: Vec<HandlerNode>,
}

impl RegistrationBuilder {
    /// Create a builder with default priority, context and modes.
    pub fn new(name: impl Into<Box<str>>, root: Oid) -> Self {
        Self {
            name: name.into(),
            root,
            context: Bytes::new(),
            priority: DEFAULT_PRIORITY,
            range: None,
            timeout: None,
            modes: Modes::default(),
            nodes: Vec::new(),
        }
    }

    /// Bind the registration to a non-default processing context.
    pub fn context(mut self, context: impl Into<Bytes>) -> Self {
        self.context = context.into();
        self
    }

    /// Set the priority (lower value wins among equal-length matches).
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Mark the arc at 1-based position `subid` as iterable over `[1, ubound]`.
    pub fn range(mut self, subid: usize, ubound: u32) -> Self {
        self.range = Some(SubidRange { subid, ubound });
        self
    }

    /// Bound how long a delegated batch may stay suspended.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the accepted operation classes.
    pub fn modes(mut self, modes: Modes) -> Self {
        self.modes = modes;
        self
    }

    /// Append a handler at the tail of the chain.
    pub fn handler(self, name: impl Into<Cow<'static, str>>, handler: impl MibHandler) -> Self {
        self.node(HandlerNode::new(name, handler))
    }

    /// Append a prepared node at the tail of the chain.
    pub fn node(mut self, node: HandlerNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Validate and build the registration.
    pub fn build(self) -> Result<Registration> {
        if let Some(range) = self.range
            && (range.subid == 0 || range.subid > self.root.len() || range.ubound == 0)
        {
            return Err(Error::InvalidRange {
                range_subid: range.subid,
                range_ubound: range.ubound,
                root_len: self.root.len(),
            });
        }

        if self.nodes.is_empty() {
            return Err(Error::EmptyChain { name: self.name });
        }

        let mut chain = HandlerChain::new();
        for node in self.nodes {
            chain.push(node)?;
        }

        Ok(Registration {
            name: self.name,
            root: self.root,
            context: self.context,
            priority: self.priority,
            range: self.range,
            timeout: self.timeout,
            modes: self.modes,
            chain,
            seq: 0,
        })
    }
}

/// Introspection view of a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationSummary {
    pub name: Box<str>,
    pub root: Oid,
    pub context: Bytes,
    pub priority: u8,
    pub range: Option<SubidRange>,
    /// Handler names from head to tail.
    pub handlers: Vec<Box<str>>,
}

#[derive(Default)]
struct Inner {
    contexts: HashMap<Bytes, Vec<Arc<Registration>>>,
    next_seq: u64,
}

/// Registry of active registrations, per processing context.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a registration, making its chain reachable by subtree lookup.
    ///
    /// Fails with `DuplicateSubtree` if a registration with the same root
    /// exists in the context, or `DuplicateRegistration` if the name is taken.
    pub fn register(&self, registration: Registration) -> Result<Arc<Registration>> {
        let mut inner = self.inner.write();
        inner.next_seq += 1;
        let seq = inner.next_seq;

        let list = inner
            .contexts
            .entry(registration.context.clone())
            .or_default();

        if list.iter().any(|r| r.root == registration.root) {
            return Err(Error::DuplicateSubtree {
                subtree: registration.root,
                context: context_label(&registration.context),
            });
        }
        if list.iter().any(|r| r.name == registration.name) {
            return Err(Error::DuplicateRegistration {
                name: registration.name,
                context: context_label(&registration.context),
            });
        }

        let registration = Arc::new(Registration {
            seq,
            ..registration
        });
        list.push(registration.clone());
        list.sort_by_key(|r| r.sort_key());

        tracing::debug!(
            snmp.registration = %registration.name,
            snmp.context = %context_label(&registration.context),
            snmp.oid = %registration.root,
            snmp.priority = registration.priority,
            "registered subtree"
        );
        Ok(registration)
    }

    /// Remove a registration and its chain.
    ///
    /// Callers must not unregister a subtree while they are dispatching to it;
    /// walks that already hold the registration finish on their snapshot.
    pub fn unregister(&self, name: &str, context: &[u8]) -> Result<Arc<Registration>> {
        let mut inner = self.inner.write();
        let list = inner
            .contexts
            .get_mut(context)
            .ok_or_else(|| Error::not_found(NotFoundKind::Registration, name))?;
        let pos = list
            .iter()
            .position(|r| &*r.name == name)
            .ok_or_else(|| Error::not_found(NotFoundKind::Registration, name))?;
        let removed = list.remove(pos);
        if list.is_empty() {
            inner.contexts.remove(context);
        }

        tracing::debug!(
            snmp.registration = %removed.name,
            snmp.context = %context_label(context),
            "unregistered subtree"
        );
        Ok(removed)
    }

    /// Look a registration up by name.
    pub fn get(&self, name: &str, context: &[u8]) -> Result<Arc<Registration>> {
        let inner = self.inner.read();
        inner
            .contexts
            .get(context)
            .and_then(|list| list.iter().find(|r| &*r.name == name))
            .cloned()
            .ok_or_else(|| Error::not_found(NotFoundKind::Registration, name))
    }

    /// Most specific registration covering `oid`.
    pub fn find_by_subtree(&self, oid: &Oid, context: &[u8]) -> Result<Arc<Registration>> {
        let inner = self.inner.read();
        inner
            .contexts
            .get(context)
            .and_then(|list| list.iter().find(|r| r.covers(oid)))
            .cloned()
            .ok_or_else(|| Error::not_found(NotFoundKind::Subtree, oid.to_string()))
    }

    /// Every registration covering `oid`, in precedence order.
    pub fn find_all(&self, oid: &Oid, context: &[u8]) -> Vec<Arc<Registration>> {
        let inner = self.inner.read();
        inner
            .contexts
            .get(context)
            .map(|list| list.iter().filter(|r| r.covers(oid)).cloned().collect())
            .unwrap_or_default()
    }

    /// The covering registration that follows `after` in precedence order.
    ///
    /// This is the target for a handler that wants to fall through to a
    /// broader registration.
    pub fn find_fallback(
        &self,
        oid: &Oid,
        context: &[u8],
        after: &Registration,
    ) -> Option<Arc<Registration>> {
        self.find_all(oid, context)
            .into_iter()
            .skip_while(|r| r.name != after.name)
            .nth(1)
    }

    /// Registration a next-style request for `oid` should start in.
    ///
    /// That is the most specific covering registration, or else the one whose
    /// objects start first after `oid`.
    pub fn find_for_next(&self, oid: &Oid, context: &[u8]) -> Option<Arc<Registration>> {
        self.find_next_candidates(oid, context)
            .into_iter()
            .next()
            .map(|(_, registration)| registration)
    }

    /// Every registration that may hold an OID sorting after `oid`.
    ///
    /// Each comes with the lowest OID it could answer for a next-style
    /// request from `oid` (`oid` itself for registrations spanning it). The
    /// list is ordered by that bound, then precedence.
    pub fn find_next_candidates(
        &self,
        oid: &Oid,
        context: &[u8],
    ) -> Vec<(Oid, Arc<Registration>)> {
        let inner = self.inner.read();
        let Some(list) = inner.contexts.get(context) else {
            return Vec::new();
        };
        let mut candidates: Vec<(Oid, Arc<Registration>)> = list
            .iter()
            .filter(|r| r.upper_bound().is_none_or(|end| end > *oid))
            .map(|r| (r.lower_bound().max(oid.clone()), r.clone()))
            .collect();
        // Stable: equal bounds keep precedence order.
        candidates.sort_by(|a, b| a.0.cmp(&b.0));
        candidates
    }

    /// Insert a handler node into a live registration's chain.
    ///
    /// The chain is copied, edited and swapped in; walks already holding the
    /// old snapshot are unaffected.
    pub fn inject(
        &self,
        name: &str,
        context: &[u8],
        node: HandlerNode,
        position: Position,
    ) -> Result<Arc<Registration>> {
        let mut inner = self.inner.write();
        let slot = inner
            .contexts
            .get_mut(context)
            .and_then(|list| list.iter_mut().find(|r| &*r.name == name))
            .ok_or_else(|| Error::not_found(NotFoundKind::Registration, name))?;

        let mut updated = Registration::clone(slot);
        let handler = node.name().to_owned();
        updated.chain.inject(node, position)?;
        let updated = Arc::new(updated);
        *slot = updated.clone();

        tracing::debug!(
            snmp.registration = %name,
            snmp.handler = %handler,
            "injected handler"
        );
        Ok(updated)
    }

    /// Summaries of every registration, ordered by context then root.
    pub fn registrations(&self) -> Vec<RegistrationSummary> {
        let inner = self.inner.read();
        let mut all: Vec<RegistrationSummary> = inner
            .contexts
            .values()
            .flatten()
            .map(|r| r.summary())
            .collect();
        all.sort_by(|a, b| a.context.cmp(&b.context).then_with(|| a.root.cmp(&b.root)));
        all
    }

    /// Number of active registrations across all contexts.
    pub fn len(&self) -> usize {
        self.inner.read().contexts.values().map(Vec::len).sum()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("registrations", &self.len())
            .finish()
    }
}
