//! Object identifier type.
//!
//! OIDs are stored as a small vector of `u32` arcs. Most OIDs seen by an agent
//! are shorter than 16 arcs and stay inline without a heap allocation.
//!
//! Ordering is lexicographic arc-by-arc with unsigned comparison, so a prefix
//! always sorts before its descendants:
//!
//! ```rust
//! use async_snmp_agent::oid;
//!
//! assert!(oid!(1, 3, 6, 1, 2) < oid!(1, 3, 6, 1, 2, 1));
//! assert!(oid!(1, 3, 6, 1, 2, 1) < oid!(1, 3, 6, 1, 3));
//! ```

use std::fmt;
use std::str::FromStr;

use smallvec::SmallVec;

use crate::error::{Error, OidErrorKind, Result};

/// Maximum number of arcs in an OID (RFC 2578 section 3.5).
pub const MAX_OID_LEN: usize = 128;

/// Object identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Oid {
    arcs: SmallVec<[u32; 16]>,
}

impl Oid {
    /// Create an empty OID.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create an OID from a slice of arcs.
    pub fn from_slice(arcs: &[u32]) -> Self {
        Self {
            arcs: SmallVec::from_slice(arcs),
        }
    }

    /// Create an OID from an owned vector of arcs.
    pub fn from_arcs(arcs: Vec<u32>) -> Self {
        Self {
            arcs: SmallVec::from_vec(arcs),
        }
    }

    /// Parse a dotted-decimal OID string such as `"1.3.6.1.2.1"`.
    ///
    /// A single leading dot is accepted (`".1.3.6.1"`).
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.strip_prefix('.').unwrap_or(s);
        if trimmed.is_empty() {
            return Err(Error::invalid_oid_with_input(OidErrorKind::Empty, s));
        }

        let mut arcs = SmallVec::new();
        for part in trimmed.split('.') {
            let arc = part
                .parse::<u32>()
                .map_err(|_| Error::invalid_oid_with_input(OidErrorKind::InvalidArc, s))?;
            arcs.push(arc);
        }

        if arcs.len() > MAX_OID_LEN {
            return Err(Error::invalid_oid_with_input(
                OidErrorKind::TooManyArcs {
                    count: arcs.len(),
                    max: MAX_OID_LEN,
                },
                s,
            ));
        }

        Ok(Self { arcs })
    }

    /// The arcs of this OID.
    pub fn arcs(&self) -> &[u32] {
        &self.arcs
    }

    /// Number of arcs.
    pub fn len(&self) -> usize {
        self.arcs.len()
    }

    /// Returns `true` if the OID has no arcs.
    pub fn is_empty(&self) -> bool {
        self.arcs.is_empty()
    }

    /// Returns `true` if `prefix` is a (non-strict) prefix of this OID.
    pub fn starts_with(&self, prefix: &Oid) -> bool {
        self.arcs.starts_with(&prefix.arcs)
    }

    /// Return a new OID with `arc` appended.
    pub fn child(&self, arc: u32) -> Self {
        let mut arcs = self.arcs.clone();
        arcs.push(arc);
        Self { arcs }
    }

    /// Return the parent OID, or `None` for an empty OID.
    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.arcs.split_last()?;
        Some(Self::from_slice(rest))
    }

    /// Smallest OID sorting after every OID in this subtree.
    ///
    /// Returns `None` when no such OID exists (every arc is `u32::MAX`, or
    /// the OID is empty).
    ///
    /// ```rust
    /// use async_snmp_agent::oid;
    ///
    /// assert_eq!(oid!(1, 3, 6, 1, 2).successor(), Some(oid!(1, 3, 6, 1, 3)));
    /// assert_eq!(oid!(1, u32::MAX).successor(), Some(oid!(2)));
    /// ```
    pub fn successor(&self) -> Option<Self> {
        let mut arcs = self.arcs.clone();
        while let Some(last) = arcs.pop() {
            if let Some(next) = last.checked_add(1) {
                arcs.push(next);
                return Some(Self { arcs });
            }
        }
        None
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for arc in &self.arcs {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{}", arc)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Oid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<&[u32]> for Oid {
    fn from(arcs: &[u32]) -> Self {
        Self::from_slice(arcs)
    }
}

impl<const N: usize> From<[u32; N]> for Oid {
    fn from(arcs: [u32; N]) -> Self {
        Self::from_slice(&arcs)
    }
}

/// Build an [`Oid`] from a list of arcs.
///
/// ```rust
/// use async_snmp_agent::oid;
///
/// let sys_descr = oid!(1, 3, 6, 1, 2, 1, 1, 1, 0);
/// assert_eq!(sys_descr.to_string(), "1.3.6.1.2.1.1.1.0");
/// ```
#[macro_export]
macro_rules! oid {
    ($($arc:expr),* $(,)?) => {
        $crate::oid::Oid::from_slice(&[$($arc),*])
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid;
    use proptest::prelude::*;

    #[test]
    fn test_successor() {
        assert_eq!(oid!(1, 3, 6).successor(), Some(oid!(1, 3, 7)));
        assert_eq!(oid!(1, 3, u32::MAX).successor(), Some(oid!(1, 4)));
        assert_eq!(oid!(u32::MAX, u32::MAX).successor(), None);
        assert_eq!(Oid::empty().successor(), None);
    }

    #[test]
    fn test_parse_and_display() {
        let oid = Oid::parse("1.3.6.1.2.1.1.1.0").unwrap();
        assert_eq!(oid, oid!(1, 3, 6, 1, 2, 1, 1, 1, 0));
        assert_eq!(oid.to_string(), "1.3.6.1.2.1.1.1.0");
    }

    #[test]
    fn test_parse_leading_dot() {
        assert_eq!(Oid::parse(".1.3.6").unwrap(), oid!(1, 3, 6));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Oid::parse(""),
            Err(Error::InvalidOid {
                kind: OidErrorKind::Empty,
                ..
            })
        ));
        assert!(matches!(
            Oid::parse("1.3.x"),
            Err(Error::InvalidOid {
                kind: OidErrorKind::InvalidArc,
                ..
            })
        ));
        assert!(matches!(
            Oid::parse("1..3"),
            Err(Error::InvalidOid {
                kind: OidErrorKind::InvalidArc,
                ..
            })
        ));

        let long = vec!["1"; MAX_OID_LEN + 1].join(".");
        assert!(matches!(
            Oid::parse(&long),
            Err(Error::InvalidOid {
                kind: OidErrorKind::TooManyArcs { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_starts_with() {
        let root = oid!(1, 3, 6, 1, 2, 1);
        assert!(oid!(1, 3, 6, 1, 2, 1, 1, 0).starts_with(&root));
        assert!(root.starts_with(&root));
        assert!(!oid!(1, 3, 6, 1, 2).starts_with(&root));
        assert!(!oid!(1, 3, 6, 1, 4, 1).starts_with(&root));
    }

    #[test]
    fn test_child_and_parent() {
        let oid = oid!(1, 3, 6);
        assert_eq!(oid.child(1), oid!(1, 3, 6, 1));
        assert_eq!(oid.parent(), Some(oid!(1, 3)));
        assert_eq!(Oid::empty().parent(), None);
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let mut oids = vec![
            oid!(1, 3, 6, 1, 3),
            oid!(1, 3, 6, 1, 2, 1),
            oid!(1, 3, 6, 1, 2),
            oid!(1, 3, 6, 1, 10),
        ];
        oids.sort();
        assert_eq!(
            oids,
            vec![
                oid!(1, 3, 6, 1, 2),
                oid!(1, 3, 6, 1, 2, 1),
                oid!(1, 3, 6, 1, 3),
                oid!(1, 3, 6, 1, 10),
            ]
        );
    }

    proptest! {
        #[test]
        fn prop_display_parse_roundtrip(arcs in proptest::collection::vec(any::<u32>(), 1..40)) {
            let oid = Oid::from_arcs(arcs);
            prop_assert_eq!(Oid::parse(&oid.to_string()).unwrap(), oid);
        }

        #[test]
        fn prop_prefix_sorts_first(
            prefix in proptest::collection::vec(any::<u32>(), 0..10),
            suffix in proptest::collection::vec(any::<u32>(), 1..10),
        ) {
            let root = Oid::from_slice(&prefix);
            let mut full = prefix.clone();
            full.extend(suffix);
            let descendant = Oid::from_arcs(full);
            prop_assert!(descendant.starts_with(&root));
            prop_assert!(root < descendant);
        }

        #[test]
        fn prop_successor_bounds_subtree(
            prefix in proptest::collection::vec(0u32..1000, 1..10),
            suffix in proptest::collection::vec(any::<u32>(), 0..10),
        ) {
            let root = Oid::from_slice(&prefix);
            let mut full = prefix.clone();
            full.extend(suffix);
            let descendant = Oid::from_arcs(full);
            let successor = root.successor().unwrap();
            prop_assert!(descendant < successor);
            prop_assert!(!successor.starts_with(&root));
        }
    }
}
