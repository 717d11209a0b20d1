//! Distinguished names
//!
//! A DN is the hierarchical path of a Fabric object, e.g.
//! `uni/tn-accounting/BD-web/rsctx`. DNs are the sole linking primitive
//! between objects; children never hold parent references. Slashes inside
//! bracketed RNs (`subnet-[10.0.0.1/28]`) do not separate segments.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The universe prefix every tenant-scoped DN hangs off of.
pub const UNI: &str = "uni";

#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Dn(String);

/// Split a DN string on `/`, treating bracketed spans as opaque.
fn split_segments(dn: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, b) in dn.bytes().enumerate() {
        match b {
            b'[' => depth += 1,
            b']' => depth = depth.saturating_sub(1),
            b'/' if depth == 0 => {
                out.push(&dn[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&dn[start..]);
    out
}

impl Dn {
    pub fn new(dn: impl Into<String>) -> Self {
        Self(dn.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> Vec<&str> {
        split_segments(&self.0)
    }

    /// Number of path segments.
    pub fn depth(&self) -> usize {
        self.segments().len()
    }

    /// The last relative name of this DN.
    pub fn rn(&self) -> &str {
        self.segments().last().copied().unwrap_or("")
    }

    /// Everything but the last RN; `None` at the top.
    pub fn parent(&self) -> Option<Dn> {
        let segs = self.segments();
        if segs.len() < 2 {
            return None;
        }
        Some(Dn::new(segs[..segs.len() - 1].join("/")))
    }

    /// The root RN: the first segment below `uni`, or the first segment
    /// outright for DNs that do not start with it (`infra` subtrees report
    /// their own RN as root).
    pub fn root_rn(&self) -> &str {
        let segs = self.segments();
        match segs.first().copied() {
            Some(UNI) => segs.get(1).copied().unwrap_or(""),
            Some(first) => first,
            None => "",
        }
    }

    pub fn child(&self, rn: &str) -> Dn {
        Dn::new(format!("{}/{}", self.0, rn))
    }

    /// DN of this object's ownership tag for the given system id.
    pub fn tag(&self, system_id: &str) -> Dn {
        self.child(&format!("tag-{system_id}"))
    }

    /// True when `self` equals or lives below `ancestor`.
    pub fn is_under(&self, ancestor: &Dn) -> bool {
        self.0 == ancestor.0
            || (self.0.starts_with(&ancestor.0)
                && self.0.as_bytes().get(ancestor.0.len()) == Some(&b'/'))
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Dn {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Dn {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Dn {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decompose() {
        let dn = Dn::new("uni/tn-accounting/BD-web/rsctx");
        assert_eq!("rsctx", dn.rn());
        assert_eq!("tn-accounting", dn.root_rn());
        assert_eq!(Some(Dn::new("uni/tn-accounting/BD-web")), dn.parent());
        assert_eq!(4, dn.depth());
    }

    #[test]
    fn bracketed_rn_is_one_segment() {
        let dn = Dn::new("uni/tn-t/BD-web/subnet-[10.10.10.1/28]");
        assert_eq!(4, dn.depth());
        assert_eq!("subnet-[10.10.10.1/28]", dn.rn());
        assert_eq!(Some(Dn::new("uni/tn-t/BD-web")), dn.parent());
    }

    #[test]
    fn infra_root() {
        assert_eq!("infra", Dn::new("uni/infra").root_rn());
        assert_eq!("infra", Dn::new("uni/infra/attentp-foo").root_rn());
    }

    #[test]
    fn tag_dn() {
        let dn = Dn::new("uni/tn-t/BD-b");
        assert_eq!(Dn::new("uni/tn-t/BD-b/tag-sys1"), dn.tag("sys1"));
    }

    #[test]
    fn is_under_respects_segments() {
        let parent = Dn::new("uni/tn-t/BD-b");
        assert!(Dn::new("uni/tn-t/BD-b/rsctx").is_under(&parent));
        assert!(parent.is_under(&parent));
        // A sibling with a shared prefix is not a descendant.
        assert!(!Dn::new("uni/tn-t/BD-bb").is_under(&parent));
    }
}
