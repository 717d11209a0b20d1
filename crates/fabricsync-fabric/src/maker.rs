//! Tree maker
//!
//! Projects wire MOs and model objects into hash-tree items. Keys are typed
//! segment paths (`class|rn`); fingerprints cover exactly the screened
//! attribute list of each class, so a desired object generated from intent
//! and the same object observed from the Fabric hash identically.
//!
//! Objects the agent does not own hash as bare existence markers: the Fabric
//! is authoritative for their content, the tree only tracks that they exist.

use crate::{convert, registry};
use fabricsync_core::{Dn, Error, ManagedObject, ModelObject, Result};
use fabricsync_tree::{TreeItem, TreeKey};
use std::collections::BTreeMap;

/// Metadata key marking nodes the config diff must never create or delete.
pub const METADATA_MONITORED: &str = "monitored";

/// Typed tree key for an object at `dn`.
pub fn key_for(dn: &Dn) -> Result<TreeKey> {
    let mut key = TreeKey::new();
    for segment in dn.segments() {
        if segment == fabricsync_core::dn::UNI {
            continue;
        }
        let info = registry::class_for_segment(segment)
            .ok_or_else(|| Error::UnknownClass(segment.to_string()))?;
        key.push(format!("{}|{}", info.class, segment));
    }
    if key.is_empty() {
        return Err(Error::InvalidDn(dn.to_string()));
    }
    Ok(key)
}

/// Recover `(class, dn)` from a typed tree key.
pub fn identity_for_key(key: &TreeKey) -> Result<(String, Dn)> {
    let mut rns = Vec::with_capacity(key.len());
    let mut class = String::new();
    for segment in key {
        let (seg_class, rn) = segment
            .split_once('|')
            .ok_or_else(|| Error::internal(format!("malformed tree key segment {segment}")))?;
        class = seg_class.to_string();
        rns.push(rn);
    }
    Ok((class, Dn::new(format!("uni/{}", rns.join("/")))))
}

/// Root tree key segment for a root RN (`tn-<name>` or `infra`).
pub fn root_key_segment(root_rn: &str) -> String {
    let class = if root_rn == registry::INFRA_ROOT_RN {
        registry::INFRA_CLASS
    } else {
        registry::TENANT_CLASS
    };
    format!("{class}|{root_rn}")
}

/// Normalized fingerprint attributes: every screened attribute of the class,
/// absent values hashing as empty strings.
fn screened_attrs(mo: &ManagedObject) -> BTreeMap<String, String> {
    let mut attrs = BTreeMap::new();
    if let Some(info) = registry::lookup(&mo.class) {
        for name in info.hashed_attrs {
            attrs.insert(
                (*name).to_string(),
                mo.attr(name).unwrap_or_default().to_string(),
            );
        }
    }
    attrs
}

/// Item for an owned object in the config tree.
pub fn owned_item(mo: &ManagedObject) -> Result<TreeItem> {
    let dn = mo
        .dn()
        .ok_or_else(|| Error::InvalidDn(format!("{} event without dn", mo.class)))?;
    Ok(TreeItem {
        key: key_for(&dn)?,
        attributes: screened_attrs(mo),
        metadata: BTreeMap::new(),
    })
}

/// Existence-only marker for an object the agent does not own.
pub fn unowned_item(dn: &Dn) -> Result<TreeItem> {
    Ok(TreeItem::new(key_for(dn)?)
        .with_attr(METADATA_MONITORED, "true")
        .with_metadata(METADATA_MONITORED, "true"))
}

/// Item for the monitored/operational trees: screened attributes hashed,
/// and kept as metadata so diff keys can be turned back into objects.
pub fn observed_item(mo: &ManagedObject) -> Result<TreeItem> {
    let dn = mo
        .dn()
        .ok_or_else(|| Error::InvalidDn(format!("{} event without dn", mo.class)))?;
    let attrs = screened_attrs(mo);
    Ok(TreeItem {
        key: key_for(&dn)?,
        metadata: attrs.clone(),
        attributes: attrs,
    })
}

/// Items for a desired (intent) object: one per MO of its chain; objects the
/// Fabric owns turn into existence markers.
pub fn desired_items(object: &ModelObject) -> Result<Vec<TreeItem>> {
    let mos = convert::to_fabric(object);
    let unowned = object.monitored() || object.pre_existing();
    mos.iter()
        .map(|mo| {
            if unowned {
                let dn = mo
                    .dn()
                    .ok_or_else(|| Error::InvalidDn(format!("{} without dn", mo.class)))?;
                unowned_item(&dn)
            } else {
                owned_item(mo)
            }
        })
        .collect()
}

/// Keys for every MO of an object's chain.
pub fn keys_for(object: &ModelObject) -> Result<Vec<TreeKey>> {
    convert::to_fabric(object)
        .iter()
        .filter_map(|mo| mo.dn())
        .map(|dn| key_for(&dn))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabricsync_core::model::{BridgeDomain, Subnet};

    #[test]
    fn keys_are_typed_segments() {
        let key = key_for(&Dn::new("uni/tn-t/BD-web/rsctx")).unwrap();
        assert_eq!(
            vec![
                "fvTenant|tn-t".to_string(),
                "fvBD|BD-web".to_string(),
                "fvRsCtx|rsctx".to_string(),
            ],
            key
        );
        let (class, dn) = identity_for_key(&key).unwrap();
        assert_eq!("fvRsCtx", class);
        assert_eq!(Dn::new("uni/tn-t/BD-web/rsctx"), dn);
    }

    #[test]
    fn unknown_segment_is_rejected() {
        assert!(key_for(&Dn::new("uni/tn-t/bogus-x")).is_err());
    }

    #[test]
    fn desired_and_observed_fingerprints_agree() {
        let bd = ModelObject::BridgeDomain(BridgeDomain {
            tenant_name: "t".into(),
            name: "web".into(),
            vrf_name: "main".into(),
            ..Default::default()
        });
        let desired = desired_items(&bd).unwrap();

        // The same objects as the Fabric would report them, with extra
        // unscreened attributes thrown in.
        let observed_bd = ManagedObject::new("fvBD", &Dn::new("uni/tn-t/BD-web"))
            .with_attr("name", "web")
            .with_attr("arpFlood", "no")
            .with_attr("unicastRoute", "no")
            .with_attr("mac", "00:22:BD:F8:19:FF");
        let observed = owned_item(&observed_bd).unwrap();
        assert_eq!(desired[0].attributes, observed.attributes);
    }

    #[test]
    fn monitored_intent_hashes_as_existence_marker() {
        let mut subnet = ModelObject::Subnet(Subnet {
            tenant_name: "t".into(),
            bd_name: "web".into(),
            gw_ip_mask: "10.0.0.1/28".into(),
            ..Default::default()
        });
        subnet.set_monitored(true);
        let items = desired_items(&subnet).unwrap();
        assert_eq!(1, items.len());
        let marker = unowned_item(&subnet.dn()).unwrap();
        assert_eq!(marker.attributes, items[0].attributes);
        assert_eq!(Some("true"), items[0].metadata.get(METADATA_MONITORED).map(String::as_str));
    }

    #[test]
    fn root_segments() {
        assert_eq!("fvTenant|tn-a", root_key_segment("tn-a"));
        assert_eq!("infraInfra|infra", root_key_segment("infra"));
    }
}
