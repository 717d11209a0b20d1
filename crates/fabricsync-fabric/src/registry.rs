//! Fabric class registry
//!
//! Static table replacing dynamic dispatch over Fabric class names: each
//! class maps to its RN prefix, how its RN is derived from event attributes,
//! and the flags the event pipeline routes by. Attribute screening lists
//! define exactly which wire attributes participate in tree fingerprints.

/// How a class derives the RN of a nested child event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameSource {
    /// RN is `<prefix>-<name attribute>`.
    Name,
    /// RN is `<prefix>-<code attribute>` (faults).
    Code,
    /// RN is the bare prefix (`rsctx`, `infra`).
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassInfo {
    pub class: &'static str,
    pub prefix: &'static str,
    pub name_source: NameSource,
    /// Event routing: operational classes go to the operational tree only.
    pub operational: bool,
    /// Ownership of multi-parent classes is checked at the parent DN.
    pub multi_parent: bool,
    /// Root containers; an event for one without a status means full resync.
    pub root: bool,
    /// Wire attributes that participate in the tree fingerprint.
    pub hashed_attrs: &'static [&'static str],
}

const fn class(
    class: &'static str,
    prefix: &'static str,
    name_source: NameSource,
    hashed_attrs: &'static [&'static str],
) -> ClassInfo {
    ClassInfo {
        class,
        prefix,
        name_source,
        operational: false,
        multi_parent: false,
        root: false,
        hashed_attrs,
    }
}

const fn root_class(
    class: &'static str,
    prefix: &'static str,
    name_source: NameSource,
    hashed_attrs: &'static [&'static str],
) -> ClassInfo {
    ClassInfo {
        class,
        prefix,
        name_source,
        operational: false,
        multi_parent: false,
        root: true,
        hashed_attrs,
    }
}

const fn operational_class(
    class: &'static str,
    prefix: &'static str,
    name_source: NameSource,
    hashed_attrs: &'static [&'static str],
) -> ClassInfo {
    ClassInfo {
        class,
        prefix,
        name_source,
        operational: true,
        multi_parent: true,
        root: false,
        hashed_attrs,
    }
}

pub const CLASSES: &[ClassInfo] = &[
    root_class("fvTenant", "tn", NameSource::Name, &["name", "descr"]),
    root_class("infraInfra", "infra", NameSource::None, &[]),
    class(
        "fvBD",
        "BD",
        NameSource::Name,
        &["name", "arpFlood", "unicastRoute"],
    ),
    class("fvRsCtx", "rsctx", NameSource::None, &["tnFvCtxName"]),
    class("fvSubnet", "subnet", NameSource::Name, &["ip", "scope"]),
    class("fvCtx", "ctx", NameSource::Name, &["name", "pcEnfPref"]),
    class("fvAp", "ap", NameSource::Name, &["name"]),
    class("fvAEPg", "epg", NameSource::Name, &["name"]),
    class("fvRsBd", "rsbd", NameSource::None, &["tnFvBDName"]),
    class("vzBrCP", "brc", NameSource::Name, &["name", "scope"]),
    class("vzSubj", "subj", NameSource::Name, &["name"]),
    class(
        "vzRsSubjFiltAtt",
        "rssubjFiltAtt",
        NameSource::Name,
        &["tnVzFilterName"],
    ),
    class("l3extOut", "out", NameSource::Name, &["name"]),
    class("l3extRsEctx", "rsectx", NameSource::None, &["tnFvCtxName"]),
    class("l3extInstP", "instP", NameSource::Name, &["name"]),
    operational_class(
        "faultInst",
        "fault",
        NameSource::Code,
        &["code", "severity", "descr", "cause"],
    ),
    class("tagInst", "tag", NameSource::Name, &[]),
];

pub const TAG_CLASS: &str = "tagInst";
pub const TENANT_CLASS: &str = "fvTenant";
pub const INFRA_CLASS: &str = "infraInfra";
pub const FAULT_CLASS: &str = "faultInst";
pub const INFRA_ROOT_RN: &str = "infra";

pub fn lookup(class: &str) -> Option<&'static ClassInfo> {
    CLASSES.iter().find(|c| c.class == class)
}

pub fn is_known(class: &str) -> bool {
    lookup(class).is_some()
}

pub fn is_root_class(class: &str) -> bool {
    lookup(class).map(|c| c.root).unwrap_or(false)
}

pub fn is_operational_class(class: &str) -> bool {
    lookup(class).map(|c| c.operational).unwrap_or(false)
}

pub fn is_multi_parent(class: &str) -> bool {
    lookup(class).map(|c| c.multi_parent).unwrap_or(false)
}

/// Screen a wire attribute: does it participate in `class`'s fingerprint?
pub fn is_hashed_attr(class: &str, attr: &str) -> bool {
    lookup(class)
        .map(|c| c.hashed_attrs.contains(&attr))
        .unwrap_or(false)
}

/// Resolve a DN segment (`tn-t`, `rsctx`, `subnet-[10.0.0.1/28]`) to its class.
pub fn class_for_segment(segment: &str) -> Option<&'static ClassInfo> {
    // Bare-prefix classes first: their RN is the whole segment.
    if let Some(info) = CLASSES
        .iter()
        .find(|c| c.name_source == NameSource::None && c.prefix == segment)
    {
        return Some(info);
    }
    let prefix = segment.split('-').next().unwrap_or(segment);
    CLASSES
        .iter()
        .find(|c| c.name_source != NameSource::None && c.prefix == prefix)
}

/// Strip the class prefix off a DN segment, yielding the bare name.
pub fn segment_name(info: &ClassInfo, segment: &str) -> String {
    match info.name_source {
        NameSource::None => String::new(),
        _ => segment
            .strip_prefix(info.prefix)
            .and_then(|s| s.strip_prefix('-'))
            .unwrap_or(segment)
            .to_string(),
    }
}

/// Every class a tenant subscription asks the Fabric for.
pub fn tenant_subscription_classes() -> Vec<&'static str> {
    CLASSES.iter().map(|c| c.class).collect()
}

/// The infra root only carries the container itself plus ownership tags.
pub fn infra_subscription_classes() -> Vec<&'static str> {
    vec![INFRA_CLASS, TAG_CLASS]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_flags() {
        assert!(is_root_class("fvTenant"));
        assert!(is_root_class("infraInfra"));
        assert!(!is_root_class("fvBD"));
        assert!(is_operational_class("faultInst"));
        assert!(is_multi_parent("faultInst"));
        assert!(!is_known("faultDelegate"));
    }

    #[test]
    fn segment_resolution() {
        assert_eq!("fvTenant", class_for_segment("tn-accounting").unwrap().class);
        assert_eq!("fvRsCtx", class_for_segment("rsctx").unwrap().class);
        assert_eq!("faultInst", class_for_segment("fault-F0952").unwrap().class);
        assert_eq!(
            "fvSubnet",
            class_for_segment("subnet-[10.0.0.1/28]").unwrap().class
        );
        assert!(class_for_segment("bogus-x").is_none());
    }

    #[test]
    fn segment_names() {
        let tn = lookup("fvTenant").unwrap();
        assert_eq!("accounting", segment_name(tn, "tn-accounting"));
        let rsctx = lookup("fvRsCtx").unwrap();
        assert_eq!("", segment_name(rsctx, "rsctx"));
        let subnet = lookup("fvSubnet").unwrap();
        assert_eq!("[10.0.0.1/28]", segment_name(subnet, "subnet-[10.0.0.1/28]"));
    }

    #[test]
    fn attribute_screening() {
        assert!(is_hashed_attr("fvBD", "arpFlood"));
        assert!(!is_hashed_attr("fvBD", "mac"));
        assert!(!is_hashed_attr("fvBD", "status"));
    }
}
