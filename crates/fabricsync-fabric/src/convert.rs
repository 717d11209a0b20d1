//! Model/MO conversion
//!
//! The only place that knows how typed model objects map onto Fabric-native
//! managed objects. One model object can fan out into several MOs (a bridge
//! domain carries its VRF link as an `fvRsCtx` child); conversely a child MO
//! converts back into a partially-populated parent model object.

use crate::registry::{self, NameSource};
use fabricsync_core::model::*;
use fabricsync_core::mo::{ATTR_NAME, ATTR_STATUS};
use fabricsync_core::{Dn, ManagedObject, ModelObject};

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

/// Bare names of each DN segment below `uni`, prefixes stripped.
fn dn_names(dn: &Dn) -> Vec<String> {
    dn.segments()
        .iter()
        .filter(|s| **s != fabricsync_core::dn::UNI)
        .map(|seg| match registry::class_for_segment(seg) {
            Some(info) => registry::segment_name(info, seg),
            None => (*seg).to_string(),
        })
        .collect()
}

fn name_at(names: &[String], index: usize) -> String {
    names.get(index).cloned().unwrap_or_default()
}

/// The wire class of a model object's primary MO.
pub fn wire_class(object: &ModelObject) -> &'static str {
    match object {
        ModelObject::Tenant(_) => "fvTenant",
        ModelObject::BridgeDomain(_) => "fvBD",
        ModelObject::Subnet(_) => "fvSubnet",
        ModelObject::Vrf(_) => "fvCtx",
        ModelObject::AppProfile(_) => "fvAp",
        ModelObject::EndpointGroup(_) => "fvAEPg",
        ModelObject::Contract(_) => "vzBrCP",
        ModelObject::ContractSubject(_) => "vzSubj",
        ModelObject::L3Outside(_) => "l3extOut",
        ModelObject::ExternalNetwork(_) => "l3extInstP",
        ModelObject::Fault(_) => "faultInst",
    }
}

/// Convert a model object into its MO chain, primary object first.
pub fn to_fabric(object: &ModelObject) -> Vec<ManagedObject> {
    let dn = object.dn();
    match object {
        ModelObject::Tenant(o) => {
            vec![ManagedObject::new("fvTenant", &dn)
                .with_attr(ATTR_NAME, o.name.clone())
                .with_attr("descr", o.descr.clone())]
        }
        ModelObject::BridgeDomain(o) => {
            let mut mos = vec![ManagedObject::new("fvBD", &dn)
                .with_attr(ATTR_NAME, o.name.clone())
                .with_attr("arpFlood", yes_no(o.enable_arp_flood))
                .with_attr("unicastRoute", yes_no(o.enable_routing))];
            if !o.vrf_name.is_empty() {
                mos.push(
                    ManagedObject::new("fvRsCtx", &dn.child("rsctx"))
                        .with_attr("tnFvCtxName", o.vrf_name.clone()),
                );
            }
            mos
        }
        ModelObject::Subnet(o) => {
            vec![ManagedObject::new("fvSubnet", &dn)
                .with_attr("ip", o.gw_ip_mask.clone())
                .with_attr("scope", o.scope.clone())]
        }
        ModelObject::Vrf(o) => {
            vec![ManagedObject::new("fvCtx", &dn)
                .with_attr(ATTR_NAME, o.name.clone())
                .with_attr("pcEnfPref", o.policy_enforcement_pref.clone())]
        }
        ModelObject::AppProfile(o) => {
            vec![ManagedObject::new("fvAp", &dn).with_attr(ATTR_NAME, o.name.clone())]
        }
        ModelObject::EndpointGroup(o) => {
            let mut mos =
                vec![ManagedObject::new("fvAEPg", &dn).with_attr(ATTR_NAME, o.name.clone())];
            if !o.bd_name.is_empty() {
                mos.push(
                    ManagedObject::new("fvRsBd", &dn.child("rsbd"))
                        .with_attr("tnFvBDName", o.bd_name.clone()),
                );
            }
            mos
        }
        ModelObject::Contract(o) => {
            vec![ManagedObject::new("vzBrCP", &dn)
                .with_attr(ATTR_NAME, o.name.clone())
                .with_attr("scope", o.scope.clone())]
        }
        ModelObject::ContractSubject(o) => {
            let mut mos =
                vec![ManagedObject::new("vzSubj", &dn).with_attr(ATTR_NAME, o.name.clone())];
            for filter in &o.filters {
                mos.push(
                    ManagedObject::new(
                        "vzRsSubjFiltAtt",
                        &dn.child(&format!("rssubjFiltAtt-{filter}")),
                    )
                    .with_attr("tnVzFilterName", filter.clone()),
                );
            }
            mos
        }
        ModelObject::L3Outside(o) => {
            let mut mos =
                vec![ManagedObject::new("l3extOut", &dn).with_attr(ATTR_NAME, o.name.clone())];
            if !o.vrf_name.is_empty() {
                mos.push(
                    ManagedObject::new("l3extRsEctx", &dn.child("rsectx"))
                        .with_attr("tnFvCtxName", o.vrf_name.clone()),
                );
            }
            mos
        }
        ModelObject::ExternalNetwork(o) => {
            vec![ManagedObject::new("l3extInstP", &dn).with_attr(ATTR_NAME, o.name.clone())]
        }
        ModelObject::Fault(o) => {
            vec![ManagedObject::new("faultInst", &dn)
                .with_attr("code", o.fault_code.clone())
                .with_attr("severity", o.severity.clone())
                .with_attr("descr", o.description.clone())
                .with_attr("cause", o.cause.clone())]
        }
    }
}

/// Convert a wire MO back into the model. Child MOs come back as partially
/// populated parents (an `fvRsCtx` yields its bridge domain with only the
/// VRF link set). Tags and root containers have no model counterpart.
pub fn from_fabric(mo: &ManagedObject) -> Option<ModelObject> {
    let dn = mo.dn()?;
    let names = dn_names(&dn);
    let attr = |key: &str| mo.attr(key).unwrap_or_default().to_string();

    let object = match mo.class.as_str() {
        "fvTenant" => ModelObject::Tenant(Tenant {
            name: mo
                .attr(ATTR_NAME)
                .map(str::to_string)
                .unwrap_or_else(|| name_at(&names, 0)),
            descr: attr("descr"),
            ..Default::default()
        }),
        "fvBD" => ModelObject::BridgeDomain(BridgeDomain {
            tenant_name: name_at(&names, 0),
            name: name_at(&names, 1),
            enable_arp_flood: mo.attr("arpFlood") == Some("yes"),
            enable_routing: mo.attr("unicastRoute") == Some("yes"),
            ..Default::default()
        }),
        "fvRsCtx" => ModelObject::BridgeDomain(BridgeDomain {
            tenant_name: name_at(&names, 0),
            name: name_at(&names, 1),
            vrf_name: attr("tnFvCtxName"),
            ..Default::default()
        }),
        "fvSubnet" => ModelObject::Subnet(Subnet {
            tenant_name: name_at(&names, 0),
            bd_name: name_at(&names, 1),
            gw_ip_mask: mo
                .attr("ip")
                .map(str::to_string)
                .unwrap_or_else(|| name_at(&names, 2).trim_matches(['[', ']']).to_string()),
            scope: attr("scope"),
            ..Default::default()
        }),
        "fvCtx" => ModelObject::Vrf(Vrf {
            tenant_name: name_at(&names, 0),
            name: name_at(&names, 1),
            policy_enforcement_pref: attr("pcEnfPref"),
            ..Default::default()
        }),
        "fvAp" => ModelObject::AppProfile(AppProfile {
            tenant_name: name_at(&names, 0),
            name: name_at(&names, 1),
            ..Default::default()
        }),
        "fvAEPg" => ModelObject::EndpointGroup(EndpointGroup {
            tenant_name: name_at(&names, 0),
            app_profile_name: name_at(&names, 1),
            name: name_at(&names, 2),
            ..Default::default()
        }),
        "fvRsBd" => ModelObject::EndpointGroup(EndpointGroup {
            tenant_name: name_at(&names, 0),
            app_profile_name: name_at(&names, 1),
            name: name_at(&names, 2),
            bd_name: attr("tnFvBDName"),
            ..Default::default()
        }),
        "vzBrCP" => ModelObject::Contract(Contract {
            tenant_name: name_at(&names, 0),
            name: name_at(&names, 1),
            scope: attr("scope"),
            ..Default::default()
        }),
        "vzSubj" => ModelObject::ContractSubject(ContractSubject {
            tenant_name: name_at(&names, 0),
            contract_name: name_at(&names, 1),
            name: name_at(&names, 2),
            ..Default::default()
        }),
        "vzRsSubjFiltAtt" => ModelObject::ContractSubject(ContractSubject {
            tenant_name: name_at(&names, 0),
            contract_name: name_at(&names, 1),
            name: name_at(&names, 2),
            filters: vec![attr("tnVzFilterName")],
            ..Default::default()
        }),
        "l3extOut" => ModelObject::L3Outside(L3Outside {
            tenant_name: name_at(&names, 0),
            name: name_at(&names, 1),
            ..Default::default()
        }),
        "l3extRsEctx" => ModelObject::L3Outside(L3Outside {
            tenant_name: name_at(&names, 0),
            name: name_at(&names, 1),
            vrf_name: attr("tnFvCtxName"),
            ..Default::default()
        }),
        "l3extInstP" => ModelObject::ExternalNetwork(ExternalNetwork {
            tenant_name: name_at(&names, 0),
            l3out_name: name_at(&names, 1),
            name: name_at(&names, 2),
            ..Default::default()
        }),
        "faultInst" => ModelObject::Fault(Fault {
            external_identifier: dn.clone(),
            fault_code: mo.attr("code").map(str::to_string).unwrap_or_else(|| {
                dn.rn().strip_prefix("fault-").unwrap_or_default().to_string()
            }),
            severity: attr("severity"),
            description: attr("descr"),
            cause: attr("cause"),
        }),
        _ => return None,
    };
    Some(object)
}

/// Classes to ask for when re-fetching an object's subtree: the primary
/// class, any filler classes that reverse-map into the same model type, and
/// the ownership tags.
pub fn subtree_classes(object: &ModelObject) -> Vec<&'static str> {
    let mut classes = vec![wire_class(object)];
    match object {
        ModelObject::BridgeDomain(_) => classes.push("fvRsCtx"),
        ModelObject::EndpointGroup(_) => classes.push("fvRsBd"),
        ModelObject::ContractSubject(_) => classes.push("vzRsSubjFiltAtt"),
        ModelObject::L3Outside(_) => classes.push("l3extRsEctx"),
        _ => {}
    }
    if !object.is_operational() {
        classes.push(registry::TAG_CLASS);
    }
    classes
}

/// Round-trip an object through its wire shape, dropping anything the
/// conversion does not carry. Used on monitored objects headed for the
/// config view.
pub fn screen(object: &ModelObject) -> Option<ModelObject> {
    let mos = to_fabric(object);
    let mut screened = from_fabric(mos.first()?)?;
    screened.set_monitored(object.monitored());
    screened.set_pre_existing(object.pre_existing());
    Some(screened)
}

/// Build a deletable wire object from a class and DN.
pub fn deletion_mo(class: &str, dn: &Dn) -> ManagedObject {
    ManagedObject::new(class, dn).with_attr(ATTR_STATUS, fabricsync_core::mo::STATUS_DELETED)
}

/// RN of a nested child event: its own `rn` attribute, or the registered
/// prefix joined with the name/code attribute.
pub fn child_rn(info: &registry::ClassInfo, child: &ManagedObject) -> String {
    if let Some(rn) = child.attr(fabricsync_core::mo::ATTR_RN) {
        return rn.to_string();
    }
    let name = match info.name_source {
        NameSource::Name => child.attr(ATTR_NAME),
        NameSource::Code => child.attr(fabricsync_core::mo::ATTR_CODE),
        NameSource::None => None,
    };
    match name {
        Some(name) if !name.is_empty() => format!("{}-{}", info.prefix, name),
        _ => info.prefix.to_string(),
    }
}
