//! Model objects - the internal typed representation of Fabric state
//!
//! One tagged variant per entity. Every object derives its DN from its own
//! naming fields; `monitored` marks objects the Fabric owns, `pre_existing`
//! marks Fabric-owned objects referenced from the config view.

use crate::dn::Dn;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! owned_entity {
    ($name:ident { $($field:ident: $ty:ty),* $(,)? }) => {
        #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
        #[serde(default)]
        pub struct $name {
            $(pub $field: $ty,)*
            pub monitored: bool,
            pub pre_existing: bool,
        }
    };
}

owned_entity!(Tenant {
    name: String,
    descr: String,
});

owned_entity!(BridgeDomain {
    tenant_name: String,
    name: String,
    vrf_name: String,
    enable_arp_flood: bool,
    enable_routing: bool,
});

owned_entity!(Subnet {
    tenant_name: String,
    bd_name: String,
    gw_ip_mask: String,
    scope: String,
});

owned_entity!(Vrf {
    tenant_name: String,
    name: String,
    policy_enforcement_pref: String,
});

owned_entity!(AppProfile {
    tenant_name: String,
    name: String,
});

owned_entity!(EndpointGroup {
    tenant_name: String,
    app_profile_name: String,
    name: String,
    bd_name: String,
});

owned_entity!(Contract {
    tenant_name: String,
    name: String,
    scope: String,
});

owned_entity!(ContractSubject {
    tenant_name: String,
    contract_name: String,
    name: String,
    filters: Vec<String>,
});

owned_entity!(L3Outside {
    tenant_name: String,
    name: String,
    vrf_name: String,
});

owned_entity!(ExternalNetwork {
    tenant_name: String,
    l3out_name: String,
    name: String,
});

/// A Fabric fault. Operational only: observed, never pushed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Fault {
    /// The fault DN; external systems correlate through it.
    pub external_identifier: Dn,
    pub fault_code: String,
    pub severity: String,
    pub description: String,
    pub cause: String,
}

impl Fault {
    /// DN of the object this fault is raised against.
    pub fn status_id(&self) -> String {
        self.external_identifier
            .parent()
            .map(|p| p.to_string())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelObject {
    Tenant(Tenant),
    BridgeDomain(BridgeDomain),
    Subnet(Subnet),
    Vrf(Vrf),
    AppProfile(AppProfile),
    EndpointGroup(EndpointGroup),
    Contract(Contract),
    ContractSubject(ContractSubject),
    L3Outside(L3Outside),
    ExternalNetwork(ExternalNetwork),
    Fault(Fault),
}

impl ModelObject {
    pub fn dn(&self) -> Dn {
        match self {
            Self::Tenant(o) => Dn::new(format!("uni/tn-{}", o.name)),
            Self::BridgeDomain(o) => Dn::new(format!("uni/tn-{}/BD-{}", o.tenant_name, o.name)),
            Self::Subnet(o) => Dn::new(format!(
                "uni/tn-{}/BD-{}/subnet-[{}]",
                o.tenant_name, o.bd_name, o.gw_ip_mask
            )),
            Self::Vrf(o) => Dn::new(format!("uni/tn-{}/ctx-{}", o.tenant_name, o.name)),
            Self::AppProfile(o) => Dn::new(format!("uni/tn-{}/ap-{}", o.tenant_name, o.name)),
            Self::EndpointGroup(o) => Dn::new(format!(
                "uni/tn-{}/ap-{}/epg-{}",
                o.tenant_name, o.app_profile_name, o.name
            )),
            Self::Contract(o) => Dn::new(format!("uni/tn-{}/brc-{}", o.tenant_name, o.name)),
            Self::ContractSubject(o) => Dn::new(format!(
                "uni/tn-{}/brc-{}/subj-{}",
                o.tenant_name, o.contract_name, o.name
            )),
            Self::L3Outside(o) => Dn::new(format!("uni/tn-{}/out-{}", o.tenant_name, o.name)),
            Self::ExternalNetwork(o) => Dn::new(format!(
                "uni/tn-{}/out-{}/instP-{}",
                o.tenant_name, o.l3out_name, o.name
            )),
            Self::Fault(o) => o.external_identifier.clone(),
        }
    }

    pub fn root_rn(&self) -> String {
        self.dn().root_rn().to_string()
    }

    /// Stable type tag used as `resource_type` in status rows.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Tenant(_) => "tenant",
            Self::BridgeDomain(_) => "bridge_domain",
            Self::Subnet(_) => "subnet",
            Self::Vrf(_) => "vrf",
            Self::AppProfile(_) => "app_profile",
            Self::EndpointGroup(_) => "endpoint_group",
            Self::Contract(_) => "contract",
            Self::ContractSubject(_) => "contract_subject",
            Self::L3Outside(_) => "l3_outside",
            Self::ExternalNetwork(_) => "external_network",
            Self::Fault(_) => "fault",
        }
    }

    /// Faults and other status-only children live in the operational view.
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Fault(_))
    }

    pub fn monitored(&self) -> bool {
        self.flags().map(|(m, _)| m).unwrap_or(false)
    }

    pub fn pre_existing(&self) -> bool {
        self.flags().map(|(_, p)| p).unwrap_or(false)
    }

    pub fn set_monitored(&mut self, value: bool) {
        if let Some((m, _)) = self.flags_mut() {
            *m = value;
        }
    }

    pub fn set_pre_existing(&mut self, value: bool) {
        if let Some((_, p)) = self.flags_mut() {
            *p = value;
        }
    }

    fn flags(&self) -> Option<(bool, bool)> {
        match self {
            Self::Tenant(o) => Some((o.monitored, o.pre_existing)),
            Self::BridgeDomain(o) => Some((o.monitored, o.pre_existing)),
            Self::Subnet(o) => Some((o.monitored, o.pre_existing)),
            Self::Vrf(o) => Some((o.monitored, o.pre_existing)),
            Self::AppProfile(o) => Some((o.monitored, o.pre_existing)),
            Self::EndpointGroup(o) => Some((o.monitored, o.pre_existing)),
            Self::Contract(o) => Some((o.monitored, o.pre_existing)),
            Self::ContractSubject(o) => Some((o.monitored, o.pre_existing)),
            Self::L3Outside(o) => Some((o.monitored, o.pre_existing)),
            Self::ExternalNetwork(o) => Some((o.monitored, o.pre_existing)),
            Self::Fault(_) => None,
        }
    }

    fn flags_mut(&mut self) -> Option<(&mut bool, &mut bool)> {
        match self {
            Self::Tenant(o) => Some((&mut o.monitored, &mut o.pre_existing)),
            Self::BridgeDomain(o) => Some((&mut o.monitored, &mut o.pre_existing)),
            Self::Subnet(o) => Some((&mut o.monitored, &mut o.pre_existing)),
            Self::Vrf(o) => Some((&mut o.monitored, &mut o.pre_existing)),
            Self::AppProfile(o) => Some((&mut o.monitored, &mut o.pre_existing)),
            Self::EndpointGroup(o) => Some((&mut o.monitored, &mut o.pre_existing)),
            Self::Contract(o) => Some((&mut o.monitored, &mut o.pre_existing)),
            Self::ContractSubject(o) => Some((&mut o.monitored, &mut o.pre_existing)),
            Self::L3Outside(o) => Some((&mut o.monitored, &mut o.pre_existing)),
            Self::ExternalNetwork(o) => Some((&mut o.monitored, &mut o.pre_existing)),
            Self::Fault(_) => None,
        }
    }
}

/// Per-object synchronization state surfaced to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Synced,
    Failed,
}

impl SyncStatus {
    pub fn health_score(self) -> i32 {
        match self {
            Self::Synced => 100,
            Self::Pending => 50,
            Self::Failed => 0,
        }
    }
}

/// One row of the statuses table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStatus {
    pub resource_type: String,
    pub resource_id: String,
    pub resource_root: String,
    pub sync_status: SyncStatus,
    pub sync_message: String,
    pub health_score: i32,
    pub last_update: DateTime<Utc>,
}

impl ObjectStatus {
    pub fn new(object: &ModelObject, status: SyncStatus, message: impl Into<String>) -> Self {
        Self {
            resource_type: object.type_name().to_string(),
            resource_id: object.dn().to_string(),
            resource_root: object.root_rn(),
            sync_status: status,
            sync_message: message.into(),
            health_score: status.health_score(),
            last_update: Utc::now(),
        }
    }
}

/// One row of the faults table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRecord {
    pub external_identifier: String,
    pub fault_code: String,
    pub severity: String,
    pub description: String,
    pub cause: String,
    pub status_id: String,
    pub last_update: DateTime<Utc>,
}

impl From<&Fault> for FaultRecord {
    fn from(fault: &Fault) -> Self {
        Self {
            external_identifier: fault.external_identifier.to_string(),
            fault_code: fault.fault_code.clone(),
            severity: fault.severity.clone(),
            description: fault.description.clone(),
            cause: fault.cause.clone(),
            status_id: fault.status_id(),
            last_update: Utc::now(),
        }
    }
}

/// One row of the agents table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub version: String,
    pub admin_state_up: bool,
    pub heartbeat: DateTime<Utc>,
    pub served_roots: Vec<String>,
}
