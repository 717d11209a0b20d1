//! Subscription URLs
//!
//! One live subscription per served root. The URL scopes the query to the
//! root's subtree, asks for config-only properties plus faults, and filters
//! on every class the converter understands.

use crate::registry;

/// Subscription URL for a root RN (`tn-<name>`, or bare `infra`).
pub fn subscription_url(root_rn: &str) -> String {
    let classes = if root_rn == registry::INFRA_ROOT_RN {
        registry::infra_subscription_classes()
    } else {
        registry::tenant_subscription_classes()
    };
    format!(
        "/api/mo/uni/{root_rn}.json?query-target=subtree&\
         rsp-prop-include=config-only&rsp-subtree-include=faults&\
         subscription=yes&target-subtree-class={}",
        classes.join(",")
    )
}

/// Root RN back out of a subscription URL.
pub fn url_root(url: &str) -> Option<&str> {
    url.strip_prefix("/api/mo/uni/")
        .and_then(|rest| rest.split(".json").next())
}
