//! The feature registry: every toggle the console manages, plus the
//! static policy relationships between them.
//!
//! The registry is the validation surface for all writes. Exclusivity and
//! approval gating are data here, not control flow; the reconciler and
//! approval engine consult these tables instead of hard-coding names.

use std::collections::BTreeMap;

/// Local mirror of the control plane's feature map. A `BTreeMap` keeps
/// snapshots deterministically ordered so rollback comparisons are exact.
pub type FeatureSet = BTreeMap<String, bool>;

/// Monitoring toggles (data collection on the endpoint).
pub const MONITORING_FEATURES: &[&str] = &[
    "Keylogger",
    "Keystroke / Word Count",
    "Mouse Click Count",
    "Mouse Movement Tracking",
    "Active/Idle Time Detection",
    "Clipboard Monitoring",
    "Print Job Monitoring",
    "Browser History Logging",
    "Application Usage Tracking",
    "Detect Login / Logout + Screen Lock / Unlock",
    "Capture Screenshots",
    "Capture Audio Clips",
    "Capture Video Clips",
    "Installation / Uninstallation Logs",
    "Laptop Geolocation (IP/GPS Based)",
];

/// Restriction toggles (enforcement on the endpoint).
pub const RESTRICTION_FEATURES: &[&str] = &[
    "VPN Detection & Blocking",
    "Chrome Extension Restrictions",
    "USB Port Access Control",
    "Incognito Mode Blocking",
    "Website Whitelisting",
    "Website Blocking",
    "Screenshot / Snipping Tool Prevention",
    "Copy-Paste Enable / Disable",
    "Download Enable / Disable",
    "Internet / Screen Time Limits",
    "Lunch Break Mode",
];

pub const VPN_BLOCKING: &str = "VPN Detection & Blocking";

/// Pairs of features that must never both be enabled. When a conflict is
/// found in remote state, the `disable_on_repair` side is the one turned
/// off.
pub struct ExclusivePair {
    pub first: &'static str,
    pub second: &'static str,
    pub disable_on_repair: &'static str,
}

pub const EXCLUSIVE_PAIRS: &[ExclusivePair] = &[ExclusivePair {
    first: "Website Whitelisting",
    second: "Website Blocking",
    disable_on_repair: "Website Blocking",
}];

/// Features whose enablement needs a second administrator's sign-off.
/// Disabling is never gated.
pub const APPROVAL_GATED: &[&str] = &[VPN_BLOCKING];

pub fn is_known(name: &str) -> bool {
    MONITORING_FEATURES.contains(&name) || RESTRICTION_FEATURES.contains(&name)
}

/// The mutually-exclusive partner of `name`, if it has one.
pub fn exclusive_partner(name: &str) -> Option<&'static str> {
    for pair in EXCLUSIVE_PAIRS {
        if pair.first == name {
            return Some(pair.second);
        }
        if pair.second == name {
            return Some(pair.first);
        }
    }
    None
}

/// Whether setting `name` to `desired` must go through the approval
/// workflow instead of being written directly.
pub fn requires_approval(name: &str, desired: bool) -> bool {
    desired && APPROVAL_GATED.contains(&name)
}

/// All known features, disabled. Used to seed mirrors before hydration.
pub fn default_feature_set() -> FeatureSet {
    MONITORING_FEATURES
        .iter()
        .chain(RESTRICTION_FEATURES.iter())
        .map(|name| (name.to_string(), false))
        .collect()
}

/// The full batch of writes implied by one requested toggle: the feature
/// itself, plus the forced disable of its exclusive partner when enabling
/// one side of a pair while the other is on.
pub fn derived_updates(current: &FeatureSet, name: &str, desired: bool) -> BTreeMap<String, bool> {
    let mut updates = BTreeMap::new();
    updates.insert(name.to_string(), desired);
    if desired {
        if let Some(partner) = exclusive_partner(name) {
            if current.get(partner).copied().unwrap_or(false) {
                updates.insert(partner.to_string(), false);
            }
        }
    }
    updates
}

/// Fix any exclusivity violations in `features` in place. Returns the
/// names that were forced off.
pub fn repair_exclusivity(features: &mut FeatureSet) -> Vec<String> {
    let mut repaired = Vec::new();
    for pair in EXCLUSIVE_PAIRS {
        let first_on = features.get(pair.first).copied().unwrap_or(false);
        let second_on = features.get(pair.second).copied().unwrap_or(false);
        if first_on && second_on {
            features.insert(pair.disable_on_repair.to_string(), false);
            repaired.push(pair.disable_on_repair.to_string());
        }
    }
    repaired
}
