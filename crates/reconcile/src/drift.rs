//! Drift comparison between the stored artifact and the freshly rendered one.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;

pub trait DriftComparator: Send + Sync {
    /// `true` when `stored` no longer matches `rendered`.
    fn drifted(&self, stored: &ConfigMap, rendered: &ConfigMap) -> bool;
}

/// Raw equality of the ConfigMap data. Any byte difference, formatting included, is drift.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawEquality;

impl DriftComparator for RawEquality {
    fn drifted(&self, stored: &ConfigMap, rendered: &ConfigMap) -> bool { data(stored) != data(rendered) }
}

fn data(cm: &ConfigMap) -> Option<&BTreeMap<String, String>> { cm.data.as_ref() }
