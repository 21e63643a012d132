//! Cluster report: node groups and aggregate capacity against limits.
//!
//! Aggregate capacity is `target_size × template capacity` summed over all
//! groups that expose a template. Groups without one are counted in the
//! report but contribute nothing to the totals.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use nodescale_core::{CloudProvider, CloudResult, ErrorKind, InstanceState, NodeGroup};

#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub id: String,
    pub min_size: usize,
    pub max_size: usize,
    pub target_size: usize,
    pub members: usize,
    /// Members that finished booting.
    pub joined: usize,
    pub autoprovisioned: bool,
    pub machine_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterReport {
    pub provider: String,
    pub groups: Vec<GroupSummary>,
    /// Aggregate target capacity per resource.
    pub totals: BTreeMap<String, u64>,
    pub violations: Vec<String>,
}

impl ClusterReport {
    /// Read the provider's current snapshot. Never calls the backend.
    pub fn collect(provider: &dyn CloudProvider) -> CloudResult<Self> {
        let mut groups = Vec::new();
        let mut totals: BTreeMap<String, u64> = BTreeMap::new();

        let mut node_groups = provider.node_groups();
        node_groups.sort_by(|a, b| a.id().cmp(b.id()));

        for group in &node_groups {
            let summary = summarize(group.as_ref())?;

            match group.template_node_info() {
                Ok(template) => {
                    for (resource, per_node) in &template.capacity {
                        let total = totals.entry(resource.clone()).or_default();
                        *total = total.saturating_add(per_node.saturating_mul(summary.target_size as u64));
                    }
                }
                Err(e) if e.kind() == ErrorKind::NotImplemented => {
                    debug!(group = %summary.id, "no template, skipped in capacity totals");
                }
                Err(e) => return Err(e),
            }

            groups.push(summary);
        }

        let violations = provider
            .resource_limiter()
            .check(&totals)
            .iter()
            .map(ToString::to_string)
            .collect();

        Ok(Self {
            provider: provider.name().to_string(),
            groups,
            totals,
            violations,
        })
    }

    /// Log one warning per limit violation.
    pub fn warn_violations(&self) {
        for violation in &self.violations {
            warn!(provider = %self.provider, %violation, "aggregate capacity outside resource limits");
        }
    }
}

fn summarize(group: &dyn NodeGroup) -> CloudResult<GroupSummary> {
    let nodes = group.nodes()?;
    let machine_type = group.template_node_info().ok().map(|t| t.machine_type);
    Ok(GroupSummary {
        id: group.id().to_string(),
        min_size: group.min_size(),
        max_size: group.max_size(),
        target_size: group.target_size()?,
        members: nodes.len(),
        joined: nodes
            .iter()
            .filter(|n| n.state != InstanceState::Creating)
            .count(),
        autoprovisioned: group.autoprovisioned(),
        machine_type,
    })
}

/// Plain-text rendering for `nodescaled groups`.
pub fn format_report(report: &ClusterReport) -> String {
    let mut out = String::new();

    out.push_str(&format!("Provider: {}\n\n", report.provider));
    out.push_str(&format!(
        "{:<24} {:>5} {:>5} {:>7} {:>8}  {}\n",
        "GROUP", "MIN", "MAX", "TARGET", "JOINED", "MACHINE"
    ));
    for g in &report.groups {
        let machine = g.machine_type.as_deref().unwrap_or("-");
        let marker = if g.autoprovisioned { " (auto)" } else { "" };
        out.push_str(&format!(
            "{:<24} {:>5} {:>5} {:>7} {:>8}  {machine}{marker}\n",
            g.id,
            g.min_size,
            g.max_size,
            g.target_size,
            format!("{}/{}", g.joined, g.members),
        ));
    }

    if !report.totals.is_empty() {
        out.push_str("\nCapacity at target:\n");
        for (resource, total) in &report.totals {
            out.push_str(&format!("  {resource}: {total}\n"));
        }
    }

    if report.violations.is_empty() {
        out.push_str("\nWithin resource limits.\n");
    } else {
        out.push_str("\nLimit violations:\n");
        for v in &report.violations {
            out.push_str(&format!("  - {v}\n"));
        }
    }

    out
}
