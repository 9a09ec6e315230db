//! Deterministic tenant partitioning.
//!
//! A pure function of the sorted live-host list, this host's id, and the
//! hosts-per-group policy. Different hosts computing against an identical
//! live-host view agree exactly; immediately after a membership change they
//! may transiently disagree, which can only widen coverage, never shrink it
//! below one host per tenant.

/// When fewer groups than this would form, every host serves every tenant
const MIN_GROUPS: i64 = 2;

/// The group a host computed for itself: tenants with
/// `tenant_id % num_groups == group_index` belong to its slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupAssignment {
    pub num_groups: i64,
    pub group_index: i64,
}

impl GroupAssignment {
    /// The degenerate assignment: one group covering every tenant
    pub fn full_coverage() -> Self {
        Self {
            num_groups: 1,
            group_index: 0,
        }
    }

    pub fn covers(&self, tenant_id: i64) -> bool {
        tenant_id.rem_euclid(self.num_groups) == self.group_index
    }
}

/// Compute this host's group from the live-host view.
///
/// `num_groups = live_hosts / tenants_per_group` (integer division); with
/// fewer than two groups the fleet is too small to split and every host
/// serves every tenant. A host absent from the view (e.g. its own heartbeat
/// write failed) lands in group 0 rather than dropping out.
pub fn group_assignment(
    sorted_hosts: &[String],
    host_id: &str,
    tenants_per_group: i64,
) -> GroupAssignment {
    if tenants_per_group <= 0 {
        return GroupAssignment::full_coverage();
    }

    let num_groups = sorted_hosts.len() as i64 / tenants_per_group;
    if num_groups < MIN_GROUPS {
        return GroupAssignment::full_coverage();
    }

    let position = sorted_hosts
        .iter()
        .position(|h| h == host_id)
        .unwrap_or(0) as i64;

    GroupAssignment {
        num_groups,
        group_index: position % num_groups,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn small_fleet_degenerates_to_full_coverage() {
        for n in 0..4 {
            let fleet = hosts(&["a", "b", "c", "d"][..n]);
            let assignment = group_assignment(&fleet, "a", 2);
            assert_eq!(assignment, GroupAssignment::full_coverage());
            for tenant in 0..20 {
                assert!(assignment.covers(tenant));
            }
        }
    }

    #[test]
    fn four_hosts_split_into_two_groups() {
        let fleet = hosts(&["a", "b", "c", "d"]);

        let a = group_assignment(&fleet, "a", 2);
        let b = group_assignment(&fleet, "b", 2);
        let c = group_assignment(&fleet, "c", 2);
        let d = group_assignment(&fleet, "d", 2);

        assert_eq!(a.num_groups, 2);
        // a and c share a group, b and d the other
        assert_eq!(a, c);
        assert_eq!(b, d);
        assert_ne!(a, b);

        // Even tenants land in group 0, odd tenants in group 1
        assert!(a.covers(0) && a.covers(42));
        assert!(b.covers(1) && b.covers(43));
        assert!(!a.covers(1) && !b.covers(0));
    }

    #[test]
    fn every_tenant_is_covered_by_some_live_host() {
        let names = ["h0", "h1", "h2", "h3", "h4", "h5", "h6", "h7", "h8", "h9"];
        for fleet_size in 1..=names.len() {
            let fleet = hosts(&names[..fleet_size]);
            for tenant in 0..50 {
                let covered = fleet
                    .iter()
                    .any(|h| group_assignment(&fleet, h, 2).covers(tenant));
                assert!(
                    covered,
                    "tenant {tenant} uncovered with {fleet_size} live hosts"
                );
            }
        }
    }

    #[test]
    fn unknown_host_falls_back_to_group_zero() {
        let fleet = hosts(&["a", "b", "c", "d"]);
        let assignment = group_assignment(&fleet, "not-in-fleet", 2);
        assert_eq!(assignment.group_index, 0);
    }
}
