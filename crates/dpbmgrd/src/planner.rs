//! Breakout planning: splitting a parent port into children and back.

use std::collections::BTreeSet;

use crate::error::{DpbError, DpbResult};
use crate::mode::BreakoutMode;
use crate::record::{split_port_name, PortRecord};

/// Computes port sets for breakout and merge.
///
/// Every plan conserves lanes: the lanes of the produced ports are exactly
/// the lanes of the consumed ports, with no overlap.
#[derive(Debug, Clone, Copy, Default)]
pub struct BreakoutPlanner;

fn lane_set<'a>(ports: impl IntoIterator<Item = &'a PortRecord>) -> DpbResult<BTreeSet<u32>> {
    let mut lanes = BTreeSet::new();
    for port in ports {
        for lane in &port.lanes {
            if !lanes.insert(*lane) {
                return Err(DpbError::validation(
                    &port.name,
                    format!("lane {} is owned by more than one port", lane),
                ));
            }
        }
    }
    Ok(lanes)
}

/// Fails unless `before` and `after` own the same lanes, each exactly once.
pub fn ensure_lane_conservation(before: &[PortRecord], after: &[PortRecord]) -> DpbResult<()> {
    let lanes_before = lane_set(before)?;
    let lanes_after = lane_set(after)?;
    if lanes_before != lanes_after {
        let port = before
            .first()
            .or(after.first())
            .map(|p| p.name.as_str())
            .unwrap_or_default();
        return Err(DpbError::validation(
            port,
            format!("lanes {:?} would become {:?}", lanes_before, lanes_after),
        ));
    }
    Ok(())
}

impl BreakoutPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Splits `parent` into `child_count` ports of equal lane count.
    pub fn split(&self, parent: &PortRecord, child_count: usize) -> DpbResult<Vec<PortRecord>> {
        let mode = format!("{}x", child_count);
        let lanes = parent.lanes.len();
        if child_count == 0 || lanes % child_count != 0 {
            return Err(DpbError::invalid_mode(
                &parent.name,
                mode,
                format!("{} lanes cannot be split into {} equal ports", lanes, child_count),
            ));
        }
        self.split_lanes(parent, &vec![lanes / child_count; child_count])
    }

    /// Splits `parent` according to `mode`.
    pub fn split_mode(&self, parent: &PortRecord, mode: &BreakoutMode) -> DpbResult<Vec<PortRecord>> {
        let partition = mode
            .lane_partition(parent.lanes.len())
            .map_err(|e| DpbError::invalid_mode(&parent.name, mode.name(), e))?;
        self.split_lanes(parent, &partition)
    }

    /// Splits `parent` into children owning `lane_counts[i]` consecutive lanes each.
    ///
    /// Child `i` is named after the parent's number plus its lane offset,
    /// gets alias `"{parent alias}/{offset}"` and a speed proportional to its lanes.
    /// A single child is the parent itself.
    pub fn split_lanes(&self, parent: &PortRecord, lane_counts: &[usize]) -> DpbResult<Vec<PortRecord>> {
        let mode = format!("{:?}", lane_counts);
        let total: usize = lane_counts.iter().sum();
        if lane_counts.is_empty() || lane_counts.contains(&0) || total != parent.lanes.len() {
            return Err(DpbError::invalid_mode(
                &parent.name,
                mode,
                format!("partition does not cover the {} lanes of the port", parent.lanes.len()),
            ));
        }
        if lane_counts.len() == 1 {
            return Ok(vec![parent.clone()]);
        }

        let (prefix, number) = split_port_name(&parent.name)
            .ok_or_else(|| DpbError::validation(&parent.name, "name has no numeric suffix"))?;

        let mut children = Vec::with_capacity(lane_counts.len());
        let mut offset = 0;
        for count in lane_counts {
            let lanes = parent.lanes[offset..offset + count].to_vec();
            let speed = (u64::from(parent.speed) * *count as u64 / total as u64) as u32;
            children.push(PortRecord::new(
                format!("{}{}", prefix, number + offset as u32),
                format!("{}/{}", parent.alias, offset),
                lanes,
                speed,
                parent.index,
            ));
            offset += count;
        }

        ensure_lane_conservation(std::slice::from_ref(parent), &children)?;
        Ok(children)
    }

    /// Merges sibling ports back into one port.
    ///
    /// The lowest-numbered child gives the name, alias root and index;
    /// lanes are concatenated in name order and speeds summed.
    pub fn merge(&self, children: &[PortRecord]) -> DpbResult<PortRecord> {
        let mut ordered: Vec<(u32, &PortRecord)> = children
            .iter()
            .map(|c| c.port_number().map(|n| (n, c)))
            .collect::<DpbResult<_>>()?;
        ordered.sort_by_key(|(n, _)| *n);

        let first = match ordered.first() {
            Some((_, first)) => *first,
            None => return Err(DpbError::validation("", "nothing to merge")),
        };
        if ordered.len() == 1 {
            return Ok(first.clone());
        }
        if let Some((_, stray)) = ordered.iter().find(|(_, c)| c.index != first.index) {
            return Err(DpbError::validation(
                &stray.name,
                format!("index {} differs from sibling index {}", stray.index, first.index),
            ));
        }

        let lanes: Vec<u32> = ordered.iter().flat_map(|(_, c)| c.lanes.iter().copied()).collect();
        let speed = ordered.iter().map(|(_, c)| c.speed).sum();
        let parent = PortRecord::new(&first.name, first.alias_root(), lanes, speed, first.index);

        ensure_lane_conservation(children, std::slice::from_ref(&parent))?;
        Ok(parent)
    }
}

/// Ports removed and created by one breakout.
///
/// Ports present unchanged (same name, lanes and speed) on both sides are
/// not part of the delta.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigurationDelta {
    pub removed: Vec<PortRecord>,
    pub created: Vec<PortRecord>,
}

impl ConfigurationDelta {
    pub fn between(current: &[PortRecord], target: &[PortRecord]) -> DpbResult<Self> {
        let removed: Vec<PortRecord> = current
            .iter()
            .filter(|c| !target.iter().any(|t| t.same_shape(c)))
            .cloned()
            .collect();
        let created: Vec<PortRecord> = target
            .iter()
            .filter(|t| !current.iter().any(|c| c.same_shape(t)))
            .cloned()
            .collect();

        ensure_lane_conservation(&removed, &created)?;
        Ok(Self { removed, created })
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.created.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::AdminStatus;
    use pretty_assertions::assert_eq;

    fn parent() -> PortRecord {
        PortRecord::new("Ethernet0", "Eth0", vec![0, 1, 2, 3], 40000, 0)
    }

    fn names(ports: &[PortRecord]) -> Vec<&str> {
        ports.iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn test_split_four_ways() {
        let children = BreakoutPlanner::new().split(&parent(), 4).unwrap();

        assert_eq!(
            children,
            vec![
                PortRecord::new("Ethernet0", "Eth0/0", vec![0], 10000, 0),
                PortRecord::new("Ethernet1", "Eth0/1", vec![1], 10000, 0),
                PortRecord::new("Ethernet2", "Eth0/2", vec![2], 10000, 0),
                PortRecord::new("Ethernet3", "Eth0/3", vec![3], 10000, 0),
            ]
        );
    }

    #[test]
    fn test_split_rejects_uneven() {
        let err = BreakoutPlanner::new().split(&parent(), 3).unwrap_err();
        assert!(matches!(err, DpbError::InvalidMode { .. }));
        assert!(BreakoutPlanner::new().split(&parent(), 0).is_err());
    }

    #[test]
    fn test_split_one_is_identity() {
        let port = parent().with_mtu(1500).with_admin_status(AdminStatus::Up);
        assert_eq!(BreakoutPlanner::new().split(&port, 1).unwrap(), vec![port]);
    }

    #[test]
    fn test_merge_inverts_split() {
        let planner = BreakoutPlanner::new();
        for count in [1, 2, 4] {
            let mut children = planner.split(&parent(), count).unwrap();
            children.reverse();
            let merged = planner.merge(&children).unwrap();

            assert_eq!(merged.lanes, vec![0, 1, 2, 3]);
            assert_eq!(merged.speed, 40000);
            assert_eq!(merged.index, 0);
            assert_eq!(merged.name, "Ethernet0");
            assert_eq!(merged.alias, "Eth0");
        }
    }

    #[test]
    fn test_merge_restores_alias_root() {
        let children = vec![
            PortRecord::new("Ethernet4", "Eth1/2", vec![6, 7], 50000, 1),
            PortRecord::new("Ethernet2", "Eth1/0", vec![4, 5], 50000, 1),
        ];
        let merged = BreakoutPlanner::new().merge(&children).unwrap();
        assert_eq!(merged, PortRecord::new("Ethernet2", "Eth1", vec![4, 5, 6, 7], 100000, 1));
    }

    #[test]
    fn test_merge_rejects_overlap() {
        let children = vec![
            PortRecord::new("Ethernet0", "0/0", vec![0, 1], 50000, 0),
            PortRecord::new("Ethernet1", "0/1", vec![1, 2], 50000, 0),
        ];
        assert!(matches!(
            BreakoutPlanner::new().merge(&children),
            Err(DpbError::Validation { .. })
        ));
        assert!(BreakoutPlanner::new().merge(&[]).is_err());
    }

    #[test]
    fn test_asymmetric_split_naming() {
        let planner = BreakoutPlanner::new();
        let parent = PortRecord::new("Ethernet0", "Eth0", vec![0, 1, 2, 3], 100000, 0);

        let mode: BreakoutMode = "2x25G(2)+1x50G(2)".parse().unwrap();
        let children = planner.split_mode(&parent, &mode).unwrap();
        assert_eq!(names(&children), vec!["Ethernet0", "Ethernet1", "Ethernet2"]);
        assert_eq!(children[2].lanes, vec![2, 3]);
        assert_eq!(children.iter().map(|c| c.speed).collect::<Vec<_>>(), vec![25000, 25000, 50000]);

        let mode: BreakoutMode = "1x50G(2)+2x25G(2)".parse().unwrap();
        let children = planner.split_mode(&parent, &mode).unwrap();
        assert_eq!(names(&children), vec!["Ethernet0", "Ethernet2", "Ethernet3"]);
        assert_eq!(children[0].lanes, vec![0, 1]);
    }

    fn aliases(ports: &[PortRecord]) -> Vec<&str> {
        ports.iter().map(|p| p.alias.as_str()).collect()
    }

    #[test]
    fn test_child_alias_follows_lane_offset() {
        let planner = BreakoutPlanner::new();
        let parent = PortRecord::new("Ethernet0", "0", vec![0, 1, 2, 3], 100000, 0);

        let two = planner.split(&parent, 2).unwrap();
        assert_eq!(aliases(&two), vec!["0/0", "0/2"]);

        let mode: BreakoutMode = "1x50G(2)+2x25G(2)".parse().unwrap();
        let children = planner.split_mode(&parent, &mode).unwrap();
        assert_eq!(aliases(&children), vec!["0/0", "0/2", "0/3"]);

        let mode: BreakoutMode = "2x25G(2)+1x50G(2)".parse().unwrap();
        let children = planner.split_mode(&parent, &mode).unwrap();
        assert_eq!(aliases(&children), vec!["0/0", "0/1", "0/2"]);
        assert_eq!(planner.merge(&children).unwrap().alias, "0");
        assert_eq!(planner.merge(&two).unwrap().alias, "0");
    }

    #[test]
    fn test_split_mode_rejects_wrong_lane_total() {
        let parent = PortRecord::new("Ethernet8", "Eth8", vec![8, 9], 50000, 2);
        let mode: BreakoutMode = "4x25G[10G]".parse().unwrap();
        match BreakoutPlanner::new().split_mode(&parent, &mode) {
            Err(DpbError::InvalidMode { mode, .. }) => assert_eq!(mode, "4x25G[10G]"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_delta_skips_unchanged_ports() {
        let planner = BreakoutPlanner::new();
        let current = planner.split_mode(&parent(), &"2x25G(2)+1x50G(2)".parse().unwrap()).unwrap();
        let target = planner.split(&parent(), 4).unwrap();

        let delta = ConfigurationDelta::between(&current, &target).unwrap();
        assert_eq!(names(&delta.removed), vec!["Ethernet2"]);
        assert_eq!(names(&delta.created), vec!["Ethernet2", "Ethernet3"]);
        assert!(ConfigurationDelta::between(&target, &target).unwrap().is_empty());
    }

    #[test]
    fn test_delta_rejects_lost_lanes() {
        let current = vec![parent()];
        let target = vec![PortRecord::new("Ethernet0", "0/0", vec![0, 1], 20000, 0)];
        assert!(ConfigurationDelta::between(&current, &target).is_err());
    }
}
