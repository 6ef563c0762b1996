//! Resources that reference a port and keep it from being removed.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use sonic_cfgmgr_common::{FieldValue, FieldValuesExt};
use sonic_orch_common::{ObjectStore, TableId};

use crate::config::PortDefaults;
use crate::error::{DpbError, DpbResult};
use crate::tables::{self, fields};

/// A resource bound to a port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dependency {
    /// `VLAN_MEMBER|<vlan>|<port>`
    VlanMember { vlan: String },
    /// The port is listed in the ports of an ACL table.
    AclTableBinding { table: String },
    /// `INTERFACE|<key>`, the base entry or one of its IP prefixes.
    RouterInterface { key: String },
    /// `NEIGH_TABLE:<port>:<ip>`
    Neighbor { ip: String },
    /// A route whose next hop resolves through the port.
    Route { prefix: String },
    /// A statically configured route through the port.
    StaticRoute { prefix: String },
}

/// Kind of a [`Dependency`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    VlanMember,
    AclTableBinding,
    RouterInterface,
    Neighbor,
    Route,
    StaticRoute,
}

impl Dependency {
    pub fn kind(&self) -> DependencyKind {
        match self {
            Dependency::VlanMember { .. } => DependencyKind::VlanMember,
            Dependency::AclTableBinding { .. } => DependencyKind::AclTableBinding,
            Dependency::RouterInterface { .. } => DependencyKind::RouterInterface,
            Dependency::Neighbor { .. } => DependencyKind::Neighbor,
            Dependency::Route { .. } => DependencyKind::Route,
            Dependency::StaticRoute { .. } => DependencyKind::StaticRoute,
        }
    }

    /// Static routes are operator intent without an owner to cascade from.
    pub fn is_force_clearable(&self) -> bool {
        !matches!(self, Dependency::StaticRoute { .. })
    }

    /// Position in the forced clearing sequence.
    ///
    /// Children go before what they reference: neighbors and routes before
    /// interface prefixes, prefixes before the interface base entry.
    fn clear_rank(&self) -> u8 {
        match self {
            Dependency::Neighbor { .. } => 0,
            Dependency::Route { .. } => 1,
            Dependency::RouterInterface { key } if key.contains('|') => 2,
            Dependency::RouterInterface { .. } => 3,
            Dependency::VlanMember { .. } => 4,
            Dependency::AclTableBinding { .. } => 5,
            Dependency::StaticRoute { .. } => 6,
        }
    }

    fn clear_order(a: &Dependency, b: &Dependency) -> Ordering {
        a.clear_rank().cmp(&b.clear_rank()).then_with(|| a.cmp(b))
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::VlanMember { vlan } => write!(f, "VLAN member {}", vlan),
            Dependency::AclTableBinding { table } => write!(f, "ACL table {}", table),
            Dependency::RouterInterface { key } => write!(f, "router interface {}", key),
            Dependency::Neighbor { ip } => write!(f, "neighbor {}", ip),
            Dependency::Route { prefix } => write!(f, "route {}", prefix),
            Dependency::StaticRoute { prefix } => write!(f, "static route {}", prefix),
        }
    }
}

/// Splits a comma separated port list.
fn list_contains(list: &str, port: &str) -> bool {
    list.split(',').any(|p| p.trim() == port)
}

fn acl_ports(fvs: &[FieldValue]) -> Option<&str> {
    fvs.get_field(fields::PORTS).or_else(|| fvs.get_field(fields::PORTS_LIST))
}

/// Discovers and clears the resources bound to ports.
///
/// Holds no state of its own; every query reads the store.
#[derive(Clone)]
pub struct DependencyTracker {
    store: Arc<dyn ObjectStore>,
}

impl DependencyTracker {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Returns every resource currently bound to `port`.
    pub async fn dependencies_of(&self, port: &str) -> DpbResult<BTreeSet<Dependency>> {
        let mut deps = BTreeSet::new();
        let store = self.store.as_ref();

        for key in store.keys(&tables::cfg_vlan_member()).await? {
            if let Some((vlan, member)) = key.split_once('|') {
                if member == port {
                    deps.insert(Dependency::VlanMember {
                        vlan: vlan.to_string(),
                    });
                }
            }
        }

        let acl = tables::cfg_acl_table();
        for table in store.keys(&acl).await? {
            let bound = store
                .get(&acl, &table)
                .await?
                .and_then(|fvs| acl_ports(&fvs).map(|ports| list_contains(ports, port)))
                .unwrap_or(false);
            if bound {
                deps.insert(Dependency::AclTableBinding { table });
            }
        }

        for key in store.keys(&tables::cfg_interface()).await? {
            let owner = key.split_once('|').map(|(owner, _)| owner).unwrap_or(&key);
            if owner == port {
                deps.insert(Dependency::RouterInterface { key });
            }
        }

        for key in store.keys(&tables::app_neigh()).await? {
            if let Some((ifname, ip)) = key.split_once(':') {
                if ifname == port {
                    deps.insert(Dependency::Neighbor { ip: ip.to_string() });
                }
            }
        }

        for (table, is_static) in [(tables::app_route(), false), (tables::cfg_static_route(), true)] {
            for prefix in store.keys(&table).await? {
                let through_port = store
                    .get(&table, &prefix)
                    .await?
                    .and_then(|fvs| fvs.get_field(fields::IFNAME).map(|ifs| list_contains(ifs, port)))
                    .unwrap_or(false);
                if through_port {
                    deps.insert(if is_static {
                        Dependency::StaticRoute { prefix }
                    } else {
                        Dependency::Route { prefix }
                    });
                }
            }
        }

        Ok(deps)
    }

    /// True when nothing references `port`.
    pub async fn can_remove(&self, port: &str) -> DpbResult<bool> {
        Ok(self.dependencies_of(port).await?.is_empty())
    }

    /// Removes every resource bound to `port` and returns what was removed.
    ///
    /// Fails with [`DpbError::UnresolvedDependency`] before touching
    /// anything if one of the resources cannot be cleared. Clearing a port
    /// with no dependencies is a no-op.
    #[instrument(skip(self), fields(port = %port))]
    pub async fn force_clear(&self, port: &str) -> DpbResult<Vec<Dependency>> {
        let deps = self.dependencies_of(port).await?;
        if let Some(dep) = deps.iter().find(|d| !d.is_force_clearable()) {
            return Err(DpbError::UnresolvedDependency {
                port: port.to_string(),
                dependency: dep.clone(),
            });
        }

        let mut ordered: Vec<Dependency> = deps.into_iter().collect();
        ordered.sort_by(Dependency::clear_order);

        for dep in &ordered {
            self.clear(port, dep).await?;
        }
        if !ordered.is_empty() {
            info!("Cleared {} dependencies of {}", ordered.len(), port);
        }
        Ok(ordered)
    }

    /// Removes the neighbor entries learned on `port` and returns their count.
    pub async fn flush_neighbors(&self, port: &str) -> DpbResult<usize> {
        let store = self.store.as_ref();
        let prefix = format!("{}:", port);
        let mut flushed = 0;
        for key in store.keys(&tables::app_neigh()).await? {
            if key.starts_with(&prefix) {
                store.del(&tables::app_neigh(), &key).await?;
                flushed += 1;
            }
        }
        if flushed > 0 {
            info!("Flushed {} neighbors of {}", flushed, port);
        }
        Ok(flushed)
    }

    async fn clear(&self, port: &str, dep: &Dependency) -> DpbResult<()> {
        debug!("Clearing {} of {}", dep, port);
        let store = self.store.as_ref();
        match dep {
            Dependency::VlanMember { vlan } => {
                store
                    .del(&tables::cfg_vlan_member(), &format!("{}|{}", vlan, port))
                    .await?
            }
            Dependency::AclTableBinding { table } => self.unbind_acl(table, port).await?,
            Dependency::RouterInterface { key } => store.del(&tables::cfg_interface(), key).await?,
            Dependency::Neighbor { ip } => {
                store
                    .del(&tables::app_neigh(), &format!("{}:{}", port, ip))
                    .await?
            }
            Dependency::Route { prefix } => self.unroute(&tables::app_route(), prefix, port).await?,
            Dependency::StaticRoute { prefix } => {
                return Err(DpbError::UnresolvedDependency {
                    port: port.to_string(),
                    dependency: Dependency::StaticRoute {
                        prefix: prefix.clone(),
                    },
                })
            }
        }
        Ok(())
    }

    /// Drops `port` from the port list of ACL `table`.
    async fn unbind_acl(&self, table: &str, port: &str) -> DpbResult<()> {
        let acl = tables::cfg_acl_table();
        let Some(fvs) = self.store.get(&acl, table).await? else {
            return Ok(());
        };
        let field = acl_ports_field(&fvs);
        let remaining: Vec<&str> = fvs
            .get_field_or(field, "")
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty() && *p != port)
            .collect();
        self.store
            .set(&acl, table, &[(field.to_string(), remaining.join(","))])
            .await?;
        Ok(())
    }

    /// Removes `port` from the next hops of a route, deleting the route
    /// when it was the last one.
    async fn unroute(&self, table: &TableId, prefix: &str, port: &str) -> DpbResult<()> {
        let Some(fvs) = self.store.get(table, prefix).await? else {
            return Ok(());
        };
        let ifnames: Vec<&str> = fvs.get_field_or(fields::IFNAME, "").split(',').map(str::trim).collect();
        let nexthops: Vec<&str> = fvs.get_field_or("nexthop", "").split(',').map(str::trim).collect();

        let keep: Vec<usize> = (0..ifnames.len()).filter(|i| ifnames[*i] != port).collect();
        if keep.is_empty() {
            self.store.del(table, prefix).await?;
            return Ok(());
        }

        let pick = |list: &[&str]| -> String {
            keep.iter()
                .filter_map(|i| list.get(*i).copied())
                .collect::<Vec<_>>()
                .join(",")
        };
        let mut update = vec![(fields::IFNAME.to_string(), pick(ifnames.as_slice()))];
        if nexthops.len() == ifnames.len() {
            update.push(("nexthop".to_string(), pick(nexthops.as_slice())));
        }
        self.store.set(table, prefix, &update).await?;
        Ok(())
    }

    /// Attaches `port` to the VLANs and ACL tables of its default bindings.
    ///
    /// ACL tables that do not exist are skipped. Returns what was bound.
    #[instrument(skip(self, defaults), fields(port = %port))]
    pub async fn bind_defaults(&self, port: &str, defaults: &PortDefaults) -> DpbResult<Vec<Dependency>> {
        let mut bound = Vec::new();

        for binding in &defaults.vlans {
            if !self.store.exists(&tables::cfg_vlan(), &binding.vlan).await? {
                warn!("VLAN {} does not exist, not binding {}", binding.vlan, port);
                continue;
            }
            self.store
                .set(
                    &tables::cfg_vlan_member(),
                    &format!("{}|{}", binding.vlan, port),
                    &[(fields::TAGGING_MODE.to_string(), binding.tagging_mode.clone())],
                )
                .await?;
            bound.push(Dependency::VlanMember {
                vlan: binding.vlan.clone(),
            });
        }

        let acl = tables::cfg_acl_table();
        for table in &defaults.acl_tables {
            let Some(fvs) = self.store.get(&acl, table).await? else {
                warn!("ACL table {} does not exist, not binding {}", table, port);
                continue;
            };
            let field = acl_ports_field(&fvs);
            let mut ports: Vec<&str> = fvs
                .get_field_or(field, "")
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect();
            if !ports.contains(&port) {
                ports.push(port);
                self.store
                    .set(&acl, table, &[(field.to_string(), ports.join(","))])
                    .await?;
            }
            bound.push(Dependency::AclTableBinding { table: table.clone() });
        }

        if !bound.is_empty() {
            info!("Bound {} to {} default resources", port, bound.len());
        }
        Ok(bound)
    }
}

/// Port list field of an ACL table record; `ports` wins when both are set.
fn acl_ports_field(fvs: &[FieldValue]) -> &'static str {
    if !fvs.has_field(fields::PORTS) && fvs.has_field(fields::PORTS_LIST) {
        fields::PORTS_LIST
    } else {
        fields::PORTS
    }
}
