//! Platform catalog, defaults template and engine settings.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::info;

use sonic_cfgmgr_common::defaults;

use crate::error::{DpbError, DpbResult};
use crate::mode::BreakoutMode;
use crate::planner::BreakoutPlanner;
use crate::record::{parse_lanes, AdminStatus, PortRecord};

fn load_json<T: DeserializeOwned>(path: &Path) -> DpbResult<T> {
    let file = File::open(path)
        .map_err(|e| DpbError::config(format!("Failed to open {}: {}", path.display(), e)))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| DpbError::config(format!("Failed to parse JSON from {}: {}", path.display(), e)))
}

/// Number written either as JSON number or string (`"1,1,1,1"` lists
/// take their first element).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Number(u32),
    Text(String),
}

impl Scalar {
    fn to_u32(&self, what: &str) -> DpbResult<u32> {
        match self {
            Scalar::Number(n) => Ok(*n),
            Scalar::Text(s) => s
                .split(',')
                .next()
                .unwrap_or_default()
                .trim()
                .parse()
                .map_err(|_| DpbError::config(format!("{} is not a number: '{}'", what, s))),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ModeList {
    Names(Vec<String>),
    /// `platform.json` style: mode name to child aliases.
    Aliases(BTreeMap<String, serde_json::Value>),
}

impl ModeList {
    fn into_names(self) -> Vec<String> {
        match self {
            ModeList::Names(names) => names,
            ModeList::Aliases(map) => map.into_keys().collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GroupSpec {
    index: Scalar,
    lanes: String,
    alias: Option<String>,
    speed: Option<u32>,
    breakout_modes: ModeList,
    default_brkout_mode: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    Wrapped { interfaces: BTreeMap<String, GroupSpec> },
    Bare(BTreeMap<String, GroupSpec>),
}

/// One root port and the lanes it can be broken out over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakoutGroup {
    pub root: String,
    pub index: u32,
    pub alias: String,
    pub lanes: Vec<u32>,
    /// Speed of the unbroken port.
    pub speed: u32,
    pub modes: Vec<String>,
    pub default_mode: String,
}

impl BreakoutGroup {
    fn from_spec(root: String, spec: GroupSpec) -> DpbResult<Self> {
        let invalid = |msg: String| DpbError::config(format!("port {}: {}", root, msg));

        let index = spec.index.to_u32("index")?;
        let lanes = parse_lanes(&spec.lanes).map_err(invalid)?;
        let modes = spec.breakout_modes.into_names();
        if !modes.contains(&spec.default_brkout_mode) {
            return Err(invalid(format!(
                "default mode {} is not among {:?}",
                spec.default_brkout_mode, modes
            )));
        }
        for name in &modes {
            let mode: BreakoutMode = name.parse().map_err(invalid)?;
            mode.lane_partition(lanes.len())
                .map_err(|e| invalid(format!("mode {}: {}", name, e)))?;
        }

        let speed = match spec.speed {
            Some(speed) => speed,
            None => {
                let mode: BreakoutMode = spec.default_brkout_mode.parse().map_err(invalid)?;
                mode.segments()
                    .iter()
                    .try_fold(0u32, |total, s| {
                        u32::try_from(s.count)
                            .ok()
                            .and_then(|count| count.checked_mul(s.speed_gbps))
                            .and_then(|gbps| gbps.checked_mul(1000))
                            .and_then(|speed| total.checked_add(speed))
                    })
                    .ok_or_else(|| invalid(format!("speed of mode {} is out of range", mode)))?
            }
        };

        Ok(Self {
            alias: spec.alias.unwrap_or_else(|| index.to_string()),
            root,
            index,
            lanes,
            speed,
            modes,
            default_mode: spec.default_brkout_mode,
        })
    }

    /// Parses `name` if this group supports it.
    pub fn mode(&self, name: &str) -> DpbResult<BreakoutMode> {
        if !self.modes.iter().any(|m| m == name) {
            return Err(DpbError::invalid_mode(
                &self.root,
                name,
                format!("supported modes are {}", self.modes.join(", ")),
            ));
        }
        name.parse()
            .map_err(|e| DpbError::invalid_mode(&self.root, name, e))
    }

    /// The unbroken port owning every lane of the group.
    pub fn parent_record(&self) -> PortRecord {
        PortRecord::new(&self.root, &self.alias, self.lanes.clone(), self.speed, self.index)
    }

    /// Ports the group consists of in mode `name`.
    pub fn ports_for(&self, name: &str) -> DpbResult<Vec<PortRecord>> {
        let mode = self.mode(name)?;
        BreakoutPlanner::new().split_mode(&self.parent_record(), &mode)
    }

    fn owns_port_name(&self, name: &str) -> bool {
        let (Some((root_prefix, root_number)), Some((prefix, number))) = (
            crate::record::split_port_name(&self.root),
            crate::record::split_port_name(name),
        ) else {
            return false;
        };
        prefix == root_prefix && number >= root_number && ((number - root_number) as usize) < self.lanes.len()
    }
}

/// Breakout groups of the platform, keyed by root port name.
#[derive(Debug, Clone, Default)]
pub struct PlatformCatalog {
    groups: BTreeMap<String, BreakoutGroup>,
}

impl PlatformCatalog {
    /// Loads a catalog in `platform.json` form:
    ///
    /// ```json
    /// {
    ///   "interfaces": {
    ///     "Ethernet0": {
    ///       "index": "0,0,0,0",
    ///       "lanes": "0,1,2,3",
    ///       "alias": "Eth0",
    ///       "breakout_modes": ["1x100G[40G]", "2x50G", "4x25G[10G]"],
    ///       "default_brkout_mode": "1x100G[40G]"
    ///     }
    ///   }
    /// }
    /// ```
    ///
    /// The `interfaces` wrapper is optional.
    pub fn load(path: impl AsRef<Path>) -> DpbResult<Self> {
        let path = path.as_ref();
        let catalog = Self::from_file(load_json(path)?)?;
        info!("Loaded {} breakout groups from {}", catalog.groups.len(), path.display());
        Ok(catalog)
    }

    pub fn from_json_str(json: &str) -> DpbResult<Self> {
        let file = serde_json::from_str(json)
            .map_err(|e| DpbError::config(format!("Failed to parse platform catalog: {}", e)))?;
        Self::from_file(file)
    }

    fn from_file(file: CatalogFile) -> DpbResult<Self> {
        let specs = match file {
            CatalogFile::Wrapped { interfaces } => interfaces,
            CatalogFile::Bare(specs) => specs,
        };

        let mut groups = BTreeMap::new();
        let mut owned: BTreeMap<u32, String> = BTreeMap::new();
        for (root, spec) in specs {
            let group = BreakoutGroup::from_spec(root.clone(), spec)?;
            for lane in &group.lanes {
                if let Some(other) = owned.insert(*lane, root.clone()) {
                    return Err(DpbError::config(format!(
                        "lane {} belongs to both {} and {}",
                        lane, other, root
                    )));
                }
            }
            groups.insert(root, group);
        }
        Ok(Self { groups })
    }

    pub fn group(&self, root: &str) -> Option<&BreakoutGroup> {
        self.groups.get(root)
    }

    /// Group a root or child port name belongs to.
    pub fn group_of_port(&self, name: &str) -> Option<&BreakoutGroup> {
        self.group(name)
            .or_else(|| self.groups.values().find(|g| g.owns_port_name(name)))
    }

    pub fn groups(&self) -> impl Iterator<Item = &BreakoutGroup> {
        self.groups.values()
    }

    /// Every port of every group in its default mode.
    pub fn default_ports(&self) -> DpbResult<Vec<PortRecord>> {
        let mut ports = Vec::new();
        for group in self.groups.values() {
            ports.extend(group.ports_for(&group.default_mode)?);
        }
        Ok(ports)
    }
}

fn default_tagging_mode() -> String {
    "untagged".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VlanBinding {
    pub vlan: String,
    #[serde(default = "default_tagging_mode")]
    pub tagging_mode: String,
}

/// Bindings restored on a port created with load-defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PortDefaults {
    #[serde(default)]
    pub vlans: Vec<VlanBinding>,
    #[serde(default)]
    pub acl_tables: Vec<String>,
}

/// Default bindings keyed by port name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct DefaultsTemplate(BTreeMap<String, PortDefaults>);

impl DefaultsTemplate {
    pub fn load(path: impl AsRef<Path>) -> DpbResult<Self> {
        let path = path.as_ref();
        let template: Self = load_json(path)?;
        info!("Loaded default bindings for {} ports from {}", template.0.len(), path.display());
        Ok(template)
    }

    pub fn from_json_str(json: &str) -> DpbResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| DpbError::config(format!("Failed to parse defaults template: {}", e)))
    }

    pub fn get(&self, port: &str) -> Option<&PortDefaults> {
        self.0.get(port)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Engine tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long a breakout waits for each stage to converge.
    pub convergence_timeout: Duration,
    pub default_mtu: u32,
    pub default_admin_status: AdminStatus,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            convergence_timeout: Duration::from_secs(10),
            default_mtu: defaults::DEFAULT_MTU,
            default_admin_status: AdminStatus::Down,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const CATALOG: &str = r#"{
        "interfaces": {
            "Ethernet0": {
                "index": "0,0,0,0",
                "lanes": "0,1,2,3",
                "alias": "Eth0",
                "breakout_modes": {
                    "1x100G[40G]": ["Eth0"],
                    "2x50G": ["Eth0/0", "Eth0/2"],
                    "4x25G[10G]": ["Eth0/0", "Eth0/1", "Eth0/2", "Eth0/3"],
                    "2x25G(2)+1x50G(2)": ["Eth0/0", "Eth0/1", "Eth0/2"]
                },
                "default_brkout_mode": "1x100G[40G]"
            },
            "Ethernet4": {
                "index": 1,
                "lanes": "4,5,6,7",
                "speed": 40000,
                "breakout_modes": ["1x40G", "4x10G"],
                "default_brkout_mode": "4x10G"
            }
        }
    }"#;

    #[test]
    fn test_catalog_parses_both_mode_forms() {
        let catalog = PlatformCatalog::from_json_str(CATALOG).unwrap();

        let eth0 = catalog.group("Ethernet0").unwrap();
        assert_eq!(eth0.index, 0);
        assert_eq!(eth0.speed, 100000);
        assert_eq!(eth0.modes.len(), 4);
        assert_eq!(
            eth0.parent_record(),
            PortRecord::new("Ethernet0", "Eth0", vec![0, 1, 2, 3], 100000, 0)
        );

        let eth4 = catalog.group("Ethernet4").unwrap();
        assert_eq!(eth4.alias, "1");
        assert_eq!(eth4.modes, vec!["1x40G".to_string(), "4x10G".to_string()]);
        assert_eq!(eth4.ports_for("4x10G").unwrap().len(), 4);
    }

    #[test]
    fn test_group_of_child_port() {
        let catalog = PlatformCatalog::from_json_str(CATALOG).unwrap();
        assert_eq!(catalog.group_of_port("Ethernet2").unwrap().root, "Ethernet0");
        assert_eq!(catalog.group_of_port("Ethernet7").unwrap().root, "Ethernet4");
        assert!(catalog.group_of_port("Ethernet8").is_none());
    }

    #[test]
    fn test_unsupported_mode() {
        let catalog = PlatformCatalog::from_json_str(CATALOG).unwrap();
        let err = catalog.group("Ethernet4").unwrap().mode("2x20G").unwrap_err();
        assert!(matches!(err, DpbError::InvalidMode { .. }));
    }

    #[test]
    fn test_default_ports() {
        let catalog = PlatformCatalog::from_json_str(CATALOG).unwrap();
        let names: Vec<String> = catalog.default_ports().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Ethernet0", "Ethernet4", "Ethernet5", "Ethernet6", "Ethernet7"]);
    }

    #[test]
    fn test_catalog_rejects_bad_groups() {
        let overlap = r#"{
            "Ethernet0": {"index": 0, "lanes": "0,1", "breakout_modes": ["1x50G"], "default_brkout_mode": "1x50G"},
            "Ethernet1": {"index": 1, "lanes": "1,2", "breakout_modes": ["1x50G"], "default_brkout_mode": "1x50G"}
        }"#;
        assert!(matches!(PlatformCatalog::from_json_str(overlap), Err(DpbError::Config(_))));

        let bad_default = r#"{
            "Ethernet0": {"index": 0, "lanes": "0,1", "breakout_modes": ["1x50G"], "default_brkout_mode": "2x25G"}
        }"#;
        assert!(PlatformCatalog::from_json_str(bad_default).is_err());

        let unpartitionable = r#"{
            "Ethernet0": {"index": 0, "lanes": "0,1", "breakout_modes": ["1x50G", "4x10G"], "default_brkout_mode": "1x50G"}
        }"#;
        assert!(PlatformCatalog::from_json_str(unpartitionable).is_err());
    }

    #[test]
    fn test_derived_speed_out_of_range() {
        let huge = r#"{
            "Ethernet0": {"index": 0, "lanes": "0,1", "breakout_modes": ["2x4000000G"], "default_brkout_mode": "2x4000000G"}
        }"#;
        assert!(matches!(PlatformCatalog::from_json_str(huge), Err(DpbError::Config(_))));
    }

    #[test]
    fn test_load_catalog_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CATALOG.as_bytes()).unwrap();

        let catalog = PlatformCatalog::load(file.path()).unwrap();
        assert_eq!(catalog.groups().count(), 2);

        assert!(matches!(
            PlatformCatalog::load("/nonexistent/platform.json"),
            Err(DpbError::Config(_))
        ));
    }

    #[test]
    fn test_defaults_template() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "Ethernet0": {{"vlans": [{{"vlan": "Vlan100"}}], "acl_tables": ["DATAACL"]}},
                "Ethernet1": {{"vlans": [{{"vlan": "Vlan200", "tagging_mode": "tagged"}}]}}
            }}"#
        )
        .unwrap();

        let template = DefaultsTemplate::load(file.path()).unwrap();
        assert_eq!(
            template.get("Ethernet0"),
            Some(&PortDefaults {
                vlans: vec![VlanBinding {
                    vlan: "Vlan100".to_string(),
                    tagging_mode: "untagged".to_string(),
                }],
                acl_tables: vec!["DATAACL".to_string()],
            })
        );
        assert_eq!(template.get("Ethernet1").unwrap().vlans[0].tagging_mode, "tagged");
        assert!(template.get("Ethernet1").unwrap().acl_tables.is_empty());
        assert!(template.get("Ethernet2").is_none());
    }

    #[test]
    fn test_engine_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.default_mtu, 9100);
        assert_eq!(config.default_admin_status, AdminStatus::Down);
        assert_eq!(config.convergence_timeout, Duration::from_secs(10));
    }
}
