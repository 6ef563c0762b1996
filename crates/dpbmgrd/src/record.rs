//! Port record data model and its store encodings.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

use sonic_cfgmgr_common::{defaults, field_values, FieldValue, FieldValues, FieldValuesExt};

use crate::error::{DpbError, DpbResult};
use crate::tables::fields;

/// Hardware MTU = configured MTU + L2 header overhead.
pub const MTU_HW_OFFSET: u32 = 22;

static PORT_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*?)(\d+)$").expect("Invalid regex pattern"));

/// Splits `Ethernet12` into `("Ethernet", 12)`.
pub fn split_port_name(name: &str) -> Option<(&str, u32)> {
    let caps = PORT_NUMBER_RE.captures(name)?;
    let prefix = caps.get(1)?.as_str();
    let number = caps.get(2)?.as_str().parse().ok()?;
    Some((prefix, number))
}

/// Decodes a lane list such as `"0,1,2,3"` (whitespace tolerated).
///
/// Lanes are returned ascending; empty lists, duplicates and
/// non-integers are rejected.
pub fn parse_lanes(value: &str) -> Result<Vec<u32>, String> {
    let mut lanes = BTreeSet::new();
    for part in value.split(',') {
        let part = part.trim();
        let lane: u32 = part
            .parse()
            .map_err(|_| format!("invalid lane '{}' in '{}'", part, value))?;
        if !lanes.insert(lane) {
            return Err(format!("duplicate lane {} in '{}'", lane, value));
        }
    }
    if lanes.is_empty() {
        return Err("empty lane list".to_string());
    }
    Ok(lanes.into_iter().collect())
}

pub fn format_lanes(lanes: &[u32]) -> String {
    lanes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Decodes the hardware lane encoding `"<count>:<l0>,<l1>,..."`.
pub fn parse_hardware_lanes(value: &str) -> Result<Vec<u32>, String> {
    let (count, lanes) = value
        .split_once(':')
        .ok_or_else(|| format!("missing lane count in '{}'", value))?;
    let lanes = parse_lanes(lanes)?;
    if count.trim().parse::<usize>().ok() != Some(lanes.len()) {
        return Err(format!("lane count mismatch in '{}'", value));
    }
    Ok(lanes)
}

/// Port administrative state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdminStatus {
    Up,
    Down,
}

impl AdminStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminStatus::Up => "up",
            AdminStatus::Down => "down",
        }
    }

    /// Hardware encoding.
    pub fn as_hardware_str(&self) -> &'static str {
        match self {
            AdminStatus::Up => "true",
            AdminStatus::Down => "false",
        }
    }
}

impl FromStr for AdminStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(AdminStatus::Up),
            "down" => Ok(AdminStatus::Down),
            other => Err(format!("invalid admin status '{}'", other)),
        }
    }
}

impl fmt::Display for AdminStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One port's identity and attributes.
///
/// `mtu` and `admin_status` are `None` until configured explicitly; the
/// Application and Hardware stages see them defaulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRecord {
    pub name: String,
    pub alias: String,
    /// Ascending, never empty.
    pub lanes: Vec<u32>,
    pub speed: u32,
    /// Breakout group index, shared by siblings.
    pub index: u32,
    pub admin_status: Option<AdminStatus>,
    pub mtu: Option<u32>,
}

impl PortRecord {
    pub fn new(
        name: impl Into<String>,
        alias: impl Into<String>,
        lanes: Vec<u32>,
        speed: u32,
        index: u32,
    ) -> Self {
        Self {
            name: name.into(),
            alias: alias.into(),
            lanes,
            speed,
            index,
            admin_status: None,
            mtu: None,
        }
    }

    pub fn with_mtu(mut self, mtu: u32) -> Self {
        self.mtu = Some(mtu);
        self
    }

    pub fn with_admin_status(mut self, status: AdminStatus) -> Self {
        self.admin_status = Some(status);
        self
    }

    /// Copy with unset mtu/admin status filled from the given defaults.
    pub fn with_defaults(&self, mtu: u32, admin_status: AdminStatus) -> Self {
        let mut record = self.clone();
        record.mtu.get_or_insert(mtu);
        record.admin_status.get_or_insert(admin_status);
        record
    }

    /// Decodes a CONFIG_DB PORT entry.
    ///
    /// alias, lanes, speed and index are mandatory.
    pub fn from_config(name: &str, fvs: &[FieldValue]) -> DpbResult<Self> {
        let missing: Vec<&str> = [fields::ALIAS, fields::LANES, fields::SPEED, fields::INDEX]
            .into_iter()
            .filter(|f| !fvs.has_field(f))
            .collect();
        if !missing.is_empty() {
            return Err(DpbError::validation(
                name,
                format!("missing fields: {}", missing.join(", ")),
            ));
        }

        let invalid = |field: &str, msg: String| DpbError::validation(name, format!("{}: {}", field, msg));
        let number = |field: &str| -> DpbResult<u32> {
            let value = fvs.get_field_or(field, "");
            value
                .trim()
                .parse()
                .map_err(|_| invalid(field, format!("not a number: '{}'", value)))
        };

        let lanes = parse_lanes(fvs.get_field_or(fields::LANES, "")).map_err(|e| invalid(fields::LANES, e))?;
        let speed = number(fields::SPEED)?;
        let index = number(fields::INDEX)?;
        let mtu = match fvs.get_field(fields::MTU) {
            Some(_) => Some(number(fields::MTU)?),
            None => None,
        };
        let admin_status = fvs
            .get_field(fields::ADMIN_STATUS)
            .map(str::parse)
            .transpose()
            .map_err(|e| invalid(fields::ADMIN_STATUS, e))?;

        Ok(Self {
            name: name.to_string(),
            alias: fvs.get_field_or(fields::ALIAS, "").to_string(),
            lanes,
            speed,
            index,
            admin_status,
            mtu,
        })
    }

    /// CONFIG_DB encoding; unset mtu/admin status are omitted.
    pub fn to_config_fields(&self) -> FieldValues {
        let mut fvs: FieldValues = field_values! {
            fields::ALIAS => self.alias,
            fields::LANES => format_lanes(&self.lanes),
            fields::SPEED => self.speed,
            fields::INDEX => self.index,
        };
        if let Some(status) = self.admin_status {
            fvs.push((fields::ADMIN_STATUS.to_string(), status.to_string()));
        }
        if let Some(mtu) = self.mtu {
            fvs.push((fields::MTU.to_string(), mtu.to_string()));
        }
        fvs
    }

    /// APPL_DB encoding: config fields with mtu/admin status defaulted.
    pub fn to_app_fields(&self, default_mtu: u32, default_admin: AdminStatus) -> FieldValues {
        self.with_defaults(default_mtu, default_admin).to_config_fields()
    }

    /// ASIC_DB encoding of the port object `oid`.
    pub fn to_hardware_fields(&self, oid: &str) -> FieldValues {
        let mtu = self.mtu.unwrap_or(defaults::DEFAULT_MTU);
        let admin = self.admin_status.unwrap_or(AdminStatus::Down);
        field_values! {
            fields::OID => oid,
            fields::LANES => format!("{}:{}", self.lanes.len(), format_lanes(&self.lanes)),
            fields::SPEED => self.speed,
            fields::MTU => mtu_to_hardware(mtu),
            fields::ADMIN_STATE => admin.as_hardware_str(),
        }
    }

    /// Numeric suffix of the name (`Ethernet12` -> 12).
    pub fn port_number(&self) -> DpbResult<u32> {
        split_port_name(&self.name)
            .map(|(_, n)| n)
            .ok_or_else(|| DpbError::validation(&self.name, "name has no numeric suffix"))
    }

    /// Alias with its sibling suffix trimmed (`Eth0/1` -> `Eth0`).
    pub fn alias_root(&self) -> &str {
        match self.alias.rsplit_once('/') {
            Some((root, _)) => root,
            None => &self.alias,
        }
    }

    /// Identity used to decide whether a breakout touches this port.
    pub fn same_shape(&self, other: &PortRecord) -> bool {
        self.name == other.name && self.lanes == other.lanes && self.speed == other.speed
    }

    pub fn shares_lanes_with(&self, other: &PortRecord) -> bool {
        self.lanes.iter().any(|l| other.lanes.contains(l))
    }
}

pub fn mtu_to_hardware(mtu: u32) -> u32 {
    mtu + MTU_HW_OFFSET
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fv(f: &str, v: &str) -> FieldValue {
        (f.to_string(), v.to_string())
    }

    #[test]
    fn test_split_port_name() {
        assert_eq!(split_port_name("Ethernet12"), Some(("Ethernet", 12)));
        assert_eq!(split_port_name("Eth1/2/3"), Some(("Eth1/2/", 3)));
        assert_eq!(split_port_name("Ethernet"), None);
    }

    #[test]
    fn test_parse_lanes() {
        assert_eq!(parse_lanes("3, 1,2 ,0"), Ok(vec![0, 1, 2, 3]));
        assert!(parse_lanes("").is_err());
        assert!(parse_lanes("0,,1").is_err());
        assert!(parse_lanes("0,1,1").unwrap_err().contains("duplicate"));
        assert!(parse_lanes("0,x").is_err());
    }

    #[test]
    fn test_parse_hardware_lanes() {
        assert_eq!(parse_hardware_lanes("4:0,1,2,3"), Ok(vec![0, 1, 2, 3]));
        assert!(parse_hardware_lanes("0,1").is_err());
        assert!(parse_hardware_lanes("3:0,1").is_err());
    }

    #[test]
    fn test_from_config_complete() {
        let record = PortRecord::from_config(
            "Ethernet0",
            &[
                fv("alias", "Eth0"),
                fv("lanes", "0,1,2,3"),
                fv("speed", "100000"),
                fv("index", "0"),
                fv("mtu", "1500"),
                fv("admin_status", "up"),
            ],
        )
        .unwrap();

        assert_eq!(
            record,
            PortRecord::new("Ethernet0", "Eth0", vec![0, 1, 2, 3], 100000, 0)
                .with_mtu(1500)
                .with_admin_status(AdminStatus::Up)
        );
    }

    #[test]
    fn test_from_config_reports_missing_fields() {
        let err = PortRecord::from_config("Ethernet0", &[fv("lanes", "0"), fv("speed", "25000")]).unwrap_err();
        assert_eq!(err.to_string(), "Invalid port 'Ethernet0': missing fields: alias, index");

        let err = PortRecord::from_config(
            "Ethernet0",
            &[fv("alias", "Eth0"), fv("lanes", "0"), fv("speed", "fast"), fv("index", "0")],
        )
        .unwrap_err();
        assert!(matches!(err, DpbError::Validation { .. }));
    }

    #[test]
    fn test_config_encoding_omits_unset_attributes() {
        let record = PortRecord::new("Ethernet2", "0/2", vec![2], 25000, 0);
        assert_eq!(
            record.to_config_fields(),
            vec![
                fv("alias", "0/2"),
                fv("lanes", "2"),
                fv("speed", "25000"),
                fv("index", "0"),
            ]
        );
        assert_eq!(PortRecord::from_config("Ethernet2", &record.to_config_fields()).unwrap(), record);
    }

    #[test]
    fn test_app_fields_default_mtu_and_admin() {
        let record = PortRecord::new("Ethernet0", "Eth0", vec![0, 1], 50000, 0);
        let fvs = record.to_app_fields(9100, AdminStatus::Down);
        assert_eq!(fvs.get_field("mtu"), Some("9100"));
        assert_eq!(fvs.get_field("admin_status"), Some("down"));
    }

    #[test]
    fn test_hardware_transform() {
        let record = PortRecord::new("Ethernet0", "Eth0", vec![0, 1, 2, 3], 100000, 0);
        assert_eq!(
            record.to_hardware_fields("oid:0x1000000000001"),
            vec![
                fv("oid", "oid:0x1000000000001"),
                fv("lanes", "4:0,1,2,3"),
                fv("speed", "100000"),
                fv("mtu", "9122"),
                fv("admin_state", "false"),
            ]
        );

        let record = record.with_mtu(1500).with_admin_status(AdminStatus::Up);
        let fvs = record.to_hardware_fields("oid:0x2");
        assert_eq!(fvs.get_field("mtu"), Some("1522"));
        assert_eq!(fvs.get_field("admin_state"), Some("true"));
    }

    #[test]
    fn test_alias_root() {
        let child = PortRecord::new("Ethernet1", "Eth0/1", vec![1], 25000, 0);
        assert_eq!(child.alias_root(), "Eth0");
        let parent = PortRecord::new("Ethernet0", "Eth0", vec![0], 25000, 0);
        assert_eq!(parent.alias_root(), "Eth0");
    }
}
