//! Breakout mode names and their lane partitions.
//!
//! A mode is one or more `+`-joined segments of the form
//! `<count>x<speed>G[<alt>G,...](<lanes>)`, where the alternate speeds and
//! the lane count are optional:
//!
//! | Mode                 | Lanes of a 4-lane group |
//! |----------------------|-------------------------|
//! | `1x100G[40G]`        | 4                       |
//! | `2x50G`              | 2, 2                    |
//! | `4x25G[10G]`         | 1, 1, 1, 1              |
//! | `2x25G(2)+1x50G(2)`  | 1, 1, 2                 |
//! | `1x50G(2)+2x25G(2)`  | 2, 1, 1                 |

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

static SEGMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+)x(\d+)G(?:\[(\d+G(?:,\d+G)*)\])?(?:\((\d+)\))?$").expect("Invalid regex pattern")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeSegment {
    /// Number of ports created by this segment.
    pub count: usize,
    /// Port speed in Gbps.
    pub speed_gbps: u32,
    pub alt_speeds_gbps: Vec<u32>,
    /// Lanes consumed by the whole segment, when stated.
    pub lanes: Option<usize>,
}

/// A parsed breakout mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakoutMode {
    name: String,
    segments: Vec<ModeSegment>,
}

impl BreakoutMode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn segments(&self) -> &[ModeSegment] {
        &self.segments
    }

    /// Number of ports the mode creates.
    pub fn port_count(&self) -> usize {
        self.segments.iter().map(|s| s.count).sum()
    }

    /// Lanes owned by each created port, in port order, for a group of
    /// `total_lanes` lanes.
    pub fn lane_partition(&self, total_lanes: usize) -> Result<Vec<usize>, String> {
        if let [segment] = self.segments.as_slice() {
            if segment.lanes.is_none() {
                if total_lanes % segment.count != 0 {
                    return Err(format!(
                        "{} lanes cannot be split into {} equal ports",
                        total_lanes, segment.count
                    ));
                }
                return Ok(vec![total_lanes / segment.count; segment.count]);
            }
        }

        let mut partition = Vec::with_capacity(self.port_count());
        let mut used = 0;
        for segment in &self.segments {
            let lanes = segment
                .lanes
                .ok_or_else(|| "every segment of a mixed mode needs a lane count".to_string())?;
            if lanes % segment.count != 0 {
                return Err(format!(
                    "segment {}x{}G cannot split {} lanes evenly",
                    segment.count, segment.speed_gbps, lanes
                ));
            }
            used = lanes
                .checked_add(used)
                .filter(|u| *u <= total_lanes)
                .ok_or_else(|| format!("mode uses more lanes than the group's {}", total_lanes))?;
            partition.extend(std::iter::repeat(lanes / segment.count).take(segment.count));
        }
        if used != total_lanes {
            return Err(format!("mode uses {} lanes but the group has {}", used, total_lanes));
        }
        Ok(partition)
    }
}

impl FromStr for BreakoutMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments = s
            .split('+')
            .map(parse_segment)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: s.to_string(),
            segments,
        })
    }
}

impl fmt::Display for BreakoutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

fn number<T: FromStr>(caps: &regex::Captures<'_>, i: usize, segment: &str) -> Result<T, String> {
    caps.get(i)
        .map(|m| m.as_str())
        .unwrap_or_default()
        .parse()
        .map_err(|_| format!("number out of range in '{}'", segment))
}

fn parse_segment(segment: &str) -> Result<ModeSegment, String> {
    let caps = SEGMENT_RE
        .captures(segment.trim())
        .ok_or_else(|| format!("malformed mode segment '{}'", segment))?;

    let count: usize = number(&caps, 1, segment)?;
    if count == 0 {
        return Err(format!("segment '{}' creates no ports", segment));
    }
    let speed_gbps: u32 = number(&caps, 2, segment)?;
    let alt_speeds_gbps = match caps.get(3) {
        Some(alts) => alts
            .as_str()
            .split(',')
            .map(|a| a.trim_end_matches('G').parse::<u32>())
            .collect::<Result<_, _>>()
            .map_err(|_| format!("invalid alternate speed in '{}'", segment))?,
        None => Vec::new(),
    };
    let lanes = match caps.get(4) {
        Some(_) => {
            let lanes: usize = number(&caps, 4, segment)?;
            if lanes < count {
                return Err(format!("segment '{}' has fewer lanes than ports", segment));
            }
            Some(lanes)
        }
        None => None,
    };

    Ok(ModeSegment {
        count,
        speed_gbps,
        alt_speeds_gbps,
        lanes,
    })
}
