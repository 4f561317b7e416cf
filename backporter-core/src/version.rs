use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::pull_request::Milestone;

/// A major.minor release line still receiving backports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MaintenanceLine {
    /// e.g. "1.19"
    pub major_minor: String,
    /// Number of the earliest patch milestone of this line
    pub milestone_id: u64,
}

impl MaintenanceLine {
    /// Name of the upstream branch this line is maintained on
    pub fn release_branch(&self) -> String {
        release_branch(&self.major_minor)
    }
}

pub fn release_branch(major_minor: &str) -> String {
    format!("release/v{}", major_minor)
}

/// Parse a milestone title such as `1.19.2` or `v1.20.0-rc1`.
pub fn parse_milestone_version(title: &str) -> Option<Version> {
    let trimmed = title.trim();
    let bare = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(bare).ok()
}

/// Derive the active maintenance lines from open milestones.
///
/// Titles that are not semantic versions are ignored. Milestones are grouped
/// by major.minor and each group is represented by its smallest version,
/// so `1.19.0`, `1.19.1` and `1.19.2` collapse to a single `1.19` line
/// pointing at the `1.19.0` milestone. Two milestones with identical
/// versions keep the first one seen.
pub fn resolve_active_lines(milestones: &[Milestone]) -> Vec<MaintenanceLine> {
    let mut earliest: BTreeMap<(u64, u64), (Version, &Milestone)> = BTreeMap::new();

    for milestone in milestones {
        let Some(version) = parse_milestone_version(&milestone.title) else {
            continue;
        };
        let key = (version.major, version.minor);

        let replace = match earliest.get(&key) {
            None => true,
            Some((current, kept)) => {
                if version == *current {
                    warn!(
                        "Milestones #{} and #{} both resolve to {}; keeping #{}",
                        kept.number, milestone.number, version, kept.number
                    );
                }
                version < *current
            }
        };

        if replace {
            earliest.insert(key, (version, milestone));
        }
    }

    earliest
        .into_iter()
        .map(|((major, minor), (_, milestone))| MaintenanceLine {
            major_minor: format!("{}.{}", major, minor),
            milestone_id: milestone.number,
        })
        .collect()
}
