//! Policy over which invalidation checks the pipeline may bypass.
//!
//! Each [`SkipCheck`] names one verification step. A set bit means "skip it"; the
//! [`SkipCheck::Disabled`] bit is a kill switch that forces every check to run no matter which
//! other bits are present. Skipping trades soundness for speed:
//!
//! * [`SkipCheck::Device`]: the device is resolved once and never compared again.
//! * [`SkipCheck::BuildGradient`]: once a graph has been compiled, later re-exports reuse it.
//!   This assumes the compiled graph stays valid when only dynamic extents change.
//! * [`SkipCheck::ExecutionAgent`]: once an agent exists it is reused even after a rebuild.

use std::cell::Cell;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipCheck {
    Disabled,
    Device,
    BuildGradient,
    ExecutionAgent,
}

impl SkipCheck {
    pub const ALL: [SkipCheck; 4] = [
        SkipCheck::Disabled,
        SkipCheck::Device,
        SkipCheck::BuildGradient,
        SkipCheck::ExecutionAgent,
    ];

    const fn bit(self) -> u8 {
        match self {
            SkipCheck::Disabled => 1,
            SkipCheck::Device => 2,
            SkipCheck::BuildGradient => 4,
            SkipCheck::ExecutionAgent => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SkipCheck::Disabled => "SKIP_CHECK_DISABLED",
            SkipCheck::Device => "SKIP_CHECK_DEVICE",
            SkipCheck::BuildGradient => "SKIP_CHECK_BUILD_GRADIENT",
            SkipCheck::ExecutionAgent => "SKIP_CHECK_EXECUTION_AGENT",
        }
    }
}

impl fmt::Display for SkipCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown skip check '{0}'")]
pub struct ParseSkipCheckError(pub String);

impl FromStr for SkipCheck {
    type Err = ParseSkipCheckError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_uppercase();
        SkipCheck::ALL
            .into_iter()
            .find(|check| check.name() == normalized)
            .ok_or_else(|| ParseSkipCheckError(raw.trim().to_string()))
    }
}

/// Set of checks the configuration allows to skip.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SkipCheckFlags {
    bits: u8,
}

impl SkipCheckFlags {
    pub const fn empty() -> Self {
        SkipCheckFlags { bits: 0 }
    }

    /// Builds flags from the raw bitmask used at configuration boundaries.
    pub fn from_bits(bits: u8) -> Option<Self> {
        let known = SkipCheck::ALL.iter().fold(0, |acc, check| acc | check.bit());
        (bits & !known == 0).then_some(SkipCheckFlags { bits })
    }

    pub fn bits(self) -> u8 {
        self.bits
    }

    pub fn with(self, check: SkipCheck) -> Self {
        SkipCheckFlags {
            bits: self.bits | check.bit(),
        }
    }

    /// Raw membership, ignoring the kill switch.
    pub fn contains(self, check: SkipCheck) -> bool {
        self.bits & check.bit() != 0
    }

    pub fn is_disabled(self) -> bool {
        self.contains(SkipCheck::Disabled)
    }

    /// Whether `check` may be skipped. Always false while the kill switch is present.
    pub fn is_set(self, check: SkipCheck) -> bool {
        !self.is_disabled() && self.contains(check)
    }

    pub fn iter(self) -> impl Iterator<Item = SkipCheck> {
        SkipCheck::ALL
            .into_iter()
            .filter(move |check| self.contains(*check))
    }

    /// Parses `|` or `,` separated check names, e.g. `SKIP_CHECK_DEVICE|SKIP_CHECK_EXECUTION_AGENT`.
    pub fn parse(raw: &str) -> Result<Self, ParseSkipCheckError> {
        raw.split(['|', ','])
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .try_fold(SkipCheckFlags::empty(), |flags, part| {
                Ok(flags.with(part.parse::<SkipCheck>()?))
            })
    }
}

impl Default for SkipCheckFlags {
    fn default() -> Self {
        SkipCheckFlags::empty()
            .with(SkipCheck::Device)
            .with(SkipCheck::BuildGradient)
            .with(SkipCheck::ExecutionAgent)
    }
}

impl FromIterator<SkipCheck> for SkipCheckFlags {
    fn from_iter<I: IntoIterator<Item = SkipCheck>>(iter: I) -> Self {
        iter.into_iter()
            .fold(SkipCheckFlags::empty(), SkipCheckFlags::with)
    }
}

impl fmt::Display for SkipCheckFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(SkipCheck::name).collect();
        f.write_str(&names.join("|"))
    }
}

impl fmt::Debug for SkipCheckFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SkipCheckFlags({self})")
    }
}

impl Serialize for SkipCheckFlags {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SkipCheckFlags {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        SkipCheckFlags::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Immutable flags plus a record of which skips have already been announced.
#[derive(Debug)]
pub struct SkipCheckPolicy {
    flags: SkipCheckFlags,
    announced: Cell<u8>,
}

impl SkipCheckPolicy {
    pub fn new(flags: SkipCheckFlags) -> Self {
        SkipCheckPolicy {
            flags,
            announced: Cell::new(0),
        }
    }

    pub fn flags(&self) -> SkipCheckFlags {
        self.flags
    }

    /// Same as [`SkipCheckFlags::is_set`], announcing the first skip of each check.
    pub fn skips(&self, check: SkipCheck) -> bool {
        let skip = self.flags.is_set(check);
        if skip && self.announced.get() & check.bit() == 0 {
            self.announced.set(self.announced.get() | check.bit());
            tracing::info!(
                check = check.name(),
                "skipping check for faster execution; set GRAPHEXEC_SKIPCHECK_POLICY=SKIP_CHECK_DISABLED to run every check"
            );
        }
        skip
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_switch_overrides_every_bit() {
        for bits in 0..16u8 {
            let flags = SkipCheckFlags::from_bits(bits | 1).expect("known bits");
            for check in SkipCheck::ALL {
                assert!(!flags.is_set(check), "bits {bits:#06b} check {check}");
            }
        }
    }

    #[test]
    fn without_kill_switch_membership_decides() {
        let flags = SkipCheckFlags::empty().with(SkipCheck::Device);
        assert!(flags.is_set(SkipCheck::Device));
        assert!(!flags.is_set(SkipCheck::BuildGradient));
        assert!(!flags.is_set(SkipCheck::ExecutionAgent));
    }

    #[test]
    fn parses_names_and_rejects_unknown_ones() {
        let flags = SkipCheckFlags::parse("SKIP_CHECK_DEVICE | skip_check_execution_agent")
            .expect("valid policy");
        assert_eq!(
            flags,
            SkipCheckFlags::from_iter([SkipCheck::Device, SkipCheck::ExecutionAgent])
        );
        assert_eq!(
            SkipCheckFlags::parse("SKIP_CHECK_SOMETHING"),
            Err(ParseSkipCheckError("SKIP_CHECK_SOMETHING".to_string()))
        );
        assert_eq!(SkipCheckFlags::parse("").expect("empty"), SkipCheckFlags::empty());
    }

    #[test]
    fn rejects_unknown_bits() {
        assert!(SkipCheckFlags::from_bits(16).is_none());
        assert_eq!(SkipCheckFlags::from_bits(14), Some(SkipCheckFlags::default()));
    }

    #[test]
    fn serde_uses_the_pipe_separated_form() {
        let json = serde_json::to_string(&SkipCheckFlags::default()).expect("serialize");
        assert_eq!(
            json,
            "\"SKIP_CHECK_DEVICE|SKIP_CHECK_BUILD_GRADIENT|SKIP_CHECK_EXECUTION_AGENT\""
        );
        let back: SkipCheckFlags = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, SkipCheckFlags::default());
    }

    #[test]
    fn policy_reports_the_same_answer_as_the_flags() {
        let policy = SkipCheckPolicy::new(SkipCheckFlags::default());
        assert!(policy.skips(SkipCheck::Device));
        assert!(policy.skips(SkipCheck::Device));
        let disabled = SkipCheckPolicy::new(SkipCheckFlags::default().with(SkipCheck::Disabled));
        assert!(!disabled.skips(SkipCheck::BuildGradient));
    }
}
