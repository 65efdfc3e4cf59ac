//! Execution strategies: which pipeline stages leave the I/O thread.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A pipeline stage boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Reading and deserializing the inbound message.
    Read,
    /// Running the handler / delivering the result to the caller.
    Handle,
    /// Serializing and writing the outbound message.
    Write,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 3] = [Stage::Read, Stage::Handle, Stage::Write];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Read => "read",
            Stage::Handle => "handle",
            Stage::Write => "write",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage offload decisions. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "StrategyRepr", into = "StrategyRepr")]
pub struct ExecutionStrategy {
    read: bool,
    handle: bool,
    write: bool,
}

impl ExecutionStrategy {
    /// No stage is ever offloaded. Every stage runs on the I/O thread.
    pub const fn offload_none() -> Self {
        Self {
            read: false,
            handle: false,
            write: false,
        }
    }

    /// Every stage is offloaded.
    pub const fn offload_all() -> Self {
        Self {
            read: true,
            handle: true,
            write: true,
        }
    }

    /// Offload exactly the listed stages.
    pub fn custom(stages: &[Stage]) -> Self {
        let mut strategy = Self::offload_none();
        for stage in stages {
            match stage {
                Stage::Read => strategy.read = true,
                Stage::Handle => strategy.handle = true,
                Stage::Write => strategy.write = true,
            }
        }
        strategy
    }

    /// Returns `true` if `stage` must run on the offload executor.
    pub fn should_offload(&self, stage: Stage) -> bool {
        match stage {
            Stage::Read => self.read,
            Stage::Handle => self.handle,
            Stage::Write => self.write,
        }
    }

    /// Returns `true` if no stage is offloaded.
    pub fn is_offload_none(&self) -> bool {
        !self.read && !self.handle && !self.write
    }

    /// Stages this strategy offloads, in pipeline order.
    pub fn offloaded_stages(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|s| self.should_offload(*s))
            .collect()
    }
}

impl Default for ExecutionStrategy {
    fn default() -> Self {
        Self::offload_all()
    }
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_offload_none() {
            return f.write_str("offload-none");
        }
        if *self == Self::offload_all() {
            return f.write_str("offload-all");
        }
        let stages: Vec<_> = self.offloaded_stages().iter().map(Stage::as_str).collect();
        write!(f, "offload[{}]", stages.join(","))
    }
}

/// Combine a per-request override with the connection default.
///
/// A present request strategy wins wholesale; strategies are never merged
/// stage by stage.
pub fn resolve(
    request: Option<&ExecutionStrategy>,
    default: &ExecutionStrategy,
) -> ExecutionStrategy {
    request.copied().unwrap_or(*default)
}

/// Config-file representation: a preset name or an explicit stage list.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
enum StrategyRepr {
    Preset(String),
    Custom { offload: Vec<Stage> },
}

impl TryFrom<StrategyRepr> for ExecutionStrategy {
    type Error = String;

    fn try_from(repr: StrategyRepr) -> Result<Self, Self::Error> {
        match repr {
            StrategyRepr::Preset(name) => match name.as_str() {
                "offload-none" => Ok(Self::offload_none()),
                "offload-all" => Ok(Self::offload_all()),
                other => Err(format!(
                    "unknown execution strategy {other:?} (expected offload-none or offload-all)"
                )),
            },
            StrategyRepr::Custom { offload } => Ok(Self::custom(&offload)),
        }
    }
}

impl From<ExecutionStrategy> for StrategyRepr {
    fn from(strategy: ExecutionStrategy) -> Self {
        if strategy.is_offload_none() {
            StrategyRepr::Preset("offload-none".into())
        } else if strategy == ExecutionStrategy::offload_all() {
            StrategyRepr::Preset("offload-all".into())
        } else {
            StrategyRepr::Custom {
                offload: strategy.offloaded_stages(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offload_none_never_offloads() {
        let s = ExecutionStrategy::offload_none();
        assert!(Stage::ALL.iter().all(|st| !s.should_offload(*st)));
    }

    #[test]
    fn custom_only_listed_stages() {
        let s = ExecutionStrategy::custom(&[Stage::Handle]);
        assert!(!s.should_offload(Stage::Read));
        assert!(s.should_offload(Stage::Handle));
        assert!(!s.should_offload(Stage::Write));
        assert_eq!(s.to_string(), "offload[handle]");
    }

    #[test]
    fn resolve_request_wins_wholesale() {
        let default = ExecutionStrategy::custom(&[Stage::Read, Stage::Write]);
        let request = ExecutionStrategy::custom(&[Stage::Handle]);

        assert_eq!(resolve(Some(&request), &default), request);
        assert_eq!(resolve(None, &default), default);
    }

    #[derive(Deserialize)]
    struct Holder {
        strategy: ExecutionStrategy,
    }

    #[test]
    fn deserialize_presets_and_lists() {
        let h: Holder = toml::from_str(r#"strategy = "offload-none""#).unwrap();
        assert!(h.strategy.is_offload_none());

        let h: Holder = toml::from_str(r#"strategy = { offload = ["read"] }"#).unwrap();
        assert_eq!(h.strategy, ExecutionStrategy::custom(&[Stage::Read]));

        assert!(toml::from_str::<Holder>(r#"strategy = "sometimes""#).is_err());
    }
}
