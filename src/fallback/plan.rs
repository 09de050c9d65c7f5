//! Static fallback plans.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::config::FallbackOptionConfig;

/// Which tier of the chain produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackLevel {
    Primary,
    Secondary,
    Native,
    Cached,
    Failed,
}

impl FallbackLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackLevel::Primary => "primary",
            FallbackLevel::Secondary => "secondary",
            FallbackLevel::Native => "native",
            FallbackLevel::Cached => "cached",
            FallbackLevel::Failed => "failed",
        }
    }
}

impl fmt::Display for FallbackLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a fallback plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FallbackOption {
    /// Same operation against another organ.
    Secondary { target: String, description: String },
    /// A native tool, called with params remapped for it.
    NativeTool { tool: String, description: String },
    /// Last known result for the primary resource.
    Cached { description: String },
    /// Placeholder step that never produces a value.
    None { description: String },
}

impl FallbackOption {
    pub fn description(&self) -> &str {
        match self {
            FallbackOption::Secondary { description, .. }
            | FallbackOption::NativeTool { description, .. }
            | FallbackOption::Cached { description }
            | FallbackOption::None { description } => description,
        }
    }
}

impl From<&FallbackOptionConfig> for FallbackOption {
    fn from(config: &FallbackOptionConfig) -> Self {
        match config {
            FallbackOptionConfig::Secondary { target, description } => FallbackOption::Secondary {
                target: target.clone(),
                description: description.clone(),
            },
            FallbackOptionConfig::NativeTool { tool, description } => FallbackOption::NativeTool {
                tool: tool.clone(),
                description: description.clone(),
            },
            FallbackOptionConfig::Cached { description } => FallbackOption::Cached {
                description: description.clone(),
            },
            FallbackOptionConfig::None { description } => FallbackOption::None {
                description: description.clone(),
            },
        }
    }
}

/// Immutable table of plans keyed by primary resource.
#[derive(Debug, Clone, Default)]
pub struct FallbackPlans {
    plans: HashMap<String, Vec<FallbackOption>>,
}

impl FallbackPlans {
    pub fn new(plans: HashMap<String, Vec<FallbackOption>>) -> Self {
        Self { plans }
    }

    pub fn from_config(config: &HashMap<String, Vec<FallbackOptionConfig>>) -> Self {
        Self::new(
            config
                .iter()
                .map(|(resource, options)| {
                    (resource.clone(), options.iter().map(FallbackOption::from).collect())
                })
                .collect(),
        )
    }

    /// Plan for `resource`, empty when none is configured.
    pub fn plan(&self, resource: &str) -> &[FallbackOption] {
        self.plans.get(resource).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.plans.keys().map(String::as_str)
    }
}
