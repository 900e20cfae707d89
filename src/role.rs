//! Node roles and the (pattern, role) lookup table.
//!
//! Resolution is a one-shot table lookup: the operator picks a
//! topology pattern, then a role within it. The result decides
//! which service groups run on this node and how the edge
//! router is enabled.

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;

use crate::error::{DeployError, DeployResult};

/// How many nodes the whole stack is spread over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TopologyPattern {
    SingleNode,
    TwoNode,
    ThreeNode,
}

impl TopologyPattern {
    pub const ALL: [Self; 3] = [Self::SingleNode, Self::TwoNode, Self::ThreeNode];

    /// Role choices offered for this pattern, in prompt order.
    #[must_use]
    pub const fn choices(self) -> &'static [RoleChoice] {
        match self {
            Self::SingleNode => &[RoleChoice::Everything],
            Self::TwoNode => &[RoleChoice::EdgeApp, RoleChoice::Data],
            Self::ThreeNode => &[RoleChoice::Edge, RoleChoice::App, RoleChoice::Data],
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::SingleNode => "single-node",
            Self::TwoNode => "two-node",
            Self::ThreeNode => "three-node",
        }
    }
}

impl fmt::Display for TopologyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The role picked inside a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoleChoice {
    Everything,
    EdgeApp,
    Edge,
    App,
    Data,
}

impl RoleChoice {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Everything => "everything",
            Self::EdgeApp => "edge+app",
            Self::Edge => "edge",
            Self::App => "app",
            Self::Data => "data",
        }
    }
}

impl fmt::Display for RoleChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The resolved role of this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeploymentRole {
    All,
    Edge,
    App,
    Data,
    EdgeApp,
}

impl DeploymentRole {
    #[must_use]
    pub const fn runs_compute(self) -> bool {
        matches!(self, Self::All | Self::App | Self::EdgeApp)
    }

    #[must_use]
    pub const fn runs_data(self) -> bool {
        matches!(self, Self::All | Self::Data)
    }

    #[must_use]
    pub const fn edge_policy(self) -> EdgePolicy {
        match self {
            Self::Edge => EdgePolicy::ForcedOn,
            Self::App | Self::Data => EdgePolicy::ForcedOff,
            Self::All | Self::EdgeApp => EdgePolicy::DefaultOn,
        }
    }

    /// Whether the edge router runs, given an optional operator
    /// override. The override only counts for mixed roles.
    #[must_use]
    pub const fn runs_edge(self, edge_override: Option<bool>) -> bool {
        self.edge_policy().resolve(edge_override)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Edge => "edge",
            Self::App => "app",
            Self::Data => "data",
            Self::EdgeApp => "edge-app",
        }
    }
}

impl fmt::Display for DeploymentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentRole {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "edge" => Ok(Self::Edge),
            "app" => Ok(Self::App),
            "data" => Ok(Self::Data),
            "edge-app" | "edge_app" | "edgeapp" => Ok(Self::EdgeApp),
            other => Err(DeployError::InvalidInput(format!(
                "unknown deployment role '{other}'"
            ))),
        }
    }
}

/// How the edge router is enabled for a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgePolicy {
    /// Always on, no prompt.
    ForcedOn,
    /// Always off, no prompt.
    ForcedOff,
    /// On unless the operator says otherwise.
    DefaultOn,
}

impl EdgePolicy {
    #[must_use]
    pub const fn is_overridable(self) -> bool {
        matches!(self, Self::DefaultOn)
    }

    #[must_use]
    pub const fn resolve(self, edge_override: Option<bool>) -> bool {
        match (self, edge_override) {
            (Self::ForcedOn, _) => true,
            (Self::ForcedOff, _) => false,
            (Self::DefaultOn, Some(enabled)) => enabled,
            (Self::DefaultOn, None) => true,
        }
    }
}

/// Map a (pattern, role choice) pair to the node role.
pub fn resolve(pattern: TopologyPattern, choice: RoleChoice) -> DeployResult<DeploymentRole> {
    use RoleChoice as C;
    use TopologyPattern as P;

    match (pattern, choice) {
        (P::SingleNode, C::Everything) => Ok(DeploymentRole::All),
        (P::TwoNode, C::EdgeApp) => Ok(DeploymentRole::EdgeApp),
        (P::TwoNode | P::ThreeNode, C::Data) => Ok(DeploymentRole::Data),
        (P::ThreeNode, C::Edge) => Ok(DeploymentRole::Edge),
        (P::ThreeNode, C::App) => Ok(DeploymentRole::App),
        _ => Err(DeployError::InvalidRole {
            pattern: pattern.to_string(),
            choice: choice.to_string(),
        }),
    }
}
