use crate::node_description::ServerType;
use crate::probe::ProbeContext;
use docdb_common::types::{ServerVersion, VersionRange};
use serde_json::Value;
use std::fmt;

/// A named check that does not fit the built-in dependency kinds
#[derive(Clone, Copy)]
pub struct Predicate {
    pub name: &'static str,
    pub check: fn(&ProbeContext<'_>) -> bool,
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Predicate").field(&self.name).finish()
    }
}

/// Condition a node must satisfy for a capability to be usable
#[derive(Debug, Clone)]
pub enum CapabilityDependency {
    /// Server version within an inclusive range
    VersionRange(VersionRange),

    /// A server runtime parameter that must be truthy.
    ///
    /// When `env_override` names a set environment variable, its value is
    /// used instead of asking the node.
    RuntimeParameterTruthy {
        parameter: String,
        env_override: Option<String>,
    },

    /// The node's maximum wire version within `[min, max]`
    WireVersionRange { min: i32, max: Option<i32> },

    /// The node's role is anything but the given one
    NodeRoleIsNot(ServerType),

    And(Vec<CapabilityDependency>),
    Or(Vec<CapabilityDependency>),
    Not(Box<CapabilityDependency>),

    Predicate(Predicate),
}

impl CapabilityDependency {
    pub fn since(major: u32, minor: u32, patch: u32) -> Self {
        Self::VersionRange(VersionRange::from(ServerVersion::new(major, minor, patch)))
    }

    pub fn between(min: ServerVersion, max: ServerVersion) -> Self {
        Self::VersionRange(VersionRange::between(min, max))
    }

    pub fn runtime_parameter(parameter: impl Into<String>) -> Self {
        Self::RuntimeParameterTruthy {
            parameter: parameter.into(),
            env_override: None,
        }
    }

    pub fn runtime_parameter_with_override(parameter: impl Into<String>, env_var: impl Into<String>) -> Self {
        Self::RuntimeParameterTruthy {
            parameter: parameter.into(),
            env_override: Some(env_var.into()),
        }
    }

    pub fn wire_version_from(min: i32) -> Self {
        Self::WireVersionRange { min, max: None }
    }

    pub fn not(dependency: CapabilityDependency) -> Self {
        Self::Not(Box::new(dependency))
    }

    /// Evaluate against a probe context. `And`/`Or` stop at the first
    /// operand that decides the outcome.
    pub fn is_met(&self, context: &ProbeContext<'_>) -> bool {
        match self {
            Self::VersionRange(range) => range.contains(&context.server_version()),
            Self::RuntimeParameterTruthy {
                parameter,
                env_override,
            } => {
                if let Some(value) = env_override.as_deref().and_then(|var| context.env_override(var)) {
                    return is_truthy_str(value);
                }
                context.parameter(parameter).map_or(false, is_truthy)
            }
            Self::WireVersionRange { min, max } => {
                let node_max = context.wire_version_range().max;
                node_max >= *min && max.map_or(true, |max| node_max <= max)
            }
            Self::NodeRoleIsNot(role) => context.role() != *role,
            Self::And(dependencies) => dependencies.iter().all(|d| d.is_met(context)),
            Self::Or(dependencies) => dependencies.iter().any(|d| d.is_met(context)),
            Self::Not(dependency) => !dependency.is_met(context),
            Self::Predicate(predicate) => (predicate.check)(context),
        }
    }

    /// The first top-level version range, if this dependency is one
    pub fn version_range(&self) -> Option<VersionRange> {
        match self {
            Self::VersionRange(range) => Some(*range),
            _ => None,
        }
    }

    /// Visit every runtime parameter referenced anywhere in this tree
    pub fn visit_runtime_parameters<F>(&self, visit: &mut F)
    where
        F: FnMut(&str, Option<&str>),
    {
        match self {
            Self::RuntimeParameterTruthy {
                parameter,
                env_override,
            } => visit(parameter, env_override.as_deref()),
            Self::And(dependencies) | Self::Or(dependencies) => {
                for dependency in dependencies {
                    dependency.visit_runtime_parameters(visit);
                }
            }
            Self::Not(dependency) => dependency.visit_runtime_parameters(visit),
            Self::VersionRange(_)
            | Self::WireVersionRange { .. }
            | Self::NodeRoleIsNot(_)
            | Self::Predicate(_) => {}
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |n| n != 0.0),
        Value::String(s) => is_truthy_str(s),
        Value::Null => false,
        Value::Array(_) | Value::Object(_) => true,
    }
}

// "0" and "false" are the only falsy strings
fn is_truthy_str(value: &str) -> bool {
    let value = value.trim();
    !(value == "0" || value.eq_ignore_ascii_case("false"))
}
