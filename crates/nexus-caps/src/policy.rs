//! Built-in security policies.
//!
//! A policy is a named, ordered list of `(allow|deny, pattern)` rules that
//! `apply_policy` folds into the grant map. Order matters: the store's
//! wildcard lookup returns the first matching entry, so denies that must
//! win are listed before the broad allows.

use nexus_types::PolicyName;

/// Whether a rule grants or refuses its pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleEffect {
    Allow,
    Deny,
}

/// One policy rule: effect plus an `action:resource` pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    pub effect: RuleEffect,
    pub pattern: String,
}

impl PolicyRule {
    fn allow(pattern: &str) -> Self {
        Self {
            effect: RuleEffect::Allow,
            pattern: pattern.to_string(),
        }
    }

    fn deny(pattern: &str) -> Self {
        Self {
            effect: RuleEffect::Deny,
            pattern: pattern.to_string(),
        }
    }
}

/// The ordered rules for one of the three built-in policies.
pub fn builtin_policy(name: PolicyName) -> Vec<PolicyRule> {
    match name {
        // Deny-heavy, read-only: commands may run, the filesystem may be
        // read, everything that mutates or leaves the process is refused.
        PolicyName::Sandbox => vec![
            PolicyRule::deny("fs:write:**"),
            PolicyRule::deny("proc:kill:**"),
            PolicyRule::deny("proc:exec:**"),
            PolicyRule::deny("net:**"),
            PolicyRule::allow("command:execute:**"),
            PolicyRule::allow("fs:read:**"),
            PolicyRule::allow("fs:stat:**"),
            PolicyRule::allow("fs:find:**"),
            PolicyRule::allow("fs:watch:**"),
            PolicyRule::allow("proc:list"),
            PolicyRule::allow("proc:info:**"),
        ],
        // Broad allow with explicit sensitive denies.
        PolicyName::Developer => vec![
            PolicyRule::deny("fs:read:/etc/shadow"),
            PolicyRule::deny("fs:write:/etc/**"),
            PolicyRule::deny("fs:write:/boot/**"),
            PolicyRule::deny("proc:kill:1"),
            PolicyRule::allow("**"),
        ],
        // Middle ground: read and run freely, write locally, no signals.
        PolicyName::Production => vec![
            PolicyRule::deny("fs:read:/etc/shadow"),
            PolicyRule::deny("fs:write:/etc/**"),
            PolicyRule::deny("fs:write:/boot/**"),
            PolicyRule::deny("proc:kill:**"),
            PolicyRule::allow("command:execute:**"),
            PolicyRule::allow("fs:read:**"),
            PolicyRule::allow("fs:stat:**"),
            PolicyRule::allow("fs:find:**"),
            PolicyRule::allow("fs:watch:**"),
            PolicyRule::allow("fs:write:**"),
            PolicyRule::allow("proc:exec:**"),
            PolicyRule::allow("proc:list"),
            PolicyRule::allow("proc:info:**"),
            PolicyRule::allow("net:http:**"),
            PolicyRule::allow("net:download:**"),
        ],
    }
}

/// Look a policy up by its config-file name.
pub fn policy_by_name(name: &str) -> Option<Vec<PolicyRule>> {
    match name {
        "sandbox" => Some(builtin_policy(PolicyName::Sandbox)),
        "developer" => Some(builtin_policy(PolicyName::Developer)),
        "production" => Some(builtin_policy(PolicyName::Production)),
        _ => None,
    }
}
