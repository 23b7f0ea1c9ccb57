//! Validator (C3)
//!
//! Admission-time checks for a single policy or a batch of policies. The
//! validator never mutates the store; it only decides whether a policy is
//! fit to be admitted, and compiles every condition into the shared
//! [`ExprCache`] so the engine never pays parse cost on the hot path
//! (spec §4.2, §4.5).

use crate::condition::{parse as parse_condition, ExprCache};
use once_cell::sync::Lazy;
use reaper_core::{Effect, Policy, Rule};
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.:-]+$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub rule: Option<String>,
    pub message: String,
}

impl Diagnostic {
    fn policy(message: impl Into<String>) -> Self {
        Self {
            rule: None,
            message: message.into(),
        }
    }

    fn rule(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule: Some(rule.into()),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchValidationResult {
    pub results: HashMap<String, ValidationResult>,
}

impl BatchValidationResult {
    pub fn is_valid(&self) -> bool {
        self.results.values().all(ValidationResult::is_valid)
    }
}

#[derive(Debug)]
pub struct Validator {
    exprs: Arc<ExprCache>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    pub fn new() -> Self {
        Self {
            exprs: Arc::new(ExprCache::new()),
        }
    }

    /// Shares a single compiled-expression cache with another consumer
    /// (typically [`crate::engine::DecisionEngine`]) so a condition compiled
    /// at admission time is never re-parsed on the evaluation hot path
    /// (spec §4.5, §9).
    pub fn with_expr_cache(exprs: Arc<ExprCache>) -> Self {
        Self { exprs }
    }

    /// Validates a single policy in isolation: required fields, name shape,
    /// rule shape, and condition syntax/typecheck. Cross-rule warnings
    /// (shadowing, duplicate rule names) are evaluated within this policy's
    /// own rule set.
    pub fn validate(&self, policy: &Policy) -> ValidationResult {
        let mut result = ValidationResult::default();

        if policy.name.trim().is_empty() {
            result.errors.push(Diagnostic::policy("policy name must not be empty"));
        } else if !NAME_PATTERN.is_match(&policy.name) {
            result.errors.push(Diagnostic::policy(format!(
                "policy name {:?} must match [A-Za-z0-9_.:-]+",
                policy.name
            )));
        }

        if policy.resource_kind.trim().is_empty() {
            result
                .errors
                .push(Diagnostic::policy("resource_kind must not be empty"));
        }

        if policy.rules.is_empty() {
            result
                .errors
                .push(Diagnostic::policy("policy must declare at least one rule"));
        }

        let mut seen_names = HashSet::new();
        let mut seen_shapes: HashMap<(Vec<String>, Vec<String>), Effect> = HashMap::new();

        for rule in &policy.rules {
            self.validate_rule(rule, &mut result);

            if !seen_names.insert(rule.name.clone()) {
                result.warnings.push(Diagnostic::rule(
                    &rule.name,
                    format!("duplicate rule name {:?} within policy", rule.name),
                ));
            }

            let mut actions = rule.actions.clone();
            actions.sort();
            let mut roles = rule.roles.clone();
            roles.sort();
            let shape = (actions, roles);
            match seen_shapes.get(&shape) {
                Some(prior_effect) if *prior_effect != rule.effect => {
                    result.warnings.push(Diagnostic::rule(
                        &rule.name,
                        "conflicting effect for an identical actions/roles combination already declared earlier in this policy",
                    ));
                }
                Some(_) => {
                    result.warnings.push(Diagnostic::rule(
                        &rule.name,
                        "rule is shadowed by an earlier rule with the same actions and roles",
                    ));
                }
                None => {
                    seen_shapes.insert(shape, rule.effect);
                }
            }
        }

        result
    }

    fn validate_rule(&self, rule: &Rule, result: &mut ValidationResult) {
        if rule.name.trim().is_empty() {
            result
                .errors
                .push(Diagnostic::policy("rule name must not be empty"));
            return;
        }
        if rule.actions.is_empty() {
            result.errors.push(Diagnostic::rule(
                &rule.name,
                "rule must declare at least one action",
            ));
        }
        if rule.actions.iter().any(|a| a.trim().is_empty()) {
            result
                .errors
                .push(Diagnostic::rule(&rule.name, "action entries must not be empty"));
        }
        if let Some(condition) = &rule.condition {
            match parse_condition(condition) {
                Ok(expr) => {
                    if let Err(e) = self.typecheck(&expr) {
                        result.errors.push(Diagnostic::rule(
                            &rule.name,
                            format!("condition fails typecheck: {e}"),
                        ));
                    } else {
                        // Compile into the shared cache so the engine's first
                        // evaluation of this rule never pays parse cost.
                        let _ = self.exprs.compile(condition);
                    }
                }
                Err(e) => {
                    result
                        .errors
                        .push(Diagnostic::rule(&rule.name, format!("condition syntax error: {e}")));
                }
            }
        }
    }

    /// A conservative static check: every field access must root at
    /// `principal`, `resource`, or `context`. Deeper type errors (e.g.
    /// comparing a string to a number) can only be caught at evaluation time
    /// because attribute types are only known per-request, so they surface
    /// there as a skipped rule rather than here (spec §4.5).
    fn typecheck(&self, expr: &crate::condition::Expr) -> Result<(), String> {
        use crate::condition::Expr::*;
        match expr {
            Lit(_) => Ok(()),
            Field(path) => match path.first().map(String::as_str) {
                Some("principal") | Some("resource") | Some("context") => Ok(()),
                other => Err(format!("unknown root identifier: {other:?}")),
            },
            Not(e) | Len(e) => self.typecheck(e),
            And(a, b) | Or(a, b) | Eq(a, b) | Ne(a, b) | Lt(a, b) | Le(a, b) | Gt(a, b) | Ge(a, b)
            | In(a, b) | Contains(a, b) | StartsWith(a, b) | EndsWith(a, b) => {
                self.typecheck(a)?;
                self.typecheck(b)
            }
        }
    }

    /// Validates a batch, additionally flagging duplicate names across the
    /// batch (spec §4.2 `ValidatePolicies`).
    pub fn validate_batch(&self, policies: &[Policy]) -> BatchValidationResult {
        let mut batch = BatchValidationResult::default();
        let mut seen: HashMap<String, usize> = HashMap::new();

        for policy in policies {
            *seen.entry(policy.name.clone()).or_insert(0) += 1;
        }

        for policy in policies {
            let mut result = self.validate(policy);
            if seen.get(&policy.name).copied().unwrap_or(0) > 1 {
                result.errors.push(Diagnostic::policy(format!(
                    "policy name {:?} appears more than once in this batch",
                    policy.name
                )));
            }
            batch.results.insert(policy.name.clone(), result);
        }
        batch
    }

    pub fn expr_cache(&self) -> &Arc<ExprCache> {
        &self.exprs
    }
}
