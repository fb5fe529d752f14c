// SPDX-License-Identifier: Apache-2.0

//! Access policies
//!
//! Policies restrict which tables, rows and columns a requester can read.
//! They are applied by rewriting the plan before execution.

pub mod matcher;
pub mod model;
pub mod resolver;
pub mod rewriter;
pub mod selector;
pub mod store;

use std::collections::HashMap;
use std::sync::Arc;

use mill_core::plan::Plan;
use mill_core::traits::ExpressionParser;
use mill_core::MillResult;
use mill_sql::SqlExpressionParser;

pub use matcher::PolicyMatcher;
pub use model::{ActionType, ActionVerb, ColumnsMode, Policy, PolicyActionEntry};
pub use resolver::{PolicyActionResolver, PolicyEvaluation, ResolvedActions};
pub use rewriter::PolicyRewriter;
pub use selector::PolicySelector;
pub use store::PolicyStore;

use crate::config::SecuritySettings;

/// Entry point tying the policy store, matcher and expression parser together
pub struct PolicyEngine {
    enabled: bool,
    store: PolicyStore,
    remap: HashMap<String, String>,
    matcher: PolicyMatcher,
    parser: Arc<dyn ExpressionParser>,
}

impl PolicyEngine {
    pub fn new(settings: &SecuritySettings) -> MillResult<Self> {
        Self::with_parser(settings, Arc::new(SqlExpressionParser::new()))
    }

    pub fn with_parser(
        settings: &SecuritySettings,
        parser: Arc<dyn ExpressionParser>,
    ) -> MillResult<Self> {
        Ok(Self {
            enabled: settings.enabled,
            store: PolicyStore::new(settings.policies.clone())?,
            remap: settings.authority_remap.clone(),
            matcher: PolicyMatcher::new(),
            parser,
        })
    }

    /// An engine that applies no policy
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            store: PolicyStore::default(),
            remap: HashMap::new(),
            matcher: PolicyMatcher::new(),
            parser: Arc::new(SqlExpressionParser::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    pub fn selector<I, S>(&self, authorities: I) -> PolicySelector
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        PolicySelector::new(authorities, &self.remap)
    }

    /// Rewrites `plan` for a requester holding `authorities`
    pub fn apply<I, S>(&self, plan: &Plan, authorities: I) -> MillResult<Plan>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if !self.enabled {
            return Ok(plan.clone());
        }
        let policies = self.store.snapshot();
        let selector = self.selector(authorities);
        let resolver = PolicyActionResolver::new(&policies, &selector, &self.matcher);
        PolicyRewriter::new(resolver, self.parser.as_ref()).rewrite(plan)
    }

    /// Explains how policies apply to one table for a requester
    pub fn evaluate<I, S>(
        &self,
        table: &[&str],
        columns: &[&str],
        authorities: I,
    ) -> PolicyEvaluation
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let policies = self.store.snapshot();
        let selector = self.selector(authorities);
        PolicyActionResolver::new(&policies, &selector, &self.matcher).evaluate(table, columns)
    }
}
