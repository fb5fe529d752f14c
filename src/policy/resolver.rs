// SPDX-License-Identifier: Apache-2.0

//! Collects the policy actions that apply to one table for one requester

use serde::Serialize;

use super::matcher::PolicyMatcher;
use super::model::{ActionType, ActionVerb, ColumnsMode, Policy, PolicyActionEntry};
use super::selector::PolicySelector;

/// Column subject of one column-access entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSubject {
    pub mode: ColumnsMode,
    /// `None` covers every column
    pub patterns: Option<Vec<String>>,
}

impl ColumnSubject {
    fn from_entry(entry: &PolicyActionEntry) -> Self {
        Self {
            mode: entry.columns_mode,
            patterns: entry.columns.clone(),
        }
    }

    pub fn covers(&self, matcher: &PolicyMatcher, column: &str) -> bool {
        let Some(patterns) = &self.patterns else {
            return true;
        };
        let listed = matcher.matches_any_column(patterns, column);
        match self.mode {
            ColumnsMode::Include => listed,
            ColumnsMode::Exclude => !listed,
        }
    }
}

/// Column-access subjects split by verb
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColumnAccess {
    pub allow: Vec<ColumnSubject>,
    pub deny: Vec<ColumnSubject>,
}

impl ColumnAccess {
    pub fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }

    /// Visible when allowed by some ALLOW subject (or no ALLOW entry applies)
    /// and covered by no DENY subject
    pub fn is_visible(&self, matcher: &PolicyMatcher, column: &str) -> bool {
        let allowed =
            self.allow.is_empty() || self.allow.iter().any(|s| s.covers(matcher, column));
        allowed && !self.deny.iter().any(|s| s.covers(matcher, column))
    }
}

/// Everything the rewriter needs to restrict one table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedActions {
    pub table_denied: bool,
    pub allow_filters: Vec<String>,
    pub deny_filters: Vec<String>,
    pub column_access: ColumnAccess,
}

impl ResolvedActions {
    /// True when nothing restricts the table
    pub fn is_unrestricted(&self) -> bool {
        !self.table_denied
            && self.allow_filters.is_empty()
            && self.deny_filters.is_empty()
            && self.column_access.is_empty()
    }
}

/// Per-column outcome in a [`PolicyEvaluation`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDecision {
    pub column: String,
    pub visible: bool,
}

/// Diagnostic explanation of how policies apply to a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyEvaluation {
    pub table: Vec<String>,
    pub table_denied: bool,
    pub allow_filters: Vec<String>,
    pub deny_filters: Vec<String>,
    pub columns: Vec<ColumnDecision>,
}

/// Resolves the policy actions applying to a table for one requester
pub struct PolicyActionResolver<'a> {
    policies: &'a [Policy],
    selector: &'a PolicySelector,
    matcher: &'a PolicyMatcher,
}

impl<'a> PolicyActionResolver<'a> {
    pub fn new(
        policies: &'a [Policy],
        selector: &'a PolicySelector,
        matcher: &'a PolicyMatcher,
    ) -> Self {
        Self {
            policies,
            selector,
            matcher,
        }
    }

    pub fn matcher(&self) -> &PolicyMatcher {
        self.matcher
    }

    /// Entries of selected policies matching `(verb, action_type, table)`.
    /// When any of them is exclusive, only the exclusive ones are kept.
    pub fn matching_entries(
        &self,
        verb: ActionVerb,
        action_type: ActionType,
        table: &[&str],
    ) -> Vec<&'a PolicyActionEntry> {
        let entries: Vec<&PolicyActionEntry> = self
            .policies
            .iter()
            .filter(|p| self.selector.is_selected(verb, &p.name))
            .flat_map(|p| p.actions.iter())
            .filter(|a| a.verb == verb && a.action_type == action_type)
            .filter(|a| self.matcher.matches_table(&a.table, table))
            .collect();

        if entries.iter().any(|a| a.exclusive) {
            entries.into_iter().filter(|a| a.exclusive).collect()
        } else {
            entries
        }
    }

    pub fn resolve(&self, table: &[&str]) -> ResolvedActions {
        let filters = |verb| -> Vec<String> {
            self.matching_entries(verb, ActionType::RowFilter, table)
                .into_iter()
                .filter_map(|a| a.expression.clone())
                .collect()
        };
        let subjects = |verb| -> Vec<ColumnSubject> {
            self.matching_entries(verb, ActionType::ColumnAccess, table)
                .into_iter()
                .map(ColumnSubject::from_entry)
                .collect()
        };

        ResolvedActions {
            table_denied: !self
                .matching_entries(ActionVerb::Deny, ActionType::TableAccess, table)
                .is_empty(),
            allow_filters: filters(ActionVerb::Allow),
            deny_filters: filters(ActionVerb::Deny),
            column_access: ColumnAccess {
                allow: subjects(ActionVerb::Allow),
                deny: subjects(ActionVerb::Deny),
            },
        }
    }

    /// Explains the resolved actions for `table` over the given columns
    pub fn evaluate(&self, table: &[&str], columns: &[&str]) -> PolicyEvaluation {
        let resolved = self.resolve(table);
        let columns = columns
            .iter()
            .map(|c| ColumnDecision {
                column: c.to_string(),
                visible: !resolved.table_denied
                    && resolved.column_access.is_visible(self.matcher, c),
            })
            .collect();
        PolicyEvaluation {
            table: table.iter().map(|s| s.to_string()).collect(),
            table_denied: resolved.table_denied,
            allow_filters: resolved.allow_filters,
            deny_filters: resolved.deny_filters,
            columns,
        }
    }
}
