// SPDX-License-Identifier: Apache-2.0

//! Policy data model
//!
//! Policies are loaded once from configuration and never mutated; a reload
//! replaces the whole set.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use mill_core::{MillError, MillResult};

/// Allow or deny
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ActionVerb {
    Allow,
    Deny,
}

impl FromStr for ActionVerb {
    type Err = MillError;

    fn from_str(s: &str) -> MillResult<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALLOW" => Ok(Self::Allow),
            "DENY" => Ok(Self::Deny),
            other => Err(MillError::policy_configuration(format!(
                "Unknown policy verb '{other}'"
            ))),
        }
    }
}

impl TryFrom<String> for ActionVerb {
    type Error = MillError;

    fn try_from(value: String) -> MillResult<Self> {
        value.parse()
    }
}

impl From<ActionVerb> for String {
    fn from(verb: ActionVerb) -> Self {
        verb.to_string()
    }
}

impl fmt::Display for ActionVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Allow => "ALLOW",
            Self::Deny => "DENY",
        })
    }
}

/// What a policy action governs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ActionType {
    TableAccess,
    RowFilter,
    ColumnAccess,
}

impl FromStr for ActionType {
    type Err = MillError;

    fn from_str(s: &str) -> MillResult<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "table-access" | "rel" => Ok(Self::TableAccess),
            "row-filter" | "rel-filter" => Ok(Self::RowFilter),
            "column-access" | "rel-columns" => Ok(Self::ColumnAccess),
            _ => Err(MillError::policy_configuration(format!(
                "Unknown policy action type '{s}'"
            ))),
        }
    }
}

impl TryFrom<String> for ActionType {
    type Error = MillError;

    fn try_from(value: String) -> MillResult<Self> {
        value.parse()
    }
}

impl From<ActionType> for String {
    fn from(kind: ActionType) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TableAccess => "table-access",
            Self::RowFilter => "row-filter",
            Self::ColumnAccess => "column-access",
        })
    }
}

/// How a column-access entry's column list is read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnsMode {
    /// The listed patterns are the subject of the entry
    #[default]
    Include,
    /// Every column except the listed patterns is the subject
    Exclude,
}

/// One allow/deny rule scoped to a table pattern and action type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyActionEntry {
    pub verb: ActionVerb,
    #[serde(rename = "type", alias = "action_type")]
    pub action_type: ActionType,
    /// Qualified-name segments, e.g. `["SALES", "*"]`
    #[serde(alias = "table_pattern")]
    pub table: Vec<String>,
    /// Row predicate for row-filter entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Column patterns for column-access entries; absent means all columns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub columns_mode: ColumnsMode,
    #[serde(default)]
    pub exclusive: bool,
}

impl PolicyActionEntry {
    pub fn new(verb: ActionVerb, action_type: ActionType, table: &[&str]) -> Self {
        Self {
            verb,
            action_type,
            table: table.iter().map(|s| s.to_string()).collect(),
            expression: None,
            columns: None,
            columns_mode: ColumnsMode::Include,
            exclusive: false,
        }
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    pub fn with_columns(mut self, mode: ColumnsMode, columns: &[&str]) -> Self {
        self.columns_mode = mode;
        self.columns = Some(columns.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Structural checks applied when policies are loaded
    pub fn validate(&self, policy: &str) -> MillResult<()> {
        if self.table.is_empty() || self.table.iter().any(|s| s.trim().is_empty()) {
            return Err(MillError::policy_configuration(format!(
                "Policy '{policy}' has an empty table pattern"
            )));
        }
        match self.action_type {
            ActionType::RowFilter => {
                let Some(expression) = self.expression.as_deref() else {
                    return Err(MillError::policy_configuration(format!(
                        "Row filter in policy '{policy}' has no expression"
                    )));
                };
                mill_sql::check_syntax(expression).map_err(|e| {
                    MillError::policy_configuration(format!(
                        "Row filter in policy '{policy}' is invalid: {e}"
                    ))
                })?;
            }
            ActionType::ColumnAccess => {
                if let Some(columns) = &self.columns {
                    if columns.iter().any(|c| c.trim().is_empty()) {
                        return Err(MillError::policy_configuration(format!(
                            "Column access in policy '{policy}' has an empty column pattern"
                        )));
                    }
                }
            }
            ActionType::TableAccess => {}
        }
        Ok(())
    }
}

/// A named set of actions. Authorities select policies by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    #[serde(default)]
    pub actions: Vec<PolicyActionEntry>,
}

impl Policy {
    pub fn new(name: impl Into<String>, actions: Vec<PolicyActionEntry>) -> Self {
        Self {
            name: name.into(),
            actions,
        }
    }

    pub fn validate(&self) -> MillResult<()> {
        if self.name.trim().is_empty() {
            return Err(MillError::policy_configuration("Policy without a name"));
        }
        self.actions.iter().try_for_each(|a| a.validate(&self.name))
    }
}

/// Validates a list of policies, rejecting duplicate names
pub fn validate_policies(policies: &[Policy]) -> MillResult<()> {
    let mut seen = std::collections::HashSet::new();
    for policy in policies {
        policy.validate()?;
        if !seen.insert(policy.name.to_lowercase()) {
            return Err(MillError::policy_configuration(format!(
                "Duplicate policy name '{}'",
                policy.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_entry_from_json() {
        let json = r#"{
            "verb": "deny",
            "type": "ROW_FILTER",
            "table": ["SALES", "CLIENT"],
            "expression": "region = 'EU'",
            "exclusive": true
        }"#;
        let entry: PolicyActionEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.verb, ActionVerb::Deny);
        assert_eq!(entry.action_type, ActionType::RowFilter);
        assert!(entry.exclusive);
        assert_eq!(entry.columns_mode, ColumnsMode::Include);
        entry.validate("p").unwrap();
    }

    #[test]
    fn unknown_verb_is_rejected() {
        let json = r#"{"verb": "MAYBE", "type": "table-access", "table": ["A", "B"]}"#;
        let err = serde_json::from_str::<PolicyActionEntry>(json).unwrap_err();
        assert!(err.to_string().contains("Unknown policy verb"));
        assert!(matches!(
            "maybe".parse::<ActionVerb>(),
            Err(MillError::PolicyConfiguration { .. })
        ));
    }

    #[test]
    fn row_filter_needs_valid_expression() {
        let entry = PolicyActionEntry::new(ActionVerb::Allow, ActionType::RowFilter, &["A", "B"]);
        assert!(entry.validate("p").is_err());
        let entry = entry.with_expression("x = = 1");
        assert!(matches!(
            entry.validate("p"),
            Err(MillError::PolicyConfiguration { .. })
        ));
    }

    #[test]
    fn duplicate_policy_names_are_rejected() {
        let policies = vec![Policy::new("analyst", vec![]), Policy::new("ANALYST", vec![])];
        assert!(validate_policies(&policies).is_err());
    }

    #[test]
    fn verbs_serialize_upper_case() {
        let entry = PolicyActionEntry::new(ActionVerb::Allow, ActionType::ColumnAccess, &["A", "*"])
            .with_columns(ColumnsMode::Exclude, &["pii_*"]);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["verb"], "ALLOW");
        assert_eq!(json["type"], "column-access");
        assert_eq!(json["columns_mode"], "exclude");
    }
}
