// SPDX-License-Identifier: Apache-2.0

//! Policy selection from a caller's granted authorities
//!
//! ALLOW entries apply from the policies the caller's authorities name.
//! DENY entries apply from the policies the caller's authorities do NOT
//! name: holding the authority exempts the caller from the deny rule.

use std::collections::{HashMap, HashSet};

use super::model::ActionVerb;

/// Authority set of one requester, after remapping to policy names
#[derive(Debug, Clone, Default)]
pub struct PolicySelector {
    authorities: HashSet<String>,
}

impl PolicySelector {
    /// Builds a selector; `remap` translates authority names to policy names.
    /// Authorities without a remap entry are used as policy names directly.
    pub fn new<I, S>(authorities: I, remap: &HashMap<String, String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let remap: HashMap<String, &str> = remap
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.as_str()))
            .collect();
        let authorities = authorities
            .into_iter()
            .map(|a| {
                let key = a.as_ref().to_lowercase();
                match remap.get(&key) {
                    Some(policy) => policy.to_lowercase(),
                    None => key,
                }
            })
            .collect();
        Self { authorities }
    }

    /// A selector with no authorities: every policy applies as DENY
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn holds(&self, policy_name: &str) -> bool {
        self.authorities.contains(&policy_name.to_lowercase())
    }

    pub fn is_selected(&self, verb: ActionVerb, policy_name: &str) -> bool {
        match verb {
            ActionVerb::Allow => self.holds(policy_name),
            ActionVerb::Deny => !self.holds(policy_name),
        }
    }

    /// Filters candidate policy names down to those selected for `verb`
    pub fn select<'a, I>(&self, verb: ActionVerb, candidates: I) -> Vec<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        candidates
            .into_iter()
            .filter(|name| self.is_selected(verb, name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_selects_held_policies() {
        let selector = PolicySelector::new(["analyst"], &HashMap::new());
        let selected = selector.select(ActionVerb::Allow, ["analyst", "auditor"]);
        assert_eq!(selected, vec!["analyst"]);
    }

    #[test]
    fn deny_selects_policies_not_held() {
        let selector = PolicySelector::new(["analyst"], &HashMap::new());
        let selected = selector.select(ActionVerb::Deny, ["analyst", "auditor"]);
        assert_eq!(selected, vec!["auditor"]);
    }

    #[test]
    fn remap_translates_authorities() {
        let remap = HashMap::from([("ROLE_SALES".to_string(), "sales-readers".to_string())]);
        let selector = PolicySelector::new(["role_sales", "other"], &remap);
        assert!(selector.holds("SALES-READERS"));
        assert!(selector.holds("other"));
        assert!(!selector.holds("role_sales"));
    }

    #[test]
    fn anonymous_is_denied_everything() {
        let selector = PolicySelector::anonymous();
        assert!(selector.is_selected(ActionVerb::Deny, "p"));
        assert!(!selector.is_selected(ActionVerb::Allow, "p"));
    }
}
