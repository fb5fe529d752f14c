// SPDX-License-Identifier: Apache-2.0

//! Policy-driven plan rewriting
//!
//! Every restricted scan is replaced by `Scan -> Filter -> Project`: the
//! filter evaluates `ALLOW AND NOT DENY` row predicates and the projection
//! keeps the visible columns. Parents are rebuilt bottom-up with their field
//! references remapped; untouched subtrees stay shared. Any failure denies
//! access instead of falling back to the unfiltered plan.

use std::sync::Arc;

use mill_core::plan::builder::{and, not, or_all};
use mill_core::plan::{AggregateCall, Expr, Plan, PlanNode, ProjectItem, ScanNode, SortKey};
use mill_core::traits::ExpressionParser;
use mill_core::{MillError, MillResult};

use super::resolver::PolicyActionResolver;

/// A rewritten subtree plus the map from old output positions to new ones.
/// `mapping == None` means positions are unchanged.
struct Rewritten {
    node: Arc<PlanNode>,
    mapping: Option<Vec<Option<usize>>>,
}

impl Rewritten {
    fn unchanged(node: &Arc<PlanNode>) -> Self {
        Self {
            node: Arc::clone(node),
            mapping: None,
        }
    }

    fn is_same(&self, original: &Arc<PlanNode>) -> bool {
        Arc::ptr_eq(&self.node, original)
    }

    fn map(&self, index: usize) -> Option<usize> {
        match &self.mapping {
            None => Some(index),
            Some(mapping) => mapping.get(index).copied().flatten(),
        }
    }
}

fn hidden_reference(node: &str) -> MillError {
    MillError::access_denied(format!("{node} references a column hidden by policy"))
}

/// Applies resolved policy actions to a plan
pub struct PolicyRewriter<'a> {
    resolver: PolicyActionResolver<'a>,
    parser: &'a dyn ExpressionParser,
}

impl<'a> PolicyRewriter<'a> {
    pub fn new(resolver: PolicyActionResolver<'a>, parser: &'a dyn ExpressionParser) -> Self {
        Self { resolver, parser }
    }

    /// Returns the restricted plan. When no policy applies, the returned plan
    /// shares its root with the input.
    pub fn rewrite(&self, plan: &Plan) -> MillResult<Plan> {
        let rewritten = self.rewrite_node(plan.root())?;
        if rewritten.is_same(plan.root()) {
            return Ok(plan.clone());
        }
        Ok(Plan::from_arc(rewritten.node))
    }

    fn rewrite_node(&self, node: &Arc<PlanNode>) -> MillResult<Rewritten> {
        match node.as_ref() {
            PlanNode::Scan(scan) => self.restrict_scan(node, scan),
            PlanNode::Filter { input, condition } => {
                let inner = self.rewrite_node(input)?;
                if inner.is_same(input) {
                    return Ok(Rewritten::unchanged(node));
                }
                let condition = remap(&inner, condition).ok_or_else(|| hidden_reference("filter"))?;
                Ok(Rewritten {
                    node: Arc::new(PlanNode::Filter {
                        input: inner.node,
                        condition,
                    }),
                    mapping: inner.mapping,
                })
            }
            PlanNode::Project { input, items } => {
                let inner = self.rewrite_node(input)?;
                if inner.is_same(input) {
                    return Ok(Rewritten::unchanged(node));
                }
                let mut kept = Vec::with_capacity(items.len());
                let mut mapping = Vec::with_capacity(items.len());
                for item in items {
                    if let Expr::Field(i) = item.expr {
                        if inner.map(i).is_none() {
                            mapping.push(None);
                            continue;
                        }
                    }
                    let expr = remap(&inner, &item.expr).ok_or_else(|| hidden_reference("projection"))?;
                    mapping.push(Some(kept.len()));
                    kept.push(ProjectItem {
                        expr,
                        name: item.name.clone(),
                    });
                }
                if kept.is_empty() {
                    return Err(MillError::access_denied("every projected column is hidden"));
                }
                let mapping = mapping.iter().any(Option::is_none).then_some(mapping);
                Ok(Rewritten {
                    node: Arc::new(PlanNode::Project {
                        input: inner.node,
                        items: kept,
                    }),
                    mapping,
                })
            }
            PlanNode::Aggregate {
                input,
                group_by,
                aggregates,
            } => {
                let inner = self.rewrite_node(input)?;
                if inner.is_same(input) {
                    return Ok(Rewritten::unchanged(node));
                }
                let group_by = group_by
                    .iter()
                    .map(|&i| inner.map(i))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| hidden_reference("aggregate grouping"))?;
                let aggregates = aggregates
                    .iter()
                    .map(|call| {
                        let arg = match call.arg {
                            Some(i) => Some(inner.map(i).ok_or_else(|| hidden_reference("aggregate"))?),
                            None => None,
                        };
                        Ok(AggregateCall { arg, ..call.clone() })
                    })
                    .collect::<MillResult<Vec<_>>>()?;
                Ok(Rewritten {
                    node: Arc::new(PlanNode::Aggregate {
                        input: inner.node,
                        group_by,
                        aggregates,
                    }),
                    mapping: None,
                })
            }
            PlanNode::Sort { input, keys } => {
                let inner = self.rewrite_node(input)?;
                if inner.is_same(input) {
                    return Ok(Rewritten::unchanged(node));
                }
                let keys = keys
                    .iter()
                    .map(|key| {
                        inner.map(key.index).map(|index| SortKey {
                            index,
                            ..*key
                        })
                    })
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| hidden_reference("sort"))?;
                Ok(Rewritten {
                    node: Arc::new(PlanNode::Sort {
                        input: inner.node,
                        keys,
                    }),
                    mapping: inner.mapping,
                })
            }
            PlanNode::Limit {
                input,
                offset,
                fetch,
            } => {
                let inner = self.rewrite_node(input)?;
                if inner.is_same(input) {
                    return Ok(Rewritten::unchanged(node));
                }
                Ok(Rewritten {
                    node: Arc::new(PlanNode::Limit {
                        input: inner.node,
                        offset: *offset,
                        fetch: *fetch,
                    }),
                    mapping: inner.mapping,
                })
            }
            PlanNode::Join {
                left,
                right,
                kind,
                condition,
            } => {
                let l = self.rewrite_node(left)?;
                let r = self.rewrite_node(right)?;
                if l.is_same(left) && r.is_same(right) {
                    return Ok(Rewritten::unchanged(node));
                }
                let old_left = left.output_fields().len();
                let old_right = right.output_fields().len();
                let new_left = l.node.output_fields().len();
                let combined: Vec<Option<usize>> = (0..old_left)
                    .map(|i| l.map(i))
                    .chain((0..old_right).map(|j| r.map(j).map(|k| k + new_left)))
                    .collect();
                let joined = Rewritten {
                    node: Arc::clone(node),
                    mapping: Some(combined),
                };
                let condition = remap(&joined, condition).ok_or_else(|| hidden_reference("join"))?;
                let identity = joined
                    .mapping
                    .as_ref()
                    .is_some_and(|m| m.iter().enumerate().all(|(i, p)| *p == Some(i)));
                Ok(Rewritten {
                    node: Arc::new(PlanNode::Join {
                        left: l.node,
                        right: r.node,
                        kind: *kind,
                        condition,
                    }),
                    mapping: if identity { None } else { joined.mapping },
                })
            }
        }
    }

    fn restrict_scan(&self, node: &Arc<PlanNode>, scan: &ScanNode) -> MillResult<Rewritten> {
        let name = scan.qualified_name();
        let resolved = self.resolver.resolve(&name);
        if resolved.is_unrestricted() {
            return Ok(Rewritten::unchanged(node));
        }
        if resolved.table_denied {
            return Err(MillError::access_denied(format!(
                "table {}.{} is denied",
                scan.schema, scan.table
            )));
        }

        let matcher = self.resolver.matcher();
        let visible: Vec<usize> = scan
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| resolved.column_access.is_visible(matcher, &f.name))
            .map(|(i, _)| i)
            .collect();
        if visible.is_empty() {
            return Err(MillError::access_denied(format!(
                "no column of {}.{} is visible",
                scan.schema, scan.table
            )));
        }
        if let Some(filter) = &scan.filter {
            if filter.remap_fields(&|i| visible.contains(&i).then_some(i)).is_none() {
                return Err(hidden_reference("scan filter"));
            }
        }

        let allow = self.parse_filters(scan, &resolved.allow_filters)?;
        let deny = self.parse_filters(scan, &resolved.deny_filters)?;
        let condition = match (allow, deny) {
            (Some(a), Some(d)) => Some(and(a, not(d))),
            (Some(a), None) => Some(a),
            (None, Some(d)) => Some(not(d)),
            (None, None) => None,
        };

        let mut current = Arc::clone(node);
        if let Some(condition) = condition {
            tracing::debug!(table = %scan.table, "Injecting policy row filter");
            current = Arc::new(PlanNode::Filter {
                input: current,
                condition,
            });
        }

        let mut mapping = None;
        if visible.len() < scan.fields.len() {
            let items = visible
                .iter()
                .filter_map(|&i| scan.fields.get(i))
                .zip(&visible)
                .map(|(f, &i)| ProjectItem {
                    expr: Expr::Field(i),
                    name: f.name.clone(),
                })
                .collect();
            current = Arc::new(PlanNode::Project {
                input: current,
                items,
            });
            let mut positions = vec![None; scan.fields.len()];
            for (new, &old) in visible.iter().enumerate() {
                positions[old] = Some(new);
            }
            mapping = Some(positions);
        }

        Ok(Rewritten {
            node: current,
            mapping,
        })
    }

    fn parse_filters(&self, scan: &ScanNode, filters: &[String]) -> MillResult<Option<Expr>> {
        let exprs = filters
            .iter()
            .map(|text| {
                self.parser.parse_expression(text, &scan.fields).map_err(|e| {
                    tracing::warn!(table = %scan.table, "Policy row filter rejected: {}", e);
                    MillError::access_denied(format!(
                        "row filter '{text}' on {}.{} failed: {e}",
                        scan.schema, scan.table
                    ))
                })
            })
            .collect::<MillResult<Vec<_>>>()?;
        Ok(or_all(exprs))
    }
}

fn remap(rewritten: &Rewritten, expr: &Expr) -> Option<Expr> {
    expr.remap_fields(&|i| rewritten.map(i))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use mill_core::plan::builder::{col, eq, gt, lit, PlanBuilder};
    use mill_core::plan::{AggregateFunction, JoinKind};
    use mill_core::types::LogicalType;
    use mill_core::vectors::Schema;
    use mill_sql::SqlExpressionParser;

    use crate::policy::matcher::PolicyMatcher;
    use crate::policy::model::{ActionType, ActionVerb, ColumnsMode, Policy, PolicyActionEntry};
    use crate::policy::selector::PolicySelector;
    use super::*;

    fn client_scan() -> ScanNode {
        let schema = Schema::new([
            ("id", LogicalType::BigInt, false),
            ("name", LogicalType::String, true),
            ("region", LogicalType::String, true),
            ("pii_ssn", LogicalType::String, true),
        ]);
        ScanNode::new("SALES", "CLIENT", schema.fields)
    }

    fn rewrite(policies: &[Policy], authorities: &[&str], plan: &Plan) -> MillResult<Plan> {
        let matcher = PolicyMatcher::new();
        let selector = PolicySelector::new(authorities.iter().copied(), &HashMap::new());
        let parser = SqlExpressionParser::new();
        let resolver = PolicyActionResolver::new(policies, &selector, &matcher);
        PolicyRewriter::new(resolver, &parser).rewrite(plan)
    }

    fn hide_pii() -> Policy {
        Policy::new(
            "pii-reader",
            vec![
                PolicyActionEntry::new(ActionVerb::Deny, ActionType::ColumnAccess, &["SALES", "*"])
                    .with_columns(ColumnsMode::Include, &["pii_*"]),
            ],
        )
    }

    #[test]
    fn unmatched_plan_is_returned_as_is() {
        let plan = PlanBuilder::scan(client_scan()).filter(gt(col(0), lit(1i64))).build();
        let policies = vec![hide_pii()];
        let out = rewrite(&policies, &["pii-reader"], &plan).unwrap();
        assert!(out.ptr_eq(&plan));
    }

    #[test]
    fn injects_filter_and_projection_above_scan() {
        let policies = vec![
            hide_pii(),
            Policy::new(
                "analyst",
                vec![PolicyActionEntry::new(ActionVerb::Allow, ActionType::RowFilter, &["SALES", "CLIENT"])
                    .with_expression("region = 'EU'")],
            ),
        ];
        let plan = PlanBuilder::scan(client_scan()).build();
        let out = rewrite(&policies, &["analyst"], &plan).unwrap();

        let PlanNode::Project { input, items } = out.root().as_ref() else {
            panic!("expected projection, got {}", out.root().name());
        };
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|i| i.name != "pii_ssn"));
        let PlanNode::Filter { input, condition } = input.as_ref() else {
            panic!("expected filter");
        };
        assert_eq!(condition, &eq(col(2), lit("EU")));
        assert!(matches!(input.as_ref(), PlanNode::Scan(_)));
    }

    #[test]
    fn deny_only_filter_is_negated() {
        let policies = vec![Policy::new(
            "internal",
            vec![PolicyActionEntry::new(ActionVerb::Deny, ActionType::RowFilter, &["SALES", "*"])
                .with_expression("region = 'US'")],
        )];
        let plan = PlanBuilder::scan(client_scan()).build();
        let out = rewrite(&policies, &[], &plan).unwrap();
        let PlanNode::Filter { condition, .. } = out.root().as_ref() else {
            panic!("expected filter");
        };
        assert_eq!(condition, &not(eq(col(2), lit("US"))));
    }

    #[test]
    fn parent_references_are_remapped() {
        let policies = vec![hide_pii()];
        let plan = PlanBuilder::scan(client_scan())
            .select(&[2, 3, 0])
            .filter(eq(col(0), lit("EU")))
            .build();
        let out = rewrite(&policies, &[], &plan).unwrap();
        let fields = out.output_fields();
        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["region", "id"]);
        let PlanNode::Filter { condition, .. } = out.root().as_ref() else {
            panic!("expected filter");
        };
        assert_eq!(condition, &eq(col(0), lit("EU")));
    }

    #[test]
    fn computing_over_hidden_column_is_denied() {
        let policies = vec![hide_pii()];
        let plan = PlanBuilder::scan(client_scan())
            .filter(eq(col(3), lit("123")))
            .build();
        let err = rewrite(&policies, &[], &plan).unwrap_err();
        assert!(matches!(err, MillError::AccessDenied { .. }));
        assert_eq!(err.to_string(), "Access denied");
    }

    #[test]
    fn pushed_scan_filter_over_hidden_column_is_denied() {
        let policies = vec![hide_pii()];
        let scan = client_scan().with_filter(Some(eq(col(3), lit("333"))));
        let err = rewrite(&policies, &[], &PlanBuilder::scan(scan).build()).unwrap_err();
        assert!(matches!(err, MillError::AccessDenied { .. }));
        assert_eq!(err.to_string(), "Access denied");

        let visible = client_scan().with_filter(Some(eq(col(2), lit("EU"))));
        let out = rewrite(&policies, &[], &PlanBuilder::scan(visible).build()).unwrap();
        assert_eq!(out.output_fields().len(), 3);
    }

    #[test]
    fn invalid_row_filter_fails_closed() {
        let policies = vec![Policy::new(
            "p",
            vec![PolicyActionEntry::new(ActionVerb::Deny, ActionType::RowFilter, &["SALES", "CLIENT"])
                .with_expression("no_such_column = 1")],
        )];
        let plan = PlanBuilder::scan(client_scan()).build();
        let err = rewrite(&policies, &[], &plan).unwrap_err();
        assert!(matches!(err, MillError::AccessDenied { .. }));
    }

    #[test]
    fn denied_table_and_empty_column_set() {
        let denied = vec![Policy::new(
            "p",
            vec![PolicyActionEntry::new(ActionVerb::Deny, ActionType::TableAccess, &["SALES", "CLIENT"])],
        )];
        let plan = PlanBuilder::scan(client_scan()).build();
        assert!(rewrite(&denied, &[], &plan).is_err());
        assert!(rewrite(&denied, &["p"], &plan).unwrap().ptr_eq(&plan));

        let all_hidden = vec![Policy::new(
            "p",
            vec![PolicyActionEntry::new(ActionVerb::Deny, ActionType::ColumnAccess, &["SALES", "*"])],
        )];
        assert!(rewrite(&all_hidden, &[], &plan).is_err());
    }

    #[test]
    fn join_and_aggregate_are_rebuilt() {
        let orders = ScanNode::new(
            "SALES",
            "ORDERS",
            Schema::new([
                ("client_id", LogicalType::BigInt, false),
                ("amount", LogicalType::Double, true),
            ])
            .fields,
        );
        let policies = vec![hide_pii()];
        let plan = PlanBuilder::scan(client_scan())
            .join(PlanBuilder::scan(orders.clone()), JoinKind::Inner, eq(col(0), col(4)))
            .aggregate(
                vec![1],
                vec![AggregateCall::new(AggregateFunction::Sum, Some(5), "total")],
            )
            .build();
        let out = rewrite(&policies, &[], &plan).unwrap();

        let PlanNode::Aggregate { input, group_by, aggregates } = out.root().as_ref() else {
            panic!("expected aggregate");
        };
        assert_eq!(group_by, &vec![1]);
        assert_eq!(aggregates[0].arg, Some(4));
        let PlanNode::Join { right, condition, .. } = input.as_ref() else {
            panic!("expected join");
        };
        assert_eq!(condition, &eq(col(0), col(3)));
        // Untouched subtree stays shared.
        let original_right = match plan.root().inputs()[0].as_ref() {
            PlanNode::Join { right, .. } => Arc::clone(right),
            _ => unreachable!(),
        };
        assert!(Arc::ptr_eq(right, &original_right));
    }
}
