// SPDX-License-Identifier: Apache-2.0

//! Expression and plan builders.

use compact_str::CompactString;
use std::sync::Arc;

use super::expr::{CompareOp, Expr};
use super::{AggregateCall, JoinKind, Plan, PlanNode, ProjectItem, ScanNode, SortKey};
use crate::value::Value;

pub fn col(index: usize) -> Expr {
    Expr::Field(index)
}

pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Literal(value.into())
}

fn compare(op: CompareOp, left: Expr, right: Expr) -> Expr {
    Expr::Compare {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

pub fn eq(left: Expr, right: Expr) -> Expr {
    compare(CompareOp::Eq, left, right)
}

pub fn ne(left: Expr, right: Expr) -> Expr {
    compare(CompareOp::NotEq, left, right)
}

pub fn lt(left: Expr, right: Expr) -> Expr {
    compare(CompareOp::Lt, left, right)
}

pub fn le(left: Expr, right: Expr) -> Expr {
    compare(CompareOp::LtEq, left, right)
}

pub fn gt(left: Expr, right: Expr) -> Expr {
    compare(CompareOp::Gt, left, right)
}

pub fn ge(left: Expr, right: Expr) -> Expr {
    compare(CompareOp::GtEq, left, right)
}

pub fn and(left: Expr, right: Expr) -> Expr {
    Expr::And(Box::new(left), Box::new(right))
}

pub fn or(left: Expr, right: Expr) -> Expr {
    Expr::Or(Box::new(left), Box::new(right))
}

pub fn not(expr: Expr) -> Expr {
    Expr::Not(Box::new(expr))
}

pub fn is_null(expr: Expr) -> Expr {
    Expr::IsNull(Box::new(expr))
}

pub fn is_not_null(expr: Expr) -> Expr {
    Expr::IsNotNull(Box::new(expr))
}

pub fn like(expr: Expr, pattern: impl Into<String>) -> Expr {
    Expr::Like {
        expr: Box::new(expr),
        pattern: pattern.into(),
        negated: false,
    }
}

pub fn in_list(expr: Expr, list: Vec<Expr>) -> Expr {
    Expr::InList {
        expr: Box::new(expr),
        list,
        negated: false,
    }
}

/// AND of every expression, `None` when empty
pub fn and_all(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
    exprs.into_iter().reduce(and)
}

/// OR of every expression, `None` when empty
pub fn or_all(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
    exprs.into_iter().reduce(or)
}

/// Fluent construction of a plan tree, bottom-up
#[derive(Debug, Clone)]
pub struct PlanBuilder {
    node: Arc<PlanNode>,
}

impl PlanBuilder {
    pub fn scan(scan: ScanNode) -> Self {
        Self {
            node: Arc::new(PlanNode::Scan(scan)),
        }
    }

    pub fn from_node(node: Arc<PlanNode>) -> Self {
        Self { node }
    }

    pub fn filter(self, condition: Expr) -> Self {
        Self {
            node: Arc::new(PlanNode::Filter {
                input: self.node,
                condition,
            }),
        }
    }

    /// Projects `(expression, output name)` pairs
    pub fn project<N: Into<CompactString>>(self, items: impl IntoIterator<Item = (Expr, N)>) -> Self {
        let items = items
            .into_iter()
            .map(|(expr, name)| ProjectItem {
                expr,
                name: name.into(),
            })
            .collect();
        Self {
            node: Arc::new(PlanNode::Project {
                input: self.node,
                items,
            }),
        }
    }

    /// Projects input fields by position, keeping their names
    pub fn select(self, indexes: &[usize]) -> Self {
        let fields = self.node.output_fields();
        let items: Vec<(Expr, CompactString)> = indexes
            .iter()
            .map(|&i| {
                let name = fields
                    .get(i)
                    .map(|f| f.name.clone())
                    .unwrap_or_else(|| CompactString::from(format!("f{i}")));
                (Expr::Field(i), name)
            })
            .collect();
        self.project(items)
    }

    pub fn aggregate(self, group_by: Vec<usize>, aggregates: Vec<AggregateCall>) -> Self {
        Self {
            node: Arc::new(PlanNode::Aggregate {
                input: self.node,
                group_by,
                aggregates,
            }),
        }
    }

    pub fn sort(self, keys: Vec<SortKey>) -> Self {
        Self {
            node: Arc::new(PlanNode::Sort {
                input: self.node,
                keys,
            }),
        }
    }

    pub fn join(self, right: PlanBuilder, kind: JoinKind, condition: Expr) -> Self {
        Self {
            node: Arc::new(PlanNode::Join {
                left: self.node,
                right: right.node,
                kind,
                condition,
            }),
        }
    }

    pub fn limit(self, offset: u64, fetch: Option<u64>) -> Self {
        Self {
            node: Arc::new(PlanNode::Limit {
                input: self.node,
                offset,
                fetch,
            }),
        }
    }

    pub fn node(&self) -> &Arc<PlanNode> {
        &self.node
    }

    pub fn build(self) -> Plan {
        Plan::from_arc(self.node)
    }
}
