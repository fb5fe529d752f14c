// SPDX-License-Identifier: Apache-2.0

//! Logical plan model
//!
//! A `Plan` is an immutable tree of relational operators. Nodes are shared
//! through `Arc`, so rewriting a subtree rebuilds only the path from that
//! subtree to the root and leaves every untouched branch shared.

pub mod builder;
mod expr;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::types::LogicalType;
use crate::vectors::{Field, Schema};

pub use expr::{CompareOp, Expr};

/// Leaf reading one `(schema, table)` by name.
///
/// `fields` is the table's initial schema, index-for-index with the
/// backend's column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanNode {
    pub schema: String,
    pub table: String,
    pub fields: Vec<Field>,
    pub filter: Option<Expr>,
}

impl ScanNode {
    pub fn new(schema: impl Into<String>, table: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            fields,
            filter: None,
        }
    }

    /// Copy of this scan with its pushed filter replaced
    pub fn with_filter(&self, filter: Option<Expr>) -> Self {
        Self {
            filter,
            ..self.clone()
        }
    }

    pub fn qualified_name(&self) -> [&str; 2] {
        [&self.schema, &self.table]
    }

    pub fn is_table(&self, schema: &str, table: &str) -> bool {
        self.schema.eq_ignore_ascii_case(schema) && self.table.eq_ignore_ascii_case(table)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectItem {
    pub expr: Expr,
    pub name: CompactString,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

/// One aggregate output. `arg` is `None` only for `COUNT(*)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateCall {
    pub function: AggregateFunction,
    pub arg: Option<usize>,
    pub name: CompactString,
}

impl AggregateCall {
    pub fn new(function: AggregateFunction, arg: Option<usize>, name: impl Into<CompactString>) -> Self {
        Self {
            function,
            arg,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub index: usize,
    pub descending: bool,
    pub nulls_first: bool,
}

impl SortKey {
    pub fn asc(index: usize) -> Self {
        Self {
            index,
            descending: false,
            nulls_first: false,
        }
    }

    pub fn desc(index: usize) -> Self {
        Self {
            index,
            descending: true,
            nulls_first: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanNode {
    Scan(ScanNode),
    Filter {
        input: Arc<PlanNode>,
        condition: Expr,
    },
    Project {
        input: Arc<PlanNode>,
        items: Vec<ProjectItem>,
    },
    Aggregate {
        input: Arc<PlanNode>,
        group_by: Vec<usize>,
        aggregates: Vec<AggregateCall>,
    },
    Sort {
        input: Arc<PlanNode>,
        keys: Vec<SortKey>,
    },
    /// Condition fields index the concatenation of left and right outputs
    Join {
        left: Arc<PlanNode>,
        right: Arc<PlanNode>,
        kind: JoinKind,
        condition: Expr,
    },
    Limit {
        input: Arc<PlanNode>,
        offset: u64,
        fetch: Option<u64>,
    },
}

impl PlanNode {
    pub fn name(&self) -> &'static str {
        match self {
            PlanNode::Scan(_) => "scan",
            PlanNode::Filter { .. } => "filter",
            PlanNode::Project { .. } => "project",
            PlanNode::Aggregate { .. } => "aggregate",
            PlanNode::Sort { .. } => "sort",
            PlanNode::Join { .. } => "join",
            PlanNode::Limit { .. } => "limit",
        }
    }

    pub fn inputs(&self) -> Vec<&Arc<PlanNode>> {
        match self {
            PlanNode::Scan(_) => Vec::new(),
            PlanNode::Filter { input, .. }
            | PlanNode::Project { input, .. }
            | PlanNode::Aggregate { input, .. }
            | PlanNode::Sort { input, .. }
            | PlanNode::Limit { input, .. } => vec![input],
            PlanNode::Join { left, right, .. } => vec![left, right],
        }
    }

    /// Fields this node produces, indexed positionally
    pub fn output_fields(&self) -> Vec<Field> {
        let columns: Vec<(CompactString, LogicalType, bool)> = match self {
            PlanNode::Scan(scan) => return reindex(scan.fields.clone()),
            PlanNode::Filter { input, .. }
            | PlanNode::Sort { input, .. }
            | PlanNode::Limit { input, .. } => return input.output_fields(),
            PlanNode::Project { input, items } => {
                let input_fields = input.output_fields();
                items
                    .iter()
                    .map(|item| {
                        let (logical, nullable) = item.expr.output_type(&input_fields);
                        (item.name.clone(), logical, nullable)
                    })
                    .collect()
            }
            PlanNode::Aggregate {
                input,
                group_by,
                aggregates,
            } => {
                let input_fields = input.output_fields();
                let keys = group_by.iter().filter_map(|i| input_fields.get(*i)).map(|f| {
                    (f.name.clone(), f.logical_type, f.nullable)
                });
                let aggs = aggregates.iter().map(|call| {
                    let arg = call.arg.and_then(|i| input_fields.get(i));
                    let logical = aggregate_type(call.function, arg.map(|f| f.logical_type));
                    let nullable = call.function != AggregateFunction::Count;
                    (call.name.clone(), logical, nullable)
                });
                keys.chain(aggs).collect()
            }
            PlanNode::Join {
                left, right, kind, ..
            } => {
                let mut fields = left.output_fields();
                fields.extend(right.output_fields().into_iter().map(|mut f| {
                    if *kind == JoinKind::Left {
                        f.nullable = true;
                    }
                    f
                }));
                return reindex(fields);
            }
        };
        Schema::new(columns).fields
    }
}

fn reindex(mut fields: Vec<Field>) -> Vec<Field> {
    for (i, field) in fields.iter_mut().enumerate() {
        field.index = i as u32;
    }
    fields
}

fn aggregate_type(function: AggregateFunction, arg: Option<LogicalType>) -> LogicalType {
    match (function, arg) {
        (AggregateFunction::Count, _) => LogicalType::BigInt,
        (AggregateFunction::Avg, _) => LogicalType::Double,
        (AggregateFunction::Sum, Some(t)) => match t {
            LogicalType::TinyInt | LogicalType::SmallInt | LogicalType::Int | LogicalType::BigInt => {
                LogicalType::BigInt
            }
            _ => LogicalType::Double,
        },
        (AggregateFunction::Min | AggregateFunction::Max, Some(t)) => t,
        (_, None) => LogicalType::BigInt,
    }
}

/// Executable plan: a root node plus the tree below it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    root: Arc<PlanNode>,
}

impl Plan {
    pub fn new(root: PlanNode) -> Self {
        Self {
            root: Arc::new(root),
        }
    }

    pub fn from_arc(root: Arc<PlanNode>) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Arc<PlanNode> {
        &self.root
    }

    pub fn output_fields(&self) -> Vec<Field> {
        self.root.output_fields()
    }

    pub fn output_schema(&self) -> Schema {
        Schema {
            fields: self.output_fields(),
        }
    }

    /// First scan of `(schema, table)` in depth-first order
    pub fn find_scan(&self, schema: &str, table: &str) -> Option<&ScanNode> {
        self.scans().into_iter().find(|s| s.is_table(schema, table))
    }

    /// Every scan leaf, depth-first, left to right
    pub fn scans(&self) -> Vec<&ScanNode> {
        fn walk<'a>(node: &'a PlanNode, out: &mut Vec<&'a ScanNode>) {
            if let PlanNode::Scan(scan) = node {
                out.push(scan);
            }
            for input in node.inputs() {
                walk(input, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.root, &mut out);
        out
    }

    /// Whether both plans share the same root allocation
    pub fn ptr_eq(&self, other: &Plan) -> bool {
        Arc::ptr_eq(&self.root, &other.root)
    }
}
