// SPDX-License-Identifier: Apache-2.0

//! SQL helpers for Mill: boolean expression parsing for policy row filters
//! and plan rendering for SQL backends.

pub mod expression;
pub mod generator;

pub use expression::{check_syntax, coerce_literal, parse_expression, SqlExpressionParser};
pub use generator::{plan_to_sql, SqlDialect, SqlGenerator};
