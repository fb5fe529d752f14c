// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use mill_core::plan::builder::{col, gt, lit, PlanBuilder};
use mill_core::plan::{AggregateCall, AggregateFunction, SortKey};
use mill_core::vectors::VectorBlockReader;
use mill_core::Value;
use mill_drivers::SqliteBackend;
use mill_lib::config::{MillConfig, SecuritySettings};
use mill_lib::policy::{ActionType, ActionVerb, ColumnsMode, Policy, PolicyActionEntry};
use mill_lib::{DataService, QueryExecutionConfig, SecurityContext, SubmitQueryRequest};

async fn sqlite_service(enabled: bool) -> DataService {
    let backend = SqliteBackend::connect("sqlite::memory:", 1).await.unwrap();
    for statement in [
        "CREATE TABLE orders (id INTEGER NOT NULL, region TEXT, amount REAL, card_number TEXT)",
        "INSERT INTO orders VALUES (1, 'EU', 10.0, '4111')",
        "INSERT INTO orders VALUES (2, 'US', 20.0, '4222')",
        "INSERT INTO orders VALUES (3, 'EU', 30.0, '4333')",
        "INSERT INTO orders VALUES (4, 'APAC', 40.0, '4444')",
    ] {
        sqlx::query(statement).execute(backend.pool()).await.unwrap();
    }

    let policy = Policy::new(
        "eu-analyst",
        vec![
            PolicyActionEntry::new(ActionVerb::Allow, ActionType::RowFilter, &["main", "orders"])
                .with_expression("region = 'EU'"),
            PolicyActionEntry::new(ActionVerb::Allow, ActionType::ColumnAccess, &["main", "orders"])
                .with_columns(ColumnsMode::Exclude, &["card_*"]),
        ],
    );
    let config = MillConfig {
        security: SecuritySettings {
            enabled,
            policies: vec![policy],
            ..Default::default()
        },
        ..Default::default()
    };
    DataService::new(&config, Arc::new(backend)).unwrap()
}

#[tokio::test]
async fn zero_row_query_returns_schema() {
    let service = sqlite_service(false).await;
    let scan = service
        .paging()
        .execution()
        .create_named_scan("main", "orders")
        .await
        .unwrap();
    let plan = PlanBuilder::scan(scan).filter(gt(col(0), lit(100i64))).build();
    let page = service
        .submit_query(
            &SecurityContext::anonymous(),
            SubmitQueryRequest::plan(plan, QueryExecutionConfig::with_fetch_size(10)),
        )
        .await
        .unwrap();
    assert!(page.paging_token.is_none());
    assert_eq!(page.block.row_count(), 0);
    assert_eq!(page.block.schema().len(), 4);
}

#[tokio::test]
async fn policy_rewrite_renders_to_sql() {
    let service = sqlite_service(true).await;
    let scan = service
        .paging()
        .execution()
        .create_named_scan("main", "orders")
        .await
        .unwrap();
    let plan = PlanBuilder::scan(scan)
        .aggregate(
            vec![1],
            vec![AggregateCall::new(AggregateFunction::Sum, Some(2), "total")],
        )
        .sort(vec![SortKey::asc(0)])
        .build();

    let ctx = SecurityContext::new("eve", ["eu-analyst"]);
    let page = service
        .submit_query(&ctx, SubmitQueryRequest::plan(plan, QueryExecutionConfig::default()))
        .await
        .unwrap();
    let rows = VectorBlockReader::new(&page.block).rows().unwrap();
    assert_eq!(rows, vec![vec![Value::from("EU"), Value::Float(40.0)]]);
}

#[tokio::test]
async fn excluded_columns_are_not_returned() {
    let service = sqlite_service(true).await;
    let scan = service
        .paging()
        .execution()
        .create_named_scan("main", "orders")
        .await
        .unwrap();
    let plan = PlanBuilder::scan(scan).build();
    let page = service
        .submit_query(
            &SecurityContext::new("eve", ["eu-analyst"]),
            SubmitQueryRequest::plan(plan, QueryExecutionConfig::with_fetch_size(1)),
        )
        .await
        .unwrap();
    let names: Vec<&str> = page.block.schema().fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["id", "region", "amount"]);
    assert_eq!(page.block.row_count(), 1);

    let mut total = 1;
    let mut token = page.paging_token;
    while let Some(t) = token {
        let next = service.fetch_result(&t.to_string()).await.unwrap();
        total += next.block.row_count();
        token = next.paging_token;
    }
    assert_eq!(total, 2);
}
