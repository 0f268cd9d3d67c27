//! End-to-end migrations against the in-process engine.

use std::sync::Arc;

use dbshift::core::generic;
use dbshift::{
    BroadcastNotifier, ColumnDefinition, Config, ConnectionConfig, DriverRegistry, EtlStep,
    ExtractionConfig, ForeignKeyDefinition, MemoryDriver, MigrationService, Row, RowValue,
    SqlKind, StatusEvent, TableDefinition,
};
use tempfile::TempDir;
use uuid::Uuid;

fn customers() -> TableDefinition {
    TableDefinition::new(
        "main",
        "customers",
        vec![
            ColumnDefinition::builder("id", "int", generic::INTEGER)
                .ordinal_position(1)
                .nullable(false)
                .build(),
            ColumnDefinition::builder("name", "varchar", generic::VARCHAR)
                .ordinal_position(2)
                .length(100)
                .build(),
            ColumnDefinition::builder("notes", "TEXT", generic::LONGVARCHAR)
                .ordinal_position(3)
                .length(i32::MAX)
                .build(),
        ],
        vec!["id".into()],
        vec![],
        vec![],
    )
    .unwrap()
}

fn orders() -> TableDefinition {
    TableDefinition::new(
        "main",
        "orders",
        vec![
            ColumnDefinition::builder("id", "int", generic::INTEGER)
                .ordinal_position(1)
                .nullable(false)
                .build(),
            ColumnDefinition::builder("customer_id", "int", generic::INTEGER)
                .ordinal_position(2)
                .nullable(false)
                .build(),
            ColumnDefinition::builder("paid", "bit", generic::BIT)
                .ordinal_position(3)
                .build(),
        ],
        vec!["id".into()],
        vec![ForeignKeyDefinition::new("fk_orders_customers", "customers")
            .with_pair("customer_id", "id")],
        vec![],
    )
    .unwrap()
}

fn customer(id: i64, name: &str) -> Row {
    Row::from([
        ("id".to_string(), RowValue::Int(id)),
        ("name".to_string(), RowValue::Text(name.to_string())),
        ("notes".to_string(), RowValue::Null),
    ])
}

fn order(id: i64, customer_id: i64, paid: bool) -> Row {
    Row::from([
        ("id".to_string(), RowValue::Int(id)),
        ("customer_id".to_string(), RowValue::Int(customer_id)),
        ("paid".to_string(), RowValue::Bool(paid)),
    ])
}

/// Origin `erp` with orders listed before the customers they reference.
fn seeded_driver() -> MemoryDriver {
    let driver = MemoryDriver::new();
    driver.add_table(
        "erp",
        orders(),
        vec![order(10, 1, true), order(11, 2, false), order(12, 1, false)],
    );
    driver.add_table(
        "erp",
        customers(),
        vec![customer(1, "Ana"), customer(2, "O'Brien")],
    );
    driver.create_database("dw");
    driver
}

fn service(dir: &TempDir, driver: &MemoryDriver) -> MigrationService {
    let config = Config {
        data_dir: dir.path().to_path_buf(),
        extraction: ExtractionConfig {
            workers: Some(4),
            connection_batch: Some(2),
            ..Default::default()
        },
        ..Default::default()
    };
    let mut registry = DriverRegistry::empty();
    registry.register(Arc::new(driver.clone()));
    MigrationService::new(&config).with_registry(registry)
}

fn origin() -> ConnectionConfig {
    ConnectionConfig::new("erp", "memory", "erp")
}

fn target() -> ConnectionConfig {
    ConnectionConfig::new("dw", "memory", "dw")
}

async fn extract_and_transform(svc: &MigrationService, name: &str) -> Uuid {
    let id = svc.create(name).id;
    svc.start_extraction(id, origin()).unwrap();
    svc.wait_idle().await;
    svc.start_transformation(id, "postgres").unwrap();
    svc.wait_idle().await;
    id
}

#[tokio::test]
async fn test_migration_end_to_end() {
    let dir = TempDir::new().unwrap();
    let driver = seeded_driver();
    let notifier = BroadcastNotifier::default();
    let mut events = notifier.subscribe();
    let svc = service(&dir, &driver).with_notifier(Arc::new(notifier));

    let id = extract_and_transform(&svc, "erp to dw").await;

    let status = svc.status(id).unwrap();
    assert_eq!(status.step, EtlStep::WaitingForLoadConfirmation);
    assert_eq!(
        status.metadata.execution_order,
        vec!["main.customers", "main.orders"]
    );

    let ws = svc.workspace(id);
    assert!(ws.db_meta_path().is_file());
    assert!(ws.target_meta_path().is_file());
    let ddl = ws.read_sql(SqlKind::Ddl, &customers()).unwrap().unwrap();
    assert_eq!(
        ddl,
        "CREATE TABLE main.customers (\n\
         \tid INTEGER NOT NULL,\n\
         \tname VARCHAR(100),\n\
         \tnotes TEXT,\n\
         \tPRIMARY KEY (id)\n\
         );\n"
    );
    let dml = ws.read_sql(SqlKind::Dml, &orders()).unwrap().unwrap();
    assert_eq!(
        dml.lines().next(),
        Some("INSERT INTO main.orders (id,customer_id,paid) VALUES (10,1,TRUE);")
    );

    svc.start_load(id, target()).unwrap();
    svc.wait_idle().await;

    let status = svc.status(id).unwrap();
    assert_eq!(status.step, EtlStep::Finished, "{:?}", status.message);
    assert!(status
        .message
        .as_deref()
        .unwrap()
        .ends_with("2 of 2 tables consistent"));

    // Every CREATE TABLE runs before the first INSERT, parents first.
    let executed = driver.executed("dw");
    assert_eq!(executed.len(), 2 + 5);
    assert!(executed[0].starts_with("CREATE TABLE main.customers"));
    assert!(executed[1].starts_with("CREATE TABLE main.orders"));
    assert!(executed[2].starts_with("INSERT INTO main.customers"));
    assert!(executed[3].contains("'O''Brien'"));
    assert!(executed[4].starts_with("INSERT INTO main.orders"));

    let mut steps = Vec::new();
    let mut completions = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            StatusEvent::Status(s) => steps.push(s.step),
            StatusEvent::Complete { .. } => completions += 1,
        }
    }
    assert_eq!(
        steps,
        vec![
            EtlStep::Created,
            EtlStep::ExtractionInProgress,
            EtlStep::ExtractionFinished,
            EtlStep::TransformationInProgress,
            EtlStep::TransformationFinished,
            EtlStep::WaitingForLoadConfirmation,
            EtlStep::LoadInProgress,
            EtlStep::LoadFinished,
            EtlStep::ValidationInProgress,
            EtlStep::Finished,
        ]
    );
    assert_eq!(completions, 1);
}

#[tokio::test]
async fn test_mssql_target_uses_bit_literals() {
    let dir = TempDir::new().unwrap();
    let driver = seeded_driver();
    let svc = service(&dir, &driver);

    let id = svc.create("erp to sqlserver").id;
    svc.start_extraction(id, origin()).unwrap();
    svc.wait_idle().await;
    svc.start_transformation(id, "mssql").unwrap();
    svc.wait_idle().await;

    let ws = svc.workspace(id);
    let dml = ws.read_sql(SqlKind::Dml, &orders()).unwrap().unwrap();
    assert_eq!(
        dml.lines().collect::<Vec<_>>(),
        vec![
            "INSERT INTO main.orders (id,customer_id,paid) VALUES (10,1,1);",
            "INSERT INTO main.orders (id,customer_id,paid) VALUES (11,2,0);",
            "INSERT INTO main.orders (id,customer_id,paid) VALUES (12,1,0);",
        ]
    );
}

#[tokio::test]
async fn test_failed_table_fails_extraction() {
    let dir = TempDir::new().unwrap();
    let driver = seeded_driver();
    driver.fail_table_after("erp", "main", "orders", 1);
    let svc = service(&dir, &driver);

    let id = svc.create("flaky").id;
    svc.start_extraction(id, origin()).unwrap();
    svc.wait_idle().await;

    let status = svc.status(id).unwrap();
    assert_eq!(status.step, EtlStep::Error);
    let message = status.message.as_deref().unwrap();
    assert!(message.contains("main.orders"));
    assert!(!message.contains("main.customers"));

    // The healthy table was still dumped in full.
    let ws = svc.workspace(id);
    let customers_rows = std::fs::read_to_string(ws.table_data_path(&customers())).unwrap();
    assert_eq!(customers_rows.lines().count(), 2);
    let orders_rows = std::fs::read_to_string(ws.table_data_path(&orders())).unwrap();
    assert_eq!(orders_rows.lines().count(), 1);
}

#[tokio::test]
async fn test_cyclic_foreign_keys_fail_transformation() {
    let dir = TempDir::new().unwrap();
    let driver = MemoryDriver::new();
    let mut left = customers();
    left.name = "left_side".into();
    left.foreign_keys = vec![ForeignKeyDefinition::new("fk_l", "right_side").with_pair("id", "id")];
    let mut right = customers();
    right.name = "right_side".into();
    right.foreign_keys = vec![ForeignKeyDefinition::new("fk_r", "left_side").with_pair("id", "id")];
    driver.add_table("erp", left, vec![]);
    driver.add_table("erp", right, vec![]);
    let svc = service(&dir, &driver);

    let id = extract_and_transform(&svc, "cyclic").await;

    let status = svc.status(id).unwrap();
    assert_eq!(status.step, EtlStep::Error);
    let message = status.message.as_deref().unwrap();
    assert!(message.contains("main.left_side"));
    assert!(message.contains("main.right_side"));
    assert!(svc.list_ddl(id, 0, 10).unwrap().files.is_empty());
}

#[tokio::test]
async fn test_edited_ddl_is_loaded() {
    let dir = TempDir::new().unwrap();
    let driver = seeded_driver();
    let svc = service(&dir, &driver);

    let id = extract_and_transform(&svc, "edited").await;
    let page = svc.list_ddl(id, 0, 1).unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.files[0].filename, "main.customers.sql");

    svc.update_ddl(
        id,
        "main.customers.sql",
        "-- reviewed\nCREATE TABLE main.customers (\n\tid BIGINT NOT NULL\n);\n",
    )
    .unwrap();
    svc.start_load(id, target()).unwrap();
    svc.wait_idle().await;

    assert_eq!(
        driver.executed("dw")[0],
        "CREATE TABLE main.customers ( id BIGINT NOT NULL );"
    );
}

#[tokio::test]
async fn test_concurrent_migrations_are_independent() {
    let dir = TempDir::new().unwrap();
    let driver = seeded_driver();
    let svc = service(&dir, &driver);

    let first = svc.create("same name").id;
    let second = svc.create("same name").id;
    svc.start_extraction(first, origin()).unwrap();
    svc.start_extraction(second, origin()).unwrap();
    svc.wait_idle().await;

    for id in [first, second] {
        assert_eq!(svc.status(id).unwrap().step, EtlStep::ExtractionFinished);
        assert!(svc.workspace(id).db_meta_path().is_file());
    }
    assert_ne!(svc.workspace(first).root(), svc.workspace(second).root());
    assert_eq!(svc.list().len(), 2);
}
