//! Migration orchestrator: the ETL state machine and its trigger API.
//!
//! ```text
//! CREATED -> EXTRACTION_IN_PROGRESS -> EXTRACTION_FINISHED
//!   -> TRANSFORMATION_IN_PROGRESS -> TRANSFORMATION_FINISHED
//!   -> WAITING_FOR_LOAD_CONFIRMATION -> LOAD_IN_PROGRESS -> LOAD_FINISHED
//!   -> VALIDATION_IN_PROGRESS -> FINISHED
//! ```
//!
//! Any stage may end in `ERROR`. Each trigger checks the predecessor step and
//! moves to the stage's in-progress step atomically, then runs the stage on
//! a background task and returns. Every stored transition is followed by a
//! notification; terminal steps are followed by a stream-complete signal.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::artifacts::{MigrationWorkspace, SqlPage};
use crate::config::{Config, ConnectionConfig, ExtractionConfig};
use crate::core::schema::DatabaseDefinition;
use crate::drivers::DriverRegistry;
use crate::error::{ConvertError, Result};
use crate::extract::{MetadataExtractor, TableDumper};
use crate::load::LoadExecutor;
use crate::notify::{StatusNotifier, TracingNotifier};
use crate::state::{EtlStep, MigrationStatus, StatusStore};
use crate::transform::{ordered_tables, Transformer};
use crate::typemap::ConversionMap;
use crate::validate::{ConsistencyValidator, RowCountValidator};

/// Runs migrations through their stages. Clones share all state.
#[derive(Clone)]
pub struct MigrationService {
    data_dir: PathBuf,
    conversion_maps_dir: Option<PathBuf>,
    extraction: ExtractionConfig,
    registry: DriverRegistry,
    store: StatusStore,
    notifier: Arc<dyn StatusNotifier>,
    validator: Arc<dyn ConsistencyValidator>,
    tasks: TaskTracker,
    stopped: Arc<AtomicBool>,
}

impl MigrationService {
    /// Service with the built-in drivers, a logging notifier and the
    /// row-count validator.
    pub fn new(config: &Config) -> Self {
        let registry = DriverRegistry::with_builtins();
        Self {
            data_dir: config.data_dir.clone(),
            conversion_maps_dir: config.conversion_maps_dir.clone(),
            extraction: config.extraction.clone(),
            validator: Arc::new(RowCountValidator::new(registry.clone())),
            registry,
            store: StatusStore::new(),
            notifier: Arc::new(TracingNotifier),
            tasks: TaskTracker::new(),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the driver registry. The default validator follows it.
    pub fn with_registry(mut self, registry: DriverRegistry) -> Self {
        self.validator = Arc::new(RowCountValidator::new(registry.clone()));
        self.registry = registry;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn StatusNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn ConsistencyValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn workspace(&self, id: Uuid) -> MigrationWorkspace {
        MigrationWorkspace::new(&self.data_dir, id)
    }

    // ===== Queries =====

    pub fn status(&self, id: Uuid) -> Result<Arc<MigrationStatus>> {
        self.store.get(id)
    }

    pub fn list(&self) -> Vec<Arc<MigrationStatus>> {
        self.store.list()
    }

    /// Page through a migration's DDL artifacts.
    pub fn list_ddl(&self, id: Uuid, page: usize, size: usize) -> Result<SqlPage> {
        self.store.get(id)?;
        self.workspace(id).list_ddl(page, size)
    }

    /// Replace the content of one DDL artifact.
    pub fn update_ddl(&self, id: Uuid, filename: &str, content: &str) -> Result<()> {
        self.store.get(id)?;
        self.workspace(id).update_ddl(filename, content)?;
        info!("Migration {}: DDL artifact {} updated", id, filename);
        Ok(())
    }

    // ===== Triggers =====

    /// Register a new migration.
    pub fn create(&self, name: &str) -> Arc<MigrationStatus> {
        let status = self.store.insert(MigrationStatus::new(name));
        info!("Migration {} created as {}", status.name, status.id);
        self.notifier.status_changed(&status.snapshot());
        status
    }

    /// Introspect and dump the origin database.
    pub fn start_extraction(
        &self,
        id: Uuid,
        origin: ConnectionConfig,
    ) -> Result<Arc<MigrationStatus>> {
        self.ensure_running()?;
        origin.validate("origin")?;
        let status = self.begin(id, EtlStep::Created, EtlStep::ExtractionInProgress, |s| {
            s.metadata.origin = Some(origin.clone());
        })?;

        let service = self.clone();
        self.tasks.spawn(async move {
            service
                .run_stage(id, "extraction", service.extract(id, origin))
                .await;
        });
        Ok(status)
    }

    /// Map types for a target dialect and generate the SQL artifacts.
    pub fn start_transformation(&self, id: Uuid, dialect: &str) -> Result<Arc<MigrationStatus>> {
        self.ensure_running()?;
        let dialect = dialect.trim().to_string();
        if dialect.is_empty() {
            return Err(ConvertError::Config("target dialect is required".into()));
        }
        let status = self.begin(
            id,
            EtlStep::ExtractionFinished,
            EtlStep::TransformationInProgress,
            |s| s.metadata.target_dialect = Some(dialect.clone()),
        )?;

        let service = self.clone();
        self.tasks.spawn(async move {
            service
                .run_stage(id, "transformation", service.transform(id, dialect))
                .await;
        });
        Ok(status)
    }

    /// Apply the SQL artifacts to the target, then validate.
    pub fn start_load(&self, id: Uuid, target: ConnectionConfig) -> Result<Arc<MigrationStatus>> {
        self.ensure_running()?;
        target.validate("target")?;
        let status = self.begin(
            id,
            EtlStep::WaitingForLoadConfirmation,
            EtlStep::LoadInProgress,
            |s| s.metadata.target = Some(target.clone()),
        )?;

        let service = self.clone();
        self.tasks.spawn(async move {
            if !service.run_stage(id, "load", service.load(id, target)).await {
                return;
            }
            match service.begin(
                id,
                EtlStep::LoadFinished,
                EtlStep::ValidationInProgress,
                |_| {},
            ) {
                Ok(_) => {
                    service
                        .run_stage(id, "validation", service.validate(id))
                        .await;
                }
                Err(e) => warn!("Migration {}: validation not started: {}", id, e),
            }
        });
        Ok(status)
    }

    /// Compare origin and target after a load.
    pub fn start_validation(&self, id: Uuid) -> Result<Arc<MigrationStatus>> {
        self.ensure_running()?;
        let status = self.begin(
            id,
            EtlStep::LoadFinished,
            EtlStep::ValidationInProgress,
            |_| {},
        )?;

        let service = self.clone();
        self.tasks.spawn(async move {
            service
                .run_stage(id, "validation", service.validate(id))
                .await;
        });
        Ok(status)
    }

    /// Wait until no stage is running.
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Refuse new stage triggers, then wait for in-flight stages.
    ///
    /// A load already running still proceeds into validation.
    pub async fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.tasks.close();
        self.tasks.wait().await;
        info!("Migration service stopped");
    }

    fn ensure_running(&self) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ConvertError::ServiceStopped);
        }
        Ok(())
    }

    // ===== Stages =====

    async fn extract(&self, id: Uuid, origin: ConnectionConfig) -> Result<()> {
        let workspace = self.workspace(id);

        let mut conn = self.registry.connect(&origin).await?;
        let extracted = MetadataExtractor::new(conn.as_mut())
            .extract(&origin.name)
            .await;
        let closed = conn.close().await;
        let db = extracted?;
        closed?;

        workspace.write_db_meta(&db)?;
        let summary = TableDumper::new(self.registry.clone(), origin, &self.extraction)
            .dump(&db, &workspace)
            .await?;
        info!(
            "Migration {}: extracted {} tables, {} rows",
            id, summary.tables, summary.rows
        );

        self.record(id, |s| {
            s.step = EtlStep::ExtractionFinished;
            s.metadata.database = Some(db);
        })?;
        Ok(())
    }

    async fn transform(&self, id: Uuid, dialect: String) -> Result<()> {
        let db = self.current_database(id)?;
        let workspace = self.workspace(id);
        let maps_dir = self.conversion_maps_dir.clone();

        let result = tokio::task::spawn_blocking(move || {
            let map = ConversionMap::load(&dialect, maps_dir.as_deref())?;
            Transformer::new(map).transform(&db, &workspace)
        })
        .await
        .map_err(|e| ConvertError::Io(std::io::Error::other(e)))??;

        self.record(id, |s| {
            s.step = EtlStep::TransformationFinished;
            s.metadata.database = Some(result.definition);
            s.metadata.execution_order = result.execution_order;
        })?;
        self.record(id, |s| s.step = EtlStep::WaitingForLoadConfirmation)?;
        Ok(())
    }

    async fn load(&self, id: Uuid, target: ConnectionConfig) -> Result<()> {
        let status = self.store.get(id)?;
        let db = self.current_database(id)?;
        let tables = ordered_tables(&db, &status.metadata.execution_order)?;

        LoadExecutor::new(self.registry.clone(), target)
            .load(&tables, &self.workspace(id))
            .await?;

        self.record(id, |s| s.step = EtlStep::LoadFinished)?;
        Ok(())
    }

    async fn validate(&self, id: Uuid) -> Result<()> {
        let status = self.store.get(id)?;
        let (Some(origin), Some(target)) = (&status.metadata.origin, &status.metadata.target)
        else {
            return Err(ConvertError::Validation(
                "origin and target connections are required".into(),
            ));
        };
        let db = self.current_database(id)?;

        let report = self.validator.validate(origin, target, &db).await?;

        self.record(id, |s| {
            s.step = EtlStep::Finished;
            s.message = Some(report.messages.join("\n"));
            s.finished_at = Some(Utc::now());
        })?;
        self.notifier.stream_complete(id);
        Ok(())
    }

    // ===== Plumbing =====

    fn current_database(&self, id: Uuid) -> Result<DatabaseDefinition> {
        self.store
            .get(id)?
            .metadata
            .database
            .clone()
            .ok_or_else(|| ConvertError::Config(format!("Migration '{}' has no schema yet", id)))
    }

    /// Compare-and-transition into a stage, then notify.
    fn begin<F>(&self, id: Uuid, from: EtlStep, to: EtlStep, change: F) -> Result<Arc<MigrationStatus>>
    where
        F: FnOnce(&mut MigrationStatus),
    {
        let status = self.store.transition(id, from, to, change)?;
        info!("Migration {}: {}", id, to);
        self.notifier.status_changed(&status.snapshot());
        Ok(status)
    }

    /// Store a change, then notify.
    fn record<F>(&self, id: Uuid, change: F) -> Result<Arc<MigrationStatus>>
    where
        F: FnOnce(&mut MigrationStatus),
    {
        let status = self.store.update(id, change)?;
        self.notifier.status_changed(&status.snapshot());
        Ok(status)
    }

    fn fail(&self, id: Uuid, message: String) {
        match self.record(id, |s| {
            s.step = EtlStep::Error;
            s.message = Some(message);
        }) {
            Ok(_) => self.notifier.stream_complete(id),
            Err(e) => error!("Migration {}: could not record failure: {}", id, e),
        }
    }

    /// Run one stage to completion, turning errors and panics into `ERROR`.
    /// Returns true if the stage succeeded.
    async fn run_stage<Fut>(&self, id: Uuid, stage: &'static str, work: Fut) -> bool
    where
        Fut: Future<Output = Result<()>>,
    {
        let mut guard = StageGuard {
            service: self,
            id,
            stage,
            armed: true,
        };

        let succeeded = match AssertUnwindSafe(work).catch_unwind().await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!("Migration {}: {} failed: {}", id, stage, e);
                self.fail(id, e.to_string());
                false
            }
            Err(panic) => {
                let message = format!("{} stage panicked: {}", stage, panic_message(&*panic));
                error!("Migration {}: {}", id, message);
                self.fail(id, message);
                false
            }
        };

        guard.armed = false;
        succeeded
    }
}

impl std::fmt::Debug for MigrationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationService")
            .field("data_dir", &self.data_dir)
            .field("registry", &self.registry)
            .field("running_stages", &self.tasks.len())
            .finish()
    }
}

/// Records `ERROR` if a stage future is dropped before it finishes.
struct StageGuard<'s> {
    service: &'s MigrationService,
    id: Uuid,
    stage: &'static str,
    armed: bool,
}

impl Drop for StageGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.service
                .fail(self.id, format!("{} stage was interrupted", self.stage));
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::generic;
    use crate::core::schema::{ColumnDefinition, TableDefinition};
    use crate::core::value::{Row, RowValue};
    use crate::drivers::MemoryDriver;
    use crate::notify::{BroadcastNotifier, StatusEvent};
    use crate::validate::ValidationReport;
    use async_trait::async_trait;
    use tempfile::TempDir;

    fn service(dir: &TempDir, driver: &MemoryDriver) -> MigrationService {
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            extraction: ExtractionConfig {
                workers: Some(2),
                connection_batch: Some(2),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut registry = DriverRegistry::empty();
        registry.register(Arc::new(driver.clone()));
        MigrationService::new(&config).with_registry(registry)
    }

    fn seed(driver: &MemoryDriver) {
        let items = TableDefinition::new(
            "main",
            "items",
            vec![
                ColumnDefinition::builder("id", "int", generic::INTEGER)
                    .ordinal_position(1)
                    .build(),
                ColumnDefinition::builder("label", "varchar", generic::VARCHAR)
                    .ordinal_position(2)
                    .length(10)
                    .build(),
            ],
            vec!["id".into()],
            vec![],
            vec![],
        )
        .unwrap();
        let rows = (1..=3)
            .map(|i| {
                Row::from([
                    ("id".to_string(), RowValue::Int(i)),
                    ("label".to_string(), RowValue::Text(format!("item {}", i))),
                ])
            })
            .collect();
        driver.add_table("erp", items, rows);
        driver.create_database("dw");
    }

    fn origin() -> ConnectionConfig {
        ConnectionConfig::new("erp", "memory", "erp")
    }

    fn target() -> ConnectionConfig {
        ConnectionConfig::new("dw", "memory", "dw")
    }

    #[tokio::test]
    async fn test_full_run() {
        let dir = TempDir::new().unwrap();
        let driver = MemoryDriver::new();
        seed(&driver);
        let svc = service(&dir, &driver);

        let id = svc.create("nightly").id;
        svc.start_extraction(id, origin()).unwrap();
        svc.wait_idle().await;
        assert_eq!(svc.status(id).unwrap().step, EtlStep::ExtractionFinished);

        svc.start_transformation(id, "postgres").unwrap();
        svc.wait_idle().await;
        let status = svc.status(id).unwrap();
        assert_eq!(status.step, EtlStep::WaitingForLoadConfirmation);
        assert_eq!(status.metadata.execution_order, vec!["main.items"]);

        svc.start_load(id, target()).unwrap();
        svc.wait_idle().await;

        let status = svc.status(id).unwrap();
        assert_eq!(status.step, EtlStep::Finished, "{:?}", status.message);
        assert!(status.finished_at.is_some());
        assert_eq!(
            status.message.as_deref(),
            Some("main.items: 3 rows, OK\n1 of 1 tables consistent")
        );
    }

    #[tokio::test]
    async fn test_out_of_order_trigger_rejected() {
        let dir = TempDir::new().unwrap();
        let driver = MemoryDriver::new();
        seed(&driver);
        let svc = service(&dir, &driver);
        let id = svc.create("m").id;

        let err = svc.start_load(id, target()).unwrap_err();
        assert!(matches!(err, ConvertError::InvalidTransition { .. }));
        let err = svc.start_transformation(id, "postgres").unwrap_err();
        assert!(matches!(err, ConvertError::InvalidTransition { .. }));

        let status = svc.status(id).unwrap();
        assert_eq!(status.step, EtlStep::Created);
        assert_eq!(status.version, 0);
    }

    #[tokio::test]
    async fn test_triggers_rejected_after_shutdown() {
        let dir = TempDir::new().unwrap();
        let driver = MemoryDriver::new();
        seed(&driver);
        let svc = service(&dir, &driver);

        let id = svc.create("late").id;
        svc.start_extraction(id, origin()).unwrap();
        svc.shutdown().await;
        assert_eq!(svc.status(id).unwrap().step, EtlStep::ExtractionFinished);

        let err = svc.start_transformation(id, "postgres").unwrap_err();
        assert!(matches!(err, ConvertError::ServiceStopped));
        let other = svc.create("after").id;
        // Clones share the stopped flag.
        let err = svc.clone().start_extraction(other, origin()).unwrap_err();
        assert!(matches!(err, ConvertError::ServiceStopped));
        assert_eq!(svc.status(id).unwrap().step, EtlStep::ExtractionFinished);
        assert_eq!(svc.status(other).unwrap().step, EtlStep::Created);
    }

    #[tokio::test]
    async fn test_unknown_migration() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir, &MemoryDriver::new());
        let err = svc.start_extraction(Uuid::new_v4(), origin()).unwrap_err();
        assert!(matches!(err, ConvertError::UnknownMigration(_)));
    }

    #[tokio::test]
    async fn test_stage_error_recorded_and_notified() {
        let dir = TempDir::new().unwrap();
        let driver = MemoryDriver::new();
        let notifier = BroadcastNotifier::default();
        let mut rx = notifier.subscribe();
        let svc = service(&dir, &driver).with_notifier(Arc::new(notifier));

        let id = svc.create("broken").id;
        svc.start_extraction(id, ConnectionConfig::new("ghost", "memory", "ghost"))
            .unwrap();
        svc.wait_idle().await;

        let status = svc.status(id).unwrap();
        assert_eq!(status.step, EtlStep::Error);
        assert!(status.message.as_deref().unwrap().contains("ghost"));

        let mut steps = Vec::new();
        let mut completed = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                StatusEvent::Status(s) => steps.push(s.step),
                StatusEvent::Complete { .. } => completed = true,
            }
        }
        assert_eq!(
            steps,
            vec![EtlStep::Created, EtlStep::ExtractionInProgress, EtlStep::Error]
        );
        assert!(completed);
    }

    struct PanickingValidator;

    #[async_trait]
    impl ConsistencyValidator for PanickingValidator {
        async fn validate(
            &self,
            _origin: &ConnectionConfig,
            _target: &ConnectionConfig,
            _database: &DatabaseDefinition,
        ) -> Result<ValidationReport> {
            panic!("validator exploded");
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let dir = TempDir::new().unwrap();
        let driver = MemoryDriver::new();
        seed(&driver);
        let svc = service(&dir, &driver).with_validator(Arc::new(PanickingValidator));

        let id = svc.create("m").id;
        svc.start_extraction(id, origin()).unwrap();
        svc.wait_idle().await;
        svc.start_transformation(id, "postgres").unwrap();
        svc.wait_idle().await;
        svc.start_load(id, target()).unwrap();
        svc.wait_idle().await;

        let status = svc.status(id).unwrap();
        assert_eq!(status.step, EtlStep::Error);
        assert_eq!(
            status.message.as_deref(),
            Some("validation stage panicked: validator exploded")
        );
    }

    #[tokio::test]
    async fn test_ddl_editing() {
        let dir = TempDir::new().unwrap();
        let driver = MemoryDriver::new();
        seed(&driver);
        let svc = service(&dir, &driver);

        let id = svc.create("m").id;
        svc.start_extraction(id, origin()).unwrap();
        svc.wait_idle().await;
        svc.start_transformation(id, "postgres").unwrap();
        svc.wait_idle().await;

        let page = svc.list_ddl(id, 0, 5).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.files[0].filename, "main.items.sql");
        assert!(page.files[0].content.contains("label VARCHAR(10)"));

        svc.update_ddl(id, "main.items.sql", "CREATE TABLE main.items (id INTEGER);")
            .unwrap();
        assert_eq!(
            svc.list_ddl(id, 0, 5).unwrap().files[0].content,
            "CREATE TABLE main.items (id INTEGER);"
        );
        assert!(svc.update_ddl(id, "../escape.sql", "x").is_err());
        assert!(svc.list_ddl(Uuid::new_v4(), 0, 5).is_err());
    }
}
