use crate::error::IntakeError;
use crate::gating::GatingState;
use crate::sections::SectionCatalog;
use crate::store::{FormData, FormStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

pub const SNAPSHOT_VERSION: u32 = 1;

/// Snapshot persistence backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SnapshotStorageConfig {
    /// Keep the snapshot in process memory only.
    #[default]
    Memory,
    /// Persist the snapshot as a JSON file and restore it on startup.
    File { path: PathBuf },
}

impl SnapshotStorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File { path: path.into() }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File { .. } => "file",
        }
    }

    pub fn open(&self) -> Arc<dyn SnapshotStore> {
        match self {
            Self::Memory => Arc::new(MemorySnapshotStore::default()),
            Self::File { path } => Arc::new(FileSnapshotStore::new(path.clone())),
        }
    }
}

/// Full persisted state: form data, unlock flags by section, and the active index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSnapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    pub form_data: FormData,
    pub form_status: BTreeMap<String, bool>,
    pub current_index: usize,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

impl WorkflowSnapshot {
    pub fn capture(store: &FormStore, gating: &GatingState) -> Self {
        let form_status = store
            .catalog()
            .ids()
            .zip(gating.unlocked())
            .map(|(id, unlocked)| (id.to_string(), *unlocked))
            .collect();

        Self {
            version: SNAPSHOT_VERSION,
            form_data: store.data().clone(),
            form_status,
            current_index: gating.active_index(),
            saved_at: Some(Utc::now()),
        }
    }

    /// Rebuild store and gating against the current catalog.
    ///
    /// Unknown sections are dropped, missing ones defaulted, and the first section is always
    /// unlocked. Unlock flags with a gap make the whole snapshot invalid.
    pub fn restore(
        self,
        catalog: Arc<SectionCatalog>,
    ) -> Result<(FormStore, GatingState), IntakeError> {
        if self.version > SNAPSHOT_VERSION {
            return Err(IntakeError::Persistence(format!(
                "snapshot version {} is newer than supported version {}",
                self.version, SNAPSHOT_VERSION
            )));
        }

        let mut unlocked: Vec<bool> = catalog
            .ids()
            .map(|id| self.form_status.get(id).copied().unwrap_or(false))
            .collect();
        if let Some(first) = unlocked.first_mut() {
            *first = true;
        }

        let gating = GatingState::from_parts(unlocked, self.current_index)?;
        let store = FormStore::from_data(catalog, self.form_data);
        Ok((store, gating))
    }
}

/// Local durable storage for the workflow snapshot.
pub trait SnapshotStore: Send + Sync + Debug {
    fn label(&self) -> &'static str;

    fn load(&self) -> Result<Option<WorkflowSnapshot>, IntakeError>;

    fn save(&self, snapshot: &WorkflowSnapshot) -> Result<(), IntakeError>;
}

#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    slot: Mutex<Option<WorkflowSnapshot>>,
}

impl SnapshotStore for MemorySnapshotStore {
    fn label(&self) -> &'static str {
        "memory"
    }

    fn load(&self) -> Result<Option<WorkflowSnapshot>, IntakeError> {
        let slot = self
            .slot
            .lock()
            .map_err(|_| IntakeError::Persistence("memory snapshot lock poisoned".to_string()))?;
        Ok(slot.clone())
    }

    fn save(&self, snapshot: &WorkflowSnapshot) -> Result<(), IntakeError> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| IntakeError::Persistence("memory snapshot lock poisoned".to_string()))?;
        *slot = Some(snapshot.clone());
        Ok(())
    }
}

/// JSON file snapshot. Writes go to a sibling `.tmp` file that is renamed into place.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn label(&self) -> &'static str {
        "file"
    }

    fn load(&self) -> Result<Option<WorkflowSnapshot>, IntakeError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let bytes = fs::read(&self.path).map_err(|e| {
            IntakeError::Persistence(format!("read {} failed: {e}", self.path.display()))
        })?;
        if bytes.is_empty() {
            return Ok(None);
        }

        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn save(&self, snapshot: &WorkflowSnapshot) -> Result<(), IntakeError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                IntakeError::Persistence(format!("create {} failed: {e}", parent.display()))
            })?;
        }

        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, bytes).map_err(|e| {
            IntakeError::Persistence(format!("write {} failed: {e}", tmp_path.display()))
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|e| {
            IntakeError::Persistence(format!("rename to {} failed: {e}", self.path.display()))
        })?;
        Ok(())
    }
}

enum WriteCommand {
    Save(Box<WorkflowSnapshot>),
    Flush(oneshot::Sender<()>),
}

/// Ordered fire-and-forget snapshot writer.
///
/// Inside a tokio runtime a single background task drains writes in submission order, so
/// the last write on disk always reflects the latest in-memory state. Outside a runtime
/// snapshots are written inline. Failures are logged and never surface to the caller.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    store: Arc<dyn SnapshotStore>,
    queue: Option<mpsc::UnboundedSender<WriteCommand>>,
}

impl SnapshotWriter {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        let queue = match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let (tx, rx) = mpsc::unbounded_channel();
                handle.spawn(drain_writes(Arc::clone(&store), rx));
                Some(tx)
            }
            Err(_) => None,
        };
        Self { store, queue }
    }

    /// Writer that always persists on the caller's thread.
    pub fn inline(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store, queue: None }
    }

    pub fn backend_label(&self) -> &'static str {
        self.store.label()
    }

    pub fn load(&self) -> Result<Option<WorkflowSnapshot>, IntakeError> {
        self.store.load()
    }

    pub fn persist(&self, snapshot: WorkflowSnapshot) {
        let snapshot = match &self.queue {
            Some(queue) => match queue.send(WriteCommand::Save(Box::new(snapshot))) {
                Ok(()) => return,
                Err(mpsc::error::SendError(WriteCommand::Save(snapshot))) => *snapshot,
                Err(_) => return,
            },
            None => snapshot,
        };
        save_logged(self.store.as_ref(), &snapshot);
    }

    /// Wait until every previously queued write has completed.
    pub async fn flush(&self) {
        let Some(queue) = &self.queue else {
            return;
        };
        let (ack, done) = oneshot::channel();
        if queue.send(WriteCommand::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

async fn drain_writes(
    store: Arc<dyn SnapshotStore>,
    mut rx: mpsc::UnboundedReceiver<WriteCommand>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            WriteCommand::Save(snapshot) => {
                let store = Arc::clone(&store);
                let result =
                    tokio::task::spawn_blocking(move || save_logged(store.as_ref(), &snapshot))
                        .await;
                if let Err(err) = result {
                    warn!(error = %err, "Snapshot write task failed");
                }
            }
            WriteCommand::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("Snapshot writer stopped");
}

fn save_logged(store: &dyn SnapshotStore, snapshot: &WorkflowSnapshot) {
    if let Err(err) = store.save(snapshot) {
        warn!(
            backend = store.label(),
            error = %err,
            "Snapshot persistence failed; continuing with in-memory state"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("intake-snapshot-{}", Uuid::new_v4()))
            .join("workflow.json")
    }

    fn catalog() -> Arc<SectionCatalog> {
        Arc::new(SectionCatalog::application())
    }

    fn sample_snapshot() -> WorkflowSnapshot {
        let mut store = FormStore::new(catalog());
        store
            .update("personal_info", json!({"full_name": "Ada"}))
            .unwrap();
        let mut gating = GatingState::new(store.catalog().len());
        gating.advance(0);
        WorkflowSnapshot::capture(&store, &gating)
    }

    #[test]
    fn snapshot_uses_camel_case_shape() {
        let value = serde_json::to_value(sample_snapshot()).unwrap();
        assert!(value.get("formData").is_some());
        assert_eq!(value["formStatus"]["personal_info"], true);
        assert_eq!(value["formStatus"]["contact_details"], true);
        assert_eq!(value["formStatus"]["medical_history"], false);
        assert_eq!(value["currentIndex"], 1);
    }

    #[test]
    fn file_store_roundtrips_snapshot() {
        let path = temp_path();
        let store = FileSnapshotStore::new(&path);
        assert!(store.load().unwrap().is_none());

        let snapshot = sample_snapshot();
        store.save(&snapshot).unwrap();

        let loaded = FileSnapshotStore::new(&path).load().unwrap().unwrap();
        assert_eq!(loaded, snapshot);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let path = temp_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"{not json").unwrap();

        let err = FileSnapshotStore::new(&path).load().unwrap_err();
        assert!(matches!(err, IntakeError::Serialization(_)));
    }

    #[test]
    fn restore_rejects_gapped_flags() {
        let mut snapshot = sample_snapshot();
        snapshot.form_status.insert("contact_details".into(), false);
        snapshot.form_status.insert("lifestyle".into(), true);

        assert!(snapshot.restore(catalog()).is_err());
    }

    #[test]
    fn restore_forces_first_section_and_clamps_index() {
        let snapshot = WorkflowSnapshot {
            version: SNAPSHOT_VERSION,
            form_data: FormData::new(),
            form_status: BTreeMap::new(),
            current_index: 7,
            saved_at: None,
        };

        let (store, gating) = snapshot.restore(catalog()).unwrap();
        assert_eq!(gating.frontier(), 0);
        assert_eq!(gating.active_index(), 0);
        assert_eq!(store.get("personal_info").unwrap()["full_name"], "");
    }

    #[test]
    fn restore_rejects_future_versions() {
        let mut snapshot = sample_snapshot();
        snapshot.version = SNAPSHOT_VERSION + 1;
        assert!(snapshot.restore(catalog()).is_err());
    }

    #[test]
    fn inline_writer_persists_without_runtime() {
        let store = Arc::new(MemorySnapshotStore::default());
        let writer = SnapshotWriter::new(store.clone());
        writer.persist(sample_snapshot());
        assert!(store.load().unwrap().is_some());
    }

    #[tokio::test]
    async fn queued_writes_land_in_order() {
        let path = temp_path();
        let writer = SnapshotWriter::new(Arc::new(FileSnapshotStore::new(&path)));

        for index in 0..20 {
            let mut snapshot = sample_snapshot();
            snapshot.current_index = index;
            writer.persist(snapshot);
        }
        writer.flush().await;

        let loaded = FileSnapshotStore::new(&path).load().unwrap().unwrap();
        assert_eq!(loaded.current_index, 19);
    }

    #[derive(Debug)]
    struct BrokenStore;

    impl SnapshotStore for BrokenStore {
        fn label(&self) -> &'static str {
            "broken"
        }

        fn load(&self) -> Result<Option<WorkflowSnapshot>, IntakeError> {
            Err(IntakeError::Persistence("disk gone".into()))
        }

        fn save(&self, _snapshot: &WorkflowSnapshot) -> Result<(), IntakeError> {
            Err(IntakeError::Persistence("disk gone".into()))
        }
    }

    #[tokio::test]
    async fn write_failures_do_not_surface() {
        let writer = SnapshotWriter::new(Arc::new(BrokenStore));
        writer.persist(sample_snapshot());
        writer.flush().await;
        assert_eq!(writer.backend_label(), "broken");
    }
}
