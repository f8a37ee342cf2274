use crate::connectors::{ConfirmationLedger, TransactionSigner};
use crate::error::IntakeError;
use crate::events::{EventBus, WorkflowEvent, DEFAULT_EVENT_CAPACITY};
use crate::fingerprint::{self, Fingerprint};
use crate::gating::GatingState;
use crate::sections::{SectionCatalog, SectionSpec};
use crate::storage::{SnapshotStorageConfig, SnapshotWriter, WorkflowSnapshot};
use crate::store::{FormData, FormStore};
use crate::submission::{ConfirmationPolicy, TransactionSubmitter};
use crate::types::{
    Overview, PayloadReference, Progress, SectionOutcome, TransactionState, WorkflowView,
};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// What happens when a completed section below the frontier is submitted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResubmitPolicy {
    /// Only snap navigation back to the frontier; the payload is not stored.
    #[default]
    SnapBack,
    /// Merge the payload, then snap back to the frontier.
    MergeAndSnapBack,
}

/// Intake engine configuration.
#[derive(Debug, Clone)]
pub struct IntakeEngineConfig {
    pub snapshot_storage: SnapshotStorageConfig,
    pub resubmit_policy: ResubmitPolicy,
    pub confirmation: ConfirmationPolicy,
    pub event_capacity: usize,
}

impl Default for IntakeEngineConfig {
    fn default() -> Self {
        Self {
            snapshot_storage: SnapshotStorageConfig::Memory,
            resubmit_policy: ResubmitPolicy::SnapBack,
            confirmation: ConfirmationPolicy::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[derive(Debug)]
struct WorkflowState {
    store: FormStore,
    gating: GatingState,
    ready: bool,
    restored: bool,
}

/// State container for the whole intake workflow.
///
/// Store and gating mutations run to completion under one lock. The snapshot is enqueued and
/// the change event published before the lock is released, so persisted writes and
/// subscribers both observe mutation order. The only
/// suspension points are inside the transaction submitter.
pub struct IntakeEngine {
    catalog: Arc<SectionCatalog>,
    state: Mutex<WorkflowState>,
    writer: SnapshotWriter,
    submitter: Arc<TransactionSubmitter>,
    events: EventBus,
    config: IntakeEngineConfig,
}

impl IntakeEngine {
    /// Build an engine that is not yet hydrated. Section submissions fail with
    /// `NotReady` until [`IntakeEngine::hydrate`] runs.
    pub fn new(
        catalog: SectionCatalog,
        config: IntakeEngineConfig,
        signer: Arc<dyn TransactionSigner>,
        ledger: Arc<dyn ConfirmationLedger>,
    ) -> Self {
        let catalog = Arc::new(catalog);
        let events = EventBus::new(config.event_capacity);
        let writer = SnapshotWriter::new(config.snapshot_storage.open());
        let submitter = Arc::new(TransactionSubmitter::new(
            signer,
            ledger,
            config.confirmation,
            events.clone(),
        ));

        let state = WorkflowState {
            store: FormStore::new(Arc::clone(&catalog)),
            gating: GatingState::new(catalog.len()),
            ready: false,
            restored: false,
        };

        Self {
            catalog,
            state: Mutex::new(state),
            writer,
            submitter,
            events,
            config,
        }
    }

    /// Build and hydrate in one step.
    pub fn bootstrap(
        catalog: SectionCatalog,
        config: IntakeEngineConfig,
        signer: Arc<dyn TransactionSigner>,
        ledger: Arc<dyn ConfirmationLedger>,
    ) -> Result<Self, IntakeError> {
        let engine = Self::new(catalog, config, signer, ledger);
        engine.hydrate()?;
        Ok(engine)
    }

    /// Load the persisted snapshot, falling back to defaults when it is absent or invalid.
    ///
    /// Returns whether a snapshot was restored. Calling it again after hydration is a no-op.
    pub fn hydrate(&self) -> Result<bool, IntakeError> {
        let mut state = self.lock()?;
        if state.ready {
            return Ok(state.restored);
        }

        let restored = match self.writer.load() {
            Ok(Some(snapshot)) => match snapshot.restore(Arc::clone(&self.catalog)) {
                Ok((store, gating)) => {
                    state.store = store;
                    state.gating = gating;
                    true
                }
                Err(err) => {
                    warn!(error = %err, "Discarding invalid workflow snapshot");
                    false
                }
            },
            Ok(None) => false,
            Err(err) => {
                warn!(
                    backend = self.writer.backend_label(),
                    error = %err,
                    "Workflow snapshot unreadable; starting from defaults"
                );
                false
            }
        };

        state.ready = true;
        state.restored = restored;
        let active_index = state.gating.active_index();
        self.events.publish(WorkflowEvent::Hydrated {
            restored,
            active_index,
        });
        drop(state);

        info!(
            restored,
            active_index,
            backend = self.writer.backend_label(),
            "Workflow hydrated"
        );
        Ok(restored)
    }

    pub fn is_ready(&self) -> bool {
        self.lock().map(|state| state.ready).unwrap_or(false)
    }

    pub fn catalog(&self) -> &SectionCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &IntakeEngineConfig {
        &self.config
    }

    pub fn snapshot_backend(&self) -> &'static str {
        self.writer.backend_label()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    // ── Section controller surface ───────────────────────────────────

    /// Store an already-validated payload and advance gating.
    pub fn submit_section(&self, id: &str, payload: Value) -> Result<SectionOutcome, IntakeError> {
        let mut state = self.lock_ready()?;
        let index = self.catalog.require_index(id)?;
        let frontier = state.gating.frontier();
        if index > frontier {
            debug!(section = id, index, frontier, "Rejected submission of locked section");
            return Err(IntakeError::locked_section(id, index, frontier));
        }

        let merged =
            index == frontier || self.config.resubmit_policy == ResubmitPolicy::MergeAndSnapBack;
        if merged {
            state.store.update(id, payload)?;
        }
        let transition = state.gating.advance(index);
        self.persist(&state);
        if merged {
            self.events.publish(WorkflowEvent::SectionUpdated {
                section_id: id.to_string(),
            });
        }
        self.events.publish(transition.into());

        let active_index = transition.active_index();
        drop(state);

        info!(section = id, index, merged, active_index, "Section submitted");

        Ok(SectionOutcome {
            section_id: id.to_string(),
            index,
            merged,
            transition,
            active_section: self.section_id_at(active_index),
        })
    }

    // ── Presentation surface ─────────────────────────────────────────

    /// Navigate to an unlocked section for review.
    pub fn select_section(&self, id: &str) -> Result<usize, IntakeError> {
        let mut state = self.lock_ready()?;
        let index = self.catalog.require_index(id)?;
        if !state.gating.select(index) {
            let frontier = state.gating.frontier();
            debug!(section = id, index, frontier, "Rejected selection of locked section");
            return Err(IntakeError::locked_section(id, index, frontier));
        }
        self.persist(&state);
        self.events.publish(WorkflowEvent::Selected { index });
        Ok(index)
    }

    /// Restore every default payload and collapse gating to the first section.
    pub fn reset_all(&self) -> Result<(), IntakeError> {
        let mut state = self.lock_ready()?;
        state.store.reset();
        state.gating.reset();
        self.persist(&state);
        self.events.publish(WorkflowEvent::Reset);
        drop(state);

        info!("Workflow reset to defaults");
        Ok(())
    }

    pub fn active_section(&self) -> Result<SectionSpec, IntakeError> {
        let index = self.lock()?.gating.active_index();
        self.catalog
            .get(index)
            .cloned()
            .ok_or_else(|| IntakeError::Internal(format!("active index {index} out of range")))
    }

    pub fn reachable_sections(&self) -> Result<Vec<String>, IntakeError> {
        let state = self.lock()?;
        Ok(state
            .gating
            .reachable()
            .into_iter()
            .map(|index| self.section_id_at(index))
            .collect())
    }

    pub fn section(&self, id: &str) -> Result<Value, IntakeError> {
        Ok(self.lock()?.store.get(id)?.clone())
    }

    pub fn form_data(&self) -> Result<FormData, IntakeError> {
        Ok(self.lock()?.store.data().clone())
    }

    pub fn progress(&self) -> Result<Progress, IntakeError> {
        let state = self.lock()?;
        Ok(Progress::new(
            state.gating.reachable().len(),
            self.catalog.len(),
        ))
    }

    pub fn view(&self) -> Result<WorkflowView, IntakeError> {
        let state = self.lock()?;
        Ok(self.build_view(&state))
    }

    // ── Fingerprint / export ─────────────────────────────────────────

    /// Fingerprint over the catalog's fingerprint allow-list.
    pub fn fingerprint(&self) -> Result<Fingerprint, IntakeError> {
        self.fingerprint_of(&self.catalog.fingerprint_sections())
    }

    pub fn fingerprint_of(&self, section_ids: &[String]) -> Result<Fingerprint, IntakeError> {
        let state = self.lock()?;
        fingerprint::fingerprint(state.store.data(), section_ids)
    }

    pub fn overview(&self) -> Result<Overview, IntakeError> {
        let fingerprint_sections = self.catalog.fingerprint_sections();
        let state = self.lock()?;
        let fingerprint = fingerprint::fingerprint(state.store.data(), &fingerprint_sections)?;
        Ok(Overview {
            sections: state.store.data().clone(),
            fingerprint_sections,
            fingerprint,
            workflow: self.build_view(&state),
            transaction: self.submitter.state(),
        })
    }

    // ── Transaction lifecycle ────────────────────────────────────────

    /// Payload reference for the final submission: the fingerprint of the allow-listed
    /// sections. Fails with `WorkflowIncomplete` until every section is unlocked.
    pub fn application_payload(&self) -> Result<PayloadReference, IntakeError> {
        let state = self.lock_ready()?;
        if !state.gating.is_complete() {
            return Err(IntakeError::WorkflowIncomplete {
                frontier: state.gating.frontier(),
                last: self.catalog.last_index(),
            });
        }
        let fingerprint =
            fingerprint::fingerprint(state.store.data(), &self.catalog.fingerprint_sections())?;
        Ok(fingerprint.into())
    }

    /// Claim the submitter for the current fingerprint without waiting for the signer.
    ///
    /// Returns the `awaiting-signature` state; the attempt is then driven by
    /// [`TransactionSubmitter::run`].
    pub fn begin_application(&self) -> Result<TransactionState, IntakeError> {
        let payload = self.application_payload()?;
        let claimed = self.submitter.begin(&payload)?;
        info!(payload = %payload, "Application submission started");
        Ok(claimed)
    }

    /// Sign and confirm a transaction attesting to the current fingerprint.
    ///
    /// Waits for the whole lifecycle; callers that need to stay responsive use
    /// [`IntakeEngine::begin_application`], spawn the run, and follow
    /// [`IntakeEngine::watch_transaction`].
    pub async fn submit_application(&self) -> Result<TransactionState, IntakeError> {
        self.begin_application()?;
        self.submitter.run().await
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.submitter.state()
    }

    pub fn reset_transaction(&self) -> Result<TransactionState, IntakeError> {
        self.submitter.reset()
    }

    pub fn watch_transaction(&self) -> watch::Receiver<TransactionState> {
        self.submitter.watch()
    }

    pub fn submitter(&self) -> Arc<TransactionSubmitter> {
        Arc::clone(&self.submitter)
    }

    /// Wait for queued snapshot writes to reach storage.
    pub async fn flush_snapshots(&self) {
        self.writer.flush().await;
    }

    fn persist(&self, state: &WorkflowState) {
        self.writer
            .persist(WorkflowSnapshot::capture(&state.store, &state.gating));
    }

    fn build_view(&self, state: &WorkflowState) -> WorkflowView {
        let active_index = state.gating.active_index();
        let reachable = state.gating.reachable();
        WorkflowView {
            ready: state.ready,
            active_index,
            active_section: self.section_id_at(active_index),
            frontier: state.gating.frontier(),
            progress: Progress::new(reachable.len(), self.catalog.len()),
            reachable: reachable
                .into_iter()
                .map(|index| self.section_id_at(index))
                .collect(),
            unlocked: state.gating.unlocked().to_vec(),
            complete: state.gating.is_complete(),
        }
    }

    fn section_id_at(&self, index: usize) -> String {
        self.catalog
            .get(index)
            .map(|section| section.id.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, WorkflowState>, IntakeError> {
        self.state
            .lock()
            .map_err(|_| IntakeError::Internal("workflow state lock poisoned".to_string()))
    }

    fn lock_ready(&self) -> Result<MutexGuard<'_, WorkflowState>, IntakeError> {
        let state = self.lock()?;
        if !state.ready {
            return Err(IntakeError::NotReady);
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ConfirmationReference, ConfirmationStatus, PayloadReference, TransactionReference,
        TransactionStage,
    };
    use async_trait::async_trait;
    use serde_json::json;

    struct ApprovingSigner;

    #[async_trait]
    impl TransactionSigner for ApprovingSigner {
        fn signer_id(&self) -> &'static str {
            "approving"
        }

        async fn request_signature(
            &self,
            payload: &PayloadReference,
        ) -> Result<TransactionReference, IntakeError> {
            Ok(TransactionReference::new(format!("tx-{}", &payload.as_str()[..8])))
        }
    }

    struct InstantLedger;

    #[async_trait]
    impl ConfirmationLedger for InstantLedger {
        fn ledger_id(&self) -> &'static str {
            "instant"
        }

        async fn poll_confirmation(
            &self,
            transaction: &TransactionReference,
        ) -> Result<ConfirmationStatus, IntakeError> {
            Ok(ConfirmationStatus::Confirmed(ConfirmationReference::new(
                format!("conf-{}", transaction),
            )))
        }
    }

    fn engine_with(config: IntakeEngineConfig) -> IntakeEngine {
        IntakeEngine::bootstrap(
            SectionCatalog::application(),
            config,
            Arc::new(ApprovingSigner),
            Arc::new(InstantLedger),
        )
        .unwrap()
    }

    fn engine() -> IntakeEngine {
        engine_with(IntakeEngineConfig::default())
    }

    #[test]
    fn submissions_before_hydration_are_rejected() {
        let engine = IntakeEngine::new(
            SectionCatalog::application(),
            IntakeEngineConfig::default(),
            Arc::new(ApprovingSigner),
            Arc::new(InstantLedger),
        );
        assert!(!engine.is_ready());
        assert_eq!(
            engine
                .submit_section("personal_info", json!({}))
                .unwrap_err(),
            IntakeError::NotReady
        );

        assert!(!engine.hydrate().unwrap());
        assert!(engine.is_ready());
        assert!(engine.submit_section("personal_info", json!({})).is_ok());
    }

    #[test]
    fn in_order_submissions_then_resubmission_snaps_back() {
        let engine = engine();
        engine
            .submit_section("personal_info", json!({"full_name": "A"}))
            .unwrap();
        let outcome = engine
            .submit_section("contact_details", json!({"email": "a@example.com"}))
            .unwrap();
        assert_eq!(outcome.active_section, "medical_history");

        let view = engine.view().unwrap();
        assert_eq!(view.active_index, 2);
        assert_eq!(&view.unlocked[..4], &[true, true, true, false]);

        let again = engine
            .submit_section("personal_info", json!({"full_name": "Changed"}))
            .unwrap();
        assert!(!again.merged);
        assert_eq!(again.active_section, "medical_history");
        assert_eq!(engine.view().unwrap().unlocked, view.unlocked);
        assert_eq!(engine.section("personal_info").unwrap()["full_name"], "A");
    }

    #[test]
    fn merge_policy_keeps_edits_of_earlier_sections() {
        let engine = engine_with(IntakeEngineConfig {
            resubmit_policy: ResubmitPolicy::MergeAndSnapBack,
            ..IntakeEngineConfig::default()
        });
        engine
            .submit_section("personal_info", json!({"full_name": "A"}))
            .unwrap();
        engine.submit_section("contact_details", json!({})).unwrap();

        let outcome = engine
            .submit_section("personal_info", json!({"full_name": "B"}))
            .unwrap();
        assert!(outcome.merged);
        assert_eq!(outcome.active_section, "medical_history");
        assert_eq!(engine.section("personal_info").unwrap()["full_name"], "B");
    }

    #[test]
    fn locked_sections_cannot_be_submitted_or_selected() {
        let engine = engine();
        let err = engine
            .submit_section("lifestyle", json!({"smoker": false}))
            .unwrap_err();
        assert!(matches!(err, IntakeError::GatingViolation { .. }));
        assert_eq!(engine.section("lifestyle").unwrap()["smoker"], Value::Null);

        assert!(engine.select_section("consent").is_err());
        assert_eq!(engine.active_section().unwrap().id, "personal_info");
    }

    #[test]
    fn select_moves_active_pointer_only_within_reachable_set() {
        let engine = engine();
        engine.submit_section("personal_info", json!({})).unwrap();
        engine.submit_section("contact_details", json!({})).unwrap();

        assert_eq!(engine.select_section("personal_info").unwrap(), 0);
        assert_eq!(engine.active_section().unwrap().id, "personal_info");
        assert_eq!(
            engine.reachable_sections().unwrap(),
            vec!["personal_info", "contact_details", "medical_history"]
        );
    }

    #[test]
    fn reset_all_restores_defaults() {
        let engine = engine();
        engine
            .submit_section("personal_info", json!({"full_name": "A"}))
            .unwrap();
        engine.reset_all().unwrap();

        let view = engine.view().unwrap();
        assert_eq!(view.active_index, 0);
        assert_eq!(view.reachable, vec!["personal_info"]);
        assert_eq!(engine.section("personal_info").unwrap()["full_name"], "");
    }

    #[test]
    fn fingerprint_ignores_excluded_sections() {
        let engine = engine();
        let before = engine.fingerprint().unwrap();

        for id in engine.catalog().ids().take(7).collect::<Vec<_>>() {
            let payload = if id == "pricing" {
                json!({"plan": "premium"})
            } else {
                json!({})
            };
            engine.submit_section(id, payload).unwrap();
        }
        assert_eq!(engine.fingerprint().unwrap(), before);

        let subset = vec!["pricing".to_string()];
        assert_ne!(
            engine.fingerprint_of(&subset).unwrap(),
            engine.fingerprint().unwrap()
        );
    }

    #[tokio::test]
    async fn application_submission_requires_completed_workflow() {
        let engine = engine();
        let err = engine.submit_application().await.unwrap_err();
        assert_eq!(err, IntakeError::WorkflowIncomplete { frontier: 0, last: 8 });

        let ids: Vec<String> = engine.catalog().ids().map(str::to_string).collect();
        for id in &ids {
            engine.submit_section(id, json!({})).unwrap();
        }

        let state = engine.submit_application().await.unwrap();
        assert_eq!(state.stage, TransactionStage::Confirmed);
        assert_eq!(
            state.payload_reference.unwrap().as_str(),
            engine.fingerprint().unwrap().as_str()
        );

        let overview = engine.overview().unwrap();
        assert!(overview.workflow.complete);
        assert_eq!(overview.transaction.stage, TransactionStage::Confirmed);
    }

    #[tokio::test]
    async fn events_follow_mutations() {
        let engine = engine();
        let mut rx = engine.subscribe();

        engine.submit_section("personal_info", json!({})).unwrap();
        engine.select_section("personal_info").unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            WorkflowEvent::SectionUpdated {
                section_id: "personal_info".into()
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            WorkflowEvent::Advanced { from: 0, to: 1 }
        );
        assert_eq!(rx.recv().await.unwrap(), WorkflowEvent::Selected { index: 0 });
    }

    #[test]
    fn concurrent_selections_reach_subscribers_in_state_order() {
        let engine = Arc::new(engine_with(IntakeEngineConfig {
            event_capacity: 4096,
            ..IntakeEngineConfig::default()
        }));
        engine.submit_section("personal_info", json!({})).unwrap();
        engine.submit_section("contact_details", json!({})).unwrap();
        let mut rx = engine.subscribe();

        let workers: Vec<_> = ["personal_info", "contact_details", "medical_history"]
            .into_iter()
            .map(|id| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    for _ in 0..300 {
                        engine.select_section(id).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let mut last_selected = None;
        while let Ok(event) = rx.try_recv() {
            if let WorkflowEvent::Selected { index } = event {
                last_selected = Some(index);
            }
        }
        assert_eq!(last_selected, Some(engine.view().unwrap().active_index));
    }

    #[tokio::test]
    async fn begin_application_claims_submitter_synchronously() {
        let engine = engine();
        let ids: Vec<String> = engine.catalog().ids().map(str::to_string).collect();
        for id in &ids {
            engine.submit_section(id, json!({})).unwrap();
        }

        let claimed = engine.begin_application().unwrap();
        assert_eq!(claimed.stage, TransactionStage::AwaitingSignature);
        assert_eq!(
            engine.begin_application().unwrap_err(),
            IntakeError::SubmissionInFlight("awaiting-signature".to_string())
        );

        let state = engine.submitter().run().await.unwrap();
        assert_eq!(state.stage, TransactionStage::Confirmed);
    }
}
