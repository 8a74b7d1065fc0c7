//! Resource group manager: selection, admission and reload behind one façade.
//!
//! The active manager serializes all tree mutations through a single mutex.
//! Completion and memory reports from [`RunningQuery`] tokens are posted into
//! an inbox and applied by whichever thread next drives a scheduling pass, so
//! callers never block on each other beyond the short critical section.
//! Started-callbacks are always dispatched after the lock is released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use crate::config::{ManagerSettings, ResourceGroupsConfig};
use crate::core::audit::{build_admission_event, AdmissionAction, AuditSink};
use crate::core::query::{CoreEvent, EventSink};
use crate::core::scheduler::Scheduler;
use crate::core::tree::{Admission, Dispatch, ResourceGroupTree};
use crate::core::{
    boxed, QueryHandle, QueryOutcome, QueryState, ResourceEstimate, ResourceGroupId,
    ResourceGroupInfo, RunningQuery, SchedulerError, SelectionContext, SelectionCriteria,
    SelectionEngine, Spawn, TemplateForest,
};
use crate::infra::configuration::{ConfigurationManager, ConfigurationManagerFactory};
use crate::util::clock::now_ms;
use crate::util::serde::QueryId;

/// How a submitted query names its target group.
#[derive(Debug, Clone)]
pub enum Selection {
    /// Evaluate the selection rules against these attributes.
    Criteria(SelectionCriteria),
    /// Use a group that was already selected.
    Context(SelectionContext),
}

impl From<SelectionCriteria> for Selection {
    fn from(criteria: SelectionCriteria) -> Self {
        Self::Criteria(criteria)
    }
}

impl From<SelectionContext> for Selection {
    fn from(context: SelectionContext) -> Self {
        Self::Context(context)
    }
}

/// Admission control over a hierarchy of resource groups.
pub trait ResourceGroupManager: Send + Sync {
    /// Submit a query. Never blocks waiting for capacity.
    ///
    /// Returns [`QueryState::Running`] if the started-callback was dispatched
    /// right away, [`QueryState::Queued`] if the query waits for a slot.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::SelectionFailure`], [`SchedulerError::UnknownGroup`],
    /// [`SchedulerError::Rejection`] or [`SchedulerError::DuplicateQuery`].
    fn submit(
        &self,
        query: QueryHandle,
        selection: Selection,
        executor: Arc<dyn Spawn>,
    ) -> Result<QueryState, SchedulerError>;

    /// Evaluate selection rules without submitting anything.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::SelectionFailure`] when no rule matches.
    fn select_group(&self, criteria: &SelectionCriteria) -> Result<SelectionContext, SchedulerError>;

    /// Snapshot of a materialized group; `Ok(None)` if it does not exist.
    ///
    /// # Errors
    ///
    /// Only when the manager is unusable.
    fn try_get_resource_group_info(
        &self,
        id: &ResourceGroupId,
    ) -> Result<Option<ResourceGroupInfo>, SchedulerError>;

    /// Snapshots from the top-level group down to `id`, taken together;
    /// `Ok(None)` if it does not exist.
    ///
    /// # Errors
    ///
    /// Only when the manager is unusable.
    fn try_get_path_to_root(
        &self,
        id: &ResourceGroupId,
    ) -> Result<Option<Vec<ResourceGroupInfo>>, SchedulerError>;

    /// Withdraw a waiting query. Returns whether it was waiting.
    ///
    /// # Errors
    ///
    /// Only when the manager is unusable.
    fn cancel_queued(&self, query_id: &QueryId) -> Result<bool, SchedulerError>;

    /// Register a configuration manager factory under its name.
    fn add_configuration_manager_factory(&self, factory: Arc<dyn ConfigurationManagerFactory>);

    /// Create the configured manager and apply its configuration.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Configuration`] if the factory is unknown or the
    /// configuration is invalid.
    fn load_configuration_manager(&self) -> Result<(), SchedulerError>;

    /// Reload from the loaded configuration manager.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Configuration`]; the previous configuration stays.
    fn refresh(&self) -> Result<(), SchedulerError>;

    /// Timer-driven scheduling pass and garbage collection.
    ///
    /// # Errors
    ///
    /// Only when the manager is unusable.
    fn tick(&self) -> Result<(), SchedulerError>;

    /// Apply a configuration directly.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Configuration`]; the previous configuration stays.
    fn apply_config(&self, config: &ResourceGroupsConfig) -> Result<(), SchedulerError>;
}

struct CoreState {
    tree: ResourceGroupTree,
    scheduler: Scheduler,
    poisoned: Option<SchedulerError>,
}

impl CoreState {
    fn check(&self) -> Result<(), SchedulerError> {
        self.poisoned.clone().map_or(Ok(()), Err)
    }

    /// Poison on invariant violations; every later call returns the violation.
    fn guard<T>(&mut self, result: Result<T, SchedulerError>) -> Result<T, SchedulerError> {
        if let Err(err @ SchedulerError::InvariantViolation(_)) = &result {
            if self.poisoned.is_none() {
                tracing::error!(error = %err, "resource group scheduler poisoned");
                self.poisoned = Some(err.clone());
            }
        }
        result
    }
}

/// The serialized scheduling path shared with running-query tokens.
pub(crate) struct SchedulerCore {
    state: Mutex<CoreState>,
    selection: RwLock<Arc<SelectionEngine>>,
    inbox_tx: Sender<CoreEvent>,
    inbox_rx: Receiver<CoreEvent>,
    pass_requested: AtomicBool,
    draining: AtomicBool,
    audit: Option<Arc<dyn AuditSink>>,
    this: Weak<SchedulerCore>,
}

impl EventSink for SchedulerCore {
    fn post(&self, event: CoreEvent) {
        if self.inbox_tx.send(event).is_ok() {
            self.drive();
        }
    }
}

impl SchedulerCore {
    fn new(scheduler: Scheduler, audit: Option<Arc<dyn AuditSink>>) -> Arc<Self> {
        let (inbox_tx, inbox_rx) = crossbeam_channel::unbounded();
        let forest = Arc::new(TemplateForest::default());
        let tree = ResourceGroupTree::new(forest, ResourceGroupsConfig::default().root_scheduling_policy);
        Arc::new_cyclic(|this| Self {
            state: Mutex::new(CoreState {
                tree,
                scheduler,
                poisoned: None,
            }),
            selection: RwLock::new(Arc::new(SelectionEngine::default())),
            inbox_tx,
            inbox_rx,
            pass_requested: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            audit,
            this: this.clone(),
        })
    }

    fn audit(&self, query_id: &QueryId, group: &ResourceGroupId, action: AdmissionAction, detail: Option<String>) {
        if let Some(sink) = &self.audit {
            sink.record(build_admission_event(query_id, group, action, detail));
        }
    }

    /// Request a pass and run passes until no request is outstanding.
    ///
    /// Only one thread drains at a time; concurrent callers leave their
    /// request behind for the draining thread and return immediately.
    fn drive(&self) {
        self.pass_requested.store(true, Ordering::Release);
        loop {
            if self
                .draining
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            let mut dispatches = Vec::new();
            while self.pass_requested.swap(false, Ordering::AcqRel) {
                dispatches.extend(self.run_pass());
            }
            // Tokens dropped by inline executors post back here and are
            // picked up by the next loop iteration instead of recursing.
            for dispatch in dispatches {
                self.dispatch(dispatch);
            }
            self.draining.store(false, Ordering::Release);
            if !self.pass_requested.load(Ordering::Acquire) {
                return;
            }
        }
    }

    fn run_pass(&self) -> Vec<Dispatch> {
        let mut state = self.state.lock();
        if state.poisoned.is_some() {
            return Vec::new();
        }
        let result = self.step(&mut state);
        state.guard(result).unwrap_or_default()
    }

    fn step(&self, state: &mut CoreState) -> Result<Vec<Dispatch>, SchedulerError> {
        while let Ok(event) = self.inbox_rx.try_recv() {
            match event {
                CoreEvent::Terminated { query_id, outcome } => {
                    let group = state.tree.terminate(&query_id, &outcome)?;
                    let (action, detail) = match outcome {
                        QueryOutcome::Finished => (AdmissionAction::Finished, None),
                        QueryOutcome::Failed(reason) => (AdmissionAction::Failed, Some(reason)),
                        QueryOutcome::Cancelled => (AdmissionAction::Cancelled, None),
                    };
                    self.audit(&query_id, &group, action, detail);
                }
                CoreEvent::MemoryUsage { query_id, bytes } => {
                    state.tree.record_memory(&query_id, bytes)?;
                }
            }
        }
        let CoreState { tree, scheduler, .. } = state;
        let dispatches = scheduler.run_pass(tree, now_ms())?;
        for dispatch in &dispatches {
            self.audit(dispatch.handle.id(), &dispatch.group, AdmissionAction::Started, None);
        }
        tree.collect_garbage()?;
        #[cfg(debug_assertions)]
        tree.check_invariants()?;
        Ok(dispatches)
    }

    /// Hand a started query its token on its own executor.
    fn dispatch(&self, dispatch: Dispatch) {
        let sink: Weak<dyn EventSink> = self.this.clone();
        let running = RunningQuery::new(dispatch.handle.id().clone(), dispatch.group, sink);
        let lifecycle = Arc::clone(dispatch.handle.lifecycle());
        dispatch.executor.spawn(boxed(async move {
            lifecycle.on_started(running);
        }));
    }
}

/// The scheduling manager used on coordinators.
pub struct ActiveResourceGroupManager {
    core: Arc<SchedulerCore>,
    settings: ManagerSettings,
    factories: RwLock<HashMap<String, Arc<dyn ConfigurationManagerFactory>>>,
    configuration: RwLock<Option<Arc<dyn ConfigurationManager>>>,
}

impl ActiveResourceGroupManager {
    /// Manager with an empty configuration and OS-seeded weighted draws.
    #[must_use]
    pub fn new(settings: ManagerSettings) -> Self {
        Self::with_parts(settings, Scheduler::from_entropy(), None)
    }

    pub(crate) fn with_parts(
        settings: ManagerSettings,
        scheduler: Scheduler,
        audit: Option<Arc<dyn AuditSink>>,
    ) -> Self {
        Self {
            core: SchedulerCore::new(scheduler, audit),
            settings,
            factories: RwLock::new(HashMap::new()),
            configuration: RwLock::new(None),
        }
    }

    /// Settings the manager was built with.
    #[must_use]
    pub const fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Number of materialized groups, including the synthetic root.
    pub fn group_count(&self) -> usize {
        self.core.state.lock().tree.len()
    }

    /// Cross-check every aggregate counter in the tree.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvariantViolation`] describing the first mismatch.
    pub fn check_invariants(&self) -> Result<(), SchedulerError> {
        let mut state = self.core.state.lock();
        state.check()?;
        let result = state.tree.check_invariants();
        state.guard(result)
    }
}

impl ResourceGroupManager for ActiveResourceGroupManager {
    fn submit(
        &self,
        query: QueryHandle,
        selection: Selection,
        executor: Arc<dyn Spawn>,
    ) -> Result<QueryState, SchedulerError> {
        let context = match selection {
            Selection::Criteria(mut criteria) => {
                // Fall back to the planner estimate carried on the handle.
                if criteria.resource_estimate == ResourceEstimate::default() {
                    criteria.resource_estimate = query.estimate();
                }
                self.select_group(&criteria)?
            }
            Selection::Context(context) => context,
        };
        let group_id = context.group_id;
        let query_id = query.id().clone();

        let admission = {
            let mut state = self.core.state.lock();
            state.check()?;
            let leaf = match state.tree.resolve(&group_id) {
                Ok(leaf) => leaf,
                Err(SchedulerError::UnknownTemplate { .. }) => {
                    return Err(SchedulerError::UnknownGroup(group_id));
                }
                Err(err) => return state.guard(Err(err)),
            };
            let result = state.tree.submit(leaf, query, executor, now_ms());
            match state.guard(result) {
                Ok(admission) => admission,
                Err(SchedulerError::Rejection { group, max_queued }) => {
                    tracing::warn!(
                        group = %group,
                        query = %query_id,
                        max_queued,
                        "query rejected: queue full"
                    );
                    self.core.audit(
                        &query_id,
                        &group,
                        AdmissionAction::Rejected,
                        Some(format!("max_queued={max_queued}")),
                    );
                    return Err(SchedulerError::Rejection { group, max_queued });
                }
                Err(err) => return Err(err),
            }
        };

        match admission {
            Admission::Started(dispatch) => {
                self.core.audit(&query_id, &dispatch.group, AdmissionAction::Started, None);
                self.core.dispatch(dispatch);
                Ok(QueryState::Running)
            }
            Admission::Queued => {
                self.core.audit(&query_id, &group_id, AdmissionAction::Queued, None);
                self.core.drive();
                Ok(QueryState::Queued)
            }
        }
    }

    fn select_group(&self, criteria: &SelectionCriteria) -> Result<SelectionContext, SchedulerError> {
        let engine = Arc::clone(&self.core.selection.read());
        engine.select(criteria)
    }

    fn try_get_resource_group_info(
        &self,
        id: &ResourceGroupId,
    ) -> Result<Option<ResourceGroupInfo>, SchedulerError> {
        let mut state = self.core.state.lock();
        state.check()?;
        let Some(idx) = state.tree.find(id) else {
            return Ok(None);
        };
        let result = state.tree.info(idx).map(Some);
        state.guard(result)
    }

    fn try_get_path_to_root(
        &self,
        id: &ResourceGroupId,
    ) -> Result<Option<Vec<ResourceGroupInfo>>, SchedulerError> {
        let mut state = self.core.state.lock();
        state.check()?;
        let Some(idx) = state.tree.find(id) else {
            return Ok(None);
        };
        let result = state.tree.path_info(idx).map(Some);
        state.guard(result)
    }

    fn cancel_queued(&self, query_id: &QueryId) -> Result<bool, SchedulerError> {
        let removed = {
            let mut state = self.core.state.lock();
            state.check()?;
            let result = state.tree.cancel_queued(query_id);
            state.guard(result)?
        };
        let Some((group, queued)) = removed else {
            return Ok(false);
        };
        self.core.audit(query_id, &group, AdmissionAction::Cancelled, None);
        queued.handle.lifecycle().on_cancelled("cancelled while queued");
        self.core.drive();
        Ok(true)
    }

    fn add_configuration_manager_factory(&self, factory: Arc<dyn ConfigurationManagerFactory>) {
        let name = factory.name().to_string();
        tracing::debug!(factory = %name, "registered configuration manager factory");
        self.factories.write().insert(name, factory);
    }

    fn load_configuration_manager(&self) -> Result<(), SchedulerError> {
        let name = &self.settings.configuration_manager;
        let factory = self.factories.read().get(name).cloned().ok_or_else(|| {
            SchedulerError::Configuration(format!("unknown configuration manager `{name}`"))
        })?;
        let manager = factory.create(&self.settings.properties)?;
        let config = manager.load()?;
        self.apply_config(&config)?;
        *self.configuration.write() = Some(manager);
        tracing::info!(manager = %name, "configuration manager loaded");
        Ok(())
    }

    fn refresh(&self) -> Result<(), SchedulerError> {
        let manager = self.configuration.read().clone().ok_or_else(|| {
            SchedulerError::Configuration("no configuration manager loaded".into())
        })?;
        let config = manager.load()?;
        self.apply_config(&config)
    }

    fn tick(&self) -> Result<(), SchedulerError> {
        self.core.state.lock().check()?;
        self.core.drive();
        self.core.state.lock().check()
    }

    fn apply_config(&self, config: &ResourceGroupsConfig) -> Result<(), SchedulerError> {
        config.validate().map_err(SchedulerError::Configuration)?;
        let forest = Arc::new(TemplateForest::compile(&config.root_groups)?);
        let engine = Arc::new(SelectionEngine::compile(&config.selectors, &forest)?);
        {
            let mut state = self.core.state.lock();
            state.check()?;
            let result = state.tree.apply_config(forest, config.root_scheduling_policy);
            state.guard(result)?;
            *self.core.selection.write() = engine;
        }
        self.core.drive();
        Ok(())
    }
}
