//! Fault injection over a mapping engine.
//!
//! [`FaultyEngine`] wraps another engine and consults a shared [`FaultPlan`]
//! before every find, list and commit. Scripted failures are returned in
//! order; a standing failure is returned once the script is exhausted.

use entigate_engine::{
    EngineError, EngineResult, EntityData, EntityHandle, EntityState, Identifier, MappingEngine,
    Session, SessionEntry, SessionSettings, ShapeRegistry,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Session calls that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// `Session::find`.
    Find,
    /// `Session::list`.
    List,
    /// `Session::commit`.
    Commit,
}

/// Failures to inject, shared by every session of a [`FaultyEngine`].
#[derive(Debug, Default)]
pub struct FaultPlan {
    scripted: Mutex<HashMap<FaultPoint, VecDeque<EngineError>>>,
    standing: Mutex<HashMap<FaultPoint, EngineError>>,
    calls: Mutex<HashMap<FaultPoint, usize>>,
    zero_rows: AtomicBool,
}

impl FaultPlan {
    /// Creates a plan that injects nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `times` calls at `point` with `error`.
    pub fn fail(&self, point: FaultPoint, error: EngineError, times: usize) {
        let mut scripted = self.scripted.lock();
        let queue = scripted.entry(point).or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }

    /// Fails every call at `point` once the script is exhausted.
    pub fn fail_always(&self, point: FaultPoint, error: EngineError) {
        self.standing.lock().insert(point, error);
    }

    /// Makes successful commits report zero affected rows.
    pub fn report_zero_rows(&self, enabled: bool) {
        self.zero_rows.store(enabled, Ordering::SeqCst);
    }

    /// Removes every scripted and standing failure.
    pub fn clear(&self) {
        self.scripted.lock().clear();
        self.standing.lock().clear();
        self.zero_rows.store(false, Ordering::SeqCst);
    }

    /// Number of calls made at `point`, failed or not.
    pub fn calls(&self, point: FaultPoint) -> usize {
        self.calls.lock().get(&point).copied().unwrap_or(0)
    }

    fn check(&self, point: FaultPoint) -> EngineResult<()> {
        *self.calls.lock().entry(point).or_default() += 1;
        let scripted = self
            .scripted
            .lock()
            .get_mut(&point)
            .and_then(VecDeque::pop_front);
        match scripted.or_else(|| self.standing.lock().get(&point).cloned()) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Engine that injects the failures of a [`FaultPlan`].
pub struct FaultyEngine {
    inner: Arc<dyn MappingEngine>,
    plan: Arc<FaultPlan>,
}

impl FaultyEngine {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn MappingEngine>, plan: Arc<FaultPlan>) -> Self {
        Self { inner, plan }
    }

    /// The shared plan.
    pub fn plan(&self) -> &Arc<FaultPlan> {
        &self.plan
    }
}

impl MappingEngine for FaultyEngine {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn shapes(&self) -> &ShapeRegistry {
        self.inner.shapes()
    }

    fn open_session(&self, settings: &SessionSettings) -> EngineResult<Box<dyn Session>> {
        Ok(Box::new(FaultySession {
            inner: self.inner.open_session(settings)?,
            plan: Arc::clone(&self.plan),
        }))
    }
}

struct FaultySession {
    inner: Box<dyn Session>,
    plan: Arc<FaultPlan>,
}

impl Session for FaultySession {
    fn shapes(&self) -> &ShapeRegistry {
        self.inner.shapes()
    }

    fn find(&mut self, shape: &str, identifier: &Identifier) -> EngineResult<Option<EntityHandle>> {
        self.plan.check(FaultPoint::Find)?;
        self.inner.find(shape, identifier)
    }

    fn list(&mut self, shape: &str) -> EngineResult<Box<dyn Iterator<Item = EntityHandle> + Send>> {
        self.plan.check(FaultPoint::List)?;
        self.inner.list(shape)
    }

    fn state_of(&self, entity: &EntityHandle) -> EntityState {
        self.inner.state_of(entity)
    }

    fn set_state(&mut self, entity: &EntityHandle, state: EntityState) -> EngineResult<()> {
        self.inner.set_state(entity, state)
    }

    fn reload(&mut self, entity: &EntityHandle) -> EngineResult<()> {
        self.inner.reload(entity)
    }

    fn original_values(&self, entity: &EntityHandle) -> EngineResult<EntityData> {
        self.inner.original_values(entity)
    }

    fn modified_fields(&self, entity: &EntityHandle) -> EngineResult<Vec<String>> {
        self.inner.modified_fields(entity)
    }

    fn current_values(&self, entity: &EntityHandle) -> EngineResult<EntityData> {
        self.inner.current_values(entity)
    }

    fn set_current_values(&mut self, entity: &EntityHandle, values: &EntityData) -> EngineResult<()> {
        self.inner.set_current_values(entity, values)
    }

    fn has_pending_changes(&mut self) -> bool {
        self.inner.has_pending_changes()
    }

    fn commit(&mut self) -> EngineResult<usize> {
        self.plan.check(FaultPoint::Commit)?;
        let rows = self.inner.commit()?;
        if self.plan.zero_rows.load(Ordering::SeqCst) {
            return Ok(0);
        }
        Ok(rows)
    }

    fn entries(&self) -> Vec<SessionEntry> {
        self.inner.entries()
    }

    fn lazy_loading_enabled(&self) -> bool {
        self.inner.lazy_loading_enabled()
    }

    fn set_lazy_loading_enabled(&mut self, enabled: bool) {
        self.inner.set_lazy_loading_enabled(enabled);
    }

    fn set_no_tracking(&mut self) {
        self.inner.set_no_tracking();
    }

    fn last_statement(&self) -> Option<String> {
        self.inner.last_statement()
    }
}
