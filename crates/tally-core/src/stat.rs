//! Stats and their update state machine
//!
//! A [`Stat`] is a named set of [`StatField`]s sharing one update mode and one
//! staleness state. Record notifications move the state towards
//! [`StatState::NeedsRescan`]; `update` brings it back to
//! [`StatState::UpToDate`], either on the caller's thread (`Manual`) or on a
//! per-stat background worker (`OnAdd`, `OnTimer`).
//!
//! The state, the fields and the queue of pending records share one mutex.
//! Waiters block on a condition variable that the worker signals after every
//! job.

use crate::config::{StatConfig, StatFieldConfig, StatOptions};
use crate::error::{Result, StatError};
use crate::field::{StatField, StatFieldDesc};
use crate::operation::StatAction;
use crate::registry::OpRegistry;
use crate::schema::Record;
use crate::state::{StatState, UpdateMode};
use crate::store::RecordStore;
use crate::value::Value;
use crate::worker::{Job, UpdateWorker};
use crossbeam::channel::Sender;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Default flush period of `OnTimer` mode
pub const DEFAULT_TIMER_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct StatCore {
    fields: Vec<StatField>,
    mode: UpdateMode,
    state: StatState,
    pending: VecDeque<Arc<dyn Record>>,
    store: Option<Weak<dyn RecordStore>>,
    update_timeout: Duration,
    timer_period: Duration,
    jobs: Option<Sender<Job>>,
    last_error: Option<StatError>,
}

impl StatCore {
    fn store(&self) -> Option<Arc<dyn RecordStore>> {
        self.store.as_ref().and_then(Weak::upgrade)
    }

    fn is_active(&self) -> bool {
        self.store().is_some()
    }

    fn schedule(&self, job: Job) {
        if let Some(jobs) = &self.jobs {
            if jobs.send(job).is_err() {
                tracing::warn!("Update worker gone, dropped {:?} job", job);
            }
        }
    }

    /// Bring the fields up to date on the current thread
    fn apply(&mut self, stat: &str, do_rescan: bool) -> Result<StatState> {
        if !self.is_active() || self.mode == UpdateMode::Disabled || self.state == StatState::UpToDate
        {
            return Ok(self.state);
        }

        let rescan = do_rescan || self.state == StatState::NeedsRescan || self.drain_pending();
        if rescan {
            if let Err(e) = self.rescan_all(stat) {
                self.state = StatState::NeedsRescan;
                return Err(e);
            }
            // records announced but not yet visible to the snapshot
            if self.drain_pending() {
                self.state = StatState::NeedsRescan;
                return Ok(self.state);
            }
        }

        self.state = StatState::UpToDate;
        tracing::debug!("Stat '{}' is up to date", stat);
        Ok(self.state)
    }

    /// Apply queued records; true if some field now needs a rescan
    fn drain_pending(&mut self) -> bool {
        while let Some(record) = self.pending.pop_front() {
            let mut state = StatState::UpToDate;
            for field in &mut self.fields {
                state = state.escalate(field.handle(record.as_ref()));
            }
            if state == StatState::NeedsRescan {
                return true;
            }
        }
        false
    }

    fn rescan_all(&mut self, stat: &str) -> Result<()> {
        let Some(store) = self.store() else {
            return Ok(());
        };
        let records = store.all_records();
        tracing::debug!("Rescanning stat '{}' over {} records", stat, records.len());

        for field in &mut self.fields {
            field
                .rescan_from(true, &records)
                .map_err(|e| e.in_field(stat, field.name()))?;
        }

        let seen: HashSet<*const ()> = records.iter().map(|r| Arc::as_ptr(r).cast::<()>()).collect();
        self.pending
            .retain(|r| !seen.contains(&Arc::as_ptr(r).cast::<()>()));
        Ok(())
    }
}

/// State shared between a stat and its update worker
#[derive(Debug)]
pub(crate) struct StatShared {
    name: String,
    core: Mutex<StatCore>,
    settled: Condvar,
}

impl StatShared {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Idle period after which the worker flushes on its own
    pub(crate) fn tick_period(&self) -> Option<Duration> {
        let core = self.core.lock();
        (core.mode == UpdateMode::OnTimer).then_some(core.timer_period)
    }

    /// Run one worker job
    pub(crate) fn process(&self, rescan: bool) {
        let mut core = self.core.lock();
        // the last strong store reference must not drop under the core lock
        let store = core.store();
        if core.state != StatState::UpToDate {
            match core.apply(&self.name, rescan) {
                Ok(StatState::NeedsRescan) => core.schedule(Job::Rescan),
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("Update of stat '{}' failed: {}", self.name, e);
                    core.last_error = Some(e);
                }
            }
        }
        drop(core);
        self.settled.notify_all();
        drop(store);
    }

    pub(crate) fn wake_waiters(&self) {
        self.settled.notify_all();
    }
}

/// Named set of stat fields with one update policy
#[derive(Debug)]
pub struct Stat {
    shared: Arc<StatShared>,
    worker: Mutex<Option<UpdateWorker>>,
}

impl Stat {
    /// Create stat
    ///
    /// # Errors
    /// [`StatError::InvalidArgument`] for an empty stat name or repeated
    /// field names
    pub fn new(name: impl Into<String>, fields: Vec<StatField>, mode: UpdateMode) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(StatError::InvalidArgument(
                "stat name must not be empty".to_string(),
            ));
        }
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].iter().any(|f| f.name() == field.name()) {
                return Err(StatError::InvalidArgument(format!(
                    "stat '{name}' has duplicate field '{}'",
                    field.name()
                )));
            }
        }

        let core = StatCore {
            fields,
            mode,
            state: StatState::UpToDate,
            pending: VecDeque::new(),
            store: None,
            update_timeout: Duration::ZERO,
            timer_period: DEFAULT_TIMER_PERIOD,
            jobs: None,
            last_error: None,
        };
        Ok(Self {
            shared: Arc::new(StatShared {
                name,
                core: Mutex::new(core),
                settled: Condvar::new(),
            }),
            worker: Mutex::new(None),
        })
    }

    /// Build a stat from its persisted shape using the process-wide registry
    ///
    /// # Errors
    /// Validation failures and unknown operations
    pub fn from_config(config: &StatConfig) -> Result<Self> {
        Self::from_config_with_registry(config, &OpRegistry::global())
    }

    /// Build a stat from its persisted shape
    ///
    /// # Errors
    /// Validation failures and unknown operations, naming the stat and field
    pub fn from_config_with_registry(config: &StatConfig, registry: &Arc<OpRegistry>) -> Result<Self> {
        config.validate()?;
        let fields = config
            .fields
            .iter()
            .map(|f| {
                let desc = StatFieldDesc {
                    name: f.stat_field_name.clone(),
                    schema_name: f.schema_name.clone(),
                    record_type_name: f.record_type_name.clone(),
                    field_name: f.field_name.clone(),
                    op_name: f.operation_name.clone(),
                };
                StatField::from_desc(desc, Arc::clone(registry))
                    .map_err(|e| e.in_field(&config.name, &f.stat_field_name))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(config.name.clone(), fields, config.update_mode)
    }

    /// Persisted shape of this stat
    #[must_use]
    pub fn config(&self) -> StatConfig {
        let core = self.shared.core.lock();
        StatConfig {
            name: self.shared.name.clone(),
            update_mode: core.mode,
            fields: core
                .fields
                .iter()
                .map(|f| StatFieldConfig {
                    stat_field_name: f.name().to_string(),
                    schema_name: f.schema_name().to_string(),
                    record_type_name: f.record_type_name().to_string(),
                    field_name: f.field_name().to_string(),
                    operation_name: f.op_name().to_string(),
                })
                .collect(),
        }
    }

    /// Stat name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current staleness state
    #[must_use]
    pub fn state(&self) -> StatState {
        self.shared.core.lock().state
    }

    /// Current update mode
    #[must_use]
    pub fn update_mode(&self) -> UpdateMode {
        self.shared.core.lock().mode
    }

    /// Check if the stat is attached to a live store
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.shared.core.lock().is_active()
    }

    /// Field names in declaration order
    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        let core = self.shared.core.lock();
        core.fields.iter().map(|f| f.name().to_string()).collect()
    }

    /// Current values in declaration order; never forces an update
    #[must_use]
    pub fn values(&self) -> Vec<(String, Value)> {
        let core = self.shared.core.lock();
        core.fields
            .iter()
            .map(|f| (f.name().to_string(), f.value()))
            .collect()
    }

    /// Current value of one field; never forces an update
    ///
    /// # Errors
    /// [`StatError::NotFound`] for an unknown field name
    pub fn value(&self, field_name: &str) -> Result<Value> {
        self.with_field(field_name, StatField::value)
    }

    /// Inspect one field under the stat lock
    ///
    /// # Errors
    /// [`StatError::NotFound`] for an unknown field name
    pub fn with_field<R>(&self, field_name: &str, f: impl FnOnce(&StatField) -> R) -> Result<R> {
        let core = self.shared.core.lock();
        core.fields
            .iter()
            .find(|field| field.name() == field_name)
            .map(f)
            .ok_or_else(|| {
                StatError::NotFound(format!(
                    "stat '{}' has no field '{field_name}'",
                    self.shared.name
                ))
            })
    }

    /// Upper bound for waiting updates; zero waits until settled
    #[must_use]
    pub fn update_timeout(&self) -> Duration {
        self.shared.core.lock().update_timeout
    }

    /// Set upper bound for waiting updates
    pub fn set_update_timeout(&self, timeout: Duration) {
        self.shared.core.lock().update_timeout = timeout;
    }

    /// Flush period of `OnTimer` mode
    #[must_use]
    pub fn timer_period(&self) -> Duration {
        self.shared.core.lock().timer_period
    }

    /// Set flush period of `OnTimer` mode; takes effect after the current tick
    ///
    /// # Errors
    /// [`StatError::InvalidArgument`] for a zero period
    pub fn set_timer_period(&self, period: Duration) -> Result<()> {
        if period.is_zero() {
            return Err(StatError::InvalidArgument(
                "timer period must be positive".to_string(),
            ));
        }
        self.shared.core.lock().timer_period = period;
        Ok(())
    }

    /// Apply runtime options
    ///
    /// # Errors
    /// Invalid option values
    pub fn apply_options(&self, options: &StatOptions) -> Result<()> {
        self.set_timer_period(options.timer_period())?;
        self.set_update_timeout(options.update_timeout());
        Ok(())
    }

    /// Resolve every field against `store`
    ///
    /// All fields resolve or none does. Afterwards the stat needs a rescan;
    /// asynchronous modes schedule it right away.
    ///
    /// # Errors
    /// [`StatError::Field`] wrapping [`StatError::InvalidArgument`] for the
    /// first unresolvable field
    pub fn attach(&self, store: &Arc<dyn RecordStore>) -> Result<()> {
        self.detach();
        {
            let mut core = self.shared.core.lock();
            for i in 0..core.fields.len() {
                if let Err(e) = core.fields[i].attach(store) {
                    let e = e.in_field(&self.shared.name, core.fields[i].name());
                    for field in &mut core.fields[..i] {
                        field.detach();
                    }
                    return Err(e);
                }
            }
            core.store = Some(Arc::downgrade(store));
            core.pending.clear();
            core.last_error = None;
            if !core.fields.is_empty() {
                core.state = StatState::NeedsRescan;
            }
        }
        tracing::info!("Stat '{}' attached", self.shared.name);
        self.sync_worker()
    }

    /// Stop background work, then forget every field resolution
    ///
    /// The state is left untouched; values are frozen until reattached.
    pub fn detach(&self) {
        self.stop_worker();
        let mut core = self.shared.core.lock();
        if core.store.is_none() {
            return;
        }
        for field in &mut core.fields {
            field.detach();
        }
        core.store = None;
        core.pending.clear();
        drop(core);
        tracing::info!("Stat '{}' detached", self.shared.name);
    }

    /// React to a record change reported by the store
    pub fn notify(&self, action: StatAction, record: &Arc<dyn Record>) {
        let mut core = self.shared.core.lock();
        if core.mode == UpdateMode::Disabled || core.fields.is_empty() || !core.is_active() {
            return;
        }

        match action {
            StatAction::Add => {
                if core.state == StatState::NeedsRescan {
                    // earlier adds are already visible to the coming rescan;
                    // only this one may not be yet
                    core.pending.clear();
                }
                core.state = core.state.escalate(StatState::NeedsUpdate);
                core.pending.push_back(Arc::clone(record));
                if core.mode == UpdateMode::OnAdd {
                    core.schedule(Job::Update);
                }
            }
            StatAction::Remove => {
                core.state = StatState::NeedsRescan;
                core.pending.clear();
                if core.mode == UpdateMode::OnAdd {
                    core.schedule(Job::Rescan);
                }
            }
        }
        tracing::trace!("Stat '{}' notified of {}: {}", self.shared.name, action, core.state);
    }

    /// Bring values up to date
    ///
    /// `Manual` mode does the work on this thread. Asynchronous modes hand it
    /// to the worker and, if `wait` is set, block until the stat settles or
    /// the update timeout elapses; a timeout returns the stale state.
    ///
    /// # Errors
    /// Errors of the rescan, naming the stat and field
    pub fn update(&self, do_rescan: bool, wait: bool) -> Result<StatState> {
        let mut core = self.shared.core.lock();
        if !core.is_active() || core.mode == UpdateMode::Disabled || core.state == StatState::UpToDate
        {
            return Ok(core.state);
        }
        if !core.mode.is_async() {
            return core.apply(&self.shared.name, do_rescan);
        }

        let job = if do_rescan || core.state == StatState::NeedsRescan {
            Job::Rescan
        } else {
            Job::Update
        };
        core.last_error = None;
        core.schedule(job);
        if !wait {
            return Ok(core.state);
        }

        let unsettled = |c: &mut StatCore| {
            c.jobs.is_some() && c.state != StatState::UpToDate && c.last_error.is_none()
        };
        let timeout = core.update_timeout;
        if timeout.is_zero() {
            self.shared.settled.wait_while(&mut core, unsettled);
        } else if self
            .shared
            .settled
            .wait_while_for(&mut core, unsettled, timeout)
            .timed_out()
        {
            tracing::debug!(
                "Update of stat '{}' timed out after {:?}",
                self.shared.name,
                timeout
            );
        }

        match core.last_error.take() {
            Some(e) => Err(e),
            None => Ok(core.state),
        }
    }

    /// Change the update mode
    ///
    /// Leaving `Disabled` requires a rescan; entering it freezes values and
    /// drops queued records. Entering or leaving an asynchronous mode starts
    /// or stops the worker.
    ///
    /// # Errors
    /// Worker start failure
    pub fn set_update_mode(&self, mode: UpdateMode) -> Result<()> {
        let previous = self.update_mode();
        if previous == mode {
            return Ok(());
        }
        if previous.is_async() && mode.is_async() {
            // the worker picks its wait strategy per mode
            self.stop_worker();
        }
        {
            let mut core = self.shared.core.lock();
            core.mode = mode;
            if previous == UpdateMode::Disabled && !core.fields.is_empty() {
                core.state = StatState::NeedsRescan;
            }
            if mode == UpdateMode::Disabled {
                core.pending.clear();
            }
            tracing::debug!(
                "Stat '{}' update mode {} -> {}",
                self.shared.name,
                previous,
                mode
            );
        }
        self.sync_worker()
    }

    /// Reset every accumulator; the stat becomes up to date
    pub fn reset(&self) {
        let mut core = self.shared.core.lock();
        for field in &mut core.fields {
            field.reset();
        }
        core.pending.clear();
        core.state = StatState::UpToDate;
        core.last_error = None;
        drop(core);
        self.shared.settled.notify_all();
    }

    fn sync_worker(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        let mut core = self.shared.core.lock();
        let wanted = core.mode.is_async() && core.is_active();

        if wanted && worker.is_none() {
            let started = UpdateWorker::spawn(Arc::clone(&self.shared))?;
            core.jobs = Some(started.sender());
            match core.state {
                StatState::UpToDate => {}
                StatState::NeedsUpdate => core.schedule(Job::Update),
                StatState::NeedsRescan => core.schedule(Job::Rescan),
            }
            *worker = Some(started);
        } else if !wanted {
            if let Some(running) = worker.take() {
                core.jobs = None;
                drop(core);
                self.shared.settled.notify_all();
                running.shutdown();
            }
        }
        Ok(())
    }

    fn stop_worker(&self) {
        let mut worker = self.worker.lock();
        if let Some(running) = worker.take() {
            self.shared.core.lock().jobs = None;
            self.shared.settled.notify_all();
            running.shutdown();
        }
    }
}

impl Drop for Stat {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::BuiltinOp;
    use crate::schema::{FieldDesc, RecordTypeDesc, Schema};
    use crate::store::InMemoryStore;
    use crate::value::ValueKind;

    fn store() -> Arc<InMemoryStore> {
        let store = InMemoryStore::new();
        let mut schema = Schema::new("S");
        schema
            .add(RecordTypeDesc::new(
                "T",
                vec![FieldDesc::new("N", ValueKind::Integer)],
            ))
            .unwrap();
        store.add_schema(schema).unwrap();
        store
    }

    fn field(name: &str, op: BuiltinOp) -> StatField {
        StatField::new(name, "S", "T", "N", op.name()).unwrap()
    }

    fn sum_stat(mode: UpdateMode) -> Stat {
        Stat::new("Totals", vec![field("Sum", BuiltinOp::Sum)], mode).unwrap()
    }

    #[test]
    fn new_rejects_bad_names() {
        assert!(matches!(
            Stat::new("", vec![], UpdateMode::Manual),
            Err(StatError::InvalidArgument(_))
        ));
        let dup = vec![field("F", BuiltinOp::Sum), field("F", BuiltinOp::Count)];
        assert!(matches!(
            Stat::new("S", dup, UpdateMode::Manual),
            Err(StatError::InvalidArgument(_))
        ));
    }

    #[test]
    fn attach_requires_rescan() {
        let store = store();
        store.add("S", "T", [("N", Value::Integer(4))]).unwrap();
        let stat = store.add_stat(sum_stat(UpdateMode::Manual)).unwrap();

        assert!(stat.is_active());
        assert_eq!(stat.state(), StatState::NeedsRescan);
        assert_eq!(stat.value("Sum").unwrap(), Value::Empty);
        assert_eq!(stat.update(false, true).unwrap(), StatState::UpToDate);
        assert_eq!(stat.value("Sum").unwrap(), Value::Integer(4));
    }

    #[test]
    fn manual_add_queues_then_applies() {
        let store = store();
        let stat = store.add_stat(sum_stat(UpdateMode::Manual)).unwrap();
        stat.update(true, true).unwrap();

        store.add("S", "T", [("N", Value::Integer(2))]).unwrap();
        store.add("S", "T", [("N", Value::Integer(3))]).unwrap();
        assert_eq!(stat.state(), StatState::NeedsUpdate);
        assert_eq!(stat.value("Sum").unwrap(), Value::Empty);

        assert_eq!(stat.update(false, false).unwrap(), StatState::UpToDate);
        assert_eq!(stat.value("Sum").unwrap(), Value::Integer(5));
    }

    #[test]
    fn remove_escalates_to_rescan() {
        let store = store();
        let stat = store.add_stat(sum_stat(UpdateMode::Manual)).unwrap();
        let a = store.add("S", "T", [("N", Value::Integer(2))]).unwrap();
        store.add("S", "T", [("N", Value::Integer(3))]).unwrap();
        stat.update(true, true).unwrap();

        store.remove(a.id()).unwrap();
        assert_eq!(stat.state(), StatState::NeedsRescan);
        store.add("S", "T", [("N", Value::Integer(10))]).unwrap();
        assert_eq!(stat.state(), StatState::NeedsRescan);

        stat.update(false, true).unwrap();
        assert_eq!(stat.value("Sum").unwrap(), Value::Integer(13));
    }

    #[test]
    fn queue_stays_short_while_rescan_due() {
        let store = store();
        let stat = store.add_stat(sum_stat(UpdateMode::Manual)).unwrap();
        let a = store.add("S", "T", [("N", Value::Integer(2))]).unwrap();
        stat.update(true, true).unwrap();

        store.remove(a.id()).unwrap();
        for n in 1..=5 {
            store.add("S", "T", [("N", Value::Integer(n))]).unwrap();
        }
        assert_eq!(stat.state(), StatState::NeedsRescan);
        assert_eq!(stat.shared.core.lock().pending.len(), 1);

        stat.update(false, true).unwrap();
        assert_eq!(stat.value("Sum").unwrap(), Value::Integer(15));
        assert!(stat.shared.core.lock().pending.is_empty());
    }

    #[test]
    fn disabled_ignores_everything() {
        let store = store();
        let stat = store.add_stat(sum_stat(UpdateMode::Disabled)).unwrap();
        store.add("S", "T", [("N", Value::Integer(2))]).unwrap();
        assert_eq!(stat.update(true, true).unwrap(), StatState::NeedsRescan);
        assert_eq!(stat.value("Sum").unwrap(), Value::Empty);

        stat.set_update_mode(UpdateMode::Manual).unwrap();
        assert_eq!(stat.state(), StatState::NeedsRescan);
        stat.update(false, true).unwrap();
        assert_eq!(stat.value("Sum").unwrap(), Value::Integer(2));
    }

    #[test]
    fn unknown_field_lookup() {
        let stat = sum_stat(UpdateMode::Manual);
        assert!(matches!(stat.value("Nope"), Err(StatError::NotFound(_))));
        assert_eq!(stat.with_field("Sum", |f| f.op_name().to_string()).unwrap(), BuiltinOp::Sum.name());
    }

    #[test]
    fn reset_clears_state_and_values() {
        let store = store();
        store.add("S", "T", [("N", Value::Integer(7))]).unwrap();
        let stat = store.add_stat(sum_stat(UpdateMode::Manual)).unwrap();
        stat.update(true, true).unwrap();
        store.add("S", "T", [("N", Value::Integer(1))]).unwrap();

        stat.reset();
        assert_eq!(stat.state(), StatState::UpToDate);
        assert_eq!(stat.value("Sum").unwrap(), Value::Empty);
    }

    #[test]
    fn detached_update_is_noop() {
        let store = store();
        let stat = store.add_stat(sum_stat(UpdateMode::Manual)).unwrap();
        stat.detach();
        assert!(!stat.is_active());
        assert_eq!(stat.update(true, true).unwrap(), StatState::NeedsRescan);
        stat.with_field("Sum", |f| assert!(f.record_type_desc().is_none()))
            .unwrap();
    }

    #[test]
    fn dropped_store_deactivates() {
        let stat = sum_stat(UpdateMode::Manual);
        {
            let store: Arc<dyn RecordStore> = store();
            stat.attach(&store).unwrap();
            assert!(stat.is_active());
        }
        assert!(!stat.is_active());
    }

    #[test]
    fn timer_period_must_be_positive() {
        let stat = sum_stat(UpdateMode::OnTimer);
        assert!(stat.set_timer_period(Duration::ZERO).is_err());
        stat.apply_options(&StatOptions::new().with_timer_period_ms(20).with_update_timeout_ms(5))
            .unwrap();
        assert_eq!(stat.timer_period(), Duration::from_millis(20));
        assert_eq!(stat.update_timeout(), Duration::from_millis(5));
    }

    #[test]
    fn config_round_trip() {
        let stat = Stat::new(
            "Totals",
            vec![field("Sum", BuiltinOp::Sum), field("Count", BuiltinOp::Count)],
            UpdateMode::OnAdd,
        )
        .unwrap();
        let config = stat.config();
        assert_eq!(config.fields.len(), 2);
        let copy = Stat::from_config(&config).unwrap();
        assert_eq!(copy.config(), config);
        assert_eq!(copy.update_mode(), UpdateMode::OnAdd);
    }
}
