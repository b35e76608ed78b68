//! Agent manager: the single owner of the conversational-agent lifecycle.
//!
//! All lifecycle changes go through one transition routine. Non-Stop
//! transitions queue on a fair gate so they run one at a time in the order
//! they were accepted. Stop never queues behind an in-flight transition: it
//! cancels it first, the cancelled transition rolls back, and the Stop runs
//! next. A failed or timed-out transition also rolls back to the state it
//! started from, and every outcome is reported as a `GeneralEventHappened`
//! event.
//!
//! Suspend is a flag orthogonal to the lifecycle state. While it is set,
//! speaking/listening controls are refused and speaking/listening
//! notifications from the backend are discarded.

pub mod backend;
pub mod contract;
pub mod lifecycle;

pub use backend::{AgentBackend, AgentNotifier, BackendSignal, SystemClock, TimeSource};

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use voxkit_types::agent::{
    AgentAttributes, AgentGeneralEvent, AgentGeneralFunction, ChatMode, GeneralAction,
    GeneralEvent, GeneralState,
};
use voxkit_types::config::AgentManagerConfig;
use voxkit_types::error::{ServiceError, ServiceResult};
use voxkit_types::schema::FunctionResult;
use voxkit_types::value::{TypedValue, ValueMap};

use crate::scheduler::{JobHandle, Scheduler};
use crate::service::{call_cancellation, EventEmitter, Service, ServiceContract};
use contract::{event, field, function};

/// Registered name of the agent manager service.
pub const SERVICE_NAME: &str = "AgentManager";

const TIME_SYNC_JOB: &str = "agent-manager.time-sync";

/// Extra wait granted to lifecycle callers beyond the action's own timeout,
/// covering queueing on the scheduler and the transition gate.
pub const TRANSITION_WAIT_MARGIN: Duration = Duration::from_millis(500);

struct InFlight {
    id: u64,
    action: GeneralAction,
    token: CancellationToken,
}

struct ManagerState {
    state: GeneralState,
    active: Option<String>,
    last: Option<String>,
    chat_mode: ChatMode,
    suspended: bool,
    speaking: bool,
    listening: bool,
    agents: BTreeMap<String, AgentAttributes>,
    in_flight: Option<InFlight>,
    /// Set when a Stop cancelled a transition; the Stop then runs from
    /// whatever state the rollback left.
    force_stop: bool,
    time_sync_probe: Option<JobHandle>,
}

enum Outcome {
    Done,
    Failed(String),
    TimedOut,
    Preempted,
    Abandoned,
}

struct Prepared {
    id: u64,
    previous: GeneralState,
    to: GeneralState,
    timeout: Duration,
    token: CancellationToken,
    backend: Option<Arc<dyn AgentBackend>>,
}

pub(crate) struct ManagerInner {
    state: Mutex<ManagerState>,
    backends: DashMap<String, Arc<dyn AgentBackend>>,
    /// FIFO admission for non-Stop transitions.
    gate: tokio::sync::Mutex<()>,
    /// Bumped by every Stop request; transitions queued before it abandon.
    stop_epoch: AtomicU64,
    next_transition: AtomicU64,
    emitter: Arc<EventEmitter>,
    scheduler: Arc<Scheduler>,
    time_source: Arc<dyn TimeSource>,
    config: AgentManagerConfig,
}

impl ManagerInner {
    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Events ──

    fn emit(&self, name: &str, items: ValueMap) {
        if let Err(e) = self.emitter.emit(name, items) {
            warn!(event = name, error = %e, "Failed to emit agent manager event");
        }
    }

    fn emit_one(&self, name: &str, item: &str, value: impl Into<TypedValue>) {
        let mut items = ValueMap::new();
        items.insert(item.to_string(), value.into());
        self.emit(name, items);
    }

    fn emit_general_event(&self, general: GeneralEvent, unexpected: bool) {
        let mut items = ValueMap::new();
        items.insert(field::EVENT.to_string(), TypedValue::from(general.as_str()));
        items.insert(field::IS_UNEXPECTED.to_string(), TypedValue::from(unexpected));
        self.emit(event::GENERAL_EVENT_HAPPENED, items);
    }

    /// Update a status flag and report it if it changed.
    fn set_flag(&self, flag: fn(&mut ManagerState) -> &mut bool, value: bool, name: &str) {
        let changed = {
            let mut st = self.lock();
            let slot = flag(&mut *st);
            let changed = *slot != value;
            *slot = value;
            changed
        };
        if changed {
            self.emit_one(name, field::STATUS, value);
        }
    }

    fn set_speaking(&self, value: bool) {
        self.set_flag(|s| &mut s.speaking, value, event::SPEAKING_STATUS_CHANGED);
    }

    fn set_listening(&self, value: bool) {
        self.set_flag(|s| &mut s.listening, value, event::LISTENING_STATUS_CHANGED);
    }

    fn set_suspended(&self, value: bool) {
        self.set_flag(|s| &mut s.suspended, value, event::SUSPEND_STATUS_CHANGED);
    }

    // ── Registration and queries ──

    fn attach_backend(self: &Arc<Self>, agent: &str, backend: Arc<dyn AgentBackend>) {
        backend.attach(AgentNotifier::new(agent, Arc::downgrade(self)));
        info!(agent, backend = backend.name(), "Agent backend registered");
        self.backends.insert(agent.to_string(), backend);
    }

    pub(crate) fn set_agent_info(&self, attrs: AgentAttributes) {
        info!(agent = %attrs.name, require_time_sync = attrs.require_time_sync, "Agent info set");
        self.lock().agents.insert(attrs.name.clone(), attrs);
    }

    pub(crate) fn attributes(&self, name: &str) -> ServiceResult<AgentAttributes> {
        self.lock()
            .agents
            .get(name)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("agent '{name}'")))
    }

    pub(crate) fn all_attributes(&self) -> Vec<AgentAttributes> {
        self.lock().agents.values().cloned().collect()
    }

    pub(crate) fn set_chat_mode(&self, mode: ChatMode) {
        let previous = std::mem::replace(&mut self.lock().chat_mode, mode);
        if previous != mode {
            info!(from = %previous, to = %mode, "Chat mode changed");
        }
    }

    pub(crate) fn chat_mode(&self) -> ChatMode {
        self.lock().chat_mode
    }

    pub(crate) fn active_agent(&self) -> Option<String> {
        self.lock().active.clone()
    }

    pub(crate) fn general_state(&self) -> GeneralState {
        self.lock().state
    }

    pub(crate) fn is_suspended(&self) -> bool {
        self.lock().suspended
    }

    pub(crate) fn is_speaking(&self) -> bool {
        self.lock().speaking
    }

    pub(crate) fn is_listening(&self) -> bool {
        self.lock().listening
    }

    fn is_busy(&self) -> bool {
        let st = self.lock();
        lifecycle::is_running(st.state)
            || lifecycle::is_transient(st.state)
            || st.in_flight.is_some()
    }

    /// Deadline of `action` for the active agent. TimeSync uses the manager's
    /// own bound; other actions need an active agent.
    pub(crate) fn action_timeout(&self, action: GeneralAction) -> Option<Duration> {
        Self::timeout_in(&self.lock(), action, &self.config)
    }

    fn timeout_in(
        st: &ManagerState,
        action: GeneralAction,
        config: &AgentManagerConfig,
    ) -> Option<Duration> {
        if action == GeneralAction::TimeSync {
            return Some(config.time_sync_timeout());
        }
        let agent = st.active.as_ref()?;
        let timeouts = st
            .agents
            .get(agent)
            .map(|a| a.operation_timeout.clone())
            .unwrap_or_default();
        timeouts.for_action(action)
    }

    // ── Agent selection ──

    pub(crate) async fn activate_agent(self: &Arc<Self>, name: &str) -> ServiceResult<()> {
        let target = {
            let st = self.lock();
            let target = if name.is_empty() {
                st.last.clone().ok_or_else(|| {
                    ServiceError::NotFound("no previously active agent".to_string())
                })?
            } else {
                name.to_string()
            };
            if !st.agents.contains_key(&target) {
                return Err(ServiceError::NotFound(format!("agent '{target}'")));
            }
            target
        };
        if !self.backends.contains_key(&target) {
            return Err(ServiceError::NotFound(format!("backend for agent '{target}'")));
        }

        let switching = self.is_busy();
        if switching {
            let current = self.active_agent();
            if current.as_deref() == Some(target.as_str()) {
                debug!(agent = %target, "Agent already active");
                return Ok(());
            }
            info!(
                previous = current.as_deref().unwrap_or(""),
                next = %target,
                "Stopping previous agent before switching"
            );
            self.preempt();
        }

        // Held from the stop through the selection so a queued transition of
        // the previous agent cannot run in between.
        let _gate = self.gate.lock().await;
        if switching {
            self.stop_running().await?;
        }
        let (initial, requires_sync) = {
            let mut st = self.lock();
            if lifecycle::is_running(st.state) || st.in_flight.is_some() {
                return Err(ServiceError::invalid_state(st.state, function::ACTIVATE_AGENT));
            }
            let requires_sync = st
                .agents
                .get(&target)
                .is_some_and(|a| a.require_time_sync);
            st.active = Some(target.clone());
            st.last = Some(target.clone());
            st.state = lifecycle::initial_state(requires_sync);
            (st.state, requires_sync)
        };
        self.set_speaking(false);
        self.set_listening(false);
        if requires_sync {
            self.install_time_sync_probe();
        } else {
            self.cancel_time_sync_probe();
        }
        info!(agent = %target, state = %initial, "Agent selected");
        Ok(())
    }

    // ── Lifecycle transitions ──

    pub(crate) async fn trigger(&self, action: GeneralAction) -> ServiceResult<GeneralEvent> {
        if action == GeneralAction::Stop {
            self.preempt();
            return self.stop().await;
        }

        let epoch = self.stop_epoch.load(Ordering::SeqCst);
        let caller = call_cancellation();
        let _gate = tokio::select! {
            gate = self.gate.lock() => gate,
            _ = caller_gone(caller.as_ref()) => {
                warn!(%action, "Transition abandoned: caller stopped waiting");
                self.emit_general_event(lifecycle::event_for(action), true);
                return Err(abandoned(action));
            }
        };
        if self.stop_epoch.load(Ordering::SeqCst) != epoch {
            let state = self.general_state();
            warn!(%action, "Transition abandoned: a Stop was requested while it waited");
            self.emit_general_event(lifecycle::event_for(action), true);
            return Err(ServiceError::invalid_state(state, action));
        }
        self.execute(action, false).await
    }

    /// Cancel the in-flight transition, if any, so a Stop can run next.
    /// A cancelled TimeSync never reached the backend, so it does not force
    /// the Stop.
    pub(crate) fn preempt(&self) {
        self.stop_epoch.fetch_add(1, Ordering::SeqCst);
        let mut st = self.lock();
        let cancelled = st
            .in_flight
            .as_ref()
            .filter(|f| f.action != GeneralAction::Stop)
            .map(|f| (f.action, f.token.clone()));
        if let Some((action, token)) = cancelled {
            info!(%action, "Pre-empting in-flight transition for Stop");
            token.cancel();
            st.force_stop = action != GeneralAction::TimeSync;
        }
    }

    async fn stop(&self) -> ServiceResult<GeneralEvent> {
        let _gate = self.gate.lock().await;
        let force = std::mem::take(&mut self.lock().force_stop);
        self.execute(GeneralAction::Stop, force).await
    }

    /// Stop the agent when it is running or a pre-empted transition left it
    /// half-started. Otherwise there is nothing for the backend to undo.
    async fn stop_if_running(&self) -> ServiceResult<()> {
        let _gate = self.gate.lock().await;
        self.stop_running().await
    }

    /// [`Self::stop_if_running`] for a caller already holding the gate.
    async fn stop_running(&self) -> ServiceResult<()> {
        let force = std::mem::take(&mut self.lock().force_stop);
        let state = self.general_state();
        if !force && !lifecycle::is_running(state) {
            debug!(%state, "No running agent to stop");
            return Ok(());
        }
        self.execute(GeneralAction::Stop, force).await.map(|_| ())
    }

    fn prepare(&self, action: GeneralAction, force: bool) -> ServiceResult<Prepared> {
        let mut st = self.lock();
        let Some(agent) = st.active.clone() else {
            return Err(ServiceError::invalid_state(st.state, action));
        };
        if st.in_flight.is_some() {
            return Err(ServiceError::invalid_state(st.state, action));
        }
        let row = if force && action == GeneralAction::Stop {
            lifecycle::transition(action)
        } else {
            lifecycle::plan(st.state, action)?
        };

        let timeout = Self::timeout_in(&st, action, &self.config)
            .unwrap_or_else(|| self.config.time_sync_timeout());
        let backend = if action == GeneralAction::TimeSync {
            None
        } else {
            let backend = self
                .backends
                .get(&agent)
                .map(|b| b.value().clone())
                .ok_or_else(|| ServiceError::NotFound(format!("backend for agent '{agent}'")))?;
            Some(backend)
        };

        let previous = st.state;
        if let Some(via) = row.via {
            st.state = via;
        }
        let id = self.next_transition.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        st.in_flight = Some(InFlight {
            id,
            action,
            token: token.clone(),
        });
        Ok(Prepared {
            id,
            previous,
            to: row.to,
            timeout,
            token,
            backend,
        })
    }

    async fn perform(
        &self,
        action: GeneralAction,
        backend: Option<Arc<dyn AgentBackend>>,
        deadline: Instant,
    ) -> Result<GeneralEvent, String> {
        match backend {
            None => self
                .time_source
                .sync(deadline)
                .await
                .map(|_| GeneralEvent::TimeSynced),
            Some(backend) => backend.apply(action, deadline).await,
        }
    }

    /// The one place lifecycle state changes.
    async fn execute(&self, action: GeneralAction, force: bool) -> ServiceResult<GeneralEvent> {
        let expected = lifecycle::event_for(action);
        let prepared = match self.prepare(action, force) {
            Ok(p) => p,
            Err(e) => {
                warn!(%action, error = %e, "Lifecycle action refused");
                self.emit_general_event(expected, true);
                return Err(e);
            }
        };

        info!(%action, from = %prepared.previous, forced = force, "Lifecycle transition accepted");
        self.emit_one(event::GENERAL_ACTION_TRIGGERED, field::ACTION, action.as_str());

        let deadline = Instant::now() + prepared.timeout;
        let work = tokio::time::timeout(
            prepared.timeout,
            self.perform(action, prepared.backend.clone(), deadline),
        );
        let caller = call_cancellation();
        let outcome = tokio::select! {
            _ = prepared.token.cancelled() => Outcome::Preempted,
            _ = caller_gone(caller.as_ref()) => Outcome::Abandoned,
            result = work => match result {
                Ok(Ok(got)) if got == expected => Outcome::Done,
                Ok(Ok(got)) => Outcome::Failed(format!("backend reported {got}")),
                Ok(Err(reason)) => Outcome::Failed(reason),
                Err(_) => Outcome::TimedOut,
            },
        };

        self.finish(action, &prepared, outcome)
    }

    fn finish(
        &self,
        action: GeneralAction,
        prepared: &Prepared,
        outcome: Outcome,
    ) -> ServiceResult<GeneralEvent> {
        let expected = lifecycle::event_for(action);
        let (result, was_stopped) = {
            let mut st = self.lock();
            if st.in_flight.as_ref().is_some_and(|f| f.id == prepared.id) {
                st.in_flight = None;
            }
            match outcome {
                Outcome::Done => {
                    st.state = prepared.to;
                    (Ok(expected), action == GeneralAction::Stop)
                }
                Outcome::Failed(reason) => {
                    st.state = prepared.previous;
                    (
                        Err(ServiceError::Internal(format!("{action} failed: {reason}"))),
                        false,
                    )
                }
                Outcome::TimedOut => {
                    st.state = prepared.previous;
                    (
                        Err(ServiceError::Timeout {
                            operation: action.to_string(),
                            timeout: prepared.timeout,
                        }),
                        false,
                    )
                }
                Outcome::Preempted => {
                    st.state = prepared.previous;
                    (
                        Err(ServiceError::invalid_state(GeneralState::Stopping, action)),
                        false,
                    )
                }
                Outcome::Abandoned => {
                    st.state = prepared.previous;
                    (Err(abandoned(action)), false)
                }
            }
        };

        if was_stopped {
            self.set_suspended(false);
            self.set_speaking(false);
            self.set_listening(false);
        }

        match &result {
            Ok(_) => {
                info!(%action, state = %prepared.to, "Lifecycle transition completed");
                self.emit_general_event(expected, false);
                if action == GeneralAction::TimeSync {
                    self.cancel_time_sync_probe();
                }
            }
            Err(e) => {
                warn!(%action, error = %e, state = %prepared.previous, "Lifecycle transition failed, rolled back");
                self.emit_general_event(expected, true);
            }
        }
        result
    }

    // ── Time sync ──

    fn install_time_sync_probe(self: &Arc<Self>) {
        self.cancel_time_sync_probe();
        let manager = Arc::downgrade(self);
        let probe = self.scheduler.submit_periodic(
            TIME_SYNC_JOB,
            self.config.time_sync_check_interval(),
            move || {
                let manager = manager.clone();
                async move {
                    match manager.upgrade() {
                        Some(manager) => manager.probe_time_sync().await,
                        None => Ok(()),
                    }
                }
            },
        );
        match probe {
            Ok(handle) => self.lock().time_sync_probe = Some(handle),
            Err(e) => warn!(error = %e, "Could not install time-sync probe"),
        }
    }

    fn cancel_time_sync_probe(&self) {
        let probe = self.lock().time_sync_probe.take();
        if let Some(handle) = probe {
            self.scheduler.cancel(&handle);
        }
    }

    async fn probe_time_sync(&self) -> anyhow::Result<()> {
        if self.general_state() != GeneralState::TimeSyncing {
            self.cancel_time_sync_probe();
            return Ok(());
        }
        if !self.time_source.is_synced() {
            debug!("Clock not synchronized yet");
            return Ok(());
        }
        self.trigger(GeneralAction::TimeSync).await?;
        Ok(())
    }

    // ── Suspend and agent controls ──

    fn running_backend(&self, operation: &str) -> ServiceResult<Arc<dyn AgentBackend>> {
        let st = self.lock();
        if !lifecycle::is_running(st.state) {
            return Err(ServiceError::invalid_state(st.state, operation));
        }
        let agent = st
            .active
            .clone()
            .ok_or_else(|| ServiceError::invalid_state(st.state, operation))?;
        drop(st);
        self.backends
            .get(&agent)
            .map(|b| b.value().clone())
            .ok_or_else(|| ServiceError::NotFound(format!("backend for agent '{agent}'")))
    }

    /// The active backend, provided it may perform `function` right now.
    fn capable_backend(
        &self,
        function: AgentGeneralFunction,
        manual_only: bool,
    ) -> ServiceResult<Arc<dyn AgentBackend>> {
        let operation = function.as_str();
        {
            let st = self.lock();
            if manual_only && st.chat_mode != ChatMode::Manual {
                return Err(ServiceError::invalid_state(
                    format!("{} chat mode", st.chat_mode),
                    operation,
                ));
            }
            if st.state != GeneralState::Started {
                return Err(ServiceError::invalid_state(st.state, operation));
            }
            if st.suspended {
                return Err(ServiceError::invalid_state("Suspended", operation));
            }
            let supported = st
                .active
                .as_ref()
                .and_then(|a| st.agents.get(a))
                .is_some_and(|a| a.supports_function(function));
            if !supported {
                return Err(ServiceError::invalid_state(
                    format!("agent without {function}"),
                    operation,
                ));
            }
        }
        self.running_backend(operation)
    }

    async fn backend_call<F>(&self, operation: &str, fut: F) -> ServiceResult<()>
    where
        F: std::future::Future<Output = Result<(), String>>,
    {
        let timeout = self.config.call_timeout();
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(ServiceError::Internal(format!("{operation} failed: {reason}"))),
            Err(_) => Err(ServiceError::Timeout {
                operation: operation.to_string(),
                timeout,
            }),
        }
    }

    pub(crate) async fn suspend(&self) -> ServiceResult<()> {
        if self.is_suspended() {
            return Ok(());
        }
        let backend = self.running_backend(function::SUSPEND)?;
        self.backend_call(function::SUSPEND, backend.suspend()).await?;
        self.set_suspended(true);
        info!("Agent suspended");
        Ok(())
    }

    pub(crate) async fn resume(&self) -> ServiceResult<()> {
        if !self.is_suspended() {
            return Ok(());
        }
        let backend = self.running_backend(function::RESUME)?;
        self.backend_call(function::RESUME, backend.resume()).await?;
        self.set_suspended(false);
        info!("Agent resumed");
        Ok(())
    }

    pub(crate) async fn interrupt_speaking(&self) -> ServiceResult<()> {
        let backend = self.capable_backend(AgentGeneralFunction::InterruptSpeaking, false)?;
        self.backend_call(function::INTERRUPT_SPEAKING, backend.interrupt_speaking())
            .await?;
        self.set_speaking(false);
        Ok(())
    }

    pub(crate) async fn manual_listening(&self, start: bool) -> ServiceResult<()> {
        let (capability, operation) = if start {
            (
                AgentGeneralFunction::ManualStartListening,
                function::MANUAL_START_LISTENING,
            )
        } else {
            (
                AgentGeneralFunction::ManualStopListening,
                function::MANUAL_STOP_LISTENING,
            )
        };
        let backend = self.capable_backend(capability, true)?;
        if start {
            self.backend_call(operation, backend.start_listening()).await?;
        } else {
            self.backend_call(operation, backend.stop_listening()).await?;
        }
        self.set_listening(start);
        Ok(())
    }

    // ── Reset ──

    pub(crate) async fn reset_data(&self) {
        if self.is_busy() {
            self.preempt();
            if let Err(e) = self.stop_if_running().await {
                warn!(error = %e, "Stop during reset failed, clearing state anyway");
            }
        }

        let _gate = self.gate.lock().await;
        self.cancel_time_sync_probe();
        {
            let mut st = self.lock();
            st.agents.clear();
            st.active = None;
            st.last = None;
            st.state = GeneralState::Ready;
            st.chat_mode = self.config.default_chat_mode;
            st.force_stop = false;
        }
        self.set_suspended(false);
        self.set_speaking(false);
        self.set_listening(false);
        info!("Agent data reset");
    }

    // ── Backend notifications ──

    pub(crate) fn handle_signal(&self, agent: &str, signal: BackendSignal) {
        let required = match &signal {
            BackendSignal::Speaking(_) => AgentGeneralEvent::SpeakingStatusChanged,
            BackendSignal::Listening(_) => AgentGeneralEvent::ListeningStatusChanged,
            BackendSignal::AgentText(_) => AgentGeneralEvent::AgentSpeakingTextGot,
            BackendSignal::UserText(_) => AgentGeneralEvent::UserSpeakingTextGot,
            BackendSignal::Emote(_) => AgentGeneralEvent::EmoteGot,
        };
        {
            let st = self.lock();
            if st.active.as_deref() != Some(agent) {
                debug!(agent, "Discarding signal from inactive agent");
                return;
            }
            let status = matches!(signal, BackendSignal::Speaking(_) | BackendSignal::Listening(_));
            if st.suspended && status {
                debug!(agent, "Discarding status signal while suspended");
                return;
            }
            if !st.agents.get(agent).is_some_and(|a| a.supports_event(required)) {
                debug!(agent, event = %required, "Discarding undeclared agent event");
                return;
            }
        }

        match signal {
            BackendSignal::Speaking(v) => self.set_speaking(v),
            BackendSignal::Listening(v) => self.set_listening(v),
            BackendSignal::AgentText(text) => {
                self.emit_one(event::AGENT_SPEAKING_TEXT_GOT, field::TEXT, text)
            }
            BackendSignal::UserText(text) => {
                self.emit_one(event::USER_SPEAKING_TEXT_GOT, field::TEXT, text)
            }
            BackendSignal::Emote(emote) => self.emit_one(event::EMOTE_GOT, field::EMOTE, emote),
        }
    }
}

/// Resolves once the caller of the current scheduled call stopped waiting.
async fn caller_gone(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

fn abandoned(action: GeneralAction) -> ServiceError {
    ServiceError::Internal(format!("{action} abandoned: caller stopped waiting"))
}

/// The agent manager service.
pub struct AgentManager {
    inner: Arc<ManagerInner>,
    contract: ServiceContract,
}

impl AgentManager {
    pub fn new(scheduler: Arc<Scheduler>, config: &AgentManagerConfig) -> Self {
        Self::with_time_source(scheduler, config, Arc::new(SystemClock))
    }

    pub fn with_time_source(
        scheduler: Arc<Scheduler>,
        config: &AgentManagerConfig,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        let emitter = Arc::new(EventEmitter::new(
            SERVICE_NAME,
            contract::event_schemas(),
            scheduler.clone(),
            config.event_buffer,
            config.event_history,
        ));
        let inner = Arc::new(ManagerInner {
            state: Mutex::new(ManagerState {
                state: GeneralState::Ready,
                active: None,
                last: None,
                chat_mode: config.default_chat_mode,
                suspended: false,
                speaking: false,
                listening: false,
                agents: BTreeMap::new(),
                in_flight: None,
                force_stop: false,
                time_sync_probe: None,
            }),
            backends: DashMap::new(),
            gate: tokio::sync::Mutex::new(()),
            stop_epoch: AtomicU64::new(0),
            next_transition: AtomicU64::new(1),
            emitter: emitter.clone(),
            scheduler: scheduler.clone(),
            time_source,
            config: config.clone(),
        });
        let builder = ServiceContract::builder(SERVICE_NAME, scheduler)
            .emitter(emitter)
            .call_timeout(config.call_timeout());
        let contract = contract::bind(builder, &inner).build();
        Self { inner, contract }
    }

    /// Register the backend that implements the agent called `backend.name()`.
    pub fn register_backend(&self, backend: Arc<dyn AgentBackend>) {
        let name = backend.name().to_string();
        self.inner.attach_backend(&name, backend);
    }

    /// Register attributes and backend for one agent in a single step.
    pub fn register_agent(&self, attrs: AgentAttributes, backend: Arc<dyn AgentBackend>) {
        self.inner.attach_backend(&attrs.name, backend);
        self.inner.set_agent_info(attrs);
    }

    pub fn general_state(&self) -> GeneralState {
        self.inner.general_state()
    }

    pub fn active_agent(&self) -> Option<String> {
        self.inner.active_agent()
    }

    /// Stop the running agent, if any, and the time-sync probe.
    pub async fn shutdown(&self) {
        self.inner.cancel_time_sync_probe();
        if self.inner.is_busy() {
            self.inner.preempt();
            if let Err(e) = self.inner.stop_if_running().await {
                warn!(error = %e, "Agent stop during shutdown failed");
            }
        }
    }

    /// Stop requests cut in ahead of the scheduler queue.
    fn preempt_for(&self, name: &str, params: &ValueMap) {
        let stop_requested = match name {
            function::RESET_DATA => true,
            function::TRIGGER_GENERAL_ACTION => params
                .get(field::ACTION)
                .and_then(TypedValue::as_str)
                .is_some_and(|a| a == GeneralAction::Stop.as_str()),
            _ => false,
        };
        if stop_requested && self.inner.is_busy() {
            self.inner.preempt();
        }
    }
}

#[async_trait]
impl Service for AgentManager {
    fn contract(&self) -> &ServiceContract {
        &self.contract
    }

    async fn call(&self, function: &str, params: ValueMap) -> FunctionResult {
        self.preempt_for(function, &params);
        self.contract.call(function, params).await
    }

    async fn call_with_timeout(
        &self,
        function: &str,
        params: ValueMap,
        timeout: Duration,
    ) -> FunctionResult {
        self.preempt_for(function, &params);
        self.contract
            .call_with_timeout(function, params, Some(timeout))
            .await
    }
}
