//! End-to-end agent lifecycle tests against scripted backends.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use voxkit_kernel::agent_manager::contract::{event, field, function};
use voxkit_kernel::agent_manager::lifecycle::event_for;
use voxkit_kernel::agent_manager::{AgentBackend, AgentManager, AgentNotifier, TimeSource};
use voxkit_kernel::event_bus::Subscription;
use voxkit_kernel::service::Service;
use voxkit_kernel::Kernel;
use voxkit_types::agent::{
    AgentAttributes, AgentGeneralEvent, AgentGeneralFunction, GeneralAction, GeneralEvent,
    GeneralState,
};
use voxkit_types::config::{RuntimeConfig, SchedulerConfig};
use voxkit_types::error::ErrorKind;
use voxkit_types::schema::{EventOccurrence, FunctionResult};
use voxkit_types::value::{TypedValue, ValueMap};

// ---------------------------------------------------------------------------
// Test backends
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Script {
    delay: Duration,
    hang_on: Option<GeneralAction>,
    fail_on: Option<GeneralAction>,
}

struct TestBackend {
    name: String,
    script: Script,
    applied: Mutex<Vec<GeneralAction>>,
    notifier: Mutex<Option<AgentNotifier>>,
}

impl TestBackend {
    fn new(name: &str, script: Script) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script,
            applied: Mutex::new(Vec::new()),
            notifier: Mutex::new(None),
        })
    }

    fn applied(&self) -> Vec<GeneralAction> {
        self.applied.lock().unwrap().clone()
    }

    fn notifier(&self) -> AgentNotifier {
        self.notifier.lock().unwrap().clone().unwrap()
    }
}

#[async_trait]
impl AgentBackend for TestBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, action: GeneralAction, _deadline: Instant) -> Result<GeneralEvent, String> {
        self.applied.lock().unwrap().push(action);
        if self.script.hang_on == Some(action) {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.script.delay).await;
        if self.script.fail_on == Some(action) {
            return Err(format!("induced {action} failure"));
        }
        Ok(event_for(action))
    }

    fn attach(&self, notifier: AgentNotifier) {
        *self.notifier.lock().unwrap() = Some(notifier);
    }
}

#[derive(Default)]
struct FakeClock {
    synced: AtomicBool,
    /// Reports synced but never finishes a sync.
    stall: bool,
}

impl FakeClock {
    fn synced() -> Arc<Self> {
        Arc::new(Self {
            synced: AtomicBool::new(true),
            stall: false,
        })
    }
}

#[async_trait]
impl TimeSource for FakeClock {
    fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    async fn sync(&self, _deadline: Instant) -> Result<(), String> {
        if self.stall {
            std::future::pending::<()>().await;
        }
        if self.is_synced() {
            Ok(())
        } else {
            Err("clock not synced".to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config() -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.scheduler = SchedulerConfig::with_workers(2, 5);
    config.agent_manager.time_sync_check_interval_ms = 20;
    config
}

fn boot() -> (Kernel, Arc<AgentManager>) {
    boot_with(config(), FakeClock::synced())
}

fn boot_with_clock(clock: Arc<FakeClock>) -> (Kernel, Arc<AgentManager>) {
    boot_with(config(), clock)
}

fn boot_with(config: RuntimeConfig, clock: Arc<FakeClock>) -> (Kernel, Arc<AgentManager>) {
    let kernel = Kernel::boot_with_time_source(config, clock).unwrap();
    let manager = kernel.agent_manager();
    (kernel, manager)
}

fn attrs(name: &str) -> AgentAttributes {
    let mut attrs = AgentAttributes::new(name);
    attrs.general_functions = AgentGeneralFunction::ALL.to_vec();
    attrs.general_events = AgentGeneralEvent::ALL.to_vec();
    attrs
}

fn one(name: &str, value: impl Into<TypedValue>) -> ValueMap {
    let mut p = ValueMap::new();
    p.insert(name.to_string(), value.into());
    p
}

async fn trigger(manager: &AgentManager, action: &str) -> FunctionResult {
    manager
        .call(function::TRIGGER_GENERAL_ACTION, one(field::ACTION, action))
        .await
}

async fn activate(manager: &AgentManager, name: &str) -> FunctionResult {
    manager
        .call(function::ACTIVATE_AGENT, one(field::NAME, name))
        .await
}

async fn get(manager: &AgentManager, name: &str) -> TypedValue {
    manager.call(name, ValueMap::new()).await.data.unwrap()
}

async fn next_event(sub: &mut Subscription, name: &str) -> EventOccurrence {
    loop {
        let occurrence = tokio::time::timeout(Duration::from_secs(3), sub.recv())
            .await
            .expect("timed out waiting for event")
            .expect("subscription closed");
        if occurrence.event == name {
            return occurrence;
        }
    }
}

async fn next_general_event(sub: &mut Subscription) -> (String, bool) {
    let occ = next_event(sub, event::GENERAL_EVENT_HAPPENED).await;
    (
        occ.item(field::EVENT).and_then(|v| v.as_str()).unwrap().to_string(),
        occ.item(field::IS_UNEXPECTED).and_then(|v| v.as_bool()).unwrap(),
    )
}

async fn start_agent(manager: &AgentManager, name: &str) {
    assert!(activate(manager, name).await.success);
    assert!(trigger(manager, "Activate").await.success);
    assert!(trigger(manager, "Start").await.success);
    assert_eq!(manager.general_state(), GeneralState::Started);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_activate_with_responsive_backend() {
    let (kernel, manager) = boot();
    let backend = TestBackend::new(
        "alpha",
        Script {
            delay: Duration::from_millis(100),
            ..Default::default()
        },
    );
    manager.register_agent(attrs("alpha"), backend.clone());
    assert!(activate(&manager, "alpha").await.success);
    assert_eq!(manager.general_state(), GeneralState::Ready);

    let mut sub = manager.subscribe_all();
    let pending = {
        let manager = manager.clone();
        tokio::spawn(async move { trigger(&manager, "Activate").await })
    };
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(manager.general_state(), GeneralState::Activating);

    let result = pending.await.unwrap();
    assert!(result.success);
    assert_eq!(result.data, Some(TypedValue::from("Activated")));
    assert_eq!(manager.general_state(), GeneralState::Activated);

    let triggered = next_event(&mut sub, event::GENERAL_ACTION_TRIGGERED).await;
    assert_eq!(triggered.item(field::ACTION), Some(&TypedValue::from("Activate")));
    assert_eq!(next_general_event(&mut sub).await, ("Activated".to_string(), false));
    assert_eq!(backend.applied(), vec![GeneralAction::Activate]);
    kernel.shutdown().await;
}

#[tokio::test]
async fn test_activate_times_out_against_silent_backend() {
    let (kernel, manager) = boot();
    let backend = TestBackend::new(
        "alpha",
        Script {
            hang_on: Some(GeneralAction::Activate),
            ..Default::default()
        },
    );
    manager.register_agent(attrs("alpha"), backend);
    assert!(activate(&manager, "alpha").await.success);
    let mut sub = manager.subscribe(event::GENERAL_EVENT_HAPPENED).unwrap();

    let started = Instant::now();
    let result = trigger(&manager, "Activate").await;
    let elapsed = started.elapsed();

    assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    assert!(elapsed >= Duration::from_millis(1000), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(3000), "returned after {elapsed:?}");
    assert_eq!(next_general_event(&mut sub).await, ("Activated".to_string(), true));
    assert_eq!(manager.general_state(), GeneralState::Ready);
    kernel.shutdown().await;
}

#[tokio::test]
async fn test_transition_wait_follows_agent_timeout() {
    let mut config = config();
    config.agent_manager.call_timeout_ms = 300;
    let (kernel, manager) = boot_with(config, FakeClock::synced());
    let mut info = attrs("alpha");
    info.operation_timeout.activate = Duration::from_millis(1500);
    manager.register_agent(
        info,
        TestBackend::new(
            "alpha",
            Script {
                delay: Duration::from_millis(600),
                ..Default::default()
            },
        ),
    );
    assert!(activate(&manager, "alpha").await.success);
    let mut sub = manager.subscribe(event::GENERAL_EVENT_HAPPENED).unwrap();

    let result = trigger(&manager, "Activate").await;
    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(manager.general_state(), GeneralState::Activated);
    assert_eq!(next_general_event(&mut sub).await, ("Activated".to_string(), false));
    kernel.shutdown().await;
}

#[tokio::test]
async fn test_caller_timeout_rolls_back_transition() {
    let (kernel, manager) = boot();
    let backend = TestBackend::new(
        "alpha",
        Script {
            delay: Duration::from_millis(600),
            ..Default::default()
        },
    );
    manager.register_agent(attrs("alpha"), backend.clone());
    assert!(activate(&manager, "alpha").await.success);
    let mut sub = manager.subscribe(event::GENERAL_EVENT_HAPPENED).unwrap();

    let result = manager
        .call_with_timeout(
            function::TRIGGER_GENERAL_ACTION,
            one(field::ACTION, "Activate"),
            Duration::from_millis(200),
        )
        .await;
    assert_eq!(result.error_kind, Some(ErrorKind::Timeout));

    // The transition must not commit behind the caller's back.
    assert_eq!(next_general_event(&mut sub).await, ("Activated".to_string(), true));
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(manager.general_state(), GeneralState::Ready);
    assert_eq!(backend.applied(), vec![GeneralAction::Activate]);

    // The agent is still usable afterwards.
    assert!(trigger(&manager, "Activate").await.success);
    assert_eq!(manager.general_state(), GeneralState::Activated);
    kernel.shutdown().await;
}

#[tokio::test]
async fn test_backend_failure_rolls_back() {
    let (kernel, manager) = boot();
    manager.register_agent(
        attrs("alpha"),
        TestBackend::new(
            "alpha",
            Script {
                fail_on: Some(GeneralAction::Sleep),
                ..Default::default()
            },
        ),
    );
    start_agent(&manager, "alpha").await;
    let mut sub = manager.subscribe(event::GENERAL_EVENT_HAPPENED).unwrap();

    let result = trigger(&manager, "Sleep").await;
    assert_eq!(result.error_kind, Some(ErrorKind::Internal));
    assert_eq!(manager.general_state(), GeneralState::Started);
    assert_eq!(next_general_event(&mut sub).await, ("Slept".to_string(), true));
    kernel.shutdown().await;
}

#[tokio::test]
async fn test_invalid_action_reports_unexpected_event() {
    let (kernel, manager) = boot();
    manager.register_agent(attrs("alpha"), TestBackend::new("alpha", Script::default()));
    assert!(activate(&manager, "alpha").await.success);
    let mut sub = manager.subscribe(event::GENERAL_EVENT_HAPPENED).unwrap();

    let result = trigger(&manager, "Sleep").await;
    assert_eq!(result.error_kind, Some(ErrorKind::InvalidState));
    assert_eq!(next_general_event(&mut sub).await, ("Slept".to_string(), true));

    let result = trigger(&manager, "Stop").await;
    assert_eq!(result.error_kind, Some(ErrorKind::InvalidState));
    assert_eq!(manager.general_state(), GeneralState::Ready);
    kernel.shutdown().await;
}

#[tokio::test]
async fn test_full_cycle_and_status_queries_are_stable() {
    let (kernel, manager) = boot();
    let backend = TestBackend::new("alpha", Script::default());
    manager.register_agent(attrs("alpha"), backend.clone());
    start_agent(&manager, "alpha").await;

    for (action, state) in [
        ("Sleep", GeneralState::Slept),
        ("WakeUp", GeneralState::Started),
        ("Stop", GeneralState::Ready),
    ] {
        let result = trigger(&manager, action).await;
        assert!(result.success, "{action}: {:?}", result.error_message);
        assert_eq!(manager.general_state(), state);
    }

    for query in [
        function::GET_GENERAL_STATE,
        function::GET_SUSPEND_STATUS,
        function::GET_SPEAKING_STATUS,
        function::GET_LISTENING_STATUS,
        function::GET_ACTIVE_AGENT,
        function::GET_CHAT_MODE,
    ] {
        assert_eq!(get(&manager, query).await, get(&manager, query).await);
    }
    assert_eq!(get(&manager, function::GET_GENERAL_STATE).await, TypedValue::from("Ready"));
    assert_eq!(get(&manager, function::GET_ACTIVE_AGENT).await, TypedValue::from("alpha"));
    assert_eq!(backend.applied().len(), 5);
    kernel.shutdown().await;
}

#[tokio::test]
async fn test_manual_listening_requires_manual_chat_mode() {
    let (kernel, manager) = boot();
    manager.register_agent(attrs("alpha"), TestBackend::new("alpha", Script::default()));
    start_agent(&manager, "alpha").await;

    let result = manager.call(function::MANUAL_START_LISTENING, ValueMap::new()).await;
    assert_eq!(result.error_kind, Some(ErrorKind::InvalidState));

    let mut sub = manager.subscribe(event::LISTENING_STATUS_CHANGED).unwrap();
    assert!(manager
        .call(function::SET_CHAT_MODE, one(field::MODE, "Manual"))
        .await
        .success);
    let result = manager.call(function::MANUAL_START_LISTENING, ValueMap::new()).await;
    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(get(&manager, function::GET_LISTENING_STATUS).await, TypedValue::from(true));
    let occ = next_event(&mut sub, event::LISTENING_STATUS_CHANGED).await;
    assert_eq!(occ.item(field::STATUS), Some(&TypedValue::from(true)));

    assert!(manager
        .call(function::MANUAL_STOP_LISTENING, ValueMap::new())
        .await
        .success);
    assert_eq!(get(&manager, function::GET_LISTENING_STATUS).await, TypedValue::from(false));

    let bad = manager
        .call(function::SET_CHAT_MODE, one(field::MODE, "Shouting"))
        .await;
    assert_eq!(bad.error_kind, Some(ErrorKind::InvalidArgument));
    kernel.shutdown().await;
}

#[tokio::test]
async fn test_capability_gating() {
    let (kernel, manager) = boot();
    manager.register_agent(
        AgentAttributes::new("plain"),
        TestBackend::new("plain", Script::default()),
    );
    start_agent(&manager, "plain").await;
    let result = manager.call(function::INTERRUPT_SPEAKING, ValueMap::new()).await;
    assert_eq!(result.error_kind, Some(ErrorKind::InvalidState));
    kernel.shutdown().await;
}

#[tokio::test]
async fn test_reset_data_forgets_agents() {
    let (kernel, manager) = boot();
    manager.register_agent(attrs("alpha"), TestBackend::new("alpha", Script::default()));
    start_agent(&manager, "alpha").await;

    assert!(manager.call(function::RESET_DATA, ValueMap::new()).await.success);
    let result = manager
        .call(function::GET_AGENT_ATTRIBUTES, one(field::NAME, "alpha"))
        .await;
    assert_eq!(result.error_kind, Some(ErrorKind::NotFound));
    assert_eq!(manager.general_state(), GeneralState::Ready);
    assert_eq!(get(&manager, function::GET_ACTIVE_AGENT).await, TypedValue::from(""));
    assert_eq!(
        get(&manager, function::GET_AGENT_ATTRIBUTES).await,
        TypedValue::Array(Vec::new())
    );
    kernel.shutdown().await;
}

#[tokio::test]
async fn test_stop_preempts_in_flight_transition() {
    let (kernel, manager) = boot();
    let backend = TestBackend::new(
        "alpha",
        Script {
            hang_on: Some(GeneralAction::Start),
            ..Default::default()
        },
    );
    let mut info = attrs("alpha");
    info.operation_timeout.start = Duration::from_secs(5);
    manager.register_agent(info, backend.clone());
    assert!(activate(&manager, "alpha").await.success);
    assert!(trigger(&manager, "Activate").await.success);

    let pending = {
        let manager = manager.clone();
        tokio::spawn(async move { trigger(&manager, "Start").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.general_state(), GeneralState::Starting);

    let started = Instant::now();
    let stop = trigger(&manager, "Stop").await;
    assert!(stop.success, "{:?}", stop.error_message);
    assert!(started.elapsed() < Duration::from_secs(2));

    let start = pending.await.unwrap();
    assert_eq!(start.error_kind, Some(ErrorKind::InvalidState));
    assert_eq!(manager.general_state(), GeneralState::Ready);
    assert_eq!(
        backend.applied(),
        vec![GeneralAction::Activate, GeneralAction::Start, GeneralAction::Stop]
    );
    kernel.shutdown().await;
}

#[tokio::test]
async fn test_switching_agents_stops_previous_one() {
    let (kernel, manager) = boot();
    let alpha = TestBackend::new("alpha", Script::default());
    manager.register_agent(attrs("alpha"), alpha.clone());
    manager.register_agent(attrs("beta"), TestBackend::new("beta", Script::default()));
    start_agent(&manager, "alpha").await;

    assert!(activate(&manager, "beta").await.success);
    assert_eq!(manager.active_agent().as_deref(), Some("beta"));
    assert_eq!(manager.general_state(), GeneralState::Ready);
    assert_eq!(alpha.applied().last(), Some(&GeneralAction::Stop));

    // An empty name goes back to the last selected agent.
    assert!(activate(&manager, "").await.success);
    assert_eq!(manager.active_agent().as_deref(), Some("beta"));

    let unknown = activate(&manager, "gamma").await;
    assert_eq!(unknown.error_kind, Some(ErrorKind::NotFound));
    kernel.shutdown().await;
}

#[tokio::test]
async fn test_suspend_blocks_controls_and_status_signals() {
    let (kernel, manager) = boot();
    let backend = TestBackend::new("alpha", Script::default());
    manager.register_agent(attrs("alpha"), backend.clone());

    let result = manager.call(function::SUSPEND, ValueMap::new()).await;
    assert_eq!(result.error_kind, Some(ErrorKind::InvalidState));

    start_agent(&manager, "alpha").await;
    let mut sub = manager.subscribe(event::SUSPEND_STATUS_CHANGED).unwrap();
    assert!(manager.call(function::SUSPEND, ValueMap::new()).await.success);
    assert_eq!(get(&manager, function::GET_SUSPEND_STATUS).await, TypedValue::from(true));
    let occ = next_event(&mut sub, event::SUSPEND_STATUS_CHANGED).await;
    assert_eq!(occ.item(field::STATUS), Some(&TypedValue::from(true)));
    assert_eq!(manager.general_state(), GeneralState::Started);

    backend.notifier().speaking_changed(true);
    assert_eq!(get(&manager, function::GET_SPEAKING_STATUS).await, TypedValue::from(false));
    let result = manager.call(function::INTERRUPT_SPEAKING, ValueMap::new()).await;
    assert_eq!(result.error_kind, Some(ErrorKind::InvalidState));

    assert!(manager.call(function::RESUME, ValueMap::new()).await.success);
    assert_eq!(get(&manager, function::GET_SUSPEND_STATUS).await, TypedValue::from(false));
    backend.notifier().speaking_changed(true);
    assert_eq!(get(&manager, function::GET_SPEAKING_STATUS).await, TypedValue::from(true));
    assert!(manager
        .call(function::INTERRUPT_SPEAKING, ValueMap::new())
        .await
        .success);
    assert_eq!(get(&manager, function::GET_SPEAKING_STATUS).await, TypedValue::from(false));
    kernel.shutdown().await;
}

#[tokio::test]
async fn test_backend_notifications_are_reemitted() {
    let (kernel, manager) = boot();
    let backend = TestBackend::new("alpha", Script::default());
    manager.register_agent(attrs("alpha"), backend.clone());
    start_agent(&manager, "alpha").await;
    let mut sub = manager.subscribe_all();

    backend.notifier().agent_text("hello there");
    backend.notifier().user_text("hi");
    backend.notifier().emote("wink");

    let occ = next_event(&mut sub, event::AGENT_SPEAKING_TEXT_GOT).await;
    assert_eq!(occ.item(field::TEXT), Some(&TypedValue::from("hello there")));
    let occ = next_event(&mut sub, event::USER_SPEAKING_TEXT_GOT).await;
    assert_eq!(occ.item(field::TEXT), Some(&TypedValue::from("hi")));
    let occ = next_event(&mut sub, event::EMOTE_GOT).await;
    assert_eq!(occ.item(field::EMOTE), Some(&TypedValue::from("wink")));
    kernel.shutdown().await;
}

#[tokio::test]
async fn test_time_sync_job_advances_to_ready() {
    let clock = Arc::new(FakeClock::default());
    let (kernel, manager) = boot_with_clock(clock.clone());
    let mut info = attrs("alpha");
    info.require_time_sync = true;
    manager.register_agent(info, TestBackend::new("alpha", Script::default()));

    assert!(activate(&manager, "alpha").await.success);
    assert_eq!(manager.general_state(), GeneralState::TimeSyncing);
    let result = trigger(&manager, "Activate").await;
    assert_eq!(result.error_kind, Some(ErrorKind::InvalidState));

    let mut sub = manager.subscribe(event::GENERAL_EVENT_HAPPENED).unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(manager.general_state(), GeneralState::TimeSyncing);
    clock.synced.store(true, Ordering::SeqCst);

    assert_eq!(next_general_event(&mut sub).await, ("TimeSynced".to_string(), false));
    assert_eq!(manager.general_state(), GeneralState::Ready);
    kernel.shutdown().await;
}

#[tokio::test]
async fn test_switching_during_time_sync_leaves_backend_untouched() {
    let mut config = config();
    config.agent_manager.time_sync_timeout_ms = 5_000;
    let clock = Arc::new(FakeClock {
        synced: AtomicBool::new(true),
        stall: true,
    });
    let (kernel, manager) = boot_with(config, clock);
    let alpha = TestBackend::new("alpha", Script::default());
    let mut info = attrs("alpha");
    info.require_time_sync = true;
    manager.register_agent(info, alpha.clone());
    manager.register_agent(attrs("beta"), TestBackend::new("beta", Script::default()));

    let mut triggered = manager.subscribe(event::GENERAL_ACTION_TRIGGERED).unwrap();
    let mut general = manager.subscribe(event::GENERAL_EVENT_HAPPENED).unwrap();
    assert!(activate(&manager, "alpha").await.success);
    let occ = next_event(&mut triggered, event::GENERAL_ACTION_TRIGGERED).await;
    assert_eq!(occ.item(field::ACTION), Some(&TypedValue::from("TimeSync")));

    let started = Instant::now();
    let result = activate(&manager, "beta").await;
    assert!(result.success, "{:?}", result.error_message);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(next_general_event(&mut general).await, ("TimeSynced".to_string(), true));
    assert_eq!(manager.active_agent().as_deref(), Some("beta"));
    assert_eq!(manager.general_state(), GeneralState::Ready);
    assert!(alpha.applied().is_empty());
    kernel.shutdown().await;
}

#[tokio::test]
async fn test_set_agent_info_through_contract() {
    let (kernel, manager) = boot();
    let mut info = ValueMap::new();
    info.insert("name".to_string(), TypedValue::from("remote"));
    info.insert("require_time_sync".to_string(), TypedValue::from(false));
    info.insert(
        "general_functions".to_string(),
        TypedValue::Array(vec![TypedValue::from("InterruptSpeaking")]),
    );
    let result = manager
        .call(function::SET_AGENT_INFO, one(field::INFO, TypedValue::Object(info)))
        .await;
    assert!(result.success, "{:?}", result.error_message);

    let attrs = get(&manager, function::GET_AGENT_ATTRIBUTES).await;
    assert_eq!(attrs.as_array().map(|a| a.len()), Some(1));

    let one_agent = manager
        .call(function::GET_AGENT_ATTRIBUTES, one(field::NAME, "remote"))
        .await;
    let obj = one_agent.data.unwrap();
    let obj = obj.as_object().unwrap();
    assert_eq!(
        obj.get("operation_timeout")
            .and_then(|t| t.as_object())
            .and_then(|t| t.get("activate")),
        Some(&TypedValue::from(1000))
    );

    // Registered attributes without a backend cannot be activated.
    let result = activate(&manager, "remote").await;
    assert_eq!(result.error_kind, Some(ErrorKind::NotFound));

    let bad = manager
        .call(function::SET_AGENT_INFO, one(field::INFO, "remote"))
        .await;
    assert_eq!(bad.error_kind, Some(ErrorKind::InvalidArgument));
    kernel.shutdown().await;
}
