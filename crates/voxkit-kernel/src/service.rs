//! Service contracts: type-checked function calls and event emission.
//!
//! A [`ServiceContract`] pairs every [`FunctionSchema`] with a handler and
//! owns an [`EventEmitter`] for the service's events. Validation is purely
//! structural: presence of required parameters and tag equality between a
//! value and its declared type. Anything semantic belongs to the handler.
//!
//! Functions marked `require_scheduling` run on the task scheduler; the
//! caller awaits the result bounded by a timeout. All other functions run
//! inline on the caller's task.
//!
//! A scheduled handler keeps running on its worker after the caller stops
//! waiting. Each scheduled call therefore carries a cancellation token,
//! readable from the handler through [`call_cancellation`], that fires when
//! the caller's wait expires.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use voxkit_types::error::{ServiceError, ServiceResult};
use voxkit_types::schema::{EventId, EventOccurrence, EventSchema, FunctionResult, FunctionSchema};
use voxkit_types::value::{TypedValue, ValueMap};

use crate::event_bus::{EventHub, Subscription, SubscriptionId};
use crate::scheduler::Scheduler;

/// Future returned by a function handler.
pub type HandlerFuture = BoxFuture<'static, ServiceResult<Option<TypedValue>>>;

/// A bound function implementation. Receives the validated parameter map
/// with defaults filled in.
pub type Handler = Arc<dyn Fn(ValueMap) -> HandlerFuture + Send + Sync>;

/// Picks how long a caller waits for a scheduled function, given its
/// validated parameters. `None` falls back to the contract default.
pub type TimeoutResolver = Arc<dyn Fn(&ValueMap) -> Option<Duration> + Send + Sync>;

tokio::task_local! {
    static CALL_CANCELLATION: CancellationToken;
}

/// Token cancelled once the caller of the current scheduled call gave up
/// waiting. `None` outside a scheduled handler.
pub fn call_cancellation() -> Option<CancellationToken> {
    CALL_CANCELLATION.try_with(CancellationToken::clone).ok()
}

/// Wrap an async closure as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(ValueMap) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ServiceResult<Option<TypedValue>>> + Send + 'static,
{
    Arc::new(move |params| f(params).boxed())
}

/// Check `params` against `schema` and fill in defaults.
pub fn validate_parameters(schema: &FunctionSchema, mut params: ValueMap) -> ServiceResult<ValueMap> {
    if let Some(unknown) = params.keys().find(|k| schema.parameter(k).is_none()) {
        return Err(ServiceError::InvalidArgument(format!(
            "'{}' has no parameter '{}'",
            schema.name, unknown
        )));
    }
    for param in &schema.parameters {
        match params.get(&param.name) {
            Some(value) if !value.is_compatible(param.value_type) => {
                return Err(ServiceError::InvalidArgument(format!(
                    "parameter '{}' of '{}' expects {}, got {}",
                    param.name,
                    schema.name,
                    param.value_type,
                    value.value_type()
                )));
            }
            Some(_) => {}
            None => match &param.default {
                Some(default) => {
                    params.insert(param.name.clone(), default.clone());
                }
                None => {
                    return Err(ServiceError::InvalidArgument(format!(
                        "missing required parameter '{}' of '{}'",
                        param.name, schema.name
                    )));
                }
            },
        }
    }
    Ok(params)
}

/// Check `items` against `schema`. Every declared item is required.
pub fn validate_items(schema: &EventSchema, items: &ValueMap) -> ServiceResult<()> {
    if let Some(unknown) = items
        .keys()
        .find(|k| !schema.items.iter().any(|i| &i.name == *k))
    {
        return Err(ServiceError::InvalidArgument(format!(
            "event '{}' has no item '{}'",
            schema.name, unknown
        )));
    }
    for item in &schema.items {
        match items.get(&item.name) {
            None => {
                return Err(ServiceError::InvalidArgument(format!(
                    "missing item '{}' of event '{}'",
                    item.name, schema.name
                )));
            }
            Some(value) if !value.is_compatible(item.value_type) => {
                return Err(ServiceError::InvalidArgument(format!(
                    "item '{}' of event '{}' expects {}, got {}",
                    item.name,
                    schema.name,
                    item.value_type,
                    value.value_type()
                )));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Validates and publishes a service's events.
pub struct EventEmitter {
    service: String,
    schemas: Vec<EventSchema>,
    hub: Arc<EventHub>,
    scheduler: Arc<Scheduler>,
}

impl EventEmitter {
    /// `buffer` is the per-subscriber capacity, `history` the number of
    /// occurrences kept for inspection.
    pub fn new(
        service: &str,
        schemas: Vec<EventSchema>,
        scheduler: Arc<Scheduler>,
        buffer: usize,
        history: usize,
    ) -> Self {
        Self {
            service: service.to_string(),
            schemas,
            hub: Arc::new(EventHub::new(buffer, history)),
            scheduler,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn schemas(&self) -> &[EventSchema] {
        &self.schemas
    }

    fn schema(&self, event: &str) -> ServiceResult<&EventSchema> {
        self.schemas
            .iter()
            .find(|s| s.name == event)
            .ok_or_else(|| ServiceError::NotFound(format!("event '{}.{}'", self.service, event)))
    }

    /// Validate `items` and hand the occurrence to every current subscriber.
    pub fn emit(&self, event: &str, items: ValueMap) -> ServiceResult<EventId> {
        let schema = self.schema(event)?;
        validate_items(schema, &items)?;

        let occurrence = EventOccurrence::new(&self.service, event, items);
        let id = occurrence.id;
        if schema.require_scheduling {
            let hub = self.hub.clone();
            self.scheduler
                .submit(&format!("{}.{}", self.service, event), async move {
                    hub.publish(occurrence);
                    Ok(())
                })
                .map_err(|e| ServiceError::Internal(e.to_string()))?;
        } else {
            let delivered = self.hub.publish(occurrence);
            debug!(service = %self.service, event, delivered, "Event emitted");
        }
        Ok(id)
    }

    pub fn subscribe(&self, event: &str) -> ServiceResult<Subscription> {
        self.schema(event)?;
        Ok(self.hub.subscribe(event))
    }

    pub fn subscribe_all(&self) -> Subscription {
        self.hub.subscribe_all()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.hub.unsubscribe(id)
    }

    /// Most recent occurrences, newest first.
    pub fn history(&self, limit: usize) -> Vec<EventOccurrence> {
        self.hub.history(limit)
    }
}

/// The callable and emittable surface of one service.
pub struct ServiceContract {
    name: String,
    functions: Vec<FunctionSchema>,
    handlers: HashMap<String, Handler>,
    timeouts: HashMap<String, TimeoutResolver>,
    emitter: Arc<EventEmitter>,
    scheduler: Arc<Scheduler>,
    call_timeout: Duration,
}

impl ServiceContract {
    pub fn builder(name: &str, scheduler: Arc<Scheduler>) -> ServiceContractBuilder {
        ServiceContractBuilder {
            name: name.to_string(),
            scheduler,
            functions: Vec::new(),
            handlers: HashMap::new(),
            timeouts: HashMap::new(),
            events: Vec::new(),
            emitter: None,
            call_timeout: Duration::from_secs(10),
            event_buffer: 64,
            event_history: 256,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn function_schemas(&self) -> &[FunctionSchema] {
        &self.functions
    }

    pub fn event_schemas(&self) -> &[EventSchema] {
        self.emitter.schemas()
    }

    /// Shared handle to the emitter, for handlers that raise events.
    pub fn emitter(&self) -> Arc<EventEmitter> {
        self.emitter.clone()
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Invoke `function` with the contract's default timeout.
    pub async fn call(&self, function: &str, params: ValueMap) -> FunctionResult {
        self.call_with_timeout(function, params, None).await
    }

    /// Invoke `function`. `timeout` bounds scheduled functions only; `None`
    /// uses the function's resolver, then the contract default. When the
    /// wait expires the call's cancellation token fires.
    pub async fn call_with_timeout(
        &self,
        function: &str,
        params: ValueMap,
        timeout: Option<Duration>,
    ) -> FunctionResult {
        let result = self.dispatch(function, params, timeout).await;
        if let Err(e) = &result {
            debug!(service = %self.name, function, error = %e, "Call failed");
        }
        FunctionResult::from(result)
    }

    async fn dispatch(
        &self,
        function: &str,
        params: ValueMap,
        timeout: Option<Duration>,
    ) -> ServiceResult<Option<TypedValue>> {
        let schema = self
            .functions
            .iter()
            .find(|s| s.name == function)
            .ok_or_else(|| ServiceError::NotFound(format!("function '{}.{}'", self.name, function)))?;
        let handler = self
            .handlers
            .get(function)
            .ok_or_else(|| ServiceError::Internal(format!("no handler bound for '{function}'")))?;
        let params = validate_parameters(schema, params)?;

        if !schema.require_scheduling {
            return AssertUnwindSafe(handler(params))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    warn!(service = %self.name, function, "Handler panicked");
                    Err(ServiceError::Internal(format!("handler for '{function}' panicked")))
                });
        }

        let timeout = timeout
            .or_else(|| self.timeouts.get(function).and_then(|resolve| resolve(&params)))
            .unwrap_or(self.call_timeout);
        let cancellation = CancellationToken::new();
        let fut = CALL_CANCELLATION.scope(cancellation.clone(), handler(params));
        let job_name = format!("{}.{}", self.name, function);
        let (handle, reply) = self
            .scheduler
            .submit_with_reply(&job_name, fut)
            .map_err(|e| ServiceError::Internal(e.to_string()))?;

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ServiceError::Internal(format!(
                "handler for '{function}' did not complete"
            ))),
            Err(_) => {
                self.scheduler.cancel(&handle);
                cancellation.cancel();
                warn!(service = %self.name, function, ?timeout, "Scheduled call timed out");
                Err(ServiceError::Timeout {
                    operation: function.to_string(),
                    timeout,
                })
            }
        }
    }

    pub fn emit(&self, event: &str, items: ValueMap) -> ServiceResult<EventId> {
        self.emitter.emit(event, items)
    }
}

/// Assembles a [`ServiceContract`].
pub struct ServiceContractBuilder {
    name: String,
    scheduler: Arc<Scheduler>,
    functions: Vec<FunctionSchema>,
    handlers: HashMap<String, Handler>,
    timeouts: HashMap<String, TimeoutResolver>,
    events: Vec<EventSchema>,
    emitter: Option<Arc<EventEmitter>>,
    call_timeout: Duration,
    event_buffer: usize,
    event_history: usize,
}

impl ServiceContractBuilder {
    /// Bind `handler` to `schema`. A later binding with the same name replaces
    /// the earlier one.
    pub fn function(mut self, schema: FunctionSchema, handler: Handler) -> Self {
        self.functions.retain(|s| s.name != schema.name);
        self.handlers.insert(schema.name.clone(), handler);
        self.functions.push(schema);
        self
    }

    pub fn event(mut self, schema: EventSchema) -> Self {
        self.events.retain(|s| s.name != schema.name);
        self.events.push(schema);
        self
    }

    /// Use an emitter created ahead of the contract, typically one that the
    /// handlers already hold. Its schemas replace any added with `event`.
    pub fn emitter(mut self, emitter: Arc<EventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Let `function` choose its own wait from its parameters.
    pub fn timeout_for<F>(mut self, function: &str, resolve: F) -> Self
    where
        F: Fn(&ValueMap) -> Option<Duration> + Send + Sync + 'static,
    {
        self.timeouts.insert(function.to_string(), Arc::new(resolve));
        self
    }

    pub fn event_buffer(mut self, buffer: usize, history: usize) -> Self {
        self.event_buffer = buffer;
        self.event_history = history;
        self
    }

    pub fn build(self) -> ServiceContract {
        let emitter = match self.emitter {
            Some(emitter) => emitter,
            None => Arc::new(EventEmitter::new(
                &self.name,
                self.events,
                self.scheduler.clone(),
                self.event_buffer,
                self.event_history,
            )),
        };
        ServiceContract {
            name: self.name,
            functions: self.functions,
            handlers: self.handlers,
            timeouts: self.timeouts,
            emitter,
            scheduler: self.scheduler,
            call_timeout: self.call_timeout,
        }
    }
}

/// A named set of callable functions and emittable events.
///
/// Implementors only supply [`Service::contract`]; every other method
/// delegates to it by default and may be overridden.
#[async_trait]
pub trait Service: Send + Sync {
    fn contract(&self) -> &ServiceContract;

    fn name(&self) -> &str {
        self.contract().name()
    }

    fn function_schemas(&self) -> &[FunctionSchema] {
        self.contract().function_schemas()
    }

    fn event_schemas(&self) -> &[EventSchema] {
        self.contract().event_schemas()
    }

    async fn call(&self, function: &str, params: ValueMap) -> FunctionResult {
        self.contract().call(function, params).await
    }

    async fn call_with_timeout(
        &self,
        function: &str,
        params: ValueMap,
        timeout: Duration,
    ) -> FunctionResult {
        self.contract()
            .call_with_timeout(function, params, Some(timeout))
            .await
    }

    fn emit(&self, event: &str, items: ValueMap) -> ServiceResult<EventId> {
        self.contract().emit(event, items)
    }

    fn subscribe(&self, event: &str) -> ServiceResult<Subscription> {
        self.contract().emitter.subscribe(event)
    }

    fn subscribe_all(&self) -> Subscription {
        self.contract().emitter.subscribe_all()
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.contract().emitter.unsubscribe(id)
    }

    fn event_history(&self, limit: usize) -> Vec<EventOccurrence> {
        self.contract().emitter.history(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxkit_types::config::SchedulerConfig;
    use voxkit_types::error::ErrorKind;
    use voxkit_types::schema::{ItemSchema, ParameterSchema};
    use voxkit_types::value::ValueType;

    struct Echo {
        contract: ServiceContract,
    }

    impl Service for Echo {
        fn contract(&self) -> &ServiceContract {
            &self.contract
        }
    }

    fn params(pairs: &[(&str, TypedValue)]) -> ValueMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn echo_service() -> Echo {
        let scheduler =
            Arc::new(Scheduler::start(&SchedulerConfig::with_workers(2, 5)).unwrap());
        let contract = ServiceContract::builder("Echo", scheduler)
            .function(
                FunctionSchema::new("Say", "echo the text")
                    .param(ParameterSchema::required("Text", "text", ValueType::String))
                    .param(ParameterSchema::optional("Loud", "uppercase", ValueType::Boolean, false)),
                handler(|p: ValueMap| async move {
                    let text = p["Text"].as_str().unwrap_or_default().to_string();
                    let loud = p["Loud"].as_bool().unwrap_or(false);
                    Ok(Some(TypedValue::from(if loud { text.to_uppercase() } else { text })))
                }),
            )
            .function(
                FunctionSchema::new("SlowSay", "echo on a worker")
                    .param(ParameterSchema::optional("DelayMs", "delay", ValueType::Number, 0))
                    .scheduled(),
                handler(|p: ValueMap| async move {
                    let ms = p["DelayMs"].as_number().unwrap_or(0.0) as u64;
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    let worker = std::thread::current().name().unwrap_or("").to_string();
                    Ok(Some(TypedValue::from(worker)))
                }),
            )
            .function(
                FunctionSchema::new("Explode", "panics"),
                handler(|_p: ValueMap| async move {
                    if true {
                        panic!("boom");
                    }
                    Ok(None)
                }),
            )
            .event(
                EventSchema::new("Said", "text was said")
                    .item(ItemSchema::new("Text", "text", ValueType::String)),
            )
            .event(EventSchema::new("Queued", "published from a worker").scheduled())
            .timeout_for("SlowSay", |p| {
                let ms = p.get("DelayMs")?.as_number()? as u64;
                Some(Duration::from_millis(ms + 300))
            })
            .call_timeout(Duration::from_millis(500))
            .build();
        Echo { contract }
    }

    #[tokio::test]
    async fn test_call_fills_defaults() {
        let svc = echo_service();
        let result = svc
            .call("Say", params(&[("Text", TypedValue::from("hi"))]))
            .await;
        assert!(result.success);
        assert_eq!(result.data, Some(TypedValue::from("hi")));

        let result = svc
            .call(
                "Say",
                params(&[("Text", TypedValue::from("hi")), ("Loud", TypedValue::from(true))]),
            )
            .await;
        assert_eq!(result.data, Some(TypedValue::from("HI")));
    }

    #[tokio::test]
    async fn test_call_rejects_bad_parameters() {
        let svc = echo_service();
        let missing = svc.call("Say", ValueMap::new()).await;
        assert_eq!(missing.error_kind, Some(ErrorKind::InvalidArgument));

        let mistyped = svc
            .call("Say", params(&[("Text", TypedValue::from(1))]))
            .await;
        assert_eq!(mistyped.error_kind, Some(ErrorKind::InvalidArgument));
        assert!(!mistyped.has_data());

        let unknown = svc
            .call(
                "Say",
                params(&[("Text", TypedValue::from("x")), ("Volume", TypedValue::from(3))]),
            )
            .await;
        assert_eq!(unknown.error_kind, Some(ErrorKind::InvalidArgument));

        let absent = svc.call("Shout", ValueMap::new()).await;
        assert_eq!(absent.error_kind, Some(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_scheduled_call_runs_on_worker() {
        let svc = echo_service();
        let result = svc.call("SlowSay", ValueMap::new()).await;
        assert!(result.success);
        let worker = result.data.unwrap();
        assert!(worker.as_str().unwrap().starts_with("worker-"));
    }

    #[tokio::test]
    async fn test_scheduled_call_times_out() {
        let svc = echo_service();
        let result = svc
            .call_with_timeout(
                "SlowSay",
                params(&[("DelayMs", TypedValue::from(300))]),
                Duration::from_millis(50),
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn test_resolved_timeout_outlasts_contract_default() {
        let svc = echo_service();
        let result = svc
            .call("SlowSay", params(&[("DelayMs", TypedValue::from(800))]))
            .await;
        assert!(result.success, "{:?}", result.error_message);
    }

    #[tokio::test]
    async fn test_expired_wait_cancels_running_handler() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let gave_up = Arc::new(AtomicBool::new(false));
        let seen = gave_up.clone();
        let scheduler =
            Arc::new(Scheduler::start(&SchedulerConfig::with_workers(1, 5)).unwrap());
        let contract = ServiceContract::builder("Waiter", scheduler)
            .function(
                FunctionSchema::new("Wait", "wait until the caller leaves").scheduled(),
                handler(move |_p: ValueMap| {
                    let seen = seen.clone();
                    async move {
                        let token = call_cancellation().expect("scheduled call has a token");
                        token.cancelled().await;
                        seen.store(true, Ordering::SeqCst);
                        Ok(None)
                    }
                }),
            )
            .build();

        let result = contract
            .call_with_timeout("Wait", ValueMap::new(), Some(Duration::from_millis(50)))
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while !gave_up.load(Ordering::SeqCst) && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(gave_up.load(Ordering::SeqCst));
        assert!(call_cancellation().is_none());
    }

    #[tokio::test]
    async fn test_inline_panic_becomes_internal_error() {
        let svc = echo_service();
        let result = svc.call("Explode", ValueMap::new()).await;
        assert_eq!(result.error_kind, Some(ErrorKind::Internal));
    }

    #[tokio::test]
    async fn test_emit_validates_and_delivers() {
        let svc = echo_service();
        let mut sub = svc.subscribe("Said").unwrap();

        assert!(matches!(
            svc.emit("Said", ValueMap::new()),
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            svc.emit("Said", params(&[("Text", TypedValue::from(false))])),
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            svc.emit("Sung", ValueMap::new()),
            Err(ServiceError::NotFound(_))
        ));
        assert!(sub.try_recv().is_none());

        svc.emit("Said", params(&[("Text", TypedValue::from("hello"))]))
            .unwrap();
        let got = sub.recv().await.unwrap();
        assert_eq!(got.service, "Echo");
        assert_eq!(got.item("Text"), Some(&TypedValue::from("hello")));
        assert_eq!(svc.event_history(10).len(), 1);
    }

    #[tokio::test]
    async fn test_scheduled_event_is_delivered() {
        let svc = echo_service();
        let mut sub = svc.subscribe_all();
        svc.emit("Queued", ValueMap::new()).unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.event, "Queued");
    }

    #[test]
    fn test_subscribe_unknown_event_fails() {
        let svc = echo_service();
        assert!(matches!(svc.subscribe("Nope"), Err(ServiceError::NotFound(_))));
        let sub = svc.subscribe("Said").unwrap();
        assert!(svc.unsubscribe(sub.id));
    }

    #[test]
    fn test_schema_order_is_stable() {
        let svc = echo_service();
        let names: Vec<_> = svc.function_schemas().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Say", "SlowSay", "Explode"]);
        assert_eq!(svc.event_schemas().len(), 2);
        assert_eq!(svc.name(), "Echo");
    }
}
