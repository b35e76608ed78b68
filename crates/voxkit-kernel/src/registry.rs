//! Service registry: the name-addressed dispatch surface.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use voxkit_types::error::{ServiceError, ServiceResult};
use voxkit_types::schema::{EventSchema, FunctionResult, FunctionSchema};
use voxkit_types::value::ValueMap;

use crate::event_bus::{Subscription, SubscriptionId};
use crate::service::Service;

/// Maps service names to live services.
pub struct ServiceRegistry {
    services: DashMap<String, Arc<dyn Service>>,
    accepting: AtomicBool,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
            accepting: AtomicBool::new(true),
        }
    }

    /// Register `service` under its own name, replacing any previous entry.
    pub fn register(&self, service: Arc<dyn Service>) {
        let name = service.name().to_string();
        info!(service = %name, functions = service.function_schemas().len(), "Service registered");
        self.services.insert(name, service);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services.get(name).map(|s| s.value().clone())
    }

    fn require(&self, name: &str) -> ServiceResult<Arc<dyn Service>> {
        self.get(name)
            .ok_or_else(|| ServiceError::NotFound(format!("service '{name}'")))
    }

    /// Registered service names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn function_schemas(&self, service: &str) -> ServiceResult<Vec<FunctionSchema>> {
        Ok(self.require(service)?.function_schemas().to_vec())
    }

    pub fn event_schemas(&self, service: &str) -> ServiceResult<Vec<EventSchema>> {
        Ok(self.require(service)?.event_schemas().to_vec())
    }

    /// Call `function` on `service`. Always yields a result.
    pub async fn call(&self, service: &str, function: &str, params: ValueMap) -> FunctionResult {
        match self.callable(service) {
            Ok(svc) => svc.call(function, params).await,
            Err(e) => FunctionResult::from_error(&e),
        }
    }

    pub async fn call_with_timeout(
        &self,
        service: &str,
        function: &str,
        params: ValueMap,
        timeout: Duration,
    ) -> FunctionResult {
        match self.callable(service) {
            Ok(svc) => svc.call_with_timeout(function, params, timeout).await,
            Err(e) => FunctionResult::from_error(&e),
        }
    }

    fn callable(&self, service: &str) -> ServiceResult<Arc<dyn Service>> {
        if !self.is_accepting() {
            return Err(ServiceError::invalid_state("ShuttingDown", service));
        }
        self.require(service)
    }

    pub fn subscribe(&self, service: &str, event: &str) -> ServiceResult<Subscription> {
        self.require(service)?.subscribe(event)
    }

    pub fn subscribe_all(&self, service: &str) -> ServiceResult<Subscription> {
        Ok(self.require(service)?.subscribe_all())
    }

    pub fn unsubscribe(&self, service: &str, id: SubscriptionId) -> bool {
        self.get(service).is_some_and(|s| s.unsubscribe(id))
    }

    /// Refuse all further calls. Subscriptions stay valid.
    pub fn close(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
