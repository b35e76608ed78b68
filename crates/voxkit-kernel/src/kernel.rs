//! Kernel: assembles the scheduler, services and registry into one context.

use std::sync::Arc;
use tracing::{info, warn};
use voxkit_types::config::RuntimeConfig;
use voxkit_types::scheduler::SchedulerHealth;

use crate::agent_manager::{AgentManager, SystemClock, TimeSource};
use crate::error::{KernelError, KernelResult};
use crate::registry::ServiceRegistry;
use crate::scheduler::Scheduler;

/// The runtime context. Owns everything it starts; nothing lives in statics.
pub struct Kernel {
    config: RuntimeConfig,
    scheduler: Arc<Scheduler>,
    registry: Arc<ServiceRegistry>,
    agent_manager: Arc<AgentManager>,
}

impl Kernel {
    /// Boot with the system clock as time source.
    pub fn boot(config: RuntimeConfig) -> KernelResult<Self> {
        Self::boot_with_time_source(config, Arc::new(SystemClock))
    }

    pub fn boot_with_time_source(
        config: RuntimeConfig,
        time_source: Arc<dyn TimeSource>,
    ) -> KernelResult<Self> {
        config.validate()?;

        let scheduler = Arc::new(Scheduler::start(&config.scheduler)?);
        let agent_manager = Arc::new(AgentManager::with_time_source(
            scheduler.clone(),
            &config.agent_manager,
            time_source,
        ));

        let registry = Arc::new(ServiceRegistry::new());
        registry.register(agent_manager.clone());
        if registry.get(crate::agent_manager::SERVICE_NAME).is_none() {
            return Err(KernelError::BootFailed(
                "agent manager did not register".to_string(),
            ));
        }

        info!(
            workers = scheduler.worker_names().len(),
            services = registry.names().len(),
            "Kernel booted"
        );
        Ok(Self {
            config,
            scheduler,
            registry,
            agent_manager,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<ServiceRegistry> {
        self.registry.clone()
    }

    pub fn agent_manager(&self) -> Arc<AgentManager> {
        self.agent_manager.clone()
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        self.scheduler.clone()
    }

    pub fn health(&self) -> SchedulerHealth {
        self.scheduler.health()
    }

    /// Refuse new calls, stop the running agent, then drain and join the
    /// workers.
    pub async fn shutdown(&self) {
        info!("Kernel shutting down");
        self.registry.close();
        self.agent_manager.shutdown().await;

        let scheduler = self.scheduler.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || scheduler.stop()).await {
            warn!(error = %e, "Scheduler stop task failed");
        }
        info!("Kernel stopped");
    }
}
