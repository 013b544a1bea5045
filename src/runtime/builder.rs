use std::sync::Arc;
use std::time::Duration;

use super::runtime::Runtime;
use crate::config::Config;
use crate::kernel::Restarter;
use crate::playbooks::{Action, Playbook};
use crate::scheduler::{HandlerRef, MaintenanceSchedule};
use crate::triggers::Trigger;

/// Builder for [`Runtime`].
///
/// Everything added here is registered on the components during
/// [`build`](RuntimeBuilder::build), after the statically configured items.
pub struct RuntimeBuilder {
    cfg: Config,
    handlers: Vec<HandlerRef>,
    maintenance: Vec<MaintenanceSchedule>,
    triggers: Vec<Trigger>,
    playbooks: Vec<Playbook>,
    actions: Vec<Arc<dyn Action>>,
    restarter: Option<Arc<dyn Restarter>>,
    components: Vec<(String, Duration, bool)>,

    #[cfg(feature = "logging")]
    log_writer: bool,
}

impl RuntimeBuilder {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            handlers: Vec::new(),
            maintenance: Vec::new(),
            triggers: Vec::new(),
            playbooks: Vec::new(),
            actions: Vec::new(),
            restarter: None,
            components: Vec::new(),

            #[cfg(feature = "logging")]
            log_writer: false,
        }
    }

    /// Registers an in-process task handler on the scheduler.
    pub fn with_handler(mut self, handler: HandlerRef) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_maintenance(mut self, schedule: MaintenanceSchedule) -> Self {
        self.maintenance.push(schedule);
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn with_playbook(mut self, playbook: Playbook) -> Self {
        self.playbooks.push(playbook);
        self
    }

    /// Replaces the default (announce-only) body of one action kind.
    pub fn with_action<A: Action>(mut self, action: A) -> Self {
        self.actions.push(Arc::new(action));
        self
    }

    pub fn with_restarter<R: Restarter>(mut self, restarter: R) -> Self {
        self.restarter = Some(Arc::new(restarter));
        self
    }

    /// Supervises `component` with the given heartbeat timeout.
    pub fn with_component(mut self, component: impl Into<String>, timeout: Duration, critical: bool) -> Self {
        self.components.push((component.into(), timeout, critical));
        self
    }

    /// Logs all bus traffic through `tracing`.
    ///
    /// Requires the `logging` feature flag.
    #[cfg(feature = "logging")]
    pub fn with_log_writer(mut self) -> Self {
        self.log_writer = true;
        self
    }

    /// Wires bus, scheduler, triggers, dispatcher and kernel supervisor.
    ///
    /// Nothing is spawned until [`Runtime::start`].
    pub fn build(self) -> Runtime {
        #[allow(unused_mut)]
        let mut rt = Runtime::new_internal(self.cfg);
        #[cfg(feature = "logging")]
        if self.log_writer {
            rt.log_writer = Some(crate::observers::LogWriter::new());
        }

        for handler in self.handlers {
            rt.scheduler().register_handler(handler);
        }
        for schedule in self.maintenance {
            rt.scheduler().add_maintenance(schedule);
        }
        for trigger in self.triggers {
            rt.triggers().register(trigger);
        }
        for playbook in self.playbooks {
            rt.dispatcher().register_playbook(playbook);
        }
        for action in self.actions {
            rt.dispatcher().register_action_arc(action);
        }
        if let Some(restarter) = self.restarter {
            rt.kernel().set_restarter_arc(restarter);
        }
        for (component, timeout, critical) in self.components {
            rt.kernel().register(component, timeout, critical);
        }
        rt
    }
}
