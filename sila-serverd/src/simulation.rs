use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};

/// Optional hooks a feature implements to follow simulation/real transitions
pub trait ModeSwitch: Send + Sync {
    /// Stop anything affecting real hardware and continue in simulation
    fn to_simulation(&self) -> anyhow::Result<()>;

    /// Verify the hardware is ready and continue in real mode
    fn to_real(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationMode {
    Simulation,
    Real,
}

impl SimulationMode {
    pub fn from_simulating(is_simulating: bool) -> Self {
        if is_simulating {
            Self::Simulation
        } else {
            Self::Real
        }
    }

    pub fn is_simulating(self) -> bool {
        self == Self::Simulation
    }
}

impl fmt::Display for SimulationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simulation => f.write_str("simulation"),
            Self::Real => f.write_str("real"),
        }
    }
}

/// Outcome of a transition fan-out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionReport {
    pub mode: SimulationMode,
    /// Modules without a mode-switch hook
    pub skipped: Vec<String>,
    /// Modules whose hook returned an error or panicked, with the message
    pub failed: Vec<(String, String)>,
}

struct Module {
    feature_id: String,
    hook: Option<Arc<dyn ModeSwitch>>,
}

/// Global simulation/real switch broadcast to every registered module.
///
/// Transitions are applied one after the other and the last one wins.
/// Reading the mode never waits for a transition; it reports the previous
/// mode until the fan-out is done.
pub struct SimulationCoordinator {
    simulating: AtomicBool,
    transition: Mutex<()>,
    modules: RwLock<Vec<Module>>,
}

impl SimulationCoordinator {
    pub fn new(initial: SimulationMode) -> Self {
        Self {
            simulating: AtomicBool::new(initial.is_simulating()),
            transition: Mutex::new(()),
            modules: RwLock::new(Vec::new()),
        }
    }

    /// Register a module to notify on transitions. Re-registering an id replaces it.
    pub fn register_module(&self, feature_id: &str, hook: Option<Arc<dyn ModeSwitch>>) {
        let mut modules = self.modules.write();
        match modules.iter_mut().find(|m| m.feature_id == feature_id) {
            Some(existing) => existing.hook = hook,
            None => modules.push(Module {
                feature_id: feature_id.to_string(),
                hook,
            }),
        }
    }

    pub fn mode(&self) -> SimulationMode {
        SimulationMode::from_simulating(self.simulating.load(Ordering::Acquire))
    }

    pub fn is_simulating(&self) -> bool {
        self.mode().is_simulating()
    }

    pub fn start_simulation_mode(&self) -> TransitionReport {
        self.transition(SimulationMode::Simulation)
    }

    pub fn start_real_mode(&self) -> TransitionReport {
        self.transition(SimulationMode::Real)
    }

    pub fn set_simulating(&self, is_simulating: bool) -> TransitionReport {
        self.transition(SimulationMode::from_simulating(is_simulating))
    }

    /// Notify every module and settle on `target`. Never rolls back.
    fn transition(&self, target: SimulationMode) -> TransitionReport {
        let _serialized = self.transition.lock();
        let mut report = TransitionReport {
            mode: target,
            skipped: Vec::new(),
            failed: Vec::new(),
        };

        tracing::info!("Switching to {} mode (was {})", target, self.mode());

        // Hooks run without the module lock so they may register modules
        let modules: Vec<(String, Option<Arc<dyn ModeSwitch>>)> = self
            .modules
            .read()
            .iter()
            .map(|m| (m.feature_id.clone(), m.hook.clone()))
            .collect();

        for (feature_id, hook) in modules {
            let Some(hook) = hook else {
                tracing::debug!("Feature {} has no mode switch hook, skipping", feature_id);
                report.skipped.push(feature_id);
                continue;
            };

            let result = panic::catch_unwind(AssertUnwindSafe(|| match target {
                SimulationMode::Simulation => hook.to_simulation(),
                SimulationMode::Real => hook.to_real(),
            }));

            let message = match result {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{:#}", e),
                Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
            };

            tracing::error!(
                "Feature {} failed to switch to {} mode: {}",
                feature_id,
                target,
                message
            );
            report.failed.push((feature_id, message));
        }

        self.simulating.store(target.is_simulating(), Ordering::Release);
        report
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
