//! # Lifecycle
//!
//! Wires an [`Engine`] to the host's enable and disable hooks.

use std::sync::Arc;

use tracing::debug;

use crate::config::InstrumentationConfig;
use crate::engine::{Engine, RevertReport};
use crate::gate::{self, Readiness};
use crate::hook::HookHost;

/// An engine driven by the host's enable and disable hooks
pub struct Instrumentation<H: HookHost + 'static> {
    /// Shared with the ready callback
    engine: Arc<Engine<H>>,
}

impl<H: HookHost + 'static> Instrumentation<H> {
    /// Creates the instrumentation for `config` on `host`. Nothing is applied until
    /// [`Instrumentation::on_enabled`].
    pub fn new(host: Arc<H>, config: InstrumentationConfig) -> Self {
        Self {
            engine: Arc::new(Engine::new(host, config)),
        }
    }

    /// The engine
    pub fn engine(&self) -> &Engine<H> {
        &self.engine
    }

    /// Applies the rewrites as soon as the instrumentation subsystem is ready
    pub fn on_enabled(&self) -> Readiness {
        let engine = Arc::clone(&self.engine);
        gate::on_ready(&**self.engine.host(), move || {
            engine.apply();
        })
    }

    /// Reverts the rewrites. Hosts without an instrumentation subsystem never had any applied.
    pub fn on_disabled(&self) -> Option<RevertReport> {
        if !self.engine.host().is_installed() {
            debug!("no instrumentation subsystem, nothing to revert");
            return None;
        }
        self.engine.revert()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineState;
    use crate::runtime::testing::City;
    use crate::runtime::Value;

    /// A listed parking lot name
    const LOT: &str = "3563113487.AMPL Pavement Normal_Data";

    #[test]
    fn test_enable_when_ready() {
        let city = City::load_ready();
        let instrumentation =
            Instrumentation::new(Arc::clone(&city.runtime), InstrumentationConfig::parking_lots());
        assert_eq!(instrumentation.on_enabled(), Readiness::Immediate);
        assert_eq!(instrumentation.engine().state(), EngineState::Patched);

        let lot = city.building(LOT, 3);
        assert_eq!(
            city.runtime.invoke(city.check_build_position, &[lot.clone()]).unwrap(),
            Value::Int(0)
        );

        let report = instrumentation.on_disabled().unwrap();
        assert_eq!(report.reverted.len(), 3);
        assert_eq!(
            city.runtime.invoke(city.check_build_position, &[lot]).unwrap(),
            Value::Int(3)
        );
    }

    #[test]
    /// Enabling before the subsystem is up waits for the ready signal, and a repeated signal or a
    /// second enable doesn't apply twice
    fn test_enable_deferred() {
        let city = City::load();
        let instrumentation =
            Instrumentation::new(Arc::clone(&city.runtime), InstrumentationConfig::parking_lots());
        assert_eq!(instrumentation.on_enabled(), Readiness::Deferred);
        assert_eq!(instrumentation.engine().state(), EngineState::Unpatched);

        city.runtime.signal_ready();
        assert_eq!(instrumentation.engine().state(), EngineState::Patched);
        assert_eq!(instrumentation.engine().installed().len(), 3);

        city.runtime.signal_ready();
        assert_eq!(instrumentation.on_enabled(), Readiness::Immediate);
        assert_eq!(instrumentation.engine().installed().len(), 3);
    }

    #[test]
    fn test_without_subsystem() {
        let city = City::load_without_hooks();
        let before = city.runtime.read_code(city.simulation_step).unwrap();
        let instrumentation =
            Instrumentation::new(Arc::clone(&city.runtime), InstrumentationConfig::parking_lots());
        assert_eq!(instrumentation.on_enabled(), Readiness::Unavailable);
        assert_eq!(instrumentation.engine().state(), EngineState::Unpatched);
        assert!(instrumentation.on_disabled().is_none());
        assert_eq!(city.runtime.read_code(city.simulation_step).unwrap(), before);
    }

    #[test]
    fn test_disable_before_enable() {
        let city = City::load_ready();
        let instrumentation =
            Instrumentation::new(Arc::clone(&city.runtime), InstrumentationConfig::parking_lots());
        assert!(instrumentation.on_disabled().is_none());
    }
}
