//! In-process simulated production lines for `sim://` targets.
//!
//! Each simulated endpoint gets its own [`MemoryServer`] laid out like a
//! real line server: the container object with the configured groups,
//! temperature sensors in the first group and counters in the last. A
//! background task updates the values on a fixed period:
//! - counters named like `*Production*` start at 500 and grow by 5
//! - other counters (uptime) start at 0 and grow by 1
//! - sensors drift around a per-sensor base temperature
//!
//! The drift is a deterministic function of the step number, so runs are
//! reproducible.

use std::time::Duration;

use opcbridge_core::{BridgeConfig, ConfigResult, EndpointKey, LayoutConfig, VariableSet};
use opcbridge_protocol::{MemoryConnector, MemoryServer, NodeHandle, NodeValue};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::connector::SIM_SCHEME;

/// Base temperature of the first sensor; later sensors are 5 degrees warmer each.
const BASE_TEMPERATURE: f64 = 30.0;
const SENSOR_SPACING: f64 = 5.0;
const DRIFT_AMPLITUDE: f64 = 1.5;

const PRODUCTION_MARKER: &str = "Production";
const PRODUCTION_START: i64 = 500;
const PRODUCTION_STEP: i64 = 5;

#[derive(Debug, Clone)]
struct Sensor {
    node: NodeHandle,
    base: f64,
}

#[derive(Debug, Clone)]
struct Counter {
    node: NodeHandle,
    value: i64,
    step: i64,
}

/// One simulated line server.
#[derive(Debug, Clone)]
pub struct SimulatedLine {
    key: EndpointKey,
    server: MemoryServer,
    sensors: Vec<Sensor>,
    counters: Vec<Counter>,
    steps: u64,
}

impl SimulatedLine {
    /// Builds the address space for `expected` under `layout`.
    ///
    /// Names containing `sensor_marker` become writable float sensors, the
    /// rest integer counters.
    pub fn new(
        key: EndpointKey,
        layout: &LayoutConfig,
        expected: &VariableSet,
        sensor_marker: &str,
    ) -> Self {
        let server = MemoryServer::new();
        let container = server.add_object(&server.objects(), &layout.container);
        let groups: Vec<NodeHandle> = layout
            .groups
            .iter()
            .map(|name| server.add_object(&container, name))
            .collect();
        let sensor_group = groups.first().cloned().unwrap_or_else(|| container.clone());
        let counter_group = groups.last().cloned().unwrap_or_else(|| container.clone());

        let mut sensors = Vec::new();
        let mut counters = Vec::new();
        for name in expected.iter() {
            if name.as_str().contains(sensor_marker) {
                let base = BASE_TEMPERATURE + SENSOR_SPACING * sensors.len() as f64;
                let node = server.add_variable(&sensor_group, name.as_str(), NodeValue::Float(base));
                server.set_writable(&node, true);
                sensors.push(Sensor { node, base });
            } else {
                let (value, step) = if name.as_str().contains(PRODUCTION_MARKER) {
                    (PRODUCTION_START, PRODUCTION_STEP)
                } else {
                    (0, 1)
                };
                let node = server.add_variable(&counter_group, name.as_str(), NodeValue::Int(value));
                counters.push(Counter { node, value, step });
            }
        }

        Self {
            key,
            server,
            sensors,
            counters,
            steps: 0,
        }
    }

    pub fn key(&self) -> &EndpointKey {
        &self.key
    }

    /// Handle to the simulated server, for fault injection.
    pub fn server(&self) -> &MemoryServer {
        &self.server
    }

    /// Advances the simulation by one update.
    pub fn step(&mut self) {
        self.steps += 1;
        let t = self.steps as f64;

        for (idx, sensor) in self.sensors.iter().enumerate() {
            let drift = DRIFT_AMPLITUDE * (t * 0.7 + idx as f64).sin();
            let value = ((sensor.base + drift) * 100.0).round() / 100.0;
            self.server.set_value(&sensor.node, NodeValue::Float(value));
        }

        for counter in &mut self.counters {
            counter.value = counter.value.saturating_add(counter.step);
            self.server
                .set_value(&counter.node, NodeValue::Int(counter.value));
        }
    }
}

/// The set of simulated lines of one bridge.
#[derive(Debug, Clone, Default)]
pub struct Simulator {
    lines: Vec<SimulatedLine>,
}

impl Simulator {
    /// Creates a line for every `sim://` endpoint and registers it with
    /// `memory`. Other endpoints are left alone.
    pub fn from_config(config: &BridgeConfig, memory: &MemoryConnector) -> ConfigResult<Self> {
        let expected = config.variable_set()?;
        let lines = config
            .registry()?
            .iter()
            .filter(|e| e.target.scheme() == SIM_SCHEME)
            .map(|e| {
                let line = SimulatedLine::new(
                    e.key.clone(),
                    &config.layout,
                    &expected,
                    &config.variables.round_marker,
                );
                memory.register(&e.target, line.server().clone());
                debug!(endpoint = %e.key, target = %e.target, "Simulated line registered");
                line
            })
            .collect();

        Ok(Self { lines })
    }

    pub fn lines(&self) -> &[SimulatedLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Advances every line by one update.
    pub fn step(&mut self) {
        for line in &mut self.lines {
            line.step();
        }
    }
}

/// Spawns the task that updates every simulated line each `period`.
pub fn spawn_simulator(
    mut simulator: Simulator,
    period: Duration,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(lines = simulator.lines().len(), "Simulator started");

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("Simulator shutting down");
                    break;
                }

                _ = ticker.tick() => {
                    simulator.step();
                }
            }
        }

        debug!("Simulator task completed");
    })
}
