//! Integration tests for the poller, sessions and snapshot store together.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::sync::Arc;

use opcbridge_core::{BridgeConfig, ConnectionTarget, EndpointKey, EndpointValues, VariableValue};
use opcbridge_protocol::{MemoryConnector, MemoryServer, NodeValue};
use opcbridged::poller::{spawn_poller, Poller};
use opcbridged::session::SessionState;
use opcbridged::simulate::Simulator;
use opcbridged::state::BridgeState;
use tokio_util::sync::CancellationToken;

const CONFIG: &str = r#"
[poller]
interval_ms = 2000

[[endpoints]]
key = "Server_4840"
target = "sim://localhost:4840/freeopcua/server/"

[[endpoints]]
key = "Server_4841"
target = "sim://localhost:4841/newserver/opcua/"
"#;

fn key(k: &str) -> EndpointKey {
    EndpointKey::from(k)
}

fn target(raw: &str) -> ConnectionTarget {
    ConnectionTarget::parse(raw).unwrap()
}

fn value(state: &BridgeState, endpoint: &str, name: &str) -> VariableValue {
    *state
        .snapshot
        .get(&key(endpoint))
        .unwrap()
        .get(name)
        .unwrap()
}

fn setup() -> (BridgeConfig, BridgeState, MemoryConnector) {
    let config = BridgeConfig::from_toml_str(CONFIG).unwrap();
    let state = BridgeState::from_config(&config).unwrap();
    (config, state, MemoryConnector::new())
}

#[tokio::test]
async fn test_round_trip_through_poller() {
    let (config, state, memory) = setup();
    memory.register(
        &target("sim://localhost:4840/freeopcua/server/"),
        MemoryServer::factory(&[("Sensor1_Temperature", 21.567)], &[("Uptime", 42)]),
    );

    let mut poller = Poller::from_config(&config, Arc::new(memory), state.clone()).unwrap();
    poller.tick().await;

    assert_eq!(
        value(&state, "Server_4840", "Sensor1_Temperature"),
        VariableValue::Float(21.57)
    );
    assert_eq!(value(&state, "Server_4840", "Uptime"), VariableValue::Integer(42));
    assert_eq!(
        value(&state, "Server_4840", "Sensor2_Temperature"),
        VariableValue::ZERO
    );
    assert_eq!(
        value(&state, "Server_4840", "TotalProduction"),
        VariableValue::ZERO
    );

    // Nothing listens on 4841
    assert!(state
        .snapshot
        .get(&key("Server_4841"))
        .unwrap()
        .values()
        .all(VariableValue::is_zero));
}

#[tokio::test]
async fn test_server_restart_recovers_on_next_tick() {
    let (config, state, memory) = setup();
    let server = MemoryServer::factory(
        &[("Sensor1_Temperature", 20.0), ("Sensor2_Temperature", 21.0)],
        &[("Uptime", 1), ("TotalProduction", 500)],
    );
    memory.register(&target("sim://localhost:4840/freeopcua/server/"), server.clone());

    let mut poller = Poller::from_config(&config, Arc::new(memory), state.clone()).unwrap();
    poller.tick().await;
    assert_eq!(value(&state, "Server_4840", "Uptime"), VariableValue::Integer(1));

    // Server goes down: the read fails, the entry is zeroed
    server.drop_connections();
    server.set_reachable(false);
    poller.tick().await;
    assert_eq!(value(&state, "Server_4840", "Uptime"), VariableValue::ZERO);
    assert_eq!(poller.sessions()[0].state(), SessionState::Disconnected);

    // Still down: connect fails, entry stays zero
    poller.tick().await;
    assert_eq!(value(&state, "Server_4840", "Uptime"), VariableValue::ZERO);

    // Back up with new values
    server.set_reachable(true);
    server.set_value_by_name("Uptime", NodeValue::Int(2));
    poller.tick().await;
    assert_eq!(value(&state, "Server_4840", "Uptime"), VariableValue::Integer(2));
    assert_eq!(poller.sessions()[0].state(), SessionState::Connected);

    let status = state.status.get(&key("Server_4840")).unwrap();
    assert!(status.connected);
    assert_eq!(status.consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_simulated_lines_advance_between_polls() {
    let (config, state, memory) = setup();
    let mut simulator = Simulator::from_config(&config, &memory).unwrap();
    let mut poller = Poller::from_config(&config, Arc::new(memory), state.clone()).unwrap();

    poller.tick().await;
    assert_eq!(value(&state, "Server_4841", "Uptime"), VariableValue::Integer(0));
    assert_eq!(
        value(&state, "Server_4841", "TotalProduction"),
        VariableValue::Integer(500)
    );

    simulator.step();
    simulator.step();
    poller.tick().await;
    assert_eq!(value(&state, "Server_4841", "Uptime"), VariableValue::Integer(2));
    assert_eq!(
        value(&state, "Server_4841", "TotalProduction"),
        VariableValue::Integer(510)
    );
    match value(&state, "Server_4840", "Sensor1_Temperature") {
        VariableValue::Float(t) => assert!((28.0..=32.0).contains(&t)),
        other => panic!("temperature should be a float, got {other:?}"),
    }
}

/// Every entry a reader sees is all zero or one publisher's generation.
fn assert_whole(entry: &EndpointValues) {
    let first = entry.values().next().map(VariableValue::as_f64).unwrap();
    assert!(
        entry.values().all(|v| v.as_f64() == first),
        "torn entry: {entry:?}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_see_whole_entries_while_polling() {
    let config = BridgeConfig::from_toml_str(
        r#"
        [poller]
        interval_ms = 1

        [[endpoints]]
        key = "Server_4840"
        target = "sim://localhost:4840/freeopcua/server/"
        "#,
    )
    .unwrap();
    let state = BridgeState::from_config(&config).unwrap();
    let memory = MemoryConnector::new();
    let server = MemoryServer::factory(
        &[("Sensor1_Temperature", 0.0), ("Sensor2_Temperature", 0.0)],
        &[("Uptime", 0), ("TotalProduction", 0)],
    );
    memory.register(&target("sim://localhost:4840/freeopcua/server/"), server);

    let cancel = CancellationToken::new();
    let poller = Poller::from_config(&config, Arc::new(memory), state.clone()).unwrap();
    let handle = spawn_poller(poller, cancel.clone());

    // A second publisher races the poller with whole entries of one
    // generation. Each server variable is read separately, so generations
    // are driven through the store rather than through the server.
    let writer = {
        let state = state.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut generation = 0i64;
            while !cancel.is_cancelled() {
                generation += 1;
                let temperature = VariableValue::Float(generation as f64);
                let mut values = EndpointValues::new();
                values.insert("Sensor1_Temperature".into(), temperature);
                values.insert("Sensor2_Temperature".into(), temperature);
                values.insert("Uptime".into(), VariableValue::Integer(generation));
                values.insert("TotalProduction".into(), VariableValue::Integer(generation));
                state.snapshot.replace(&key("Server_4840"), &values).unwrap();
                tokio::task::yield_now().await;
            }
            generation
        })
    };

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let state = state.clone();
            tokio::spawn(async move {
                for _ in 0..2000 {
                    let snapshot = state.snapshot.read_all();
                    let entry = &snapshot[&key("Server_4840")];
                    assert_eq!(entry.len(), 4);
                    assert_whole(entry);
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for reader in readers {
        reader.await.unwrap();
    }

    cancel.cancel();
    let generations = writer.await.unwrap();
    assert!(generations > 0);
    handle.await.unwrap();
}
