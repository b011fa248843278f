//! Client churn and simulation pool behaviour

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use client_proxy::{ClientProxy, InProcessTransport, SimulationPool};
use common::{connect, init_tracing, parameters, BusyClient, ConstantClient};
use coordinator::{ClientConnections, RoundDriver};
use fed_core::{
    ClientId, ClientState, Failure, FitInstruction, JobConfig, Properties, SamplingPolicy,
};
use strategy::{FedAvg, FedAvgConfig};

fn strategy(min_clients: usize, min_available: usize) -> Arc<FedAvg> {
    let policy = SamplingPolicy::new(min_clients, 1.0, min_available);
    Arc::new(FedAvg::with_seed(
        FedAvgConfig {
            fit: policy,
            evaluate: policy,
            ..FedAvgConfig::default()
        },
        17,
    ))
}

fn job(num_rounds: u64) -> JobConfig {
    JobConfig {
        num_rounds,
        round_timeout: Duration::from_secs(5),
        seed: Some(3),
        ..JobConfig::default()
    }
}

#[tokio::test]
async fn test_dropped_client_leaves_and_rejoins() -> Result<()> {
    init_tracing();
    let connections = Arc::new(ClientConnections::new(100));
    let pool = SimulationPool::new(4);
    connect(&connections, &pool, "a", ConstantClient::new(vec![1.0], 1), Duration::ZERO);
    connect(&connections, &pool, "b", ConstantClient::new(vec![1.0], 1), Duration::ZERO);
    let flaky = connect(&connections, &pool, "c", ConstantClient::new(vec![1.0], 1), Duration::ZERO);
    flaky.set_online(false);

    let driver = RoundDriver::new(job(3), strategy(2, 2), Arc::clone(&connections));
    let report = driver.run(Some(parameters(vec![0.0]))).await?;
    assert!(report.is_completed());

    let outcomes = report.history.outcomes();
    assert_eq!(
        outcomes[0].failures.get(&ClientId::new("c")),
        Some(&Failure::Disconnected)
    );
    assert_eq!(outcomes[0].num_results, 2);
    assert!(outcomes[1].failures.is_empty());
    assert!(outcomes[2].failures.is_empty());

    let record = connections.registry().get(&ClientId::new("c")).expect("record kept");
    assert_eq!(record.state, ClientState::Disconnected);
    assert_eq!(connections.num_available(), 2);

    // the client comes back with a fresh connection
    flaky.set_online(true);
    connections.connect(
        Arc::new(flaky.clone().into_proxy(ClientId::new("c"))),
        Properties::new(),
    )?;
    assert_eq!(connections.num_available(), 3);

    let driver = RoundDriver::new(job(1), strategy(3, 3), connections);
    let report = driver.run(Some(parameters(vec![0.0]))).await?;
    assert!(report.is_completed());
    assert_eq!(report.history.outcomes()[0].num_results, 3);
    Ok(())
}

#[tokio::test]
async fn test_departed_client_is_not_sampled() -> Result<()> {
    init_tracing();
    let connections = Arc::new(ClientConnections::new(100));
    let pool = SimulationPool::new(4);
    for id in ["a", "b", "c"] {
        connect(&connections, &pool, id, ConstantClient::new(vec![1.0], 1), Duration::ZERO);
    }
    connections.disconnect(&ClientId::new("b"))?;

    let driver = RoundDriver::new(job(2), strategy(2, 2), connections);
    let report = driver.run(Some(parameters(vec![0.0]))).await?;
    for outcome in report.history.iter() {
        assert_eq!(outcome.num_results, 2);
        assert!(outcome.failures.is_empty());
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_bounds_concurrent_clients() -> Result<()> {
    init_tracing();
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let pool = SimulationPool::new(2);
    let connections = Arc::new(ClientConnections::new(100));

    for i in 0..6 {
        let client = BusyClient {
            work: Duration::from_millis(50),
            running: Arc::clone(&running),
            peak: Arc::clone(&peak),
        };
        connect(&connections, &pool, &format!("busy-{}", i), client, Duration::ZERO);
    }

    let driver = RoundDriver::new(job(1), strategy(6, 6), connections);
    let report = driver.run(Some(parameters(vec![0.0]))).await?;

    assert_eq!(report.history.outcomes()[0].num_results, 6);
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(peak.load(Ordering::SeqCst) >= 1);
    assert_eq!(pool.idle(), 2);
    Ok(())
}

#[tokio::test]
async fn test_shutdown_pool_disconnects_clients() -> Result<()> {
    init_tracing();
    let pool = SimulationPool::new(1);
    let transport = InProcessTransport::new(Arc::new(ConstantClient::new(vec![1.0], 1)), pool.clone());
    let proxy = transport.into_proxy(ClientId::new("a"));

    pool.shutdown();
    let result = proxy
        .fit(FitInstruction {
            parameters: parameters(vec![0.0]),
            config: Default::default(),
        })
        .await;
    assert_eq!(result.unwrap_err(), fed_core::TransportError::Disconnected);
    Ok(())
}
