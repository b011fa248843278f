//! Round driver scenarios against in-process simulated clients
//!
//! Each test builds a job the way the coordinator binary does: a client
//! directory filled with in-process transports, a strategy and a round
//! driver. Deadlines are real but short.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use client_proxy::SimulationPool;
use common::{connect, init_tracing, parameters, BrokenClient, ConstantClient, TargetClient};
use coordinator::{ClientConnections, CoordinatorConfig, JobStatus, RoundDriver};
use fed_core::{
    AggregationError, ClientId, ClientRecord, Error, Failure, FailurePolicy, JobConfig,
    Properties, Round, RoundKind, RoundSchedule, SamplingPolicy,
};
use strategy::{FedAvg, FedAvgConfig, Strategy};

fn fedavg_config(min_clients: usize, fraction: f64, min_available: usize) -> FedAvgConfig {
    let policy = SamplingPolicy::new(min_clients, fraction, min_available);
    FedAvgConfig {
        fit: policy,
        evaluate: policy,
        ..FedAvgConfig::default()
    }
}

fn job(num_rounds: u64, round_timeout: Duration) -> JobConfig {
    JobConfig {
        num_rounds,
        round_timeout,
        seed: Some(11),
        ..JobConfig::default()
    }
}

#[tokio::test]
async fn test_slow_client_times_out() -> Result<()> {
    init_tracing();
    let ids = ["client-0", "client-1", "client-2", "client-3"];
    let config = fedavg_config(2, 0.5, 2);

    // Same seed, same first draw: learn which two clients round 1 selects
    let records: Vec<ClientRecord> = ids
        .iter()
        .map(|id| ClientRecord::new(ClientId::new(*id), Properties::new()))
        .collect();
    let probe = FedAvg::with_seed(config.clone(), 5);
    let selected: Vec<ClientId> = probe
        .configure_fit(1, &parameters(vec![0.0]), &records)?
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(selected.len(), 2);
    let (slow, fast) = (&selected[0], &selected[1]);

    let connections = Arc::new(ClientConnections::new(100));
    let pool = SimulationPool::new(4);
    for id in ids {
        let latency = if id == slow.as_str() {
            Duration::from_secs(30)
        } else {
            Duration::ZERO
        };
        connect(
            &connections,
            &pool,
            id,
            ConstantClient::new(vec![7.0], 10),
            latency,
        );
    }

    let driver = RoundDriver::new(
        job(1, Duration::from_millis(300)),
        Arc::new(FedAvg::with_seed(config, 5)),
        connections,
    );

    let started = std::time::Instant::now();
    let report = driver.run(Some(parameters(vec![0.0]))).await?;
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(report.is_completed());

    let outcome = &report.history.outcomes()[0];
    assert!(outcome.is_completed());
    assert_eq!(outcome.num_results, 1);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures.get(slow), Some(&Failure::Timeout));
    assert!(!outcome.failures.contains_key(fast));
    assert_eq!(outcome.failed_clients(), BTreeSet::from([slow.clone()]));
    assert_eq!(outcome.metrics["examples"].as_f64(), Some(10.0));
    assert_eq!(report.parameters, parameters(vec![7.0]));
    Ok(())
}

#[tokio::test]
async fn test_ten_round_job() -> Result<()> {
    init_tracing();
    let connections = Arc::new(ClientConnections::new(100));
    let pool = SimulationPool::new(4);
    for i in 0..6 {
        let client = TargetClient {
            target: vec![1.0, -1.0, 0.5],
            num_examples: 10 + i,
        };
        connect(&connections, &pool, &format!("client-{}", i), client, Duration::ZERO);
    }

    let driver = RoundDriver::new(
        JobConfig {
            schedule: RoundSchedule::Explicit {
                evaluate_rounds: BTreeSet::from([5, 10]),
            },
            ..job(10, Duration::from_secs(5))
        },
        Arc::new(FedAvg::with_seed(fedavg_config(3, 0.5, 3), 3)),
        connections,
    );

    let report = driver.run(None).await?;
    assert!(report.is_completed());

    let rounds: Vec<Round> = report.history.iter().map(|o| o.round).collect();
    assert_eq!(rounds, (1..=10).collect::<Vec<_>>());
    assert!(report.history.iter().all(|o| o.is_completed()));
    assert_eq!(report.history.get(5).map(|o| o.kind), Some(RoundKind::Evaluate));

    // Every fit halves the distance to the shared target
    let losses = report.history.losses();
    assert_eq!(losses.len(), 2);
    assert!(losses[1].1 < losses[0].1);
    let values = report.parameters.tensors()[0].values();
    assert!((values[0] - 1.0).abs() < 0.01);
    Ok(())
}

#[tokio::test]
async fn test_client_error_is_recorded() -> Result<()> {
    init_tracing();
    let connections = Arc::new(ClientConnections::new(100));
    let pool = SimulationPool::new(4);
    connect(&connections, &pool, "good", ConstantClient::new(vec![2.0], 5), Duration::ZERO);
    connect(&connections, &pool, "broken", BrokenClient, Duration::ZERO);

    let driver = RoundDriver::new(
        job(2, Duration::from_secs(5)),
        Arc::new(FedAvg::with_seed(fedavg_config(2, 1.0, 2), 1)),
        connections,
    );

    let report = driver.run(Some(parameters(vec![0.0]))).await?;
    assert!(report.is_completed());
    for outcome in report.history.iter() {
        match outcome.failures.get(&ClientId::new("broken")) {
            Some(Failure::ClientError { reason }) => assert!(reason.contains("out of memory")),
            other => panic!("unexpected failure: {:?}", other),
        }
    }
    assert_eq!(report.parameters, parameters(vec![2.0]));
    Ok(())
}

#[tokio::test]
async fn test_aggregation_error_policies() -> Result<()> {
    init_tracing();
    let build = |policy: FailurePolicy| {
        let connections = Arc::new(ClientConnections::new(100));
        let pool = SimulationPool::new(2);
        connect(&connections, &pool, "a", ConstantClient::new(vec![1.0], 5), Duration::ZERO);
        connect(&connections, &pool, "b", ConstantClient::new(vec![1.0, 2.0], 5), Duration::ZERO);
        RoundDriver::new(
            JobConfig {
                on_aggregation_error: policy,
                ..job(3, Duration::from_secs(5))
            },
            Arc::new(FedAvg::with_seed(fedavg_config(2, 1.0, 2), 1)),
            connections,
        )
    };

    let report = build(FailurePolicy::Halt)
        .run(Some(parameters(vec![0.0])))
        .await?;
    match report.status {
        JobStatus::Aborted { round, error, .. } => {
            assert_eq!(round, 1);
            assert!(matches!(
                error,
                Error::Aggregation(AggregationError::ShapeMismatch { .. })
            ));
        }
        JobStatus::Completed => panic!("mismatched shapes must abort the job"),
    }
    assert!(report.history.is_empty());

    let report = build(FailurePolicy::Skip)
        .run(Some(parameters(vec![0.0])))
        .await?;
    assert!(report.is_completed());
    assert_eq!(report.history.len(), 3);
    assert_eq!(report.history.failed_rounds(), 3);
    assert_eq!(report.parameters, parameters(vec![0.0]));
    Ok(())
}

#[tokio::test]
async fn test_insufficient_clients_reported() -> Result<()> {
    init_tracing();
    let connections = Arc::new(ClientConnections::new(100));
    let pool = SimulationPool::new(2);
    for i in 0..3 {
        connect(
            &connections,
            &pool,
            &format!("client-{}", i),
            ConstantClient::new(vec![1.0], 1),
            Duration::ZERO,
        );
    }

    let driver = RoundDriver::new(
        JobConfig {
            on_sampling_error: FailurePolicy::Halt,
            ..job(1, Duration::from_secs(1))
        },
        Arc::new(FedAvg::with_seed(fedavg_config(2, 1.0, 5), 1)),
        connections,
    );

    let report = driver.run(Some(parameters(vec![0.0]))).await?;
    assert!(matches!(
        report.status,
        JobStatus::Aborted {
            round: 1,
            error: Error::InsufficientClients {
                available: 3,
                required: 5
            },
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn test_job_from_config_file() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("job.json");
    std::fs::write(
        &path,
        r#"{
            "job": {
                "num_rounds": 4,
                "round_timeout": 2000,
                "seed": 99,
                "schedule": { "EvaluateEvery": { "interval": 2 } }
            },
            "strategy": {
                "type": "fed_median",
                "fit": { "min_clients": 3, "fraction": 1.0, "min_available": 3 },
                "evaluate": { "min_clients": 3, "fraction": 1.0, "min_available": 3 }
            }
        }"#,
    )?;

    let config = CoordinatorConfig::from_json_file(&path)?;
    let connections = Arc::new(ClientConnections::new(config.job.max_clients));
    let pool = SimulationPool::new(3);
    connect(&connections, &pool, "a", ConstantClient::new(vec![1.0], 1), Duration::ZERO);
    connect(&connections, &pool, "b", ConstantClient::new(vec![2.0], 1), Duration::ZERO);
    connect(&connections, &pool, "c", ConstantClient::new(vec![50.0], 100), Duration::ZERO);

    let driver = RoundDriver::from_config(&config, connections)?;
    let report = driver.run(Some(parameters(vec![0.0]))).await?;

    assert!(report.is_completed());
    assert_eq!(report.history.len(), 4);
    // the median ignores the heavy outlier
    assert_eq!(report.parameters, parameters(vec![2.0]));
    Ok(())
}
