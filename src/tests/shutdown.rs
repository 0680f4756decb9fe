use std::{
    thread,
    time::{Duration, Instant},
};

use super::{MemoryDestination, read_events};
use crate::{
    config::{BackpressurePolicy, EveConfig, OutputConfig},
    dispatch::{Completion, CompletionEvent, WorkerContext},
    engine::OutputEngine,
    extract::{AppProto, SshBanner, SshExtractor, SshTransaction},
    observability::stats::OutputStats,
    registry::{OutputTargetId, RegistryBuilder},
    sink::{OutputSink, shared},
};

fn ssh(n: u64) -> SshTransaction {
    SshTransaction {
        client: Some(SshBanner::new("2.0", &format!("client-{n}"))),
        server: Some(SshBanner::new("2.0", "OpenSSH_9.6")),
    }
}

#[test]
fn test_shutdown_mid_stream_keeps_last_event() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("eve.json");
    let mut config = EveConfig::default();
    config.outputs.push(OutputConfig::new("eve", &path));
    config.loggers.ssh.enabled = true;

    let engine = OutputEngine::from_config(&config).unwrap();
    let pool = engine.spawn_workers(4).unwrap();

    let producer_deadline = Instant::now() + Duration::from_millis(50);
    let mut last = 0;
    while Instant::now() < producer_deadline && last < 20_000 {
        last += 1;
        pool.submit(Completion::new(last, ssh(last))).unwrap();
    }

    let stats = pool.shutdown();
    assert_eq!(stats.events_submitted, last);

    let events = read_events(&path);
    assert_eq!(events.len() as u64, last);
    assert!(events.iter().any(|e| e["flow_id"] == last));
    assert!(
        events
            .iter()
            .any(|e| e["ssh"]["client"]["software_version"] == format!("client-{last}").as_str())
    );
}

#[test]
fn test_dropping_context_flushes_buffered_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("eve.json");
    let mut config = EveConfig::default();
    config.outputs.push(OutputConfig::new("eve", &path));
    config.loggers.ssh.enabled = true;

    let engine = OutputEngine::from_config(&config).unwrap();
    let handle = {
        let mut ctx = engine.worker_context(0).unwrap();
        thread::spawn(move || {
            for n in 0..10 {
                let tx = ssh(n);
                ctx.dispatch(&CompletionEvent::new(n, &tx));
            }
        })
    };
    handle.join().unwrap();

    assert_eq!(read_events(&path).len(), 10);
}

fn memory_context(policy: BackpressurePolicy, dest: &MemoryDestination) -> WorkerContext {
    let mut output = OutputConfig::new("mem", "/unused");
    output.on_backpressure = policy;
    output.retry_backoff_ms = 0;
    let stats = std::sync::Arc::new(OutputStats::new());
    let sink = OutputSink::new(&output, shared(dest.clone()), stats.clone());
    let mut registry = RegistryBuilder::new(1);
    registry
        .register(AppProto::Ssh, SshExtractor, OutputTargetId::new(0))
        .unwrap();
    WorkerContext::new(0, std::sync::Arc::new(registry.build()), vec![sink], stats)
}

#[test]
fn test_shutdown_with_failing_destination_block_policy_retries() {
    let dest = MemoryDestination::failing(3);
    let mut ctx = memory_context(BackpressurePolicy::Block, &dest);
    for n in 0..5 {
        let tx = ssh(n);
        ctx.dispatch(&CompletionEvent::new(n, &tx));
    }
    let stats = ctx.stats().snapshot();
    assert_eq!(stats.records_written, 0);
    ctx.flush();

    let stats = ctx.stats().snapshot();
    assert_eq!(stats.write_failures, 3);
    assert_eq!(stats.records_written, 5);
    assert_eq!(dest.lines().len(), 5);
    ctx.shutdown();
}

#[test]
fn test_shutdown_with_failing_destination_drop_policy_discards() {
    let dest = MemoryDestination::failing(1);
    let mut ctx = memory_context(BackpressurePolicy::Drop, &dest);
    for n in 0..5 {
        let tx = ssh(n);
        ctx.dispatch(&CompletionEvent::new(n, &tx));
    }
    ctx.flush();

    let stats = ctx.stats().snapshot();
    assert_eq!(stats.events_submitted, 5);
    assert_eq!(stats.write_failures, 1);
    assert_eq!(stats.records_dropped, 5);
    assert!(dest.lines().is_empty());
    ctx.shutdown();
}
