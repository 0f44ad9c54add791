//! The same seeds give the same run.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use sealink_core::EngineConfig;
use sealink_harness::{Event, RecordingHandler, next_event, peer, spawn_node};

const PORT: u16 = 12000;

/// Run a greet + session + data exchange and return alice's events with
/// the addresses stripped.
fn run_once(seed: u64) -> Vec<String> {
    let mut sim = turmoil::Builder::new()
        .simulation_duration(Duration::from_secs(60))
        .min_message_latency(Duration::from_millis(1))
        .max_message_latency(Duration::from_millis(40))
        .rng_seed(seed)
        .build();
    let trace = Arc::new(Mutex::new(Vec::new()));

    sim.host("bob", || async {
        let (handler, mut events) = RecordingHandler::trusting();
        let _bob = spawn_node("bob", PORT, 2, EngineConfig::default(), handler).await?;
        while events.recv().await.is_some() {}
        Ok(())
    });

    let captured = Arc::clone(&trace);
    sim.client("alice", async move {
        let (handler, mut events) = RecordingHandler::trusting();
        let alice = spawn_node("alice", PORT, 1, EngineConfig::default(), handler).await?;
        let bob = peer("bob", PORT);

        alice.greet(bob).await?;
        while let Some(event) = next_event(&mut events, Duration::from_secs(5)).await {
            let established = matches!(event, Event::SessionEstablished { .. });
            captured.lock().unwrap().push(describe(&event));
            if established {
                break;
            }
        }

        alice.close();
        Ok(())
    });

    sim.run().unwrap();
    trace.lock().unwrap().clone()
}

fn describe(event: &Event) -> String {
    match event {
        Event::HelloResponse { error, elapsed, .. } => format!("hello {error:?} {elapsed:?}"),
        Event::Presentation { subject, is_new, .. } => format!("presentation {subject:?} {is_new}"),
        Event::SessionEstablished { session_number, .. } => format!("session {session_number}"),
        Event::Data { payload, .. } => format!("data {payload:?}"),
    }
}

#[test]
fn identical_seeds_identical_traces() {
    let first = run_once(42);
    let second = run_once(42);

    assert!(first.iter().any(|e| e.starts_with("session")), "{first:?}");
    assert_eq!(first, second);
}
