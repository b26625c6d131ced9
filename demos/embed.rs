//! Example demonstrating Fusebox as an embedded library
//!
//! This example walks one breaker through a full outage: tripping on
//! consecutive failures, refusing calls while open, serving a fallback,
//! and recovering through a half-open probe.
//!
//! Run with: cargo run --example embed

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use fusebox::breaker::{BreakerRegistry, BreakerSettings};
use fusebox::{BreakerError, Failure};

/// Stand-in for a flaky downstream dependency.
async fn call_upstream(hits: &AtomicU32, healthy: bool) -> Result<String, Failure<String>> {
    hits.fetch_add(1, Ordering::Relaxed);
    if healthy {
        Ok("200 OK".to_string())
    } else {
        Err(Failure::Dependency("upstream timed out".to_string()))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> fusebox::Result<()> {
    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║     Fusebox - Circuit Breaker Walkthrough                    ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    // Trip after 3 consecutive failures, close again after 2 good probes,
    // refuse for 2 seconds in between.
    let registry = BreakerRegistry::new();
    let breaker = registry.register(
        "payments",
        BreakerSettings {
            failure_threshold: 3,
            success_threshold: 2,
            timeout: Duration::from_secs(2),
            ..BreakerSettings::default()
        },
    )?;

    let upstream_hits = AtomicU32::new(0);

    // Phase 1: the upstream goes dark. Three failures trip the circuit;
    // the fourth call is refused before it ever leaves the process.
    println!("1. Upstream outage");
    for n in 1..=4 {
        let result = breaker
            .protect(|| call_upstream(&upstream_hits, false))
            .await;
        match result {
            Ok(body) => println!("   ✓ call {n}: {body}"),
            Err(BreakerError::Open(refusal)) => println!("   ⚠ call {n}: {refusal}"),
            Err(e) => println!("   ✗ call {n}: {e}"),
        }
    }
    println!(
        "   state = {}, upstream hits = {}\n",
        breaker.state(),
        upstream_hits.load(Ordering::Relaxed)
    );

    // Phase 2: while the circuit is open, protect_with serves a fallback
    // instead of surfacing the refusal.
    println!("2. Fallback while open");
    let result = breaker
        .protect_with(
            || call_upstream(&upstream_hits, false),
            || async { Ok("cached response".to_string()) },
        )
        .await;
    match result {
        Ok(body) => println!("   ✓ served: {body}"),
        Err(e) => println!("   ✗ {e}"),
    }
    println!(
        "   fallback responses so far: {}\n",
        breaker.metrics().fallback_requests
    );

    // Phase 3: wait out the retry window. The next call is admitted as a
    // probe; two successes close the circuit.
    println!("3. Recovery");
    println!("   waiting 2s for the retry window to expire...");
    tokio::time::sleep(Duration::from_millis(2100)).await;
    for n in 1..=2 {
        let result = breaker
            .protect(|| call_upstream(&upstream_hits, true))
            .await;
        match result {
            Ok(body) => println!("   ✓ probe {n}: {body} (state = {})", breaker.state()),
            Err(e) => println!("   ✗ probe {n}: {e}"),
        }
    }

    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║ STATUS SNAPSHOT (what /breakers/payments would return)       ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");
    let breaker = registry
        .lookup("payments")
        .ok_or_else(|| fusebox::Error::BreakerNotFound("payments".to_string()))?;
    println!("{}", serde_json::to_string_pretty(&breaker.status())?);

    Ok(())
}
