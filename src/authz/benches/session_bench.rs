//! Authorization session benchmarks
//!
//! Hot path cost of one request: build → authorize → publish, with and
//! without audit capture, and the enqueue cost of the delivery channel.

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;
use warden_audit::{AuditDeliveryChannel, DeliveryConfig, MemorySink, OverflowPolicy};
use warden_authz::{
    AccessRequest, AccessResult, AuditCollector, AuditEvent, AuditWriter, AuthorizationSession,
    Identity, PolicyEngine, Result, StaticGroupResolver,
};

/// Allows everything, emitting `checks` audit events per evaluation
struct FixedEngine {
    checks: usize,
}

#[async_trait]
impl PolicyEngine for FixedEngine {
    async fn evaluate(
        &self,
        request: &AccessRequest,
        collector: Option<&AuditCollector>,
    ) -> Result<AccessResult> {
        let result = AccessResult::allow();
        if let Some(collector) = collector {
            for _ in 0..self.checks {
                collector.capture(request.audit_event(&result));
            }
        }
        Ok(result)
    }
}

struct DiscardWriter;

impl AuditWriter for DiscardWriter {
    fn log_events(&self, events: Vec<AuditEvent>) {
        black_box(events);
    }
}

fn bench_session_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let resolver = Arc::new(StaticGroupResolver::new().with_user("alice", ["analysts"]));

    let mut group = c.benchmark_group("session_round_trip");

    for checks in [0usize, 1, 4].iter() {
        group.bench_with_input(BenchmarkId::new("audit_events", checks), checks, |b, &checks| {
            let mut session = AuthorizationSession::new(
                Arc::new(FixedEngine { checks }),
                resolver.clone(),
                Arc::new(DiscardWriter),
            );
            session.audit_collector(Some(AuditCollector::new()));

            b.iter(|| {
                rt.block_on(async {
                    session
                        .identity(Some(Identity::new("alice")))
                        .access("read")
                        .table("orders")
                        .column_family("pii");
                    session.build_request().unwrap();
                    session.authorize().await.unwrap();
                    black_box(session.publish().is_ok())
                })
            });
        });
    }

    group.finish();
}

fn bench_enqueue(c: &mut Criterion) {
    // never started: measures the producer side only
    let config = DeliveryConfig {
        max_queue_size: 1_024,
        overflow_policy: OverflowPolicy::DropOldest,
        ..Default::default()
    };
    let channel = AuditDeliveryChannel::new(config, Box::new(MemorySink::new())).unwrap();

    c.bench_function("channel_enqueue", |b| {
        b.iter(|| {
            black_box(channel.enqueue(AuditEvent::new("alice", "read", "orders/pii", true)))
        })
    });
}

criterion_group!(benches, bench_session_round_trip, bench_enqueue);
criterion_main!(benches);
