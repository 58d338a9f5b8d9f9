//! End-to-end tests: session → delivery channel → TCP sink
//!
//! A small group/table rule engine stands in for the policy engine; audit
//! records travel through a real `TcpSink` to a local listener.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use warden_audit::{AuditDeliveryChannel, AuditEvent, DeliveryConfig, TcpSink};
use warden_authz::{
    AccessRequest, AccessResult, AuditCollector, AuthorizationSession, AuthzError, Identity,
    PolicyEngine, Result, StaticGroupResolver,
};

/// Grants `access` on a table to members of a group; checks each resource
/// level in turn and emits one audit event per check
struct GroupTableEngine {
    grants: HashMap<String, HashSet<(String, String)>>,
}

impl GroupTableEngine {
    fn new() -> Self {
        Self {
            grants: HashMap::new(),
        }
    }

    fn grant(mut self, group: &str, table: &str, access: &str) -> Self {
        self.grants
            .entry(group.to_string())
            .or_default()
            .insert((table.to_string(), access.to_string()));
        self
    }

    fn granted(&self, request: &AccessRequest, table: &str) -> bool {
        request.groups.iter().any(|group| {
            self.grants
                .get(group)
                .map_or(false, |g| g.contains(&(table.to_string(), request.access.clone())))
        })
    }
}

#[async_trait]
impl PolicyEngine for GroupTableEngine {
    async fn evaluate(
        &self,
        request: &AccessRequest,
        collector: Option<&AuditCollector>,
    ) -> Result<AccessResult> {
        let table = request.resource.get("table").unwrap_or_default();

        // exploratory check on the table itself
        let table_result = if self.granted(request, table) {
            AccessResult::allow()
        } else {
            AccessResult::deny(format!("no grant on table {}", table))
        };
        if let Some(collector) = collector {
            collector.capture(request.audit_event(&table_result).with_request_data("table-check"));
        }

        // column families carry no extra grants beyond the table
        let result = match request.resource.get("column-family") {
            Some(family) if !table_result.allowed => {
                AccessResult::deny(format!("no grant on {}:{}", table, family))
            }
            _ => table_result,
        };
        if request.resource.depth() > 1 {
            if let Some(collector) = collector {
                collector.capture(request.audit_event(&result).with_request_data("family-check"));
            }
        }

        Ok(result)
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn resolver() -> Arc<StaticGroupResolver> {
    Arc::new(
        StaticGroupResolver::new()
            .with_user("alice", ["analysts"])
            .with_user("bob", ["admins"]),
    )
}

fn engine() -> Arc<GroupTableEngine> {
    Arc::new(
        GroupTableEngine::new()
            .grant("analysts", "orders", "read")
            .grant("admins", "orders", "read")
            .grant("admins", "orders", "write"),
    )
}

/// Accept one connection and forward every line received
async fn spawn_collector() -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        if let Ok((socket, _)) = listener.accept().await {
            let mut lines = BufReader::new(socket).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).is_err() {
                    break;
                }
            }
        }
    });

    (address, rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<String>) -> (serde_json::Value, AuditEvent) {
    let line = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for audit record")
        .expect("collector closed");
    let envelope: serde_json::Value = serde_json::from_str(&line).unwrap();
    let event: AuditEvent = serde_json::from_str(envelope["payload"].as_str().unwrap()).unwrap();
    (envelope, event)
}

fn config_for(address: String) -> DeliveryConfig {
    DeliveryConfig {
        broker_addresses: vec![address],
        topic_name: "table_audits".to_string(),
        max_flush_interval_ms: 20,
        max_batch_size: 16,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_allow_and_deny_reach_sink() -> anyhow::Result<()> {
    let (address, mut rx) = spawn_collector().await;
    let config = config_for(address);
    let sink = TcpSink::new(&config);
    let channel = Arc::new(AuditDeliveryChannel::new(config, Box::new(sink))?);
    channel.start().await;
    assert!(!channel.is_degraded());

    let mut session = AuthorizationSession::new(engine(), resolver(), channel.clone());
    session.audit_collector(Some(AuditCollector::new()));

    // allowed: both checks are recorded
    session
        .identity(Some(Identity::new("alice@EXAMPLE.COM")))
        .access("read")
        .table("orders")
        .column_family("pii")
        .remote_address("10.1.2.3")
        .operation("get");
    session.build_request()?.authorize().await?;
    session.publish()?;

    let (envelope, first) = next_event(&mut rx).await;
    assert_eq!(envelope["topic"], "table_audits");
    assert_eq!(envelope["key"], "alice");
    assert_eq!(first.request_data.as_deref(), Some("table-check"));
    assert_eq!(first.client_ip.as_deref(), Some("10.1.2.3"));
    assert_eq!(first.action.as_deref(), Some("get"));
    let (_, second) = next_event(&mut rx).await;
    assert_eq!(second.request_data.as_deref(), Some("family-check"));
    assert_eq!(second.resource_type, "column-family");
    assert!(second.agent_hostname.is_some());

    // denied: only the decisive family check is recorded
    session
        .identity(Some(Identity::new("alice@EXAMPLE.COM")))
        .access("write")
        .table("orders")
        .column_family("pii");
    session.build_request()?.authorize().await?;
    let err = session.publish().unwrap_err();
    assert!(matches!(err, AuthzError::AccessDenied { .. }));
    assert!(err.to_string().contains("alice"));
    assert!(err.to_string().contains("no grant on orders:pii"));

    let (_, denied) = next_event(&mut rx).await;
    assert!(!denied.allowed);
    assert_eq!(denied.request_data.as_deref(), Some("family-check"));
    assert_eq!(denied.reason.as_deref(), Some("no grant on orders:pii"));

    channel.stop().await;
    assert_eq!(channel.stats().delivered, 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sessions_per_task_share_one_channel() -> anyhow::Result<()> {
    let (address, mut rx) = spawn_collector().await;
    let config = config_for(address);
    let sink = TcpSink::new(&config);
    let channel = Arc::new(AuditDeliveryChannel::new(config, Box::new(sink))?);
    channel.start().await;

    let engine = engine();
    let resolver = resolver();
    let mut tasks = Vec::new();

    for worker in 0..4 {
        let engine = engine.clone();
        let resolver = resolver.clone();
        let channel = channel.clone();
        tasks.push(tokio::spawn(async move {
            let mut session = AuthorizationSession::new(engine, resolver, channel);
            session.audit_collector(Some(AuditCollector::new()));
            let mut denied = 0;
            for n in 0..10 {
                let user = if (worker + n) % 2 == 0 { "alice" } else { "bob" };
                session
                    .identity(Some(Identity::new(user)))
                    .access("write")
                    .table("orders");
                session.build_request().unwrap();
                session.authorize().await.unwrap();
                if session.publish().is_err() {
                    denied += 1;
                }
            }
            denied
        }));
    }

    let mut denied = 0;
    for task in tasks {
        denied += task.await?;
    }
    // alice cannot write, bob can
    assert_eq!(denied, 20);

    let mut allowed_events = 0;
    let mut denied_events = 0;
    for _ in 0..40 {
        let (_, event) = next_event(&mut rx).await;
        if event.allowed {
            assert_eq!(event.user, "bob");
            allowed_events += 1;
        } else {
            assert_eq!(event.user, "alice");
            denied_events += 1;
        }
    }
    assert_eq!(allowed_events, 20);
    assert_eq!(denied_events, 20);

    channel.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_decisions_unaffected_by_unreachable_sink() -> anyhow::Result<()> {
    init_tracing();
    let config = DeliveryConfig {
        broker_addresses: vec!["127.0.0.1:1".to_string()],
        connect_timeout_ms: 100,
        shutdown_timeout_ms: 1_000,
        ..config_for(String::new())
    };
    let sink = TcpSink::new(&config);
    let channel = Arc::new(AuditDeliveryChannel::new(config, Box::new(sink))?);
    channel.start().await;
    assert!(channel.is_degraded());

    let mut session = AuthorizationSession::new(engine(), resolver(), channel.clone());
    session.audit_collector(Some(AuditCollector::new()));

    session
        .identity(Some(Identity::new("bob")))
        .access("write")
        .table("orders");
    session.build_request()?.authorize().await?;
    session.publish()?;

    session
        .identity(Some(Identity::new("alice")))
        .access("write")
        .table("orders");
    session.build_request()?.authorize().await?;
    assert!(session.publish().unwrap_err().is_access_denied());

    channel.stop().await;
    let stats = channel.stats();
    assert_eq!(stats.enqueued, 2);
    assert_eq!(stats.delivered, 0);
    assert_eq!(stats.fallback_logged, 2);
    Ok(())
}
