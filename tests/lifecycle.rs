//! Lifecycle properties of the server handle, run against the in-process
//! runtime and client.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use fdbtest::error::{HarnessError, Phase};
use fdbtest::runtime::ContainerRuntime;
use fdbtest::testing::{FakeRuntime, MemoryConnector, TEST_INSTANCE_ID};
use fdbtest::{HarnessConfig, LifecycleState, Registry, ServerHandle, Teardown};

fn server(runtime: &FakeRuntime) -> ServerHandle {
    fdbtest::logging::init_test_tracing();
    ServerHandle::new(
        HarnessConfig::default(),
        Arc::new(runtime.clone()),
        Arc::new(MemoryConnector::new()),
    )
}

// ── Start then destroy leaves nothing running ─────────────────────────────

#[tokio::test]
async fn start_then_destroy_leaves_no_instance() {
    for version in ["7.3.43", "7.1.61", "6.3.25"] {
        let runtime = FakeRuntime::new();
        let server = ServerHandle::new(
            HarnessConfig::default().with_version(version),
            Arc::new(runtime.clone()),
            Arc::new(MemoryConnector::new()),
        );

        server.start().await.unwrap();
        assert_eq!(
            runtime.list_instances(server.session()).await.unwrap().len(),
            1
        );

        assert_eq!(server.destroy().await.unwrap(), Teardown::Removed);
        assert!(
            runtime
                .list_instances(server.session())
                .await
                .unwrap()
                .is_empty(),
            "container for {version} must be gone after destroy"
        );
    }
}

// ── Round trip and clear ──────────────────────────────────────────────────

#[tokio::test]
async fn set_then_get_round_trips() {
    let runtime = FakeRuntime::new();
    let server = server(&runtime);
    server.must_start().await;

    let db = server.database().await.unwrap();
    db.set(b"foo", b"bar").await.unwrap();
    assert_eq!(db.get(b"foo").await.unwrap(), Some(b"bar".to_vec()));
}

#[tokio::test]
async fn clear_on_empty_database_is_a_no_op() {
    let runtime = FakeRuntime::new();
    let server = server(&runtime);
    server.must_start().await;

    server.clear().await.unwrap();
    server.clear().await.unwrap();
    assert_eq!(server.state().await, LifecycleState::Started);
}

#[tokio::test]
async fn clear_removes_written_keys() {
    let runtime = FakeRuntime::new();
    let server = server(&runtime);
    server.must_start().await;

    let db = server.database().await.unwrap();
    db.set(b"foo", b"bar").await.unwrap();
    server.must_clear().await;

    // a missing key reads as None, not as an error
    assert_eq!(db.get(b"foo").await.unwrap(), None);
}

// ── Malformed runtime answers stop the sequence ───────────────────────────

#[tokio::test]
async fn malformed_identifier_never_reaches_the_probe() {
    for output in ["", "4f1c2a9b8e7d", &TEST_INSTANCE_ID[..63]] {
        let runtime = FakeRuntime::new().with_run_output(output);
        let server = server(&runtime);

        let err = server.start().await.unwrap_err();
        assert!(
            matches!(err, HarnessError::Launch { .. }),
            "{output:?} gave {err}"
        );
        assert!(runtime.execs().is_empty());
        assert_eq!(server.state().await, LifecycleState::Failed);
    }
}

#[tokio::test]
async fn malformed_address_writes_no_cluster_file() {
    for address in ["", "localhost", "172.17.0", "172.17.0.2.1"] {
        let runtime = FakeRuntime::new().with_address(address);
        let connector = MemoryConnector::new();
        let server = ServerHandle::new(
            HarnessConfig::default(),
            Arc::new(runtime.clone()),
            Arc::new(connector.clone()),
        );

        let err = server.start().await.unwrap_err();
        assert_eq!(err.phase(), Some(Phase::Discover), "{address:?} gave {err}");
        assert!(server.descriptor_path().await.is_none());
        assert!(connector.opened().is_empty());
    }
}

#[tokio::test]
async fn initialization_failure_reports_raw_output() {
    let runtime = FakeRuntime::new().with_exec_output(fdbtest::runtime::ExecOutput {
        exit_code: Some(0),
        output: "ERROR: Database already exists!".to_string(),
    });
    let server = server(&runtime);

    let err = server.start().await.unwrap_err();
    match err {
        HarnessError::Initialization { output, .. } => {
            assert_eq!(output, "ERROR: Database already exists!");
        }
        other => panic!("expected initialization error, got {other}"),
    }

    // the container launched before the failure is still removable
    assert_eq!(server.destroy().await.unwrap(), Teardown::Removed);
    assert!(runtime.running().is_empty());
}

// ── Shared server ─────────────────────────────────────────────────────────

#[tokio::test]
async fn registry_returns_the_same_handle() {
    let runtime = FakeRuntime::new();
    let registry = Registry::new();
    let make = || {
        let runtime = runtime.clone();
        async move { Ok(server(&runtime)) }
    };

    let first = registry.must_get_or_start_with(make).await;
    let second = registry.must_get_or_start_with(make).await;

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.instance_id().await, second.instance_id().await);
    assert_eq!(runtime.runs().len(), 1);
}

#[tokio::test]
async fn double_destroy_keeps_registry_consistent() {
    let runtime = FakeRuntime::new();
    let registry = Registry::new();
    let make = || {
        let runtime = runtime.clone();
        async move { Ok(server(&runtime)) }
    };

    let shared = registry.must_get_or_start_with(make).await;
    assert_eq!(shared.destroy().await.unwrap(), Teardown::Removed);
    assert_eq!(shared.destroy().await.unwrap(), Teardown::AlreadyDestroyed);

    // the registry still answers and provisions a replacement
    let replacement = registry.must_get_or_start_with(make).await;
    assert_eq!(replacement.state().await, LifecycleState::Started);
    assert_eq!(runtime.running().len(), 1);

    assert_eq!(registry.destroy().await.unwrap(), Teardown::Removed);
    assert!(runtime.running().is_empty());
}
