//! Round trip against a real FoundationDB container.
//!
//! Needs a Docker daemon and the FoundationDB client library:
//!
//! ```text
//! cargo test --features integration,fdb --test docker_roundtrip
//! ```

#![cfg(all(feature = "integration", feature = "fdb"))]

use std::sync::Arc;

use fdbtest::runtime::{ContainerRuntime, DockerRuntime};
use fdbtest::{LifecycleState, Registry, ServerHandle, Teardown};

#[tokio::test]
async fn round_trip_clear_and_destroy() -> anyhow::Result<()> {
    fdbtest::logging::init_test_tracing();

    let server = ServerHandle::with_defaults().await?;
    server.must_start().await;
    assert_eq!(server.state().await, LifecycleState::Started);

    let db = server
        .database()
        .await
        .ok_or_else(|| anyhow::anyhow!("started server has no database"))?;
    db.set(b"foo", b"bar").await?;
    assert_eq!(db.get(b"foo").await?, Some(b"bar".to_vec()));

    server.must_clear().await;
    assert_eq!(db.get(b"foo").await?, None);

    assert_eq!(server.destroy().await?, Teardown::Removed);
    assert_eq!(server.destroy().await?, Teardown::AlreadyDestroyed);

    let docker = DockerRuntime::connect().await?;
    assert!(docker.list_instances(server.session()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn shared_server_is_started_once() -> anyhow::Result<()> {
    fdbtest::logging::init_test_tracing();

    let first = fdbtest::registry::must_get_or_start().await;
    let second = fdbtest::registry::must_get_or_start().await;
    let ids = (first.instance_id().await, second.instance_id().await);
    let same_handle = Arc::ptr_eq(&first, &second);
    let session = first.session().to_string();

    // tear down before asserting so a failure cannot leak the container
    let teardown = Registry::global().destroy().await?;

    assert!(same_handle);
    assert!(ids.0.is_some());
    assert_eq!(ids.0, ids.1);
    assert_eq!(teardown, Teardown::Removed);

    let docker = DockerRuntime::connect().await?;
    assert!(docker.list_instances(&session).await?.is_empty());
    Ok(())
}
