//! Disposable FoundationDB servers for test suites.
//!
//! A [`ServerHandle`] launches the official FoundationDB image in Docker,
//! creates a single-node database in it, writes a cluster file pointing at
//! the container and opens a client on that file. Tests share one handle
//! through the [`Registry`] and reset it with [`ServerHandle::clear`].
//!
//! ```rust,ignore
//! #[tokio::test]
//! async fn round_trip() {
//!     let server = fdbtest::registry::must_get_or_start().await;
//!     server.must_clear().await;
//!
//!     let db = server.database().await.unwrap();
//!     db.set(b"foo", b"bar").await.unwrap();
//!     assert_eq!(db.get(b"foo").await.unwrap(), Some(b"bar".to_vec()));
//! }
//! ```

#[macro_use]
pub mod logging;

pub mod client;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod instance;
pub mod launcher;
pub mod network;
pub mod probe;
pub mod registry;
pub mod runtime;
pub mod server;
pub mod testing;

pub use config::HarnessConfig;
pub use error::{HarnessError, Result};
pub use registry::Registry;
pub use server::{LifecycleState, ServerHandle, Teardown};
