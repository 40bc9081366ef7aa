//! Cluster file generation.
//!
//! The FoundationDB client locates a cluster through a one-line file of the
//! form `description:id@address:port`. The official docker image uses
//! `docker:docker` for the first part. The format belongs to the client
//! library and is written byte for byte.

use std::fmt;
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tempfile::TempDir;

use crate::error::{ClientError, HarnessError, Result};

/// File name used inside each per-instance directory.
pub const CLUSTER_FILE_NAME: &str = "fdb.cluster";

/// Contents of a cluster file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub credentials: String,
    pub address: Ipv4Addr,
    pub port: u16,
}

impl ConnectionDescriptor {
    pub fn new(credentials: impl Into<String>, address: Ipv4Addr, port: u16) -> Self {
        Self {
            credentials: credentials.into(),
            address,
            port,
        }
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.credentials, self.address, self.port)
    }
}

impl FromStr for ConnectionDescriptor {
    type Err = ClientError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let line = s.trim();
        let invalid = || ClientError::InvalidDescriptor(line.to_string());

        let (credentials, endpoint) = line.rsplit_once('@').ok_or_else(invalid)?;
        if !credentials.contains(':') {
            return Err(invalid());
        }
        let (address, port) = endpoint.rsplit_once(':').ok_or_else(invalid)?;

        Ok(Self {
            credentials: credentials.to_string(),
            address: address.parse().map_err(|_| invalid())?,
            port: port.parse().map_err(|_| invalid())?,
        })
    }
}

/// A cluster file on disk and the directory that owns it.
///
/// The directory is removed when this value is dropped.
#[derive(Debug)]
pub struct DescriptorFile {
    dir: TempDir,
    path: PathBuf,
}

impl DescriptorFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

/// Write `descriptor` into a fresh temporary directory.
///
/// The file is flushed and synced before this returns; the client reads it
/// immediately afterwards.
pub fn write_descriptor(descriptor: &ConnectionDescriptor) -> Result<DescriptorFile> {
    let dir = tempfile::Builder::new()
        .prefix("fdbtest-")
        .tempdir()
        .map_err(|source| HarnessError::DescriptorWrite {
            path: std::env::temp_dir(),
            source,
        })?;
    let path = dir.path().join(CLUSTER_FILE_NAME);

    let write = |path: &Path| -> std::io::Result<()> {
        let mut file = std::fs::File::create_new(path)?;
        file.write_all(descriptor.to_string().as_bytes())?;
        file.flush()?;
        file.sync_all()
    };
    write(&path).map_err(|source| HarnessError::DescriptorWrite {
        path: path.clone(),
        source,
    })?;

    tracing::info!("cluster available: {}", descriptor);
    Ok(DescriptorFile { dir, path })
}
