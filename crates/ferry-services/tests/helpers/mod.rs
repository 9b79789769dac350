pub mod fixtures;

use ferry_services::{BatchRunner, FerryConfig, ManagedFileValidator};
use ferry_storage::{LocalTransport, MemoryTransport};
use std::sync::Arc;
use tempfile::TempDir;

/// Runner over a scripted in-memory transport.
pub fn memory_runner(config: &FerryConfig) -> (BatchRunner, Arc<MemoryTransport>) {
    let transport = Arc::new(MemoryTransport::new());
    let validator = Arc::new(ManagedFileValidator::from_config(config));
    let runner = BatchRunner::new(transport.clone(), validator, config);
    (runner, transport)
}

/// Runner writing into a fresh temporary directory.
pub struct LocalTestApp {
    pub runner: BatchRunner,
    pub transport: Arc<LocalTransport>,
    pub _temp_dir: TempDir,
}

impl LocalTestApp {
    pub fn root(&self) -> &std::path::Path {
        self._temp_dir.path()
    }
}

pub async fn setup_local_app(config: &FerryConfig) -> LocalTestApp {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let transport = Arc::new(
        LocalTransport::new(temp_dir.path(), "http://localhost:3000/files".to_string())
            .await
            .expect("Failed to create local transport"),
    );
    let validator = Arc::new(ManagedFileValidator::from_config(config));
    let runner = BatchRunner::new(transport.clone(), validator, config);

    LocalTestApp {
        runner,
        transport,
        _temp_dir: temp_dir,
    }
}
