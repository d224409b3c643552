// ABOUTME: Test support utilities.
// ABOUTME: Tracing setup plus builders for controllers backed by the in-memory runtime.

use drydock::config::Config;
use drydock::runtime::{ContainerSpec, InMemoryRuntime};
use drydock::store::{BackupStore, OperationStore};
use drydock::types::{ContainerName, ImageRef};
use drydock::update::{UpdateController, UpdateRequest};
use std::sync::{Arc, Once};
use std::time::Duration;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter =
            EnvFilter::from_default_env().add_directive("drydock=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Config with health timings short enough for paused-clock tests.
#[allow(dead_code)]
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.health.timeout = Duration::from_secs(10);
    config.health.interval = Duration::from_millis(100);
    config.health.stable_period = Duration::from_millis(300);
    config.backup.retention = 2;
    config
}

#[allow(dead_code)]
pub fn controller(runtime: &InMemoryRuntime, config: Config) -> UpdateController<InMemoryRuntime> {
    controller_with_stores(
        runtime,
        config,
        Arc::new(OperationStore::in_memory()),
        Arc::new(BackupStore::in_memory()),
    )
}

#[allow(dead_code)]
pub fn controller_with_stores(
    runtime: &InMemoryRuntime,
    config: Config,
    operations: Arc<OperationStore>,
    backups: Arc<BackupStore>,
) -> UpdateController<InMemoryRuntime> {
    UpdateController::new(runtime.clone(), operations, backups, config).with_host("test-host")
}

#[allow(dead_code)]
pub fn spec(image: &str) -> ContainerSpec {
    ContainerSpec {
        image: image.to_string(),
        ..Default::default()
    }
}

#[allow(dead_code)]
pub fn name(value: &str) -> ContainerName {
    ContainerName::new(value).unwrap()
}

#[allow(dead_code)]
pub fn request(container: &str, image: &str) -> UpdateRequest {
    UpdateRequest::new(name(container), ImageRef::parse(image).unwrap(), "manual")
}
