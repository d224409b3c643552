// ABOUTME: End-to-end tests for the update controller against the in-memory runtime.
// ABOUTME: Covers promotion, rollback, hook aborts, single-flight, unwinding, and ambiguous states.

mod support;

use async_trait::async_trait;
use drydock::health::{REASON_CANCELLED, REASON_TIMEOUT, REASON_UNHEALTHY};
use drydock::runtime::traits::{PortMapping, Protocol};
use drydock::runtime::{
    ContainerError, ContainerSpec, HealthState, InMemoryRuntime, RuntimeCall, Timed,
};
use drydock::store::{BackupStore, NewBackup, OperationStore, Phase, Status, UpdateOperation};
use drydock::update::{
    ListenerError, OPERATION_LABEL, OutcomeListener, OutcomeRegistry, UpdateController,
    UpdateError,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use support::{controller, fast_config, name, request, spec};
use tokio_util::sync::CancellationToken;

fn spec_with_host_port(image: &str) -> ContainerSpec {
    ContainerSpec {
        ports: vec![PortMapping {
            container_port: 80,
            protocol: Protocol::Tcp,
            host_port: Some(8080),
            host_ip: None,
        }],
        ..spec(image)
    }
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(String, Status)>>,
}

#[async_trait]
impl OutcomeListener for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn on_outcome(&self, op: &UpdateOperation) -> Result<(), ListenerError> {
        self.seen.lock().push((op.id.to_string(), op.status));
        Ok(())
    }
}

mod promotion {
    use super::*;

    /// Test: a healthy replacement is promoted and the original removed.
    #[tokio::test(start_paused = true)]
    async fn healthy_update_promotes() {
        support::init_tracing();
        let runtime = InMemoryRuntime::new();
        let original = runtime.add_container("web", spec("nginx:1.26"), true);
        let ctl = controller(&runtime, fast_config());

        let op = ctl
            .update(request("web", "nginx:1.27"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(op.status, Status::Success);
        assert_eq!(op.phase, Phase::Promoted);
        assert!(op.reason.is_none());

        let current = runtime.container_named("web").unwrap();
        assert_ne!(current.id, original);
        assert_eq!(current.spec.image, "nginx:1.27");
        assert!(current.is_running());
        assert_eq!(current.label(OPERATION_LABEL), Some(op.id.as_str()));
        assert_eq!(Some(&current.id), op.new_container_id.as_ref());
        assert!(runtime.container_named(&op.temp_name).is_none());
        assert_eq!(runtime.container_count(), 1);
        assert_eq!(runtime.pulled_images(), vec!["nginx:1.27".to_string()]);
    }

    /// Test: the replacement keeps the captured config with the image swapped.
    #[tokio::test(start_paused = true)]
    async fn captured_spec_is_carried_over() {
        let runtime = InMemoryRuntime::new();
        let mut original = spec("nginx:1.26");
        original.env = vec!["MODE=prod".to_string()];
        original.binds = vec!["data:/var/lib/data".to_string()];
        original
            .labels
            .insert("team".to_string(), "platform".to_string());
        runtime.add_container("web", original, true);
        let ctl = controller(&runtime, fast_config());

        ctl.update(request("web", "nginx:1.27"), &CancellationToken::new())
            .await
            .unwrap();

        let current = runtime.container_named("web").unwrap();
        assert_eq!(current.spec.env, vec!["MODE=prod".to_string()]);
        assert_eq!(current.spec.binds, vec!["data:/var/lib/data".to_string()]);
        assert_eq!(current.label("team"), Some("platform"));
    }

    /// Test: a successful update prunes backups to the retention limit.
    #[tokio::test(start_paused = true)]
    async fn success_prunes_backups() {
        let runtime = InMemoryRuntime::new();
        let original = runtime.add_container("web", spec("nginx:1.26"), true);
        let ctl = controller(&runtime, fast_config());
        for image in ["nginx:1.23", "nginx:1.24", "nginx:1.25"] {
            ctl.backups()
                .insert_backup(NewBackup {
                    id: None,
                    container_name: name("web"),
                    container_id: original.clone(),
                    timestamp: Some(chrono::Utc::now() - chrono::Duration::days(1)),
                    image: image.to_string(),
                    image_id: format!("sha256:{image}"),
                    was_running: true,
                    spec: spec(image),
                })
                .unwrap();
        }

        let op = ctl
            .update(request("web", "nginx:1.27"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(op.status, Status::Success);

        let kept = ctl.backups().by_container_name(&name("web"));
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].id, op.backup_id.unwrap());
        assert_eq!(kept[0].image, "nginx:1.26");
    }

    /// Test: each terminal outcome is published exactly once.
    #[tokio::test(start_paused = true)]
    async fn outcome_published_once() {
        let runtime = InMemoryRuntime::new();
        runtime.add_container("web", spec("nginx:1.26"), true);
        let recorder = Arc::new(Recorder::default());
        let outcomes = OutcomeRegistry::new();
        outcomes.register(recorder.clone());
        let ctl = controller(&runtime, fast_config()).with_outcomes(outcomes);

        let op = ctl
            .update(request("web", "nginx:1.27"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            *recorder.seen.lock(),
            vec![(op.id.to_string(), Status::Success)]
        );
    }

    /// Test: a failing post-update hook is recorded as a warning, not a rollback.
    #[tokio::test]
    async fn post_update_hook_failure_is_warning() {
        let runtime = InMemoryRuntime::new();
        runtime.add_container("web", spec("nginx:1.26"), true);
        let mut config = fast_config();
        config.hooks.post_update = Some("echo 'cache purge failed' >&2; exit 4".to_string());
        let ctl = controller(&runtime, config);

        let op = ctl
            .update(request("web", "nginx:1.27"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(op.status, Status::Success);
        assert_eq!(
            op.hook_warnings,
            vec!["post-update hook exited with code 4: cache purge failed".to_string()]
        );
    }

    /// Test: the pre-update hook sees the operation context.
    #[tokio::test]
    async fn pre_update_hook_sees_context() {
        let runtime = InMemoryRuntime::new();
        runtime.add_container("web", spec("nginx:1.26"), true);
        let mut config = fast_config();
        config.hooks.pre_update = Some(
            concat!(
                r#"test "$DRYDOCK_HOST" = test-host"#,
                r#" && test "$DRYDOCK_CURRENT_IMAGE" = nginx:1.26"#,
                r#" && test "$DRYDOCK_CONTAINER_NAME" = web"#,
            )
            .to_string(),
        );
        let ctl = controller(&runtime, config);

        let op = ctl
            .update(request("web", "nginx:1.27"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(op.status, Status::Success, "reason: {:?}", op.reason);
    }

    /// Test: host port bindings select recreate, stopping the original first.
    #[tokio::test(start_paused = true)]
    async fn host_ports_stop_original_before_create() {
        let runtime = InMemoryRuntime::new();
        let original = runtime.add_container("web", spec_with_host_port("nginx:1.26"), true);
        let ctl = controller(&runtime, fast_config());

        let op = ctl
            .update(request("web", "nginx:1.27"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(op.status, Status::Success);

        let calls = runtime.mutation_calls();
        let stop = calls
            .iter()
            .position(|c| c.call == RuntimeCall::Stop && c.target == original.as_str())
            .expect("original stopped");
        let create = calls
            .iter()
            .position(|c| c.call == RuntimeCall::Create)
            .unwrap();
        assert!(stop < create);
    }
}

mod rollback {
    use super::*;

    /// Test: an unhealthy replacement is rolled back and the original restored.
    #[tokio::test(start_paused = true)]
    async fn unhealthy_update_rolls_back() {
        let runtime = InMemoryRuntime::new();
        let original = runtime.add_container("web", spec("nginx:1.26"), true);
        runtime.set_health_on_start(Some(HealthState::Unhealthy));
        let ctl = controller(&runtime, fast_config());

        let op = ctl
            .update(request("web", "nginx:1.27"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(op.status, Status::RolledBack);
        assert_eq!(op.phase, Phase::Rollback);
        assert_eq!(op.reason.as_deref(), Some(REASON_UNHEALTHY));

        let current = runtime.container_named("web").unwrap();
        assert_eq!(current.id, original);
        assert!(current.is_running());
        assert_eq!(current.spec.image, "nginx:1.26");
        assert_eq!(runtime.container_count(), 1);
    }

    /// Test: a replacement that never turns healthy times out into rollback.
    #[tokio::test(start_paused = true)]
    async fn health_timeout_rolls_back() {
        let runtime = InMemoryRuntime::new();
        let original = runtime.add_container("web", spec("nginx:1.26"), true);
        runtime.set_health_on_start(Some(HealthState::Starting));
        let ctl = controller(&runtime, fast_config());

        let op = ctl
            .update(request("web", "nginx:1.27"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(op.status, Status::RolledBack);
        assert_eq!(op.reason.as_deref(), Some(REASON_TIMEOUT));
        assert_eq!(runtime.container_named("web").unwrap().id, original);
    }

    /// Test: recreate rollback starts the stopped original again.
    #[tokio::test(start_paused = true)]
    async fn recreate_rollback_restarts_original() {
        let runtime = InMemoryRuntime::new();
        let original = runtime.add_container("web", spec_with_host_port("nginx:1.26"), true);
        runtime.set_health_on_start(Some(HealthState::Unhealthy));
        let ctl = controller(&runtime, fast_config());

        let op = ctl
            .update(request("web", "nginx:1.27"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(op.status, Status::RolledBack);
        let current = runtime.container_named("web").unwrap();
        assert_eq!(current.id, original);
        assert!(current.is_running());
    }

    /// Test: a stopped original stays stopped after rollback.
    #[tokio::test(start_paused = true)]
    async fn stopped_original_stays_stopped() {
        let runtime = InMemoryRuntime::new();
        let original = runtime.add_container("web", spec("nginx:1.26"), false);
        runtime.set_health_on_start(Some(HealthState::Unhealthy));
        let ctl = controller(&runtime, fast_config());

        let op = ctl
            .update(request("web", "nginx:1.27"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(op.status, Status::RolledBack);
        let current = runtime.container_named("web").unwrap();
        assert_eq!(current.id, original);
        assert!(!current.is_running());
    }

    /// Test: cancelling during the health check resolves through rollback.
    #[tokio::test(start_paused = true)]
    async fn cancellation_during_health_check_rolls_back() {
        let runtime = InMemoryRuntime::new();
        let original = runtime.add_container("web", spec("nginx:1.26"), true);
        runtime.set_health_on_start(Some(HealthState::Starting));
        let ctl = controller(&runtime, fast_config());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let op = ctl
            .update(request("web", "nginx:1.27"), &cancel)
            .await
            .unwrap();

        assert_eq!(op.status, Status::RolledBack);
        assert_eq!(op.reason.as_deref(), Some(REASON_CANCELLED));
        assert_eq!(runtime.container_named("web").unwrap().id, original);
    }

    /// Test: a failing rollback hook is a warning on a rolled-back operation.
    #[tokio::test]
    async fn rollback_hook_failure_is_warning() {
        let runtime = InMemoryRuntime::new();
        runtime.add_container("web", spec("nginx:1.26"), true);
        runtime.set_health_on_start(Some(HealthState::Unhealthy));
        let mut config = fast_config();
        config.hooks.rollback = Some(
            r#"test "$DRYDOCK_ROLLBACK_REASON" = "container reported unhealthy" && exit 7"#
                .to_string(),
        );
        let ctl = controller(&runtime, config);

        let op = ctl
            .update(request("web", "nginx:1.27"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(op.status, Status::RolledBack);
        assert_eq!(
            op.hook_warnings,
            vec!["rollback hook exited with code 7".to_string()]
        );
    }

    /// Test: the rollback hook still runs to completion after the update was cancelled.
    #[tokio::test]
    async fn rollback_hook_runs_after_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("rolled-back");
        let runtime = InMemoryRuntime::new();
        runtime.add_container("web", spec("nginx:1.26"), true);
        runtime.set_health_on_start(Some(HealthState::Starting));
        let mut config = fast_config();
        config.hooks.rollback = Some(format!(
            r#"sleep 0.2 && echo "$DRYDOCK_ROLLBACK_REASON" > {}"#,
            marker.display()
        ));
        let ctl = controller(&runtime, config);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let op = ctl
            .update(request("web", "nginx:1.27"), &cancel)
            .await
            .unwrap();

        assert_eq!(op.status, Status::RolledBack);
        assert_eq!(op.reason.as_deref(), Some(REASON_CANCELLED));
        assert!(op.hook_warnings.is_empty(), "{:?}", op.hook_warnings);
        let written = std::fs::read_to_string(&marker).unwrap();
        assert!(written.contains(REASON_CANCELLED), "{written}");
    }
}

mod aborts {
    use super::*;

    /// Test: a failing pre-update hook aborts before any rename or create.
    #[tokio::test]
    async fn pre_update_hook_failure_aborts_before_mutation() {
        let runtime = InMemoryRuntime::new();
        let original = runtime.add_container("web", spec("nginx:1.26"), true);
        let mut config = fast_config();
        config.hooks.pre_update = Some("echo 'migrations pending' >&2; exit 1".to_string());
        let ctl = controller(&runtime, config);

        let op = ctl
            .update(request("web", "nginx:1.27"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(op.status, Status::Failed);
        assert_eq!(op.phase, Phase::Prepare);
        assert!(op.reason.unwrap().contains("migrations pending"));
        assert!(runtime.mutation_calls().is_empty());
        let current = runtime.container_named("web").unwrap();
        assert_eq!(current.id, original);
        assert!(current.is_running());
    }

    /// Test: a container label overrides the configured hook command.
    #[tokio::test]
    async fn label_hook_overrides_config() {
        let runtime = InMemoryRuntime::new();
        let mut labelled = spec("nginx:1.26");
        labelled
            .labels
            .insert("drydock.hook.pre-update".to_string(), "exit 9".to_string());
        runtime.add_container("web", labelled, true);
        let mut config = fast_config();
        config.hooks.pre_update = Some("exit 0".to_string());
        let ctl = controller(&runtime, config);

        let op = ctl
            .update(request("web", "nginx:1.27"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(op.status, Status::Failed);
        assert_eq!(
            op.reason.as_deref(),
            Some("pre-update hook exited with code 9")
        );
        assert!(runtime.mutation_calls().is_empty());
    }

    /// Test: a second update for a name with one in flight is a conflict.
    #[tokio::test(start_paused = true)]
    async fn concurrent_update_is_rejected() {
        let runtime = InMemoryRuntime::new();
        runtime.add_container("web", spec("nginx:1.26"), true);
        runtime.delay(RuntimeCall::Pull, Duration::from_secs(5));
        let ctl = Arc::new(controller(&runtime, fast_config()));

        let first = {
            let ctl = Arc::clone(&ctl);
            tokio::spawn(async move {
                ctl.update(request("web", "nginx:1.27"), &CancellationToken::new())
                    .await
            })
        };
        while ctl.operations().latest_in_progress(&name("web")).is_none() {
            tokio::task::yield_now().await;
        }

        let err = ctl
            .update(request("web", "nginx:1.28"), &CancellationToken::new())
            .await
            .unwrap_err();
        let operation = match err {
            UpdateError::Conflict { operation, .. } => operation,
            other => panic!("expected conflict, got {other}"),
        };

        let op = first.await.unwrap().unwrap();
        assert_eq!(operation, op.id);
        assert_eq!(op.status, Status::Success);
        assert_eq!(ctl.operations().history(&name("web")).len(), 1);
        assert_eq!(
            runtime.container_named("web").unwrap().spec.image,
            "nginx:1.27"
        );
    }

    /// Test: updates of different containers run side by side.
    #[tokio::test(start_paused = true)]
    async fn different_containers_update_concurrently() {
        let runtime = InMemoryRuntime::new();
        runtime.add_container("web", spec("nginx:1.26"), true);
        runtime.add_container("api", spec("api:1"), true);
        let ctl = Arc::new(controller(&runtime, fast_config()));

        let web = {
            let ctl = Arc::clone(&ctl);
            tokio::spawn(async move {
                ctl.update(request("web", "nginx:1.27"), &CancellationToken::new())
                    .await
            })
        };
        let api = ctl
            .update(request("api", "api:2"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(api.status, Status::Success);
        assert_eq!(web.await.unwrap().unwrap().status, Status::Success);
        assert_eq!(runtime.container_count(), 2);
    }
}

mod unwinding {
    use super::*;

    /// Test: a create failure renames the original back.
    #[tokio::test(start_paused = true)]
    async fn create_failure_restores_original() {
        let runtime = InMemoryRuntime::new();
        let original = runtime.add_container("web", spec("nginx:1.26"), true);
        runtime.fail_next(
            RuntimeCall::Create,
            ContainerError::Runtime("no space left on device".to_string()),
        );
        let ctl = controller(&runtime, fast_config());

        let op = ctl
            .update(request("web", "nginx:1.27"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(op.status, Status::Failed);
        assert_eq!(op.phase, Phase::NewStarted);
        assert!(op.reason.unwrap().contains("no space left on device"));
        let current = runtime.container_named("web").unwrap();
        assert_eq!(current.id, original);
        assert!(current.is_running());
        assert_eq!(runtime.container_count(), 1);
    }

    /// Test: a start failure removes the new container and restores the original.
    #[tokio::test(start_paused = true)]
    async fn start_failure_removes_new_and_restores() {
        let runtime = InMemoryRuntime::new();
        let original = runtime.add_container("web", spec_with_host_port("nginx:1.26"), true);
        runtime.fail_next(
            RuntimeCall::Start,
            ContainerError::Runtime("port is already allocated".to_string()),
        );
        let ctl = controller(&runtime, fast_config());

        let op = ctl
            .update(request("web", "nginx:1.27"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(op.status, Status::Failed);
        assert!(
            op.reason
                .unwrap()
                .starts_with("failed to start new container for web")
        );
        let current = runtime.container_named("web").unwrap();
        assert_eq!(current.id, original);
        assert!(current.is_running());
        assert_eq!(runtime.container_count(), 1);
    }

    /// Test: a runtime call that hangs is bounded by the call timeout and unwound.
    #[tokio::test(start_paused = true)]
    async fn hung_create_times_out_and_unwinds() {
        let runtime = InMemoryRuntime::new();
        let original = runtime.add_container("web", spec("nginx:1.26"), true);
        runtime.delay(RuntimeCall::Create, Duration::from_secs(3600));
        let ctl = UpdateController::new(
            Timed::new(runtime.clone(), Duration::from_secs(5)),
            Arc::new(OperationStore::in_memory()),
            Arc::new(BackupStore::in_memory()),
            fast_config(),
        );

        let op = ctl
            .update(request("web", "nginx:1.27"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(op.status, Status::Failed);
        assert!(op.reason.unwrap().contains("failed to create web"));
        assert_eq!(runtime.container_named("web").unwrap().id, original);
        assert_eq!(runtime.container_count(), 1);
    }
}

mod ambiguous {
    use super::*;

    /// Test: failing to remove the original after a healthy check is ambiguous.
    #[tokio::test(start_paused = true)]
    async fn promotion_cleanup_failure_is_ambiguous() {
        let runtime = InMemoryRuntime::new();
        let original = runtime.add_container("web", spec("nginx:1.26"), true);
        runtime.fail_next(
            RuntimeCall::Remove,
            ContainerError::Runtime("device or resource busy".to_string()),
        );
        let ctl = controller(&runtime, fast_config());

        let op = ctl
            .update(request("web", "nginx:1.27"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(op.status, Status::Failed);
        assert_eq!(op.phase, Phase::HealthCheck);
        let reason = op.reason.unwrap();
        assert!(reason.starts_with("ambiguous state:"), "{reason}");
        assert!(reason.contains(&op.temp_name));

        // Both containers are left for an operator to look at.
        assert_eq!(runtime.container_count(), 2);
        assert_eq!(
            runtime.container_named(&op.temp_name).unwrap().id,
            original
        );
    }

    /// Test: failing to remove the new container during rollback is ambiguous.
    #[tokio::test(start_paused = true)]
    async fn rollback_cleanup_failure_is_ambiguous() {
        let runtime = InMemoryRuntime::new();
        runtime.add_container("web", spec("nginx:1.26"), true);
        runtime.set_health_on_start(Some(HealthState::Unhealthy));
        runtime.fail_next(
            RuntimeCall::Remove,
            ContainerError::Runtime("device or resource busy".to_string()),
        );
        let ctl = controller(&runtime, fast_config());

        let op = ctl
            .update(request("web", "nginx:1.27"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(op.status, Status::Failed);
        assert_eq!(op.phase, Phase::Rollback);
        let reason = op.reason.unwrap();
        assert!(reason.starts_with("ambiguous state:"), "{reason}");
        assert!(reason.contains(REASON_UNHEALTHY));
        assert_eq!(runtime.container_count(), 2);
    }
}
