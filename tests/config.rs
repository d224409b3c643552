// ABOUTME: Integration tests for drydock.yml loading.
// ABOUTME: Covers file discovery, env overrides, registry credentials, and hook settings.

use drydock::config::{Config, StrategyConfig};
use drydock::error::Error;
use drydock::hooks::HookPoint;
use drydock::types::ImageRef;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const FULL_CONFIG: &str = r#"
state_dir: /srv/drydock
strategy: recreate
call_timeout: 20s
pull_timeout: 10m
stop_timeout: 15s
health:
  timeout: 90s
  interval: 1s
  stable_period: 3s
hooks:
  pre_update: /opt/hooks/backup-db.sh
  rollback: "curl -fsS https://alerts.example/rollback"
  timeout: 45s
backup:
  retention: 5
registries:
  - host: ghcr.io/acme
    username: deploy-bot
    password: ${DRYDOCK_TEST_GHCR_TOKEN}
"#;

mod loading {
    use super::*;

    #[test]
    fn full_config_parses() {
        let config = Config::from_yaml(FULL_CONFIG).unwrap();

        assert_eq!(config.state_dir, PathBuf::from("/srv/drydock"));
        assert_eq!(config.strategy, Some(StrategyConfig::Recreate));
        assert_eq!(config.call_timeout, Duration::from_secs(20));
        assert_eq!(config.pull_timeout, Duration::from_secs(600));
        assert_eq!(config.stop_timeout, Duration::from_secs(15));
        assert_eq!(config.health.timeout, Duration::from_secs(90));
        assert_eq!(config.health.stable_period, Duration::from_secs(3));
        assert_eq!(config.hooks.timeout, Duration::from_secs(45));
        assert_eq!(config.backup.retention, 5);
        assert_eq!(config.registries.len(), 1);
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let err = Config::from_yaml("strategy: blue-green\n").unwrap_err();
        assert!(matches!(err, Error::Yaml(_)));
    }

    #[test]
    fn empty_registry_host_is_rejected() {
        let yaml = "registries:\n  - host: ''\n    username: bot\n    password: pw\n";
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}

mod discovery {
    use super::*;

    #[test]
    fn finds_primary_filename() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("drydock.yml"), "backup:\n  retention: 7\n").unwrap();

        let config = Config::discover(dir.path()).unwrap();
        assert_eq!(config.backup.retention, 7);
    }

    #[test]
    fn finds_yaml_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("drydock.yaml"), "backup:\n  retention: 4\n").unwrap();

        let config = Config::discover(dir.path()).unwrap();
        assert_eq!(config.backup.retention, 4);
    }

    #[test]
    fn finds_dot_directory_config() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".drydock")).unwrap();
        fs::write(
            dir.path().join(".drydock/config.yml"),
            "strategy: side-by-side\n",
        )
        .unwrap();

        let config = Config::discover(dir.path()).unwrap();
        assert_eq!(config.strategy, Some(StrategyConfig::SideBySide));
    }

    #[test]
    fn primary_filename_wins() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("drydock.yml"), "backup:\n  retention: 1\n").unwrap();
        fs::write(dir.path().join("drydock.yaml"), "backup:\n  retention: 9\n").unwrap();

        assert_eq!(Config::discover(dir.path()).unwrap().backup.retention, 1);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::discover(dir.path()).unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound(_)));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::discover_or_default(dir.path()).unwrap();
        assert_eq!(config.backup.retention, 3);
        assert!(config.hooks.pre_update.is_none());
    }

    #[test]
    fn broken_file_is_still_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("drydock.yml"), "health: [oops").unwrap();
        assert!(Config::discover_or_default(dir.path()).is_err());
    }
}

mod environment {
    use super::*;

    #[test]
    fn state_dir_env_overrides_file() {
        temp_env::with_var("DRYDOCK_STATE_DIR", Some("/tmp/drydock-state"), || {
            let config = Config::from_yaml(FULL_CONFIG).unwrap().with_env_overrides();
            assert_eq!(config.state_dir, PathBuf::from("/tmp/drydock-state"));
        });
    }

    #[test]
    fn empty_state_dir_env_is_ignored() {
        temp_env::with_var("DRYDOCK_STATE_DIR", Some(""), || {
            let config = Config::from_yaml(FULL_CONFIG).unwrap().with_env_overrides();
            assert_eq!(config.state_dir, PathBuf::from("/srv/drydock"));
        });
    }
}

mod credentials {
    use super::*;

    fn image(s: &str) -> ImageRef {
        ImageRef::parse(s).unwrap()
    }

    #[test]
    fn matching_registry_resolves_env_password() {
        temp_env::with_var("DRYDOCK_TEST_GHCR_TOKEN", Some("s3cret"), || {
            let config = Config::from_yaml(FULL_CONFIG).unwrap();
            let auth = config
                .credentials_for(&image("ghcr.io/acme/api:2.1"))
                .unwrap()
                .unwrap();
            assert_eq!(auth.username, "deploy-bot");
            assert_eq!(auth.password, "s3cret");
            assert_eq!(auth.server, "ghcr.io");
        });
    }

    #[test]
    fn other_registries_pull_anonymously() {
        let config = Config::from_yaml(FULL_CONFIG).unwrap();
        assert!(
            config
                .credentials_for(&image("nginx:1.27"))
                .unwrap()
                .is_none()
        );
        assert!(
            config
                .credentials_for(&image("ghcr.io/other/api:2"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn unset_password_variable_is_an_error() {
        temp_env::with_var_unset("DRYDOCK_TEST_GHCR_TOKEN", || {
            let config = Config::from_yaml(FULL_CONFIG).unwrap();
            let err = config
                .credentials_for(&image("ghcr.io/acme/api:2.1"))
                .unwrap_err();
            assert!(matches!(err, Error::MissingEnvVar(ref v) if v == "DRYDOCK_TEST_GHCR_TOKEN"));
        });
    }
}

mod hooks {
    use super::*;

    #[test]
    fn configured_commands_resolve_per_point() {
        let config = Config::from_yaml(FULL_CONFIG).unwrap();
        let none = BTreeMap::new();

        assert_eq!(
            config.hooks.command_for(HookPoint::PreUpdate, &none).as_deref(),
            Some("/opt/hooks/backup-db.sh")
        );
        assert_eq!(config.hooks.command_for(HookPoint::PostUpdate, &none), None);
        assert!(
            config
                .hooks
                .command_for(HookPoint::Rollback, &none)
                .is_some()
        );
    }

    #[test]
    fn container_labels_take_precedence() {
        let config = Config::from_yaml(FULL_CONFIG).unwrap();
        let labels: BTreeMap<String, String> = [
            ("drydock.hook.post-update", "/opt/hooks/warm-cache.sh"),
            ("drydock.hook.pre-update", ""),
            ("drydock.hook.timeout", "2m"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        assert_eq!(config.hooks.command_for(HookPoint::PreUpdate, &labels), None);
        assert_eq!(
            config
                .hooks
                .command_for(HookPoint::PostUpdate, &labels)
                .as_deref(),
            Some("/opt/hooks/warm-cache.sh")
        );
        assert_eq!(config.hooks.timeout_for(&labels), Duration::from_secs(120));
    }
}
