use std::cell::RefCell;
use std::path::Path;
use std::time::Duration;

use stackpilot::cron::BackupSchedule;
use stackpilot::envfile::EnvFile;
use stackpilot::error::{DeployError, DeployResult};
use stackpilot::pipeline::{BackupOptions, InstallOptions, LoginOptions, Pipeline, ScaleOptions};
use stackpilot::prompt::{Console, Unattended};
use stackpilot::rollout::{RolloutSettings, Sleeper};
use stackpilot::runtime::ContainerRuntime;
use stackpilot::snapshot::SnapshotManager;
use stackpilot::workdir::Paths;
use stackpilot::{RoleChoice, TopologyPattern};

#[derive(Default)]
struct FakeRuntime {
    calls: RefCell<Vec<String>>,
    /// When set, the only password the registry accepts.
    login_password: Option<&'static str>,
}

impl FakeRuntime {
    fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }
}

impl ContainerRuntime for FakeRuntime {
    fn pull(&self) -> DeployResult<()> {
        self.record("pull".into());
        Ok(())
    }

    fn up(&self) -> DeployResult<()> {
        self.record("up".into());
        Ok(())
    }

    fn instances(&self, service: &str) -> DeployResult<Vec<String>> {
        self.record(format!("instances {service}"));
        Ok(vec![format!("{service}-1"), format!("{service}-2")])
    }

    fn restart_instance(&self, id: &str) -> DeployResult<()> {
        self.record(format!("restart {id}"));
        Ok(())
    }

    fn health(&self, service: &str) -> DeployResult<Vec<String>> {
        self.record(format!("health {service}"));
        Ok(vec!["healthy".into()])
    }

    fn login(&self, registry: &str, user: &str, password: &str) -> DeployResult<()> {
        self.record(format!("login {registry} {user}"));
        if self.login_password.is_some_and(|accepted| accepted != password) {
            return Err(DeployError::RegistryLogin(format!("{registry}: denied")));
        }
        Ok(())
    }
}

struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep(&self, _duration: Duration) {}
}

fn settings() -> RolloutSettings {
    RolloutSettings {
        settle_delay: Duration::ZERO,
        health_interval: Duration::ZERO,
        health_attempts: 2,
    }
}

fn single_node() -> InstallOptions {
    InstallOptions {
        pattern: Some(TopologyPattern::SingleNode),
        domain: Some("example.com".into()),
        email: Some("ops@example.com".into()),
        peak_users: Some(10_000),
        ..InstallOptions::default()
    }
}

fn install(dir: &Path, opts: &InstallOptions, runtime: &FakeRuntime) -> DeployResult<()> {
    let mut prompter = Unattended;
    Pipeline::new(Paths::new(dir), &mut prompter, runtime, &NoSleep)
        .settings(settings())
        .install(opts)
        .map(drop)
}

fn env(dir: &Path) -> EnvFile {
    EnvFile::load(&dir.join(".env")).unwrap().unwrap()
}

#[test]
fn single_node_install() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::default();

    install(tmp.path(), &single_node(), &runtime).unwrap();

    let env = env(tmp.path());
    assert_eq!(env.get("COMPOSE_PROFILES"), Some("app,data,edge"));
    assert_eq!(env.get("CLIENT_DOMAIN"), Some("app.example.com"));
    assert_eq!(env.get("WEB_REPLICAS"), Some("10"));
    assert_eq!(env.get("POSTGRES_PASSWORD").map(str::len), Some(32));
    assert!(tmp.path().join("docker-compose.yml").is_file());
    assert!(tmp.path().join("Caddyfile").is_file());
    assert_eq!(runtime.calls(), ["pull", "up", "health api"]);
}

#[test]
fn reinstall_reuses_secrets_and_snapshots_once() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::default();

    install(tmp.path(), &single_node(), &runtime).unwrap();
    let password = env(tmp.path()).get("POSTGRES_PASSWORD").map(str::to_string);
    install(tmp.path(), &single_node(), &runtime).unwrap();
    install(tmp.path(), &single_node(), &runtime).unwrap();

    assert_eq!(
        env(tmp.path()).get("POSTGRES_PASSWORD").map(str::to_string),
        password
    );
    let snapshots = SnapshotManager::new(&tmp.path().join("snapshots"), 3);
    assert_eq!(snapshots.list().unwrap().len(), 1);
}

#[test]
fn reinstall_over_invalid_env_keeps_secrets() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::default();
    install(tmp.path(), &single_node(), &runtime).unwrap();

    let mut edited = env(tmp.path());
    let password = edited.get("POSTGRES_PASSWORD").map(str::to_string);
    edited.set("WEB_REPLICAS", "1");
    std::fs::write(tmp.path().join(".env"), edited.render()).unwrap();

    let err = install(tmp.path(), &single_node(), &runtime).unwrap_err();

    assert!(matches!(err, DeployError::InvalidInput(_)));
    let after = env(tmp.path());
    assert_eq!(after.get("POSTGRES_PASSWORD").map(str::to_string), password);
    assert_eq!(after.get("WEB_REPLICAS"), Some("1"));
}

#[test]
fn app_node_without_data_passwords_writes_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::default();
    let opts = InstallOptions {
        pattern: Some(TopologyPattern::ThreeNode),
        role: Some(RoleChoice::App),
        data_host: Some("10.0.0.2".into()),
        ..single_node()
    };

    let err = install(tmp.path(), &opts, &runtime).unwrap_err();

    assert!(matches!(err, DeployError::RequiredField(ref f) if f == "POSTGRES_PASSWORD"));
    assert!(!tmp.path().join(".env").exists());
    assert!(runtime.calls().is_empty());
}

#[test]
fn data_node_ignores_edge_flag() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::default();
    let opts = InstallOptions {
        pattern: Some(TopologyPattern::TwoNode),
        role: Some(RoleChoice::Data),
        edge: Some(true),
        ..InstallOptions::default()
    };

    install(tmp.path(), &opts, &runtime).unwrap();

    assert_eq!(env(tmp.path()).get("COMPOSE_PROFILES"), Some("data"));
    assert!(!tmp.path().join("Caddyfile").exists());
    assert_eq!(runtime.calls(), ["pull", "up", "health postgres"]);
}

#[test]
fn skip_apply_only_writes() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::default();
    let opts = InstallOptions {
        skip_apply: true,
        ..single_node()
    };

    install(tmp.path(), &opts, &runtime).unwrap();

    assert!(tmp.path().join(".env").is_file());
    assert!(runtime.calls().is_empty());
}

#[test]
fn scale_rewrites_replicas_without_pulling() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::default();
    install(tmp.path(), &single_node(), &runtime).unwrap();

    let mut prompter = Unattended;
    let config = Pipeline::new(Paths::new(tmp.path()), &mut prompter, &runtime, &NoSleep)
        .settings(settings())
        .scale(&ScaleOptions {
            peak_users: Some(20_000),
            ..ScaleOptions::default()
        })
        .unwrap();

    assert_eq!(config.replicas.web, 20);
    assert_eq!(env(tmp.path()).get("WEB_REPLICAS"), Some("20"));
    assert_eq!(env(tmp.path()).get("PEAK_ACTIVE_USERS"), Some("20000"));
    assert_eq!(&runtime.calls()[3..], ["up", "health api"]);
}

#[test]
fn scale_overrides_must_respect_floors() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::default();
    install(tmp.path(), &single_node(), &runtime).unwrap();

    let mut prompter = Unattended;
    let result = Pipeline::new(Paths::new(tmp.path()), &mut prompter, &runtime, &NoSleep)
        .scale(&ScaleOptions {
            web: Some(1),
            ..ScaleOptions::default()
        });

    assert!(matches!(result, Err(DeployError::InvalidInput(_))));
}

#[test]
fn update_requires_install() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::default();
    let mut prompter = Unattended;

    let result = Pipeline::new(Paths::new(tmp.path()), &mut prompter, &runtime, &NoSleep).update();

    assert!(matches!(result, Err(DeployError::FileNotFound(_))));
}

#[test]
fn backup_configure_persists_schedule() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::default();
    install(tmp.path(), &single_node(), &runtime).unwrap();

    let mut prompter = Unattended;
    Pipeline::new(Paths::new(tmp.path()), &mut prompter, &runtime, &NoSleep)
        .backup_configure(&BackupOptions {
            retention: Some(5),
            at: Some(BackupSchedule::new(2, 30).unwrap()),
            skip_cron: true,
        })
        .unwrap();

    let env = env(tmp.path());
    assert_eq!(env.get("SNAPSHOT_RETENTION"), Some("5"));
    assert_eq!(env.get("BACKUP_SCHEDULE"), Some("02:30"));
}

#[test]
fn backup_retention_out_of_range() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::default();
    install(tmp.path(), &single_node(), &runtime).unwrap();

    let mut prompter = Unattended;
    let result = Pipeline::new(Paths::new(tmp.path()), &mut prompter, &runtime, &NoSleep)
        .backup_configure(&BackupOptions {
            retention: Some(51),
            skip_cron: true,
            ..BackupOptions::default()
        });

    assert!(matches!(result, Err(DeployError::InvalidInput(_))));
}

#[test]
fn registry_login_persists_host_and_user_only() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::default();
    install(tmp.path(), &single_node(), &runtime).unwrap();

    let mut prompter = Unattended;
    let logged_in = Pipeline::new(Paths::new(tmp.path()), &mut prompter, &runtime, &NoSleep)
        .registry_login(&LoginOptions {
            registry: Some("ghcr.io".into()),
            user: Some("deployer".into()),
            password: Some("token-123".into()),
        })
        .unwrap();

    assert!(logged_in);
    let content = std::fs::read_to_string(tmp.path().join(".env")).unwrap();
    assert!(content.contains("REGISTRY=ghcr.io"));
    assert!(content.contains("REGISTRY_USER=deployer"));
    assert!(!content.contains("token-123"));
}

#[test]
fn registry_login_failure_is_fatal_when_unattended() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime {
        login_password: Some("token-456"),
        ..FakeRuntime::default()
    };

    let mut prompter = Unattended;
    let result = Pipeline::new(Paths::new(tmp.path()), &mut prompter, &runtime, &NoSleep)
        .registry_login(&LoginOptions {
            registry: Some("ghcr.io".into()),
            user: Some("deployer".into()),
            password: Some("wrong".into()),
        });

    assert!(matches!(result, Err(DeployError::RegistryLogin(_))));
    assert_eq!(runtime.calls(), ["login ghcr.io deployer"]);
}

fn login_as_deployer(password: &str) -> LoginOptions {
    LoginOptions {
        registry: Some("ghcr.io".into()),
        user: Some("deployer".into()),
        password: Some(password.into()),
    }
}

#[test]
fn registry_login_failure_can_be_skipped() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime {
        login_password: Some("token-456"),
        ..FakeRuntime::default()
    };
    install(tmp.path(), &single_node(), &runtime).unwrap();

    let mut prompter = Console::new(&b"2\n"[..], Vec::new());
    let logged_in = Pipeline::new(Paths::new(tmp.path()), &mut prompter, &runtime, &NoSleep)
        .registry_login(&login_as_deployer("wrong"))
        .unwrap();

    assert!(!logged_in);
    assert_eq!(runtime.calls().iter().filter(|c| c.starts_with("login")).count(), 1);
    assert!(env(tmp.path()).get_nonempty("REGISTRY").is_none());
}

#[test]
fn registry_login_retry_asks_for_a_new_password() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime {
        login_password: Some("token-456"),
        ..FakeRuntime::default()
    };
    install(tmp.path(), &single_node(), &runtime).unwrap();

    let mut prompter = Console::new(&b"1\ntoken-456\n"[..], Vec::new());
    let logged_in = Pipeline::new(Paths::new(tmp.path()), &mut prompter, &runtime, &NoSleep)
        .registry_login(&login_as_deployer("wrong"))
        .unwrap();

    assert!(logged_in);
    let logins: Vec<String> = runtime
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("login"))
        .collect();
    assert_eq!(logins, ["login ghcr.io deployer", "login ghcr.io deployer"]);
    let env = env(tmp.path());
    assert_eq!(env.get("REGISTRY_USER"), Some("deployer"));
    assert!(!std::fs::read_to_string(tmp.path().join(".env")).unwrap().contains("token-456"));
}

#[test]
fn registry_login_retry_needs_a_password() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime {
        login_password: Some("token-456"),
        ..FakeRuntime::default()
    };

    let mut prompter = Console::new(&b"1\n\n"[..], Vec::new());
    let result = Pipeline::new(Paths::new(tmp.path()), &mut prompter, &runtime, &NoSleep)
        .registry_login(&login_as_deployer("wrong"));

    assert!(matches!(result, Err(DeployError::RequiredField(_))));
}

#[test]
fn restart_goes_replica_by_replica() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::default();
    let mut prompter = Unattended;

    let restarted = Pipeline::new(Paths::new(tmp.path()), &mut prompter, &runtime, &NoSleep)
        .restart("api")
        .unwrap();

    assert_eq!(restarted, 2);
    assert_eq!(runtime.calls(), ["instances api", "restart api-1", "restart api-2"]);
}
