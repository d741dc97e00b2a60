//! Unit tests for provider configuration and request derivation.

use camino::Utf8PathBuf;
use cap_std::{ambient_authority, fs_utf8::Dir};
use gantry::config::{ConfigError, DEFAULT_DISK_IMAGE, DEFAULT_LOGIN_USER, DEFAULT_MACHINE_TYPE};
use gantry::test_support::EnvGuard;
use gantry::{ConnectivityMode, ProviderConfig};
use rstest::*;
use tempfile::TempDir;

#[fixture]
fn valid_config() -> ProviderConfig {
    ProviderConfig {
        project: String::from("acme"),
        zone: String::from("europe-west1-b"),
        machine_id: String::from("box-1"),
        machine_folder: String::from("/var/lib/gantry/box-1"),
        machine_type: String::from(DEFAULT_MACHINE_TYPE),
        disk_size: String::from("40"),
        disk_image: String::from(DEFAULT_DISK_IMAGE),
        network: String::new(),
        subnetwork: String::new(),
        tag: None,
        service_account: None,
        public_ip: true,
        login_user: String::from(DEFAULT_LOGIN_USER),
        ssh_bin: String::from("ssh"),
        gcloud_bin: String::from("gcloud"),
        access_token: None,
        strict_readiness: false,
        fail_fast_on_stop: false,
    }
}

#[rstest]
#[case::project(|cfg: &mut ProviderConfig| cfg.project.clear(), "GANTRY_PROJECT", "project")]
#[case::zone(|cfg: &mut ProviderConfig| cfg.zone.clear(), "GANTRY_ZONE", "zone")]
#[case::machine_id(|cfg: &mut ProviderConfig| cfg.machine_id.clear(), "GANTRY_MACHINE_ID", "machine_id")]
#[case::machine_folder(
    |cfg: &mut ProviderConfig| cfg.machine_folder = String::from("  "),
    "GANTRY_MACHINE_FOLDER",
    "machine_folder"
)]
#[case::machine_type(|cfg: &mut ProviderConfig| cfg.machine_type.clear(), "GANTRY_MACHINE_TYPE", "machine_type")]
#[case::disk_image(|cfg: &mut ProviderConfig| cfg.disk_image.clear(), "GANTRY_DISK_IMAGE", "disk_image")]
#[case::login_user(|cfg: &mut ProviderConfig| cfg.login_user.clear(), "GANTRY_LOGIN_USER", "login_user")]
fn validation_errors_are_actionable(
    valid_config: ProviderConfig,
    #[case] mutate: fn(&mut ProviderConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = valid_config;
    mutate(&mut cfg);

    let error = cfg.validate().expect_err("validation should fail");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error, got {error}");
    };
    assert!(message.contains(env_var), "error should mention env var {env_var}: {message}");
    assert!(message.contains(toml_key), "error should mention TOML key {toml_key}: {message}");
    assert!(message.contains("gantry.toml"), "error should mention config file: {message}");
}

#[rstest]
fn private_instances_need_a_subnetwork(valid_config: ProviderConfig) {
    let cfg = ProviderConfig {
        public_ip: false,
        ..valid_config
    };

    assert_eq!(cfg.validate(), Err(ConfigError::MissingSubnetwork));
}

#[rstest]
fn as_request_carries_every_setting(valid_config: ProviderConfig) {
    let cfg = ProviderConfig {
        public_ip: false,
        subnetwork: String::from("europe-west1/private"),
        tag: Some(String::from("gantry")),
        service_account: Some(String::from("  ")),
        ..valid_config
    };

    let request = cfg.as_request().expect("valid config yields request");

    assert_eq!(request.name, "box-1");
    assert_eq!(request.region(), "europe-west1");
    assert_eq!(request.mode(), ConnectivityMode::Proxied);
    assert_eq!(request.tag.as_deref(), Some("gantry"));
    assert_eq!(request.service_account, None);
    assert_eq!(request.workdir(), "/var/lib/gantry/box-1");
}

#[rstest]
fn malformed_zone_is_reported(valid_config: ProviderConfig) {
    let cfg = ProviderConfig {
        zone: String::from("nowhere"),
        ..valid_config
    };

    let err = cfg.as_request().expect_err("zone without region");
    assert!(matches!(err, ConfigError::Request(_)), "unexpected error: {err}");
}

#[tokio::test]
async fn environment_overrides_defaults() {
    let tmp = TempDir::new().expect("temp dir");
    let folder = tmp.path().join("box-9").to_string_lossy().into_owned();
    let _guard = EnvGuard::set_vars(&[
        ("GANTRY_PROJECT", "acme"),
        ("GANTRY_ZONE", "us-central1-a"),
        ("GANTRY_MACHINE_ID", "box-9"),
        ("GANTRY_MACHINE_FOLDER", folder.as_str()),
        ("GANTRY_MACHINE_TYPE", "a2-highgpu-1g"),
        ("GANTRY_STRICT_READINESS", "true"),
    ])
    .await;

    let cfg = ProviderConfig::load_without_cli_args().expect("configuration loads");

    assert_eq!(cfg.machine_type, "a2-highgpu-1g");
    assert_eq!(cfg.disk_size, "40");
    assert_eq!(cfg.login_user, DEFAULT_LOGIN_USER);
    assert!(cfg.public_ip);
    assert!(cfg.strict_readiness);
    assert_eq!(cfg.as_request().expect("request").zone, "us-central1-a");
}

#[tokio::test]
async fn configuration_file_is_discovered_through_env_path() {
    let tmp = TempDir::new().expect("temp dir");
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp dir should be utf8: {}", path.display()));
    Dir::open_ambient_dir(&root, ambient_authority())
        .expect("open temp dir")
        .write(
            "gantry.toml",
            concat!(
                "project = \"from-file\"\n",
                "zone = \"europe-west4-a\"\n",
                "machine_id = \"box-file\"\n",
                "machine_folder = \"/tmp/box-file\"\n",
                "public_ip = false\n",
                "subnetwork = \"private\"\n",
            ),
        )
        .expect("write config file");
    let path = root.join("gantry.toml");
    let _guard = EnvGuard::set_vars(&[("GANTRY_CONFIG_PATH", path.as_str())]).await;

    let cfg = ProviderConfig::load_without_cli_args().expect("configuration loads");

    assert_eq!(cfg.project, "from-file");
    assert_eq!(cfg.machine_id, "box-file");
    assert!(!cfg.public_ip);
    assert_eq!(cfg.subnetwork, "private");
}
