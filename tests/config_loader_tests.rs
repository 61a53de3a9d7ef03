use adsync::config::{ConfigError, ConfigLoader};
use std::{
    env, fs,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

const VALID_KEY: &str = "YWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWE=";

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    unsafe {
        for (key, _) in env::vars() {
            if key.starts_with("ADSYNC_") {
                env::remove_var(key);
            }
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    fs::write(dir.path().join(name), contents).unwrap();
}

#[test]
fn loads_defaults_with_only_a_crypto_key() {
    let _guard = env_guard();
    clear_env();
    let dir = TempDir::new().unwrap();
    write_env_file(&dir, ".env", &format!("ADSYNC_CRYPTO_KEY={VALID_KEY}\n"));

    let cfg = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.scheduler.tick_interval_seconds, 60);
    assert_eq!(cfg.scheduler.utc_offset_minutes, 0);
    assert_eq!(cfg.sync.retry_max_attempts, 3);
    assert_eq!(cfg.sync.retry_base_delay_ms, 5_000);
    assert_eq!(cfg.crypto_key.as_ref().map(Vec::len), Some(32));
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();
    let dir = TempDir::new().unwrap();

    write_env_file(
        &dir,
        ".env",
        &format!("ADSYNC_CRYPTO_KEY={VALID_KEY}\nADSYNC_SCHEDULER_WORKERS=2\n"),
    );
    write_env_file(
        &dir,
        ".env.local",
        "ADSYNC_PROFILE=test\nADSYNC_SCHEDULER_WORKERS=3\n",
    );
    write_env_file(&dir, ".env.test", "ADSYNC_SCHEDULER_WORKERS=5\n");
    write_env_file(
        &dir,
        ".env.test.local",
        "ADSYNC_SCHEDULER_WORKERS=7\nADSYNC_SCHEDULER_UTC_OFFSET_MINUTES=-300\n",
    );

    let cfg = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .expect("layered config loads");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.scheduler.workers, 7);
    assert_eq!(cfg.scheduler.utc_offset_minutes, -300);
    clear_env();
}

#[test]
fn process_environment_wins_over_files() {
    let _guard = env_guard();
    clear_env();
    let dir = TempDir::new().unwrap();
    write_env_file(
        &dir,
        ".env",
        &format!("ADSYNC_CRYPTO_KEY={VALID_KEY}\nADSYNC_SYNC_RETRY_MAX_ATTEMPTS=5\n"),
    );
    unsafe {
        env::set_var("ADSYNC_SYNC_RETRY_MAX_ATTEMPTS", "2");
    }

    let cfg = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .expect("config loads");

    assert_eq!(cfg.sync.retry_max_attempts, 2);
    clear_env();
}

#[test]
fn rejects_malformed_numbers_and_short_keys() {
    let _guard = env_guard();
    clear_env();
    let dir = TempDir::new().unwrap();
    write_env_file(
        &dir,
        ".env",
        &format!("ADSYNC_CRYPTO_KEY={VALID_KEY}\nADSYNC_SCHEDULER_WORKERS=many\n"),
    );
    let err = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "SCHEDULER_WORKERS"));

    let dir = TempDir::new().unwrap();
    write_env_file(&dir, ".env", "ADSYNC_CRYPTO_KEY=c2hvcnQ=\n");
    let err = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidCryptoKeyLength { length: 5 }));
    clear_env();
}

#[test]
fn production_profile_requires_warehouse_project() {
    let _guard = env_guard();
    clear_env();
    let dir = TempDir::new().unwrap();
    write_env_file(
        &dir,
        ".env",
        &format!("ADSYNC_PROFILE=prod\nADSYNC_CRYPTO_KEY={VALID_KEY}\n"),
    );

    let err = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigError::MissingWarehouseProject));
    clear_env();
}

#[test]
fn redacted_json_masks_secrets() {
    let _guard = env_guard();
    clear_env();
    let dir = TempDir::new().unwrap();
    write_env_file(
        &dir,
        ".env",
        &format!(
            "ADSYNC_CRYPTO_KEY={VALID_KEY}\nADSYNC_GOOGLE_CLIENT_SECRET=very-secret\nADSYNC_GOOGLE_ADS_DEVELOPER_TOKEN=dev-token\n"
        ),
    );

    let cfg = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .expect("config loads");
    let rendered = cfg.redacted_json().unwrap();

    assert!(!rendered.contains("very-secret"));
    assert!(!rendered.contains("dev-token"));
    clear_env();
}
