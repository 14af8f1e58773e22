use reactive_scope_config::{
    get_config_from_str, DebounceOptions, RuntimeOptions,
};
use std::time::Duration;

#[test]
fn defaults_match_tuned_constants() {
    let options = RuntimeOptions::default();
    assert_eq!(options.handoff_grace(), Duration::from_millis(100));
    assert_eq!(options.frame_interval(), Duration::from_millis(16));
    assert_eq!(options.debounce.wait(), Duration::from_millis(100));
    assert_eq!(options.debounce.max_wait(), Duration::from_millis(1000));
    assert!(options.debounce.leading);
    assert!(options.debounce.trailing);
    assert_eq!(options.notification.default_ms, 3000);
    assert_eq!(options.notification.error_ms, 5000);
    assert_eq!(options.cache.save_debounce_ms, 1000);
}

const CONFIG_OK: &str = r#"
handoff-grace-ms = 250
frame-interval-ms = 33

[debounce]
wait-ms = 50
leading = false

[cache]
max-size = 1024
"#;

#[test]
fn config_from_str_overrides_given_keys() {
    let options = get_config_from_str(CONFIG_OK).unwrap();
    assert_eq!(options.handoff_grace_ms, 250);
    assert_eq!(options.frame_interval_ms, 33);
    assert_eq!(
        options.debounce,
        DebounceOptions::builder().wait_ms(50).leading(false).build()
    );
    assert_eq!(options.cache.max_size, 1024);
    assert_eq!(options.cache.save_debounce_ms, 1000);
    assert_eq!(options.notification.error_ms, 5000);
}

#[test]
fn config_from_str_rejects_invalid_toml() {
    assert!(get_config_from_str("- invalid toml -").is_err());
}

#[test]
fn config_from_env() {
    let options = temp_env::with_vars(
        [
            ("REACTIVE_SCOPE_HANDOFF_GRACE_MS", Some("300")),
            ("REACTIVE_SCOPE_DEBOUNCE_MAX_WAIT_MS", Some("2000")),
            ("REACTIVE_SCOPE_DEBOUNCE_TRAILING", Some("false")),
            ("REACTIVE_SCOPE_FRAME_INTERVAL_MS", None),
        ],
        || RuntimeOptions::try_from_env().unwrap(),
    );
    assert_eq!(options.handoff_grace_ms, 300);
    assert_eq!(options.debounce.max_wait_ms, 2000);
    assert!(!options.debounce.trailing);
    assert!(options.debounce.leading);
    assert_eq!(options.frame_interval_ms, 16);
}

#[test]
fn config_from_env_rejects_garbage() {
    let result = temp_env::with_var(
        "REACTIVE_SCOPE_HANDOFF_GRACE_MS",
        Some("a while"),
        RuntimeOptions::try_from_env,
    );
    assert!(result.is_err());
}
