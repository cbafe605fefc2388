use strand_domain::config::RuntimeConfig;

#[test]
fn defaults_match_documented_values() {
    let config = RuntimeConfig::default();
    assert_eq!(config.max_turns, 25);
    assert_eq!(config.max_tool_executions, 50);
    assert_eq!(config.max_l2_tokens, 5_000);
    assert_eq!(config.llm_call_timeout_ms, 30_000);
    assert_eq!(config.tool_timeout_ms, 60_000);
    assert!(config.retry.enabled);
    assert_eq!(config.retry.max_retries, 3);
    assert!(!config.enable_tracing);
}

#[test]
fn empty_toml_fills_all_defaults() {
    let config: RuntimeConfig = toml::from_str("").unwrap();
    assert_eq!(config.max_turns, 25);
    assert_eq!(config.workload_profile, "balanced");
    assert!(config.memory.max_l1_tokens.is_none());
}

#[test]
fn partial_override_keeps_other_defaults() {
    let config: RuntimeConfig = toml::from_str(
        r#"
max_turns = 5
workload_profile = "data_intensive"

[retry]
enabled = false
"#,
    )
    .unwrap();
    assert_eq!(config.max_turns, 5);
    assert_eq!(config.workload_profile, "data_intensive");
    assert!(!config.retry.enabled);
    // Untouched sections keep defaults.
    assert_eq!(config.max_tool_executions, 50);
    assert_eq!(config.retry.max_retries, 3);
}

#[test]
fn memory_overrides_parse() {
    let config: RuntimeConfig = toml::from_str(
        r#"
[memory]
max_l1_tokens = 8000
min_l1_messages = 4
warning_threshold_pct = 70.0
critical_threshold_pct = 90.0
"#,
    )
    .unwrap();
    assert_eq!(config.memory.max_l1_tokens, Some(8_000));
    assert_eq!(config.memory.min_l1_messages, Some(4));
    assert_eq!(config.memory.warning_threshold_pct, Some(70.0));
}
