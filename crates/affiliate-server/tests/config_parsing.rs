use std::{env, fs};

use affiliate_server::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    // Create a temporary TOML configuration file
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("affiliate.toml");

    let toml_content = r#"
[server]
host = "127.0.0.1"
port = 8081
cors_origins = ["https://wallet.example.com"]

[affiliate]
commission_rate = 0.05
default_ico_id = "presale"
data_file_path = "data/affiliates.json"

[external_service]
main_server_url = "https://ico.example.com"
request_timeout_secs = 2.5

[cache]
metrics_ttl_secs = 15

[logging]
level = "debug"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses, unspecified keys keep their defaults
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.server.port, 8081);
    assert_eq!(cfg.server.cors_origins, vec!["https://wallet.example.com"]);
    assert_eq!(cfg.affiliate.commission_rate, 0.05);
    assert_eq!(cfg.affiliate.default_ico_id, "presale");
    let ext = cfg.external_service.as_ref().expect("external service");
    assert_eq!(ext.base_url(), "https://ico.example.com");
    assert_eq!(ext.request_timeout_secs, 2.5);
    assert_eq!(ext.max_retries, 3);
    assert_eq!(cfg.cache.metrics_ttl_secs, 15);
    assert_eq!(cfg.cache.affiliate_ttl_secs, 300);
    assert_eq!(cfg.logging.level.to_ascii_lowercase(), "debug");

    // 2) Structured env override should win over file
    unsafe {
        env::set_var("AFFILIATE__AFFILIATE__DEFAULT_ICO_ID", "public_sale");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.affiliate.default_ico_id, "public_sale");
    unsafe {
        env::remove_var("AFFILIATE__AFFILIATE__DEFAULT_ICO_ID");
    }

    // 3) Flat legacy variables are honoured too
    unsafe {
        env::set_var("COMMISSION_RATE", "0.2");
        env::set_var("FLASK_PORT", "5050");
        env::set_var("MAIN_SERVER_URL", "http://localhost:5000");
    }
    let cfg_flat = load_config(path.to_str()).expect("should parse config with flat overrides");
    assert_eq!(cfg_flat.affiliate.commission_rate, 0.2);
    assert_eq!(cfg_flat.server.port, 5050);
    assert_eq!(
        cfg_flat.external_service.as_ref().map(|e| e.main_server_url.as_str()),
        Some("http://localhost:5000")
    );
    unsafe {
        env::remove_var("COMMISSION_RATE");
        env::remove_var("FLASK_PORT");
        env::remove_var("MAIN_SERVER_URL");
    }

    // 4) Missing file means defaults
    let defaults = load_config(dir.path().join("absent.toml").to_str()).expect("defaults");
    assert_eq!(defaults.server.port, 5002);
    assert!(defaults.external_service.is_none());

    // 5) Invalid config should error
    let invalid_path = dir.path().join("invalid.toml");
    let invalid_toml = r#"
[affiliate]
commission_rate = 1.5
"#;
    fs::write(&invalid_path, invalid_toml).expect("write invalid toml");
    let err = load_config(invalid_path.to_str()).expect_err("expected validation error");
    assert!(err.contains("commission_rate"));

    let bad_url_path = dir.path().join("bad_url.toml");
    fs::write(
        &bad_url_path,
        "[external_service]\nmain_server_url = \"ftp://ico.example.com\"\n",
    )
    .expect("write bad url toml");
    let err = load_config(bad_url_path.to_str()).expect_err("expected url error");
    assert!(err.contains("main_server_url"));
}
