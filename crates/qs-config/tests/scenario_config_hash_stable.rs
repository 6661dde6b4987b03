//! The config hash depends on content only: repeated loads and key
//! reordering give the same hash, a changed value gives a different one.

use qs_config::load_layered_yaml_from_strings;

const BASE_YAML: &str = r#"
risk:
  daily_loss_limit: 0.05
  max_drawdown: 0.20
backtest:
  symbols: ["BTC/USD", "ETH/USD"]
  initial_capital: 100000
"#;

const BASE_YAML_REORDERED: &str = r#"
backtest:
  initial_capital: 100000
  symbols: ["BTC/USD", "ETH/USD"]
risk:
  max_drawdown: 0.20
  daily_loss_limit: 0.05
"#;

const OVERLAY_YAML: &str = r#"
risk:
  daily_loss_limit: 0.02
"#;

#[test]
fn same_input_same_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
    assert_eq!(a.config_hash.len(), 64);
}

#[test]
fn key_order_does_not_change_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
}

#[test]
fn overlay_changes_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_ne!(a.config_hash, b.config_hash);
    assert_eq!(b.config_json["risk"]["daily_loss_limit"], 0.02);
}

#[test]
fn literal_secret_is_refused() {
    let yaml = "data:\n  api_key: \"sk-live-abc123secretvalue\"\n";
    let err = load_layered_yaml_from_strings(&[yaml]).unwrap_err();
    assert!(err.to_string().contains("CONFIG_SECRET_DETECTED"));
}
