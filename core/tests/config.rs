//! Configuration loading and validation. Every failure here happens
//! before a single record is read.

use callfraud_core::{
    config::{BillingTieBreak, PipelineConfig, TimeBucket},
    error::EtlError,
};

fn write_config(content: &str) -> String {
    let path = std::env::temp_dir().join(format!("{}-pipeline.json", uuid::Uuid::new_v4()));
    std::fs::write(&path, content).expect("write temp config");
    path.to_string_lossy().to_string()
}

#[test]
fn shipped_config_loads() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../data/pipeline.json");
    let config = PipelineConfig::load(path).expect("shipped config is valid");
    assert_eq!(config.time_bucket, TimeBucket::Day);
    assert_eq!(config.billing_tie_break, BillingTieBreak::LowestAmount);
    assert_eq!(config.region_of("anyone").map(String::as_str), Some("us"));
    assert!(config.is_premium("premium_rate"));
    assert!(config.mask_counterparties);
}

#[test]
fn missing_granularity_is_reported_by_field() {
    let path = write_config(r#"{ "premium_service_types": ["premium"] }"#);
    let err = PipelineConfig::load(&path).expect_err("must fail");
    let _ = std::fs::remove_file(&path);
    match err.downcast_ref::<EtlError>() {
        Some(EtlError::Configuration { field, .. }) => {
            assert_eq!(field, "time_bucket_granularity")
        }
        other => panic!("expected configuration error, got {other:?}"),
    }
}

#[test]
fn unknown_granularity_is_rejected() {
    let path = write_config(r#"{ "time_bucket_granularity": "fortnight" }"#);
    let err = PipelineConfig::load(&path).expect_err("must fail");
    let _ = std::fs::remove_file(&path);
    assert!(matches!(
        err.downcast_ref::<EtlError>(),
        Some(EtlError::Configuration { .. })
    ));
}

#[test]
fn negative_baselines_are_rejected() {
    let mut config = PipelineConfig::default_test();
    config.baselines.insert("A".into(), -0.1);
    assert!(config.validate().is_err());
}

#[test]
fn empty_prefix_list_is_rejected() {
    let mut config = PipelineConfig::default_test();
    config.international_prefixes.clear();
    assert!(config.validate().is_err());

    config.international_prefixes = vec!["".into()];
    assert!(config.validate().is_err());
}

#[test]
fn non_numeric_dialing_codes_are_rejected() {
    let mut config = PipelineConfig::default_test();
    if let Some(region) = config.regions.get_mut("uk") {
        region.dialing_code = "+44".into();
    }
    assert!(config.validate().is_err());
}

#[test]
fn missing_file_is_an_error() {
    assert!(PipelineConfig::load("/nonexistent/pipeline.json").is_err());
}

#[test]
fn merged_baselines_are_validated_on_merge() {
    let config = PipelineConfig::default_test()
        .with_baselines([("A".to_string(), 0.10)])
        .expect("valid baselines merge");
    assert_eq!(config.baselines.get("A"), Some(&0.10));

    match config.with_baselines([("B".to_string(), -1.0)]) {
        Err(EtlError::Configuration { field, .. }) => assert_eq!(field, "baselines"),
        other => panic!("expected configuration error, got {other:?}"),
    }
}
