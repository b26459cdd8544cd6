use super::*;

#[test]
fn defaults_match_the_documented_tunables() {
    let settings = Settings::default();
    assert_eq!(settings.tolerance, 8);
    assert_eq!(settings.confidence_threshold, 60);
    assert_eq!(settings.parallel, None);
}

#[test]
fn file_settings_accept_partial_tables() {
    let file_cfg: FileSettings = toml::from_str("tolerance = 12\n").expect("valid toml");
    assert_eq!(file_cfg.tolerance, Some(12));
    assert_eq!(file_cfg.confidence_threshold, None);
    assert_eq!(file_cfg.parallel, None);

    let file_cfg: FileSettings =
        toml::from_str("confidence_threshold = 75\nparallel = 4\n").expect("valid toml");
    assert_eq!(file_cfg.confidence_threshold, Some(75));
    assert_eq!(file_cfg.parallel, Some(4));
}

#[test]
fn malformed_file_settings_fail_to_parse() {
    assert!(toml::from_str::<FileSettings>("tolerance = \"wide\"\n").is_err());
}

#[test]
fn environment_overrides_win_over_defaults() {
    std::env::set_var("APP__TOLERANCE", "3");
    std::env::set_var("APP__CONFIDENCE_THRESHOLD", "90");
    std::env::set_var("APP__PARALLEL", "2");

    let settings = load_settings();

    std::env::remove_var("APP__TOLERANCE");
    std::env::remove_var("APP__CONFIDENCE_THRESHOLD");
    std::env::remove_var("APP__PARALLEL");

    assert_eq!(settings.tolerance, 3);
    assert_eq!(settings.confidence_threshold, 90);
    assert_eq!(settings.parallel, Some(2));
}
