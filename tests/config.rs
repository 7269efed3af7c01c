use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use px_harvest::config::{Config, ConfigLoader, Overrides, Settings};
use px_harvest::domain::RepositoryStrategy;
use px_harvest::error::HarvestError;
use px_harvest::providers::MatchMode;

fn keyword(value: &str) -> Overrides {
    Overrides {
        keyword: Some(value.to_string()),
        ..Overrides::default()
    }
}

#[test]
fn defaults_apply_without_config() {
    let settings = Settings::resolve(Config::default(), keyword("cancer")).unwrap();
    assert_eq!(settings.keyword, "cancer");
    assert_eq!(
        settings.output_path,
        Utf8PathBuf::from("data/proteomexchange_data.xlsx")
    );
    assert_eq!(settings.sheet_name, "ProteomeXchange Datasets");
    assert_eq!(settings.workers, 5);
    assert_eq!(settings.max_datasets, None);
    assert_eq!(settings.timeout, Duration::from_secs(30));
    assert_eq!(settings.max_attempts, 3);
    assert!(settings.headless);
    assert!(settings.use_browser);
    assert!(!settings.skip_stats);
    assert!(settings.xml_fallback_chain);
    assert_eq!(settings.matcher.mode(), MatchMode::Contains);
}

#[test]
fn cli_overrides_win_over_file_values() {
    let config = Config {
        keyword: Some("liver".to_string()),
        workers: Some(3),
        max_datasets: Some(50),
        output: Some("from_file.xlsx".to_string()),
        headless: Some(true),
        ..Config::default()
    };
    let overrides = Overrides {
        keyword: Some("kidney".to_string()),
        workers: Some(8),
        output: Some("cli.csv".to_string()),
        output_dir: Some("exports".to_string()),
        show_browser: true,
        ..Overrides::default()
    };
    let settings = Settings::resolve(config, overrides).unwrap();
    assert_eq!(settings.keyword, "kidney");
    assert_eq!(settings.workers, 8);
    assert_eq!(settings.max_datasets, Some(50));
    assert_eq!(settings.output_path, Utf8PathBuf::from("exports/cli.csv"));
    assert!(!settings.headless);
}

#[test]
fn blank_keyword_is_rejected() {
    assert_matches!(
        Settings::resolve(Config::default(), keyword("   ")),
        Err(HarvestError::MissingKeyword)
    );
    assert_matches!(
        Settings::resolve(Config::default(), Overrides::default()),
        Err(HarvestError::MissingKeyword)
    );
}

#[test]
fn worker_count_must_be_in_range() {
    for workers in [0, 21] {
        let overrides = Overrides {
            workers: Some(workers),
            ..keyword("cancer")
        };
        assert_matches!(
            Settings::resolve(Config::default(), overrides),
            Err(HarvestError::InvalidWorkerCount { value, min: 1, max: 20 }) if value == workers
        );
    }
    let overrides = Overrides {
        workers: Some(20),
        ..keyword("cancer")
    };
    assert!(Settings::resolve(Config::default(), overrides).is_ok());
}

#[test]
fn zero_limits_and_long_sheet_names_are_invalid() {
    let zero_cap = Overrides {
        max_datasets: Some(0),
        ..keyword("cancer")
    };
    assert_matches!(
        Settings::resolve(Config::default(), zero_cap),
        Err(HarvestError::InvalidConfig(_))
    );

    let zero_attempts = Overrides {
        max_attempts: Some(0),
        ..keyword("cancer")
    };
    assert_matches!(
        Settings::resolve(Config::default(), zero_attempts),
        Err(HarvestError::InvalidConfig(_))
    );

    let long_sheet = Config {
        sheet_name: Some("x".repeat(32)),
        ..Config::default()
    };
    assert_matches!(
        Settings::resolve(long_sheet, keyword("cancer")),
        Err(HarvestError::InvalidConfig(_))
    );
}

#[test]
fn stats_settings_do_not_need_a_keyword() {
    let settings = Settings::without_keyword(Config::default(), Overrides::default()).unwrap();
    assert!(settings.keyword.is_empty());
}

#[test]
fn load_reads_aliases_and_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("px-harvest.json");
    std::fs::write(
        &path,
        r#"{
  "keyword": "phosphoproteome",
  "match_mode": "exact",
  "repository_aliases": {"PRIDE Archive": "pride", "Panorama Public": "xml-fallback"},
  "xml_fallback_chain": false,
  "endpoints": {"pride": "http://localhost:9000/pride"}
}"#,
    )
    .unwrap();

    let config = ConfigLoader::resolve(path.to_str()).unwrap();
    let settings = Settings::resolve(config, Overrides::default()).unwrap();
    assert_eq!(settings.keyword, "phosphoproteome");
    assert!(!settings.xml_fallback_chain);
    assert_eq!(settings.matcher.select("PRIDE Archive"), RepositoryStrategy::Pride);
    assert_eq!(settings.matcher.select("PRIDE"), RepositoryStrategy::Pride);
    assert_eq!(settings.matcher.select("PRIDE Archive v2"), RepositoryStrategy::XmlFallback);
    assert_eq!(settings.endpoints.pride, "http://localhost:9000/pride");
    assert_eq!(
        settings.endpoints.massive,
        "https://massive.ucsd.edu"
    );
}

#[test]
fn load_reports_missing_and_malformed_files() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(missing.to_str()),
        Err(HarvestError::ConfigRead(_))
    );

    let malformed = dir.path().join("bad.json");
    std::fs::write(&malformed, r#"{"workers": "many"}"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve(malformed.to_str()),
        Err(HarvestError::ConfigParse(_))
    );

    let unknown = dir.path().join("unknown.json");
    std::fs::write(&unknown, r#"{"colour": "blue"}"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve(unknown.to_str()),
        Err(HarvestError::ConfigParse(_))
    );
}
