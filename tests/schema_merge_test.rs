use std::fs;
use std::path::Path;

use case_tagger::config::Config;
use case_tagger::models::load_schema;
use case_tagger::orchestrator::{run_schema_update, MergeOptions};

fn backups_in(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().contains(".backup-"))
        .count()
}

fn config_for(dir: &Path) -> Config {
    Config {
        schema_path: dir.join("schema.json"),
        fallback_bucket: "other".to_string(),
        ..Config::default()
    }
}

#[test]
fn test_merge_is_idempotent_and_backs_up_once() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let original = r#"{
  "schema": {
    "crime_type": {
      "financial_fraud": ["investment_scam"]
    },
    "victim_approach": {
      "direct_contact": ["cold_call"],
      "other": ["walk_in"]
    }
  }
}
"#;
    fs::write(root.join("schema.json"), original).unwrap();
    fs::write(
        root.join("results.csv"),
        "id,crime_type,victim_approach,status\n\
         1,\"investment_scam, crypto_scam\",cold_call,succeeded\n\
         2,crypto_scam,\"tiktok_ad, walk_in\",succeeded\n\
         3,never_added,never_added,failed\n",
    )
    .unwrap();

    let config = config_for(root);
    let options = MergeOptions {
        results: root.join("results.csv"),
        schema: None,
        extra_categories: vec![],
    };

    let first = run_schema_update(&config, &options).unwrap();
    assert!(first.changed);
    assert_eq!(first.plan.added_tag_count(), 2);
    assert_eq!(first.plan.rows_skipped_failed, 1);
    let backup = first.backup_path.clone().unwrap();
    assert_eq!(fs::read_to_string(&backup).unwrap(), original);

    let after_first = fs::read_to_string(root.join("schema.json")).unwrap();
    assert!(after_first.starts_with("{\n  \"schema\": {"));

    let document = load_schema(&root.join("schema.json")).unwrap();
    assert!(document.enveloped);
    assert_eq!(
        document.schema.locate("crypto_scam"),
        Some(("crime_type", "other"))
    );
    assert_eq!(
        document.schema.locate("tiktok_ad"),
        Some(("victim_approach", "other"))
    );
    assert_eq!(
        document.schema.flattened("victim_approach").unwrap(),
        vec!["cold_call", "walk_in", "tiktok_ad"]
    );
    assert!(document.schema.locate("never_added").is_none());

    // 第二次合并：没有新标签，文件逐字节不变，也不再产生备份
    let second = run_schema_update(&config, &options).unwrap();
    assert!(!second.changed);
    assert!(second.backup_path.is_none());
    assert_eq!(
        fs::read_to_string(root.join("schema.json")).unwrap(),
        after_first
    );
    assert_eq!(backups_in(root), 1);
}

#[test]
fn test_merge_creates_requested_category() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::write(
        root.join("schema.json"),
        r#"{"crime_type": {"financial_fraud": ["investment_scam"]}}"#,
    )
    .unwrap();
    fs::write(
        root.join("results.csv"),
        "id,crime_type,scam_platform\n1,investment_scam,\"telegram, whatsapp\"\n2,,telegram\n",
    )
    .unwrap();

    let report = run_schema_update(
        &config_for(root),
        &MergeOptions {
            results: root.join("results.csv"),
            schema: None,
            extra_categories: vec!["scam_platform".to_string()],
        },
    )
    .unwrap();
    assert!(report.changed);

    let document = load_schema(&root.join("schema.json")).unwrap();
    assert!(!document.enveloped);
    let names: Vec<&str> = document.schema.category_names().collect();
    assert_eq!(names, vec!["crime_type", "scam_platform"]);
    assert_eq!(
        document.schema.flattened("scam_platform").unwrap(),
        vec!["telegram", "whatsapp"]
    );
}

#[test]
fn test_invalid_schema_is_not_touched() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let broken = r#"{"crime_type": {"a": ["x"]}, "other_cat": {"b": ["x"]}}"#;
    fs::write(root.join("schema.json"), broken).unwrap();
    fs::write(root.join("results.csv"), "id,crime_type\n1,y\n").unwrap();

    let result = run_schema_update(
        &config_for(root),
        &MergeOptions {
            results: root.join("results.csv"),
            schema: None,
            extra_categories: vec![],
        },
    );

    assert!(result.is_err());
    assert_eq!(fs::read_to_string(root.join("schema.json")).unwrap(), broken);
    assert_eq!(backups_in(root), 0);
}

#[test]
fn test_back_to_back_merges_keep_every_backup() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let original = r#"{"crime_type": {"financial_fraud": ["investment_scam"]}}"#;
    fs::write(root.join("schema.json"), original).unwrap();
    fs::write(root.join("first.csv"), "id,crime_type\n1,crypto_scam\n").unwrap();
    fs::write(root.join("second.csv"), "id,crime_type\n2,loan_fraud\n").unwrap();

    let config = config_for(root);
    let merge = |table: &str| {
        run_schema_update(
            &config,
            &MergeOptions {
                results: root.join(table),
                schema: None,
                extra_categories: vec![],
            },
        )
        .unwrap()
    };
    let first = merge("first.csv");
    let second = merge("second.csv");

    let first_backup = first.backup_path.unwrap();
    let second_backup = second.backup_path.unwrap();
    assert_ne!(first_backup, second_backup);
    assert_eq!(backups_in(root), 2);
    assert_eq!(fs::read_to_string(&first_backup).unwrap(), original);
    assert!(fs::read_to_string(&second_backup)
        .unwrap()
        .contains("crypto_scam"));
}
