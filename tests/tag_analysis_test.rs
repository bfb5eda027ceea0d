use std::fs;

use case_tagger::config::Config;
use case_tagger::orchestrator::{run_tag_analysis, AnalyzeOptions};

#[test]
fn test_analysis_over_several_stages() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::write(
        root.join("schema.json"),
        r#"{
  "victim_approach": {"direct_contact": ["cold_call", "whatsapp_message"]},
  "crime_type": {"financial_fraud": ["investment_scam", "job_fraud"]}
}"#,
    )
    .unwrap();

    // 第二阶段重新分类了案例 2，以后者为准；失败行不计入
    fs::write(
        root.join("stage1.csv"),
        "id,crime_type,victim_approach,status\n\
         1,investment_scam,cold_call,succeeded\n\
         2,job_fraud,cold_call,succeeded\n\
         3,,,failed\n",
    )
    .unwrap();
    fs::write(
        root.join("stage2.csv"),
        "id,crime_type,victim_approach,status\n\
         2,investment_scam,\"[\"\"cold_call\"\", \"\"whatsapp_message\"\"]\",succeeded\n\
         4,investment_scam,,succeeded\n",
    )
    .unwrap();

    let config = Config {
        schema_path: root.join("schema.json"),
        output_dir: root.join("output"),
        ..Config::default()
    };
    let distribution = run_tag_analysis(
        &config,
        &AnalyzeOptions {
            tables: vec![root.join("stage1.csv"), root.join("stage2.csv")],
            categories: vec![],
            output: None,
        },
    )
    .unwrap();

    assert_eq!(distribution.total_cases, 3);
    let names: Vec<&str> = distribution
        .analysis
        .iter()
        .map(|(name, _)| name.as_str())
        .collect();
    assert_eq!(names, vec!["victim_approach", "crime_type"]);

    let crime = distribution.category("crime_type").unwrap();
    assert_eq!(crime.cases_with_tags, 3);
    assert_eq!(crime.unique_tags, 1);
    let scam = crime.stat("investment_scam").unwrap();
    assert_eq!(scam.count, 3);
    assert_eq!(scam.percentage, 100.0);
    assert!(crime.stat("job_fraud").is_none());

    let approach = distribution.category("victim_approach").unwrap();
    assert_eq!(approach.cases_with_tags, 2);
    assert_eq!(approach.stat("cold_call").unwrap().percentage, 66.67);
    assert_eq!(approach.stat("whatsapp_message").unwrap().count, 1);

    let written = fs::read_to_string(root.join("output").join("tag_analysis_results.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&written).unwrap();
    assert_eq!(json["total_cases"], 3);
    assert_eq!(
        json["analysis"]["crime_type"]["tag_distribution"]["investment_scam"]["count"],
        3
    );
    // 键顺序与分类体系一致
    let victim_at = written.find("\"victim_approach\"").unwrap();
    let crime_at = written.find("\"crime_type\"").unwrap();
    assert!(victim_at < crime_at);
}

#[test]
fn test_analysis_requires_tables() {
    let result = run_tag_analysis(
        &Config::default(),
        &AnalyzeOptions {
            tables: vec![],
            categories: vec!["crime_type".to_string()],
            output: None,
        },
    );
    assert!(result.is_err());
}
