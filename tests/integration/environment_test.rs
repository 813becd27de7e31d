use chrono::Utc;
use tempfile::TempDir;
use valmon::core::environment::{
    CloneOptions, EnvironmentOptions, EnvironmentPatch, EnvironmentRegistry, ProgramSpec,
};
use valmon::core::supervisor::{ProcessRecord, ProcessRecordStore};
use valmon::error::ValmonError;

use super::support::context;

fn mark_running(records: &ProcessRecordStore, environment: &str, port: u16) {
    records
        .save(&ProcessRecord {
            pid: std::process::id(),
            environment: environment.to_string(),
            start_time: Utc::now(),
            rpc_port: port,
        })
        .unwrap();
}

#[test]
fn test_running_environment_is_flagged_and_protected() {
    let temp_dir = TempDir::new().unwrap();
    let ctx = context(&temp_dir);
    let registry = EnvironmentRegistry::new(&ctx);

    registry.create("alpha", EnvironmentOptions::default()).unwrap();
    registry.create("beta", EnvironmentOptions::default()).unwrap();
    mark_running(&ProcessRecordStore::new(&ctx.paths.process_file), "beta", 8899);

    let listed = registry.list().unwrap();
    let flags: Vec<(&str, bool)> = listed
        .iter()
        .map(|s| (s.environment.name.as_str(), s.running))
        .collect();
    assert_eq!(flags, vec![("alpha", false), ("beta", true)]);

    let err = registry.delete("beta").unwrap_err();
    assert!(matches!(err, ValmonError::Conflict(_)));
    assert_eq!(err.status_code(), 409);

    registry.delete("alpha").unwrap();
    assert!(registry.get("alpha").unwrap().is_none());
}

#[test]
fn test_export_import_between_homes() {
    let source_dir = TempDir::new().unwrap();
    let target_dir = TempDir::new().unwrap();
    let source = EnvironmentRegistry::new(&context(&source_dir));
    let target = EnvironmentRegistry::new(&context(&target_dir));

    source
        .create(
            "staging",
            EnvironmentOptions {
                port: Some(9100),
                description: Some("Staging cluster mirror".to_string()),
                clone_accounts: vec!["Acc1111".to_string()],
                programs: vec![ProgramSpec {
                    address: "Prog1111".to_string(),
                    path: "/opt/programs/prog.so".into(),
                }],
                ..Default::default()
            },
        )
        .unwrap();
    source
        .update(
            "staging",
            EnvironmentPatch {
                reset: Some(true),
                ..Default::default()
            },
        )
        .unwrap();

    let exported = source.export("staging").unwrap();
    let imported = target.import(&exported, None).unwrap();
    let original = source.require("staging").unwrap();

    assert_eq!(imported.name, "staging");
    assert_eq!(imported.port, original.port);
    assert_eq!(imported.description, original.description);
    assert_eq!(imported.clone_accounts, original.clone_accounts);
    assert_eq!(imported.programs, original.programs);
    assert!(imported.reset);
    assert!(imported.updated.is_none());

    let again = target.import(&exported, None).unwrap();
    assert_eq!(again.name, "staging-imported");
    assert_eq!(again.port, original.port);

    let err = target.import(&exported, Some("staging")).unwrap_err();
    assert!(matches!(err, ValmonError::AlreadyExists(_)));

    let renamed = target.import(&exported, Some("staging-2")).unwrap();
    assert_eq!(renamed.name, "staging-2");
}

#[test]
fn test_current_pointer_follows_switch_and_delete() {
    let temp_dir = TempDir::new().unwrap();
    let registry = EnvironmentRegistry::new(&context(&temp_dir));

    assert_eq!(registry.get_current(), "development");
    assert!(registry.require("development").is_ok());

    registry.create("qa", EnvironmentOptions::default()).unwrap();
    registry
        .clone_environment("qa", "qa-copy", CloneOptions::default())
        .unwrap();
    registry.switch_current("qa-copy").unwrap();
    assert_eq!(registry.get_current(), "qa-copy");

    registry.delete("qa-copy").unwrap();
    assert_eq!(registry.get_current(), "development");

    let err = registry.switch_current("qa-copy").unwrap_err();
    assert!(matches!(err, ValmonError::NotFound(_)));
}
