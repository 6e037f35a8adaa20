//! Configuration files driving real runs against the in-memory adapter.

use std::path::PathBuf;

use tempfile::TempDir;

use rpmrh::{
    validate_config, Action, Collection, Config, Error, PackageOutcome, Package, PipelineDriver,
    ServiceFactory, EXIT_OK,
};

const SERVICES: &str = r#"
[pipeline]
concurrency = 2
timeout_secs = 5

[[collection]]
el = 7
name = "rh-python36"

[service.cbs]
type = "memory"
capabilities = ["repository", "builder"]

[service.cbs.groups]
"scl7-rh-python36-candidate" = ["pkgA-1.0-1.x86_64", "pkgB-2.0-1.x86_64", "pkgC-0.9-3.noarch"]
"scl7-rh-python36-release" = ["pkgA-1.0-1.x86_64"]

[service.ci]
type = "memory"
capabilities = ["check"]

[[service.ci.results]]
group = "scl7-rh-python36-tests"
package = "pkgB-2.0-1.x86_64"
outcome = "pass"
recorded_at = "2026-10-01T00:00:00Z"

[[service.ci.results]]
group = "scl7-rh-python36-tests"
package = "pkgC-0.9-3.noarch"
outcome = "fail"
recorded_at = "2026-10-01T00:00:00Z"
"#;

const PHASES: &str = r#"
[phase.candidate]
repo = { service = "cbs", tags = ["scl{el}-{collection}-candidate"] }
check = { service = "ci", tests = ["scl{el}-{collection}-tests"] }

[phase.release]
repo = { service = "cbs", tags = ["scl{el}-{collection}-release"] }
build = { service = "cbs", targets = ["scl{el}-{collection}-release"] }
"#;

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).expect("failed to write config");
    path
}

fn pkg(s: &str) -> Package {
    Package::parse(s).unwrap()
}

#[tokio::test]
async fn layered_files_drive_a_tag_run() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let services = write(&dir, "services.toml", SERVICES);
    let phases = write(&dir, "phases.toml", PHASES);

    let config = Config::load_all([&services, &phases]).unwrap();
    let factory = ServiceFactory::new();
    let warnings = validate_config(&config, &factory).into_result().unwrap();
    assert!(warnings.is_empty(), "{warnings:?}");

    let registry = config.build(&factory).unwrap();
    let driver = PipelineDriver::from_settings(registry, &config.pipeline);

    let report = driver
        .run(
            "candidate",
            "release",
            &config.collections,
            Action::Tag { min_days: Some(7) },
        )
        .await
        .unwrap();
    let collection = report.collection(&Collection::new(7, "rh-python36")).unwrap();
    assert_eq!(
        collection.with_outcome(PackageOutcome::Tagged).collect::<Vec<_>>(),
        vec![&pkg("pkgB-2.0-1.x86_64")]
    );
    assert_eq!(
        collection.with_outcome(PackageOutcome::FailedCheck).collect::<Vec<_>>(),
        vec![&pkg("pkgC-0.9-3.noarch")]
    );
    assert_eq!(report.exit_code(), EXIT_OK);

    // The tag landed in the in-memory release group.
    let after = driver
        .run("candidate", "release", &config.collections, Action::Diff)
        .await
        .unwrap();
    assert_eq!(
        after.collections[0]
            .with_outcome(PackageOutcome::Missing)
            .collect::<Vec<_>>(),
        vec![&pkg("pkgC-0.9-3.noarch")]
    );
}

#[test]
fn later_file_overrides_phase_definitions() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let base = write(&dir, "base.toml", &format!("{SERVICES}\n{PHASES}"));
    let overlay = write(
        &dir,
        "overlay.toml",
        r#"
        [pipeline]
        retries = 3

        [phase.release]
        repo = { service = "cbs", tags = ["scl{el}-{collection}-release", "scl{el}-{collection}-hotfix"] }
        "#,
    );

    let config = Config::load_all([&base, &overlay]).unwrap();
    assert_eq!(config.pipeline.retries, 3);
    assert_eq!(config.pipeline.concurrency, 4);
    let release = &config.phases["release"];
    assert_eq!(release.repo.as_ref().unwrap().tags.len(), 2);
    assert!(release.build.is_none());
    assert!(config.phases.contains_key("candidate"));
}

#[test]
fn phase_bound_to_undeclared_capability_fails_to_build() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let path = write(
        &dir,
        "bad.toml",
        &format!(
            "{SERVICES}\n{}",
            r#"
            [phase.testing]
            repo = { service = "ci", tags = ["scl{el}-{collection}-testing"] }
            "#
        ),
    );

    let config = Config::load(&path).unwrap();
    // Validation cannot see capabilities; registration can.
    assert!(validate_config(&config, &ServiceFactory::new()).is_valid());
    let err = config.build(&ServiceFactory::new()).unwrap_err();
    assert!(matches!(err, Error::PhaseBinding { ref phase, .. } if phase == "testing"));
}

#[test]
fn malformed_file_names_the_path() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let path = write(&dir, "broken.toml", "[phase.candidate\nrepo = 1");
    let err = Config::load(&path).unwrap_err();
    assert!(err.is_config());
    assert!(err.to_string().contains("broken.toml"));
}
