mod fixtures;

use fixtures::{copy_fixture_project, teamcity_log, write_file};
use phpunit_sync_core::tree::NodeId;
use phpunit_sync_core::utils::canonical_locator;
use std::fs;
use std::process::{Command, Output};
use tempfile::TempDir;

fn phpunit_sync(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_phpunit-sync"))
        .args(args)
        .output()
        .expect("Failed to execute command")
}

#[test]
fn test_cli_help() {
    let output = phpunit_sync(&["--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("phpunit-sync"));
    assert!(stdout.contains("discover"));
    assert!(stdout.contains("correlate"));
    assert!(stdout.contains("--format"));
}

#[test]
fn test_cli_missing_subcommand() {
    let output = phpunit_sync(&[]);

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("Usage") || stderr.contains("subcommand"));
}

#[test]
fn test_cli_invalid_path() {
    let output = phpunit_sync(&["discover", "--path", "/nonexistent/path/that/does/not/exist"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("does not exist") || stderr.contains("Invalid arguments"));
}

#[test]
fn test_cli_invalid_output_format() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().to_str().unwrap();

    let output = phpunit_sync(&["discover", "--path", root, "--format", "xml"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("invalid value") || stderr.contains("possible values"));
}

#[test]
fn test_cli_discover_json() {
    let temp_dir = TempDir::new().unwrap();
    let root = copy_fixture_project("psr4_project", temp_dir.path());

    let output = phpunit_sync(&["discover", "--path", root.to_str().unwrap(), "-f", "json"]);

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let projects: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let tests = projects[0]["tests"].as_array().unwrap();
    let mut suites: Vec<&str> = tests.iter().map(|node| node["label"].as_str().unwrap()).collect();
    suites.sort();
    assert_eq!(suites, vec!["Integration", "Unit"]);
    assert!(tests.iter().all(|node| node["kind"] == "suite"));

    let text = String::from_utf8(output.stdout).unwrap();
    assert!(text.contains("testAddsTwoNumbers"));
    assert!(!text.contains("testHelper"));
}

#[test]
fn test_cli_args_for_data_provider_method() {
    let temp_dir = TempDir::new().unwrap();
    let root = copy_fixture_project("psr4_project", temp_dir.path());
    let file = canonical_locator(&root.join("tests/Unit/Service/CalculatorTest.php"));
    let target = NodeId::method(&file, "App\\Tests\\Unit\\Service\\CalculatorTest", "testAdditions");

    let output = phpunit_sync(&[
        "args",
        "--path",
        root.to_str().unwrap(),
        "--phpunit-version",
        "9.6.0",
        "--target",
        target.as_str(),
        "-f",
        "json",
    ]);

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let invocations: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(invocations.as_array().unwrap().len(), 1);
    let argv: Vec<String> = serde_json::from_value(invocations[0]["args"].clone()).unwrap();
    assert_eq!(argv.first().map(String::as_str), Some("php"));
    assert!(argv.contains(&"--teamcity".to_string()));
    let filter = argv.iter().position(|arg| arg == "--filter").unwrap();
    assert_eq!(argv[filter + 1], "^.*::(testAdditions)( with data set .*)?$");
    assert_eq!(argv.last(), Some(&file));
}

#[test]
fn test_cli_args_rejects_unknown_target() {
    let temp_dir = TempDir::new().unwrap();
    let root = copy_fixture_project("psr4_project", temp_dir.path());

    let output = phpunit_sync(&[
        "args",
        "--path",
        root.to_str().unwrap(),
        "--phpunit-version",
        "10.5.0",
        "--target",
        "method:/nowhere/GhostTest.php#GhostTest::testGhost",
    ]);

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("GhostTest"));
}

#[test]
fn test_cli_correlate_log() {
    let temp_dir = TempDir::new().unwrap();
    let root = copy_fixture_project("psr4_project", temp_dir.path());
    let log = temp_dir.path().join("run.log");
    fs::write(&log, teamcity_log("psr4_project", &root)).unwrap();

    let output = phpunit_sync(&[
        "correlate",
        "--path",
        root.to_str().unwrap(),
        log.to_str().unwrap(),
        "-f",
        "json",
    ]);

    // One dataset fails, so the exit status reports failure.
    assert!(!output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["results"].as_array().unwrap().len(), 7);
    assert_eq!(report["summary"]["tests"], 7);
    assert_eq!(report["summary"]["failures"], 1);
    assert_eq!(report["outcome"], "completed");
    assert!(report["fatal"].is_null());
}

#[test]
fn test_cli_correlate_truncated_log_is_incomplete() {
    let temp_dir = TempDir::new().unwrap();
    let root = copy_fixture_project("psr4_project", temp_dir.path());
    let full = teamcity_log("psr4_project", &root);
    let truncated: String = full
        .lines()
        .take_while(|line| !line.contains("testSuiteStarted name='Integration'"))
        .map(|line| format!("{line}\n"))
        .collect();
    let log = temp_dir.path().join("truncated.log");
    fs::write(&log, truncated).unwrap();

    let output = phpunit_sync(&[
        "correlate",
        "--path",
        root.to_str().unwrap(),
        log.to_str().unwrap(),
        "-f",
        "json",
    ]);

    assert!(!output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["outcome"], "incomplete");
    assert!(report["summary"].is_null());
    assert_eq!(report["results"].as_array().unwrap().len(), 5);
}

#[cfg(unix)]
#[test]
fn test_cli_run_covers_every_root() {
    let temp_dir = TempDir::new().unwrap();
    let mut roots = Vec::new();
    for name in ["api", "web"] {
        let root = temp_dir.path().join(name);
        write_file(
            &root,
            "tests/PingTest.php",
            "<?php\nnamespace App;\n\nclass PingTest\n{\n    public function testPing() {}\n}\n",
        );
        let file = canonical_locator(&root.join("tests/PingTest.php"));
        write_file(
            &root,
            "runner.sh",
            &format!(
                "if [ \"$1\" = --version ]; then echo 'PHPUnit 10.5.2 by Sebastian Bergmann and contributors.'; exit 0; fi\n\
                 cat <<'EOF'\n\
                 ##teamcity[testStarted name='testPing' locationHint='php_qn://{file}::\\App\\PingTest::testPing']\n\
                 ##teamcity[testFinished name='testPing' duration='1']\n\
                 OK (1 test, 1 assertion)\n\
                 EOF\n"
            ),
        );
        write_file(&root, ".phpunit-sync.json", r#"{"php": "sh", "phpunit": "runner.sh"}"#);
        roots.push(root);
    }

    let output = phpunit_sync(&[
        "run",
        "--path",
        roots[0].to_str().unwrap(),
        "--path",
        roots[1].to_str().unwrap(),
        "-f",
        "json",
    ]);

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let reports: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let reports = reports.as_array().unwrap();
    assert_eq!(reports.len(), 2);
    for report in reports {
        assert_eq!(report["report"]["outcome"], "completed");
        assert_eq!(report["report"]["results"].as_array().unwrap().len(), 1);
        assert_eq!(report["report"]["results"][0]["status"], "passed");
    }
}
