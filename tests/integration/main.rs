//! Integration tests for stratum

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn stratum() -> Command {
        let mut cmd = cargo_bin_cmd!("stratum");
        cmd.env_remove("STRATUM_CONFIG").env_remove("STRATUM_API_KEY");
        cmd
    }

    /// Command bound to a config path that does not exist (defaults apply)
    fn with_config(dir: &Path) -> Command {
        let mut cmd = stratum();
        cmd.arg("--config").arg(dir.join("config.toml"));
        cmd
    }

    #[test]
    fn help_displays() {
        stratum()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("content-addressed snapshot builds"));
    }

    #[test]
    fn version_displays() {
        stratum()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("stratum"));
    }

    #[test]
    fn fingerprint_prints_chained_digest() {
        stratum()
            .args(["fingerprint", "snap_1", r#"run:["apt-get update",false,true]"#])
            .assert()
            .success()
            .stdout(
                "f4772ca45ccf79048935aa94851af134521181023bde339ddfc863580b96886e\n",
            );
    }

    #[test]
    fn fingerprint_ignores_broken_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not = [valid").unwrap();

        stratum()
            .arg("--config")
            .arg(&path)
            .args(["fingerprint", "p", "i"])
            .assert()
            .success()
            .stdout(predicate::str::contains(
                "dbbdf3158e19ccf68f489c471fb193445af621ddcd5979eb32ab42bc55479d01",
            ));
    }

    #[test]
    fn config_path_honors_flag() {
        let dir = TempDir::new().unwrap();
        with_config(dir.path())
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show_defaults() {
        let dir = TempDir::new().unwrap();
        with_config(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[backend]"))
            .stdout(predicate::str::contains("ready_timeout_secs = 300"));
    }

    #[test]
    fn config_init_writes_file() {
        let dir = TempDir::new().unwrap();
        with_config(dir.path())
            .args(["config", "init"])
            .assert()
            .success();

        let written = std::fs::read_to_string(dir.path().join("config.toml")).unwrap();
        assert!(written.contains("[cache]"));
    }

    #[test]
    fn invalid_config_reports_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[backend]\nkind = \"firecracker\"\n").unwrap();

        stratum()
            .arg("--config")
            .arg(&path)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"));
    }

    #[test]
    fn remote_backend_without_key_hints() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[backend]\nkind = \"remote\"\n").unwrap();

        stratum()
            .arg("--config")
            .arg(&path)
            .args(["snapshot", "list"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No API key"))
            .stderr(predicate::str::contains("STRATUM_API_KEY"));
    }

    #[test]
    fn build_rejects_invalid_plan() {
        let dir = TempDir::new().unwrap();
        let plan = dir.path().join("stratum.toml");
        std::fs::write(
            &plan,
            "[base]\nimage = \"debian:12\"\n\n[[step]]\nrun = \"make\"\ncopy = { src = \"a\", dest = \"/a\" }\n",
        )
        .unwrap();

        with_config(dir.path())
            .arg("build")
            .arg(&plan)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid build plan"))
            .stderr(predicate::str::contains("step 1"));
    }

    #[test]
    fn build_missing_plan_fails() {
        let dir = TempDir::new().unwrap();
        with_config(dir.path())
            .arg("build")
            .arg(dir.path().join("absent.toml"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("reading build plan"));
    }

    #[test]
    fn dry_run_prints_chained_digests() {
        let dir = TempDir::new().unwrap();
        let plan = dir.path().join("stratum.toml");
        std::fs::write(
            &plan,
            "[base]\nimage = \"debian:12\"\n\n[[step]]\nrun = \"apt-get update\"\n",
        )
        .unwrap();

        with_config(dir.path())
            .arg("build")
            .arg(&plan)
            .arg("--dry-run")
            .assert()
            .success()
            .stdout(predicate::str::contains(
                "f7a785ef8951e22e7df2f0c0d1ff5ac3aa908df8758481b94ee54edcc2e18edd",
            ))
            .stdout(predicate::str::contains("c0e0603b6d79"))
            .stdout(predicate::str::contains("run apt-get update"));
    }

    #[test]
    fn run_requires_a_command() {
        stratum()
            .args(["run", "--snapshot", "snap_1"])
            .assert()
            .failure();
    }
}
