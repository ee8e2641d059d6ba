//! Integration tests for the `hookfleet` binary.
//!
//! Real devices are replaced by small shell scripts standing in for `adb`
//! and `frida`, passed with `--adb` / `--agent`.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

const FAKE_ADB: &str = r#"#!/bin/sh
case "$1" in
  start-server) exit 0 ;;
  devices) printf 'List of devices attached\nemulator-5554\tdevice\n'; exit 0 ;;
  -s)
    case "$3" in
      shell)
        case "$4" in
          *"ps |"*) echo "root 4242 1 0 12:00 ? 00:00:01 srv"; exit 0 ;;
          "wm size") echo "Physical size: 1080x1920"; exit 0 ;;
          *) exit 0 ;;
        esac ;;
      push) exit 0 ;;
    esac ;;
esac
exit 0
"#;

const BROKEN_ADB: &str = "#!/bin/sh\necho 'cannot connect to daemon' >&2\nexit 1\n";

const FAKE_FRIDA: &str = "#!/bin/sh\nexit 0\n";

// -----------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------

struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.path().join(name);
        std::fs::write(&path, body).expect("failed to write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("failed to chmod script");
        path
    }

    /// A `hookfleet` command isolated from the caller's config and env.
    fn hookfleet(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_hookfleet"));
        cmd.env("XDG_CONFIG_HOME", self.path().join("xdg"))
            .env_remove("APP_NAME")
            .env_remove("PACKAGE_NAME")
            .env_remove("LOCAL_FRIDA_SERVER_NAME")
            .env_remove("HOOKFLEET_ADB")
            .env_remove("HOOKFLEET_AGENT")
            .env("RUST_LOG", "warn");
        cmd
    }

    fn with_target(&self) -> Command {
        let mut cmd = self.hookfleet();
        cmd.env("APP_NAME", "Example")
            .env("PACKAGE_NAME", "com.example.app")
            .env("LOCAL_FRIDA_SERVER_NAME", "srv");
        cmd
    }
}

fn run(cmd: &mut Command) -> Output {
    cmd.output().expect("failed to run hookfleet")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[test]
fn devices_lists_attached_devices() {
    let sandbox = Sandbox::new();
    let adb = sandbox.script("adb", FAKE_ADB);

    let output = run(sandbox.hookfleet().arg("devices").arg("--adb").arg(&adb));

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("emulator-5554 | device"));
}

#[test]
fn devices_json_includes_screen_size() {
    let sandbox = Sandbox::new();
    let adb = sandbox.script("adb", FAKE_ADB);

    let output = run(sandbox
        .hookfleet()
        .args(["--json", "devices", "--screen", "--adb"])
        .arg(&adb));

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    let devices: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(devices[0]["id"], "emulator-5554");
    assert_eq!(devices[0]["screen"]["width"], 1080);
}

#[test]
fn unreachable_bridge_exits_one() {
    let sandbox = Sandbox::new();
    let adb = sandbox.script("adb", BROKEN_ADB);

    let output = run(sandbox.hookfleet().arg("devices").arg("--adb").arg(&adb));

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("cannot connect to daemon"));
}

#[test]
fn missing_target_names_fail_before_touching_devices() {
    let sandbox = Sandbox::new();
    let adb = sandbox.script("adb", FAKE_ADB);

    let output = run(sandbox
        .hookfleet()
        .env("APP_NAME", "Example")
        .env("LOCAL_FRIDA_SERVER_NAME", "srv")
        .arg("run")
        .arg("--adb")
        .arg(&adb));

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("PACKAGE_NAME"), "stderr: {}", stderr(&output));
    assert!(stdout(&output).is_empty());
}

#[test]
fn find_echoes_process_line() {
    let sandbox = Sandbox::new();
    let adb = sandbox.script("adb", FAKE_ADB);

    let output = run(sandbox.with_target().arg("find").arg("--adb").arg(&adb));

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert!(
        stdout(&output).contains("emulator-5554 | root 4242"),
        "stdout: {}",
        stdout(&output)
    );
}

#[test]
fn full_run_succeeds_against_fake_fleet() {
    let sandbox = Sandbox::new();
    let adb = sandbox.script("adb", FAKE_ADB);
    let frida = sandbox.script("frida", FAKE_FRIDA);

    let output = run(sandbox
        .with_target()
        .args([
            "--json",
            "run",
            "--no-hold",
            "--settle-secs",
            "1",
            "--launch-settle-secs",
            "0",
            "--adb",
        ])
        .arg(&adb)
        .arg("--agent")
        .arg(&frida));

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(json["verdict"]["verdict"], "all_succeeded");
    assert_eq!(json["report"]["devices"][0]["device"], "emulator-5554");
}

#[test]
fn init_writes_config_and_refuses_overwrite() {
    let sandbox = Sandbox::new();
    let path = sandbox.path().join("hookfleet.toml");

    let first = run(sandbox.hookfleet().arg("init").arg("--config").arg(&path));
    assert_eq!(first.status.code(), Some(0), "stderr: {}", stderr(&first));
    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("[target]"));

    let second = run(sandbox.hookfleet().arg("init").arg("--config").arg(&path));
    assert_eq!(second.status.code(), Some(1));
    assert!(stderr(&second).contains("already exists"));

    let forced = run(sandbox
        .hookfleet()
        .args(["init", "--force", "--config"])
        .arg(&path));
    assert_eq!(forced.status.code(), Some(0));
}

#[test]
fn config_file_supplies_target_names() {
    let sandbox = Sandbox::new();
    let adb = sandbox.script("adb", FAKE_ADB);
    let path = sandbox.path().join("hookfleet.toml");
    std::fs::write(
        &path,
        concat!(
            "[target]\n",
            "app_name = \"Example\"\n",
            "package_name = \"com.example.app\"\n",
            "server_name = \"srv\"\n",
        ),
    )
    .unwrap();

    let output = run(sandbox
        .hookfleet()
        .arg("kill")
        .arg("--config")
        .arg(&path)
        .arg("--adb")
        .arg(&adb));

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("emulator-5554 | OK"));
}
