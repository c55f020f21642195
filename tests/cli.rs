//! Tests that run the `ragchat` binary. Every case stays offline: the
//! in-memory or SQLite backend is used, and the API is either never
//! reached or is a local socket that never answers.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

fn ragchat_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ragchat");
    path
}

/// Run with a clean environment plus `envs`, feeding `stdin`.
fn run_ragchat(dir: &Path, args: &[&str], envs: &[(&str, &str)], stdin: &str) -> Output {
    let binary = ragchat_binary();
    let mut child = Command::new(&binary)
        .current_dir(dir)
        .env_clear()
        .envs(envs.iter().copied())
        .arg("--config")
        .arg(dir.join("ragchat.toml"))
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap_or_else(|e| panic!("Failed to run ragchat binary at {:?}: {}", binary, e));

    child
        .stdin
        .take()
        .unwrap()
        .write_all(stdin.as_bytes())
        .unwrap();
    child.wait_with_output().unwrap()
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

#[test]
fn test_missing_api_key_exits_1() {
    let tmp = TempDir::new().unwrap();
    let output = run_ragchat(tmp.path(), &["status"], &[], "");
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_of(&output).contains("OPENAI_API_KEY"));
}

#[test]
fn test_placeholder_api_key_exits_1() {
    let tmp = TempDir::new().unwrap();
    let output = run_ragchat(
        tmp.path(),
        &["status"],
        &[("OPENAI_API_KEY", "your-api-key-here")],
        "",
    );
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_of(&output).contains("placeholder"));
}

#[test]
fn test_pinecone_without_key_exits_1() {
    let tmp = TempDir::new().unwrap();
    let output = run_ragchat(
        tmp.path(),
        &["status"],
        &[
            ("OPENAI_API_KEY", "sk-test-1234"),
            ("RAGCHAT_VECTOR_BACKEND", "pinecone"),
        ],
        "",
    );
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_of(&output).contains("PINECONE_API_KEY"));
}

#[test]
fn test_unknown_backend_exits_1() {
    let tmp = TempDir::new().unwrap();
    let output = run_ragchat(
        tmp.path(),
        &["status"],
        &[
            ("OPENAI_API_KEY", "sk-test-1234"),
            ("RAGCHAT_VECTOR_BACKEND", "faiss"),
        ],
        "",
    );
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_status_reports_model_and_empty_history() {
    let tmp = TempDir::new().unwrap();
    let output = run_ragchat(
        tmp.path(),
        &["status"],
        &[
            ("OPENAI_API_KEY", "sk-test-1234"),
            ("RAGCHAT_CHAT_MODEL", "gpt-test-model"),
        ],
        "",
    );
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    let stdout = stdout_of(&output);
    assert!(stdout.contains("Chat model:  gpt-test-model"));
    assert!(stdout.contains("History:     0 / 20 turns"));
    assert!(stdout.contains("Records:     0"));
    assert!(stdout.contains("memory"));
}

#[test]
fn test_config_file_selects_sqlite_backend() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join("ragchat.toml"),
        format!(
            r#"[store]
backend = "sqlite"
collection = "notes"
sqlite_path = "{}/data/notes.sqlite"

[embedding]
dims = 8
"#,
            tmp.path().display()
        ),
    )
    .unwrap();

    let output = run_ragchat(tmp.path(), &["status"], &[("OPENAI_API_KEY", "sk-test-1234")], "");
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    let stdout = stdout_of(&output);
    assert!(stdout.contains("Backend:     sqlite"));
    assert!(stdout.contains("Collection:  notes"));
    assert!(stdout.contains("8 dims"));
    assert!(tmp.path().join("data/notes.sqlite").exists());
}

#[test]
fn test_chat_with_missing_kb_creates_example_and_exits_cleanly() {
    let tmp = TempDir::new().unwrap();
    let kb = tmp.path().join("kb");
    let output = run_ragchat(
        tmp.path(),
        &[],
        &[
            ("OPENAI_API_KEY", "sk-test-1234"),
            ("KNOWLEDGE_BASE_DIR", kb.to_str().unwrap()),
        ],
        "\nSTATUS\nclear\nhelp\nquit\n",
    );
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    assert!(kb.join("example/welcome.txt").is_file());

    let stdout = stdout_of(&output);
    assert!(stdout.contains("example folder was created"));
    assert!(stdout.contains("History:     0 / 20 turns"));
    assert!(stdout.contains("Conversation cleared."));
    assert!(stdout.contains("Commands:"));
    // Not a terminal, so no prompt marker.
    assert!(!stdout.contains("> "));
}

#[test]
fn test_chat_exits_0_on_end_of_input() {
    let tmp = TempDir::new().unwrap();
    let kb = tmp.path().join("kb");
    let output = run_ragchat(
        tmp.path(),
        &["chat"],
        &[
            ("OPENAI_API_KEY", "sk-test-1234"),
            ("KNOWLEDGE_BASE_DIR", kb.to_str().unwrap()),
        ],
        "",
    );
    assert_eq!(output.status.code(), Some(0));
}

/// Start the binary against an OpenAI endpoint that accepts connections
/// but never answers, so any embedding request hangs.
#[cfg(unix)]
fn spawn_with_silent_api(
    dir: &Path,
    args: &[&str],
    kb: &Path,
    stdin: &str,
) -> (std::process::Child, std::net::TcpListener) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let binary = ragchat_binary();
    let mut child = Command::new(&binary)
        .current_dir(dir)
        .env_clear()
        .env("OPENAI_API_KEY", "sk-test-1234")
        .env("OPENAI_BASE_URL", &base_url)
        .env("KNOWLEDGE_BASE_DIR", kb)
        .arg("--config")
        .arg(dir.join("ragchat.toml"))
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap_or_else(|e| panic!("Failed to run ragchat binary at {:?}: {}", binary, e));
    child
        .stdin
        .as_mut()
        .unwrap()
        .write_all(stdin.as_bytes())
        .unwrap();
    (child, listener)
}

/// Send SIGINT after the request has had time to start, then wait.
#[cfg(unix)]
fn interrupt_and_wait(child: &mut std::process::Child) -> std::process::ExitStatus {
    use std::time::{Duration, Instant};

    std::thread::sleep(Duration::from_millis(1500));
    assert!(child.try_wait().unwrap().is_none(), "exited before the interrupt");
    let status = Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("ragchat kept running after SIGINT");
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[cfg(unix)]
#[test]
fn test_interrupt_during_startup_build_exits_0() {
    let tmp = TempDir::new().unwrap();
    let kb = tmp.path().join("kb");
    std::fs::create_dir_all(kb.join("facts")).unwrap();
    std::fs::write(kb.join("facts/sky.txt"), "The sky is blue.").unwrap();

    let (mut child, _listener) = spawn_with_silent_api(tmp.path(), &["chat"], &kb, "");
    let status = interrupt_and_wait(&mut child);
    assert_eq!(status.code(), Some(0));
}

#[cfg(unix)]
#[test]
fn test_interrupt_during_rebuild_command_exits_0() {
    let tmp = TempDir::new().unwrap();
    let kb = tmp.path().join("kb");

    // The missing folder gets an example file, which `rebuild` then embeds.
    let (mut child, _listener) = spawn_with_silent_api(tmp.path(), &["chat"], &kb, "rebuild\n");
    let status = interrupt_and_wait(&mut child);
    assert!(kb.join("example/welcome.txt").is_file());
    assert_eq!(status.code(), Some(0));
}
