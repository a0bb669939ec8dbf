#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use specforge_core::config::ServerConfig;
use specforge_core::model::NewProject;
use specforge_core::Store;
use specforge_server::{build_mcp_router, AppState};

const TOKEN: &str = "cli-test-token";

/// A live MCP listener on an ephemeral port plus one seeded project.
struct Server {
    _dir: TempDir,
    url: String,
    project_id: String,
}

fn start_server() -> Server {
    let dir = TempDir::new().unwrap();
    let store = Store::open(&dir.path().join("sf.redb")).unwrap();
    let config = ServerConfig {
        mcp_token: Some(TOKEN.into()),
        ..Default::default()
    };
    let state = AppState::new(store, config);

    let ws = state.service.create_workspace("cli", None).unwrap();
    let project = state
        .service
        .create_project(
            NewProject {
                workspace_id: ws.id,
                name: "shop".into(),
                description: String::new(),
                settings: None,
            },
            None,
        )
        .unwrap();

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();
    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, build_mcp_router(state)).await.unwrap();
        });
    });

    Server {
        _dir: dir,
        url: format!("http://{addr}/mcp"),
        project_id: project.id.to_string(),
    }
}

fn specforge(server: &Server) -> Command {
    let mut cmd = Command::cargo_bin("specforge").unwrap();
    cmd.env("SPECFORGE_MCP_URL", &server.url)
        .env("MCP_TOKEN", TOKEN)
        .env_remove("RUST_LOG");
    cmd
}

fn write_json(dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    path
}

// ---------------------------------------------------------------------------
// Offline behaviour
// ---------------------------------------------------------------------------

#[test]
fn help_lists_client_commands() {
    Command::cargo_bin("specforge")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("create-snapshot"))
        .stdout(predicate::str::contains("import-project"))
        .stdout(predicate::str::contains("verify"));
}

#[test]
fn unreachable_server_exits_1() {
    Command::cargo_bin("specforge")
        .unwrap()
        .args(["--url", "http://127.0.0.1:1/mcp", "connect"])
        .assert()
        .code(1)
        .stderr(predicate::str::starts_with("error:"))
        .stderr(predicate::str::contains("cannot reach"));
}

#[test]
fn malformed_project_id_is_rejected_locally() {
    Command::cargo_bin("specforge")
        .unwrap()
        .args(["--url", "http://127.0.0.1:1/mcp", "create-snapshot", "--project", "nope"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("is not a UUID"));
}

#[test]
fn serve_rejects_unsupported_algorithm() {
    Command::cargo_bin("specforge")
        .unwrap()
        .arg("serve")
        .env("JWT_ALGORITHM", "RS256")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid server configuration"));
}

// ---------------------------------------------------------------------------
// Against a live server
// ---------------------------------------------------------------------------

#[test]
fn connect_and_handshake() {
    let server = start_server();
    specforge(&server)
        .arg("connect")
        .assert()
        .success()
        .stdout(predicate::str::contains("connected to specforge"));
    specforge(&server)
        .arg("handshake")
        .assert()
        .success()
        .stdout(predicate::str::contains("2024-11-05"))
        .stdout(predicate::str::contains("tools"));
}

#[test]
fn wrong_token_is_unauthorized() {
    let server = start_server();
    specforge(&server)
        .env("MCP_TOKEN", "wrong")
        .arg("connect")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unauthorized"));
}

#[test]
fn tools_lists_every_tool() {
    let server = start_server();
    let out = specforge(&server).args(["--json", "tools"]).output().unwrap();
    assert!(out.status.success());
    let tools: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let names: Vec<&str> = tools
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names.len(), 9);
    assert!(names.contains(&"create_snapshot"));
    assert!(names.contains(&"finalize_project_import"));
}

#[test]
fn create_then_post_snapshot() {
    let server = start_server();
    let out = specforge(&server)
        .args(["--json", "create-snapshot", "--project", &server.project_id])
        .output()
        .unwrap();
    assert!(out.status.success());
    let created: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(created["state"], "awaiting_post");
    let snapshot_id = created["snapshot_id"].as_str().unwrap().to_string();

    let files = TempDir::new().unwrap();
    let data = write_json(
        &files,
        "data.json",
        r#"{"fileTree": ["src/main.rs"], "apiRoutes": ["/health"], "db": {"migrations": ["001_init"]}}"#,
    );
    specforge(&server)
        .args(["post-snapshot", "--snapshot", &snapshot_id, "--data"])
        .arg(&data)
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"))
        .stdout(predicate::str::contains("approved"));

    // A completed snapshot refuses a second post.
    specforge(&server)
        .args(["post-snapshot", "--snapshot", &snapshot_id, "--data"])
        .arg(&data)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid state transition"));
}

#[test]
fn verify_passes_and_fails_on_verdict() {
    let server = start_server();
    let files = TempDir::new().unwrap();

    let good = write_json(&files, "good.json", r#"{"fileTree": ["a.rs"], "apiRoutes": ["/a"]}"#);
    specforge(&server)
        .args(["verify", "--project", &server.project_id, "--data"])
        .arg(&good)
        .assert()
        .success()
        .stdout(predicate::str::contains("approved"));

    let thin = write_json(&files, "thin.json", r#"{"fileTree": ["a.rs"]}"#);
    specforge(&server)
        .args(["verify", "--project", &server.project_id, "--data"])
        .arg(&thin)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("reality check"));
}

#[test]
fn post_snapshot_missing_file() {
    let server = start_server();
    specforge(&server)
        .args([
            "post-snapshot",
            "--snapshot",
            "67e55044-10b1-426f-9247-bb680e5fe0c8",
            "--data",
            "/definitely/not/here.json",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed to read"));
}

#[test]
fn import_project_reports_completeness() {
    let server = start_server();
    let files = TempDir::new().unwrap();
    let catalogue = write_json(
        &files,
        "catalogue.json",
        r#"{"project_overview": {"name": "shop"}, "modules": [{"name": "cart"}]}"#,
    );

    let out = specforge(&server)
        .args(["--json", "import-project", "--project", &server.project_id, "--finalize", "--catalogue"])
        .arg(&catalogue)
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let result: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert!(result["completeness_score"].as_i64().unwrap() > 0);
    assert_eq!(result["locked"], true);

    let empty = write_json(&files, "empty.json", "{}");
    specforge(&server)
        .args(["import-project", "--project", &server.project_id, "--catalogue"])
        .arg(&empty)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("non-empty JSON object"));
}
