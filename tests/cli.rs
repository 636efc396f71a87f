use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/docs.sqlite"

[retrieval]
max_chunks = 5

[embedding]
provider = "openai"
batch_size = 10
"#,
        root.display()
    );

    let config_path = config_dir.join("qa.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

/// `qa` with credentials and log settings scrubbed from the environment.
fn qa_command(root: &Path, config_path: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_qa"));
    cmd.current_dir(root)
        .env_remove("OPENAI_API_KEY")
        .env_remove("GROQ_API_KEY")
        .env_remove("SUPABASE_URL")
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(config_path)
        .args(args);
    cmd
}

fn run_qa(root: &Path, config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = qa_command(root, config_path, args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run qa binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn seed(db_path: &Path) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let pool = sqlx::SqlitePool::connect(&format!("sqlite:{}", db_path.display()))
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO documents (id, bucket, object_path, filename) VALUES ('7', 'uploads', 'handbook.pdf', 'handbook.pdf')",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO chunks (id, document_id, chunk_index, text) VALUES ('c0', '7', 0, 'Employees accrue 15 PTO days/year.')",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES ('c0', '7', 'Employees accrue 15 PTO days/year.')",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;
    });
}

#[test]
fn test_init_is_idempotent() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, ok) = run_qa(tmp.path(), &config_path, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized"));
    assert!(tmp.path().join("data/docs.sqlite").exists());

    let (_, stderr, ok) = run_qa(tmp.path(), &config_path, &["init"]);
    assert!(ok, "second init failed: {}", stderr);
}

#[test]
fn test_ask_json_without_credentials() {
    let (tmp, config_path) = setup_test_env();
    let (_, stderr, ok) = run_qa(tmp.path(), &config_path, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    seed(&tmp.path().join("data/docs.sqlite"));

    let (stdout, stderr, ok) = run_qa(
        tmp.path(),
        &config_path,
        &["ask", "What", "is", "the", "PTO", "policy?", "--json"],
    );
    assert!(ok, "ask failed: {}", stderr);

    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["answer"], "Employees accrue 15 PTO days/year.");
    let refs = json["references"].as_array().unwrap();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0]["index"], 1);
    assert_eq!(refs[0]["id"], "doc-7-chunk-0");
}

#[test]
fn test_ask_with_no_match() {
    let (tmp, config_path) = setup_test_env();
    run_qa(tmp.path(), &config_path, &["init"]);
    seed(&tmp.path().join("data/docs.sqlite"));

    let (stdout, stderr, ok) = run_qa(tmp.path(), &config_path, &["ask", "photosynthesis"]);
    assert!(ok, "ask failed: {}", stderr);
    assert!(stdout.contains("I don't know based on the documents."));
    assert!(stdout.contains("No document references found"));
}

#[test]
fn test_embed_missing_requires_provider() {
    let (tmp, config_path) = setup_test_env();
    run_qa(tmp.path(), &config_path, &["init"]);

    let (_, stderr, ok) = run_qa(tmp.path(), &config_path, &["embed", "missing"]);
    assert!(!ok);
    assert!(stderr.contains("Embedding provider unavailable"));
}

#[test]
fn test_invalid_config_rejected() {
    let (tmp, config_path) = setup_test_env();
    fs::write(&config_path, "[retrieval]\nmax_chunks = 0\n").unwrap();

    let (_, stderr, ok) = run_qa(tmp.path(), &config_path, &["init"]);
    assert!(!ok);
    assert!(stderr.contains("max_chunks"));
}

#[test]
fn test_ask_before_init_does_not_create_database() {
    let (tmp, config_path) = setup_test_env();

    let (_, stderr, ok) = run_qa(tmp.path(), &config_path, &["ask", "hello"]);
    assert!(!ok);
    assert!(stderr.contains("qa init"), "unexpected stderr: {}", stderr);
    assert!(!tmp.path().join("data/docs.sqlite").exists());
}

#[test]
fn test_dotenv_log_level_is_honored() {
    let (tmp, config_path) = setup_test_env();
    run_qa(tmp.path(), &config_path, &["init"]);
    fs::write(tmp.path().join(".env"), "RUST_LOG=debug\n").unwrap();

    let output = qa_command(tmp.path(), &config_path, &["ask", "photosynthesis"])
        .output()
        .expect("failed to run qa binary");
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("DEBUG"), "no debug output: {}", stderr);
}
