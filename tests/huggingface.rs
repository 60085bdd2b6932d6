mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use llmpal::catalog::{build_backends, AliasTable, CatalogBackend, HuggingFaceBackend};
use llmpal::config::{BackendConfig, BackendKind, Settings};
use llmpal::resolver::{Constraints, Resolution, Resolver, ResolverSettings};
use llmpal::BackendError;

const PHI_REPO: &str = "bartowski/Phi-3.5-mini-instruct-GGUF";
const Q4_SHA: &str = "4fa3ef0b2a1c8d9e7f6a5b4c3d2e1f0a9b8c7d6e5f4a3b2c1d0e9f8a7b6c5d4e";

type Queries = Arc<Mutex<Vec<HashMap<String, String>>>>;

async fn search(State(queries): State<Queries>, Query(params): Query<HashMap<String, String>>) -> Json<serde_json::Value> {
    queries.lock().unwrap().push(params);
    Json(json!([
        {"id": PHI_REPO},
        {"id": "someone/Phi-3.5-mini-instruct-GGUF"},
        {"id": "microsoft/Phi-3.5-mini-instruct"}
    ]))
}

async fn tree(Path((owner, repo)): Path<(String, String)>) -> Response {
    if format!("{}/{}", owner, repo) != PHI_REPO {
        return (StatusCode::NOT_FOUND, "Repository not found").into_response();
    }
    Json(json!([
        {"type": "file", "path": ".gitattributes", "size": 1500},
        {"type": "file", "path": "README.md", "size": 9000},
        {"type": "file", "path": "Phi-3.5-mini-instruct-Q4_K_M.gguf", "size": 135,
         "lfs": {"oid": Q4_SHA, "size": 2_393_232_384u64, "pointerSize": 135}},
        {"type": "file", "path": "Phi-3.5-mini-instruct-Q8_0.gguf", "size": 135,
         "lfs": {"oid": "ffff", "size": 4_061_221_632u64, "pointerSize": 135}},
        {"type": "file", "path": "Phi-3.5-mini-instruct-f32-00001-of-00002.gguf", "size": 135}
    ]))
    .into_response()
}

async fn catalog() -> (String, Queries) {
    let queries: Queries = Arc::new(Mutex::new(Vec::new()));
    let router = Router::new()
        .route("/api/models", get(search))
        .route("/api/models/{owner}/{repo}/tree/main", get(tree))
        .with_state(queries.clone());
    (common::serve(router).await, queries)
}

fn backend(base: &str, patterns: &[&str], timeout: Duration) -> HuggingFaceBackend {
    let config = BackendConfig {
        name: "huggingface".to_string(),
        kind: BackendKind::HuggingFace,
        enabled: true,
        base_url: base.to_string(),
        api_url: format!("{}/api", base),
        repo_patterns: patterns.iter().map(|p| p.to_string()).collect(),
    };
    HuggingFaceBackend::new(&config, timeout).unwrap()
}

#[tokio::test]
async fn search_lists_single_file_artifacts_of_kept_repositories() {
    let (base, queries) = catalog().await;
    let hf = backend(&base, &["bartowski/*-GGUF"], Duration::from_secs(5));

    let mut candidates = hf.search("phi 3.5 mini", 5).await.unwrap();
    candidates.sort_by(|a, b| a.filename.cmp(&b.filename));

    let files: Vec<&str> = candidates.iter().map(|c| c.filename.as_str()).collect();
    assert_eq!(
        files,
        vec!["Phi-3.5-mini-instruct-Q4_K_M.gguf", "Phi-3.5-mini-instruct-Q8_0.gguf"]
    );
    assert!(candidates.iter().all(|c| c.repo_id == PHI_REPO && c.backend == "huggingface"));
    assert_eq!(candidates[0].size_bytes, Some(2_393_232_384));
    assert_eq!(candidates[0].sha256.as_deref(), Some(Q4_SHA));

    let params = queries.lock().unwrap()[0].clone();
    assert_eq!(params.get("search").map(String::as_str), Some("phi 3.5 mini"));
    assert_eq!(params.get("filter").map(String::as_str), Some("gguf"));
    assert_eq!(params.get("limit").map(String::as_str), Some("20"));
}

/// Returns a dozen foreign repositories ahead of the kept one, truncated to
/// whatever `limit` the caller asks for.
async fn crowded_search(Query(params): Query<HashMap<String, String>>) -> Json<serde_json::Value> {
    let limit: usize = params.get("limit").and_then(|l| l.parse().ok()).unwrap_or(usize::MAX);
    let mut repos: Vec<serde_json::Value> = (0..12)
        .map(|i| json!({"id": format!("someone{}/Phi-3.5-mini-instruct-GGUF", i)}))
        .collect();
    repos.push(json!({"id": PHI_REPO}));
    repos.truncate(limit);
    Json(serde_json::Value::Array(repos))
}

#[tokio::test]
async fn pattern_filtering_sees_more_than_the_requested_limit() {
    let router = Router::new()
        .route("/api/models", get(crowded_search))
        .route("/api/models/{owner}/{repo}/tree/main", get(tree));
    let base = common::serve(router).await;
    let hf = backend(&base, &["bartowski/*-GGUF"], Duration::from_secs(5));

    let candidates = hf.search("phi 3.5 mini", 2).await.unwrap();
    assert!(!candidates.is_empty());
    assert!(candidates.iter().all(|c| c.repo_id == PHI_REPO));
}

#[tokio::test]
async fn exact_lookup_handles_unknown_repositories_and_named_files() {
    let (base, _) = catalog().await;
    let hf = backend(&base, &[], Duration::from_secs(5));

    assert!(hf.resolve_exact("nobody/Nothing-GGUF").await.unwrap().is_empty());

    let all = hf.resolve_exact(PHI_REPO).await.unwrap();
    assert_eq!(all.len(), 2);

    let one = hf
        .resolve_exact(&format!("{}/Phi-3.5-mini-instruct-Q8_0.gguf", PHI_REPO))
        .await
        .unwrap();
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].filename, "Phi-3.5-mini-instruct-Q8_0.gguf");
}

#[tokio::test]
async fn slow_catalog_reports_a_timeout() {
    let router = Router::new().route(
        "/api/models",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Json(json!([]))
        }),
    );
    let base = common::serve(router).await;
    let hf = backend(&base, &[], Duration::from_millis(100));

    let err = hf.search("anything", 5).await.unwrap_err();
    assert!(matches!(err, BackendError::Timeout { ref backend, .. } if backend == "huggingface"), "{err:?}");
}

#[tokio::test]
async fn configured_backends_keep_their_timeout() {
    let router = Router::new().route(
        "/api/models",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Json(json!([]))
        }),
    );
    let base = common::serve(router).await;
    let dir = tempfile::tempdir().unwrap();
    let local = format!(
        r#"
[models]
directory = "{models}"

[resolver]
backend_timeout_ms = 100

[[backends]]
name = "slow-hub"
kind = "huggingface"
enabled = true
base_url = "{base}"
api_url = "{base}/api"
repo_patterns = []

[[backends]]
name = "switched-off"
kind = "huggingface"
enabled = false
base_url = "{base}"
api_url = "{base}/api"
repo_patterns = []

[logging]
level = "info"
file = "{logs}"
"#,
        models = dir.path().join("models").display(),
        logs = dir.path().join("logs").display(),
        base = base,
    );
    std::fs::write(dir.path().join("local.toml"), local).unwrap();
    let settings = Settings::load_from(dir.path()).unwrap();

    let backends = build_backends(&settings).unwrap();
    let names: Vec<&str> = backends.iter().map(|b| b.name()).collect();
    assert_eq!(names, vec!["slow-hub"]);

    let err = backends[0].search("anything", 5).await.unwrap_err();
    assert!(matches!(err, BackendError::Timeout { ref backend, .. } if backend == "slow-hub"), "{err:?}");
}

#[tokio::test]
async fn resolver_picks_the_preferred_file_from_the_catalog() {
    let (base, _) = catalog().await;
    let hf: Arc<dyn CatalogBackend> = Arc::new(backend(&base, &["bartowski/*-GGUF"], Duration::from_secs(5)));
    let models = tempfile::tempdir().unwrap();
    let resolver = Resolver::new(AliasTable::empty(), vec![hf], ResolverSettings::default(), models.path());

    let Resolution::Selected(artifact) = resolver.resolve("phi 3.5 mini", &Constraints::default()).await.unwrap()
    else {
        panic!("expected a confident pick");
    };
    assert_eq!(artifact.repo_id, PHI_REPO);
    assert_eq!(artifact.filename, "Phi-3.5-mini-instruct-Q4_K_M.gguf");
    assert_eq!(artifact.sha256.as_deref(), Some(Q4_SHA));
    assert_eq!(artifact.expected_size, Some(2_393_232_384));
    assert_eq!(
        artifact.download_url,
        format!("{}/{}/resolve/main/Phi-3.5-mini-instruct-Q4_K_M.gguf", base, PHI_REPO)
    );
    assert_eq!(artifact.destination, models.path().join("Phi-3.5-mini-instruct-Q4_K_M.gguf"));
}
