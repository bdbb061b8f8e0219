use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use meme_stash::config::Config;
use meme_stash::engine::Engine;
use meme_stash::models::ImageSource;
use meme_stash::oracle::DisabledOracle;
use meme_stash::server::router;

/// Serves the router on an ephemeral port and returns its base URL.
async fn spawn_server(engine: Arc<Engine>, cancel: CancellationToken) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(engine);
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .unwrap();
    });
    format!("http://{}", addr)
}

async fn setup() -> (TempDir, Arc<Engine>) {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::builder(tmp.path())
        .config(Config {
            max_reg_num: 10,
            ..Config::default()
        })
        .oracle(Arc::new(DisabledOracle))
        .seed(1)
        .build()
        .unwrap();
    for n in 1..=2u8 {
        engine
            .ingest(
                None,
                ImageSource::Bytes {
                    data: vec![n; 24],
                    ext: Some("gif".to_string()),
                },
            )
            .await
            .unwrap();
    }
    (tmp, Arc::new(engine))
}

#[tokio::test]
async fn test_query_endpoints() {
    let (_tmp, engine) = setup().await;
    let cancel = CancellationToken::new();
    let base = spawn_server(engine, cancel.clone()).await;
    let client = reqwest::Client::new();

    let health: serde_json::Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let status: serde_json::Value = client
        .get(format!("{}/memes/status", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["current_count"], 2);
    assert_eq!(status["max_count"], 10);
    assert_eq!(status["available_emojis"], 2);

    let count: serde_json::Value = client
        .get(format!("{}/memes/count", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(count["count"], 2);

    let emotions: Vec<String> = client
        .get(format!("{}/memes/emotions", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(emotions, vec!["其它".to_string()]);

    let sample: Vec<serde_json::Value> = client
        .get(format!("{}/memes/random?n=5", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sample.len(), 2);

    let record: serde_json::Value = client
        .get(format!("{}/memes/emotion/{}", base, "其它"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(record["category"], "其它");
    assert_eq!(record["usage_count"], 1);
    assert!(record["id"].as_str().unwrap().ends_with(".gif"));

    cancel.cancel();
}

#[tokio::test]
async fn test_error_contract() {
    let (_tmp, engine) = setup().await;
    let cancel = CancellationToken::new();
    let base = spawn_server(engine, cancel.clone()).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/memes/emotion/{}", base, "开心"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let resp = client
        .get(format!("{}/memes/search?q=", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    cancel.cancel();
}
