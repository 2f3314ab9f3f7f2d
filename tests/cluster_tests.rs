//! Core to replica token distribution over real sockets

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use keyhub::api::create_router;
use keyhub::cache::CacheLayer;
use keyhub::config::Config;
use keyhub::storage::Database;
use keyhub::AppState;

const CORE: &str = "shared-core-secret";

struct Node {
    _temp: TempDir,
    state: Arc<AppState>,
    url: String,
}

async fn spawn_node(vars: &[(&str, &str)]) -> Node {
    let temp = TempDir::new().unwrap();
    let mut env: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    env.insert("DATA_DIR".to_string(), temp.path().display().to_string());
    env.insert("CORE_TOKEN".to_string(), CORE.to_string());
    env.insert("CLUSTER_PUSH_TIMEOUT_MS".to_string(), "1000".to_string());
    let config = Config::from_lookup(|name| env.get(name).cloned()).unwrap();

    let db = Database::open(temp.path()).unwrap();
    let cache = CacheLayer::from_config(&config.cache).await.unwrap();
    let http_client = reqwest::Client::builder().no_proxy().build().unwrap();
    let state = Arc::new(AppState::new(config, db, cache, http_client).unwrap());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(Arc::clone(&state));
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    Node {
        _temp: temp,
        state,
        url: format!("http://{addr}"),
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

async fn lookup_status(node: &Node, token: &str) -> u16 {
    client()
        .get(format!("{}/authorized_keys/web1/deploy", node.url))
        .bearer_auth(token)
        .send()
        .await
        .unwrap()
        .status()
        .as_u16()
}

async fn push(node: &Node, token: &str, clients: &[&str]) -> reqwest::Response {
    client()
        .post(format!("{}/tokens", node.url))
        .bearer_auth(token)
        .json(&json!({"tokens": {"admins": [], "clients": clients}}))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_core_push_reaches_replica() {
    let replica = spawn_node(&[
        ("NODE_ID", "replica-1"),
        ("CLUSTER_MODE", "replica"),
        ("CLIENT_TOKENS", "old-client"),
        ("CACHE_ENABLED", "memory"),
    ])
    .await;
    let replica_url = replica.url.clone();
    let core = spawn_node(&[
        ("NODE_ID", "core"),
        ("CLUSTER_MODE", "core"),
        ("CLUSTER_REPLICAS", replica_url.as_str()),
        ("CLIENT_TOKENS", "old-client"),
    ])
    .await;

    assert_eq!(lookup_status(&replica, "old-client").await, 200);

    let response = push(&core, CORE, &["new-client"]).await;
    assert_eq!(response.status().as_u16(), 204);

    for node in [&core, &replica] {
        assert_eq!(lookup_status(node, "old-client").await, 401);
        assert_eq!(lookup_status(node, "new-client").await, 200);
    }

    let persisted = replica.state.db.get_token_table().unwrap().unwrap();
    assert_eq!(persisted.clients, vec!["new-client".to_string()]);
}

#[tokio::test]
async fn test_unreachable_replica_reported_per_target() {
    let replica = spawn_node(&[("NODE_ID", "replica-1"), ("CLUSTER_MODE", "replica")]).await;
    let replicas = format!("{},http://127.0.0.1:9", replica.url);
    let core = spawn_node(&[
        ("NODE_ID", "core"),
        ("CLUSTER_MODE", "core"),
        ("CLUSTER_REPLICAS", replicas.as_str()),
    ])
    .await;

    let response = push(&core, CORE, &["new-client"]).await;
    assert_eq!(response.status().as_u16(), 207);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], 207);
    let targets = body["targets"].as_array().unwrap();
    assert_eq!(targets.len(), 2);
    assert_eq!(targets[0]["target"], replica.url.as_str());
    assert_eq!(targets[0]["ok"], true);
    assert_eq!(targets[1]["target"], "http://127.0.0.1:9");
    assert_eq!(targets[1]["ok"], false);
    assert!(targets[1]["error"].is_string());

    // The reachable replica and the core itself still took the table
    assert_eq!(lookup_status(&replica, "new-client").await, 200);
    assert_eq!(lookup_status(&core, "new-client").await, 200);
}

#[tokio::test]
async fn test_replica_rejects_push_without_core_token() {
    let replica = spawn_node(&[
        ("NODE_ID", "replica-1"),
        ("CLUSTER_MODE", "replica"),
        ("CLIENT_TOKENS", "old-client"),
    ])
    .await;

    let response = push(&replica, "not-the-core-token", &["evil"]).await;
    assert_eq!(response.status().as_u16(), 401);
    assert_eq!(lookup_status(&replica, "old-client").await, 200);
    assert_eq!(lookup_status(&replica, "evil").await, 401);
}
