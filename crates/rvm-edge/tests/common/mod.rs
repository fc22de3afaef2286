//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use rvm_db::{Database, DbConfig};
use rvm_edge::{
    EdgeConfig, HardwareProbe, HttpResponse, HttpTransport, TransportError,
};

/// Answers requests per path from queued replies and records every request.
#[derive(Default)]
pub struct MockBackend {
    replies: Mutex<Vec<(String, VecDeque<Result<HttpResponse, TransportError>>)>>,
    requests: Mutex<Vec<(String, Value)>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn queue(&self, path: &str, reply: Result<HttpResponse, TransportError>) {
        let mut replies = self.replies.lock().unwrap();
        match replies.iter_mut().find(|(p, _)| p == path) {
            Some((_, queue)) => queue.push_back(reply),
            None => replies.push((path.to_string(), VecDeque::from([reply]))),
        }
    }

    pub fn ok(&self, path: &str, body: Value) {
        self.queue(path, Ok(HttpResponse::new(200, body)));
    }

    pub fn fail(&self, path: &str) {
        self.queue(
            path,
            Err(TransportError::Timeout(Duration::from_secs(5))),
        );
    }

    pub fn requests_to(&self, path: &str) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, body)| body.clone())
            .collect()
    }
}

#[async_trait]
impl HttpTransport for MockBackend {
    async fn post_json(
        &self,
        path: &str,
        body: &Value,
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.requests
            .lock()
            .unwrap()
            .push((path.to_string(), body.clone()));

        self.replies
            .lock()
            .unwrap()
            .iter_mut()
            .find(|(p, _)| p == path)
            .and_then(|(_, queue)| queue.pop_front())
            .unwrap_or_else(|| Err(TransportError::Connection("backend unreachable".into())))
    }
}

/// A probe with a fixed distance and a minimal diagnostics payload.
pub struct StaticProbe;

#[async_trait]
impl HardwareProbe for StaticProbe {
    async fn poll_bin_distance(&self) -> Option<f64> {
        Some(50.0)
    }

    async fn discovery_snapshot(&self) -> Value {
        json!({"reality": {"cameras": []}, "configured_count": 0, "healthy_count": 0})
    }

    async fn diagnostics_snapshot(&self) -> Value {
        json!({
            "device_id": "test-machine",
            "name": "test-rvm",
            "health_metrics": {"cpu_usage_percent": null},
        })
    }
}

/// A file-backed database in a temp dir that lives as long as the guard.
pub async fn temp_db() -> (Database, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(DbConfig::new(dir.path().join("offline.db")))
        .await
        .unwrap();
    (db, dir)
}

pub fn test_config() -> EdgeConfig {
    let mut config = EdgeConfig::default();
    config.server.api_key = "test-key".into();
    config.device.serial_number = "RVM-TEST-01".into();
    config.bridge.bind_addr = "127.0.0.1".into();
    config.bridge.port = 0;
    config
}

/// Polls `check` until it holds or a second passes.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
