use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::{Duration, sleep};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use deeplink_core::impls::{MemoryStore, StaticDeviceInfo};
use deeplink_core::ports::{HttpResponse, HttpTransport, TransportError};
use deeplink_core::{DeepLinkBuilder, InitOptions, LinkProperties, SdkConfig};

#[derive(Debug, Deserialize)]
struct EventBody {
    event: String,
    #[serde(default)]
    metadata: Option<Value>,
}

/// ローカルで応答するバックエンドの代役。最初の数回はわざと 503 を返す
struct DemoBackend {
    remaining_failures: AtomicU32,
}

impl DemoBackend {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }

    fn respond(&self, url: &Url, body: Option<&Value>) -> HttpResponse {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            println!("backend: intentional 503 for {} (left={left})", url.path());
            return HttpResponse::new(503, "");
        }

        let path = url.path().trim_start_matches('/');
        let reply = match path {
            "v1/install" | "v1/open" => json!({
                "identity_id": "ID-1",
                "session_id": "S-1",
                "device_fingerprint_id": "F-1",
                "link": "https://demo.app.link/?%24identity_id=ID-1",
                "data": "{\"+clicked_branch_link\":true,\"campaign\":\"launch\"}",
            }),
            "v1/profile" => json!({
                "identity_id": "ID-2",
                "link": "https://demo.app.link/?%24identity_id=ID-2",
                "referring_data": { "campaign": "launch" },
            }),
            "v1/event" => {
                if let Some(event) = body.and_then(|b| serde_json::from_value::<EventBody>(b.clone()).ok()) {
                    println!("backend: event {:?} metadata={:?}", event.event, event.metadata);
                }
                json!({})
            }
            "v1/url" => json!({ "url": "https://demo.app.link/a1b2c3" }),
            "v1/redeem" | "v1/close" | "v1/logout" => json!({}),
            p if p.starts_with("v1/credits/") => json!({ "default": 50 }),
            p if p.starts_with("v1/referrals/") => json!({ "signup": { "total": 1, "unique": 1 } }),
            _ => return HttpResponse::new(404, "{\"error\":\"unknown endpoint\"}"),
        };
        HttpResponse::new(200, reply.to_string())
    }
}

#[async_trait]
impl HttpTransport for DemoBackend {
    async fn get(&self, url: &Url, _timeout: Duration) -> Result<HttpResponse, TransportError> {
        sleep(Duration::from_millis(20)).await;
        Ok(self.respond(url, None))
    }

    async fn post(&self, url: &Url, body: &Value, _timeout: Duration) -> Result<HttpResponse, TransportError> {
        sleep(Duration::from_millis(20)).await;
        Ok(self.respond(url, Some(body)))
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    // (A) 設定: 環境変数で上書き可能。デモなのでリトライ間隔は短く
    let mut config = SdkConfig::new("key_test_demo").apply_env();
    config.retry.interval = Duration::from_millis(200);
    let keep_alive = config.keep_alive;
    let close_delay = config.close_delay;

    // (B) ストレージ・トランスポート・端末情報を差し込んで構築
    let mut device = Map::new();
    device.insert("os".into(), json!("demo-os"));
    device.insert("app_version".into(), json!(env!("CARGO_PKG_VERSION")));
    let client = DeepLinkBuilder::new(config)
        .storage(Arc::new(MemoryStore::new()))
        .transport(Arc::new(DemoBackend::new(2)))
        .device_info(Arc::new(StaticDeviceInfo::new(device)))
        .build()?;

    // (C) セッション開始（最初の 2 回は 503 → リトライで成功）
    let params = client
        .init_session_with(InitOptions {
            deep_link_url: Some("demo://open?link_click_id=12345".into()),
            ..InitOptions::default()
        })
        .await?;
    println!("session started: latest params = {params}");

    // (D) アクション
    let first = client.set_identity("demo-user").await?;
    println!("identified: first params = {first}");

    let mut metadata = Map::new();
    metadata.insert("plan".into(), json!("free\ntrial"));
    client.user_completed_action("signup", Some(metadata)).await?;

    if client.load_rewards().await? {
        println!("credits: {}", client.credits());
    }
    client.redeem_rewards(100).await?;
    println!("credits after redeem: {}", client.credits());

    if client.load_action_counts().await? {
        println!("signup total={} unique={}", client.total_count_for_action("signup"), client.unique_count_for_action("signup"));
    }

    let properties = LinkProperties {
        channel: Some("demo".into()),
        feature: Some("sharing".into()),
        ..LinkProperties::default()
    };
    let link = client.create_short_link(&properties).await?;
    let cached = client.create_short_link(&properties).await?;
    println!("short link: {link:?} (cached: {cached:?})");

    // (E) バックグラウンドへ: keep-alive が切れてから close、close_delay 後に送信される
    sleep(keep_alive + Duration::from_millis(100)).await;
    client.on_session_should_end();
    sleep(close_delay + Duration::from_millis(200)).await;
    info!(phase = ?client.session_phase(), pending = ?client.pending_requests(), "after close");

    // (F) 停止: キューは書き出され、次回起動時に再送される
    client.shutdown().await?;
    println!("final state: {}", serde_json::to_string_pretty(&client.session_state())?);
    Ok(())
}
