use std::collections::HashMap;
use std::time::Duration;

use log::{info, warn};
use rand::{thread_rng, Rng};
use reqwest::Client;
use serde_json::json;
use tokio::time;

/// 가상 노드 설정
#[derive(Debug, Clone)]
struct NodeTemplate {
    node_id: i64,
    secret: String,
    rule_ids: Vec<i64>,
    /// 하트비트 주기당 규칙별 증가 바이트 범위
    bytes_per_tick: (i64, i64),
    interval_ms: u64,
    /// 주기마다 노드 재시작(카운터 초기화)이 일어날 확률
    restart_probability: f64,
}

impl NodeTemplate {
    fn new(
        node_id: i64,
        secret: &str,
        rule_ids: &[i64],
        bytes_per_tick: (i64, i64),
        interval_ms: u64,
        restart_probability: f64,
    ) -> Self {
        Self {
            node_id,
            secret: secret.to_string(),
            rule_ids: rule_ids.to_vec(),
            bytes_per_tick,
            interval_ms,
            restart_probability,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), String> {
    // 로깅 초기화
    env_logger::init();

    println!("relaymeter 노드 하트비트 시뮬레이터 시작");

    let client = Client::new();
    let api_base_url =
        std::env::var("RELAYMETER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());

    // 노드/규칙은 서버 DB에 미리 등록되어 있어야 함
    let node_templates = vec![
        // 트래픽이 많은 홍콩 노드
        NodeTemplate::new(
            1,
            "node-1-secret",
            &[1, 2, 3],
            (512 * 1024, 8 * 1024 * 1024),
            5000,
            0.01,
        ),
        // 한가한 일본 노드, 재시작이 잦음
        NodeTemplate::new(2, "node-2-secret", &[4, 5], (0, 256 * 1024), 10000, 0.05),
    ];

    let mut handles = Vec::new();

    for template in node_templates {
        let client_clone = client.clone();
        let base_url = api_base_url.clone();
        let handle = tokio::spawn(async move {
            simulate_node(client_clone, &base_url, template).await;
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.await.map_err(|e| e.to_string())?;
    }

    Ok(())
}

async fn simulate_node(client: Client, api_base_url: &str, template: NodeTemplate) {
    let mut interval = time::interval(Duration::from_millis(template.interval_ms));
    let mut counters: HashMap<i64, (i64, i64)> =
        template.rule_ids.iter().map(|id| (*id, (0, 0))).collect();

    println!(
        "시뮬레이션 시작: node={} rules={:?} ({}ms 간격)",
        template.node_id, template.rule_ids, template.interval_ms
    );

    loop {
        interval.tick().await;

        advance_counters(&mut counters, &template);
        let payload = heartbeat_payload(&template, &counters);

        match send_heartbeat(&client, api_base_url, &payload).await {
            Ok(response) => {
                info!(
                    "✅ 하트비트 성공: node={} updated={} disabled={}",
                    template.node_id, response["rules_updated"], response["rules_disabled"]
                );
            }
            Err(e) => {
                warn!("❌ 하트비트 실패: node={} - {}", template.node_id, e);
                // 서버가 다운된 경우 잠시 대기
                time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

/// 누적 카운터 증가. 일정 확률로 노드 재시작을 흉내 내 0부터 다시 셈
fn advance_counters(counters: &mut HashMap<i64, (i64, i64)>, template: &NodeTemplate) {
    let mut rng = thread_rng();

    if rng.gen_bool(template.restart_probability) {
        warn!("🔄 노드 재시작 시뮬레이션: node={}", template.node_id);
        for value in counters.values_mut() {
            *value = (0, 0);
        }
    }

    let (low, high) = template.bytes_per_tick;
    for (bytes_in, bytes_out) in counters.values_mut() {
        *bytes_in += rng.gen_range(low..=high);
        *bytes_out += rng.gen_range(low..=high);
    }
}

fn heartbeat_payload(
    template: &NodeTemplate,
    counters: &HashMap<i64, (i64, i64)>,
) -> serde_json::Value {
    let mut rng = thread_rng();

    let traffic_stats: serde_json::Map<String, serde_json::Value> = counters
        .iter()
        .flat_map(|(rule_id, (bytes_in, bytes_out))| {
            [
                (format!("rule_{}_in", rule_id), json!(bytes_in)),
                (format!("rule_{}_out", rule_id), json!(bytes_out)),
            ]
        })
        .collect();

    json!({
        "node_id": template.node_id,
        "secret": template.secret,
        "probe": {
            "timestamp": chrono::Utc::now().timestamp(),
            "cpu": { "usage_percent": rng.gen_range(1.0..90.0), "cores": 4 },
            "memory": {
                "total": 8u64 << 30,
                "used": rng.gen_range(1u64 << 30..6u64 << 30),
                "usage_percent": rng.gen_range(10.0..80.0)
            },
            "network": []
        },
        "traffic_stats": traffic_stats
    })
}

async fn send_heartbeat(
    client: &Client,
    api_base_url: &str,
    payload: &serde_json::Value,
) -> Result<serde_json::Value, String> {
    let url = format!("{}/api/node/heartbeat", api_base_url);

    let response = client
        .post(&url)
        .json(payload)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if response.status().is_success() {
        response.json().await.map_err(|e| e.to_string())
    } else {
        let status = response.status();
        let error_text = response.text().await.map_err(|e| e.to_string())?;
        Err(format!("HTTP {}: {}", status, error_text))
    }
}
