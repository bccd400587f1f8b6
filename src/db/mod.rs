pub mod models;
pub mod repository;

use std::str::FromStr;

use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Error as SqlxError;

pub use models::*;
pub use repository::{
    NodeRepository, OrderRepository, PackageRepository, RuleRepository, TrafficLogRepository,
    UserRepository,
};

/// SQLite 데이터베이스 초기화 및 연결
pub async fn init_database(
    database_url: &str,
    max_connections: u32,
) -> Result<SqlitePool, SqlxError> {
    info!("🗄️  SQLite 데이터베이스 초기화 중... ({})", database_url);

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true);

    // 연결 풀 생성
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    // 테이블 생성
    create_tables(&pool).await?;

    info!("✅ 데이터베이스 초기화 완료");

    Ok(pool)
}

/// 필요한 테이블 생성
async fn create_tables(pool: &SqlitePool) -> Result<(), SqlxError> {
    // 사용자 테이블 (balance 단위: 바이트, 남은 사용 가능 트래픽)
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            balance INTEGER NOT NULL DEFAULT 0,
            user_group_id INTEGER NOT NULL DEFAULT 0,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )"
    )
    .execute(pool)
    .await?;

    // 노드 테이블
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS nodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            host TEXT NOT NULL,
            port INTEGER NOT NULL,
            secret TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'offline',
            protocols TEXT NOT NULL DEFAULT '[]',
            last_seen INTEGER,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )"
    )
    .execute(pool)
    .await?;

    // 포워딩 규칙 테이블 (traffic_used / traffic_limit 단위: 바이트, limit 0 = 무제한)
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS forwarding_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            node_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            protocol TEXT NOT NULL,
            enabled BOOLEAN NOT NULL DEFAULT 1,
            traffic_used INTEGER NOT NULL DEFAULT 0,
            traffic_limit INTEGER NOT NULL DEFAULT 0,
            speed_limit INTEGER NOT NULL DEFAULT 0,
            mode TEXT NOT NULL DEFAULT 'direct',
            listen_port INTEGER NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )"
    )
    .execute(pool)
    .await?;

    // 포워딩 대상 테이블
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS targets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            rule_id INTEGER NOT NULL,
            host TEXT NOT NULL,
            port INTEGER NOT NULL,
            weight INTEGER NOT NULL DEFAULT 1,
            enabled BOOLEAN NOT NULL DEFAULT 1
        )"
    )
    .execute(pool)
    .await?;

    // gost 전용 설정
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS gost_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            rule_id INTEGER NOT NULL UNIQUE,
            transport TEXT NOT NULL DEFAULT 'tcp',
            tls BOOLEAN NOT NULL DEFAULT 0,
            chain TEXT NOT NULL DEFAULT '',
            timeout INTEGER NOT NULL DEFAULT 0
        )"
    )
    .execute(pool)
    .await?;

    // iptables 전용 설정
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS iptables_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            rule_id INTEGER NOT NULL UNIQUE,
            proto TEXT NOT NULL DEFAULT 'tcp',
            snat BOOLEAN NOT NULL DEFAULT 0,
            iface TEXT NOT NULL DEFAULT ''
        )"
    )
    .execute(pool)
    .await?;

    // 패키지 테이블 (traffic: 바이트, price: 센트)
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS packages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            traffic INTEGER NOT NULL,
            price INTEGER NOT NULL,
            user_group_id INTEGER NOT NULL DEFAULT 0,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )"
    )
    .execute(pool)
    .await?;

    // 주문 테이블
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            trade_no TEXT NOT NULL UNIQUE,
            user_id INTEGER NOT NULL,
            package_id INTEGER NOT NULL DEFAULT 0,
            amount INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            pay_type TEXT NOT NULL DEFAULT '',
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )"
    )
    .execute(pool)
    .await?;

    // 트래픽 로그 테이블 (추가 전용)
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS traffic_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            rule_id INTEGER NOT NULL,
            node_id INTEGER NOT NULL,
            bytes_in INTEGER NOT NULL DEFAULT 0,
            bytes_out INTEGER NOT NULL DEFAULT 0,
            timestamp INTEGER NOT NULL
        )"
    )
    .execute(pool)
    .await?;

    // 인덱스 생성
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_rules_node ON forwarding_rules(node_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_rules_user ON forwarding_rules(user_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_targets_rule ON targets(rule_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_user ON orders(user_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_traffic_logs_rule ON traffic_logs(rule_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_traffic_logs_time ON traffic_logs(timestamp)")
        .execute(pool)
        .await?;

    info!("📋 테이블 생성 완료");

    Ok(())
}
