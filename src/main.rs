use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use log::{info, warn};

use relaymeter::cache::{EphemeralStore, MemoryStore, RedisStore};
use relaymeter::db::init_database;
use relaymeter::{start_server, AppConfig, ServerState};

/// `sqlite://dir/file.db` 형태면 상위 디렉터리 생성
fn ensure_sqlite_dir(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = database_url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let path = path.split('?').next().unwrap_or(path);

    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("데이터베이스 디렉터리 생성 실패: {}", parent.display()))?;
    }
    Ok(())
}

fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn EphemeralStore>> {
    if !config.redis.enabled {
        warn!("Redis 비활성화: 프로세스 내부 임시 저장소 사용 (단일 인스턴스 전용)");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let store = RedisStore::new(&config.redis.url)
        .map_err(|e| anyhow::anyhow!("Redis URL 오류 ({}): {}", config.redis.url, e))?;
    info!("🔗 Redis 임시 저장소 사용: {}", config.redis.url);
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = AppConfig::from_env();

    let log_env = env_logger::Env::default().default_filter_or(config.log_level.as_str());
    env_logger::Builder::from_env(log_env).init();

    println!("relaymeter 서버 시작 중...");

    ensure_sqlite_dir(&config.database.url)?;
    let pool = init_database(&config.database.url, config.database.max_connections)
        .await
        .context("데이터베이스 초기화 실패")?;

    let store = build_store(&config)?;
    let state = ServerState::new(pool, store, &config);

    start_server(&config.server, state).await.context("서버 실행 실패")?;

    Ok(())
}
