//! 노드가 내려받는 포워딩 설정 생성

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

use crate::db::{GostRuleRecord, IpTablesRuleRecord, RuleRecord, RuleRepository, TargetRecord};

/// 설정 포맷 버전
pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTarget {
    pub host: String,
    pub port: i64,
    pub weight: i64,
    pub enabled: bool,
}

impl From<TargetRecord> for NodeTarget {
    fn from(record: TargetRecord) -> Self {
        Self {
            host: record.host,
            port: record.port,
            weight: record.weight,
            enabled: record.enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GostConfig {
    pub transport: String,
    pub tls: bool,
    pub chain: String,
    pub timeout: i64,
}

impl From<GostRuleRecord> for GostConfig {
    fn from(record: GostRuleRecord) -> Self {
        Self {
            transport: record.transport,
            tls: record.tls,
            chain: record.chain,
            timeout: record.timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpTablesConfig {
    pub proto: String,
    pub snat: bool,
    pub iface: String,
}

impl From<IpTablesRuleRecord> for IpTablesConfig {
    fn from(record: IpTablesRuleRecord) -> Self {
        Self {
            proto: record.proto,
            snat: record.snat,
            iface: record.iface,
        }
    }
}

/// 프로토콜별 규칙 설정
///
/// JSON에서는 `protocol` 필드로 구분됩니다.
/// 전용 설정이 아직 저장되지 않은 규칙은 설정 필드가 빠집니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol")]
pub enum RuleProtocolConfig {
    #[serde(rename = "gost")]
    Gost {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gost_config: Option<GostConfig>,
    },
    #[serde(rename = "iptables")]
    IpTables {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        iptables_config: Option<IpTablesConfig>,
    },
}

impl RuleProtocolConfig {
    pub fn protocol(&self) -> &'static str {
        match self {
            RuleProtocolConfig::Gost { .. } => "gost",
            RuleProtocolConfig::IpTables { .. } => "iptables",
        }
    }
}

/// 노드에 전달되는 규칙 하나
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRuleConfig {
    pub id: i64,
    pub name: String,
    pub listen_port: i64,
    pub mode: String,
    pub targets: Vec<NodeTarget>,
    /// kbps, 0 = 무제한
    pub speed_limit: i64,
    pub enabled: bool,
    #[serde(flatten)]
    pub protocol: RuleProtocolConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub version: u32,
    pub rules: Vec<NodeRuleConfig>,
}

/// 노드 설정 생성기
pub struct NodeConfigBuilder {
    rules: RuleRepository,
}

impl NodeConfigBuilder {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            rules: RuleRepository::new(pool),
        }
    }

    /// 노드의 활성 규칙 전체로 설정 생성
    ///
    /// 지원하지 않는 프로토콜의 규칙은 경고 후 제외합니다.
    pub async fn build(&self, node_id: i64) -> Result<NodeConfig, sqlx::Error> {
        let records = self.rules.list_by_node(node_id, true).await?;
        let mut rules = Vec::with_capacity(records.len());

        for record in records {
            let Some(protocol) = self.protocol_config(&record).await? else {
                warn!("지원하지 않는 프로토콜 규칙 제외: rule={} protocol={}", record.id, record.protocol);
                continue;
            };

            let targets = self
                .rules
                .targets(record.id)
                .await?
                .into_iter()
                .map(NodeTarget::from)
                .collect();

            rules.push(NodeRuleConfig {
                id: record.id,
                name: record.name,
                listen_port: record.listen_port,
                mode: record.mode,
                targets,
                speed_limit: record.speed_limit,
                enabled: record.enabled,
                protocol,
            });
        }

        debug!("노드 설정 생성: node={} rules={}", node_id, rules.len());

        Ok(NodeConfig {
            version: CONFIG_VERSION,
            rules,
        })
    }

    async fn protocol_config(
        &self,
        record: &RuleRecord,
    ) -> Result<Option<RuleProtocolConfig>, sqlx::Error> {
        let config = match record.protocol.as_str() {
            "gost" => Some(RuleProtocolConfig::Gost {
                gost_config: self.rules.gost_config(record.id).await?.map(GostConfig::from),
            }),
            "iptables" => Some(RuleProtocolConfig::IpTables {
                iptables_config: self
                    .rules
                    .iptables_config(record.id)
                    .await?
                    .map(IpTablesConfig::from),
            }),
            _ => None,
        };
        Ok(config)
    }
}
