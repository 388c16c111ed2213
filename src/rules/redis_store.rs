//! Redis-backed rule store.
//!
//! Layout, under the configured key prefix:
//! - `rules:{customer_id}`: hash of rule name to the JSON record
//! - `rule_expiry`: sorted set of `[customer_id, name]` scored by expiry in
//!   microseconds since the epoch
//! - `audit`: list of JSON audit entries, newest first, trimmed to capacity
//!
//! Every mutation runs as one script, so a record, its expiry index entry and
//! its audit entry change together.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Script};
use serde_json::json;
use std::fmt;
use tracing::{debug, warn};

use super::model::{CustomerId, OperationKind, RuleData};
use super::store::{AuditEntry, RuleRecord, RuleStore, StoreError};
use crate::config::StorageConfig;

/// Writes a record when its presence matches the mode: `insert` requires the
/// rule to be absent, `update` requires it to exist. Returns 0 otherwise.
const WRITE_RULE: &str = r#"
local exists = redis.call('HEXISTS', KEYS[1], ARGV[1]) == 1
if (ARGV[7] == 'insert') == exists then
    return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
if ARGV[3] == '' then
    redis.call('ZREM', KEYS[2], ARGV[4])
else
    redis.call('ZADD', KEYS[2], ARGV[3], ARGV[4])
end
redis.call('LPUSH', KEYS[3], ARGV[5])
redis.call('LTRIM', KEYS[3], 0, tonumber(ARGV[6]) - 1)
return 1
"#;

const DELETE_RULE: &str = r#"
if redis.call('HDEL', KEYS[1], ARGV[1]) == 0 then
    return 0
end
redis.call('ZREM', KEYS[2], ARGV[2])
redis.call('LPUSH', KEYS[3], ARGV[3])
redis.call('LTRIM', KEYS[3], 0, tonumber(ARGV[4]) - 1)
return 1
"#;

/// Removes every indexed rule scored strictly below ARGV[2].
const DELETE_EXPIRED: &str = r#"
local members = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[2])
local deleted = 0
for _, member in ipairs(members) do
    local rule = cjson.decode(member)
    deleted = deleted + redis.call('HDEL', ARGV[1] .. rule[1], rule[2])
    redis.call('ZREM', KEYS[1], member)
end
return deleted
"#;

#[derive(Debug, Clone, Copy)]
enum WriteMode {
    Insert,
    Update,
}

impl WriteMode {
    fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Insert => "insert",
            WriteMode::Update => "update",
        }
    }
}

/// Rule store on a Redis server, durable across restarts.
#[derive(Clone)]
pub struct RedisRuleStore {
    connection: ConnectionManager,
    key_prefix: String,
    audit_capacity: usize,
    write_script: Script,
    delete_script: Script,
    delete_expired_script: Script,
}

impl fmt::Debug for RedisRuleStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisRuleStore")
            .field("key_prefix", &self.key_prefix)
            .field("audit_capacity", &self.audit_capacity)
            .finish_non_exhaustive()
    }
}

impl RedisRuleStore {
    pub fn new(connection: ConnectionManager, config: &StorageConfig) -> Self {
        Self {
            connection,
            key_prefix: config.key_prefix.clone(),
            audit_capacity: config.audit_capacity.max(1),
            write_script: Script::new(WRITE_RULE),
            delete_script: Script::new(DELETE_RULE),
            delete_expired_script: Script::new(DELETE_EXPIRED),
        }
    }

    fn rules_prefix(&self) -> String {
        format!("{}rules:", self.key_prefix)
    }

    fn rules_key(&self, customer_id: &CustomerId) -> String {
        format!("{}{}", self.rules_prefix(), customer_id)
    }

    fn expiry_key(&self) -> String {
        format!("{}rule_expiry", self.key_prefix)
    }

    fn audit_key(&self) -> String {
        format!("{}audit", self.key_prefix)
    }

    /// The most recent audit entries, newest first.
    pub async fn audit_entries(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection.clone();
        let raw: Vec<String> = conn
            .lrange(self.audit_key(), 0, limit as isize - 1)
            .await
            .map_err(store_unavailable)?;
        raw.iter().map(|entry| decode(entry)).collect()
    }

    async fn write(
        &self,
        record: &RuleRecord,
        mode: WriteMode,
        action: OperationKind,
    ) -> Result<bool, StoreError> {
        let audit = AuditEntry::for_record(record, action);
        let score = record
            .expired_date
            .map(|ts| ts.timestamp_micros().to_string())
            .unwrap_or_default();

        let mut conn = self.connection.clone();
        let written: i64 = self
            .write_script
            .key(self.rules_key(&record.customer_id))
            .key(self.expiry_key())
            .key(self.audit_key())
            .arg(&record.name)
            .arg(encode(record)?)
            .arg(score)
            .arg(index_member(&record.customer_id, &record.name))
            .arg(encode(&audit)?)
            .arg(self.audit_capacity)
            .arg(mode.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(store_unavailable)?;
        Ok(written == 1)
    }
}

fn store_unavailable(err: RedisError) -> StoreError {
    warn!(error = %err, "Redis rule store call failed");
    StoreError::Unavailable(err.to_string())
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value)
        .map_err(|e| StoreError::Unavailable(format!("Failed to encode record: {}", e)))
}

fn decode<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw)
        .map_err(|e| StoreError::Unavailable(format!("Corrupt stored record: {}", e)))
}

/// Expiry index member naming one rule; read back by the expiry script.
fn index_member(customer_id: &CustomerId, rule_name: &str) -> String {
    json!([customer_id, rule_name]).to_string()
}

#[async_trait]
impl RuleStore for RedisRuleStore {
    async fn get(
        &self,
        customer_id: &CustomerId,
        rule_name: &str,
    ) -> Result<RuleRecord, StoreError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn
            .hget(self.rules_key(customer_id), rule_name)
            .await
            .map_err(store_unavailable)?;

        match raw {
            Some(raw) => decode(&raw),
            None => Err(StoreError::NotFound {
                customer_id: customer_id.to_string(),
                rule_name: rule_name.to_string(),
            }),
        }
    }

    async fn insert(
        &self,
        customer_id: &CustomerId,
        rule: &RuleData,
    ) -> Result<String, StoreError> {
        let record = RuleRecord::new(customer_id, rule, Utc::now());
        if !self.write(&record, WriteMode::Insert, OperationKind::Create).await? {
            return Err(StoreError::Conflict {
                customer_id: customer_id.to_string(),
                rule_name: rule.name.clone(),
            });
        }

        debug!(customer_id = %customer_id, rule_id = %record.rule_id, "Rule inserted");
        Ok(record.rule_id)
    }

    async fn update(&self, customer_id: &CustomerId, rule: &RuleData) -> Result<(), StoreError> {
        let mut record = self.get(customer_id, &rule.name).await?;
        record.apply(rule, Utc::now());

        // The rule may have been deleted since it was read.
        if !self.write(&record, WriteMode::Update, OperationKind::Update).await? {
            return Err(StoreError::NotFound {
                customer_id: customer_id.to_string(),
                rule_name: rule.name.clone(),
            });
        }
        Ok(())
    }

    async fn delete(&self, customer_id: &CustomerId, rule_name: &str) -> Result<(), StoreError> {
        let audit = AuditEntry::new(customer_id, rule_name, OperationKind::Delete, json!({}));

        let mut conn = self.connection.clone();
        let deleted: i64 = self
            .delete_script
            .key(self.rules_key(customer_id))
            .key(self.expiry_key())
            .key(self.audit_key())
            .arg(rule_name)
            .arg(index_member(customer_id, rule_name))
            .arg(encode(&audit)?)
            .arg(self.audit_capacity)
            .invoke_async(&mut conn)
            .await
            .map_err(store_unavailable)?;

        if deleted == 0 {
            return Err(StoreError::NotFound {
                customer_id: customer_id.to_string(),
                rule_name: rule_name.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        let deleted: u64 = self
            .delete_expired_script
            .key(self.expiry_key())
            .arg(self.rules_prefix())
            .arg(now.timestamp_micros())
            .invoke_async(&mut conn)
            .await
            .map_err(store_unavailable)?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_member_is_a_json_pair() {
        let customer = CustomerId::parse("acme:eu").unwrap();
        let member = index_member(&customer, "r\"1");
        let decoded: (String, String) = serde_json::from_str(&member).unwrap();
        assert_eq!(decoded, ("acme:eu".to_string(), "r\"1".to_string()));
    }
}
