//! Rule persistence.
//!
//! `RuleStore` is the seam to the document store holding rule records. The
//! in-memory implementation keeps records keyed by `(customer_id, name)` and
//! appends an audit entry for every mutation, keeping only the most recent
//! entries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use super::model::{CustomerId, Expiry, OperationKind, RuleData};

/// Errors raised by rule store calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error(
        "Rule not found for the requested customer \
         [customer_id={customer_id}][rule_name={rule_name}]"
    )]
    NotFound {
        customer_id: String,
        rule_name: String,
    },
    #[error(
        "Rule with this name already exists for this customer \
         [customer_id={customer_id}][rule_name={rule_name}]"
    )]
    Conflict {
        customer_id: String,
        rule_name: String,
    },
    #[error("Rule store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    fn not_found(customer_id: &CustomerId, rule_name: &str) -> Self {
        StoreError::NotFound {
            customer_id: customer_id.to_string(),
            rule_name: rule_name.to_string(),
        }
    }
}

/// Audit entries kept when no capacity is configured.
pub const DEFAULT_AUDIT_CAPACITY: usize = 10_000;

/// A stored rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub rule_id: String,
    pub customer_id: CustomerId,
    pub name: String,
    pub description: String,
    pub ip: String,
    pub expired_date: Option<DateTime<Utc>>,
    pub creation_date: DateTime<Utc>,
    pub update_date: DateTime<Utc>,
}

impl RuleRecord {
    /// A fresh record for `rule`, with a new id. A cleared expiry means none.
    pub fn new(customer_id: &CustomerId, rule: &RuleData, now: DateTime<Utc>) -> Self {
        Self {
            rule_id: Uuid::new_v4().to_string(),
            customer_id: customer_id.clone(),
            name: rule.name.clone(),
            description: rule.description.clone(),
            ip: rule.ip.clone(),
            expired_date: rule.expired_date.timestamp(),
            creation_date: now,
            update_date: now,
        }
    }

    /// Overwrite the editable fields with `rule`. An unset expiry keeps the
    /// stored one, a cleared expiry removes it.
    pub fn apply(&mut self, rule: &RuleData, now: DateTime<Utc>) {
        self.description = rule.description.clone();
        self.ip = rule.ip.clone();
        match rule.expired_date {
            Expiry::Unset => {}
            Expiry::Clear => self.expired_date = None,
            Expiry::At(ts) => self.expired_date = Some(ts),
        }
        self.update_date = now;
    }

    /// Whether the record expired strictly before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expired_date, Some(ts) if ts < now)
    }

    /// The public view of the record; a missing expiry is reported as `null`.
    pub fn to_rule_data(&self) -> RuleData {
        RuleData::new(&self.name, &self.description, &self.ip)
            .with_expiry(Expiry::from(self.expired_date))
    }
}

/// One audit trail entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub rule_name: String,
    pub action: OperationKind,
    pub timestamp: DateTime<Utc>,
    pub customer_id: CustomerId,
    pub details: serde_json::Value,
}

impl AuditEntry {
    pub fn new(
        customer_id: &CustomerId,
        rule_name: &str,
        action: OperationKind,
        details: serde_json::Value,
    ) -> Self {
        Self {
            rule_name: rule_name.to_string(),
            action,
            timestamp: Utc::now(),
            customer_id: customer_id.clone(),
            details,
        }
    }

    /// Entry for a created or updated record.
    pub fn for_record(record: &RuleRecord, action: OperationKind) -> Self {
        let details = json!({
            "description": record.description,
            "ip": record.ip,
            "expired_date": record.expired_date,
        });
        Self::new(&record.customer_id, &record.name, action, details)
    }
}

/// Persistent collection of rule records.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn get(
        &self,
        customer_id: &CustomerId,
        rule_name: &str,
    ) -> Result<RuleRecord, StoreError>;

    /// Insert a new rule and return its generated id.
    async fn insert(&self, customer_id: &CustomerId, rule: &RuleData) -> Result<String, StoreError>;

    async fn update(&self, customer_id: &CustomerId, rule: &RuleData) -> Result<(), StoreError>;

    async fn delete(&self, customer_id: &CustomerId, rule_name: &str) -> Result<(), StoreError>;

    /// Delete every rule whose expiry is strictly before `now`, across all
    /// tenants, and return how many were removed.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

type RuleKey = (CustomerId, String);

/// Process-local rule store.
#[derive(Debug)]
pub struct InMemoryRuleStore {
    rules: RwLock<HashMap<RuleKey, RuleRecord>>,
    audit: Mutex<VecDeque<AuditEntry>>,
    audit_capacity: usize,
}

impl Default for InMemoryRuleStore {
    fn default() -> Self {
        Self::with_audit_capacity(DEFAULT_AUDIT_CAPACITY)
    }
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store keeping at most `audit_capacity` audit entries (at least one).
    pub fn with_audit_capacity(audit_capacity: usize) -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
            audit: Mutex::new(VecDeque::new()),
            audit_capacity: audit_capacity.max(1),
        }
    }

    /// Number of stored rules across all tenants.
    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    pub fn contains(&self, customer_id: &CustomerId, rule_name: &str) -> bool {
        self.rules
            .read()
            .contains_key(&(customer_id.clone(), rule_name.to_string()))
    }

    /// Snapshot of the retained audit trail, oldest first.
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit.lock().iter().cloned().collect()
    }

    fn record_audit(&self, entry: AuditEntry) {
        let mut audit = self.audit.lock();
        if audit.len() == self.audit_capacity {
            audit.pop_front();
        }
        audit.push_back(entry);
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn get(
        &self,
        customer_id: &CustomerId,
        rule_name: &str,
    ) -> Result<RuleRecord, StoreError> {
        self.rules
            .read()
            .get(&(customer_id.clone(), rule_name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::not_found(customer_id, rule_name))
    }

    async fn insert(
        &self,
        customer_id: &CustomerId,
        rule: &RuleData,
    ) -> Result<String, StoreError> {
        let key = (customer_id.clone(), rule.name.clone());
        let record = {
            let mut rules = self.rules.write();
            if rules.contains_key(&key) {
                return Err(StoreError::Conflict {
                    customer_id: customer_id.to_string(),
                    rule_name: rule.name.clone(),
                });
            }

            let record = RuleRecord::new(customer_id, rule, Utc::now());
            rules.insert(key, record.clone());
            record
        };

        debug!(customer_id = %customer_id, rule_id = %record.rule_id, "Rule inserted");
        self.record_audit(AuditEntry::for_record(&record, OperationKind::Create));
        Ok(record.rule_id)
    }

    async fn update(&self, customer_id: &CustomerId, rule: &RuleData) -> Result<(), StoreError> {
        let record = {
            let mut rules = self.rules.write();
            let record = rules
                .get_mut(&(customer_id.clone(), rule.name.clone()))
                .ok_or_else(|| StoreError::not_found(customer_id, &rule.name))?;

            record.apply(rule, Utc::now());
            record.clone()
        };

        self.record_audit(AuditEntry::for_record(&record, OperationKind::Update));
        Ok(())
    }

    async fn delete(&self, customer_id: &CustomerId, rule_name: &str) -> Result<(), StoreError> {
        let removed = self
            .rules
            .write()
            .remove(&(customer_id.clone(), rule_name.to_string()));
        if removed.is_none() {
            return Err(StoreError::not_found(customer_id, rule_name));
        }

        self.record_audit(AuditEntry::new(
            customer_id,
            rule_name,
            OperationKind::Delete,
            json!({}),
        ));
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|_, record| !record.is_expired(now));
        Ok((before - rules.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn customer(id: &str) -> CustomerId {
        CustomerId::parse(id).unwrap()
    }

    #[tokio::test]
    async fn test_names_are_unique_per_tenant_only() {
        let store = InMemoryRuleStore::new();
        let rule = RuleData::new("block-office", "office range", "10.0.0.1");

        store.insert(&customer("a"), &rule).await.unwrap();
        store.insert(&customer("b"), &rule).await.unwrap();
        assert_eq!(store.len(), 2);

        let duplicate = store.insert(&customer("a"), &rule).await;
        assert!(matches!(duplicate, Err(StoreError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_get_is_scoped_to_tenant() {
        let store = InMemoryRuleStore::new();
        store
            .insert(&customer("a"), &RuleData::new("r", "d", "1.1.1.1"))
            .await
            .unwrap();

        assert!(store.get(&customer("a"), "r").await.is_ok());
        assert!(matches!(
            store.get(&customer("b"), "r").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_expiry_tri_state() {
        let store = InMemoryRuleStore::new();
        let id = customer("a");
        let ts = Utc::now() + Duration::hours(1);
        store
            .insert(&id, &RuleData::new("r", "d", "1.1.1.1").with_expiry(Expiry::At(ts)))
            .await
            .unwrap();

        store
            .update(&id, &RuleData::new("r", "changed", "1.1.1.2"))
            .await
            .unwrap();
        let record = store.get(&id, "r").await.unwrap();
        assert_eq!(record.expired_date, Some(ts));
        assert_eq!(record.description, "changed");

        store
            .update(&id, &RuleData::new("r", "changed", "1.1.1.2").with_expiry(Expiry::Clear))
            .await
            .unwrap();
        assert_eq!(store.get(&id, "r").await.unwrap().expired_date, None);
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_rule() {
        let store = InMemoryRuleStore::new();
        let id = customer("a");
        assert!(matches!(
            store.update(&id, &RuleData::new("nope", "", "1.1.1.1")).await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.delete(&id, "nope").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_mutations_are_audited() {
        let store = InMemoryRuleStore::new();
        let id = customer("a");
        let rule = RuleData::new("r", "d", "1.1.1.1");
        store.insert(&id, &rule).await.unwrap();
        store.update(&id, &rule).await.unwrap();
        store.delete(&id, "r").await.unwrap();

        let actions: Vec<_> = store.audit_entries().iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            [OperationKind::Create, OperationKind::Update, OperationKind::Delete]
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_audit_trail_keeps_only_recent_entries() {
        let store = InMemoryRuleStore::with_audit_capacity(3);
        let id = customer("a");
        for name in ["r1", "r2", "r3", "r4", "r5"] {
            store.insert(&id, &RuleData::new(name, "", "1.1.1.1")).await.unwrap();
        }

        let names: Vec<_> = store
            .audit_entries()
            .into_iter()
            .map(|e| e.rule_name)
            .collect();
        assert_eq!(names, ["r3", "r4", "r5"]);
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_record_round_trips_through_json() {
        let id = customer("a");
        let rule = RuleData::new("r", "d", "1.1.1.1").with_expiry(Expiry::At(Utc::now()));
        let record = RuleRecord::new(&id, &rule, Utc::now());

        let stored = serde_json::to_string(&record).unwrap();
        assert_eq!(serde_json::from_str::<RuleRecord>(&stored).unwrap(), record);

        let entry = AuditEntry::for_record(&record, OperationKind::Create);
        let stored = serde_json::to_string(&entry).unwrap();
        assert_eq!(serde_json::from_str::<AuditEntry>(&stored).unwrap(), entry);

        assert!(serde_json::from_str::<CustomerId>("\"  \"").is_err());
    }

    #[tokio::test]
    async fn test_delete_expired_is_strict() {
        let store = InMemoryRuleStore::new();
        let id = customer("a");
        let now = Utc::now();
        store
            .insert(
                &id,
                &RuleData::new("past", "", "1.1.1.1")
                    .with_expiry(Expiry::At(now - Duration::seconds(1))),
            )
            .await
            .unwrap();
        store
            .insert(&id, &RuleData::new("boundary", "", "1.1.1.1").with_expiry(Expiry::At(now)))
            .await
            .unwrap();
        store
            .insert(&id, &RuleData::new("forever", "", "1.1.1.1"))
            .await
            .unwrap();

        assert_eq!(store.delete_expired(now).await.unwrap(), 1);
        assert!(!store.contains(&id, "past"));
        assert!(store.contains(&id, "boundary"));
        assert!(store.contains(&id, "forever"));
    }
}
