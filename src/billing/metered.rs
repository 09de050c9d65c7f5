//! In-memory metered billing.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{BillingError, BillingHook};
use crate::config::BillingConfig;

/// Multipliers are expressed in per-mille so the ledger stays integral.
const PER_MILLE: u64 = 1000;

/// One charged call.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub resource: String,
    pub operation: String,
    pub cost: u64,
    pub response_size: usize,
    pub elapsed_ms: u64,
    pub timestamp: u64,
}

/// Totals for one subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageSummary {
    pub total_cost: u64,
    pub usage_count: usize,
    pub by_resource: BTreeMap<String, u64>,
}

/// Billing hook backed by an in-process ledger.
#[derive(Debug)]
pub struct MeteredBilling {
    default_cost: u64,
    base_costs: HashMap<String, u64>,
    initial_balance: u64,
    balances: DashMap<String, u64>,
    usage: DashMap<String, Vec<UsageRecord>>,
}

impl MeteredBilling {
    pub fn new(config: &BillingConfig) -> Self {
        Self {
            default_cost: config.default_cost,
            base_costs: config.base_costs.clone(),
            initial_balance: config.initial_balance,
            balances: DashMap::new(),
            usage: DashMap::new(),
        }
    }

    fn base_cost(&self, resource: &str) -> u64 {
        self.base_costs.get(resource).copied().unwrap_or(self.default_cost)
    }

    /// Add funds to `subject`, opening the account if needed. Returns the new balance.
    pub fn credit(&self, subject: &str, amount: u64) -> u64 {
        let mut balance = self.balances.entry(subject.to_string()).or_insert(0);
        *balance = balance.saturating_add(amount);
        *balance
    }

    pub fn balance(&self, subject: &str) -> Option<u64> {
        self.balances.get(subject).map(|b| *b)
    }

    pub fn usage_summary(&self, subject: &str) -> UsageSummary {
        let Some(records) = self.usage.get(subject) else {
            return UsageSummary::default();
        };
        let mut summary = UsageSummary {
            usage_count: records.len(),
            ..UsageSummary::default()
        };
        for record in records.iter() {
            summary.total_cost += record.cost;
            *summary.by_resource.entry(record.resource.clone()).or_insert(0) += record.cost;
        }
        summary
    }
}

/// Complexity from param count and rendered size.
fn complexity_multiplier(params: &Map<String, Value>) -> u64 {
    let count = params.len();
    let size: usize = params.values().map(|v| v.to_string().len()).sum();
    if count <= 2 && size < 100 {
        1000
    } else if count <= 5 && size < 500 {
        1500
    } else {
        2000
    }
}

/// Listing operations tend to return more data than writes.
fn size_multiplier(operation: &str, params: &Map<String, Value>) -> u64 {
    let text = format!("{} {}", operation, Value::Object(params.clone())).to_lowercase();
    if ["list", "search", "query"].iter().any(|k| text.contains(k)) {
        1200
    } else if ["create", "update"].iter().any(|k| text.contains(k)) {
        1100
    } else {
        1000
    }
}

fn time_multiplier(elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 1.0 {
        1000
    } else if secs <= 3.0 {
        1100
    } else if secs <= 10.0 {
        1300
    } else {
        1500
    }
}

fn apply(cost: u64, multiplier: u64) -> u64 {
    cost.saturating_mul(multiplier) / PER_MILLE
}

#[async_trait]
impl BillingHook for MeteredBilling {
    async fn estimate_cost(&self, resource: &str, operation: &str, params: &Map<String, Value>) -> u64 {
        let cost = apply(self.base_cost(resource), complexity_multiplier(params));
        apply(cost, size_multiplier(operation, params))
    }

    async fn track_usage(
        &self,
        subject: &str,
        resource: &str,
        operation: &str,
        response_size: usize,
        elapsed: Duration,
        estimate: u64,
    ) -> u64 {
        let cost = apply(estimate, time_multiplier(elapsed));
        let record = UsageRecord {
            id: Uuid::new_v4(),
            resource: resource.to_string(),
            operation: operation.to_string(),
            cost,
            response_size,
            elapsed_ms: elapsed.as_millis() as u64,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        };
        self.usage.entry(subject.to_string()).or_default().push(record);
        tracing::debug!(subject = %subject, resource = %resource, cost, "Tracked usage");
        cost
    }

    async fn deduct(&self, subject: &str, cost: u64, memo: &str) -> Result<(), BillingError> {
        let mut balance = match self.balances.get_mut(subject) {
            Some(balance) => balance,
            None if self.initial_balance > 0 => self
                .balances
                .entry(subject.to_string())
                .or_insert(self.initial_balance),
            None => return Err(BillingError::UnknownAccount(subject.to_string())),
        };

        if *balance < cost {
            return Err(BillingError::InsufficientFunds {
                subject: subject.to_string(),
                balance: *balance,
                cost,
            });
        }
        *balance -= cost;
        tracing::info!(subject = %subject, cost, remaining = *balance, memo = %memo, "Deducted usage cost");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn billing(initial_balance: u64) -> MeteredBilling {
        MeteredBilling::new(&BillingConfig {
            enabled: true,
            initial_balance,
            ..BillingConfig::default()
        })
    }

    fn params(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_estimate_scales_with_complexity() {
        let billing = billing(0);
        assert_eq!(billing.estimate_cost("wikipedia", "get_page", &params(json!({"title": "Rust"}))).await, 100);

        let medium = params(json!({"a": 1, "b": 2, "c": 3}));
        assert_eq!(billing.estimate_cost("wikipedia", "get_page", &medium).await, 150);

        // Unknown resources use the default cost; "search" adds the size factor.
        assert_eq!(billing.estimate_cost("unknown", "search", &Map::new()).await, 1200);
    }

    #[tokio::test]
    async fn test_slow_calls_cost_more() {
        let billing = billing(0);
        let fast = billing.track_usage("borg-1", "gmail", "send", 10, Duration::from_millis(200), 500).await;
        let slow = billing.track_usage("borg-1", "gmail", "send", 10, Duration::from_secs(12), 500).await;
        assert_eq!((fast, slow), (500, 750));

        let summary = billing.usage_summary("borg-1");
        assert_eq!(summary.usage_count, 2);
        assert_eq!(summary.total_cost, 1250);
        assert_eq!(summary.by_resource["gmail"], 1250);
    }

    #[tokio::test]
    async fn test_deduct_checks_balance() {
        let billing = billing(0);
        assert_eq!(
            billing.deduct("borg-1", 10, "memo").await,
            Err(BillingError::UnknownAccount("borg-1".into()))
        );

        billing.credit("borg-1", 100);
        billing.deduct("borg-1", 60, "memo").await.unwrap();
        assert_eq!(billing.balance("borg-1"), Some(40));

        let err = billing.deduct("borg-1", 60, "memo").await.unwrap_err();
        assert!(matches!(err, BillingError::InsufficientFunds { balance: 40, cost: 60, .. }));
        assert_eq!(billing.balance("borg-1"), Some(40));
    }

    #[tokio::test]
    async fn test_initial_balance_opens_accounts() {
        let billing = billing(1000);
        billing.deduct("borg-new", 300, "memo").await.unwrap();
        assert_eq!(billing.balance("borg-new"), Some(700));
    }
}
