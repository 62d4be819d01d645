//! Usage Ledger — append-only record of per-request token/cost (spec.md §4.1).

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::warn;

use cortex_core::SessionId;

use crate::classifier::Tier;
use crate::error::LedgerError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub tier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub daily_spend: f64,
    pub monthly_spend: f64,
    pub daily_budget: Option<f64>,
    pub monthly_budget: Option<f64>,
    pub daily_remaining: Option<f64>,
    pub is_daily_warning: bool,
    pub is_daily_exceeded: bool,
    pub is_monthly_warning: bool,
    pub is_monthly_exceeded: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ModelPrice {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

/// `model -> pricing`. Unknown models price at zero and are logged, never
/// rejected — a missing price entry must never block a completion.
#[derive(Debug, Clone, Default)]
pub struct PricingTable(pub HashMap<String, ModelPrice>);

impl PricingTable {
    pub fn price_of(&self, model: &str) -> ModelPrice {
        match self.0.get(model) {
            Some(p) => *p,
            None => {
                warn!(model, "no pricing entry; treating as zero-cost");
                ModelPrice { input_per_mtok: 0.0, output_per_mtok: 0.0 }
            }
        }
    }
}

fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS usage_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            date TEXT NOT NULL,
            session_id TEXT NOT NULL,
            model TEXT NOT NULL,
            tier TEXT NOT NULL,
            input_tokens INTEGER NOT NULL,
            output_tokens INTEGER NOT NULL,
            cost_usd REAL NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_usage_log_date ON usage_log(date);",
    )
}

pub struct UsageLedger {
    db: Mutex<Connection>,
    pricing: PricingTable,
    daily_limit: Option<f64>,
    monthly_limit: Option<f64>,
    warning_pct: f64,
}

impl UsageLedger {
    pub fn open(
        path: &str,
        pricing: PricingTable,
        daily_limit: Option<f64>,
        monthly_limit: Option<f64>,
        warning_pct: f64,
    ) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn), pricing, daily_limit, monthly_limit, warning_pct })
    }

    pub fn open_in_memory(pricing: PricingTable) -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn), pricing, daily_limit: None, monthly_limit: None, warning_pct: 0.75 })
    }

    /// Cost is computed at record time from the pricing table — append-only,
    /// never recomputed after the fact.
    pub fn record(
        &self,
        session_id: &SessionId,
        model: &str,
        tier: Tier,
        input_tokens: u32,
        output_tokens: u32,
    ) -> Result<UsageRecord, LedgerError> {
        let price = self.pricing.price_of(model);
        let cost = (input_tokens as f64 / 1_000_000.0) * price.input_per_mtok
            + (output_tokens as f64 / 1_000_000.0) * price.output_per_mtok;

        let now = Utc::now();
        let record = UsageRecord {
            timestamp: now,
            session_id: session_id.as_str().to_string(),
            model: model.to_string(),
            input_tokens,
            output_tokens,
            cost_usd: cost,
            tier: tier.as_str().to_string(),
        };

        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO usage_log (timestamp, date, session_id, model, tier, input_tokens, output_tokens, cost_usd)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.timestamp.to_rfc3339(),
                record.timestamp.format("%Y-%m-%d").to_string(),
                record.session_id,
                record.model,
                record.tier,
                record.input_tokens,
                record.output_tokens,
                record.cost_usd,
            ],
        )?;

        Ok(record)
    }

    pub fn get_budget_status(&self) -> Result<BudgetStatus, LedgerError> {
        let now = Utc::now();
        let today = now.format("%Y-%m-%d").to_string();
        let month_prefix = now.format("%Y-%m").to_string();

        let conn = self.db.lock().unwrap();
        let daily_spend: f64 = conn.query_row(
            "SELECT COALESCE(SUM(cost_usd), 0.0) FROM usage_log WHERE date = ?1",
            params![today],
            |row| row.get(0),
        )?;
        let monthly_spend: f64 = conn.query_row(
            "SELECT COALESCE(SUM(cost_usd), 0.0) FROM usage_log WHERE date LIKE ?1",
            params![format!("{month_prefix}%")],
            |row| row.get(0),
        )?;

        let daily_remaining = self.daily_limit.map(|l| (l - daily_spend).max(0.0));
        let is_daily_warning = self
            .daily_limit
            .map(|l| daily_spend >= l * self.warning_pct)
            .unwrap_or(false);
        let is_daily_exceeded = self.daily_limit.map(|l| daily_spend >= l).unwrap_or(false);
        let is_monthly_warning = self
            .monthly_limit
            .map(|l| monthly_spend >= l * self.warning_pct)
            .unwrap_or(false);
        let is_monthly_exceeded = self.monthly_limit.map(|l| monthly_spend >= l).unwrap_or(false);

        Ok(BudgetStatus {
            daily_spend,
            monthly_spend,
            daily_budget: self.daily_limit,
            monthly_budget: self.monthly_limit,
            daily_remaining,
            is_daily_warning,
            is_daily_exceeded,
            is_monthly_warning,
            is_monthly_exceeded,
        })
    }

    pub fn get_usage_history(&self, since: DateTime<Utc>) -> Result<Vec<UsageRecord>, LedgerError> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT timestamp, session_id, model, tier, input_tokens, output_tokens, cost_usd
             FROM usage_log WHERE timestamp >= ?1 ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![since.to_rfc3339()], |row| {
            let ts: String = row.get(0)?;
            Ok(UsageRecord {
                timestamp: DateTime::parse_from_rfc3339(&ts)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or(since),
                session_id: row.get(1)?,
                model: row.get(2)?,
                tier: row.get(3)?,
                input_tokens: row.get(4)?,
                output_tokens: row.get(5)?,
                cost_usd: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn estimate_cost(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        let price = self.pricing.price_of(model);
        (input_tokens as f64 / 1_000_000.0) * price.input_per_mtok
            + (output_tokens as f64 / 1_000_000.0) * price.output_per_mtok
    }

    /// Truncates the WAL back into the main database file. `record` already
    /// writes through synchronously, so there is no in-memory buffer to
    /// flush; this is the gardener's light-tick equivalent (spec.md §4.9
    /// light tick) — keeping the WAL from growing unbounded between ticks.
    pub fn checkpoint(&self) -> Result<(), LedgerError> {
        let conn = self.db.lock().unwrap();
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn pricing() -> PricingTable {
        let mut m = HashMap::new();
        m.insert("cheap".to_string(), ModelPrice { input_per_mtok: 1.0, output_per_mtok: 2.0 });
        PricingTable(m)
    }

    #[test]
    fn record_computes_cost_from_pricing_table() {
        let ledger = UsageLedger::open_in_memory(pricing()).unwrap();
        let record = ledger
            .record(&SessionId::from("s1"), "cheap", Tier::Simple, 1_000_000, 500_000)
            .unwrap();
        assert!((record.cost_usd - 2.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_is_zero_cost() {
        let ledger = UsageLedger::open_in_memory(pricing()).unwrap();
        let record = ledger
            .record(&SessionId::from("s1"), "mystery-model", Tier::Simple, 1000, 1000)
            .unwrap();
        assert_eq!(record.cost_usd, 0.0);
    }

    #[test]
    fn budget_status_reflects_recorded_spend() {
        let mut ledger = UsageLedger::open_in_memory(pricing()).unwrap();
        ledger.daily_limit = Some(1.0);
        ledger.record(&SessionId::from("s1"), "cheap", Tier::Simple, 1_000_000, 0).unwrap();
        let status = ledger.get_budget_status().unwrap();
        assert!((status.daily_spend - 1.0).abs() < 1e-9);
        assert!(status.is_daily_exceeded);
    }
}
