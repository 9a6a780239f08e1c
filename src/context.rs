//! Business-context collaborator.
//!
//! The data store that owns movements and balances is outside this core; the
//! pipeline only needs a read-only snapshot to ground the AI prompt.

use async_trait::async_trait;
use chrono::NaiveDate;

#[derive(Debug, Clone)]
pub struct TransactionSummary {
    pub date: NaiveDate,
    pub description: String,
    pub amount: f64,
}

/// Read-only snapshot embedded in classification/response prompts.
#[derive(Debug, Clone, Default)]
pub struct BusinessContext {
    pub recent_transactions: Vec<TransactionSummary>,
    pub total_balance: f64,
}

impl BusinessContext {
    /// Render the snapshot as a prompt block. Keeps the transaction list
    /// short; the prompt does not need the whole ledger.
    pub fn prompt_block(&self) -> String {
        let mut out = format!("Saldo complessivo: {:.2} EUR\n", self.total_balance);
        if self.recent_transactions.is_empty() {
            out.push_str("Nessun movimento recente.\n");
        } else {
            out.push_str("Movimenti recenti:\n");
            for tx in self.recent_transactions.iter().take(5) {
                out.push_str(&format!(
                    "- {} {} {:.2} EUR\n",
                    tx.date, tx.description, tx.amount
                ));
            }
        }
        out
    }
}

#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn snapshot(&self) -> anyhow::Result<BusinessContext>;
}

/// Fixed-snapshot store for tests and for deployments without a movement
/// store wired in.
#[derive(Debug, Default)]
pub struct StaticContextStore {
    context: BusinessContext,
}

impl StaticContextStore {
    pub fn new(context: BusinessContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ContextStore for StaticContextStore {
    async fn snapshot(&self) -> anyhow::Result<BusinessContext> {
        Ok(self.context.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_block_mentions_balance_and_transactions() {
        let ctx = BusinessContext {
            total_balance: 1523.40,
            recent_transactions: vec![TransactionSummary {
                date: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
                description: "Bonifico cliente".into(),
                amount: 800.0,
            }],
        };
        let block = ctx.prompt_block();
        assert!(block.contains("1523.40"));
        assert!(block.contains("Bonifico cliente"));
    }

    #[test]
    fn prompt_block_caps_transaction_list() {
        let tx = TransactionSummary {
            date: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            description: "x".into(),
            amount: 1.0,
        };
        let ctx = BusinessContext {
            total_balance: 0.0,
            recent_transactions: vec![tx; 20],
        };
        assert_eq!(ctx.prompt_block().matches("- ").count(), 5);
    }

    #[tokio::test]
    async fn static_store_returns_its_snapshot() {
        let store = StaticContextStore::new(BusinessContext {
            total_balance: 42.0,
            recent_transactions: vec![],
        });
        let snap = store.snapshot().await.unwrap();
        assert_eq!(snap.total_balance, 42.0);
    }
}
