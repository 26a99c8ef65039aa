mod history;
mod root_server;
mod transaction_cache;

pub use history::{HistoryEntry, DEFAULT_HISTORY_DEPTH};
pub use mckoi_base::{Overlap, TouchedRangeSummary};
pub use root_server::{CommitOutcome, RootServer, TxHandle};
pub use transaction_cache::{TransactionCache, DEFAULT_BUDGET_BYTES};
