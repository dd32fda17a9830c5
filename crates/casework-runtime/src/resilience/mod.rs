//! Resilience and accounting for model calls.
//!
//! - Retry with exponential backoff and jitter
//! - Pricing table and usage ledger

mod pricing;
mod retry;

pub use pricing::{ModelPrice, ModelUsage, PricingTable, UsageLedger, UsageSummary};
pub use retry::RetryPolicy;
