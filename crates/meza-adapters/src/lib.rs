//! Ledger and mobile-money gateway adapters for the meza custody core.

#![deny(unsafe_code)]

pub mod daraja;
pub mod ledger;
pub mod stk;

pub use daraja::{DarajaConfig, DarajaGateway};
pub use ledger::{FailingLedger, MockAccount, MockLedger};
pub use stk::{MockStkGateway, OfflineGateway, RecordedPush, RejectingGateway};
