//! Accounts domain module (event-sourced).
//!
//! A bank-style account used as the reference aggregate for the command
//! pipeline. Business rules are synchronous decisions over the replayed
//! aggregate; persistence, retries and routing come from `keel-infra`.

pub mod account;
pub mod handler;

pub use account::{
    AccountClosed, AccountId, AccountOpened, AccountReplenished, AccountState, AccountStatus,
    AccountWithdrawn, CloseAccount, CreateAccount, ReplenishAccount, WithdrawAccount,
    payload_types, registry,
};
pub use handler::{AccountCommands, register};
