use serde::{Deserialize, Serialize};

use keel_core::AggregateIdentity;
use keel_events::{Command, Event, MutatorRegistry, PayloadTypeConflict, PayloadTypes};

keel_core::prefixed_uuid_id! {
    /// Account aggregate identifier (`account_<uuid>`).
    pub struct AccountId => "account";
}

impl AggregateIdentity for AccountId {}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    #[default]
    NotCreated,
    Open,
    Closed,
}

/// Materialized account state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub status: AccountStatus,
    pub owner: String,
    pub amount: i64,
}

impl AccountState {
    pub fn is_open(&self) -> bool {
        self.status == AccountStatus::Open
    }
}

/// Command: CreateAccount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAccount {
    pub owner: String,
}

impl Command for CreateAccount {
    fn command_type() -> &'static str {
        "accounts.account.create"
    }
}

/// Command: ReplenishAccount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplenishAccount {
    pub amount: i64,
}

impl Command for ReplenishAccount {
    fn command_type() -> &'static str {
        "accounts.account.replenish"
    }
}

/// Command: WithdrawAccount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawAccount {
    pub amount: i64,
}

impl Command for WithdrawAccount {
    fn command_type() -> &'static str {
        "accounts.account.withdraw"
    }
}

/// Command: CloseAccount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseAccount;

impl Command for CloseAccount {
    fn command_type() -> &'static str {
        "accounts.account.close"
    }
}

/// Event: AccountOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOpened {
    pub owner: String,
}

impl Event for AccountOpened {
    fn event_type() -> &'static str {
        "accounts.account.opened"
    }
}

/// Event: AccountReplenished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountReplenished {
    pub amount: i64,
}

impl Event for AccountReplenished {
    fn event_type() -> &'static str {
        "accounts.account.replenished"
    }
}

/// Event: AccountWithdrawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountWithdrawn {
    pub amount: i64,
}

impl Event for AccountWithdrawn {
    fn event_type() -> &'static str {
        "accounts.account.withdrawn"
    }
}

/// Event: AccountClosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountClosed;

impl Event for AccountClosed {
    fn event_type() -> &'static str {
        "accounts.account.closed"
    }
}

/// Reducers of the account aggregate.
pub fn registry() -> MutatorRegistry<AccountId, AccountState> {
    MutatorRegistry::new("account", AccountState::default())
        .register::<AccountOpened, _>(|_, e, _| AccountState {
            status: AccountStatus::Open,
            owner: e.owner.clone(),
            amount: 0,
        })
        .register::<AccountReplenished, _>(|_, e, s| AccountState {
            amount: s.amount.saturating_add(e.amount),
            ..s.clone()
        })
        .register::<AccountWithdrawn, _>(|_, e, s| AccountState {
            amount: s.amount.saturating_sub(e.amount),
            ..s.clone()
        })
        .register::<AccountClosed, _>(|_, _, s| AccountState {
            status: AccountStatus::Closed,
            ..s.clone()
        })
}

/// Event payload types this crate persists.
pub fn payload_types() -> Result<PayloadTypes, PayloadTypeConflict> {
    let mut types = PayloadTypes::new();
    types.extend(registry().payload_types())?;
    Ok(types)
}
