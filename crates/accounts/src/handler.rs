//! Account command decisions and their bus registration.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use keel_events::{Aggregate, CommandEnvelope, CommandExecutionResult};
use keel_infra::{
    CancellationToken, CommandHandler, EngineBuilder, EngineConfig, EngineError, HandleCommand,
    StorageResolver,
};

use crate::account::{
    AccountClosed, AccountId, AccountOpened, AccountReplenished, AccountState, AccountStatus,
    AccountWithdrawn, CloseAccount, CreateAccount, ReplenishAccount, WithdrawAccount, registry,
};

pub const ACCOUNT_ALREADY_EXISTS: &str = "account_already_exists";
pub const INSUFFICIENT_FUNDS: &str = "insufficient_funds";
pub const BALANCE_NOT_ZERO: &str = "balance_not_zero";
pub const BALANCE_OVERFLOW: &str = "balance_overflow";

type Account = Aggregate<AccountId, AccountState>;
type Outcome = Result<CommandExecutionResult<AccountId>, EngineError>;

/// Handles every account command through one retrying [`CommandHandler`].
#[derive(Clone)]
pub struct AccountCommands {
    handler: CommandHandler<AccountId, AccountState>,
}

impl AccountCommands {
    pub fn new(storage: Arc<dyn StorageResolver>, config: &EngineConfig) -> Self {
        Self {
            handler: CommandHandler::new(storage, Arc::new(registry()), config),
        }
    }

    pub fn handler(&self) -> &CommandHandler<AccountId, AccountState> {
        &self.handler
    }
}

/// Route all account commands to one shared [`AccountCommands`].
pub fn register(builder: EngineBuilder) -> EngineBuilder {
    let commands = Arc::new(AccountCommands::new(builder.storage(), builder.config()));
    builder
        .register::<AccountId, CreateAccount, _>(Arc::clone(&commands))
        .register::<AccountId, ReplenishAccount, _>(Arc::clone(&commands))
        .register::<AccountId, WithdrawAccount, _>(Arc::clone(&commands))
        .register::<AccountId, CloseAccount, _>(commands)
}

fn create(account: &mut Account, command: &CommandEnvelope<AccountId, CreateAccount>) -> Outcome {
    if account.state().status != AccountStatus::NotCreated {
        return Ok(CommandExecutionResult::error(command, ACCOUNT_ALREADY_EXISTS));
    }
    let owner = command.payload().owner.trim();
    if owner.is_empty() {
        return Ok(CommandExecutionResult::command_not_valid(command));
    }
    account.apply(command, AccountOpened { owner: owner.to_string() })?;
    Ok(CommandExecutionResult::ok(command))
}

fn replenish(account: &mut Account, command: &CommandEnvelope<AccountId, ReplenishAccount>) -> Outcome {
    if !account.state().is_open() {
        return Ok(CommandExecutionResult::not_exists(command));
    }
    let amount = command.payload().amount;
    if amount <= 0 {
        return Ok(CommandExecutionResult::command_not_valid(command));
    }
    if account.state().amount.checked_add(amount).is_none() {
        return Ok(CommandExecutionResult::error(command, BALANCE_OVERFLOW));
    }
    account.apply(command, AccountReplenished { amount })?;
    Ok(CommandExecutionResult::ok(command))
}

fn withdraw(account: &mut Account, command: &CommandEnvelope<AccountId, WithdrawAccount>) -> Outcome {
    if !account.state().is_open() {
        return Ok(CommandExecutionResult::not_exists(command));
    }
    let amount = command.payload().amount;
    if amount <= 0 {
        return Ok(CommandExecutionResult::command_not_valid(command));
    }
    if amount > account.state().amount {
        debug!(balance = account.state().amount, amount, "withdrawal exceeds balance");
        return Ok(CommandExecutionResult::error(command, INSUFFICIENT_FUNDS));
    }
    account.apply(command, AccountWithdrawn { amount })?;
    Ok(CommandExecutionResult::ok(command))
}

fn close(account: &mut Account, command: &CommandEnvelope<AccountId, CloseAccount>) -> Outcome {
    if !account.state().is_open() {
        return Ok(CommandExecutionResult::not_exists(command));
    }
    if account.state().amount != 0 {
        return Ok(CommandExecutionResult::error(command, BALANCE_NOT_ZERO));
    }
    account.apply(command, AccountClosed)?;
    Ok(CommandExecutionResult::ok(command))
}

#[async_trait]
impl HandleCommand<AccountId, CreateAccount> for AccountCommands {
    async fn handle(&self, command: CommandEnvelope<AccountId, CreateAccount>, cancel: &CancellationToken) -> Outcome {
        self.handler.update(&command, create, cancel).await
    }
}

#[async_trait]
impl HandleCommand<AccountId, ReplenishAccount> for AccountCommands {
    async fn handle(
        &self,
        command: CommandEnvelope<AccountId, ReplenishAccount>,
        cancel: &CancellationToken,
    ) -> Outcome {
        self.handler.update(&command, replenish, cancel).await
    }
}

#[async_trait]
impl HandleCommand<AccountId, WithdrawAccount> for AccountCommands {
    async fn handle(
        &self,
        command: CommandEnvelope<AccountId, WithdrawAccount>,
        cancel: &CancellationToken,
    ) -> Outcome {
        self.handler.update(&command, withdraw, cancel).await
    }
}

#[async_trait]
impl HandleCommand<AccountId, CloseAccount> for AccountCommands {
    async fn handle(&self, command: CommandEnvelope<AccountId, CloseAccount>, cancel: &CancellationToken) -> Outcome {
        self.handler.update(&command, close, cancel).await
    }
}
