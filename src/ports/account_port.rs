//! Account persistence port.

use crate::domain::account::Account;
use crate::domain::error::TradebotError;

pub trait AccountRepository {
    /// Fails with [`TradebotError::AccountExists`] if the row is already there.
    fn create_account(&self, account: &Account) -> Result<(), TradebotError>;

    /// Fails with [`TradebotError::AccountNotFound`] when no account exists.
    fn get_account(&self) -> Result<Account, TradebotError>;

    fn update_account(&self, account: &Account) -> Result<(), TradebotError>;
}
