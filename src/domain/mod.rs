mod balance;
mod ledger;
mod money;
mod transaction;
mod user;

pub use balance::*;
pub use ledger::*;
pub use money::*;
pub use transaction::*;
pub use user::*;
