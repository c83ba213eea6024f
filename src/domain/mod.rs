mod ledger;
mod money;
mod movement;
mod period;

pub use ledger::*;
pub use money::*;
pub use movement::*;
pub use period::*;
