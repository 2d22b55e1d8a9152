pub mod exit_fee_operation;
pub mod team_switch_operation;

pub use exit_fee_operation::{ExitFeeOperation, NewExitFeeOperation, OperationType};
pub use team_switch_operation::{NewTeamSwitchOperation, TeamSwitchOperation};
