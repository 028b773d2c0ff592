//! Task trees: what units are asked to do.

mod codec;
mod expr;
mod info;

pub use codec::MAX_TREE_DEPTH;
pub use expr::{EvalContext, ExprCode, ExprError, ExprValue, Expression, UnitVar};
pub use info::{Cmd, CmdCode, TaskId, TaskIdAlloc, TaskInfo, TaskState, TaskType};
