mod evaluate;
mod execute;
mod parse;
mod pool;
mod types;

pub use execute::{ExecModel, ExecuteOptions, StopTag, execute};
pub use parse::{ParseError, ParseErrors, parse};
pub use pool::RulePool;
pub use types::{
    BinOp, Binding, CallExpr, DataContext, EngineError, ErrorKind, Expr, Fact, FactHandle, HostFn,
    IfBranch, KnowledgeBase, PathExpr, PathSeg, RuleEntity, SharedList, SharedMap, SharedSlot,
    Stmt, UnaryOp, Value,
};
