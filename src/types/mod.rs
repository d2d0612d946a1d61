mod context;
mod error;
mod expr;
mod kb;
mod rule;
mod value;

pub use context::{Binding, DataContext, Fact, HostFn, SharedList, SharedMap, SharedSlot};
pub use error::{EngineError, ErrorKind};
pub use expr::{BinOp, CallExpr, Expr, IfBranch, PathExpr, PathSeg, Stmt, UnaryOp};
pub use kb::KnowledgeBase;
pub use rule::RuleEntity;
pub use value::{FactHandle, Value};
