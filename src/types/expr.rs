use std::fmt;

/// Binary operators, from arithmetic through logical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    And,
    Or,
}

impl BinOp {
    #[must_use]
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Neq | BinOp::Gt | BinOp::Gte | BinOp::Lt | BinOp::Lte
        )
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// One step of a dotted/indexed path after the root identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum PathSeg {
    Field(String),
    Index(Expr),
}

/// A reference into the data context: a root name followed by field and
/// index segments, e.g. `order.lines[2].amount`.
#[derive(Debug, Clone, PartialEq)]
pub struct PathExpr {
    pub root: String,
    pub segments: Vec<PathSeg>,
}

impl PathExpr {
    #[must_use]
    pub fn name(root: &str) -> Self {
        PathExpr {
            root: root.to_owned(),
            segments: Vec::new(),
        }
    }
}

/// A call on a context binding (`f(x)`) or a fact method (`obj.push(x)`).
#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    pub path: PathExpr,
    pub args: Vec<Expr>,
}

/// Expression AST evaluated against the data context.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Nil,
    Path(PathExpr),
    Call(CallExpr),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

/// One guarded arm of an `if` / `else if` chain.
#[derive(Debug, Clone, PartialEq)]
pub struct IfBranch {
    pub guard: Expr,
    pub body: Vec<Stmt>,
}

/// Statement AST forming a rule body.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign { target: PathExpr, value: Expr },
    If {
        branches: Vec<IfBranch>,
        otherwise: Option<Vec<Stmt>>,
    },
    Call(CallExpr),
    /// Direct children run concurrently; the block joins all of them.
    Conc(Vec<Stmt>),
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sym = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::Gt => ">",
            BinOp::Gte => ">=",
            BinOp::Lt => "<",
            BinOp::Lte => "<=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        };
        write!(f, "{sym}")
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for seg in &self.segments {
            match seg {
                PathSeg::Field(name) => write!(f, ".{name}")?,
                PathSeg::Index(expr) => write!(f, "[{expr}]")?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(v) => write!(f, "{v}"),
            Expr::Float(v) => write!(f, "{v}"),
            Expr::Bool(v) => write!(f, "{v}"),
            Expr::Str(v) => write!(f, "{v:?}"),
            Expr::Nil => write!(f, "nil"),
            Expr::Path(p) => write!(f, "{p}"),
            Expr::Call(c) => {
                write!(f, "{}(", c.path)?;
                for (i, arg) in c.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Expr::Unary(UnaryOp::Neg, inner) => write!(f, "-{inner}"),
            Expr::Unary(UnaryOp::Not, inner) => write!(f, "!{inner}"),
            Expr::Binary(op, a, b) => write!(f, "({a} {op} {b})"),
        }
    }
}
