use winnow::ascii::{dec_int, till_line_ending};
use winnow::combinator::{alt, cut_err, delimited, not, opt, preceded, repeat, separated, terminated};
use winnow::error::{ErrMode, ModalResult, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::{any, one_of, take_while};

use crate::types::{BinOp, CallExpr, Expr, IfBranch, PathExpr, PathSeg, RuleEntity, Stmt, UnaryOp};

const RESERVED: &[&str] = &[
    "rule", "begin", "end", "salience", "when", "then", "if", "else", "conc", "true", "false",
    "nil",
];

// -- Whitespace & comments --------------------------------------------------

pub(crate) fn ws(input: &mut &str) -> ModalResult<()> {
    let _: () = repeat(
        0..,
        alt((
            take_while(1.., |c: char| c.is_ascii_whitespace()).void(),
            ("//", till_line_ending).void(),
        )),
    )
    .parse_next(input)?;
    Ok(())
}

// -- Identifiers & keywords -------------------------------------------------

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn ident<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    let start = input.checkpoint();
    let word = (
        take_while(1..=1, |c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., is_ident_char),
    )
        .take()
        .parse_next(input)?;
    if RESERVED.contains(&word) {
        input.reset(&start);
        return Err(ErrMode::from_input(input));
    }
    Ok(word)
}

fn keyword<'i>(word: &'static str) -> impl FnMut(&mut &'i str) -> ModalResult<()> {
    move |input: &mut &'i str| (word, not(one_of(is_ident_char))).void().parse_next(input)
}

// -- Literals ---------------------------------------------------------------

fn string_literal(input: &mut &str) -> ModalResult<String> {
    '"'.parse_next(input)?;
    let mut s = String::new();
    loop {
        let ch = any.parse_next(input)?;
        match ch {
            '"' => return Ok(s),
            '\\' => {
                let esc = any.parse_next(input)?;
                match esc {
                    '"' => s.push('"'),
                    '\\' => s.push('\\'),
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    other => {
                        s.push('\\');
                        s.push(other);
                    }
                }
            }
            c => s.push(c),
        }
    }
}

fn int_literal(input: &mut &str) -> ModalResult<i64> {
    take_while(1.., |c: char| c.is_ascii_digit())
        .try_map(|s: &str| s.parse::<i64>())
        .parse_next(input)
}

fn float_literal(input: &mut &str) -> ModalResult<f64> {
    (
        take_while(1.., |c: char| c.is_ascii_digit()),
        '.',
        take_while(1.., |c: char| c.is_ascii_digit()),
    )
        .take()
        .try_map(|s: &str| s.parse::<f64>())
        .parse_next(input)
}

fn literal(input: &mut &str) -> ModalResult<Expr> {
    alt((
        string_literal.map(Expr::Str),
        keyword("true").value(Expr::Bool(true)),
        keyword("false").value(Expr::Bool(false)),
        keyword("nil").value(Expr::Nil),
        float_literal.map(Expr::Float),
        int_literal.map(Expr::Int),
    ))
    .parse_next(input)
}

// -- Paths & calls ----------------------------------------------------------

// An index bracket must follow its target directly; a dot may be spaced.
// Keeping `(` and `[` adjacent stops a call or index on the next line from
// being folded into the previous expression.
fn path(input: &mut &str) -> ModalResult<PathExpr> {
    let root = ident.parse_next(input)?;
    let mut segments = Vec::new();
    loop {
        if input.starts_with('[') {
            let _ = '['.parse_next(input)?;
            let index = cut_err(expr).parse_next(input)?;
            ws.parse_next(input)?;
            let _ = cut_err(']').parse_next(input)?;
            segments.push(PathSeg::Index(index));
            continue;
        }
        let cp = input.checkpoint();
        ws.parse_next(input)?;
        if opt('.').parse_next(input)?.is_some() {
            ws.parse_next(input)?;
            let field = cut_err(ident)
                .context(StrContext::Expected(StrContextValue::Description(
                    "field name",
                )))
                .parse_next(input)?;
            segments.push(PathSeg::Field(field.to_owned()));
        } else {
            input.reset(&cp);
            break;
        }
    }
    Ok(PathExpr {
        root: root.to_owned(),
        segments,
    })
}

fn call_args(input: &mut &str) -> ModalResult<Vec<Expr>> {
    let _ = '('.parse_next(input)?;
    let args: Vec<Expr> = separated(0.., expr, (ws, ',')).parse_next(input)?;
    ws.parse_next(input)?;
    let _ = cut_err(')').parse_next(input)?;
    Ok(args)
}

fn call_or_path(input: &mut &str) -> ModalResult<Expr> {
    let p = path.parse_next(input)?;
    if input.starts_with('(') {
        let args = call_args.parse_next(input)?;
        Ok(Expr::Call(CallExpr { path: p, args }))
    } else {
        Ok(Expr::Path(p))
    }
}

// -- Expressions ------------------------------------------------------------
// Precedence: || < && < comparison < + - < * / % < unary < postfix.

fn primary(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    alt((delimited('(', expr, (ws, ')')), literal, call_or_path))
        .context(StrContext::Expected(StrContextValue::Description(
            "expression",
        )))
        .parse_next(input)
}

fn unary(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    if opt('!').parse_next(input)?.is_some() {
        let inner = cut_err(unary).parse_next(input)?;
        Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)))
    } else if opt('-').parse_next(input)?.is_some() {
        let inner = cut_err(unary).parse_next(input)?;
        Ok(Expr::Unary(UnaryOp::Neg, Box::new(inner)))
    } else {
        primary(input)
    }
}

fn fold_binary(first: Expr, rest: Vec<(BinOp, Expr)>) -> Expr {
    rest.into_iter().fold(first, |acc, (op, rhs)| {
        Expr::Binary(op, Box::new(acc), Box::new(rhs))
    })
}

fn mul_op(input: &mut &str) -> ModalResult<BinOp> {
    alt((
        '*'.value(BinOp::Mul),
        '/'.value(BinOp::Div),
        '%'.value(BinOp::Rem),
    ))
    .parse_next(input)
}

fn term(input: &mut &str) -> ModalResult<Expr> {
    let first = unary(input)?;
    let rest: Vec<(BinOp, Expr)> =
        repeat(0.., (preceded(ws, mul_op), cut_err(unary))).parse_next(input)?;
    Ok(fold_binary(first, rest))
}

fn add_op(input: &mut &str) -> ModalResult<BinOp> {
    alt(('+'.value(BinOp::Add), '-'.value(BinOp::Sub))).parse_next(input)
}

fn arith(input: &mut &str) -> ModalResult<Expr> {
    let first = term(input)?;
    let rest: Vec<(BinOp, Expr)> =
        repeat(0.., (preceded(ws, add_op), cut_err(term))).parse_next(input)?;
    Ok(fold_binary(first, rest))
}

fn compare_op(input: &mut &str) -> ModalResult<BinOp> {
    alt((
        ">=".value(BinOp::Gte),
        ">".value(BinOp::Gt),
        "<=".value(BinOp::Lte),
        "<".value(BinOp::Lt),
        "==".value(BinOp::Eq),
        "!=".value(BinOp::Neq),
    ))
    .parse_next(input)
}

fn comparison(input: &mut &str) -> ModalResult<Expr> {
    let first = arith(input)?;
    let rest: Vec<(BinOp, Expr)> =
        repeat(0.., (preceded(ws, compare_op), cut_err(arith))).parse_next(input)?;
    Ok(fold_binary(first, rest))
}

fn and_expr(input: &mut &str) -> ModalResult<Expr> {
    let first = comparison(input)?;
    let rest: Vec<(BinOp, Expr)> = repeat(
        0..,
        (preceded(ws, "&&".value(BinOp::And)), cut_err(comparison)),
    )
    .parse_next(input)?;
    Ok(fold_binary(first, rest))
}

fn or_expr(input: &mut &str) -> ModalResult<Expr> {
    let first = and_expr(input)?;
    let rest: Vec<(BinOp, Expr)> = repeat(
        0..,
        (preceded(ws, "||".value(BinOp::Or)), cut_err(and_expr)),
    )
    .parse_next(input)?;
    Ok(fold_binary(first, rest))
}

fn expr(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    or_expr(input)
}

// -- Statements -------------------------------------------------------------

fn block(input: &mut &str) -> ModalResult<Vec<Stmt>> {
    ws.parse_next(input)?;
    let _ = cut_err('{').parse_next(input)?;
    let stmts = stmt_list.parse_next(input)?;
    ws.parse_next(input)?;
    let _ = cut_err('}')
        .context(StrContext::Expected(StrContextValue::Description("}")))
        .parse_next(input)?;
    Ok(stmts)
}

fn stmt_list(input: &mut &str) -> ModalResult<Vec<Stmt>> {
    repeat(0.., terminated(stmt, opt((ws, ';')))).parse_next(input)
}

fn if_stmt(input: &mut &str) -> ModalResult<Stmt> {
    ws.parse_next(input)?;
    keyword("if").parse_next(input)?;
    let guard = cut_err(expr).parse_next(input)?;
    let body = block.parse_next(input)?;
    let mut branches = vec![IfBranch { guard, body }];
    let mut otherwise = None;
    loop {
        let cp = input.checkpoint();
        ws.parse_next(input)?;
        if opt(keyword("else")).parse_next(input)?.is_none() {
            input.reset(&cp);
            break;
        }
        ws.parse_next(input)?;
        if opt(keyword("if")).parse_next(input)?.is_some() {
            let guard = cut_err(expr).parse_next(input)?;
            let body = block.parse_next(input)?;
            branches.push(IfBranch { guard, body });
        } else {
            otherwise = Some(block.parse_next(input)?);
            break;
        }
    }
    Ok(Stmt::If {
        branches,
        otherwise,
    })
}

fn conc_stmt(input: &mut &str) -> ModalResult<Stmt> {
    ws.parse_next(input)?;
    keyword("conc").parse_next(input)?;
    let stmts = block.parse_next(input)?;
    Ok(Stmt::Conc(stmts))
}

fn assign_or_call(input: &mut &str) -> ModalResult<Stmt> {
    ws.parse_next(input)?;
    let target = path.parse_next(input)?;
    if input.starts_with('(') {
        let args = call_args.parse_next(input)?;
        return Ok(Stmt::Call(CallExpr { path: target, args }));
    }
    ws.parse_next(input)?;
    let _ = ('=', not('=')).void().parse_next(input)?;
    let value = cut_err(expr).parse_next(input)?;
    Ok(Stmt::Assign { target, value })
}

fn stmt(input: &mut &str) -> ModalResult<Stmt> {
    alt((if_stmt, conc_stmt, assign_or_call)).parse_next(input)
}

// -- Rule blocks ------------------------------------------------------------

fn when_clause(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    keyword("when").parse_next(input)?;
    let cond = cut_err(expr).parse_next(input)?;
    ws.parse_next(input)?;
    cut_err(keyword("then"))
        .context(StrContext::Expected(StrContextValue::Description("then")))
        .parse_next(input)?;
    Ok(cond)
}

pub(crate) fn rule_block(input: &mut &str) -> ModalResult<RuleEntity> {
    ws.parse_next(input)?;
    keyword("rule").parse_next(input)?;
    ws.parse_next(input)?;
    let name = cut_err(string_literal)
        .context(StrContext::Expected(StrContextValue::Description(
            "quoted rule name",
        )))
        .parse_next(input)?;
    let description = opt(preceded(ws, string_literal))
        .parse_next(input)?
        .unwrap_or_default();
    let salience = opt(preceded(
        (ws, keyword("salience"), ws),
        cut_err(dec_int::<_, i64, _>),
    ))
    .parse_next(input)?
    .unwrap_or(0);
    ws.parse_next(input)?;
    cut_err(keyword("begin"))
        .context(StrContext::Expected(StrContextValue::Description("begin")))
        .parse_next(input)?;
    let when = opt(when_clause)
        .parse_next(input)?
        .unwrap_or(Expr::Bool(true));
    let then = stmt_list.parse_next(input)?;
    ws.parse_next(input)?;
    cut_err(keyword("end"))
        .context(StrContext::Expected(StrContextValue::Description("end")))
        .parse_next(input)?;
    Ok(RuleEntity {
        name,
        description,
        salience,
        when,
        then,
    })
}
