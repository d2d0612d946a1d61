use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::thread;

use crate::execute::StopTag;
use crate::types::{
    BinOp, Binding, CallExpr, DataContext, EngineError, Expr, Fact, PathExpr, PathSeg,
    RuleEntity, Stmt, UnaryOp, Value,
};

/// Per-execution evaluation frame: the instance's data context plus
/// rule-local variables created by assignment to unbound names. Locals are
/// shared across the sibling statements of a `conc` block.
pub(crate) struct Scope<'a> {
    dc: &'a DataContext,
    locals: RwLock<HashMap<String, Value>>,
}

impl<'a> Scope<'a> {
    fn new(dc: &'a DataContext) -> Self {
        Scope {
            dc,
            locals: RwLock::new(HashMap::new()),
        }
    }
}

/// Execute one rule against a data context: consult the stop tag, evaluate
/// the condition, and run the body when it holds.
pub(crate) fn run_rule(
    rule: &RuleEntity,
    dc: &DataContext,
    stop: Option<&StopTag>,
) -> Result<(), EngineError> {
    if stop.is_some_and(StopTag::is_set) {
        return Ok(());
    }
    let scope = Scope::new(dc);
    if eval_expr(&rule.when, &scope)?.as_bool("rule condition")? {
        exec_block(&rule.then, &scope)?;
    }
    Ok(())
}

fn exec_block(stmts: &[Stmt], scope: &Scope<'_>) -> Result<(), EngineError> {
    for stmt in stmts {
        exec_stmt(stmt, scope)?;
    }
    Ok(())
}

fn exec_stmt(stmt: &Stmt, scope: &Scope<'_>) -> Result<(), EngineError> {
    match stmt {
        Stmt::Assign { target, value } => {
            let value = eval_expr(value, scope)?;
            write_path(target, value, scope)
        }
        Stmt::If {
            branches,
            otherwise,
        } => {
            for branch in branches {
                if eval_expr(&branch.guard, scope)?.as_bool("if guard")? {
                    return exec_block(&branch.body, scope);
                }
            }
            otherwise
                .as_ref()
                .map_or(Ok(()), |body| exec_block(body, scope))
        }
        Stmt::Call(call) => {
            eval_call(call, scope)?;
            Ok(())
        }
        Stmt::Conc(stmts) => exec_conc(stmts, scope),
    }
}

/// Run the direct children of a `conc { .. }` block concurrently and join
/// them all. Failures are collected and reported in source order.
fn exec_conc(stmts: &[Stmt], scope: &Scope<'_>) -> Result<(), EngineError> {
    let failures = Mutex::new(Vec::new());
    thread::scope(|s| {
        for (i, stmt) in stmts.iter().enumerate() {
            let failures = &failures;
            s.spawn(move || {
                if let Err(e) = exec_stmt(stmt, scope) {
                    failures.lock().expect("conc failures lock").push((i, e));
                }
            });
        }
    });
    let mut failures = failures.into_inner().expect("conc failures lock");
    failures.sort_by_key(|(i, _)| *i);
    EngineError::from_scope(failures.into_iter().map(|(_, e)| e).collect())
}

fn eval_expr(expr: &Expr, scope: &Scope<'_>) -> Result<Value, EngineError> {
    match expr {
        Expr::Int(v) => Ok(Value::Int(*v)),
        Expr::Float(v) => Ok(Value::Float(*v)),
        Expr::Bool(v) => Ok(Value::Bool(*v)),
        Expr::Str(v) => Ok(Value::String(v.clone())),
        Expr::Nil => Ok(Value::Nil),
        Expr::Path(path) => read_path(path, scope),
        Expr::Call(call) => Ok(eval_call(call, scope)?
            .into_iter()
            .next()
            .unwrap_or(Value::Nil)),
        Expr::Unary(UnaryOp::Neg, inner) => eval_expr(inner, scope)?.neg(),
        Expr::Unary(UnaryOp::Not, inner) => eval_expr(inner, scope)?.not(),
        Expr::Binary(op, a, b) => eval_binary(*op, a, b, scope),
    }
}

fn eval_binary(op: BinOp, a: &Expr, b: &Expr, scope: &Scope<'_>) -> Result<Value, EngineError> {
    match op {
        BinOp::And => {
            if !eval_expr(a, scope)?.as_bool("&& operand")? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval_expr(b, scope)?.as_bool("&& operand")?))
        }
        BinOp::Or => {
            if eval_expr(a, scope)?.as_bool("|| operand")? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval_expr(b, scope)?.as_bool("|| operand")?))
        }
        _ => {
            let left = eval_expr(a, scope)?;
            let right = eval_expr(b, scope)?;
            match op {
                BinOp::Add => left.add(&right),
                BinOp::Sub => left.sub(&right),
                BinOp::Mul => left.mul(&right),
                BinOp::Div => left.div(&right),
                BinOp::Rem => left.rem(&right),
                op if op.is_comparison() => Ok(Value::Bool(left.compare(op, &right)?)),
                _ => unreachable!("logical operators handled above"),
            }
        }
    }
}

fn resolve_root(name: &str, scope: &Scope<'_>) -> Result<Value, EngineError> {
    if let Some(value) = scope.locals.read().expect("locals lock").get(name) {
        return Ok(value.clone());
    }
    match scope.dc.resolve(name) {
        Some(Binding::Slot(slot)) => Ok(slot.get()),
        Some(Binding::Fact(fact)) => Ok(Value::fact(fact)),
        Some(Binding::Callable(_)) => Err(EngineError::Type {
            message: format!("callable '{name}' used as a value"),
        }),
        None => Err(EngineError::Unresolved {
            name: name.to_owned(),
        }),
    }
}

fn as_fact(value: Value) -> Result<Arc<dyn Fact>, EngineError> {
    match value {
        Value::Fact(handle) => Ok(handle.0),
        other => Err(EngineError::Type {
            message: format!("cannot access members of {}", other.type_name()),
        }),
    }
}

fn read_segment(value: Value, seg: &PathSeg, scope: &Scope<'_>) -> Result<Value, EngineError> {
    let fact = as_fact(value)?;
    match seg {
        PathSeg::Field(name) => fact.get_member(name),
        PathSeg::Index(key) => {
            let key = eval_expr(key, scope)?;
            fact.get_index(&key)
        }
    }
}

fn read_path(path: &PathExpr, scope: &Scope<'_>) -> Result<Value, EngineError> {
    let mut current = resolve_root(&path.root, scope)?;
    for seg in &path.segments {
        current = read_segment(current, seg, scope)?;
    }
    Ok(current)
}

fn write_path(path: &PathExpr, value: Value, scope: &Scope<'_>) -> Result<(), EngineError> {
    let Some((last, front)) = path.segments.split_last() else {
        return write_root(&path.root, value, scope);
    };
    let mut current = resolve_root(&path.root, scope)?;
    for seg in front {
        current = read_segment(current, seg, scope)?;
    }
    let fact = as_fact(current)?;
    match last {
        PathSeg::Field(name) => fact.set_member(name, value),
        PathSeg::Index(key) => {
            let key = eval_expr(key, scope)?;
            fact.set_index(&key, value)
        }
    }
}

// A bare name assigns through its context binding when one exists;
// otherwise it creates a rule-local variable.
fn write_root(name: &str, value: Value, scope: &Scope<'_>) -> Result<(), EngineError> {
    if scope.locals.read().expect("locals lock").contains_key(name) {
        scope
            .locals
            .write()
            .expect("locals lock")
            .insert(name.to_owned(), value);
        return Ok(());
    }
    match scope.dc.resolve(name) {
        Some(Binding::Slot(slot)) => {
            slot.set(value);
            Ok(())
        }
        Some(Binding::Callable(_) | Binding::Fact(_)) => Err(EngineError::Type {
            message: format!("'{name}' is not an assignable value"),
        }),
        None => {
            scope
                .locals
                .write()
                .expect("locals lock")
                .insert(name.to_owned(), value);
            Ok(())
        }
    }
}

fn eval_call(call: &CallExpr, scope: &Scope<'_>) -> Result<Vec<Value>, EngineError> {
    let mut args = Vec::with_capacity(call.args.len());
    for arg in &call.args {
        args.push(eval_expr(arg, scope)?);
    }
    let Some((last, front)) = call.path.segments.split_last() else {
        let name = &call.path.root;
        return match scope.dc.resolve(name) {
            Some(Binding::Callable(f)) => {
                if let Some(expected) = f.arity()
                    && expected != args.len()
                {
                    return Err(EngineError::Arity {
                        name: name.clone(),
                        expected,
                        actual: args.len(),
                    });
                }
                f.invoke(&args)
            }
            Some(_) => Err(EngineError::Type {
                message: format!("'{name}' is not callable"),
            }),
            None => Err(EngineError::Unresolved { name: name.clone() }),
        };
    };
    let mut current = resolve_root(&call.path.root, scope)?;
    for seg in front {
        current = read_segment(current, seg, scope)?;
    }
    let fact = as_fact(current)?;
    match last {
        PathSeg::Field(method) => Ok(vec![fact.call_method(method, &args)?]),
        PathSeg::Index(_) => Err(EngineError::Type {
            message: "cannot call an indexed expression".to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::parse::parse;
    use crate::types::{SharedList, SharedMap};

    fn run(source: &str, dc: &DataContext) -> Result<(), EngineError> {
        let kb = parse(source).unwrap();
        let rule = kb.ordered().next().expect("one rule");
        run_rule(rule, dc, None)
    }

    #[test]
    fn assignment_mutates_injected_slot() {
        let dc = DataContext::new();
        let x = dc.add_value("x", 0_i64);
        run("rule \"r\" begin x = 40 + 2 end", &dc).unwrap();
        assert_eq!(x.get(), Value::Int(42));
    }

    #[test]
    fn false_condition_skips_body() {
        let dc = DataContext::new();
        let x = dc.add_value("x", 0_i64);
        run("rule \"r\" begin when 1 > 2 then x = 1 end", &dc).unwrap();
        assert_eq!(x.get(), Value::Int(0));
    }

    #[test]
    fn non_bool_condition_is_a_type_error() {
        let dc = DataContext::new();
        let result = run("rule \"r\" begin when 1 + 1 then end", &dc);
        assert!(matches!(result, Err(EngineError::Type { .. })));
    }

    #[test]
    fn locals_flow_between_statements() {
        let dc = DataContext::new();
        let out = dc.add_value("out", 0_i64);
        run("rule \"r\" begin tmp = 6 out = tmp * 7 end", &dc).unwrap();
        assert_eq!(out.get(), Value::Int(42));
    }

    #[test]
    fn if_else_picks_first_true_branch() {
        let dc = DataContext::new();
        let y = dc.add_value("y", 0_i64);
        let source = r#"
            rule "r" begin
                x = 7
                if x > 10 {
                    y = 1
                } else if x > 5 {
                    y = 2
                } else {
                    y = 3
                }
            end"#;
        run(source, &dc).unwrap();
        assert_eq!(y.get(), Value::Int(2));
    }

    #[test]
    fn and_short_circuits() {
        let dc = DataContext::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        dc.add_fn("probe", Some(0), move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Value::Bool(true)])
        });
        let flag = dc.add_value("hit", false);
        run(
            "rule \"r\" begin when false && probe() then hit = true end",
            &dc,
        )
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(flag.get(), Value::Bool(false));
    }

    #[test]
    fn or_short_circuits() {
        let dc = DataContext::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        dc.add_fn("probe", Some(0), move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Value::Bool(false)])
        });
        run("rule \"r\" begin when true || probe() then end", &dc).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn call_statement_discards_results() {
        let dc = DataContext::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        dc.add_fn("tick", None, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        });
        run("rule \"r\" begin tick(1, 2, 3) end", &dc).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wrong_arity_is_rejected_before_the_call() {
        let dc = DataContext::new();
        dc.add_fn("one", Some(1), |_| Ok(vec![]));
        let result = run("rule \"r\" begin one(1, 2) end", &dc);
        assert!(matches!(
            result,
            Err(EngineError::Arity {
                expected: 1,
                actual: 2,
                ..
            })
        ));
    }

    #[test]
    fn multi_valued_result_truncates_in_expression_context() {
        let dc = DataContext::new();
        dc.add_fn("pair", Some(0), |_| {
            Ok(vec![Value::Int(1), Value::Int(2)])
        });
        let x = dc.add_value("x", 0_i64);
        run("rule \"r\" begin x = pair() end", &dc).unwrap();
        assert_eq!(x.get(), Value::Int(1));
    }

    #[test]
    fn empty_result_is_nil_in_expression_context() {
        let dc = DataContext::new();
        dc.add_fn("nothing", Some(0), |_| Ok(vec![]));
        let x = dc.add_value("x", 0_i64);
        run("rule \"r\" begin x = nothing() end", &dc).unwrap();
        assert_eq!(x.get(), Value::Nil);
    }

    #[test]
    fn list_indexing_and_methods() {
        let dc = DataContext::new();
        let list = Arc::new(SharedList::from_values(vec![Value::Int(1), Value::Int(2)]));
        dc.add_fact("items", list.clone());
        let x = dc.add_value("x", 0_i64);
        run(
            "rule \"r\" begin items[0] = 10 x = items[0] + items[1] items.push(99) end",
            &dc,
        )
        .unwrap();
        assert_eq!(x.get(), Value::Int(12));
        assert_eq!(
            list.snapshot(),
            vec![Value::Int(10), Value::Int(2), Value::Int(99)]
        );
    }

    #[test]
    fn map_keyed_access() {
        let dc = DataContext::new();
        let map = Arc::new(SharedMap::new());
        map.insert("limit", Value::Int(5));
        dc.add_fact("cfg", map.clone());
        run("rule \"r\" begin cfg[\"limit\"] = cfg[\"limit\"] + 1 end", &dc).unwrap();
        assert_eq!(map.get("limit"), Some(Value::Int(6)));
    }

    #[test]
    fn unresolved_name_reports_resolution_error() {
        let dc = DataContext::new();
        let result = run("rule \"r\" begin x = ghost end", &dc);
        assert!(matches!(result, Err(EngineError::Unresolved { name }) if name == "ghost"));
    }

    #[test]
    fn assigning_to_a_callable_is_a_type_error() {
        let dc = DataContext::new();
        dc.add_fn("f", None, |_| Ok(vec![]));
        let result = run("rule \"r\" begin f = 1 end", &dc);
        assert!(matches!(result, Err(EngineError::Type { .. })));
    }

    #[test]
    fn host_callable_failure_surfaces_as_runtime_error() {
        let dc = DataContext::new();
        dc.add_fn("explode", Some(0), |_| Err(EngineError::host("backend down")));
        let result = run("rule \"r\" begin explode() end", &dc);
        match result {
            Err(err @ EngineError::Host { .. }) => {
                assert_eq!(err.kind(), crate::types::ErrorKind::Runtime);
                assert!(err.to_string().contains("backend down"));
            }
            other => panic!("expected host error, got {other:?}"),
        }
    }

    #[test]
    fn division_by_zero_propagates() {
        let dc = DataContext::new();
        dc.add_value("x", 0_i64);
        let result = run("rule \"r\" begin x = 1 / 0 end", &dc);
        assert!(matches!(result, Err(EngineError::DivisionByZero)));
    }

    #[test]
    fn conc_block_runs_every_statement() {
        let dc = DataContext::new();
        let list = Arc::new(SharedList::new());
        dc.add_fact("tally", list.clone());
        let out = dc.add_value("out", 0_i64);
        let source = r#"
            rule "r" begin
                conc {
                    a = 1
                    tally.push("x")
                    tally.push("y")
                }
                out = a
            end"#;
        run(source, &dc).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(out.get(), Value::Int(1));
    }

    #[test]
    fn conc_block_reports_first_error_in_source_order() {
        let dc = DataContext::new();
        dc.add_value("x", 0_i64);
        let source = r#"
            rule "r" begin
                conc {
                    x = missing_one
                    x = missing_two
                }
            end"#;
        // Both statements fail; the aggregate leads with the first by
        // source position.
        match run(source, &dc) {
            Err(err @ EngineError::Aggregate { .. }) => {
                assert!(err.to_string().contains("missing_one"));
            }
            other => panic!("expected aggregate error, got {other:?}"),
        }
    }

    #[test]
    fn stop_tag_skips_rule_before_condition() {
        let dc = DataContext::new();
        let x = dc.add_value("x", 0_i64);
        let kb = parse("rule \"r\" begin x = 1 end").unwrap();
        let stop = StopTag::new();
        stop.set();
        run_rule(kb.ordered().next().unwrap(), &dc, Some(&stop)).unwrap();
        assert_eq!(x.get(), Value::Int(0));
    }

    #[test]
    fn string_concat_in_rule_text() {
        let dc = DataContext::new();
        let s = dc.add_value("s", "");
        run("rule \"r\" begin s = \"foo\" + \"bar\" end", &dc).unwrap();
        assert_eq!(s.get(), Value::String("foobar".into()));
    }
}
