use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::warn;

use crate::evaluate::run_rule;
use crate::types::{DataContext, EngineError, Fact, KnowledgeBase, RuleEntity, Value};

/// How an execute call schedules the rules of a knowledge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecModel {
    /// Strict descending-salience order, one rule at a time.
    Sort,
    /// Every rule in parallel; salience is ignored.
    Concurrent,
    /// The highest-salience rule first, then the rest in parallel.
    Mix,
    /// All but the lowest-salience rule in parallel, then that rule last.
    InverseMix,
}

impl ExecModel {
    /// Resolve the numeric model codes used in host configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for anything but 1 through 4.
    pub fn from_code(code: i64) -> Result<Self, EngineError> {
        match code {
            1 => Ok(ExecModel::Sort),
            2 => Ok(ExecModel::Concurrent),
            3 => Ok(ExecModel::Mix),
            4 => Ok(ExecModel::InverseMix),
            other => Err(EngineError::Config {
                reason: format!(
                    "execution model must be 1 (sort), 2 (concurrent), 3 (mix) or 4 (inverse mix), got {other}"
                ),
            }),
        }
    }

    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            ExecModel::Sort => 1,
            ExecModel::Concurrent => 2,
            ExecModel::Mix => 3,
            ExecModel::InverseMix => 4,
        }
    }
}

/// Caller-supplied early-termination flag.
///
/// Every rule consults the tag immediately before its condition; once set,
/// no further rule begins, while rules already in flight under a concurrent
/// model run to completion. The tag is also a [`Fact`] with a single `stop`
/// field, so a rule body can raise it: inject the same `Arc` into the
/// binding bundle and write `halt.stop = true`.
#[derive(Debug, Default)]
pub struct StopTag {
    stop: AtomicBool,
}

impl StopTag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

impl Fact for StopTag {
    fn fact_type(&self) -> &'static str {
        "stop tag"
    }

    fn get_member(&self, member: &str) -> Result<Value, EngineError> {
        match member {
            "stop" => Ok(Value::Bool(self.is_set())),
            other => Err(EngineError::UnknownMember {
                target: "stop tag".to_owned(),
                member: other.to_owned(),
            }),
        }
    }

    fn set_member(&self, member: &str, value: Value) -> Result<(), EngineError> {
        match (member, value) {
            ("stop", Value::Bool(v)) => {
                self.stop.store(v, Ordering::SeqCst);
                Ok(())
            }
            ("stop", other) => Err(EngineError::Type {
                message: format!("stop must be bool, got {}", other.type_name()),
            }),
            (other, _) => Err(EngineError::UnknownMember {
                target: "stop tag".to_owned(),
                member: other.to_owned(),
            }),
        }
    }
}

/// Options for one execute call.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Early-termination flag shared with the caller, if any.
    pub stop: Option<Arc<StopTag>>,
    /// Explicit rule names to run; empty means the whole knowledge base.
    /// [`ExecModel::Sort`] and [`ExecModel::Mix`] preserve the listed order.
    pub rules: Vec<String>,
    /// Under [`ExecModel::Sort`], whether a failing rule aborts the run
    /// (`false`) or is recorded while the remaining rules still execute
    /// (`true`, the default; the last error observed is returned).
    pub continue_on_error: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        ExecuteOptions {
            stop: None,
            rules: Vec::new(),
            continue_on_error: true,
        }
    }
}

/// Drive a knowledge base against a data context under the given model.
///
/// Selected names that are missing from the knowledge base are logged and
/// skipped. Concurrent models attempt every scheduled rule and aggregate
/// failures in schedule order.
///
/// # Errors
///
/// Propagates rule failures per the model's policy; see [`ExecuteOptions`].
pub fn execute(
    kb: &KnowledgeBase,
    dc: &DataContext,
    model: ExecModel,
    opts: &ExecuteOptions,
) -> Result<(), EngineError> {
    let rules: Vec<&Arc<RuleEntity>> = if opts.rules.is_empty() {
        kb.ordered().collect()
    } else {
        opts.rules
            .iter()
            .filter_map(|name| {
                let found = kb.lookup(name);
                if found.is_none() {
                    warn!(rule = %name, "selected rule not found; skipping");
                }
                found
            })
            .collect()
    };
    let stop = opts.stop.as_deref();
    match model {
        ExecModel::Sort => run_sort(&rules, dc, opts.continue_on_error, stop),
        ExecModel::Concurrent => EngineError::from_scope(scatter(&rules, dc, stop)),
        ExecModel::Mix => run_mix(&rules, dc, stop),
        ExecModel::InverseMix => run_inverse_mix(&rules, dc, stop),
    }
}

fn run_sort(
    rules: &[&Arc<RuleEntity>],
    dc: &DataContext,
    continue_on_error: bool,
    stop: Option<&StopTag>,
) -> Result<(), EngineError> {
    let mut last_error = None;
    for rule in rules {
        if stop.is_some_and(StopTag::is_set) {
            break;
        }
        match run_rule(rule, dc, stop) {
            Ok(()) => {}
            Err(e) if continue_on_error => {
                warn!(rule = %rule.name, error = %e, "rule failed; continuing");
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    last_error.map_or(Ok(()), Err)
}

/// Spawn one worker per rule, join them all, and return the failures in
/// schedule order. Not-yet-started rules observe the stop tag themselves.
fn scatter(
    rules: &[&Arc<RuleEntity>],
    dc: &DataContext,
    stop: Option<&StopTag>,
) -> Vec<EngineError> {
    let failures = Mutex::new(Vec::new());
    thread::scope(|s| {
        for (i, rule) in rules.iter().enumerate() {
            let failures = &failures;
            s.spawn(move || {
                if let Err(e) = run_rule(rule, dc, stop) {
                    failures.lock().expect("scatter failures lock").push((i, e));
                }
            });
        }
    });
    let mut failures = failures.into_inner().expect("scatter failures lock");
    failures.sort_by_key(|(i, _)| *i);
    failures.into_iter().map(|(_, e)| e).collect()
}

fn run_mix(
    rules: &[&Arc<RuleEntity>],
    dc: &DataContext,
    stop: Option<&StopTag>,
) -> Result<(), EngineError> {
    let Some((first, rest)) = rules.split_first() else {
        return Ok(());
    };
    let mut errors = Vec::new();
    if let Err(e) = run_rule(first, dc, stop) {
        errors.push(e);
    }
    errors.extend(scatter(rest, dc, stop));
    EngineError::from_scope(errors)
}

fn run_inverse_mix(
    rules: &[&Arc<RuleEntity>],
    dc: &DataContext,
    stop: Option<&StopTag>,
) -> Result<(), EngineError> {
    let Some((last, front)) = rules.split_last() else {
        return Ok(());
    };
    let mut errors = scatter(front, dc, stop);
    if let Err(e) = run_rule(last, dc, stop) {
        errors.push(e);
    }
    EngineError::from_scope(errors)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::parse::parse;
    use crate::types::SharedList;

    fn tally_rules() -> &'static str {
        r#"
            rule "rule30" salience 30 begin tally.push("rule30") end
            rule "rule20" salience 20 begin tally.push("rule20") end
            rule "rule10" salience 10 begin tally.push("rule10") end
        "#
    }

    fn tally_context() -> (DataContext, Arc<SharedList>) {
        let dc = DataContext::new();
        let list = Arc::new(SharedList::new());
        dc.add_fact("tally", list.clone());
        (dc, list)
    }

    fn tally_names(list: &SharedList) -> Vec<String> {
        list.snapshot()
            .into_iter()
            .map(|v| match v {
                Value::String(s) => s,
                other => panic!("expected string, got {other:?}"),
            })
            .collect()
    }

    #[test]
    fn model_codes_round_trip() {
        for code in 1..=4 {
            assert_eq!(ExecModel::from_code(code).unwrap().code(), code);
        }
        assert!(matches!(
            ExecModel::from_code(9),
            Err(EngineError::Config { .. })
        ));
    }

    #[test]
    fn sort_runs_in_descending_salience_order() {
        let kb = parse(tally_rules()).unwrap();
        let (dc, list) = tally_context();
        execute(&kb, &dc, ExecModel::Sort, &ExecuteOptions::default()).unwrap();
        assert_eq!(tally_names(&list), vec!["rule30", "rule20", "rule10"]);
    }

    #[test]
    fn sort_with_continue_on_error_runs_everything_and_returns_last_error() {
        let source = r#"
            rule "boom_a" salience 3 begin x = 1 / 0 end
            rule "ok" salience 2 begin tally.push("ok") end
            rule "boom_b" salience 1 begin x = ghost end
        "#;
        let kb = parse(source).unwrap();
        let (dc, list) = tally_context();
        dc.add_value("x", 0_i64);
        let result = execute(&kb, &dc, ExecModel::Sort, &ExecuteOptions::default());
        assert!(matches!(result, Err(EngineError::Unresolved { .. })));
        assert_eq!(tally_names(&list), vec!["ok"]);
    }

    #[test]
    fn sort_without_continue_on_error_stops_at_first_failure() {
        let source = r#"
            rule "boom" salience 3 begin x = 1 / 0 end
            rule "after" salience 1 begin tally.push("after") end
        "#;
        let kb = parse(source).unwrap();
        let (dc, list) = tally_context();
        dc.add_value("x", 0_i64);
        let opts = ExecuteOptions {
            continue_on_error: false,
            ..ExecuteOptions::default()
        };
        let result = execute(&kb, &dc, ExecModel::Sort, &opts);
        assert!(matches!(result, Err(EngineError::DivisionByZero)));
        assert!(list.is_empty());
    }

    #[test]
    fn concurrent_runs_every_rule() {
        let kb = parse(tally_rules()).unwrap();
        let (dc, list) = tally_context();
        execute(&kb, &dc, ExecModel::Concurrent, &ExecuteOptions::default()).unwrap();
        let mut names = tally_names(&list);
        names.sort();
        assert_eq!(names, vec!["rule10", "rule20", "rule30"]);
    }

    #[test]
    fn mix_leads_with_the_highest_salience_rule() {
        let kb = parse(tally_rules()).unwrap();
        let (dc, list) = tally_context();
        execute(&kb, &dc, ExecModel::Mix, &ExecuteOptions::default()).unwrap();
        let names = tally_names(&list);
        assert_eq!(names[0], "rule30");
        let mut tail = names[1..].to_vec();
        tail.sort();
        assert_eq!(tail, vec!["rule10", "rule20"]);
    }

    #[test]
    fn inverse_mix_trails_with_the_lowest_salience_rule() {
        let kb = parse(tally_rules()).unwrap();
        let (dc, list) = tally_context();
        execute(&kb, &dc, ExecModel::InverseMix, &ExecuteOptions::default()).unwrap();
        let names = tally_names(&list);
        assert_eq!(names[2], "rule10");
        let mut head = names[..2].to_vec();
        head.sort();
        assert_eq!(head, vec!["rule20", "rule30"]);
    }

    #[test]
    fn selected_rules_preserve_listed_order_under_sort() {
        let kb = parse(tally_rules()).unwrap();
        let (dc, list) = tally_context();
        let opts = ExecuteOptions {
            rules: vec!["rule10".into(), "rule30".into()],
            ..ExecuteOptions::default()
        };
        execute(&kb, &dc, ExecModel::Sort, &opts).unwrap();
        assert_eq!(tally_names(&list), vec!["rule10", "rule30"]);
    }

    #[test]
    fn missing_selected_rule_is_skipped() {
        let kb = parse(tally_rules()).unwrap();
        let (dc, list) = tally_context();
        let opts = ExecuteOptions {
            rules: vec!["rule20".into(), "no_such_rule".into()],
            ..ExecuteOptions::default()
        };
        execute(&kb, &dc, ExecModel::Sort, &opts).unwrap();
        assert_eq!(tally_names(&list), vec!["rule20"]);
    }

    #[test]
    fn concurrent_aggregates_failures() {
        let source = r#"
            rule "boom_a" begin x = one_missing end
            rule "boom_b" begin y = 1 / 0 end
        "#;
        let kb = parse(source).unwrap();
        let dc = DataContext::new();
        dc.add_value("x", 0_i64);
        dc.add_value("y", 0_i64);
        let result = execute(&kb, &dc, ExecModel::Concurrent, &ExecuteOptions::default());
        assert!(result.is_err());
    }

    #[test]
    fn stop_tag_set_before_execute_skips_everything() {
        let kb = parse(tally_rules()).unwrap();
        let (dc, list) = tally_context();
        let stop = Arc::new(StopTag::new());
        stop.set();
        let opts = ExecuteOptions {
            stop: Some(stop),
            ..ExecuteOptions::default()
        };
        execute(&kb, &dc, ExecModel::Sort, &opts).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn rule_body_can_raise_the_stop_tag() {
        let source = r#"
            rule "first" salience 30 begin tally.push("first") end
            rule "second" salience 20 begin
                tally.push("second")
                halt.stop = true
            end
            rule "third" salience 10 begin tally.push("third") end
        "#;
        let kb = parse(source).unwrap();
        let (dc, list) = tally_context();
        let stop = Arc::new(StopTag::new());
        dc.add_fact("halt", stop.clone());
        let opts = ExecuteOptions {
            stop: Some(stop),
            ..ExecuteOptions::default()
        };
        execute(&kb, &dc, ExecModel::Sort, &opts).unwrap();
        assert_eq!(tally_names(&list), vec!["first", "second"]);
    }

    #[test]
    fn stop_tag_fact_members() {
        let tag = StopTag::new();
        assert_eq!(tag.get_member("stop").unwrap(), Value::Bool(false));
        tag.set_member("stop", Value::Bool(true)).unwrap();
        assert!(tag.is_set());
        assert!(matches!(
            tag.set_member("stop", Value::Int(1)),
            Err(EngineError::Type { .. })
        ));
        assert!(matches!(
            tag.get_member("other"),
            Err(EngineError::UnknownMember { .. })
        ));
    }

    #[test]
    fn empty_kb_is_a_no_op_under_every_model() {
        let kb = parse("").unwrap();
        let dc = DataContext::new();
        for model in [
            ExecModel::Sort,
            ExecModel::Concurrent,
            ExecModel::Mix,
            ExecModel::InverseMix,
        ] {
            execute(&kb, &dc, model, &ExecuteOptions::default()).unwrap();
        }
    }
}
