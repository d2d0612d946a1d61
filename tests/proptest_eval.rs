use proptest::prelude::*;
use salient::{BinOp, DataContext, ExecModel, ExecuteOptions, Value, execute, parse};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // -----------------------------------------------------------------------
    // Value arithmetic
    // -----------------------------------------------------------------------

    #[test]
    fn int_add_and_mul_commute(a in -1_000_000i64..1_000_000, b in -1_000_000i64..1_000_000) {
        let (va, vb) = (Value::Int(a), Value::Int(b));
        prop_assert_eq!(va.add(&vb).unwrap(), vb.add(&va).unwrap());
        prop_assert_eq!(va.mul(&vb).unwrap(), vb.mul(&va).unwrap());
    }

    #[test]
    fn int_division_identity(a in -1_000_000i64..1_000_000, b in -1000i64..1000) {
        prop_assume!(b != 0);
        let (va, vb) = (Value::Int(a), Value::Int(b));
        let quotient = va.div(&vb).unwrap();
        let remainder = va.rem(&vb).unwrap();
        let rebuilt = quotient.mul(&vb).unwrap().add(&remainder).unwrap();
        prop_assert_eq!(rebuilt, Value::Int(a));
    }

    #[test]
    fn int_promotes_to_equal_float(a in -1_000_000i64..1_000_000) {
        #[allow(clippy::cast_precision_loss)]
        let as_float = Value::Float(a as f64);
        prop_assert!(Value::Int(a).compare(BinOp::Eq, &as_float).unwrap());
    }

    #[test]
    fn comparison_operators_are_coherent(a in -1000i64..1000, b in -1000i64..1000) {
        let (va, vb) = (Value::Int(a), Value::Int(b));
        prop_assert_eq!(va.compare(BinOp::Lt, &vb).unwrap(), a < b);
        prop_assert_eq!(va.compare(BinOp::Lte, &vb).unwrap(), a <= b);
        prop_assert_eq!(va.compare(BinOp::Gt, &vb).unwrap(), a > b);
        prop_assert_eq!(va.compare(BinOp::Gte, &vb).unwrap(), a >= b);
        prop_assert_eq!(va.compare(BinOp::Eq, &vb).unwrap(), a == b);
        prop_assert_eq!(va.compare(BinOp::Neq, &vb).unwrap(), a != b);
    }

    #[test]
    fn string_concat_preserves_both_sides(a in "[a-z]{0,12}", b in "[a-z]{0,12}") {
        let joined = Value::String(a.clone()).add(&Value::String(b.clone())).unwrap();
        prop_assert_eq!(joined, Value::String(format!("{a}{b}")));
    }

    // -----------------------------------------------------------------------
    // Interpreter arithmetic agrees with host arithmetic
    // -----------------------------------------------------------------------

    #[test]
    fn rule_arithmetic_matches_host(a in -10_000i64..10_000, b in -10_000i64..10_000) {
        prop_assume!(b != 0);
        let source = format!(
            "rule \"calc\" begin out = ({a}) * ({b}) + ({a}) / ({b}) end"
        );
        let kb = parse(&source).unwrap();
        let dc = DataContext::new();
        let out = dc.add_value("out", 0_i64);
        execute(&kb, &dc, ExecModel::Sort, &ExecuteOptions::default()).unwrap();
        prop_assert_eq!(out.get(), Value::Int(a.wrapping_mul(b).wrapping_add(a / b)));
    }

    #[test]
    fn rule_comparisons_match_host(a in -100i64..100, b in -100i64..100) {
        let source = format!(
            "rule \"cmp\" begin when ({a}) < ({b}) then hit = true end"
        );
        let kb = parse(&source).unwrap();
        let dc = DataContext::new();
        let hit = dc.add_value("hit", false);
        execute(&kb, &dc, ExecModel::Sort, &ExecuteOptions::default()).unwrap();
        prop_assert_eq!(hit.get(), Value::Bool(a < b));
    }

    #[test]
    fn evaluation_is_deterministic(x in -1000i64..1000) {
        let source = r#"
            rule "a" salience 2 begin v = v + 1 end
            rule "b" salience 1 begin v = v * 2 end
        "#;
        let kb = parse(source).unwrap();
        let mut seen = None;
        for _ in 0..5 {
            let dc = DataContext::new();
            let v = dc.add_value("v", x);
            execute(&kb, &dc, ExecModel::Sort, &ExecuteOptions::default()).unwrap();
            let got = v.get();
            if let Some(previous) = &seen {
                prop_assert_eq!(previous, &got);
            }
            seen = Some(got);
        }
        prop_assert_eq!(seen, Some(Value::Int((x + 1) * 2)));
    }
}
