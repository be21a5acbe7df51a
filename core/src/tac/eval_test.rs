use super::eval::eval_binop;
use super::*;
use crate::error::{ErrorKind, Result};
use crate::val::{ValList, ValMap};

fn num(n: f64) -> Value {
    Value::Number(n)
}

#[test]
fn test_fuzzy_and_or() {
    let and = eval_binop(Op::AAndB, &num(0.5), &num(0.5)).unwrap();
    assert_eq!(and, num(0.25));
    let or = eval_binop(Op::AOrB, &num(0.5), &num(0.5)).unwrap();
    assert_eq!(or, num(0.75));
    // Still clamps to strict logic at the endpoints.
    assert_eq!(eval_binop(Op::AAndB, &num(1.0), &num(1.0)).unwrap(), num(1.0));
    assert_eq!(eval_binop(Op::AOrB, &num(0.0), &num(0.0)).unwrap(), num(0.0));
}

#[test]
fn test_not_is_fuzzy() {
    assert_eq!(eval_binop(Op::NotA, &num(0.25), &Value::Null).unwrap(), num(0.75));
    assert_eq!(eval_binop(Op::NotA, &Value::string("x"), &Value::Null).unwrap(), num(0.0));
}

#[test]
fn test_string_coercing_add() {
    let out = eval_binop(Op::APlusB, &Value::string("n="), &num(3.0)).unwrap();
    assert_eq!(out.to_display_string(), "n=3");
    let out = eval_binop(Op::APlusB, &num(3.0), &Value::string("!")).unwrap();
    assert_eq!(out.to_display_string(), "3!");
}

#[test]
fn test_string_replication_truncates_fractional_prefix() {
    let out = eval_binop(Op::ATimesB, &Value::string("abc"), &num(2.5)).unwrap();
    assert_eq!(out.to_display_string(), "abcabca");
    let out = eval_binop(Op::ADividedByB, &Value::string("abcdef"), &num(2.0)).unwrap();
    assert_eq!(out.to_display_string(), "abc");
}

#[test]
fn test_string_minus_strips_suffix() {
    let out = eval_binop(Op::AMinusB, &Value::string("hello.txt"), &Value::string(".txt")).unwrap();
    assert_eq!(out.to_display_string(), "hello");
    let out = eval_binop(Op::AMinusB, &Value::string("hello"), &Value::string("xyz")).unwrap();
    assert_eq!(out.to_display_string(), "hello");
}

#[test]
fn test_equality_short_circuits_on_null() {
    assert_eq!(eval_binop(Op::AEqualB, &Value::Null, &num(1.0)).unwrap(), num(0.0));
    assert_eq!(eval_binop(Op::AEqualB, &Value::Null, &Value::Null).unwrap(), num(1.0));
    assert_eq!(eval_binop(Op::ANotEqualB, &Value::Null, &num(1.0)).unwrap(), num(1.0));
}

#[test]
fn test_mixed_comparison_yields_null() {
    let out = eval_binop(Op::AGreaterThanB, &num(1.0), &Value::string("a")).unwrap();
    assert!(out.is_null());
    let out = eval_binop(Op::ALessThanB, &Value::string("a"), &Value::string("b")).unwrap();
    assert_eq!(out, num(1.0));
}

#[test]
fn test_division_by_zero_is_ieee() {
    let out = eval_binop(Op::ADividedByB, &num(1.0), &num(0.0)).unwrap();
    assert_eq!(out.to_display_string(), "INF");
}

#[test]
fn test_list_index_wraps_and_reports_range() {
    let list = ValList::from_values(vec![num(10.0), num(20.0)]);
    let a = Value::List(list.clone());
    assert_eq!(eval_binop(Op::ElemBofA, &a, &num(-1.0)).unwrap(), num(20.0));
    let err = eval_binop(Op::ElemBofA, &a, &num(7.0)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::IndexOutOfRange { index: 7, count: 2 });
    list.unref();
}

#[test]
fn test_string_key_on_list_resolves_as_name() {
    let list = ValList::from_values(vec![]);
    let err = eval_binop(Op::ElemBofA, &Value::List(list.clone()), &Value::string("len")).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::KeyNotFound(_)));
    list.unref();
}

#[test]
fn test_map_lookup_walks_isa_chain() {
    let base = ValMap::new();
    base.set_str("kind", Value::string("base"));
    let child = ValMap::new();
    base.ref_();
    child.set_str("__isa", Value::Map(base.clone()));
    let out = eval_binop(Op::ElemBofA, &Value::Map(child.clone()), &Value::ident("kind")).unwrap();
    assert_eq!(out.to_display_string(), "base");
    out.unref();
    child.unref();
    base.unref();
}

#[test]
fn test_isa_operator() {
    let base = ValMap::new();
    let child = ValMap::new();
    base.ref_();
    child.set_str("__isa", Value::Map(base.clone()));
    assert_eq!(
        eval_binop(Op::AisaB, &Value::Map(child.clone()), &Value::Map(base.clone())).unwrap(),
        num(1.0)
    );
    assert_eq!(
        eval_binop(Op::AisaB, &Value::Map(base.clone()), &Value::Map(child.clone())).unwrap(),
        num(0.0)
    );
    assert_eq!(eval_binop(Op::AisaB, &Value::Null, &Value::Null).unwrap(), num(1.0));
    child.unref();
    base.unref();
}

#[test]
fn test_iter_access_on_map_yields_key_value_pairs() {
    let map = ValMap::new();
    map.set_str("x", num(1.0));
    map.set_str("foo", num(2.0));
    let pair = eval_binop(Op::ElemBofIterA, &Value::Map(map.clone()), &num(1.0)).unwrap();
    match &pair {
        Value::Map(p) => {
            let k = p.get_str("key").unwrap();
            let v = p.get_str("value").unwrap();
            assert_eq!(k.to_display_string(), "foo");
            assert_eq!(v, num(2.0));
        }
        other => panic!("expected pair map, got {}", other.type_name()),
    }
    pair.unref();
    map.unref();
}

#[test]
fn test_length_of() {
    let list = ValList::from_values(vec![num(1.0), num(2.0)]);
    assert_eq!(
        eval_binop(Op::LengthOfA, &Value::List(list.clone()), &Value::Null).unwrap(),
        num(2.0)
    );
    assert_eq!(
        eval_binop(Op::LengthOfA, &Value::string("héllo"), &Value::Null).unwrap(),
        num(5.0)
    );
    assert!(eval_binop(Op::LengthOfA, &num(3.0), &Value::Null).is_err());
    list.unref();
}

mod custom_values {
    use super::*;
    use crate::val::CustomValue;
    use std::rc::Rc;

    /// Reference example of the host extension point: a 2-D vector that
    /// participates in `+` and member lookup.
    #[derive(Debug)]
    struct Vec2 {
        x: f64,
        y: f64,
    }

    impl CustomValue for Vec2 {
        fn type_name(&self) -> &'static str {
            "vec2"
        }

        fn to_display_string(&self) -> String {
            format!("({}, {})", self.x, self.y)
        }

        fn hash_value(&self) -> u64 {
            self.x.to_bits() ^ self.y.to_bits()
        }

        fn equality(&self, other: &Value) -> f64 {
            match other {
                Value::Custom(c) if c.type_name() == "vec2" => {
                    if c.to_display_string() == self.to_display_string() {
                        1.0
                    } else {
                        0.0
                    }
                }
                _ => 0.0,
            }
        }

        fn arithmetic(&self, op: Op, other: &Value, _reversed: bool) -> Option<Result<Value>> {
            match (op, other) {
                (Op::APlusB, Value::Number(n)) => Some(Ok(Value::Custom(Rc::new(Vec2 {
                    x: self.x + n,
                    y: self.y + n,
                })))),
                _ => None,
            }
        }

        fn lookup(&self, key: &Value) -> Option<Value> {
            match key {
                Value::Str(s) if s.as_str() == "x" => Some(Value::Number(self.x)),
                Value::Str(s) if s.as_str() == "y" => Some(Value::Number(self.y)),
                _ => None,
            }
        }
    }

    #[test]
    fn test_custom_gets_first_refusal_on_arithmetic() {
        let v = Value::Custom(Rc::new(Vec2 { x: 1.0, y: 2.0 }));
        let out = eval_binop(Op::APlusB, &v, &num(1.0)).unwrap();
        assert_eq!(out.to_display_string(), "(2, 3)");
        // Reversed operands reach the same hook.
        let out = eval_binop(Op::APlusB, &num(1.0), &v).unwrap();
        assert_eq!(out.to_display_string(), "(2, 3)");
        // Declined ops fall back to the built-in rules (string coercion).
        let out = eval_binop(Op::APlusB, &v, &Value::string("!")).unwrap();
        assert_eq!(out.to_display_string(), "(1, 2)!");
    }

    #[test]
    fn test_custom_member_resolution() {
        let v = Value::Custom(Rc::new(Vec2 { x: 4.0, y: 5.0 }));
        let out = eval_binop(Op::ElemBofA, &v, &Value::ident("x")).unwrap();
        assert_eq!(out, num(4.0));
        assert!(eval_binop(Op::ElemBofA, &v, &Value::ident("z")).is_err());
    }
}
