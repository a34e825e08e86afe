use pretty_assertions::assert_eq;
use skald::{GlobalScope, Object};

fn eval(src: &str) -> Object {
    GlobalScope::new()
        .eval(src)
        .unwrap_or_else(|err| panic!("eval failed for {src:?}: {err}"))
}

fn eval_str(src: &str) -> String {
    match eval(src) {
        Object::Str(s) => s,
        other => panic!("expected a string, got {other:?}"),
    }
}

#[test]
fn while_loop_sums() {
    assert_eq!(
        eval("var s=0; var i=0; while(i<1000){ s=s+i; i=i+1 }; s"),
        Object::Int(499_500)
    );
}

#[test]
fn class_with_mutable_field() {
    let src = "class C { var x=0; fun inc(){ this.x=this.x+1 } }; var c=C(); \
               var i=0; while(i<1000){ c.inc(); i=i+1 }; c.x";
    assert_eq!(eval(src), Object::Int(1000));
}

#[test]
fn try_catch_binds_the_exception() {
    assert_eq!(
        eval("try { throw Exception(\"x\") } catch(e: Exception){ e.message }"),
        Object::Str("x".to_owned())
    );
}

#[test]
fn sort_in_place() {
    assert_eq!(
        eval("val xs=[3,1,2]; xs.sort(); xs"),
        Object::List(vec![Object::Int(1), Object::Int(2), Object::Int(3)])
    );
}

#[test]
fn string_interpolation() {
    assert_eq!(eval_str("\"hello ${1+2}\""), "hello 3");
}

#[test]
fn map_insertion_order() {
    assert_eq!(
        eval("val m={\"a\":1,\"b\":2}; m[\"c\"]=3; m.keys().toList()"),
        Object::List(vec![
            Object::Str("a".to_owned()),
            Object::Str("b".to_owned()),
            Object::Str("c".to_owned()),
        ])
    );
}

#[test]
fn recursive_factorial() {
    assert_eq!(
        eval("fun f(x){ if(x==0) return 1; return x*f(x-1) }; f(5)"),
        Object::Int(120)
    );
}

#[test]
fn empty_source_yields_void() {
    assert_eq!(eval(""), Object::Void);
    assert_eq!(eval("   \n\n  "), Object::Void);
}

#[test]
fn void_interpolates_as_its_literal_form() {
    assert_eq!(eval_str("\"x: ${void}\""), "x: void");
}

#[test]
fn integer_overflow_promotes_and_narrows_back() {
    match eval("9223372036854775807 + 1") {
        Object::BigInt(big) => assert_eq!(big.to_string(), "9223372036854775808"),
        other => panic!("expected a promoted integer, got {other:?}"),
    }
    assert_eq!(
        eval("9223372036854775807 + 1 - 1"),
        Object::Int(i64::MAX)
    );
}

#[test]
fn numeric_tower_closure() {
    assert_eq!(eval("7 / 2"), Object::Int(3));
    assert_eq!(eval("-7 / 2"), Object::Int(-3));
    assert_eq!(eval("2 * 3.0"), Object::Real(6.0));
    assert_eq!(eval("1 + 0.5"), Object::Real(1.5));
    assert_eq!(eval("2 ** 10"), Object::Int(1024));
}

#[test]
fn negative_list_index_counts_from_the_end() {
    assert_eq!(eval("[1,2,3][-1]"), Object::Int(3));
    assert_eq!(eval("[1,2,3][-3]"), Object::Int(1));
}

#[test]
fn map_remove_then_reinsert_moves_to_end() {
    let src = "val m = {\"a\": 1, \"b\": 2, \"c\": 3}\n\
               m.remove(\"b\")\n\
               m[\"b\"] = 9\n\
               m.keys().toList()";
    assert_eq!(
        eval(src),
        Object::List(vec![
            Object::Str("a".to_owned()),
            Object::Str("c".to_owned()),
            Object::Str("b".to_owned()),
        ])
    );
}

#[test]
fn ranges_iterate_and_list() {
    assert_eq!(
        eval("(1..4).toList()"),
        Object::List(vec![
            Object::Int(1),
            Object::Int(2),
            Object::Int(3),
            Object::Int(4)
        ])
    );
    assert_eq!(
        eval("(1..<4).toList()"),
        Object::List(vec![Object::Int(1), Object::Int(2), Object::Int(3)])
    );
    assert_eq!(
        eval("(1..10).step(3).toList()"),
        Object::List(vec![
            Object::Int(1),
            Object::Int(4),
            Object::Int(7),
            Object::Int(10)
        ])
    );
    assert_eq!(
        eval("var s = 0; for (i in 1..10) s = s + i; s"),
        Object::Int(55)
    );
}

#[test]
fn for_over_collections() {
    assert_eq!(
        eval("var s = 0; for (x in [1, 2, 3]) s = s + x; s"),
        Object::Int(6)
    );
    assert_eq!(
        eval_str("var out = \"\"; for (c in \"abc\") out = out + c; out"),
        "abc"
    );
    let src = "val m = {\"a\": 1, \"b\": 2}\n\
               var out = []\n\
               for (entry in m) out.add(entry[0])\n\
               out";
    assert_eq!(
        eval(src),
        Object::List(vec![Object::Str("a".to_owned()), Object::Str("b".to_owned())])
    );
}

#[test]
fn labelled_break_exits_the_outer_loop() {
    let src = "var n = 0\n\
               outer@ while(true) {\n\
                   var i = 0\n\
                   while(true) { i = i + 1; n = n + 1; if (i == 3) break@outer }\n\
               }\n\
               n";
    assert_eq!(eval(src), Object::Int(3));
}

#[test]
fn do_while_runs_at_least_once() {
    assert_eq!(eval("var n = 0; do { n = n + 1 } while(false); n"), Object::Int(1));
}

#[test]
fn safe_access_and_elvis() {
    assert_eq!(eval("val x = null; x?.length() ?: -1"), Object::Int(-1));
    assert_eq!(eval("val x = \"abc\"; x?.length() ?: -1"), Object::Int(3));
    assert_eq!(eval("null ?: 7"), Object::Int(7));
}

#[test]
fn lambdas_and_higher_order_methods() {
    assert_eq!(
        eval("[1, 2, 3].map { it * 2 }"),
        Object::List(vec![Object::Int(2), Object::Int(4), Object::Int(6)])
    );
    assert_eq!(
        eval("[1, 2, 3, 4].filter { it % 2 == 0 }"),
        Object::List(vec![Object::Int(2), Object::Int(4)])
    );
    assert_eq!(
        eval("val add = { a, b -> a + b }; add(20, 22)"),
        Object::Int(42)
    );
}

#[test]
fn trailing_block_is_the_last_argument() {
    let src = "fun apply(x, f) { f(x) }\n\
               apply(21) { it * 2 }";
    assert_eq!(eval(src), Object::Int(42));
}

#[test]
fn closures_capture_their_scope() {
    let src = "fun counter() { var n = 0; val tick = { -> n = n + 1 }; tick }\n\
               val c = counter()\n\
               c(); c(); c()";
    assert_eq!(eval(src), Object::Int(3));
}

#[test]
fn default_parameters() {
    assert_eq!(eval("fun f(a, b = 10) { a + b }; f(1) + f(1, 2)"), Object::Int(14));
}

#[test]
fn operator_overloading_on_classes() {
    let src = "class Vec2(x, y) { fun plus(o) { Vec2(this.x + o.x, this.y + o.y) } }\n\
               val v = Vec2(1, 2) + Vec2(3, 4)\n\
               \"${v.x},${v.y}\"";
    assert_eq!(eval_str(src), "4,6");
}

#[test]
fn compare_to_drives_sort() {
    let src = "class P(n) { fun compareTo(o) { this.n - o.n } }\n\
               val ps = [P(3), P(1), P(2)]\n\
               ps.sort()\n\
               ps.map { it.n }";
    assert_eq!(
        eval(src),
        Object::List(vec![Object::Int(1), Object::Int(2), Object::Int(3)])
    );
}

#[test]
fn equals_override_drives_contains() {
    let src = "class Id(v) { fun equals(o) { this.v == o.v } }\n\
               [Id(1), Id(2)].contains(Id(2))";
    assert_eq!(eval(src), Object::Bool(true));
}

#[test]
fn class_inheritance_and_fields() {
    let src = "class A { var base = 1 }\n\
               class B : A { var extra = 2 }\n\
               val b = B()\n\
               b.base + b.extra";
    assert_eq!(eval(src), Object::Int(3));
}

#[test]
fn user_exception_subclass() {
    let src = "class NotFound : Exception { }\n\
               try { throw NotFound(\"missing\") } catch(e: NotFound) { e.message }";
    assert_eq!(eval_str(src), "missing");
    // And the base handler catches it too.
    let src = "class NotFound : Exception { }\n\
               try { throw NotFound(\"missing\") } catch(e: Exception) { \"base\" }";
    assert_eq!(eval_str(src), "base");
}

#[test]
fn enums_have_names_ordinals_and_values() {
    let src = "enum Color { RED, GREEN, BLUE }\n\
               \"${Color.GREEN.name}:${Color.GREEN.ordinal}:${Color.values().size()}\"";
    assert_eq!(eval_str(src), "GREEN:1:3");
}

#[test]
fn extension_methods_register_on_builtins() {
    let src = "fun String.shout() { this.toUpper() + \"!\" }\n\
               \"hey\".shout()";
    assert_eq!(eval_str(src), "HEY!");
    let src = "fun Int.double() { this * 2 }\n\
               21.double()";
    assert_eq!(eval(src), Object::Int(42));
}

#[test]
fn regex_literals_and_methods() {
    assert_eq!(
        eval("/a+b/.findAll(\"aab ab b\")"),
        Object::List(vec![
            Object::Str("aab".to_owned()),
            Object::Str("ab".to_owned())
        ])
    );
    assert_eq!(eval_str("/a+b/.pattern()"), "a+b");
    assert_eq!(eval("/ab+c/i.matches(\"ABBC\")"), Object::Bool(true));
    assert_eq!(eval("\"2024\".matches(/[0-9]+/)"), Object::Bool(true));
    // `/` after an operand is division, not a regex.
    assert_eq!(eval("val a = 10; val b = 2; a / b"), Object::Int(5));
}

#[test]
fn string_methods() {
    assert_eq!(
        eval("\"Hello World\".split(\" \")"),
        Object::List(vec![
            Object::Str("Hello".to_owned()),
            Object::Str("World".to_owned())
        ])
    );
    assert_eq!(eval("\"hello\".length()"), Object::Int(5));
    assert_eq!(eval_str("\"a-b\".replace(\"-\", \"+\")"), "a+b");
    assert_eq!(eval_str("\"%s has %d items\".format(\"cart\", 3)"), "cart has 3 items");
    assert_eq!(eval("\"  x \".trim().length()"), Object::Int(1));
    assert_eq!(eval("\"abc\".charAt(1)"), Object::Char('b'));
    assert_eq!(eval("\"42\".toInt()"), Object::Int(42));
    assert_eq!(eval_str("\"ab\" * 3"), "ababab");
}

#[test]
fn nested_interpolation() {
    assert_eq!(eval_str("\"${ {\"k\": 1}[\"k\"] }\""), "1");
    assert_eq!(eval_str("\"outer ${\"inner ${1 + 1}\"}\""), "outer inner 2");
}

#[test]
fn sets_deduplicate() {
    let src = "val s = Set([1, 2, 2, 3])\n\
               s.add(3)\n\
               \"${s.size()}:${s.contains(2)}\"";
    assert_eq!(eval_str(src), "3:true");
}

#[test]
fn if_is_an_expression() {
    assert_eq!(eval("val x = if (1 < 2) \"yes\" else \"no\"; x"), Object::Str("yes".to_owned()));
    assert_eq!(eval("if (false) 1"), Object::Void);
}

#[test]
fn host_functions_are_callable() {
    let mut scope = GlobalScope::new();
    scope.add_function("twice", 1, |args| {
        let n = i64::try_from(&args[0]).map_err(skald::HostError::new)?;
        Ok(Object::Int(n * 2))
    });
    assert_eq!(scope.eval("twice(21)").unwrap(), Object::Int(42));
}

#[test]
fn host_variables_round_trip() {
    let mut scope = GlobalScope::new();
    scope.set_var("seed", Object::Int(40));
    assert_eq!(scope.eval("seed + 2").unwrap(), Object::Int(42));
    scope.set_var("seed", Object::Int(1));
    assert_eq!(scope.eval("seed").unwrap(), Object::Int(1));
    assert_eq!(scope.get_var("seed"), Some(Object::Int(1)));
}

#[test]
fn module_provider_serves_imports() {
    let mut scope = GlobalScope::new();
    scope.set_module_provider(|path| {
        if path == "math.extras" {
            Some(vec![("tau".to_owned(), Object::Real(6.283_185_307_179_586))])
        } else {
            None
        }
    });
    let result = scope.eval("import math.extras\ntau > 6.0").unwrap();
    assert_eq!(result, Object::Bool(true));
    // A denied module surfaces as a resolution failure.
    let err = scope.eval("import secret.fs\n1").unwrap_err();
    assert!(err.to_string().contains("secret.fs"));
}

#[test]
fn line_continuation_joins_statements() {
    assert_eq!(eval("val x = 1 + \\\n2\nx"), Object::Int(3));
}

#[test]
fn equality_follows_value_rules() {
    assert_eq!(eval("1 == 1.0"), Object::Bool(true));
    assert_eq!(eval("\"a\" == \"a\""), Object::Bool(true));
    // Lists are reference-equal.
    assert_eq!(eval("[1] == [1]"), Object::Bool(false));
    assert_eq!(eval("val a = [1]; val b = a; a == b"), Object::Bool(true));
    // NaN is unequal to itself, and ordering tests on it are false.
    assert_eq!(eval("val n = (0.0 - 1.0) ** 0.5; n == n"), Object::Bool(false));
    assert_eq!(eval("val n = (0.0 - 1.0) ** 0.5; n < 1.0 || n >= 1.0"), Object::Bool(false));
}

#[test]
fn bound_methods_are_first_class() {
    let src = "val xs = [3, 1, 2]\n\
               val f = xs.sort\n\
               f()\n\
               xs";
    assert_eq!(
        eval(src),
        Object::List(vec![Object::Int(1), Object::Int(2), Object::Int(3)])
    );
}

#[test]
fn iterator_protocol_is_user_extensible() {
    let src = "class Twice(v) {\n\
                   var served = 0\n\
                   fun hasNext() { this.served < 2 }\n\
                   fun next() { this.served = this.served + 1; this.v }\n\
                   fun iterator() { this }\n\
               }\n\
               var out = []\n\
               for (x in Twice(7)) out.add(x)\n\
               out";
    assert_eq!(eval(src), Object::List(vec![Object::Int(7), Object::Int(7)]));
}

#[test]
fn to_string_and_inspect() {
    assert_eq!(eval_str("[1, \"a\"].toString()"), "[1, \"a\"]");
    assert_eq!(eval_str("42.toString()"), "42");
    assert_eq!(eval_str("\"x\".inspect()"), "\"x\"");
    assert_eq!(eval_str("1.5.toString()"), "1.5");
}
