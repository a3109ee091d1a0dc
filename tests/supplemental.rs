// File: tests/supplemental.rs
//
// Additional scenario categories extending the named end-to-end
// scenarios rather than replacing them: value vs. reference semantics,
// multi-return calls, branch chains, logical operators, nested loops,
// relational sweeps, string concatenation, nested-block break, range-
// for over a dict, and unary operators.

mod common;

use common::*;

#[test]
fn copy_semantics_for_values_vs_reference_semantics_for_containers() {
    let state = run_source(
        r#"
        var a = 5
        var b = a
        b = b + 1

        var s1 = "hi"
        var s2 = s1

        var d1 = {x:1}
        var d2 = d1
        d2.x = 99

        var l1 = [1,2]
        var l2 = l1
        append(l2, 3)

        var rx = d1.x
        var rl = #l1
        "#,
    );
    assert_number(&reg(&state, 1), 5.0);
    assert_number(&reg(&state, 2), 6.0);
    assert_string(&reg(&state, 3), "hi");
    assert_string(&reg(&state, 4), "hi");
    assert_number(&reg(&state, 9), 99.0);
    assert_number(&reg(&state, 10), 3.0);
}

#[test]
fn multi_return_calls_assign_discard_and_splat() {
    let state = run_source(
        r#"
        func pair() { return 1,2 }
        var a,b = pair()
        var c = pair()
        func sum3(x,y,z) { return x+y+z }
        var s = sum3(10, pair())
        var d = {greet: func() { return "hi" }}
        var msg = d.greet()
        "#,
    );
    assert_number(&reg(&state, 2), 1.0);
    assert_number(&reg(&state, 3), 2.0);
    assert_number(&reg(&state, 4), 1.0);
    assert_number(&reg(&state, 6), 13.0);
    assert_string(&reg(&state, 8), "hi");
}

#[test]
fn if_else_if_else_chain_selects_each_branch() {
    let state = run_source(
        r#"
        func classify(x) {
            if x<0 { return "neg" }
            else if x==0 { return "zero" }
            else { return "pos" }
        }
        var r1 = classify(-5)
        var r2 = classify(0)
        var r3 = classify(5)
        "#,
    );
    assert_string(&reg(&state, 2), "neg");
    assert_string(&reg(&state, 3), "zero");
    assert_string(&reg(&state, 4), "pos");
}

#[test]
fn logical_and_or_expressions_are_assignable_values() {
    let state = run_source(
        r#"
        var t = true
        var f = false
        var l1 = t and f
        var l2 = t or f
        "#,
    );
    assert_bool(&reg(&state, 3), false);
    assert_bool(&reg(&state, 4), true);
}

#[test]
fn nested_numeric_for_accumulates_per_outer_iteration() {
    let state = run_source(
        r#"
        var total = 0
        for i=0,3 {
            for j=0,3 {
                total = total + 1
            }
        }
        "#,
    );
    assert_number(&reg(&state, 1), 9.0);
}

#[test]
fn relational_operator_sweep() {
    let state = run_source(
        r#"
        var a = 3
        var b = 5
        var r1 = a<b
        var r2 = a<=b
        var r3 = a>b
        var r4 = a>=b
        var r5 = a==b
        var r6 = a!=b
        "#,
    );
    assert_bool(&reg(&state, 3), true);
    assert_bool(&reg(&state, 4), true);
    assert_bool(&reg(&state, 5), false);
    assert_bool(&reg(&state, 6), false);
    assert_bool(&reg(&state, 7), false);
    assert_bool(&reg(&state, 8), true);
}

#[test]
fn string_concat_chain() {
    let state = run_source(r#"var s = "a" .. "b" .. "c" .. "d""#);
    assert_string(&reg(&state, 1), "abcd");
}

#[test]
fn break_from_a_nested_block_closes_every_block_on_the_way_out() {
    let state = run_source(
        r#"
        var a = 0
        while true {
            a = a + 1
            if a==3 {
                if true {
                    break
                }
            }
        }
        "#,
    );
    assert_number(&reg(&state, 1), 3.0);
}

#[test]
fn range_for_over_a_dict_sums_values() {
    let state = run_source(
        r#"
        var d = {a:1, b:2, c:3}
        var sum = 0
        for k,v = range d {
            sum = sum + v
        }
        "#,
    );
    assert_number(&reg(&state, 2), 6.0);
}

#[test]
fn unary_minus_and_not_over_number_and_bool() {
    let state = run_source(
        r#"
        var n = 5
        var neg = -n
        var t = true
        var nt = not t
        "#,
    );
    assert_number(&reg(&state, 2), -5.0);
    assert_bool(&reg(&state, 4), false);
}
