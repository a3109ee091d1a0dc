// File: tests/end_to_end.rs
//
// Whole-program scenarios lexed, parsed, compiled and run end to end,
// observed through the top-level chunk's own registers (register 0 is
// always the implicit `arg` vararg list; the first user-declared local
// lands at register 1).

mod common;

use common::*;

#[test]
fn scenario_1_var_def_and_reassignment_chain() {
    let state = run_source(
        r#"
        var a,b = false,true
        a = b
        var c = nil
        var d = c
        c = "kmp"
        var e = c
        "#,
    );
    assert_bool(&reg(&state, 1), true);
    assert_bool(&reg(&state, 2), true);
    assert_string(&reg(&state, 3), "kmp");
    assert_nil(&reg(&state, 4));
    assert_string(&reg(&state, 5), "kmp");
}

#[test]
fn scenario_2_arithmetic_chain() {
    let state = run_source(
        r#"
        var a,b = 10,23
        a = b - 23 + 10*a
        var c = a/5/4
        var r = c % 3
        "#,
    );
    assert_number(&reg(&state, 1), 100.0);
    assert_number(&reg(&state, 2), 23.0);
    assert_number(&reg(&state, 3), 5.0);
    assert_number(&reg(&state, 4), 2.0);
}

#[test]
fn scenario_3_recursive_name_binding_and_relational_branch() {
    let state = run_source(
        r#"
        func max(x,y) {
            if x>y { return x }
            return y
        }
        var m,n = 102,22
        var a = max(n,m)
        "#,
    );
    assert_number(&reg(&state, 4), 102.0);
}

#[test]
fn scenario_5_range_for_doubling_sum() {
    let state = run_source(
        r#"
        var sum = 0
        var xs = [2,3,1]
        for i,v = range xs {
            v = v*2 + 1
            sum = sum + v
        }
        "#,
    );
    assert_number(&reg(&state, 1), 15.0);
}

#[test]
fn scenario_6_while_break() {
    let state = run_source(
        r#"
        var a = 12
        while true {
            a = a - 1
            if a==3 { break }
        }
        "#,
    );
    assert_number(&reg(&state, 1), 3.0);
}

#[test]
fn closures_in_a_for_loop_mutate_independent_closed_upvalues() {
    // Each iteration's `var j = i` is its own local, closed over by a
    // freshly created closure and detached from the next iteration by
    // the per-iteration CLOSE, so the three closures never share state
    // with each other. But a closed-over upvalue is still mutable: each
    // closure's own `j` survives and accumulates across repeated calls
    // to that same closure.
    let state = run_source(
        r#"
        var cbs = []
        func initCbs() {
            for i=0,3 {
                var j = i
                append(cbs, func() {
                    j = j+1
                    return j*j
                })
            }
        }
        initCbs()
        var a,b,c = cbs[0](), cbs[1](), cbs[2]()
        var d = cbs[0]()
        "#,
    );
    assert_number(&reg(&state, 3), 1.0);
    assert_number(&reg(&state, 4), 4.0);
    assert_number(&reg(&state, 5), 9.0);
    assert_number(&reg(&state, 6), 4.0);
}

#[test]
fn closures_over_an_enclosing_loop_local_alias_its_updates() {
    // A local declared *outside* the loop and only mutated inside the
    // body is never touched by the per-iteration CLOSE (its register
    // is below the loop block's offset), so every closure captured
    // across iterations shares one upvalue and observes the final
    // value.
    let state = run_source(
        r#"
        var cbs = []
        var x = 0
        while x < 3 {
            var f = func() { return x }
            append(cbs, f)
            x = x + 1
        }
        var r0 = cbs[0]()
        var r1 = cbs[1]()
        var r2 = cbs[2]()
        "#,
    );
    assert_number(&reg(&state, 3), 3.0);
    assert_number(&reg(&state, 4), 3.0);
    assert_number(&reg(&state, 5), 3.0);
}
