//! End-to-end program tests: compile with the public `Runner` and capture
//! builtin output through `CollectStringPrint`.

use maxc::{CollectStringPrint, Heap, NativeDef, RunError, Runner, Type, Value};
use pretty_assertions::assert_eq;

fn run_program(source: &str) -> String {
    let runner = Runner::new(source, "test.mxc").expect("program should compile");
    let mut out = CollectStringPrint::new();
    runner.run(&mut out).expect("program should run");
    out.take()
}

fn run_err(source: &str) -> RunError {
    let runner = Runner::new(source, "test.mxc").expect("program should compile");
    let mut out = CollectStringPrint::new();
    runner.run(&mut out).expect_err("program should raise")
}

#[test]
fn arithmetic_precedence() {
    assert_eq!(run_program("let a = 1 + 2 * 3; println(a);"), "7\n");
}

#[test]
fn recursive_fib() {
    let source = "
        fn fib(n: int): int = if n < 2 { n } else { fib(n - 1) + fib(n - 2) };
        println(fib(10));
    ";
    assert_eq!(run_program(source), "55\n");
}

#[test]
fn list_len_and_subscript() {
    let source = "let xs = [1, 2, 3]; println(xs.len); println(xs[1]);";
    assert_eq!(run_program(source), "3\n2\n");
}

#[test]
fn failure_block_recovers_the_error_path() {
    let source = r#"
        fn div(a: int, b: int): int? {
            if b == 0 { return error("zero"); }
            a / b
        }
        let r = div(10, 0).FAILURE { -1 };
        println(r);
    "#;
    assert_eq!(run_program(source), "-1\n");
}

#[test]
fn failure_block_passes_through_the_success_path() {
    let source = r#"
        fn div(a: int, b: int): int? {
            if b == 0 { return error("zero"); }
            a / b
        }
        println(div(10, 2).FAILURE { -1 });
    "#;
    assert_eq!(run_program(source), "5\n");
}

#[test]
fn struct_definition_and_field_access() {
    let source = "
        object P { x: int, y: int }
        let p = new P { x: 3, y: 4 };
        println(p.x + p.y);
    ";
    assert_eq!(run_program(source), "7\n");
}

#[test]
fn struct_field_store() {
    let source = "
        object P { x: int, y: int }
        let p = new P { x: 1, y: 2 };
        p.x = 10;
        println(p.x + p.y);
    ";
    assert_eq!(run_program(source), "12\n");
}

#[test]
fn struct_literal_field_order_is_declaration_order() {
    let source = "
        object P { x: int, y: int }
        let p = new P { y: 4, x: 3 };
        println(p.x);
        println(p.y);
    ";
    assert_eq!(run_program(source), "3\n4\n");
}

#[test]
fn while_loop_with_break() {
    let source = "
        let i = 0;
        while true {
            i = i + 1;
            if i == 3 { break; }
        }
        println(i);
    ";
    assert_eq!(run_program(source), "3\n");
}

#[test]
fn for_loop_iterates_in_source_order() {
    let source = "
        let sum = 0;
        for x in [1, 2, 3] { sum = sum * 10 + x; }
        println(sum);
    ";
    assert_eq!(run_program(source), "123\n");
}

#[test]
fn break_inside_for() {
    let source = "
        let sum = 0;
        for x in [1, 2, 3, 4] {
            if x == 3 { break; }
            sum = sum + x;
        }
        println(sum);
    ";
    assert_eq!(run_program(source), "3\n");
}

#[test]
fn string_concat_and_len() {
    let source = r#"
        let s = "foo" + "bar";
        println(s);
        println(len(s));
    "#;
    assert_eq!(run_program(source), "foobar\n6\n");
}

#[test]
fn print_writes_without_separators_or_newline() {
    let source = r#"print(1, " ", true);"#;
    assert_eq!(run_program(source), "1 true");
}

#[test]
fn float_arithmetic_formats_with_a_decimal_point() {
    assert_eq!(run_program("println(1.5 + 2.25);"), "3.75\n");
    assert_eq!(run_program("println(tofloat(2) + 0.5);"), "2.5\n");
    assert_eq!(run_program("println(4.0 / 2.0);"), "2.0\n");
}

#[test]
fn method_call_sugar_passes_the_receiver_first() {
    let source = "
        fn twice(x: int): int = x * 2;
        println(5.twice());
    ";
    assert_eq!(run_program(source), "10\n");
}

#[test]
fn operator_overloading_rewrites_to_a_call() {
    let source = "
        object V { x: int }
        fn `+`(a: V, b: V): V = new V { x: a.x + b.x };
        let v = new V { x: 1 } + new V { x: 2 };
        println(v.x);
    ";
    assert_eq!(run_program(source), "3\n");
}

#[test]
fn first_class_functions() {
    let source = "
        fn twice(x: int): int = x * 2;
        let f = twice;
        println(f(21));
    ";
    assert_eq!(run_program(source), "42\n");
}

#[test]
fn overloads_select_by_argument_types() {
    let source = r#"
        fn show(x: int): string = "int";
        fn show(x: float): string = "float";
        println(show(1));
        println(show(1.0));
    "#;
    assert_eq!(run_program(source), "int\nfloat\n");
}

#[test]
fn lists_print_recursively() {
    let source = r#"println([1, 2, 3], " ", ["a", "b"]);"#;
    assert_eq!(run_program(source), "[1, 2, 3] [\"a\", \"b\"]\n");
}

#[test]
fn tuples_construct_and_print() {
    assert_eq!(run_program("println((1, true));"), "(1, true)\n");
}

#[test]
fn expression_if_propagates_the_else_branch() {
    let source = "
        let n = 10;
        let label = if n > 5 { n } else { 0 };
        println(label);
    ";
    assert_eq!(run_program(source), "10\n");
}

#[test]
fn let_declaration_block() {
    let source = "
        let {
            a = 1;
            b: int = 2;
        }
        println(a + b);
    ";
    assert_eq!(run_program(source), "3\n");
}

#[test]
fn list_element_assignment() {
    let source = "
        let xs = [1, 2, 3];
        xs[0] = 9;
        println(xs[0] + xs[2]);
    ";
    assert_eq!(run_program(source), "12\n");
}

#[test]
fn chars_lex_and_print() {
    let source = "let c = 'x'; println(c);";
    assert_eq!(run_program(source), "x\n");
}

#[test]
fn prefix_inc_and_dec() {
    assert_eq!(run_program("println(++41);"), "42\n");
    assert_eq!(run_program("println(--43);"), "42\n");
}

#[test]
fn logical_operators_with_keywords() {
    assert_eq!(run_program("println(true and false, \" \", true or false);"), "false true\n");
}

#[test]
fn division_by_zero_raises() {
    assert_eq!(run_err("println(10 / 0);").message, "division by zero");
}

#[test]
fn subscript_out_of_range_raises() {
    assert_eq!(run_err("let xs = [1]; println(xs[5]);").message, "index out of range");
}

#[test]
fn runtime_error_propagates_across_frames_to_the_top() {
    let source = r#"
        fn inner(): int = 1 / 0;
        fn outer(): int = inner() + 1;
        println(outer());
    "#;
    assert_eq!(run_err(source).message, "division by zero");
}

#[test]
fn uncaught_error_value_reaches_the_top_frame() {
    let source = r#"
        fn f(): int? { return error("boom"); }
        let x = f();
        println(1);
    "#;
    assert_eq!(run_err(source).message, "boom");
}

#[test]
fn failure_block_catches_a_raised_division() {
    // the division raises inside the callee; the caller's failure block
    // catches the unwound error exactly like an explicit error() return
    let source = "
        fn div(a: int, b: int): int? = a / b;
        println(div(1, 0).FAILURE { -7 });
    ";
    assert_eq!(run_program(source), "-7\n");
}

#[test]
fn imports_splice_into_the_enclosing_scope() {
    let dir = std::env::temp_dir().join(format!("maxc-import-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir");
    std::fs::write(dir.join("util.mxc"), "fn triple(x: int): int = x * 3;\n").expect("module file");

    let main_path = dir.join("main.mxc");
    let source = "import util; println(triple(7));";
    let runner = Runner::new(source, &main_path.display().to_string()).expect("program should compile");
    let mut out = CollectStringPrint::new();
    runner.run(&mut out).expect("program should run");
    assert_eq!(out.take(), "21\n");

    let _ = std::fs::remove_dir_all(&dir);
}

fn native_add(_heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    match (&args[0], &args[1]) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
        _ => Err("add_ints requires integer arguments".to_owned()),
    }
}

#[test]
fn native_functions_dispatch_through_the_call_path() {
    let natives = vec![NativeDef {
        name: "add_ints".to_owned(),
        params: vec![Type::Int, Type::Int],
        ret: Type::Int,
        func: native_add,
    }];
    let runner = Runner::with_natives("println(add_ints(20, 22));", "test.mxc", natives)
        .expect("program should compile");
    let mut out = CollectStringPrint::new();
    runner.run(&mut out).expect("program should run");
    assert_eq!(out.take(), "42\n");
}

#[test]
fn objectid_distinguishes_heap_objects() {
    let source = r#"
        let a = [1];
        let b = [1];
        println(objectid(a) == objectid(b));
        println(objectid(a) == objectid(a));
    "#;
    assert_eq!(run_program(source), "false\ntrue\n");
}
