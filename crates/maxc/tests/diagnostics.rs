//! Compile-time diagnostic tests: every error path reports, the pipeline
//! keeps going past individual errors, and emission never runs on a program
//! with diagnostics.

use maxc::{Diagnostics, Runner};

fn compile_err(source: &str) -> Diagnostics {
    Runner::new(source, "test.mxc").expect_err("program should not compile")
}

#[test]
fn const_reassignment_is_rejected() {
    let diags = compile_err("const K = 5; K = 6;");
    assert!(diags.has_message("assignment of read-only variable: K"), "{diags}");
}

#[test]
fn const_requires_an_initializer() {
    let diags = compile_err("const K: int;");
    assert!(diags.has_message("const must initialize"), "{diags}");
}

#[test]
fn unknown_identifier_reports_once_per_occurrence() {
    let diags = compile_err("println(nope);");
    assert!(diags.has_message("undeclared variable: nope"), "{diags}");
    assert_eq!(diags.error_count(), 1);

    let diags = compile_err("println(nope); println(nope);");
    assert_eq!(diags.error_count(), 2);
}

#[test]
fn assignment_type_mismatch() {
    let diags = compile_err(r#"let a = 1; a = "x";"#);
    assert!(diags.has_message("type mismatch in assignment"), "{diags}");
}

#[test]
fn declaration_type_mismatch() {
    let diags = compile_err(r#"let a: int = "x";"#);
    assert!(diags.has_message("`a` type is int"), "{diags}");
}

#[test]
fn return_type_mismatch() {
    let diags = compile_err(r#"fn f(): int { return "x"; }"#);
    assert!(diags.has_message("expected int, found string"), "{diags}");
}

#[test]
fn argument_type_mismatch() {
    let diags = compile_err(r#"fn f(a: int): int = a; f("x");"#);
    assert!(diags.has_message("no matching function: f(string)"), "{diags}");
}

#[test]
fn break_outside_a_loop() {
    let diags = compile_err("break;");
    assert!(diags.has_message("break statement must be inside loop statement"), "{diags}");
}

#[test]
fn return_outside_a_function() {
    let diags = compile_err("return 1;");
    assert!(diags.has_message("outside function"), "{diags}");
}

#[test]
fn undefined_binary_operation() {
    let diags = compile_err(r#"let x = 1 + "s";"#);
    assert!(diags.has_message("undefined operation `+` between int and string"), "{diags}");
}

#[test]
fn shifts_have_no_builtin_meaning() {
    let diags = compile_err("let x = 1 << 2;");
    assert!(diags.has_message("undefined operation `<<`"), "{diags}");
}

#[test]
fn uninitialized_use_is_rejected() {
    let diags = compile_err("let a: int; println(a);");
    assert!(diags.has_message("use of uninit variable: a"), "{diags}");
}

#[test]
fn uninitialized_then_assigned_is_fine() {
    let source = "let a: int; a = 1; println(a);";
    assert!(Runner::new(source, "test.mxc").is_ok());
}

#[test]
fn inference_requires_an_initializer() {
    let diags = compile_err("let a;");
    assert!(diags.has_message("must always be initialized"), "{diags}");
}

#[test]
fn duplicate_operator_definition() {
    let source = "
        object V { x: int }
        fn `+`(a: V, b: V): V = a;
        fn `+`(a: V, b: V): V = b;
    ";
    let diags = compile_err(source);
    assert!(diags.has_message("duplicate operator definition: `+`"), "{diags}");
}

#[test]
fn overloading_a_builtin_operator_entry_is_a_duplicate() {
    let diags = compile_err("fn `+`(a: int, b: int): int = a;");
    assert!(diags.has_message("duplicate operator definition: `+`"), "{diags}");
}

#[test]
fn failure_block_requires_an_optional_call() {
    let diags = compile_err("fn g(): int = 1; let x = g().FAILURE { 0 };");
    assert!(diags.has_message("failure blocks are only allowed on optional-typed calls"), "{diags}");
}

#[test]
fn failure_block_type_must_match_the_base() {
    let source = r#"
        fn g(): int? = 1;
        let x = g().FAILURE { "fallback" };
    "#;
    let diags = compile_err(source);
    assert!(diags.has_message("failure block type error"), "{diags}");
}

#[test]
fn condition_must_be_bool() {
    let diags = compile_err("if 1 { println(0); }");
    assert!(diags.has_message("condition must be bool, found int"), "{diags}");
}

#[test]
fn unknown_struct_field() {
    let source = "
        object P { x: int }
        let p = new P { z: 1 };
    ";
    let diags = compile_err(source);
    assert!(diags.has_message("no field: z"), "{diags}");
}

#[test]
fn missing_struct_field() {
    let source = "
        object P { x: int, y: int }
        let p = new P { x: 1 };
    ";
    let diags = compile_err(source);
    assert!(diags.has_message("missing field: y"), "{diags}");
}

#[test]
fn undefined_type_name() {
    let diags = compile_err("let p = new Nope { x: 1 };");
    assert!(diags.has_message("undefined type: Nope"), "{diags}");
}

#[test]
fn list_elements_must_share_a_type() {
    let diags = compile_err(r#"let xs = [1, "two"];"#);
    assert!(diags.has_message("list element type mismatch"), "{diags}");
}

#[test]
fn builtins_cannot_be_used_as_values() {
    let diags = compile_err("let p = println;");
    assert!(diags.has_message("builtin function `println` must be called"), "{diags}");
}

#[test]
fn closures_are_not_supported() {
    let source = "
        fn outer(): int {
            let x = 1;
            fn inner(): int = x;
            inner()
        }
    ";
    let diags = compile_err(source);
    assert!(diags.has_message("cannot capture `x` from an enclosing function"), "{diags}");
}

#[test]
fn structs_do_not_implement_show() {
    let source = "
        object P { x: int }
        let p = new P { x: 1 };
        println(p);
    ";
    let diags = compile_err(source);
    assert!(diags.has_message("does not implement `Show`"), "{diags}");
}

#[test]
fn missing_import_is_fatal() {
    let diags = compile_err("import definitely_not_a_module;");
    assert!(diags.has_message("lib definitely_not_a_module: not found"), "{diags}");
}

#[test]
fn typedef_is_reserved() {
    let diags = compile_err("typedef alias = int;");
    assert!(diags.has_message("typedef is not implemented"), "{diags}");
}

#[test]
fn multiple_errors_accumulate_in_one_pass() {
    let diags = compile_err("println(a); println(b); break;");
    assert_eq!(diags.error_count(), 3);
}

#[test]
fn diagnostics_render_with_location_and_summary() {
    let diags = compile_err("println(nope);");
    let rendered = diags.to_string();
    assert!(rendered.contains("test.mxc:1:9:"), "{rendered}");
    assert!(rendered.contains("1 error generated"), "{rendered}");
}
