//! End-to-end structural tests: source text in, assembly text out. No
//! assembler or linker runs here, so assertions check for the instruction
//! sequences and labels a correct lowering must produce rather than actual
//! program output.

use std::io::Write as _;

use pascalc::{compile_file, compile_source, CompileOptions};

fn compile(source: &str) -> String {
    compile_source("test", source, CompileOptions::default()).expect("compilation should succeed")
}

#[test]
fn arithmetic_mixing_promotes_only_the_double_operand() {
    let asm = compile(
        r#"
        program Demo;
        begin
            write(3 + 4);
            writeln;
            writef(1 / 2)
        end.
        "#,
    );
    assert!(asm.contains(".intel_syntax noprefix"));
    assert!(asm.contains("call builtin$write"));
    assert!(asm.contains("call builtin$writeln"));
    assert!(asm.contains("call builtin$writef"));
    // 1 / 2 is Slash, which always takes the SSE path regardless of operand types.
    assert!(asm.contains("cvtsi2sd"));
}

#[test]
fn recursive_function_calls_its_own_label() {
    let asm = compile(
        r#"
        program Demo;
        function fact(n: integer): integer;
        begin
            if n <= 1 then fact := 1 else fact := n * fact(n - 1)
        end;
        begin
            write(fact(6))
        end.
        "#,
    );
    let fact_label = asm
        .lines()
        .find(|l| l.trim_start_matches('.').starts_with("Func_fact"))
        .expect("fact's function label should be emitted")
        .trim_end_matches(':');
    assert!(asm.contains(&format!("call {fact_label}")));
}

#[test]
fn by_reference_parameters_push_addresses_not_values() {
    let asm = compile(
        r#"
        program Demo;
        var x, y: integer;
        procedure swap(var a: integer; var b: integer);
        var t: integer;
        begin
            t := a;
            a := b;
            b := t
        end;
        begin
            x := 1;
            y := 2;
            swap(x, y);
            write(x);
            write(y)
        end.
        "#,
    );
    assert!(asm.lines().any(|l| l.trim().starts_with("call") && l.contains("Func_swap")));
    // Pushing an l-value's address, not its value, goes through LVALUE_PTR (r14).
    assert!(asm.contains("push r14"));
}

#[test]
fn array_access_emits_a_bounds_check_per_dimension() {
    let asm = compile(
        r#"
        program Demo;
        var a: array [1..3, 1..2] of integer;
        begin
            a[2, 1] := 42;
            write(a[2, 1])
        end.
        "#,
    );
    let checks = asm.matches("call builtin$checkarrayindex").count();
    // One assignment, one read, two dimensions each: four checks.
    assert_eq!(checks, 4);
}

#[test]
fn string_assignment_allocates_rather_than_aliasing() {
    let asm = compile(
        r#"
        program Demo;
        var s, t: string;
        begin
            s := 'abc';
            t := s;
            setchr(s, 1, 90);
            writes(t)
        end.
        "#,
    );
    // Deep-copy assignment goes through the libc trampoline (malloc/strcpy),
    // not a raw pointer move.
    assert!(asm.contains("call builtin$callsysv"));
    assert!(asm.contains("call builtin$setchr"));
    assert!(asm.contains("call builtin$writes"));
}

#[test]
fn nested_procedure_reaches_outer_local_through_a_static_link() {
    let asm = compile(
        r#"
        program Demo;
        var v: integer;
        procedure inner;
        begin
            v := v + 1
        end;
        begin
            v := 10;
            inner;
            inner;
            write(v)
        end.
        "#,
    );
    // `inner`'s body is at level 2 but touches the root's level-0 local, so it
    // must compute a static-link offset rather than just `mov rbx, rbp`.
    assert!(asm.contains("mov rax,"));
    assert!(asm.contains("mov rbx, qword ptr [rbp + rax*8]"));
}

#[test]
fn every_local_label_id_is_unique() {
    let asm = compile(
        r#"
        program Demo;
        var i: integer;
        begin
            for i := 1 to 10 do
                if i > 5 then write(i) else write(0)
        end.
        "#,
    );
    let mut ids = std::collections::HashSet::new();
    for line in asm.lines() {
        let trimmed = line.trim_end_matches(':');
        if let Some(rest) = trimmed.strip_prefix('.') {
            if let Some(id) = rest.rsplit('_').next() {
                if id.chars().all(|c| c.is_ascii_digit()) && !id.is_empty() {
                    assert!(ids.insert(trimmed.to_string()), "duplicate label {trimmed}");
                }
            }
        }
    }
    assert!(!ids.is_empty());
}

#[test]
fn unresolved_identifier_is_rejected_with_the_right_kind() {
    let err = compile_source("test", "program Demo; begin x := 1 end.", CompileOptions::default())
        .unwrap_err();
    assert_eq!(err.kind, pascalc::ErrorKind::UnresolvedName);
}

#[test]
fn by_value_argument_to_a_by_reference_parameter_is_rejected() {
    let source = r#"
        program Demo;
        procedure bump(var a: integer);
        begin
            a := a + 1
        end;
        begin
            bump(1 + 1)
        end.
        "#;
    let err = compile_source("test", source, CompileOptions::default()).unwrap_err();
    assert_eq!(err.kind, pascalc::ErrorKind::NotAnLValue);
}

#[test]
fn malformed_source_is_a_syntax_error_not_a_panic() {
    let err = compile_source("test", "program Demo begin end.", CompileOptions::default())
        .unwrap_err();
    assert_eq!(err.kind, pascalc::ErrorKind::Syntax);
}

#[test]
fn strcat_writes_into_a_third_by_reference_result_argument() {
    let asm = compile(
        r#"
        program Demo;
        var a, b, c: string;
        begin
            a := 'foo';
            b := 'bar';
            strcat(a, b, c);
            writes(c)
        end.
        "#,
    );
    assert!(asm.contains("call builtin$strcat"));
    // Two by-value string args pushed plus one by-reference result address;
    // nothing here collapses to the old 2-param in-place-append shape.
    assert!(asm.contains("push r14"));
}

#[test]
fn compile_file_reads_from_disk() {
    let mut file = tempfile::Builder::new()
        .suffix(".pas")
        .tempfile()
        .expect("create temp file");
    write!(file, "program Demo; begin write(1) end.").unwrap();

    let asm = compile_file(file.path(), CompileOptions::default()).expect("should compile");
    assert!(asm.contains("call builtin$write"));
}

#[test]
fn two_independent_compilations_do_not_share_label_numbering() {
    // The label counter lives on the compiler context, not a process-global:
    // two unrelated `compile_source` calls each start counting from 1, so the
    // very first label minted in each compilation is identical rather than
    // the second continuing where the first left off.
    let a = compile("program A; begin write(1) end.");
    let b = compile("program B; begin write(2) end.");

    let first_label = |asm: &str| -> String {
        asm.lines()
            .find(|l| l.starts_with('.') && l.ends_with(':'))
            .expect("a local label should be emitted")
            .to_string()
    };
    assert_eq!(
        first_label(&a),
        first_label(&b),
        "each compilation should mint its own labels starting from 1, not share a running counter"
    );
}
