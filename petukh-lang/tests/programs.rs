use petukh_lang::lexer::{tokenize, TokenKind};
use petukh_lang::{compile, Error, Vm};

fn run(source: &str, input: &str) -> String {
    let program = match compile(source) {
        Ok(program) => program,
        Err(errors) => panic!("compile errors: {:?}", errors),
    };
    let mut out = Vec::new();
    let code = Vm::new(&program)
        .with_input(input.as_bytes())
        .with_output(&mut out)
        .run();
    assert_eq!(code, Ok(0));
    String::from_utf8(out).unwrap()
}

fn errors(source: &str) -> Vec<String> {
    match compile(source) {
        Ok(_) => panic!("expected errors for {}", source),
        Err(errors) => errors.iter().map(|e| e.to_string()).collect(),
    }
}

#[test]
fn test_sum_program() {
    let source = "fn int main() { int x = 2 + 3; printInt(x); return 0; }";

    let kinds: Vec<TokenKind> = tokenize(source).iter().map(|t| t.kind).collect();
    use TokenKind::*;
    assert_eq!(
        kinds,
        vec![
            KwFn, KwInt, Identifier, LParen, RParen, LBrace, KwInt, Identifier, Assign, Number,
            Plus, Number, Semicolon, Identifier, LParen, Identifier, RParen, Semicolon, KwReturn,
            Number, Semicolon, RBrace, EndOfFile,
        ]
    );

    assert_eq!(run(source, ""), "5");
}

#[test]
fn test_call_binds_argument() {
    let source = "fn int f(int a) { return a + 1; } fn int main() { printInt(f(4)); return 0; }";
    assert_eq!(run(source, ""), "5");
}

#[test]
fn test_argument_order() {
    let source = "fn int sub(int a, int b) { return a - b; } fn int main() { printInt(sub(10, 3)); return 0; }";
    assert_eq!(run(source, ""), "7");
}

#[test]
fn test_array_store_and_load() {
    let source = "fn int main() { int arr[3]; arr[1] = 7; printInt(arr[1]); return 0; }";
    assert_eq!(run(source, ""), "7");
}

#[test]
fn test_false_while_skips_body() {
    let source = "fn int main() { while(0) { printInt(1); } return 0; }";
    assert_eq!(run(source, ""), "");
}

#[test]
fn test_undeclared_variable_halts_pipeline() {
    let result = compile("fn int main() { printInt(y); return 0; }");
    let Err(errors) = result else {
        panic!("program with an undeclared variable compiled");
    };
    assert_eq!(errors.len(), 1);
    assert!(matches!(&errors[0], Error::Semantic { message, .. } if message.contains('y')));
}

#[test]
fn test_division_by_zero_is_zero() {
    let source = "fn int main() { int zero = 0; printInt(5 / 0); printInt(9 % zero); return 0; }";
    assert_eq!(run(source, ""), "00");
}

#[test]
fn test_syntax_errors_stop_before_analysis() {
    let errs = errors("fn int main() { int x = ; printInt(q); return 0; }");
    assert_eq!(errs[0], "Line 1, col 25: unexpected token in expression: ';'");
    assert!(errs.iter().all(|e| !e.contains("Undeclared")), "{:?}", errs);
}

#[test]
fn test_all_semantic_errors_reported() {
    let errs = errors(
        "fn int main() {\n  int a = \"s\";\n  printInt(b);\n  break;\n  return 0;\n}",
    );
    assert_eq!(
        errs,
        vec![
            "Line 2, col 11: Initializer type mismatch for 'a': expected int, got string",
            "Line 3, col 12: Undeclared variable: b",
            "Line 4, col 3: 'break' outside of a loop",
        ]
    );
}

#[test]
fn test_loops_and_control_flow() {
    let source = r#"
        fn int main() {
            int total = 0;
            for (int i = 0; i < 10; i = i + 1) {
                if (i % 2 == 0) { continue; }
                if (i > 7) { break; }
                total = total + i;
            }
            printInt(total);
            printStr(" ");
            int n = 3;
            do { printInt(n); n = n - 1; } while (n > 0);
            printStr(" ");
            int k = 0;
            while (1) { k = k + 1; if (k == 4) { break; } }
            printInt(k);
            return 0;
        }
    "#;
    assert_eq!(run(source, ""), "16 321 4");
}

#[test]
fn test_if_else_chain() {
    let source = r#"
        fn string grade(int score) {
            if (score >= 90) { return "A"; }
            else if (score >= 80) { return "B"; }
            else { return "C"; }
        }
        fn int main() {
            printStr(grade(95) + grade(85) + grade(10));
            return 0;
        }
    "#;
    assert_eq!(run(source, ""), "ABC");
}

#[test]
fn test_mutual_recursion() {
    let source = r#"
        fn int main() { printInt(isEven(10)); printInt(isEven(7)); return 0; }
        fn int isEven(int n) { if (n == 0) { return 1; } return isOdd(n - 1); }
        fn int isOdd(int n) { if (n == 0) { return 0; } return isEven(n - 1); }
    "#;
    assert_eq!(run(source, ""), "10");
}

#[test]
fn test_array_parameter_and_bubble_sort() {
    let source = r#"
        fn int main() {
            int n = inputInt();
            int xs[n];
            for (int i = 0; i < n; i = i + 1) { xs[i] = inputInt(); }
            for (int i = 0; i < n; i = i + 1) {
                for (int j = 0; j + 1 < n - i; j = j + 1) {
                    if (xs[j] > xs[j + 1]) {
                        int t = xs[j];
                        xs[j] = xs[j + 1];
                        xs[j + 1] = t;
                    }
                }
            }
            printInt(sum(xs, n));
            printStr(":");
            for (int i = 0; i < n; i = i + 1) { printInt(xs[i]); printStr(" "); }
            return 0;
        }
        fn int sum(int values[], int n) {
            int s = 0;
            for (int i = 0; i < n; i = i + 1) { s = s + values[i]; }
            return s;
        }
    "#;
    assert_eq!(run(source, "5\n4 1 5 3 2\n"), "15:1 2 3 4 5 ");
}

#[test]
fn test_doubles_and_strings() {
    let source = r#"
        fn double area(double r) { return 3.14159 * r * r; }
        fn int main() {
            printDouble(area(2));
            printStr(" ");
            printDouble(1.0 / 3);
            printStr(" ");
            string name = inputStr();
            printStr("hi " + name);
            return 0;
        }
    "#;
    assert_eq!(run(source, "world\n"), "12.5664 0.333333 hi world");
}

#[test]
fn test_shadowed_variable_restored() {
    let source = r#"
        fn int main() {
            int x = 1;
            { int x = 2; printInt(x); }
            printInt(x);
            return 0;
        }
    "#;
    assert_eq!(run(source, ""), "21");
}

#[test]
fn test_comma_and_assignment_values() {
    let source = r#"
        fn int main() {
            int a; int b;
            a = b = 4;
            printInt(a + b);
            int c = (a = 1, a + 10);
            printInt(c);
            return 0;
        }
    "#;
    assert_eq!(run(source, ""), "811");
}

#[test]
fn test_listing_shape() {
    let program = compile("fn int main() { return 0; }").unwrap();
    assert_eq!(program.listing(), "0 LABEL main\n1 PUSH_INT 0\n2 RET\n");
}

#[test]
fn test_indexed_assignment_value() {
    let source = r#"
        fn int main() {
            int a[5];
            printInt(a[inputInt()] = 7);
            printStr("|");
            printInt(a[1]);
            printInt(a[2]);
            printStr("|");
            printInt(inputInt());
            return 0;
        }
    "#;
    assert_eq!(run(source, "1 2"), "7|70|2");
}

#[test]
fn test_string_character_assignment_rejected() {
    let errs = errors("fn int main() { string s = \"abc\"; s[0] = \"x\"; printStr(s); return 0; }");
    assert_eq!(errs, vec!["Line 1, col 35: Cannot assign to a character of string: s"]);
}

#[test]
fn test_int_literal_stored_as_double() {
    let source = r#"
        fn double half(double x) { return x / 2; }
        fn int main() {
            double d = 1;
            printDouble(d / 2);
            printStr(" ");
            d = 3;
            printDouble(d / 2);
            printStr(" ");
            printDouble(half(5.0));
            return 0;
        }
    "#;
    assert_eq!(run(source, ""), "0.5 1.5 2.5");
}
