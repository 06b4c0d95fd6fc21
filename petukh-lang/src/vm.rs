use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::builtins::Builtin;
use crate::bytecode::{format_general, parse_double_prefix, parse_int_prefix};
use crate::bytecode::{LabelName, Op, Program, Value, VariableName};
use crate::error::Error;

#[derive(Debug, Clone)]
pub struct Config {
    /// Label execution starts at. A program without it does nothing.
    pub entry: String,
    /// Budget reported by the `timeUp` builtin.
    pub time_limit: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            entry: "main".to_owned(),
            time_limit: Duration::from_millis(1950),
        }
    }
}

/// Conditions that abort execution. They point at a broken instruction
/// stream, never at a property of a program that passed analysis.
#[derive(Error, Debug)]
enum Fault {
    #[error("stack underflow")]
    StackUnderflow,
    #[error("unknown label: {0}")]
    UnknownLabel(String),
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Default)]
struct Frame {
    ret_ip: usize,
    locals: HashMap<VariableName, Value>,
}

pub struct Vm<'a> {
    program: &'a Program,
    config: Config,
    labels: HashMap<LabelName, usize>,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    ip: usize,
    steps: u64,
    started: Instant,
    input: Box<dyn BufRead + 'a>,
    output: Box<dyn Write + 'a>,
}

impl<'a> Vm<'a> {
    pub fn new(program: &'a Program) -> Self {
        let labels = program
            .code
            .iter()
            .enumerate()
            .filter_map(|(i, op)| match op {
                Op::Label(label) => Some((*label, i)),
                _ => None,
            })
            .collect();
        Self {
            program,
            config: Config::default(),
            labels,
            stack: Vec::new(),
            frames: Vec::new(),
            ip: 0,
            steps: 0,
            started: Instant::now(),
            input: Box::new(io::stdin().lock()),
            output: Box::new(io::stdout()),
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_input(mut self, input: impl BufRead + 'a) -> Self {
        self.input = Box::new(input);
        self
    }

    pub fn with_output(mut self, output: impl Write + 'a) -> Self {
        self.output = Box::new(output);
        self
    }

    /// Execute from the entry label until it returns. The exit code is 0
    /// whenever execution completes.
    pub fn run(&mut self) -> Result<i32, Error> {
        self.stack.clear();
        self.frames.clear();
        self.steps = 0;
        self.started = Instant::now();

        let result = self
            .try_run()
            .and_then(|()| self.output.flush().map_err(Fault::from));
        log::debug!("vm stopped after {} steps", self.steps);
        match result {
            Ok(()) => Ok(0),
            Err(fault) => {
                let loc = self
                    .program
                    .code_locs
                    .get(self.ip)
                    .copied()
                    .unwrap_or_default();
                Err(Error::Runtime {
                    line: loc.line,
                    column: loc.col,
                    message: fault.to_string(),
                })
            }
        }
    }

    fn try_run(&mut self) -> Result<(), Fault> {
        let entry = self
            .program
            .find_label(&self.config.entry)
            .and_then(|label| self.labels.get(&label).copied());
        let Some(entry) = entry else {
            log::debug!("no '{}' label, nothing to run", self.config.entry);
            return Ok(());
        };

        // returning from this frame ends the run
        self.frames.push(Frame {
            ret_ip: self.program.code.len(),
            locals: HashMap::new(),
        });
        self.ip = entry;

        while self.ip < self.program.code.len() {
            let op = self.program.code[self.ip];
            self.steps += 1;
            log::trace!(
                "{:>5} {} {}",
                self.ip,
                op.mnemonic(),
                self.program.operand(&op).unwrap_or_default()
            );

            match op {
                Op::PushInt(i) => self.stack.push(Value::Int(i)),
                Op::PushDouble(d) => self.stack.push(Value::Double(d)),
                Op::PushString(s) => {
                    let s = self.program.string(&s).to_owned();
                    self.stack.push(Value::Str(s));
                }
                Op::Load(name) => {
                    let val = self
                        .frames
                        .last()
                        .and_then(|f| f.locals.get(&name))
                        .cloned()
                        .unwrap_or(Value::Int(0));
                    self.stack.push(val);
                }
                Op::Store(name) => {
                    let val = self.pop()?;
                    self.locals().insert(name, val);
                }
                Op::NewArray => {
                    let len = self.pop()?.as_int().max(0) as usize;
                    self.stack.push(Value::zeroed_array(len));
                }
                Op::LoadIndex => {
                    let idx = self.pop()?.as_int();
                    let base = self.pop()?;
                    self.stack.push(load_index(base, idx));
                }
                Op::StoreIndex(name) => {
                    let idx = self.pop()?.as_int();
                    let val = self.pop()?;
                    store_index(self.locals(), name, idx, val);
                }
                Op::Add
                | Op::Sub
                | Op::Mul
                | Op::Div
                | Op::Mod
                | Op::Eq
                | Op::Neq
                | Op::Lt
                | Op::Gt
                | Op::Le
                | Op::Ge => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(binary(op, a, b));
                }
                Op::Neg => {
                    let val = match self.pop()? {
                        Value::Double(d) => Value::Double(-d),
                        other => Value::Int(other.as_int().wrapping_neg()),
                    };
                    self.stack.push(val);
                }
                Op::Not => {
                    let val = self.pop()?;
                    self.stack.push(Value::Int(val.is_zero() as i64));
                }
                Op::Jmp(label) => {
                    self.ip = self.jump_target(label)?;
                    continue;
                }
                Op::Jz(label) => {
                    if self.pop()?.is_zero() {
                        self.ip = self.jump_target(label)?;
                        continue;
                    }
                }
                Op::Call(label) => {
                    let program = self.program;
                    let name = program.label(&label);
                    if let Some(builtin) = Builtin::from_name(name) {
                        self.call_builtin(builtin)?;
                    } else {
                        let target = self
                            .labels
                            .get(&label)
                            .copied()
                            .ok_or_else(|| Fault::UnknownFunction(name.to_owned()))?;
                        log::debug!("call {} from {}", name, self.ip);
                        self.frames.push(Frame {
                            ret_ip: self.ip + 1,
                            locals: HashMap::new(),
                        });
                        self.ip = target;
                        continue;
                    }
                }
                Op::Ret => {
                    let Some(frame) = self.frames.pop() else {
                        return Ok(());
                    };
                    if self.frames.is_empty() {
                        return Ok(());
                    }
                    log::debug!("ret to {}", frame.ret_ip);
                    self.ip = frame.ret_ip;
                    continue;
                }
                Op::Pop => {
                    self.pop()?;
                }
                Op::Label(_) => (),
            }
            self.ip += 1;
        }
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, Fault> {
        self.stack.pop().ok_or(Fault::StackUnderflow)
    }

    fn locals(&mut self) -> &mut HashMap<VariableName, Value> {
        if self.frames.is_empty() {
            self.frames.push(Frame {
                ret_ip: self.program.code.len(),
                locals: HashMap::new(),
            });
        }
        let last = self.frames.len() - 1;
        &mut self.frames[last].locals
    }

    fn jump_target(&self, label: LabelName) -> Result<usize, Fault> {
        self.labels
            .get(&label)
            .copied()
            .ok_or_else(|| Fault::UnknownLabel(self.program.label(&label).to_owned()))
    }

    fn call_builtin(&mut self, builtin: Builtin) -> Result<(), Fault> {
        match builtin {
            Builtin::PrintInt => {
                let val = self.pop()?;
                write!(self.output, "{}", val.as_int())?;
                self.output.flush()?;
            }
            Builtin::PrintDouble => {
                let val = self.pop()?;
                write!(self.output, "{}", format_general(val.as_double()))?;
                self.output.flush()?;
            }
            Builtin::PrintStr => {
                let val = self.pop()?;
                write!(self.output, "{}", val.as_string())?;
                self.output.flush()?;
            }
            Builtin::InputInt => {
                let token = self.read_token()?;
                self.stack.push(Value::Int(parse_int_prefix(&token)));
            }
            Builtin::InputDouble => {
                let token = self.read_token()?;
                self.stack.push(Value::Double(parse_double_prefix(&token)));
            }
            Builtin::InputStr => {
                let line = self.read_line()?;
                self.stack.push(Value::Str(line));
            }
            Builtin::TimeUp => {
                let up = self.started.elapsed() >= self.config.time_limit;
                self.stack.push(Value::Int(up as i64));
            }
        }
        Ok(())
    }

    /// Next whitespace separated token. The whitespace after it is left
    /// unread.
    fn read_token(&mut self) -> io::Result<String> {
        let mut token = Vec::new();
        loop {
            let buf = self.input.fill_buf()?;
            if buf.is_empty() {
                break;
            }
            let mut used = 0;
            let mut done = false;
            for &b in buf {
                if b.is_ascii_whitespace() {
                    if !token.is_empty() {
                        done = true;
                        break;
                    }
                } else {
                    token.push(b);
                }
                used += 1;
            }
            self.input.consume(used);
            if done {
                break;
            }
        }
        Ok(String::from_utf8_lossy(&token).into_owned())
    }

    /// Rest of the current line. If that is empty, as it is right after
    /// reading a number, the following line is read instead.
    fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        let read = self.input.read_line(&mut line)?;
        trim_newline(&mut line);
        if line.is_empty() && read > 0 {
            self.input.read_line(&mut line)?;
            trim_newline(&mut line);
        }
        Ok(line)
    }
}

fn trim_newline(line: &mut String) {
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
}

fn load_index(base: Value, idx: i64) -> Value {
    let idx = usize::try_from(idx).ok();
    match base {
        Value::Array(items) => idx
            .and_then(|i| items.into_iter().nth(i))
            .unwrap_or(Value::Int(0)),
        Value::Str(s) => Value::Str(
            idx.and_then(|i| s.chars().nth(i))
                .map(String::from)
                .unwrap_or_default(),
        ),
        _ => Value::Int(0),
    }
}

/// Write `val` at `idx` of the array in `name`, growing it as needed. A
/// missing or non-array variable becomes an array first. Negative indices
/// write nothing.
fn store_index(locals: &mut HashMap<VariableName, Value>, name: VariableName, idx: i64, val: Value) {
    let slot = locals.entry(name).or_default();
    if !matches!(slot, Value::Array(_)) {
        *slot = Value::zeroed_array(usize::try_from(idx.saturating_add(1)).unwrap_or(0));
    }
    let (Value::Array(items), Ok(i)) = (slot, usize::try_from(idx)) else {
        return;
    };
    if i >= items.len() {
        items.resize(i + 1, Value::Int(0));
    }
    items[i] = val;
}

fn binary(op: Op, a: Value, b: Value) -> Value {
    let either_double = matches!(a, Value::Double(_)) || matches!(b, Value::Double(_));
    let either_string = matches!(a, Value::Str(_)) || matches!(b, Value::Str(_));

    match op {
        Op::Add if either_string => Value::Str(a.as_string() + &b.as_string()),
        Op::Add if either_double => Value::Double(a.as_double() + b.as_double()),
        Op::Add => Value::Int(a.as_int().wrapping_add(b.as_int())),
        Op::Sub if either_double => Value::Double(a.as_double() - b.as_double()),
        Op::Sub => Value::Int(a.as_int().wrapping_sub(b.as_int())),
        Op::Mul if either_double => Value::Double(a.as_double() * b.as_double()),
        Op::Mul => Value::Int(a.as_int().wrapping_mul(b.as_int())),
        Op::Div if either_double => Value::Double(a.as_double() / b.as_double()),
        Op::Div => match b.as_int() {
            0 => Value::Int(0),
            d => Value::Int(a.as_int().wrapping_div(d)),
        },
        Op::Mod => match b.as_int() {
            0 => Value::Int(0),
            d => Value::Int(a.as_int().wrapping_rem(d)),
        },
        // equality compares the printed forms
        Op::Eq => Value::Int((a.as_string() == b.as_string()) as i64),
        Op::Neq => Value::Int((a.as_string() != b.as_string()) as i64),
        Op::Lt | Op::Gt | Op::Le | Op::Ge => {
            let ordering = if either_double {
                a.as_double().partial_cmp(&b.as_double())
            } else {
                Some(a.as_int().cmp(&b.as_int()))
            };
            let holds = ordering.is_some_and(|ord| match op {
                Op::Lt => ord.is_lt(),
                Op::Gt => ord.is_gt(),
                Op::Le => ord.is_le(),
                _ => ord.is_ge(),
            });
            Value::Int(holds as i64)
        }
        _ => Value::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Loc;

    fn run_with_input(source: &str, input: &str) -> (Result<i32, Error>, String) {
        let program = crate::compile(source).unwrap();
        let mut out = Vec::new();
        let result = Vm::new(&program)
            .with_input(input.as_bytes())
            .with_output(&mut out)
            .run();
        (result, String::from_utf8(out).unwrap())
    }

    fn output_of(source: &str) -> String {
        let (result, out) = run_with_input(source, "");
        assert_eq!(result, Ok(0));
        out
    }

    fn main_printing(expr: &str) -> String {
        output_of(&format!("fn int main() {{ {} return 0; }}", expr))
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(main_printing("printInt(2 + 3 * 4);"), "14");
        assert_eq!(main_printing("printInt(7 / 2);"), "3");
        assert_eq!(main_printing("printInt(-7 % 3);"), "-1");
        assert_eq!(main_printing("printDouble(7 / 2.0);"), "3.5");
        assert_eq!(main_printing("printDouble(1.5 * 2);"), "3");
        assert_eq!(main_printing("printInt(5 / 0);"), "0");
        assert_eq!(main_printing("printInt(5 % 0);"), "0");
        assert_eq!(main_printing("printInt(-(2 - 5));"), "3");
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(main_printing("printInt(1 < 2); printInt(2 <= 1); printInt(2.5 > 2);"), "101");
        assert_eq!(main_printing("printInt(1 == 1.0);"), "1");
        assert_eq!(main_printing("printInt(\"ab\" == \"ab\"); printInt(\"a\" != \"b\");"), "11");
        assert_eq!(main_printing("printInt(!0); printInt(!3);"), "10");
    }

    #[test]
    fn test_strings() {
        assert_eq!(main_printing("printStr(\"ab\" + \"cd\");"), "abcd");
        assert_eq!(main_printing("string s = \"hey\"; printStr(s[1]); printStr(s[9]);"), "e");
        assert_eq!(main_printing("printStr(\"a\\n\");"), "a\\n");
    }

    #[test]
    fn test_arrays_copy_by_value() {
        let out = main_printing("int a[2]; a[0] = 1; int b[2]; b = a; b[0] = 9; printInt(a[0]); printInt(b[0]);");
        assert_eq!(out, "19");
    }

    #[test]
    fn test_array_edges() {
        assert_eq!(main_printing("int a[2]; printInt(a[5]); printInt(a[0 - 1]);"), "00");
        assert_eq!(main_printing("int a[1]; a[3] = 4; printInt(a[3]); a[0 - 2] = 1; printInt(a[0]);"), "40");
        // a negative size allocates an empty array
        assert_eq!(main_printing("int a[0 - 3]; printInt(a[0]); a[1] = 5; printInt(a[1]);"), "05");
    }

    #[test]
    fn test_index_into_scalar_is_zero() {
        assert_eq!(load_index(Value::Int(4), 0), Value::Int(0));
        assert_eq!(load_index(Value::Double(1.5), 0), Value::Int(0));
        assert_eq!(load_index(Value::None, 2), Value::Int(0));

        let program = hand_built(|p| {
            let main = p.intern_label("main");
            let print = p.intern_label("printInt");
            vec![
                Op::Label(main),
                Op::PushInt(4),
                Op::PushInt(0),
                Op::LoadIndex,
                Op::Call(print),
                Op::Ret,
            ]
        });
        let mut out = Vec::new();
        Vm::new(&program).with_output(&mut out).run().unwrap();
        assert_eq!(out, b"0");
    }

    #[test]
    fn test_recursion() {
        let out = output_of(
            "fn int fact(int n) { if (n <= 1) { return 1; } return n * fact(n - 1); }
             fn int main() { printInt(fact(10)); return 0; }",
        );
        assert_eq!(out, "3628800");
    }

    #[test]
    fn test_locals_are_per_call() {
        let out = output_of(
            "fn int f(int n) { int x = n; if (n > 0) { f(n - 1); } printInt(x); return 0; }
             fn int main() { f(2); return 0; }",
        );
        assert_eq!(out, "012");
    }

    #[test]
    fn test_input() {
        let source = "fn int main() { int n = inputInt(); double d = inputDouble(); string s = inputStr(); printInt(n + 1); printDouble(d); printStr(s); return 0; }";
        let (result, out) = run_with_input(source, "41 2.25\nhello world\n");
        assert_eq!(result, Ok(0));
        assert_eq!(out, "422.25hello world");
    }

    #[test]
    fn test_input_defaults() {
        let source = "fn int main() { printInt(inputInt()); printStr(inputStr()); return 0; }";
        let (result, out) = run_with_input(source, "");
        assert_eq!(result, Ok(0));
        assert_eq!(out, "0");
    }

    #[test]
    fn test_time_up() {
        let program = crate::compile("fn int main() { printInt(timeUp()); return 0; }").unwrap();
        let mut out = Vec::new();
        let config = Config {
            time_limit: Duration::ZERO,
            ..Config::default()
        };
        Vm::new(&program)
            .with_config(config)
            .with_output(&mut out)
            .run()
            .unwrap();
        assert_eq!(out, b"1");
    }

    #[test]
    fn test_no_entry() {
        let program = crate::compile("fn int helper() { printInt(1); return 0; }").unwrap();
        let mut out = Vec::new();
        let result = Vm::new(&program).with_output(&mut out).run();
        assert_eq!(result, Ok(0));
        assert!(out.is_empty());
    }

    #[test]
    fn test_custom_entry() {
        let program = crate::compile("fn int start() { printInt(8); return 0; }").unwrap();
        let mut out = Vec::new();
        let config = Config {
            entry: "start".to_owned(),
            ..Config::default()
        };
        Vm::new(&program)
            .with_config(config)
            .with_output(&mut out)
            .run()
            .unwrap();
        assert_eq!(out, b"8");
    }

    fn hand_built(build: impl FnOnce(&mut Program) -> Vec<Op>) -> Program {
        let mut program = Program::new();
        let code = build(&mut program);
        program.code_locs = (1..=code.len() as u32)
            .map(|line| Loc { line, col: 1 })
            .collect();
        program.code = code;
        program
    }

    #[test]
    fn test_stack_underflow() {
        let program = hand_built(|p| vec![Op::Label(p.intern_label("main")), Op::Add]);
        let result = Vm::new(&program).with_output(Vec::new()).run();
        assert_eq!(
            result,
            Err(Error::Runtime {
                line: 2,
                column: 1,
                message: "stack underflow".to_owned()
            })
        );
    }

    #[test]
    fn test_unknown_label() {
        let program = hand_built(|p| {
            vec![
                Op::Label(p.intern_label("main")),
                Op::PushInt(1),
                Op::Jmp(p.intern_label("nowhere")),
            ]
        });
        let result = Vm::new(&program).with_output(Vec::new()).run();
        assert_eq!(
            result.unwrap_err().to_string(),
            "Runtime error at line 3, col 1: unknown label: nowhere"
        );
    }

    #[test]
    fn test_unknown_function() {
        let program = hand_built(|p| {
            vec![
                Op::Label(p.intern_label("main")),
                Op::Call(p.intern_label("ghost")),
            ]
        });
        let result = Vm::new(&program).with_output(Vec::new()).run();
        assert_eq!(result.unwrap_err().message(), "unknown function: ghost");
    }

    #[test]
    fn test_missing_variable_loads_zero() {
        let program = hand_built(|p| {
            let main = p.intern_label("main");
            let x = p.intern_variable_name("x");
            let print = p.intern_label("printInt");
            vec![Op::Label(main), Op::Load(x), Op::Call(print), Op::Ret]
        });
        let mut out = Vec::new();
        Vm::new(&program).with_output(&mut out).run().unwrap();
        assert_eq!(out, b"0");
    }

    #[test]
    fn test_binary_policies() {
        assert_eq!(binary(Op::Add, Value::Str("n".into()), Value::Int(1)), Value::Str("n1".into()));
        assert_eq!(binary(Op::Add, Value::Int(1), Value::Double(0.5)), Value::Double(1.5));
        assert_eq!(binary(Op::Div, Value::Int(i64::MIN), Value::Int(-1)), Value::Int(i64::MIN));
        assert_eq!(binary(Op::Mod, Value::Double(7.5), Value::Int(2)), Value::Int(1));
        assert_eq!(binary(Op::Lt, Value::Double(f64::NAN), Value::Int(1)), Value::Int(0));
    }
}
