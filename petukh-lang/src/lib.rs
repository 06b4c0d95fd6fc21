pub mod ast;
mod builtins;
pub mod bytecode;
pub mod compiler;
mod error;
pub mod lexer;
pub mod parser;
pub mod semantic;
pub mod vm;

pub use builtins::Builtin;
pub use bytecode::Program;
pub use error::Error;
pub use vm::{Config, Vm};

/// Run every front-end stage over `source`. Stops before code generation
/// when any stage reports errors, returning all errors of that stage.
pub fn compile(source: &str) -> Result<Program, Vec<Error>> {
    let tokens = lexer::tokenize(source);
    log::trace!("lexed {} tokens", tokens.len());

    let (ast, errors) = parser::parse_program(&tokens);
    if !errors.is_empty() {
        return Err(errors);
    }
    log::trace!("parsed {} nodes", ast.count());

    let errors = semantic::analyze(&ast);
    if !errors.is_empty() {
        return Err(errors);
    }

    let program = compiler::generate(&ast);
    log::trace!("generated {} instructions", program.len());
    Ok(program)
}

/// Compile `source` and run it against the process's standard streams.
pub fn run(source: &str) -> Result<i32, Vec<Error>> {
    let program = compile(source)?;
    let mut vm = Vm::new(&program);
    vm.run().map_err(|e| vec![e])
}
