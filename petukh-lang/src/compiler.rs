use std::collections::{HashMap, HashSet};

use crate::ast::{Node, NodeKind, SourceInfo};
use crate::builtins::Builtin;
use crate::bytecode as bc;
use crate::semantic::{is_double_literal, TypeKind};

/// Jump targets for `break` and `continue` inside the innermost loop.
struct LoopLabels {
    break_to: bc::LabelName,
    continue_to: bc::LabelName,
}

struct Compiler {
    program: bc::Program,
    next_label: usize,
    /// Function names; generated labels must not collide with them.
    functions: HashSet<String>,
    /// Functions whose calls leave a value on the stack.
    value_functions: HashSet<String>,
    loops: Vec<LoopLabels>,
    /// Source name to storage slot, innermost block last. A declaration
    /// that shadows a visible name gets a fresh slot so the outer value
    /// survives the inner block.
    scopes: Vec<HashMap<String, bc::VariableName>>,
    next_slot: usize,
    /// Slots of the current function declared `double`.
    doubles: HashSet<bc::VariableName>,
    return_type: TypeKind,
}

fn loc(src: &SourceInfo) -> bc::Loc {
    bc::Loc {
        line: src.line,
        col: src.col,
    }
}

fn type_of(node: Option<&Node>) -> TypeKind {
    node.map_or(TypeKind::Unknown, TypeKind::from_type_node)
}

impl Compiler {
    pub(crate) fn new() -> Self {
        Self {
            program: bc::Program::new(),
            next_label: 0,
            functions: HashSet::new(),
            value_functions: HashSet::new(),
            loops: Vec::new(),
            scopes: vec![HashMap::new()],
            next_slot: 0,
            doubles: HashSet::new(),
            return_type: TypeKind::Void,
        }
    }

    fn push_op(&mut self, src: SourceInfo, op: bc::Op) {
        self.program.code_locs.push(loc(&src));
        self.program.code.push(op);
    }

    fn fresh_label(&mut self) -> bc::LabelName {
        loop {
            let name = format!("L{}", self.next_label);
            self.next_label += 1;
            if !self.functions.contains(&name) {
                return self.program.intern_label(&name);
            }
        }
    }

    fn enter_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn exit_scope(&mut self) {
        self.scopes.pop();
    }

    fn lookup(&self, name: &str) -> Option<bc::VariableName> {
        self.scopes.iter().rev().find_map(|s| s.get(name).copied())
    }

    fn declare(&mut self, name: &str) -> bc::VariableName {
        let slot = if self.lookup(name).is_some() {
            self.next_slot += 1;
            self.program
                .intern_variable_name(&format!("{}#{}", name, self.next_slot))
        } else {
            self.program.intern_variable_name(name)
        };
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_owned(), slot);
        }
        slot
    }

    /// A slot no source name can refer to.
    fn hidden_slot(&mut self) -> bc::VariableName {
        self.next_slot += 1;
        self.program
            .intern_variable_name(&format!("#t{}", self.next_slot))
    }

    fn resolve(&mut self, name: &str) -> bc::VariableName {
        match self.lookup(name) {
            Some(slot) => slot,
            None => self.program.intern_variable_name(name),
        }
    }

    fn returns_value(&self, name: &str) -> bool {
        match Builtin::from_name(name) {
            Some(builtin) => builtin.returns() != TypeKind::Void,
            None => self.value_functions.contains(name),
        }
    }

    // Walk the AST and lower it to a flat instruction stream
    pub(crate) fn generate(mut self, root: &Node) -> bc::Program {
        for function in root.children.iter().filter(|c| c.is(NodeKind::Function)) {
            self.functions.insert(function.text.clone());
            if type_of(function.children.first()) != TypeKind::Void {
                self.value_functions.insert(function.text.clone());
            }
        }

        for child in &root.children {
            if child.is(NodeKind::Function) {
                self.function(child);
            } else {
                self.statement(child);
            }
        }
        log::debug!("generated {} instructions", self.program.code.len());
        self.program
    }

    fn function(&mut self, node: &Node) {
        let name = self.program.intern_label(&node.text);
        self.push_op(node.src, bc::Op::Label(name));
        self.scopes = vec![HashMap::new()];
        self.doubles.clear();
        self.return_type = type_of(node.children.first());

        let params: Vec<(SourceInfo, bc::VariableName)> = node
            .children
            .iter()
            .filter(|c| c.is(NodeKind::FuncArg))
            .map(|arg| {
                let slot = self.declare(&arg.text);
                if type_of(arg.children.first()) == TypeKind::Double {
                    self.doubles.insert(slot);
                }
                (arg.src, slot)
            })
            .collect();
        // the last argument is on top of the stack
        for (src, slot) in params.into_iter().rev() {
            self.push_op(src, bc::Op::Store(slot));
        }

        if let Some(body) = node.children.last().filter(|c| c.is(NodeKind::Block)) {
            self.statement(body);
        }

        if self.program.code.last() != Some(&bc::Op::Ret) {
            if self.return_type != TypeKind::Void {
                self.zero_value(node.src, self.return_type);
            }
            self.push_op(node.src, bc::Op::Ret);
        }
        self.scopes = vec![HashMap::new()];
        self.doubles.clear();
        self.return_type = TypeKind::Void;
    }

    fn zero_value(&mut self, src: SourceInfo, ty: TypeKind) {
        let op = match ty {
            TypeKind::Double => bc::Op::PushDouble(0.0),
            TypeKind::String => bc::Op::PushString(self.program.intern_string("")),
            _ => bc::Op::PushInt(0),
        };
        self.push_op(src, op);
    }

    fn statement(&mut self, node: &Node) {
        match node.kind {
            NodeKind::Block => {
                self.enter_scope();
                for statement in &node.children {
                    self.statement(statement);
                }
                self.exit_scope();
            }
            NodeKind::VarDeclList => self.var_decls(node),
            NodeKind::ExprStmt => {
                if let Some(expr) = node.children.first() {
                    self.effect(expr);
                }
            }
            NodeKind::Return => {
                if let Some(value) = node.children.first() {
                    let widen = self.return_type == TypeKind::Double;
                    self.widened(value, widen);
                }
                self.push_op(node.src, bc::Op::Ret);
            }
            NodeKind::Break => {
                if let Some(target) = self.loops.last().map(|l| l.break_to) {
                    self.push_op(node.src, bc::Op::Jmp(target));
                }
            }
            NodeKind::Continue => {
                if let Some(target) = self.loops.last().map(|l| l.continue_to) {
                    self.push_op(node.src, bc::Op::Jmp(target));
                }
            }
            NodeKind::If => self.if_statement(node),
            NodeKind::While => self.while_statement(node),
            NodeKind::DoWhile => self.do_while_statement(node),
            NodeKind::For => self.for_statement(node),
            NodeKind::Function
            | NodeKind::FuncArg
            | NodeKind::ElseIf
            | NodeKind::VarDecl
            | NodeKind::TypeNode
            | NodeKind::Program
            | NodeKind::Empty => {}
            _ => self.effect(node),
        }
    }

    fn var_decls(&mut self, node: &Node) {
        let ty = type_of(node.children.first());
        for var in node.children.iter().skip(1) {
            if var.is_array {
                match var.children.first() {
                    Some(size) => self.expression(size),
                    None => self.push_op(var.src, bc::Op::PushInt(0)),
                }
                self.push_op(var.src, bc::Op::NewArray);
            } else {
                match var.children.first() {
                    Some(init) => self.widened(init, ty == TypeKind::Double),
                    None => self.zero_value(var.src, ty),
                }
            }
            // the initializer still sees any outer variable of the same name
            let slot = self.declare(&var.text);
            if ty == TypeKind::Double {
                self.doubles.insert(slot);
            }
            self.push_op(var.src, bc::Op::Store(slot));
        }
    }

    fn loop_body(&mut self, body: &Node, break_to: bc::LabelName, continue_to: bc::LabelName) {
        self.loops.push(LoopLabels {
            break_to,
            continue_to,
        });
        self.statement(body);
        self.loops.pop();
    }

    fn conditional_branch(&mut self, condition: &Node, body: Option<&Node>, end: bc::LabelName) {
        let next = self.fresh_label();
        self.expression(condition);
        self.push_op(condition.src, bc::Op::Jz(next));
        if let Some(body) = body {
            self.statement(body);
        }
        self.push_op(condition.src, bc::Op::Jmp(end));
        self.push_op(condition.src, bc::Op::Label(next));
    }

    fn if_statement(&mut self, node: &Node) {
        let end = self.fresh_label();
        let mut children = node.children.iter();
        if let Some(condition) = children.next() {
            let then = children.next();
            self.conditional_branch(condition, then, end);
        }
        for branch in children {
            if branch.is(NodeKind::ElseIf) {
                if let Some(condition) = branch.children.first() {
                    self.conditional_branch(condition, branch.children.get(1), end);
                }
            } else {
                self.statement(branch);
            }
        }
        self.push_op(node.src, bc::Op::Label(end));
    }

    fn while_statement(&mut self, node: &Node) {
        let start = self.fresh_label();
        let end = self.fresh_label();
        self.push_op(node.src, bc::Op::Label(start));
        if let Some(condition) = node.children.first() {
            self.expression(condition);
            self.push_op(condition.src, bc::Op::Jz(end));
        }
        if let Some(body) = node.children.get(1) {
            self.loop_body(body, end, start);
        }
        self.push_op(node.src, bc::Op::Jmp(start));
        self.push_op(node.src, bc::Op::Label(end));
    }

    fn do_while_statement(&mut self, node: &Node) {
        let start = self.fresh_label();
        let test = self.fresh_label();
        let end = self.fresh_label();
        self.push_op(node.src, bc::Op::Label(start));
        if let Some(body) = node.children.first() {
            self.loop_body(body, end, test);
        }
        self.push_op(node.src, bc::Op::Label(test));
        if let Some(condition) = node.children.get(1) {
            self.expression(condition);
            self.push_op(condition.src, bc::Op::Jz(end));
        }
        self.push_op(node.src, bc::Op::Jmp(start));
        self.push_op(node.src, bc::Op::Label(end));
    }

    fn for_statement(&mut self, node: &Node) {
        self.enter_scope();
        if let Some(init) = node.child(0) {
            self.statement(init);
        }

        let start = self.fresh_label();
        let step = self.fresh_label();
        let end = self.fresh_label();
        self.push_op(node.src, bc::Op::Label(start));
        if let Some(condition) = node.child(1) {
            self.expression(condition);
            self.push_op(condition.src, bc::Op::Jz(end));
        }
        if let Some(body) = node.child(3) {
            self.loop_body(body, end, step);
        }
        self.push_op(node.src, bc::Op::Label(step));
        if let Some(step) = node.child(2) {
            self.effect(step);
        }
        self.push_op(node.src, bc::Op::Jmp(start));
        self.push_op(node.src, bc::Op::Label(end));
        self.exit_scope();
    }

    /// Evaluate `node` for its side effects only, leaving the stack as it
    /// was.
    fn effect(&mut self, node: &Node) {
        match node.kind {
            NodeKind::Assign => self.assign(node, false),
            NodeKind::CommaExpr => {
                for child in &node.children {
                    self.effect(child);
                }
            }
            NodeKind::Call => {
                self.expression(node);
                let callee = node.children.first().map(|c| c.text.as_str());
                if callee.is_some_and(|name| self.returns_value(name)) {
                    self.push_op(node.src, bc::Op::Pop);
                }
            }
            NodeKind::Empty => {}
            _ => {
                self.expression(node);
                self.push_op(node.src, bc::Op::Pop);
            }
        }
    }

    /// Store the value of an assignment. With `keep` the stored value is
    /// also left on the stack.
    fn assign(&mut self, node: &Node, keep: bool) {
        let (Some(target), Some(value)) = (node.children.first(), node.children.get(1)) else {
            if keep {
                self.push_op(node.src, bc::Op::PushInt(0));
            }
            return;
        };
        match target.kind {
            NodeKind::Identifier => {
                let slot = self.resolve(&target.text);
                let widen = self.doubles.contains(&slot);
                self.widened(value, widen);
                self.push_op(node.src, bc::Op::Store(slot));
                if keep {
                    self.push_op(node.src, bc::Op::Load(slot));
                }
            }
            NodeKind::Index => {
                let (Some(base), Some(index)) = (target.children.first(), target.children.get(1))
                else {
                    return;
                };
                let slot = self.resolve(&base.text);
                let widen = self.doubles.contains(&slot);
                self.widened(value, widen);
                // park the value so the index runs once
                let held = keep.then(|| self.hidden_slot());
                if let Some(held) = held {
                    self.push_op(node.src, bc::Op::Store(held));
                    self.push_op(node.src, bc::Op::Load(held));
                }
                self.expression(index);
                self.push_op(node.src, bc::Op::StoreIndex(slot));
                if let Some(held) = held {
                    self.push_op(node.src, bc::Op::Load(held));
                }
            }
            _ if keep => self.expression(value),
            _ => self.effect(value),
        }
    }

    /// Like `expression`, but int literals bound for a double slot are
    /// pushed as doubles.
    fn widened(&mut self, node: &Node, widen: bool) {
        match node.kind {
            NodeKind::Number if widen && !is_double_literal(&node.text) => {
                let value = node.text.parse().unwrap_or(0.0);
                self.push_op(node.src, bc::Op::PushDouble(value));
            }
            NodeKind::Unary if widen && node.text == "-" => {
                if let Some(operand) = node.children.first() {
                    self.widened(operand, widen);
                }
                self.push_op(node.src, bc::Op::Neg);
            }
            _ => self.expression(node),
        }
    }

    /// Evaluate `node` leaving exactly one value on the stack.
    fn expression(&mut self, node: &Node) {
        match node.kind {
            NodeKind::Number => {
                let op = if is_double_literal(&node.text) {
                    bc::Op::PushDouble(node.text.parse().unwrap_or(0.0))
                } else {
                    bc::Op::PushInt(node.text.parse().unwrap_or(0))
                };
                self.push_op(node.src, op);
            }
            NodeKind::String => {
                let s = self.program.intern_string(&node.text);
                self.push_op(node.src, bc::Op::PushString(s));
            }
            NodeKind::Identifier => {
                let slot = self.resolve(&node.text);
                self.push_op(node.src, bc::Op::Load(slot));
            }
            NodeKind::Unary => {
                if let Some(operand) = node.children.first() {
                    self.expression(operand);
                }
                match node.text.as_str() {
                    "-" => self.push_op(node.src, bc::Op::Neg),
                    "!" => self.push_op(node.src, bc::Op::Not),
                    _ => {}
                }
            }
            NodeKind::Binary => {
                for operand in &node.children {
                    self.expression(operand);
                }
                let op = match node.text.as_str() {
                    "+" => bc::Op::Add,
                    "-" => bc::Op::Sub,
                    "*" => bc::Op::Mul,
                    "/" => bc::Op::Div,
                    "%" => bc::Op::Mod,
                    "==" => bc::Op::Eq,
                    "!=" => bc::Op::Neq,
                    "<" => bc::Op::Lt,
                    ">" => bc::Op::Gt,
                    "<=" => bc::Op::Le,
                    _ => bc::Op::Ge,
                };
                self.push_op(node.src, op);
            }
            NodeKind::CommaExpr => {
                if let Some((last, rest)) = node.children.split_last() {
                    for child in rest {
                        self.effect(child);
                    }
                    self.expression(last);
                }
            }
            NodeKind::Assign => self.assign(node, true),
            NodeKind::Call => {
                let Some((callee, args)) = node.children.split_first() else {
                    return;
                };
                for arg in args {
                    self.expression(arg);
                }
                let label = self.program.intern_label(&callee.text);
                self.push_op(node.src, bc::Op::Call(label));
            }
            NodeKind::Index => {
                for child in &node.children {
                    self.expression(child);
                }
                self.push_op(node.src, bc::Op::LoadIndex);
            }
            _ => self.push_op(node.src, bc::Op::PushInt(0)),
        }
    }
}

/// Lower an analyzed syntax tree to bytecode. The tree must be free of
/// syntax and semantic errors.
pub fn generate(root: &Node) -> bc::Program {
    Compiler::new().generate(root)
}
