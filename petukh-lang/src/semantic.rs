use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::ast::{Node, NodeKind, SourceInfo};
use crate::builtins::Builtin;
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TypeKind {
    Int,
    Char,
    Double,
    String,
    Void,
    /// Result of an expression that already produced an error. Checks
    /// involving it are skipped so one mistake is reported once.
    Unknown,
}

impl TypeKind {
    pub fn from_type_node(node: &Node) -> Self {
        if !node.is(NodeKind::TypeNode) {
            return TypeKind::Unknown;
        }
        match node.text.as_str() {
            "int" => TypeKind::Int,
            "char" => TypeKind::Char,
            "double" => TypeKind::Double,
            "string" => TypeKind::String,
            "void" => TypeKind::Void,
            _ => TypeKind::Unknown,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, TypeKind::Int | TypeKind::Double)
    }

    /// Whether a value of type `value` may be stored where `self` is
    /// expected: exact match, or int widened to double.
    pub fn accepts(self, value: TypeKind) -> bool {
        self == value || (self == TypeKind::Double && value == TypeKind::Int)
    }
}

impl Display for TypeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TypeKind::Int => "int",
            TypeKind::Char => "char",
            TypeKind::Double => "double",
            TypeKind::String => "string",
            TypeKind::Void => "void",
            TypeKind::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

pub fn is_double_literal(text: &str) -> bool {
    text.contains(['.', 'e', 'E'])
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub ty: TypeKind,
    pub is_array: bool,
    pub is_function: bool,
    pub param_types: Vec<TypeKind>,
    pub param_is_array: Vec<bool>,
}

impl Symbol {
    pub fn variable(name: &str, ty: TypeKind, is_array: bool) -> Self {
        Self {
            name: name.to_owned(),
            ty,
            is_array,
            is_function: false,
            param_types: Vec::new(),
            param_is_array: Vec::new(),
        }
    }

    pub fn function(name: &str, returns: TypeKind, params: Vec<(TypeKind, bool)>) -> Self {
        let (param_types, param_is_array) = params.into_iter().unzip();
        Self {
            name: name.to_owned(),
            ty: returns,
            is_array: false,
            is_function: true,
            param_types,
            param_is_array,
        }
    }

    fn from_function_node(node: &Node) -> Self {
        let returns = node
            .children
            .first()
            .map_or(TypeKind::Unknown, TypeKind::from_type_node);
        let params = node
            .children
            .iter()
            .filter(|c| c.is(NodeKind::FuncArg))
            .map(|arg| (arg_type(arg), arg.is_array))
            .collect();
        Self::function(&node.text, returns, params)
    }
}

fn arg_type(arg: &Node) -> TypeKind {
    arg.children
        .first()
        .map_or(TypeKind::Unknown, TypeKind::from_type_node)
}

/// Stack of lexical scopes, innermost last. Index 0 is the global scope.
#[derive(Debug, Default)]
struct Scopes {
    frames: Vec<HashMap<String, Symbol>>,
}

impl Scopes {
    fn enter(&mut self) {
        self.frames.push(HashMap::new());
    }

    fn exit(&mut self) {
        self.frames.pop();
    }

    /// False if the name already exists in the innermost scope.
    fn declare(&mut self, symbol: Symbol) -> bool {
        let Some(frame) = self.frames.last_mut() else {
            return false;
        };
        if frame.contains_key(&symbol.name) {
            return false;
        }
        frame.insert(symbol.name.clone(), symbol);
        true
    }

    fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }
}

#[derive(Debug)]
pub struct SemanticAnalyzer {
    scopes: Scopes,
    errors: Vec<Error>,
    /// Undeclared names already reported in the current function.
    undeclared: HashSet<String>,
    in_function: bool,
    loop_depth: usize,
    return_type: TypeKind,
}

impl Default for SemanticAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SemanticAnalyzer {
    pub fn new() -> Self {
        Self {
            scopes: Scopes::default(),
            errors: Vec::new(),
            undeclared: HashSet::new(),
            in_function: false,
            loop_depth: 0,
            return_type: TypeKind::Void,
        }
    }

    /// Check a whole program. Every independent error is reported; an empty
    /// result means the program is well typed. The tree is not modified.
    pub fn analyze(&mut self, root: &Node) -> Vec<Error> {
        *self = Self::new();
        self.scopes.enter();

        for builtin in Builtin::ALL {
            let params = builtin.params().iter().map(|&t| (t, false)).collect();
            self.scopes
                .declare(Symbol::function(builtin.name(), builtin.returns(), params));
        }

        // Functions are visible before any body is checked.
        for function in root.children.iter().filter(|c| c.is(NodeKind::Function)) {
            if !self.scopes.declare(Symbol::from_function_node(function)) {
                self.error(function.src, format!("Duplicate function: {}", function.text));
            }
        }

        for child in &root.children {
            if child.is(NodeKind::Function) {
                self.check_function(child);
            } else {
                self.check_statement(child);
            }
        }

        self.scopes.exit();
        log::debug!("semantic analysis found {} errors", self.errors.len());
        std::mem::take(&mut self.errors)
    }

    fn error(&mut self, src: SourceInfo, message: impl Into<String>) {
        self.errors.push(Error::Semantic {
            line: src.line,
            column: src.col,
            message: message.into(),
        });
    }

    fn declare_variable(&mut self, node: &Node, ty: TypeKind) {
        if !self.scopes.declare(Symbol::variable(&node.text, ty, node.is_array)) {
            self.error(node.src, format!("Duplicate variable: {}", node.text));
        }
    }

    fn check_function(&mut self, node: &Node) {
        self.in_function = true;
        self.undeclared.clear();
        self.return_type = node
            .children
            .first()
            .map_or(TypeKind::Unknown, TypeKind::from_type_node);
        self.scopes.enter();

        for arg in node.children.iter().filter(|c| c.is(NodeKind::FuncArg)) {
            self.declare_variable(arg, arg_type(arg));
        }
        if let Some(body) = node.children.last().filter(|c| c.is(NodeKind::Block)) {
            self.check_statement(body);
        }

        self.scopes.exit();
        self.return_type = TypeKind::Void;
        self.in_function = false;
    }

    fn check_var_decls(&mut self, node: &Node) {
        let declared = node
            .children
            .first()
            .map_or(TypeKind::Unknown, TypeKind::from_type_node);

        for var in node.children.iter().skip(1) {
            if let Some(expr) = var.children.first() {
                let ty = self.check_expression(expr);
                if var.is_array {
                    if ty != TypeKind::Int && ty != TypeKind::Unknown {
                        self.error(expr.src, format!("Array size must be int, got {}", ty));
                    }
                } else if declared != TypeKind::Unknown
                    && ty != TypeKind::Unknown
                    && !declared.accepts(ty)
                {
                    self.error(
                        expr.src,
                        format!(
                            "Initializer type mismatch for '{}': expected {}, got {}",
                            var.text, declared, ty
                        ),
                    );
                }
            }
            self.declare_variable(var, declared);
        }
    }

    fn check_condition(&mut self, node: &Node, construct: &str) {
        let ty = self.check_expression(node);
        if ty != TypeKind::Int && ty != TypeKind::Unknown {
            self.error(node.src, format!("{} condition must be int, got {}", construct, ty));
        }
    }

    fn check_loop_body(&mut self, body: &Node) {
        self.loop_depth += 1;
        self.check_statement(body);
        self.loop_depth -= 1;
    }

    fn check_statement(&mut self, node: &Node) {
        match node.kind {
            NodeKind::ExprStmt => {
                if let Some(expr) = node.children.first() {
                    self.check_expression(expr);
                }
            }
            NodeKind::Block => {
                self.scopes.enter();
                for statement in &node.children {
                    self.check_statement(statement);
                }
                self.scopes.exit();
            }
            NodeKind::VarDeclList => self.check_var_decls(node),
            NodeKind::Return => self.check_return(node),
            NodeKind::Break | NodeKind::Continue => {
                if self.loop_depth == 0 {
                    let keyword = if node.is(NodeKind::Break) { "break" } else { "continue" };
                    self.error(node.src, format!("'{}' outside of a loop", keyword));
                }
            }
            NodeKind::If => {
                let mut children = node.children.iter();
                if let Some(condition) = children.next() {
                    self.check_condition(condition, "If");
                }
                for branch in children {
                    if branch.is(NodeKind::ElseIf) {
                        if let Some(condition) = branch.children.first() {
                            self.check_condition(condition, "Else-if");
                        }
                        for body in branch.children.iter().skip(1) {
                            self.check_statement(body);
                        }
                    } else {
                        self.check_statement(branch);
                    }
                }
            }
            NodeKind::While => {
                if let Some(condition) = node.children.first() {
                    self.check_condition(condition, "While");
                }
                for body in node.children.iter().skip(1) {
                    self.check_loop_body(body);
                }
            }
            NodeKind::DoWhile => {
                if let Some(body) = node.children.first() {
                    self.check_loop_body(body);
                }
                if let Some(condition) = node.children.get(1) {
                    self.check_condition(condition, "Do-while");
                }
            }
            NodeKind::For => {
                // the init declaration lives in its own scope
                self.scopes.enter();
                if let Some(init) = node.child(0) {
                    self.check_statement(init);
                }
                if let Some(condition) = node.child(1) {
                    self.check_condition(condition, "For");
                }
                if let Some(step) = node.child(2) {
                    self.check_expression(step);
                }
                if let Some(body) = node.child(3) {
                    self.check_loop_body(body);
                }
                self.scopes.exit();
            }
            NodeKind::Function
            | NodeKind::FuncArg
            | NodeKind::ElseIf
            | NodeKind::VarDecl
            | NodeKind::TypeNode
            | NodeKind::Program
            | NodeKind::Empty => {}
            _ => {
                self.check_expression(node);
            }
        }
    }

    fn check_return(&mut self, node: &Node) {
        if !self.in_function {
            self.error(node.src, "return outside of function");
            return;
        }
        match node.children.first() {
            Some(value) => {
                let ty = self.check_expression(value);
                if self.return_type == TypeKind::Void {
                    self.error(value.src, "Unexpected return value in void function");
                } else if ty != TypeKind::Unknown
                    && self.return_type != TypeKind::Unknown
                    && !self.return_type.accepts(ty)
                {
                    let message = format!(
                        "Return type mismatch: expected {}, got {}",
                        self.return_type, ty
                    );
                    self.error(value.src, message);
                }
            }
            None => {
                if self.return_type != TypeKind::Void {
                    self.error(node.src, "Missing return value");
                }
            }
        }
    }

    fn check_expression(&mut self, node: &Node) -> TypeKind {
        match node.kind {
            NodeKind::Number => {
                if is_double_literal(&node.text) {
                    TypeKind::Double
                } else {
                    TypeKind::Int
                }
            }
            NodeKind::String => TypeKind::String,
            NodeKind::Identifier => self.check_identifier(node),
            NodeKind::Unary => self.check_unary(node),
            NodeKind::CommaExpr => {
                let mut ty = TypeKind::Unknown;
                for child in &node.children {
                    ty = self.check_expression(child);
                }
                ty
            }
            NodeKind::Assign => self.check_assign(node),
            NodeKind::Binary => self.check_binary(node),
            NodeKind::Index => self.check_index(node),
            NodeKind::Call => self.check_call(node),
            _ => TypeKind::Unknown,
        }
    }

    fn check_identifier(&mut self, node: &Node) -> TypeKind {
        match self.scopes.lookup(&node.text).cloned() {
            None => {
                if self.undeclared.insert(node.text.clone()) {
                    self.error(node.src, format!("Undeclared variable: {}", node.text));
                }
                TypeKind::Unknown
            }
            Some(symbol) if symbol.is_function => {
                self.error(node.src, format!("Function used as value: {}", node.text));
                TypeKind::Unknown
            }
            Some(symbol) => symbol.ty,
        }
    }

    fn check_unary(&mut self, node: &Node) -> TypeKind {
        let Some(operand) = node.children.first() else {
            return TypeKind::Unknown;
        };
        let ty = self.check_expression(operand);
        if ty == TypeKind::Unknown {
            return ty;
        }
        if !ty.is_numeric() {
            self.error(
                node.src,
                format!("Invalid operand to unary '{}': {}", node.text, ty),
            );
            return TypeKind::Unknown;
        }
        if node.text == "!" {
            TypeKind::Int
        } else {
            ty
        }
    }

    fn check_assign(&mut self, node: &Node) -> TypeKind {
        let (Some(target), Some(value)) = (node.children.first(), node.children.get(1)) else {
            return TypeKind::Unknown;
        };
        // indexed stores write through a named variable
        let assignable = target.is(NodeKind::Identifier)
            || (target.is(NodeKind::Index)
                && target.children.first().is_some_and(|b| b.is(NodeKind::Identifier)));
        if !assignable {
            self.error(target.src, "Invalid assignment target");
            self.check_expression(value);
            return TypeKind::Unknown;
        }
        let target_ty = self.check_expression(target);
        let value_ty = self.check_expression(value);
        if let Some(base) = target.children.first().filter(|_| target.is(NodeKind::Index)) {
            // strings can be indexed for reading only
            let is_string = self
                .scopes
                .lookup(&base.text)
                .is_some_and(|s| !s.is_function && !s.is_array && s.ty == TypeKind::String);
            if is_string {
                self.error(
                    base.src,
                    format!("Cannot assign to a character of string: {}", base.text),
                );
                return TypeKind::Unknown;
            }
        }
        if target_ty != TypeKind::Unknown
            && value_ty != TypeKind::Unknown
            && !target_ty.accepts(value_ty)
        {
            self.error(
                node.src,
                format!(
                    "Assignment type mismatch: cannot assign {} to {}",
                    value_ty, target_ty
                ),
            );
        }
        target_ty
    }

    fn check_binary(&mut self, node: &Node) -> TypeKind {
        let (Some(lhs), Some(rhs)) = (node.children.first(), node.children.get(1)) else {
            return TypeKind::Unknown;
        };
        let l = self.check_expression(lhs);
        let r = self.check_expression(rhs);
        if l == TypeKind::Unknown || r == TypeKind::Unknown {
            return TypeKind::Unknown;
        }

        let op = node.text.as_str();
        match op {
            "<" | "<=" | ">" | ">=" | "==" | "!=" => {
                let strings = l == TypeKind::String && r == TypeKind::String;
                if (l.is_numeric() && r.is_numeric()) || (strings && (op == "==" || op == "!=")) {
                    return TypeKind::Int;
                }
                self.error(
                    node.src,
                    format!("Invalid operands to comparison '{}': {} and {}", op, l, r),
                );
                TypeKind::Unknown
            }
            "+" if l == TypeKind::String && r == TypeKind::String => TypeKind::String,
            _ if l.is_numeric() && r.is_numeric() => {
                if l == TypeKind::Double || r == TypeKind::Double {
                    TypeKind::Double
                } else {
                    TypeKind::Int
                }
            }
            _ => {
                self.error(
                    node.src,
                    format!("Invalid operands to binary '{}': {} and {}", op, l, r),
                );
                TypeKind::Unknown
            }
        }
    }

    fn check_index(&mut self, node: &Node) -> TypeKind {
        let (Some(base), Some(index)) = (node.children.first(), node.children.get(1)) else {
            return TypeKind::Unknown;
        };
        let base_ty = self.check_expression(base);
        let index_ty = self.check_expression(index);
        if index_ty != TypeKind::Int && index_ty != TypeKind::Unknown {
            self.error(index.src, format!("Array index must be int, got {}", index_ty));
        }
        if base.is(NodeKind::Identifier) {
            let plain_scalar = self
                .scopes
                .lookup(&base.text)
                .is_some_and(|s| !s.is_function && !s.is_array && s.ty != TypeKind::String);
            if plain_scalar {
                self.error(base.src, format!("Indexing non-array variable: {}", base.text));
            }
        }
        base_ty
    }

    fn check_call(&mut self, node: &Node) -> TypeKind {
        let Some(callee) = node.children.first() else {
            return TypeKind::Unknown;
        };
        let args = &node.children[1..];

        let symbol = if callee.is(NodeKind::Identifier) {
            match self.scopes.lookup(&callee.text).cloned() {
                Some(symbol) if symbol.is_function => Some(symbol),
                Some(_) => {
                    self.error(callee.src, format!("Call of non-function: {}", callee.text));
                    None
                }
                None => {
                    self.error(
                        callee.src,
                        format!("Call to undeclared function: {}", callee.text),
                    );
                    None
                }
            }
        } else {
            self.error(callee.src, "Call target must be a function name");
            None
        };

        let Some(symbol) = symbol else {
            for arg in args {
                self.check_expression(arg);
            }
            return TypeKind::Unknown;
        };

        if args.len() != symbol.param_types.len() {
            self.error(
                node.src,
                format!(
                    "wrong number of arguments in call to {} (expected {}, got {})",
                    symbol.name,
                    symbol.param_types.len(),
                    args.len()
                ),
            );
        }

        for (i, arg) in args.iter().enumerate() {
            let ty = self.check_expression(arg);
            let Some(&param) = symbol.param_types.get(i) else {
                continue;
            };
            if ty != TypeKind::Unknown && param != TypeKind::Unknown && !param.accepts(ty) {
                self.error(
                    arg.src,
                    format!(
                        "argument {} type mismatch in call to {}: expected {}, got {}",
                        i + 1,
                        symbol.name,
                        param,
                        ty
                    ),
                );
            }
            self.check_array_argument(arg, &symbol, i);
        }

        symbol.ty
    }

    fn check_array_argument(&mut self, arg: &Node, function: &Symbol, i: usize) {
        if !arg.is(NodeKind::Identifier) {
            return;
        }
        let Some(arg_is_array) = self
            .scopes
            .lookup(&arg.text)
            .filter(|s| !s.is_function)
            .map(|s| s.is_array)
        else {
            return;
        };
        let wants_array = function.param_is_array.get(i).copied().unwrap_or(false);
        if arg_is_array != wants_array {
            let expected = if wants_array { "an array" } else { "a scalar" };
            self.error(
                arg.src,
                format!(
                    "argument {} in call to {} must be {}",
                    i + 1,
                    function.name,
                    expected
                ),
            );
        }
    }
}

pub fn analyze(root: &Node) -> Vec<Error> {
    SemanticAnalyzer::new().analyze(root)
}
