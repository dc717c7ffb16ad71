use std::collections::{HashMap, HashSet};

use crate::ast::{LiteralKind, Node, NodeKind, Param, Program};
use crate::bytecode::compile_error::CompileError;
use crate::bytecode::image::Image;
use crate::bytecode::op::Opcode;

/// Storage class of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Variable,
    Parameter,
    Function,
}

/// One entry in the (single, flat) symbol table.
///
/// `offset` is overloaded by kind: a data-segment slot for variables, a
/// signed BP-relative offset for parameters, and a code address for
/// functions. All declarations share one namespace keyed by name; a later
/// declaration of the same name overwrites the earlier one.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub offset: i32,
    pub is_array: bool,
    pub is_heap_allocated: bool,
    pub is_float: bool,
    pub param_count: usize,
}

#[derive(Debug, Default)]
struct Label {
    address: Option<u32>,
    fixups: Vec<usize>,
}

/// Single-pass bytecode generator.
///
/// Walks the AST once, emitting position-dependent code with placeholder
/// label operands, and patches every recorded fixup site once emission is
/// complete. Floats are tracked statically: a value whose declared type or
/// expression shape is float lives on the FPU stack, everything else on the
/// integer stack, and mixed arithmetic widens the integer side with
/// `INT_TO_FP`.
pub struct Compiler {
    code: Vec<u8>,
    symbols: HashMap<String, Symbol>,
    labels: HashMap<String, Label>,
    strings: Vec<String>,
    class_names: HashSet<String>,
    next_memory_addr: i32,
    label_counter: u32,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Compiler {
            code: Vec::new(),
            symbols: HashMap::new(),
            labels: HashMap::new(),
            strings: Vec::new(),
            class_names: HashSet::new(),
            next_memory_addr: 0,
            label_counter: 0,
        }
    }

    /// Compiles a program into a container image. Fails only when a label
    /// referenced by the emitted code is never defined.
    pub fn compile(mut self, program: &Program) -> Result<Image, CompileError> {
        self.gen_program(program);
        self.fixup_labels()?;
        Ok(Image {
            strings: self.strings,
            code: self.code,
        })
    }

    // ------------------------------------------------------------------
    // Program structure
    // ------------------------------------------------------------------

    fn gen_program(&mut self, program: &Program) {
        // Entry point: call main, then halt.
        self.emit_jump(Opcode::Call, "main");
        self.emit(Opcode::Halt);

        // Collect class/struct names for constructor-call detection.
        for node in &program.top {
            match &node.kind {
                NodeKind::ClassDecl { name, .. } | NodeKind::StructDecl { name, .. } => {
                    self.class_names.insert(name.clone());
                }
                _ => {}
            }
        }

        for node in &program.top {
            if let NodeKind::ClassDecl { name, members, .. } = &node.kind {
                // Member functions are emitted under qualified labels.
                for member in members {
                    if let NodeKind::FunctionDecl {
                        name: method,
                        params,
                        body,
                        ..
                    } = &member.kind
                    {
                        let qualified = format!("{}::{}", name, method);
                        self.gen_function(params, body.as_deref(), &qualified);
                    }
                }
            } else {
                self.gen_statement(node);
            }
        }
    }

    fn gen_statement(&mut self, node: &Node) {
        match &node.kind {
            NodeKind::VarDecl {
                type_tokens,
                name,
                init,
                is_pointer,
                is_array,
                ..
            } => {
                self.gen_var_decl(type_tokens, name, init.as_deref(), *is_pointer, *is_array);
            }
            NodeKind::FunctionDecl {
                name, params, body, ..
            } => {
                let mangled = mangle_function_name(name, params.len());
                self.gen_function(params, body.as_deref(), &mangled);
            }
            NodeKind::Block { stmts } => {
                for stmt in stmts {
                    self.gen_statement(stmt);
                }
            }
            NodeKind::If {
                cond,
                then_branch,
                else_branch,
            } => self.gen_if(cond, then_branch, else_branch.as_deref()),
            NodeKind::While { cond, body } => self.gen_while(cond, body),
            NodeKind::For {
                init,
                cond,
                post,
                body,
            } => self.gen_for(init.as_deref(), cond.as_deref(), post.as_deref(), body),
            NodeKind::Return { expr } => self.gen_return(expr.as_deref()),
            NodeKind::ExprStmt { expr } => {
                if let Some(expr) = expr {
                    self.gen_expression(expr);
                    // Discard the statement's value from whichever stack
                    // holds it.
                    if self.is_float_expr(expr) {
                        self.emit(Opcode::Fpop);
                    } else {
                        self.emit(Opcode::Pop);
                    }
                }
            }
            // Declarations with no runtime code of their own.
            NodeKind::ClassDecl { .. }
            | NodeKind::StructDecl { .. }
            | NodeKind::NamespaceDecl { .. }
            | NodeKind::TemplateDecl { .. }
            | NodeKind::AccessSpec { .. }
            | NodeKind::Include { .. }
            | NodeKind::UsingNamespace { .. } => {}
            other => {
                eprintln!("Warning: unhandled statement '{}' in codegen", other.name());
            }
        }
    }

    fn gen_var_decl(
        &mut self,
        type_tokens: &[String],
        name: &str,
        init: Option<&Node>,
        is_pointer_flag: bool,
        is_array_flag: bool,
    ) {
        let is_pointer = is_pointer_flag || type_tokens.iter().any(|t| t == "*");

        // A pointer initialized from `new` behaves as a heap array.
        let is_heap_array = is_pointer
            && matches!(
                init.map(|n| &n.kind),
                Some(NodeKind::Unary { op, .. }) if op == "new"
            );

        let is_array = is_array_flag || is_heap_array;
        let is_float_var = !is_pointer && !is_array && is_float_type(type_tokens);

        let addr = self.next_memory_addr;
        self.next_memory_addr += 1;
        self.add_variable(name, addr, is_array, is_heap_array, is_float_var);

        if let Some(init) = init {
            if is_float_var {
                self.gen_expression(init);
                if !self.is_float_expr(init) {
                    self.emit(Opcode::IntToFp);
                }
                self.emit(Opcode::Fstore);
                self.emit_i32(addr);
            } else {
                self.gen_expression(init);
                self.emit(Opcode::Push);
                self.emit_i32(addr);
                self.emit(Opcode::Store);
            }
        }
    }

    fn gen_function(&mut self, params: &[Param], body: Option<&Node>, label: &str) {
        self.define_label(label);
        self.add_function(label, self.current_address() as i32, params.len());

        // Prologue. After PUSH_BP the stack is
        //   [.., arg0, .., argN-1, saved_bp]  with BP = stack.len(),
        // so parameter i sits at BP - (N - i + 1).
        self.emit(Opcode::PushBp);

        let count = params.len() as i32;
        for (i, param) in params.iter().enumerate() {
            let offset = -(count - i as i32 + 1);
            let is_pointer = param
                .type_tokens
                .iter()
                .any(|t| t == "*" || t == "[]");
            self.symbols.insert(
                param.name.clone(),
                Symbol {
                    kind: SymbolKind::Parameter,
                    offset,
                    is_array: is_pointer,
                    is_heap_allocated: false,
                    is_float: false,
                    param_count: 0,
                },
            );
        }

        if let Some(body) = body {
            self.gen_statement(body);
        }

        // Implicit epilogue for functions without an explicit return.
        self.emit(Opcode::PopBp);
        self.emit(Opcode::Ret);
    }

    // ------------------------------------------------------------------
    // Control flow
    // ------------------------------------------------------------------

    fn gen_if(&mut self, cond: &Node, then_branch: &Node, else_branch: Option<&Node>) {
        let else_label = self.make_label("else");
        let end_label = self.make_label("endif");

        self.gen_expression(cond);
        self.emit_jump(Opcode::Jz, &else_label);

        self.gen_statement(then_branch);
        self.emit_jump(Opcode::Jmp, &end_label);

        self.define_label(&else_label);
        if let Some(else_branch) = else_branch {
            self.gen_statement(else_branch);
        }

        self.define_label(&end_label);
    }

    fn gen_while(&mut self, cond: &Node, body: &Node) {
        let loop_start = self.make_label("while_start");
        let loop_end = self.make_label("while_end");

        self.define_label(&loop_start);
        self.gen_expression(cond);
        self.emit_jump(Opcode::Jz, &loop_end);

        self.gen_statement(body);
        self.emit_jump(Opcode::Jmp, &loop_start);

        self.define_label(&loop_end);
    }

    fn gen_for(
        &mut self,
        init: Option<&Node>,
        cond: Option<&Node>,
        post: Option<&Node>,
        body: &Node,
    ) {
        let loop_start = self.make_label("for_start");
        let loop_end = self.make_label("for_end");

        if let Some(init) = init {
            self.gen_statement(init);
        }

        self.define_label(&loop_start);

        if let Some(cond) = cond {
            self.gen_expression(cond);
            self.emit_jump(Opcode::Jz, &loop_end);
        }

        self.gen_statement(body);

        if let Some(post) = post {
            self.gen_expression(post);
            if self.is_float_expr(post) {
                self.emit(Opcode::Fpop);
            } else {
                self.emit(Opcode::Pop);
            }
        }

        self.emit_jump(Opcode::Jmp, &loop_start);
        self.define_label(&loop_end);
    }

    fn gen_return(&mut self, expr: Option<&Node>) {
        if let Some(expr) = expr {
            self.gen_expression(expr);
        }
        self.emit(Opcode::PopBp);
        self.emit(Opcode::Ret);
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn gen_expression(&mut self, node: &Node) {
        match &node.kind {
            NodeKind::Binary { op, left, right } => self.gen_binary(op, left, right),
            NodeKind::Unary { op, operand } => self.gen_unary(op, operand),
            NodeKind::Call { callee, args } => self.gen_call(callee, args),
            NodeKind::Literal {
                value,
                literal_kind,
            } => self.gen_literal(value, *literal_kind),
            NodeKind::Identifier { name } => self.gen_identifier(name),
            NodeKind::Index { array, index } => self.gen_subscript(array, index),
            NodeKind::Member { .. } => {
                // Member access has no runtime object model; a placeholder
                // keeps the surrounding expression well-formed.
                self.emit(Opcode::Push);
                self.emit_i32(0);
            }
            other => {
                eprintln!("Warning: unhandled expression '{}' in codegen", other.name());
                self.emit(Opcode::Push);
                self.emit_i32(0);
            }
        }
    }

    fn gen_binary(&mut self, op: &str, left: &Node, right: &Node) {
        if op == "=" {
            self.gen_assignment(left, right);
            return;
        }

        // Stream output operator.
        if op == "<<" {
            // Recognize chains whose leftmost receiver is `std::cout`.
            let mut leftmost = left;
            while let NodeKind::Binary { left: inner, .. } = &leftmost.kind {
                leftmost = inner.as_ref();
            }
            let is_cout_chain = matches!(
                &leftmost.kind,
                NodeKind::Identifier { name } if name == "std::cout"
            );

            if is_cout_chain {
                // Earlier links print first.
                if let NodeKind::Binary {
                    op: inner_op,
                    left: inner_left,
                    right: inner_right,
                } = &left.kind
                {
                    self.gen_binary(inner_op, inner_left, inner_right);
                }
                self.gen_print_operand(right);
                // Placeholder so the chain stays a well-formed expression.
                self.emit(Opcode::Push);
                self.emit_i32(0);
                return;
            }

            // Fallback: still print the right operand.
            self.gen_print_operand(right);
            self.emit(Opcode::Push);
            self.emit_i32(0);
            return;
        }

        // Stream input operator: cin >> lhs.
        if op == ">>" {
            self.emit(Opcode::Input);

            match &right.kind {
                NodeKind::Identifier { name } => {
                    if let Some(sym) = self.find_symbol(name).cloned() {
                        if sym.kind == SymbolKind::Parameter {
                            self.emit(Opcode::StoreBp);
                            self.emit_i32(sym.offset);
                        } else {
                            self.emit(Opcode::Push);
                            self.emit_i32(sym.offset);
                            self.emit(Opcode::Store);
                        }
                    }
                }
                NodeKind::Index { array, index } => {
                    if let NodeKind::Identifier { name } = &array.kind {
                        if let Some(sym) = self.find_symbol(name).cloned() {
                            self.emit_array_base(&sym);
                            self.gen_expression(index);
                            self.emit(Opcode::Add);
                            self.emit(Opcode::StoreIndirect);
                        }
                    }
                }
                _ => {}
            }

            self.emit(Opcode::Push);
            self.emit_i32(0);
            return;
        }

        let left_float = self.is_float_expr(left);
        let right_float = self.is_float_expr(right);
        let either_float = left_float || right_float;

        // Float arithmetic.
        if either_float && matches!(op, "+" | "-" | "*" | "/") {
            self.gen_expression(left);
            if !left_float {
                self.emit(Opcode::IntToFp);
            }
            self.gen_expression(right);
            if !right_float {
                self.emit(Opcode::IntToFp);
            }
            match op {
                "+" => self.emit(Opcode::Fadd),
                "-" => self.emit(Opcode::Fsub),
                "*" => self.emit(Opcode::Fmul),
                _ => self.emit(Opcode::Fdiv),
            }
            return;
        }

        // Float comparisons leave an integer 0/1 on the integer stack.
        if either_float && matches!(op, "<" | ">" | "<=" | ">=" | "==" | "!=") {
            self.gen_expression(left);
            if !left_float {
                self.emit(Opcode::IntToFp);
            }
            self.gen_expression(right);
            if !right_float {
                self.emit(Opcode::IntToFp);
            }

            let true_label = self.make_label("fcmp_true");
            let end_label = self.make_label("fcmp_end");

            if op == "==" || op == "!=" {
                // Reduce to an integer zero test of the difference.
                self.emit(Opcode::Fsub);
                self.emit(Opcode::FpToInt);
                self.emit(Opcode::Dup);
                self.emit_jump(Opcode::Jz, &true_label);
                self.emit(Opcode::Pop);
                self.emit(Opcode::Push);
                self.emit_i32(if op == "==" { 0 } else { 1 });
                self.emit_jump(Opcode::Jmp, &end_label);
                self.define_label(&true_label);
                self.emit(Opcode::Pop);
                self.emit(Opcode::Push);
                self.emit_i32(if op == "==" { 1 } else { 0 });
                self.define_label(&end_label);
            } else {
                self.emit(Opcode::Fcmp);
                let jmp_op = match op {
                    "<" => Opcode::Jl,
                    ">" => Opcode::Jg,
                    "<=" => Opcode::Jle,
                    _ => Opcode::Jge,
                };
                self.emit_jump(jmp_op, &true_label);
                self.emit(Opcode::Push);
                self.emit_i32(0);
                self.emit_jump(Opcode::Jmp, &end_label);
                self.define_label(&true_label);
                self.emit(Opcode::Push);
                self.emit_i32(1);
                self.define_label(&end_label);
            }
            return;
        }

        self.gen_expression(left);
        self.gen_expression(right);

        match op {
            "+" => self.emit(Opcode::Add),
            "-" => self.emit(Opcode::Sub),
            "*" => self.emit(Opcode::Mul),
            "/" => self.emit(Opcode::Div),
            "%" => self.emit(Opcode::Mod),
            "<" => self.gen_int_comparison(Opcode::Jl),
            ">" => self.gen_int_comparison(Opcode::Jg),
            "<=" => self.gen_int_comparison(Opcode::Jle),
            ">=" => self.gen_int_comparison(Opcode::Jge),
            "==" | "!=" => {
                // Difference-is-zero test.
                let (on_zero, on_nonzero) = if op == "==" { (1, 0) } else { (0, 1) };
                let true_label = self.make_label("cmp_true");
                let end_label = self.make_label("cmp_end");
                self.emit(Opcode::Sub);
                self.emit(Opcode::Dup);
                self.emit_jump(Opcode::Jz, &true_label);
                self.emit(Opcode::Pop);
                self.emit(Opcode::Push);
                self.emit_i32(on_nonzero);
                self.emit_jump(Opcode::Jmp, &end_label);
                self.define_label(&true_label);
                self.emit(Opcode::Pop);
                self.emit(Opcode::Push);
                self.emit_i32(on_zero);
                self.define_label(&end_label);
            }
            other => {
                // Unknown operator: drain operands, leave a placeholder.
                eprintln!("Warning: unhandled binary operator '{}' in codegen", other);
                self.emit(Opcode::Pop);
                self.emit(Opcode::Pop);
                self.emit(Opcode::Push);
                self.emit_i32(0);
            }
        }
    }

    /// CMP followed by the given conditional jump, materializing 0/1.
    fn gen_int_comparison(&mut self, jmp_op: Opcode) {
        let true_label = self.make_label("cmp_true");
        let end_label = self.make_label("cmp_end");
        self.emit(Opcode::Cmp);
        self.emit_jump(jmp_op, &true_label);
        self.emit(Opcode::Push);
        self.emit_i32(0);
        self.emit_jump(Opcode::Jmp, &end_label);
        self.define_label(&true_label);
        self.emit(Opcode::Push);
        self.emit_i32(1);
        self.define_label(&end_label);
    }

    fn gen_assignment(&mut self, left: &Node, right: &Node) {
        // *ptr = value
        if let NodeKind::Unary { op, operand } = &left.kind {
            if op == "*" {
                self.gen_expression(right);
                self.emit(Opcode::Dup); // keep the value as the result
                self.gen_expression(operand); // the pointer's value is the address
                self.emit(Opcode::StoreIndirect);
                return;
            }
        }

        // arr[i] = value
        if let NodeKind::Index { array, index } = &left.kind {
            self.gen_expression(right);
            self.emit(Opcode::Dup);

            if let NodeKind::Identifier { name } = &array.kind {
                if let Some(sym) = self.find_symbol(name).cloned() {
                    self.emit_array_base(&sym);
                    self.gen_expression(index);
                    self.emit(Opcode::Add);
                    self.emit(Opcode::StoreIndirect);
                }
            }
            return;
        }

        // name = value
        if let NodeKind::Identifier { name } = &left.kind {
            let sym = self.find_symbol(name).cloned();
            self.gen_expression(right);

            if let Some(sym) = sym {
                if sym.is_float {
                    if !self.is_float_expr(right) {
                        self.emit(Opcode::IntToFp);
                    }
                    self.emit(Opcode::Fdup); // keep a copy for the expression result
                    self.emit(Opcode::Fstore);
                    self.emit_i32(sym.offset);
                } else if sym.kind == SymbolKind::Parameter {
                    self.emit(Opcode::Dup);
                    self.emit(Opcode::StoreBp);
                    self.emit_i32(sym.offset);
                } else {
                    self.emit(Opcode::Dup);
                    self.emit(Opcode::Push);
                    self.emit_i32(sym.offset);
                    self.emit(Opcode::Store);
                }
            }
        }
    }

    /// Pushes the base address of an array-like symbol for subscripting.
    fn emit_array_base(&mut self, sym: &Symbol) {
        if sym.kind == SymbolKind::Parameter && sym.is_array {
            // Pointer parameters hold the address as their value.
            self.emit(Opcode::LoadBp);
            self.emit_i32(sym.offset);
        } else if sym.kind == SymbolKind::Variable && sym.is_heap_allocated {
            // Heap arrays: the variable holds the heap pointer.
            self.emit(Opcode::Load);
            self.emit_i32(sym.offset);
        } else {
            // Stack arrays decay to their static address; anything else is
            // treated the same way.
            self.emit(Opcode::Push);
            self.emit_i32(sym.offset);
        }
    }

    /// Emits one printed operand of a stream-output chain.
    fn gen_print_operand(&mut self, node: &Node) {
        if let NodeKind::Literal {
            value,
            literal_kind: LiteralKind::Str,
        } = &node.kind
        {
            let id = self.add_string(value);
            self.emit(Opcode::PushStr);
            self.emit_i32(id);
            self.emit(Opcode::PrintStr);
            return;
        }
        self.gen_expression(node);
        if self.is_float_expr(node) {
            self.emit(Opcode::Fprint);
        } else {
            self.emit(Opcode::Print);
        }
    }

    fn gen_unary(&mut self, op: &str, operand: &Node) {
        if op == "new" {
            // `new T[n]` allocates n cells, `new T` allocates one.
            if let NodeKind::Index { index, .. } = &operand.kind {
                self.gen_expression(index);
                self.emit(Opcode::Alloc);
            } else {
                self.emit(Opcode::Push);
                self.emit_i32(1);
                self.emit(Opcode::Alloc);
            }
            return;
        }

        if op == "delete" {
            self.gen_expression(operand);
            self.emit(Opcode::Free);
            // delete is an expression; leave a placeholder value.
            self.emit(Opcode::Push);
            self.emit_i32(0);
            return;
        }

        if op == "&" {
            match &operand.kind {
                NodeKind::Identifier { name } => {
                    if let Some(sym) = self.find_symbol(name) {
                        if sym.kind == SymbolKind::Variable {
                            let offset = sym.offset;
                            self.emit(Opcode::Push);
                            self.emit_i32(offset);
                            return;
                        }
                    }
                }
                NodeKind::Index { array, index } => {
                    if let NodeKind::Identifier { name } = &array.kind {
                        if let Some(sym) = self.find_symbol(name).cloned() {
                            self.emit_array_base(&sym);
                            self.gen_expression(index);
                            self.emit(Opcode::Add);
                            return;
                        }
                    }
                }
                _ => {}
            }
            // Unsupported address-of target.
            self.emit(Opcode::Push);
            self.emit_i32(0);
            return;
        }

        if op == "*" {
            // Dereference: the operand's value is an address.
            self.gen_expression(operand);
            self.emit(Opcode::LoadIndirect);
            return;
        }

        self.gen_expression(operand);

        if op == "-" {
            if self.is_float_expr(operand) {
                self.emit(Opcode::Fneg);
            } else {
                self.emit(Opcode::Push);
                self.emit_i32(0);
                self.emit(Opcode::Swap);
                self.emit(Opcode::Sub);
            }
        }
        // Unary '+' and the remaining operators leave the operand as-is.
    }

    fn gen_call(&mut self, callee: &Node, args: &[Node]) {
        let name = match &callee.kind {
            NodeKind::Identifier { name } => name.clone(),
            _ => return,
        };

        // Constructor calls have no object model yet; a placeholder value
        // stands in for the instance.
        if self.class_names.contains(&name) {
            self.emit(Opcode::Push);
            self.emit_i32(0);
            return;
        }

        if name == "print" {
            for arg in args {
                self.gen_expression(arg);
                if self.is_float_expr(arg) {
                    self.emit(Opcode::Fprint);
                } else {
                    self.emit(Opcode::Print);
                }
            }
            self.emit(Opcode::Push);
            self.emit_i32(0);
            return;
        }

        if name == "println" {
            for arg in args {
                self.gen_expression(arg);
                let is_string_lit = matches!(
                    &arg.kind,
                    NodeKind::Literal {
                        literal_kind: LiteralKind::Str,
                        ..
                    }
                );
                if is_string_lit {
                    self.emit(Opcode::PrintStr);
                } else if self.is_float_expr(arg) {
                    self.emit(Opcode::Fprint);
                } else {
                    self.emit(Opcode::Print);
                }
            }
            let id = self.add_string("\n");
            self.emit(Opcode::Push);
            self.emit_i32(id);
            self.emit(Opcode::PrintStr);
            self.emit(Opcode::Push);
            self.emit_i32(0);
            return;
        }

        // Regular call: arguments left to right, then the mangled target.
        for arg in args {
            self.gen_expression(arg);
        }
        let mangled = mangle_function_name(&name, args.len());
        self.emit_jump(Opcode::Call, &mangled);

        // The callee leaves [arg0, .., argN-1, saved_bp, retval]; one
        // SWAP+POP pair per argument drains the cells under the return
        // value.
        for _ in 0..args.len() {
            self.emit(Opcode::Swap);
            self.emit(Opcode::Pop);
        }
    }

    fn gen_literal(&mut self, value: &str, literal_kind: LiteralKind) {
        if literal_kind == LiteralKind::Str {
            let id = self.add_string(value);
            self.emit(Opcode::PushStr);
            self.emit_i32(id);
            return;
        }

        // Float literals go straight to the FPU stack.
        if literal_kind == LiteralKind::Number && is_float_literal(value) {
            let parsed = parse_float_literal(value).unwrap_or_else(|| {
                eprintln!("Warning: could not parse float literal: {}", value);
                0.0
            });
            self.emit(Opcode::Fpush);
            self.emit_f32(parsed);
            return;
        }

        let first = value.chars().next();
        let int_value = if literal_kind == LiteralKind::Char
            || (value.chars().count() == 1 && !first.map_or(false, |c| c.is_ascii_digit()))
        {
            first.map(|c| c as i32).unwrap_or(0)
        } else {
            match parse_int_literal(value) {
                Some(v) => v,
                None => {
                    eprintln!("Warning: could not parse literal: {}", value);
                    0
                }
            }
        };

        self.emit(Opcode::Push);
        self.emit_i32(int_value);
    }

    fn gen_identifier(&mut self, name: &str) {
        // Stream identifiers have no storage; a placeholder keeps chains
        // well-formed.
        if matches!(name, "std" | "cout" | "cin" | "endl" | "cerr") {
            self.emit(Opcode::Push);
            self.emit_i32(0);
            return;
        }

        let sym = match self.find_symbol(name).cloned() {
            Some(sym) => sym,
            None => {
                // Unknown identifier: placeholder.
                self.emit(Opcode::Push);
                self.emit_i32(0);
                return;
            }
        };

        match sym.kind {
            SymbolKind::Variable => {
                if sym.is_float {
                    self.emit(Opcode::Fload);
                    self.emit_i32(sym.offset);
                } else if sym.is_heap_allocated {
                    self.emit(Opcode::Load);
                    self.emit_i32(sym.offset);
                } else if sym.is_array {
                    // Stack arrays decay to their address.
                    self.emit(Opcode::Push);
                    self.emit_i32(sym.offset);
                } else {
                    self.emit(Opcode::Load);
                    self.emit_i32(sym.offset);
                }
            }
            SymbolKind::Parameter => {
                self.emit(Opcode::LoadBp);
                self.emit_i32(sym.offset);
            }
            SymbolKind::Function => {
                // A function name used as a value pushes its address.
                self.emit(Opcode::Push);
                self.emit_i32(sym.offset);
            }
        }
    }

    fn gen_subscript(&mut self, array: &Node, index: &Node) {
        if let NodeKind::Identifier { name } = &array.kind {
            if let Some(sym) = self.find_symbol(name).cloned() {
                self.emit_array_base(&sym);
                self.gen_expression(index);
                self.emit(Opcode::Add);
                self.emit(Opcode::LoadIndirect);
            }
        }
    }

    // ------------------------------------------------------------------
    // Float detection
    // ------------------------------------------------------------------

    /// True if the expression produces its value on the FPU stack.
    fn is_float_expr(&self, node: &Node) -> bool {
        match &node.kind {
            NodeKind::Literal {
                value,
                literal_kind,
            } => {
                if matches!(literal_kind, LiteralKind::Str | LiteralKind::Char) {
                    return false;
                }
                is_float_literal(value)
            }
            NodeKind::Identifier { name } => {
                self.symbols.get(name).map_or(false, |s| s.is_float)
            }
            NodeKind::Binary { op, left, right } => {
                // The type of an assignment follows its left-hand side.
                if op == "=" {
                    if let NodeKind::Identifier { name } = &left.kind {
                        return self.symbols.get(name).map_or(false, |s| s.is_float);
                    }
                    return false;
                }
                self.is_float_expr(left) || self.is_float_expr(right)
            }
            NodeKind::Unary { operand, .. } => self.is_float_expr(operand),
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Emission helpers
    // ------------------------------------------------------------------

    fn current_address(&self) -> u32 {
        self.code.len() as u32
    }

    fn emit(&mut self, op: Opcode) {
        self.code.push(op as u8);
    }

    fn emit_i32(&mut self, value: i32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    fn emit_f32(&mut self, value: f32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    fn emit_i32_at(&mut self, pos: usize, value: i32) {
        self.code[pos..pos + 4].copy_from_slice(&value.to_le_bytes());
    }

    // ------------------------------------------------------------------
    // Labels
    // ------------------------------------------------------------------

    fn make_label(&mut self, prefix: &str) -> String {
        let label = format!("{}_{}", prefix, self.label_counter);
        self.label_counter += 1;
        label
    }

    fn define_label(&mut self, name: &str) {
        let address = self.current_address();
        self.labels.entry(name.to_string()).or_default().address = Some(address);
    }

    /// Emits a jump/call with a placeholder operand and records the fixup
    /// site.
    fn emit_jump(&mut self, op: Opcode, label: &str) {
        self.emit(op);
        let site = self.code.len();
        self.labels
            .entry(label.to_string())
            .or_default()
            .fixups
            .push(site);
        self.emit_i32(0);
    }

    /// Patches every recorded fixup site with its label's resolved address.
    fn fixup_labels(&mut self) -> Result<(), CompileError> {
        let labels = std::mem::take(&mut self.labels);
        for (name, label) in &labels {
            let address = match label.address {
                Some(addr) => addr as i32,
                None => return Err(CompileError::undefined_label(name)),
            };
            for &site in &label.fixups {
                self.emit_i32_at(site, address);
            }
        }
        self.labels = labels;
        Ok(())
    }

    // ------------------------------------------------------------------
    // String pool
    // ------------------------------------------------------------------

    /// Interns a string, collapsing duplicates, and returns its index.
    pub fn add_string(&mut self, s: &str) -> i32 {
        for (i, existing) in self.strings.iter().enumerate() {
            if existing == s {
                return i as i32;
            }
        }
        self.strings.push(s.to_string());
        (self.strings.len() - 1) as i32
    }

    // ------------------------------------------------------------------
    // Symbol table
    // ------------------------------------------------------------------

    fn add_variable(
        &mut self,
        name: &str,
        offset: i32,
        is_array: bool,
        is_heap_allocated: bool,
        is_float: bool,
    ) {
        self.symbols.insert(
            name.to_string(),
            Symbol {
                kind: SymbolKind::Variable,
                offset,
                is_array,
                is_heap_allocated,
                is_float,
                param_count: 0,
            },
        );
    }

    fn add_function(&mut self, name: &str, address: i32, param_count: usize) {
        self.symbols.insert(
            name.to_string(),
            Symbol {
                kind: SymbolKind::Function,
                offset: address,
                is_array: false,
                is_heap_allocated: false,
                is_float: false,
                param_count,
            },
        );
    }

    fn find_symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }
}

/// Arity-only mangling used by definitions and call sites alike:
/// `name` for zero parameters, otherwise `name_P<count>`.
pub fn mangle_function_name(name: &str, param_count: usize) -> String {
    if param_count == 0 {
        return name.to_string();
    }
    format!("{}_P{}", name, param_count)
}

/// Richer mangling that also encodes parameter types:
/// `name_P<count>_<t1>_<t2>...` with one-letter codes for the common types
/// and `p`/`r` markers for trailing pointer/reference declarators.
pub fn mangle_function_name_typed(name: &str, params: &[Param]) -> String {
    if params.is_empty() {
        return name.to_string();
    }

    let mut mangled = format!("{}_P{}", name, params.len());
    for param in params {
        let Some(first) = param.type_tokens.first() else {
            continue;
        };
        let mut code = match first.as_str() {
            "int" => "i".to_string(),
            "float" => "f".to_string(),
            "double" => "d".to_string(),
            "char" => "c".to_string(),
            "bool" => "b".to_string(),
            "void" => "v".to_string(),
            "std" => "s".to_string(),
            other => other.to_string(),
        };
        if param.type_tokens.len() > 1 {
            match param.type_tokens.last().map(|s| s.as_str()) {
                Some("*") => code.push('p'),
                Some("&") => code.push('r'),
                _ => {}
            }
        }
        mangled.push('_');
        mangled.push_str(&code);
    }
    mangled
}

/// True if the declared type tokens name a floating-point scalar.
fn is_float_type(type_tokens: &[String]) -> bool {
    type_tokens.iter().any(|t| t == "float" || t == "double")
}

/// True if the literal text denotes a floating-point number. Hex integers
/// never qualify.
fn is_float_literal(text: &str) -> bool {
    let bytes = text.as_bytes();
    if bytes.is_empty() {
        return false;
    }
    if bytes.len() >= 2 && bytes[0] == b'0' && (bytes[1] == b'x' || bytes[1] == b'X') {
        return false;
    }
    text.contains(['.', 'e', 'E'])
}

/// Strips trailing type-suffix letters (1.5f, 10ul, ...) before parsing.
fn strip_suffix(text: &str) -> &str {
    text.trim_end_matches(['f', 'F', 'l', 'L', 'u', 'U'])
}

fn parse_float_literal(text: &str) -> Option<f32> {
    strip_suffix(text).parse::<f32>().ok()
}

fn parse_int_literal(text: &str) -> Option<i32> {
    let trimmed = strip_suffix(text);
    if let Ok(v) = trimmed.parse::<i32>() {
        return Some(v);
    }
    // Fall back to float-then-truncate, e.g. for out-of-place decimals.
    trimmed.parse::<f32>().ok().map(|v| v as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn compile_src(src: &str) -> Image {
        let tokens = Lexer::new(src).tokenize().expect("lex failed");
        let program = Parser::new(tokens).parse_program().expect("parse failed");
        Compiler::new().compile(&program).expect("compile failed")
    }

    fn read_i32_at(code: &[u8], pos: usize) -> i32 {
        i32::from_le_bytes([code[pos], code[pos + 1], code[pos + 2], code[pos + 3]])
    }

    #[test]
    fn test_prologue_calls_main_then_halts() {
        let image = compile_src("int main() { return 0; }");
        assert_eq!(image.code[0], Opcode::Call as u8);
        assert_eq!(image.code[5], Opcode::Halt as u8);
        // main's label is the first byte after the prologue
        assert_eq!(read_i32_at(&image.code, 1), 6);
        assert_eq!(image.code[6], Opcode::PushBp as u8);
    }

    #[test]
    fn test_jump_operands_are_patched() {
        let image = compile_src("int main() { return 0; }");
        // Every CALL/JMP operand must point inside the code segment.
        let target = read_i32_at(&image.code, 1);
        assert!(target >= 0 && (target as usize) < image.code.len());
    }

    #[test]
    fn test_undefined_function_call_is_an_error() {
        let tokens = Lexer::new("int main() { foo(); return 0; }")
            .tokenize()
            .unwrap();
        let program = Parser::new(tokens).parse_program().unwrap();
        let err = Compiler::new().compile(&program).unwrap_err();
        match err {
            CompileError::UndefinedLabel { name } => assert_eq!(name, "foo"),
            other => panic!("expected UndefinedLabel, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_main_is_an_error() {
        let tokens = Lexer::new("int helper() { return 1; }").tokenize().unwrap();
        let program = Parser::new(tokens).parse_program().unwrap();
        let err = Compiler::new().compile(&program).unwrap_err();
        assert!(matches!(err, CompileError::UndefinedLabel { name } if name == "main"));
    }

    #[test]
    fn test_string_pool_deduplicates() {
        let mut compiler = Compiler::new();
        let a = compiler.add_string("hello");
        let b = compiler.add_string("world");
        let c = compiler.add_string("hello");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(compiler.strings.len(), 2);
    }

    #[test]
    fn test_string_pool_in_compiled_image() {
        let image = compile_src(
            r#"int main() { println("hi"); println("hi"); return 0; }"#,
        );
        // "hi" once, "\n" once
        assert_eq!(image.strings.len(), 2);
        assert!(image.strings.contains(&"hi".to_string()));
        assert!(image.strings.contains(&"\n".to_string()));
    }

    #[test]
    fn test_arity_mangling() {
        assert_eq!(mangle_function_name("main", 0), "main");
        assert_eq!(mangle_function_name("fact", 1), "fact_P1");
        assert_eq!(mangle_function_name("add", 2), "add_P2");
    }

    #[test]
    fn test_typed_mangling() {
        let params = vec![
            Param {
                type_tokens: vec!["int".to_string()],
                name: "a".to_string(),
            },
            Param {
                type_tokens: vec!["float".to_string(), "*".to_string()],
                name: "b".to_string(),
            },
        ];
        assert_eq!(mangle_function_name_typed("foo", &params), "foo_P2_i_fp");
        assert_eq!(mangle_function_name_typed("bar", &[]), "bar");
    }

    #[test]
    fn test_overloads_by_arity_resolve_to_distinct_labels() {
        let image = compile_src(
            "int f(int a) { return a; }\n\
             int f(int a, int b) { return a + b; }\n\
             int main() { return f(1) + f(1, 2); }",
        );
        assert!(!image.code.is_empty());
    }

    #[test]
    fn test_float_literal_emits_fpush() {
        let image = compile_src("int main() { float x = 1.5; return 0; }");
        let pos = image
            .code
            .windows(5)
            .position(|w| {
                w[0] == Opcode::Fpush as u8 && w[1..5] == 1.5f32.to_le_bytes()
            });
        assert!(pos.is_some(), "expected FPUSH 1.5 in code");
        assert!(image.code.contains(&(Opcode::Fstore as u8)));
    }

    #[test]
    fn test_float_literal_detection() {
        assert!(is_float_literal("1.5"));
        assert!(is_float_literal("2e10"));
        assert!(is_float_literal("3E-2"));
        assert!(!is_float_literal("42"));
        assert!(!is_float_literal("0x1F"));
        assert!(!is_float_literal(""));
    }

    #[test]
    fn test_literal_suffixes_are_stripped() {
        assert_eq!(parse_int_literal("10u"), Some(10));
        assert_eq!(parse_int_literal("7ull"), Some(7));
        assert_eq!(parse_float_literal("1.5f"), Some(1.5));
        assert_eq!(parse_int_literal("abc"), None);
    }

    #[test]
    fn test_heap_array_variable_loads_pointer() {
        let image = compile_src(
            "int main() { int* p = new int[3]; p[0] = 7; return 0; }",
        );
        // The allocation site: PUSH 3; ALLOC
        let alloc = image
            .code
            .windows(6)
            .position(|w| w[0] == Opcode::Push as u8 && w[1] == 3 && w[5] == Opcode::Alloc as u8);
        assert!(alloc.is_some(), "expected PUSH 3; ALLOC");
        assert!(image.code.contains(&(Opcode::StoreIndirect as u8)));
    }

    #[test]
    fn test_delete_emits_free() {
        let image = compile_src("int main() { int* p = new int; delete p; return 0; }");
        assert!(image.code.contains(&(Opcode::Free as u8)));
    }

    #[test]
    fn test_call_cleanup_swaps_and_pops_per_argument() {
        let image = compile_src(
            "int id(int x) { return x; }\n\
             int main() { return id(5); }",
        );
        // After the CALL there must be exactly one SWAP; POP pair.
        let call_sites: Vec<usize> = image
            .code
            .iter()
            .enumerate()
            .filter(|&(_, &b)| b == Opcode::Call as u8)
            .map(|(i, _)| i)
            .collect();
        // One prologue call to main, one call to id_P1.
        assert_eq!(call_sites.len(), 2);
        let id_call = call_sites[1];
        assert_eq!(image.code[id_call + 5], Opcode::Swap as u8);
        assert_eq!(image.code[id_call + 6], Opcode::Pop as u8);
    }

    #[test]
    fn test_cout_chain_prints_each_operand() {
        let image = compile_src(r#"int main() { std::cout << 1 << "x"; return 0; }"#);
        assert!(image.code.contains(&(Opcode::Print as u8)));
        assert!(image.code.contains(&(Opcode::PrintStr as u8)));
        assert_eq!(image.strings, vec!["x".to_string()]);
    }

    #[test]
    fn test_cin_stores_input() {
        let image = compile_src("int main() { int x; std::cin >> x; return 0; }");
        assert!(image.code.contains(&(Opcode::Input as u8)));
        assert!(image.code.contains(&(Opcode::Store as u8)));
    }

    #[test]
    fn test_constructor_call_pushes_placeholder() {
        let image = compile_src(
            "class Foo { public: int x; };\n\
             int main() { Foo f = Foo(); return 0; }",
        );
        assert!(!image.code.is_empty());
    }

    #[test]
    fn test_class_method_gets_qualified_label() {
        let image = compile_src(
            "class Counter { public: int get() { return 1; } };\n\
             int main() { return Counter::get(); }",
        );
        assert!(!image.code.is_empty());
    }

    #[test]
    fn test_character_literal_pushes_code_point() {
        let image = compile_src("int main() { int c = 'A'; return 0; }");
        let pos = image
            .code
            .windows(5)
            .position(|w| w[0] == Opcode::Push as u8 && read_i32_at(w, 1) == 65);
        assert!(pos.is_some(), "expected PUSH 65 for 'A'");
    }
}
