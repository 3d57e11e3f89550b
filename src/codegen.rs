//! Lowering pass: walks the AST, builds the scope tree block by block, and emits
//! x86-64 assembly text for each block and for the global constants stream.
//!
//! The only orchestration object is [`Compiler`]; everything else in this module is
//! a method on it. There is no separate IR — lowering reads the AST and writes
//! assembly text directly, one block at a time, in the construction order
//! described in DESIGN.md.

use crate::ast::{
    self, BinaryOperator, Block, Callable, Direction, Expression, Program, SourceSpan, Statement,
    UnaryOperator,
};
use crate::emitter::{emit, registers, Emitter, LabelCounter};
use crate::errors::{CompileError, ErrorKind, Result};
use crate::scope::{BlockId, FuncId, FunctionData, ParamDecl, Resolved, Scope, Symbol};
use crate::types::{emit_array_member_offset, ArrayLayout, RecordLayout, SemanticType};

pub struct Compiler {
    scope: Scope,
    constants: Vec<String>,
    labels: LabelCounter,
}

impl Compiler {
    pub fn new() -> Self {
        Compiler {
            scope: Scope::new(),
            constants: Vec::new(),
            labels: LabelCounter::new(),
        }
    }

    pub fn compile(&mut self, program: &Program) -> Result<String> {
        let root = self.scope.reserve_block(None, None, 0);
        self.scope.declare_type_alias(root, "integer", SemanticType::Integer)?;
        self.scope.declare_type_alias(root, "double", SemanticType::Double)?;
        self.scope.declare_type_alias(root, "string", SemanticType::String)?;
        self.install_builtins(root)?;
        self.build_block(root, &program.block, None)?;
        Ok(self.assemble(root))
    }

    fn install_builtins(&mut self, root: BlockId) -> Result<()> {
        for sig in crate::builtins::builtin_signatures() {
            let func_id = self.scope.reserve_function(FunctionData {
                name: sig.name.to_string(),
                params: sig.params,
                return_type: sig.return_type,
                level: 0,
                label: format!("builtin${}", sig.name),
                is_builtin: true,
                body: None,
            });
            self.scope.declare_function(root, sig.name, func_id)?;
        }
        Ok(())
    }

    fn assemble(&self, root: BlockId) -> String {
        let mut out = String::new();
        out.push_str(".intel_syntax noprefix\n");
        out.push_str(".text\n");
        for line in &self.constants {
            out.push_str(line);
            out.push('\n');
        }
        for &block_id in &self.scope.block_order {
            if let Some(code) = &self.scope.block(block_id).code {
                out.push_str(&code.code());
            }
        }
        out.push_str(".globl main\n");
        out.push_str("main:\n");
        out.push_str("    push rbp\n");
        out.push_str("    mov rbp, rsp\n");
        out.push_str(&format!("    call {}\n", self.scope.block(root).label));
        out.push_str("    xor eax, eax\n");
        out.push_str("    leave\n");
        out.push_str("    ret\n");
        out
    }

    // ---- scope construction -------------------------------------------------

    fn build_block(&mut self, block: BlockId, ast_block: &Block, owning_function: Option<FuncId>) -> Result<()> {
        tracing::debug!(
            block = block.0,
            level = self.scope.block(block).level,
            vars = ast_block.variables.len(),
            callables = ast_block.callables.len(),
            "constructing block"
        );

        for alias in &ast_block.type_aliases {
            let ty = self.resolve_ast_type(block, &alias.ty)?;
            self.scope.declare_type_alias(block, &alias.name, ty)?;
        }

        for c in &ast_block.constants {
            let (ty, label) = self.install_constant_literal(&c.literal);
            self.scope.declare_constant(block, &c.name, ty, label)?;
        }

        let mut next_offset = -1i64;
        for v in &ast_block.variables {
            let ty = self.resolve_ast_type(block, &v.ty)?;
            self.scope.declare_variable(block, &v.name, ty, next_offset, false)?;
            next_offset -= 1;
        }

        if let Some(fid) = owning_function {
            let params = self.scope.function(fid).params.clone();
            // last-declared parameter sits nearest the frame base (offset 2).
            for (i, p) in params.iter().rev().enumerate() {
                let offset = 2 + i as i64;
                self.scope.declare_parameter(block, &p.name, p.ty.clone(), offset, p.by_reference)?;
            }
        }

        for callable in &ast_block.callables {
            self.build_callable(block, callable)?;
        }

        self.emit_block_body(block, ast_block, owning_function)
    }

    fn build_callable(&mut self, parent_block: BlockId, callable: &Callable) -> Result<()> {
        let declaring_level = self.scope.block(parent_block).level;
        let body_level = declaring_level + 1;

        let return_type = match &callable.return_type {
            Some(name) => {
                let ty = self.scope.resolve_type(parent_block, name).ok_or_else(|| {
                    CompileError::at(ErrorKind::UnresolvedName, format!("unknown type `{name}`"), callable.span)
                })?;
                if !ty.allowed_pass_by_value() {
                    return Err(CompileError::at(
                        ErrorKind::DisallowedByValue,
                        format!("function `{}` cannot return a `{}`", callable.name, ty.signature()),
                        callable.span,
                    ));
                }
                Some(ty)
            }
            None => None,
        };

        let mut params = Vec::new();
        for p in &callable.parameters {
            let ty = self.resolve_ast_type(parent_block, &p.ty)?;
            if !p.by_reference && !ty.allowed_pass_by_value() {
                return Err(CompileError::at(
                    ErrorKind::DisallowedByValue,
                    format!("parameter `{}` of `{}` must be passed by reference", p.name, callable.name),
                    callable.span,
                ));
            }
            params.push(ParamDecl { name: p.name.clone(), by_reference: p.by_reference, ty });
        }

        let label = self.labels.fresh(&format!("Func_{}", sanitize_label(&callable.name)));
        let func_id = self.scope.reserve_function(FunctionData {
            name: callable.name.clone(),
            params,
            return_type,
            level: body_level,
            label,
            is_builtin: false,
            body: None,
        });

        let body_block = self.scope.reserve_block(Some(parent_block), Some(func_id), body_level);
        self.scope.function_mut(func_id).body = Some(body_block);
        self.build_block(body_block, &callable.block, Some(func_id))?;
        // Installed only now: the body was already built, so self-recursion went
        // through the scope's function-name special case, not this entry.
        self.scope.declare_function(parent_block, &callable.name, func_id)?;
        Ok(())
    }

    fn resolve_ast_type(&mut self, block: BlockId, ty: &ast::Type) -> Result<SemanticType> {
        match ty {
            ast::Type::TypeIdentifier(name, span) => self
                .scope
                .resolve_type(block, name)
                .ok_or_else(|| CompileError::at(ErrorKind::UnresolvedName, format!("unknown type `{name}`"), *span)),
            ast::Type::PointerType(inner, _span) => {
                let inner_ty = self.resolve_ast_type(block, inner)?;
                Ok(SemanticType::Pointer(Box::new(inner_ty)))
            }
            ast::Type::RecordType(fields, span) => {
                let mut layout_fields: Vec<(String, SemanticType)> = Vec::new();
                for f in fields {
                    if layout_fields.iter().any(|(n, _)| n == &f.name) {
                        return Err(CompileError::at(
                            ErrorKind::DuplicateMember,
                            format!("field `{}` declared twice", f.name),
                            *span,
                        ));
                    }
                    let fty = self.resolve_ast_type(block, &f.ty)?;
                    layout_fields.push((f.name.clone(), fty));
                }
                Ok(SemanticType::Record(RecordLayout { fields: layout_fields }))
            }
            ast::Type::ArraySchema { bounds, element_type, span } => {
                let mut layout_bounds = Vec::new();
                for b in bounds {
                    if b.min > b.max {
                        return Err(CompileError::at(
                            ErrorKind::InvalidArrayBound,
                            format!("array bound {}..{} has min > max", b.min, b.max),
                            *span,
                        ));
                    }
                    layout_bounds.push((b.min, b.max));
                }
                let element = self.resolve_ast_type(block, element_type)?;
                Ok(SemanticType::Array(ArrayLayout { bounds: layout_bounds, element: Box::new(element) }))
            }
        }
    }

    fn install_constant_literal(&mut self, literal: &str) -> (SemanticType, String) {
        let ty = classify_literal(literal);
        let label = self.labels.fresh("Constant");
        self.constants.push(format!("{label}:"));
        match &ty {
            SemanticType::Integer => {
                let value: i64 = literal.parse().unwrap_or(0);
                self.constants.push(format!("    .quad {value}"));
            }
            SemanticType::Double => {
                let value: f64 = literal.parse().unwrap_or(0.0);
                self.constants.push(format!("    .double {value}"));
            }
            SemanticType::String => {
                for byte in decode_string_literal(literal) {
                    self.constants.push(format!("    .byte {byte}"));
                }
                self.constants.push("    .byte 0".to_string());
            }
            _ => unreachable!("classify_literal only produces Integer/Double/String"),
        }
        (ty, label)
    }

    // ---- block emission ------------------------------------------------------

    fn emit_block_body(&mut self, block: BlockId, ast_block: &Block, owning_function: Option<FuncId>) -> Result<()> {
        let level = self.scope.block(block).level;
        let label = match owning_function {
            Some(fid) => self.scope.function(fid).label.clone(),
            None => self.labels.fresh("Program"),
        };
        self.scope.block_mut(block).label = label.clone();

        let mut ctx = Emitter::with_label(label);
        emit!(ctx, "push rbp");
        emit!(ctx, "mov rbp, rsp");
        let locals = self.scope.block(block).locals.clone();
        if !locals.is_empty() {
            emit!(ctx, "sub rsp, {}", locals.len() as i64 * 8);
        }

        for (i, name) in locals.iter().enumerate() {
            let offset = -(i as i64 + 1);
            let ty = self.symbol_type(block, name);
            self.scope.load_frame(&mut ctx, block, level);
            emit!(ctx, "lea {}, qword ptr [{} + {}*8]", registers::LVALUE_PTR, registers::FRAME_BASE, offset);
            ty.emit_initialize(&mut ctx, &mut self.labels);
        }

        self.emit_statement(&mut ctx, block, owning_function, &ast_block.body)?;

        for (i, name) in locals.iter().enumerate().rev() {
            let offset = -(i as i64 + 1);
            let ty = self.symbol_type(block, name);
            if ty.needs_finalize() {
                self.scope.load_frame(&mut ctx, block, level);
                emit!(ctx, "lea {}, qword ptr [{} + {}*8]", registers::LVALUE_PTR, registers::FRAME_BASE, offset);
                ty.emit_finalize(&mut ctx, &mut self.labels);
            }
        }

        emit!(ctx, "leave");
        emit!(ctx, "ret");
        self.scope.block_mut(block).code = Some(ctx);
        self.scope.block_order.push(block);
        Ok(())
    }

    fn symbol_type(&self, block: BlockId, name: &str) -> SemanticType {
        match self.scope.block(block).symbols.get(name) {
            Some(Symbol::Variable { ty, .. }) => ty.clone(),
            _ => unreachable!("locals only ever name Variable symbols"),
        }
    }

    // ---- statements ------------------------------------------------------

    fn emit_statement(&mut self, ctx: &mut Emitter, block: BlockId, function: Option<FuncId>, stmt: &Statement) -> Result<()> {
        match stmt {
            Statement::Assignment { target, value, span } => {
                if let (Expression::Identifier(name, _), Some(fid)) = (target, function) {
                    if self.scope.function(fid).name == *name {
                        let rty = self.emit_rvalue(ctx, block, value)?;
                        let ret_ty = self.scope.function(fid).return_type.clone().ok_or_else(|| {
                            CompileError::at(ErrorKind::MiscSemantic, "a procedure has no return value to assign", *span)
                        })?;
                        self.ensure_type(ctx, &rty, &ret_ty, *span)?;
                        emit!(ctx, "pop {}", registers::RETURN_VALUE);
                        return Ok(());
                    }
                }
                let rty = self.emit_rvalue(ctx, block, value)?;
                let lty = self.emit_lvalue(ctx, block, target)?;
                self.ensure_type(ctx, &rty, &lty, *span)?;
                lty.emit_assign(ctx, &mut self.labels);
                Ok(())
            }
            Statement::ExplicitCall { name, span } => {
                let fid = self.resolve_function(block, name, *span)?;
                self.emit_call(ctx, block, fid, &[], *span)?;
                emit!(ctx, "add rsp, 8");
                Ok(())
            }
            Statement::Compound(stmts) => {
                for s in stmts {
                    self.emit_statement(ctx, block, function, s)?;
                }
                Ok(())
            }
            Statement::While { condition, body, span } => {
                let top = self.labels.fresh("WhileTop");
                let exit = self.labels.fresh("WhileExit");
                emit!(ctx, "{}:", top);
                let cty = self.emit_rvalue(ctx, block, condition)?;
                self.require_integer(&cty, *span)?;
                emit!(ctx, "pop rax");
                emit!(ctx, "test rax, rax");
                emit!(ctx, "jz {}", exit);
                self.emit_statement(ctx, block, function, body)?;
                emit!(ctx, "jmp {}", top);
                emit!(ctx, "{}:", exit);
                Ok(())
            }
            Statement::Repeat { body, condition, span } => {
                let top = self.labels.fresh("RepeatTop");
                emit!(ctx, "{}:", top);
                self.emit_statement(ctx, block, function, body)?;
                let cty = self.emit_rvalue(ctx, block, condition)?;
                self.require_integer(&cty, *span)?;
                emit!(ctx, "pop rax");
                emit!(ctx, "test rax, rax");
                emit!(ctx, "jz {}", top);
                Ok(())
            }
            Statement::For { variable, initial, direction, final_value, body, span } => {
                self.emit_for(ctx, block, function, variable, initial, *direction, final_value, body, *span)
            }
            Statement::If { condition, then_branch, else_branch, span } => {
                let cty = self.emit_rvalue(ctx, block, condition)?;
                self.require_integer(&cty, *span)?;
                let else_label = self.labels.fresh("IfElse");
                let exit_label = self.labels.fresh("IfExit");
                emit!(ctx, "pop rax");
                emit!(ctx, "test rax, rax");
                emit!(ctx, "jz {}", else_label);
                self.emit_statement(ctx, block, function, then_branch)?;
                emit!(ctx, "jmp {}", exit_label);
                emit!(ctx, "{}:", else_label);
                if let Some(else_stmt) = else_branch {
                    self.emit_statement(ctx, block, function, else_stmt)?;
                }
                emit!(ctx, "{}:", exit_label);
                Ok(())
            }
            Statement::Expression(expr) => {
                self.emit_rvalue(ctx, block, expr)?;
                emit!(ctx, "add rsp, 8");
                Ok(())
            }
            Statement::Empty => {
                emit!(ctx, "nop");
                Ok(())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_for(
        &mut self,
        ctx: &mut Emitter,
        block: BlockId,
        function: Option<FuncId>,
        variable: &str,
        initial: &Expression,
        direction: Direction,
        final_value: &Expression,
        body: &Statement,
        span: SourceSpan,
    ) -> Result<()> {
        let (_, resolved) = self
            .scope
            .resolve(block, variable)
            .ok_or_else(|| CompileError::at(ErrorKind::UnresolvedName, format!("unresolved name `{variable}`"), span))?;
        let var_ty = match resolved {
            Resolved::Variable { ty, .. } => ty.clone(),
            _ => {
                return Err(CompileError::at(
                    ErrorKind::NonIntegerCondition,
                    format!("`{variable}` is not a variable"),
                    span,
                ))
            }
        };
        self.require_integer(&var_ty, span)?;
        let var_expr = Expression::Identifier(variable.to_string(), span);

        let ity = self.emit_rvalue(ctx, block, initial)?;
        self.ensure_type(ctx, &ity, &SemanticType::Integer, span)?;
        self.emit_lvalue(ctx, block, &var_expr)?;
        SemanticType::Integer.emit_assign(ctx, &mut self.labels);

        let fty = self.emit_rvalue(ctx, block, final_value)?;
        self.ensure_type(ctx, &fty, &SemanticType::Integer, span)?;

        let top = self.labels.fresh("ForTop");
        let exit = self.labels.fresh("ForExit");
        emit!(ctx, "{}:", top);
        self.emit_lvalue(ctx, block, &var_expr)?;
        emit!(ctx, "mov rax, qword ptr [{}]", registers::LVALUE_PTR);
        emit!(ctx, "cmp rax, qword ptr [rsp]");
        match direction {
            Direction::Up => emit!(ctx, "jg {}", exit),
            Direction::Down => emit!(ctx, "jl {}", exit),
        }
        self.emit_statement(ctx, block, function, body)?;
        self.emit_lvalue(ctx, block, &var_expr)?;
        match direction {
            Direction::Up => emit!(ctx, "inc qword ptr [{}]", registers::LVALUE_PTR),
            Direction::Down => emit!(ctx, "dec qword ptr [{}]", registers::LVALUE_PTR),
        }
        emit!(ctx, "jmp {}", top);
        emit!(ctx, "{}:", exit);
        emit!(ctx, "add rsp, 8");
        Ok(())
    }

    fn require_integer(&self, ty: &SemanticType, span: SourceSpan) -> Result<()> {
        if matches!(ty, SemanticType::Integer) {
            Ok(())
        } else {
            Err(CompileError::at(
                ErrorKind::NonIntegerCondition,
                format!("expected `integer`, found `{}`", ty.signature()),
                span,
            ))
        }
    }

    fn resolve_function(&self, block: BlockId, name: &str, span: SourceSpan) -> Result<FuncId> {
        match self.scope.resolve(block, name) {
            Some((_, Resolved::Function(fid))) => Ok(fid),
            Some(_) => Err(CompileError::at(ErrorKind::UnresolvedName, format!("`{name}` is not callable"), span)),
            None => Err(CompileError::at(ErrorKind::UnresolvedName, format!("unresolved name `{name}`"), span)),
        }
    }

    // ---- expressions -------------------------------------------------------

    fn emit_lvalue(&mut self, ctx: &mut Emitter, block: BlockId, expr: &Expression) -> Result<SemanticType> {
        match expr {
            Expression::Identifier(name, span) => match self.scope.resolve(block, name) {
                Some((level, Resolved::Variable { ty, offset, is_reference })) => {
                    let ty = ty.clone();
                    self.scope.load_frame(ctx, block, level);
                    if is_reference {
                        emit!(ctx, "mov {}, qword ptr [{} + {}*8]", registers::LVALUE_PTR, registers::FRAME_BASE, offset);
                    } else {
                        emit!(ctx, "lea {}, qword ptr [{} + {}*8]", registers::LVALUE_PTR, registers::FRAME_BASE, offset);
                    }
                    Ok(ty)
                }
                Some((_, Resolved::Constant { .. })) => {
                    Err(CompileError::at(ErrorKind::NotAnLValue, format!("`{name}` is a constant"), *span))
                }
                Some((_, Resolved::Function(_))) => {
                    Err(CompileError::at(ErrorKind::NotAnLValue, format!("`{name}` is a function"), *span))
                }
                None => Err(CompileError::at(ErrorKind::UnresolvedName, format!("unresolved name `{name}`"), *span)),
            },
            Expression::RecordAccess(inner, field, span) => {
                let inner_ty = self.emit_lvalue(ctx, block, inner)?;
                let SemanticType::Record(layout) = inner_ty else {
                    return Err(CompileError::at(
                        ErrorKind::TypeMismatch,
                        format!("`.{field}` requires a record, found `{}`", inner_ty.signature()),
                        *span,
                    ));
                };
                let idx = layout.field_index(field).ok_or_else(|| {
                    CompileError::at(ErrorKind::UnresolvedName, format!("no field `{field}` in this record"), *span)
                })?;
                let field_ty = layout.field_type(field).unwrap().clone();
                emit!(ctx, "mov rax, qword ptr [{}]", registers::LVALUE_PTR);
                emit!(ctx, "lea {}, qword ptr [rax + {}*8]", registers::LVALUE_PTR, idx);
                Ok(field_ty)
            }
            Expression::ArrayAccess(inner, indices, span) => {
                // The array's own base address is computed into a separate
                // sub-context so it can be spliced in *after* the index
                // expressions are emitted: index expressions run first in the
                // final assembly, matching their evaluation order in the source.
                let mut base_ctx = Emitter::new("ArrayAccessBase", &mut self.labels);
                let inner_ty = self.emit_lvalue(&mut base_ctx, block, inner)?;
                let SemanticType::Array(layout) = inner_ty else {
                    return Err(CompileError::at(
                        ErrorKind::TypeMismatch,
                        format!("indexing requires an array, found `{}`", inner_ty.signature()),
                        *span,
                    ));
                };
                if indices.len() != layout.bounds.len() {
                    return Err(CompileError::at(
                        ErrorKind::ArityMismatch,
                        format!("array has {} dimension(s), found {} index expression(s)", layout.bounds.len(), indices.len()),
                        *span,
                    ));
                }
                // Pushed in reverse dimension order so the deepest (first-pushed)
                // value is the last dimension, matching the pop order
                // `emit_array_member_offset` expects (dimension 0 first).
                for idx_expr in indices.iter().rev() {
                    let ity = self.emit_rvalue(ctx, block, idx_expr)?;
                    self.ensure_type(ctx, &ity, &SemanticType::Integer, idx_expr.span())?;
                }
                ctx.append(base_ctx);
                emit!(ctx, "mov {}, qword ptr [{}]", registers::FRAME_BASE, registers::LVALUE_PTR);
                emit_array_member_offset(ctx, &layout);
                emit!(ctx, "lea {}, qword ptr [{} + rax*8]", registers::LVALUE_PTR, registers::FRAME_BASE);
                Ok(*layout.element.clone())
            }
            Expression::PointerDereference(inner, span) => {
                let ty = self.emit_rvalue(ctx, block, inner)?;
                let SemanticType::Pointer(inner_ty) = ty else {
                    return Err(CompileError::at(
                        ErrorKind::TypeMismatch,
                        format!("`^` requires a pointer, found `{}`", ty.signature()),
                        *span,
                    ));
                };
                emit!(ctx, "pop {}", registers::LVALUE_PTR);
                Ok(*inner_ty)
            }
            other => Err(CompileError::at(
                ErrorKind::NotAnLValue,
                "expression is not usable as an l-value",
                other.span(),
            )),
        }
    }

    fn emit_rvalue(&mut self, ctx: &mut Emitter, block: BlockId, expr: &Expression) -> Result<SemanticType> {
        match expr {
            Expression::Identifier(name, span) => match self.scope.resolve(block, name) {
                Some((_, Resolved::Constant { ty, label })) => {
                    let ty = ty.clone();
                    let label = label.to_string();
                    emit!(ctx, "lea rax, qword ptr [rip + {}]", label);
                    if matches!(ty, SemanticType::String) {
                        emit!(ctx, "push rax");
                    } else {
                        emit!(ctx, "mov rax, qword ptr [rax]");
                        emit!(ctx, "push rax");
                    }
                    Ok(ty)
                }
                Some((_, Resolved::Function(fid))) => self.emit_call(ctx, block, fid, &[], *span),
                Some((_, Resolved::Variable { .. })) => {
                    let ty = self.emit_lvalue(ctx, block, expr)?;
                    emit!(ctx, "push qword ptr [{}]", registers::LVALUE_PTR);
                    Ok(ty)
                }
                None => Err(CompileError::at(ErrorKind::UnresolvedName, format!("unresolved name `{name}`"), *span)),
            },
            Expression::RecordAccess(..) | Expression::ArrayAccess(..) | Expression::PointerDereference(..) => {
                let ty = self.emit_lvalue(ctx, block, expr)?;
                emit!(ctx, "push qword ptr [{}]", registers::LVALUE_PTR);
                Ok(ty)
            }
            Expression::ConstantLiteral(text, _span) => {
                let (ty, label) = self.install_constant_literal(text);
                emit!(ctx, "lea rax, qword ptr [rip + {}]", label);
                if matches!(ty, SemanticType::String) {
                    emit!(ctx, "push rax");
                } else {
                    emit!(ctx, "mov rax, qword ptr [rax]");
                    emit!(ctx, "push rax");
                }
                Ok(ty)
            }
            Expression::BinaryOp(lhs, op, rhs, span) => self.emit_binary(ctx, block, lhs, *op, rhs, *span),
            Expression::UnaryOp(op, operand, span) => self.emit_unary(ctx, block, *op, operand, *span),
            Expression::CallWithArguments(name, args, span) => {
                let fid = self.resolve_function(block, name, *span)?;
                self.emit_call(ctx, block, fid, args, *span)
            }
        }
    }

    fn emit_binary(
        &mut self,
        ctx: &mut Emitter,
        block: BlockId,
        lhs: &Expression,
        op: BinaryOperator,
        rhs: &Expression,
        span: SourceSpan,
    ) -> Result<SemanticType> {
        let lty = self.emit_rvalue(ctx, block, lhs)?;
        let rty = self.emit_rvalue(ctx, block, rhs)?;

        if op.is_integer_only() {
            self.pop_as_integer(ctx, "rcx", &rty, span)?;
            self.pop_as_integer(ctx, "rax", &lty, span)?;
            match op {
                BinaryOperator::Or => emit!(ctx, "or rax, rcx"),
                BinaryOperator::Xor => emit!(ctx, "xor rax, rcx"),
                BinaryOperator::And => emit!(ctx, "and rax, rcx"),
                BinaryOperator::LeftShift => emit!(ctx, "sal rax, cl"),
                BinaryOperator::RightShift => emit!(ctx, "sar rax, cl"),
                BinaryOperator::Div => {
                    emit!(ctx, "cqo");
                    emit!(ctx, "idiv rcx");
                }
                BinaryOperator::Mod => {
                    emit!(ctx, "cqo");
                    emit!(ctx, "idiv rcx");
                    emit!(ctx, "mov rax, rdx");
                }
                _ => unreachable!("is_integer_only covers exactly these operators"),
            }
            emit!(ctx, "push rax");
            return Ok(SemanticType::Integer);
        }

        if !lty.is_numeric() || !rty.is_numeric() {
            return Err(CompileError::at(
                ErrorKind::TypeMismatch,
                format!("operator requires numeric operands, found `{}` and `{}`", lty.signature(), rty.signature()),
                span,
            ));
        }
        let use_double = matches!(lty, SemanticType::Double) || matches!(rty, SemanticType::Double) || op == BinaryOperator::Slash;

        if use_double {
            self.pop_as_double(ctx, "xmm1", &rty);
            self.pop_as_double(ctx, "xmm0", &lty);
            match op {
                BinaryOperator::Plus => emit!(ctx, "addsd xmm0, xmm1"),
                BinaryOperator::Minus => emit!(ctx, "subsd xmm0, xmm1"),
                BinaryOperator::Times => emit!(ctx, "mulsd xmm0, xmm1"),
                BinaryOperator::Slash => emit!(ctx, "divsd xmm0, xmm1"),
                BinaryOperator::Equal => emit!(ctx, "cmpeqsd xmm0, xmm1"),
                BinaryOperator::NotEqual => emit!(ctx, "cmpneqsd xmm0, xmm1"),
                BinaryOperator::LessThan => emit!(ctx, "cmpltsd xmm0, xmm1"),
                BinaryOperator::GreaterThan => emit!(ctx, "cmpnlesd xmm0, xmm1"),
                BinaryOperator::LessOrEqual => emit!(ctx, "cmplesd xmm0, xmm1"),
                BinaryOperator::GreaterOrEqual => emit!(ctx, "cmpnltsd xmm0, xmm1"),
                _ => unreachable!(),
            }
            if op.is_comparison() {
                emit!(ctx, "movq rax, xmm0");
                emit!(ctx, "and rax, 1");
                emit!(ctx, "push rax");
                Ok(SemanticType::Integer)
            } else {
                emit!(ctx, "sub rsp, 8");
                emit!(ctx, "movq qword ptr [rsp], xmm0");
                Ok(SemanticType::Double)
            }
        } else {
            emit!(ctx, "pop rcx");
            emit!(ctx, "pop rax");
            match op {
                BinaryOperator::Plus => emit!(ctx, "add rax, rcx"),
                BinaryOperator::Minus => emit!(ctx, "sub rax, rcx"),
                BinaryOperator::Times => emit!(ctx, "imul rax, rcx"),
                _ => {
                    emit!(ctx, "cmp rax, rcx");
                    let setcc = match op {
                        BinaryOperator::Equal => "sete",
                        BinaryOperator::NotEqual => "setne",
                        BinaryOperator::LessThan => "setl",
                        BinaryOperator::GreaterThan => "setg",
                        BinaryOperator::LessOrEqual => "setle",
                        BinaryOperator::GreaterOrEqual => "setge",
                        _ => unreachable!(),
                    };
                    emit!(ctx, "{} al", setcc);
                    emit!(ctx, "movzx rax, al");
                }
            }
            emit!(ctx, "push rax");
            Ok(SemanticType::Integer)
        }
    }

    fn emit_unary(&mut self, ctx: &mut Emitter, block: BlockId, op: UnaryOperator, operand: &Expression, span: SourceSpan) -> Result<SemanticType> {
        match op {
            UnaryOperator::Not => {
                let ty = self.emit_rvalue(ctx, block, operand)?;
                self.require_integer(&ty, span)?;
                emit!(ctx, "pop rax");
                emit!(ctx, "test rax, rax");
                emit!(ctx, "sete al");
                emit!(ctx, "movzx rax, al");
                emit!(ctx, "push rax");
                Ok(SemanticType::Integer)
            }
            UnaryOperator::Plus => {
                let ty = self.emit_rvalue(ctx, block, operand)?;
                if !ty.is_numeric() {
                    return Err(CompileError::at(
                        ErrorKind::TypeMismatch,
                        format!("unary `+` requires a numeric operand, found `{}`", ty.signature()),
                        span,
                    ));
                }
                Ok(ty)
            }
            UnaryOperator::Minus => {
                let ty = self.emit_rvalue(ctx, block, operand)?;
                match ty {
                    SemanticType::Integer => {
                        emit!(ctx, "pop rax");
                        emit!(ctx, "neg rax");
                        emit!(ctx, "push rax");
                        Ok(SemanticType::Integer)
                    }
                    SemanticType::Double => {
                        emit!(ctx, "movq xmm0, qword ptr [rsp]");
                        emit!(ctx, "pxor xmm1, xmm1");
                        emit!(ctx, "subsd xmm1, xmm0");
                        emit!(ctx, "movq qword ptr [rsp], xmm1");
                        Ok(SemanticType::Double)
                    }
                    _ => Err(CompileError::at(
                        ErrorKind::TypeMismatch,
                        format!("unary `-` requires a numeric operand, found `{}`", ty.signature()),
                        span,
                    )),
                }
            }
            UnaryOperator::At => {
                if !operand.is_lvalue_form() {
                    return Err(CompileError::at(ErrorKind::NotAnLValue, "`@` requires an l-value operand", span));
                }
                let ty = self.emit_lvalue(ctx, block, operand)?;
                emit!(ctx, "push {}", registers::LVALUE_PTR);
                Ok(SemanticType::Pointer(Box::new(ty)))
            }
        }
    }

    fn emit_call(&mut self, ctx: &mut Emitter, block: BlockId, fid: FuncId, args: &[Expression], span: SourceSpan) -> Result<SemanticType> {
        let func = self.scope.function(fid).clone();
        if args.len() != func.params.len() {
            return Err(CompileError::at(
                ErrorKind::ArityMismatch,
                format!("`{}` expects {} argument(s), found {}", func.name, func.params.len(), args.len()),
                span,
            ));
        }

        // Static links for every level below the callee's own, read off this
        // call site's own frame chain.
        for lvl in 0..func.level {
            self.scope.load_frame(ctx, block, lvl);
            emit!(ctx, "push {}", registers::FRAME_BASE);
        }

        for (arg, param) in args.iter().zip(func.params.iter()) {
            if param.by_reference {
                if !arg.is_lvalue_form() {
                    return Err(CompileError::at(
                        ErrorKind::NotAnLValue,
                        format!("argument to by-reference parameter `{}` must be an l-value", param.name),
                        arg.span(),
                    ));
                }
                let arg_ty = self.emit_lvalue(ctx, block, arg)?;
                if arg_ty.signature() != param.ty.signature() {
                    return Err(CompileError::at(
                        ErrorKind::TypeMismatch,
                        format!(
                            "argument of type `{}` does not match by-reference parameter `{}` of type `{}`",
                            arg_ty.signature(),
                            param.name,
                            param.ty.signature()
                        ),
                        arg.span(),
                    ));
                }
                emit!(ctx, "push {}", registers::LVALUE_PTR);
            } else {
                let arg_ty = self.emit_rvalue(ctx, block, arg)?;
                self.ensure_type(ctx, &arg_ty, &param.ty, arg.span())?;
            }
        }

        emit!(ctx, "call {}", func.label);

        let pushed_words = func.level + args.len();
        if pushed_words > 0 {
            emit!(ctx, "add rsp, {}", pushed_words * 8);
        }
        emit!(ctx, "push {}", registers::RETURN_VALUE);
        Ok(func.return_type.clone().unwrap_or(SemanticType::Integer))
    }

    /// Coerces the value sitting on top of the stack from `original` to `target`,
    /// in place. `Integer`<->`Double` convert; anything else must already match
    /// structurally.
    fn ensure_type(&self, ctx: &mut Emitter, original: &SemanticType, target: &SemanticType, span: SourceSpan) -> Result<()> {
        match (original, target) {
            (SemanticType::Double, SemanticType::Integer) => {
                emit!(ctx, "movq xmm0, qword ptr [rsp]");
                emit!(ctx, "cvttsd2si rax, xmm0");
                emit!(ctx, "mov qword ptr [rsp], rax");
                Ok(())
            }
            (SemanticType::Integer, SemanticType::Double) => {
                emit!(ctx, "cvtsi2sd xmm0, qword ptr [rsp]");
                emit!(ctx, "movq qword ptr [rsp], xmm0");
                Ok(())
            }
            _ if original.signature() == target.signature() => Ok(()),
            _ => Err(CompileError::at(
                ErrorKind::TypeMismatch,
                format!("expected `{}`, found `{}`", target.signature(), original.signature()),
                span,
            )),
        }
    }

    /// Pops the stack-top word into `reg` as a 64-bit integer, converting from
    /// `Double` with `cvttsd2si` if needed. Used by the integer-only operators.
    fn pop_as_integer(&self, ctx: &mut Emitter, reg: &str, ty: &SemanticType, span: SourceSpan) -> Result<()> {
        match ty {
            SemanticType::Integer => {
                emit!(ctx, "pop {}", reg);
                Ok(())
            }
            SemanticType::Double => {
                emit!(ctx, "movq xmm0, qword ptr [rsp]");
                emit!(ctx, "add rsp, 8");
                emit!(ctx, "cvttsd2si {}, xmm0", reg);
                Ok(())
            }
            _ => Err(CompileError::at(ErrorKind::TypeMismatch, "integer-only operator requires a numeric operand", span)),
        }
    }

    /// Pops the stack-top word into `xmm` as a double, converting from `Integer`
    /// with `cvtsi2sd` if needed. Caller has already checked `ty` is numeric.
    fn pop_as_double(&self, ctx: &mut Emitter, xmm: &str, ty: &SemanticType) {
        match ty {
            SemanticType::Double => {
                emit!(ctx, "movq {}, qword ptr [rsp]", xmm);
                emit!(ctx, "add rsp, 8");
            }
            SemanticType::Integer => {
                emit!(ctx, "cvtsi2sd {}, qword ptr [rsp]", xmm);
                emit!(ctx, "add rsp, 8");
            }
            _ => unreachable!("caller already rejected non-numeric operands"),
        }
    }
}

fn sanitize_label(name: &str) -> String {
    name.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect()
}

fn classify_literal(text: &str) -> SemanticType {
    if text.starts_with('\'') {
        SemanticType::String
    } else if text.contains('.') || text.to_ascii_lowercase().contains('e') {
        SemanticType::Double
    } else {
        SemanticType::Integer
    }
}

fn decode_string_literal(literal: &str) -> Vec<u8> {
    let inner = &literal[1..literal.len().saturating_sub(1)];
    let mut bytes = Vec::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' && chars.peek() == Some(&'\'') {
            chars.next();
            bytes.push(b'\'');
        } else {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        }
    }
    bytes
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}
