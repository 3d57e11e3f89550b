//! Plain match-based AST pretty-printer, used by the `-p` flag.
//!
//! Replaces the reflective, stream-operator-dispatch printer the source system
//! built around `NamedPrintable<T>` and RTTI-demangled class names: there is no
//! heterogeneous dispatch here, just one function per AST sum type matching on
//! its variants and indenting as it recurses.

use std::fmt::Write as _;

use crate::ast::{
    Block, Callable, Constant, Expression, Parameter, Program, RecordField, Statement, Type,
    TypeAlias, Variable,
};

const INDENT_WIDTH: usize = 2;

struct Printer {
    out: String,
    indent: usize,
}

impl Printer {
    fn new() -> Self {
        Printer { out: String::new(), indent: 0 }
    }

    fn line(&mut self, text: &str) {
        let _ = writeln!(self.out, "{}{}", " ".repeat(self.indent * INDENT_WIDTH), text);
    }

    fn indented(&mut self, f: impl FnOnce(&mut Self)) {
        self.indent += 1;
        f(self);
        self.indent -= 1;
    }
}

/// Renders `program` as an indented tree, in the shape a reader of Pascal
/// source would expect: program name, then the top-level block.
pub fn print_program(program: &Program) -> String {
    let mut p = Printer::new();
    p.line(&format!("program {}", program.name));
    p.indented(|p| print_block(p, &program.block));
    p.out
}

fn print_block(p: &mut Printer, block: &Block) {
    if !block.constants.is_empty() {
        p.line("const");
        p.indented(|p| {
            for c in &block.constants {
                print_constant(p, c);
            }
        });
    }
    if !block.type_aliases.is_empty() {
        p.line("type");
        p.indented(|p| {
            for t in &block.type_aliases {
                print_type_alias(p, t);
            }
        });
    }
    if !block.variables.is_empty() {
        p.line("var");
        p.indented(|p| {
            for v in &block.variables {
                print_variable(p, v);
            }
        });
    }
    for c in &block.callables {
        print_callable(p, c);
    }
    p.line("begin");
    p.indented(|p| print_statement(p, &block.body));
    p.line("end");
}

fn print_constant(p: &mut Printer, c: &Constant) {
    p.line(&format!("{} = {}", c.name, c.literal));
}

fn print_type_alias(p: &mut Printer, t: &TypeAlias) {
    p.line(&format!("{} = {}", t.name, type_signature(&t.ty)));
}

fn print_variable(p: &mut Printer, v: &Variable) {
    p.line(&format!("{}: {}", v.name, type_signature(&v.ty)));
}

fn print_callable(p: &mut Printer, c: &Callable) {
    let params = c
        .parameters
        .iter()
        .map(|param| print_parameter(param))
        .collect::<Vec<_>>()
        .join(", ");
    match &c.return_type {
        Some(ret) => p.line(&format!("function {}({}): {}", c.name, params, ret)),
        None => p.line(&format!("procedure {}({})", c.name, params)),
    }
    p.indented(|p| print_block(p, &c.block));
}

fn print_parameter(param: &Parameter) -> String {
    if param.by_reference {
        format!("var {}: {}", param.name, type_signature(&param.ty))
    } else {
        format!("{}: {}", param.name, type_signature(&param.ty))
    }
}

fn type_signature(ty: &Type) -> String {
    match ty {
        Type::TypeIdentifier(name, _) => name.clone(),
        Type::RecordType(fields, _) => {
            let fields = fields
                .iter()
                .map(print_record_field)
                .collect::<Vec<_>>()
                .join("; ");
            format!("record {} end", fields)
        }
        Type::ArraySchema { bounds, element_type, .. } => {
            let bounds = bounds
                .iter()
                .map(|b| format!("{}..{}", b.min, b.max))
                .collect::<Vec<_>>()
                .join(", ");
            format!("array [{}] of {}", bounds, type_signature(element_type))
        }
        Type::PointerType(inner, _) => format!("^{}", type_signature(inner)),
    }
}

fn print_record_field(field: &RecordField) -> String {
    format!("{}: {}", field.name, type_signature(&field.ty))
}

fn print_statement(p: &mut Printer, stmt: &Statement) {
    match stmt {
        Statement::Assignment { target, value, .. } => {
            p.line(&format!("{} := {}", print_expression(target), print_expression(value)));
        }
        Statement::ExplicitCall { name, .. } => {
            p.line(&format!("{}()", name));
        }
        Statement::Compound(statements) => {
            p.line("begin");
            p.indented(|p| {
                for s in statements {
                    print_statement(p, s);
                }
            });
            p.line("end");
        }
        Statement::While { condition, body, .. } => {
            p.line(&format!("while {} do", print_expression(condition)));
            p.indented(|p| print_statement(p, body));
        }
        Statement::Repeat { body, condition, .. } => {
            p.line("repeat");
            p.indented(|p| print_statement(p, body));
            p.line(&format!("until {}", print_expression(condition)));
        }
        Statement::For { variable, initial, direction, final_value, body, .. } => {
            let dir = match direction {
                crate::ast::Direction::Up => "to",
                crate::ast::Direction::Down => "downto",
            };
            p.line(&format!(
                "for {} := {} {} {} do",
                variable,
                print_expression(initial),
                dir,
                print_expression(final_value)
            ));
            p.indented(|p| print_statement(p, body));
        }
        Statement::If { condition, then_branch, else_branch, .. } => {
            p.line(&format!("if {} then", print_expression(condition)));
            p.indented(|p| print_statement(p, then_branch));
            if let Some(else_branch) = else_branch {
                p.line("else");
                p.indented(|p| print_statement(p, else_branch));
            }
        }
        Statement::Expression(expr) => {
            p.line(&print_expression(expr));
        }
        Statement::Empty => {
            p.line("(empty)");
        }
    }
}

fn print_expression(expr: &Expression) -> String {
    match expr {
        Expression::Identifier(name, _) => name.clone(),
        Expression::RecordAccess(base, field, _) => format!("{}.{}", print_expression(base), field),
        Expression::ArrayAccess(base, indices, _) => {
            let indices = indices.iter().map(print_expression).collect::<Vec<_>>().join(", ");
            format!("{}[{}]", print_expression(base), indices)
        }
        Expression::PointerDereference(base, _) => format!("{}^", print_expression(base)),
        Expression::ConstantLiteral(literal, _) => literal.clone(),
        Expression::BinaryOp(lhs, op, rhs, _) => {
            format!("({} {} {})", print_expression(lhs), binary_operator_text(*op), print_expression(rhs))
        }
        Expression::UnaryOp(op, operand, _) => {
            format!("({}{})", unary_operator_text(*op), print_expression(operand))
        }
        Expression::CallWithArguments(name, args, _) => {
            let args = args.iter().map(print_expression).collect::<Vec<_>>().join(", ");
            format!("{}({})", name, args)
        }
    }
}

fn binary_operator_text(op: crate::ast::BinaryOperator) -> &'static str {
    use crate::ast::BinaryOperator::*;
    match op {
        Equal => "=",
        NotEqual => "<>",
        LessThan => "<",
        GreaterThan => ">",
        LessOrEqual => "<=",
        GreaterOrEqual => ">=",
        Plus => "+",
        Minus => "-",
        Or => "or",
        Xor => "xor",
        Times => "*",
        Slash => "/",
        Div => "div",
        Mod => "mod",
        And => "and",
        LeftShift => "shl",
        RightShift => "shr",
    }
}

fn unary_operator_text(op: crate::ast::UnaryOperator) -> &'static str {
    use crate::ast::UnaryOperator::*;
    match op {
        Not => "not ",
        Plus => "+",
        Minus => "-",
        At => "@",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::SourceSpan;

    fn span() -> SourceSpan {
        SourceSpan::new(1, 1)
    }

    #[test]
    fn prints_program_header_and_empty_body() {
        let program = Program {
            name: "Demo".into(),
            block: Block { body: Statement::Empty, ..Block::default() },
        };
        let text = print_program(&program);
        assert!(text.starts_with("program Demo\n"));
        assert!(text.contains("begin"));
        assert!(text.contains("(empty)"));
        assert!(text.contains("end"));
    }

    #[test]
    fn prints_nested_assignment_with_parenthesized_binary_op() {
        let stmt = Statement::Assignment {
            target: Expression::Identifier("x".into(), span()),
            value: Expression::BinaryOp(
                Box::new(Expression::Identifier("a".into(), span())),
                crate::ast::BinaryOperator::Plus,
                Box::new(Expression::Identifier("b".into(), span())),
                span(),
            ),
            span: span(),
        };
        let mut p = Printer::new();
        print_statement(&mut p, &stmt);
        assert_eq!(p.out.trim(), "x := (a + b)");
    }

    #[test]
    fn prints_nested_callable_block_indented() {
        let program = Program {
            name: "Demo".into(),
            block: Block {
                callables: vec![Callable {
                    name: "helper".into(),
                    parameters: vec![],
                    return_type: None,
                    block: Block { body: Statement::Empty, ..Block::default() },
                    span: span(),
                }],
                body: Statement::Empty,
                ..Block::default()
            },
        };
        let text = print_program(&program);
        let lines: Vec<&str> = text.lines().collect();
        let proc_line = lines.iter().position(|l| l.contains("procedure helper")).unwrap();
        assert!(lines[proc_line].starts_with("  procedure"));
    }

    #[test]
    fn array_type_signature_orders_dimensions() {
        let ty = Type::ArraySchema {
            bounds: vec![
                crate::ast::ArrayBound { min: 1, max: 3 },
                crate::ast::ArrayBound { min: 1, max: 2 },
            ],
            element_type: Box::new(Type::TypeIdentifier("integer".into(), span())),
            span: span(),
        };
        assert_eq!(type_signature(&ty), "array [1..3, 1..2] of integer");
    }
}
