//! Recursive-descent parser producing an [`ast::Program`].
//!
//! Expression parsing follows the classic four-level Pascal precedence ladder
//! (relational, additive, multiplicative, unary) rather than a generic climbing
//! loop with a table, matching the grammar's own stratification.

use crate::ast::{
    ArrayBound, Block, BinaryOperator, Callable, Constant, Direction, Expression, Parameter,
    Program, RecordField, SourceSpan, Statement, Type, TypeAlias, UnaryOperator, Variable,
};
use crate::errors::{CompileError, ErrorKind, Result};
use crate::lexer::{Lexer, Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(source: &str, trace: bool) -> Result<Self> {
        let tokens = Lexer::new(source, trace).tokenize()?;
        Ok(Parser { tokens, pos: 0 })
    }

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn span(&self) -> SourceSpan {
        self.tokens[self.pos].span
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Token> {
        if self.peek() == kind {
            Ok(self.advance())
        } else {
            Err(CompileError::at(
                ErrorKind::Syntax,
                format!("expected {kind:?}, found {:?}", self.peek()),
                self.span(),
            ))
        }
    }

    fn expect_identifier(&mut self) -> Result<(String, SourceSpan)> {
        let span = self.span();
        match self.advance().kind {
            TokenKind::Identifier(name) => Ok((name, span)),
            other => Err(CompileError::at(
                ErrorKind::Syntax,
                format!("expected identifier, found {other:?}"),
                span,
            )),
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    pub fn parse_program(&mut self) -> Result<Program> {
        self.expect(&TokenKind::Program)?;
        let (name, _) = self.expect_identifier()?;
        self.expect(&TokenKind::Semicolon)?;
        let block = self.parse_block()?;
        self.expect(&TokenKind::Dot)?;
        Ok(Program { name, block })
    }

    fn parse_block(&mut self) -> Result<Block> {
        let mut block = Block::default();

        if self.eat(&TokenKind::Const) {
            loop {
                let (name, span) = self.expect_identifier()?;
                self.expect(&TokenKind::Equal)?;
                let literal = self.parse_literal_text()?;
                self.expect(&TokenKind::Semicolon)?;
                block.constants.push(Constant { name, literal, span });
                if !matches!(self.peek(), TokenKind::Identifier(_)) {
                    break;
                }
            }
        }

        if self.eat(&TokenKind::Type) {
            loop {
                let (name, span) = self.expect_identifier()?;
                self.expect(&TokenKind::Equal)?;
                let ty = self.parse_type()?;
                self.expect(&TokenKind::Semicolon)?;
                block.type_aliases.push(TypeAlias { name, ty, span });
                if !matches!(self.peek(), TokenKind::Identifier(_)) {
                    break;
                }
            }
        }

        if self.eat(&TokenKind::Var) {
            loop {
                let names = self.parse_identifier_list()?;
                self.expect(&TokenKind::Colon)?;
                let ty = self.parse_type()?;
                self.expect(&TokenKind::Semicolon)?;
                for (name, span) in names {
                    block.variables.push(Variable { name, ty: ty.clone(), span });
                }
                if !matches!(self.peek(), TokenKind::Identifier(_)) {
                    break;
                }
            }
        }

        loop {
            match self.peek() {
                TokenKind::Function => block.callables.push(self.parse_callable(false)?),
                TokenKind::Procedure => block.callables.push(self.parse_callable(true)?),
                _ => break,
            }
        }

        block.body = self.parse_compound_statement()?;
        Ok(block)
    }

    fn parse_identifier_list(&mut self) -> Result<Vec<(String, SourceSpan)>> {
        let mut names = vec![self.expect_identifier()?];
        while self.eat(&TokenKind::Comma) {
            names.push(self.expect_identifier()?);
        }
        Ok(names)
    }

    fn parse_literal_text(&mut self) -> Result<String> {
        let span = self.span();
        match self.advance().kind {
            TokenKind::IntegerLiteral(t) => Ok(t),
            TokenKind::DoubleLiteral(t) => Ok(t),
            TokenKind::StringLiteral(t) => Ok(t),
            TokenKind::Minus => {
                let inner = self.parse_literal_text()?;
                Ok(format!("-{inner}"))
            }
            other => Err(CompileError::at(
                ErrorKind::Syntax,
                format!("expected a literal, found {other:?}"),
                span,
            )),
        }
    }

    fn parse_type(&mut self) -> Result<Type> {
        let span = self.span();
        match self.peek().clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Type::TypeIdentifier(name, span))
            }
            TokenKind::Caret => {
                self.advance();
                let inner = self.parse_type()?;
                Ok(Type::PointerType(Box::new(inner), span))
            }
            TokenKind::Record => {
                self.advance();
                let mut fields = Vec::new();
                while !matches!(self.peek(), TokenKind::End) {
                    let names = self.parse_identifier_list()?;
                    self.expect(&TokenKind::Colon)?;
                    let ty = self.parse_type()?;
                    for (name, _) in names {
                        fields.push(RecordField { name, ty: ty.clone() });
                    }
                    if !self.eat(&TokenKind::Semicolon) {
                        break;
                    }
                }
                self.expect(&TokenKind::End)?;
                Ok(Type::RecordType(fields, span))
            }
            TokenKind::Array => {
                self.advance();
                self.expect(&TokenKind::LBracket)?;
                let mut bounds = Vec::new();
                loop {
                    bounds.push(self.parse_array_bound()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBracket)?;
                self.expect(&TokenKind::Of)?;
                let element_type = Box::new(self.parse_type()?);
                Ok(Type::ArraySchema { bounds, element_type, span })
            }
            other => Err(CompileError::at(
                ErrorKind::Syntax,
                format!("expected a type, found {other:?}"),
                span,
            )),
        }
    }

    fn parse_array_bound(&mut self) -> Result<ArrayBound> {
        let min = self.parse_signed_integer()?;
        self.expect(&TokenKind::DotDot)?;
        let max = self.parse_signed_integer()?;
        Ok(ArrayBound { min, max })
    }

    fn parse_signed_integer(&mut self) -> Result<i64> {
        let span = self.span();
        let negative = self.eat(&TokenKind::Minus);
        match self.advance().kind {
            TokenKind::IntegerLiteral(text) => {
                let value: i64 = text
                    .parse()
                    .map_err(|_| CompileError::at(ErrorKind::InvalidArrayBound, "bound is not an integer", span))?;
                Ok(if negative { -value } else { value })
            }
            other => Err(CompileError::at(
                ErrorKind::InvalidArrayBound,
                format!("expected an integer bound, found {other:?}"),
                span,
            )),
        }
    }

    fn parse_callable(&mut self, is_procedure: bool) -> Result<Callable> {
        let span = self.span();
        self.advance(); // `function` or `procedure`
        let (name, _) = self.expect_identifier()?;
        let mut parameters = Vec::new();
        if self.eat(&TokenKind::LParen) {
            if !matches!(self.peek(), TokenKind::RParen) {
                loop {
                    let by_reference = self.eat(&TokenKind::Var);
                    let names = self.parse_identifier_list()?;
                    self.expect(&TokenKind::Colon)?;
                    let ty = self.parse_type()?;
                    for (pname, _) in names {
                        parameters.push(Parameter { name: pname, by_reference, ty: ty.clone() });
                    }
                    if !self.eat(&TokenKind::Semicolon) {
                        break;
                    }
                }
            }
            self.expect(&TokenKind::RParen)?;
        }
        let return_type = if !is_procedure {
            self.expect(&TokenKind::Colon)?;
            let (ty_name, _) = self.expect_identifier()?;
            Some(ty_name)
        } else {
            None
        };
        self.expect(&TokenKind::Semicolon)?;
        let block = self.parse_block()?;
        self.expect(&TokenKind::Semicolon)?;
        Ok(Callable { name, parameters, return_type, block, span })
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        let span = self.span();
        match self.peek().clone() {
            TokenKind::Begin => self.parse_compound_statement(),
            TokenKind::While => {
                self.advance();
                let condition = self.parse_expression()?;
                self.expect(&TokenKind::Do)?;
                let body = Box::new(self.parse_statement()?);
                Ok(Statement::While { condition, body, span })
            }
            TokenKind::Repeat => {
                self.advance();
                let mut statements = vec![self.parse_statement()?];
                while self.eat(&TokenKind::Semicolon) {
                    if matches!(self.peek(), TokenKind::Until) {
                        break;
                    }
                    statements.push(self.parse_statement()?);
                }
                self.expect(&TokenKind::Until)?;
                let condition = self.parse_expression()?;
                let body = Box::new(Statement::Compound(statements));
                Ok(Statement::Repeat { body, condition, span })
            }
            TokenKind::For => {
                self.advance();
                let (variable, _) = self.expect_identifier()?;
                self.expect(&TokenKind::Assign)?;
                let initial = self.parse_expression()?;
                let direction = if self.eat(&TokenKind::To) {
                    Direction::Up
                } else {
                    self.expect(&TokenKind::Downto)?;
                    Direction::Down
                };
                let final_value = self.parse_expression()?;
                self.expect(&TokenKind::Do)?;
                let body = Box::new(self.parse_statement()?);
                Ok(Statement::For { variable, initial, direction, final_value, body, span })
            }
            TokenKind::If => {
                self.advance();
                let condition = self.parse_expression()?;
                self.expect(&TokenKind::Then)?;
                let then_branch = Box::new(self.parse_statement()?);
                let else_branch = if self.eat(&TokenKind::Else) {
                    Some(Box::new(self.parse_statement()?))
                } else {
                    None
                };
                Ok(Statement::If { condition, then_branch, else_branch, span })
            }
            TokenKind::Identifier(_) => self.parse_identifier_led_statement(span),
            _ => Ok(Statement::Empty),
        }
    }

    fn parse_identifier_led_statement(&mut self, span: SourceSpan) -> Result<Statement> {
        let (name, name_span) = self.expect_identifier()?;

        if self.eat(&TokenKind::LParen) {
            let arguments = self.parse_argument_list()?;
            self.expect(&TokenKind::RParen)?;
            let call = Expression::CallWithArguments(name, arguments, span);
            let expr = self.parse_postfix_chain(call)?;
            return self.finish_designator_statement(expr, span);
        }

        let base = Expression::Identifier(name.clone(), name_span);
        let expr = self.parse_postfix_chain(base)?;
        match &expr {
            Expression::Identifier(..) if !matches!(self.peek(), TokenKind::Assign) => {
                Ok(Statement::ExplicitCall { name, span })
            }
            _ => self.finish_designator_statement(expr, span),
        }
    }

    fn finish_designator_statement(&mut self, target: Expression, span: SourceSpan) -> Result<Statement> {
        if self.eat(&TokenKind::Assign) {
            let value = self.parse_expression()?;
            Ok(Statement::Assignment { target, value, span })
        } else {
            Ok(Statement::Expression(target))
        }
    }

    fn parse_postfix_chain(&mut self, mut expr: Expression) -> Result<Expression> {
        loop {
            match self.peek() {
                TokenKind::Dot => {
                    let span = self.span();
                    self.advance();
                    let (field, _) = self.expect_identifier()?;
                    expr = Expression::RecordAccess(Box::new(expr), field, span);
                }
                TokenKind::LBracket => {
                    let span = self.span();
                    self.advance();
                    let mut indices = vec![self.parse_expression()?];
                    while self.eat(&TokenKind::Comma) {
                        indices.push(self.parse_expression()?);
                    }
                    self.expect(&TokenKind::RBracket)?;
                    expr = Expression::ArrayAccess(Box::new(expr), indices, span);
                }
                TokenKind::Caret => {
                    let span = self.span();
                    self.advance();
                    expr = Expression::PointerDereference(Box::new(expr), span);
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_compound_statement(&mut self) -> Result<Statement> {
        self.expect(&TokenKind::Begin)?;
        let mut statements = Vec::new();
        if !matches!(self.peek(), TokenKind::End) {
            statements.push(self.parse_statement()?);
            while self.eat(&TokenKind::Semicolon) {
                if matches!(self.peek(), TokenKind::End) {
                    break;
                }
                statements.push(self.parse_statement()?);
            }
        }
        self.expect(&TokenKind::End)?;
        Ok(Statement::Compound(statements))
    }

    fn parse_argument_list(&mut self) -> Result<Vec<Expression>> {
        let mut args = Vec::new();
        if !matches!(self.peek(), TokenKind::RParen) {
            args.push(self.parse_expression()?);
            while self.eat(&TokenKind::Comma) {
                args.push(self.parse_expression()?);
            }
        }
        Ok(args)
    }

    // Relational level: lowest precedence, non-associative in the source grammar
    // but left-folded here for simplicity (chained comparisons are vanishingly
    // rare and still parse to something type-checking will reject).
    pub fn parse_expression(&mut self) -> Result<Expression> {
        let mut left = self.parse_simple_expression()?;
        loop {
            let op = match self.peek() {
                TokenKind::Equal => BinaryOperator::Equal,
                TokenKind::NotEqual => BinaryOperator::NotEqual,
                TokenKind::Less => BinaryOperator::LessThan,
                TokenKind::Greater => BinaryOperator::GreaterThan,
                TokenKind::LessEqual => BinaryOperator::LessOrEqual,
                TokenKind::GreaterEqual => BinaryOperator::GreaterOrEqual,
                _ => break,
            };
            let span = self.span();
            self.advance();
            let right = self.parse_simple_expression()?;
            left = Expression::BinaryOp(Box::new(left), op, Box::new(right), span);
        }
        Ok(left)
    }

    fn parse_simple_expression(&mut self) -> Result<Expression> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinaryOperator::Plus,
                TokenKind::Minus => BinaryOperator::Minus,
                TokenKind::KwOr => BinaryOperator::Or,
                TokenKind::KwXor => BinaryOperator::Xor,
                _ => break,
            };
            let span = self.span();
            self.advance();
            let right = self.parse_term()?;
            left = Expression::BinaryOp(Box::new(left), op, Box::new(right), span);
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expression> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinaryOperator::Times,
                TokenKind::Slash => BinaryOperator::Slash,
                TokenKind::KwDiv => BinaryOperator::Div,
                TokenKind::KwMod => BinaryOperator::Mod,
                TokenKind::KwAnd => BinaryOperator::And,
                TokenKind::KwShl => BinaryOperator::LeftShift,
                TokenKind::KwShr => BinaryOperator::RightShift,
                _ => break,
            };
            let span = self.span();
            self.advance();
            let right = self.parse_factor()?;
            left = Expression::BinaryOp(Box::new(left), op, Box::new(right), span);
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expression> {
        let span = self.span();
        match self.peek().clone() {
            TokenKind::KwNot => {
                self.advance();
                let operand = self.parse_factor()?;
                Ok(Expression::UnaryOp(UnaryOperator::Not, Box::new(operand), span))
            }
            TokenKind::Minus => {
                self.advance();
                let operand = self.parse_factor()?;
                Ok(Expression::UnaryOp(UnaryOperator::Minus, Box::new(operand), span))
            }
            TokenKind::Plus => {
                self.advance();
                let operand = self.parse_factor()?;
                Ok(Expression::UnaryOp(UnaryOperator::Plus, Box::new(operand), span))
            }
            TokenKind::At => {
                self.advance();
                let operand = self.parse_factor()?;
                Ok(Expression::UnaryOp(UnaryOperator::At, Box::new(operand), span))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(&TokenKind::RParen)?;
                self.parse_postfix_chain(inner)
            }
            TokenKind::IntegerLiteral(t) => {
                self.advance();
                Ok(Expression::ConstantLiteral(t, span))
            }
            TokenKind::DoubleLiteral(t) => {
                self.advance();
                Ok(Expression::ConstantLiteral(t, span))
            }
            TokenKind::StringLiteral(t) => {
                self.advance();
                Ok(Expression::ConstantLiteral(t, span))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                if self.eat(&TokenKind::LParen) {
                    let args = self.parse_argument_list()?;
                    self.expect(&TokenKind::RParen)?;
                    let call = Expression::CallWithArguments(name, args, span);
                    self.parse_postfix_chain(call)
                } else {
                    let base = Expression::Identifier(name, span);
                    self.parse_postfix_chain(base)
                }
            }
            other => Err(CompileError::at(
                ErrorKind::Syntax,
                format!("unexpected token in expression: {other:?}"),
                span,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Program {
        Parser::new(src, false).unwrap().parse_program().unwrap()
    }

    #[test]
    fn parses_minimal_program() {
        let program = parse("program Empty; begin end.");
        assert_eq!(program.name, "Empty");
        assert!(matches!(program.block.body, Statement::Compound(ref s) if s.is_empty()));
    }

    #[test]
    fn parses_var_and_assignment() {
        let program = parse("program P; var x: integer; begin x := 1 + 2 end.");
        assert_eq!(program.block.variables.len(), 1);
        match &program.block.body {
            Statement::Compound(stmts) => {
                assert_eq!(stmts.len(), 1);
                assert!(matches!(stmts[0], Statement::Assignment { .. }));
            }
            _ => panic!("expected compound"),
        }
    }

    #[test]
    fn multiplicative_binds_tighter_than_additive() {
        let program = parse("program P; var x: integer; begin x := 1 + 2 * 3 end.");
        let Statement::Compound(stmts) = &program.block.body else { panic!() };
        let Statement::Assignment { value, .. } = &stmts[0] else { panic!() };
        match value {
            Expression::BinaryOp(lhs, BinaryOperator::Plus, rhs, _) => {
                assert!(matches!(**lhs, Expression::ConstantLiteral(..)));
                assert!(matches!(**rhs, Expression::BinaryOp(_, BinaryOperator::Times, _, _)));
            }
            _ => panic!("expected top-level plus"),
        }
    }

    #[test]
    fn parses_array_and_record_types() {
        let program = parse(
            "program P; type Vec = array [1..3] of integer; var r: record x: integer; y: integer end; begin end.",
        );
        assert_eq!(program.block.type_aliases.len(), 1);
        match &program.block.type_aliases[0].ty {
            Type::ArraySchema { bounds, .. } => {
                assert_eq!(bounds[0], ArrayBound { min: 1, max: 3 });
            }
            _ => panic!("expected array schema"),
        }
        match &program.block.variables[0].ty {
            Type::RecordType(fields, _) => assert_eq!(fields.len(), 2),
            _ => panic!("expected record type"),
        }
    }

    #[test]
    fn parses_procedure_with_by_reference_parameter() {
        let program = parse(
            "program P; procedure Bump(var a: integer); begin a := a + 1 end; begin end.",
        );
        let callable = &program.block.callables[0];
        assert_eq!(callable.parameters[0].by_reference, true);
        assert!(callable.return_type.is_none());
    }

    #[test]
    fn bare_identifier_statement_is_an_explicit_call() {
        let program = parse("program P; begin Foo end.");
        let Statement::Compound(stmts) = &program.block.body else { panic!() };
        assert!(matches!(stmts[0], Statement::ExplicitCall { ref name, .. } if name == "Foo"));
    }

    #[test]
    fn for_loop_parses_direction() {
        let program = parse("program P; var i: integer; begin for i := 1 to 10 do i := i end.");
        let Statement::Compound(stmts) = &program.block.body else { panic!() };
        assert!(matches!(stmts[0], Statement::For { direction: Direction::Up, .. }));
    }
}
