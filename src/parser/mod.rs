// Carbon Parser
// Recursive descent parser that converts tokens into a FileNode

use crate::ast::*;
use crate::error::{CarbonError, CarbonResult, ErrorKind, Span};
use crate::lexer::{Token, TokenKind};
use crate::vm::value::Value;
use tracing::debug;

#[derive(Default)]
struct ClassContext {
    name: String,
    has_base: bool,
}

#[derive(Default, Clone, Copy)]
struct FuncContext {
    is_static: bool,
    is_constructor: bool,
}

/// Recursive descent parser for Carbon
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    file: String,
    source: String,
    class: Option<ClassContext>,
    func: Option<FuncContext>,
    loop_depth: usize,
    switch_depth: usize,
    /// Local variables declared so far, innermost block last
    scopes: Vec<Vec<LocalVar>>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>, file: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            tokens,
            current: 0,
            file: file.into(),
            source: source.into(),
            class: None,
            func: None,
            loop_depth: 0,
            switch_depth: 0,
            scopes: Vec::new(),
        }
    }

    /// Parse the entire file
    pub fn parse(&mut self) -> CarbonResult<FileNode> {
        let mut file = FileNode::new(self.file.clone());

        while !self.is_at_end() {
            match self.peek().kind {
                TokenKind::Import => {
                    let import = self.import_declaration(&file)?;
                    file.imports.push(import);
                }
                TokenKind::Class => {
                    let class = self.class_declaration(&file)?;
                    file.classes.push(class);
                }
                TokenKind::Semicolon => {
                    self.advance();
                }
                _ => self.member_declaration(&mut file.members, Some(&file.classes))?,
            }
        }

        debug!(
            file = %self.file,
            classes = file.classes.len(),
            functions = file.members.functions.len(),
            "parsed file"
        );
        Ok(file)
    }

    // ==================== Declarations ====================

    fn import_declaration(&mut self, file: &FileNode) -> CarbonResult<ImportNode> {
        let start = self.advance().span; // consume 'import'
        let alias = self.consume_identifier("expected an identifier after \"import\".")?;
        self.check_redefinition(&file.members, Some(&file.classes), &alias)?;
        if let Some(previous) = file.find_import(&alias.lexeme) {
            return Err(self.predefined("an import", &alias, previous.span));
        }
        self.consume(&TokenKind::Equal, "expected symbol \"=\" after the import name.")?;
        let path = match &self.peek().kind {
            TokenKind::String(path) => path.clone(),
            _ => return Err(self.error("expected a string path to the imported source.")),
        };
        self.advance();
        self.consume(&TokenKind::Semicolon, "expected symbol \";\" after import.")?;
        Ok(ImportNode {
            alias: alias.lexeme,
            path,
            span: start.to(alias.span),
            bytecode: None,
        })
    }

    fn class_declaration(&mut self, file: &FileNode) -> CarbonResult<ClassNode> {
        self.advance(); // consume 'class'
        let name = self.consume_identifier("expected a class name.")?;
        if let Some(i) = file.find_class(&name.lexeme) {
            return Err(self.predefined("a class", &name, file.classes[i].span));
        }
        self.check_redefinition(&file.members, None, &name)?;

        let mut base = ClassBase::None;
        let mut base_span = Span::default();
        if self.match_token(&TokenKind::Colon) {
            let first = self.consume_identifier("expected a base class name after \":\".")?;
            base_span = first.span;
            if self.match_token(&TokenKind::Dot) {
                let second = self.consume_identifier("expected a class name after \".\".")?;
                base_span = first.span.to(second.span);
                base = ClassBase::Extern {
                    alias: first.lexeme,
                    name: second.lexeme,
                    bytecode: None,
                };
            } else {
                if first.lexeme == name.lexeme {
                    return Err(CarbonError::syntax_error(
                        "a class can't inherit itself.",
                        first.span,
                        &self.file,
                    ));
                }
                base = ClassBase::Named(first.lexeme);
            }
        }

        let mut class = ClassNode {
            name: name.lexeme.clone(),
            span: name.span,
            base,
            base_span,
            members: Members::default(),
            constructor: None,
            has_super_ctor_call: false,
            state: ReduceState::Pending,
        };

        self.class = Some(ClassContext {
            name: name.lexeme.clone(),
            has_base: !class.base.is_none(),
        });
        let result = self.class_body(&mut class);
        self.class = None;
        result?;

        class.constructor = class.members.find_function(&class.name);
        Ok(class)
    }

    fn class_body(&mut self, class: &mut ClassNode) -> CarbonResult<()> {
        self.consume(&TokenKind::LeftBrace, "expected symbol \"{\" after class name.")?;
        while !self.check(&TokenKind::RightBrace) {
            if self.is_at_end() {
                return Err(self.error("unexpected end of file."));
            }
            if self.match_token(&TokenKind::Semicolon) {
                continue;
            }
            self.member_declaration(&mut class.members, None)?;
        }
        self.advance(); // consume '}'
        Ok(())
    }

    /// Declarations allowed in both files and classes
    fn member_declaration(
        &mut self,
        members: &mut Members,
        classes: Option<&Vec<ClassNode>>,
    ) -> CarbonResult<()> {
        // File level vars and functions are always static
        let at_file = self.class.is_none();
        match self.peek().kind.clone() {
            TokenKind::Static => {
                self.advance();
                if self.check(&TokenKind::Func) {
                    let func = self.function_declaration(members, classes, true)?;
                    members.functions.push(func);
                } else if self.check(&TokenKind::Var) {
                    self.var_declaration(members, classes, true)?;
                } else {
                    return Err(self.error("expected keyword \"func\" or \"var\" after static."));
                }
            }
            TokenKind::Func => {
                let func = self.function_declaration(members, classes, at_file)?;
                members.functions.push(func);
            }
            TokenKind::Var => self.var_declaration(members, classes, at_file)?,
            TokenKind::Const => {
                self.advance();
                let name = self.consume_identifier("expected a constant name.")?;
                self.check_redefinition(members, classes, &name)?;
                let node = self.const_tail(name)?;
                members.constants.push(node);
            }
            TokenKind::Enum => self.enum_declaration(members, classes)?,
            TokenKind::BuiltinFunc(func) if func.is_compiletime() => {
                let call = self.expression()?;
                self.consume(&TokenKind::Semicolon, "expected symbol \";\".")?;
                members.compiletime_calls.push(call);
            }
            _ => {
                return Err(self.error(&format!(
                    "unexpected token \"{}\".",
                    self.peek().lexeme
                )))
            }
        }
        Ok(())
    }

    fn var_declaration(
        &mut self,
        members: &mut Members,
        classes: Option<&Vec<ClassNode>>,
        is_static: bool,
    ) -> CarbonResult<()> {
        self.advance(); // consume 'var'
        loop {
            let name = self.consume_identifier("expected a variable name.")?;
            self.check_redefinition(members, classes, &name)?;
            let init = if self.match_token(&TokenKind::Equal) {
                Some(self.expression()?)
            } else {
                None
            };
            members.vars.push(VarNode {
                name: name.lexeme,
                span: name.span,
                is_static,
                init,
            });
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.consume(&TokenKind::Semicolon, "expected symbol \",\" or \";\".")?;
        Ok(())
    }

    /// `= expr;` after `const NAME`
    fn const_tail(&mut self, name: Token) -> CarbonResult<ConstNode> {
        self.consume(&TokenKind::Equal, "expected symbol \"=\" after constant name.")?;
        let value = self.expression()?;
        self.consume(&TokenKind::Semicolon, "expected symbol \";\".")?;
        Ok(ConstNode {
            name: name.lexeme,
            span: name.span,
            value,
            state: ReduceState::Pending,
        })
    }

    fn enum_declaration(
        &mut self,
        members: &mut Members,
        classes: Option<&Vec<ClassNode>>,
    ) -> CarbonResult<()> {
        let start = self.advance().span; // consume 'enum'
        let name = if self.check_identifier() {
            let name = self.consume_identifier("expected an enum name.")?;
            self.check_redefinition(members, classes, &name)?;
            Some(name)
        } else {
            None
        };
        self.consume(&TokenKind::LeftBrace, "expected an identifier or symbol \"{\".")?;

        let mut node = EnumNode {
            name: name.as_ref().map(|n| n.lexeme.clone()).unwrap_or_default(),
            span: name.as_ref().map(|n| n.span).unwrap_or(start),
            values: Vec::new(),
        };

        while !self.check(&TokenKind::RightBrace) {
            let value_name = self.consume_identifier("expected an identifier or symbol \"}\".")?;
            if let Some(i) = node.find(&value_name.lexeme) {
                return Err(self.predefined("an enum value", &value_name, node.values[i].span));
            }
            if name.is_none() {
                self.check_redefinition(members, classes, &value_name)?;
            }
            let expr = if self.match_token(&TokenKind::Equal) {
                Some(self.expression()?)
            } else {
                None
            };
            node.values.push(EnumValueNode {
                name: value_name.lexeme,
                span: value_name.span,
                expr,
                value: 0,
                state: ReduceState::Pending,
            });
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.consume(&TokenKind::RightBrace, "expected symbol \"}\" after enum values.")?;

        if name.is_some() {
            members.enums.push(node);
        } else {
            match &mut members.unnamed_enum {
                Some(unnamed) => unnamed.values.extend(node.values),
                None => members.unnamed_enum = Some(node),
            }
        }
        Ok(())
    }

    fn function_declaration(
        &mut self,
        members: &Members,
        classes: Option<&Vec<ClassNode>>,
        is_static: bool,
    ) -> CarbonResult<FunctionNode> {
        self.advance(); // consume 'func'
        let name = self.consume_identifier("expected a function name.")?;
        self.check_redefinition(members, classes, &name)?;

        let is_constructor = self
            .class
            .as_ref()
            .map(|c| c.name == name.lexeme)
            .unwrap_or(false);
        if is_constructor && is_static {
            return Err(CarbonError::syntax_error(
                "constructor can't be static.",
                name.span,
                &self.file,
            ));
        }

        let params = self.parameters()?;

        let saved_loop = std::mem::replace(&mut self.loop_depth, 0);
        let saved_switch = std::mem::replace(&mut self.switch_depth, 0);
        self.func = Some(FuncContext {
            is_static,
            is_constructor,
        });
        self.scopes.clear();
        let body = self.function_body(&name);
        self.func = None;
        self.loop_depth = saved_loop;
        self.switch_depth = saved_switch;

        Ok(FunctionNode {
            name: name.lexeme,
            span: name.span,
            is_static,
            is_constructor,
            params,
            default_args: Vec::new(),
            body: body?,
        })
    }

    fn parameters(&mut self) -> CarbonResult<Vec<ParamNode>> {
        self.consume(&TokenKind::LeftParen, "expected symbol \"(\" after function name.")?;
        let mut params: Vec<ParamNode> = Vec::new();
        let mut has_default = false;

        if !self.check(&TokenKind::RightParen) {
            loop {
                let name = self.consume_identifier("expected a parameter name.")?;
                if params.iter().any(|p| p.name == name.lexeme) {
                    return Err(CarbonError::name_error(
                        format!("identifier \"{}\" already defined in arguments", name.lexeme),
                        name.span,
                        &self.file,
                    ));
                }
                let is_reference = self.match_token(&TokenKind::Ampersand);
                let default = if self.match_token(&TokenKind::Equal) {
                    has_default = true;
                    Some(self.expression()?)
                } else {
                    if has_default {
                        return Err(CarbonError::syntax_error(
                            "default parameter expected.",
                            name.span,
                            &self.file,
                        ));
                    }
                    None
                };
                params.push(ParamNode {
                    name: name.lexeme,
                    span: name.span,
                    is_reference,
                    default,
                });
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RightParen, "expected symbol \")\" after parameters.")?;
        Ok(params)
    }

    fn function_body(&mut self, name: &Token) -> CarbonResult<Block> {
        // func f() = expr;
        if self.match_token(&TokenKind::Equal) {
            let value = self.expression()?;
            self.consume(&TokenKind::Semicolon, "expected symbol \";\".")?;
            if self.func.map(|f| f.is_constructor).unwrap_or(false) {
                return Err(CarbonError::syntax_error(
                    "constructor can't return anything.",
                    value.span,
                    &self.file,
                ));
            }
            let span = name.span.to(value.span);
            let mut block = Block::new(span);
            block
                .statements
                .push(Stmt::new(StmtKind::Return(Some(value)), span));
            return Ok(block);
        }
        self.block()
    }

    // ==================== Statements ====================

    /// `{ statements }`
    fn block(&mut self) -> CarbonResult<Block> {
        let start = self
            .consume(&TokenKind::LeftBrace, "expected symbol \"{\".")?
            .span;
        self.scopes.push(Vec::new());
        let result = self.block_contents(start);
        let locals = self.scopes.pop().unwrap_or_default();
        let mut block = result?;
        block.local_vars = locals;
        Ok(block)
    }

    fn block_contents(&mut self, start: Span) -> CarbonResult<Block> {
        let mut block = Block::new(start);
        while !self.check(&TokenKind::RightBrace) {
            if self.is_at_end() {
                return Err(self.error("unexpected end of file."));
            }
            self.statement(&mut block)?;
        }
        let end = self.advance().span;
        block.span = start.to(end);
        Ok(block)
    }

    /// Loop and branch bodies: a block or a single statement
    fn body(&mut self) -> CarbonResult<Block> {
        if self.check(&TokenKind::LeftBrace) {
            return self.block();
        }
        let start = self.peek().span;
        self.scopes.push(Vec::new());
        let mut block = Block::new(start);
        let result = self.statement(&mut block);
        let locals = self.scopes.pop().unwrap_or_default();
        result?;
        block.local_vars = locals;
        Ok(block)
    }

    fn statement(&mut self, block: &mut Block) -> CarbonResult<()> {
        match self.peek().kind {
            TokenKind::Semicolon => {
                self.advance();
            }
            TokenKind::Var => {
                self.advance();
                loop {
                    let var = self.local_var()?;
                    let span = var.span;
                    block.statements.push(Stmt::new(StmtKind::Var(var), span));
                    if !self.match_token(&TokenKind::Comma) {
                        break;
                    }
                }
                self.consume(&TokenKind::Semicolon, "expected symbol \",\" or \";\".")?;
            }
            TokenKind::Const => {
                self.advance();
                let name = self.consume_identifier("expected a constant name.")?;
                if let Some(previous) = block.local_consts.iter().find(|c| c.name == name.lexeme) {
                    return Err(self.predefined("a constant", &name, previous.span));
                }
                if let Some(previous) = self.find_local_in_scope(&name.lexeme) {
                    return Err(self.predefined("a variable", &name, previous));
                }
                let node = self.const_tail(name)?;
                block.local_consts.push(node);
            }
            TokenKind::If => {
                let stmt = self.if_statement()?;
                block.statements.push(stmt);
            }
            TokenKind::While => {
                let start = self.advance().span;
                let cond = self.expression()?;
                self.loop_depth += 1;
                let body = self.body();
                self.loop_depth -= 1;
                let body = body?;
                block
                    .statements
                    .push(Stmt::new(StmtKind::While { cond, body }, start));
            }
            TokenKind::For => {
                let stmt = self.for_statement()?;
                block.statements.push(stmt);
            }
            TokenKind::Switch => {
                let stmt = self.switch_statement()?;
                block.statements.push(stmt);
            }
            TokenKind::Break => {
                let span = self.advance().span;
                if self.loop_depth == 0 && self.switch_depth == 0 {
                    return Err(CarbonError::syntax_error(
                        "\"break\" can only be used inside a loop or switch.",
                        span,
                        &self.file,
                    ));
                }
                self.consume(&TokenKind::Semicolon, "expected symbol \";\" after break.")?;
                block.statements.push(Stmt::new(StmtKind::Break, span));
            }
            TokenKind::Continue => {
                let span = self.advance().span;
                if self.loop_depth == 0 {
                    return Err(CarbonError::syntax_error(
                        "\"continue\" can only be used inside a loop.",
                        span,
                        &self.file,
                    ));
                }
                self.consume(&TokenKind::Semicolon, "expected symbol \";\" after continue.")?;
                block.statements.push(Stmt::new(StmtKind::Continue, span));
            }
            TokenKind::Return => {
                let span = self.advance().span;
                let value = if self.check(&TokenKind::Semicolon) {
                    None
                } else {
                    let value = self.expression()?;
                    if self.func.map(|f| f.is_constructor).unwrap_or(false) {
                        return Err(CarbonError::syntax_error(
                            "constructor can't return anything.",
                            value.span,
                            &self.file,
                        ));
                    }
                    Some(value)
                };
                self.consume(&TokenKind::Semicolon, "expected symbol \";\" after return.")?;
                block.statements.push(Stmt::new(StmtKind::Return(value), span));
            }
            TokenKind::Func | TokenKind::Class | TokenKind::Enum | TokenKind::Import => {
                return Err(self.error(&format!(
                    "\"{}\" declarations are not allowed inside a function.",
                    self.peek().lexeme
                )));
            }
            _ => {
                let expr = self.expression()?;
                self.consume(&TokenKind::Semicolon, "expected symbol \";\".")?;
                block.statements.push(Stmt::expr(expr));
            }
        }
        Ok(())
    }

    /// `name [= expr]` of a local `var`, registered in the innermost scope
    fn local_var(&mut self) -> CarbonResult<VarNode> {
        let name = self.consume_identifier("expected a variable name.")?;
        if let Some(previous) = self.find_local_in_scope(&name.lexeme) {
            return Err(self.predefined("a variable", &name, previous));
        }
        let init = if self.match_token(&TokenKind::Equal) {
            Some(self.expression()?)
        } else {
            None
        };
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(LocalVar {
                name: name.lexeme.clone(),
                span: name.span,
            });
        }
        Ok(VarNode {
            name: name.lexeme,
            span: name.span,
            is_static: false,
            init,
        })
    }

    fn find_local_in_scope(&self, name: &str) -> Option<Span> {
        self.scopes
            .last()
            .and_then(|scope| scope.iter().find(|v| v.name == name))
            .map(|v| v.span)
    }

    fn if_statement(&mut self) -> CarbonResult<Stmt> {
        let start = self.advance().span; // consume 'if'
        let cond = self.expression()?;
        let body = self.body()?;
        let else_body = if self.match_token(&TokenKind::Else) {
            if self.check(&TokenKind::If) {
                // else if: a block holding the nested if
                let nested = self.if_statement()?;
                let mut block = Block::new(nested.span);
                block.statements.push(nested);
                Some(block)
            } else {
                Some(self.body()?)
            }
        } else {
            None
        };
        Ok(Stmt::new(
            StmtKind::If {
                cond,
                body,
                else_body,
            },
            start,
        ))
    }

    fn for_statement(&mut self) -> CarbonResult<Stmt> {
        let start = self.advance().span; // consume 'for'
        self.consume(&TokenKind::LeftParen, "expected symbol \"(\" after for.")?;

        // The loop variable belongs to the body's scope
        self.scopes.push(Vec::new());
        let result = self.for_tail(start);
        let locals = self.scopes.pop().unwrap_or_default();
        let mut stmt = result?;
        match &mut stmt.kind {
            StmtKind::For { body, .. } | StmtKind::Foreach { body, .. } => {
                let mut all = locals;
                all.append(&mut body.local_vars);
                body.local_vars = all;
            }
            _ => {}
        }
        Ok(stmt)
    }

    fn for_tail(&mut self, start: Span) -> CarbonResult<Stmt> {
        let is_foreach = self.check(&TokenKind::Var)
            && self.check_ahead_identifier(1)
            && self.check_ahead(2, &TokenKind::Colon);

        if is_foreach {
            self.advance(); // consume 'var'
            let name = self.consume_identifier("expected a variable name.")?;
            self.consume(&TokenKind::Colon, "expected symbol \":\".")?;
            let iterable = self.expression()?;
            self.consume(&TokenKind::RightParen, "expected symbol \")\".")?;
            if let Some(scope) = self.scopes.last_mut() {
                scope.push(LocalVar {
                    name: name.lexeme.clone(),
                    span: name.span,
                });
            }
            let body = self.loop_body()?;
            return Ok(Stmt::new(
                StmtKind::Foreach {
                    var: VarNode {
                        name: name.lexeme,
                        span: name.span,
                        is_static: false,
                        init: None,
                    },
                    iterable,
                    body,
                },
                start,
            ));
        }

        let init = if self.match_token(&TokenKind::Semicolon) {
            None
        } else if self.match_token(&TokenKind::Var) {
            let var = self.local_var()?;
            self.consume(&TokenKind::Semicolon, "expected symbol \";\".")?;
            let span = var.span;
            Some(Box::new(Stmt::new(StmtKind::Var(var), span)))
        } else {
            let expr = self.expression()?;
            self.consume(&TokenKind::Semicolon, "expected symbol \";\".")?;
            Some(Box::new(Stmt::expr(expr)))
        };
        let cond = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(&TokenKind::Semicolon, "expected symbol \";\".")?;
        let step = if self.check(&TokenKind::RightParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(&TokenKind::RightParen, "expected symbol \")\".")?;
        let body = self.loop_body()?;
        Ok(Stmt::new(
            StmtKind::For {
                init,
                cond,
                step,
                body,
            },
            start,
        ))
    }

    fn loop_body(&mut self) -> CarbonResult<Block> {
        self.loop_depth += 1;
        let body = self.body();
        self.loop_depth -= 1;
        body
    }

    fn switch_statement(&mut self) -> CarbonResult<Stmt> {
        let start = self.advance().span; // consume 'switch'
        let value = self.expression()?;
        self.consume(&TokenKind::LeftBrace, "expected symbol \"{\" after switch value.")?;

        let mut cases: Vec<SwitchCase> = Vec::new();
        self.switch_depth += 1;
        let result = self.switch_cases(&mut cases);
        self.switch_depth -= 1;
        result?;

        Ok(Stmt::new(StmtKind::Switch { value, cases }, start))
    }

    fn switch_cases(&mut self, cases: &mut Vec<SwitchCase>) -> CarbonResult<()> {
        let mut has_default = false;
        while !self.match_token(&TokenKind::RightBrace) {
            if self.is_at_end() {
                return Err(self.error("unexpected end of file."));
            }
            let span = self.peek().span;
            let value = if self.match_token(&TokenKind::Case) {
                Some(self.expression()?)
            } else if self.match_token(&TokenKind::Default) {
                if has_default {
                    return Err(CarbonError::syntax_error(
                        "default case already defined.",
                        span,
                        &self.file,
                    ));
                }
                has_default = true;
                None
            } else {
                return Err(self.error("expected keyword \"case\" or \"default\"."));
            };
            self.consume(&TokenKind::Colon, "expected symbol \":\" after case.")?;

            self.scopes.push(Vec::new());
            let mut body = Block::new(span);
            let mut result = Ok(());
            while !matches!(
                self.peek().kind,
                TokenKind::Case | TokenKind::Default | TokenKind::RightBrace | TokenKind::Eof
            ) {
                result = self.statement(&mut body);
                if result.is_err() {
                    break;
                }
            }
            body.local_vars = self.scopes.pop().unwrap_or_default();
            result?;
            cases.push(SwitchCase { value, body, span });
        }
        Ok(())
    }

    // ==================== Expressions ====================

    pub fn expression(&mut self) -> CarbonResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> CarbonResult<Expr> {
        let target = self.logic_or()?;
        if let Some(op) = OpType::from_assign_token(&self.peek().kind) {
            self.advance();
            let value = self.assignment()?;
            let span = target.span.to(value.span);
            return Ok(Expr::new(
                ExprKind::Operator {
                    op,
                    args: vec![target, value],
                },
                span,
            ));
        }
        Ok(target)
    }

    /// Operand of a binary operator; assignments can't appear here
    fn operand(&mut self, next: fn(&mut Self) -> CarbonResult<Expr>) -> CarbonResult<Expr> {
        let expr = next(self)?;
        if self.peek().is_assignment() {
            let span = self.peek().span;
            return Err(CarbonError::syntax_error(
                "unexpected assignment.",
                span,
                &self.file,
            ));
        }
        Ok(expr)
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> CarbonResult<Expr>,
        ops: &[(TokenKind, OpType)],
    ) -> CarbonResult<Expr> {
        let mut expr = next(self)?;
        'outer: loop {
            for (kind, op) in ops {
                if self.check(kind) {
                    self.advance();
                    let right = self.operand(next)?;
                    let span = expr.span.to(right.span);
                    expr = Expr::new(
                        ExprKind::Operator {
                            op: *op,
                            args: vec![expr, right],
                        },
                        span,
                    );
                    continue 'outer;
                }
            }
            break;
        }
        Ok(expr)
    }

    fn logic_or(&mut self) -> CarbonResult<Expr> {
        self.binary_level(Self::logic_and, &[(TokenKind::Or, OpType::Or)])
    }

    fn logic_and(&mut self) -> CarbonResult<Expr> {
        self.binary_level(Self::bit_or, &[(TokenKind::And, OpType::And)])
    }

    fn bit_or(&mut self) -> CarbonResult<Expr> {
        self.binary_level(Self::bit_xor, &[(TokenKind::Pipe, OpType::BitOr)])
    }

    fn bit_xor(&mut self) -> CarbonResult<Expr> {
        self.binary_level(Self::bit_and, &[(TokenKind::Caret, OpType::BitXor)])
    }

    fn bit_and(&mut self) -> CarbonResult<Expr> {
        self.binary_level(Self::equality, &[(TokenKind::Ampersand, OpType::BitAnd)])
    }

    fn equality(&mut self) -> CarbonResult<Expr> {
        self.binary_level(
            Self::comparison,
            &[
                (TokenKind::EqualEqual, OpType::EqEq),
                (TokenKind::BangEqual, OpType::NotEq),
            ],
        )
    }

    fn comparison(&mut self) -> CarbonResult<Expr> {
        self.binary_level(
            Self::shift,
            &[
                (TokenKind::Less, OpType::Lt),
                (TokenKind::LessEqual, OpType::LtEq),
                (TokenKind::Greater, OpType::Gt),
                (TokenKind::GreaterEqual, OpType::GtEq),
            ],
        )
    }

    fn shift(&mut self) -> CarbonResult<Expr> {
        self.binary_level(
            Self::term,
            &[
                (TokenKind::LessLess, OpType::BitLShift),
                (TokenKind::GreaterGreater, OpType::BitRShift),
            ],
        )
    }

    fn term(&mut self) -> CarbonResult<Expr> {
        self.binary_level(
            Self::factor,
            &[
                (TokenKind::Plus, OpType::Plus),
                (TokenKind::Minus, OpType::Minus),
            ],
        )
    }

    fn factor(&mut self) -> CarbonResult<Expr> {
        self.binary_level(
            Self::unary,
            &[
                (TokenKind::Star, OpType::Mul),
                (TokenKind::Slash, OpType::Div),
                (TokenKind::Percent, OpType::Mod),
            ],
        )
    }

    fn unary(&mut self) -> CarbonResult<Expr> {
        if let Some(op) = OpType::from_unary_token(&self.peek().kind) {
            let start = self.advance().span;
            let operand = self.operand(Self::unary)?;
            let span = start.to(operand.span);
            return Ok(Expr::new(
                ExprKind::Operator {
                    op,
                    args: vec![operand],
                },
                span,
            ));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> CarbonResult<Expr> {
        let mut expr = self.primary()?;

        loop {
            if self.match_token(&TokenKind::LeftParen) {
                let args = self.arguments()?;
                let span = expr.span.to(self.previous().span);
                expr = match expr.kind {
                    // f(x)
                    ExprKind::Identifier(id) => Expr::new(
                        ExprKind::Call {
                            base: None,
                            method: Some(id),
                            args,
                        },
                        span,
                    ),
                    // a.f(x)
                    ExprKind::Index { base, member } => Expr::new(
                        ExprKind::Call {
                            base: Some(base),
                            method: Some(member),
                            args,
                        },
                        span,
                    ),
                    // expr(x), this(x), super(x), print(x), int(x)
                    kind => Expr::new(
                        ExprKind::Call {
                            base: Some(Box::new(Expr::new(kind, expr.span))),
                            method: None,
                            args,
                        },
                        span,
                    ),
                };
            } else if self.match_token(&TokenKind::Dot) {
                let name = self.consume_identifier("expected an attribute name after \".\".")?;
                let span = expr.span.to(name.span);
                expr = Expr::new(
                    ExprKind::Index {
                        base: Box::new(expr),
                        member: Identifier::new(name.lexeme, name.span),
                    },
                    span,
                );
            } else if self.match_token(&TokenKind::LeftBracket) {
                let key = self.expression()?;
                let end = self
                    .consume(&TokenKind::RightBracket, "expected symbol \"]\" after index.")?
                    .span;
                let span = expr.span.to(end);
                expr = Expr::new(
                    ExprKind::MappedIndex {
                        base: Box::new(expr),
                        key: Box::new(key),
                    },
                    span,
                );
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn arguments(&mut self) -> CarbonResult<Vec<Expr>> {
        let mut args = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                args.push(self.expression()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RightParen, "expected symbol \")\" after arguments.")?;
        Ok(args)
    }

    fn primary(&mut self) -> CarbonResult<Expr> {
        if self.is_at_end() {
            return Err(self.error("unexpected end of file."));
        }
        let token = self.advance().clone();
        let span = token.span;
        let kind = match token.kind {
            TokenKind::Int(n) => return Ok(Expr::constant(Value::Int(n), span)),
            TokenKind::Float(n) => return Ok(Expr::constant(Value::Float(n), span)),
            TokenKind::String(s) => return Ok(Expr::constant(Value::from(s), span)),
            TokenKind::True => return Ok(Expr::constant(Value::Bool(true), span)),
            TokenKind::False => return Ok(Expr::constant(Value::Bool(false), span)),
            TokenKind::Null => return Ok(Expr::constant(Value::Null, span)),
            TokenKind::Identifier(name) => ExprKind::Identifier(Identifier::new(name, span)),
            TokenKind::BuiltinFunc(func) => {
                if !self.check(&TokenKind::LeftParen) && func.is_compiletime() {
                    return Err(self.error("expected symbol \"(\" after a compile time function."));
                }
                ExprKind::BuiltinFunc(func)
            }
            TokenKind::BuiltinType(ty) => ExprKind::BuiltinType(ty),
            TokenKind::This => {
                let in_method = self.class.is_some()
                    && self.func.map(|f| !f.is_static).unwrap_or(false);
                if !in_method {
                    return Err(CarbonError::syntax_error(
                        "keyword \"this\" only be used in non-static member function.",
                        span,
                        &self.file,
                    ));
                }
                ExprKind::This
            }
            TokenKind::Super => {
                let has_base = self.class.as_ref().map(|c| c.has_base).unwrap_or(false);
                if !has_base || self.func.is_none() {
                    return Err(CarbonError::syntax_error(
                        "keyword \"super\" can only be used inside a class with a base.",
                        span,
                        &self.file,
                    ));
                }
                ExprKind::Super
            }
            TokenKind::LeftParen => {
                let mut expr = self.expression()?;
                let end = self
                    .consume(&TokenKind::RightParen, "expected symbol \")\".")?
                    .span;
                expr.span = span.to(end);
                return Ok(expr);
            }
            TokenKind::LeftBracket => {
                let mut items = Vec::new();
                while !self.check(&TokenKind::RightBracket) {
                    items.push(self.expression()?);
                    if !self.match_token(&TokenKind::Comma) {
                        break;
                    }
                }
                let end = self
                    .consume(&TokenKind::RightBracket, "expected symbol \"]\".")?
                    .span;
                return Ok(Expr::new(ExprKind::Array(items), span.to(end)));
            }
            TokenKind::LeftBrace => {
                let mut pairs = Vec::new();
                while !self.check(&TokenKind::RightBrace) {
                    let key = self.expression()?;
                    self.consume(&TokenKind::Colon, "expected symbol \":\" after map key.")?;
                    let value = self.expression()?;
                    pairs.push((key, value));
                    if !self.match_token(&TokenKind::Comma) {
                        break;
                    }
                }
                let end = self
                    .consume(&TokenKind::RightBrace, "expected symbol \"}\".")?
                    .span;
                return Ok(Expr::new(ExprKind::Map(pairs), span.to(end)));
            }
            _ => {
                self.current -= 1;
                return Err(self.error(&format!(
                    "unexpected token \"{}\".",
                    token.lexeme
                )));
            }
        };
        Ok(Expr::new(kind, span))
    }

    // ==================== Helpers ====================

    /// Name clash with any member of the container (and file level classes)
    fn check_redefinition(
        &self,
        members: &Members,
        classes: Option<&Vec<ClassNode>>,
        name: &Token,
    ) -> CarbonResult<()> {
        if let Some(classes) = classes {
            if let Some(class) = classes.iter().find(|c| c.name == name.lexeme) {
                return Err(self.predefined("a class", name, class.span));
            }
        }
        if let Some(span) = members.declared_at(&name.lexeme) {
            return Err(self.predefined("a member", name, span));
        }
        Ok(())
    }

    fn predefined(&self, what: &str, name: &Token, previous: Span) -> CarbonError {
        CarbonError::new(
            ErrorKind::NameError,
            format!(
                "{} named \"{}\" already exists at (line:{}, col:{})",
                what, name.lexeme, previous.start.line, previous.start.column
            ),
            name.span,
            &self.file,
        )
        .with_source(&self.source)
    }

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn check(&self, kind: &TokenKind) -> bool {
        if self.is_at_end() {
            return false;
        }
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    fn check_identifier(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Identifier(_))
    }

    /// Check token at offset n ahead (0 = current, 1 = next, etc)
    fn check_ahead(&self, n: usize, kind: &TokenKind) -> bool {
        self.tokens
            .get(self.current + n)
            .map(|t| std::mem::discriminant(&t.kind) == std::mem::discriminant(kind))
            .unwrap_or(false)
    }

    fn check_ahead_identifier(&self, n: usize) -> bool {
        self.tokens
            .get(self.current + n)
            .map(|t| matches!(t.kind, TokenKind::Identifier(_)))
            .unwrap_or(false)
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: &TokenKind, message: &str) -> CarbonResult<&Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(message))
        }
    }

    fn consume_identifier(&mut self, message: &str) -> CarbonResult<Token> {
        if self.check_identifier() {
            Ok(self.advance().clone())
        } else {
            Err(self.error(message))
        }
    }

    fn error(&self, message: &str) -> CarbonError {
        let token = self.peek();
        CarbonError::syntax_error(message, token.span, &self.file).with_source(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Scanner;

    fn parse(source: &str) -> CarbonResult<FileNode> {
        let tokens = Scanner::new(source, "test.cb").scan_tokens()?;
        Parser::new(tokens, "test.cb", source).parse()
    }

    #[test]
    fn test_file_members() {
        let file = parse(
            "import lib = \"lib.cb\";
             var a = 1, b;
             const C = 2;
             enum Color { RED, GREEN = 5 }
             enum { X, Y }
             func main() { return 0; }
             class A { var x; func A(v) { x = v; } static func s() = 1; }",
        )
        .unwrap();
        assert_eq!(file.imports[0].alias, "lib");
        assert_eq!(file.members.vars.len(), 2);
        assert!(file.members.vars.iter().all(|v| v.is_static));
        assert_eq!(file.members.enums[0].values.len(), 2);
        assert_eq!(file.members.unnamed_enum.as_ref().unwrap().values.len(), 2);
        let class = &file.classes[0];
        assert_eq!(class.constructor, Some(0));
        assert!(class.members.functions[0].is_constructor);
        assert!(class.members.functions[1].is_static);
    }

    #[test]
    fn test_precedence() {
        let file = parse("const X = 2 + 3 * 4;").unwrap();
        let ExprKind::Operator { op, args } = &file.members.constants[0].value.kind else {
            panic!("expected an operator");
        };
        assert_eq!(*op, OpType::Plus);
        assert!(matches!(args[1].kind, ExprKind::Operator { op: OpType::Mul, .. }));
    }

    #[test]
    fn test_call_shapes() {
        let file = parse("func f() { g(1); a.b(2); print(3); }").unwrap();
        let stmts = &file.members.functions[0].body.statements;
        let shape = |i: usize| match &stmts[i].kind {
            StmtKind::Expr(Expr {
                kind: ExprKind::Call { base, method, .. },
                ..
            }) => (base.is_some(), method.is_some()),
            _ => panic!("expected a call"),
        };
        assert_eq!(shape(0), (false, true));
        assert_eq!(shape(1), (true, true));
        assert_eq!(shape(2), (true, false));
    }

    #[test]
    fn test_for_variable_in_body_scope() {
        let file = parse("func f() { for (var i = 0; i < 3; i += 1) { var j = i; } }").unwrap();
        let StmtKind::For { body, .. } = &file.members.functions[0].body.statements[0].kind else {
            panic!("expected a for loop");
        };
        let names: Vec<&str> = body.local_vars.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["i", "j"]);
    }

    #[test]
    fn test_default_parameter_order() {
        let err = parse("func f(a = 1, b) {}").unwrap_err();
        assert_eq!(err.kind, ErrorKind::SyntaxError);
        assert_eq!(err.message, "default parameter expected.");
    }

    #[test]
    fn test_duplicate_member() {
        let err = parse("var a; func a() {}").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NameError);
        assert!(err.message.contains("already exists"));
    }

    #[test]
    fn test_context_errors() {
        let err = parse("func f() { break; }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::SyntaxError);
        let err = parse("func f() { return this; }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::SyntaxError);
        let err = parse("class A { func A() { return 1; } }").unwrap_err();
        assert_eq!(err.message, "constructor can't return anything.");
        let err = parse("func f() { a = b = 1 + c = 2; }").unwrap_err();
        assert_eq!(err.message, "unexpected assignment.");
    }
}
