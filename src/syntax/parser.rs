//! Among Parser
//!
//! Recursive descent for statements and nameable literals, precedence
//! climbing over the operator registry for operation bodies. The grammar is
//! extended while parsing: `operator` statements change how later operation
//! bodies are tokenized, and `macro` statements change what later nodes expand
//! into. Every completed node is offered to the macro registry under its
//! name and shape.
//!
//! The parser never stops early. Syntax errors are reported, the offending
//! tokens are skipped up to a safe point, and parsing continues.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::ast::{Node, NodeId, NodeIds, Object, Span, Visit};
use crate::diagnostics::{panic_message, Report, Severity};
use crate::engine::{Definitions, ImportResolver};
use crate::macros::{
    MacroDefinition, MacroSignature, MacroType, Parameter, ParameterList, Reference,
    ReplacementTarget, TypeFlags, MAX_MACRO_RECURSION_DEPTH,
};
use crate::options::CompileOptions;
use crate::source::Source;
use crate::syntax::operators::{
    priority, OperatorDefinition, OperatorFlags, OperatorRegistry, OperatorType, PriorityGroup,
};
use crate::syntax::token::{Token, TokenKind, TokenizationMode};
use crate::syntax::tokenizer::Tokenizer;
use crate::err_at;

use TokenKind::*;
use TokenizationMode::{Key, Operation, ParamName, Symbol, Value, Word};

/// Text of the placeholder node left where a value could not be built.
pub const ERROR_PLACEHOLDER: &str = "ERROR";

const STATEMENT_KEYWORDS: [&str; 6] = ["macro", "fn", "operator", "keyword", "undef", "use"];

// ============================================================================
// PUBLIC API
// ============================================================================

/// Everything one parse produces.
#[derive(Debug)]
pub struct ParseOutput {
    /// Unnamed list of every top-level value, in source order.
    pub root: Node,
    /// Definitions made or re-exported by this source.
    pub definitions: Definitions,
    pub reports: Vec<Report>,
}

/// Parses a whole source. Always reaches the end of input.
pub fn parse(source: &Source, options: &CompileOptions, resolver: &dyn ImportResolver) -> ParseOutput {
    Parser::new(source, options, resolver).parse_file()
}

// ============================================================================
// PARSER STATE
// ============================================================================

/// Parameters of the macro whose template is being parsed.
struct TemplateScope {
    parameters: Vec<String>,
    references: HashMap<NodeId, Reference>,
    deferred: HashMap<NodeId, MacroType>,
}

impl TemplateScope {
    fn new(parameters: Vec<String>) -> Self {
        Self {
            parameters,
            references: HashMap::new(),
            deferred: HashMap::new(),
        }
    }

    fn mentions_parameter(&self, node: &Node) -> bool {
        let mut found = false;
        node.walk(&mut |_, n| {
            if self.references.contains_key(&n.id()) {
                found = true;
                Visit::Stop
            } else {
                Visit::Continue
            }
        });
        found
    }

    fn forget(&mut self, node: &Node) {
        node.walk(&mut |_, n| {
            self.references.remove(&n.id());
            self.deferred.remove(&n.id());
            Visit::Continue
        });
    }
}

struct Parser<'a> {
    tokenizer: Tokenizer<'a>,
    options: &'a CompileOptions,
    resolver: &'a dyn ImportResolver,
    ids: NodeIds,
    /// Everything usable in this source.
    visible: Definitions,
    /// What this source hands to its importers.
    exported: Definitions,
    scope: Option<TemplateScope>,
    reports: Vec<Report>,
    recovering: bool,
    depth: usize,
    /// Set for the right operand of an accessor, whose own name is the call.
    suppress_expansion: bool,
    /// Closers awaited by the groups being parsed, innermost last.
    open: Vec<TokenKind>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a Source, options: &'a CompileOptions, resolver: &'a dyn ImportResolver) -> Self {
        let mut visible = Definitions::default();
        if options.default_operators {
            visible.operators = OperatorRegistry::with_defaults();
        }
        Self {
            tokenizer: Tokenizer::new(source, options.invalid_unicode_escape),
            options,
            resolver,
            ids: NodeIds::default(),
            visible,
            exported: Definitions::default(),
            scope: None,
            reports: Vec::new(),
            recovering: false,
            depth: 0,
            suppress_expansion: false,
            open: Vec::new(),
        }
    }

    // ========================================================================
    // STATEMENT LAYER
    // ========================================================================

    fn parse_file(mut self) -> ParseOutput {
        let mut values = Vec::new();
        loop {
            let token = self.peek(true, Word);
            match token.kind {
                Eof => break,
                Comma => {
                    self.advance(true, Word);
                    self.error(err_at!(Syntax, token.start, "redundant ','"));
                    continue;
                }
                Error => {
                    self.advance(true, Word);
                    continue;
                }
                RBrace | RBracket | RParen => {
                    self.advance(true, Word);
                    self.error(err_at!(Syntax, token.start, "unexpected {}", token));
                    continue;
                }
                _ => {}
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.parse_statement(&token)));
            match outcome {
                Ok(Some(value)) => values.push(value),
                Ok(None) => {}
                Err(payload) => {
                    self.internal_fault(token.start, payload.as_ref());
                    continue;
                }
            }
            self.end_statement();
        }
        self.drain_lexical();
        ParseOutput {
            root: Node::list_of("", values, false),
            definitions: self.exported,
            reports: self.reports,
        }
    }

    /// One definition or one top-level value.
    fn parse_statement(&mut self, token: &Token) -> Option<Arc<Node>> {
        if token.kind == Literal && self.is_statement_keyword(token) {
            self.parse_definition(&token.text);
            None
        } else {
            Some(self.parse_value())
        }
    }

    /// Reports a fault raised inside one statement and skips the rest of it,
    /// so later statements still compile.
    fn internal_fault(&mut self, offset: usize, payload: &(dyn Any + Send)) {
        tracing::error!(offset, "internal fault while parsing a statement");
        self.scope = None;
        self.depth = 0;
        self.recovering = false;
        self.suppress_expansion = false;
        self.open.clear();
        self.tokenizer.reset(true);
        self.error(err_at!(Internal, offset, "internal compiler error: {}", panic_message(payload)));
        self.recover(None);
    }

    /// A statement keyword followed by more input on the same line, and not
    /// directly by an opener (`macro{..}` is an ordinary object).
    fn is_statement_keyword(&mut self, token: &Token) -> bool {
        if !STATEMENT_KEYWORDS.contains(&token.text.as_str()) {
            return false;
        }
        self.tokenizer.next(true, Word, &self.visible.operators);
        let after = self.tokenizer.next(false, Word, &self.visible.operators);
        self.tokenizer.reset(false);
        let attached = after.kind.is_opener() && after.start == token.end;
        !attached && !matches!(after.kind, Eol | Eof | Comma)
    }

    fn parse_definition(&mut self, keyword: &str) {
        match keyword {
            "macro" => self.parse_macro(false),
            "fn" => self.parse_macro(true),
            "operator" => self.parse_operator(false),
            "keyword" => self.parse_operator(true),
            "undef" => self.parse_undef(),
            _ => self.parse_use(),
        }
    }

    fn end_statement(&mut self) {
        let token = self.peek(false, Word);
        match token.kind {
            Eol | Comma => {
                self.advance(false, Word);
            }
            Eof => {}
            _ => {
                self.error(
                    err_at!(Syntax, token.start, "expected a line break or ',' after the statement, found {}", token)
                        .hint("separate statements with ',' or put them on their own lines"),
                );
                self.recover(None);
            }
        }
    }

    // ------------------------------------------------------------------------
    // macro / fn
    // ------------------------------------------------------------------------

    fn parse_macro(&mut self, function: bool) {
        let keyword = self.advance(true, Word);
        let name = self.advance(false, Word);
        if !name.kind.is_text() {
            self.error(err_at!(Syntax, name.start, "expected a macro name after '{}', found {}", keyword.text, name));
            self.recover(None);
            return;
        }
        let opener = self.peek(false, Word);
        let (kind, declared) = if opener.kind.is_opener() && opener.start == name.end {
            self.advance(false, Word);
            let kind = macro_type(function, Some(opener.kind));
            let closer = opener.kind.closer().unwrap_or(RParen);
            self.open.push(closer);
            let parsed = self.parse_parameters(closer);
            self.open.pop();
            match parsed {
                Some(params) => (kind, params),
                None => {
                    self.recover(None);
                    return;
                }
            }
        } else {
            (macro_type(function, None), Vec::new())
        };
        let signature = MacroSignature::new(name.text.clone(), kind);

        let colon = self.peek(false, Word);
        if colon.kind != Colon {
            self.error(err_at!(Syntax, colon.start, "expected ':' before the template of {}, found {}", signature, colon));
            self.recover(None);
            return;
        }
        self.advance(false, Word);

        let mut params = declared;
        if function {
            params.insert(0, Parameter::new("self"));
        }
        let names = params.iter().map(|p| p.name.clone()).collect();
        let parameters = match ParameterList::new(params, kind) {
            Ok(parameters) => Some(parameters),
            Err(report) => {
                self.error(report.at(name.start));
                None
            }
        };

        let errors_before = self.error_count();
        let outer = self.scope.replace(TemplateScope::new(names));
        let template = self.parse_value();
        let scope = std::mem::replace(&mut self.scope, outer);
        let (Some(parameters), Some(scope)) = (parameters, scope) else {
            return;
        };
        // An incomplete template would register a macro nobody wrote.
        if self.error_count() > errors_before {
            return;
        }
        let template = Arc::try_unwrap(template).unwrap_or_else(|shared| (*shared).clone());
        let mut warnings = Vec::new();
        let built = MacroDefinition::new(
            signature,
            parameters,
            template,
            &scope.references,
            &scope.deferred,
            &mut |report| warnings.push(report),
        );
        for warning in warnings {
            self.error(warning.at(name.start));
        }
        match built {
            Ok(definition) => self.register_macro(Arc::new(definition), name.start),
            Err(report) => self.error(report.at(name.start)),
        }
    }

    /// Parses `name (: type)? (= default)?` entries up to `closer`.
    fn parse_parameters(&mut self, closer: TokenKind) -> Option<Vec<Parameter>> {
        let mut params = Vec::new();
        let mut complete = true;
        loop {
            let token = self.peek(true, ParamName);
            match token.kind {
                kind if kind == closer => {
                    self.advance(true, ParamName);
                    break;
                }
                kind if kind == Eof || self.closes_enclosing(kind) => {
                    self.error(err_at!(Syntax, token.start, "expected {} to close the parameter list", closer));
                    return None;
                }
                Comma => {
                    self.advance(true, ParamName);
                    self.error(err_at!(Syntax, token.start, "redundant ','"));
                    continue;
                }
                Literal | Quoted => {
                    self.advance(true, ParamName);
                }
                _ => {
                    self.error(err_at!(Syntax, token.start, "expected a parameter name, found {}", token));
                    self.recover(Some(closer));
                    complete = false;
                    continue;
                }
            }

            let mut param = Parameter::new(token.text.clone());
            if self.peek(false, ParamName).kind == Colon {
                self.advance(false, ParamName);
                let ty = self.advance(false, Word);
                match TypeFlags::from_annotation(&ty.text).filter(|_| ty.kind == Literal) {
                    Some(flags) => param = param.with_type(flags),
                    None => {
                        self.error(
                            err_at!(Syntax, ty.start, "unknown parameter type {}", ty).hint(
                                "use any, nameable, named, unnamed, object, list, operation, primitive \
                                 or an exact shape such as named-list",
                            ),
                        );
                        complete = false;
                    }
                }
            }
            if self.peek(false, ParamName).kind == Equals {
                self.advance(false, ParamName);
                param.default = Some(self.parse_value());
            }
            params.push(param);

            let separator = self.peek(false, ParamName);
            match separator.kind {
                Comma | Eol => {
                    self.advance(false, ParamName);
                }
                kind if kind == closer || kind == Eof || self.closes_enclosing(kind) => {}
                _ => {
                    self.error(err_at!(
                        Syntax,
                        separator.start,
                        "expected ',' or {} after parameter '{}', found {}",
                        closer,
                        param_name(&params),
                        separator
                    ));
                    self.recover(Some(closer));
                    complete = false;
                }
            }
        }
        complete.then_some(params)
    }

    fn register_macro(&mut self, definition: Arc<MacroDefinition>, offset: usize) {
        if let Err(report) = self.visible.macros.add(Arc::clone(&definition)) {
            self.error(report.at(offset));
            return;
        }
        if let Err(report) = self.exported.macros.add(definition) {
            self.error(report.at(offset));
        }
    }

    // ------------------------------------------------------------------------
    // operator / keyword
    // ------------------------------------------------------------------------

    fn parse_operator(&mut self, keyword: bool) {
        let intro = self.advance(true, Word);
        let symbol = self.advance(false, Symbol);
        if !symbol.kind.is_text() || symbol.text.is_empty() {
            self.error(err_at!(Syntax, symbol.start, "expected a symbol after '{}', found {}", intro.text, symbol));
            self.recover(None);
            return;
        }
        let as_token = self.advance(false, Word);
        if !as_token.is_word("as") {
            self.error(err_at!(Syntax, as_token.start, "expected 'as' after '{}', found {}", symbol.text, as_token));
            self.recover(None);
            return;
        }

        let mut clauses = Vec::new();
        loop {
            let clause = self.advance(false, Word);
            if clause.kind != Literal {
                self.error(err_at!(Syntax, clause.start, "expected an operator property, found {}", clause));
                self.recover(None);
                return;
            }
            let mut explicit = None;
            if self.peek(false, Word).kind == LParen {
                self.advance(false, Word);
                let number = self.advance(false, Word);
                match number.text.parse::<f64>() {
                    Ok(value) if value.is_finite() && number.kind == Literal => explicit = Some(value),
                    _ => {
                        self.error(
                            err_at!(Syntax, number.start, "invalid priority {}", number)
                                .hint("priorities are finite decimal numbers"),
                        );
                        self.recover(None);
                        return;
                    }
                }
                let close = self.advance(false, Word);
                if close.kind != RParen {
                    self.error(err_at!(Syntax, close.start, "expected ')' after the priority, found {}", close));
                    self.recover(None);
                    return;
                }
            }
            clauses.push(Clause {
                name: clause.text,
                priority: explicit,
                offset: clause.start,
            });
            if !self.peek(false, Word).is_word("and") {
                break;
            }
            self.advance(false, Word);
        }

        let mut alias = None;
        if self.peek(false, Word).kind == Colon {
            self.advance(false, Word);
            let token = self.advance(false, Symbol);
            if !token.kind.is_text() {
                self.error(err_at!(Syntax, token.start, "expected an alias after ':', found {}", token));
                self.recover(None);
                return;
            }
            alias = Some(token.text);
        }

        match build_operator(symbol.text, keyword, &clauses, alias) {
            Ok(definition) => self.register_operator(definition, symbol.start),
            Err(report) => self.error(report),
        }
    }

    fn register_operator(&mut self, definition: OperatorDefinition, offset: usize) {
        let severity = self.options.invalid_operator_severity();
        let result = self
            .visible
            .operators
            .add(definition.clone())
            .and_then(|()| self.exported.operators.add(definition.clone()));
        if let Err(conflict) = result {
            self.error(
                err_at!(Registration, offset, "cannot register '{}': {}", definition.name, conflict)
                    .with_severity(severity),
            );
        }
        // Lookahead was lexed with the old operator set.
        self.tokenizer.reset(true);
    }

    // ------------------------------------------------------------------------
    // undef / use
    // ------------------------------------------------------------------------

    fn parse_undef(&mut self) {
        self.advance(true, Word);
        let what = self.advance(false, Word);
        let target = if what.kind == Literal { what.text.as_str() } else { "" };
        match target {
            "macro" | "fn" => self.undef_macro(target == "fn"),
            "operator" | "keyword" => {
                let keyword = target == "keyword";
                let symbol = self.advance(false, Symbol);
                if !symbol.kind.is_text() {
                    self.error(err_at!(Syntax, symbol.start, "expected a symbol after '{}', found {}", target, symbol));
                    self.recover(None);
                    return;
                }
                let removed = self.visible.operators.remove(&symbol.text, keyword).len()
                    + self.exported.operators.remove(&symbol.text, keyword).len();
                tracing::debug!(symbol = %symbol.text, removed, "undefined operator");
                if removed == 0 {
                    self.error(err_at!(Registration, symbol.start, "{} '{}' is not defined", target, symbol.text).warning());
                }
                self.tokenizer.reset(true);
            }
            "use" => {
                let Some((path, offset)) = self.parse_import_path() else {
                    return;
                };
                let definitions = match self.resolver.resolve(&path) {
                    Ok(definitions) => definitions,
                    Err(err) => {
                        self.error(err_at!(Resolution, offset, "cannot resolve import '{}'", path).hint(err.to_string()));
                        return;
                    }
                };
                let removed = self.visible.remove_all(&definitions) + self.exported.remove_all(&definitions);
                if removed == 0 {
                    self.error(err_at!(Registration, offset, "nothing imported from '{}' is defined", path).warning());
                }
                self.tokenizer.reset(true);
            }
            _ => {
                self.error(
                    err_at!(Syntax, what.start, "expected what to undefine, found {}", what)
                        .hint("use 'undef macro', 'undef fn', 'undef operator', 'undef keyword' or 'undef use'"),
                );
                self.recover(None);
            }
        }
    }

    fn undef_macro(&mut self, function: bool) {
        let name = self.advance(false, Word);
        if !name.kind.is_text() {
            self.error(err_at!(Syntax, name.start, "expected a macro name, found {}", name));
            self.recover(None);
            return;
        }
        let opener = self.peek(false, Word);
        let shape = if opener.kind.is_opener() && opener.start == name.end {
            self.advance(false, Word);
            let close = self.advance(false, Word);
            if Some(close.kind) != opener.kind.closer() {
                self.error(err_at!(Syntax, close.start, "expected an empty shape such as '[]', found {}", close));
                self.recover(None);
                return;
            }
            Some(opener.kind)
        } else {
            None
        };
        let kinds: Vec<MacroType> = match (function, shape) {
            (false, None) => vec![
                MacroType::Const,
                MacroType::Object,
                MacroType::List,
                MacroType::Operation,
            ],
            _ => vec![macro_type(function, shape)],
        };
        let removed = self.visible.macros.remove(&name.text, &kinds) + self.exported.macros.remove(&name.text, &kinds);
        if removed == 0 {
            self.error(err_at!(Registration, name.start, "no macro named '{}' to undefine", name.text).warning());
        }
    }

    fn parse_use(&mut self) {
        self.advance(true, Word);
        let mut public = false;
        if self.peek(false, Word).is_word("public") {
            // `use public` on its own imports a path named "public".
            self.tokenizer.next(false, Word, &self.visible.operators);
            let after = self.tokenizer.next(false, Value, &self.visible.operators);
            self.tokenizer.reset(false);
            if after.kind.is_text() {
                self.advance(false, Word);
                public = true;
            }
        }
        let Some((path, offset)) = self.parse_import_path() else {
            return;
        };
        match self.resolver.resolve(&path) {
            Ok(definitions) => {
                tracing::debug!(path = %path, public, "importing definitions");
                let mut conflicts = self.visible.copy_from(&definitions);
                if public {
                    conflicts.extend(self.exported.copy_from(&definitions));
                }
                for conflict in conflicts {
                    tracing::warn!(path = %path, conflict = %conflict.message, "import conflict");
                    self.error(conflict.warning().at(offset));
                }
            }
            Err(err) => {
                self.error(err_at!(Resolution, offset, "cannot resolve import '{}'", path).hint(err.to_string()));
            }
        }
        self.tokenizer.reset(true);
    }

    fn parse_import_path(&mut self) -> Option<(String, usize)> {
        let token = self.advance(false, Value);
        if token.kind.is_text() && !token.text.is_empty() {
            return Some((token.text, token.start));
        }
        self.error(err_at!(Syntax, token.start, "expected an import path, found {}", token));
        self.recover(None);
        None
    }

    // ========================================================================
    // VALUE LAYER
    // ========================================================================

    /// A value inside an object, a list, a definition or at top level.
    fn parse_value(&mut self) -> Arc<Node> {
        let expand = !std::mem::take(&mut self.suppress_expansion);
        if let Some(node) = self.parse_nameable(Word, expand) {
            return node;
        }
        let token = self.peek(true, Value);
        match token.kind {
            Literal | Quoted => {
                self.advance(true, Value);
                self.primitive(token, expand)
            }
            _ => {
                self.error(err_at!(Syntax, token.start, "expected a value, found {}", token));
                self.error_node(token.start)
            }
        }
    }

    /// Parses `{..}`, `[..]`, `(..)` or a name immediately followed by one of
    /// them. Leaves the tokenizer untouched if there is none.
    fn parse_nameable(&mut self, name_mode: TokenizationMode, expand: bool) -> Option<Arc<Node>> {
        let first = self.tokenizer.next(true, name_mode, &self.visible.operators);
        let (name, opener) = if first.kind.is_opener() {
            (None, first)
        } else if first.kind.is_text() {
            let next = self.tokenizer.next(false, name_mode, &self.visible.operators);
            if next.kind.is_opener() && next.start == first.end {
                (Some(first), next)
            } else {
                self.tokenizer.reset(false);
                return None;
            }
        } else {
            self.tokenizer.reset(false);
            return None;
        };
        self.tokenizer.discard();
        self.drain_lexical();

        let start = name.as_ref().map_or(opener.start, |n| n.start);
        let reference = name
            .as_ref()
            .filter(|n| n.kind == Literal)
            .and_then(|n| self.parameter_index(&n.text));
        let name = name.map(|n| n.text).unwrap_or_default();
        let unnamed = name.is_empty();

        self.open.push(opener.kind.closer().unwrap_or(RParen));
        let body = match opener.kind {
            LBrace => self.parse_object_body(name, start),
            LBracket => self.parse_list_body(name, start),
            _ => self.parse_operation_body(name, start),
        };
        self.open.pop();

        let (node, kind) = match opener.kind {
            LBrace => (body, MacroType::Object),
            LBracket => (body, MacroType::List),
            _ => {
                let mut node = body;
                if unnamed && self.options.collapse_unary_operation {
                    if let Node::List(list) = &mut node {
                        if list.values.len() == 1 {
                            return list.values.pop();
                        }
                    }
                }
                (node, MacroType::Operation)
            }
        };
        let node = node.with_id(self.ids.next());
        if let (Some(parameter), Some(scope)) = (reference, self.scope.as_mut()) {
            scope.references.insert(
                node.id(),
                Reference {
                    parameter,
                    target: ReplacementTarget::NameableName { prefix: String::new() },
                },
            );
        }
        Some(self.finish(node, kind, expand))
    }

    fn parse_object_body(&mut self, name: String, start: usize) -> Node {
        let mut object = Object {
            name,
            ..Object::default()
        };
        let end = loop {
            let token = self.peek(true, Key);
            match token.kind {
                RBrace => {
                    self.advance(true, Key);
                    break token.end;
                }
                kind if kind == Eof || self.closes_enclosing(kind) => {
                    self.error(err_at!(Syntax, start, "unclosed object; expected '}}'"));
                    break token.start;
                }
                Comma => {
                    self.advance(true, Key);
                    self.error(err_at!(Syntax, token.start, "redundant ','"));
                    continue;
                }
                Literal | Quoted => {
                    self.advance(true, Key);
                }
                _ => {
                    self.error(err_at!(Syntax, token.start, "expected a key, found {}", token));
                    self.recover(Some(RBrace));
                    continue;
                }
            }

            let colon = self.peek(false, Key);
            if colon.kind != Colon {
                self.error(err_at!(Syntax, colon.start, "expected ':' after key '{}', found {}", token.text, colon));
                self.recover(Some(RBrace));
                continue;
            }
            self.advance(false, Key);
            let value = self.parse_value();
            if object.contains_key(&token.text) {
                self.error(
                    err_at!(Registration, token.start, "duplicate key '{}'", token.text)
                        .with_severity(self.options.duplicate_property_severity())
                        .hint("the first value is kept"),
                );
                if let Some(scope) = self.scope.as_mut() {
                    scope.forget(&value);
                }
            } else {
                object.insert(token.text, value);
            }
            self.separator(Key, RBrace);
        };
        Node::Object(object).with_span(Span::new(start, end))
    }

    fn parse_list_body(&mut self, name: String, start: usize) -> Node {
        let (values, end) = self.parse_elements(start, Value, RBracket, Self::parse_value);
        Node::list_of(name, values, false).with_span(Span::new(start, end))
    }

    fn parse_operation_body(&mut self, name: String, start: usize) -> Node {
        let (values, end) = self.parse_elements(start, Operation, RParen, Self::parse_expression);
        Node::list_of(name, values, true).with_span(Span::new(start, end))
    }

    /// Elements separated by commas or line breaks up to `closer`. Returns
    /// them with the offset after the closer.
    fn parse_elements(
        &mut self,
        start: usize,
        mode: TokenizationMode,
        closer: TokenKind,
        element: fn(&mut Self) -> Arc<Node>,
    ) -> (Vec<Arc<Node>>, usize) {
        let mut values = Vec::new();
        loop {
            let token = self.peek(true, mode);
            match token.kind {
                kind if kind == closer => {
                    self.advance(true, mode);
                    return (values, token.end);
                }
                kind if kind == Eof || self.closes_enclosing(kind) => {
                    self.error(err_at!(Syntax, start, "unclosed group; expected {}", closer));
                    return (values, token.start);
                }
                Comma => {
                    self.advance(true, mode);
                    self.error(err_at!(Syntax, token.start, "redundant ','"));
                    continue;
                }
                _ => {}
            }
            values.push(element(self));
            self.separator(mode, closer);
        }
    }

    /// Consumes the separator after an element, or reports and recovers.
    fn separator(&mut self, mode: TokenizationMode, closer: TokenKind) {
        let token = self.peek(false, mode);
        match token.kind {
            Comma | Eol => {
                self.advance(false, mode);
            }
            // A closer of an enclosing group ends this one; the caller reports it.
            kind if kind == closer || kind == Eof || self.closes_enclosing(kind) => {}
            _ => {
                self.error(err_at!(Syntax, token.start, "expected ',' or {}, found {}", closer, token));
                self.recover(Some(closer));
            }
        }
    }

    fn primitive(&mut self, token: Token, expand: bool) -> Arc<Node> {
        let node = Node::primitive(token.text.clone())
            .with_id(self.ids.next())
            .with_span(Span::new(token.start, token.end));
        if token.kind == Quoted {
            return Arc::new(node);
        }
        if let Some(parameter) = self.parameter_index(&token.text) {
            if let Some(scope) = self.scope.as_mut() {
                scope.references.insert(
                    node.id(),
                    Reference {
                        parameter,
                        target: ReplacementTarget::Value,
                    },
                );
            }
            return Arc::new(node);
        }
        if expand {
            self.invoke(node, MacroType::Const)
        } else {
            Arc::new(node)
        }
    }

    // ========================================================================
    // EXPRESSION LAYER
    // ========================================================================

    fn parse_expression(&mut self) -> Arc<Node> {
        let groups = self.visible.operators.priority_groups();
        self.parse_level(&groups, 0)
    }

    /// Precedence climbing: `level` indexes the priority groups from the
    /// loosest to the tightest; past the last group comes a primary operand.
    fn parse_level(&mut self, groups: &[PriorityGroup], level: usize) -> Arc<Node> {
        let Some(group) = groups.get(level) else {
            return self.parse_operand();
        };
        match group.kind {
            OperatorType::Binary => {
                let mut left = self.parse_level(groups, level + 1);
                while let Some(op) = self.take_operator(group, false) {
                    if group.right_associative {
                        let right = self.parse_level(groups, level);
                        return self.binary(&op, left, right);
                    }
                    self.suppress_expansion = op.is_accessor();
                    let right = self.parse_level(groups, level + 1);
                    self.suppress_expansion = false;
                    left = self.binary(&op, left, right);
                }
                left
            }
            OperatorType::Postfix => {
                let mut operand = self.parse_level(groups, level + 1);
                while let Some(op) = self.take_operator(group, false) {
                    let span = Span::new(operand.span().start, self.tokenizer.position());
                    operand = self.unary(&op, operand, span);
                }
                operand
            }
            OperatorType::Prefix => {
                let start = self.tokenizer.position();
                match self.take_operator(group, true) {
                    Some(op) => {
                        let operand = self.parse_level(groups, level);
                        let span = Span::new(start, operand.span().end);
                        self.unary(&op, operand, span)
                    }
                    None => self.parse_level(groups, level + 1),
                }
            }
        }
    }

    fn parse_operand(&mut self) -> Arc<Node> {
        let expand = !std::mem::take(&mut self.suppress_expansion);
        if let Some(node) = self.parse_nameable(Operation, expand) {
            return node;
        }
        let token = self.peek(true, Operation);
        match token.kind {
            Literal | Quoted => {
                self.advance(true, Operation);
                self.primitive(token, expand)
            }
            _ => {
                self.error(err_at!(Syntax, token.start, "expected an operand, found {}", token));
                self.error_node(token.start)
            }
        }
    }

    /// Consumes the next token if it is an operator of `group`.
    fn take_operator(&mut self, group: &PriorityGroup, skip_line_break: bool) -> Option<OperatorDefinition> {
        let token = self.peek(skip_line_break, Operation);
        if !matches!(token.kind, Operator | TokenKind::Keyword) {
            return None;
        }
        let definition = group.find(&token.text, token.kind == TokenKind::Keyword)?.clone();
        self.advance(skip_line_break, Operation);
        Some(definition)
    }

    fn binary(&mut self, op: &OperatorDefinition, left: Arc<Node>, right: Arc<Node>) -> Arc<Node> {
        let span = Span::new(left.span().start, right.span().end);
        if op.is_accessor() {
            return self.accessor(op, left, right, span);
        }
        let node = Node::list_of(op.node_name(), vec![left, right], true)
            .with_id(self.ids.next())
            .with_span(span);
        self.expand(node, MacroType::Operation)
    }

    fn unary(&mut self, op: &OperatorDefinition, operand: Arc<Node>, span: Span) -> Arc<Node> {
        let node = Node::list_of(op.node_name(), vec![operand], true)
            .with_id(self.ids.next())
            .with_span(span);
        self.expand(node, MacroType::Operation)
    }

    /// `a.b` becomes `b[a]`, `a.f(x)` becomes `f[a, (x)]`; the operator's
    /// alias (or symbol) prefixes the call name.
    fn accessor(&mut self, op: &OperatorDefinition, receiver: Arc<Node>, member: Arc<Node>, span: Span) -> Arc<Node> {
        let prefix = op.node_name().to_string();
        let member_reference = self
            .scope
            .as_mut()
            .and_then(|scope| scope.references.remove(&member.id()));
        let (node, kind) = match &*member {
            Node::Primitive(p) => (
                Node::list_of(format!("{prefix}{}", p.value), vec![receiver], false),
                MacroType::Access,
            ),
            nameable => {
                let kind = MacroType::function_for(nameable);
                let mut operand = nameable.clone();
                let name = operand.name().unwrap_or_default().to_string();
                operand.set_name("");
                (
                    Node::list_of(format!("{prefix}{name}"), vec![receiver, Arc::new(operand)], false),
                    kind,
                )
            }
        };
        let node = node.with_id(self.ids.next()).with_span(span);
        if let (Some(reference), Some(scope)) = (member_reference, self.scope.as_mut()) {
            let inner = match reference.target {
                ReplacementTarget::NameableName { prefix } => prefix,
                ReplacementTarget::Value => String::new(),
            };
            scope.references.insert(
                node.id(),
                Reference {
                    parameter: reference.parameter,
                    target: ReplacementTarget::NameableName {
                        prefix: format!("{prefix}{inner}"),
                    },
                },
            );
        }
        self.expand(node, kind)
    }

    // ========================================================================
    // MACRO EXPANSION
    // ========================================================================

    fn finish(&mut self, node: Node, kind: MacroType, expand: bool) -> Arc<Node> {
        if expand {
            self.expand(node, kind)
        } else {
            Arc::new(node)
        }
    }

    /// Expands `node` now, or records it for expansion after every
    /// application if it depends on the parameters of the template being
    /// parsed.
    fn expand(&mut self, node: Node, kind: MacroType) -> Arc<Node> {
        if let Some(scope) = self.scope.as_mut() {
            if scope.mentions_parameter(&node) {
                scope.deferred.insert(node.id(), kind);
                return Arc::new(node);
            }
        }
        self.invoke(node, kind)
    }

    fn invoke(&mut self, node: Node, kind: MacroType) -> Arc<Node> {
        let name = match &node {
            Node::Primitive(p) => p.value.clone(),
            nameable => nameable.name().unwrap_or_default().to_string(),
        };
        let offset = node.span().start;
        match self.visible.macros.resolve(&name, kind, &node) {
            Ok(None) => Arc::new(node),
            Ok(Some(definition)) => self.apply(&definition, node),
            Err(report) => {
                self.error(report.at(offset));
                self.error_node(offset)
            }
        }
    }

    fn apply(&mut self, definition: &MacroDefinition, node: Node) -> Arc<Node> {
        let span = node.span();
        if self.depth >= MAX_MACRO_RECURSION_DEPTH {
            tracing::warn!(signature = %definition.signature, "macro recursion limit reached");
            self.error(err_at!(
                Macro,
                span.start,
                "expanding {} exceeds the maximum nesting depth of {}",
                definition.signature,
                MAX_MACRO_RECURSION_DEPTH
            ));
            return self.error_node(span.start);
        }
        #[cfg(test)]
        tests::fault_hook(&definition.signature.name);
        let mut warnings = Vec::new();
        let result = definition.apply(&node, self.options.copy_constant_macros, &mut |r| warnings.push(r));
        for warning in warnings {
            self.error(warning.at(span.start));
        }
        match result {
            Ok(result) if definition.deferred.is_empty() => result,
            Ok(result) => {
                self.depth += 1;
                let expanded = self.expand_deferred(result, definition, span);
                self.depth -= 1;
                expanded
            }
            Err(report) => {
                self.error(report.at(span.start));
                self.error_node(span.start)
            }
        }
    }

    fn expand_deferred(&mut self, result: Arc<Node>, definition: &MacroDefinition, span: Span) -> Arc<Node> {
        let mut root = Arc::try_unwrap(result).unwrap_or_else(|shared| (*shared).clone());
        for invocation in &definition.deferred {
            let Some(target) = root.get(&invocation.path) else {
                continue;
            };
            // Reports point at the invocation, not into the template.
            let target = target.clone().with_span(span);
            let expanded = self.invoke(target, invocation.kind);
            if let Some(slot) = root.get_mut(&invocation.path) {
                *slot = Arc::try_unwrap(expanded).unwrap_or_else(|shared| (*shared).clone());
            }
        }
        Arc::new(root)
    }

    // ========================================================================
    // TOKENS, REPORTS AND RECOVERY
    // ========================================================================

    fn peek(&mut self, skip_line_break: bool, mode: TokenizationMode) -> Token {
        let token = self.tokenizer.next(skip_line_break, mode, &self.visible.operators);
        self.tokenizer.reset(false);
        token
    }

    fn advance(&mut self, skip_line_break: bool, mode: TokenizationMode) -> Token {
        let token = self.tokenizer.next(skip_line_break, mode, &self.visible.operators);
        self.tokenizer.discard();
        self.drain_lexical();
        token
    }

    fn drain_lexical(&mut self) {
        for report in self.tokenizer.take_reports() {
            self.error(report);
        }
    }

    /// Records a report of any severity unless the parser is recovering.
    fn error(&mut self, report: Report) {
        if !self.recovering {
            self.reports.push(report);
        }
    }

    fn error_count(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| r.severity == Severity::Error)
            .count()
    }

    fn error_node(&mut self, offset: usize) -> Arc<Node> {
        Arc::new(
            Node::primitive(ERROR_PLACEHOLDER)
                .with_id(self.ids.next())
                .with_span(Span::new(offset, offset)),
        )
    }

    fn parameter_index(&self, name: &str) -> Option<usize> {
        self.scope
            .as_ref()?
            .parameters
            .iter()
            .position(|p| p == name)
    }

    /// Skips ahead to `closer`, a comma, a line break or the end of input.
    /// Nested groups are skipped whole. A comma or line break is consumed;
    /// `closer` and the closers of enclosing groups are left for the caller.
    fn recover(&mut self, closer: Option<TokenKind>) {
        self.recovering = true;
        loop {
            let token = self.peek(false, Word);
            match token.kind {
                Eof => break,
                kind if Some(kind) == closer || self.closes_enclosing(kind) => break,
                Comma | Eol => {
                    self.advance(false, Word);
                    break;
                }
                kind if kind.is_opener() => {
                    self.advance(false, Word);
                    self.skip_group(kind.closer());
                }
                _ => {
                    self.advance(false, Word);
                }
            }
        }
        self.recovering = false;
    }

    /// Skips past the closer of a group whose opener was just consumed.
    /// Stops early, without consuming it, at a closer an enclosing group is
    /// waiting for.
    fn skip_group(&mut self, closer: Option<TokenKind>) {
        loop {
            let token = self.peek(true, Word);
            match token.kind {
                Eof => return,
                kind if Some(kind) != closer && self.closes_enclosing(kind) => return,
                kind => {
                    self.advance(true, Word);
                    if Some(kind) == closer {
                        return;
                    }
                    if kind.is_opener() {
                        self.skip_group(kind.closer());
                    }
                }
            }
        }
    }

    fn closes_enclosing(&self, kind: TokenKind) -> bool {
        kind.is_closer() && self.open.contains(&kind)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

struct Clause {
    name: String,
    priority: Option<f64>,
    offset: usize,
}

fn macro_type(function: bool, shape: Option<TokenKind>) -> MacroType {
    match (function, shape) {
        (false, None) => MacroType::Const,
        (false, Some(LBrace)) => MacroType::Object,
        (false, Some(LBracket)) => MacroType::List,
        (false, Some(_)) => MacroType::Operation,
        (true, None) => MacroType::Access,
        (true, Some(LBrace)) => MacroType::ObjectFn,
        (true, Some(LBracket)) => MacroType::ListFn,
        (true, Some(_)) => MacroType::OperationFn,
    }
}

fn param_name(params: &[Parameter]) -> &str {
    params.last().map_or("", |p| p.name.as_str())
}

/// Validates the clauses of an `operator` statement and builds the definition.
fn build_operator(
    name: String,
    keyword: bool,
    clauses: &[Clause],
    alias: Option<String>,
) -> Result<OperatorDefinition, Report> {
    let mut kind: Option<OperatorType> = None;
    let mut right: Option<bool> = None;
    let mut accessor = false;
    let mut explicit: Option<f64> = None;
    for clause in clauses {
        match clause.name.as_str() {
            "binary" | "prefix" | "postfix" => {
                let this = match clause.name.as_str() {
                    "binary" => OperatorType::Binary,
                    "prefix" => OperatorType::Prefix,
                    _ => OperatorType::Postfix,
                };
                if let Some(other) = kind.filter(|k| *k != this) {
                    return Err(err_at!(Syntax, clause.offset, "an operator cannot be both {} and {}", other, this));
                }
                kind = Some(this);
            }
            "left-associative" | "right-associative" => {
                let this = clause.name == "right-associative";
                if right.is_some_and(|r| r != this) {
                    return Err(err_at!(Syntax, clause.offset, "an operator cannot be both left- and right-associative"));
                }
                right = Some(this);
            }
            "accessor" => accessor = true,
            other => {
                return Err(err_at!(Syntax, clause.offset, "unknown operator property '{}'", other).hint(
                    "expected binary, prefix, postfix, left-associative, right-associative or accessor",
                ));
            }
        }
        if let Some(value) = clause.priority {
            if explicit.is_some_and(|p| p != value) {
                return Err(err_at!(Syntax, clause.offset, "conflicting priorities for '{}'", name));
            }
            explicit = Some(value);
        }
    }
    let offset = clauses.first().map_or(0, |c| c.offset);
    let kind = kind.unwrap_or(OperatorType::Binary);
    if right.is_some() && kind != OperatorType::Binary {
        return Err(err_at!(Syntax, offset, "associativity only applies to binary operators"));
    }
    if accessor && kind != OperatorType::Binary {
        return Err(err_at!(Syntax, offset, "an accessor must be a binary operator"));
    }
    if accessor && right == Some(true) {
        return Err(err_at!(Syntax, offset, "an accessor cannot be right-associative"));
    }
    let default_priority = match kind {
        _ if accessor => priority::ACCESSOR,
        OperatorType::Binary => priority::CUSTOM_BINARY,
        OperatorType::Postfix => priority::CUSTOM_POSTFIX,
        OperatorType::Prefix => priority::PREFIX,
    };
    let priority = explicit.unwrap_or(default_priority);
    let mut definition = if keyword {
        OperatorDefinition::keyword(name, kind, priority)
    } else {
        OperatorDefinition::new(name, kind, priority)
    };
    if right == Some(true) {
        definition = definition.with_flags(OperatorFlags::RIGHT_ASSOCIATIVE);
    }
    if accessor {
        definition = definition.with_flags(OperatorFlags::ACCESSOR);
    }
    if let Some(alias) = alias {
        definition = definition.with_alias(alias);
    }
    Ok(definition)
}
