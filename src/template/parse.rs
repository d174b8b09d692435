//! Lexing and parsing of template text into a node tree.

use std::iter::Peekable;
use std::str::CharIndices;

use serde_json::Value;

use super::functions::BUILTINS;
use super::types::{FuncMap, TemplateError, TemplateFn, TemplateResult};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Debug, Clone)]
pub(super) enum Node {
    Text(String),
    /// Prints the pipeline's value, or binds it when `decl` is set
    Action {
        decl: Option<String>,
        pipeline: Pipeline,
    },
    If(Branch),
    With(Branch),
    Range(RangeLoop),
}

/// Body of `if` / `with`
#[derive(Debug, Clone)]
pub(super) struct Branch {
    pub decl: Option<String>,
    pub pipeline: Pipeline,
    pub body: Vec<Node>,
    pub otherwise: Vec<Node>,
}

#[derive(Debug, Clone)]
pub(super) struct RangeLoop {
    /// `$i` in `range $i, $e := ...`
    pub key: Option<String>,
    /// `$e` in `range $i, $e := ...` or `range $e := ...`
    pub value: Option<String>,
    pub pipeline: Pipeline,
    pub body: Vec<Node>,
    pub otherwise: Vec<Node>,
}

pub(super) type Pipeline = Vec<Command>;

#[derive(Clone)]
pub(super) enum Command {
    Operand(Operand),
    Call {
        name: String,
        func: TemplateFn,
        args: Vec<Operand>,
    },
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Operand(op) => f.debug_tuple("Operand").field(op).finish(),
            Command::Call { name, args, .. } => f
                .debug_struct("Call")
                .field("name", name)
                .field("args", args)
                .finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub(super) enum Operand {
    /// `.a.b.c` relative to dot; an empty path is dot itself
    Field(Vec<String>),
    /// `$name.a.b`; `$` alone is the root context
    Variable { name: String, path: Vec<String> },
    Literal(Value),
    /// `( ... )`
    Pipeline(Pipeline),
}

#[derive(Debug)]
enum Token {
    Field(Vec<String>),
    Variable(String, Vec<String>),
    Ident(String),
    Literal(Value),
    Pipe,
    LParen,
    RParen,
    Comma,
    Declare,
}

enum Item {
    Text(String),
    Action(String),
}

/// How a node list ended
enum Stop {
    Eof,
    End,
    /// `{{else ...}}` with whatever followed the keyword
    Else(String),
}

/// Parse `text` into nodes. Functions resolve against `funcs` first and the
/// built-in set second.
pub(super) fn parse(name: &str, text: &str, funcs: &FuncMap) -> TemplateResult<Vec<Node>> {
    let items = lex(name, text)?;
    let mut parser = Parser {
        name,
        funcs,
        items: items.into_iter(),
        vars: Vec::new(),
    };

    let (nodes, stop) = parser.parse_list()?;
    match stop {
        Stop::Eof => Ok(nodes),
        Stop::End => Err(parser.error("unexpected {{end}}")),
        Stop::Else(_) => Err(parser.error("unexpected {{else}}")),
    }
}

fn lex(name: &str, text: &str) -> TemplateResult<Vec<Item>> {
    let mut items = Vec::new();
    let mut rest = text;
    let mut trim_leading = false;

    loop {
        let Some(start) = rest.find(OPEN) else {
            push_text(&mut items, rest, trim_leading, false);
            break;
        };

        let after = &rest[start + OPEN.len()..];
        let (trim_trailing, after) = match after.strip_prefix('-') {
            Some(stripped) if stripped.starts_with(char::is_whitespace) => (true, stripped),
            _ => (false, after),
        };
        push_text(&mut items, &rest[..start], trim_leading, trim_trailing);

        let is_comment = after.trim_start().starts_with("/*");
        let end = if is_comment {
            find_comment_close(name, after)?
        } else {
            find_close(name, after)?
        };

        let mut body = &after[..end];
        trim_leading = false;
        if let Some(stripped) = body.strip_suffix('-') {
            if stripped.ends_with(char::is_whitespace) {
                trim_leading = true;
                body = stripped;
            }
        }
        if !is_comment {
            items.push(Item::Action(body.trim().to_string()));
        }

        rest = &after[end + CLOSE.len()..];
    }

    Ok(items)
}

fn push_text(items: &mut Vec<Item>, text: &str, trim_start: bool, trim_end: bool) {
    let mut text = text;
    if trim_start {
        text = text.trim_start();
    }
    if trim_end {
        text = text.trim_end();
    }
    if !text.is_empty() {
        items.push(Item::Text(text.to_string()));
    }
}

/// Byte offset of the closing delimiter, skipping over quoted strings.
fn find_close(name: &str, s: &str) -> TemplateResult<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                i += 1;
                loop {
                    match bytes.get(i) {
                        None | Some(b'\n') => {
                            return Err(TemplateError::syntax(name, "unterminated quoted string"))
                        }
                        Some(b'\\') => i += 2,
                        Some(b'"') => break,
                        Some(_) => i += 1,
                    }
                }
            }
            b'`' => {
                i += 1;
                while bytes.get(i) != Some(&b'`') {
                    if i >= bytes.len() {
                        return Err(TemplateError::syntax(name, "unterminated raw quoted string"));
                    }
                    i += 1;
                }
            }
            b'}' if bytes.get(i + 1) == Some(&b'}') => return Ok(i),
            _ => {}
        }
        i += 1;
    }
    Err(TemplateError::syntax(name, "unclosed action"))
}

/// Byte offset of the closing delimiter of a `/* ... */` action.
///
/// The comment must end right at the delimiter (`*/}}` or `*/ -}}`).
fn find_comment_close(name: &str, s: &str) -> TemplateResult<usize> {
    let open = s.find("/*").unwrap_or(0) + 2;
    let Some(close) = s[open..].find("*/") else {
        return Err(TemplateError::syntax(name, "unclosed comment"));
    };

    let tail_start = open + close + 2;
    let tail = &s[tail_start..];
    if tail.starts_with(CLOSE) {
        return Ok(tail_start);
    }
    let trimmed = tail.trim_start();
    let gap = tail.len() - trimmed.len();
    if gap > 0 && trimmed.starts_with("-}}") {
        return Ok(tail_start + gap + 1);
    }
    Err(TemplateError::syntax(name, "comment ends before closing delimiter"))
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Split a leading keyword (`if`, `end`, ...) from the rest of an action body
fn split_keyword(body: &str) -> (&str, &str) {
    let end = body.find(|c: char| !is_ident_char(c)).unwrap_or(body.len());
    (&body[..end], body[end..].trim_start())
}

struct Parser<'a> {
    name: &'a str,
    funcs: &'a FuncMap,
    items: std::vec::IntoIter<Item>,
    /// Variables in scope, innermost last
    vars: Vec<String>,
}

impl Parser<'_> {
    fn error(&self, message: impl Into<String>) -> TemplateError {
        TemplateError::syntax(self.name, message)
    }

    fn parse_list(&mut self) -> TemplateResult<(Vec<Node>, Stop)> {
        let mut nodes = Vec::new();

        while let Some(item) = self.items.next() {
            let body = match item {
                Item::Text(text) => {
                    nodes.push(Node::Text(text));
                    continue;
                }
                Item::Action(body) => body,
            };

            let (keyword, rest) = split_keyword(&body);
            match keyword {
                "end" => {
                    if !rest.is_empty() {
                        return Err(self.error(format!("unexpected {rest:?} in end")));
                    }
                    return Ok((nodes, Stop::End));
                }
                "else" => return Ok((nodes, Stop::Else(rest.to_string()))),
                "if" => nodes.push(Node::If(self.parse_branch("if", rest)?)),
                "with" => nodes.push(Node::With(self.parse_branch("with", rest)?)),
                "range" => nodes.push(self.parse_range(rest)?),
                "define" | "template" | "block" | "break" | "continue" => {
                    return Err(self.error(format!("unsupported action \"{keyword}\"")));
                }
                _ => {
                    let (mut names, pipeline) = self.parse_header("command", &body, 1)?;
                    nodes.push(Node::Action {
                        decl: names.pop(),
                        pipeline,
                    });
                }
            }
        }

        Ok((nodes, Stop::Eof))
    }

    fn parse_branch(&mut self, keyword: &str, header: &str) -> TemplateResult<Branch> {
        let mark = self.vars.len();
        let (mut names, pipeline) = self.parse_header(keyword, header, 1)?;
        let (body, stop) = self.parse_list()?;
        let otherwise = self.parse_otherwise(keyword, stop)?;
        self.vars.truncate(mark);

        Ok(Branch {
            decl: names.pop(),
            pipeline,
            body,
            otherwise,
        })
    }

    fn parse_range(&mut self, header: &str) -> TemplateResult<Node> {
        let mark = self.vars.len();
        let (mut names, pipeline) = self.parse_header("range", header, 2)?;
        let value = names.pop();
        let key = names.pop();
        let (body, stop) = self.parse_list()?;
        let otherwise = self.parse_otherwise("range", stop)?;
        self.vars.truncate(mark);

        Ok(Node::Range(RangeLoop {
            key,
            value,
            pipeline,
            body,
            otherwise,
        }))
    }

    /// Parse what follows the body of a block up to its `{{end}}`.
    ///
    /// `{{else if ...}}` (and `{{else with ...}}` inside `with`) nests a block
    /// that shares the outer `{{end}}`.
    fn parse_otherwise(&mut self, keyword: &str, stop: Stop) -> TemplateResult<Vec<Node>> {
        match stop {
            Stop::End => Ok(Vec::new()),
            Stop::Eof => Err(self.error(format!("unexpected EOF in {keyword}"))),
            Stop::Else(rest) if rest.is_empty() => match self.parse_list()? {
                (nodes, Stop::End) => Ok(nodes),
                (_, Stop::Eof) => Err(self.error(format!("unexpected EOF in {keyword}"))),
                (_, Stop::Else(_)) => Err(self.error(format!("expected end in {keyword}, found else"))),
            },
            Stop::Else(rest) => {
                let (chained, header) = split_keyword(&rest);
                match chained {
                    "if" if keyword != "range" => Ok(vec![Node::If(self.parse_branch("if", header)?)]),
                    "with" if keyword == "with" => {
                        Ok(vec![Node::With(self.parse_branch("with", header)?)])
                    }
                    _ => Err(self.error(format!("unexpected \"else {rest}\" in {keyword}"))),
                }
            }
        }
    }

    /// Parse `[$a[, $b] :=] pipeline`, bringing declared variables into scope.
    fn parse_header(
        &mut self,
        context: &str,
        header: &str,
        max_vars: usize,
    ) -> TemplateResult<(Vec<String>, Pipeline)> {
        let tokens = tokenize(self.name, header)?;
        let (names, tokens) = match tokens.iter().position(|t| matches!(t, Token::Declare)) {
            Some(at) => (self.declared_names(&tokens[..at], max_vars)?, &tokens[at + 1..]),
            None => (Vec::new(), &tokens[..]),
        };
        if tokens.is_empty() {
            return Err(self.error(format!("missing value for {context}")));
        }

        let mut pos = 0;
        let pipeline = self.parse_pipeline(tokens, &mut pos, false)?;
        self.vars.extend(names.iter().cloned());
        Ok((names, pipeline))
    }

    fn declared_names(&self, tokens: &[Token], max_vars: usize) -> TemplateResult<Vec<String>> {
        let mut names = Vec::new();
        for (i, token) in tokens.iter().enumerate() {
            match token {
                Token::Variable(name, path) if i % 2 == 0 && path.is_empty() && name != "$" => {
                    names.push(name.clone())
                }
                Token::Comma if i % 2 == 1 => {}
                _ => return Err(self.error("bad variable declaration")),
            }
        }
        if names.is_empty() || tokens.len() % 2 == 0 {
            return Err(self.error("bad variable declaration"));
        }
        if names.len() > max_vars {
            return Err(self.error("too many declarations"));
        }
        Ok(names)
    }

    fn parse_pipeline(&self, tokens: &[Token], pos: &mut usize, nested: bool) -> TemplateResult<Pipeline> {
        let mut commands = Vec::new();
        loop {
            commands.push(self.parse_command(tokens, pos, commands.len())?);
            match tokens.get(*pos) {
                Some(Token::Pipe) => *pos += 1,
                Some(Token::RParen) if nested => {
                    *pos += 1;
                    return Ok(commands);
                }
                None if !nested => return Ok(commands),
                None => return Err(self.error("unclosed left paren")),
                Some(other) => return Err(self.error(format!("unexpected {}", describe(other)))),
            }
        }
    }

    fn parse_command(&self, tokens: &[Token], pos: &mut usize, stage: usize) -> TemplateResult<Command> {
        match tokens.get(*pos) {
            None | Some(Token::Pipe) | Some(Token::RParen) => Err(self.error(if stage == 0 {
                "missing value for command"
            } else {
                "missing command in pipeline"
            })),
            Some(Token::Ident(ident)) => {
                *pos += 1;
                let func = self.lookup(ident)?;
                let mut args = Vec::new();
                while starts_operand(tokens.get(*pos)) {
                    args.push(self.parse_operand(tokens, pos)?);
                }
                Ok(Command::Call {
                    name: ident.clone(),
                    func,
                    args,
                })
            }
            Some(_) => {
                if stage > 0 {
                    return Err(self.error(format!(
                        "non executable command in pipeline stage {}",
                        stage + 1
                    )));
                }
                let operand = self.parse_operand(tokens, pos)?;
                if starts_operand(tokens.get(*pos)) {
                    return Err(self.error("can't give argument to non-function"));
                }
                Ok(Command::Operand(operand))
            }
        }
    }

    fn parse_operand(&self, tokens: &[Token], pos: &mut usize) -> TemplateResult<Operand> {
        let Some(token) = tokens.get(*pos) else {
            return Err(self.error("missing operand"));
        };
        *pos += 1;

        match token {
            Token::Field(path) => Ok(Operand::Field(path.clone())),
            Token::Variable(name, path) => {
                if name != "$" && !self.vars.contains(name) {
                    return Err(self.error(format!("undefined variable \"{name}\"")));
                }
                Ok(Operand::Variable {
                    name: name.clone(),
                    path: path.clone(),
                })
            }
            Token::Literal(value) => Ok(Operand::Literal(value.clone())),
            // A function name in argument position is called without arguments
            Token::Ident(ident) => Ok(Operand::Pipeline(vec![Command::Call {
                name: ident.clone(),
                func: self.lookup(ident)?,
                args: Vec::new(),
            }])),
            Token::LParen => Ok(Operand::Pipeline(self.parse_pipeline(tokens, pos, true)?)),
            other => Err(self.error(format!("unexpected {} in operand", describe(other)))),
        }
    }

    fn lookup(&self, ident: &str) -> TemplateResult<TemplateFn> {
        self.funcs
            .get(ident)
            .or_else(|| BUILTINS.get(ident))
            .cloned()
            .ok_or_else(|| self.error(format!("function \"{ident}\" not defined")))
    }
}

fn starts_operand(token: Option<&Token>) -> bool {
    matches!(
        token,
        Some(Token::Field(_) | Token::Variable(..) | Token::Ident(_) | Token::Literal(_) | Token::LParen)
    )
}

fn describe(token: &Token) -> String {
    match token {
        Token::Field(path) => format!("field .{}", path.join(".")),
        Token::Variable(name, _) => format!("variable {name}"),
        Token::Ident(ident) => format!("identifier \"{ident}\""),
        Token::Literal(value) => format!("literal {value}"),
        Token::Pipe => "\"|\"".to_string(),
        Token::LParen => "\"(\"".to_string(),
        Token::RParen => "\")\"".to_string(),
        Token::Comma => "\",\"".to_string(),
        Token::Declare => "\":=\"".to_string(),
    }
}

fn field_path(
    name: &str,
    chars: &mut Peekable<CharIndices<'_>>,
    allow_bare: bool,
) -> TemplateResult<Vec<String>> {
    let mut path = Vec::new();
    while let Some(&(_, '.')) = chars.peek() {
        chars.next();
        let mut segment = String::new();
        while let Some(&(_, c)) = chars.peek() {
            if !is_ident_char(c) {
                break;
            }
            segment.push(c);
            chars.next();
        }
        if segment.is_empty() {
            if path.is_empty() && allow_bare {
                break;
            }
            return Err(TemplateError::syntax(name, "bad field path"));
        }
        path.push(segment);
    }
    Ok(path)
}

fn tokenize(name: &str, body: &str) -> TemplateResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = body.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        match c {
            '|' | '(' | ')' | ',' => {
                chars.next();
                tokens.push(match c {
                    '|' => Token::Pipe,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    _ => Token::Comma,
                });
            }
            ':' => {
                chars.next();
                if chars.next().map(|(_, c)| c) != Some('=') {
                    return Err(TemplateError::syntax(name, "expected :="));
                }
                tokens.push(Token::Declare);
            }
            '.' => tokens.push(Token::Field(field_path(name, &mut chars, true)?)),
            '$' => {
                chars.next();
                let mut var = String::from("$");
                while let Some(&(_, c)) = chars.peek() {
                    if !is_ident_char(c) {
                        break;
                    }
                    var.push(c);
                    chars.next();
                }
                let path = field_path(name, &mut chars, false)?;
                tokens.push(Token::Variable(var, path));
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        None => {
                            return Err(TemplateError::syntax(name, "unterminated quoted string"))
                        }
                        Some((_, '"')) => break,
                        Some((_, '\\')) => match chars.next() {
                            Some((_, 'n')) => value.push('\n'),
                            Some((_, 't')) => value.push('\t'),
                            Some((_, 'r')) => value.push('\r'),
                            Some((_, c @ ('"' | '\\'))) => value.push(c),
                            Some((_, other)) => {
                                return Err(TemplateError::syntax(
                                    name,
                                    format!("unknown escape sequence \\{other}"),
                                ))
                            }
                            None => {
                                return Err(TemplateError::syntax(
                                    name,
                                    "unterminated quoted string",
                                ))
                            }
                        },
                        Some((_, c)) => value.push(c),
                    }
                }
                tokens.push(Token::Literal(Value::String(value)));
            }
            '`' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        None => {
                            return Err(TemplateError::syntax(
                                name,
                                "unterminated raw quoted string",
                            ))
                        }
                        Some((_, '`')) => break,
                        Some((_, c)) => value.push(c),
                    }
                }
                tokens.push(Token::Literal(Value::String(value)));
            }
            c if c.is_ascii_digit() || c == '-' || c == '+' => {
                let mut end = body.len();
                chars.next();
                while let Some(&(i, c)) = chars.peek() {
                    if !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+')) {
                        end = i;
                        break;
                    }
                    chars.next();
                }
                tokens.push(Token::Literal(parse_number(name, &body[start..end])?));
            }
            c if is_ident_char(c) => {
                let mut ident = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if !is_ident_char(c) {
                        break;
                    }
                    ident.push(c);
                    chars.next();
                }
                tokens.push(match ident.as_str() {
                    "true" => Token::Literal(Value::Bool(true)),
                    "false" => Token::Literal(Value::Bool(false)),
                    "nil" => Token::Literal(Value::Null),
                    _ => Token::Ident(ident),
                });
            }
            other => {
                return Err(TemplateError::syntax(
                    name,
                    format!("unexpected {other:?} in command"),
                ))
            }
        }
    }

    Ok(tokens)
}

fn parse_number(name: &str, text: &str) -> TemplateResult<Value> {
    let bad = || TemplateError::syntax(name, format!("bad number syntax: {text:?}"));
    let digits = text.strip_prefix('+').unwrap_or(text);
    if let Ok(n) = digits.parse::<i64>() {
        return Ok(Value::from(n));
    }
    let f = digits.parse::<f64>().map_err(|_| bad())?;
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(bad)
}
