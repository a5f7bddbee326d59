//! Structural syntax check for host script text.
//!
//! The checker follows Python's lexical rules closely enough to reject the
//! malformed fragments a language model tends to emit: unterminated strings,
//! unbalanced brackets, stray characters, missing block bodies and broken
//! indentation. It does not build a full expression grammar.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("line {line}, column {column}: {message}")]
pub struct SyntaxError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl SyntaxError {
    fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Name,
    Int,
    Float,
    /// Decoded string contents.
    Str(String),
    Op,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn is_op(&self, op: &str) -> bool {
        self.kind == TokenKind::Op && self.text == op
    }

    pub fn is_name(&self, name: &str) -> bool {
        self.kind == TokenKind::Name && self.text == name
    }

    fn is_operand(&self) -> bool {
        match self.kind {
            TokenKind::Name => !is_keyword(&self.text),
            TokenKind::Int | TokenKind::Float | TokenKind::Str(_) => true,
            TokenKind::Op => false,
        }
    }
}

/// One logical line: a statement after continuation lines are joined.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalLine {
    /// Physical line of the first token.
    pub line: usize,
    /// Indentation width, tabs expanded to multiples of eight.
    pub indent: usize,
    pub tokens: Vec<Token>,
}

impl LogicalLine {
    pub fn ends_with_colon(&self) -> bool {
        self.tokens.last().is_some_and(|t| t.is_op(":"))
    }
}

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "case", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "match", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "type", "while", "with", "yield",
];

const COMPOUND: &[&str] = &[
    "if", "elif", "else", "for", "while", "def", "class", "try", "except", "finally", "with",
];

fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

const THREE_CHAR_OPS: &[&str] = &["**=", "//=", ">>=", "<<=", "..."];
const TWO_CHAR_OPS: &[&str] = &[
    "**", "//", ">>", "<<", "->", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "@=", ":=",
];
const ONE_CHAR_OPS: &str = "+-*/%@&|^~<>=.,:;";

// =============================================================================
// Public entry points
// =============================================================================

pub fn check(source: &str) -> Result<(), SyntaxError> {
    logical_lines(source).map(|_| ())
}

/// Tokenize `source` and verify its block structure.
pub fn logical_lines(source: &str) -> Result<Vec<LogicalLine>, SyntaxError> {
    let lines = Lexer::new(source).run()?;
    check_statements(&lines)?;
    check_blocks(&lines)?;
    Ok(lines)
}

// =============================================================================
// Lexer
// =============================================================================

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    brackets: Vec<(char, usize, usize)>,
    lines: Vec<LogicalLine>,
    current: Vec<Token>,
    current_line: usize,
    current_indent: usize,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            brackets: Vec::new(),
            lines: Vec::new(),
            current: Vec::new(),
            current_line: 1,
            current_indent: 0,
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn run(mut self) -> Result<Vec<LogicalLine>, SyntaxError> {
        let mut at_line_start = true;
        while self.pos < self.chars.len() {
            if at_line_start {
                if !self.start_line() {
                    continue;
                }
                at_line_start = false;
            }
            let Some(c) = self.peek(0) else { break };
            match c {
                ' ' | '\t' | '\x0c' | '\r' => {
                    self.bump();
                }
                '\n' => {
                    self.bump();
                    if self.brackets.is_empty() {
                        self.finish_line();
                        at_line_start = true;
                    }
                }
                '#' => self.skip_comment(),
                '\\' => self.continuation()?,
                '"' | '\'' => self.string(false)?,
                '(' | '[' | '{' => {
                    self.brackets.push((c, self.line, self.column));
                    self.single_op(c);
                }
                ')' | ']' | '}' => self.close_bracket(c)?,
                c if c.is_ascii_digit() => self.number()?,
                '.' if self.peek(1).is_some_and(|n| n.is_ascii_digit()) => self.number()?,
                c if c == '_' || c.is_alphabetic() => self.name()?,
                _ => self.operator(c)?,
            }
        }

        if let Some((open, line, column)) = self.brackets.last().copied() {
            return Err(SyntaxError::new(
                line,
                column,
                format!("'{}' was never closed", open),
            ));
        }
        self.finish_line();
        Ok(self.lines)
    }

    /// Measure indentation at the start of a physical line. Returns false when
    /// the line is blank or comment-only and was consumed.
    fn start_line(&mut self) -> bool {
        let mut width = 0;
        while let Some(c) = self.peek(0) {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\x0c' => width = 0,
                _ => break,
            }
            self.bump();
        }
        match self.peek(0) {
            None => false,
            Some('\n') | Some('\r') => {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
                false
            }
            Some('#') => {
                self.skip_comment();
                self.bump();
                false
            }
            Some(_) => {
                self.current_indent = width;
                self.current_line = self.line;
                true
            }
        }
    }

    fn finish_line(&mut self) {
        if self.current.is_empty() {
            return;
        }
        self.lines.push(LogicalLine {
            line: self.current_line,
            indent: self.current_indent,
            tokens: std::mem::take(&mut self.current),
        });
    }

    fn push(&mut self, kind: TokenKind, text: String, line: usize, column: usize) {
        self.current.push(Token {
            kind,
            text,
            line,
            column,
        });
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek(0) {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn continuation(&mut self) -> Result<(), SyntaxError> {
        let (line, column) = (self.line, self.column);
        self.bump();
        if self.peek(0) == Some('\r') {
            self.bump();
        }
        match self.peek(0) {
            Some('\n') => {
                self.bump();
                Ok(())
            }
            None => Err(SyntaxError::new(line, column, "unexpected EOF while parsing")),
            Some(_) => Err(SyntaxError::new(
                line,
                column,
                "unexpected character after line continuation character",
            )),
        }
    }

    fn close_bracket(&mut self, close: char) -> Result<(), SyntaxError> {
        let (line, column) = (self.line, self.column);
        let expected = match close {
            ')' => '(',
            ']' => '[',
            _ => '{',
        };
        match self.brackets.pop() {
            None => Err(SyntaxError::new(
                line,
                column,
                format!("unmatched '{}'", close),
            )),
            Some((open, open_line, _)) if open != expected => {
                let mut message = format!(
                    "closing parenthesis '{}' does not match opening parenthesis '{}'",
                    close, open
                );
                if open_line != line {
                    message.push_str(&format!(" on line {}", open_line));
                }
                Err(SyntaxError::new(line, column, message))
            }
            Some(_) => {
                self.single_op(close);
                Ok(())
            }
        }
    }

    fn single_op(&mut self, c: char) {
        let (line, column) = (self.line, self.column);
        self.bump();
        self.push(TokenKind::Op, c.to_string(), line, column);
    }

    fn operator(&mut self, c: char) -> Result<(), SyntaxError> {
        let (line, column) = (self.line, self.column);
        let ahead: String = (0..3).filter_map(|i| self.peek(i)).collect();
        let three = ahead.chars().take(3).collect::<String>();
        let two = ahead.chars().take(2).collect::<String>();

        let op = if THREE_CHAR_OPS.contains(&three.as_str()) {
            three
        } else if TWO_CHAR_OPS.contains(&two.as_str()) {
            two
        } else if ONE_CHAR_OPS.contains(c) {
            c.to_string()
        } else {
            return Err(SyntaxError::new(
                line,
                column,
                format!("invalid character '{}' (U+{:04X})", c, c as u32),
            ));
        };

        for _ in 0..op.chars().count() {
            self.bump();
        }
        self.push(TokenKind::Op, op, line, column);
        Ok(())
    }

    fn name(&mut self) -> Result<(), SyntaxError> {
        let (line, column) = (self.line, self.column);
        let mut text = String::new();
        while let Some(c) = self.peek(0) {
            if c == '_' || c.is_alphanumeric() {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }

        let is_prefix = matches!(
            text.to_ascii_lowercase().as_str(),
            "r" | "u" | "b" | "f" | "br" | "rb" | "fr" | "rf"
        );
        if is_prefix && matches!(self.peek(0), Some('"') | Some('\'')) {
            let raw = text.to_ascii_lowercase().contains('r');
            return self.string_at(raw, line, column, text);
        }

        self.push(TokenKind::Name, text, line, column);
        Ok(())
    }

    fn number(&mut self) -> Result<(), SyntaxError> {
        let (line, column) = (self.line, self.column);
        let mut text = String::new();
        let mut float = false;

        let radix_prefix = self.peek(0) == Some('0')
            && matches!(
                self.peek(1),
                Some('x') | Some('X') | Some('o') | Some('O') | Some('b') | Some('B')
            );
        if radix_prefix {
            for _ in 0..2 {
                if let Some(c) = self.bump() {
                    text.push(c);
                }
            }
            while let Some(c) = self.peek(0) {
                if c.is_ascii_hexdigit() || c == '_' {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
        } else {
            self.digits(&mut text);
            if self.peek(0) == Some('.') {
                float = true;
                text.push('.');
                self.bump();
                self.digits(&mut text);
            }
            if matches!(self.peek(0), Some('e') | Some('E')) {
                let signed = matches!(self.peek(1), Some('+') | Some('-'));
                let digit_at = if signed { 2 } else { 1 };
                if self.peek(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                    float = true;
                    for _ in 0..digit_at {
                        if let Some(c) = self.bump() {
                            text.push(c);
                        }
                    }
                    self.digits(&mut text);
                }
            }
            if matches!(self.peek(0), Some('j') | Some('J')) {
                float = true;
                text.push('j');
                self.bump();
            }
        }

        if self.peek(0).is_some_and(|c| c == '_' || c.is_alphabetic()) {
            return Err(SyntaxError::new(line, column, "invalid decimal literal"));
        }

        let kind = if float {
            TokenKind::Float
        } else {
            TokenKind::Int
        };
        self.push(kind, text, line, column);
        Ok(())
    }

    fn digits(&mut self, text: &mut String) {
        while let Some(c) = self.peek(0) {
            if c.is_ascii_digit() || c == '_' {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
    }

    fn string(&mut self, raw: bool) -> Result<(), SyntaxError> {
        let (line, column) = (self.line, self.column);
        self.string_at(raw, line, column, String::new())
    }

    fn string_at(
        &mut self,
        raw: bool,
        line: usize,
        column: usize,
        prefix: String,
    ) -> Result<(), SyntaxError> {
        let Some(quote) = self.bump() else {
            return Err(SyntaxError::new(line, column, "unexpected EOF while parsing"));
        };
        let triple = self.peek(0) == Some(quote) && self.peek(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        let mut text = prefix;
        let delimiter: String = std::iter::repeat_n(quote, if triple { 3 } else { 1 }).collect();
        text.push_str(&delimiter);
        let mut value = String::new();

        loop {
            let Some(c) = self.peek(0) else {
                let message = if triple {
                    format!(
                        "unterminated triple-quoted string literal (detected at line {})",
                        self.line
                    )
                } else {
                    format!("unterminated string literal (detected at line {})", self.line)
                };
                return Err(SyntaxError::new(line, column, message));
            };

            if c == '\n' && !triple {
                return Err(SyntaxError::new(
                    line,
                    column,
                    format!("unterminated string literal (detected at line {})", self.line),
                ));
            }

            if c == quote
                && (!triple || (self.peek(1) == Some(quote) && self.peek(2) == Some(quote)))
            {
                for _ in 0..delimiter.len() {
                    self.bump();
                }
                text.push_str(&delimiter);
                break;
            }

            self.bump();
            text.push(c);
            if c == '\\' {
                let Some(next) = self.bump() else { continue };
                text.push(next);
                if raw {
                    value.push('\\');
                    value.push(next);
                } else {
                    push_escape(&mut value, next);
                }
            } else {
                value.push(c);
            }
        }

        self.push(TokenKind::Str(value), text, line, column);
        Ok(())
    }
}

fn push_escape(value: &mut String, escaped: char) {
    match escaped {
        'n' => value.push('\n'),
        't' => value.push('\t'),
        'r' => value.push('\r'),
        '0' => value.push('\0'),
        '\\' => value.push('\\'),
        '\'' => value.push('\''),
        '"' => value.push('"'),
        '\n' => {}
        other => {
            value.push('\\');
            value.push(other);
        }
    }
}

// =============================================================================
// Statement and block checks
// =============================================================================

fn check_statements(lines: &[LogicalLine]) -> Result<(), SyntaxError> {
    for logical in lines {
        let Some(first) = logical.tokens.first() else {
            continue;
        };

        if first.kind == TokenKind::Name && COMPOUND.contains(&first.text.as_str()) {
            let mut depth = 0i32;
            let mut has_colon = false;
            for token in &logical.tokens {
                match token.text.as_str() {
                    "(" | "[" | "{" if token.kind == TokenKind::Op => depth += 1,
                    ")" | "]" | "}" if token.kind == TokenKind::Op => depth -= 1,
                    ":" if token.kind == TokenKind::Op && depth == 0 => has_colon = true,
                    _ => {}
                }
            }
            if !has_colon {
                let last = logical.tokens.last().unwrap_or(first);
                return Err(SyntaxError::new(
                    last.line,
                    last.column + last.text.chars().count(),
                    "expected ':'",
                ));
            }
        }

        for pair in logical.tokens.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let both_strings =
                matches!(a.kind, TokenKind::Str(_)) && matches!(b.kind, TokenKind::Str(_));
            if a.is_operand() && b.is_operand() && !both_strings {
                let message = if a.is_name("print") {
                    "Missing parentheses in call to 'print'".to_string()
                } else {
                    "invalid syntax".to_string()
                };
                return Err(SyntaxError::new(b.line, b.column, message));
            }
        }
    }
    Ok(())
}

fn check_blocks(lines: &[LogicalLine]) -> Result<(), SyntaxError> {
    let mut levels = vec![0usize];
    let mut pending_header: Option<usize> = None;

    for logical in lines {
        let top = levels.last().copied().unwrap_or(0);
        if let Some(header_line) = pending_header.take() {
            if logical.indent <= top {
                return Err(SyntaxError::new(
                    logical.line,
                    logical.indent + 1,
                    format!("expected an indented block after line {}", header_line),
                ));
            }
            levels.push(logical.indent);
        } else if logical.indent > top {
            return Err(SyntaxError::new(
                logical.line,
                logical.indent + 1,
                "unexpected indent",
            ));
        } else if logical.indent < top {
            while levels.last().is_some_and(|&level| level > logical.indent) {
                levels.pop();
            }
            if levels.last().copied() != Some(logical.indent) {
                return Err(SyntaxError::new(
                    logical.line,
                    logical.indent + 1,
                    "unindent does not match any outer indentation level",
                ));
            }
        }

        if logical.ends_with_colon() {
            pending_header = Some(logical.line);
        }
    }

    if let Some(header_line) = pending_header {
        let eof_line = lines.last().map(|l| l.line + 1).unwrap_or(1);
        return Err(SyntaxError::new(
            eof_line,
            1,
            format!("expected an indented block after line {}", header_line),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(src: &str) -> SyntaxError {
        check(src).expect_err("expected a syntax error")
    }

    #[test]
    fn accepts_typical_host_script() {
        let src = r#"
import nuke

# build a blur
blur = nuke.createNode('Blur')
blur['size'].setValue(10)
if blur:
    blur.setXYpos(100, -200)
    values = [1.0, 2.5e3,
              3]
else:
    print("no node")
doc = """multi
line"""
total = 1 + \
    2
"#;
        check(src).unwrap();
    }

    #[test]
    fn logical_lines_join_continuations() {
        let lines = logical_lines("a = (1,\n     2)\nb = 3\n").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].line, 3);
        assert_eq!(lines[0].tokens.last().unwrap().text, ")");
    }

    #[test]
    fn decodes_string_escapes() {
        let lines = logical_lines(r#"x = 'it\'s\n'"#).unwrap();
        assert_eq!(lines[0].tokens[2].kind, TokenKind::Str("it's\n".into()));
        let raw = logical_lines(r"x = r'C:\n'").unwrap();
        assert_eq!(raw[0].tokens[2].kind, TokenKind::Str(r"C:\n".into()));
    }

    #[test]
    fn unterminated_string_reports_start() {
        let e = err("x = 1\nname = 'Blur\n");
        assert_eq!((e.line, e.column), (2, 8));
        assert!(e.message.starts_with("unterminated string literal"));
        assert!(err("s = '''open").message.contains("triple-quoted"));
    }

    #[test]
    fn bracket_errors() {
        let e = err("nuke.createNode('Blur'");
        assert_eq!(e.message, "'(' was never closed");
        assert_eq!(err("x = 1)").message, "unmatched ')'");
        assert!(err("x = [1, 2)").message.contains("does not match"));
    }

    #[test]
    fn invalid_characters() {
        let e = err("x = $y");
        assert_eq!((e.line, e.column), (1, 5));
        assert!(e.message.starts_with("invalid character '$'"));
        assert!(err("x = 1 ? 2").message.contains("'?'"));
    }

    #[test]
    fn block_structure() {
        assert!(
            err("if x:\nprint(x)")
                .message
                .starts_with("expected an indented block")
        );
        assert_eq!(err("x = 1\n    y = 2").message, "unexpected indent");
        assert_eq!(
            err("if x:\n    y = 1\n  z = 2").message,
            "unindent does not match any outer indentation level"
        );
        assert!(
            err("for n in nodes:\n")
                .message
                .starts_with("expected an indented block")
        );
    }

    #[test]
    fn statement_shape() {
        assert_eq!(err("if x\n    y = 1").message, "expected ':'");
        assert_eq!(
            err("print 'hello'").message,
            "Missing parentheses in call to 'print'"
        );
        assert_eq!(err("x = 1 2").message, "invalid syntax");
        check("x = 'a' 'b'").unwrap();
        check("for n in nuke.allNodes():\n    pass").unwrap();
    }

    #[test]
    fn comments_and_blank_lines_do_not_affect_indentation() {
        check("if x:\n\n    # note\n    y = 1\n# trailing\n").unwrap();
    }

    #[test]
    fn bad_number_literal() {
        assert_eq!(err("x = 12abc").message, "invalid decimal literal");
    }
}
