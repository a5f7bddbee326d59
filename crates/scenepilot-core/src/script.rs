//! The constrained host-script instruction set.
//!
//! Scripts are never executed as arbitrary source. They are parsed into a
//! [`Program`] of explicit instructions, which the engine interprets against
//! the host capability interface. Anything outside this grammar is rejected
//! before the host is touched.

use crate::AttrValue;
use crate::syntax::{self, LogicalLine, SyntaxError, Token, TokenKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Highest input slot count a node may have. Larger indices are rejected.
pub const MAX_INPUTS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("Syntax error: {0}")]
    Syntax(#[from] SyntaxError),
    #[error("line {line}: unsupported statement `{statement}`")]
    Unsupported { line: usize, statement: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instruction {
    /// `import nuke`
    ImportHost,
    /// `var = nuke.createNode('Class')`, or the bare call.
    Create { var: Option<String>, class: String },
    /// `var = nuke.toNode('name')`. Binds nothing if the node is missing.
    Lookup { var: String, name: String },
    SetName { var: String, name: String },
    SetPosition { var: String, x: i64, y: i64 },
    SetAttr {
        var: String,
        attr: String,
        value: AttrValue,
    },
    /// `target.setInput(input, source)`. A `None` source clears the input.
    Connect {
        target: String,
        input: usize,
        source: Option<String>,
    },
    Delete { var: String },
    ClearSelection,
    Print { text: String },
    /// `if var:` runs `body` only when `var` refers to a node.
    Guard { var: String, body: Vec<Instruction> },
}

impl Instruction {
    /// Whether running this instruction can change host state.
    pub fn mutates_host(&self) -> bool {
        match self {
            Instruction::ImportHost | Instruction::Lookup { .. } | Instruction::Print { .. } => false,
            Instruction::Guard { body, .. } => body.iter().any(Instruction::mutates_host),
            _ => true,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Instruction::ImportHost => "import the host module".to_string(),
            Instruction::Create { class, .. } => format!("create a {} node", class),
            Instruction::Lookup { name, .. } => format!("look up node '{}'", name),
            Instruction::SetName { var, name } => format!("rename {} to '{}'", var, name),
            Instruction::SetPosition { var, x, y } => format!("move {} to ({}, {})", var, x, y),
            Instruction::SetAttr { var, attr, value } => {
                format!("set {}.{} = {}", var, attr, render_literal(value))
            }
            Instruction::Connect {
                target,
                input,
                source: Some(source),
            } => format!("connect {} into input {} of {}", source, input, target),
            Instruction::Connect {
                target,
                input,
                source: None,
            } => format!("clear input {} of {}", input, target),
            Instruction::Delete { var } => format!("delete {}", var),
            Instruction::ClearSelection => "clear the selection".to_string(),
            Instruction::Print { text } => format!("print '{}'", text),
            Instruction::Guard { var, body } => {
                format!("if {} exists, run {} step(s)", var, body.len())
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub instructions: Vec<Instruction>,
}

impl Program {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }

    pub fn push(&mut self, instruction: Instruction) -> &mut Self {
        self.instructions.push(instruction);
        self
    }

    pub fn parse(source: &str) -> Result<Self, ScriptError> {
        let lines = syntax::logical_lines(source)?;
        let mut index = 0;
        let indent = lines.first().map(|l| l.indent).unwrap_or(0);
        let instructions = parse_block(source, &lines, &mut index, indent)?;
        Ok(Self { instructions })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        render_block(&self.instructions, 0, &mut out);
        out
    }

    pub fn mutates_host(&self) -> bool {
        self.instructions.iter().any(Instruction::mutates_host)
    }

    /// Every instruction in execution order, guard bodies flattened.
    pub fn steps(&self) -> Vec<&Instruction> {
        fn walk<'a>(block: &'a [Instruction], out: &mut Vec<&'a Instruction>) {
            for instruction in block {
                out.push(instruction);
                if let Instruction::Guard { body, .. } = instruction {
                    walk(body, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.instructions, &mut out);
        out
    }
}

// =============================================================================
// Rendering
// =============================================================================

fn render_block(block: &[Instruction], depth: usize, out: &mut String) {
    let pad = "    ".repeat(depth);
    for instruction in block {
        out.push_str(&pad);
        match instruction {
            Instruction::ImportHost => out.push_str("import nuke"),
            Instruction::Create {
                var: Some(var),
                class,
            } => out.push_str(&format!("{} = nuke.createNode({})", var, quote(class))),
            Instruction::Create { var: None, class } => {
                out.push_str(&format!("nuke.createNode({})", quote(class)))
            }
            Instruction::Lookup { var, name } => {
                out.push_str(&format!("{} = nuke.toNode({})", var, quote(name)))
            }
            Instruction::SetName { var, name } => {
                out.push_str(&format!("{}.setName({})", var, quote(name)))
            }
            Instruction::SetPosition { var, x, y } => {
                out.push_str(&format!("{}.setXYpos({}, {})", var, x, y))
            }
            Instruction::SetAttr { var, attr, value } => out.push_str(&format!(
                "{}[{}].setValue({})",
                var,
                quote(attr),
                render_literal(value)
            )),
            Instruction::Connect {
                target,
                input,
                source,
            } => out.push_str(&format!(
                "{}.setInput({}, {})",
                target,
                input,
                source.as_deref().unwrap_or("None")
            )),
            Instruction::Delete { var } => out.push_str(&format!("nuke.delete({})", var)),
            Instruction::ClearSelection => out.push_str("nuke.selectNone()"),
            Instruction::Print { text } => out.push_str(&format!("print({})", quote(text))),
            Instruction::Guard { var, body } => {
                out.push_str(&format!("if {}:\n", var));
                if body.is_empty() {
                    out.push_str(&"    ".repeat(depth + 1));
                    out.push_str("pass\n");
                } else {
                    render_block(body, depth + 1, out);
                }
                continue;
            }
        }
        out.push('\n');
    }
}

/// Single-quoted literal with backslash escapes.
pub fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

pub fn render_literal(value: &AttrValue) -> String {
    match value {
        AttrValue::Bool(true) => "True".to_string(),
        AttrValue::Bool(false) => "False".to_string(),
        AttrValue::Int(v) => v.to_string(),
        AttrValue::Float(v) => format!("{:?}", v),
        AttrValue::Text(s) => quote(s),
        AttrValue::List(items) => {
            let parts: Vec<String> = items.iter().map(|v| format!("{:?}", v)).collect();
            format!("[{}]", parts.join(", "))
        }
    }
}

// =============================================================================
// Parsing
// =============================================================================

fn parse_block(
    source: &str,
    lines: &[LogicalLine],
    index: &mut usize,
    indent: usize,
) -> Result<Vec<Instruction>, ScriptError> {
    let mut block = Vec::new();
    while let Some(logical) = lines.get(*index) {
        if logical.indent < indent {
            break;
        }
        *index += 1;

        let mut cursor = Cursor::new(&logical.tokens);
        let parsed = if let Some(var) = guard_header(&mut cursor) {
            let body_indent = lines.get(*index).map(|l| l.indent).unwrap_or(indent);
            let body = if body_indent > indent {
                parse_block(source, lines, index, body_indent)?
            } else {
                Vec::new()
            };
            Some(Some(Instruction::Guard { var, body }))
        } else {
            let mut cursor = Cursor::new(&logical.tokens);
            statement(&mut cursor).filter(|_| cursor.at_end())
        };

        match parsed {
            Some(Some(instruction)) => block.push(instruction),
            // `pass`
            Some(None) => {}
            None => {
                return Err(ScriptError::Unsupported {
                    line: logical.line,
                    statement: physical_line(source, logical.line),
                });
            }
        }
    }
    Ok(block)
}

fn physical_line(source: &str, line: usize) -> String {
    source
        .lines()
        .nth(line.saturating_sub(1))
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn guard_header(cursor: &mut Cursor<'_>) -> Option<String> {
    cursor.name("if")?;
    let var = cursor.var()?;
    cursor.op(":")?;
    cursor.at_end().then_some(var)
}

/// `None` when the line is not a statement of the instruction set,
/// `Some(None)` for a no-op.
fn statement(c: &mut Cursor<'_>) -> Option<Option<Instruction>> {
    let first = c.peek()?;
    if first.is_name("pass") {
        c.next();
        return Some(None);
    }
    if first.is_name("import") {
        c.next();
        c.name("nuke")?;
        return Some(Some(Instruction::ImportHost));
    }
    if first.is_name("print") {
        c.next();
        c.op("(")?;
        let text = c.string()?;
        c.op(")")?;
        return Some(Some(Instruction::Print { text }));
    }
    if first.is_name("nuke") {
        return host_call(c, None).map(Some);
    }

    let var = c.var()?;
    if c.peek()?.is_op("=") {
        c.next();
        c.name("nuke")?;
        return host_call(c, Some(var)).map(Some);
    }
    node_method(c, var).map(Some)
}

/// `nuke.<func>(...)`, optionally assigned to `var`.
fn host_call(c: &mut Cursor<'_>, var: Option<String>) -> Option<Instruction> {
    if var.is_none() {
        c.name("nuke")?;
    }
    c.op(".")?;
    let func = c.any_name()?;
    c.op("(")?;
    let instruction = match (func.as_str(), var) {
        ("createNode", var) => Instruction::Create {
            var,
            class: c.string()?,
        },
        ("toNode", Some(var)) => Instruction::Lookup {
            var,
            name: c.string()?,
        },
        ("delete", None) => Instruction::Delete { var: c.var()? },
        ("selectNone", None) => Instruction::ClearSelection,
        _ => return None,
    };
    c.op(")")?;
    Some(instruction)
}

fn node_method(c: &mut Cursor<'_>, var: String) -> Option<Instruction> {
    if c.peek()?.is_op("[") {
        c.next();
        let attr = c.string()?;
        c.op("]")?;
        return set_value(c, var, attr);
    }

    c.op(".")?;
    let method = c.any_name()?;
    c.op("(")?;
    let instruction = match method.as_str() {
        "setName" => Instruction::SetName {
            var,
            name: c.string()?,
        },
        "setXYpos" => {
            let x = c.int()?;
            c.op(",")?;
            let y = c.int()?;
            Instruction::SetPosition { var, x, y }
        }
        "setInput" => {
            let input = usize::try_from(c.int()?)
                .ok()
                .filter(|i| *i < MAX_INPUTS)?;
            c.op(",")?;
            let source = if c.peek()?.is_name("None") {
                c.next();
                None
            } else {
                Some(c.var()?)
            };
            Instruction::Connect {
                target: var,
                input,
                source,
            }
        }
        "knob" => {
            let attr = c.string()?;
            c.op(")")?;
            return set_value(c, var, attr);
        }
        _ => return None,
    };
    c.op(")")?;
    Some(instruction)
}

fn set_value(c: &mut Cursor<'_>, var: String, attr: String) -> Option<Instruction> {
    c.op(".")?;
    c.name("setValue")?;
    c.op("(")?;
    let value = c.literal()?;
    c.op(")")?;
    Some(Instruction::SetAttr { var, attr, value })
}

struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(token)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn op(&mut self, op: &str) -> Option<()> {
        self.next().filter(|t| t.is_op(op)).map(|_| ())
    }

    fn name(&mut self, name: &str) -> Option<()> {
        self.next().filter(|t| t.is_name(name)).map(|_| ())
    }

    fn any_name(&mut self) -> Option<String> {
        self.next()
            .filter(|t| t.kind == TokenKind::Name)
            .map(|t| t.text.clone())
    }

    /// A variable name: any identifier that is not a keyword or the host module.
    fn var(&mut self) -> Option<String> {
        let name = self.any_name()?;
        let reserved = matches!(
            name.as_str(),
            "nuke" | "None" | "True" | "False" | "if" | "else" | "for" | "while" | "import"
                | "print" | "pass" | "and" | "or" | "not" | "in" | "is"
        );
        (!reserved).then_some(name)
    }

    fn string(&mut self) -> Option<String> {
        match &self.next()?.kind {
            TokenKind::Str(value) if !self.at_string() => Some(value.clone()),
            _ => None,
        }
    }

    /// Adjacent string concatenation is outside the grammar.
    fn at_string(&self) -> bool {
        self.peek()
            .is_some_and(|t| matches!(t.kind, TokenKind::Str(_)))
    }

    fn int(&mut self) -> Option<i64> {
        let negative = self.peek()?.is_op("-");
        if negative {
            self.next();
        }
        let token = self.next()?;
        if token.kind != TokenKind::Int {
            return None;
        }
        let value = parse_int(&token.text)?;
        Some(if negative { -value } else { value })
    }

    fn number(&mut self) -> Option<AttrValue> {
        let negative = self.peek()?.is_op("-");
        if negative {
            self.next();
        }
        let token = self.next()?;
        let value = match token.kind {
            TokenKind::Int => AttrValue::Int(parse_int(&token.text)?),
            TokenKind::Float => AttrValue::Float(parse_float(&token.text)?),
            _ => return None,
        };
        Some(match (value, negative) {
            (AttrValue::Int(v), true) => AttrValue::Int(-v),
            (AttrValue::Float(v), true) => AttrValue::Float(-v),
            (value, _) => value,
        })
    }

    fn literal(&mut self) -> Option<AttrValue> {
        let token = self.peek()?;
        match &token.kind {
            TokenKind::Str(_) => self.string().map(AttrValue::Text),
            TokenKind::Name if token.text == "True" => {
                self.next();
                Some(AttrValue::Bool(true))
            }
            TokenKind::Name if token.text == "False" => {
                self.next();
                Some(AttrValue::Bool(false))
            }
            TokenKind::Op if token.text == "[" => {
                self.next();
                let mut items = Vec::new();
                loop {
                    if self.peek()?.is_op("]") {
                        self.next();
                        break;
                    }
                    let item = self.number()?.as_f64()?;
                    items.push(item);
                    let sep = self.next()?;
                    if sep.is_op("]") {
                        break;
                    }
                    if !sep.is_op(",") {
                        return None;
                    }
                }
                Some(AttrValue::List(items))
            }
            _ => self.number(),
        }
    }
}

fn parse_int(text: &str) -> Option<i64> {
    let clean = text.replace('_', "");
    let lower = clean.to_ascii_lowercase();
    if let Some(hex) = lower.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()
    } else if let Some(oct) = lower.strip_prefix("0o") {
        i64::from_str_radix(oct, 8).ok()
    } else if let Some(bin) = lower.strip_prefix("0b") {
        i64::from_str_radix(bin, 2).ok()
    } else {
        lower.parse().ok()
    }
}

fn parse_float(text: &str) -> Option<f64> {
    let clean = text.replace('_', "");
    if clean.ends_with('j') {
        return None;
    }
    clean.parse::<f64>().ok().filter(|v| v.is_finite())
}
