//! Build-script parser.
//!
//! Splits a script into top-level statements and classifies each one:
//! - `using A, B` / `import A.B: f` → [`Statement::Import`]
//! - `name(args...; kw = value, kws...)` → [`Statement::Call`]
//! - anything else (assignments, blocks, comments) → [`Statement::Other`]
//!
//! The scanner understands string/char/command literals, `#` and `#= =#`
//! comments, bracket nesting, `begin`/`function`/... `end` blocks and lines
//! continued by a trailing operator or comma. It does not evaluate anything.

use std::sync::LazyLock;

use regex::Regex;

use docbuilder_shared::{DocBuilderError, Result};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A parsed build script: its top-level statements in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    pub statements: Vec<Statement>,
}

/// One top-level statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// A dependency import. `modules` holds the top-level package names.
    Import { modules: Vec<String>, text: String },
    /// A call of a named operation.
    Call { call: Call, text: String },
    /// Passed through verbatim.
    Other(String),
}

impl Statement {
    /// Source text for this statement.
    pub fn text(&self) -> &str {
        match self {
            Self::Import { text, .. } | Self::Call { text, .. } => text,
            Self::Other(text) => text,
        }
    }

    /// A call statement whose text is regenerated from `call`.
    pub fn from_call(call: Call) -> Self {
        let text = call.render();
        Self::Call { call, text }
    }
}

/// A named operation with positional and keyword arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Full callee path, e.g. `Documenter.makedocs`.
    pub name: String,
    pub args: Vec<Argument>,
    /// Whether keywords were written after a `;`.
    pub semicolon: bool,
}

/// One call argument, kept as source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
    Positional(String),
    Keyword { name: String, value: String },
    /// An item after `;` without `=`: shorthand `name` (meaning
    /// `name = name`) or a splat `kwargs...`.
    Bare(String),
}

impl Call {
    /// Last path segment of the callee (`Documenter.makedocs` → `makedocs`).
    pub fn operation(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    /// Value of keyword argument `name`, if present. A shorthand `; name`
    /// has the value `name`.
    pub fn keyword(&self, name: &str) -> Option<&str> {
        self.args.iter().find_map(|arg| match arg {
            Argument::Keyword { name: n, value } if n == name => Some(value.as_str()),
            Argument::Bare(n) if n == name => Some(n.as_str()),
            _ => None,
        })
    }

    /// Set keyword `name` to `value`, replacing it in place or appending.
    pub fn set_keyword(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        for arg in &mut self.args {
            match arg {
                Argument::Keyword { name: n, value: v } if n == name => {
                    *v = value;
                    return;
                }
                Argument::Bare(n) if n == name => {
                    *arg = Argument::Keyword {
                        name: name.to_string(),
                        value,
                    };
                    return;
                }
                _ => {}
            }
        }
        self.args.push(Argument::Keyword {
            name: name.to_string(),
            value,
        });
    }

    /// Render back to source: positional arguments first, then keywords,
    /// after a `;` when the call had one.
    pub fn render(&self) -> String {
        let positional: Vec<String> = self
            .args
            .iter()
            .filter_map(|a| match a {
                Argument::Positional(v) => Some(v.clone()),
                _ => None,
            })
            .collect();
        let keywords: Vec<String> = self
            .args
            .iter()
            .filter_map(|a| match a {
                Argument::Keyword { name, value } => Some(format!("{name} = {value}")),
                Argument::Bare(item) => Some(item.clone()),
                Argument::Positional(_) => None,
            })
            .collect();

        if !self.semicolon || keywords.is_empty() {
            let rendered: Vec<String> = positional.into_iter().chain(keywords).collect();
            return format!("{}({})", self.name, rendered.join(", "));
        }
        if positional.is_empty() {
            format!("{}(; {})", self.name, keywords.join(", "))
        } else {
            format!("{}({}; {})", self.name, positional.join(", "), keywords.join(", "))
        }
    }
}

impl Script {
    /// Render the script back to source, one statement per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for stmt in &self.statements {
            out.push_str(stmt.text());
            out.push('\n');
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Regex patterns (compiled once)
// ---------------------------------------------------------------------------

/// Matches `using ...` / `import ...`.
static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^(?:using|import)\s+(.+)$").expect("import regex")
});

/// Matches a callee followed by an opening parenthesis.
static CALLEE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_!]*(?:\.[A-Za-z_][A-Za-z0-9_!]*)*)\s*\(")
        .expect("callee regex")
});

/// Matches `name = value` (but not `==` or `=>`).
static KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^([A-Za-z_][A-Za-z0-9_!]*)\s*=([^=>].*)?$").expect("keyword regex")
});

/// Keywords that open a block closed by `end`.
const BLOCK_OPENERS: &[&str] = &[
    "begin",
    "function",
    "let",
    "if",
    "for",
    "while",
    "module",
    "baremodule",
    "struct",
    "do",
    "try",
    "quote",
    "macro",
    "abstract",
    "primitive",
];

/// Trailing characters that continue a statement onto the next line.
const CONTINUATION_CHARS: &[char] = &[',', '=', '+', '-', '*', '/', '|', '&', '\\', '^', '<', '>', '~', '?'];

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse script source into top-level statements.
pub fn parse(source: &str) -> Result<Script> {
    let raw = split_statements(source)?;
    let statements = raw
        .into_iter()
        .map(|(text, code)| classify(text, &code))
        .collect::<Result<Vec<_>>>()?;
    Ok(Script { statements })
}

/// Classify one statement from its source text and comment-free code.
fn classify(text: String, code: &str) -> Result<Statement> {
    let code = code.trim();
    if code.is_empty() {
        return Ok(Statement::Other(text));
    }

    if let Some(caps) = IMPORT_RE.captures(code) {
        let modules = import_modules(&caps[1]);
        return Ok(Statement::Import { modules, text });
    }

    if let Some(call) = parse_call(code)? {
        return Ok(Statement::Call { call, text });
    }

    Ok(Statement::Other(text))
}

/// Parse `code` as a single call expression, or `None` if it is something else.
pub fn parse_call(code: &str) -> Result<Option<Call>> {
    let Some(caps) = CALLEE_RE.captures(code) else {
        return Ok(None);
    };
    let name = caps[1].to_string();
    let open = caps.get(0).map_or(0, |m| m.end()) - 1;

    let Some(close) = matching_paren(code, open)? else {
        return Err(DocBuilderError::script(format!("unbalanced call to {name}")));
    };
    // Trailing code after the call (`f(x) + 1`, `f(x) do ... end`) is not a plain call.
    if !code[close + 1..].trim().is_empty() {
        return Ok(None);
    }

    let inner = &code[open + 1..close];
    let sections = split_top_level(inner, &[';']);
    let semicolon = sections.len() > 1;
    let mut args = Vec::new();
    for (i, section) in sections.into_iter().enumerate() {
        let after_semicolon = i > 0;
        args.extend(
            split_top_level(section, &[','])
                .into_iter()
                .map(str::trim)
                .filter(|piece| !piece.is_empty())
                .map(|piece| parse_argument(piece, after_semicolon)),
        );
    }

    Ok(Some(Call { name, args, semicolon }))
}

fn parse_argument(piece: &str, after_semicolon: bool) -> Argument {
    match KEYWORD_RE.captures(piece) {
        Some(caps) => Argument::Keyword {
            name: caps[1].to_string(),
            value: caps.get(2).map_or("", |m| m.as_str()).trim().to_string(),
        },
        None if after_semicolon => Argument::Bare(piece.to_string()),
        None => Argument::Positional(piece.to_string()),
    }
}

/// Top-level package names from the body of an import statement.
fn import_modules(body: &str) -> Vec<String> {
    // `using A: f, g` imports names from A only.
    let list = match split_top_level(body, &[':']).first() {
        Some(head) if body.contains(':') => vec![*head],
        _ => split_top_level(body, &[',']),
    };

    let mut modules: Vec<String> = Vec::new();
    for item in list {
        let item = item.trim();
        // Relative imports (`.Sub`) refer to the script's own modules.
        if item.is_empty() || item.starts_with('.') {
            continue;
        }
        let root = item.split('.').next().unwrap_or(item).trim();
        let root = root.split_whitespace().next().unwrap_or(root);
        if !root.is_empty() && !modules.iter().any(|m| m == root) {
            modules.push(root.to_string());
        }
    }
    modules
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// Split source into `(text, code)` pairs, where `code` has comments removed.
fn split_statements(source: &str) -> Result<Vec<(String, String)>> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut out = Vec::new();
    let mut start = 0usize;
    let mut code = String::new();
    let mut parens = 0usize;
    let mut blocks = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        let (pos, c) = chars[i];
        match c {
            '#' => {
                i = skip_comment(&chars, i)?;
                continue;
            }
            '"' | '`' => {
                let end = skip_string(&chars, i)?;
                code.push_str(&source[pos..byte_at(&chars, end, source.len())]);
                i = end;
                continue;
            }
            '\'' if starts_char_literal(&code) => {
                let end = skip_char_literal(&chars, i)?;
                code.push_str(&source[pos..byte_at(&chars, end, source.len())]);
                i = end;
                continue;
            }
            '(' | '[' | '{' => parens += 1,
            ')' | ']' | '}' => parens = parens.saturating_sub(1),
            c if c.is_alphabetic() || c == '_' => {
                let mut j = i;
                while j < chars.len() && is_ident_char(chars[j].1) {
                    j += 1;
                }
                let word = &source[pos..byte_at(&chars, j, source.len())];
                let qualified = code.ends_with('.') || code.ends_with(':');
                if parens == 0 && !qualified {
                    if BLOCK_OPENERS.contains(&word) {
                        blocks += 1;
                    } else if word == "end" {
                        blocks = blocks.saturating_sub(1);
                    }
                }
                code.push_str(word);
                i = j;
                continue;
            }
            '\n' | ';' if parens == 0 && blocks == 0 && !continues(&code) => {
                push_statement(&mut out, &source[start..pos], &mut code);
                start = pos + c.len_utf8();
                i += 1;
                continue;
            }
            _ => {}
        }
        code.push(c);
        i += 1;
    }

    if parens > 0 || blocks > 0 {
        return Err(DocBuilderError::script(format!(
            "unterminated statement at end of script ({parens} open brackets, {blocks} open blocks)"
        )));
    }
    push_statement(&mut out, &source[start..], &mut code);
    Ok(out)
}

fn push_statement(out: &mut Vec<(String, String)>, text: &str, code: &mut String) {
    let text = text.trim();
    if !text.is_empty() {
        out.push((text.to_string(), std::mem::take(code)));
    }
    code.clear();
}

/// Split `text` on any of `seps` at nesting depth zero, outside literals.
fn split_top_level<'a>(text: &'a str, seps: &[char]) -> Vec<&'a str> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        let (pos, c) = chars[i];
        match c {
            '"' | '`' => {
                i = skip_string(&chars, i).unwrap_or(chars.len());
                continue;
            }
            '\'' if starts_char_literal(&text[..pos]) => {
                i = skip_char_literal(&chars, i).unwrap_or(chars.len());
                continue;
            }
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            c if depth == 0 && seps.contains(&c) => {
                pieces.push(&text[start..pos]);
                start = pos + c.len_utf8();
            }
            _ => {}
        }
        i += 1;
    }
    pieces.push(&text[start..]);
    pieces
}

/// Byte offset of the closing paren matching the one at byte `open`.
fn matching_paren(code: &str, open: usize) -> Result<Option<usize>> {
    let chars: Vec<(usize, char)> = code.char_indices().collect();
    let Some(mut i) = chars.iter().position(|(pos, _)| *pos == open) else {
        return Ok(None);
    };
    let mut depth = 0usize;

    while i < chars.len() {
        let (pos, c) = chars[i];
        match c {
            '"' | '`' => {
                i = skip_string(&chars, i)?;
                continue;
            }
            '\'' if starts_char_literal(&code[..pos]) => {
                i = skip_char_literal(&chars, i)?;
                continue;
            }
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Ok(Some(pos));
                }
            }
            _ => {}
        }
        i += 1;
    }
    Ok(None)
}

/// Skip a `#` line comment or a nested `#= =#` block comment starting at `i`.
/// Line comments stop before the newline.
fn skip_comment(chars: &[(usize, char)], i: usize) -> Result<usize> {
    if chars.get(i + 1).map(|(_, c)| *c) == Some('=') {
        let mut depth = 0usize;
        let mut j = i;
        while j < chars.len() {
            match (chars[j].1, chars.get(j + 1).map(|(_, c)| *c)) {
                ('#', Some('=')) => {
                    depth += 1;
                    j += 2;
                }
                ('=', Some('#')) => {
                    depth -= 1;
                    j += 2;
                    if depth == 0 {
                        return Ok(j);
                    }
                }
                _ => j += 1,
            }
        }
        return Err(DocBuilderError::script("unterminated block comment"));
    }

    let mut j = i;
    while j < chars.len() && chars[j].1 != '\n' {
        j += 1;
    }
    Ok(j)
}

/// Skip a `"..."`, `"""..."""` or `` `...` `` literal starting at `i`.
fn skip_string(chars: &[(usize, char)], i: usize) -> Result<usize> {
    let quote = chars[i].1;
    let triple = (1..3).all(|k| chars.get(i + k).map(|(_, c)| *c) == Some(quote));
    let mut j = if triple { i + 3 } else { i + 1 };

    while j < chars.len() {
        match chars[j].1 {
            '\\' => j += 2,
            c if c == quote => {
                if !triple {
                    return Ok(j + 1);
                }
                if (1..3).all(|k| chars.get(j + k).map(|(_, c)| *c) == Some(quote)) {
                    return Ok(j + 3);
                }
                j += 1;
            }
            _ => j += 1,
        }
    }
    Err(DocBuilderError::script("unterminated string literal"))
}

/// Skip a `'x'` character literal starting at `i`.
fn skip_char_literal(chars: &[(usize, char)], i: usize) -> Result<usize> {
    let mut j = i + 1;
    while j < chars.len() {
        match chars[j].1 {
            '\\' => j += 2,
            '\'' => return Ok(j + 1),
            '\n' => break,
            _ => j += 1,
        }
    }
    Err(DocBuilderError::script("unterminated character literal"))
}

/// A `'` after an identifier or closing bracket is the adjoint operator.
fn starts_char_literal(preceding: &str) -> bool {
    !preceding
        .chars()
        .next_back()
        .is_some_and(|c| is_ident_char(c) || matches!(c, ')' | ']' | '}' | '\'' | '.'))
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '!'
}

/// Whether a statement's code so far continues onto the next line.
fn continues(code: &str) -> bool {
    code.trim_end()
        .chars()
        .next_back()
        .is_some_and(|c| CONTINUATION_CHARS.contains(&c))
}

fn byte_at(chars: &[(usize, char)], index: usize, len: usize) -> usize {
    chars.get(index).map_or(len, |(pos, _)| *pos)
}
