// src/tamper/snippet.rs - turning a stored function body into a Starlark program
use crate::builtins::snippet_globals;
use crate::error::TamperError;
use starlark::environment::Module;
use starlark::eval::Evaluator;
use starlark::syntax::{AstModule, Dialect};

/// File name reported in interpreter diagnostics.
pub(crate) const SNIPPET_FILE: &str = "snippet";

const FUNCTION_NAME: &str = "__tamper__";
pub(crate) const VALUE_GLOBAL: &str = "__value__";
pub(crate) const RECORD_GLOBAL: &str = "__record__";

/// Extended dialect with f-strings, minus `load`: snippets cannot pull in
/// other modules.
pub(crate) fn snippet_dialect() -> Dialect {
    Dialect {
        enable_f_strings: true,
        enable_load: false,
        ..Dialect::Extended
    }
}

/// `def __tamper__(value, record, item_data): <body>`
///
/// The body is dedented, then re-indented one level. Lines that continue a
/// triple-quoted string are copied untouched. A trailing `pass` keeps
/// comment-only bodies valid and makes a body without `return` yield None.
pub(crate) fn definition(code: &str) -> String {
    let body = dedent(&strip_sigils(&code.replace("\r\n", "\n")));
    let mut program = format!("def {}(value, record, item_data):\n", FUNCTION_NAME);
    for (line, continued) in split_lines(&body) {
        if continued {
            program.push_str(line);
        } else if !line.trim().is_empty() {
            program.push_str("    ");
            program.push_str(line);
        }
        program.push('\n');
    }
    program.push_str("    pass\n");
    program
}

/// Definition plus the call whose result is the module's value.
pub(crate) fn program(code: &str) -> String {
    let mut program = definition(code);
    program.push_str(&format!(
        "{}({}, {}, {})\n",
        FUNCTION_NAME, VALUE_GLOBAL, RECORD_GLOBAL, RECORD_GLOBAL
    ));
    program
}

/// Parse and compile the snippet without running its body.
///
/// Only the `def` statement executes, which resolves every name used in
/// the body against the parameters and the snippet globals.
pub fn check(code: &str) -> Result<(), TamperError> {
    let ast = AstModule::parse(SNIPPET_FILE, definition(code), &snippet_dialect())
        .map_err(|e| TamperError::Syntax(e.to_string()))?;

    let globals = snippet_globals();
    let module = Module::new();
    let mut eval = Evaluator::new(&module);
    eval.eval_module(ast, &globals)
        .map_err(|e| TamperError::Syntax(e.to_string()))?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    Code,
    Comment,
    Literal,
}

/// Classify each char as code, comment or string literal (quotes included).
fn regions(chars: &[char]) -> Vec<Region> {
    let mut regions = Vec::with_capacity(chars.len());
    let mut quote: Option<(char, bool)> = None; // (delimiter, triple)
    let mut in_comment = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if in_comment {
            if c == '\n' {
                in_comment = false;
                regions.push(Region::Code);
            } else {
                regions.push(Region::Comment);
            }
            i += 1;
            continue;
        }

        if let Some((delim, triple)) = quote {
            if c == '\\' && i + 1 < chars.len() {
                regions.extend([Region::Literal; 2]);
                i += 2;
                continue;
            }
            if c == delim {
                if !triple {
                    quote = None;
                } else if chars.get(i + 1) == Some(&delim) && chars.get(i + 2) == Some(&delim) {
                    regions.extend([Region::Literal; 3]);
                    quote = None;
                    i += 3;
                    continue;
                }
            } else if c == '\n' && !triple {
                // Unterminated single-line string; the parser reports it.
                quote = None;
                regions.push(Region::Code);
                i += 1;
                continue;
            }
            regions.push(Region::Literal);
            i += 1;
            continue;
        }

        match c {
            '#' => {
                in_comment = true;
                regions.push(Region::Comment);
            }
            '\'' | '"' => {
                let triple = chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c);
                quote = Some((c, triple));
                if triple {
                    regions.extend([Region::Literal; 3]);
                    i += 3;
                    continue;
                }
                regions.push(Region::Literal);
            }
            _ => regions.push(Region::Code),
        }
        i += 1;
    }

    regions
}

/// Rewrite `$name` to `name` outside string literals and comments, so
/// bodies written as `return $value;` keep working.
pub(crate) fn strip_sigils(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    let regions = regions(&chars);
    let mut out = String::with_capacity(code.len());

    for (i, (&c, region)) in chars.iter().zip(&regions).enumerate() {
        let sigil = c == '$'
            && *region == Region::Code
            && chars
                .get(i + 1)
                .is_some_and(|next| next.is_ascii_alphabetic() || *next == '_');
        if !sigil {
            out.push(c);
        }
    }

    out
}

/// Lines of `code`, each flagged when it starts inside a triple-quoted
/// string.
fn split_lines(code: &str) -> Vec<(&str, bool)> {
    let chars: Vec<char> = code.chars().collect();
    let regions = regions(&chars);
    let mut lines = Vec::new();
    let mut start = 0;
    let mut continued = false;

    for ((offset, c), region) in code.char_indices().zip(regions) {
        if c == '\n' {
            lines.push((&code[start..offset], continued));
            start = offset + 1;
            continued = region == Region::Literal;
        }
    }
    if start < code.len() {
        lines.push((&code[start..], continued));
    }

    lines
}

/// Remove the indentation shared by every non-blank line that is not
/// inside a string literal.
fn dedent(code: &str) -> String {
    let lines = split_lines(code);
    let margin = lines
        .iter()
        .filter(|(line, continued)| !continued && !line.trim().is_empty())
        .map(|(line, _)| line.len() - line.trim_start_matches([' ', '\t']).len())
        .min()
        .unwrap_or(0);

    lines
        .iter()
        .map(|&(line, continued)| {
            if continued {
                line
            } else if line.trim().is_empty() {
                ""
            } else {
                &line[margin..]
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
