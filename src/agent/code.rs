//! Code extraction from model text and the ensure-observable-output
//! transform.

use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:python|py|python3)?[ \t]*\r?\n(.*?)```").expect("invalid regex")
});

static SIMPLE_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_]\w*(?:\s*,\s*[A-Za-z_]\w*)*)\s*(?:\*\*|//|[+\-*/%])?=(?:[^=]|$)")
        .expect("invalid regex")
});

const STATEMENT_KEYWORDS: &[&str] = &[
    "import", "from", "def", "class", "if", "elif", "else", "for", "while", "with", "try",
    "except", "finally", "return", "raise", "assert", "pass", "break", "continue", "del",
    "global", "nonlocal", "async", "await", "@",
];

/// Collect the bodies of all Python code fences in `text`, in order.
///
/// Returns `None` when there is no fence or every fence is blank.
pub fn extract_code_blocks(text: &str) -> Option<String> {
    let blocks: Vec<&str> = CODE_FENCE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim_end())
        .filter(|block| !block.trim().is_empty())
        .collect();

    (!blocks.is_empty()).then(|| blocks.join("\n\n"))
}

/// Make sure running `code` prints something.
///
/// Code that already calls `print(` is left alone. Otherwise the last
/// top-level statement is inspected:
///
/// * a plain assignment `x = ...` (also tuple and augmented assignment) gets
///   `print(x)` appended
/// * a bare expression is wrapped in `print(...)`
/// * anything else (indented block body, keyword statement, subscript or
///   attribute assignment) is left unchanged
///
/// This is a best-effort heuristic; the result is not guaranteed to print
/// the value the model intended.
pub fn ensure_observable_output(code: &str) -> Cow<'_, str> {
    if code.contains("print(") {
        return Cow::Borrowed(code);
    }

    let lines: Vec<&str> = code.lines().collect();
    let Some(last) = lines.iter().rposition(|l| is_code_line(l)) else {
        return Cow::Borrowed(code);
    };

    // Walk upwards until the trailing statement's brackets balance.
    let Some(start) = (0..=last)
        .rev()
        .find(|&i| bracket_depth(&lines[i..=last].join("\n")) == 0)
    else {
        return Cow::Borrowed(code);
    };

    let first_line = lines[start];
    if first_line.starts_with(char::is_whitespace) {
        return Cow::Borrowed(code);
    }

    let statement = lines[start..=last].join("\n");
    let statement = statement.trim();
    let head = statement
        .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '@'))
        .next()
        .unwrap_or_default();
    if STATEMENT_KEYWORDS.contains(&head) || statement.starts_with('@') {
        return Cow::Borrowed(code);
    }

    let before = lines[..start].join("\n");
    let after = lines[last + 1..].join("\n");

    if let Some(caps) = SIMPLE_ASSIGNMENT.captures(statement) {
        let targets = caps.get(1).map_or("", |m| m.as_str());
        let mut out = code.trim_end().to_string();
        out.push_str(&format!("\nprint({})", targets));
        return Cow::Owned(out);
    }

    if has_top_level_assignment(statement) {
        return Cow::Borrowed(code);
    }

    let expression = statement.trim_end_matches(';').trim_end();
    let mut out = String::new();
    if !before.is_empty() {
        out.push_str(&before);
        out.push('\n');
    }
    out.push_str(&format!("print({})", expression));
    if !after.trim().is_empty() {
        out.push('\n');
        out.push_str(&after);
    }
    Cow::Owned(out)
}

fn is_code_line(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && !trimmed.starts_with('#')
}

/// Net bracket depth of `text`, ignoring brackets inside string literals
/// and comments. Negative when closers outnumber openers.
fn bracket_depth(text: &str) -> i32 {
    let mut depth = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut in_comment = false;

    for c in text.chars() {
        if in_comment {
            if c == '\n' {
                in_comment = false;
            }
            continue;
        }
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '#' => in_comment = true,
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
    }
    depth
}

/// Whether `statement` assigns at bracket depth zero (`a[0] = 1`,
/// `obj.x = 2`). Comparisons and keyword arguments do not count.
fn has_top_level_assignment(statement: &str) -> bool {
    let chars: Vec<char> = statement.chars().collect();
    let mut depth = 0;
    let mut quote: Option<char> = None;

    for (i, &c) in chars.iter().enumerate() {
        if let Some(q) = quote {
            if c == q && (i == 0 || chars[i - 1] != '\\') {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            '=' if depth == 0 => {
                let prev = i.checked_sub(1).map(|p| chars[p]);
                let next = chars.get(i + 1).copied();
                let comparison = matches!(prev, Some('=' | '!' | '<' | '>')) || next == Some('=');
                if !comparison {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}
