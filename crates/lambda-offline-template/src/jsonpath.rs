//! Dotted JSON-path extraction.
//!
//! Supports the subset used by mapping templates and response parameters:
//! `$`, `$.a.b`, `a.b`, `a[0].b`, `$['a-b']` and `$["a b"]`.

use serde_json::Value;

/// A single step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Key(String),
    Index(usize),
}

/// Extract the sub-value addressed by `path`, cloned.
///
/// Returns `None` if the path is malformed or does not resolve.
pub fn extract(value: &Value, path: &str) -> Option<Value> {
    extract_ref(value, path).cloned()
}

/// Extract a reference to the sub-value addressed by `path`.
pub fn extract_ref<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let steps = parse(path)?;
    let mut current = value;
    for step in &steps {
        current = match (step, current) {
            (Step::Key(key), Value::Object(map)) => map.get(key)?,
            (Step::Index(index), Value::Array(items)) => items.get(*index)?,
            // Numeric keys may address object members too.
            (Step::Index(index), Value::Object(map)) => map.get(&index.to_string())?,
            _ => return None,
        };
    }
    Some(current)
}

fn parse(path: &str) -> Option<Vec<Step>> {
    let path = path.trim();
    let rest = match path.strip_prefix('$') {
        Some(rest) => rest,
        None if path.is_empty() => return Some(Vec::new()),
        // Bare `a.b` is treated as `$.a.b`.
        None => return parse(&format!("$.{}", path)),
    };

    let chars: Vec<char> = rest.chars().collect();
    let mut steps = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '.' => {
                i += 1;
                let start = i;
                while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                    i += 1;
                }
                if start == i {
                    return None;
                }
                steps.push(Step::Key(chars[start..i].iter().collect()));
            }
            '[' => {
                i += 1;
                let quote = match chars.get(i) {
                    Some(q @ ('\'' | '"')) => Some(*q),
                    _ => None,
                };
                if let Some(q) = quote {
                    i += 1;
                    let start = i;
                    while i < chars.len() && chars[i] != q {
                        i += 1;
                    }
                    let key: String = chars.get(start..i)?.iter().collect();
                    // closing quote and bracket
                    if chars.get(i) != Some(&q) || chars.get(i + 1) != Some(&']') {
                        return None;
                    }
                    i += 2;
                    steps.push(Step::Key(key));
                } else {
                    let start = i;
                    while i < chars.len() && chars[i] != ']' {
                        i += 1;
                    }
                    let raw: String = chars.get(start..i)?.iter().collect();
                    if chars.get(i) != Some(&']') {
                        return None;
                    }
                    i += 1;
                    steps.push(Step::Index(raw.trim().parse().ok()?));
                }
            }
            _ => return None,
        }
    }

    Some(steps)
}
