//! A small, Go-text-template-flavored expression language: `{{.name}}`
//! variable references and `{{func arg...}}` / `{{func(arg, arg)}}` builtin
//! calls. Templates are parsed once at create/update time into a
//! [`ParsedTemplate`] (a flat list of literal/expression segments) so that
//! `render` never re-parses the source string.

use chrono::Utc;
use std::fmt;

#[derive(Debug, Clone)]
pub enum Value {
    Str(String),
    List(Vec<String>),
    Bool(bool),
}

impl Value {
    fn into_string(self) -> String {
        match self {
            Value::Str(s) => s,
            Value::List(items) => items.join(","),
            Value::Bool(b) => b.to_string(),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Value::Str(s) => s.is_empty(),
            Value::List(items) => items.is_empty(),
            Value::Bool(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Var(String),
    Literal(String),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub struct ParsedTemplate {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RenderError {
    #[error("unterminated '{{{{' block")]
    UnterminatedBlock,
    #[error("empty expression in '{{{{}}}}'")]
    EmptyExpression,
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("missing variable '{0}' with no default")]
    MissingVariable(String),
    #[error("type mismatch evaluating '{0}'")]
    TypeMismatch(String),
    #[error("{0}")]
    Evaluation(String),
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Var(name) => write!(f, ".{name}"),
            Expr::Literal(s) => write!(f, "{s:?}"),
            Expr::Call(name, args) => {
                write!(f, "{name}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Parse a template body into literal/expression segments. Parse errors here
/// are what `TemplateEngine::create`/`update` surface as `TemplateParseError`.
pub fn parse(body: &str) -> Result<ParsedTemplate, RenderError> {
    let mut segments = Vec::new();
    let mut rest = body;

    loop {
        match rest.find("{{") {
            None => {
                if !rest.is_empty() {
                    segments.push(Segment::Literal(rest.to_string()));
                }
                break;
            }
            Some(start) => {
                if start > 0 {
                    segments.push(Segment::Literal(rest[..start].to_string()));
                }
                let after_open = &rest[start + 2..];
                let end = after_open
                    .find("}}")
                    .ok_or(RenderError::UnterminatedBlock)?;
                let inner = after_open[..end].trim();
                if inner.is_empty() {
                    return Err(RenderError::EmptyExpression);
                }
                segments.push(Segment::Expr(parse_expr(inner)?));
                rest = &after_open[end + 2..];
            }
        }
    }

    Ok(ParsedTemplate { segments })
}

fn parse_expr(src: &str) -> Result<Expr, RenderError> {
    let src = src.trim();

    if let Some(name) = src.strip_prefix('.') {
        return Ok(Expr::Var(name.trim().to_string()));
    }

    if (src.starts_with('"') && src.ends_with('"') && src.len() >= 2)
        || (src.starts_with('\'') && src.ends_with('\'') && src.len() >= 2)
    {
        return Ok(Expr::Literal(src[1..src.len() - 1].to_string()));
    }

    // `func(arg, arg, ...)` call syntax.
    if let Some(paren) = src.find('(') {
        if src.ends_with(')') {
            let name = src[..paren].trim().to_string();
            let args_src = &src[paren + 1..src.len() - 1];
            let args = split_args(args_src)
                .iter()
                .map(|a| parse_expr(a))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Expr::Call(name, args));
        }
    }

    // `func arg1 arg2 ...` whitespace-separated call syntax.
    let mut parts = src.split_whitespace();
    let name = parts.next().unwrap_or_default().to_string();
    let rest: Vec<&str> = parts.collect();
    if rest.is_empty() {
        // Bare identifier with no dot and no args: treat as a 0-arg call
        // (covers `now()`-less `now` usage) or a literal otherwise.
        return Ok(Expr::Call(name, vec![]));
    }
    let args = rest
        .iter()
        .map(|a| parse_expr(a))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Expr::Call(name, args))
}

/// Split a comma-separated argument list, respecting nested parens/quotes.
fn split_args(src: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut depth = 0i32;
    let mut in_quote = false;
    let mut current = String::new();

    for ch in src.chars() {
        match ch {
            '"' | '\'' => {
                in_quote = !in_quote;
                current.push(ch);
            }
            '(' if !in_quote => {
                depth += 1;
                current.push(ch);
            }
            ')' if !in_quote => {
                depth -= 1;
                current.push(ch);
            }
            ',' if !in_quote && depth == 0 => {
                args.push(current.trim().to_string());
                current = String::new();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        args.push(current.trim().to_string());
    }
    args
}

/// Execute a parsed template against a fully-merged variable map.
pub fn execute(
    template: &ParsedTemplate,
    vars: &std::collections::HashMap<String, String>,
) -> Result<String, RenderError> {
    let mut out = String::new();
    for segment in &template.segments {
        match segment {
            Segment::Literal(s) => out.push_str(s),
            Segment::Expr(expr) => out.push_str(&eval(expr, vars)?.into_string()),
        }
    }
    Ok(out)
}

fn eval(
    expr: &Expr,
    vars: &std::collections::HashMap<String, String>,
) -> Result<Value, RenderError> {
    match expr {
        Expr::Literal(s) => Ok(Value::Str(s.clone())),
        Expr::Var(name) => vars
            .get(name)
            .cloned()
            .map(Value::Str)
            .ok_or_else(|| RenderError::MissingVariable(name.clone())),
        Expr::Call(name, args) => eval_call(name, args, vars),
    }
}

/// Like [`eval`] but returns an empty string instead of erroring on a missing
/// variable — used for the `default(...)`'s second argument.
fn eval_optional(
    expr: &Expr,
    vars: &std::collections::HashMap<String, String>,
) -> Result<Value, RenderError> {
    match eval(expr, vars) {
        Ok(v) => Ok(v),
        Err(RenderError::MissingVariable(_)) => Ok(Value::Str(String::new())),
        Err(e) => Err(e),
    }
}

fn eval_call(
    name: &str,
    args: &[Expr],
    vars: &std::collections::HashMap<String, String>,
) -> Result<Value, RenderError> {
    match name {
        "upper" => Ok(Value::Str(str_arg(args, 0, vars)?.to_uppercase())),
        "lower" => Ok(Value::Str(str_arg(args, 0, vars)?.to_lowercase())),
        "title" => Ok(Value::Str(title_case(&str_arg(args, 0, vars)?))),
        "trim" => Ok(Value::Str(str_arg(args, 0, vars)?.trim().to_string())),
        "replace" => {
            let a = str_arg(args, 0, vars)?;
            let b = str_arg(args, 1, vars)?;
            let s = str_arg(args, 2, vars)?;
            Ok(Value::Str(s.replace(&a, &b)))
        }
        "contains" => {
            let s = str_arg(args, 0, vars)?;
            let sub = str_arg(args, 1, vars)?;
            Ok(Value::Bool(s.contains(&sub)))
        }
        "join" => {
            let sep = str_arg(args, 0, vars)?;
            let list = list_arg(args, 1, vars)?;
            Ok(Value::Str(list.join(&sep)))
        }
        "split" => {
            let sep = str_arg(args, 0, vars)?;
            let s = str_arg(args, 1, vars)?;
            Ok(Value::List(s.split(&sep as &str).map(String::from).collect()))
        }
        "default" => {
            let default_value = eval(args.first().ok_or_else(|| {
                RenderError::Evaluation("default() requires 2 arguments".to_string())
            })?, vars)?;
            let value = args
                .get(1)
                .map(|e| eval_optional(e, vars))
                .transpose()?
                .unwrap_or(Value::Str(String::new()));
            if value.is_empty() {
                Ok(default_value)
            } else {
                Ok(value)
            }
        }
        "now" => Ok(Value::Str(Utc::now().to_rfc3339())),
        "formatTime" => {
            let layout = str_arg(args, 0, vars)?;
            let t = str_arg(args, 1, vars)?;
            let parsed = chrono::DateTime::parse_from_rfc3339(&t)
                .map_err(|e| RenderError::Evaluation(format!("formatTime: {e}")))?;
            Ok(Value::Str(strftime_from_go_layout(&layout, &parsed)))
        }
        other => Err(RenderError::UnknownFunction(other.to_string())),
    }
}

fn str_arg(
    args: &[Expr],
    idx: usize,
    vars: &std::collections::HashMap<String, String>,
) -> Result<String, RenderError> {
    let expr = args
        .get(idx)
        .ok_or_else(|| RenderError::Evaluation(format!("missing argument {idx}")))?;
    match eval(expr, vars)? {
        Value::Str(s) => Ok(s),
        Value::Bool(b) => Ok(b.to_string()),
        Value::List(_) => Err(RenderError::TypeMismatch(expr.to_string())),
    }
}

fn list_arg(
    args: &[Expr],
    idx: usize,
    vars: &std::collections::HashMap<String, String>,
) -> Result<Vec<String>, RenderError> {
    let expr = args
        .get(idx)
        .ok_or_else(|| RenderError::Evaluation(format!("missing argument {idx}")))?;
    match eval(expr, vars)? {
        Value::List(items) => Ok(items),
        Value::Str(s) => Ok(s.split(',').map(|p| p.trim().to_string()).collect()),
        Value::Bool(b) => Ok(vec![b.to_string()]),
    }
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Translate a handful of common Go `time` layout tokens into a `chrono`
/// `strftime` format string — enough to cover the `formatTime` builtin's
/// documented use in config timestamps, not a full Go-layout implementation.
fn strftime_from_go_layout(
    layout: &str,
    t: &chrono::DateTime<chrono::FixedOffset>,
) -> String {
    let strftime_fmt = layout
        .replace("2006", "%Y")
        .replace("01", "%m")
        .replace("02", "%d")
        .replace("15", "%H")
        .replace("04", "%M")
        .replace("05", "%S");
    t.format(&strftime_fmt).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn renders_plain_variable() {
        let t = parse("hello {{.name}}").unwrap();
        let out = execute(&t, &vars(&[("name", "world")])).unwrap();
        assert_eq!(out, "hello world");
    }

    #[test]
    fn renders_upper_builtin() {
        let t = parse("{{upper .name}}").unwrap();
        let out = execute(&t, &vars(&[("name", "prod")])).unwrap();
        assert_eq!(out, "PROD");
    }

    #[test]
    fn renders_default_with_missing_variable() {
        let t = parse(r#"{{default("fallback", .missing)}}"#).unwrap();
        let out = execute(&t, &HashMap::new()).unwrap();
        assert_eq!(out, "fallback");
    }

    #[test]
    fn renders_join_and_split() {
        let t = parse(r#"{{join(",", split(";", .list))}}"#).unwrap();
        let out = execute(&t, &vars(&[("list", "a;b;c")])).unwrap();
        assert_eq!(out, "a,b,c");
    }

    #[test]
    fn missing_variable_without_default_errors() {
        let t = parse("{{.missing}}").unwrap();
        let err = execute(&t, &HashMap::new()).unwrap_err();
        assert!(matches!(err, RenderError::MissingVariable(_)));
    }

    #[test]
    fn unterminated_block_is_a_parse_error() {
        let err = parse("{{.name").unwrap_err();
        assert!(matches!(err, RenderError::UnterminatedBlock));
    }

    #[test]
    fn rendering_is_deterministic() {
        let t = parse("{{upper .name}}-{{trim .env}}").unwrap();
        let v = vars(&[("name", "cluster"), ("env", " prod ")]);
        let a = execute(&t, &v).unwrap();
        let b = execute(&t, &v).unwrap();
        assert_eq!(a, b);
    }
}
