//! Node-tree evaluation.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::context::TemplateContext;
use crate::error::TemplateRenderError;
use crate::jsonpath;
use crate::parser::{Accessor, BinOp, Expr, Node, Reference};
use crate::util;

type Result<T> = std::result::Result<T, TemplateRenderError>;

const MAX_MACRO_DEPTH: usize = 32;

enum Binding {
    Value(Value),
    Macro(Rc<Vec<Node>>),
}

pub(crate) struct Evaluator<'a> {
    ctx: &'a TemplateContext,
    vars: HashMap<String, Binding>,
    depth: usize,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(ctx: &'a TemplateContext) -> Self {
        Self {
            ctx,
            vars: HashMap::new(),
            depth: 0,
        }
    }

    pub(crate) fn render(&mut self, nodes: &[Node], out: &mut String) -> Result<()> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Reference(reference) => {
                    let value = self.reference(reference)?;
                    out.push_str(&util::stringify(&value));
                }
                Node::Set { name, value } => {
                    let value = self.expr(value)?;
                    self.vars.insert(name.clone(), Binding::Value(value));
                }
                Node::If {
                    branches,
                    otherwise,
                } => {
                    let mut taken = false;
                    for (cond, body) in branches {
                        if truthy(&self.expr(cond)?) {
                            self.render(body, out)?;
                            taken = true;
                            break;
                        }
                    }
                    if !taken {
                        if let Some(body) = otherwise {
                            self.render(body, out)?;
                        }
                    }
                }
                Node::Foreach {
                    var,
                    iterable,
                    body,
                } => self.foreach(var, iterable, body, out)?,
                Node::Define { name, body } => {
                    self.vars
                        .insert(name.clone(), Binding::Macro(Rc::clone(body)));
                }
            }
        }
        Ok(())
    }

    fn foreach(&mut self, var: &str, iterable: &Expr, body: &[Node], out: &mut String) -> Result<()> {
        let items = match self.expr(iterable)? {
            Value::Array(items) => items,
            Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
            Value::Null => Vec::new(),
            other => vec![other],
        };

        let saved_var = self.vars.remove(var);
        let saved_foreach = self.vars.remove("foreach");
        let count = items.len();

        let mut result = Ok(());
        for (index, item) in items.into_iter().enumerate() {
            let mut state = Map::new();
            state.insert("index".into(), index.into());
            state.insert("count".into(), (index + 1).into());
            state.insert("hasNext".into(), (index + 1 < count).into());
            state.insert("first".into(), (index == 0).into());
            state.insert("last".into(), (index + 1 == count).into());
            self.vars
                .insert("foreach".into(), Binding::Value(Value::Object(state)));
            self.vars.insert(var.to_string(), Binding::Value(item));
            result = self.render(body, out);
            if result.is_err() {
                break;
            }
        }

        restore(&mut self.vars, var, saved_var);
        restore(&mut self.vars, "foreach", saved_foreach);
        result
    }

    fn expand_macro(&mut self, body: &[Node]) -> Result<String> {
        if self.depth >= MAX_MACRO_DEPTH {
            return Err(TemplateRenderError::MacroDepth(MAX_MACRO_DEPTH));
        }
        self.depth += 1;
        let mut out = String::new();
        let result = self.render(body, &mut out);
        self.depth -= 1;
        result.map(|_| out)
    }

    fn expr(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Interpolated(nodes) => {
                let mut out = String::new();
                self.render(nodes, &mut out)?;
                Ok(Value::String(out))
            }
            Expr::Reference(reference) => self.reference(reference),
            Expr::List(items) => items
                .iter()
                .map(|item| self.expr(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Expr::Not(inner) => Ok(Value::Bool(!truthy(&self.expr(inner)?))),
            Expr::Binary(left, BinOp::And, right) => {
                let result = truthy(&self.expr(left)?) && truthy(&self.expr(right)?);
                Ok(Value::Bool(result))
            }
            Expr::Binary(left, BinOp::Or, right) => {
                let result = truthy(&self.expr(left)?) || truthy(&self.expr(right)?);
                Ok(Value::Bool(result))
            }
            Expr::Binary(left, op, right) => {
                let left = self.expr(left)?;
                let right = self.expr(right)?;
                Ok(Value::Bool(compare(&left, *op, &right)))
            }
        }
    }

    fn reference(&mut self, reference: &Reference) -> Result<Value> {
        let root = match self.vars.get(&reference.root) {
            Some(Binding::Value(value)) => value.clone(),
            Some(Binding::Macro(body)) => {
                let body = Rc::clone(body);
                Value::String(self.expand_macro(&body)?)
            }
            None => match reference.root.as_str() {
                "input" => return self.input(reference),
                "util" => return self.util(reference),
                "context" => self.ctx.context_object(),
                "stageVariables" => self.ctx.stage_variables_object(),
                other => match self.ctx.variables.get(other) {
                    Some(value) => value.clone(),
                    None if reference.quiet => return Ok(Value::Null),
                    None => {
                        return Err(TemplateRenderError::UndefinedVariable(
                            reference.source.clone(),
                        ))
                    }
                },
            },
        };
        self.access(root, &reference.accessors, reference)
    }

    fn input(&mut self, reference: &Reference) -> Result<Value> {
        let (first, rest) = match reference.accessors.split_first() {
            Some(split) => split,
            None => return Ok(Value::Null),
        };
        let ctx = self.ctx;
        let payload = &ctx.payload;
        let value = match first {
            Accessor::Property(name) if name == "body" => Value::String(payload.raw().to_string()),
            Accessor::Method(name, args) => {
                let args = self.args(args)?;
                match name.as_str() {
                    "json" => {
                        let path = path_arg(&args);
                        let found = jsonpath::extract_ref(payload.parsed(), &path)
                            .cloned()
                            .unwrap_or(Value::Null);
                        Value::String(found.to_string())
                    }
                    "path" => {
                        let path = path_arg(&args);
                        jsonpath::extract(payload.parsed(), &path).unwrap_or(Value::Null)
                    }
                    "params" => match args.first() {
                        None => ctx.params_object(),
                        Some(name) => ctx
                            .param(&util::stringify(name))
                            .map(|v| Value::String(v.to_string()))
                            .unwrap_or(Value::Null),
                    },
                    _ => return Err(unknown_method(reference, name)),
                }
            }
            Accessor::Property(name) => return Err(unknown_method(reference, name)),
            Accessor::Index(_) => return Err(unknown_method(reference, "[]")),
        };
        self.access(value, rest, reference)
    }

    fn util(&mut self, reference: &Reference) -> Result<Value> {
        let (first, rest) = match reference.accessors.split_first() {
            Some(split) => split,
            None => return Ok(Value::Null),
        };
        let (name, args) = match first {
            Accessor::Method(name, args) => (name, self.args(args)?),
            Accessor::Property(name) => return Err(unknown_method(reference, name)),
            Accessor::Index(_) => return Err(unknown_method(reference, "[]")),
        };
        let arg = args.first().map(util::stringify).unwrap_or_default();
        let value = match name.as_str() {
            "escapeJavaScript" => Value::String(util::escape_javascript(&arg)),
            "urlEncode" => Value::String(util::url_encode(&arg)),
            "urlDecode" => Value::String(util::url_decode(&arg)?),
            "base64Encode" => Value::String(util::base64_encode(&arg)),
            "base64Decode" => Value::String(util::base64_decode(&arg)?),
            "parseJson" => util::parse_json(&arg)?,
            _ => return Err(unknown_method(reference, name)),
        };
        self.access(value, rest, reference)
    }

    fn args(&mut self, args: &[Expr]) -> Result<Vec<Value>> {
        args.iter().map(|arg| self.expr(arg)).collect()
    }

    fn access(&mut self, mut value: Value, accessors: &[Accessor], reference: &Reference) -> Result<Value> {
        for accessor in accessors {
            value = match accessor {
                Accessor::Property(name) => match value {
                    Value::Object(mut map) => map.remove(name).unwrap_or(Value::Null),
                    _ => Value::Null,
                },
                Accessor::Index(index) => {
                    let index = self.expr(index)?;
                    index_value(value, &index)
                }
                Accessor::Method(name, args) => {
                    let args = self.args(args)?;
                    call_method(value, name, &args, reference)?
                }
            };
        }
        Ok(value)
    }
}

fn restore(vars: &mut HashMap<String, Binding>, name: &str, saved: Option<Binding>) {
    match saved {
        Some(binding) => {
            vars.insert(name.to_string(), binding);
        }
        None => {
            vars.remove(name);
        }
    }
}

fn path_arg(args: &[Value]) -> String {
    args.first()
        .map(util::stringify)
        .unwrap_or_else(|| "$".to_string())
}

fn unknown_method(reference: &Reference, method: &str) -> TemplateRenderError {
    TemplateRenderError::UnknownMethod {
        target: reference.source.clone(),
        method: method.to_string(),
    }
}

fn index_value(value: Value, index: &Value) -> Value {
    match (value, index) {
        (Value::Array(mut items), Value::Number(n)) => match n.as_u64() {
            Some(i) if (i as usize) < items.len() => items.swap_remove(i as usize),
            _ => Value::Null,
        },
        (Value::Object(mut map), key) => map.remove(&util::stringify(key)).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn size(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::String(s) => s.chars().count(),
        Value::Null => 0,
        _ => 1,
    }
}

fn call_method(value: Value, name: &str, args: &[Value], reference: &Reference) -> Result<Value> {
    let arg = args.first();
    let result = match (name, value) {
        ("keySet", Value::Object(map)) => {
            Value::Array(map.into_iter().map(|(k, _)| Value::String(k)).collect())
        }
        ("keySet", Value::Null) => Value::Array(Vec::new()),
        ("get", value) => match arg {
            Some(index) => index_value(value, index),
            None => Value::Null,
        },
        ("size", value) => size(&value).into(),
        ("isEmpty", value) => (size(&value) == 0).into(),
        ("containsKey", Value::Object(map)) => {
            map.contains_key(&arg.map(util::stringify).unwrap_or_default()).into()
        }
        ("containsKey", _) => false.into(),
        ("toString", value) => Value::String(util::stringify(&value)),
        ("length", Value::String(s)) => s.chars().count().into(),
        ("toLowerCase", Value::String(s)) => Value::String(s.to_lowercase()),
        ("toUpperCase", Value::String(s)) => Value::String(s.to_uppercase()),
        ("trim", Value::String(s)) => Value::String(s.trim().to_string()),
        ("contains", Value::String(s)) => s
            .contains(arg.map(util::stringify).unwrap_or_default().as_str())
            .into(),
        ("contains", Value::Array(items)) => match arg {
            Some(needle) => items.contains(needle).into(),
            None => false.into(),
        },
        // Methods on a missing value yield nothing.
        (_, Value::Null) => Value::Null,
        (name, _) => return Err(unknown_method(reference, name)),
    };
    Ok(result)
}

/// Velocity truthiness: null and false are false; everything else is true.
fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

fn compare(left: &Value, op: BinOp, right: &Value) -> bool {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (a, b) if a == b => Some(Ordering::Equal),
        // Mixed scalars compare by their text form.
        (Value::Number(_) | Value::Bool(_), Value::String(_))
        | (Value::String(_), Value::Number(_) | Value::Bool(_)) => {
            Some(util::stringify(left).cmp(&util::stringify(right)))
        }
        _ => None,
    };

    match op {
        BinOp::Eq => ordering == Some(Ordering::Equal),
        BinOp::Ne => ordering != Some(Ordering::Equal),
        BinOp::Lt => ordering == Some(Ordering::Less),
        BinOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        BinOp::Gt => ordering == Some(Ordering::Greater),
        BinOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        BinOp::And | BinOp::Or => false,
    }
}
