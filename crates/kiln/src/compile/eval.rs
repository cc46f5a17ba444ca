//! Execution of compiled templates.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::sync::{Arc, Weak};

use kiln_syntax::BinaryOp;
use tracing::trace;

use crate::error::RenderError;
use crate::output::Output;
use crate::value::{Model, Value};

use super::bind::Builtin;
use super::codegen::{Code, IncludeSite, Op};
use super::CompiledTemplate;

/// Maximum include nesting before a render is aborted.
pub(crate) const MAX_INCLUDE_DEPTH: usize = 64;

impl CompiledTemplate {
    /// Renders the template into `out`, reading parameters from `model`.
    ///
    /// Each declared parameter is read with [`Model::field`]. A missing
    /// field falls back to the parameter's default; with no default the
    /// render fails with [`RenderError::MissingParameter`]. `out` must be of
    /// the mode the template was compiled for.
    pub fn render(&self, model: &dyn Model, out: &mut dyn Output) -> Result<(), RenderError> {
        if out.mode() != self.mode {
            return Err(RenderError::ModeMismatch {
                expected: self.mode,
                found: out.mode(),
            });
        }
        let mut frame = Vec::with_capacity(self.frame_size);
        for param in &self.schema {
            let value = match model.field(&param.name) {
                Some(value) => {
                    if !value.conforms_to(&param.ty) {
                        return Err(RenderError::mismatch(
                            param.name.as_str(),
                            &param.ty,
                            value.type_name(),
                        ));
                    }
                    value
                }
                None => match &param.default {
                    Some(default) => default.to_value(),
                    None => {
                        return Err(RenderError::MissingParameter {
                            name: param.name.clone(),
                        })
                    }
                },
            };
            frame.push(value.widen_to(&param.ty));
        }
        self.run(frame, out, 0)
    }

    /// Renders with arguments already evaluated by an including template,
    /// one per parameter in schema order.
    fn render_args<'a>(
        &'a self,
        args: Vec<Option<Value<'a>>>,
        out: &mut dyn Output,
        depth: usize,
    ) -> Result<(), RenderError> {
        let mut frame = Vec::with_capacity(self.frame_size);
        for (param, arg) in self.schema.iter().zip(args) {
            let value = match arg {
                Some(value) => value,
                None => match &param.default {
                    Some(default) => default.to_value(),
                    None => {
                        return Err(RenderError::MissingParameter {
                            name: param.name.clone(),
                        })
                    }
                },
            };
            frame.push(value.widen_to(&param.ty));
        }
        self.run(frame, out, depth)
    }

    fn run<'a>(
        &'a self,
        mut frame: Vec<Value<'a>>,
        out: &mut dyn Output,
        depth: usize,
    ) -> Result<(), RenderError> {
        frame.resize(self.frame_size.max(frame.len()), Value::Null);
        let mut exec = Exec {
            template: self,
            frame,
            depth,
        };
        exec.ops(&self.ops, out)
    }
}

struct Exec<'a> {
    template: &'a CompiledTemplate,
    frame: Vec<Value<'a>>,
    depth: usize,
}

impl<'a> Exec<'a> {
    fn ops(&mut self, ops: &'a [Op], out: &mut dyn Output) -> Result<(), RenderError> {
        for op in ops {
            self.op(op, out)?;
        }
        Ok(())
    }

    fn op(&mut self, op: &'a Op, out: &mut dyn Output) -> Result<(), RenderError> {
        match op {
            Op::Literal(literal) => out.append_literal(literal),
            Op::Escaped(code) => out.append_escaped(&self.eval(code)?)?,
            Op::Raw(code) => out.append_raw(&self.eval(code)?)?,
            Op::Branch { arms, otherwise } => {
                for (condition, body) in arms {
                    if self.condition(condition)? {
                        return self.ops(body, out);
                    }
                }
                self.ops(otherwise, out)?;
            }
            Op::Loop {
                iterable,
                element,
                index,
                body,
                otherwise,
            } => {
                let items = match self.eval(iterable)? {
                    Value::List(items) => items,
                    other => {
                        return Err(RenderError::NotIterable {
                            found: other.type_name(),
                        })
                    }
                };
                if items.is_empty() {
                    return self.ops(otherwise, out);
                }
                for (i, item) in items.into_iter().enumerate() {
                    self.frame[*element] = item;
                    if let Some(index) = index {
                        self.frame[*index] = Value::Int(i as i64);
                    }
                    self.ops(body, out)?;
                }
            }
            Op::Include(site) => self.include(site, out)?,
        }
        Ok(())
    }

    fn condition(&self, code: &'a Code) -> Result<bool, RenderError> {
        let value = self.eval(code)?;
        value
            .as_bool()
            .ok_or_else(|| RenderError::mismatch("condition", "bool", value.type_name()))
    }

    fn include(&mut self, site: &'a IncludeSite, out: &mut dyn Output) -> Result<(), RenderError> {
        if self.depth >= MAX_INCLUDE_DEPTH {
            return Err(RenderError::RecursionLimit {
                template: site.target.to_string(),
                limit: MAX_INCLUDE_DEPTH,
            });
        }
        let target = self.link(site)?;
        let args = site
            .args
            .iter()
            .map(|arg| arg.as_ref().map(|code| self.eval(code)).transpose())
            .collect::<Result<Vec<_>, _>>()?;
        target
            .render_args(args, out, self.depth + 1)
            .map_err(|source| RenderError::Include {
                template: site.target.to_string(),
                source: Box::new(source),
            })
    }

    fn link(&self, site: &IncludeSite) -> Result<Arc<CompiledTemplate>, RenderError> {
        if let Some(target) = site.link.get().and_then(Weak::upgrade) {
            return Ok(target);
        }
        let unresolved = |reason: String| RenderError::UnresolvedInclude {
            template: site.target.to_string(),
            reason,
        };
        let resolver = self
            .template
            .resolver
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| unresolved("no registry is available".to_string()))?;
        let target = resolver
            .resolve(&site.target, self.template.mode)
            .map_err(|err| unresolved(err.to_string()))?;

        trace!(
            template = %self.template.name,
            include = %site.target,
            mode = %self.template.mode,
            "linked include"
        );
        // A racing render may have linked the same target first.
        let _ = site.link.set(Arc::downgrade(&target));
        Ok(target)
    }

    fn eval(&self, code: &'a Code) -> Result<Value<'a>, RenderError> {
        match code {
            Code::Const(constant) => Ok(constant.to_value()),
            Code::Slot(slot) => Ok(self.frame[*slot].clone()),
            Code::List(items) => Ok(Value::List(
                items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<Result<_, _>>()?,
            )),
            Code::Field { object, name } => match self.eval(object)? {
                Value::Record(model) => model.field(name).ok_or_else(|| RenderError::MissingField {
                    name: name.to_string(),
                }),
                Value::Null => Err(RenderError::NullDereference {
                    name: name.to_string(),
                }),
                other => Err(RenderError::mismatch(&**name, "record", other.type_name())),
            },
            Code::Method { object, name, args } => {
                let receiver = self.eval(object)?;
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                match receiver {
                    Value::Record(model) => model.call(name, &args),
                    Value::Null => Err(RenderError::NullDereference {
                        name: name.to_string(),
                    }),
                    other => Err(RenderError::mismatch(&**name, "record", other.type_name())),
                }
            }
            Code::Builtin {
                object,
                builtin,
                args,
            } => {
                let receiver = self.eval(object)?;
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                call_builtin(*builtin, receiver, &args)
            }
            Code::Not(operand) => match self.eval(operand)? {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                other => Err(RenderError::mismatch("!", "bool", other.type_name())),
            },
            Code::Neg(operand) => match self.eval(operand)? {
                Value::Int(n) => n
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or(RenderError::Overflow { op: "-" }),
                Value::Float(n) => Ok(Value::Float(-n)),
                other => Err(RenderError::mismatch("-", "number", other.type_name())),
            },
            Code::And(lhs, rhs) => {
                if !self.condition_operand("&&", lhs)? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.condition_operand("&&", rhs)?))
            }
            Code::Or(lhs, rhs) => {
                if self.condition_operand("||", lhs)? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.condition_operand("||", rhs)?))
            }
            Code::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                binary(*op, lhs, rhs)
            }
        }
    }

    fn condition_operand(&self, op: &'static str, code: &'a Code) -> Result<bool, RenderError> {
        let value = self.eval(code)?;
        value
            .as_bool()
            .ok_or_else(|| RenderError::mismatch(op, "bool", value.type_name()))
    }
}

fn call_builtin<'a>(
    builtin: Builtin,
    receiver: Value<'a>,
    args: &[Value<'a>],
) -> Result<Value<'a>, RenderError> {
    let value = match (builtin, receiver) {
        (Builtin::Len, Value::Str(s)) => Value::Int(s.chars().count() as i64),
        (Builtin::Len, Value::List(items)) => Value::Int(items.len() as i64),
        (Builtin::IsEmpty, Value::Str(s)) => Value::Bool(s.is_empty()),
        (Builtin::IsEmpty, Value::List(items)) => Value::Bool(items.is_empty()),
        (Builtin::Upper, Value::Str(s)) => Value::Str(Cow::Owned(s.to_uppercase())),
        (Builtin::Lower, Value::Str(s)) => Value::Str(Cow::Owned(s.to_lowercase())),
        (Builtin::Trim, Value::Str(Cow::Borrowed(s))) => Value::Str(Cow::Borrowed(s.trim())),
        (Builtin::Trim, Value::Str(Cow::Owned(s))) => Value::Str(Cow::Owned(s.trim().to_string())),
        (Builtin::Contains, Value::Str(s)) => match args.first() {
            Some(Value::Str(needle)) => Value::Bool(s.contains(&**needle)),
            Some(Value::Null) => Value::Bool(false),
            Some(other) => return Err(RenderError::mismatch("contains", "string", other.type_name())),
            None => return Err(RenderError::mismatch("contains", "string", "nothing")),
        },
        (Builtin::Contains, Value::List(items)) => match args.first() {
            Some(needle) => Value::Bool(items.iter().any(|item| item.loose_eq(needle))),
            None => return Err(RenderError::mismatch("contains", "value", "nothing")),
        },
        (builtin, Value::Null) => {
            return Err(RenderError::NullDereference {
                name: builtin.name().to_string(),
            })
        }
        (builtin, other) => {
            return Err(RenderError::mismatch(
                builtin.name(),
                "string or list",
                other.type_name(),
            ))
        }
    };
    Ok(value)
}

fn int_op(op: BinaryOp, a: i64, b: i64) -> Result<i64, RenderError> {
    let overflow = || RenderError::Overflow { op: op.symbol() };
    match op {
        BinaryOp::Add => a.checked_add(b).ok_or_else(overflow),
        BinaryOp::Sub => a.checked_sub(b).ok_or_else(overflow),
        BinaryOp::Mul => a.checked_mul(b).ok_or_else(overflow),
        BinaryOp::Div | BinaryOp::Rem if b == 0 => Err(RenderError::DivisionByZero),
        BinaryOp::Div => a.checked_div(b).ok_or_else(overflow),
        BinaryOp::Rem => a.checked_rem(b).ok_or_else(overflow),
        _ => Err(not_arithmetic(op)),
    }
}

fn float_op(op: BinaryOp, a: f64, b: f64) -> Result<f64, RenderError> {
    match op {
        BinaryOp::Add => Ok(a + b),
        BinaryOp::Sub => Ok(a - b),
        BinaryOp::Mul => Ok(a * b),
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => Err(RenderError::DivisionByZero),
        BinaryOp::Div => Ok(a / b),
        BinaryOp::Rem => Ok(a % b),
        _ => Err(not_arithmetic(op)),
    }
}

fn not_arithmetic(op: BinaryOp) -> RenderError {
    RenderError::mismatch(op.symbol(), "arithmetic operator", "comparison")
}

fn compare(lhs: &Value<'_>, rhs: &Value<'_>) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => lhs.as_float()?.partial_cmp(&rhs.as_float()?),
    }
}

fn binary<'a>(op: BinaryOp, lhs: Value<'a>, rhs: Value<'a>) -> Result<Value<'a>, RenderError> {
    let value = match op {
        BinaryOp::Eq => Value::Bool(lhs.loose_eq(&rhs)),
        BinaryOp::Ne => Value::Bool(!lhs.loose_eq(&rhs)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&lhs, &rhs) {
                (Value::Null, _) | (_, Value::Null) => {
                    return Err(RenderError::mismatch(op.symbol(), "comparable values", "null"))
                }
                _ => compare(&lhs, &rhs),
            };
            // Unordered floats (NaN) compare false.
            Value::Bool(match ordering {
                Some(ordering) => match op {
                    BinaryOp::Lt => ordering == Ordering::Less,
                    BinaryOp::Le => ordering != Ordering::Greater,
                    BinaryOp::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                },
                None => false,
            })
        }
        BinaryOp::Add => match (lhs, rhs) {
            (Value::Str(a), Value::Str(b)) => {
                let mut joined = a.into_owned();
                joined.push_str(&b);
                Value::Str(Cow::Owned(joined))
            }
            (lhs, rhs) => arithmetic(op, lhs, rhs)?,
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => arithmetic(op, lhs, rhs)?,
        // Logical operators are compiled to short-circuiting code.
        BinaryOp::And | BinaryOp::Or => {
            Value::Bool(lhs.as_bool().unwrap_or(false) && rhs.as_bool().unwrap_or(false))
        }
    };
    Ok(value)
}

fn arithmetic<'a>(op: BinaryOp, lhs: Value<'a>, rhs: Value<'a>) -> Result<Value<'a>, RenderError> {
    match (&lhs, &rhs) {
        (Value::Int(a), Value::Int(b)) => int_op(op, *a, *b).map(Value::Int),
        _ => match (lhs.as_float(), rhs.as_float()) {
            (Some(a), Some(b)) => float_op(op, a, b).map(Value::Float),
            _ => {
                let found = if lhs.as_float().is_none() { &lhs } else { &rhs };
                Err(RenderError::mismatch(op.symbol(), "number", found.type_name()))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile_str;
    use crate::output::{ByteOutput, OutputMode, TextOutput};
    use std::collections::BTreeMap;

    fn render(source: &str, model: &BTreeMap<String, Value<'_>>) -> Result<String, RenderError> {
        let tpl = compile_str(source, OutputMode::Text).unwrap();
        let mut out = TextOutput::new();
        tpl.render(model, &mut out)?;
        Ok(out.into_string())
    }

    fn empty() -> BTreeMap<String, Value<'static>> {
        BTreeMap::new()
    }

    #[test]
    fn test_arithmetic_and_comparison() {
        let out = render(
            "${1 + 2 * 3} ${7 / 2} ${7 % 3} ${1 + 0.5} ${\"a\" + \"b\"} ${2 < 3} ${\"b\" <= \"a\"} ${-(4)}",
            &empty(),
        )
        .unwrap();
        assert_eq!(out, "7 3 1 1.5 ab true false -4");
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(render("${1 / 0}", &empty()), Err(RenderError::DivisionByZero));
        assert_eq!(render("${1.0 % 0}", &empty()), Err(RenderError::DivisionByZero));
    }

    #[test]
    fn test_overflow_is_an_error() {
        assert_eq!(
            render("${9223372036854775807 + 1}", &empty()),
            Err(RenderError::Overflow { op: "+" })
        );
        assert_eq!(
            render("${-9223372036854775808}", &empty()).unwrap(),
            "-9223372036854775808"
        );
        assert_eq!(
            render("${-9223372036854775808 - 1}", &empty()),
            Err(RenderError::Overflow { op: "-" })
        );
    }

    #[test]
    fn test_builtins() {
        let mut model = empty();
        model.insert("s".to_string(), Value::from("  Héllo "));
        let out = render(
            "@param string s\n${s.trim().upper()}|${s.len()}|${s.contains(\"ll\")}|${[1, 2].contains(2)}|${[].is_empty()}",
            &model,
        )
        .unwrap();
        assert_eq!(out, "HÉLLO|8|true|true|true");
    }

    #[test]
    fn test_parameter_checks() {
        assert_eq!(
            render("@param int n\n${n}", &empty()),
            Err(RenderError::MissingParameter {
                name: "n".to_string()
            })
        );
        let mut model = empty();
        model.insert("n".to_string(), Value::from("five"));
        assert_eq!(
            render("@param int n\n${n}", &model),
            Err(RenderError::TypeMismatch {
                name: "n".to_string(),
                expected: "int".to_string(),
                found: "string",
            })
        );
    }

    #[test]
    fn test_defaults_and_widening() {
        let mut model = empty();
        model.insert("x".to_string(), Value::Int(2));
        let out = render("@param float x\n@param string s = \"d\"\n${x / 4}${s}", &model).unwrap();
        assert_eq!(out, "0.5d");
    }

    #[test]
    fn test_null_condition_is_rejected() {
        let mut model = empty();
        model.insert("b".to_string(), Value::Null);
        assert!(matches!(
            render("@param bool b\n@if(b)x@end", &model),
            Err(RenderError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_loop_index_and_else() {
        let mut model = empty();
        model.insert("xs".to_string(), Value::from(vec!["a", "b"]));
        model.insert("none".to_string(), Value::List(vec![]));
        let out = render(
            "@param list<string> xs\n@param list<string> none\n\
             @for(x, i in xs)${i}=${x};@end@for(x in none)${x}@else empty@end",
            &model,
        )
        .unwrap();
        assert_eq!(out, "0=a;1=b; empty");
    }

    #[test]
    fn test_include_without_registry_fails() {
        let source = "@template.other()";
        let template = crate::compile::Template::parse("t", source, &Default::default()).unwrap();
        let mut schemas = std::collections::HashMap::new();
        schemas.insert("other".to_string(), crate::types::ParameterSchema::new());
        let tpl = crate::compile::compile(
            &template,
            &crate::oracle::TypeRegistry::new(),
            &schemas,
            OutputMode::Text,
        )
        .unwrap();
        let mut out = TextOutput::new();
        assert!(matches!(
            tpl.render(&empty(), &mut out),
            Err(RenderError::UnresolvedInclude { .. })
        ));
    }

    #[test]
    fn test_output_mode_must_match() {
        let tpl = compile_str("hello ${1}", OutputMode::Text).unwrap();
        let mut out = ByteOutput::new();
        assert_eq!(
            tpl.render(&empty(), &mut out),
            Err(RenderError::ModeMismatch {
                expected: OutputMode::Text,
                found: OutputMode::Bytes,
            })
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_deeply_nested_expression_renders() {
        let source = format!("${{{}1}}", "-".repeat(60));
        assert_eq!(render(&source, &empty()).unwrap(), "1");
    }
}
