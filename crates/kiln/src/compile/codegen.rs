//! Code generation.
//!
//! Lowers a [`BoundTemplate`] into a flat tree of [`Op`]s for one output
//! mode. Every name is already resolved: identifiers become frame slots,
//! member accesses become field reads, method calls or builtins. Adjacent
//! literal text is merged, and in byte mode it is encoded here, once.

use std::sync::Weak;

use kiln_syntax::{BinaryOp, Expr, ExprId, ExprKind, Node, UnaryOp};
use once_cell::sync::OnceCell;

use crate::error::CompileError;
use crate::output::{Literal, OutputMode};
use crate::value::Const;

use super::bind::{lit_const, Builtin, BoundTemplate, Resolved};
use super::{CompiledTemplate, IncludeResolver};

/// A compiled expression.
#[derive(Debug)]
pub(crate) enum Code {
    Const(Const),
    Slot(usize),
    List(Vec<Code>),
    Field {
        object: Box<Code>,
        name: Box<str>,
    },
    Method {
        object: Box<Code>,
        name: Box<str>,
        args: Vec<Code>,
    },
    Builtin {
        object: Box<Code>,
        builtin: Builtin,
        args: Vec<Code>,
    },
    Not(Box<Code>),
    Neg(Box<Code>),
    And(Box<Code>, Box<Code>),
    Or(Box<Code>, Box<Code>),
    Binary {
        op: BinaryOp,
        lhs: Box<Code>,
        rhs: Box<Code>,
    },
}

/// A compiled statement.
#[derive(Debug)]
pub(crate) enum Op {
    Literal(Literal),
    Escaped(Code),
    Raw(Code),
    Branch {
        arms: Vec<(Code, Vec<Op>)>,
        otherwise: Vec<Op>,
    },
    Loop {
        iterable: Code,
        element: usize,
        index: Option<usize>,
        body: Vec<Op>,
        otherwise: Vec<Op>,
    },
    Include(IncludeSite),
}

/// A call into another template.
#[derive(Debug)]
pub(crate) struct IncludeSite {
    pub target: Box<str>,
    /// One entry per target parameter in schema order; `None` uses the
    /// target's default.
    pub args: Vec<Option<Code>>,
    /// The resolved target, filled on first execution.
    pub link: OnceCell<Weak<CompiledTemplate>>,
}

impl Op {
    pub(crate) fn count(ops: &[Op]) -> usize {
        ops.iter()
            .map(|op| match op {
                Op::Branch { arms, otherwise } => {
                    1 + arms.iter().map(|(_, body)| Op::count(body)).sum::<usize>()
                        + Op::count(otherwise)
                }
                Op::Loop {
                    body, otherwise, ..
                } => 1 + Op::count(body) + Op::count(otherwise),
                _ => 1,
            })
            .sum()
    }

    pub(crate) fn collect_literals<'a>(ops: &'a [Op], out: &mut Vec<&'a Literal>) {
        for op in ops {
            match op {
                Op::Literal(literal) => out.push(literal),
                Op::Branch { arms, otherwise } => {
                    for (_, body) in arms {
                        Op::collect_literals(body, out);
                    }
                    Op::collect_literals(otherwise, out);
                }
                Op::Loop {
                    body, otherwise, ..
                } => {
                    Op::collect_literals(body, out);
                    Op::collect_literals(otherwise, out);
                }
                _ => {}
            }
        }
    }
}

/// Generates code for `bound`. Includes cannot be executed by the result.
pub fn generate(bound: &BoundTemplate<'_>, mode: OutputMode) -> Result<CompiledTemplate, CompileError> {
    Generator { bound, mode }.template(None)
}

/// Generates code for `bound`, resolving includes through `resolver` when
/// they first execute.
pub fn generate_linked(
    bound: &BoundTemplate<'_>,
    mode: OutputMode,
    resolver: Weak<dyn IncludeResolver>,
) -> Result<CompiledTemplate, CompileError> {
    Generator { bound, mode }.template(Some(resolver))
}

struct Generator<'b, 't> {
    bound: &'b BoundTemplate<'t>,
    mode: OutputMode,
}

impl Generator<'_, '_> {
    fn template(
        &self,
        resolver: Option<Weak<dyn IncludeResolver>>,
    ) -> Result<CompiledTemplate, CompileError> {
        let template = self.bound.template();
        let ops = self.nodes(&template.ast().body)?;
        Ok(CompiledTemplate {
            name: template.name().to_string(),
            mode: self.mode,
            schema: self.bound.schema().clone(),
            frame_size: self.bound.frame_size(),
            ops,
            resolver,
        })
    }

    fn literal(&self, text: String) -> Literal {
        match self.mode {
            OutputMode::Text => Literal::Text(text.into_boxed_str()),
            OutputMode::Bytes => Literal::Encoded(text.into_bytes().into_boxed_slice()),
        }
    }

    fn nodes(&self, nodes: &[Node]) -> Result<Vec<Op>, CompileError> {
        let mut ops = Vec::with_capacity(nodes.len());
        let mut pending = String::new();

        for node in nodes {
            if let Node::Literal(lit) = node {
                pending.push_str(&lit.text);
                continue;
            }
            if !pending.is_empty() {
                ops.push(Op::Literal(self.literal(std::mem::take(&mut pending))));
            }
            ops.push(self.node(node)?);
        }
        if !pending.is_empty() {
            ops.push(Op::Literal(self.literal(pending)));
        }
        Ok(ops)
    }

    fn node(&self, node: &Node) -> Result<Op, CompileError> {
        let op = match node {
            Node::Literal(lit) => Op::Literal(self.literal(lit.text.clone())),
            Node::Interpolation(interp) => {
                let code = self.expr(&interp.expr)?;
                if interp.raw {
                    Op::Raw(code)
                } else {
                    Op::Escaped(code)
                }
            }
            Node::If(block) => Op::Branch {
                arms: block
                    .arms
                    .iter()
                    .map(|arm| -> Result<_, CompileError> {
                        Ok((self.expr(&arm.condition)?, self.nodes(&arm.body)?))
                    })
                    .collect::<Result<_, _>>()?,
                otherwise: self.nodes(block.otherwise.as_deref().unwrap_or_default())?,
            },
            Node::For(block) => Op::Loop {
                iterable: self.expr(&block.iterable)?,
                element: self.slot(block.element.id)?,
                index: block.index.as_ref().map(|b| self.slot(b.id)).transpose()?,
                body: self.nodes(&block.body)?,
                otherwise: self.nodes(block.otherwise.as_deref().unwrap_or_default())?,
            },
            Node::Include(include) => {
                let plan = self
                    .bound
                    .include_plan(include.id)
                    .ok_or(CompileError::MissingIncludePlan { id: include.id.0 })?;
                let args = plan
                    .args
                    .iter()
                    .map(|arg| arg.map(|i| self.expr(&include.args[i].value)).transpose())
                    .collect::<Result<_, _>>()?;
                Op::Include(IncludeSite {
                    target: include.target.as_str().into(),
                    args,
                    link: OnceCell::new(),
                })
            }
        };
        Ok(op)
    }

    fn slot(&self, id: ExprId) -> Result<usize, CompileError> {
        match self.bound.resolution(id) {
            Some(Resolved::Slot(slot)) => Ok(slot),
            _ => Err(CompileError::Unresolved { id: id.0 }),
        }
    }

    fn exprs(&self, exprs: &[Expr]) -> Result<Vec<Code>, CompileError> {
        exprs.iter().map(|e| self.expr(e)).collect()
    }

    fn expr(&self, expr: &Expr) -> Result<Code, CompileError> {
        let unresolved = || CompileError::Unresolved { id: expr.id.0 };
        let code = match &expr.kind {
            ExprKind::Lit(lit) => Code::Const(lit_const(lit)),
            ExprKind::Ident(_) => Code::Slot(self.slot(expr.id)?),
            ExprKind::List(items) => {
                let items = self.exprs(items)?;
                if items.iter().all(|c| matches!(c, Code::Const(_))) {
                    Code::Const(Const::List(
                        items
                            .into_iter()
                            .filter_map(|c| match c {
                                Code::Const(c) => Some(c),
                                _ => None,
                            })
                            .collect(),
                    ))
                } else {
                    Code::List(items)
                }
            }
            ExprKind::Member { object, name } => match self.bound.resolution(expr.id) {
                Some(Resolved::Field) => Code::Field {
                    object: Box::new(self.expr(object)?),
                    name: name.as_str().into(),
                },
                _ => return Err(unresolved()),
            },
            ExprKind::Call { object, name, args } => match self.bound.resolution(expr.id) {
                Some(Resolved::Method) => Code::Method {
                    object: Box::new(self.expr(object)?),
                    name: name.as_str().into(),
                    args: self.exprs(args)?,
                },
                Some(Resolved::Builtin(builtin)) => Code::Builtin {
                    object: Box::new(self.expr(object)?),
                    builtin,
                    args: self.exprs(args)?,
                },
                _ => return Err(unresolved()),
            },
            ExprKind::Unary { op, operand } => {
                let operand = Box::new(self.expr(operand)?);
                match op {
                    UnaryOp::Not => Code::Not(operand),
                    UnaryOp::Neg => Code::Neg(operand),
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs = Box::new(self.expr(lhs)?);
                let rhs = Box::new(self.expr(rhs)?);
                match op {
                    BinaryOp::And => Code::And(lhs, rhs),
                    BinaryOp::Or => Code::Or(lhs, rhs),
                    _ => Code::Binary { op: *op, lhs, rhs },
                }
            }
        };
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{bind, NoIncludes, Template};
    use crate::oracle::TypeRegistry;
    use kiln_syntax::ParseOptions;

    fn ops(source: &str, mode: OutputMode) -> CompiledTemplate {
        let tpl = Template::parse("t", source, &ParseOptions::default()).unwrap();
        let bound = bind(&tpl, &TypeRegistry::new(), &NoIncludes).unwrap();
        generate(&bound, mode).unwrap()
    }

    #[test]
    fn test_adjacent_literals_merge() {
        let tpl = ops("a<%-- c --%>b@raw${x}@endraw", OutputMode::Text);
        assert_eq!(tpl.op_count(), 1);
        assert_eq!(tpl.literals(), vec![&Literal::Text("ab${x}".into())]);
    }

    #[test]
    fn test_byte_mode_encodes_literals() {
        let tpl = ops("héllo ${1}", OutputMode::Bytes);
        assert_eq!(
            tpl.literals(),
            vec![&Literal::Encoded("héllo ".as_bytes().to_vec().into_boxed_slice())]
        );
    }

    #[test]
    fn test_constant_lists_fold() {
        let tpl = ops("@for(x in [1, 2])${x}@end", OutputMode::Text);
        let Op::Loop { iterable, .. } = &tpl.ops[0] else {
            panic!("expected loop");
        };
        assert!(matches!(iterable, Code::Const(Const::List(items)) if items.len() == 2));
    }

    #[test]
    fn test_nested_op_count() {
        let tpl = ops(
            "@param bool a\n@if(a)x${1}@elseif(!a)y@else z@end",
            OutputMode::Text,
        );
        assert_eq!(tpl.op_count(), 5);
    }
}
