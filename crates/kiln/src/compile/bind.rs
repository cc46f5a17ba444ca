//! Type binding.
//!
//! [`bind`] walks a parsed template once, resolving every identifier to a
//! frame slot, every member access to a field, method or builtin, and every
//! include to an argument plan. Results go into side tables indexed by
//! [`ExprId`]; the AST itself is never modified.
//!
//! Errors are collected rather than returned at the first failure. An
//! expression that failed to type is skipped by its parents so one mistake
//! produces one error.

use std::collections::HashMap;

use kiln_syntax::{
    BinaryOp, Binding, Expr, ExprId, ExprKind, Include, Lit, Location, Node, Span, TypeExpr,
    UnaryOp,
};

use crate::error::{TypeError, TypeErrorKind, TypeErrors};
use crate::oracle::{Member, MemberKind, TypeOracle};
use crate::types::{Parameter, ParameterSchema, TypeDesc};
use crate::value::Const;

use super::Template;

/// Parameter schemas of templates that may be included.
pub trait SchemaLookup {
    /// The schema of template `name`, or `None` if it cannot be included.
    fn schema(&self, name: &str) -> Option<ParameterSchema>;
}

/// A lookup where no template can be included.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIncludes;

impl SchemaLookup for NoIncludes {
    fn schema(&self, _name: &str) -> Option<ParameterSchema> {
        None
    }
}

impl SchemaLookup for HashMap<String, ParameterSchema> {
    fn schema(&self, name: &str) -> Option<ParameterSchema> {
        self.get(name).cloned()
    }
}

/// Builtin methods on strings and lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    Len,
    IsEmpty,
    Upper,
    Lower,
    Trim,
    Contains,
}

impl Builtin {
    /// Resolves `name` on `receiver` to a builtin with its parameter and
    /// return types.
    fn lookup(receiver: &TypeDesc, name: &str) -> Option<(Builtin, Vec<TypeDesc>, TypeDesc)> {
        let found = match (receiver, name) {
            (TypeDesc::Str | TypeDesc::List(_), "len") => (Builtin::Len, vec![], TypeDesc::Int),
            (TypeDesc::Str | TypeDesc::List(_), "is_empty") => {
                (Builtin::IsEmpty, vec![], TypeDesc::Bool)
            }
            (TypeDesc::Str, "upper") => (Builtin::Upper, vec![], TypeDesc::Str),
            (TypeDesc::Str, "lower") => (Builtin::Lower, vec![], TypeDesc::Str),
            (TypeDesc::Str, "trim") => (Builtin::Trim, vec![], TypeDesc::Str),
            (TypeDesc::Str, "contains") => (Builtin::Contains, vec![TypeDesc::Str], TypeDesc::Bool),
            (TypeDesc::List(element), "contains") => {
                (Builtin::Contains, vec![(**element).clone()], TypeDesc::Bool)
            }
            _ => return None,
        };
        Some(found)
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Builtin::Len => "len",
            Builtin::IsEmpty => "is_empty",
            Builtin::Upper => "upper",
            Builtin::Lower => "lower",
            Builtin::Trim => "trim",
            Builtin::Contains => "contains",
        }
    }
}

/// How an identifier, member access or call was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolved {
    /// Parameter or loop binding stored in a frame slot.
    Slot(usize),
    /// Record field, read through `Model::field`.
    Field,
    /// Record method, invoked through `Model::call`.
    Method,
    Builtin(Builtin),
}

/// How an include fills its target's parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IncludePlan {
    /// For each target parameter in schema order, the index of the include
    /// argument providing it, or `None` to use the target's default.
    pub args: Vec<Option<usize>>,
}

/// A template whose expressions all resolved and type-checked.
#[derive(Debug)]
pub struct BoundTemplate<'t> {
    template: &'t Template,
    schema: ParameterSchema,
    types: Vec<Option<TypeDesc>>,
    resolved: Vec<Option<Resolved>>,
    includes: HashMap<ExprId, IncludePlan>,
    frame_size: usize,
}

impl<'t> BoundTemplate<'t> {
    pub fn template(&self) -> &'t Template {
        self.template
    }

    pub fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    /// Static type of an expression of this template.
    pub fn type_of(&self, expr: &Expr) -> Option<&TypeDesc> {
        self.types.get(expr.id.index())?.as_ref()
    }

    /// Number of value slots a render needs: parameters, then loop bindings.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub(crate) fn resolution(&self, id: ExprId) -> Option<Resolved> {
        self.resolved.get(id.index()).copied().flatten()
    }

    pub(crate) fn include_plan(&self, id: ExprId) -> Option<&IncludePlan> {
        self.includes.get(&id)
    }
}

/// Binds `template` against `oracle`, looking up include targets in
/// `includes`.
pub fn bind<'t>(
    template: &'t Template,
    oracle: &dyn TypeOracle,
    includes: &dyn SchemaLookup,
) -> Result<BoundTemplate<'t>, TypeErrors> {
    let mut binder = Binder::new(template, oracle, includes);
    let schema = binder.header();
    binder.nodes(&template.ast().body);

    if !binder.errors.is_empty() {
        return Err(TypeErrors(binder.errors));
    }
    Ok(BoundTemplate {
        template,
        schema,
        types: binder.types,
        resolved: binder.resolved,
        includes: binder.plans,
        frame_size: binder.frame_size,
    })
}

/// Resolves only the `@param` header of `template`.
pub fn schema_of(template: &Template, oracle: &dyn TypeOracle) -> Result<ParameterSchema, TypeErrors> {
    let mut binder = Binder::new(template, oracle, &NoIncludes);
    let schema = binder.header();
    if binder.errors.is_empty() {
        Ok(schema)
    } else {
        Err(TypeErrors(binder.errors))
    }
}

/// A name visible in the current scope.
struct Local {
    name: String,
    slot: usize,
    /// `None` when the declaration itself failed to type.
    ty: Option<TypeDesc>,
}

struct Binder<'t, 'o> {
    template: &'t Template,
    oracle: &'o dyn TypeOracle,
    includes: &'o dyn SchemaLookup,
    params: Vec<Local>,
    locals: Vec<Local>,
    next_slot: usize,
    frame_size: usize,
    types: Vec<Option<TypeDesc>>,
    resolved: Vec<Option<Resolved>>,
    plans: HashMap<ExprId, IncludePlan>,
    errors: Vec<TypeError>,
}

impl<'t, 'o> Binder<'t, 'o> {
    fn new(
        template: &'t Template,
        oracle: &'o dyn TypeOracle,
        includes: &'o dyn SchemaLookup,
    ) -> Self {
        let ids = template.ast().id_count as usize;
        Self {
            template,
            oracle,
            includes,
            params: Vec::new(),
            locals: Vec::new(),
            next_slot: 0,
            frame_size: 0,
            types: vec![None; ids],
            resolved: vec![None; ids],
            plans: HashMap::new(),
            errors: Vec::new(),
        }
    }

    fn error(&mut self, kind: TypeErrorKind, span: Span) {
        self.errors.push(TypeError {
            kind,
            location: Location::locate(self.template.source(), span.start),
        });
    }

    fn resolve(&mut self, id: ExprId, resolution: Resolved) {
        if let Some(entry) = self.resolved.get_mut(id.index()) {
            *entry = Some(resolution);
        }
    }

    fn set_type(&mut self, id: ExprId, ty: &TypeDesc) {
        if let Some(entry) = self.types.get_mut(id.index()) {
            *entry = Some(ty.clone());
        }
    }

    // ------------------------------------------------------------------------
    // Header
    // ------------------------------------------------------------------------

    fn resolve_type(&mut self, ty: &TypeExpr, span: Span) -> Option<TypeDesc> {
        match ty {
            TypeExpr::List(inner) => self.resolve_type(inner, span).map(TypeDesc::list),
            TypeExpr::Named(name) => {
                if let Some(primitive) = TypeDesc::primitive(name) {
                    Some(primitive)
                } else if self.oracle.has_type(name) {
                    Some(TypeDesc::Record(name.clone()))
                } else {
                    self.error(TypeErrorKind::UnknownType { name: name.clone() }, span);
                    None
                }
            }
        }
    }

    fn header(&mut self) -> ParameterSchema {
        let mut schema = ParameterSchema::new();
        let decls = &self.template.ast().params;

        for decl in decls {
            if self.params.iter().any(|p| p.name == decl.name) {
                self.error(
                    TypeErrorKind::DuplicateParameter {
                        name: decl.name.clone(),
                    },
                    decl.span,
                );
                continue;
            }

            let ty = self.resolve_type(&decl.ty, decl.span);
            let default = match (&ty, &decl.default) {
                (Some(ty), Some(expr)) => {
                    let constant = const_of(expr).filter(|c| {
                        const_type(c).is_some_and(|found| ty.accepts(&found))
                    });
                    if constant.is_none() {
                        self.error(
                            TypeErrorKind::InvalidDefault {
                                name: decl.name.clone(),
                                expected: ty.clone(),
                            },
                            expr.span,
                        );
                    }
                    constant
                }
                _ => None,
            };

            if let Some(ty) = &ty {
                schema.insert(Parameter {
                    name: decl.name.clone(),
                    ty: ty.clone(),
                    default,
                });
            }
            self.params.push(Local {
                name: decl.name.clone(),
                slot: self.params.len(),
                ty,
            });
        }

        self.next_slot = self.params.len();
        self.frame_size = self.next_slot;
        schema
    }

    // ------------------------------------------------------------------------
    // Body
    // ------------------------------------------------------------------------

    fn nodes(&mut self, nodes: &[Node]) {
        for node in nodes {
            self.node(node);
        }
    }

    fn node(&mut self, node: &Node) {
        match node {
            Node::Literal(_) => {}
            Node::Interpolation(interp) => {
                if let Some(ty) = self.expr(&interp.expr) {
                    if !ty.is_renderable() {
                        self.error(TypeErrorKind::NotRenderable { found: ty }, interp.expr.span);
                    }
                }
            }
            Node::If(block) => {
                for arm in &block.arms {
                    self.condition(&arm.condition);
                    self.nodes(&arm.body);
                }
                if let Some(otherwise) = &block.otherwise {
                    self.nodes(otherwise);
                }
            }
            Node::For(block) => {
                let element_ty = match self.expr(&block.iterable) {
                    Some(TypeDesc::List(element)) => Some(*element),
                    Some(found) => {
                        self.error(TypeErrorKind::NotIterable { found }, block.iterable.span);
                        None
                    }
                    None => None,
                };

                let saved_slot = self.next_slot;
                let saved_locals = self.locals.len();
                self.declare(&block.element, element_ty);
                if let Some(index) = &block.index {
                    self.declare(index, Some(TypeDesc::Int));
                }
                self.nodes(&block.body);
                self.locals.truncate(saved_locals);
                self.next_slot = saved_slot;

                if let Some(otherwise) = &block.otherwise {
                    self.nodes(otherwise);
                }
            }
            Node::Include(include) => self.include(include),
        }
    }

    fn declare(&mut self, binding: &Binding, ty: Option<TypeDesc>) {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.frame_size = self.frame_size.max(self.next_slot);
        self.resolve(binding.id, Resolved::Slot(slot));
        if let Some(ty) = &ty {
            self.set_type(binding.id, ty);
        }
        self.locals.push(Local {
            name: binding.name.clone(),
            slot,
            ty,
        });
    }

    fn condition(&mut self, expr: &Expr) {
        match self.expr(expr) {
            Some(TypeDesc::Bool) | None => {}
            Some(found) => self.error(TypeErrorKind::NonBooleanCondition { found }, expr.span),
        }
    }

    fn include(&mut self, include: &Include) {
        let arg_types: Vec<Option<TypeDesc>> =
            include.args.iter().map(|arg| self.expr(&arg.value)).collect();

        let Some(schema) = self.includes.schema(&include.target) else {
            self.error(
                TypeErrorKind::UnknownTemplate {
                    name: include.target.clone(),
                },
                include.span,
            );
            return;
        };
        let params: Vec<&Parameter> = schema.iter().collect();
        let errors_before = self.errors.len();
        let mut plan: Vec<Option<usize>> = vec![None; params.len()];
        let mut seen_named = false;

        for (i, arg) in include.args.iter().enumerate() {
            let slot = match &arg.name {
                None if seen_named => {
                    self.error(TypeErrorKind::PositionalAfterNamed, arg.value.span);
                    continue;
                }
                None if i >= params.len() => {
                    self.error(
                        TypeErrorKind::TooManyArguments {
                            template: include.target.clone(),
                            expected: params.len(),
                            found: include.args.len(),
                        },
                        arg.value.span,
                    );
                    break;
                }
                None => i,
                Some(name) => {
                    seen_named = true;
                    match schema.get(name) {
                        Some((slot, _)) => slot,
                        None => {
                            self.error(
                                TypeErrorKind::UnknownArgument {
                                    template: include.target.clone(),
                                    name: name.clone(),
                                },
                                arg.value.span,
                            );
                            continue;
                        }
                    }
                }
            };

            let param = params[slot];
            if plan[slot].is_some() {
                self.error(
                    TypeErrorKind::DuplicateArgument {
                        name: param.name.clone(),
                    },
                    arg.value.span,
                );
                continue;
            }
            plan[slot] = Some(i);

            if let Some(found) = &arg_types[i] {
                if !param.ty.accepts(found) {
                    self.error(
                        TypeErrorKind::ArgumentType {
                            name: param.name.clone(),
                            expected: param.ty.clone(),
                            found: found.clone(),
                        },
                        arg.value.span,
                    );
                }
            }
        }

        for (param, provided) in params.iter().zip(&plan) {
            if provided.is_none() && param.default.is_none() {
                self.error(
                    TypeErrorKind::MissingArgument {
                        template: include.target.clone(),
                        name: param.name.clone(),
                    },
                    include.span,
                );
            }
        }

        if self.errors.len() == errors_before {
            self.plans.insert(include.id, IncludePlan { args: plan });
        }
    }

    // ------------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------------

    fn expr(&mut self, expr: &Expr) -> Option<TypeDesc> {
        let ty = self.expr_kind(expr)?;
        self.set_type(expr.id, &ty);
        Some(ty)
    }

    fn lookup(&self, name: &str) -> Option<&Local> {
        self.locals
            .iter()
            .rev()
            .find(|l| l.name == name)
            .or_else(|| self.params.iter().find(|p| p.name == name))
    }

    fn expr_kind(&mut self, expr: &Expr) -> Option<TypeDesc> {
        match &expr.kind {
            ExprKind::Lit(lit) => Some(lit_type(lit)),

            ExprKind::Ident(name) => {
                let Some(local) = self.lookup(name) else {
                    self.error(
                        TypeErrorKind::UnresolvedIdentifier { name: name.clone() },
                        expr.span,
                    );
                    return None;
                };
                let (slot, ty) = (local.slot, local.ty.clone());
                self.resolve(expr.id, Resolved::Slot(slot));
                ty
            }

            ExprKind::List(items) => {
                let types: Vec<Option<TypeDesc>> = items.iter().map(|i| self.expr(i)).collect();
                let mut element = TypeDesc::Null;
                for (item, ty) in items.iter().zip(types) {
                    let ty = ty?;
                    match element.unify(&ty) {
                        Some(unified) => element = unified,
                        None => {
                            self.error(
                                TypeErrorKind::MixedList {
                                    first: element,
                                    other: ty,
                                },
                                item.span,
                            );
                            return None;
                        }
                    }
                }
                Some(TypeDesc::list(element))
            }

            ExprKind::Member { object, name } => {
                let object_ty = self.expr(object)?;
                match &object_ty {
                    TypeDesc::Record(record) => match self.oracle.member(record, name) {
                        Some(Member {
                            kind: MemberKind::Field,
                            ty,
                            ..
                        }) => {
                            self.resolve(expr.id, Resolved::Field);
                            Some(ty)
                        }
                        Some(_) => {
                            self.error(
                                TypeErrorKind::NotAField {
                                    ty: object_ty.clone(),
                                    name: name.clone(),
                                },
                                expr.span,
                            );
                            None
                        }
                        None => {
                            self.error(
                                TypeErrorKind::UnknownMember {
                                    ty: object_ty.clone(),
                                    name: name.clone(),
                                },
                                expr.span,
                            );
                            None
                        }
                    },
                    other => {
                        let kind = if Builtin::lookup(other, name).is_some() {
                            TypeErrorKind::NotAField {
                                ty: other.clone(),
                                name: name.clone(),
                            }
                        } else {
                            TypeErrorKind::UnknownMember {
                                ty: other.clone(),
                                name: name.clone(),
                            }
                        };
                        self.error(kind, expr.span);
                        None
                    }
                }
            }

            ExprKind::Call { object, name, args } => {
                let object_ty = self.expr(object);
                let arg_types: Vec<Option<TypeDesc>> = args.iter().map(|a| self.expr(a)).collect();
                let object_ty = object_ty?;

                let (resolution, params, returns) = match &object_ty {
                    TypeDesc::Record(record) => match self.oracle.member(record, name) {
                        Some(Member {
                            kind: MemberKind::Method { params },
                            ty,
                            ..
                        }) => (Resolved::Method, params, ty),
                        Some(_) => {
                            self.error(
                                TypeErrorKind::NotAMethod {
                                    ty: object_ty.clone(),
                                    name: name.clone(),
                                },
                                expr.span,
                            );
                            return None;
                        }
                        None => {
                            self.error(
                                TypeErrorKind::UnknownMember {
                                    ty: object_ty.clone(),
                                    name: name.clone(),
                                },
                                expr.span,
                            );
                            return None;
                        }
                    },
                    other => match Builtin::lookup(other, name) {
                        Some((builtin, params, returns)) => {
                            (Resolved::Builtin(builtin), params, returns)
                        }
                        None => {
                            self.error(
                                TypeErrorKind::UnknownMember {
                                    ty: other.clone(),
                                    name: name.clone(),
                                },
                                expr.span,
                            );
                            return None;
                        }
                    },
                };

                if params.len() != args.len() {
                    self.error(
                        TypeErrorKind::ArgumentCount {
                            name: name.clone(),
                            expected: params.len(),
                            found: args.len(),
                        },
                        expr.span,
                    );
                    return None;
                }
                let mut ok = true;
                for (n, ((expected, found), arg)) in
                    params.iter().zip(&arg_types).zip(args).enumerate()
                {
                    match found {
                        Some(found) if !expected.accepts(found) => {
                            self.error(
                                TypeErrorKind::ArgumentType {
                                    name: format!("{} #{}", name, n + 1),
                                    expected: expected.clone(),
                                    found: found.clone(),
                                },
                                arg.span,
                            );
                            ok = false;
                        }
                        Some(_) => {}
                        None => ok = false,
                    }
                }
                if !ok {
                    return None;
                }
                self.resolve(expr.id, resolution);
                Some(returns)
            }

            ExprKind::Unary { op, operand } => {
                let ty = self.expr(operand)?;
                let result = match (op, &ty) {
                    (UnaryOp::Not, TypeDesc::Bool) => Some(TypeDesc::Bool),
                    (UnaryOp::Neg, TypeDesc::Int | TypeDesc::Float) => Some(ty.clone()),
                    _ => None,
                };
                if result.is_none() {
                    let symbol = match op {
                        UnaryOp::Not => "!",
                        UnaryOp::Neg => "-",
                    };
                    self.error(
                        TypeErrorKind::InvalidOperands {
                            op: symbol,
                            operands: ty.to_string(),
                        },
                        expr.span,
                    );
                }
                result
            }

            ExprKind::Binary { op, lhs, rhs } => {
                let lhs_ty = self.expr(lhs);
                let rhs_ty = self.expr(rhs);
                let (lhs_ty, rhs_ty) = (lhs_ty?, rhs_ty?);
                let result = binary_type(*op, &lhs_ty, &rhs_ty);
                if result.is_none() {
                    self.error(
                        TypeErrorKind::InvalidOperands {
                            op: op.symbol(),
                            operands: format!("{} and {}", lhs_ty, rhs_ty),
                        },
                        expr.span,
                    );
                }
                result
            }
        }
    }
}

fn lit_type(lit: &Lit) -> TypeDesc {
    match lit {
        Lit::Null => TypeDesc::Null,
        Lit::Bool(_) => TypeDesc::Bool,
        Lit::Int(_) => TypeDesc::Int,
        Lit::Float(_) => TypeDesc::Float,
        Lit::Str(_) => TypeDesc::Str,
    }
}

fn binary_type(op: BinaryOp, lhs: &TypeDesc, rhs: &TypeDesc) -> Option<TypeDesc> {
    use TypeDesc::{Bool, Float, Int, Str};

    let numeric = lhs.is_numeric() && rhs.is_numeric();
    match op {
        BinaryOp::And | BinaryOp::Or => (*lhs == Bool && *rhs == Bool).then_some(Bool),
        BinaryOp::Eq | BinaryOp::Ne => lhs.unify(rhs).map(|_| Bool),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            (numeric || (*lhs == Str && *rhs == Str)).then_some(Bool)
        }
        BinaryOp::Add if *lhs == Str && *rhs == Str => Some(Str),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            if !numeric {
                None
            } else if *lhs == Int && *rhs == Int {
                Some(Int)
            } else {
                Some(Float)
            }
        }
    }
}

/// Evaluates a literal default expression: literals, lists of literals and
/// negated numbers.
pub(crate) fn const_of(expr: &Expr) -> Option<Const> {
    match &expr.kind {
        ExprKind::Lit(lit) => Some(lit_const(lit)),
        ExprKind::List(items) => items.iter().map(const_of).collect::<Option<Vec<_>>>().map(Const::List),
        ExprKind::Unary {
            op: UnaryOp::Neg,
            operand,
        } => match &operand.kind {
            ExprKind::Lit(Lit::Int(n)) => n.checked_neg().map(Const::Int),
            ExprKind::Lit(Lit::Float(n)) => Some(Const::Float(-n)),
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn lit_const(lit: &Lit) -> Const {
    match lit {
        Lit::Null => Const::Null,
        Lit::Bool(b) => Const::Bool(*b),
        Lit::Int(n) => Const::Int(*n),
        Lit::Float(n) => Const::Float(*n),
        Lit::Str(s) => Const::Str(s.as_str().into()),
    }
}

fn const_type(constant: &Const) -> Option<TypeDesc> {
    match constant {
        Const::Null => Some(TypeDesc::Null),
        Const::Bool(_) => Some(TypeDesc::Bool),
        Const::Int(_) => Some(TypeDesc::Int),
        Const::Float(_) => Some(TypeDesc::Float),
        Const::Str(_) => Some(TypeDesc::Str),
        Const::List(items) => items
            .iter()
            .try_fold(TypeDesc::Null, |acc, item| acc.unify(&const_type(item)?))
            .map(TypeDesc::list),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{RecordType, TypeRegistry};
    use kiln_syntax::ParseOptions;

    fn template(source: &str) -> Template {
        Template::parse("test", source, &ParseOptions::default()).unwrap()
    }

    fn oracle() -> TypeRegistry {
        TypeRegistry::new().with(
            RecordType::new("User")
                .field("name", TypeDesc::Str)
                .field("age", TypeDesc::Int)
                .field("friends", TypeDesc::list(TypeDesc::record("User")))
                .method("greet", [TypeDesc::Str], TypeDesc::Str),
        )
    }

    fn errors(source: &str) -> Vec<TypeErrorKind> {
        let tpl = template(source);
        match bind(&tpl, &oracle(), &NoIncludes) {
            Ok(_) => vec![],
            Err(errs) => errs.kinds().cloned().collect(),
        }
    }

    #[test]
    fn test_valid_template_binds() {
        let src = "@param User user\n@param int n = 2\n\
                   ${user.name.upper()} ${user.greet(\"hi\")} ${n * 2 + 1}\
                   @for(f, i in user.friends)${i}${f.age}@end";
        let tpl = template(src);
        let bound = bind(&tpl, &oracle(), &NoIncludes).unwrap();
        assert_eq!(bound.schema().len(), 2);
        assert_eq!(bound.schema().get("n").unwrap().1.default, Some(Const::Int(2)));
        assert_eq!(bound.frame_size(), 4);
    }

    #[test]
    fn test_sibling_loops_share_slots() {
        let tpl = template("@param list<int> xs\n@for(a in xs)${a}@end@for(b in xs)${b}@end");
        let bound = bind(&tpl, &oracle(), &NoIncludes).unwrap();
        assert_eq!(bound.frame_size(), 2);
    }

    #[test]
    fn test_inner_binding_shadows_param() {
        let tpl = template("@param string x\n@param list<int> xs\n@for(x in xs)${x + 1}@end");
        assert!(bind(&tpl, &oracle(), &NoIncludes).is_ok());
    }

    #[test]
    fn test_errors_are_collected() {
        let kinds = errors("@param User u\n${nope} @if(u.age) x @end @for(c in u.name) @end ${u.friends}");
        assert_eq!(
            kinds,
            vec![
                TypeErrorKind::UnresolvedIdentifier {
                    name: "nope".to_string()
                },
                TypeErrorKind::NonBooleanCondition {
                    found: TypeDesc::Int
                },
                TypeErrorKind::NotIterable {
                    found: TypeDesc::Str
                },
                TypeErrorKind::NotRenderable {
                    found: TypeDesc::list(TypeDesc::record("User"))
                },
            ]
        );
    }

    #[test]
    fn test_member_errors() {
        assert_eq!(
            errors("@param User u\n${u.email}"),
            vec![TypeErrorKind::UnknownMember {
                ty: TypeDesc::record("User"),
                name: "email".to_string()
            }]
        );
        assert_eq!(
            errors("@param User u\n${u.greet}"),
            vec![TypeErrorKind::NotAField {
                ty: TypeDesc::record("User"),
                name: "greet".to_string()
            }]
        );
        assert_eq!(
            errors("@param User u\n${u.name()}"),
            vec![TypeErrorKind::NotAMethod {
                ty: TypeDesc::record("User"),
                name: "name".to_string()
            }]
        );
        assert_eq!(
            errors("@param User u\n${u.greet()}"),
            vec![TypeErrorKind::ArgumentCount {
                name: "greet".to_string(),
                expected: 1,
                found: 0
            }]
        );
        assert_eq!(
            errors("@param User u\n${u.greet(3)}"),
            vec![TypeErrorKind::ArgumentType {
                name: "greet #1".to_string(),
                expected: TypeDesc::Str,
                found: TypeDesc::Int
            }]
        );
    }

    #[test]
    fn test_header_errors() {
        assert_eq!(
            errors("@param Ghost g\n@param int a\n@param int a\n"),
            vec![
                TypeErrorKind::UnknownType {
                    name: "Ghost".to_string()
                },
                TypeErrorKind::DuplicateParameter {
                    name: "a".to_string()
                },
            ]
        );
        assert_eq!(
            errors("@param int a = \"x\"\n"),
            vec![TypeErrorKind::InvalidDefault {
                name: "a".to_string(),
                expected: TypeDesc::Int
            }]
        );
    }

    #[test]
    fn test_unknown_type_does_not_cascade() {
        assert_eq!(errors("@param Ghost g\n${g.name}").len(), 1);
    }

    #[test]
    fn test_operator_rules() {
        assert!(errors("${1 + 2.5} ${\"a\" + \"b\"} ${1 < 2 && !false} ${null == 1}").is_empty());
        assert_eq!(
            errors("${1 + \"a\"}"),
            vec![TypeErrorKind::InvalidOperands {
                op: "+",
                operands: "int and string".to_string()
            }]
        );
        assert_eq!(
            errors("${[1, \"a\"].len()}"),
            vec![TypeErrorKind::MixedList {
                first: TypeDesc::Int,
                other: TypeDesc::Str
            }]
        );
    }

    #[test]
    fn test_error_locations() {
        let tpl = template("@param int n\nline\n  ${m}");
        let errs = bind(&tpl, &oracle(), &NoIncludes).unwrap_err();
        let loc = errs.iter().next().unwrap().location;
        assert_eq!((loc.line, loc.column), (3, 5));
    }

    #[test]
    fn test_include_argument_plan() {
        let mut schemas = HashMap::new();
        schemas.insert(
            "card".to_string(),
            ParameterSchema::new()
                .with("title", TypeDesc::Str)
                .with_default("size", TypeDesc::Int, Const::Int(1))
                .with("body", TypeDesc::Str),
        );
        let tpl = template("@template.card(\"t\", body = \"b\")");
        let bound = bind(&tpl, &oracle(), &schemas).unwrap();
        let Node::Include(inc) = &tpl.ast().body[0] else {
            panic!("expected include");
        };
        assert_eq!(
            bound.include_plan(inc.id),
            Some(&IncludePlan {
                args: vec![Some(0), None, Some(1)]
            })
        );
    }

    #[test]
    fn test_include_errors() {
        let mut schemas = HashMap::new();
        schemas.insert(
            "card".to_string(),
            ParameterSchema::new().with("title", TypeDesc::Str),
        );
        let kinds = |src: &str| -> Vec<TypeErrorKind> {
            let tpl = template(src);
            bind(&tpl, &oracle(), &schemas)
                .err()
                .map(|e| e.kinds().cloned().collect())
                .unwrap_or_default()
        };
        assert_eq!(
            kinds("@template.nope()"),
            vec![TypeErrorKind::UnknownTemplate {
                name: "nope".to_string()
            }]
        );
        assert_eq!(
            kinds("@template.card()"),
            vec![TypeErrorKind::MissingArgument {
                template: "card".to_string(),
                name: "title".to_string()
            }]
        );
        assert_eq!(
            kinds("@template.card(\"a\", \"b\")"),
            vec![TypeErrorKind::TooManyArguments {
                template: "card".to_string(),
                expected: 1,
                found: 2
            }]
        );
        assert_eq!(
            kinds("@template.card(\"a\", title = \"b\")"),
            vec![TypeErrorKind::DuplicateArgument {
                name: "title".to_string()
            }]
        );
        assert_eq!(
            kinds("@template.card(subtitle = \"b\", title = \"a\")"),
            vec![TypeErrorKind::UnknownArgument {
                template: "card".to_string(),
                name: "subtitle".to_string()
            }]
        );
        assert_eq!(
            kinds("@template.card(title = 1)"),
            vec![TypeErrorKind::ArgumentType {
                name: "title".to_string(),
                expected: TypeDesc::Str,
                found: TypeDesc::Int
            }]
        );
        assert_eq!(
            kinds("@template.card(title = \"a\", \"b\")"),
            vec![TypeErrorKind::PositionalAfterNamed]
        );
    }
}
