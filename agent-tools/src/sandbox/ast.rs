//! Lowering of tool source into the interpreter's syntax tree.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::{Number, Value};
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{Expr as SynExpr, Token};

use super::ops::BUILTIN_METHODS;
use crate::compiler::SyntaxError;

type Lowered<T> = Result<T, SyntaxError>;

/// Parsed tool source: its entry point plus every function it defines.
#[derive(Debug)]
pub(crate) struct Program {
    entry: Arc<Function>,
    functions: HashMap<String, Arc<Function>>,
}

impl Program {
    /// Parses `source`, requiring an entry function called `entry`.
    pub(crate) fn parse(entry: &str, source: &str) -> Lowered<Self> {
        let functions = parse_functions(source)?;
        let Some(main) = functions.get(entry).cloned() else {
            return Err(SyntaxError::general(format!(
                "tool source must define `fn {entry}`"
            )));
        };
        Ok(Self {
            entry: main,
            functions,
        })
    }

    pub(crate) fn entry(&self) -> &Arc<Function> {
        &self.entry
    }

    pub(crate) fn function(&self, name: &str) -> Option<&Arc<Function>> {
        self.functions.get(name)
    }
}

/// Function definition with its parameter names.
#[derive(Debug)]
pub(crate) struct Function {
    pub(crate) name: String,
    pub(crate) params: Vec<String>,
    pub(crate) body: Block,
}

/// Statements followed by an optional value-producing tail expression.
#[derive(Debug)]
pub(crate) struct Block {
    pub(crate) stmts: Vec<Stmt>,
    pub(crate) tail: Option<Box<Expr>>,
}

#[derive(Debug)]
pub(crate) enum Stmt {
    Let { name: String, init: Option<Expr> },
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub(crate) fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CastTarget {
    Int,
    Float,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Member {
    Name(String),
    Position(usize),
}

/// Assignable location.
#[derive(Debug)]
pub(crate) enum Place {
    Var(String),
    Index { base: Box<Place>, index: Box<Expr> },
    Field { base: Box<Place>, member: Member },
}

#[derive(Debug)]
pub(crate) enum FormatPiece {
    Text(String),
    Arg { index: usize, debug: bool },
}

#[derive(Debug)]
pub(crate) enum Expr {
    Lit(Value),
    Var(String),
    Array(Vec<Expr>),
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Field {
        base: Box<Expr>,
        member: Member,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        place: Place,
        value: Box<Expr>,
    },
    CompoundAssign {
        place: Place,
        op: BinaryOp,
        value: Box<Expr>,
    },
    Push {
        place: Place,
        value: Box<Expr>,
    },
    If {
        cond: Box<Expr>,
        then: Block,
        otherwise: Option<Box<Expr>>,
    },
    While {
        cond: Box<Expr>,
        body: Block,
    },
    Loop {
        body: Block,
    },
    For {
        binding: String,
        iter: Box<Expr>,
        body: Block,
    },
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
        inclusive: bool,
    },
    Break,
    Continue,
    Return(Option<Box<Expr>>),
    Block(Block),
    Cast {
        operand: Box<Expr>,
        target: CastTarget,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Method {
        receiver: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    Format {
        pieces: Vec<FormatPiece>,
        args: Vec<Expr>,
    },
}

/// Parses every `fn` item in `source`.
pub(crate) fn parse_functions(source: &str) -> Lowered<HashMap<String, Arc<Function>>> {
    let file = syn::parse_file(source)?;
    let mut functions = HashMap::new();

    for item in &file.items {
        let syn::Item::Fn(item) = item else {
            return Err(SyntaxError::at(
                "only `fn` items are supported",
                item.span(),
            ));
        };
        let function = lower_fn(item)?;
        let name = function.name.clone();
        if functions.insert(name.clone(), Arc::new(function)).is_some() {
            return Err(SyntaxError::at(
                format!("function `{name}` is defined more than once"),
                item.sig.ident.span(),
            ));
        }
    }

    Ok(functions)
}

/// Collects the names of functions called anywhere in `function`.
pub(crate) fn collect_calls(function: &Function, calls: &mut BTreeSet<String>) {
    walk_block(&function.body, calls);
}

fn walk_block(block: &Block, calls: &mut BTreeSet<String>) {
    for stmt in &block.stmts {
        match stmt {
            Stmt::Let { init, .. } => {
                if let Some(init) = init {
                    walk_expr(init, calls);
                }
            }
            Stmt::Expr(expr) => walk_expr(expr, calls),
        }
    }
    if let Some(tail) = &block.tail {
        walk_expr(tail, calls);
    }
}

fn walk_place(place: &Place, calls: &mut BTreeSet<String>) {
    match place {
        Place::Var(_) => {}
        Place::Index { base, index } => {
            walk_place(base, calls);
            walk_expr(index, calls);
        }
        Place::Field { base, .. } => walk_place(base, calls),
    }
}

fn walk_expr(expr: &Expr, calls: &mut BTreeSet<String>) {
    match expr {
        Expr::Lit(_) | Expr::Var(_) | Expr::Break | Expr::Continue => {}
        Expr::Array(items) | Expr::Format { args: items, .. } => {
            items.iter().for_each(|item| walk_expr(item, calls));
        }
        Expr::Index { base, index } => {
            walk_expr(base, calls);
            walk_expr(index, calls);
        }
        Expr::Field { base, .. } => walk_expr(base, calls),
        Expr::Unary { operand, .. } | Expr::Cast { operand, .. } => walk_expr(operand, calls),
        Expr::Binary { lhs, rhs, .. } => {
            walk_expr(lhs, calls);
            walk_expr(rhs, calls);
        }
        Expr::Assign { place, value }
        | Expr::CompoundAssign { place, value, .. }
        | Expr::Push { place, value } => {
            walk_place(place, calls);
            walk_expr(value, calls);
        }
        Expr::If {
            cond,
            then,
            otherwise,
        } => {
            walk_expr(cond, calls);
            walk_block(then, calls);
            if let Some(otherwise) = otherwise {
                walk_expr(otherwise, calls);
            }
        }
        Expr::While { cond, body } => {
            walk_expr(cond, calls);
            walk_block(body, calls);
        }
        Expr::Loop { body } | Expr::Block(body) => walk_block(body, calls),
        Expr::For { iter, body, .. } => {
            walk_expr(iter, calls);
            walk_block(body, calls);
        }
        Expr::Range { start, end, .. } => {
            walk_expr(start, calls);
            walk_expr(end, calls);
        }
        Expr::Return(value) => {
            if let Some(value) = value {
                walk_expr(value, calls);
            }
        }
        Expr::Call { name, args } => {
            calls.insert(name.clone());
            args.iter().for_each(|arg| walk_expr(arg, calls));
        }
        Expr::Method { receiver, args, .. } => {
            walk_expr(receiver, calls);
            args.iter().for_each(|arg| walk_expr(arg, calls));
        }
    }
}

fn lower_fn(item: &syn::ItemFn) -> Lowered<Function> {
    let mut params = Vec::with_capacity(item.sig.inputs.len());
    for input in &item.sig.inputs {
        match input {
            syn::FnArg::Typed(arg) => params.push(binding_name(&arg.pat)?),
            syn::FnArg::Receiver(receiver) => {
                return Err(SyntaxError::at(
                    "functions taking `self` are not supported",
                    receiver.span(),
                ));
            }
        }
    }

    Ok(Function {
        name: item.sig.ident.to_string(),
        params,
        body: lower_block(&item.block)?,
    })
}

fn binding_name(pat: &syn::Pat) -> Lowered<String> {
    match pat {
        syn::Pat::Ident(pat) if pat.subpat.is_none() => Ok(pat.ident.to_string()),
        syn::Pat::Type(pat) => binding_name(&pat.pat),
        syn::Pat::Reference(pat) => binding_name(&pat.pat),
        syn::Pat::Wild(_) => Ok("_".to_owned()),
        other => Err(SyntaxError::at(
            "only plain variable bindings are supported",
            other.span(),
        )),
    }
}

fn lower_block(block: &syn::Block) -> Lowered<Block> {
    let mut lowered = Block {
        stmts: Vec::with_capacity(block.stmts.len()),
        tail: None,
    };
    let last = block.stmts.len().saturating_sub(1);

    for (position, stmt) in block.stmts.iter().enumerate() {
        let (expr, open) = match stmt {
            syn::Stmt::Local(local) => {
                if let Some(init) = &local.init {
                    if let Some((_, diverge)) = &init.diverge {
                        return Err(SyntaxError::at(
                            "`let ... else` is not supported",
                            diverge.span(),
                        ));
                    }
                }
                let init = match &local.init {
                    Some(init) => Some(lower_expr(&init.expr)?),
                    None => None,
                };
                lowered.stmts.push(Stmt::Let {
                    name: binding_name(&local.pat)?,
                    init,
                });
                continue;
            }
            syn::Stmt::Expr(expr, semi) => (lower_expr(expr)?, semi.is_none()),
            syn::Stmt::Macro(stmt) => (lower_macro(&stmt.mac)?, stmt.semi_token.is_none()),
            syn::Stmt::Item(item) => {
                return Err(SyntaxError::at(
                    "nested items are not supported",
                    item.span(),
                ));
            }
        };

        if open && position == last {
            lowered.tail = Some(Box::new(expr));
        } else {
            lowered.stmts.push(Stmt::Expr(expr));
        }
    }

    Ok(lowered)
}

fn boxed(expr: &SynExpr) -> Lowered<Box<Expr>> {
    lower_expr(expr).map(Box::new)
}

fn lower_all<'a, I>(exprs: I) -> Lowered<Vec<Expr>>
where
    I: IntoIterator<Item = &'a SynExpr>,
{
    exprs.into_iter().map(lower_expr).collect()
}

fn unsupported(expr: &SynExpr) -> SyntaxError {
    SyntaxError::at("unsupported expression", expr.span())
}

fn lower_expr(expr: &SynExpr) -> Lowered<Expr> {
    Ok(match expr {
        SynExpr::Lit(lit) => Expr::Lit(lower_lit(&lit.lit)?),
        SynExpr::Path(path) => Expr::Var(path_ident(path)?),
        SynExpr::Paren(inner) => lower_expr(&inner.expr)?,
        SynExpr::Group(inner) => lower_expr(&inner.expr)?,
        SynExpr::Reference(inner) => lower_expr(&inner.expr)?,
        SynExpr::Tuple(tuple) if tuple.elems.is_empty() => Expr::Lit(Value::Null),
        SynExpr::Array(array) => Expr::Array(lower_all(&array.elems)?),
        SynExpr::Index(index) => Expr::Index {
            base: boxed(&index.expr)?,
            index: boxed(&index.index)?,
        },
        SynExpr::Field(field) => Expr::Field {
            base: boxed(&field.base)?,
            member: lower_member(&field.member),
        },
        SynExpr::Unary(unary) => {
            let op = match unary.op {
                syn::UnOp::Not(_) => UnaryOp::Not,
                syn::UnOp::Neg(_) => UnaryOp::Neg,
                syn::UnOp::Deref(_) => return lower_expr(&unary.expr),
                _ => return Err(unsupported(expr)),
            };
            Expr::Unary {
                op,
                operand: boxed(&unary.expr)?,
            }
        }
        SynExpr::Binary(binary) => lower_binary(binary)?,
        SynExpr::Assign(assign) => Expr::Assign {
            place: lower_place(&assign.left)?,
            value: boxed(&assign.right)?,
        },
        SynExpr::If(branch) => lower_if(branch)?,
        SynExpr::While(looped) => {
            reject_label(looped.label.as_ref())?;
            Expr::While {
                cond: boxed(&looped.cond)?,
                body: lower_block(&looped.body)?,
            }
        }
        SynExpr::Loop(looped) => {
            reject_label(looped.label.as_ref())?;
            Expr::Loop {
                body: lower_block(&looped.body)?,
            }
        }
        SynExpr::ForLoop(looped) => {
            reject_label(looped.label.as_ref())?;
            Expr::For {
                binding: binding_name(&looped.pat)?,
                iter: boxed(&looped.expr)?,
                body: lower_block(&looped.body)?,
            }
        }
        SynExpr::Range(range) => {
            let (Some(start), Some(end)) = (&range.start, &range.end) else {
                return Err(SyntaxError::at(
                    "ranges must have both bounds",
                    range.span(),
                ));
            };
            Expr::Range {
                start: boxed(start)?,
                end: boxed(end)?,
                inclusive: matches!(range.limits, syn::RangeLimits::Closed(_)),
            }
        }
        SynExpr::Break(stop) => {
            if stop.label.is_some() || stop.expr.is_some() {
                return Err(SyntaxError::at(
                    "`break` with a label or value is not supported",
                    stop.span(),
                ));
            }
            Expr::Break
        }
        SynExpr::Continue(skip) => {
            if skip.label.is_some() {
                return Err(SyntaxError::at(
                    "labelled `continue` is not supported",
                    skip.span(),
                ));
            }
            Expr::Continue
        }
        SynExpr::Return(ret) => Expr::Return(match &ret.expr {
            Some(value) => Some(boxed(value)?),
            None => None,
        }),
        SynExpr::Block(block) => {
            reject_label(block.label.as_ref())?;
            Expr::Block(lower_block(&block.block)?)
        }
        SynExpr::Cast(cast) => Expr::Cast {
            operand: boxed(&cast.expr)?,
            target: cast_target(&cast.ty)?,
        },
        SynExpr::Call(call) => Expr::Call {
            name: callee_name(&call.func)?,
            args: lower_all(&call.args)?,
        },
        SynExpr::MethodCall(call) => lower_method(call)?,
        SynExpr::Macro(mac) => lower_macro(&mac.mac)?,
        other => return Err(unsupported(other)),
    })
}

fn reject_label(label: Option<&syn::Label>) -> Lowered<()> {
    match label {
        Some(label) => Err(SyntaxError::at(
            "labels are not supported",
            label.span(),
        )),
        None => Ok(()),
    }
}

fn lower_lit(lit: &syn::Lit) -> Lowered<Value> {
    Ok(match lit {
        syn::Lit::Str(text) => Value::String(text.value()),
        syn::Lit::Char(ch) => Value::String(ch.value().to_string()),
        syn::Lit::Bool(flag) => Value::Bool(flag.value),
        syn::Lit::Int(int) => Value::from(int.base10_parse::<i64>()?),
        syn::Lit::Float(float) => {
            let parsed = float.base10_parse::<f64>()?;
            Number::from_f64(parsed)
                .map(Value::Number)
                .ok_or_else(|| SyntaxError::at("float literal is not finite", float.span()))?
        }
        other => {
            return Err(SyntaxError::at(
                "unsupported literal",
                other.span(),
            ));
        }
    })
}

fn lower_member(member: &syn::Member) -> Member {
    match member {
        syn::Member::Named(ident) => Member::Name(ident.to_string()),
        syn::Member::Unnamed(index) => Member::Position(index.index as usize),
    }
}

fn path_ident(path: &syn::ExprPath) -> Lowered<String> {
    match (&path.qself, path.path.get_ident()) {
        (None, Some(ident)) => Ok(ident.to_string()),
        _ => Err(SyntaxError::at(
            "qualified paths are not supported",
            path.span(),
        )),
    }
}

fn callee_name(func: &SynExpr) -> Lowered<String> {
    match func {
        SynExpr::Path(path) => path_ident(path),
        other => Err(SyntaxError::at(
            "only calls to named functions are supported",
            other.span(),
        )),
    }
}

fn cast_target(ty: &syn::Type) -> Lowered<CastTarget> {
    if let syn::Type::Path(path) = ty {
        if let Some(ident) = path.path.get_ident() {
            match ident.to_string().as_str() {
                "i8" | "i16" | "i32" | "i64" | "i128" | "isize" | "u8" | "u16" | "u32" | "u64"
                | "u128" | "usize" => return Ok(CastTarget::Int),
                "f32" | "f64" => return Ok(CastTarget::Float),
                _ => {}
            }
        }
    }
    Err(SyntaxError::at(
        "only numeric casts are supported",
        ty.span(),
    ))
}

fn lower_binary(binary: &syn::ExprBinary) -> Lowered<Expr> {
    use syn::BinOp as B;

    let compound = |op: BinaryOp| -> Lowered<Expr> {
        Ok(Expr::CompoundAssign {
            place: lower_place(&binary.left)?,
            op,
            value: boxed(&binary.right)?,
        })
    };

    let op = match binary.op {
        B::Add(_) => BinaryOp::Add,
        B::Sub(_) => BinaryOp::Sub,
        B::Mul(_) => BinaryOp::Mul,
        B::Div(_) => BinaryOp::Div,
        B::Rem(_) => BinaryOp::Rem,
        B::Eq(_) => BinaryOp::Eq,
        B::Ne(_) => BinaryOp::Ne,
        B::Lt(_) => BinaryOp::Lt,
        B::Le(_) => BinaryOp::Le,
        B::Gt(_) => BinaryOp::Gt,
        B::Ge(_) => BinaryOp::Ge,
        B::And(_) => BinaryOp::And,
        B::Or(_) => BinaryOp::Or,
        B::AddAssign(_) => return compound(BinaryOp::Add),
        B::SubAssign(_) => return compound(BinaryOp::Sub),
        B::MulAssign(_) => return compound(BinaryOp::Mul),
        B::DivAssign(_) => return compound(BinaryOp::Div),
        B::RemAssign(_) => return compound(BinaryOp::Rem),
        _ => {
            return Err(SyntaxError::at(
                "bitwise operators are not supported",
                binary.op.span(),
            ));
        }
    };

    Ok(Expr::Binary {
        op,
        lhs: boxed(&binary.left)?,
        rhs: boxed(&binary.right)?,
    })
}

fn lower_place(expr: &SynExpr) -> Lowered<Place> {
    match expr {
        SynExpr::Path(path) => Ok(Place::Var(path_ident(path)?)),
        SynExpr::Paren(inner) => lower_place(&inner.expr),
        SynExpr::Unary(unary) if matches!(unary.op, syn::UnOp::Deref(_)) => {
            lower_place(&unary.expr)
        }
        SynExpr::Index(index) => Ok(Place::Index {
            base: Box::new(lower_place(&index.expr)?),
            index: boxed(&index.index)?,
        }),
        SynExpr::Field(field) => Ok(Place::Field {
            base: Box::new(lower_place(&field.base)?),
            member: lower_member(&field.member),
        }),
        other => Err(SyntaxError::at(
            "cannot assign to this expression",
            other.span(),
        )),
    }
}

fn lower_if(branch: &syn::ExprIf) -> Lowered<Expr> {
    if let SynExpr::Let(binding) = &*branch.cond {
        return Err(SyntaxError::at(
            "`if let` is not supported",
            binding.span(),
        ));
    }

    let otherwise = match &branch.else_branch {
        Some((_, otherwise)) => Some(boxed(otherwise)?),
        None => None,
    };

    Ok(Expr::If {
        cond: boxed(&branch.cond)?,
        then: lower_block(&branch.then_branch)?,
        otherwise,
    })
}

fn lower_method(call: &syn::ExprMethodCall) -> Lowered<Expr> {
    let method = call.method.to_string();

    if method == "push" {
        let mut args = call.args.iter();
        let (Some(value), None) = (args.next(), args.next()) else {
            return Err(SyntaxError::at(
                "`push` takes exactly one argument",
                call.method.span(),
            ));
        };
        return Ok(Expr::Push {
            place: lower_place(&call.receiver)?,
            value: boxed(value)?,
        });
    }

    if !BUILTIN_METHODS.contains(&method.as_str()) {
        return Err(SyntaxError::at(
            format!("unknown method `{method}`"),
            call.method.span(),
        ));
    }

    Ok(Expr::Method {
        receiver: boxed(&call.receiver)?,
        method,
        args: lower_all(&call.args)?,
    })
}

fn lower_macro(mac: &syn::Macro) -> Lowered<Expr> {
    let name = mac
        .path
        .get_ident()
        .map(ToString::to_string)
        .unwrap_or_default();
    let args = || mac.parse_body_with(Punctuated::<SynExpr, Token![,]>::parse_terminated);

    match name.as_str() {
        "vec" => Ok(Expr::Array(lower_all(&args()?)?)),
        "format" => lower_format(mac, &args()?),
        _ => Err(SyntaxError::at(
            format!("macro `{name}!` is not supported"),
            mac.path.span(),
        )),
    }
}

enum Hole {
    Next,
    Index(usize),
    Name(String),
}

enum TemplatePiece {
    Text(String),
    Hole { hole: Hole, debug: bool },
}

fn lower_format(mac: &syn::Macro, args: &Punctuated<SynExpr, Token![,]>) -> Lowered<Expr> {
    let mut args = args.iter();
    let template = match args.next() {
        Some(SynExpr::Lit(syn::ExprLit {
            lit: syn::Lit::Str(template),
            ..
        })) => template,
        Some(other) => {
            return Err(SyntaxError::at(
                "`format!` template must be a string literal",
                other.span(),
            ));
        }
        None => {
            return Err(SyntaxError::at(
                "`format!` requires a template",
                mac.path.span(),
            ));
        }
    };

    let mut values = Vec::new();
    let mut named = Vec::new();
    for arg in args {
        if let SynExpr::Assign(assign) = arg {
            if let SynExpr::Path(path) = &*assign.left {
                named.push((path_ident(path)?, lower_expr(&assign.right)?));
                continue;
            }
        }
        values.push(lower_expr(arg)?);
    }

    let positional = values.len();
    let mut names: Vec<String> = Vec::with_capacity(named.len());
    for (name, value) in named {
        values.push(value);
        names.push(name);
    }

    let template_pieces = parse_template(&template.value())
        .map_err(|message| SyntaxError::at(message, template.span()))?;
    let positional_arg = |index: usize| -> Lowered<usize> {
        if index < positional {
            Ok(index)
        } else {
            Err(SyntaxError::at(
                "format string references a missing argument",
                template.span(),
            ))
        }
    };

    let mut next = 0;
    let mut pieces = Vec::with_capacity(template_pieces.len());
    for piece in template_pieces {
        let (hole, debug) = match piece {
            TemplatePiece::Text(text) => {
                pieces.push(FormatPiece::Text(text));
                continue;
            }
            TemplatePiece::Hole { hole, debug } => (hole, debug),
        };

        let index = match hole {
            Hole::Next => {
                next += 1;
                positional_arg(next - 1)?
            }
            Hole::Index(index) => positional_arg(index)?,
            Hole::Name(name) => match names.iter().position(|known| *known == name) {
                Some(found) => positional + found,
                None => {
                    values.push(Expr::Var(name.clone()));
                    names.push(name);
                    values.len() - 1
                }
            },
        };
        pieces.push(FormatPiece::Arg { index, debug });
    }

    Ok(Expr::Format {
        pieces,
        args: values,
    })
}

fn parse_template(template: &str) -> Result<Vec<TemplatePiece>, String> {
    let mut pieces = Vec::new();
    let mut text = String::new();
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                text.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                text.push('}');
            }
            '{' => {
                let mut spec = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(inner) => spec.push(inner),
                        None => return Err("unterminated `{` in format string".to_owned()),
                    }
                }
                if !text.is_empty() {
                    pieces.push(TemplatePiece::Text(std::mem::take(&mut text)));
                }

                let (arg, format) = spec.split_once(':').unwrap_or((spec.as_str(), ""));
                let debug = match format {
                    "" => false,
                    "?" => true,
                    other => return Err(format!("unsupported format spec `{other}`")),
                };
                let arg = arg.trim();
                let hole = if arg.is_empty() {
                    Hole::Next
                } else if let Ok(index) = arg.parse::<usize>() {
                    Hole::Index(index)
                } else {
                    Hole::Name(arg.to_owned())
                };
                pieces.push(TemplatePiece::Hole { hole, debug });
            }
            '}' => return Err("unmatched `}` in format string".to_owned()),
            other => text.push(other),
        }
    }

    if !text.is_empty() {
        pieces.push(TemplatePiece::Text(text));
    }
    Ok(pieces)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calls_of(source: &str, entry: &str) -> BTreeSet<String> {
        let program = Program::parse(entry, source).unwrap();
        let mut calls = BTreeSet::new();
        collect_calls(program.entry(), &mut calls);
        calls
    }

    #[test]
    fn parses_entry_and_helpers() {
        let program = Program::parse(
            "greet",
            "fn helper(x: i64) -> i64 { x + 1 }\nfn greet(name: String) -> String { format!(\"hi {}\", name) }",
        )
        .unwrap();
        assert_eq!(program.entry().params, vec!["name".to_owned()]);
        assert!(program.function("helper").is_some());
    }

    #[test]
    fn missing_entry_is_rejected() {
        let err = Program::parse("greet", "fn other() {}").unwrap_err();
        assert!(err.message.contains("fn greet"));
    }

    #[test]
    fn unsupported_constructs_report_position() {
        let err = Program::parse("f", "fn f() {\n    let x = |y| y;\n}").unwrap_err();
        assert_eq!(err.line, 2);

        let err = Program::parse("f", "struct S;\nfn f() {}").unwrap_err();
        assert!(err.message.contains("only `fn` items"));

        let err = Program::parse("f", "fn f(x: i64) { x.frobnicate() }").unwrap_err();
        assert!(err.message.contains("frobnicate"));
    }

    #[test]
    fn duplicate_functions_are_rejected() {
        let err = Program::parse("f", "fn f() {}\nfn f() {}").unwrap_err();
        assert!(err.message.contains("more than once"));
    }

    #[test]
    fn calls_inside_macros_are_collected() {
        let calls = calls_of(
            "fn report(x: i64) -> String { let parts = vec![double(x)]; format!(\"{} {}\", parts.len(), square(x)) }",
            "report",
        );
        assert_eq!(
            calls,
            BTreeSet::from(["double".to_owned(), "square".to_owned()])
        );
    }

    #[test]
    fn format_resolves_named_and_captured_arguments() {
        let program = Program::parse(
            "f",
            "fn f(who: String) -> String { format!(\"{greeting}, {who}! {0}\", 1, greeting = \"hi\") }",
        )
        .unwrap();
        let Some(Expr::Format { pieces, args }) = program.entry().body.tail.as_deref() else {
            panic!("expected format tail");
        };
        assert_eq!(args.len(), 3);
        assert!(matches!(pieces[0], FormatPiece::Arg { index: 1, .. }));
        assert!(matches!(pieces[2], FormatPiece::Arg { index: 2, .. }));
    }

    #[test]
    fn format_rejects_missing_positional() {
        let err = Program::parse("f", "fn f() -> String { format!(\"{} {}\", 1) }").unwrap_err();
        assert!(err.message.contains("missing argument"));
    }
}
