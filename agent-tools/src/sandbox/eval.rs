//! Tree-walking evaluation of lowered tool source.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::Namespace;
use super::SandboxLimits;
use super::ast::{BinaryOp, Block, Expr, FormatPiece, Function, Member, Place, Program, Stmt};
use super::ops;
use crate::registry::{ToolError, ToolResult};

/// Non-local control flow raised while evaluating.
enum Flow {
    Break,
    Continue,
    Return(Value),
    Fault(ToolError),
}

impl From<ToolError> for Flow {
    fn from(err: ToolError) -> Self {
        Self::Fault(err)
    }
}

type Eval<T> = Result<T, Flow>;

fn fault(reason: impl Into<String>) -> Flow {
    Flow::Fault(ToolError::execution(reason))
}

/// Variables visible inside one function activation.
struct Frame<'p> {
    program: &'p Program,
    scopes: Vec<HashMap<String, Value>>,
}

impl<'p> Frame<'p> {
    fn new(program: &'p Program, bindings: HashMap<String, Value>) -> Self {
        Self {
            program,
            scopes: vec![bindings],
        }
    }

    fn define(&mut self, name: &str, value: Value) {
        if name == "_" {
            return;
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_owned(), value);
        }
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn lookup_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.get_mut(name))
    }
}

/// Step into a place: a field name or an evaluated index.
enum Segment {
    Member(Member),
    Key(Value),
}

/// Evaluator for a single tool invocation.
pub(crate) struct Interpreter<'n> {
    namespace: &'n Namespace,
    limits: SandboxLimits,
    steps: u64,
    depth: usize,
}

impl<'n> Interpreter<'n> {
    pub(crate) fn new(namespace: &'n Namespace, limits: SandboxLimits) -> Self {
        Self {
            namespace,
            limits,
            steps: 0,
            depth: 0,
        }
    }

    /// Evaluation steps consumed so far.
    pub(crate) fn steps(&self) -> u64 {
        self.steps
    }

    /// Calls `function` defined in `program` with positional arguments.
    pub(crate) fn call(
        &mut self,
        program: &Program,
        function: &Function,
        args: Vec<Value>,
    ) -> ToolResult<Value> {
        if self.depth >= self.limits.max_call_depth {
            return Err(ToolError::limit(format!(
                "call depth exceeded {}",
                self.limits.max_call_depth
            )));
        }
        if args.len() != function.params.len() {
            return Err(ToolError::execution(format!(
                "`{}` takes {} argument(s), got {}",
                function.name,
                function.params.len(),
                args.len()
            )));
        }

        let bindings = function.params.iter().cloned().zip(args).collect();
        let mut frame = Frame::new(program, bindings);

        self.depth += 1;
        let result = self.eval_block(&mut frame, &function.body);
        self.depth -= 1;

        match result {
            Ok(value) | Err(Flow::Return(value)) => Ok(value),
            Err(Flow::Break | Flow::Continue) => Err(ToolError::execution(
                "`break` or `continue` outside of a loop",
            )),
            Err(Flow::Fault(err)) => Err(err),
        }
    }

    fn tick(&mut self) -> Eval<()> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(Flow::Fault(ToolError::limit(format!(
                "evaluation exceeded {} steps",
                self.limits.max_steps
            ))));
        }
        Ok(())
    }

    fn eval_block(&mut self, frame: &mut Frame<'_>, block: &Block) -> Eval<Value> {
        for stmt in &block.stmts {
            match stmt {
                Stmt::Let { name, init } => {
                    let value = match init {
                        Some(init) => self.eval(frame, init)?,
                        None => Value::Null,
                    };
                    frame.define(name, value);
                }
                Stmt::Expr(expr) => {
                    self.eval(frame, expr)?;
                }
            }
        }
        match &block.tail {
            Some(tail) => self.eval(frame, tail),
            None => Ok(Value::Null),
        }
    }

    fn eval_scoped(&mut self, frame: &mut Frame<'_>, block: &Block) -> Eval<Value> {
        frame.scopes.push(HashMap::new());
        let result = self.eval_block(frame, block);
        frame.scopes.pop();
        result
    }

    fn eval_all(&mut self, frame: &mut Frame<'_>, exprs: &[Expr]) -> Eval<Vec<Value>> {
        let mut values = Vec::with_capacity(exprs.len());
        for expr in exprs {
            values.push(self.eval(frame, expr)?);
        }
        Ok(values)
    }

    fn eval_bool(&mut self, frame: &mut Frame<'_>, expr: &Expr) -> Eval<bool> {
        let value = self.eval(frame, expr)?;
        Ok(ops::truthy(&value)?)
    }

    fn eval(&mut self, frame: &mut Frame<'_>, expr: &Expr) -> Eval<Value> {
        self.tick()?;
        match expr {
            Expr::Lit(value) => Ok(value.clone()),
            Expr::Var(name) => frame
                .lookup(name)
                .cloned()
                .ok_or_else(|| fault(format!("unknown variable `{name}`"))),
            Expr::Array(items) => Ok(Value::Array(self.eval_all(frame, items)?)),
            Expr::Index { base, index } => {
                let base = self.eval(frame, base)?;
                let index = self.eval(frame, index)?;
                Ok(ops::index(&base, &index)?)
            }
            Expr::Field { base, member } => {
                let base = self.eval(frame, base)?;
                Ok(ops::field(&base, member)?)
            }
            Expr::Unary { op, operand } => {
                let operand = self.eval(frame, operand)?;
                Ok(ops::unary(*op, &operand)?)
            }
            Expr::Binary {
                op: BinaryOp::And,
                lhs,
                rhs,
            } => {
                let result = self.eval_bool(frame, lhs)? && self.eval_bool(frame, rhs)?;
                Ok(Value::Bool(result))
            }
            Expr::Binary {
                op: BinaryOp::Or,
                lhs,
                rhs,
            } => {
                let result = self.eval_bool(frame, lhs)? || self.eval_bool(frame, rhs)?;
                Ok(Value::Bool(result))
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(frame, lhs)?;
                let rhs = self.eval(frame, rhs)?;
                Ok(ops::binary(*op, &lhs, &rhs)?)
            }
            Expr::Assign { place, value } => {
                let value = self.eval(frame, value)?;
                *self.place_mut(frame, place)? = value;
                Ok(Value::Null)
            }
            Expr::CompoundAssign { place, op, value } => {
                let rhs = self.eval(frame, value)?;
                let target = self.place_mut(frame, place)?;
                let next = ops::binary(*op, target, &rhs)?;
                *target = next;
                Ok(Value::Null)
            }
            Expr::Push { place, value } => {
                let value = self.eval(frame, value)?;
                match self.place_mut(frame, place)? {
                    Value::Array(items) => {
                        items.push(value);
                        Ok(Value::Null)
                    }
                    other => Err(fault(format!("cannot push onto {}", ops::kind(other)))),
                }
            }
            Expr::If {
                cond,
                then,
                otherwise,
            } => {
                if self.eval_bool(frame, cond)? {
                    self.eval_scoped(frame, then)
                } else if let Some(otherwise) = otherwise {
                    self.eval(frame, otherwise)
                } else {
                    Ok(Value::Null)
                }
            }
            Expr::While { cond, body } => {
                while self.eval_bool(frame, cond)? {
                    if !Self::proceed(self.eval_scoped(frame, body))? {
                        break;
                    }
                }
                Ok(Value::Null)
            }
            Expr::Loop { body } => {
                loop {
                    self.tick()?;
                    if !Self::proceed(self.eval_scoped(frame, body))? {
                        break;
                    }
                }
                Ok(Value::Null)
            }
            Expr::For {
                binding,
                iter,
                body,
            } => self.eval_for(frame, binding, iter, body),
            Expr::Range {
                start,
                end,
                inclusive,
            } => {
                let (low, high) = self.range_bounds(frame, start, end, *inclusive)?;
                let count = u64::try_from(high.saturating_sub(low)).unwrap_or(0);
                if self.steps.saturating_add(count) > self.limits.max_steps {
                    return Err(Flow::Fault(ToolError::limit(format!(
                        "range of {count} elements exceeds the step budget"
                    ))));
                }
                self.steps += count;
                Ok(Value::Array((low..high).map(Value::from).collect()))
            }
            Expr::Break => Err(Flow::Break),
            Expr::Continue => Err(Flow::Continue),
            Expr::Return(value) => {
                let value = match value {
                    Some(value) => self.eval(frame, value)?,
                    None => Value::Null,
                };
                Err(Flow::Return(value))
            }
            Expr::Block(block) => self.eval_scoped(frame, block),
            Expr::Cast { operand, target } => {
                let operand = self.eval(frame, operand)?;
                Ok(ops::cast(&operand, *target)?)
            }
            Expr::Call { name, args } => {
                let args = self.eval_all(frame, args)?;
                Ok(self.dispatch(frame.program, name, args)?)
            }
            Expr::Method {
                receiver,
                method,
                args,
            } => {
                let receiver = self.eval(frame, receiver)?;
                let args = self.eval_all(frame, args)?;
                Ok(ops::call_method(&receiver, method, args)?)
            }
            Expr::Format { pieces, args } => {
                let values = self.eval_all(frame, args)?;
                let mut rendered = String::new();
                for piece in pieces {
                    match piece {
                        FormatPiece::Text(text) => rendered.push_str(text),
                        FormatPiece::Arg { index, debug } => {
                            let value = values
                                .get(*index)
                                .ok_or_else(|| fault("format argument out of range"))?;
                            rendered.push_str(&if *debug {
                                ops::debug(value)
                            } else {
                                ops::display(value)
                            });
                        }
                    }
                }
                Ok(Value::String(rendered))
            }
        }
    }

    /// Maps a loop body result onto whether the loop keeps going.
    fn proceed(result: Eval<Value>) -> Eval<bool> {
        match result {
            Ok(_) | Err(Flow::Continue) => Ok(true),
            Err(Flow::Break) => Ok(false),
            Err(other) => Err(other),
        }
    }

    fn eval_for(
        &mut self,
        frame: &mut Frame<'_>,
        binding: &str,
        iter: &Expr,
        body: &Block,
    ) -> Eval<Value> {
        if let Expr::Range {
            start,
            end,
            inclusive,
        } = iter
        {
            let (low, high) = self.range_bounds(frame, start, end, *inclusive)?;
            for current in low..high {
                self.tick()?;
                if !self.iterate(frame, binding, Value::from(current), body)? {
                    break;
                }
            }
            return Ok(Value::Null);
        }

        let items = match self.eval(frame, iter)? {
            Value::Array(items) => items,
            Value::String(text) => text
                .chars()
                .map(|ch| Value::String(ch.to_string()))
                .collect(),
            other => {
                return Err(fault(format!("cannot iterate over {}", ops::kind(&other))));
            }
        };
        for item in items {
            self.tick()?;
            if !self.iterate(frame, binding, item, body)? {
                break;
            }
        }
        Ok(Value::Null)
    }

    fn iterate(
        &mut self,
        frame: &mut Frame<'_>,
        binding: &str,
        item: Value,
        body: &Block,
    ) -> Eval<bool> {
        frame.scopes.push(HashMap::new());
        frame.define(binding, item);
        let result = self.eval_block(frame, body);
        frame.scopes.pop();
        Self::proceed(result)
    }

    fn range_bounds(
        &mut self,
        frame: &mut Frame<'_>,
        start: &Expr,
        end: &Expr,
        inclusive: bool,
    ) -> Eval<(i64, i64)> {
        let low = ops::integer(&self.eval(frame, start)?)?;
        let high = ops::integer(&self.eval(frame, end)?)?;
        let high = if inclusive {
            high.checked_add(1)
                .ok_or_else(|| fault("range bound overflows"))?
        } else {
            high
        };
        Ok((low, high))
    }

    fn dispatch(&mut self, program: &Program, name: &str, args: Vec<Value>) -> ToolResult<Value> {
        if let Some(function) = program.function(name) {
            let function = Arc::clone(function);
            return self.call(program, &function, args);
        }

        let Some(callee) = self.namespace.get(name) else {
            return Err(ToolError::execution(format!("unknown function `{name}`")));
        };
        let entry = Arc::clone(callee.entry());
        self.call(&callee, &entry, args)
    }

    fn place_mut<'f>(&mut self, frame: &'f mut Frame<'_>, place: &Place) -> Eval<&'f mut Value> {
        let mut path = Vec::new();
        let root = self.place_path(frame, place, &mut path)?;

        let mut target = frame
            .lookup_mut(root)
            .ok_or_else(|| fault(format!("unknown variable `{root}`")))?;
        for segment in path {
            target = descend(target, segment)?;
        }
        Ok(target)
    }

    fn place_path<'p>(
        &mut self,
        frame: &mut Frame<'_>,
        place: &'p Place,
        path: &mut Vec<Segment>,
    ) -> Eval<&'p str> {
        match place {
            Place::Var(name) => Ok(name),
            Place::Index { base, index } => {
                let root = self.place_path(frame, base, path)?;
                path.push(Segment::Key(self.eval(frame, index)?));
                Ok(root)
            }
            Place::Field { base, member } => {
                let root = self.place_path(frame, base, path)?;
                path.push(Segment::Member(member.clone()));
                Ok(root)
            }
        }
    }
}

fn descend(target: &mut Value, segment: Segment) -> ToolResult<&mut Value> {
    match (target, segment) {
        (Value::Array(items), Segment::Key(key)) => {
            let position = ops::position(&key, items.len())?;
            Ok(&mut items[position])
        }
        (Value::Array(items), Segment::Member(Member::Position(position))) => {
            let len = items.len();
            items.get_mut(position).ok_or_else(|| {
                ToolError::execution(format!("index {position} out of bounds for length {len}"))
            })
        }
        (Value::Object(map), Segment::Key(Value::String(key)))
        | (Value::Object(map), Segment::Member(Member::Name(key))) => {
            Ok(map.entry(key).or_insert(Value::Null))
        }
        (target, _) => Err(ToolError::execution(format!(
            "cannot assign into {}",
            ops::kind(target)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn run(source: &str, entry: &str, args: Vec<Value>) -> ToolResult<Value> {
        run_with(source, entry, args, SandboxLimits::default())
    }

    fn run_with(
        source: &str,
        entry: &str,
        args: Vec<Value>,
        limits: SandboxLimits,
    ) -> ToolResult<Value> {
        let namespace = Namespace::default();
        let program = Program::parse(entry, source).unwrap();
        let mut interpreter = Interpreter::new(&namespace, limits);
        interpreter.call(&program, program.entry(), args)
    }

    #[test]
    fn evaluates_arithmetic_and_tail_expression() {
        let out = run("fn double(x: i64) -> i64 { let y = x * 2; y }", "double", vec![json!(21)]);
        assert_eq!(out.unwrap(), json!(42));
    }

    #[test]
    fn loops_and_mutation() {
        let source = r#"
            fn evens(limit: i64) -> Vec<i64> {
                let mut out = vec![];
                for i in 0..=limit {
                    if i % 2 == 1 { continue; }
                    out.push(i);
                }
                let mut n = 0;
                while true {
                    n += 1;
                    if n > 3 { break; }
                }
                out.push(n);
                out
            }
        "#;
        assert_eq!(
            run(source, "evens", vec![json!(6)]).unwrap(),
            json!([0, 2, 4, 6, 4])
        );
    }

    #[test]
    fn early_return_and_helpers() {
        let source = r#"
            fn classify(n: i64) -> String {
                if n < 0 { return "negative".to_string(); }
                label(n)
            }
            fn label(n: i64) -> String { format!("n={n:?}") }
        "#;
        assert_eq!(run(source, "classify", vec![json!(-1)]).unwrap(), json!("negative"));
        assert_eq!(run(source, "classify", vec![json!(3)]).unwrap(), json!("n=3"));
    }

    #[test]
    fn indexed_assignment_updates_nested_values() {
        let source = r#"
            fn bump(grid: Vec<Vec<i64>>) -> Vec<Vec<i64>> {
                let mut g = grid;
                g[1][0] += 10;
                g
            }
        "#;
        assert_eq!(
            run(source, "bump", vec![json!([[1], [2]])]).unwrap(),
            json!([[1], [12]])
        );
    }

    #[test]
    fn step_limit_stops_runaway_loops() {
        let limits = SandboxLimits {
            max_steps: 500,
            ..SandboxLimits::default()
        };
        let err = run_with("fn spin() { loop {} }", "spin", vec![], limits).unwrap_err();
        assert!(matches!(err, ToolError::LimitExceeded { .. }));
    }

    #[test]
    fn call_depth_limit_stops_recursion() {
        let limits = SandboxLimits {
            max_call_depth: 8,
            ..SandboxLimits::default()
        };
        let err = run_with("fn down(n: i64) -> i64 { down(n + 1) }", "down", vec![json!(0)], limits)
            .unwrap_err();
        assert!(matches!(err, ToolError::LimitExceeded { .. }));
    }

    #[test]
    fn runtime_errors_surface_as_execution_failures() {
        let err = run("fn f(x: i64) -> i64 { x / 0 }", "f", vec![json!(1)]).unwrap_err();
        assert!(matches!(err, ToolError::Execution { .. }));

        let err = run("fn f() -> i64 { missing(1) }", "f", vec![]).unwrap_err();
        assert!(err.to_string().contains("unknown function `missing`"));
    }
}
