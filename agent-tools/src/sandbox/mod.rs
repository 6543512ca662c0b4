//! Restricted script sandbox for reviewed tools.
//!
//! Tool source is a small subset of Rust, parsed with `syn` and evaluated by
//! a tree-walking interpreter over [`serde_json::Value`]s. There is no access
//! to the filesystem, network, or process; the only side effect a script has
//! is its return value. Every materialized tool lives in a shared namespace
//! so that tools can call each other by name.

mod ast;
mod eval;
mod ops;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use self::ast::Program;
use self::eval::Interpreter;
use crate::analysis::DependencyAnalyzer;
use crate::compiler::{SyntaxError, ToolCompiler, ToolSignature};
use crate::registry::{Tool, ToolError, ToolResult};

/// Per-invocation evaluation limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxLimits {
    /// Maximum nesting of function calls, including calls between tools.
    pub max_call_depth: usize,
    /// Maximum evaluation steps for one invocation.
    pub max_steps: u64,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_call_depth: 64,
            max_steps: 100_000,
        }
    }
}

/// Programs reachable by name from any script.
#[derive(Debug, Default)]
pub(crate) struct Namespace {
    programs: RwLock<HashMap<String, Arc<Program>>>,
}

impl Namespace {
    fn get(&self, name: &str) -> Option<Arc<Program>> {
        self.programs
            .read()
            .expect("script namespace poisoned")
            .get(name)
            .cloned()
    }

    fn insert(&self, name: &str, program: Arc<Program>) {
        self.programs
            .write()
            .expect("script namespace poisoned")
            .insert(name.to_owned(), program);
    }

    fn remove(&self, name: &str) -> bool {
        self.programs
            .write()
            .expect("script namespace poisoned")
            .remove(name)
            .is_some()
    }
}

/// [`ToolCompiler`] producing sandboxed script tools.
#[derive(Debug, Default)]
pub struct ScriptCompiler {
    limits: SandboxLimits,
    namespace: RwLock<Arc<Namespace>>,
}

impl ScriptCompiler {
    /// Creates a compiler whose tools run under `limits`.
    #[must_use]
    pub fn new(limits: SandboxLimits) -> Self {
        Self {
            limits,
            namespace: RwLock::default(),
        }
    }

    /// Returns the limits applied to materialized tools.
    #[must_use]
    pub fn limits(&self) -> SandboxLimits {
        self.limits
    }

    fn current(&self) -> Arc<Namespace> {
        Arc::clone(&self.namespace.read().expect("script namespace poisoned"))
    }

    fn parse(name: &str, source: &str) -> Result<Program, SyntaxError> {
        if agent_primitives::ScopeId::for_tool(name).is_err() {
            return Err(SyntaxError::general(format!("invalid tool name `{name}`")));
        }
        Program::parse(name, source)
    }
}

impl ToolCompiler for ScriptCompiler {
    fn check(&self, name: &str, source: &str) -> Result<ToolSignature, SyntaxError> {
        let program = Self::parse(name, source)?;
        Ok(ToolSignature {
            name: name.to_owned(),
            params: program.entry().params.clone(),
        })
    }

    fn materialize(&self, name: &str, source: &str) -> Result<Arc<dyn Tool>, SyntaxError> {
        let program = Arc::new(Self::parse(name, source)?);
        let namespace = self.current();
        namespace.insert(name, Arc::clone(&program));
        debug!(tool = name, "script materialized");

        Ok(Arc::new(ScriptTool {
            name: name.to_owned(),
            program,
            namespace,
            limits: self.limits,
        }))
    }

    fn reset(&self) {
        *self.namespace.write().expect("script namespace poisoned") = Arc::new(Namespace::default());
        debug!("script namespace reset");
    }

    fn forget(&self, name: &str) {
        if self.current().remove(name) {
            debug!(tool = name, "script forgotten");
        }
    }
}

/// Callable backed by a parsed script.
pub struct ScriptTool {
    name: String,
    program: Arc<Program>,
    namespace: Arc<Namespace>,
    limits: SandboxLimits,
}

impl fmt::Debug for ScriptTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptTool")
            .field("name", &self.name)
            .field("params", &self.program.entry().params)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Tool for ScriptTool {
    async fn invoke(&self, input: Value) -> ToolResult<Value> {
        let entry = self.program.entry();
        let args = bind_arguments(&entry.params, input)?;

        let mut interpreter = Interpreter::new(&self.namespace, self.limits);
        let result = interpreter.call(&self.program, entry, args);
        trace!(tool = %self.name, steps = interpreter.steps(), ok = result.is_ok(), "script evaluated");
        result
    }
}

/// Maps tool input onto the entry function's positional parameters.
///
/// Accepts an object keyed by parameter name, an array of positional
/// arguments, or a bare value for single-parameter tools. A single-parameter
/// tool given an object without that key receives the whole object.
fn bind_arguments(params: &[String], input: Value) -> ToolResult<Vec<Value>> {
    match (params.len(), input) {
        (0, Value::Null) => Ok(Vec::new()),
        (0, Value::Object(map)) if map.is_empty() => Ok(Vec::new()),
        (0, Value::Array(items)) if items.is_empty() => Ok(Vec::new()),
        (0, other) => Err(ToolError::invalid_arguments(format!(
            "tool takes no arguments, got {}",
            ops::kind(&other)
        ))),
        (1, Value::Object(map)) if !map.contains_key(&params[0]) => Ok(vec![Value::Object(map)]),
        (_, Value::Object(mut map)) => {
            let mut args = Vec::with_capacity(params.len());
            for param in params {
                let value = map.remove(param).ok_or_else(|| {
                    ToolError::invalid_arguments(format!("missing argument `{param}`"))
                })?;
                args.push(value);
            }
            if let Some(extra) = map.keys().next() {
                return Err(ToolError::invalid_arguments(format!(
                    "unexpected argument `{extra}`"
                )));
            }
            Ok(args)
        }
        (count, Value::Array(items)) if items.len() == count => Ok(items),
        (1, Value::Null) => Err(ToolError::invalid_arguments(format!(
            "missing argument `{}`",
            params[0]
        ))),
        (1, value) => Ok(vec![value]),
        (count, other) => Err(ToolError::invalid_arguments(format!(
            "expected {count} arguments as an object or array, got {}",
            ops::kind(&other)
        ))),
    }
}

/// [`DependencyAnalyzer`] for script source.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptAnalyzer;

impl DependencyAnalyzer for ScriptAnalyzer {
    fn direct_calls(&self, source: &str) -> Result<BTreeSet<String>, SyntaxError> {
        let functions = ast::parse_functions(source)?;
        let mut calls = BTreeSet::new();
        for function in functions.values() {
            ast::collect_calls(function, &mut calls);
        }
        calls.retain(|name| !functions.contains_key(name));
        Ok(calls)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::analysis::dependency_map;

    const DOUBLE: &str = "fn double(x: i64) -> i64 { x * 2 }";
    const QUAD: &str = "fn quad(x: i64) -> i64 { double(double(x)) }";

    #[tokio::test]
    async fn tools_call_each_other_through_the_namespace() {
        let compiler = ScriptCompiler::default();
        compiler.materialize("double", DOUBLE).unwrap();
        let quad = compiler.materialize("quad", QUAD).unwrap();

        assert_eq!(quad.invoke(json!({ "x": 3 })).await.unwrap(), json!(12));
        assert_eq!(quad.invoke(json!([3])).await.unwrap(), json!(12));
        assert_eq!(quad.invoke(json!(3)).await.unwrap(), json!(12));
    }

    #[tokio::test]
    async fn forgotten_callee_fails_at_runtime() {
        let compiler = ScriptCompiler::default();
        compiler.materialize("double", DOUBLE).unwrap();
        let quad = compiler.materialize("quad", QUAD).unwrap();

        compiler.forget("double");
        let err = quad.invoke(json!(1)).await.unwrap_err();
        assert!(matches!(err, ToolError::Execution { .. }));
    }

    #[tokio::test]
    async fn reset_leaves_earlier_tools_on_their_namespace() {
        let compiler = ScriptCompiler::default();
        compiler.materialize("double", DOUBLE).unwrap();
        let old_quad = compiler.materialize("quad", QUAD).unwrap();

        compiler.reset();
        let new_quad = compiler.materialize("quad", QUAD).unwrap();

        assert_eq!(old_quad.invoke(json!(1)).await.unwrap(), json!(4));
        assert!(new_quad.invoke(json!(1)).await.is_err());
    }

    #[test]
    fn check_rejects_bad_names_and_sources() {
        let compiler = ScriptCompiler::default();
        let signature = compiler.check("double", DOUBLE).unwrap();
        assert_eq!(signature.params, vec!["x".to_owned()]);

        assert!(compiler.check("bad name", DOUBLE).is_err());
        assert!(compiler.check("double", "fn double(x: i64) -> i64 { x * }").is_err());
        assert!(compiler.check("triple", DOUBLE).is_err());
    }

    #[test]
    fn argument_binding_rules() {
        let two = vec!["a".to_owned(), "b".to_owned()];
        assert_eq!(
            bind_arguments(&two, json!({ "b": 2, "a": 1 })).unwrap(),
            vec![json!(1), json!(2)]
        );
        assert!(bind_arguments(&two, json!({ "a": 1 })).is_err());
        assert!(bind_arguments(&two, json!({ "a": 1, "b": 2, "c": 3 })).is_err());
        assert!(bind_arguments(&two, json!(1)).is_err());

        let one = vec!["config".to_owned()];
        assert_eq!(
            bind_arguments(&one, json!({ "depth": 2 })).unwrap(),
            vec![json!({ "depth": 2 })]
        );
        assert!(bind_arguments(&[], json!(5)).is_err());
        assert!(bind_arguments(&[], Value::Null).unwrap().is_empty());
    }

    #[test]
    fn analyzer_reports_external_calls_only() {
        let source = "fn report(x: i64) -> String { helper(double(x)) }\nfn helper(v: i64) -> String { format!(\"{}\", square(v)) }";
        let calls = ScriptAnalyzer.direct_calls(source).unwrap();
        assert_eq!(
            calls,
            BTreeSet::from(["double".to_owned(), "square".to_owned()])
        );

        let map = dependency_map(
            &ScriptAnalyzer,
            [("double", DOUBLE), ("quad", QUAD), ("report", source)],
        );
        assert_eq!(map["quad"], BTreeSet::from(["double".to_owned()]));
        assert_eq!(map["report"], BTreeSet::from(["double".to_owned()]));
        assert!(!map.contains_key("double"));
    }
}
