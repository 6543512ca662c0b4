//! Console command grammar.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Map, Value};

pub const HELP: &str = "\
commands:
  tools                              list catalog and builtin tools
  scopes                             list known scopes
  grants                             list scopes held by this identity
  grant <scope|tool>                 grant a scope (bare names mean tool.<name>)
  revoke <scope|tool>                revoke a scope
  run <tool> [k=v ...|value]         run a tool
  propose <name> <file> [desc ...]   propose tool source for review
  rollback <name> [version]          restore an earlier version
  remove <name>                      remove a tool
  deps [name]                        show tool dependencies
  rejections [name]                  show declined proposals
  history                            show this identity's grant history
  reload                             reload the catalog from disk
  help                               show this text
  quit                               exit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Tools,
    Scopes,
    Grants,
    Grant(String),
    Revoke(String),
    Run { tool: String, args: Value },
    Propose {
        name: String,
        file: PathBuf,
        description: String,
    },
    Rollback { name: String, version: Option<usize> },
    Remove(String),
    Deps(Option<String>),
    Rejections(Option<String>),
    History,
    Reload,
    Help,
    Quit,
}

impl Command {
    /// Parses one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let rest: Vec<&str> = words.collect();

        let command = match verb {
            "tools" => Self::Tools,
            "scopes" => Self::Scopes,
            "grants" => Self::Grants,
            "grant" => Self::Grant(scope_arg(one(verb, &rest)?)),
            "revoke" => Self::Revoke(scope_arg(one(verb, &rest)?)),
            "run" => {
                let (tool, args) = rest
                    .split_first()
                    .ok_or_else(|| anyhow!("usage: run <tool> [k=v ...|value]"))?;
                Self::Run {
                    tool: (*tool).to_owned(),
                    args: run_args(args)?,
                }
            }
            "propose" => match rest.as_slice() {
                [name, file, description @ ..] => Self::Propose {
                    name: (*name).to_owned(),
                    file: PathBuf::from(file),
                    description: description.join(" "),
                },
                _ => bail!("usage: propose <name> <file> [description ...]"),
            },
            "rollback" => match rest.as_slice() {
                [name] => Self::Rollback {
                    name: (*name).to_owned(),
                    version: None,
                },
                [name, version] => Self::Rollback {
                    name: (*name).to_owned(),
                    version: Some(
                        version
                            .trim_start_matches('v')
                            .parse()
                            .with_context(|| format!("invalid version `{version}`"))?,
                    ),
                },
                _ => bail!("usage: rollback <name> [version]"),
            },
            "remove" => Self::Remove(one(verb, &rest)?.to_owned()),
            "deps" => Self::Deps(optional(verb, &rest)?),
            "rejections" => Self::Rejections(optional(verb, &rest)?),
            "history" => Self::History,
            "reload" => Self::Reload,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => bail!("unknown command `{other}`; try `help`"),
        };
        Ok(Some(command))
    }
}

fn one<'a>(verb: &str, rest: &[&'a str]) -> Result<&'a str> {
    match rest {
        [arg] => Ok(*arg),
        _ => bail!("usage: {verb} <name>"),
    }
}

fn optional(verb: &str, rest: &[&str]) -> Result<Option<String>> {
    match rest {
        [] => Ok(None),
        [arg] => Ok(Some((*arg).to_owned())),
        _ => bail!("usage: {verb} [name]"),
    }
}

/// Bare names refer to tool scopes.
fn scope_arg(arg: &str) -> String {
    if arg.contains('.') {
        arg.to_owned()
    } else {
        format!("tool.{arg}")
    }
}

/// `k=v` pairs become an object; a single bare word is passed as-is.
/// Values are read as JSON where possible and as strings otherwise.
fn run_args(args: &[&str]) -> Result<Value> {
    match args {
        [] => Ok(Value::Null),
        [single] if !single.contains('=') => Ok(json_or_string(single)),
        pairs => {
            let mut object = Map::new();
            for pair in pairs {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| anyhow!("expected k=v, got `{pair}`"))?;
                object.insert(key.to_owned(), json_or_string(value));
            }
            Ok(Value::Object(object))
        }
    }
}

fn json_or_string(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}
