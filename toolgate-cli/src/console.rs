//! Line-oriented console hosting both the agent and the human reviewer.

use std::future::Future;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use toolgate::governor::{
    Agent, Governance, GovernanceResult, PendingReview, ReviewInbox, ReviewSubject,
};
use tracing::debug;

use crate::commands::{Command, HELP};

/// Console state: one agent, the review inbox, and stdin.
pub struct Console<'a> {
    governance: &'a Governance,
    agent: Agent,
    inbox: ReviewInbox,
    input: Lines<BufReader<Stdin>>,
}

impl<'a> Console<'a> {
    pub fn new(governance: &'a Governance, agent: Agent, inbox: ReviewInbox) -> Self {
        Self {
            governance,
            agent,
            inbox,
            input: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// Reads and executes commands until `quit` or end of input.
    pub async fn run(&mut self) -> Result<()> {
        println!("toolgate console as {}. Type `help` for commands.", self.agent.identity());
        loop {
            let Some(line) = self.prompt("> ").await? else {
                return Ok(());
            };
            match Command::parse(&line) {
                Ok(None) => {}
                Ok(Some(Command::Quit)) => return Ok(()),
                Ok(Some(command)) => {
                    if let Err(err) = self.execute(command).await {
                        println!("Error: {err:#}");
                    }
                }
                Err(err) => println!("Error: {err}"),
            }
        }
    }

    async fn execute(&mut self, command: Command) -> Result<()> {
        let governance = self.governance;
        let governor = governance.governor();
        match command {
            Command::Tools => {
                for tool in governor.list_tools() {
                    let state = if tool.live { "" } else { " (not loaded)" };
                    println!("  {} v{}: {}{state}", tool.name, tool.version, tool.description);
                }
                for metadata in governance.registry().list() {
                    if !governor.catalog().contains(metadata.name()) {
                        let description = metadata.description().unwrap_or("");
                        println!("  {} (builtin): {description}", metadata.name());
                    }
                }
            }
            Command::Scopes => {
                for scope in governance.scope_registry().list() {
                    println!("  {scope}");
                }
            }
            Command::Grants => {
                for scope in self.agent.grants() {
                    println!("  {scope}");
                }
            }
            Command::Grant(scope) => {
                let granted = self.agent.grant(&scope).await?;
                if granted.is_empty() {
                    println!("already held: {scope}");
                }
                for scope in granted {
                    println!("granted {scope}");
                }
            }
            Command::Revoke(scope) => {
                self.agent.revoke(&scope).await?;
                println!("revoked {scope}");
            }
            Command::Run { tool, args } => {
                let output = self.agent.run(&tool, args).await?;
                match output {
                    serde_json::Value::String(text) => println!("{text}"),
                    other => println!("{}", serde_json::to_string_pretty(&other)?),
                }
            }
            Command::Propose {
                name,
                file,
                description,
            } => {
                let code = tokio::fs::read_to_string(&file)
                    .await
                    .with_context(|| format!("reading {}", file.display()))?;
                let agent = self.agent.clone();
                let outcome = self
                    .with_reviews(agent.propose(&name, &code, &description))
                    .await??;
                println!("{outcome}");
            }
            Command::Rollback { name, version } => {
                println!("{}", governor.rollback(&name, version).await?);
            }
            Command::Remove(name) => {
                let outcome = self.with_reviews(governor.remove(&name)).await??;
                println!("{outcome}");
            }
            Command::Deps(Some(name)) => {
                let deps = governor.dependencies_of(&name)?;
                let dependents = governor.dependents_of(&name);
                println!("  {name} calls: {}", join_or_none(deps.iter()));
                println!("  {name} is called by: {}", join_or_none(dependents.iter()));
            }
            Command::Deps(None) => {
                let map = governor.dependencies();
                if map.is_empty() {
                    println!("  no dependencies between tools");
                }
                for (tool, deps) in map {
                    println!("  {tool} -> {}", join_or_none(deps.iter()));
                }
            }
            Command::Rejections(name) => {
                for rejection in governor.past_rejections(name.as_deref()) {
                    let reason = rejection.reason.as_deref().unwrap_or("no reason given");
                    println!("  {} {}: {reason}", rejection.timestamp.to_rfc3339(), rejection.name);
                }
            }
            Command::History => {
                for entry in self.agent.history() {
                    println!("  {} {:?} {}", entry.timestamp.to_rfc3339(), entry.action, entry.scope);
                }
            }
            Command::Reload => {
                let report = governance.reload(Some(self.agent.identity())).await?;
                println!(
                    "loaded {} tools, skipped {}",
                    report.loaded.len(),
                    report.skipped.len()
                );
                for (name, err) in report.skipped {
                    println!("  {name}: {err}");
                }
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => {}
        }
        Ok(())
    }

    /// Drives `operation` to completion, answering any review it requests
    /// from stdin in the meantime.
    async fn with_reviews<F, T>(&mut self, operation: F) -> Result<GovernanceResult<T>>
    where
        F: Future<Output = GovernanceResult<T>>,
    {
        tokio::pin!(operation);
        loop {
            tokio::select! {
                outcome = &mut operation => return Ok(outcome),
                Some(pending) = self.inbox.next() => self.answer(pending).await?,
            }
        }
    }

    async fn answer(&mut self, pending: PendingReview) -> Result<()> {
        let subject = pending.subject().clone();
        let question = match &subject {
            ReviewSubject::Proposal { .. } => {
                println!("{subject}");
                "Approve? (y/n): ".to_owned()
            }
            ReviewSubject::Removal { .. } => format!("{subject} (y/n): "),
        };

        let approved = self
            .prompt(&question)
            .await?
            .is_some_and(|answer| answer.trim().eq_ignore_ascii_case("y"));
        if approved {
            pending.approve();
            return Ok(());
        }

        let reason = match subject {
            ReviewSubject::Proposal { .. } => self
                .prompt("Reason for rejection (or enter to skip): ")
                .await?
                .map(|reason| reason.trim().to_owned())
                .filter(|reason| !reason.is_empty()),
            ReviewSubject::Removal { .. } => None,
        };
        debug!(tool = pending.subject().name(), "review declined at console");
        pending.reject(reason);
        Ok(())
    }

    async fn prompt(&mut self, text: &str) -> Result<Option<String>> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(text.as_bytes()).await?;
        stdout.flush().await?;
        Ok(self.input.next_line().await?)
    }
}

fn join_or_none<'a>(names: impl Iterator<Item = &'a String>) -> String {
    let joined = names.map(String::as_str).collect::<Vec<_>>().join(", ");
    if joined.is_empty() {
        "(none)".to_owned()
    } else {
        joined
    }
}
