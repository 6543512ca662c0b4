//! Human review of tool proposals and removals.
//!
//! The governor asks a [`Reviewer`] for every decision that needs a person.
//! [`review_queue`] provides the usual implementation: requests are queued on
//! a channel and answered from whatever front end drains the [`ReviewInbox`].
//! Anything other than an explicit approval counts as a rejection.

use std::fmt;
use std::time::Duration;

use agent_primitives::Identity;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// What a reviewer is asked to decide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewSubject {
    /// A new tool, or a replacement for an existing one.
    Proposal {
        /// Tool name.
        name: String,
        /// Proposed description.
        description: String,
        /// Proposed source.
        code: String,
        /// Whether an approved tool of this name already exists.
        overwrite: bool,
        /// Identity that proposed the tool, if any.
        proposer: Option<Identity>,
    },
    /// Removal of a tool that other tools still call.
    Removal {
        /// Tool name.
        name: String,
        /// Tools that call it.
        dependents: Vec<String>,
    },
}

impl ReviewSubject {
    /// Name of the tool under review.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Proposal { name, .. } | Self::Removal { name, .. } => name,
        }
    }
}

impl fmt::Display for ReviewSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(50);
        match self {
            Self::Proposal {
                name,
                description,
                code,
                overwrite,
                proposer,
            } => {
                writeln!(f, "{rule}")?;
                let kind = if *overwrite { " (overwrite)" } else { "" };
                writeln!(f, "TOOL PROPOSAL{kind}: {name}")?;
                if let Some(proposer) = proposer {
                    writeln!(f, "Proposed by: {proposer}")?;
                }
                writeln!(f, "Description: {description}")?;
                writeln!(f, "{rule}")?;
                writeln!(f, "{code}")?;
                write!(f, "{rule}")
            }
            Self::Removal { name, dependents } => {
                write!(f, "{name} is used by: {}. Remove anyway?", dependents.join(", "))
            }
        }
    }
}

/// A reviewer's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewDecision {
    /// Go ahead.
    Approve,
    /// Decline, with an optional reason.
    Reject {
        /// Why, if the reviewer said.
        reason: Option<String>,
    },
}

impl ReviewDecision {
    /// Returns whether this is an approval.
    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approve)
    }

    fn system(reason: &str) -> Self {
        Self::Reject {
            reason: Some(reason.to_owned()),
        }
    }
}

/// Source of human decisions.
#[async_trait]
pub trait Reviewer: Send + Sync {
    /// Blocks until a decision on `subject` is available.
    async fn review(&self, subject: ReviewSubject) -> ReviewDecision;
}

/// A queued review waiting for an answer.
#[derive(Debug)]
pub struct PendingReview {
    subject: ReviewSubject,
    responder: oneshot::Sender<ReviewDecision>,
}

impl PendingReview {
    /// What is being reviewed.
    #[must_use]
    pub fn subject(&self) -> &ReviewSubject {
        &self.subject
    }

    /// Approves the request.
    pub fn approve(self) {
        self.decide(ReviewDecision::Approve);
    }

    /// Declines the request.
    pub fn reject(self, reason: Option<String>) {
        self.decide(ReviewDecision::Reject { reason });
    }

    /// Answers the request. An answer arriving after the requester gave up is
    /// discarded.
    pub fn decide(self, decision: ReviewDecision) {
        let name = self.subject.name().to_owned();
        if self.responder.send(decision).is_err() {
            debug!(tool = %name, "review answered after the requester went away");
        }
    }
}

/// Requesting side of a review channel.
#[derive(Debug, Clone)]
pub struct ReviewQueue {
    sender: mpsc::UnboundedSender<PendingReview>,
    timeout: Option<Duration>,
}

/// Answering side of a review channel.
#[derive(Debug)]
pub struct ReviewInbox {
    receiver: mpsc::UnboundedReceiver<PendingReview>,
}

/// Creates a review channel. Requests not answered within `timeout` are
/// treated as rejected; `None` waits indefinitely.
#[must_use]
pub fn review_queue(timeout: Option<Duration>) -> (ReviewQueue, ReviewInbox) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (ReviewQueue { sender, timeout }, ReviewInbox { receiver })
}

impl ReviewInbox {
    /// Waits for the next request. Returns `None` once every [`ReviewQueue`]
    /// has been dropped.
    pub async fn next(&mut self) -> Option<PendingReview> {
        self.receiver.recv().await
    }

    /// Returns a queued request without waiting.
    pub fn try_next(&mut self) -> Option<PendingReview> {
        self.receiver.try_recv().ok()
    }

    /// Stops accepting requests; later reviews are rejected immediately.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

#[async_trait]
impl Reviewer for ReviewQueue {
    async fn review(&self, subject: ReviewSubject) -> ReviewDecision {
        let name = subject.name().to_owned();
        let (responder, answer) = oneshot::channel();
        if self.sender.send(PendingReview { subject, responder }).is_err() {
            warn!(tool = %name, "review inbox closed, treating as rejected");
            return ReviewDecision::system("review inbox closed");
        }

        let answer = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, answer).await {
                Ok(answer) => answer,
                Err(_) => {
                    warn!(tool = %name, timeout_secs = limit.as_secs(), "review timed out, treating as rejected");
                    return ReviewDecision::system("review timed out");
                }
            },
            None => answer.await,
        };

        answer.unwrap_or_else(|_| {
            warn!(tool = %name, "review dropped without an answer, treating as rejected");
            ReviewDecision::system("review dropped")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn removal() -> ReviewSubject {
        ReviewSubject::Removal {
            name: "double".into(),
            dependents: vec!["quad".into(), "report".into()],
        }
    }

    #[tokio::test]
    async fn answered_reviews_are_delivered() {
        let (queue, mut inbox) = review_queue(None);
        let reviewer = tokio::spawn(async move {
            let pending = inbox.next().await.unwrap();
            assert_eq!(pending.subject().name(), "double");
            pending.reject(Some("still needed".into()));
        });

        let decision = queue.review(removal()).await;
        assert_eq!(
            decision,
            ReviewDecision::Reject {
                reason: Some("still needed".into())
            }
        );
        reviewer.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_or_closed_reviews_reject() {
        let (queue, mut inbox) = review_queue(None);
        let dropper = tokio::spawn(async move {
            drop(inbox.next().await);
            inbox.close();
            inbox
        });
        assert!(!queue.review(removal()).await.is_approved());
        let _inbox = dropper.await.unwrap();
        assert!(!queue.review(removal()).await.is_approved());
    }

    #[tokio::test]
    async fn unanswered_reviews_time_out() {
        let (queue, mut inbox) = review_queue(Some(Duration::from_millis(20)));
        let decision = queue.review(removal()).await;
        assert_eq!(decision, ReviewDecision::system("review timed out"));

        // Answering late is harmless.
        inbox.try_next().unwrap().approve();
    }

    #[test]
    fn prompts_render_like_the_console_expects() {
        assert_eq!(
            removal().to_string(),
            "double is used by: quad, report. Remove anyway?"
        );
        let proposal = ReviewSubject::Proposal {
            name: "greet".into(),
            description: "says hi".into(),
            code: "fn greet() -> String { \"hi\".to_string() }".into(),
            overwrite: true,
            proposer: None,
        };
        let text = proposal.to_string();
        assert!(text.contains("TOOL PROPOSAL (overwrite): greet"));
        assert!(text.contains("Description: says hi"));
    }
}
