//! Ordered handshake steps.

use std::fmt;
use std::sync::Arc;

/// Outcome of checking one inbound message against a handshake step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Not the message this step is waiting for.
    Pending,
    /// The step is complete.
    Accepted,
    /// The remote side refused the step.
    Rejected(String),
}

type Verifier<I> = Arc<dyn Fn(&I) -> Verdict + Send + Sync>;

/// Commands to send, plus the check that tells when the remote side has
/// acknowledged them.
///
/// Steps run strictly in order. A step's verifier only sees messages that
/// arrive after that step began.
pub struct HandshakeStep<O, I> {
    commands: Vec<O>,
    verifier: Verifier<I>,
}

impl<O, I> HandshakeStep<O, I> {
    /// A step verified by a full [`Verdict`], for protocols that can tell a
    /// refusal apart from an unrelated message.
    pub fn with_verdict<F>(commands: Vec<O>, verifier: F) -> Self
    where
        F: Fn(&I) -> Verdict + Send + Sync + 'static,
    {
        Self {
            commands,
            verifier: Arc::new(verifier),
        }
    }

    /// A step completed by the first message matching `predicate`.
    pub fn expect<F>(commands: Vec<O>, predicate: F) -> Self
    where
        F: Fn(&I) -> bool + Send + Sync + 'static,
    {
        Self::with_verdict(commands, move |message| {
            if predicate(message) {
                Verdict::Accepted
            } else {
                Verdict::Pending
            }
        })
    }

    pub fn commands(&self) -> &[O] {
        &self.commands
    }

    pub fn verify(&self, message: &I) -> Verdict {
        (self.verifier)(message)
    }
}

impl<O: fmt::Debug, I> fmt::Debug for HandshakeStep<O, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeStep")
            .field("commands", &self.commands)
            .finish_non_exhaustive()
    }
}
