//! Run contexts: cooperative cancellation plus deadline propagation.
//!
//! Every unit of work receives a [`RunContext`]. Derived contexts narrow
//! their parent (tighter deadline, child cancel token) but never widen it.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a context is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    Cancelled,
    Deadline,
}

/// A cancel signal plus an optional deadline, handed down the execution tree.
#[derive(Debug, Clone)]
pub struct RunContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Root context driven by an externally owned cancel token (queue items).
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Derive a child sharing the parent deadline.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derive a child whose effective deadline is
    /// `min(parent deadline, now + secs)`. A zero timeout only inherits.
    pub fn child_with_timeout(&self, secs: u64) -> Self {
        let mut child = self.child();
        if secs > 0 {
            let candidate = Instant::now() + Duration::from_secs(secs);
            child.deadline = Some(match self.deadline {
                Some(parent) => parent.min(candidate),
                None => candidate,
            });
        }
        child
    }

    /// Cancel this context and everything derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Why this context is done, if it is. An explicit cancel takes
    /// precedence over an expired deadline.
    pub fn cause(&self) -> Option<Cause> {
        if self.cancel.is_cancelled() {
            return Some(Cause::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Some(Cause::Deadline);
            }
        }
        None
    }

    /// A token to hand to a command executor. It fires when this context
    /// is cancelled or its deadline passes, whichever comes first.
    pub fn command_token(&self) -> CancellationToken {
        let token = self.cancel.child_token();
        if let Some(deadline) = self.deadline {
            let watch = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = watch.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => watch.cancel(),
                }
            });
        }
        token
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Call-site metadata used for progress labelling on the output stream,
/// e.g. `[stage(1/2): build][job(1/1): compile]`.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    pub total: usize,
    pub current: usize,
    pub parent: String,
}

impl Progress {
    pub fn label(&self, level: &str, name: &str) -> String {
        format!(
            "{}[{}({}/{}): {}]",
            self.parent, level, self.current, self.total, name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deadline_narrows_to_parent() {
        tokio::time::pause();
        let parent = RunContext::new().child_with_timeout(1);
        let child = parent.child_with_timeout(100);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(child.cause(), Some(Cause::Deadline));
    }

    #[tokio::test]
    async fn child_timeout_narrows_parent_deadline() {
        tokio::time::pause();
        let parent = RunContext::new().child_with_timeout(100);
        let child = parent.child_with_timeout(1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(child.cause(), Some(Cause::Deadline));
        assert_eq!(parent.cause(), None);
    }

    #[tokio::test]
    async fn cancel_reaches_descendants_not_ancestors() {
        let parent = RunContext::new();
        let child = parent.child();
        let grandchild = child.child_with_timeout(100);

        child.cancel();
        assert_eq!(grandchild.cause(), Some(Cause::Cancelled));
        assert_eq!(parent.cause(), None);
    }

    #[tokio::test]
    async fn command_token_fires_on_deadline() {
        tokio::time::pause();
        let ctx = RunContext::new().child_with_timeout(1);
        let token = ctx.command_token();

        tokio::time::timeout(Duration::from_secs(5), token.cancelled())
            .await
            .expect("token should fire once the deadline passes");
    }
}
