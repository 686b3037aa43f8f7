use std::time::Duration;

use tokio::time::Instant;

use crate::error::RepositoryError;

/// Caller-supplied time budget, checked between file operations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Some(Instant::now() + budget),
        }
    }

    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Fail with `DeadlineExceeded` naming `operation` once time is up
    pub fn check(&self, operation: &str) -> Result<(), RepositoryError> {
        if self.is_expired() {
            return Err(RepositoryError::DeadlineExceeded(operation.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_deadline_never_expires() {
        assert!(Deadline::none().check("anything").is_ok());
        assert_eq!(Deadline::none().remaining(), None);
    }

    #[tokio::test]
    async fn test_deadline_expires() {
        let deadline = Deadline::after(Duration::from_millis(20));
        assert!(deadline.check("copy").is_ok());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(matches!(
            deadline.check("copy"),
            Err(RepositoryError::DeadlineExceeded(op)) if op == "copy"
        ));
    }
}
