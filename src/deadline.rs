use crate::error::ChatError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// A fixed point in time by which one request must finish.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    /// For blocking code that must check the deadline itself.
    pub fn cutoff(&self) -> std::time::Instant {
        self.at.into_std()
    }

    pub fn expired(&self) -> ChatError {
        ChatError::Timeout(self.budget)
    }

    /// Drops `future` once the deadline passes. Only for futures that leave
    /// nothing half-done when dropped.
    pub async fn bound<F: Future>(&self, future: F) -> Result<F::Output, ChatError> {
        tokio::time::timeout_at(self.at, future)
            .await
            .map_err(|_| self.expired())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fast_future_completes() {
        let deadline = Deadline::after(Duration::from_secs(5));
        assert_eq!(deadline.bound(async { 7 }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn slow_future_times_out_with_budget() {
        let deadline = Deadline::after(Duration::from_millis(20));
        let result = deadline
            .bound(tokio::time::sleep(Duration::from_secs(10)))
            .await;
        assert!(matches!(result, Err(ChatError::Timeout(d)) if d == Duration::from_millis(20)));
        assert!(std::time::Instant::now() >= deadline.cutoff());
    }
}
