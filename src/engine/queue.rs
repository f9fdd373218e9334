use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub async fn enqueue_ride(state: &AppState, ride_id: Uuid) -> Result<(), AppError> {
    // Count before sending: the engine decrements on receipt, and a
    // receive can land before a post-send increment would run.
    state.metrics.rides_in_queue.inc();

    if let Err(err) = state.ride_tx.send(ride_id).await {
        state.metrics.rides_in_queue.dec();
        return Err(AppError::Internal(format!("ride queue send failed: {err}")));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::enqueue_ride;
    use crate::config::Config;
    use crate::state::AppState;

    #[tokio::test]
    async fn enqueue_counts_the_waiting_ride() {
        let (state, mut rx) = AppState::new(Config::default());

        enqueue_ride(&state, Uuid::new_v4()).await.unwrap();

        assert_eq!(state.metrics.rides_in_queue.get(), 1);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn failed_enqueue_leaves_the_gauge_untouched() {
        let (state, rx) = AppState::new(Config::default());
        drop(rx);

        let result = enqueue_ride(&state, Uuid::new_v4()).await;

        assert!(result.is_err());
        assert_eq!(state.metrics.rides_in_queue.get(), 0);
    }
}
