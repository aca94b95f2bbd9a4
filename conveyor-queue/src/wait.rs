//! Blocking pop shared by the local queues

use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{QueueError, QueueResult};

/// Wait until `take` yields an item or `timeout` elapses.
///
/// The notification is armed before `take` runs, so a push landing between the
/// check and the wait still wakes us.
pub(crate) async fn pop_with<T, F>(notify: &Notify, timeout: Option<Duration>, mut take: F) -> QueueResult<T>
where
    F: FnMut() -> QueueResult<Option<T>>,
{
    let deadline = timeout.map(|t| Instant::now() + t);

    loop {
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some(item) = take()? {
            return Ok(item);
        }

        match deadline {
            Some(deadline) => {
                if tokio::time::timeout_at(deadline, notified).await.is_err() {
                    // last look: a push may have raced the deadline
                    return take()?.ok_or(QueueError::Empty);
                }
            }
            None => notified.await,
        }
    }
}
