use tracing::trace;

use crate::{
    backend::{ChannelEvent, Subscription},
    QueueResult,
};

/// Block until at least one notification arrives on `subscription`
///
/// The first message triggers the unsubscribe. A pub/sub connection can
/// deliver further messages between the unsubscribe request and its
/// confirmation; those must not issue another unsubscribe, or the
/// connection ends up replying to the wrong request. Returns the number of
/// messages observed.
///
/// A wakeup only means "try claiming again": the item may already be gone.
pub async fn wait_for_notification(subscription: &mut dyn Subscription) -> QueueResult<usize> {
    let mut unsubscribing = false;
    let mut observed = 0;

    loop {
        match subscription.next_event().await? {
            ChannelEvent::Message => {
                observed += 1;
                if !unsubscribing {
                    unsubscribing = true;
                    subscription.unsubscribe().await?;
                } else {
                    trace!("Ignoring notification received while unsubscribing");
                }
            }
            ChannelEvent::Unsubscribed => return Ok(observed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{memory::MemoryBackend, QueueBackend};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio_test::{assert_pending, assert_ready_ok, task};

    /// Scripted channel that counts unsubscribe requests
    struct ScriptedSubscription {
        events: VecDeque<ChannelEvent>,
        unsubscribe_calls: usize,
    }

    #[async_trait]
    impl Subscription for ScriptedSubscription {
        async fn next_event(&mut self) -> QueueResult<ChannelEvent> {
            Ok(self.events.pop_front().unwrap_or(ChannelEvent::Unsubscribed))
        }

        async fn unsubscribe(&mut self) -> QueueResult<()> {
            self.unsubscribe_calls += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn double_delivery_unsubscribes_once() {
        let mut subscription = ScriptedSubscription {
            events: VecDeque::from([
                ChannelEvent::Message,
                ChannelEvent::Message,
                ChannelEvent::Message,
                ChannelEvent::Unsubscribed,
            ]),
            unsubscribe_calls: 0,
        };

        let observed = wait_for_notification(&mut subscription).await.unwrap();

        assert_eq!(observed, 3);
        assert_eq!(subscription.unsubscribe_calls, 1);
    }

    #[test]
    fn blocks_until_a_message_is_published() {
        let backend = MemoryBackend::new();
        let mut subscription = assert_ready_ok!(task::spawn(backend.subscribe("jobs")).poll());

        let mut wait = task::spawn(wait_for_notification(subscription.as_mut()));
        assert_pending!(wait.poll());

        backend.publish("jobs", "push");
        assert!(wait.is_woken());
        assert_eq!(assert_ready_ok!(wait.poll()), 1);
    }

    #[test]
    fn rapid_double_publish_is_absorbed() {
        let backend = MemoryBackend::new();
        let mut subscription = assert_ready_ok!(task::spawn(backend.subscribe("jobs")).poll());
        backend.publish("jobs", "push");
        backend.publish("jobs", "reclaim");

        let mut wait = task::spawn(wait_for_notification(subscription.as_mut()));
        assert_eq!(assert_ready_ok!(wait.poll()), 2);
    }
}
