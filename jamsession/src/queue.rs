use std::collections::VecDeque;
use std::sync::Arc;

use crate::track::{PlayableItem, TrackMetadata};

/// Ordered track list of one session, FIFO with rotate-on-loop.
///
/// The head item stays in place while it is being played; the controller
/// removes or rotates it only once the player reports the track over. This
/// is what lets a looping queue re-enqueue a finished item exactly once.
#[derive(Clone, Default)]
pub struct TrackQueue {
    items: VecDeque<Arc<dyn PlayableItem>>,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn enqueue(&mut self, item: Arc<dyn PlayableItem>) {
        self.items.push_back(item);
    }

    pub fn enqueue_many<I: IntoIterator<Item = Arc<dyn PlayableItem>>>(&mut self, items: I) {
        for item in items {
            self.items.push_back(item);
        }
    }

    /// Head item without removing it.
    pub fn head(&self) -> Option<Arc<dyn PlayableItem>> {
        self.items.front().cloned()
    }

    /// Removes and returns the head item.
    pub fn drop_head(&mut self) -> Option<Arc<dyn PlayableItem>> {
        self.items.pop_front()
    }

    /// Moves the head item to the tail. Returns false on an empty queue.
    pub fn rotate_head_to_tail(&mut self) -> bool {
        match self.items.pop_front() {
            Some(item) => {
                self.items.push_back(item);
                true
            }
            None => false,
        }
    }

    /// Metadata of every queued item, in play order.
    pub fn snapshot(&self) -> Vec<TrackMetadata> {
        self.items.iter().map(|item| item.metadata().clone()).collect()
    }
}

impl std::fmt::Debug for TrackQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackQueue")
            .field("len", &self.items.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SessionError;
    use crate::track::Resource;
    use async_trait::async_trait;

    struct TestTrack(TrackMetadata);

    #[async_trait]
    impl PlayableItem for TestTrack {
        fn metadata(&self) -> &TrackMetadata {
            &self.0
        }

        async fn create_resource(&self) -> Result<Resource, SessionError> {
            Ok(Resource::new(self.0.clone()))
        }
    }

    fn track(title: &str) -> Arc<dyn PlayableItem> {
        Arc::new(TestTrack(TrackMetadata::new(title)))
    }

    fn titles(queue: &TrackQueue) -> Vec<String> {
        queue.snapshot().into_iter().map(|m| m.title).collect()
    }

    #[test]
    fn enqueue_preserves_fifo_order() {
        let mut queue = TrackQueue::new();
        queue.enqueue_many([track("a"), track("b"), track("c")]);
        assert_eq!(titles(&queue), vec!["a", "b", "c"]);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn head_does_not_remove() {
        let mut queue = TrackQueue::new();
        queue.enqueue(track("a"));
        assert_eq!(queue.head().unwrap().metadata().title, "a");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn drop_head_advances() {
        let mut queue = TrackQueue::new();
        queue.enqueue_many([track("a"), track("b")]);
        let dropped = queue.drop_head().unwrap();
        assert_eq!(dropped.metadata().title, "a");
        assert_eq!(titles(&queue), vec!["b"]);
    }

    #[test]
    fn rotate_moves_head_to_tail() {
        let mut queue = TrackQueue::new();
        queue.enqueue_many([track("a"), track("b")]);
        assert!(queue.rotate_head_to_tail());
        assert_eq!(titles(&queue), vec!["b", "a"]);
    }

    #[test]
    fn rotate_on_empty_is_false() {
        let mut queue = TrackQueue::new();
        assert!(!queue.rotate_head_to_tail());
    }

    #[test]
    fn clear_empties_the_queue() {
        let mut queue = TrackQueue::new();
        queue.enqueue_many([track("a"), track("b")]);
        queue.clear();
        assert!(queue.is_empty());
    }
}
