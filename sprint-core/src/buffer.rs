//! Outbound queue for sprint-sync.
//!
//! Holds protocol messages while the peer is unreachable:
//! - FIFO ordering for delivery
//! - Bounded size; overflow coalesces superseded snapshots
//! - Failed sends go back to the front for the next attempt
//!
//! Commands, session starts and sync requests are never dropped to make room;
//! only snapshots are, since each one supersedes every earlier one.

use std::collections::VecDeque;

use sprintsync_types::Message;

/// Error type for queue operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// Queue is at capacity and holds nothing that can be coalesced.
    Full {
        /// Queue capacity.
        capacity: usize,
    },
}

impl std::fmt::Display for BufferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferError::Full { capacity } => {
                write!(f, "outbound queue full (capacity: {})", capacity)
            }
        }
    }
}

impl std::error::Error for BufferError {}

/// What `enqueue` did with the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Appended to the back.
    Queued,
    /// Appended after dropping `dropped` superseded snapshots.
    Coalesced {
        /// Number of snapshots removed.
        dropped: usize,
    },
}

/// Bounded FIFO of messages waiting for the peer.
///
/// Messages flow through the queue in this order:
/// 1. `enqueue()` - add to the back
/// 2. `dequeue()` - take from the front for sending
/// 3. `requeue_front()` - put back if the send failed
#[derive(Debug)]
pub struct OutboundQueue {
    capacity: usize,
    queue: VecDeque<Message>,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queue: VecDeque::new(),
        }
    }

    /// Add a message to the back of the queue.
    ///
    /// When full, queued snapshots are coalesced: an incoming snapshot
    /// replaces all of them, any other message keeps only the newest one.
    /// Fails if nothing can be coalesced.
    pub fn enqueue(&mut self, msg: Message) -> Result<Enqueued, BufferError> {
        if self.queue.len() < self.capacity {
            self.queue.push_back(msg);
            return Ok(Enqueued::Queued);
        }

        let keep_newest = !msg.is_snapshot();
        let dropped = self.drop_snapshots(keep_newest);
        if dropped == 0 {
            return Err(BufferError::Full {
                capacity: self.capacity,
            });
        }
        self.queue.push_back(msg);
        Ok(Enqueued::Coalesced { dropped })
    }

    fn drop_snapshots(&mut self, keep_newest: bool) -> usize {
        let newest = if keep_newest {
            self.queue.iter().rposition(Message::is_snapshot)
        } else {
            None
        };
        let before = self.queue.len();
        let mut index = 0;
        self.queue.retain(|m| {
            let keep = !m.is_snapshot() || Some(index) == newest;
            index += 1;
            keep
        });
        before - self.queue.len()
    }

    /// Remove and return the next message.
    pub fn dequeue(&mut self) -> Option<Message> {
        self.queue.pop_front()
    }

    /// Put a message whose send failed back at the front.
    pub fn requeue_front(&mut self, msg: Message) {
        self.queue.push_front(msg);
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Maximum number of queued messages.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprintsync_types::{
        Command, CommandRequest, DeviceRole, SessionId, SyncRequest, Timestamp, Version,
        WorkoutSnapshot,
    };

    fn snapshot(version: u64) -> Message {
        let mut snap = WorkoutSnapshot::initial(
            SessionId::new(),
            3,
            300,
            DeviceRole::Host,
            Timestamp::default(),
        );
        snap.version = Version::new(version);
        Message::Snapshot(snap)
    }

    fn command(command: Command) -> Message {
        Message::Command(CommandRequest {
            command,
            issued_at: Timestamp::default(),
        })
    }

    fn version_of(msg: &Message) -> Option<u64> {
        match msg {
            Message::Snapshot(s) => Some(s.version.value()),
            _ => None,
        }
    }

    #[test]
    fn queue_is_fifo() {
        let mut queue = OutboundQueue::new(10);
        queue.enqueue(command(Command::Play)).unwrap();
        queue.enqueue(snapshot(1)).unwrap();
        queue.enqueue(command(Command::Pause)).unwrap();

        assert_eq!(queue.dequeue(), Some(command(Command::Play)));
        assert_eq!(queue.dequeue().as_ref().and_then(version_of), Some(1));
        assert_eq!(queue.dequeue(), Some(command(Command::Pause)));
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn overflowing_snapshot_replaces_stale_snapshots() {
        let mut queue = OutboundQueue::new(3);
        queue.enqueue(snapshot(1)).unwrap();
        queue.enqueue(command(Command::Skip)).unwrap();
        queue.enqueue(snapshot(2)).unwrap();

        let result = queue.enqueue(snapshot(3)).unwrap();
        assert_eq!(result, Enqueued::Coalesced { dropped: 2 });
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue(), Some(command(Command::Skip)));
        assert_eq!(queue.dequeue().as_ref().and_then(version_of), Some(3));
    }

    #[test]
    fn overflowing_command_keeps_newest_snapshot() {
        let mut queue = OutboundQueue::new(3);
        queue.enqueue(snapshot(1)).unwrap();
        queue.enqueue(snapshot(2)).unwrap();
        queue.enqueue(command(Command::Play)).unwrap();

        let result = queue.enqueue(command(Command::Stop)).unwrap();
        assert_eq!(result, Enqueued::Coalesced { dropped: 1 });

        let drained: Vec<Message> = std::iter::from_fn(|| queue.dequeue()).collect();
        assert_eq!(drained.len(), 3);
        assert_eq!(version_of(&drained[0]), Some(2));
        assert_eq!(drained[1], command(Command::Play));
        assert_eq!(drained[2], command(Command::Stop));
    }

    #[test]
    fn full_of_commands_refuses_new_messages() {
        let mut queue = OutboundQueue::new(2);
        queue.enqueue(command(Command::Play)).unwrap();
        queue.enqueue(command(Command::Skip)).unwrap();

        assert_eq!(
            queue.enqueue(command(Command::Stop)),
            Err(BufferError::Full { capacity: 2 })
        );
        assert_eq!(
            queue.enqueue(snapshot(9)),
            Err(BufferError::Full { capacity: 2 })
        );
        // oldest commands survive
        assert_eq!(queue.dequeue(), Some(command(Command::Play)));
    }

    #[test]
    fn single_snapshot_with_command_overflow_is_full() {
        let mut queue = OutboundQueue::new(1);
        queue.enqueue(snapshot(1)).unwrap();
        // the only snapshot is also the newest; nothing to coalesce
        assert!(queue.enqueue(command(Command::Pause)).is_err());
        // but a newer snapshot supersedes it
        assert_eq!(
            queue.enqueue(snapshot(2)),
            Ok(Enqueued::Coalesced { dropped: 1 })
        );
    }

    #[test]
    fn requeue_front_retries_first() {
        let mut queue = OutboundQueue::new(5);
        queue.enqueue(command(Command::Play)).unwrap();
        queue.enqueue(command(Command::Pause)).unwrap();

        let msg = queue.dequeue().unwrap();
        queue.requeue_front(msg);
        assert_eq!(queue.dequeue(), Some(command(Command::Play)));
    }

    #[test]
    fn clear_empties_queue() {
        let mut queue = OutboundQueue::new(5);
        queue.enqueue(snapshot(1)).unwrap();
        queue.enqueue(Message::SyncRequest(SyncRequest {
            session: None,
            known_version: Version::zero(),
        }))
        .unwrap();
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.capacity(), 5);
    }

    #[test]
    fn buffer_error_display() {
        let err = BufferError::Full { capacity: 64 };
        assert_eq!(err.to_string(), "outbound queue full (capacity: 64)");
    }
}
