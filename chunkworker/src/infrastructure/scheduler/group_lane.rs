// /////////////////////////////////////////////////////////////////////////////
// chunkworker
// SPDX-License-Identifier: BSD-3-Clause
// /////////////////////////////////////////////////////////////////////////////

//! Group lane (C5): a FIFO-with-chunk-grouping queue for interactive
//! work. Grounded on the original `wsched::GroupScheduler`/`GroupQueue` —
//! an ordered sequence of small per-chunk groups, each capped at
//! `max_group_size`, drained oldest-group-first and discarded once empty.

use std::collections::VecDeque;
use std::sync::Arc;

use chunkworker_domain::value_objects::ChunkId;
use parking_lot::{Condvar, Mutex};

use crate::infrastructure::runtime::command_queue::{Command, CommandQueue};

struct Group {
    chunk: Option<ChunkId>,
    max_accepted: usize,
    accepted: usize,
    tasks: VecDeque<Arc<dyn Command>>,
}

impl Group {
    fn accepts(&self, cmd: &dyn Command) -> bool {
        if self.accepted >= self.max_accepted {
            return false;
        }
        if cmd.sticky_group() {
            return true;
        }
        match (&self.chunk, cmd.chunk_id()) {
            (Some(a), Some(b)) => ChunkId::equal(a, b).unwrap_or(false),
            (None, None) => true,
            _ => false,
        }
    }
}

pub struct GroupLane {
    max_group_size: usize,
    groups: Mutex<VecDeque<Group>>,
    cv: Condvar,
}

impl GroupLane {
    pub fn new(max_group_size: usize) -> Self {
        Self { max_group_size, groups: Mutex::new(VecDeque::new()), cv: Condvar::new() }
    }

    fn push_one(&self, groups: &mut VecDeque<Group>, cmd: Arc<dyn Command>) {
        if let Some(last) = groups.back_mut() {
            if last.accepts(cmd.as_ref()) {
                last.accepted += 1;
                last.tasks.push_back(cmd);
                return;
            }
        }
        groups.push_back(Group {
            chunk: cmd.chunk_id().cloned(),
            max_accepted: self.max_group_size,
            accepted: 1,
            tasks: VecDeque::from([cmd]),
        });
    }

    /// Discards any groups at the front that have been fully drained.
    fn prune_front(groups: &mut VecDeque<Group>) {
        while matches!(groups.front(), Some(g) if g.tasks.is_empty()) {
            groups.pop_front();
        }
    }
}

impl CommandQueue for GroupLane {
    fn enqueue(&self, cmd: Arc<dyn Command>) {
        let mut groups = self.groups.lock();
        self.push_one(&mut groups, cmd);
        self.cv.notify_one();
    }

    fn enqueue_batch(&self, cmds: Vec<Arc<dyn Command>>) {
        let mut groups = self.groups.lock();
        for cmd in cmds {
            self.push_one(&mut groups, cmd);
        }
        self.cv.notify_all();
    }

    fn dequeue(&self, wait: bool) -> Option<Arc<dyn Command>> {
        let mut groups = self.groups.lock();
        loop {
            Self::prune_front(&mut groups);
            if let Some(front) = groups.front_mut() {
                let cmd = front.tasks.pop_front();
                Self::prune_front(&mut groups);
                return cmd;
            }
            if !wait {
                return None;
            }
            self.cv.wait(&mut groups);
        }
    }

    fn notify_all(&self) {
        self.cv.notify_all();
    }

    fn notify_one(&self) {
        self.cv.notify_one();
    }

    fn ready(&self) -> bool {
        let mut groups = self.groups.lock();
        Self::prune_front(&mut groups);
        !groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkworker_domain::value_objects::RangeValidator;

    struct Tagged {
        chunk: Option<ChunkId>,
        sticky: bool,
        id: u32,
    }
    impl Command for Tagged {
        fn run(&self) {}
        fn chunk_id(&self) -> Option<&ChunkId> {
            self.chunk.as_ref()
        }
        fn sticky_group(&self) -> bool {
            self.sticky
        }
    }

    fn chunk(v: &Arc<RangeValidator>, value: u32) -> ChunkId {
        ChunkId::make(value, v.clone()).unwrap()
    }

    #[test]
    fn same_chunk_tasks_form_contiguous_group() {
        let lane = GroupLane::new(10);
        let v = RangeValidator::new(0, 100);
        lane.enqueue(Arc::new(Tagged { chunk: Some(chunk(&v, 1)), sticky: false, id: 1 }));
        lane.enqueue(Arc::new(Tagged { chunk: Some(chunk(&v, 1)), sticky: false, id: 2 }));
        lane.enqueue(Arc::new(Tagged { chunk: Some(chunk(&v, 2)), sticky: false, id: 3 }));

        let first = lane.dequeue(false).unwrap();
        let first_chunk = first.chunk_id().unwrap().value();
        // Grouping guarantee: whichever chunk came out first, the chunk-2
        // task cannot be dequeued before the other chunk-1 task.
        let second = lane.dequeue(false).unwrap();
        assert_eq!(first_chunk, second.chunk_id().unwrap().value());
        let third = lane.dequeue(false).unwrap();
        assert_eq!(third.chunk_id().unwrap().value(), 2);
    }

    #[test]
    fn max_group_size_opens_new_group() {
        let lane = GroupLane::new(1);
        let v = RangeValidator::new(0, 100);
        lane.enqueue(Arc::new(Tagged { chunk: Some(chunk(&v, 1)), sticky: false, id: 1 }));
        lane.enqueue(Arc::new(Tagged { chunk: Some(chunk(&v, 1)), sticky: false, id: 2 }));
        // max_group_size=1 forces a second group even though the chunk
        // matches; both still dequeue, group discarded once drained.
        assert!(lane.dequeue(false).is_some());
        assert!(lane.dequeue(false).is_some());
        assert!(lane.dequeue(false).is_none());
    }

    #[test]
    fn sticky_group_joins_regardless_of_chunk() {
        let lane = GroupLane::new(10);
        let v = RangeValidator::new(0, 100);
        lane.enqueue(Arc::new(Tagged { chunk: Some(chunk(&v, 1)), sticky: false, id: 1 }));
        lane.enqueue(Arc::new(Tagged { chunk: Some(chunk(&v, 99)), sticky: true, id: 2 }));
        assert!(lane.ready());
        assert!(lane.dequeue(false).is_some());
        assert!(lane.dequeue(false).is_some());
    }

    #[test]
    fn empty_group_is_discarded() {
        let lane = GroupLane::new(10);
        let v = RangeValidator::new(0, 100);
        lane.enqueue(Arc::new(Tagged { chunk: Some(chunk(&v, 1)), sticky: false, id: 1 }));
        lane.dequeue(false);
        assert!(!lane.ready());
        assert!(lane.dequeue(false).is_none());
    }
}
