use crate::assert_invariant;
use crate::signal::IceCandidate;
use std::collections::VecDeque;

/// Remote ICE candidates that arrived before the remote description.
///
/// Filled while the description is missing, drained exactly once right after
/// it is accepted, and never used again for the rest of the call.
#[derive(Debug, Default)]
pub struct CandidateQueue {
    pending: VecDeque<IceCandidate>,
    flushed: bool,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: IceCandidate) {
        assert_invariant!(
            !self.flushed,
            "Candidates are never queued after the queue was flushed",
            "call::queue"
        );
        self.pending.push_back(candidate);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    /// Take every queued candidate in arrival order.
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        assert_invariant!(
            !self.flushed,
            "The candidate queue is flushed at most once",
            "call::queue"
        );
        self.flushed = true;
        self.pending.drain(..).collect()
    }
}
