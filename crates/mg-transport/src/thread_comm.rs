use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::error::TransportError;
use crate::group::Rank;
use crate::transport::{Communicator, Completion, Purpose, RequestId};

/// A single posted sub-message in flight between two ranks.
struct Envelope {
    from: Rank,
    purpose: Purpose,
    payload: Vec<u8>,
}

enum RequestRecord {
    SendDone,
    RecvWaiting { src: Rank, purpose: Purpose, max_len: usize },
    RecvDone(Vec<u8>),
}

#[derive(Default)]
struct State {
    /// Envelopes that arrived before anyone posted a matching `irecv`.
    pending: HashMap<(Rank, Purpose), VecDeque<Vec<u8>>>,
    requests: HashMap<u64, RequestRecord>,
}

struct GatherState {
    slots: Vec<Option<Vec<u8>>>,
    arrived: usize,
}

/// Thread-per-rank stand-in for a real MPI communicator, used to exercise
/// the schedulers in-process. Every participant runs on its own OS thread
/// and only ever touches its own [`ThreadCommunicator`] handle; cross-rank
/// traffic flows over bounded-free `crossbeam` channels, one inbox per rank
/// (mirrors the `PacketQueue` shape in `net_queue.rs`, a producer/consumer
/// channel decoupling a peer's arrivals from when this participant gets
/// around to waiting on them).
pub struct ThreadCommunicator {
    rank: Rank,
    size: usize,
    outboxes: Vec<Sender<Envelope>>,
    inbox: Receiver<Envelope>,
    state: Arc<(Mutex<State>, Condvar)>,
    gather: Arc<(Mutex<GatherState>, Condvar)>,
    next_req: AtomicU64,
}

impl ThreadCommunicator {
    fn alloc_id(&self) -> u64 {
        self.next_req.fetch_add(1, Ordering::Relaxed)
    }

    /// Pull one more envelope off this rank's inbox (blocking) and file it
    /// either into a waiting request or into `pending` for a future irecv.
    fn drain_one_blocking(&self) {
        let envelope = self
            .inbox
            .recv()
            .expect("ThreadCommunicator: all peer senders dropped while a receive was pending");
        self.file_envelope(envelope);
    }

    fn file_envelope(&self, envelope: Envelope) {
        let (lock, cvar) = &*self.state;
        let mut state = lock.lock();
        let key = (envelope.from, envelope.purpose);
        let waiting_id = state.requests.iter().find_map(|(id, rec)| match rec {
            RequestRecord::RecvWaiting { src, purpose, .. }
                if *src == envelope.from && *purpose == envelope.purpose =>
            {
                Some(*id)
            }
            _ => None,
        });
        match waiting_id {
            Some(id) => {
                if let Some(RequestRecord::RecvWaiting { max_len, .. }) = state.requests.get(&id) {
                    if envelope.payload.len() > *max_len {
                        // Precondition violation: leave it recorded as an
                        // error payload length so `wait` can surface it.
                    }
                }
                state.requests.insert(id, RequestRecord::RecvDone(envelope.payload));
            }
            None => {
                state.pending.entry(key).or_default().push_back(envelope.payload);
            }
        }
        cvar.notify_all();
    }

    /// Try to make progress on `id` without blocking the whole rank.
    fn try_complete(&self, id: RequestId) -> bool {
        let (lock, _) = &*self.state;
        let state = lock.lock();
        matches!(
            state.requests.get(&id.0),
            Some(RequestRecord::SendDone) | Some(RequestRecord::RecvDone(_))
        )
    }

    fn take_completion(&self, id: RequestId) -> Completion {
        let (lock, _) = &*self.state;
        let mut state = lock.lock();
        match state.requests.remove(&id.0) {
            Some(RequestRecord::SendDone) => Completion::Sent,
            Some(RequestRecord::RecvDone(bytes)) => Completion::Received(bytes),
            other => {
                // Not complete yet; put it back untouched.
                if let Some(rec) = other {
                    state.requests.insert(id.0, rec);
                }
                panic!("take_completion called before request {} completed", id.0);
            }
        }
    }
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, dest: Rank, purpose: Purpose, data: Vec<u8>) -> RequestId {
        let id = self.alloc_id();
        log::trace!("rank {} isend {:?} ({} bytes) to rank {dest}", self.rank, purpose, data.len());
        self.outboxes[dest]
            .send(Envelope { from: self.rank, purpose, payload: data })
            .unwrap_or_else(|_| panic!("{}", TransportError::PeerUnreachable { rank: dest }));
        let (lock, cvar) = &*self.state;
        lock.lock().requests.insert(id, RequestRecord::SendDone);
        cvar.notify_all();
        RequestId(id)
    }

    fn irecv(&self, src: Rank, purpose: Purpose, max_len: usize) -> RequestId {
        log::trace!("rank {} irecv {:?} from rank {src}", self.rank, purpose);
        let id = self.alloc_id();
        let (lock, _) = &*self.state;
        let mut state = lock.lock();
        if let Some(queue) = state.pending.get_mut(&(src, purpose)) {
            if let Some(payload) = queue.pop_front() {
                if queue.is_empty() {
                    state.pending.remove(&(src, purpose));
                }
                state.requests.insert(id, RequestRecord::RecvDone(payload));
                return RequestId(id);
            }
        }
        state.requests.insert(id, RequestRecord::RecvWaiting { src, purpose, max_len });
        RequestId(id)
    }

    fn wait(&self, id: RequestId) -> Completion {
        while !self.try_complete(id) {
            self.drain_one_blocking();
        }
        self.take_completion(id)
    }

    fn wait_any(&self, ids: &[RequestId]) -> (usize, Completion) {
        assert!(!ids.is_empty(), "wait_any called with an empty request set");
        loop {
            if let Some((i, id)) = ids.iter().enumerate().find(|(_, id)| self.try_complete(**id)) {
                return (i, self.take_completion(id));
            }
            self.drain_one_blocking();
        }
    }

    fn wait_all(&self, ids: &[RequestId]) -> Vec<Completion> {
        let mut remaining: Vec<RequestId> = ids.to_vec();
        let mut out: HashMap<RequestId, Completion> = HashMap::new();
        while !remaining.is_empty() {
            let (i, completion) = self.wait_any(&remaining);
            out.insert(remaining.remove(i), completion);
        }
        ids.iter().map(|id| out.remove(id).expect("every id was completed")).collect()
    }

    fn test(&self, id: RequestId) -> Option<Completion> {
        // Drain whatever has already arrived without blocking.
        while let Ok(envelope) = self.inbox.try_recv() {
            self.file_envelope(envelope);
        }
        if self.try_complete(id) {
            Some(self.take_completion(id))
        } else {
            None
        }
    }

    fn gather_bytes(&self, root: Rank, data: Vec<u8>) -> Option<Vec<Vec<u8>>> {
        let (lock, cvar) = &*self.gather;
        let mut g = lock.lock();
        g.slots[self.rank] = Some(data);
        g.arrived += 1;
        if g.arrived == self.size {
            cvar.notify_all();
        } else {
            while g.arrived < self.size {
                cvar.wait(&mut g);
            }
        }
        if self.rank == root {
            Some(g.slots.iter().map(|s| s.clone().expect("every rank gathers")).collect())
        } else {
            None
        }
    }
}

/// Builds `n` [`ThreadCommunicator`]s wired to each other: rank `i`'s
/// outbox `j` feeds rank `j`'s inbox. Intended for tests and for driving
/// the schedulers without a real MPI binding.
pub fn make_thread_communicators(n: usize) -> Vec<ThreadCommunicator> {
    let (senders, receivers): (Vec<Sender<Envelope>>, Vec<Receiver<Envelope>>) =
        (0..n).map(|_| unbounded()).unzip();
    let gather = Arc::new((
        Mutex::new(GatherState { slots: vec![None; n], arrived: 0 }),
        Condvar::new(),
    ));
    receivers
        .into_iter()
        .enumerate()
        .map(|(rank, inbox)| ThreadCommunicator {
            rank,
            size: n,
            outboxes: senders.clone(),
            inbox,
            state: Arc::new((Mutex::new(State::default()), Condvar::new())),
            gather: gather.clone(),
            next_req: AtomicU64::new(0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn point_to_point_round_trip() {
        let mut comms = make_thread_communicators(2);
        let b = comms.pop().unwrap();
        let a = comms.pop().unwrap();

        let handle = thread::spawn(move || {
            let req = b.irecv(0, Purpose::Metadata, 16);
            let bytes = b.wait(req).into_bytes();
            assert_eq!(bytes, vec![1, 2, 3, 4]);
        });

        let send_req = a.isend(1, Purpose::Metadata, vec![1, 2, 3, 4]);
        a.wait(send_req);
        handle.join().unwrap();
    }

    #[test]
    fn wait_any_resolves_whichever_peer_answers_first() {
        let mut comms = make_thread_communicators(3);
        let c = comms.pop().unwrap();
        let b = comms.pop().unwrap();
        let a = comms.pop().unwrap();

        let jb = thread::spawn(move || {
            let req = b.isend(0, Purpose::Color, vec![9]);
            b.wait(req);
        });
        let jc = thread::spawn(move || {
            let req = c.isend(0, Purpose::Color, vec![8]);
            c.wait(req);
        });

        let r_b = a.irecv(1, Purpose::Color, 4);
        let r_c = a.irecv(2, Purpose::Color, 4);
        let (_, first) = a.wait_any(&[r_b, r_c]);
        assert!(matches!(first, Completion::Received(_)));
        let all = a.wait_all(&[r_b, r_c]);
        assert_eq!(all.len(), 2);

        jb.join().unwrap();
        jc.join().unwrap();
    }

    #[test]
    fn gather_concatenates_in_rank_order() {
        let comms = make_thread_communicators(3);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|c| {
                thread::spawn(move || {
                    let rank = c.rank();
                    c.gather_bytes(0, vec![rank as u8])
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results[0], Some(vec![vec![0], vec![1], vec![2]]));
        assert_eq!(results[1], None);
        assert_eq!(results[2], None);
    }
}
