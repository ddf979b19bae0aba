use crate::group::Rank;

/// What a logical sub-message of an image transfer is for. Matching on the
/// receive side is done by `(source rank, Purpose)`, which is enough to
/// disambiguate every sub-message an Image ever posts in a single round,
/// since within one round a given peer sends at most one bundle of each
/// kind to another given peer (see `mg-image::wire`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Purpose {
    Metadata,
    Color,
    Depth,
    Background,
    RunLengths,
    /// Scheduler-internal bookkeeping message, parameterized by the
    /// scheduler so unrelated schedulers can't collide on the same tag
    /// space (e.g. the "both halves" forwarding message in Binary-Swap's
    /// Remainder variant, or 2-3 Swap's per-child handoff).
    Scheduler(u32),
}

/// An opaque handle to a posted send or receive. Only meaningful for the
/// [`Communicator`] that issued it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(pub(crate) u64);

/// The outcome of a completed request.
#[derive(Debug)]
pub enum Completion {
    Sent,
    Received(Vec<u8>),
}

impl Completion {
    /// Unwraps a completed receive, panicking if this was a send completion.
    /// Schedulers only ever call this on a `RequestId` they posted via
    /// `irecv`, so the wrong variant here is a programming fault.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Completion::Received(bytes) => bytes,
            Completion::Sent => panic!("Completion::into_bytes called on a send completion"),
        }
    }
}

/// Non-blocking message-passing substrate. A single-threaded cooperative
/// actor: every method here either posts work and returns immediately, or
/// blocks the calling participant at an explicit wait point. There is no
/// concurrency *within* one participant.
pub trait Communicator: Send + Sync {
    /// This participant's own rank in the underlying communicator.
    fn rank(&self) -> Rank;
    /// Total number of participants in the underlying communicator.
    fn size(&self) -> usize;

    /// Post a non-blocking send of `data` to `dest`, tagged `purpose`.
    /// The caller must keep `data`'s origin (if borrowed elsewhere) alive
    /// until the returned request completes; here the primitive takes
    /// ownership of the bytes so that requirement is automatically met.
    fn isend(&self, dest: Rank, purpose: Purpose, data: Vec<u8>) -> RequestId;

    /// Post a non-blocking receive from `src`, tagged `purpose`, into a
    /// buffer pre-sized to at most `max_len` bytes.
    fn irecv(&self, src: Rank, purpose: Purpose, max_len: usize) -> RequestId;

    /// Block until `id` completes.
    fn wait(&self, id: RequestId) -> Completion;

    /// Block until at least one of `ids` completes; returns its index into
    /// `ids` along with the completion. Used for completion-driven blend
    /// ordering (§5 "Ordering guarantees").
    fn wait_any(&self, ids: &[RequestId]) -> (usize, Completion);

    /// Block until every one of `ids` has completed.
    fn wait_all(&self, ids: &[RequestId]) -> Vec<Completion>;

    /// Non-blocking poll: `Some` if `id` has already completed.
    fn test(&self, id: RequestId) -> Option<Completion>;

    /// Collective: every participant must call this. Concatenates each
    /// participant's `data` at `root`, ordered by rank; returns `None` on
    /// every non-root participant.
    fn gather_bytes(&self, root: Rank, data: Vec<u8>) -> Option<Vec<Vec<u8>>>;
}

/// A batch of outstanding requests a scheduler round is waiting on. `isend`
/// takes `data` by value (§5 "Resource policy"), so the request itself is
/// all a `RequestSet` needs to track; there's no separate buffer lifetime to
/// manage on this side of the call.
#[derive(Default)]
pub struct RequestSet {
    pub(crate) ids: Vec<RequestId>,
}

impl RequestSet {
    pub fn new() -> Self {
        RequestSet::default()
    }

    pub fn push(&mut self, id: RequestId) {
        self.ids.push(id);
    }

    pub fn ids(&self) -> &[RequestId] {
        &self.ids
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn wait_all(&mut self, comm: &dyn Communicator) {
        comm.wait_all(&self.ids);
        self.ids.clear();
    }
}
