//! Chunk loading pipeline
//!
//! Requests are queued on the main thread, loaded or generated on a rayon
//! pool, and handed back over a channel. Nothing here touches the live grid:
//! the world drains [`ChunkLoader::take_ready`] and merges on its own thread.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, channel};

use ahash::{AHashMap, AHashSet};
use glam::IVec2;
use rayon::ThreadPoolBuilder;
use thiserror::Error;

use super::chunk::Chunk;
use super::context::WorldContext;

/// Generation attempts per chunk before the loader gives up on it
pub const MAX_LOAD_ATTEMPTS: u32 = 3;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoaderError {
    #[error("chunk {0} already has a load in flight")]
    AlreadyPending(IVec2),

    #[error("generating chunk {chunk} failed: {reason}")]
    Generation { chunk: IVec2, reason: String },

    #[error("chunk {0} gave up after repeated load failures")]
    GaveUp(IVec2),
}

/// Lifecycle of one chunk coordinate in the loader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Requested,
    Generating,
    ReadyToMerge,
    Merged,
    /// Out of attempts; new requests are refused until forgotten
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadRequest {
    pub pos: IVec2,
    /// Let the chunk advance past phase 0
    pub populate: bool,
    /// Copy the chunk onto the live grid when merged
    pub render: bool,
    /// Failed attempts so far
    pub attempts: u32,
}

impl LoadRequest {
    pub fn new(chunk_x: i32, chunk_y: i32, populate: bool, render: bool) -> Self {
        Self {
            pos: IVec2::new(chunk_x, chunk_y),
            populate,
            render,
            attempts: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkSource {
    /// Already resident in the chunk store
    Cache,
    Disk,
    Generated,
}

/// A chunk waiting for the main thread to merge it
#[derive(Debug)]
pub struct ReadyChunk {
    pub request: LoadRequest,
    /// None for cache hits (the chunk is already in the store)
    pub chunk: Option<Chunk>,
    pub source: ChunkSource,
}

struct Completion {
    request: LoadRequest,
    result: Result<(Chunk, ChunkSource), LoaderError>,
}

pub struct ChunkLoader {
    pool: rayon::ThreadPool,
    sender: Sender<Completion>,
    receiver: Receiver<Completion>,

    requests: VecDeque<LoadRequest>,
    states: AHashMap<IVec2, LoadState>,
    ready: VecDeque<ReadyChunk>,
    in_flight: usize,
}

impl ChunkLoader {
    /// Create a loader with `threads` workers (0 = one per core)
    pub fn new(threads: usize) -> anyhow::Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("chunk-gen-{}", i))
            .build()?;
        log::info!(
            "Created chunk generation pool with {} threads",
            pool.current_num_threads()
        );

        let (sender, receiver) = channel();
        Ok(Self {
            pool,
            sender,
            receiver,
            requests: VecDeque::new(),
            states: AHashMap::new(),
            ready: VecDeque::new(),
            in_flight: 0,
        })
    }

    pub fn state(&self, pos: IVec2) -> Option<LoadState> {
        self.states.get(&pos).copied()
    }

    /// Requested, generating or waiting to merge
    pub fn is_pending(&self, pos: IVec2) -> bool {
        self.state(pos).is_some_and(is_pending_state)
    }

    pub fn pending_coords(&self) -> AHashSet<IVec2> {
        self.states
            .iter()
            .filter(|(_, s)| is_pending_state(**s))
            .map(|(pos, _)| *pos)
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.states.values().filter(|s| is_pending_state(**s)).count()
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    /// Queue a chunk for loading on the pool
    pub fn request(&mut self, request: LoadRequest) -> Result<(), LoaderError> {
        if self.is_pending(request.pos) {
            return Err(LoaderError::AlreadyPending(request.pos));
        }
        if self.state(request.pos) == Some(LoadState::Failed) {
            return Err(LoaderError::GaveUp(request.pos));
        }
        self.states.insert(request.pos, LoadState::Requested);
        self.requests.push_back(request);
        log::trace!("[LOAD] Queued chunk {}", request.pos);
        Ok(())
    }

    /// Queue a chunk that is already resident; it skips the pool entirely
    pub fn request_cached(&mut self, request: LoadRequest) -> Result<(), LoaderError> {
        if self.is_pending(request.pos) {
            return Err(LoaderError::AlreadyPending(request.pos));
        }
        self.states.insert(request.pos, LoadState::ReadyToMerge);
        self.ready.push_back(ReadyChunk {
            request,
            chunk: None,
            source: ChunkSource::Cache,
        });
        Ok(())
    }

    /// Launch one task per queued request
    pub fn dispatch(&mut self, ctx: &Arc<WorldContext>) -> usize {
        let mut launched = 0;
        while let Some(request) = self.requests.pop_front() {
            self.states.insert(request.pos, LoadState::Generating);
            self.in_flight += 1;
            launched += 1;

            let ctx = Arc::clone(ctx);
            let sender = self.sender.clone();
            self.pool.spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| load_or_generate(&ctx, request.pos)))
                    .unwrap_or_else(|_| {
                        Err(LoaderError::Generation {
                            chunk: request.pos,
                            reason: "worker panicked".to_string(),
                        })
                    });
                if sender.send(Completion { request, result }).is_err() {
                    log::trace!("[LOAD] Loader dropped before chunk {} finished", request.pos);
                }
            });
        }
        launched
    }

    /// Move finished tasks into the ready queue without blocking
    pub fn collect(&mut self) -> usize {
        let mut collected = 0;
        while let Ok(completion) = self.receiver.try_recv() {
            self.complete(completion);
            collected += 1;
        }
        collected
    }

    /// Wait until every launched task has reported back
    pub fn collect_blocking(&mut self) -> usize {
        let mut collected = 0;
        while self.in_flight > 0 {
            let Ok(completion) = self.receiver.recv() else {
                break;
            };
            self.complete(completion);
            collected += 1;
        }
        collected
    }

    fn complete(&mut self, completion: Completion) {
        self.in_flight = self.in_flight.saturating_sub(1);
        let Completion { mut request, result } = completion;
        match result {
            Ok((chunk, source)) => {
                self.states.insert(request.pos, LoadState::ReadyToMerge);
                self.ready.push_back(ReadyChunk {
                    request,
                    chunk: Some(chunk),
                    source,
                });
            }
            Err(e) => {
                request.attempts += 1;
                if request.attempts >= MAX_LOAD_ATTEMPTS {
                    log::error!("[LOAD] {}, giving up after {} attempts", e, request.attempts);
                    self.states.insert(request.pos, LoadState::Failed);
                    return;
                }
                log::warn!("[LOAD] {}, retrying (attempt {})", e, request.attempts + 1);
                self.states.insert(request.pos, LoadState::Requested);
                self.requests.push_back(request);
            }
        }
    }

    /// Hand up to `max` finished chunks to the caller, which must merge them
    pub fn take_ready(&mut self, max: usize) -> Vec<ReadyChunk> {
        let count = max.min(self.ready.len());
        let taken: Vec<ReadyChunk> = self.ready.drain(..count).collect();
        for ready in &taken {
            self.states.insert(ready.request.pos, LoadState::Merged);
        }
        taken
    }

    /// Stop tracking a merged or failed coordinate
    pub fn forget(&mut self, pos: IVec2) {
        if matches!(self.state(pos), Some(LoadState::Merged | LoadState::Failed)) {
            self.states.remove(&pos);
        }
    }
}

fn is_pending_state(state: LoadState) -> bool {
    !matches!(state, LoadState::Merged | LoadState::Failed)
}

/// Read a saved chunk or generate it (plus phase 0), saving fresh chunks
fn load_or_generate(ctx: &WorldContext, pos: IVec2) -> Result<(Chunk, ChunkSource), LoaderError> {
    if let Some(persistence) = &ctx.persistence
        && persistence.has_chunk(pos.x, pos.y)
    {
        match persistence.read_chunk(pos.x, pos.y) {
            Ok(chunk) => return Ok((chunk, ChunkSource::Disk)),
            Err(e) => {
                log::warn!("[LOAD] Failed to load chunk {}: {:#}, regenerating", pos, e);
            }
        }
    }

    let chunk = ctx
        .generator
        .generate_populated(&ctx.materials, pos.x, pos.y)
        .map_err(|e| LoaderError::Generation {
            chunk: pos,
            reason: e.to_string(),
        })?;

    if let Some(persistence) = &ctx.persistence
        && let Err(e) = persistence.write_chunk(&chunk)
    {
        log::warn!("[SAVE] Failed to save generated chunk {}: {:#}", pos, e);
    }
    Ok((chunk, ChunkSource::Generated))
}
