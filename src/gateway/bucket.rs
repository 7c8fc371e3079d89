//! Bucket - one shard of the session registry.
//!
//! Sessions are spread over buckets by hashing their id. Each bucket owns a
//! bounded job queue drained by a fixed pool of worker tasks that carry out
//! broadcasts, so a broadcast never blocks the caller.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::foundation::{DomainError, Envelope};

use super::Session;

/// Work item executed by bucket workers.
#[derive(Debug, Clone)]
pub enum Job {
    /// Deliver to every session of this bucket.
    PushAll(Envelope),
}

/// One registry shard.
pub struct Bucket {
    id: usize,
    sessions: DashMap<String, Arc<Session>>,
    jobs: mpsc::Sender<Job>,
    job_rx: Arc<Mutex<mpsc::Receiver<Job>>>,
}

impl Bucket {
    /// Creates an empty bucket whose job queue holds `job_capacity` jobs.
    pub fn new(id: usize, job_capacity: usize) -> Self {
        let (jobs, job_rx) = mpsc::channel(job_capacity.max(1));
        Self {
            id,
            sessions: DashMap::new(),
            jobs,
            job_rx: Arc::new(Mutex::new(job_rx)),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Registers a session. Returns false if the id was already present,
    /// in which case the previous entry is replaced.
    pub fn add_session(&self, session: Arc<Session>) -> bool {
        let session_id = session.id().to_string();
        let inserted = self.sessions.insert(session_id.clone(), session).is_none();
        tracing::info!(session_id = %session_id, bucket_id = self.id, "Session added to bucket");
        inserted
    }

    /// Removes `session` if it is still the entry registered under its id.
    ///
    /// A session that was replaced by a newer one with the same id leaves the
    /// newer entry untouched.
    pub fn delete_session(&self, session: &Session) -> Option<Arc<Session>> {
        let removed = self
            .sessions
            .remove_if(session.id(), |_, registered| {
                std::ptr::eq(registered.as_ref(), session)
            })
            .map(|(_, session)| session);
        if removed.is_some() {
            tracing::info!(session_id = %session.id(), bucket_id = self.id, "Session deleted from bucket");
        }
        removed
    }

    pub fn session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    /// Delivers to one session. An unknown session is not an error.
    pub fn push(&self, session_id: &str, envelope: Envelope) -> Result<(), DomainError> {
        match self.session(session_id) {
            Some(session) => session.send_envelope(envelope),
            None => {
                tracing::debug!(session_id = %session_id, bucket_id = self.id, "Push target not found");
                Ok(())
            }
        }
    }

    /// Delivers to every session of this bucket, skipping ones that closed.
    pub fn push_all(&self, envelope: &Envelope) {
        // Snapshot first so no shard lock is held while delivering.
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for session in sessions {
            if let Err(e) = session.send_envelope(envelope.clone()) {
                tracing::debug!(session_id = %session.id(), error = %e, "Broadcast skipped session");
            }
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Queues a job for the workers. Returns false if the queue is full.
    pub fn enqueue(&self, job: Job) -> bool {
        match self.jobs.try_send(job) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(bucket_id = self.id, error = %e, "Bucket job queue rejected job");
                false
            }
        }
    }

    /// Spawns `worker_count` workers draining the job queue until `cancel` fires.
    pub fn start_workers(
        self: &Arc<Self>,
        worker_count: usize,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        (0..worker_count.max(1))
            .map(|_| {
                let bucket = Arc::clone(self);
                let cancel = cancel.clone();
                tokio::spawn(async move { bucket.run_worker(cancel).await })
            })
            .collect()
    }

    async fn run_worker(&self, cancel: CancellationToken) {
        loop {
            let job = {
                let mut rx = self.job_rx.lock().await;
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    job = rx.recv() => job,
                }
            };

            match job {
                Some(Job::PushAll(envelope)) => self.push_all(&envelope),
                None => return,
            }
        }
    }
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("id", &self.id)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
