//! Bounded worker pool for argon2 password hashing.
//!
//! Each worker is a dedicated OS thread with its own request channel, so a
//! burst of hashing never occupies the async runtime. At most `max` requests
//! run at once; further callers wait in [`PasswordHashPool::acquire`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::{rngs::OsRng, RngCore};
use tokio::sync::{oneshot, watch, OwnedSemaphorePermit, Semaphore};

use crate::config::GateConfig;
use crate::error::{GateError, GateResult};

/// KDF cost parameters shared by every worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashParams {
    pub memory_limit_bytes: u32,
    pub operations_limit: u32,
}

impl HashParams {
    pub fn from_config(config: &GateConfig) -> Self {
        Self {
            memory_limit_bytes: config.password_check_memory_limit_bytes,
            operations_limit: config.password_check_operations_limit,
        }
    }

    fn argon2(&self) -> GateResult<Argon2<'static>> {
        let params = Params::new(self.memory_limit_bytes / 1024, self.operations_limit, 1, None)
            .map_err(|e| GateError::internal(format!("invalid password hashing parameters: {}", e)))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Hash a password into a self-describing PHC string. Blocks the calling thread.
pub fn hash_password_blocking(params: &HashParams, password: &str) -> GateResult<String> {
    let mut salt = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut salt)
        .map_err(|e| GateError::internal_from("failed to generate password salt", e))?;
    let salt = SaltString::encode_b64(&salt)
        .map_err(|e| GateError::internal(format!("failed to encode password salt: {}", e)))?;

    let hash = params
        .argon2()?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| GateError::internal(format!("password hashing failed: {}", e)))?;
    Ok(hash.to_string())
}

/// Check a password against a PHC string. The record carries its own cost
/// parameters, so no configuration is needed here.
pub fn verify_password_blocking(password: &str, record: &str) -> GateResult<bool> {
    let parsed = PasswordHash::new(record)
        .map_err(|e| GateError::internal(format!("invalid password hash record: {}", e)))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(GateError::internal(format!("password verification failed: {}", e))),
    }
}

#[derive(Debug)]
enum HashOp {
    Hash { password: String },
    Verify { password: String, record: String },
    #[cfg(test)]
    Crash,
}

#[derive(Debug)]
enum HashOutput {
    Hashed(String),
    Verified(bool),
}

struct HashRequest {
    id: u64,
    op: HashOp,
    reply: oneshot::Sender<HashResponse>,
}

struct HashResponse {
    id: u64,
    result: GateResult<HashOutput>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Busy,
    Terminated,
}

struct Worker {
    id: u64,
    sender: mpsc::Sender<HashRequest>,
    handle: Option<JoinHandle<()>>,
    state: WorkerState,
    alive: bool,
}

impl Worker {
    fn spawn(id: u64, params: HashParams) -> GateResult<Self> {
        let (sender, receiver) = mpsc::channel::<HashRequest>();
        let handle = std::thread::Builder::new()
            .name(format!("password-hash-{}", id))
            .spawn(move || worker_loop(params, receiver))
            .map_err(|e| GateError::internal_from("failed to spawn password hash worker", e))?;

        tracing::debug!("Spawned password hash worker {}", id);
        Ok(Self {
            id,
            sender,
            handle: Some(handle),
            state: WorkerState::Idle,
            alive: true,
        })
    }

    /// Close the request channel; the thread exits once its queue is empty
    fn terminate(self) -> Option<JoinHandle<()>> {
        let Worker { id, sender, handle, .. } = self;
        drop(sender);
        tracing::debug!("Terminated password hash worker {}", id);
        handle
    }
}

fn worker_loop(params: HashParams, receiver: mpsc::Receiver<HashRequest>) {
    while let Ok(request) = receiver.recv() {
        let result = match request.op {
            HashOp::Hash { password } => hash_password_blocking(&params, &password).map(HashOutput::Hashed),
            HashOp::Verify { password, record } => {
                verify_password_blocking(&password, &record).map(HashOutput::Verified)
            }
            #[cfg(test)]
            HashOp::Crash => panic!("password hash worker crashed on request"),
        };
        // caller may have gone away; nothing to do then
        let _ = request.reply.send(HashResponse { id: request.id, result });
    }
}

#[derive(Default)]
struct PoolState {
    idle: Vec<Worker>,
    total: usize,
    busy: usize,
}

struct PoolInner {
    params: HashParams,
    min: usize,
    max: usize,
    permits: Arc<Semaphore>,
    state: Mutex<PoolState>,
    busy_tx: watch::Sender<usize>,
    next_worker_id: AtomicU64,
    next_request_id: AtomicU64,
    shut_down: AtomicBool,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_worker(&self) -> GateResult<Worker> {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        Worker::spawn(id, self.params)
    }

    fn release(&self, mut worker: Worker) {
        let mut state = self.lock();
        state.busy -= 1;

        if worker.alive {
            worker.state = WorkerState::Idle;
            state.idle.push(worker);
        } else {
            state.total -= 1;
            tracing::error!(
                "Password hash worker {} terminated unexpectedly, {} of {} workers left",
                worker.id,
                state.total,
                self.max
            );
            drop(worker.terminate());

            if !self.shut_down.load(Ordering::SeqCst) && state.total < self.max {
                match self.spawn_worker() {
                    Ok(replacement) => {
                        tracing::info!("Replaced crashed password hash worker with worker {}", replacement.id);
                        state.total += 1;
                        state.idle.push(replacement);
                    }
                    Err(e) => tracing::error!("Failed to replace password hash worker: {}", e),
                }
            }
        }

        self.busy_tx.send_replace(state.busy);
    }
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub total: usize,
    pub idle: usize,
    pub busy: usize,
    pub is_shut_down: bool,
}

/// Bounded pool of password hashing workers
#[derive(Clone)]
pub struct PasswordHashPool {
    inner: Arc<PoolInner>,
}

impl PasswordHashPool {
    /// Create the pool and warm it up to the configured minimum
    pub fn start(config: &GateConfig) -> GateResult<Self> {
        config.validate()?;

        let min = config.effective_worker_minimum();
        let max = config.password_hash_worker_amount_maximum;
        let (busy_tx, _) = watch::channel(0usize);

        let inner = Arc::new(PoolInner {
            params: HashParams::from_config(config),
            min,
            max,
            permits: Arc::new(Semaphore::new(max)),
            state: Mutex::new(PoolState::default()),
            busy_tx,
            next_worker_id: AtomicU64::new(1),
            next_request_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        });

        {
            let mut state = inner.lock();
            for _ in 0..min {
                let worker = inner.spawn_worker()?;
                state.idle.push(worker);
                state.total += 1;
            }
        }

        tracing::info!("Password hash pool started with {} workers (max {})", min, max);
        Ok(Self { inner })
    }

    pub fn min_workers(&self) -> usize {
        self.inner.min
    }

    pub fn max_workers(&self) -> usize {
        self.inner.max
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.inner.lock();
        PoolStatus {
            total: state.total,
            idle: state.idle.len(),
            busy: state.busy,
            is_shut_down: self.inner.shut_down.load(Ordering::SeqCst),
        }
    }

    /// Wait for an idle worker and take it exclusively.
    ///
    /// Fails once the pool is shut down, including for callers that were
    /// already waiting.
    pub async fn acquire(&self) -> GateResult<PooledWorker> {
        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| pool_shut_down())?;

        let mut state = self.inner.lock();
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(pool_shut_down());
        }

        let mut worker = match state.idle.pop() {
            Some(worker) => worker,
            None => {
                let worker = self.inner.spawn_worker()?;
                state.total += 1;
                worker
            }
        };
        worker.state = WorkerState::Busy;
        state.busy += 1;
        self.inner.busy_tx.send_replace(state.busy);

        Ok(PooledWorker {
            pool: self.inner.clone(),
            worker: Some(worker),
            _permit: permit,
        })
    }

    /// Hash a password on a pooled worker
    pub async fn hash_password(&self, password: &str) -> GateResult<String> {
        let mut worker = self.acquire().await?;
        worker.hash(password).await
    }

    /// Check a password against a record produced by [`Self::hash_password`]
    pub async fn is_password_correct(&self, password: &str, record: &str) -> GateResult<bool> {
        let mut worker = self.acquire().await?;
        worker.verify(password, record).await
    }

    /// Stop accepting work, drain in-flight requests and terminate every
    /// worker. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        // Flip the flag under the state lock: every acquire that got past its
        // check has already counted itself as busy.
        {
            let _state = self.inner.lock();
            if self.inner.shut_down.swap(true, Ordering::SeqCst) {
                return;
            }
        }
        self.inner.permits.close();

        let mut busy = self.inner.busy_tx.subscribe();
        let _ = busy.wait_for(|count| *count == 0).await;

        let workers: Vec<Worker> = {
            let mut state = self.inner.lock();
            let drained: Vec<Worker> = state.idle.drain(..).collect();
            state.total -= drained.len();
            drained
        };

        let count = workers.len();
        let handles: Vec<JoinHandle<()>> = workers
            .into_iter()
            .filter_map(|mut worker| {
                worker.state = WorkerState::Terminated;
                worker.terminate()
            })
            .collect();

        let joined = tokio::task::spawn_blocking(move || {
            for handle in handles {
                let _ = handle.join();
            }
        })
        .await;
        if let Err(e) = joined {
            tracing::error!("Failed to join password hash workers: {}", e);
        }

        tracing::info!("Password hash pool shut down, {} workers terminated", count);
    }
}

fn pool_shut_down() -> GateError {
    GateError::internal("password hash pool is shut down")
}

/// Exclusive handle on one worker; returns it to the pool on drop
pub struct PooledWorker {
    pool: Arc<PoolInner>,
    worker: Option<Worker>,
    _permit: OwnedSemaphorePermit,
}

impl PooledWorker {
    pub fn id(&self) -> u64 {
        self.worker.as_ref().map(|w| w.id).unwrap_or_default()
    }

    pub fn state(&self) -> WorkerState {
        self.worker
            .as_ref()
            .map(|w| w.state)
            .unwrap_or(WorkerState::Terminated)
    }

    pub async fn hash(&mut self, password: &str) -> GateResult<String> {
        match self.request(HashOp::Hash { password: password.to_string() }).await? {
            HashOutput::Hashed(record) => Ok(record),
            other => Err(unexpected_output(other)),
        }
    }

    pub async fn verify(&mut self, password: &str, record: &str) -> GateResult<bool> {
        let op = HashOp::Verify {
            password: password.to_string(),
            record: record.to_string(),
        };
        match self.request(op).await? {
            HashOutput::Verified(ok) => Ok(ok),
            other => Err(unexpected_output(other)),
        }
    }

    async fn request(&mut self, op: HashOp) -> GateResult<HashOutput> {
        let worker = self
            .worker
            .as_mut()
            .ok_or_else(|| GateError::internal("password hash worker already released"))?;
        if !worker.alive {
            return Err(GateError::internal(format!(
                "password hash worker {} is no longer running",
                worker.id
            )));
        }

        let id = self.pool.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (reply, response) = oneshot::channel();

        if worker.sender.send(HashRequest { id, op, reply }).is_err() {
            worker.alive = false;
            return Err(GateError::internal(format!(
                "password hash worker {} is no longer running",
                worker.id
            )));
        }

        let response = match response.await {
            Ok(response) => response,
            Err(_) => {
                worker.alive = false;
                return Err(GateError::internal(format!(
                    "password hash worker {} terminated unexpectedly",
                    worker.id
                )));
            }
        };

        if response.id != id {
            worker.alive = false;
            return Err(GateError::internal(format!(
                "password hash worker {} answered request {} while {} was pending",
                worker.id, response.id, id
            )));
        }
        response.result
    }

    #[cfg(test)]
    async fn crash(&mut self) -> GateResult<HashOutput> {
        self.request(HashOp::Crash).await
    }
}

impl Drop for PooledWorker {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.pool.release(worker);
        }
    }
}

fn unexpected_output(output: HashOutput) -> GateError {
    GateError::internal(format!("unexpected password hash worker output: {:?}", output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config(min: usize, max: usize) -> GateConfig {
        GateConfig {
            password_check_memory_limit_bytes: crate::config::MIN_PASSWORD_MEMORY_LIMIT_BYTES,
            password_check_operations_limit: 1,
            password_hash_worker_amount_minimum: min,
            password_hash_worker_amount_maximum: max,
            ..GateConfig::default()
        }
    }

    #[tokio::test]
    async fn test_hash_and_verify() {
        let pool = PasswordHashPool::start(&test_config(1, 1)).unwrap();

        let record = pool.hash_password("test").await.unwrap();
        assert!(record.starts_with("$argon2id$"));
        assert!(pool.is_password_correct("test", &record).await.unwrap());
        assert!(!pool.is_password_correct("test1", &record).await.unwrap());

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_record_fails_only_that_call() {
        let pool = PasswordHashPool::start(&test_config(1, 1)).unwrap();

        let err = pool.is_password_correct("test", "not-a-hash").await.unwrap_err();
        assert_eq!(err.code(), "INTERNAL_SERVER_ERROR");

        let record = pool.hash_password("still works").await.unwrap();
        assert!(pool.is_password_correct("still works", &record).await.unwrap());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_pool_warms_to_minimum() {
        let pool = PasswordHashPool::start(&test_config(2, 3)).unwrap();
        let status = pool.status();
        assert_eq!(status.total, 2);
        assert_eq!(status.idle, 2);
        assert_eq!(status.busy, 0);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_busy_workers_never_exceed_maximum() {
        let pool = PasswordHashPool::start(&test_config(1, 2)).unwrap();

        let first = pool.acquire().await.unwrap();
        let second = pool.acquire().await.unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(first.state(), WorkerState::Busy);
        assert_eq!(pool.status().busy, 2);
        assert_eq!(pool.status().total, 2);

        // third caller has to wait
        let waiting = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(waiting.is_err());

        drop(first);
        let third = tokio::time::timeout(Duration::from_secs(5), pool.acquire())
            .await
            .expect("released worker is handed out")
            .unwrap();
        assert_eq!(pool.status().total, 2);

        drop(second);
        drop(third);
        assert_eq!(pool.status().idle, 2);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_acquire_after_shutdown_fails() {
        let pool = PasswordHashPool::start(&test_config(1, 1)).unwrap();
        pool.shutdown().await;

        let status = pool.status();
        assert!(status.is_shut_down);
        assert_eq!(status.total, 0);

        let result = tokio::time::timeout(Duration::from_secs(1), pool.acquire())
            .await
            .expect("acquire must not hang after shutdown");
        assert!(result.is_err());
        assert!(pool.hash_password("x").await.is_err());

        // second shutdown is a no-op
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_in_flight_work() {
        let pool = PasswordHashPool::start(&test_config(1, 1)).unwrap();
        let worker = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let shutdown = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.shutdown().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // queued caller is rejected, shutdown still waits on the busy worker
        assert!(waiter.await.unwrap().is_err());
        assert!(!shutdown.is_finished());

        drop(worker);
        tokio::time::timeout(Duration::from_secs(5), shutdown)
            .await
            .expect("shutdown completes after drain")
            .unwrap();
        assert_eq!(pool.status().total, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shutdown_racing_acquire_terminates_every_worker() {
        for _ in 0..50 {
            let pool = PasswordHashPool::start(&test_config(0, 2)).unwrap();

            let callers: Vec<_> = (0..4)
                .map(|_| {
                    let pool = pool.clone();
                    tokio::spawn(async move {
                        if let Ok(worker) = pool.acquire().await {
                            tokio::task::yield_now().await;
                            drop(worker);
                        }
                    })
                })
                .collect();
            let shutdown = {
                let pool = pool.clone();
                tokio::spawn(async move { pool.shutdown().await })
            };

            for caller in callers {
                caller.await.unwrap();
            }
            shutdown.await.unwrap();

            let status = pool.status();
            assert_eq!(status.total, 0);
            assert_eq!(status.idle, 0);
            assert_eq!(status.busy, 0);
        }
    }

    #[tokio::test]
    async fn test_crashed_worker_is_replaced() {
        let pool = PasswordHashPool::start(&test_config(1, 1)).unwrap();

        let mut worker = pool.acquire().await.unwrap();
        let crashed_id = worker.id();
        let err = worker.crash().await.unwrap_err();
        assert!(err.message.contains("terminated unexpectedly"));
        drop(worker);

        let status = pool.status();
        assert_eq!(status.total, 1);
        assert_eq!(status.idle, 1);

        let worker = pool.acquire().await.unwrap();
        assert_ne!(worker.id(), crashed_id);
        drop(worker);

        let record = pool.hash_password("after crash").await.unwrap();
        assert!(pool.is_password_correct("after crash", &record).await.unwrap());
        pool.shutdown().await;
    }
}
