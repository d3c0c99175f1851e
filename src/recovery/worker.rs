//! Timer-driven recovery loop

use super::{Clock, SystemClock, TransactionRecovery};
use crate::config::RecoveryConfig;
use crate::error::{TccError, TccResult};

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Uninitialized,
    Initialized,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
enum Pass {
    Start,
    Global,
    Branch,
}

impl Pass {
    fn label(&self) -> &'static str {
        match self {
            Pass::Start => "start",
            Pass::Global => "global",
            Pass::Branch => "branch",
        }
    }

    fn refusal(&self) -> &'static str {
        match self {
            Pass::Start => "Only the master node can perform the recovery initialization",
            Pass::Global => "Only the master node can perform the global recovery",
            Pass::Branch => "Only the branch owner can perform the branch recovery",
        }
    }
}

/// Long-lived background task re-driving incomplete transactions
pub struct RecoveryWorker {
    recovery: Arc<dyn TransactionRecovery>,
    clock: Arc<dyn Clock>,
    interval_ms: u64,
    delay_of_stopping_ms: u64,
    tick: Duration,
    initialized: AtomicBool,
    running: AtomicBool,
    stopped: AtomicBool,
    /// Stop deadline in epoch millis; 0 while no stop is armed.
    stop_at: AtomicU64,
    /// Epoch millis at which the next recovery passes are due.
    next_recovery_at: AtomicU64,
}

impl RecoveryWorker {
    /// Create a new recovery worker on the system clock
    pub fn new(recovery: Arc<dyn TransactionRecovery>, config: &RecoveryConfig) -> Self {
        Self::with_clock(recovery, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        recovery: Arc<dyn TransactionRecovery>,
        config: &RecoveryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            recovery,
            clock,
            interval_ms: config.interval_ms,
            delay_of_stopping_ms: config.delay_of_stopping_ms,
            tick: config.tick(),
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            stop_at: AtomicU64::new(0),
            next_recovery_at: AtomicU64::new(0),
        }
    }

    /// Main recovery loop; returns once the stop deadline has passed
    pub async fn run(&self) -> TccResult<()> {
        self.running.store(true, Ordering::SeqCst);
        info!(
            "Recovery worker started (interval {}ms, tick {:?})",
            self.interval_ms, self.tick
        );

        while self.current_active() {
            self.tick().await;
            tokio::time::sleep(self.tick).await;
        }

        self.running.store(false, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
        info!("Recovery worker stopped");
        Ok(())
    }

    /// One loop iteration. Returns true when the recovery passes fired.
    pub async fn tick(&self) -> bool {
        self.initialize_if_necessary().await;

        let now = self.clock.now_millis();
        if now < self.next_recovery_at.load(Ordering::SeqCst) {
            return false;
        }
        self.next_recovery_at
            .store(now + self.interval_ms, Ordering::SeqCst);

        self.fire(Pass::Global).await;
        self.fire(Pass::Branch).await;
        true
    }

    /// Run the start-up recovery until it succeeds once
    pub async fn initialize_if_necessary(&self) -> bool {
        if self.initialized.load(Ordering::SeqCst) {
            return true;
        }

        if !self.fire(Pass::Start).await {
            return false;
        }

        self.initialized.store(true, Ordering::SeqCst);
        info!("Recovery initialized");
        self.fire(Pass::Global).await;
        true
    }

    /// Arm the stop deadline. Only the first call counts.
    pub fn release(&self) {
        let deadline = self.clock.now_millis() + self.delay_of_stopping_ms;
        match self
            .stop_at
            .compare_exchange(0, deadline, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => info!(
                "Recovery worker stopping within {}ms",
                self.delay_of_stopping_ms
            ),
            Err(armed) => debug!("Recovery worker stop already armed for {}", armed),
        }
    }

    /// True until the armed stop deadline has elapsed
    pub fn current_active(&self) -> bool {
        let stop_at = self.stop_at.load(Ordering::SeqCst);
        stop_at == 0 || self.clock.now_millis() < stop_at
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> WorkerState {
        if self.stopped.load(Ordering::SeqCst) {
            WorkerState::Stopped
        } else if self.stop_at.load(Ordering::SeqCst) != 0 {
            WorkerState::Stopping
        } else if self.running.load(Ordering::SeqCst) {
            WorkerState::Running
        } else if self.is_initialized() {
            WorkerState::Initialized
        } else {
            WorkerState::Uninitialized
        }
    }

    async fn fire(&self, pass: Pass) -> bool {
        let result = match pass {
            Pass::Start => self.recovery.start_recovery().await,
            Pass::Global => self.recovery.timing_recover().await,
            Pass::Branch => self.recovery.branch_recover().await,
        };

        match result {
            Ok(()) => {
                crate::metrics::record_recovery_pass(pass.label(), "ok");
                true
            }
            Err(e) => {
                self.report(pass, &e);
                false
            }
        }
    }

    fn report(&self, pass: Pass, e: &TccError) -> &'static str {
        let outcome = if e.is_not_authorized() {
            debug!("{}: {}", pass.refusal(), e);
            "not_authorized"
        } else if e.is_retryable() {
            warn!(
                "Error occurred during {} recovery, retrying on the next pass: {}",
                pass.label(),
                e
            );
            "retryable"
        } else {
            error!("Error occurred during {} recovery: {}", pass.label(), e);
            "failed"
        };
        crate::metrics::record_recovery_pass(pass.label(), outcome);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::MockTransactionRecovery;
    use std::sync::atomic::AtomicUsize;

    struct ManualClock(AtomicU64);

    impl ManualClock {
        fn at(millis: u64) -> Arc<Self> {
            Arc::new(Self(AtomicU64::new(millis)))
        }

        fn advance(&self, millis: u64) {
            self.0.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct CountingRecovery {
        refuse_start: bool,
        starts: AtomicUsize,
        timing: AtomicUsize,
        branch: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TransactionRecovery for CountingRecovery {
        async fn start_recovery(&self) -> TccResult<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.refuse_start {
                return Err(TccError::not_authorized("start recovery"));
            }
            Ok(())
        }

        async fn timing_recover(&self) -> TccResult<()> {
            self.timing.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn branch_recover(&self) -> TccResult<()> {
            self.branch.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config() -> RecoveryConfig {
        RecoveryConfig::default()
    }

    #[tokio::test]
    async fn test_fires_once_per_interval() {
        let clock = ManualClock::at(1_000_000);
        let recovery = Arc::new(CountingRecovery::default());
        let worker = RecoveryWorker::with_clock(recovery.clone(), &config(), clock.clone());

        // 6000 ticks of 100ms cover ten 60s windows
        for _ in 0..6000 {
            worker.tick().await;
            clock.advance(100);
        }

        assert_eq!(recovery.starts.load(Ordering::SeqCst), 1);
        assert_eq!(recovery.branch.load(Ordering::SeqCst), 10);
        // one extra global pass right after the start-up recovery
        assert_eq!(recovery.timing.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn test_start_retried_until_authorized() {
        let clock = ManualClock::at(0);
        let recovery = Arc::new(CountingRecovery {
            refuse_start: true,
            ..Default::default()
        });
        let worker = RecoveryWorker::with_clock(recovery.clone(), &config(), clock.clone());

        for _ in 0..5 {
            worker.tick().await;
            clock.advance(100);
        }

        assert!(!worker.is_initialized());
        assert_eq!(worker.state(), WorkerState::Uninitialized);
        assert_eq!(recovery.starts.load(Ordering::SeqCst), 5);
        // cadence runs regardless of initialization
        assert_eq!(recovery.timing.load(Ordering::SeqCst), 1);
        assert_eq!(recovery.branch.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let mut recovery = MockTransactionRecovery::new();
        recovery.expect_start_recovery().times(1).returning(|| Ok(()));
        // start-up pass plus the first cadence pass
        recovery
            .expect_timing_recover()
            .times(2)
            .returning(|| Err(TccError::not_authorized("timing recovery")));
        recovery
            .expect_branch_recover()
            .times(1)
            .returning(|| Err(TccError::Recovery("log unavailable".to_string())));

        let clock = ManualClock::at(10_000);
        let worker = RecoveryWorker::with_clock(Arc::new(recovery), &config(), clock.clone());

        assert!(worker.tick().await);
        clock.advance(59_900);
        assert!(!worker.tick().await);
        assert!(worker.is_initialized());
        assert!(worker.current_active());
    }

    #[test]
    fn test_failures_classified_by_kind() {
        let worker = RecoveryWorker::with_clock(
            Arc::new(CountingRecovery::default()),
            &config(),
            ManualClock::at(0),
        );

        assert_eq!(
            worker.report(Pass::Start, &TccError::not_authorized("start recovery")),
            "not_authorized"
        );
        assert_eq!(
            worker.report(Pass::Global, &TccError::Recovery("log unavailable".to_string())),
            "retryable"
        );
        assert_eq!(
            worker.report(Pass::Branch, &TccError::Serialization("bad record".to_string())),
            "failed"
        );
    }

    #[test]
    fn test_release_keeps_first_deadline() {
        let clock = ManualClock::at(1_000);
        let worker = RecoveryWorker::with_clock(
            Arc::new(CountingRecovery::default()),
            &config(),
            clock.clone(),
        );

        assert!(worker.current_active());
        worker.release();
        assert_eq!(worker.state(), WorkerState::Stopping);

        clock.advance(5_000);
        worker.release();

        clock.advance(9_999);
        assert!(worker.current_active());
        clock.advance(1);
        assert!(!worker.current_active());
        clock.advance(60_000);
        assert!(!worker.current_active());
    }

    #[tokio::test]
    async fn test_run_exits_after_grace_period() {
        let recovery_config = RecoveryConfig {
            interval_ms: 50,
            delay_of_stopping_ms: 30,
            tick_ms: 5,
            endpoint: None,
        };
        let recovery = Arc::new(CountingRecovery::default());
        let worker = Arc::new(RecoveryWorker::new(recovery.clone(), &recovery_config));

        let handle = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(worker.state(), WorkerState::Running);
        worker.release();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker did not stop")
            .unwrap()
            .unwrap();

        assert_eq!(worker.state(), WorkerState::Stopped);
        assert!(worker.is_initialized());
        assert!(recovery.branch.load(Ordering::SeqCst) >= 1);
    }
}
