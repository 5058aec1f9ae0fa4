//! Owns one ingress endpoint (producer) and one egress endpoint (consumer)
//! bridged through a shared delay queue.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use delay_proxy_net::{EndpointError, FramedEndpoint};
use delay_proxy_queue::{DelayQueue, DelaySetting, GuardTimeout};
use thiserror::Error;

/// Bounded wait for both worker threads to notice a stop request and exit,
/// mirroring the 500 ms the original implementation sleeps before joining.
const STOP_GRACE: Duration = Duration::from_millis(500);
/// Backoff applied by the consumer when the queue has nothing eligible to
/// pop yet, so it doesn't spin a core waiting out the hold time.
const CONSUMER_IDLE_BACKOFF: Duration = Duration::from_millis(5);

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("proxy is already running")]
    AlreadyRunning,
    #[error("failed to open endpoint: {0}")]
    Endpoint(#[from] EndpointError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
}

/// The proxy's `IDLE -> RUNNING -> STOPPING -> IDLE` state machine. A
/// `STOPPING` phase exists conceptually (workers draining after a stop
/// request) but isn't separately observable here: `stop()` blocks until
/// both workers have actually joined before returning to `IDLE`.
pub struct ProxyOrchestrator {
    delay_setting: Arc<DelaySetting>,
    queue: Arc<DelayQueue>,
    phase: Phase,
    stop_flag: Arc<AtomicBool>,
    producer: Option<JoinHandle<()>>,
    consumer: Option<JoinHandle<()>>,
    produced_count: Arc<AtomicU64>,
    consumed_count: Arc<AtomicU64>,
}

impl ProxyOrchestrator {
    pub fn new(delay_setting: Arc<DelaySetting>) -> Self {
        Self {
            delay_setting,
            queue: Arc::new(DelayQueue::new()),
            phase: Phase::Idle,
            stop_flag: Arc::new(AtomicBool::new(false)),
            producer: None,
            consumer: None,
            produced_count: Arc::new(AtomicU64::new(0)),
            consumed_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Binds both endpoints and spawns the producer and consumer threads.
    /// Fails without spawning anything if either bind fails.
    pub fn start(&mut self, ingress_port: u16, egress_port: u16) -> Result<(), OrchestratorError> {
        if self.phase != Phase::Idle {
            return Err(OrchestratorError::AlreadyRunning);
        }

        let ingress = FramedEndpoint::open(ingress_port)?;
        let egress = FramedEndpoint::open(egress_port)?;

        self.stop_flag.store(false, Ordering::SeqCst);
        if let Err(GuardTimeout) = self.queue.clear() {
            tracing::warn!("could not clear queue before starting: guard timed out");
        }
        self.produced_count.store(0, Ordering::SeqCst);
        self.consumed_count.store(0, Ordering::SeqCst);

        let stop = self.stop_flag.clone();
        let queue = self.queue.clone();
        let produced = self.produced_count.clone();
        self.consumer = Some(thread::spawn({
            let stop = self.stop_flag.clone();
            let queue = self.queue.clone();
            let delay_setting = self.delay_setting.clone();
            let consumed = self.consumed_count.clone();
            move || run_consumer(egress, queue, delay_setting, stop, consumed)
        }));
        self.producer = Some(thread::spawn(move || run_producer(ingress, queue, stop, produced)));

        self.phase = Phase::Running;
        Ok(())
    }

    /// Idempotent: signals both workers to stop, gives them a grace period,
    /// then joins. Safe to call when already idle.
    pub fn stop(&mut self) {
        if self.phase == Phase::Idle {
            return;
        }
        self.stop_flag.store(true, Ordering::SeqCst);
        thread::sleep(STOP_GRACE);
        if let Some(handle) = self.producer.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.consumer.take() {
            let _ = handle.join();
        }
        self.phase = Phase::Idle;
    }

    pub fn queue_length(&self) -> Result<usize, GuardTimeout> {
        self.queue.length()
    }

    pub fn produced_count(&self) -> u64 {
        self.produced_count.load(Ordering::SeqCst)
    }

    pub fn consumed_count(&self) -> u64 {
        self.consumed_count.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }
}

fn run_producer(
    mut endpoint: FramedEndpoint,
    queue: Arc<DelayQueue>,
    stop: Arc<AtomicBool>,
    produced: Arc<AtomicU64>,
) {
    while !stop.load(Ordering::SeqCst) {
        let Some(body) = endpoint.accept_and_recv() else {
            continue;
        };
        match queue.push(Bytes::from(body)) {
            Ok(_) => {
                produced.fetch_add(1, Ordering::SeqCst);
            }
            Err(GuardTimeout) => tracing::warn!("dropping frame: queue guard timed out on push"),
        }
    }
    endpoint.close();
    tracing::debug!(produced = produced.load(Ordering::SeqCst), "producer stopped");
}

fn run_consumer(
    mut endpoint: FramedEndpoint,
    queue: Arc<DelayQueue>,
    delay_setting: Arc<DelaySetting>,
    stop: Arc<AtomicBool>,
    consumed: Arc<AtomicU64>,
) {
    while !stop.load(Ordering::SeqCst) {
        match queue.pop(&delay_setting) {
            Ok(Some(payload)) => {
                endpoint.broadcast_frame(&payload);
                consumed.fetch_add(1, Ordering::SeqCst);
            }
            Ok(None) => thread::sleep(CONSUMER_IDLE_BACKOFF),
            Err(GuardTimeout) => tracing::warn!("queue guard timed out on pop"),
        }
    }
    endpoint.close();
    tracing::debug!(consumed = consumed.load(Ordering::SeqCst), "consumer stopped");
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::time::Instant;

    use delay_proxy_codec::{decode, encode};

    use super::*;

    #[test]
    fn passthrough_with_no_delay_round_trips_a_frame() {
        let delay_setting = Arc::new(DelaySetting::new());
        let mut proxy = ProxyOrchestrator::new(delay_setting);
        proxy.start(29001, 29002).expect("start failed");

        let consumer = thread::spawn(|| {
            let mut stream = TcpStream::connect(("127.0.0.1", 29002)).expect("connect failed");
            decode(&mut stream).expect("decode failed")
        });

        // Give the consumer a moment to connect before the producer sends.
        thread::sleep(Duration::from_millis(50));
        let mut producer_stream =
            TcpStream::connect(("127.0.0.1", 29001)).expect("connect failed");
        producer_stream.write_all(&encode(b"passthrough").unwrap()).unwrap();

        let body = consumer.join().unwrap();
        assert_eq!(body, b"passthrough");

        proxy.stop();
        assert_eq!(proxy.produced_count(), 1);
        assert_eq!(proxy.consumed_count(), 1);
    }

    #[test]
    fn stop_is_idempotent_and_a_later_start_succeeds() {
        let delay_setting = Arc::new(DelaySetting::new());
        let mut proxy = ProxyOrchestrator::new(delay_setting);
        proxy.stop(); // idle -> stop is a no-op
        proxy.start(29003, 29004).expect("start failed");
        proxy.stop();
        proxy.stop();
        proxy.start(29003, 29004).expect("restart failed");
        proxy.stop();
    }

    #[test]
    fn cannot_start_while_already_running() {
        let delay_setting = Arc::new(DelaySetting::new());
        let mut proxy = ProxyOrchestrator::new(delay_setting);
        proxy.start(29005, 29006).expect("start failed");
        let err = proxy.start(29005, 29006).unwrap_err();
        assert!(matches!(err, OrchestratorError::AlreadyRunning));
        proxy.stop();
    }

    #[test]
    fn held_frame_is_not_forwarded_before_the_hold_elapses() {
        let delay_setting = Arc::new(DelaySetting::with_override(Some(0.3)));
        let mut proxy = ProxyOrchestrator::new(delay_setting);
        proxy.start(29007, 29008).expect("start failed");

        thread::sleep(Duration::from_millis(50));
        let mut producer_stream =
            TcpStream::connect(("127.0.0.1", 29007)).expect("connect failed");
        producer_stream.write_all(&encode(b"held").unwrap()).unwrap();

        thread::sleep(Duration::from_millis(100));
        let mut consumer_stream =
            TcpStream::connect(("127.0.0.1", 29008)).expect("connect failed");
        consumer_stream
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        let mut buf = [0u8; 1];
        let too_early = consumer_stream.read(&mut buf);
        assert!(too_early.is_err(), "frame arrived before the hold elapsed");

        let start = Instant::now();
        consumer_stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let body = decode(&mut consumer_stream).expect("decode failed");
        assert_eq!(body, b"held");
        assert!(start.elapsed() < Duration::from_secs(1));

        proxy.stop();
    }
}
