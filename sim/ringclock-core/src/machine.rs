use crate::{
    config::{ConfigError, MachineConfig},
    link::{connect_outbound, serve_inbound, LinkSettings, PeerLink, Role},
    logging::{machine_creation_event, recorded_event},
    message::{format_message, parse_clock},
    recorder::{Event, EventKind, EventRecorder},
    task::{TaskKind, TaskSource, UniformTasks},
    ExitStatus, InboundQueue, LogicalClock, Shutdown,
};
use std::{
    fmt::Display,
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};
use thiserror::Error as ThisError;
use tokio::{
    net::TcpListener,
    task::JoinHandle,
    time::{sleep, Instant},
};

/// Where a machine is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineState {
    /// Binding, connecting and waiting for the links to come up.
    Starting,
    /// Running the event loop.
    Running,
    /// Cleaning up: read loops are being told to stop.
    Draining,
    /// Both links are closed.
    Stopped,
}

impl Display for MachineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A virtual machine in the ring.
///
/// A machine owns a [`LogicalClock`], an [`InboundQueue`] and two
/// [`PeerLink`]s. [`run`](Machine::run) brings the links up and then runs
/// the event loop: every iteration either processes one queued message,
/// merging its timestamp into the clock, or performs a randomly drawn task.
/// Iterations are paced to the machine's event rate. Once the loop is done,
/// [`cleanup`](Machine::cleanup) must be called exactly once; further calls
/// do nothing.
pub struct Machine {
    config: MachineConfig,
    /// Event loop iterations per second
    rate: u32,
    clock: LogicalClock,
    queue: Arc<InboundQueue>,
    /// The connection this machine opens to its successor
    outbound: Arc<PeerLink>,
    /// The connection this machine accepts from its predecessor
    inbound: Arc<PeerLink>,
    tasks: Mutex<Box<dyn TaskSource>>,
    recorder: Arc<dyn EventRecorder>,
    /// Cancelled when the machine is told to stop
    shutdown: Shutdown,
    state: Mutex<MachineState>,
    cleaned_up: AtomicBool,
    io_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Machine {
    /// Creates a machine from `config`. Events are reported to `recorder`.
    /// Nothing touches the network until [`run`](Machine::run).
    pub fn new(config: MachineConfig, recorder: Arc<dyn EventRecorder>) -> Result<Self, MachineError> {
        config.validate()?;
        let mut rng = config.rng();
        let rate = config.pick_rate(&mut rng);
        machine_creation_event(config.id, rate, config.listen_address()?, config.peer_address()?);
        let id = config.id;
        Ok(Self {
            config,
            rate,
            clock: LogicalClock::new(),
            queue: Arc::new(InboundQueue::new()),
            outbound: Arc::new(PeerLink::new(id, Role::Outbound)),
            inbound: Arc::new(PeerLink::new(id, Role::Inbound)),
            tasks: Mutex::new(Box::new(UniformTasks::new(rng))),
            recorder,
            shutdown: Shutdown::new(),
            state: Mutex::new(MachineState::Starting),
            cleaned_up: AtomicBool::new(false),
            io_tasks: Default::default(),
        })
    }

    /// Replaces the random task draw.
    pub fn with_tasks(self, tasks: impl TaskSource + 'static) -> Self {
        *lock(&self.tasks) = Box::new(tasks);
        self
    }

    pub fn id(&self) -> usize {
        self.config.id
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// The number of event loop iterations per second.
    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn clock(&self) -> &LogicalClock {
        &self.clock
    }

    pub fn queue(&self) -> &Arc<InboundQueue> {
        &self.queue
    }

    pub fn outbound(&self) -> &Arc<PeerLink> {
        &self.outbound
    }

    pub fn inbound(&self) -> &Arc<PeerLink> {
        &self.inbound
    }

    pub fn link(&self, role: Role) -> &Arc<PeerLink> {
        match role {
            Role::Outbound => &self.outbound,
            Role::Inbound => &self.inbound,
        }
    }

    /// A handle that stops the machine. Sending
    /// [`ExitStatus::Interrupted`] makes [`run`](Machine::run) report it.
    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn state(&self) -> MachineState {
        *lock(&self.state)
    }

    fn set_state(&self, state: MachineState) {
        *lock(&self.state) = state;
        tracing::debug!(machine = self.id(), "State: {}", state);
    }

    /// Attaches a connection to one of the links without going through the
    /// network, for running a machine over in-memory streams.
    pub async fn attach<R, W>(&self, role: Role, reader: R, writer: W)
    where
        R: tokio::io::AsyncRead + Send + Unpin + 'static,
        W: tokio::io::AsyncWrite + Send + Unpin + 'static,
    {
        self.link(role)
            .attach(
                reader,
                writer,
                self.queue.clone(),
                self.shutdown.clone(),
                self.config.read_timeout,
            )
            .await;
    }

    /// Brings the links up and runs the event loop until the configured
    /// duration elapses or the machine is shut down.
    ///
    /// Returns why the loop ended. Fails only if the listening address
    /// cannot be bound.
    pub async fn run(&self) -> Result<ExitStatus, MachineError> {
        let listen = self.config.listen_address()?;
        let listener = TcpListener::bind(listen)
            .await
            .map_err(|source| MachineError::Bind {
                address: listen,
                source,
            })?;
        self.run_with_listener(listener).await
    }

    /// Like [`run`](Machine::run), but serves the inbound link on a
    /// listener the caller has already bound.
    pub async fn run_with_listener(
        &self,
        listener: TcpListener,
    ) -> Result<ExitStatus, MachineError> {
        self.set_state(MachineState::Starting);
        let peer = self.config.peer_address()?;
        match listener.local_addr() {
            Ok(address) => tracing::info!(machine = self.id(), "Listening on {}", address),
            Err(e) => tracing::warn!(machine = self.id(), "Listening on an unknown address: {}", e),
        }

        let settings = LinkSettings::from(&self.config);
        self.spawn_io(serve_inbound(
            listener,
            self.inbound.clone(),
            self.queue.clone(),
            self.shutdown.clone(),
            settings,
        ));
        self.pause(self.config.settle).await;

        self.spawn_io(connect_outbound(
            peer,
            self.outbound.clone(),
            self.queue.clone(),
            self.shutdown.clone(),
            settings,
        ));
        self.pause(self.config.settle).await;

        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = async { tokio::join!(self.outbound.wait_ready(), self.inbound.wait_ready()) } => {}
        }
        if let Some(status) = self.shutdown.status() {
            tracing::info!(machine = self.id(), "Stopped before running: {:?}", status);
            return Ok(status);
        }

        self.set_state(MachineState::Running);
        tracing::info!(
            machine = self.id(),
            "Running for {:?} at {} events per second",
            self.config.duration,
            self.rate
        );
        let status = self.event_loop().await;
        tracing::info!(machine = self.id(), "Done: {:?}", status);
        Ok(status)
    }

    async fn event_loop(&self) -> ExitStatus {
        let deadline = Instant::now() + self.config.duration;
        let period = Duration::from_secs(1) / self.rate;
        loop {
            if let Some(status) = self.shutdown.status() {
                return status;
            }
            if Instant::now() >= deadline {
                return ExitStatus::TimedOut;
            }
            let started = Instant::now();
            self.step().await;
            tokio::select! {
                _ = self.shutdown.cancelled() => {}
                _ = sleep(throttle(period, started.elapsed())) => {}
            }
        }
    }

    /// Runs one iteration of the event loop: processes the oldest queued
    /// message if there is one, otherwise draws and performs a task.
    ///
    /// Returns the event reported to the recorder, or `None` if a message
    /// was dropped or the clock could not advance.
    pub async fn step(&self) -> Option<Event> {
        match self.queue.pop_with_len() {
            Some((message, remaining)) => self.receive(message, remaining),
            None => {
                let task = lock(&self.tasks).draw();
                self.perform(task).await
            }
        }
    }

    fn receive(&self, message: String, queue_len: usize) -> Option<Event> {
        let remote = match parse_clock(&message) {
            Ok(remote) => remote,
            Err(e) => {
                tracing::warn!(machine = self.id(), "Dropping message {:?}: {}", message, e);
                return None;
            }
        };
        match self.clock.update(remote) {
            Ok(clock) => {
                tracing::info!(machine = self.id(), "Received: {}", message);
                Some(self.record(EventKind::Received, clock, queue_len, Some(message)))
            }
            Err(e) => {
                tracing::warn!(machine = self.id(), "Dropping message {:?}: {}", message, e);
                None
            }
        }
    }

    /// Performs `task`. Send tasks write the current clock value to the
    /// chosen links; every task then ticks the clock once. Nothing is
    /// recorded if the clock cannot advance.
    pub async fn perform(&self, task: TaskKind) -> Option<Event> {
        if !task.is_send() {
            let clock = self.tick()?;
            return Some(self.record(EventKind::Internal, clock, self.queue.len(), None));
        }

        let message = format_message(self.id(), task.code(), self.clock.get());
        if task.sends_outbound() {
            self.send_on(&self.outbound, &message).await;
        }
        if task.sends_inbound() {
            self.send_on(&self.inbound, &message).await;
        }
        let clock = self.tick()?;
        Some(self.record(EventKind::Send, clock, self.queue.len(), Some(message)))
    }

    fn tick(&self) -> Option<u64> {
        match self.clock.tick() {
            Ok(clock) => Some(clock),
            Err(e) => {
                tracing::error!(machine = self.id(), "{}", e);
                None
            }
        }
    }

    async fn send_on(&self, link: &PeerLink, message: &str) {
        if let Err(e) = link.send(message).await {
            tracing::warn!(machine = self.id(), role = %link.role(), "Failed to send: {}", e);
        }
    }

    fn record(&self, kind: EventKind, clock: u64, queue_len: usize, message: Option<String>) -> Event {
        let event = Event::now(kind, clock, queue_len, message);
        recorded_event(self.id(), &event);
        self.recorder.record(&event);
        event
    }

    /// Stops the machine and closes both links.
    ///
    /// Signals the shutdown, stops both read loops, waits the grace period
    /// so they can notice, then closes the connections. Only the first call
    /// does anything; it returns `true`.
    pub async fn cleanup(&self) -> bool {
        if self.cleaned_up.swap(true, Ordering::SeqCst) {
            tracing::debug!(machine = self.id(), "Already cleaned up");
            return false;
        }
        tracing::info!(machine = self.id(), "Cleaning up...");
        self.set_state(MachineState::Draining);
        self.shutdown.shut_down();
        self.outbound.stop_listening();
        self.inbound.stop_listening();
        sleep(self.config.grace).await;

        self.outbound.close().await;
        self.inbound.close().await;
        let tasks = std::mem::take(&mut *lock(&self.io_tasks));
        for task in &tasks {
            task.abort();
        }
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                if e.is_panic() {
                    tracing::error!(machine = self.id(), "Link task panicked");
                }
            }
        }
        self.set_state(MachineState::Stopped);
        true
    }

    fn spawn_io(&self, task: impl std::future::Future<Output = ()> + Send + 'static) {
        lock(&self.io_tasks).push(tokio::spawn(task));
    }

    /// Sleeps for `duration`, waking early on shutdown.
    async fn pause(&self, duration: Duration) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = sleep(duration) => {}
        }
    }
}

/// How long to sleep after an iteration that took `elapsed` so iterations
/// start every `period`. Never negative.
pub fn throttle(period: Duration, elapsed: Duration) -> Duration {
    period.saturating_sub(elapsed)
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, ThisError)]
pub enum MachineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to listen on {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        message::FRAME_SIZE,
        recorder::MemoryRecorder,
        task::ScriptedTasks,
        RingConfig,
    };
    use tokio::io::{duplex, split, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn config(id: usize) -> MachineConfig {
        MachineConfig::new(id, RingConfig::new(3, 5000))
            .rate(100)
            .read_timeout(Duration::from_millis(20))
            .grace(Duration::from_millis(20))
    }

    fn machine(tasks: ScriptedTasks) -> (Machine, Arc<MemoryRecorder>) {
        let recorder = Arc::new(MemoryRecorder::new());
        let machine = Machine::new(config(0), recorder.clone())
            .unwrap()
            .with_tasks(tasks);
        (machine, recorder)
    }

    /// Attaches in-memory connections to both links, returning the far ends.
    async fn connect(machine: &Machine) -> (DuplexStream, DuplexStream) {
        let (outbound, outbound_peer) = duplex(1024);
        let (inbound, inbound_peer) = duplex(1024);
        let (reader, writer) = split(outbound);
        machine.attach(Role::Outbound, reader, writer).await;
        let (reader, writer) = split(inbound);
        machine.attach(Role::Inbound, reader, writer).await;
        (outbound_peer, inbound_peer)
    }

    async fn read_frame(stream: &mut DuplexStream) -> String {
        let mut frame = [0u8; FRAME_SIZE];
        let n = stream.read(&mut frame).await.unwrap();
        String::from_utf8(frame[..n].to_vec()).unwrap()
    }

    #[test]
    fn rate_comes_from_the_range() {
        let recorder = Arc::new(MemoryRecorder::new());
        for seed in 0..20 {
            let config = MachineConfig::new(1, RingConfig::default()).seed(seed);
            let machine = Machine::new(config, recorder.clone()).unwrap();
            assert!((1..=6).contains(&machine.rate()));
        }
        let config = MachineConfig::new(1, RingConfig::default()).rate(5);
        assert_eq!(Machine::new(config, recorder).unwrap().rate(), 5);
    }

    #[test]
    fn invalid_config_is_refused() {
        let config = MachineConfig::new(7, RingConfig::default());
        let result = Machine::new(config, Arc::new(MemoryRecorder::new()));
        assert!(matches!(
            result,
            Err(MachineError::Config(ConfigError::InvalidId { id: 7, machines: 3 }))
        ));
    }

    #[test]
    fn throttle_never_goes_negative() {
        let period = Duration::from_millis(250);
        assert_eq!(throttle(period, Duration::ZERO), period);
        assert_eq!(
            throttle(period, Duration::from_millis(100)),
            Duration::from_millis(150)
        );
        assert_eq!(throttle(period, period), Duration::ZERO);
        assert_eq!(throttle(period, Duration::from_secs(3)), Duration::ZERO);
    }

    #[tokio::test]
    async fn receiving_merges_the_clock() {
        let (machine, recorder) = machine(ScriptedTasks::default());
        machine.queue().push("[machine 1, task 1] the time is 5");
        machine.queue().push("[machine 2, task 1] the time is 1");
        assert_eq!(machine.clock().get(), 0);

        let event = machine.step().await.unwrap();
        assert_eq!(machine.clock().get(), 6);
        assert_eq!(machine.queue().len(), 1);
        assert_eq!(event.kind, EventKind::Received);
        assert_eq!(event.clock, 6);
        assert_eq!(event.queue_len, 1);
        assert_eq!(recorder.events(), [event]);

        // An older timestamp still advances the clock by one
        machine.step().await.unwrap();
        assert_eq!(machine.clock().get(), 7);
        assert!(machine.queue().is_empty());
    }

    #[tokio::test]
    async fn draining_advances_by_at_least_one_per_message() {
        let (machine, recorder) = machine(ScriptedTasks::default());
        let remotes = [0, 3, 3, 1, 9, 2];
        for remote in remotes {
            machine.queue().push(format_message(1, 1, remote));
        }
        let mut last = machine.clock().get();
        for _ in remotes {
            machine.step().await.unwrap();
            assert!(machine.clock().get() > last);
            last = machine.clock().get();
        }
        assert!(machine.clock().get() >= remotes.len() as u64);
        assert_eq!(recorder.kinds(), [EventKind::Received; 6]);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn malformed_messages_are_dropped() {
        let (machine, recorder) = machine(ScriptedTasks::default());
        machine.queue().push("the time is soon");
        assert_eq!(machine.step().await, None);
        assert!(machine.queue().is_empty());
        assert_eq!(machine.clock().get(), 0);
        assert!(recorder.events().is_empty());
        assert!(logs_contain("Dropping message"));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn unmergeable_clocks_are_dropped() {
        let (machine, recorder) = machine(ScriptedTasks::default());
        machine
            .queue()
            .push(format!("[machine 1, task 1] the time is {}", u64::MAX));
        assert_eq!(machine.step().await, None);
        assert_eq!(machine.clock().get(), 0);
        assert!(recorder.events().is_empty());
        assert!(logs_contain("Dropping message"));

        // The largest accepted value exhausts the clock, which then stops
        // recording instead of wrapping around
        machine.queue().push(format_message(1, 1, u64::MAX - 1));
        let event = machine.step().await.unwrap();
        assert_eq!(event.clock, u64::MAX);
        machine.queue().push(format_message(2, 1, 5));
        assert_eq!(machine.step().await, None);
        assert_eq!(machine.step().await, None);
        assert_eq!(machine.clock().get(), u64::MAX);
        assert_eq!(recorder.kinds(), [EventKind::Received]);
        assert!(logs_contain("cannot advance"));
    }

    #[tokio::test]
    async fn queue_preempts_tasks() {
        let (machine, recorder) = machine(ScriptedTasks::from_codes([1]));
        machine.queue().push("the time is 2");
        machine.step().await;
        // The scripted send was never drawn
        assert_eq!(recorder.kinds(), [EventKind::Received]);
        assert_eq!(machine.outbound().sent(), 0);
    }

    #[tokio::test]
    #[ntest::timeout(5000)]
    async fn send_via_outbound() {
        let (machine, recorder) = machine(ScriptedTasks::from_codes([1]));
        let (mut outbound_peer, _inbound_peer) = connect(&machine).await;

        let event = machine.step().await.unwrap();
        assert_eq!(event.kind, EventKind::Send);
        assert_eq!(event.clock, 1);
        assert_eq!(
            event.message.as_deref(),
            Some("[machine 0, task 1] the time is 0")
        );
        assert_eq!(machine.outbound().sent(), 1);
        assert_eq!(machine.inbound().sent(), 0);
        assert_eq!(machine.clock().get(), 1);
        assert_eq!(
            read_frame(&mut outbound_peer).await,
            "[machine 0, task 1] the time is 0"
        );
        assert_eq!(recorder.kinds(), [EventKind::Send]);
    }

    #[tokio::test]
    #[ntest::timeout(5000)]
    async fn send_via_inbound() {
        let (machine, _recorder) = machine(ScriptedTasks::from_codes([2]));
        let (_outbound_peer, mut inbound_peer) = connect(&machine).await;
        machine.clock().tick().unwrap();

        machine.step().await.unwrap();
        assert_eq!(machine.outbound().sent(), 0);
        assert_eq!(machine.inbound().sent(), 1);
        assert_eq!(machine.clock().get(), 2);
        assert_eq!(
            read_frame(&mut inbound_peer).await,
            "[machine 0, task 2] the time is 1"
        );
    }

    #[tokio::test]
    #[ntest::timeout(5000)]
    async fn send_via_both_ticks_once() {
        let (machine, recorder) = machine(ScriptedTasks::from_codes([3]));
        let (mut outbound_peer, mut inbound_peer) = connect(&machine).await;

        machine.step().await.unwrap();
        assert_eq!(machine.outbound().sent(), 1);
        assert_eq!(machine.inbound().sent(), 1);
        assert_eq!(machine.clock().get(), 1);
        let expected = "[machine 0, task 3] the time is 0";
        assert_eq!(read_frame(&mut outbound_peer).await, expected);
        assert_eq!(read_frame(&mut inbound_peer).await, expected);
        assert_eq!(recorder.events().len(), 1);
    }

    #[tokio::test]
    async fn internal_events_stay_off_the_network() {
        let (machine, recorder) = machine(ScriptedTasks::from_codes([7]));
        let (_outbound_peer, _inbound_peer) = connect(&machine).await;

        let event = machine.step().await.unwrap();
        assert_eq!(event.kind, EventKind::Internal);
        assert_eq!(event.clock, 1);
        assert_eq!(event.message, None);
        assert_eq!(machine.outbound().sent(), 0);
        assert_eq!(machine.inbound().sent(), 0);
        assert_eq!(recorder.kinds(), [EventKind::Internal]);
    }

    #[tokio::test]
    async fn failed_sends_still_tick() {
        // No connections attached
        let (machine, recorder) = machine(ScriptedTasks::from_codes([3]));
        let event = machine.step().await.unwrap();
        assert_eq!(event.kind, EventKind::Send);
        assert_eq!(machine.clock().get(), 1);
        assert_eq!(machine.outbound().sent(), 0);
        assert_eq!(recorder.kinds(), [EventKind::Send]);
    }

    #[tokio::test]
    #[ntest::timeout(5000)]
    async fn received_frames_reach_the_event_loop() {
        let (machine, _recorder) = machine(ScriptedTasks::default());
        let (mut outbound_peer, mut inbound_peer) = connect(&machine).await;
        outbound_peer
            .write_all(b"[machine 1, task 2] the time is 10")
            .await
            .unwrap();
        while machine.queue().is_empty() {
            sleep(Duration::from_millis(5)).await;
        }
        inbound_peer
            .write_all(b"[machine 2, task 1] the time is 3")
            .await
            .unwrap();
        while machine.queue().len() < 2 {
            sleep(Duration::from_millis(5)).await;
        }
        machine.step().await.unwrap();
        assert_eq!(machine.clock().get(), 11);
        machine.step().await.unwrap();
        assert_eq!(machine.clock().get(), 12);
        assert_eq!(machine.outbound().received(), 1);
        assert_eq!(machine.inbound().received(), 1);
    }

    #[tokio::test]
    #[ntest::timeout(5000)]
    async fn cleanup_is_idempotent() {
        let (machine, _recorder) = machine(ScriptedTasks::default());
        let (mut outbound_peer, _inbound_peer) = connect(&machine).await;

        assert!(machine.cleanup().await);
        assert_eq!(machine.state(), MachineState::Stopped);
        assert!(machine.outbound().is_closed());
        assert!(machine.inbound().is_closed());
        assert!(!machine.outbound().is_listening());
        assert!(machine.shutdown().is_shut_down());
        assert_eq!(read_frame(&mut outbound_peer).await, "");

        assert!(!machine.cleanup().await);
        assert_eq!(machine.state(), MachineState::Stopped);
    }

    #[tokio::test]
    #[ntest::timeout(5000)]
    async fn concurrent_cleanups_close_once() {
        let (machine, _recorder) = machine(ScriptedTasks::default());
        let (a, b) = tokio::join!(machine.cleanup(), machine.cleanup());
        assert!(a ^ b);
    }

    #[tokio::test]
    #[ntest::timeout(10000)]
    async fn interrupt_while_connecting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // A ring of two where the other machine never shows up
        let config = MachineConfig::new(0, RingConfig::new(2, port))
            .settle(Duration::from_millis(10))
            .connect_delay(Duration::ZERO)
            .connect_retry(Duration::from_millis(20))
            .grace(Duration::from_millis(10));
        let machine = Arc::new(Machine::new(config, Arc::new(MemoryRecorder::new())).unwrap());
        let running = tokio::spawn({
            let machine = machine.clone();
            async move { machine.run_with_listener(listener).await }
        });
        sleep(Duration::from_millis(200)).await;
        assert_eq!(machine.state(), MachineState::Starting);

        machine.shutdown().shut_down_with_status(ExitStatus::Interrupted);
        assert_eq!(running.await.unwrap().unwrap(), ExitStatus::Interrupted);
        assert!(machine.cleanup().await);
        assert_eq!(machine.state(), MachineState::Stopped);
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let config = MachineConfig::new(0, RingConfig::new(1, port));
        let machine = Machine::new(config, Arc::new(MemoryRecorder::new())).unwrap();
        assert!(matches!(
            machine.run().await,
            Err(MachineError::Bind { .. })
        ));
    }
}
