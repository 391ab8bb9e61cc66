// ── Thing handler ──
//
// Owns one monitored thing: its session, its poll and discovery tasks, and
// its status. Every network exchange for the thing (poll tick, discovery
// scan, command, logout) runs with the session lock held, so they never
// overlap.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use cloudpoll_api::{FetchError, Session};
use futures::FutureExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::binding::Binding;
use crate::config::ThingConfig;
use crate::discovery::DiscoveryScanner;
use crate::engine::{PollTask, PollingEngine, Reschedule, panic_message};
use crate::error::{CoreError, DiscoveryError, PollError};
use crate::model::{ChannelUpdate, Command, DiscoveredDevice, ThingStatus};
use crate::sink::{DiscoveryCallback, NoKnownThings, Sink};

// ── Builder ─────────────────────────────────────────────────────────

pub struct ThingHandlerBuilder<B: Binding> {
    config: ThingConfig,
    binding: B,
    sink: Arc<dyn Sink>,
    engine: Option<PollingEngine>,
    callback: Arc<dyn DiscoveryCallback>,
}

impl<B: Binding> ThingHandlerBuilder<B> {
    /// Run the thing's tasks on a shared engine instead of a private one.
    pub fn engine(mut self, engine: PollingEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Host registry consulted before reporting discovered devices.
    pub fn discovery_callback(mut self, callback: Arc<dyn DiscoveryCallback>) -> Self {
        self.callback = callback;
        self
    }

    pub fn build(self) -> ThingHandler<B> {
        let session = self.binding.new_session();
        let (status, _) = watch::channel(ThingStatus::Uninitialized);
        let scanner = DiscoveryScanner::new(
            self.config.thing_id.clone(),
            Arc::clone(&self.sink),
            self.callback,
        );
        ThingHandler {
            inner: Arc::new(HandlerInner {
                config: self.config,
                binding: self.binding,
                sink: self.sink,
                session: tokio::sync::Mutex::new(session),
                status,
                failures: AtomicU32::new(0),
                channels: Mutex::new(HashSet::new()),
                scanner,
                disposed: AtomicBool::new(false),
            }),
            engine: self.engine.unwrap_or_default(),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

// ── ThingHandler ────────────────────────────────────────────────────

/// Host entry point for one thing. Cheap to clone.
pub struct ThingHandler<B: Binding> {
    inner: Arc<HandlerInner<B>>,
    engine: PollingEngine,
    tasks: Arc<Mutex<Vec<PollTask>>>,
}

impl<B: Binding> Clone for ThingHandler<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            engine: self.engine.clone(),
            tasks: Arc::clone(&self.tasks),
        }
    }
}

struct HandlerInner<B: Binding> {
    config: ThingConfig,
    binding: B,
    sink: Arc<dyn Sink>,
    session: tokio::sync::Mutex<Session>,
    status: watch::Sender<ThingStatus>,
    failures: AtomicU32,
    channels: Mutex<HashSet<String>>,
    scanner: DiscoveryScanner,
    disposed: AtomicBool,
}

impl<B: Binding> ThingHandler<B> {
    pub fn builder(config: ThingConfig, binding: B, sink: Arc<dyn Sink>) -> ThingHandlerBuilder<B> {
        ThingHandlerBuilder {
            config,
            binding,
            sink,
            engine: None,
            callback: Arc::new(NoKnownThings),
        }
    }

    /// Handler with a private engine and no host thing registry.
    pub fn new(config: ThingConfig, binding: B, sink: Arc<dyn Sink>) -> Self {
        Self::builder(config, binding, sink).build()
    }

    pub fn thing_id(&self) -> &str {
        &self.inner.config.thing_id
    }

    pub fn binding(&self) -> &B {
        &self.inner.binding
    }

    pub fn status(&self) -> watch::Receiver<ThingStatus> {
        self.inner.status.subscribe()
    }

    pub fn current_status(&self) -> ThingStatus {
        self.inner.status.borrow().clone()
    }

    /// Log in and start polling (plus discovery for bridges that want it).
    ///
    /// A failed first login still starts polling; the thing goes `Offline`
    /// (or `ConfigurationError` for refused credentials) and recovers on a
    /// later tick. Calling this twice is a no-op.
    pub async fn initialize(&self) -> Result<(), CoreError> {
        if !self.lock_tasks().is_empty() {
            return Ok(());
        }
        self.login().await?;

        let mut tasks = vec![self.start_polling()];
        let inner = &self.inner;
        if inner.config.discovery && inner.binding.supports_discovery() {
            tasks.push(self.start_discovery());
        }
        self.lock_tasks().extend(tasks);
        Ok(())
    }

    /// Validate the config and perform the first login without starting
    /// any task. One-shot hosts call this instead of
    /// [`initialize`](Self::initialize).
    pub async fn login(&self) -> Result<ThingStatus, CoreError> {
        let inner = &self.inner;
        if inner.is_disposed() {
            return Err(CoreError::Disposed);
        }
        if let Err(e) = inner.config.validate() {
            inner.set_status(ThingStatus::ConfigurationError(e.to_string()));
            return Err(e);
        }
        if inner.config.credentials.is_blank() {
            inner.set_status(ThingStatus::ConfigurationError("No credentials".into()));
            return Err(CoreError::Config {
                message: "no credentials configured".into(),
            });
        }

        let first = {
            let mut session = inner.session.lock().await;
            inner.binding.ensure_valid(&mut session).await
        };
        match first {
            Ok(()) => inner.set_status(ThingStatus::Online),
            Err(e) => {
                warn!(thing = %inner.config.thing_id, error = %e, "initial login failed");
                inner.set_status(status_for(&PollError::Auth(e)));
            }
        }
        Ok(self.current_status())
    }

    fn start_polling(&self) -> PollTask {
        let inner = Arc::clone(&self.inner);
        let config = &self.inner.config;
        self.engine.start(
            format!("poll:{}", config.thing_id),
            config.initial_delay,
            config.refresh_interval,
            move |cancel| {
                let inner = Arc::clone(&inner);
                async move {
                    inner.tick(&cancel).await;
                    Reschedule::Regular
                }
            },
        )
    }

    fn start_discovery(&self) -> PollTask {
        let inner = Arc::clone(&self.inner);
        let config = &self.inner.config;
        let retry = config.offline_retry_delay;
        self.engine.start(
            format!("discovery:{}", config.thing_id),
            config.discovery_initial_delay,
            config.discovery_interval,
            move |cancel| {
                let inner = Arc::clone(&inner);
                async move {
                    if cancel.is_cancelled() {
                        return Reschedule::Regular;
                    }
                    match inner.discover().await {
                        Ok(_) => Reschedule::Regular,
                        Err(DiscoveryError::BridgeOffline) => Reschedule::After(retry),
                        Err(e) => {
                            warn!(thing = %inner.config.thing_id, error = %e, "discovery scan failed");
                            Reschedule::Regular
                        }
                    }
                }
            },
        )
    }

    /// Run one poll tick now, outside the schedule.
    pub async fn refresh(&self) -> Result<(), CoreError> {
        if self.inner.is_disposed() {
            return Err(CoreError::Disposed);
        }
        self.inner.tick(&CancellationToken::new()).await;
        Ok(())
    }

    /// Run one discovery scan now.
    pub async fn discover(&self) -> Result<Vec<DiscoveredDevice>, DiscoveryError> {
        self.inner.discover().await
    }

    /// Validate a command against the channel and send it to the vendor.
    pub async fn handle_command(&self, channel: &str, command: Command) -> Result<(), CoreError> {
        let inner = &self.inner;
        if inner.is_disposed() {
            return Err(CoreError::Disposed);
        }
        if command == Command::Refresh {
            return self.refresh().await;
        }

        let kind = inner
            .binding
            .command_kind(channel)
            .ok_or_else(|| CoreError::UnknownChannel {
                channel: channel.to_owned(),
            })?;
        if !command.fits(kind) {
            return Err(CoreError::InvalidCommand {
                channel: channel.to_owned(),
                reason: format!("{kind} channel does not accept {command:?}"),
            });
        }

        let mut session = inner.session.lock().await;
        inner.binding.ensure_valid(&mut session).await?;
        inner.binding.send_command(&mut session, channel, &command).await?;
        info!(thing = %inner.config.thing_id, channel, "command dispatched");
        Ok(())
    }

    /// Stop every task, log out, and move to the terminal `Disposed`
    /// status. A tick already running finishes first.
    pub async fn dispose(&self) {
        let inner = &self.inner;
        if inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let tasks: Vec<PollTask> = self.lock_tasks().drain(..).collect();
        for task in &tasks {
            self.engine.cancel(task);
        }

        {
            let mut session = inner.session.lock().await;
            inner.binding.logout(&mut session).await;
            session.clear();
        }

        inner.status.send_replace(ThingStatus::Disposed);
        inner
            .sink
            .update_status(&inner.config.thing_id, ThingStatus::Disposed);
        info!(thing = %inner.config.thing_id, "thing disposed");
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<PollTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tick and scan ───────────────────────────────────────────────────

impl<B: Binding> HandlerInner<B> {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    async fn tick(&self, cancel: &CancellationToken) {
        let outcome = {
            let mut session = self.session.lock().await;
            if cancel.is_cancelled() || self.is_disposed() {
                return;
            }
            AssertUnwindSafe(self.poll(&mut session, cancel))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(PollError::Fetch(FetchError::CommunicationError(format!(
                        "internal error: {}",
                        panic_message(panic.as_ref())
                    ))))
                })
        };

        match outcome {
            Ok(Some(updates)) => {
                let previous = self.failures.swap(0, Ordering::SeqCst);
                if previous > 0 {
                    debug!(thing = %self.config.thing_id, previous, "poll recovered");
                }
                self.set_status(ThingStatus::Online);
                self.apply(updates);
            }
            Ok(None) => debug!(thing = %self.config.thing_id, "tick cancelled"),
            Err(e) => self.record_failure(&e),
        }
    }

    async fn poll(
        &self,
        session: &mut Session,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<ChannelUpdate>>, PollError> {
        self.binding.ensure_valid(session).await?;
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let payload = self.binding.fetch_status(session).await?;
        if cancel.is_cancelled() {
            return Ok(None);
        }
        Ok(Some(self.binding.map_response(&payload)))
    }

    fn record_failure(&self, error: &PollError) {
        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(thing = %self.config.thing_id, error = %error, failures, "poll tick failed");
        if failures >= self.config.failure_threshold {
            self.set_status(status_for(error));
        }
    }

    fn apply(&self, updates: Vec<ChannelUpdate>) {
        if self.is_disposed() {
            return;
        }
        let thing = &self.config.thing_id;
        for update in updates {
            let unseen = self
                .channels
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(update.channel_id.clone());
            if unseen {
                self.sink.create_channel(thing, update.spec());
            }
            self.sink.update_state(thing, update);
        }
    }

    async fn discover(&self) -> Result<Vec<DiscoveredDevice>, DiscoveryError> {
        if self.is_disposed() {
            return Err(DiscoveryError::BridgeOffline);
        }
        let online = self.status.borrow().is_online();
        self.scanner.scan(&self.binding, &self.session, online).await
    }

    /// Publish a status change. Ignored once disposed; repeats of the
    /// current status are not re-sent.
    fn set_status(&self, status: ThingStatus) {
        if self.is_disposed() {
            return;
        }
        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status.clone();
                true
            }
        });
        if changed {
            info!(thing = %self.config.thing_id, %status, "status changed");
            self.sink.update_status(&self.config.thing_id, status);
        }
    }
}

fn status_for(error: &PollError) -> ThingStatus {
    if error.is_configuration() {
        ThingStatus::ConfigurationError(error.reason())
    } else {
        ThingStatus::Offline(error.reason())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use chrono::Utc;
    use cloudpoll_api::{AuthError, Credentials, FetchError};
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    use super::*;
    use crate::model::{ChannelKind, TypedValue};
    use crate::sink::{BroadcastSink, SinkEvent};

    /// In-memory binding that counts overlapping vendor calls.
    #[derive(Default)]
    struct FakeBinding {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
        fail_with: Mutex<Option<PollError>>,
        panic_next: AtomicBool,
        latency: Duration,
        devices: Vec<DiscoveredDevice>,
    }

    impl FakeBinding {
        async fn call(&self) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        fn fail(&self, error: Option<PollError>) {
            *self.fail_with.lock().unwrap() = error;
        }
    }

    impl Binding for FakeBinding {
        fn vendor(&self) -> &str {
            "fake"
        }

        fn new_session(&self) -> Session {
            Session::new("user")
        }

        async fn ensure_valid(&self, _session: &mut Session) -> Result<(), AuthError> {
            Ok(())
        }

        async fn fetch_status(&self, _session: &mut Session) -> Result<Value, PollError> {
            self.call().await;
            assert!(!self.panic_next.swap(false, Ordering::SeqCst), "vendor sent garbage");
            let failure = self.fail_with.lock().unwrap().clone();
            match failure {
                Some(e) => Err(e),
                None => Ok(json!({"power": 42})),
            }
        }

        fn map_response(&self, payload: &Value) -> Vec<ChannelUpdate> {
            payload["power"]
                .as_f64()
                .map(|p| vec![ChannelUpdate::new("power", TypedValue::Number(p), Utc::now())])
                .unwrap_or_default()
        }

        fn map_segment(&self, payload: &Value, _segment: &str) -> Vec<ChannelUpdate> {
            self.map_response(payload)
        }

        async fn list_devices(
            &self,
            _session: &mut Session,
        ) -> Result<Vec<DiscoveredDevice>, PollError> {
            self.call().await;
            Ok(self.devices.clone())
        }

        async fn send_command(
            &self,
            _session: &mut Session,
            _channel: &str,
            _command: &Command,
        ) -> Result<(), CoreError> {
            self.call().await;
            Ok(())
        }

        async fn logout(&self, session: &mut Session) {
            session.clear();
        }

        fn command_kind(&self, channel: &str) -> Option<ChannelKind> {
            (channel == "relay").then_some(ChannelKind::Switch)
        }

        fn supports_discovery(&self) -> bool {
            true
        }
    }

    fn config() -> ThingConfig {
        let mut config = ThingConfig::new("thing-1", "fake", Credentials::token("t"));
        config.refresh_interval = Duration::from_secs(10);
        config
    }

    fn handler(binding: FakeBinding, sink: &BroadcastSink) -> ThingHandler<FakeBinding> {
        ThingHandler::new(config(), binding, Arc::new(sink.clone()))
    }

    fn device(id: &str) -> DiscoveredDevice {
        DiscoveredDevice {
            external_id: id.into(),
            display_name: id.into(),
            device_type: "sensor".into(),
            properties: BTreeMap::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn commands_and_ticks_never_overlap() {
        let sink = BroadcastSink::new();
        let handler = handler(
            FakeBinding {
                latency: Duration::from_secs(3),
                ..FakeBinding::default()
            },
            &sink,
        );
        handler.initialize().await.unwrap();

        let mut commands = Vec::new();
        for i in 0..5 {
            let h = handler.clone();
            commands.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(i * 2)).await;
                h.handle_command("relay", Command::Switch(i % 2 == 0)).await
            }));
        }
        for command in commands {
            command.await.unwrap().unwrap();
        }
        tokio::time::sleep(Duration::from_secs(30)).await;

        let binding = handler.binding();
        assert!(binding.calls.load(Ordering::SeqCst) >= 7);
        assert_eq!(binding.max_in_flight.load(Ordering::SeqCst), 1);
        handler.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_goes_offline_and_keeps_polling() {
        let sink = BroadcastSink::new();
        let handler = handler(FakeBinding::default(), &sink);
        handler.initialize().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handler.current_status(), ThingStatus::Online);

        handler
            .binding()
            .fail(Some(PollError::Fetch(FetchError::Timeout)));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(handler.current_status(), ThingStatus::Offline("Timeout".into()));

        let before = handler.binding().calls.load(Ordering::SeqCst);
        handler.binding().fail(None);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(handler.binding().calls.load(Ordering::SeqCst) > before);
        assert_eq!(handler.current_status(), ThingStatus::Online);
        handler.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_poll_goes_offline_and_keeps_polling() {
        let sink = BroadcastSink::new();
        let handler = handler(FakeBinding::default(), &sink);
        handler.initialize().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handler.current_status(), ThingStatus::Online);

        handler.binding().panic_next.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(
            handler.current_status(),
            ThingStatus::Offline("internal error: vendor sent garbage".into())
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(handler.current_status(), ThingStatus::Online);
        handler.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failure_threshold_delays_offline() {
        let sink = BroadcastSink::new();
        let mut cfg = config();
        cfg.failure_threshold = 3;
        let handler = ThingHandler::new(cfg, FakeBinding::default(), Arc::new(sink.clone()));
        handler.initialize().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        handler
            .binding()
            .fail(Some(PollError::DeviceOffline("Status: -1".into())));

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(handler.current_status(), ThingStatus::Online);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(handler.current_status(), ThingStatus::Offline("Status: -1".into()));
        handler.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn new_channels_are_created_before_their_first_state() {
        let sink = BroadcastSink::new();
        let mut rx = sink.subscribe();
        let handler = handler(FakeBinding::default(), &sink);
        handler.initialize().await.unwrap();
        tokio::time::sleep(Duration::from_secs(15)).await;
        handler.dispose().await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        let created = events
            .iter()
            .position(|e| matches!(**e, SinkEvent::ChannelCreated { .. }))
            .unwrap();
        let first_state = events
            .iter()
            .position(|e| matches!(**e, SinkEvent::State { .. }))
            .unwrap();
        assert!(created < first_state);
        let creations = events
            .iter()
            .filter(|e| matches!(***e, SinkEvent::ChannelCreated { .. }))
            .count();
        assert_eq!(creations, 1);
        assert!(sink.has_channel("thing-1", "power"));
    }

    #[tokio::test]
    async fn commands_are_validated_against_the_channel() {
        let sink = BroadcastSink::new();
        let handler = handler(FakeBinding::default(), &sink);

        let err = handler
            .handle_command("temperature", Command::Switch(true))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownChannel { .. }));

        let err = handler
            .handle_command("relay", Command::Number(1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidCommand { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_reports_each_device_once() {
        let sink = BroadcastSink::new();
        let mut rx = sink.subscribe();
        let handler = handler(
            FakeBinding {
                devices: vec![device("a"), device("b"), device("c")],
                ..FakeBinding::default()
            },
            &sink,
        );
        handler.initialize().await.unwrap();

        assert_eq!(handler.discover().await.unwrap().len(), 3);
        assert_eq!(handler.discover().await.unwrap().len(), 0);
        handler.dispose().await;

        let mut discovered = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(*event, SinkEvent::Discovered { .. }) {
                discovered += 1;
            }
        }
        assert_eq!(discovered, 3);
    }

    #[tokio::test]
    async fn offline_bridge_skips_discovery() {
        let sink = BroadcastSink::new();
        let handler = handler(FakeBinding::default(), &sink);
        assert_eq!(
            handler.discover().await.unwrap_err(),
            DiscoveryError::BridgeOffline
        );
    }

    #[tokio::test]
    async fn blank_credentials_are_a_configuration_error() {
        let sink = BroadcastSink::new();
        let cfg = ThingConfig::new("thing-1", "fake", Credentials::token(" "));
        let handler = ThingHandler::new(cfg, FakeBinding::default(), Arc::new(sink));

        assert!(matches!(handler.initialize().await, Err(CoreError::Config { .. })));
        assert!(matches!(
            handler.current_status(),
            ThingStatus::ConfigurationError(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn login_alone_starts_no_tasks() {
        let sink = BroadcastSink::new();
        let handler = handler(FakeBinding::default(), &sink);

        assert_eq!(handler.login().await.unwrap(), ThingStatus::Online);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(handler.binding().calls.load(Ordering::SeqCst), 0);

        handler.refresh().await.unwrap();
        assert_eq!(handler.binding().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispose_is_terminal() {
        let sink = BroadcastSink::new();
        let handler = handler(FakeBinding::default(), &sink);
        handler.initialize().await.unwrap();
        handler.dispose().await;

        assert_eq!(handler.current_status(), ThingStatus::Disposed);
        assert!(matches!(handler.initialize().await, Err(CoreError::Disposed)));
        assert!(matches!(
            handler.handle_command("relay", Command::Switch(true)).await,
            Err(CoreError::Disposed)
        ));
    }
}
