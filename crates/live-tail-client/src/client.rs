use std::{collections::VecDeque, sync::Arc};

use chrono::Utc;
use futures::StreamExt;
use reqwest::cookie::Jar;
use reqwest_eventsource::{Event, EventSource};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::LiveTailError,
    machine::{Effect, LiveTailFilters, LiveTailMachine, LiveTailView},
};

pub const STREAM_PATH: &str = "/api/live-tail/stream";

#[derive(Debug, Clone)]
pub struct LiveTailConfig {
    /// Console origin, e.g. `https://loglens.example.com`.
    pub console_url: String,
    /// Cookie header to seed the session with (`loglens_access=...; loglens_refresh=...`).
    pub session_cookie: Option<String>,
    pub filters: LiveTailFilters,
    pub start_paused: bool,
}

impl LiveTailConfig {
    pub fn new(console_url: impl Into<String>) -> Self {
        Self {
            console_url: console_url.into(),
            session_cookie: None,
            filters: LiveTailFilters::default(),
            start_paused: false,
        }
    }
}

#[derive(Debug)]
enum Command {
    Pause,
    Resume,
    SetFilters(LiveTailFilters),
    Reset,
}

/// Handle to a background task that keeps one live tail channel open.
///
/// Dropping the handle cancels the task, which closes the channel and any pending reconnect.
pub struct LiveTailClient {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<LiveTailView>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LiveTailClient {
    pub fn spawn(config: LiveTailConfig) -> Result<Self, LiveTailError> {
        let console_url = Url::parse(&config.console_url)?;
        if console_url.cannot_be_a_base() {
            return Err(LiveTailError::CannotBeABase(config.console_url));
        }
        let stream_url = console_url.join(STREAM_PATH)?;

        // The jar also keeps access cookies the console renews mid-session.
        let jar = Arc::new(Jar::default());
        if let Some(cookie) = &config.session_cookie {
            for pair in cookie.split(';').map(str::trim).filter(|p| !p.is_empty()) {
                jar.add_cookie_str(pair, &console_url);
            }
        }
        let http = reqwest::Client::builder().cookie_provider(jar).build()?;

        let machine = LiveTailMachine::new(config.filters, config.start_paused);
        let (view_tx, view) = watch::channel(machine.view());
        let (commands, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let driver = Driver {
            http,
            stream_url,
            machine,
            source: None,
            reconnect_at: None,
            view_tx,
        };
        let task = tokio::spawn(driver.run(command_rx, cancel.clone()));

        Ok(Self {
            commands,
            view,
            cancel,
            task: Some(task),
        })
    }

    pub fn view(&self) -> LiveTailView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LiveTailView> {
        self.view.clone()
    }

    pub fn pause(&self) -> Result<(), LiveTailError> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> Result<(), LiveTailError> {
        self.send(Command::Resume)
    }

    pub fn set_filters(&self, filters: LiveTailFilters) -> Result<(), LiveTailError> {
        self.send(Command::SetFilters(filters))
    }

    pub fn reset(&self) -> Result<(), LiveTailError> {
        self.send(Command::Reset)
    }

    /// Stops the driver and waits for it to release the channel.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(target: "loglens::live_tail", error = %err, "live tail driver panicked");
            }
        }
    }

    fn send(&self, command: Command) -> Result<(), LiveTailError> {
        self.commands
            .send(command)
            .map_err(|_| LiveTailError::Closed)
    }
}

impl Drop for LiveTailClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Wake {
    Shutdown,
    Command(Command),
    Stream(Option<Result<Event, reqwest_eventsource::Error>>),
    Timer,
}

struct Driver {
    http: reqwest::Client,
    stream_url: Url,
    machine: LiveTailMachine,
    source: Option<EventSource>,
    reconnect_at: Option<Instant>,
    view_tx: watch::Sender<LiveTailView>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, cancel: CancellationToken) {
        let effects = self.machine.start();
        self.apply(effects);
        self.publish();

        loop {
            let wake = tokio::select! {
                _ = cancel.cancelled() => Wake::Shutdown,
                command = commands.recv() => command.map_or(Wake::Shutdown, Wake::Command),
                event = next_event(&mut self.source) => Wake::Stream(event),
                _ = sleep_until(self.reconnect_at) => Wake::Timer,
            };

            let effects = match wake {
                Wake::Shutdown => {
                    let effects = self.machine.shutdown();
                    self.apply(effects);
                    self.publish();
                    info!(target: "loglens::live_tail", "live tail driver stopped");
                    return;
                }
                Wake::Command(Command::Pause) => self.machine.pause(),
                Wake::Command(Command::Resume) => self.machine.resume(),
                Wake::Command(Command::SetFilters(filters)) => self.machine.set_filters(filters),
                Wake::Command(Command::Reset) => self.machine.reset(),
                Wake::Stream(Some(Ok(Event::Open))) => self.machine.on_open(),
                Wake::Stream(Some(Ok(Event::Message(message)))) => {
                    self.machine.on_frame(&message.data, Utc::now())
                }
                Wake::Stream(Some(Err(err))) => {
                    debug!(target: "loglens::live_tail", error = %err, "live tail channel error");
                    self.machine.on_error(Instant::now())
                }
                Wake::Stream(None) => self.machine.on_error(Instant::now()),
                Wake::Timer => {
                    self.reconnect_at = None;
                    self.machine.on_timer(Instant::now())
                }
            };
            self.apply(effects);
            self.publish();
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        let mut queue = VecDeque::from(effects);
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Open(filters) => {
                    self.close();
                    if let Err(err) = self.open(&filters) {
                        warn!(target: "loglens::live_tail", error = %err, "failed to open live tail channel");
                        queue.extend(self.machine.on_error(Instant::now()));
                    }
                }
                Effect::Close => self.close(),
                Effect::ScheduleReconnect { at, .. } => self.reconnect_at = Some(at),
                Effect::CancelTimer => self.reconnect_at = None,
            }
        }
    }

    fn open(&mut self, filters: &LiveTailFilters) -> Result<(), reqwest_eventsource::CannotCloneRequestError> {
        let mut url = self.stream_url.clone();
        let pairs = filters.query_pairs();
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        debug!(target: "loglens::live_tail", url = %url, "opening live tail channel");
        self.source = Some(EventSource::new(self.http.get(url))?);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
        }
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.machine.view());
    }
}

async fn next_event(
    source: &mut Option<EventSource>,
) -> Option<Result<Event, reqwest_eventsource::Error>> {
    match source {
        Some(source) => source.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
