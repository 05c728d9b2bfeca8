use crate::{EventBatcher, InterceptedResponse, NotifyError, PageProbe, ResponseMatchers};
use cove_config::AppConfig;
use cove_core::{NotificationOutput, PageTypeKind};
use cove_email::{EmailService, RawEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Capacity of the queue between the response listener and the batcher.
const EVENT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct MultiplexerSettings {
    pub login_url: String,
    pub entry_api_url: String,
    pub logged_in_poll_interval: Duration,
    pub page_type_poll_interval: Duration,
    pub batcher: EventBatcher,
}

impl MultiplexerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            login_url: format!("{}/login", config.provider.entry_url.trim_end_matches('/')),
            entry_api_url: config.provider.entry_api_url.clone(),
            logged_in_poll_interval: config.notifications.logged_in_poll_interval(),
            page_type_poll_interval: config.notifications.page_type_poll_interval(),
            batcher: EventBatcher::new(config.sync.quiet_interval(), config.sync.max_batch_events),
        }
    }
}

/// Merges login state, page type, unread count and entity batch updates into
/// one stream of [`NotificationOutput`]s.
pub struct NotificationMultiplexer {
    settings: MultiplexerSettings,
    matchers: Arc<ResponseMatchers>,
    probe: Arc<dyn PageProbe>,
    email: EmailService,
}

/// Running multiplexer. Dropping it aborts the tasks.
pub struct NotificationHandle {
    cancel: CancellationToken,
    pollers: JoinSet<()>,
    listeners: JoinSet<()>,
}

impl NotificationHandle {
    /// Tears down every timer and subscription. Pending events that have not
    /// formed a batch yet are discarded.
    pub async fn stop(mut self) -> Result<(), NotifyError> {
        self.cancel.cancel();
        join_all(&mut self.listeners).await?;
        join_all(&mut self.pollers).await?;
        tracing::info!("notification streams stopped");
        Ok(())
    }

    /// Waits for the response listeners to drain, which happens once every
    /// sender of the response channel is gone, then stops the pollers. The
    /// last pending batch is applied before this returns.
    pub async fn finish(mut self) -> Result<(), NotifyError> {
        join_all(&mut self.listeners).await?;
        self.cancel.cancel();
        join_all(&mut self.pollers).await?;
        tracing::info!("notification streams finished");
        Ok(())
    }
}

async fn join_all(tasks: &mut JoinSet<()>) -> Result<(), NotifyError> {
    while let Some(joined) = tasks.join_next().await {
        joined?;
    }
    Ok(())
}

impl NotificationMultiplexer {
    pub fn new(
        settings: MultiplexerSettings,
        probe: Arc<dyn PageProbe>,
        email: EmailService,
    ) -> Result<Self, NotifyError> {
        let matchers = Arc::new(ResponseMatchers::new(&settings.entry_api_url)?);
        Ok(Self {
            settings,
            matchers,
            probe,
            email,
        })
    }

    /// Subscribes to `responses` before returning, so nothing sent afterwards
    /// is missed.
    pub fn start(
        &self,
        responses: &broadcast::Sender<InterceptedResponse>,
    ) -> (NotificationHandle, mpsc::UnboundedReceiver<NotificationOutput>) {
        let cancel = CancellationToken::new();
        let (output, notifications) = mpsc::unbounded_channel();
        let mut pollers = JoinSet::new();
        let mut listeners = JoinSet::new();

        pollers.spawn(watch_logged_in(
            self.probe.clone(),
            self.settings.logged_in_poll_interval,
            output.clone(),
            cancel.clone(),
        ));
        pollers.spawn(watch_page_type(
            self.probe.clone(),
            self.settings.login_url.clone(),
            self.settings.page_type_poll_interval,
            output.clone(),
            cancel.clone(),
        ));
        listeners.spawn(watch_unread(
            self.matchers.clone(),
            responses.subscribe(),
            output.clone(),
            cancel.clone(),
        ));

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (batches_tx, batches_rx) = mpsc::unbounded_channel();
        listeners.spawn(collect_events(
            self.matchers.clone(),
            responses.subscribe(),
            events_tx,
            cancel.clone(),
        ));
        listeners.spawn(self.settings.batcher.run(events_rx, batches_tx, cancel.clone()));
        listeners.spawn(apply_batches(
            self.email.clone(),
            batches_rx,
            output,
            cancel.clone(),
        ));

        tracing::info!(
            login_url = %self.settings.login_url,
            quiet_ms = self.settings.batcher.quiet().as_millis() as u64,
            "notification streams started"
        );

        (
            NotificationHandle {
                cancel,
                pollers,
                listeners,
            },
            notifications,
        )
    }
}

fn emit(output: &mpsc::UnboundedSender<NotificationOutput>, notification: NotificationOutput) -> bool {
    tracing::debug!(?notification, "notification");
    output.send(notification).is_ok()
}

fn poll_interval(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn watch_logged_in(
    probe: Arc<dyn PageProbe>,
    period: Duration,
    output: mpsc::UnboundedSender<NotificationOutput>,
    cancel: CancellationToken,
) {
    let mut ticker = poll_interval(period);
    let mut last: Option<bool> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let logged_in = probe.is_logged_in().await;
        if last == Some(logged_in) {
            continue;
        }
        last = Some(logged_in);

        if logged_in {
            probe.clear_skip_login_delay().await;
        }
        if !emit(&output, NotificationOutput::logged_in(logged_in)) {
            return;
        }
    }
}

async fn watch_page_type(
    probe: Arc<dyn PageProbe>,
    login_url: String,
    period: Duration,
    output: mpsc::UnboundedSender<NotificationOutput>,
    cancel: CancellationToken,
) {
    let mut ticker = poll_interval(period);
    let mut last: Option<PageTypeKind> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let mut page_type = crate::detect_page_type(probe.as_ref(), &login_url).await;
        if last == Some(page_type.kind) {
            continue;
        }
        last = Some(page_type.kind);

        if page_type.kind == PageTypeKind::Login {
            page_type.skip_login_delay_logic = Some(probe.take_skip_login_delay().await);
        }
        if !emit(&output, NotificationOutput::page_type(page_type)) {
            return;
        }
    }
}

async fn watch_unread(
    matchers: Arc<ResponseMatchers>,
    mut responses: broadcast::Receiver<InterceptedResponse>,
    output: mpsc::UnboundedSender<NotificationOutput>,
    cancel: CancellationToken,
) {
    let mut last: Option<u64> = None;

    loop {
        let response = tokio::select! {
            _ = cancel.cancelled() => return,
            received = responses.recv() => match received {
                Ok(response) => response,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "unread listener lagged behind");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
        };

        let unread = match matchers.unread(&response) {
            Ok(Some(unread)) => unread,
            Ok(None) => continue,
            Err(err) => {
                tracing::warn!(url = %response.url, "skipping counter response: {err}");
                continue;
            }
        };

        if last == Some(unread) {
            continue;
        }
        last = Some(unread);

        if !emit(&output, NotificationOutput::unread(unread)) {
            return;
        }
    }
}

async fn collect_events(
    matchers: Arc<ResponseMatchers>,
    mut responses: broadcast::Receiver<InterceptedResponse>,
    events: mpsc::Sender<RawEvent>,
    cancel: CancellationToken,
) {
    loop {
        let response = tokio::select! {
            _ = cancel.cancelled() => return,
            received = responses.recv() => match received {
                Ok(response) => response,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event listener lagged behind, events lost");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
        };

        if !matchers.is_events(&response.url) {
            continue;
        }

        let event = match RawEvent::from_json(&response.body) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(url = %response.url, "skipping event response: {err}");
                continue;
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => return,
            sent = events.send(event) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

async fn apply_batches(
    email: EmailService,
    mut batches: mpsc::UnboundedReceiver<Vec<RawEvent>>,
    output: mpsc::UnboundedSender<NotificationOutput>,
    cancel: CancellationToken,
) {
    let mut counter: u64 = 0;

    loop {
        let batch = tokio::select! {
            _ = cancel.cancelled() => return,
            batch = batches.recv() => match batch {
                Some(batch) => batch,
                None => return,
            },
        };

        match email.ingest(&batch).await {
            Ok(Some((_, revision))) => {
                counter += 1;
                tracing::debug!(counter, revision, "entity batch applied");
                if !emit(&output, NotificationOutput::batch_entity_updates_counter(counter)) {
                    return;
                }
            }
            Ok(None) => {}
            Err(err) => tracing::error!(events = batch.len(), "failed to apply entity batch: {err}"),
        }
    }
}
