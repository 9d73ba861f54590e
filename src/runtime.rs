use crate::surface::LogSurface;

use data::color::rgba_to_hex;
use data::regression::legend;
use data::{Chart, Command, Input};
use exchange::adapter::{historical, live, regression, session, stream};
use exchange::{Backend, ConnectionId, StreamEvent};

use iced_futures::futures::{Stream, StreamExt};
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;

use std::future::Future;
use std::time::Instant;

/// اجراکننده فرمان‌های نمودار روی tokio
///
/// همه وضعیت در `Chart` است؛ این ساختار فقط درخواست‌ها را اجرا می‌کند و نتیجه‌ها را
/// به صورت `Input` به همان حلقه برمی‌گرداند.
pub struct Runtime {
    backend: Backend,
    chart: Chart<LogSurface>,
    sender: mpsc::UnboundedSender<Input>,
    inbox: mpsc::UnboundedReceiver<Input>,
    feeds: FxHashMap<ConnectionId, stream::Link>,
    regression_streams: FxHashMap<ConnectionId, stream::Link>,
}

impl Runtime {
    pub fn new(backend: Backend, chart: Chart<LogSurface>) -> Self {
        let (sender, inbox) = mpsc::unbounded_channel();

        Self {
            backend,
            chart,
            sender,
            inbox,
            feeds: FxHashMap::default(),
            regression_streams: FxHashMap::default(),
        }
    }

    /// اجرای حلقه رویداد تا دریافت Ctrl+C
    pub async fn run(mut self, initial: Vec<Input>) {
        for input in initial {
            self.dispatch(input);
        }

        loop {
            let deadline = self.chart.next_deadline();

            tokio::select! {
                Some(input) = self.inbox.recv() => self.dispatch(input),
                () = sleep_until(deadline) => self.dispatch(Input::Tick),
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Shutting down: {}", self.chart.surface().summary());
                    break;
                }
            }
        }

        for (_, link) in self.feeds.drain().chain(self.regression_streams.drain()) {
            link.close();
        }
    }

    fn dispatch(&mut self, input: Input) {
        match &input {
            Input::Feed(StreamEvent::Closed(id, _)) => {
                self.feeds.remove(id);
            }
            Input::RegressionStream(StreamEvent::Closed(id, _)) => {
                self.regression_streams.remove(id);
            }
            _ => {}
        }
        let analysis_done = matches!(input, Input::RegressionDone { .. });

        for command in self.chart.handle(input, Instant::now()) {
            self.execute(command);
        }

        if analysis_done {
            self.log_legend();
        }
    }

    fn log_legend(&self) {
        let Some(results) = self.chart.results() else {
            return;
        };
        let interval = self.chart.selection().interval;

        for row in legend(results, interval) {
            log::info!(
                "{interval} lookback {:>3} {}: slope {:.4} intercept {:.2} r {:.3} std {:.3}",
                row.lookback,
                rgba_to_hex(row.color),
                row.slope,
                row.intercept,
                row.r_value,
                row.std_dev
            );
        }
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::InitiateSession => {
                let backend = self.backend.clone();
                self.spawn(async move { Input::SessionInitiated(session::initiate(&backend).await) });
            }
            Command::Heartbeat { token } => {
                let backend = self.backend.clone();
                self.spawn(async move {
                    let result = session::heartbeat(&backend, &token).await;
                    Input::HeartbeatDone { token, result }
                });
            }
            Command::FetchHistory { seq, query } => {
                let backend = self.backend.clone();
                self.spawn(async move {
                    let result = historical::fetch_history(&backend, &query).await;
                    Input::HistoryLoaded { seq, result }
                });
            }
            Command::FetchChunk { seq, query } => {
                let backend = self.backend.clone();
                self.spawn(async move {
                    let result = historical::fetch_chunk(&backend, &query).await;
                    Input::ChunkLoaded { seq, result }
                });
            }
            Command::OpenFeed { id, key } => {
                let (link, events) = stream::open(id, live::feed_url(&self.backend, &key));
                self.feeds.insert(id, link);
                self.forward(events, Input::Feed);
            }
            Command::CloseFeed { id } => {
                if let Some(link) = self.feeds.remove(&id) {
                    link.close();
                }
            }
            Command::RunRegression { seq, request } => {
                let backend = self.backend.clone();
                self.spawn(async move {
                    let result = regression::run_analysis(&backend, &request).await;
                    Input::RegressionDone { seq, result }
                });
            }
            Command::OpenRegressionStream { id, params } => {
                let url = regression::stream_url(&self.backend, &params);
                let (link, events) = stream::open(id, url);
                self.regression_streams.insert(id, link);
                self.forward(events, Input::RegressionStream);
            }
            Command::SendRegressionFrame { id, text } => {
                let sent = self
                    .regression_streams
                    .get(&id)
                    .is_some_and(|link| link.send_text(text));
                if !sent {
                    log::warn!("Regression stream {id}: frame dropped, connection gone");
                }
            }
            Command::CloseRegressionStream { id } => {
                if let Some(link) = self.regression_streams.remove(&id) {
                    link.close();
                }
            }
            Command::Notify(notification) => {
                log::warn!("{notification}");
            }
        }
    }

    fn spawn(&self, task: impl Future<Output = Input> + Send + 'static) {
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let _ = sender.send(task.await);
        });
    }

    fn forward(
        &self,
        events: impl Stream<Item = StreamEvent> + Send + 'static,
        wrap: fn(StreamEvent) -> Input,
    ) {
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let mut events = std::pin::pin!(events);
            while let Some(event) = events.next().await {
                if sender.send(wrap(event)).is_err() {
                    break;
                }
            }
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}
