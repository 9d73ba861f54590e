pub mod surface;

pub use surface::{ChartSurface, LineId, LinePoint, LineRole, LineStyle};

use crate::config::RegressionSettings;
use crate::history::{ChunkOutcome, DEFAULT_CHUNK_LIMIT, HistoryLoader, LoadOutcome, Span};
use crate::live::{FeedEffect, LiveFeed};
use crate::notify::Notification;
use crate::reconnect::{ConnectionState, ReconnectPolicy};
use crate::regression::{PatchOutcome, RegressionClient, RegressionEffect, apply_patch};
use crate::series::{Series, Upsert, VolumePoint};
use crate::session::{Session, SessionEffect};
use crate::store::{Change, Store, SubscriberId};
use crate::visualizer::{Visualizer, VisualizerSettings};

use exchange::adapter::historical::{ChunkQuery, HistoryPage, HistoryQuery};
use exchange::adapter::live::FeedMessage;
use exchange::{
    AdapterError, Bar, CandleType, ConnectionId, LiveRegressionParams, RegressionRequest,
    RegressionResultSet, SeriesKey, StreamEvent, Timeframe,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::{cell::Cell, rc::Rc, time::Duration, time::Instant};

/// نماد و پارامترهای نمایش فعلی نمودار
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(default)]
pub struct Selection {
    pub symbol: String,
    pub exchange: String,
    pub interval: Timeframe,
    pub timezone: String,
    pub candle_type: CandleType,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            symbol: "SPY".to_string(),
            exchange: "NYSE".to_string(),
            interval: Timeframe::M1,
            timezone: "UTC".to_string(),
            candle_type: CandleType::Regular,
        }
    }
}

impl Selection {
    pub fn series_key(&self) -> SeriesKey {
        SeriesKey {
            symbol: self.symbol.clone(),
            interval: self.interval,
            timezone: self.timezone.clone(),
            candle_type: self.candle_type,
        }
    }

    pub fn regression_key(&self) -> RegressionKey {
        RegressionKey {
            symbol: self.symbol.clone(),
            exchange: self.exchange.clone(),
        }
    }
}

/// کلید مجموعه نتایج رگرسیون؛ با تغییر نماد یا بورس از بین می‌رود
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegressionKey {
    pub symbol: String,
    pub exchange: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibleRange {
    pub from: i64,
    pub to: i64,
}

/// کلیدهای مخزن نمودار
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChartKey {
    Series(SeriesKey),
    Volume(SeriesKey),
    Regression(RegressionKey),
    LiveMode,
    SessionToken,
    VisibleRange,
}

/// مقادیر مخزن نمودار
#[derive(Debug, Clone, PartialEq)]
pub enum ChartValue {
    Series(Series),
    Volume(Vec<VolumePoint>),
    Regression(RegressionResultSet),
    LiveMode(bool),
    SessionToken(String),
    VisibleRange(VisibleRange),
}

/// پارامترهای قابل تنظیم اجزای نمودار
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSettings {
    pub heartbeat_interval: Duration,
    pub chunk_limit: usize,
    pub reconnect: ReconnectPolicy,
    pub regression_heartbeat: Duration,
    pub visualizer: VisualizerSettings,
    pub show_regression: bool,
}

impl Default for ChartSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(60),
            chunk_limit: DEFAULT_CHUNK_LIMIT,
            reconnect: ReconnectPolicy::default(),
            regression_heartbeat: Duration::from_secs(30),
            visualizer: VisualizerSettings::default(),
            show_regression: true,
        }
    }
}

/// ورودی‌های نمودار: اقدامات کاربر، پاسخ‌های شبکه، رویدادهای جریان و زمان‌سنج‌ها
#[derive(Debug)]
pub enum Input {
    Start,
    SessionInitiated(Result<String, AdapterError>),
    HeartbeatDone {
        token: String,
        result: Result<(), AdapterError>,
    },
    LoadHistory(Span),
    HistoryLoaded {
        seq: u64,
        result: Result<HistoryPage, AdapterError>,
    },
    LoadMore,
    ChunkLoaded {
        seq: u64,
        result: Result<HistoryPage, AdapterError>,
    },
    SetLiveMode(bool),
    SelectSeries(Selection),
    Feed(StreamEvent),
    RunRegression(RegressionSettings),
    RegressionDone {
        seq: u64,
        result: Result<RegressionResultSet, AdapterError>,
    },
    RegressionStream(StreamEvent),
    RefreshRegression,
    RemoveIndicator,
    SetVisualization(bool),
    VisibleRangeChanged(VisibleRange),
    Tick,
}

/// فرمان‌هایی که اجراکننده بیرونی باید به ورودی/خروجی واقعی تبدیل کند
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    InitiateSession,
    Heartbeat {
        token: String,
    },
    FetchHistory {
        seq: u64,
        query: HistoryQuery,
    },
    FetchChunk {
        seq: u64,
        query: ChunkQuery,
    },
    OpenFeed {
        id: ConnectionId,
        key: SeriesKey,
    },
    CloseFeed {
        id: ConnectionId,
    },
    RunRegression {
        seq: u64,
        request: RegressionRequest,
    },
    OpenRegressionStream {
        id: ConnectionId,
        params: LiveRegressionParams,
    },
    SendRegressionFrame {
        id: ConnectionId,
        text: String,
    },
    CloseRegressionStream {
        id: ConnectionId,
    },
    Notify(Notification),
}

/// کنترل‌گر یک نمودار
///
/// همه اجزا (نشست، بارگذاری تاریخی، اتصال زنده، رگرسیون و نمایش خطوط) متعلق به همین
/// نمونه‌اند و فقط از طریق `handle` تغییر می‌کنند. هیچ ورودی/خروجی مستقیمی انجام نمی‌شود؛
/// خروجی `handle` فهرست فرمان‌هایی است که اجراکننده باید انجام دهد.
pub struct Chart<S: ChartSurface> {
    id: Uuid,
    surface: S,
    store: Store<ChartKey, ChartValue>,
    selection: Selection,
    session: Session,
    history: HistoryLoader,
    feed: LiveFeed,
    regression: RegressionClient,
    visualizer: Visualizer,
    redraw: Rc<Cell<bool>>,
    pending_load: Option<Span>,
    live_mode: bool,
}

impl<S: ChartSurface> Chart<S> {
    pub fn new(selection: Selection, settings: ChartSettings, surface: S) -> Self {
        let mut store: Store<ChartKey, ChartValue> = Store::new();
        let redraw = Rc::new(Cell::new(false));

        let flag = Rc::clone(&redraw);
        let mut shape: Option<(usize, i64, i64)> = None;
        store.subscribe(None, move |key, change| {
            match (key, change) {
                (ChartKey::Regression(_), _) => flag.set(true),
                (ChartKey::Series(_), Change::Set(ChartValue::Series(series))) => {
                    // only growth or replacement moves anchors; an in-place last bar does not
                    let now = series
                        .first()
                        .zip(series.last())
                        .map(|(first, last)| (series.len(), first.time, last.time));
                    if now != shape {
                        flag.set(true);
                    }
                    shape = now;
                }
                (ChartKey::Series(_), Change::Removed(_)) => {
                    shape = None;
                    flag.set(true);
                }
                _ => {}
            }
        });

        let mut visualizer = Visualizer::new(settings.visualizer);
        if settings.show_regression {
            visualizer.enable();
        }

        Self {
            id: Uuid::new_v4(),
            surface,
            store,
            selection,
            session: Session::new(settings.heartbeat_interval),
            history: HistoryLoader::new(settings.chunk_limit),
            feed: LiveFeed::new(settings.reconnect),
            regression: RegressionClient::new(settings.reconnect, settings.regression_heartbeat),
            visualizer,
            redraw,
            pending_load: None,
            live_mode: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn store(&self) -> &Store<ChartKey, ChartValue> {
        &self.store
    }

    /// ثبت ناظر بیرونی روی مخزن نمودار
    pub fn subscribe(
        &mut self,
        filter: Option<ChartKey>,
        callback: impl FnMut(&ChartKey, Change<'_, ChartValue>) + 'static,
    ) -> SubscriberId {
        self.store.subscribe(filter, callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        self.store.unsubscribe(id)
    }

    pub fn series(&self) -> Option<&Series> {
        match self.store.get(&ChartKey::Series(self.selection.series_key())) {
            Some(ChartValue::Series(series)) => Some(series),
            _ => None,
        }
    }

    pub fn volume(&self) -> Option<&[VolumePoint]> {
        match self.store.get(&ChartKey::Volume(self.selection.series_key())) {
            Some(ChartValue::Volume(volume)) => Some(volume),
            _ => None,
        }
    }

    pub fn results(&self) -> Option<&RegressionResultSet> {
        match self
            .store
            .get(&ChartKey::Regression(self.selection.regression_key()))
        {
            Some(ChartValue::Regression(results)) => Some(results),
            _ => None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.live_mode
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session.token()
    }

    pub fn feed_state(&self) -> ConnectionState {
        self.feed.state()
    }

    pub fn regression_state(&self) -> ConnectionState {
        self.regression.state()
    }

    pub fn history(&self) -> &HistoryLoader {
        &self.history
    }

    pub fn visualizer(&self) -> &Visualizer {
        &self.visualizer
    }

    /// نزدیک‌ترین زمان‌سنج در انتظار در میان همه اجزا
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.session.next_deadline(),
            self.feed.next_deadline(),
            self.regression.next_deadline(),
            self.visualizer.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    pub fn handle(&mut self, input: Input, now: Instant) -> Vec<Command> {
        let mut commands = match input {
            Input::Start => {
                let effects = self.session.start();
                self.on_session(effects)
            }
            Input::SessionInitiated(result) => {
                let effects = self.session.on_initiated(result, now);
                self.on_session(effects)
            }
            Input::HeartbeatDone { token, result } => {
                let effects = self.session.on_heartbeat(&token, result, now);
                self.on_session(effects)
            }
            Input::LoadHistory(span) => self.load_history(span),
            Input::HistoryLoaded { seq, result } => self.on_history_loaded(seq, result),
            Input::LoadMore => self.load_more(),
            Input::ChunkLoaded { seq, result } => self.on_chunk_loaded(seq, result),
            Input::SetLiveMode(enabled) => self.set_live_mode(enabled, now),
            Input::SelectSeries(selection) => self.select(selection),
            Input::Feed(event) => {
                let effects = self.feed.handle_event(event, now);
                self.on_feed(effects)
            }
            Input::RunRegression(settings) => self.run_regression(settings),
            Input::RegressionDone { seq, result } => {
                let effects = self.regression.on_result(
                    seq,
                    result,
                    self.live_mode,
                    &self.selection.timezone,
                );
                self.on_regression(effects)
            }
            Input::RegressionStream(event) => {
                let effects = self.regression.handle_event(event, now);
                self.on_regression(effects)
            }
            Input::RefreshRegression => {
                let effects = self.regression.refresh(now);
                self.on_regression(effects)
            }
            Input::RemoveIndicator => self.remove_indicator(),
            Input::SetVisualization(enabled) => {
                if enabled {
                    self.visualizer.enable();
                    self.visualizer.set_live(self.live_mode, now);
                } else {
                    self.visualizer.disable(&mut self.surface);
                }
                vec![]
            }
            Input::VisibleRangeChanged(range) => {
                self.store
                    .set(ChartKey::VisibleRange, ChartValue::VisibleRange(range));
                self.visualizer
                    .on_visible_range_changed(self.live_mode, now);
                vec![]
            }
            Input::Tick => self.on_tick(now),
        };

        commands.extend(self.render());
        commands
    }

    fn on_tick(&mut self, now: Instant) -> Vec<Command> {
        let mut commands = vec![];

        let effects = self.session.on_tick(now);
        commands.extend(self.on_session(effects));

        let effects = self.feed.on_tick(now);
        commands.extend(self.on_feed(effects));

        let effects = self.regression.on_tick(now);
        commands.extend(self.on_regression(effects));

        self.visualizer.on_tick(now);
        commands
    }

    fn on_session(&mut self, effects: Vec<SessionEffect>) -> Vec<Command> {
        let mut commands = vec![];

        for effect in effects {
            match effect {
                SessionEffect::Initiate => commands.push(Command::InitiateSession),
                SessionEffect::Heartbeat { token } => {
                    commands.push(Command::Heartbeat { token });
                }
                SessionEffect::Established { token, renewed } => {
                    self.store
                        .set(ChartKey::SessionToken, ChartValue::SessionToken(token));

                    if renewed {
                        log::info!("Chart {}: session renewed, reconnecting", self.id);
                        commands.extend(self.reconnect());
                    } else if let Some(span) = self.pending_load.take() {
                        commands.extend(self.load_history(span));
                    }
                }
                SessionEffect::Expired => {
                    self.store.remove(&ChartKey::SessionToken);
                }
                SessionEffect::Notify(notification) => {
                    commands.push(Command::Notify(notification));
                }
            }
        }
        commands
    }

    /// پس از تمدید نشست: بارگذاری دوباره بازه فعلی و اتصال مجدد حالت زنده
    fn reconnect(&mut self) -> Vec<Command> {
        let mut commands = vec![];

        self.history.invalidate();
        let span = self.pending_load.take().or(self.history.last_span());
        if let Some(span) = span {
            commands.extend(self.load_history(span));
        }

        if self.live_mode {
            let effects = self.feed.connect(self.selection.series_key());
            commands.extend(self.on_feed(effects));
        }
        commands
    }

    fn load_history(&mut self, span: Span) -> Vec<Command> {
        let Some(token) = self.session.token().map(str::to_string) else {
            log::debug!("Chart {}: no session yet, holding history load", self.id);
            self.pending_load = Some(span);
            // live messages queue up until the held load completes
            self.feed.set_loading(true);
            return vec![];
        };

        let Some(seq) = self.history.begin_load(span) else {
            return vec![];
        };

        let effects = self.feed.set_loading(true);
        let mut commands = self.on_feed(effects);
        commands.push(Command::FetchHistory {
            seq,
            query: HistoryQuery {
                session_token: token,
                exchange: self.selection.exchange.clone(),
                key: self.selection.series_key(),
                start_time: span.start,
                end_time: span.end,
            },
        });
        commands
    }

    fn on_history_loaded(
        &mut self,
        seq: u64,
        result: Result<HistoryPage, AdapterError>,
    ) -> Vec<Command> {
        let Some(outcome) = self.history.on_loaded(seq, result) else {
            return vec![];
        };

        let mut commands = vec![];
        let key = self.selection.series_key();

        let series = match outcome {
            LoadOutcome::Loaded(bars) => {
                let series = Series::new(bars);
                log::info!("Chart {}: loaded {} bars for {key}", self.id, series.len());
                series
            }
            LoadOutcome::Failed(e) => {
                log::error!("Chart {}: history load for {key} failed: {e}", self.id);
                commands.push(Command::Notify(Notification::transport(format!(
                    "Failed to load {key}: {e}"
                ))));
                Series::default()
            }
        };

        self.replace_series(series);

        // buffered live messages go on top of the fresh series, in arrival order
        let flushed = self.feed.set_loading(false);
        commands.extend(self.on_feed(flushed));
        commands
    }

    fn load_more(&mut self) -> Vec<Command> {
        match self.history.next_chunk(self.selection.candle_type) {
            Some((seq, query)) => vec![Command::FetchChunk { seq, query }],
            None => vec![],
        }
    }

    fn on_chunk_loaded(
        &mut self,
        seq: u64,
        result: Result<HistoryPage, AdapterError>,
    ) -> Vec<Command> {
        match self.history.on_chunk(seq, result) {
            None => vec![],
            Some(ChunkOutcome::Prepend { bars, exhausted }) => {
                let added = self
                    .update_series(|series| series.prepend(bars))
                    .unwrap_or(0);
                if added > 0 {
                    self.sync_volume();
                    self.push_full_series();
                }
                if exhausted {
                    log::info!("Chart {}: all history loaded", self.id);
                }
                vec![]
            }
            Some(ChunkOutcome::Failed(e)) => {
                log::error!("Chart {}: loading older bars failed: {e}", self.id);
                vec![Command::Notify(Notification::transport(format!(
                    "Failed to load older bars: {e}"
                )))]
            }
        }
    }

    fn set_live_mode(&mut self, enabled: bool, now: Instant) -> Vec<Command> {
        let was_live = self.live_mode;
        let exhausted = self.feed.is_exhausted() || self.regression.is_exhausted();
        if enabled == was_live && !(enabled && exhausted) {
            return vec![];
        }

        self.live_mode = enabled;
        self.store
            .set(ChartKey::LiveMode, ChartValue::LiveMode(enabled));
        self.visualizer.set_live(enabled, now);

        let mut commands = vec![];

        if enabled {
            // a healthy feed stays up when only the regression stream gave up
            if !was_live || self.feed.is_exhausted() {
                let effects = self.feed.connect(self.selection.series_key());
                commands.extend(self.on_feed(effects));
            }
            commands.extend(self.resubscribe_regression());
        } else {
            let effects = self.feed.disconnect();
            commands.extend(self.on_feed(effects));

            let effects = self.regression.unsubscribe();
            commands.extend(self.on_regression(effects));
        }
        commands
    }

    fn select(&mut self, selection: Selection) -> Vec<Command> {
        if selection == self.selection {
            return vec![];
        }

        let old = std::mem::replace(&mut self.selection, selection);
        let instrument_changed =
            old.symbol != self.selection.symbol || old.exchange != self.selection.exchange;
        log::info!(
            "Chart {}: switching {} -> {}",
            self.id,
            old.series_key(),
            self.selection.series_key()
        );

        let mut commands = vec![];

        // detach, close and cancel any pending retry of the old feed
        let effects = self.feed.disconnect();
        commands.extend(self.on_feed(effects));
        self.feed.set_loading(false);
        self.history.invalidate();

        if instrument_changed {
            let effects = self.regression.clear();
            commands.extend(self.on_regression(effects));
            self.store.remove(&ChartKey::Regression(old.regression_key()));
            self.visualizer.forget_reports();
        } else {
            // results survive, the stream does not: its params carry the old timezone
            let effects = self.regression.unsubscribe();
            commands.extend(self.on_regression(effects));
        }

        self.store.remove(&ChartKey::Series(old.series_key()));
        self.store.remove(&ChartKey::Volume(old.series_key()));
        self.surface.set_series(&[]);
        self.surface.set_volume(&[]);
        self.visualizer.invalidate();

        let span = self.pending_load.take().or(self.history.last_span());
        if let Some(span) = span {
            commands.extend(self.load_history(span));
        }

        if self.live_mode {
            let effects = self.feed.connect(self.selection.series_key());
            commands.extend(self.on_feed(effects));
            commands.extend(self.resubscribe_regression());
        }
        commands
    }

    /// اشتراک دوباره آخرین تحلیل زنده با منطقه زمانی فعلی
    fn resubscribe_regression(&mut self) -> Vec<Command> {
        let params = self
            .regression
            .last_request()
            .filter(|_| self.regression.wants_live() && self.regression.subscription().is_none())
            .map(|request| request.live_params(&self.selection.timezone));

        match params {
            Some(params) => {
                let effects = self.regression.subscribe(params);
                self.on_regression(effects)
            }
            None => vec![],
        }
    }

    fn on_feed(&mut self, effects: Vec<FeedEffect>) -> Vec<Command> {
        let mut commands = vec![];

        for effect in effects {
            match effect {
                FeedEffect::Open { id, key } => commands.push(Command::OpenFeed { id, key }),
                FeedEffect::Close { id } => commands.push(Command::CloseFeed { id }),
                FeedEffect::Apply(message) => self.apply_feed(message),
                FeedEffect::Notify(notification) => commands.push(Command::Notify(notification)),
            }
        }
        commands
    }

    fn apply_feed(&mut self, message: FeedMessage) {
        let bars = message.update_bars();

        match message {
            FeedMessage::Backfill(batch) => {
                let received = batch.len();
                let appended = self
                    .update_series(|series| series.apply_backfill(batch))
                    .unwrap_or(0);
                log::debug!(
                    "Chart {}: backfill of {received} bars, {appended} new",
                    self.id
                );

                if appended > 0 {
                    self.sync_volume();
                    self.push_full_series();
                }
            }
            FeedMessage::Update { .. } => {
                for bar in bars {
                    self.apply_live_bar(bar);
                }
            }
        }
    }

    fn apply_live_bar(&mut self, bar: Bar) {
        let (outcome, is_last) = self
            .update_series(|series| {
                let outcome = series.upsert(bar);
                (outcome, series.last().is_some_and(|b| b.time == bar.time))
            })
            .unwrap_or((Upsert::Stale, false));

        match outcome {
            Upsert::Stale => {
                log::debug!("Chart {}: ignoring stale live bar at {}", self.id, bar.time);
            }
            Upsert::Replaced | Upsert::Appended if is_last => {
                let point = VolumePoint::from(&bar);
                self.update_volume(|volume| match volume.last_mut() {
                    Some(last) if last.time == point.time => *last = point,
                    _ => volume.push(point),
                });
                self.surface.update_last_bar(&bar, point);
            }
            Upsert::Replaced | Upsert::Appended => {
                self.sync_volume();
                self.push_full_series();
            }
        }
    }

    fn run_regression(&mut self, settings: RegressionSettings) -> Vec<Command> {
        let request = RegressionRequest {
            symbol: self.selection.symbol.clone(),
            exchange: self.selection.exchange.clone(),
            regression_length: settings.regression_length,
            lookback_periods: settings.lookback_periods,
            timeframes: settings.timeframes,
        };

        let effects = self.regression.run(request, settings.live_updates);
        self.on_regression(effects)
    }

    /// حذف اندیکاتور: ابتدا اشتراک زنده و سپس مجموعه نتایج
    fn remove_indicator(&mut self) -> Vec<Command> {
        let effects = self.regression.clear();
        let commands = self.on_regression(effects);

        self.store
            .remove(&ChartKey::Regression(self.selection.regression_key()));
        commands
    }

    fn on_regression(&mut self, effects: Vec<RegressionEffect>) -> Vec<Command> {
        let mut commands = vec![];
        let key = ChartKey::Regression(self.selection.regression_key());

        for effect in effects {
            match effect {
                RegressionEffect::Run { seq, request } => {
                    commands.push(Command::RunRegression { seq, request });
                }
                RegressionEffect::Open { id, params } => {
                    commands.push(Command::OpenRegressionStream { id, params });
                }
                RegressionEffect::Send { id, text } => {
                    commands.push(Command::SendRegressionFrame { id, text });
                }
                RegressionEffect::Close { id } => {
                    commands.push(Command::CloseRegressionStream { id });
                }
                RegressionEffect::Replace(results) => {
                    self.store.set(key.clone(), ChartValue::Regression(results));
                }
                RegressionEffect::Patch(patch) => {
                    let outcome = self.store.update(&key, |value| match value {
                        ChartValue::Regression(results) => Some(apply_patch(results, &patch)),
                        _ => None,
                    });

                    match outcome.flatten() {
                        None => {
                            log::debug!("Chart {}: live patch without results, dropped", self.id);
                        }
                        Some(PatchOutcome::UnknownTimeframe(tf)) => {
                            log::debug!("Chart {}: live patch for unknown timeframe {tf}", self.id);
                        }
                        Some(PatchOutcome::Applied { updated, ignored }) => {
                            if !ignored.is_empty() {
                                log::debug!(
                                    "Chart {}: ignored patch cells for lookbacks {ignored:?}",
                                    self.id
                                );
                            }
                            log::trace!("Chart {}: patched lookbacks {updated:?}", self.id);
                        }
                    }
                }
                RegressionEffect::Notify(notification) => {
                    commands.push(Command::Notify(notification));
                }
            }
        }
        commands
    }

    /// حل همه باطل‌سازی‌ها پیش از بازگشت از `handle`
    fn render(&mut self) -> Vec<Command> {
        if self.redraw.replace(false) {
            self.visualizer.invalidate();
        }

        let series_key = ChartKey::Series(self.selection.series_key());
        let results_key = ChartKey::Regression(self.selection.regression_key());

        let bars: &[Bar] = match self.store.get(&series_key) {
            Some(ChartValue::Series(series)) => series.bars(),
            _ => &[],
        };
        let results = match self.store.get(&results_key) {
            Some(ChartValue::Regression(results)) => Some(results),
            _ => None,
        };

        self.visualizer
            .render(&mut self.surface, results, self.selection.interval, bars)
            .into_iter()
            .map(Command::Notify)
            .collect()
    }

    fn replace_series(&mut self, series: Series) {
        let key = self.selection.series_key();
        let volume = series.volume();

        self.surface.set_series(series.bars());
        self.surface.set_volume(&volume);

        self.store
            .set(ChartKey::Series(key.clone()), ChartValue::Series(series));
        self.store
            .set(ChartKey::Volume(key), ChartValue::Volume(volume));
    }

    /// تغییر سری فعلی از مسیر مخزن؛ اگر سری وجود نداشته باشد ابتدا سری خالی ساخته می‌شود
    fn update_series<R>(&mut self, f: impl FnOnce(&mut Series) -> R) -> Option<R> {
        let key = ChartKey::Series(self.selection.series_key());
        if !self.store.contains(&key) {
            self.store
                .set(key.clone(), ChartValue::Series(Series::default()));
        }

        self.store
            .update(&key, |value| match value {
                ChartValue::Series(series) => Some(f(series)),
                _ => None,
            })
            .flatten()
    }

    fn update_volume(&mut self, f: impl FnOnce(&mut Vec<VolumePoint>)) {
        let key = ChartKey::Volume(self.selection.series_key());
        if !self.store.contains(&key) {
            self.store.set(key.clone(), ChartValue::Volume(vec![]));
        }

        self.store.update(&key, |value| {
            if let ChartValue::Volume(volume) = value {
                f(volume);
            }
        });
    }

    fn sync_volume(&mut self) {
        let volume = self.series().map(Series::volume).unwrap_or_default();
        self.store.set(
            ChartKey::Volume(self.selection.series_key()),
            ChartValue::Volume(volume),
        );
    }

    fn push_full_series(&mut self) {
        if let Some(ChartValue::Series(series)) = self
            .store
            .get(&ChartKey::Series(self.selection.series_key()))
        {
            self.surface.set_series(series.bars());
        }
        if let Some(ChartValue::Volume(volume)) = self
            .store
            .get(&ChartKey::Volume(self.selection.series_key()))
        {
            self.surface.set_volume(volume);
        }
    }
}
