use crate::color::lookback_color;
use crate::notify::Notification;
use crate::reconnect::{ConnectionState, ReconnectPolicy, Reconnector, Transition};
use crate::timer::Timers;

use enum_map::Enum;
use exchange::adapter::regression::{
    HEARTBEAT_FRAME, RegressionMessage, RegressionPatch, parse_regression_message,
};
use exchange::{
    AdapterError, ConnectionId, LiveRegressionParams, RegressionRequest, RegressionResultSet,
    StreamEvent, Timeframe,
};
use palette::rgb::Rgba;

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum)]
enum RegressionTimer {
    Heartbeat,
}

/// خروجی‌های کلاینت رگرسیون
#[derive(Debug, Clone, PartialEq)]
pub enum RegressionEffect {
    Run {
        seq: u64,
        request: RegressionRequest,
    },
    Open {
        id: ConnectionId,
        params: LiveRegressionParams,
    },
    Send {
        id: ConnectionId,
        text: String,
    },
    Close {
        id: ConnectionId,
    },
    Replace(RegressionResultSet), // جایگزینی کامل مجموعه نتایج
    Patch(RegressionPatch),       // بروزرسانی جزئی خانه‌ها
    Notify(Notification),
}

/// نتیجه اعمال یک بروزرسانی زنده روی مجموعه نتایج
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied {
        updated: Vec<u32>, // دوره‌هایی که مقدارشان تغییر کرد
        ignored: Vec<u32>, // دوره‌هایی که در پارامترهای درخواست نبودند
    },
    UnknownTimeframe(Timeframe),
}

/// اعمال بروزرسانی زنده: فقط خانه‌های نام‌برده بازنویسی می‌شوند
///
/// ردیف بازه زمانی جدید هرگز از روی یک بروزرسانی ساخته نمی‌شود.
pub fn apply_patch(set: &mut RegressionResultSet, patch: &RegressionPatch) -> PatchOutcome {
    let allowed = set.request_params.lookback_periods.clone();

    let Some(row) = set.timeframe_mut(patch.timeframe) else {
        return PatchOutcome::UnknownTimeframe(patch.timeframe);
    };

    let mut updated = vec![];
    let mut ignored = vec![];

    for (lookback, cell) in &patch.results {
        if !allowed.contains(lookback) {
            ignored.push(*lookback);
            continue;
        }
        if row.results.get(lookback) != Some(cell) {
            row.results.insert(*lookback, cell.clone());
            updated.push(*lookback);
        }
    }

    PatchOutcome::Applied { updated, ignored }
}

/// یک ردیف از راهنمای جدول نتایج
#[derive(Debug, Clone, PartialEq)]
pub struct LegendRow {
    pub lookback: u32,
    pub color: Rgba,
    pub slope: f64,
    pub intercept: f64,
    pub r_value: f64,
    pub std_dev: f64,
}

pub fn legend(set: &RegressionResultSet, timeframe: Timeframe) -> Vec<LegendRow> {
    set.timeframe(timeframe)
        .map(|row| {
            row.results
                .iter()
                .map(|(lookback, cell)| LegendRow {
                    lookback: *lookback,
                    color: lookback_color(*lookback),
                    slope: cell.slope,
                    intercept: cell.intercept,
                    r_value: cell.r_value,
                    std_dev: cell.std_dev,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// کلاینت موتور رگرسیون: تحلیل کامل و اشتراک زنده
///
/// در هر لحظه حداکثر یک اشتراک زنده وجود دارد؛ اشتراک جدید ابتدا اشتراک قبلی را می‌بندد.
#[derive(Debug)]
pub struct RegressionClient {
    seq: u64,
    in_flight: Option<(u64, bool)>, // (شماره درخواست، اشتراک زنده خواسته شده؟)
    last_request: Option<RegressionRequest>,
    live_requested: bool,
    subscription: Option<LiveRegressionParams>,
    connection: Reconnector,
    heartbeat_interval: Duration,
    timers: Timers<RegressionTimer>,
}

impl RegressionClient {
    pub fn new(policy: ReconnectPolicy, heartbeat_interval: Duration) -> Self {
        Self {
            seq: 0,
            in_flight: None,
            last_request: None,
            live_requested: false,
            subscription: None,
            connection: Reconnector::new(policy),
            heartbeat_interval,
            timers: Timers::default(),
        }
    }

    /// آیا اشتراک زنده پس از آخرین تلاش مجاز رها شده است؟
    pub fn is_exhausted(&self) -> bool {
        self.connection.is_exhausted()
    }

    pub fn last_request(&self) -> Option<&RegressionRequest> {
        self.last_request.as_ref()
    }

    /// آیا آخرین تحلیل با اشتراک زنده درخواست شده است؟
    pub fn wants_live(&self) -> bool {
        self.live_requested
    }

    pub fn subscription(&self) -> Option<&LiveRegressionParams> {
        self.subscription.as_ref()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        [self.timers.next_deadline(), self.connection.retry_deadline()]
            .into_iter()
            .flatten()
            .min()
    }

    /// اجرای تحلیل کامل؛ درخواست جدید پاسخ‌ها و اشتراک زنده درخواست‌های قبلی را بی‌اعتبار می‌کند
    pub fn run(&mut self, request: RegressionRequest, live: bool) -> Vec<RegressionEffect> {
        // an open stream only patches the set it was subscribed for
        let mut effects = self.unsubscribe();

        self.seq += 1;
        self.in_flight = Some((self.seq, live));
        self.last_request = Some(request.clone());
        self.live_requested = live;

        log::info!(
            "Regression #{}: {} {} lookbacks {:?} on {:?}",
            self.seq,
            request.symbol,
            request.exchange,
            request.lookback_periods,
            request.timeframes
        );
        effects.push(RegressionEffect::Run {
            seq: self.seq,
            request,
        });
        effects
    }

    pub fn on_result(
        &mut self,
        seq: u64,
        result: Result<RegressionResultSet, AdapterError>,
        live_mode: bool,
        timezone: &str,
    ) -> Vec<RegressionEffect> {
        let live = match self.in_flight {
            Some((current, live)) if current == seq => live,
            _ => {
                log::debug!("Dropping stale regression result #{seq}");
                return vec![];
            }
        };
        self.in_flight = None;

        match result {
            Ok(set) => {
                let mut effects = vec![RegressionEffect::Replace(set)];

                let params = self
                    .last_request
                    .as_ref()
                    .filter(|_| live && live_mode)
                    .map(|request| request.live_params(timezone));
                if let Some(params) = params {
                    effects.extend(self.subscribe(params));
                }
                effects
            }
            Err(e) => {
                log::error!("Regression #{seq} failed: {e}");
                vec![RegressionEffect::Notify(Notification::transport(format!(
                    "Regression analysis failed: {e}"
                )))]
            }
        }
    }

    pub fn subscribe(&mut self, params: LiveRegressionParams) -> Vec<RegressionEffect> {
        let mut effects = self.unsubscribe();

        let id = self.connection.open();
        log::info!(
            "Regression stream {id}: subscribing to {} {}",
            params.symbol,
            params.exchange
        );

        self.subscription = Some(params.clone());
        effects.push(RegressionEffect::Open { id, params });
        effects
    }

    pub fn unsubscribe(&mut self) -> Vec<RegressionEffect> {
        self.timers.cancel_all();
        self.subscription = None;

        match self.connection.close() {
            Some(id) => {
                log::info!("Regression stream {id}: unsubscribing");
                vec![RegressionEffect::Close { id }]
            }
            None => vec![],
        }
    }

    /// حذف اندیکاتور: ابتدا اشتراک بسته و سپس همه وضعیت پاک می‌شود
    pub fn clear(&mut self) -> Vec<RegressionEffect> {
        let effects = self.unsubscribe();
        self.in_flight = None;
        self.last_request = None;
        self.live_requested = false;
        effects
    }

    /// ارسال فوری ضربان؛ بدون اشتراک فعال، آخرین تحلیل دوباره اجرا می‌شود
    pub fn refresh(&mut self, now: Instant) -> Vec<RegressionEffect> {
        if let Some(id) = self.connection.current().filter(|_| self.connection.is_connected()) {
            self.timers
                .schedule(RegressionTimer::Heartbeat, now + self.heartbeat_interval);
            return vec![RegressionEffect::Send {
                id,
                text: HEARTBEAT_FRAME.to_string(),
            }];
        }

        if self.subscription.is_some() {
            return vec![];
        }

        match self.last_request.clone() {
            Some(request) => self.run(request, self.live_requested),
            None => vec![],
        }
    }

    pub fn handle_event(&mut self, event: StreamEvent, now: Instant) -> Vec<RegressionEffect> {
        let id = event.connection();

        match self.connection.on_event(event, now) {
            Transition::Stale { close } => close
                .map(|id| RegressionEffect::Close { id })
                .into_iter()
                .collect(),
            Transition::Opened { after_outage } => {
                if after_outage {
                    log::info!("Regression stream {id}: reconnected");
                }
                self.timers
                    .schedule(RegressionTimer::Heartbeat, now + self.heartbeat_interval);
                vec![]
            }
            Transition::Message(text) => self.on_message(id, &text),
            Transition::ClosedNormally(reason) => {
                log::info!("Regression stream {id}: closed ({reason})");
                self.timers.cancel(RegressionTimer::Heartbeat);
                vec![]
            }
            Transition::Retrying {
                attempt,
                delay,
                reason,
            } => {
                log::warn!("Regression stream {id}: lost ({reason}), retry {attempt} in {delay:?}");
                self.timers.cancel(RegressionTimer::Heartbeat);

                if attempt == 1 {
                    vec![RegressionEffect::Notify(Notification::transport(format!(
                        "Live regression disconnected ({reason}), reconnecting"
                    )))]
                } else {
                    vec![]
                }
            }
            Transition::Exhausted { attempts, reason } => {
                log::error!("Regression stream {id}: giving up after {attempts} attempts ({reason})");
                self.timers.cancel(RegressionTimer::Heartbeat);
                self.subscription = None;

                vec![RegressionEffect::Notify(Notification::exhausted(format!(
                    "Live regression could not reconnect after {attempts} attempts"
                )))]
            }
        }
    }

    fn on_message(&mut self, id: ConnectionId, text: &str) -> Vec<RegressionEffect> {
        match parse_regression_message(text) {
            Ok(RegressionMessage::SubscriptionConfirmed(details)) => {
                log::info!("Regression stream {id}: subscription confirmed {details}");
                vec![]
            }
            Ok(RegressionMessage::Update(patch)) => vec![RegressionEffect::Patch(patch)],
            Ok(RegressionMessage::Heartbeat) => {
                log::trace!("Regression stream {id}: heartbeat");
                vec![]
            }
            Ok(RegressionMessage::Error(message)) => {
                log::error!("Regression stream {id}: server error: {message}");
                vec![RegressionEffect::Notify(Notification::protocol(format!(
                    "Live regression error: {message}"
                )))]
            }
            Err(e) => {
                log::error!("Regression stream {id}: dropping malformed message: {e}");
                vec![RegressionEffect::Notify(Notification::protocol(format!(
                    "Malformed regression message dropped: {e}"
                )))]
            }
        }
    }

    pub fn on_tick(&mut self, now: Instant) -> Vec<RegressionEffect> {
        let mut effects = vec![];

        if self.timers.fire(RegressionTimer::Heartbeat, now) {
            if let Some(id) = self.connection.current().filter(|_| self.connection.is_connected())
            {
                effects.push(RegressionEffect::Send {
                    id,
                    text: HEARTBEAT_FRAME.to_string(),
                });
                self.timers
                    .schedule(RegressionTimer::Heartbeat, now + self.heartbeat_interval);
            }
        }

        if let Some(params) = self.subscription.clone() {
            if let Some(id) = self.connection.poll_retry(now) {
                log::info!("Regression stream {id}: resubscribing");
                effects.push(RegressionEffect::Open { id, params });
            }
        }

        effects
    }
}
