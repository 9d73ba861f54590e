use crate::chart::surface::{ChartSurface, LineId, LinePoint, LineRole, LineStyle};
use crate::color::{channel_color, lookback_color};
use crate::notify::Notification;
use crate::timer::Timers;

use enum_map::Enum;
use exchange::{Bar, RegressionCell, RegressionResultSet, Timeframe};
use rustc_hash::FxHashSet;

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

pub const DEFAULT_TOLERANCE: f64 = 0.5;
pub const DEFAULT_CHANNEL_WIDTH: f64 = 2.0;

const LINE_WIDTH: f32 = 2.0;
const CHANNEL_LINE_WIDTH: f32 = 1.0;
const CHANNEL_ALPHA: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisualizerSettings {
    pub tolerance: f64,                // حداکثر اختلاف زمانی مجاز برای یافتن کندل شروع (ثانیه)
    pub channels: bool,                // رسم کانال‌های بالا و پایین
    pub channel_width: f64,            // ضریب انحراف معیار کانال
    pub range_debounce: Duration,      // تأخیر بازسازی پس از تغییر بازه نمایش
    pub live_redraw: Option<Duration>, // بازسازی دوره‌ای در حالت زنده
}

impl Default for VisualizerSettings {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            channels: true,
            channel_width: DEFAULT_CHANNEL_WIDTH,
            range_debounce: Duration::from_millis(250),
            live_redraw: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum)]
pub enum VisualizerTimer {
    RangeDebounce, // بازسازی پس از توقف تغییر بازه نمایش
    LiveRedraw,    // بازسازی دوره‌ای
}

/// دلیل رسم نشدن یک خانه رگرسیون
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Skip {
    /// هیچ کندلی در محدوده مجاز زمان شروع پنجره یافت نشد
    Unresolved { nearest_gap: Option<f64> },
    /// پنجره رگرسیون از انتهای سری فراتر می‌رود
    WindowOverrun {
        anchor: usize,
        needed: usize,
        available: usize,
    },
    EmptyWindow,
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Skip::Unresolved {
                nearest_gap: Some(gap),
            } => write!(f, "no candle within tolerance (nearest is {gap:.3}s away)"),
            Skip::Unresolved { nearest_gap: None } => write!(f, "series is empty"),
            Skip::WindowOverrun {
                anchor,
                needed,
                available,
            } => write!(
                f,
                "window of {needed} bars from index {anchor} runs past the {available} loaded bars"
            ),
            Skip::EmptyWindow => write!(f, "regression length is zero"),
        }
    }
}

/// نقاط قابل رسم یک خانه رگرسیون
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub anchor: usize,
    pub line: Vec<LinePoint>,
    pub channel: Option<(Vec<LinePoint>, Vec<LinePoint>)>, // (بالا، پایین)
}

/// یافتن نزدیک‌ترین کندل به زمان شروع پنجره
///
/// زمان‌ها مرتب فرض می‌شوند پس نزدیک‌ترین مقدار یکی از دو همسایه نقطه تقسیم است.
/// تطبیق فقط وقتی پذیرفته می‌شود که اختلاف اکیداً کمتر از `tolerance` باشد.
pub fn resolve_anchor(times: &[i64], start_timestamp: f64, tolerance: f64) -> Option<usize> {
    nearest(times, start_timestamp)
        .filter(|(_, gap)| *gap < tolerance)
        .map(|(idx, _)| idx)
}

fn nearest(times: &[i64], target: f64) -> Option<(usize, f64)> {
    if !target.is_finite() {
        return None;
    }

    let split = times.partition_point(|t| (*t as f64) < target);

    [split.checked_sub(1), (split < times.len()).then_some(split)]
        .into_iter()
        .flatten()
        .map(|idx| (idx, (times[idx] as f64 - target).abs()))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

/// محاسبه `intercept + slope * i` برای `i = 0..regression_length` از کندل شروع
pub fn project(
    cell: &RegressionCell,
    times: &[i64],
    regression_length: usize,
    tolerance: f64,
    channel_width: Option<f64>,
) -> Result<Projection, Skip> {
    if regression_length == 0 {
        return Err(Skip::EmptyWindow);
    }

    let anchor = resolve_anchor(times, cell.start_timestamp, tolerance).ok_or_else(|| {
        Skip::Unresolved {
            nearest_gap: nearest(times, cell.start_timestamp).map(|(_, gap)| gap),
        }
    })?;

    let window = times
        .get(anchor..anchor + regression_length)
        .ok_or(Skip::WindowOverrun {
            anchor,
            needed: regression_length,
            available: times.len(),
        })?;

    let line: Vec<LinePoint> = window
        .iter()
        .enumerate()
        .map(|(i, time)| LinePoint {
            time: *time,
            value: cell.intercept + cell.slope * i as f64,
        })
        .collect();

    let channel = channel_width.map(|width| {
        let offset = width * cell.std_dev;
        let shift = |delta: f64| {
            line.iter()
                .map(|p| LinePoint {
                    time: p.time,
                    value: p.value + delta,
                })
                .collect::<Vec<_>>()
        };
        (shift(offset), shift(-offset))
    });

    Ok(Projection {
        anchor,
        line,
        channel,
    })
}

/// نمایش خطوط رگرسیون روی نمودار
///
/// هر بازسازی همه خطوط قبلی را حذف و از ابتدا رسم می‌کند؛ بروزرسانی تدریجی خطوط وجود ندارد.
#[derive(Debug)]
pub struct Visualizer {
    settings: VisualizerSettings,
    enabled: bool,
    dirty: bool,
    drawn: BTreeMap<u32, Vec<LineId>>,
    reported: FxHashSet<(u32, u64)>, // (دوره بازگشت، بیت‌های start_timestamp)
    timers: Timers<VisualizerTimer>,
}

impl Visualizer {
    pub fn new(settings: VisualizerSettings) -> Self {
        Self {
            settings,
            enabled: false,
            dirty: false,
            drawn: BTreeMap::new(),
            reported: FxHashSet::default(),
            timers: Timers::default(),
        }
    }

    pub fn settings(&self) -> &VisualizerSettings {
        &self.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn drawn_lookbacks(&self) -> Vec<u32> {
        self.drawn.keys().copied().collect()
    }

    pub fn line_count(&self) -> usize {
        self.drawn.values().map(Vec::len).sum()
    }

    pub fn is_pending(&self, timer: VisualizerTimer) -> bool {
        self.timers.is_pending(timer)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn invalidate(&mut self) {
        if self.enabled {
            self.dirty = true;
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
        self.dirty = true;
    }

    /// غیرفعال کردن: حذف همه خطوط و لغو زمان‌سنج‌های در انتظار
    pub fn disable(&mut self, surface: &mut impl ChartSurface) {
        self.enabled = false;
        self.dirty = false;
        self.timers.cancel_all();
        self.clear(surface);
    }

    /// گزارش‌های قبلی خانه‌های غیرقابل رسم را فراموش می‌کند (پس از تغییر نماد)
    pub fn forget_reports(&mut self) {
        self.reported.clear();
    }

    pub fn set_live(&mut self, live: bool, now: Instant) {
        match self.settings.live_redraw {
            Some(every) if live && self.enabled => {
                if !self.timers.is_pending(VisualizerTimer::LiveRedraw) {
                    self.timers.schedule(VisualizerTimer::LiveRedraw, now + every);
                }
            }
            _ => {
                self.timers.cancel(VisualizerTimer::LiveRedraw);
            }
        }
    }

    /// تغییر بازه نمایش فقط در حالت زنده و با تأخیر باعث بازسازی می‌شود
    pub fn on_visible_range_changed(&mut self, live: bool, now: Instant) {
        if self.enabled && live {
            self.timers.schedule(
                VisualizerTimer::RangeDebounce,
                now + self.settings.range_debounce,
            );
        }
    }

    pub fn on_tick(&mut self, now: Instant) {
        for timer in self.timers.take_due(now) {
            match timer {
                VisualizerTimer::RangeDebounce => self.invalidate(),
                VisualizerTimer::LiveRedraw => {
                    self.invalidate();
                    if let Some(every) = self.settings.live_redraw {
                        self.timers.schedule(VisualizerTimer::LiveRedraw, now + every);
                    }
                }
            }
        }
    }

    /// بازسازی در صورت نیاز؛ اعلان‌های خانه‌های رسم‌نشده را برمی‌گرداند
    pub fn render(
        &mut self,
        surface: &mut impl ChartSurface,
        results: Option<&RegressionResultSet>,
        interval: Timeframe,
        bars: &[Bar],
    ) -> Vec<Notification> {
        if !self.dirty {
            return vec![];
        }
        self.dirty = false;
        self.clear(surface);

        if !self.enabled {
            return vec![];
        }

        let Some(results) = results else {
            return vec![];
        };
        let Some(row) = results.timeframe(interval) else {
            log::debug!("No regression results for {interval}, nothing to draw");
            return vec![];
        };
        if bars.is_empty() {
            // anchors resolve once the series arrives
            return vec![];
        }

        let regression_length = results.request_params.regression_length as usize;
        let times: Vec<i64> = bars.iter().map(|bar| bar.time).collect();
        let channel_width = self
            .settings
            .channels
            .then_some(self.settings.channel_width);

        let mut notifications = vec![];

        for (lookback, cell) in &row.results {
            match project(
                cell,
                &times,
                regression_length,
                self.settings.tolerance,
                channel_width,
            ) {
                Ok(projection) => self.draw(surface, *lookback, &projection),
                Err(skip) => {
                    if self.reported.insert((*lookback, cell.start_timestamp.to_bits())) {
                        log::warn!(
                            "Skipping regression line for lookback {lookback} (start {}): {skip}",
                            cell.start_timestamp
                        );
                        notifications.push(Notification::data_consistency(format!(
                            "Regression line for lookback {lookback} not drawn: {skip}"
                        )));
                    }
                }
            }
        }

        log::debug!(
            "Drew {} regression lines for lookbacks {:?}",
            self.line_count(),
            self.drawn_lookbacks()
        );
        notifications
    }

    fn draw(&mut self, surface: &mut impl ChartSurface, lookback: u32, projection: &Projection) {
        let color = lookback_color(lookback);
        let mut lines = Vec::with_capacity(3);

        let main = surface.add_line_series(LineStyle {
            lookback,
            role: LineRole::Regression,
            color,
            width: LINE_WIDTH,
            dashed: false,
        });
        surface.set_line_data(main, &projection.line);
        lines.push(main);

        if let Some((upper, lower)) = &projection.channel {
            for (role, points) in [
                (LineRole::UpperChannel, upper),
                (LineRole::LowerChannel, lower),
            ] {
                let line = surface.add_line_series(LineStyle {
                    lookback,
                    role,
                    color: channel_color(color, CHANNEL_ALPHA),
                    width: CHANNEL_LINE_WIDTH,
                    dashed: true,
                });
                surface.set_line_data(line, points);
                lines.push(line);
            }
        }

        self.drawn.insert(lookback, lines);
    }

    fn clear(&mut self, surface: &mut impl ChartSurface) {
        for line in std::mem::take(&mut self.drawn).into_values().flatten() {
            surface.remove_line_series(line);
        }
    }
}
