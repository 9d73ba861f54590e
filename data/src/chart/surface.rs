use crate::series::VolumePoint;

use exchange::Bar;
use palette::rgb::Rgba;

use std::fmt;

/// شناسه یک سری خطی روی سطح نمودار
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LineId(pub u64);

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinePoint {
    pub time: i64,
    pub value: f64,
}

/// نقش یک خط در نمایش رگرسیون
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineRole {
    Regression,   // خط رگرسیون
    UpperChannel, // کانال بالا (+k·σ)
    LowerChannel, // کانال پایین (-k·σ)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineStyle {
    pub lookback: u32,
    pub role: LineRole,
    pub color: Rgba,
    pub width: f32,
    pub dashed: bool,
}

/// قرارداد سطح نمودار؛ تنها نقطه تماس با کتابخانه رسم
///
/// آرایه‌ها همیشه بر اساس زمان مرتب صعودی‌اند.
pub trait ChartSurface {
    fn set_series(&mut self, bars: &[Bar]);

    fn set_volume(&mut self, volume: &[VolumePoint]);

    /// بروزرسانی یا افزودن آخرین کندل بدون بازنویسی کل سری
    fn update_last_bar(&mut self, bar: &Bar, volume: VolumePoint);

    fn add_line_series(&mut self, style: LineStyle) -> LineId;

    fn set_line_data(&mut self, line: LineId, points: &[LinePoint]);

    fn remove_line_series(&mut self, line: LineId);
}
