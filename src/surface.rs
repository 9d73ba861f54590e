use data::VolumePoint;
use data::chart::{ChartSurface, LineId, LinePoint, LineStyle};
use data::color::rgba_to_hex;
use exchange::Bar;

use rustc_hash::FxHashMap;

/// سطح بدون رسم که وضعیت نمودار را نگه می‌دارد و تغییرات را لاگ می‌کند
#[derive(Debug, Default)]
pub struct LogSurface {
    bars: usize,
    last: Option<Bar>,
    next_line: u64,
    lines: FxHashMap<LineId, (LineStyle, usize)>,
}

impl LogSurface {
    pub fn summary(&self) -> String {
        format!(
            "{} bars, {} regression lines, last close {}",
            self.bars,
            self.lines.len(),
            self.last.map_or_else(|| "-".to_string(), |bar| bar.close.to_string())
        )
    }
}

impl ChartSurface for LogSurface {
    fn set_series(&mut self, bars: &[Bar]) {
        self.bars = bars.len();
        self.last = bars.last().copied();

        match (bars.first(), bars.last()) {
            (Some(first), Some(last)) => log::info!(
                "Series: {} bars from {} to {}",
                bars.len(),
                first.time,
                last.time
            ),
            _ => log::info!("Series cleared"),
        }
    }

    fn set_volume(&mut self, volume: &[VolumePoint]) {
        log::debug!("Volume: {} points", volume.len());
    }

    fn update_last_bar(&mut self, bar: &Bar, volume: VolumePoint) {
        if self.last.is_none_or(|last| last.time != bar.time) {
            self.bars += 1;
        }
        self.last = Some(*bar);

        log::debug!(
            "Bar {}: o={} h={} l={} c={} v={}",
            bar.time,
            bar.open,
            bar.high,
            bar.low,
            bar.close,
            volume.value
        );
    }

    fn add_line_series(&mut self, style: LineStyle) -> LineId {
        self.next_line += 1;
        let id = LineId(self.next_line);
        self.lines.insert(id, (style, 0));
        id
    }

    fn set_line_data(&mut self, line: LineId, points: &[LinePoint]) {
        let Some((style, len)) = self.lines.get_mut(&line) else {
            log::warn!("Data for unknown {line}");
            return;
        };
        *len = points.len();

        if let (Some(first), Some(last)) = (points.first(), points.last()) {
            log::info!(
                "{line} lookback {} {:?} {}: {} points, {:.4} -> {:.4}",
                style.lookback,
                style.role,
                rgba_to_hex(style.color),
                points.len(),
                first.value,
                last.value
            );
        }
    }

    fn remove_line_series(&mut self, line: LineId) {
        if self.lines.remove(&line).is_some() {
            log::trace!("Removed {line}");
        }
    }
}
