use exchange::Bar;

/// نتیجه اعمال یک کندل زنده روی انتهای سری
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Replaced, // کندلی با همین زمان جایگزین شد
    Appended, // کندل جدیدتر از آخرین کندل اضافه شد
    Stale,    // قدیمی‌تر از آخرین کندل و ناموجود؛ نادیده گرفته شد
}

/// یک نقطه از سری حجم؛ `rising` رنگ ستون را تعیین می‌کند
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumePoint {
    pub time: i64,
    pub value: f64,
    pub rising: bool,
}

impl From<&Bar> for VolumePoint {
    fn from(bar: &Bar) -> Self {
        Self {
            time: bar.time,
            value: bar.volume,
            rising: bar.close >= bar.open,
        }
    }
}

/// سری مرتب کندل‌ها
///
/// زمان کندل‌ها همواره اکیداً صعودی است؛ هیچ متدی این ترتیب را نقض نمی‌کند.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Series {
    bars: Vec<Bar>,
}

impl Series {
    pub fn new(bars: Vec<Bar>) -> Self {
        let mut series = Self::default();
        series.replace(bars);
        series
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first(&self) -> Option<&Bar> {
        self.bars.first()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn times(&self) -> impl Iterator<Item = i64> + '_ {
        self.bars.iter().map(|bar| bar.time)
    }

    pub fn clear(&mut self) {
        self.bars.clear();
    }

    /// جایگزینی کامل سری؛ در زمان‌های تکراری آخرین کندل باقی می‌ماند
    pub fn replace(&mut self, bars: Vec<Bar>) {
        self.bars = normalize(bars);
    }

    /// افزودن کندل‌های قدیمی‌تر به ابتدای سری
    pub fn prepend(&mut self, older: Vec<Bar>) -> usize {
        let Some(first) = self.first().map(|bar| bar.time) else {
            self.replace(older);
            return self.len();
        };

        let older = normalize(older.into_iter().filter(|bar| bar.time < first).collect());
        let added = older.len();

        if added > 0 {
            self.bars.splice(0..0, older);
        }
        added
    }

    /// ادغام دسته Backfill؛ فقط کندل‌های جدیدتر از آخرین کندل اضافه می‌شوند
    pub fn apply_backfill(&mut self, bars: Vec<Bar>) -> usize {
        let Some(last) = self.last().map(|bar| bar.time) else {
            self.replace(bars);
            return self.len();
        };

        let newer = normalize(bars.into_iter().filter(|bar| bar.time > last).collect());
        let added = newer.len();
        self.bars.extend(newer);
        added
    }

    pub fn upsert(&mut self, bar: Bar) -> Upsert {
        match self.bars.last() {
            None => {
                self.bars.push(bar);
                Upsert::Appended
            }
            Some(last) if bar.time > last.time => {
                self.bars.push(bar);
                Upsert::Appended
            }
            Some(_) => match self.bars.binary_search_by_key(&bar.time, |b| b.time) {
                Ok(idx) => {
                    self.bars[idx] = bar;
                    Upsert::Replaced
                }
                Err(_) => Upsert::Stale,
            },
        }
    }

    pub fn volume(&self) -> Vec<VolumePoint> {
        self.bars.iter().map(VolumePoint::from).collect()
    }
}

fn normalize(mut bars: Vec<Bar>) -> Vec<Bar> {
    // stable sort keeps arrival order among equal times, so the last one wins below
    bars.sort_by_key(|bar| bar.time);

    let mut out: Vec<Bar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match out.last_mut() {
            Some(last) if last.time == bar.time => *last = bar,
            _ => out.push(bar),
        }
    }
    out
}
