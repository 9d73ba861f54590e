use exchange::adapter::historical::{ChunkQuery, HistoryPage};
use exchange::{AdapterError, Bar, CandleType};

use chrono::NaiveDateTime;

pub const DEFAULT_CHUNK_LIMIT: usize = 500;

/// بازه زمانی درخواست‌شده برای بارگذاری تاریخی (به وقت منطقه زمانی نمودار)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// نتیجه یک بارگذاری کامل
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(Vec<Bar>),
    Failed(AdapterError),
}

/// نتیجه دریافت یک صفحه قدیمی‌تر
#[derive(Debug)]
pub enum ChunkOutcome {
    Prepend { bars: Vec<Bar>, exhausted: bool },
    Failed(AdapterError),
}

/// وضعیت بارگذاری تاریخی و صفحه‌بندی رو به عقب یک نمودار
///
/// هر درخواست شماره ترتیبی دارد؛ پاسخی که شماره‌اش با درخواست در جریان نخواند کنار
/// گذاشته می‌شود. در هر لحظه حداکثر یک بارگذاری کامل و یک صفحه در جریان است.
#[derive(Debug)]
pub struct HistoryLoader {
    seq: u64,
    load_in_flight: Option<u64>,
    chunk_in_flight: Option<u64>,
    cursor: Option<String>, // شناسه صفحه‌بندی سرور (request_id)
    all_data_loaded: bool,
    chunk_limit: usize,
    last_span: Option<Span>,
}

impl Default for HistoryLoader {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_LIMIT)
    }
}

impl HistoryLoader {
    pub fn new(chunk_limit: usize) -> Self {
        Self {
            seq: 0,
            load_in_flight: None,
            chunk_in_flight: None,
            cursor: None,
            all_data_loaded: false,
            chunk_limit: chunk_limit.max(1),
            last_span: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.load_in_flight.is_some()
    }

    pub fn is_fetching_chunk(&self) -> bool {
        self.chunk_in_flight.is_some()
    }

    pub fn all_data_loaded(&self) -> bool {
        self.all_data_loaded
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn last_span(&self) -> Option<Span> {
        self.last_span
    }

    /// شروع بارگذاری؛ اگر بارگذاری دیگری در جریان باشد `None` برمی‌گرداند
    pub fn begin_load(&mut self, span: Span) -> Option<u64> {
        if let Some(seq) = self.load_in_flight {
            log::debug!("History load #{seq} still in flight, ignoring new request");
            return None;
        }

        self.seq += 1;
        self.load_in_flight = Some(self.seq);
        self.chunk_in_flight = None;
        self.cursor = None;
        self.all_data_loaded = false;
        self.last_span = Some(span);

        Some(self.seq)
    }

    /// باطل کردن همه درخواست‌های در جریان (مثلاً پس از تغییر نماد)
    pub fn invalidate(&mut self) {
        self.load_in_flight = None;
        self.chunk_in_flight = None;
        self.cursor = None;
        self.all_data_loaded = false;
    }

    pub fn on_loaded(
        &mut self,
        seq: u64,
        result: Result<HistoryPage, AdapterError>,
    ) -> Option<LoadOutcome> {
        if self.load_in_flight != Some(seq) {
            log::debug!("Dropping stale history response #{seq}");
            return None;
        }
        self.load_in_flight = None;

        match result {
            Ok(page) => {
                self.all_data_loaded = !page.is_partial || page.request_id.is_none();
                self.cursor = page.request_id;

                if let Some(message) = page.message.filter(|m| !m.is_empty()) {
                    log::info!("History #{seq}: {message}");
                }
                Some(LoadOutcome::Loaded(page.bars))
            }
            Err(e) => {
                self.cursor = None;
                Some(LoadOutcome::Failed(e))
            }
        }
    }

    /// درخواست صفحه قدیمی‌تر؛ پس از پایان داده‌ها یا در حین درخواست دیگر بی‌اثر است
    pub fn next_chunk(&mut self, candle_type: CandleType) -> Option<(u64, ChunkQuery)> {
        if self.all_data_loaded || self.load_in_flight.is_some() || self.chunk_in_flight.is_some()
        {
            return None;
        }
        let request_id = self.cursor.clone()?;

        self.seq += 1;
        self.chunk_in_flight = Some(self.seq);

        Some((
            self.seq,
            ChunkQuery {
                candle_type,
                request_id,
                limit: self.chunk_limit,
            },
        ))
    }

    pub fn on_chunk(
        &mut self,
        seq: u64,
        result: Result<HistoryPage, AdapterError>,
    ) -> Option<ChunkOutcome> {
        if self.chunk_in_flight != Some(seq) {
            log::debug!("Dropping stale chunk response #{seq}");
            return None;
        }
        self.chunk_in_flight = None;

        match result {
            Ok(page) => {
                let exhausted = page.bars.is_empty() || !page.is_partial;
                if let Some(cursor) = page.request_id {
                    self.cursor = Some(cursor);
                }
                self.all_data_loaded = exhausted;

                Some(ChunkOutcome::Prepend {
                    bars: page.bars,
                    exhausted,
                })
            }
            Err(e) => Some(ChunkOutcome::Failed(e)),
        }
    }
}
