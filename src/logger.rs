use std::{
    fs,
    io::{self, Write},
    path::Path,
    sync::mpsc,
    thread,
};

pub use data::log::Error;

const MAX_LOG_FILE_SIZE: u64 = 50 * 1024 * 1024;

enum LogMessage {
    Content(Vec<u8>),
    Flush,
    Shutdown,
}

/// راه‌اندازی لاگ برنامه
///
/// در حالت دیباگ خروجی روی کنسول می‌رود و در غیر این صورت در فایل
/// `regchart-current.log` داخل پوشه داده‌ها؛ `RUST_LOG` سطح پیش‌فرض را تغییر می‌دهد.
pub fn setup(is_debug: bool) -> Result<(), Error> {
    let default_level = if is_debug {
        log::Level::Debug
    } else {
        log::Level::Info
    };

    let level_filter = std::env::var("RUST_LOG")
        .ok()
        .as_deref()
        .map(str::parse::<log::Level>)
        .transpose()?
        .unwrap_or(default_level)
        .to_level_filter();

    let mut io_sink = fern::Dispatch::new().format(|out, message, record| {
        out.finish(format_args!(
            "{}:{} -- {}",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            record.level(),
            message
        ));
    });

    if is_debug {
        io_sink = io_sink.chain(std::io::stdout());
    } else {
        let log_path = data::log::path()?;
        data::log::rotate(&log_path)?;

        let writer: Box<dyn Write + Send> = Box::new(BackgroundWriter::spawn(&log_path)?);
        io_sink = io_sink.chain(writer);
    }

    fern::Dispatch::new()
        .level(log::LevelFilter::Off)
        .level_for("panic", log::LevelFilter::Error)
        .level_for("data", level_filter)
        .level_for("exchange", level_filter)
        .level_for("regchart", level_filter)
        .chain(io_sink)
        .apply()?;

    Ok(())
}

/// نوشتن لاگ در یک ترد جداگانه تا حلقه رویداد منتظر دیسک نماند
struct BackgroundWriter {
    sender: mpsc::Sender<LogMessage>,
    _thread_handle: thread::JoinHandle<()>,
}

impl BackgroundWriter {
    fn spawn(path: &Path) -> io::Result<Self> {
        let mut file = CappedFile::open(path)?;
        let (sender, receiver) = mpsc::channel();

        let thread_handle = thread::Builder::new()
            .name("logger-thread".to_string())
            .spawn(move || {
                while let Ok(message) = receiver.recv() {
                    let result = match message {
                        LogMessage::Content(data) => file.write_all(&data),
                        LogMessage::Flush => file.flush(),
                        LogMessage::Shutdown => break,
                    };
                    if let Err(e) = result {
                        eprintln!("Logging error: {e}");
                    }
                }
                let _ = file.flush();
            })?;

        Ok(Self {
            sender,
            _thread_handle: thread_handle,
        })
    }

    fn send(&self, message: LogMessage) -> io::Result<()> {
        self.sender
            .send(message)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "Logger thread disconnected"))
    }
}

impl Write for BackgroundWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send(LogMessage::Content(buf.to_vec()))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send(LogMessage::Flush)
    }
}

impl Drop for BackgroundWriter {
    fn drop(&mut self) {
        let _ = self.sender.send(LogMessage::Shutdown);
    }
}

/// فایل لاگ با سقف اندازه؛ پس از رسیدن به سقف، یک خط هشدار نوشته و بقیه کنار گذاشته می‌شود
struct CappedFile {
    file: fs::File,
    size: u64,
    capped: bool,
}

impl CappedFile {
    fn open(path: &Path) -> io::Result<Self> {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            file,
            size,
            capped: false,
        })
    }
}

impl Write for CappedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.capped {
            return Ok(buf.len());
        }

        if self.size + buf.len() as u64 > MAX_LOG_FILE_SIZE {
            self.capped = true;
            let notice = format!(
                "{}:WARN -- log file reached {MAX_LOG_FILE_SIZE} bytes, further output dropped\n",
                chrono::Local::now().format("%H:%M:%S%.3f"),
            );
            eprintln!("{}", notice.trim_end());
            self.file.write_all(notice.as_bytes())?;
            return Ok(buf.len());
        }

        let written = self.file.write(buf)?;
        self.size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
