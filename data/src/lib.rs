pub mod chart;
pub mod color;
pub mod config;
pub mod history;
pub mod live;
pub mod log;
pub mod notify;
pub mod reconnect;
pub mod regression;
pub mod series;
pub mod session;
pub mod store;
pub mod timer;
pub mod visualizer;

pub use chart::{Chart, Command, Input, Selection};
pub use config::Config;
pub use notify::{Notification, NotificationKind};
pub use series::{Series, VolumePoint};
pub use store::Store;

use std::path::PathBuf;

const APP_DIR: &str = "regchart";

/// مسیر پوشه داده‌های برنامه؛ متغیر محیطی `REGCHART_DATA_PATH` بر آن مقدم است
pub fn data_path(path_name: Option<&str>) -> PathBuf {
    let base = if let Ok(path) = std::env::var("REGCHART_DATA_PATH") {
        PathBuf::from(path)
    } else {
        dirs_next::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    };

    match path_name {
        Some(name) => base.join(name),
        None => base,
    }
}
