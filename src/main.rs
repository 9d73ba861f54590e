mod logger;
mod runtime;
mod surface;

use data::chart::Input;
use data::config::{CONFIG_FILE, Config};
use exchange::Backend;
use runtime::Runtime;
use surface::LogSurface;

use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(e) = logger::setup(cfg!(debug_assertions)) {
        eprintln!("Failed to initialize logger: {e}");
    }

    let config_path = std::env::args()
        .nth(1)
        .map_or_else(|| data::data_path(Some(CONFIG_FILE)), PathBuf::from);
    let config = Config::load(&config_path);

    let backend = match Backend::new(&config.backend.base_url) {
        Ok(backend) => backend,
        Err(e) => {
            log::error!("Invalid backend address: {e}");
            eprintln!("Invalid backend address: {e}");
            return ExitCode::FAILURE;
        }
    };

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("Failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let chart = data::Chart::new(
        config.selection.clone(),
        config.chart_settings(),
        LogSurface::default(),
    );
    log::info!(
        "Chart {} for {} on {} via {backend}",
        chart.id(),
        config.selection.series_key(),
        config.selection.exchange
    );

    rt.block_on(Runtime::new(backend, chart).run(initial_inputs(&config)));
    ExitCode::SUCCESS
}

fn initial_inputs(config: &Config) -> Vec<Input> {
    // without a timezone database the wall clock is UTC or the machine's local time
    let now = if config.selection.timezone.eq_ignore_ascii_case("UTC") {
        chrono::Utc::now().naive_utc()
    } else {
        chrono::Local::now().naive_local()
    };

    let mut inputs = vec![Input::Start, Input::LoadHistory(config.history.span(now))];

    if config.live.enabled {
        inputs.push(Input::SetLiveMode(true));
    }
    if config.visualizer.enabled {
        inputs.push(Input::RunRegression(config.regression.clone()));
    }
    inputs
}
