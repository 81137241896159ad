mod midi_dispatch;
mod setup;
mod system_control;

use std::fs::File;

use stompbox_core::HostError;

/// Process exit codes: `0` clean exit, `1` unrecoverable initialization
/// error, `2` audio init failure with no fallback possible.
const EXIT_INIT_ERROR: i32 = 1;
const EXIT_AUDIO_FAILURE: i32 = 2;

fn init_logging(verbose: bool, configured: log::LevelFilter) {
    use simplelog::*;

    let log_level = if verbose { LevelFilter::Debug } else { configured };

    let log_path = dirs::config_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("stompbox")
        .join("stompbox.log");

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = File::create(&log_path)
        .unwrap_or_else(|_| File::create("/tmp/stompbox.log").expect("cannot create log file"));

    WriteLogger::init(log_level, Config::default(), log_file).expect("failed to initialize logger");

    log::info!(target: "main", "stompbox starting (log level: {log_level:?})");
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let verbose = args.iter().any(|a| a == "--verbose" || a == "-v");

    let config = stompbox_core::config::Config::load();
    init_logging(verbose, config.log_level());

    let model = match setup::open_model(&config) {
        Ok(model) => model,
        Err(e) => {
            log::error!(target: "main", "failed to start: {e}");
            let code = match e {
                HostError::AudioFault(_) => EXIT_AUDIO_FAILURE,
                _ => EXIT_INIT_ERROR,
            };
            std::process::exit(code);
        }
    };

    midi_dispatch::spawn(model.clone());

    let addr = format!("{}:{}", config.control_plane_bind_address(), config.control_plane_port());
    if let Err(e) = stompbox_net::run(&addr, model) {
        log::error!(target: "main", "control plane exited: {e}");
        std::process::exit(EXIT_INIT_ERROR);
    }
}
