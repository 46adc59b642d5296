use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};

use libsquid_tuner::batch::{run_batch, RankMetric};
use libsquid_tuner::config::Config;
use libsquid_tuner::sim::{SimArray, SimDaq, SimPreamp, SimRig};

fn make_template_config(path: &Path) {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config).unwrap();
    let mut file = File::create(path).expect("Could not create template config file!");
    file.write_all(yaml_str.as_bytes())
        .expect("Failed to write yaml data to file!");
}

fn main() {
    // Create a cli
    let matches = Command::new("squid_tuner_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .help("Path to the configuration file"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::CombinedLogger::new(vec![
        simplelog::TermLogger::new(
            simplelog::LevelFilter::Info,
            simplelog::Config::default(),
            simplelog::TerminalMode::Mixed,
            simplelog::ColorChoice::Auto,
        ),
        simplelog::WriteLogger::new(
            simplelog::LevelFilter::Info,
            simplelog::Config::default(),
            File::create("squid_tuner.log").expect("Could not create log file!"),
        ),
    ]);

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");

    // Parse the cli
    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    match matches.subcommand() {
        Some(("new", _)) => {
            log::info!(
                "Making a template config at {}...",
                config_path.to_string_lossy()
            );

            make_template_config(&config_path);
            log::info!("Done.");
            return;
        }
        _ => (),
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    if let Err(e) = config.validate() {
        log::error!("{e}");
        return;
    }
    log::info!("Config successfully loaded.");
    log::info!("Output Path: {}", config.output_path.to_string_lossy());
    log::info!(
        "Grid: {} bias x {} aflux x {} sflux = {} points",
        config.squid_bias.len(),
        config.aflux_offsets.len(),
        config.sflux_offsets.len(),
        config.grid_size()
    );
    log::info!(
        "Tolerances: {} V (center) {} V (lock), {} attempts per stage",
        config.aflux_tol,
        config.squid_tol,
        config.max_attempts
    );
    log::info!("Backend: simulated rig (wire real drivers through the library traits)");

    // Setup the progress bar
    let grid_points = config.grid_size();
    let pb = pb_manager.add(ProgressBar::new(grid_points as u64));

    // Build the simulated hardware and spawn the sweep
    let rig = Arc::new(Mutex::new(SimRig::new(
        config.channels.clone(),
        config.simulator.clone(),
    )));
    let daq = SimDaq::new(rig.clone());
    let array = SimArray::new(rig);
    let preamp = SimPreamp::new();
    let (tx, rx) = mpsc::channel();
    let worker_config = config.clone();
    let handle = std::thread::spawn(move || run_batch(&worker_config, daq, array, preamp, &tx));

    // The sender drops when the sweep is done, which disconnects the channel
    loop {
        match rx.recv_timeout(std::time::Duration::from_millis(500)) {
            Ok(status) => pb.set_position((status.progress * grid_points as f32) as u64),
            Err(mpsc::RecvTimeoutError::Timeout) => (),
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    match handle.join() {
        Ok(result) => match result {
            Ok(summary) => {
                log::info!(
                    "Sweep finished: {} of {} points locked",
                    summary.locked_count(),
                    summary.rows.len()
                );
                if summary.locked_count() > 0 {
                    log::info!(
                        "Quietest locked points:\n{}",
                        summary.format_ranked(RankMetric::Noise, 10)
                    );
                    if let Some(row) = summary.ranked(RankMetric::Linearity).first() {
                        log::info!(
                            "Most linear: {:.2e} residual variance at S_bias {:.1} ({})",
                            row.linearity.unwrap_or(f64::NAN),
                            row.squid_bias,
                            row.report_path
                                .as_ref()
                                .map(|p| p.display().to_string())
                                .unwrap_or_default()
                        );
                    }
                }
            }
            Err(e) => log::error!("Sweep failed with error: {e}"),
        },
        Err(_) => log::error!("Failed to join sweep task!"),
    }

    pb.finish();

    log::info!("Done.");
}
