mod backend;
mod config;
mod constants;
mod control;
mod dial;
mod display;
mod error;
mod led;
mod scheduler;
mod sensors;
mod smoothing;
mod state;
mod station;
mod system;
mod volume;

use backend::{DryRunConnection, MpcConnection, PlaybackConnection};
use clap::Parser;
use config::{Args, Commands, LedArgs, LedChannel, RadioConfig, StationsArgs};
use control::{Collaborators, ControlLoop, ExitCode, RunResult};
use dialoguer::{Select, theme::ColorfulTheme};
use display::{LogDisplay, StatusDisplay, TerminalDisplay};
use error::RadioResult;
use led::{LedCommand, LedHandle, LogLed, SysfsPwmLed};
use scheduler::StationScheduler;
use sensors::{KeyboardPots, SensorSource, SysfsAdc};
use std::path::Path;
use std::time::Duration;
use system::{Mixer, PowerOff};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const LED_DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Where log lines go. A full-screen view owns stdout and stderr, so logs
/// are discarded there unless a file is configured.
fn init_tracing(config: &RadioConfig, terminal_ui: bool) -> RadioResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match &config.log_file {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None if terminal_ui => builder.with_writer(std::io::sink).init(),
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

/// Ctrl-C and SIGTERM end the loop at the next tick
fn watch_signals(quit: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    warn!(error = %e, "cannot watch SIGTERM");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("signal received; stopping");
        quit.cancel();
    });
}

fn load_config(path: &Path) -> RadioConfig {
    match RadioConfig::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(ExitCode::Error as i32);
        }
    }
}

fn open_led(name: &'static str, pwm: Option<&Path>, config: &config::LedConfig) -> (LedHandle, JoinHandle<()>) {
    if let Some(dir) = pwm {
        match SysfsPwmLed::open(dir, config.pwm_period_ns) {
            Ok(driver) => return led::spawn(name, driver, config.clone()),
            Err(e) => warn!(led = name, dir = %dir.display(), error = %e, "cannot open PWM; logging only"),
        }
    }
    led::spawn(name, LogLed::new(name), config.clone())
}

/// How a radio session talks to the outside world
struct Session {
    sensors: Box<dyn SensorSource>,
    display: Box<dyn StatusDisplay>,
    hardware: bool,
}

async fn run_radio<C: PlaybackConnection>(
    config: &RadioConfig,
    connections: Vec<C>,
    session: Session,
    quit: CancellationToken,
) -> RunResult {
    let (dial, stations) = match config.build_dial() {
        Ok(built) => built,
        Err(e) => {
            return RunResult {
                result: Err(e),
                exit_code: ExitCode::Error,
            };
        }
    };
    let scheduler = StationScheduler::new(connections, stations);

    let (dial_pwm, power_pwm) = if session.hardware {
        (config.led.dial_pwm.as_deref(), config.led.power_pwm.as_deref())
    } else {
        (None, None)
    };
    let (dial_led, dial_task) = open_led("dial", dial_pwm, &config.led);
    let (power_led, power_task) = open_led("power", power_pwm, &config.led);

    let (mixer, power_off) = if session.hardware {
        (
            Mixer::from_template(config.system.mixer()),
            PowerOff::new(config.system.shutdown().map(str::to_string)),
        )
    } else {
        (Mixer::Log, PowerOff::new(None))
    };

    let io = Collaborators {
        sensors: session.sensors,
        display: session.display,
        dial_led,
        power_led,
        mixer,
        power_off,
    };
    let result = ControlLoop::new(config, dial, scheduler, io, quit).run().await;

    for task in [dial_task, power_task] {
        if tokio::time::timeout(LED_DRAIN_TIMEOUT, task).await.is_err() {
            warn!("led service did not stop in time");
        }
    }
    result
}

fn mpc_connections(config: &RadioConfig) -> Vec<MpcConnection> {
    let backoff = Duration::from_millis(constants::control::RECONNECT_BACKOFF_MS);
    config
        .servers
        .iter()
        .enumerate()
        .map(|(id, s)| MpcConnection::new(id, s.host.clone(), s.port, s.output, backoff))
        .collect()
}

fn list_stations(config: &RadioConfig, args: &StationsArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (dial, stations) = config.build_dial()?;
    let window = |center: f64| (center - dial.radius(), center + dial.radius());

    if args.pick {
        let names: Vec<&str> = stations.iter().map(|s| s.name.as_str()).collect();
        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Select a station")
            .items(&names)
            .default(0)
            .interact()?;
        let (low, high) = window(stations[selection].frequency);
        println!("{:.0} {:.0}", low, high);
        return Ok(());
    }

    println!(
        "{} stations, radius {:.1}, gap {:.1}, range 0-{:.0}",
        dial.station_count(),
        dial.radius(),
        dial.gap(),
        dial.full_range()
    );
    for st in &stations {
        let (low, high) = window(st.frequency);
        println!(
            "{:>3}  {:<20} {:>7.1}  [{:>6.1}, {:>6.1}]  {} ({:?}{})",
            st.id,
            st.name,
            st.frequency,
            low,
            high,
            st.playlist,
            st.strategy,
            if st.randomize { ", random" } else { "" }
        );
    }
    Ok(())
}

async fn drive_led(config: &RadioConfig, args: &LedArgs) -> RadioResult<()> {
    let command: LedCommand = args.command.parse()?;
    let (name, pwm) = match args.channel {
        LedChannel::Dial => ("dial", config.led.dial_pwm.as_deref()),
        LedChannel::Power => ("power", config.led.power_pwm.as_deref()),
    };
    if pwm.is_none() {
        info!(led = name, "no PWM configured; logging only");
    }
    let (led, task) = open_led(name, pwm, &config.led);
    led.send(command);
    if command.is_endless() {
        info!("press Ctrl-C to stop");
        let _ = tokio::signal::ctrl_c().await;
    } else {
        led.send(LedCommand::WaitForDone);
    }
    led.send(LedCommand::Quit);
    let _ = task.await;
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Commands::Run(run_args) => {
            let mut config = load_config(&args.config);
            if let Err(e) = config.apply_overrides(&run_args.overrides) {
                eprintln!("Configuration error: {}", e);
                std::process::exit(ExitCode::Error as i32);
            }
            config.show_dial |= run_args.show_dial;
            if let Err(e) = init_tracing(&config, config.show_dial) {
                eprintln!("Cannot open log file: {}", e);
                std::process::exit(ExitCode::Error as i32);
            }

            let display: Box<dyn StatusDisplay> = if config.show_dial {
                match TerminalDisplay::new("Ctrl-C to quit", false) {
                    Ok(d) => Box::new(d),
                    Err(e) => {
                        eprintln!("Setup error: {}", e);
                        std::process::exit(ExitCode::Error as i32);
                    }
                }
            } else {
                Box::new(LogDisplay::default())
            };
            let session = Session {
                sensors: Box::new(SysfsAdc::new(config.sensors.iio_device.clone(), config.dial.full_range)),
                display,
                hardware: true,
            };

            let quit = CancellationToken::new();
            watch_signals(quit.clone());
            let run_result = run_radio(&config, mpc_connections(&config), session, quit).await;
            exit_with(run_result);
        }
        Commands::Simulate(sim_args) => {
            let mut config = load_config(&args.config);
            if let Err(e) = config.apply_overrides(&sim_args.overrides) {
                eprintln!("Configuration error: {}", e);
                std::process::exit(ExitCode::Error as i32);
            }
            config.show_dial = true;
            if let Err(e) = init_tracing(&config, true) {
                eprintln!("Cannot open log file: {}", e);
                std::process::exit(ExitCode::Error as i32);
            }

            let quit = CancellationToken::new();
            watch_signals(quit.clone());
            let display = match TerminalDisplay::new("←/→ tune, ↑/↓ volume, q quits", true) {
                Ok(d) => d,
                Err(e) => {
                    eprintln!("Setup error: {}", e);
                    std::process::exit(ExitCode::Error as i32);
                }
            };
            let session = Session {
                sensors: Box::new(KeyboardPots::new(
                    config.sensors.volume_channel,
                    config.sensors.tuning_channel,
                    config.dial.full_range,
                    constants::ui::KEY_STEP,
                    quit.clone(),
                )),
                display: Box::new(display),
                hardware: false,
            };

            let run_result = if sim_args.dry_run {
                let playlists: Vec<String> = config
                    .stations
                    .iter()
                    .map(|s| s.playlist.clone().unwrap_or_else(|| s.name.clone()))
                    .collect();
                let connections = (0..config.servers.len())
                    .map(|id| DryRunConnection::new(id, playlists.clone(), 12))
                    .collect();
                run_radio(&config, connections, session, quit).await
            } else {
                run_radio(&config, mpc_connections(&config), session, quit).await
            };
            exit_with(run_result);
        }
        Commands::Stations(stations_args) => {
            let config = load_config(&args.config);
            if let Err(e) = list_stations(&config, &stations_args) {
                eprintln!("Error listing stations: {}", e);
                std::process::exit(ExitCode::Error as i32);
            }
        }
        Commands::Led(led_args) => {
            let config = load_config(&args.config);
            if let Err(e) = init_tracing(&config, false) {
                eprintln!("Cannot open log file: {}", e);
                std::process::exit(ExitCode::Error as i32);
            }
            if let Err(e) = drive_led(&config, &led_args).await {
                eprintln!("LED error: {}", e);
                std::process::exit(ExitCode::Error as i32);
            }
        }
    }
}

fn exit_with(run_result: RunResult) -> ! {
    match run_result.result {
        Ok(()) => std::process::exit(run_result.exit_code as i32),
        Err(e) => {
            eprintln!("Application error: {}", e);
            std::process::exit(ExitCode::Error as i32);
        }
    }
}
