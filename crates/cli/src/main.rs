//! dualsense-bridge CLI: map DualSense input to shell, HTTP and WebSocket actions.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dualsense_bridge_core::dispatch::{ActionExecutor, DispatchRequest, DrainPolicy};
use dualsense_bridge_core::output::{LightBar, PlayerIndicator, TriggerEffectConfig, TriggerEffectKind, TriggerSide};
use dualsense_bridge_core::profile::Profile;
use dualsense_bridge_core::session::{self, SessionConfig, SessionEvent, SessionHandle};
use dualsense_bridge_core::spatial::SpatialMode;
use dualsense_bridge_core::{Action, MappingConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How long one-shot output commands wait for the report to go out.
const WRITE_SETTLE: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(
    name = "dualsense-bridge",
    version,
    about = "Bridge DualSense controller input to shell, HTTP, and WebSocket actions"
)]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Controller index as shown by list-devices.
    #[arg(short, long, default_value_t = 0, global = true)]
    device: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected DualSense controllers.
    ListDevices {
        /// Print one JSON object per controller.
        #[arg(long)]
        json: bool,
    },
    /// Print controller and spatial state at a fixed interval.
    Monitor {
        /// Print JSON lines instead of a summary.
        #[arg(long)]
        json: bool,
        /// Output interval in milliseconds.
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,
        /// Spatial mode: standard, heading, accelerometer, axidraw, threed.
        #[arg(long)]
        mode: Option<String>,
        /// Poll rate in Hz.
        #[arg(long, default_value_t = 100)]
        poll_rate: u32,
    },
    /// Run the bindings from a mapping config until Ctrl-C.
    Run {
        /// Mapping config (JSON).
        config: PathBuf,
        /// Print actions instead of executing shell commands.
        #[arg(long)]
        dry_run: bool,
        /// Number of action executor threads.
        #[arg(long, default_value_t = 2)]
        workers: usize,
        /// Profile preset name or profile JSON file to apply on start.
        #[arg(long)]
        profile: Option<String>,
        /// Override the profile's light bar color (R,G,B).
        #[arg(long, value_parser = parse_rgb, requires = "profile")]
        light_bar: Option<LightBar>,
    },
    /// Check a mapping config without touching the controller.
    Validate {
        config: PathBuf,
    },
    /// Set the light bar color.
    SetLightBar {
        r: u8,
        g: u8,
        b: u8,
    },
    /// Light a player indicator preset (1-5).
    SetPlayer {
        player: u8,
    },
    /// Configure an adaptive trigger effect.
    SetTrigger {
        /// left or right (l2/r2 also accepted).
        side: String,
        /// off, continuous, section, vibration, weapon, bow.
        effect: String,
        #[arg(long, default_value_t = 0)]
        start: u8,
        #[arg(long, default_value_t = 255)]
        end: u8,
        #[arg(long, default_value_t = 0)]
        force: u8,
        /// Vibration frequency, or snap strength for bow.
        #[arg(long, default_value_t = 0)]
        frequency: u8,
    },
    /// Run the rumble motors for a while.
    SetRumble {
        left: u8,
        right: u8,
        #[arg(long, default_value_t = 500)]
        duration_ms: u64,
    },
    /// Apply a profile preset or profile JSON file.
    ApplyProfile {
        /// Preset name (default, gaming, racing, accessibility) or file path.
        profile: String,
        /// Override the profile's light bar color (R,G,B).
        #[arg(long, value_parser = parse_rgb)]
        light_bar: Option<LightBar>,
    },
    /// Print a profile preset as JSON, optionally as the start of a custom profile.
    ShowProfile {
        #[arg(default_value = "default")]
        name: String,
        /// Name for the printed profile.
        #[arg(long)]
        rename: Option<String>,
        /// Light bar color for the printed profile (R,G,B).
        #[arg(long, value_parser = parse_rgb)]
        light_bar: Option<LightBar>,
    },
}

/// Executes shell actions; prints HTTP and WebSocket requests as JSON lines
/// for a relay to pick up.
struct CliExecutor {
    dry_run: bool,
}

impl ActionExecutor for CliExecutor {
    fn execute(&self, request: &DispatchRequest) -> dualsense_bridge_core::Result<()> {
        match &request.action {
            Action::Shell { command } if !self.dry_run => {
                info!(binding = request.binding, command = %command, "running shell action");
                let status = std::process::Command::new("sh")
                    .arg("-c")
                    .arg(command)
                    .status()
                    .map_err(|e| dualsense_bridge_core::Error::ActionFailed(format!("{command}: {e}")))?;
                if !status.success() {
                    return Err(dualsense_bridge_core::Error::ActionFailed(format!(
                        "{command}: exited with {status}"
                    )));
                }
                Ok(())
            }
            action => {
                let line = serde_json::to_string(action)
                    .map_err(|e| dualsense_bridge_core::Error::ActionFailed(e.to_string()))?;
                println!("{line}");
                Ok(())
            }
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_mapping(path: &Path) -> Result<MappingConfig> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("read mapping config {}", path.display()))?;
    MappingConfig::from_json(&json).with_context(|| format!("invalid mapping config {}", path.display()))
}

fn load_profile(source: &str) -> Result<Profile> {
    if let Some(profile) = Profile::preset(source) {
        return Ok(profile);
    }
    let json = std::fs::read_to_string(source).with_context(|| {
        format!(
            "'{source}' is neither a preset ({}) nor a readable file",
            Profile::PRESETS.join(", ")
        )
    })?;
    Ok(Profile::from_json(&json)?)
}

/// Parse an `R,G,B` color such as `255,64,0`.
fn parse_rgb(text: &str) -> std::result::Result<LightBar, String> {
    let parts = text
        .split(',')
        .map(|part| part.trim().parse::<u8>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| format!("'{text}': {e}"))?;
    match parts[..] {
        [r, g, b] => Ok(LightBar { r, g, b }),
        _ => Err(format!("'{text}': expected three values as R,G,B")),
    }
}

/// Apply the command-line overrides to a loaded profile.
fn customize(profile: Profile, name: Option<String>, light_bar: Option<LightBar>) -> Profile {
    let profile = match name {
        Some(name) => profile.renamed(name),
        None => profile,
    };
    match light_bar {
        Some(color) => profile.with_light_bar(color),
        None => profile,
    }
}

fn open_session(device: usize, config: SessionConfig) -> Result<SessionHandle> {
    session::connect(device, config).with_context(|| format!("connect to controller #{device}"))
}

/// Wait until the poll thread has written at least one more report.
fn settle_writes(session: &SessionHandle, before: u64) {
    if let Err(e) = session.wait_for_write(before, WRITE_SETTLE) {
        warn!(error = %e, "output report not confirmed");
    }
}

fn print_events(events: &crossbeam_channel::Receiver<SessionEvent>) {
    for event in events.try_iter() {
        match &event {
            SessionEvent::Disconnected { reason } => warn!(%reason, "controller disconnected"),
            SessionEvent::Connected { transport } => info!(%transport, "controller connected"),
            SessionEvent::Warning { message } => warn!(%message, "session warning"),
            other => tracing::debug!(event = ?other, "session event"),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::ListDevices { json } => {
            let devices = dualsense_bridge_core::list_devices()?;
            if json {
                for dev in &devices {
                    println!("{}", serde_json::to_string(dev)?);
                }
            } else if devices.is_empty() {
                println!("No DualSense controllers found.");
                println!("Ensure the controller is connected and the hidraw node is readable.");
            } else {
                for (index, dev) in devices.iter().enumerate() {
                    println!(
                        "#{index} {} over {} (VID: 0x{:04X}, PID: 0x{:04X}, path: {})",
                        dev.model.name(),
                        dev.transport,
                        dev.vid,
                        dev.pid,
                        dev.path
                    );
                }
            }
        }
        Commands::Monitor {
            json,
            interval_ms,
            mode,
            poll_rate,
        } => {
            let spatial_mode = match mode {
                Some(name) => SpatialMode::from_name(&name)
                    .ok_or_else(|| anyhow::anyhow!("Unknown spatial mode '{name}'"))?,
                None => SpatialMode::default(),
            };
            let session = open_session(
                cli.device,
                SessionConfig {
                    poll_rate,
                    spatial_mode,
                    ..SessionConfig::default()
                },
            )?;
            let events = session.subscribe_events();
            let mut tick = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = tick.tick() => {
                        print_events(&events);
                        let (Some(state), Some(spatial)) = (session.latest_state(), session.latest_spatial()) else {
                            continue;
                        };
                        if json {
                            let line = serde_json::json!({ "state": state, "spatial": spatial });
                            println!("{line}");
                        } else {
                            let s = &state.value;
                            let p = &spatial.value;
                            let (roll, pitch, yaw) = p.euler_angles();
                            println!(
                                "[{:>8} ms] L({:>3},{:>3}) R({:>3},{:>3}) L2 {:>3} R2 {:>3} bat {:>3}% | pos ({:>7.1},{:>7.1},{:>7.1}) rpy ({:>6.2},{:>6.2},{:>6.2})",
                                state.timestamp.as_millis(),
                                s.left_stick.x, s.left_stick.y,
                                s.right_stick.x, s.right_stick.y,
                                s.triggers.l2, s.triggers.r2,
                                s.battery.percentage(),
                                p.position[0], p.position[1], p.position[2],
                                roll, pitch, yaw,
                            );
                        }
                    }
                }
            }
            session.stop(DrainPolicy::Discard);
        }
        Commands::Run {
            config,
            dry_run,
            workers,
            profile,
            light_bar,
        } => {
            let mapping = load_mapping(&config)?;
            let session_config = mapping.session_config()?;
            info!(
                name = %mapping.name,
                bindings = session_config.bindings.len(),
                poll_rate = session_config.poll_rate,
                "Loaded mapping"
            );

            let session = open_session(cli.device, session_config)?;
            if let Some(source) = profile {
                session.load_profile(&customize(load_profile(&source)?, None, light_bar))?;
            }
            session.spawn_executors(Arc::new(CliExecutor { dry_run }), workers);
            let events = session.subscribe_events();
            let mut tick = tokio::time::interval(Duration::from_millis(250));

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = tick.tick() => print_events(&events),
                }
            }

            let stats = session.stats();
            session.stop(DrainPolicy::Drain);
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Validate { config } => {
            let mapping = load_mapping(&config)?;
            let bindings = mapping.to_bindings()?;
            println!(
                "{}: poll rate {} Hz, deadzone {}, spatial mode {}, {} binding(s)",
                config.display(),
                mapping.poll_rate,
                mapping.deadzone,
                mapping.spatial_mode,
                bindings.len()
            );
            for binding in &bindings {
                println!(
                    "  {} {:?} -> {}",
                    binding.channel,
                    binding.trigger,
                    binding.action.kind()
                );
            }
        }
        Commands::SetLightBar { r, g, b } => {
            let session = open_session(cli.device, SessionConfig::default())?;
            let before = session.stats().writes;
            session.set_light_bar(r, g, b)?;
            settle_writes(&session, before);
            session.stop(DrainPolicy::Discard);
            println!("Light bar set to ({r}, {g}, {b})");
        }
        Commands::SetPlayer { player } => {
            let pattern = PlayerIndicator::Preset(player);
            pattern.mask()?;
            let session = open_session(cli.device, SessionConfig::default())?;
            let before = session.stats().writes;
            session.set_player_indicator(pattern)?;
            settle_writes(&session, before);
            session.stop(DrainPolicy::Discard);
            println!("Player indicator set to {player}");
        }
        Commands::SetTrigger {
            side,
            effect,
            start,
            end,
            force,
            frequency,
        } => {
            let side = TriggerSide::from_name(&side)
                .ok_or_else(|| anyhow::anyhow!("Unknown trigger side '{side}'. Valid: left, right"))?;
            let kind = TriggerEffectKind::from_name(&effect).ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown trigger effect '{effect}'. Valid: off, continuous, section, vibration, weapon, bow"
                )
            })?;
            let config = TriggerEffectConfig {
                kind,
                start,
                end,
                force,
                frequency,
            };
            dualsense_bridge_core::safety::validate_trigger_effect(&config)?;

            let session = open_session(cli.device, SessionConfig::default())?;
            let before = session.stats().writes;
            session.set_trigger_effect(side, config)?;
            settle_writes(&session, before);
            session.stop(DrainPolicy::Discard);
            println!("Trigger effect set to '{}'", kind.name());
        }
        Commands::SetRumble {
            left,
            right,
            duration_ms,
        } => {
            let duration = Duration::from_millis(duration_ms);
            let session = open_session(cli.device, SessionConfig::default())?;
            session.set_rumble(left, right, Some(duration))?;
            tokio::time::sleep(duration + Duration::from_millis(100)).await;
            session.stop(DrainPolicy::Discard);
            println!("Rumbled ({left}, {right}) for {duration_ms} ms");
        }
        Commands::ApplyProfile { profile, light_bar } => {
            let profile = customize(load_profile(&profile)?, None, light_bar);
            let session = open_session(cli.device, SessionConfig::default())?;
            let before = session.stats().writes;
            session.load_profile(&profile)?;
            settle_writes(&session, before);
            session.stop(DrainPolicy::Discard);
            println!("Applied profile: {}", profile.name());
        }
        Commands::ShowProfile {
            name,
            rename,
            light_bar,
        } => {
            let profile = Profile::preset(&name).ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown preset '{name}'. Valid presets: {}",
                    Profile::PRESETS.join(", ")
                )
            })?;
            println!("{}", customize(profile, rename, light_bar).to_json()?);
        }
    }

    Ok(())
}
