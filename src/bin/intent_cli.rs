use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use eeg_intent::acquisition::{
    AcquisitionSession, SampleChunk, SessionGuard, SyntheticSession, SyntheticSpec, WavSession,
};
use eeg_intent::analysis::{ChunkOutcome, DetectionPipeline};
use eeg_intent::calibration::{ChannelProposal, ChannelRanker};
use eeg_intent::config::AppConfig;
use eeg_intent::engine::EngineHandle;
use eeg_intent::evaluation::{score_events, CueSchedule, EvaluationReport};
use eeg_intent::events::{EventKind, IntentEvent};
use eeg_intent::telemetry::TelemetrySnapshot;
use serde::Serialize;
use tokio::sync::broadcast::error::TryRecvError;

#[derive(Parser, Debug)]
#[command(
    name = "intent_cli",
    about = "Offline and synthetic harness for the EEG intent detector"
)]
struct Cli {
    /// JSON configuration file (defaults are used when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the detection pipeline over a WAV capture and print events as JSON lines
    Replay {
        #[arg(long)]
        wav: PathBuf,
        /// Multiplier from WAV sample values to microvolts
        #[arg(long, default_value_t = 1.0)]
        scale_uv: f64,
        /// Score blink events against a relax/cue schedule
        #[arg(long)]
        evaluate: bool,
        #[arg(long, default_value_t = 0.0)]
        cue_start: f64,
        #[arg(long, default_value_t = 12)]
        cues: usize,
    },
    /// Stream a synthetic subject through the full engine
    Simulate {
        #[arg(long, default_value_t = 20.0)]
        seconds: f64,
        #[arg(long, default_value_t = 7)]
        seed: u64,
        /// Pace the synthetic source against the wall clock
        #[arg(long)]
        realtime: bool,
        /// Place blinks inside cue windows and score the run
        #[arg(long)]
        evaluate: bool,
        /// Print the telemetry snapshot after the run
        #[arg(long)]
        telemetry: bool,
    },
    /// Run a guided calibration against a synthetic subject and print the result
    CalibrateDemo {
        #[arg(long, default_value_t = 7)]
        seed: u64,
        #[arg(long, default_value_t = 400.0)]
        blink_uv: f64,
        /// Pick the blink and alpha channels from ranking captures first
        #[arg(long)]
        rank_channels: bool,
    },
    /// Rank the channels of a synthetic subject and propose blink/alpha pairs
    RankChannels {
        #[arg(long, default_value_t = 7)]
        seed: u64,
        /// Channels carrying the subject's blinks, e.g. 2,5
        #[arg(long, value_parser = parse_pair)]
        blink_channels: Option<[usize; 2]>,
        /// Channels carrying the subject's alpha rhythm
        #[arg(long, value_parser = parse_pair)]
        alpha_channels: Option<[usize; 2]>,
    },
    /// Print the effective configuration as JSON
    PrintConfig,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    eeg_intent::init_logging();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Replay {
            wav,
            scale_uv,
            evaluate,
            cue_start,
            cues,
        } => {
            let schedule = evaluate.then(|| CueSchedule {
                start_s: cue_start,
                total_cues: cues,
                ..CueSchedule::default()
            });
            run_replay(&config, &wav, scale_uv, schedule)
        }
        Commands::Simulate {
            seconds,
            seed,
            realtime,
            evaluate,
            telemetry,
        } => run_simulate(config, seconds, seed, realtime, evaluate, telemetry),
        Commands::CalibrateDemo {
            seed,
            blink_uv,
            rank_channels,
        } => run_calibrate_demo(&config, seed, blink_uv, rank_channels),
        Commands::RankChannels {
            seed,
            blink_channels,
            alpha_channels,
        } => {
            let mut spec = SyntheticSpec {
                seed,
                ..SyntheticSpec::default()
            };
            if let Some(pair) = blink_channels {
                spec.blink_channels = pair;
            }
            if let Some(pair) = alpha_channels {
                spec.alpha_channels = pair;
            }
            run_rank_channels(&config, &spec)
        }
        Commands::PrintConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::from(0))
        }
    }
}

fn parse_pair(value: &str) -> Result<[usize; 2], String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    match parts.as_slice() {
        [a, b] => {
            let a = a.parse().map_err(|err| format!("{a}: {err}"))?;
            let b = b.parse().map_err(|err| format!("{b}: {err}"))?;
            Ok([a, b])
        }
        _ => Err(format!("expected two comma-separated indices, got {value:?}")),
    }
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AppConfig::default(),
    };
    config.validate().context("validating config")?;
    Ok(config)
}

/// Drive a finite session through the pipeline on the current thread.
///
/// `on_chunk` returns false to stop early.
fn run_offline(
    config: &AppConfig,
    session: Box<dyn AcquisitionSession>,
    prepare: impl FnOnce(&mut DetectionPipeline) -> Result<()>,
    mut on_chunk: impl FnMut(ChunkOutcome, &[IntentEvent]) -> Result<bool>,
) -> Result<()> {
    let mut guard = SessionGuard::open(session, config.acquisition.buffer_hint)
        .context("opening acquisition session")?;
    let mut pipeline = DetectionPipeline::new(config, guard.sampling_rate(), guard.channel_count())
        .context("configuring detection pipeline")?;
    prepare(&mut pipeline)?;
    let poll_size = config.acquisition.poll_size(guard.sampling_rate());

    loop {
        let chunk = guard.session().poll_chunk(poll_size)?;
        if chunk.is_empty() {
            if guard.session().is_exhausted() {
                break;
            }
            continue;
        }
        let mut events: Vec<IntentEvent> = Vec::new();
        let outcome = pipeline.process_chunk(&chunk, &mut events)?;
        if !on_chunk(outcome, &events)? {
            break;
        }
    }
    Ok(())
}

fn run_replay(
    config: &AppConfig,
    wav: &Path,
    scale_uv: f64,
    schedule: Option<CueSchedule>,
) -> Result<ExitCode> {
    let mut all_events = Vec::new();
    run_offline(
        config,
        Box::new(WavSession::new(wav, scale_uv)),
        |_| Ok(()),
        |_, events| {
            for event in events {
                println!("{}", serde_json::to_string(event)?);
            }
            all_events.extend_from_slice(events);
            Ok(true)
        },
    )
    .with_context(|| format!("replaying {}", wav.display()))?;

    eprintln!("{} events", all_events.len());
    if let Some(schedule) = schedule {
        emit_report(&score_events(schedule, &all_events, EventKind::Blink))?;
    }
    Ok(ExitCode::from(0))
}

fn run_simulate(
    config: AppConfig,
    seconds: f64,
    seed: u64,
    realtime: bool,
    evaluate: bool,
    telemetry: bool,
) -> Result<ExitCode> {
    if seconds.is_nan() || seconds <= 0.0 {
        bail!("--seconds must be positive");
    }
    let schedule = CueSchedule {
        total_cues: (seconds / CueSchedule::default().cycle_seconds()).floor() as usize,
        ..CueSchedule::default()
    };
    let mut spec = SyntheticSpec {
        seed,
        duration_seconds: Some(seconds),
        realtime,
        ..SyntheticSpec::default()
    };
    if evaluate {
        // One blink in the middle of every cue window
        spec.blink_interval_seconds = schedule.cycle_seconds();
        spec.blink_offset_seconds = schedule.relax_seconds + 0.5;
    }

    let engine = EngineHandle::new(config);
    let mut rx = engine.subscribe_events();
    engine
        .start(Box::new(SyntheticSession::new(spec)))
        .context("starting engine")?;

    let mut events = Vec::new();
    loop {
        let finished = !engine.is_running();
        loop {
            match rx.try_recv() {
                Ok(event) => {
                    println!("{}", serde_json::to_string(&event)?);
                    events.push(event);
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    eprintln!("warning: {skipped} events skipped");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        if finished {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    engine.wait()?;

    let status = engine.status()?;
    eprintln!("{}", serde_json::to_string_pretty(&status)?);
    if evaluate {
        emit_report(&score_events(schedule, &events, EventKind::Blink))?;
    }
    if telemetry {
        let line = TelemetryLine {
            kind: "telemetry",
            snapshot: &engine.telemetry_snapshot(),
        };
        eprintln!("{}", serde_json::to_string(&line)?);
    }
    if status.last_error.is_some() {
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::from(0))
}

/// Drain a finite session into a single capture
fn record(config: &AppConfig, session: Box<dyn AcquisitionSession>) -> Result<SampleChunk> {
    let mut guard = SessionGuard::open(session, config.acquisition.buffer_hint)
        .context("opening capture session")?;
    let poll_size = config.acquisition.poll_size(guard.sampling_rate());
    let mut capture = SampleChunk::empty(0, guard.sampling_rate(), 0.0);
    loop {
        let chunk = guard.session().poll_chunk(poll_size)?;
        if chunk.is_empty() {
            if guard.session().is_exhausted() {
                break;
            }
            continue;
        }
        capture.extend(chunk);
    }
    Ok(capture)
}

/// Blink capture, then an eyes-open half and an eyes-closed half
fn rank_synthetic(config: &AppConfig, spec: &SyntheticSpec) -> Result<ChannelProposal> {
    const HALF_SECONDS: f64 = 4.0;
    let blinks = record(
        config,
        Box::new(SyntheticSession::new(SyntheticSpec {
            blink_offset_seconds: 0.5,
            alpha_cycle_seconds: 0.0,
            duration_seconds: Some(9.0),
            realtime: false,
            ..spec.clone()
        })),
    )?;
    let mut open = record(
        config,
        Box::new(SyntheticSession::new(SyntheticSpec {
            blink_interval_seconds: 0.0,
            alpha_cycle_seconds: 2.0 * HALF_SECONDS,
            duration_seconds: Some(2.0 * HALF_SECONDS),
            realtime: false,
            ..spec.clone()
        })),
    )?;
    let closed = open.split_off((HALF_SECONDS * spec.sampling_rate) as usize);

    let mut ranker = ChannelRanker::new(config, spec.sampling_rate, spec.channel_count)
        .context("configuring channel ranking")?;
    Ok(ranker.propose(Some(&blinks), Some((&open, &closed)))?)
}

fn run_rank_channels(config: &AppConfig, spec: &SyntheticSpec) -> Result<ExitCode> {
    let proposal = rank_synthetic(config, spec)?;
    println!("{}", serde_json::to_string_pretty(&proposal)?);

    let mut ranked = config.clone();
    proposal
        .apply_to(&mut ranked, spec.sampling_rate, spec.channel_count)
        .context("applying proposed channels")?;
    eprintln!(
        "conditioning.channels={:?} band_power.channels={:?}",
        ranked.conditioning.channels, ranked.band_power.channels
    );
    Ok(ExitCode::from(0))
}

fn run_calibrate_demo(
    config: &AppConfig,
    seed: u64,
    blink_uv: f64,
    rank_channels: bool,
) -> Result<ExitCode> {
    let mut config = config.clone();
    let calibration = config.calibration.clone();
    let cycle = calibration.quiet_seconds + calibration.event_seconds;
    let spec = SyntheticSpec {
        seed,
        blink_amplitude_uv: blink_uv,
        blink_duration_seconds: (calibration.event_seconds / 2.0).min(0.2),
        blink_interval_seconds: cycle,
        blink_offset_seconds: calibration.quiet_seconds + calibration.event_seconds / 4.0,
        duration_seconds: Some(cycle * calibration.repetitions as f64 + 1.0),
        ..SyntheticSpec::default()
    };
    if rank_channels {
        let proposal = rank_synthetic(&config, &spec)?;
        proposal
            .apply_to(&mut config, spec.sampling_rate, spec.channel_count)
            .context("applying proposed channels")?;
        eprintln!("{}", serde_json::to_string(&proposal)?);
    }

    let mut outcome = None;
    run_offline(
        &config,
        Box::new(SyntheticSession::new(spec)),
        |pipeline| {
            pipeline.begin_calibration(&calibration)?;
            Ok(())
        },
        |chunk_outcome, _| {
            if let Some(progress) = chunk_outcome.calibration_progress {
                eprintln!("{}", serde_json::to_string(&progress)?);
            }
            if let Some(result) = chunk_outcome.calibration_result {
                outcome = Some(result);
                return Ok(false);
            }
            Ok(true)
        },
    )?;

    match outcome {
        Some(result) => {
            let result = result.context("calibration failed")?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(ExitCode::from(0))
        }
        None => {
            eprintln!("calibration did not finish before the synthetic session ended");
            Ok(ExitCode::from(2))
        }
    }
}

#[derive(Serialize)]
struct ReportLine<'a> {
    kind: &'static str,
    #[serde(flatten)]
    report: &'a EvaluationReport,
}

#[derive(Serialize)]
struct TelemetryLine<'a> {
    kind: &'static str,
    #[serde(flatten)]
    snapshot: &'a TelemetrySnapshot,
}

fn emit_report(report: &EvaluationReport) -> Result<()> {
    let line = ReportLine {
        kind: "evaluation",
        report,
    };
    eprintln!("{}", serde_json::to_string_pretty(&line)?);
    Ok(())
}
