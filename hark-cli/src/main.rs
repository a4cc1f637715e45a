//! hark command-line host.
//!
//! Builds a `LocalListener` over the microphone (or a WAV file), prints every
//! bus message as a JSON line and every recognised utterance as plain text.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use hark_core::audio::wav::WavBackend;
use hark_core::bus::cue::CommandCue;
use hark_core::config::{default_config_path, load_config};
use hark_core::{
    AudioBackend, BroadcastBus, CpalBackend, GrammarSpec, ListenerConfig, LocalListener,
    StubDecoderFactory, TaskKind,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

const USAGE: &str = "Usage: hark [--config <file.json>] [--wav <file.wav>] [--once] \\
  [--numbers] [--grammar \"PHRASE=PH ON.EH MZ\"]... [--async <seconds>]";

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    wav: Option<PathBuf>,
    once: bool,
    numbers: bool,
    grammar: Vec<(String, String)>,
    async_for: Option<Duration>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args::default();

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --config");
                };
                args.config = Some(PathBuf::from(v));
            }
            "--wav" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --wav");
                };
                args.wav = Some(PathBuf::from(v));
            }
            "--once" => args.once = true,
            "--numbers" => args.numbers = true,
            "--grammar" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --grammar");
                };
                let Some((phrase, phonemes)) = v.split_once('=') else {
                    bail!("--grammar expects PHRASE=PHONEMES, got '{v}'");
                };
                args.grammar.push((phrase.to_string(), phonemes.to_string()));
            }
            "--async" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --async");
                };
                let secs = v
                    .parse::<u64>()
                    .with_context(|| format!("invalid value for --async: {v}"))?;
                args.async_for = Some(Duration::from_secs(secs.clamp(1, 3_600)));
            }
            "--help" | "-h" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other}\n{USAGE}"),
        }
    }

    if args.numbers && !args.grammar.is_empty() {
        bail!("--numbers and --grammar are mutually exclusive");
    }
    if args.async_for.is_some() && (args.numbers || !args.grammar.is_empty()) {
        bail!("--async only supports the default dictionary");
    }
    Ok(args)
}

fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("hark=info")),
        )
        .init();

    let args = parse_args()?;

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut config = load_config(&config_path);
    config.apply_env_overrides();
    info!(
        config = %config_path.display(),
        lang = %config.lang,
        "hark starting"
    );

    let bus = BroadcastBus::new();
    let printer = spawn_printer(&bus)?;

    let listener = build_listener(&args, config, bus)?;
    let result = run(&args, &listener);

    drop(listener);
    if printer.join().is_err() {
        warn!("bus printer thread panicked");
    }
    result
}

fn build_listener(
    args: &Args,
    config: ListenerConfig,
    bus: BroadcastBus,
) -> anyhow::Result<LocalListener> {
    let backend: Box<dyn AudioBackend> = match &args.wav {
        Some(path) => {
            info!(path = %path.display(), "reading audio from file");
            Box::new(WavBackend::new(path).paced(args.async_for.is_some()))
        }
        None => Box::new(CpalBackend::new(config.preferred_input_device.clone())),
    };

    let confirm = config.confirm_listening;
    let listener = LocalListener::new(
        config,
        Arc::new(StubDecoderFactory::default()),
        backend,
        Arc::new(bus),
    )
    .context("failed to start the local listener")?;
    if confirm {
        listener.set_cue(Arc::new(CommandCue::default()));
    }
    Ok(listener)
}

/// Print bus messages until every sender is gone.
fn spawn_printer(bus: &BroadcastBus) -> anyhow::Result<thread::JoinHandle<()>> {
    let mut rx = bus.subscribe();
    let handle = thread::Builder::new()
        .name("hark-bus-printer".into())
        .spawn(move || loop {
            match rx.blocking_recv() {
                Ok(message) => match serde_json::to_string(&message) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!("failed to serialise bus message: {e}"),
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "bus printer lagged"),
                Err(RecvError::Closed) => break,
            }
        })?;
    Ok(handle)
}

fn run(args: &Args, listener: &LocalListener) -> anyhow::Result<()> {
    if let Some(duration) = args.async_for {
        return run_async(args, listener, duration);
    }

    if args.once {
        let heard = if args.numbers {
            listener.listen_numbers_once(None)?
        } else if !args.grammar.is_empty() {
            listener.listen_once_specialized(&grammar(args)?)?
        } else {
            listener.listen_once()?
        };
        match heard {
            Some(text) => println!("{text}"),
            None => info!("stream ended without an utterance"),
        }
        return Ok(());
    }

    let utterances = if args.numbers {
        listener.listen_numbers(None)?
    } else if !args.grammar.is_empty() {
        listener.listen_specialized(&grammar(args)?)?
    } else {
        listener.listen()?
    };
    for utterance in utterances {
        println!("{}", utterance?);
    }
    Ok(())
}

fn run_async(args: &Args, listener: &LocalListener, duration: Duration) -> anyhow::Result<()> {
    let kind = if args.once {
        TaskKind::SingleShot
    } else {
        TaskKind::Continuous
    };
    let rx = listener.subscribe_utterances();
    match kind {
        TaskKind::Continuous => listener.listen_async()?,
        TaskKind::SingleShot => listener.listen_once_async()?,
    }

    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        if let Ok(text) = rx.recv_timeout(Duration::from_millis(50)) {
            println!("{text}");
        }
        if listener
            .task_outcome(kind)
            .is_some_and(|outcome| outcome.is_finished())
        {
            break;
        }
    }
    listener.stop();
    for text in rx.try_iter() {
        println!("{text}");
    }

    let outcome = listener.task_outcome(kind);
    info!(?outcome, "listening task finished");
    Ok(())
}

fn grammar(args: &Args) -> anyhow::Result<GrammarSpec> {
    GrammarSpec::from_pairs(args.grammar.iter().cloned()).context("invalid --grammar entry")
}
