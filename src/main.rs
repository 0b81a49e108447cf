//! beefstep CLI - plays a step document over MIDI

#[cfg(feature = "cli")]
use beefstep::{
    midi::{
        self, InputPort, MidiInputDevice, MidiOutputDevice, OutputPort, DEFAULT_SYNC_PORT,
        DEFAULT_VOICE_PORT,
    },
    PlaybackEngine, Ports, Sequence, SyncMode,
};
#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use std::{path::PathBuf, sync::Arc};
#[cfg(feature = "cli")]
use tracing::{info, Level};

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "beefstep")]
#[command(about = "Text step sequencer for MIDI", long_about = None)]
struct Cli {
    /// Document containing beef blocks
    #[arg(required_unless_present = "list_outputs")]
    document: Option<PathBuf>,

    /// Voice output port, overrides the document's voiceout
    #[arg(short, long)]
    output: Option<String>,

    /// Print available MIDI ports and exit
    #[arg(long)]
    list_outputs: bool,

    /// Part or arrangement to play (default: first arrangement, else first part)
    #[arg(short, long)]
    play: Option<String>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[cfg(feature = "cli")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    if cli.list_outputs {
        println!("outputs:");
        for name in midi::available_outputs() {
            println!("  {name}");
        }
        println!("inputs:");
        for name in midi::available_inputs() {
            println!("  {name}");
        }
        return Ok(());
    }

    let Some(path) = cli.document else {
        return Err("no document given".into());
    };
    let document = std::fs::read_to_string(&path)?;
    let sequence = Sequence::parse(&document)?;
    for warning in sequence.warnings() {
        eprintln!("warning: {warning}");
    }

    let meta = sequence.metadata();
    let voice_name = cli.output.as_deref().unwrap_or(&meta.voice_out);
    let voice = MidiOutputDevice::open(voice_name, DEFAULT_VOICE_PORT)?;
    info!(port = voice.name(), "voice output connected");

    let sync_out: Option<Arc<dyn OutputPort>> = match meta.sync {
        SyncMode::Leader => {
            let port = MidiOutputDevice::open(&meta.sync_out, DEFAULT_SYNC_PORT)?;
            info!(port = port.name(), "sync output connected");
            Some(Arc::new(port))
        }
        _ => None,
    };
    let sync_in: Option<Arc<dyn InputPort>> = match meta.sync {
        SyncMode::Follower => Some(Arc::new(MidiInputDevice::open(
            &meta.sync_in,
            DEFAULT_SYNC_PORT,
        ))),
        _ => None,
    };

    let engine = PlaybackEngine::new(Ports {
        voice: Arc::new(voice),
        sync_out,
        sync_in,
    });
    engine.configure(meta);

    let playable = match cli.play.as_deref() {
        Some(name) => sequence
            .find(name)
            .cloned()
            .ok_or_else(|| format!("no part or arrangement named '{name}'"))?,
        None => sequence
            .default_playable()
            .ok_or("document has no parts or arrangements")?,
    };
    println!("{}", playable.title());
    engine.set_playable(playable);
    engine.listen()?;

    if meta.sync == SyncMode::Follower {
        let (stopped_tx, stopped) = crossbeam::channel::bounded(1);
        engine.stopped_bus().sub("cli", stopped_tx);
        engine.listen_sync()?;
        info!("waiting for transport start");
        let _ = stopped.recv();
        engine.stop_sync();
    } else {
        engine.start_playback();
    }
    engine.wait();

    for err in engine.drain_errors() {
        eprintln!("error: {err}");
    }
    Ok(())
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("This binary requires the 'cli' feature to be enabled");
    std::process::exit(1);
}
