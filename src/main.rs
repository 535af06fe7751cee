use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use crossterm::{
    cursor::MoveToColumn,
    queue,
    style::Print,
    terminal::{Clear, ClearType},
};
use cw_capture::{
    sim::SimOpener, ClockScale, Conf, Counter, Exporter, Progress, ScopeOptions, Session,
    TriggerMode,
};
use log::{error, info, LevelFilter};
use simplelog::{
    ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger,
};
use std::{
    fs::File,
    io::{stdout, Write},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

#[derive(Parser, Debug)]
#[command(version, about = "Drive side-channel trace captures")]
struct Cli {
    /// TOML configuration file, optional
    #[arg(short, long, default_value = "cw-capture.toml")]
    config: PathBuf,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(flatten)]
    scope: ScopeArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ScopeArgs {
    #[arg(long, global = true)]
    samples: Option<usize>,
    /// rising_edge or falling_edge
    #[arg(long, global = true)]
    trigger_mode: Option<TriggerMode>,
    #[arg(long, global = true, allow_negative_numbers = true)]
    offset: Option<i64>,
    #[arg(long, global = true, allow_negative_numbers = true)]
    pre_samples: Option<i64>,
    /// clkgen_x1 or clkgen_x4
    #[arg(long, global = true)]
    scale: Option<ClockScale>,
    #[arg(long, global = true)]
    key_bits: Option<usize>,
    #[arg(long, global = true)]
    text_bits: Option<usize>,
    /// Fixed key as hex
    #[arg(long, global = true, conflicts_with = "random_key")]
    key: Option<String>,
    #[arg(long, global = true)]
    random_key: bool,
    /// Fixed plaintext as hex
    #[arg(long, global = true, conflicts_with = "random_text")]
    text: Option<String>,
    #[arg(long, global = true)]
    random_text: bool,
    #[arg(long, global = true)]
    export_dir: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the session status
    Status,
    /// Capture one trace
    Single {
        /// Save the hardware trigger count afterwards
        #[arg(long)]
        update_trig_cnt: bool,
    },
    /// Capture and export a batch of traces
    Batch {
        quantity: usize,
        identifier: String,
        /// Sample window to keep
        #[arg(long, num_args = 2, value_names = ["START", "END"])]
        poi: Option<Vec<usize>>,
    },
    /// Program the target with an Intel HEX file
    Program { hex: PathBuf },
}

/// One-line batch progress on the terminal.
struct TermProgress {
    counter: Counter,
}

impl Progress for TermProgress {
    fn update(&mut self, done: usize, total: usize) {
        self.counter.increment();
        let mut out = stdout();
        let _ = queue!(
            out,
            MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            Print(format!(
                "Measuring... {:.2}% ({}/{}) {:.1} traces/s",
                done as f64 / total as f64 * 100.0,
                done,
                total,
                self.counter.rate()
            ))
        );
        let _ = out.flush();
    }

    fn finish(&mut self) {
        println!();
        info!(
            "Captured {} traces, {:.1} traces/s on average",
            self.counter.n_traces,
            self.counter.average_rate()
        );
    }
}

fn init_logging(conf: &Conf, verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => LevelFilter::from_str(&conf.log.level)
            .map_err(|_| anyhow!("invalid log level '{}'", conf.log.level))?,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if let Some(file) = &conf.log.file {
        let file = File::create(file).with_context(|| format!("creating log file {file}"))?;
        loggers.push(WriteLogger::new(LevelFilter::Debug, Config::default(), file));
    }
    CombinedLogger::init(loggers)?;
    Ok(())
}

/// Command line values win over the configuration file.
fn scope_options(conf: &Conf, args: &ScopeArgs) -> ScopeOptions {
    let from_conf = conf.scope.options();
    ScopeOptions {
        samples: args.samples.or(from_conf.samples),
        trigger_mode: args.trigger_mode.or(from_conf.trigger_mode),
        offset: args.offset.or(from_conf.offset),
        pre_samples: args.pre_samples.or(from_conf.pre_samples),
        scale: args.scale.or(from_conf.scale),
    }
}

fn apply_pattern(session: &mut Session, conf: &Conf, args: &ScopeArgs) -> Result<()> {
    session.set_key_length(args.key_bits.unwrap_or(conf.capture.key_bits))?;
    session.set_text_length(args.text_bits.unwrap_or(conf.capture.text_bits))?;

    if args.random_key || (args.key.is_none() && conf.capture.random_key) {
        session.set_random_key()?;
    } else if let Some(key) = args.key.as_ref().or(conf.capture.key.as_ref()) {
        session.set_fixed_key(key)?;
    }

    if args.random_text {
        session.set_random_text()?;
    } else if let Some(text) = args.text.as_ref().or(conf.capture.text.as_ref()) {
        session.set_fixed_text(text)?;
    }
    Ok(())
}

fn prepare(session: &mut Session, conf: &Conf, args: &ScopeArgs) -> Result<()> {
    apply_pattern(session, conf, args)?;
    let options = scope_options(conf, args);
    if !options.is_empty() {
        session.configure(&options)?;
    }
    Ok(())
}

fn run(session: &mut Session, command: Command) -> Result<()> {
    match command {
        Command::Status => {
            let status = session.status()?;
            status.log();
            println!("{status}");
        }
        Command::Single { update_trig_cnt } => {
            let trace = session.capture_single(update_trig_cnt)?;
            println!("{trace}");
        }
        Command::Batch {
            quantity,
            identifier,
            poi,
        } => {
            let poi = poi.map(|p| (p[0], p[1]));
            let mut progress = TermProgress {
                counter: Counter::new(),
            };
            let result =
                session.capture_batch_with_progress(quantity, &identifier, poi, &mut progress)?;
            let (rows, cols) = result.arrays.traces.dim();
            println!("trace   : {} ({rows} x {cols})", result.paths.trace.display());
            println!("key     : {} ({})", result.paths.key.display(), result.arrays.keys.len());
            println!("textin  : {} ({})", result.paths.textin.display(), result.arrays.textins.len());
            println!("textout : {} ({})", result.paths.textout.display(), result.arrays.textouts.len());
        }
        Command::Program { hex } => session.program_firmware(&hex)?,
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let conf = Conf::load(&cli.config)
        .with_context(|| format!("loading configuration {}", cli.config.display()))?;
    init_logging(&conf, cli.verbose)?;

    let export_dir = cli.scope.export_dir.as_deref().unwrap_or(&conf.export.dir);
    let exporter = Exporter::new(export_dir)?.with_compression(conf.export.compression_level);

    let mut session = Session::new(Box::new(SimOpener::new(conf.sim.clone())))
        .with_exporter(exporter)
        .with_capture_timeout(Duration::from_millis(conf.capture.timeout_ms))
        .with_seed(conf.capture.seed);
    session.connect()?;
    info!("{session}");

    let outcome =
        prepare(&mut session, &conf, &cli.scope).and_then(|_| run(&mut session, cli.command));

    settle(outcome, session.disconnect())
}

/// A failed run keeps its own error; a failed disconnect is then only logged.
fn settle(outcome: Result<()>, closed: cw_capture::Result<()>) -> Result<()> {
    match (outcome, closed) {
        (Err(e), Err(close)) => {
            error!("Disconnect failed: {close}");
            Err(e)
        }
        (Ok(()), closed) => Ok(closed?),
        (outcome, Ok(())) => outcome,
    }
}
