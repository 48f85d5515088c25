use anyhow::{anyhow, Context as _, Result};
use cardsock::{Card, Config, Context, Endpoint, Framing, Outcome, Protocol};
use clap::Parser as _;
use owo_colors::{colors, OwoColorize};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, trace, trace_span};

type SWColorOK = colors::Green;
type SWColorWarning = colors::Yellow;
type SWColorError = colors::Red;

#[derive(clap::Parser, Debug)]
struct Args {
    /// Increase log level.
    #[arg(short, long, action=clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease log level.
    #[arg(short, long, action=clap::ArgAction::Count)]
    quiet: u8,

    /// Path to the card emulator's socket.
    #[arg(short, long, env = "CARDSOCK_SOCKET")]
    socket: Option<PathBuf>,

    /// Use an already connected socket inherited from the parent process.
    #[arg(long, conflicts_with = "socket")]
    fd: Option<RawFd>,

    /// Socket framing; detected from the socket if not given.
    #[arg(long, value_enum)]
    framing: Option<FramingArg>,

    /// Give up on a response after this many milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Command.
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy)]
enum FramingArg {
    Stream,
    Packet,
}

impl From<FramingArg> for Framing {
    fn from(v: FramingArg) -> Self {
        match v {
            FramingArg::Stream => Self::Stream,
            FramingArg::Packet => Self::Packet,
        }
    }
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// List readers.
    ListReaders,

    /// Print the card's ATR.
    Atr,

    /// Send one or more command APDUs, in hex.
    Send {
        #[arg(required = true)]
        apdus: Vec<String>,
    },
}

impl Command {
    pub fn run(&self, args: &Args) -> Result<()> {
        match self {
            Self::ListReaders => self.list_readers(args),
            Self::Atr => self.atr(args),
            Self::Send { apdus } => self.send(args, apdus),
        }
    }

    fn list_readers(&self, args: &Args) -> Result<()> {
        let span = trace_span!("list_readers");
        let _enter = span.enter();

        let ctx = Context::with_config(config(args));
        for name in ctx.list_readers() {
            println!("{}", name);
        }
        Ok(())
    }

    fn atr(&self, args: &Args) -> Result<()> {
        let span = trace_span!("atr");
        let _enter = span.enter();

        let mut card = connect(args)?;
        if card.atr().is_empty() {
            println!("{}", "(no ATR)".italic());
        } else {
            println!("{}", hex::encode_upper(card.atr()));
        }
        card.disconnect()?;
        Ok(())
    }

    fn send(&self, args: &Args, apdus: &[String]) -> Result<()> {
        let span = trace_span!("send");
        let _enter = span.enter();

        let commands = apdus
            .iter()
            .map(|s| {
                let clean: String = s.chars().filter(|c| !c.is_whitespace() && *c != ':').collect();
                hex::decode(&clean).with_context(|| format!("invalid hex APDU: {}", s))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut card = connect(args)?;
        for cmd in commands {
            println!("{} {}", ">>".dimmed(), hex::encode_upper(&cmd));
            let (rsp, outcome) = card
                .transmit_vec(&cmd)
                .with_context(|| format!("couldn't transmit {}", hex::encode_upper(&cmd)))?;
            print_response(&rsp, outcome);
        }
        card.disconnect()?;
        Ok(())
    }
}

fn print_response(rsp: &[u8], outcome: Outcome) {
    let data = &rsp[..rsp.len().saturating_sub(2)];
    let sw = outcome.status_word();
    if !data.is_empty() {
        println!("{} {}", "<<".dimmed(), hex::encode_upper(data));
    }
    match sw.sw1() {
        0x90 => println!("{} {}", "SW".italic(), sw.fg::<SWColorOK>()),
        0x61 | 0x62 | 0x63 => println!(
            "{} {} ({})",
            "SW".italic(),
            sw.fg::<SWColorWarning>(),
            sw.status()
        ),
        _ => println!(
            "{} {} ({})",
            "SW".italic(),
            sw.fg::<SWColorError>(),
            sw.status()
        ),
    }
}

fn config(args: &Args) -> Config {
    let mut config = Config::new();
    if let Some(framing) = args.framing {
        config = config.with_framing(framing.into());
    }
    if let Some(ms) = args.timeout_ms {
        config = config.with_read_timeout(Duration::from_millis(ms));
    }
    config
}

fn connect(args: &Args) -> Result<Card> {
    let span = trace_span!("connect");
    let _enter = span.enter();

    let endpoint = match (&args.socket, args.fd) {
        (Some(path), _) => {
            debug!(?path, "Connecting to socket");
            Endpoint::Path(path.clone())
        }
        (None, Some(fd)) => {
            debug!(fd, "Using inherited socket");
            // SAFETY: The descriptor is handed to us by whoever launched us, and nothing
            // else in this process owns it.
            Endpoint::Fd(unsafe { OwnedFd::from_raw_fd(fd) })
        }
        (None, None) => return Err(anyhow!("No card socket given, use --socket or --fd")),
    };
    Context::with_config(config(args))
        .connect(endpoint, Protocol::Any)
        .context("Couldn't connect to card")
}

fn init_logging(args: &Args) {
    tracing_subscriber::fmt()
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_max_level(match (2 + args.verbose).saturating_sub(args.quiet) {
            0 => tracing::Level::ERROR,
            1 => tracing::Level::WARN,
            2 => tracing::Level::INFO,
            3 => tracing::Level::DEBUG,
            4.. => tracing::Level::TRACE,
        })
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);
    trace!(?args, "Starting up");
    args.command.run(&args)
}
