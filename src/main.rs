// Main entry point for the application

use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use haxxload::client::{Client, ProgressSink, ProgressUpdate, TransferOutcome, TransferRequest};
use haxxload::common::config::{ClientConfig, ServerConfig};
use haxxload::common::types::{DeflateFormat, Phase, DEFAULT_PORT};
use haxxload::protocol::Magic;
use haxxload::server::FileReceiver;
use haxxload::source::FileSource;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "haxxload")]
#[command(about = "Push executables to a HAXX network loader", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a file and send it to a loader
    Send {
        /// File to send
        file: PathBuf,

        /// Loader host name or IP address
        #[arg(env = "HAXXLOAD_HOST")]
        host: String,

        /// Loader TCP port (default: 4299)
        #[arg(long)]
        port: Option<u16>,

        /// Four-byte protocol magic, e.g. HAXX or 1027
        #[arg(long)]
        magic: Option<Magic>,

        /// Name announced to the loader (default: the file's own name)
        #[arg(long)]
        name: Option<String>,

        /// Bytes per network write
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Deflate level, 0-9
        #[arg(long)]
        level: Option<u32>,

        /// Send a bare deflate stream instead of zlib framing
        #[arg(long)]
        raw: bool,

        /// Connect timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// JSON config file; flags override its values
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Receive one transfer and store it
    Listen {
        /// Bind address (default: 0.0.0.0:4299)
        #[arg(long, default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)))]
        bind: SocketAddr,

        /// Where received files go (default: ./received)
        #[arg(long, default_value = "./received")]
        output_dir: PathBuf,

        /// Four-byte protocol magic to accept
        #[arg(long)]
        magic: Option<Magic>,

        /// Expect a bare deflate stream instead of zlib framing
        #[arg(long)]
        raw: bool,
    },
}

/// Renders one bar per phase.
struct PhaseBars {
    mp: MultiProgress,
    current: Option<(Phase, ProgressBar)>,
}

impl PhaseBars {
    fn new() -> Self {
        Self {
            mp: MultiProgress::new(),
            current: None,
        }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{spinner:.green} {msg:<12} [{bar:40.cyan/blue}] {pos:>3}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-")
    }
}

impl ProgressSink for PhaseBars {
    fn on_progress(&mut self, update: ProgressUpdate) {
        let stale = matches!(&self.current, Some((phase, _)) if *phase != update.phase);
        if stale {
            if let Some((_, pb)) = self.current.take() {
                pb.finish();
            }
        }

        let (_, pb) = self.current.get_or_insert_with(|| {
            let pb = self.mp.add(ProgressBar::new(100));
            pb.set_style(Self::style());
            pb.set_message(update.phase.to_string());
            (update.phase, pb)
        });
        pb.set_position(update.percent as u64);
    }

    fn on_finished(&mut self, outcome: &TransferOutcome) {
        if let Some((_, pb)) = self.current.take() {
            match outcome {
                TransferOutcome::Success(_) => pb.finish(),
                TransferOutcome::Failed(_) => pb.abandon_with_message("failed"),
            }
        }
    }
}

fn client_config(
    config: Option<PathBuf>,
    port: Option<u16>,
    magic: Option<Magic>,
    chunk_size: Option<usize>,
    level: Option<u32>,
    raw: bool,
    timeout: Option<u64>,
) -> Result<ClientConfig> {
    let mut cfg = match config {
        Some(path) => ClientConfig::load(&path)?,
        None => ClientConfig::default(),
    };
    if let Some(port) = port {
        cfg = cfg.with_port(port);
    }
    if let Some(magic) = magic {
        cfg = cfg.with_magic(magic);
    }
    if let Some(size) = chunk_size {
        cfg = cfg.with_chunk_size(size)?;
    }
    if let Some(level) = level {
        cfg = cfg.with_compression_level(level)?;
    }
    if raw {
        cfg = cfg.with_format(DeflateFormat::Raw);
    }
    if let Some(secs) = timeout {
        cfg = cfg.with_connect_timeout(Duration::from_secs(secs))?;
    }
    Ok(cfg)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Send {
            file,
            host,
            port,
            magic,
            name,
            chunk_size,
            level,
            raw,
            timeout,
            config,
        } => {
            println!("=== HAXXLOAD Send ===\n");

            let config = client_config(config, port, magic, chunk_size, level, raw, timeout)?;
            let request = match name {
                Some(name) => TransferRequest::new(FileSource::new(&file), name, host.as_str()),
                None => TransferRequest::from_path(&file, host.as_str())?,
            };

            println!("File to send:");
            println!("  Path: {:?}", file);
            println!("  Name: {}", request.file_name());
            println!("\nLoader:");
            println!("  Address: {}:{}", host, config.port);
            println!("  Magic: {}", config.magic);
            println!("  Format: {:?} (level {})", config.format, config.compression_level);
            println!("  Chunk Size: {} bytes\n", config.chunk_size);

            let client = Client::new(config);
            let handle = client.send(request)?;
            let mut bars = PhaseBars::new();

            match handle.wait_with(&mut bars) {
                TransferOutcome::Success(report) => {
                    println!("\n✅ Transfer complete!");
                    println!("  Peer: {}", report.peer);
                    println!(
                        "  Original: {} bytes ({:.2} MB)",
                        report.original_length,
                        report.original_length as f64 / 1_048_576.0
                    );
                    println!(
                        "  Compressed: {} bytes ({:.1}%)",
                        report.compressed_length,
                        report.ratio() * 100.0
                    );
                    println!("  On the wire: {} bytes", report.bytes_on_wire);
                    println!("  Elapsed: {:.2?}", report.elapsed);
                    println!("  BLAKE3: {}", report.fingerprint);
                }
                TransferOutcome::Failed(e) => {
                    eprintln!("\n❌ Transfer failed: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Listen {
            bind,
            output_dir,
            magic,
            raw,
        } => {
            println!("=== HAXXLOAD Listen ===\n");

            let mut config = ServerConfig::new(bind, output_dir);
            if let Some(magic) = magic {
                config = config.with_magic(magic);
            }
            if raw {
                config = config.with_format(DeflateFormat::Raw);
            }

            println!("Receiver Configuration:");
            println!("  Address: {}", config.bind_addr);
            println!("  Magic: {}", config.magic);
            println!("  Format: {:?}", config.format);
            println!("  Output Directory: {:?}", config.output_dir);

            let receiver = FileReceiver::bind(config)?;
            println!("\n✓ Listening on {}", receiver.local_addr()?);

            let received = receiver.accept_one()?;
            println!("\n✅ Received {} from {}", received.file_name, received.peer);
            println!("  Stored at: {:?}", received.path);
            println!(
                "  Size: {} bytes ({} compressed)",
                received.original_length, received.compressed_length
            );
        }
    }

    Ok(())
}
