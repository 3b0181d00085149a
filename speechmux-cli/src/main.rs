//! Command-line driver for speechmux-core over the loopback engine.
//!
//! ```text
//! speechmux asr    --chunks 5 --chunk-bytes 320
//! speechmux tts    --text "hello there"
//! speechmux speech [--text "play some music"]
//! speechmux nlp    --text "turn on the light"
//! speechmux stress --threads 4 --sessions 50
//! ```
//!
//! `--config client.json` loads a `ClientConfig`; `SPEECHMUX_*` environment
//! variables override its connection options. `--poll` switches the engine
//! to poll delivery.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use speechmux_core::engine::loopback::DEFAULT_MAX_SESSIONS;
use speechmux_core::{
    load_config, AsrCallback, AsrClient, Client, ClientConfig, Completion, ErrorCode, EventSink,
    LoopbackEngine, LoopbackMode, NlpCallback, NlpClient, RequestKind, SessionId, SpeechCallback,
    SpeechClient, SpeechMuxError, TtsCallback, TtsClient,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "speechmux", version, about = "Drive speech sessions over the loopback engine")]
struct Args {
    /// JSON client configuration.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use poll delivery instead of push delivery.
    #[arg(long, global = true)]
    poll: bool,

    /// Maximum concurrently open voice sessions in the loopback engine.
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_SESSIONS)]
    max_sessions: usize,

    /// Seconds to wait for terminal callbacks.
    #[arg(long, global = true, default_value_t = 5)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream synthetic voice into a recognition session.
    Asr {
        #[arg(long, default_value_t = 5)]
        chunks: usize,
        #[arg(long, default_value_t = 320)]
        chunk_bytes: usize,
    },
    /// Synthesize text.
    Tts {
        #[arg(long)]
        text: String,
    },
    /// Run a combined session, from text when given, otherwise from voice.
    Speech {
        #[arg(long)]
        text: Option<String>,
        #[arg(long, default_value_t = 3)]
        chunks: usize,
    },
    /// Resolve the intent of a transcript.
    Nlp {
        #[arg(long)]
        text: String,
    },
    /// Issue recognition sessions from several threads at once.
    Stress {
        #[arg(long, default_value_t = 4)]
        threads: usize,
        #[arg(long, default_value_t = 50)]
        sessions: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("speechmux=info")),
        )
        .init();

    let Args {
        config: config_path,
        poll,
        max_sessions,
        timeout_secs,
        command,
    } = Args::parse();
    let engine = EngineOptions { poll, max_sessions };
    let mut config = match &config_path {
        Some(path) => load_config(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => ClientConfig::default(),
    };
    config.apply_env_overrides()?;
    let timeout = Duration::from_secs(timeout_secs);

    match command {
        Command::Asr { chunks, chunk_bytes } => {
            let client: AsrClient = open(LoopbackMode::Asr, engine, &config)?;
            let (reporter, mut rx) = reporter();
            let id = client.start_voice(Arc::new(reporter))?;
            feed_voice(&client, id, chunks, chunk_bytes);
            client.end_voice(id);
            wait_terminals(&mut rx, 1, timeout).await?;
            print_snapshot(&client)?;
        }
        Command::Tts { text } => {
            let client: TtsClient = open(LoopbackMode::Tts, engine, &config)?;
            let (reporter, mut rx) = reporter();
            client.put_text(&text, Arc::new(reporter))?;
            wait_terminals(&mut rx, 1, timeout).await?;
            print_snapshot(&client)?;
        }
        Command::Speech { text, chunks } => {
            let client: SpeechClient = open(LoopbackMode::Speech, engine, &config)?;
            let (reporter, mut rx) = reporter();
            match text {
                Some(text) => {
                    client.put_text(&text, Arc::new(reporter))?;
                }
                None => {
                    let id = client.start_voice(Arc::new(reporter))?;
                    feed_voice(&client, id, chunks, 320);
                    client.end_voice(id);
                }
            }
            wait_terminals(&mut rx, 1, timeout).await?;
            print_snapshot(&client)?;
        }
        Command::Nlp { text } => {
            let client: NlpClient = open(LoopbackMode::Nlp, engine, &config)?;
            let (reporter, mut rx) = reporter();
            client.put_text(&text, Arc::new(reporter))?;
            wait_terminals(&mut rx, 1, timeout).await?;
            print_snapshot(&client)?;
        }
        Command::Stress { threads, sessions } => {
            let client: Arc<AsrClient> = Arc::new(open(LoopbackMode::Asr, engine, &config)?);
            stress(client, threads, sessions, timeout).await?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct EngineOptions {
    poll: bool,
    max_sessions: usize,
}

fn open<K: RequestKind>(
    mode: LoopbackMode,
    engine: EngineOptions,
    config: &ClientConfig,
) -> anyhow::Result<Client<K>> {
    let EngineOptions { poll, max_sessions } = engine;
    let factory = move |sink: EventSink| -> anyhow::Result<LoopbackEngine> {
        let engine = if poll {
            LoopbackEngine::polled(mode)
        } else {
            LoopbackEngine::new(mode, sink)
        };
        Ok(engine.with_max_sessions(max_sessions))
    };
    let client = Client::<K>::open(factory, config)?;
    if !client.is_prepared() {
        bail!("engine failed to prepare");
    }
    info!(kind = K::NAME, delivery = ?client.delivery(), "client ready");
    Ok(client)
}

fn feed_voice<K: speechmux_core::session::kind::VoiceInput>(
    client: &Client<K>,
    id: SessionId,
    chunks: usize,
    chunk_bytes: usize,
) {
    let chunk = vec![0_u8; chunk_bytes];
    for _ in 0..chunks {
        client.put_voice(id, &chunk);
    }
}

async fn stress(
    client: Arc<AsrClient>,
    threads: usize,
    sessions: usize,
    timeout: Duration,
) -> anyhow::Result<()> {
    let (reporter, mut rx) = reporter();
    let reporter = reporter.quiet();

    let workers: Vec<_> = (0..threads)
        .map(|_| {
            let client = Arc::clone(&client);
            let reporter = reporter.clone();
            tokio::task::spawn_blocking(move || {
                let mut opened = 0_usize;
                let mut refused = 0_usize;
                for _ in 0..sessions {
                    match client.start_voice(Arc::new(reporter.clone())) {
                        Ok(id) => {
                            opened += 1;
                            client.put_voice(id, &[0; 160]);
                            client.end_voice(id);
                        }
                        Err(SpeechMuxError::AllocationFailed { .. }) => refused += 1,
                        Err(e) => {
                            warn!(error = %e, "stress worker stopped");
                            break;
                        }
                    }
                }
                (opened, refused)
            })
        })
        .collect();

    let (mut opened, mut refused) = (0, 0);
    for worker in workers {
        let (o, r) = worker.await?;
        opened += o;
        refused += r;
    }
    wait_terminals(&mut rx, opened, timeout).await?;

    println!("opened {opened} sessions, {refused} refused by the engine");
    print_snapshot(client.as_ref())?;
    Ok(())
}

fn print_snapshot<K: RequestKind>(client: &Client<K>) -> anyhow::Result<()> {
    let snapshot = client.diagnostics_snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Reporter callback
// ---------------------------------------------------------------------------

enum Report {
    Line(String),
    Terminal,
}

#[derive(Clone)]
struct Reporter {
    tx: UnboundedSender<Report>,
    verbose: bool,
}

fn reporter() -> (Reporter, UnboundedReceiver<Report>) {
    let (tx, rx) = unbounded_channel();
    (Reporter { tx, verbose: true }, rx)
}

impl Reporter {
    fn quiet(self) -> Self {
        Self {
            verbose: false,
            ..self
        }
    }

    fn line(&self, line: String) {
        if self.verbose {
            let _ = self.tx.send(Report::Line(line));
        }
    }

    fn terminal(&self, line: String) {
        self.line(line);
        let _ = self.tx.send(Report::Terminal);
    }
}

impl AsrCallback for Reporter {
    fn on_start(&self, id: SessionId) {
        self.line(format!("[{id}] started"));
    }
    fn on_intermediate_result(&self, id: SessionId, text: &str) {
        self.line(format!("[{id}] … {text}"));
    }
    fn on_complete(&self, id: SessionId, text: &str) {
        self.terminal(format!("[{id}] complete: {text}"));
    }
    fn on_cancel(&self, id: SessionId) {
        self.terminal(format!("[{id}] cancelled"));
    }
    fn on_error(&self, id: SessionId, code: ErrorCode) {
        self.terminal(format!("[{id}] error: {code}"));
    }
}

impl TtsCallback for Reporter {
    fn on_start(&self, id: SessionId) {
        self.line(format!("[{id}] started"));
    }
    fn on_voice_chunk(&self, id: SessionId, data: &[u8]) {
        self.line(format!("[{id}] voice chunk, {} bytes", data.len()));
    }
    fn on_complete(&self, id: SessionId) {
        self.terminal(format!("[{id}] complete"));
    }
    fn on_cancel(&self, id: SessionId) {
        self.terminal(format!("[{id}] cancelled"));
    }
    fn on_error(&self, id: SessionId, code: ErrorCode) {
        self.terminal(format!("[{id}] error: {code}"));
    }
}

impl SpeechCallback for Reporter {
    fn on_start(&self, id: SessionId) {
        self.line(format!("[{id}] started"));
    }
    fn on_intermediate_result(&self, id: SessionId, asr: &str, extra: &str) {
        if extra.is_empty() {
            self.line(format!("[{id}] … {asr}"));
        } else {
            self.line(format!("[{id}] … {asr} ({extra})"));
        }
    }
    fn on_asr_complete(&self, id: SessionId, asr: &str) {
        self.line(format!("[{id}] asr: {asr}"));
    }
    fn on_voice_chunk(&self, id: SessionId, data: &[u8]) {
        self.line(format!("[{id}] voice chunk, {} bytes", data.len()));
    }
    fn on_complete(&self, id: SessionId, result: &Completion) {
        self.terminal(format!(
            "[{id}] complete: asr={:?} nlp={} action={:?}",
            result.asr, result.nlp, result.action
        ));
    }
    fn on_cancel(&self, id: SessionId) {
        self.terminal(format!("[{id}] cancelled"));
    }
    fn on_error(&self, id: SessionId, code: ErrorCode) {
        self.terminal(format!("[{id}] error: {code}"));
    }
}

impl NlpCallback for Reporter {
    fn on_nlp(&self, id: SessionId, nlp: &str) {
        self.terminal(format!("[{id}] nlp: {nlp}"));
    }
    fn on_cancel(&self, id: SessionId) {
        self.terminal(format!("[{id}] cancelled"));
    }
    fn on_error(&self, id: SessionId, code: ErrorCode) {
        self.terminal(format!("[{id}] error: {code}"));
    }
}

/// Print report lines until `expected` terminal callbacks have arrived.
async fn wait_terminals(
    rx: &mut UnboundedReceiver<Report>,
    expected: usize,
    timeout: Duration,
) -> anyhow::Result<()> {
    let mut seen = 0;
    while seen < expected {
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(Report::Line(line))) => println!("{line}"),
            Ok(Some(Report::Terminal)) => seen += 1,
            Ok(None) => bail!("callback channel closed after {seen}/{expected} sessions"),
            Err(_) => bail!("timed out after {seen}/{expected} terminal callbacks"),
        }
    }
    Ok(())
}
