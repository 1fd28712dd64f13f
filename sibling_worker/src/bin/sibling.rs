use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use sibling_attest::AttestationChannel;
use sibling_codec::Value;
use sibling_worker::{
    BlobStore, ExecutionContext, HttpTransport, SiblingConfig, Worker, WorkerEvent, WorkerOptions,
    inbound, utils::logging::init_logging,
};
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Spawn sibling workers and talk to the attestation device.
#[derive(Parser, Debug)]
#[command(name = "sibling")]
#[command(version, about)]
struct Args {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Control channel URL (overrides the config file and SIBLING_CONTROL_URL).
    #[arg(long, global = true)]
    control_url: Option<String>,

    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log to a daily rolling file in the user cache directory instead of stderr.
    #[arg(long, global = true)]
    log_to_file: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Spawn a sibling from a script file and post messages to it.
    Spawn {
        #[arg(long)]
        script: PathBuf,

        /// Script type: module or classic.
        #[arg(long = "type")]
        script_type: Option<String>,

        /// Credentials mode: omit, same-origin or include.
        #[arg(long)]
        credentials: Option<String>,

        #[arg(long)]
        name: Option<String>,

        /// JSON value to post; may be repeated.
        #[arg(long = "message")]
        messages: Vec<String>,

        /// Accept messages from the sibling on this address until Ctrl-C.
        #[arg(long)]
        listen: Option<SocketAddr>,

        /// Leave the sibling running on exit.
        #[arg(long)]
        keep_alive: bool,
    },
    /// Send one request to the attestation device.
    Attest {
        /// File holding the raw request.
        #[arg(long)]
        input: PathBuf,

        /// Where to write the response; stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.log_to_file)?;

    let config = load_config(args.config.as_deref(), args.control_url)?;

    match args.command {
        Command::Spawn {
            script,
            script_type,
            credentials,
            name,
            messages,
            listen,
            keep_alive,
        } => {
            let options = WorkerOptions {
                name,
                r#type: script_type,
                credentials,
            };
            spawn(config, &script, options, &messages, listen, keep_alive).await
        }
        Command::Attest { input, output } => attest(&config, &input, output.as_deref()).await,
    }
}

fn load_config(path: Option<&Path>, control_url: Option<String>) -> Result<SiblingConfig> {
    let config = match path {
        Some(path) => SiblingConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SiblingConfig::default(),
    };
    let mut config = config.apply_env_overrides();
    if let Some(url) = control_url {
        config.control_url = url;
    }
    config.validate()?;
    Ok(config)
}

async fn spawn(
    config: SiblingConfig,
    script: &Path,
    options: WorkerOptions,
    messages: &[String],
    listen: Option<SocketAddr>,
    keep_alive: bool,
) -> Result<()> {
    let source = tokio::fs::read_to_string(script)
        .await
        .with_context(|| format!("reading {}", script.display()))?;
    let values = messages
        .iter()
        .map(|m| {
            serde_json::from_str::<serde_json::Value>(m)
                .map(Value::from)
                .with_context(|| format!("--message is not JSON: {m}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let transport = HttpTransport::new(config.control_url.parse()?, config.request_timeout())?;
    let blobs = Arc::new(BlobStore::default());
    let context = Arc::new(ExecutionContext::new(
        Arc::new(transport),
        blobs.clone(),
        config,
    ));

    let url = blobs.create_object_url(source);
    let worker = Worker::new(context.clone(), &url, options)?;
    blobs.revoke_object_url(&url);

    let mut events = worker.subscribe();
    for value in &values {
        worker.post_message(value, &[])?;
    }

    if let Err(e) = worker.ready().await {
        context.settle().await;
        bail!("sibling {} failed to start: {e}", worker.id());
    }
    println!("{} channel={}", worker.id(), worker.channel().await?);

    if let Some(addr) = listen {
        let printer = tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    WorkerEvent::Message(value) => match value.to_json() {
                        Some(json) => println!("{json}"),
                        None => println!("{value:?}"),
                    },
                    WorkerEvent::Error { message, .. } => eprintln!("error: {message}"),
                }
            }
        });
        inbound::serve(context.clone(), addr, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
        printer.abort();
    }

    if !keep_alive {
        worker.terminate();
    }
    context.settle().await;
    Ok(())
}

async fn attest(config: &SiblingConfig, input: &Path, output: Option<&Path>) -> Result<()> {
    let request = tokio::fs::read(input)
        .await
        .with_context(|| format!("reading {}", input.display()))?;
    let device = config.attestation_device.clone();

    let response = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
        let mut channel = AttestationChannel::open_path(&device)
            .with_context(|| format!("opening {}", device.display()))?;
        let response = channel.request(&request)?;
        channel.close()?;
        Ok(response)
    })
    .await??;

    match output {
        Some(path) => tokio::fs::write(path, &response)
            .await
            .with_context(|| format!("writing {}", path.display()))?,
        None => std::io::stdout().write_all(&response)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_spawn_arguments() {
        let args = Args::try_parse_from([
            "sibling",
            "spawn",
            "--script",
            "worker.js",
            "--type",
            "module",
            "--message",
            r#"{"message":"hello"}"#,
            "--message",
            "2",
        ])
        .unwrap();
        match args.command {
            Command::Spawn {
                script_type,
                messages,
                ..
            } => {
                assert_eq!(script_type.as_deref(), Some("module"));
                assert_eq!(messages.len(), 2);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn control_url_flag_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sibling.toml");
        std::fs::write(&path, "control_url = \"http://file.local/\"\n").unwrap();

        let config = load_config(Some(&path), Some("http://flag.local/".to_string())).unwrap();
        assert_eq!(config.control_url, "http://flag.local/");
    }
}
