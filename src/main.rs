use anyhow::Context;
use bytes::BytesMut;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;
use tracing_subscriber::EnvFilter;

use network::FrontClient;
use shardstore::{FrontArgs, FrontNode, StoreArgs, StoreNode};
use storage::ObjectId;

#[derive(Parser)]
#[command(name = "shardstore", version, about = "Sharded object storage")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the client-facing front
    Front(FrontArgs),
    /// Run a storage node
    Store(StoreArgs),
    /// Upload a local file as an object
    Put {
        /// Front base URL
        #[arg(long, env = "SHARDSTORE_URL", default_value = "http://127.0.0.1:8080")]
        url: String,
        /// Object id; a fresh one is generated when omitted
        #[arg(long)]
        id: Option<ObjectId>,
        file: PathBuf,
    },
    /// Download an object to a file, or to stdout
    Get {
        #[arg(long, env = "SHARDSTORE_URL", default_value = "http://127.0.0.1:8080")]
        url: String,
        id: ObjectId,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Front(args) => {
            let config = args.validate()?;
            info!("Front configuration: {:?}", config);
            FrontNode::new(config).await?.start(system::shutdown_signal()).await?;
        }
        Command::Store(args) => {
            let config = args.validate()?;
            info!("Storage node configuration: {:?}", config);
            StoreNode::new(config).await?.start(system::shutdown_signal()).await?;
        }
        Command::Put { url, id, file } => put(&url, id.unwrap_or_default(), file).await?,
        Command::Get { url, id, output } => get(&url, id, output).await?,
    }

    Ok(())
}

async fn put(url: &str, id: ObjectId, path: PathBuf) -> anyhow::Result<()> {
    let client = FrontClient::new(url)?;
    let file = tokio::fs::File::open(&path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    let size = file.metadata().await?.len();

    let body = futures::stream::unfold(file, |mut file| async move {
        let mut buf = BytesMut::with_capacity(64 * 1024);
        match file.read_buf(&mut buf).await {
            Ok(0) => None,
            Ok(_) => Some((Ok(buf.freeze()), file)),
            Err(e) => Some((Err(e), file)),
        }
    });

    client
        .upload_stream(&id, size, body)
        .await
        .with_context(|| format!("uploading {} as {}", path.display(), id))?;

    println!("{id}");
    Ok(())
}

async fn get(url: &str, id: ObjectId, output: Option<PathBuf>) -> anyhow::Result<()> {
    let client = FrontClient::new(url)?;
    let mut stream = client
        .get_stream(&id)
        .await
        .with_context(|| format!("downloading {id}"))?;

    let mut sink: Box<dyn tokio::io::AsyncWrite + Unpin> = match &output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    let mut received = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.with_context(|| format!("object {id} ended after {received} bytes"))?;
        sink.write_all(&chunk).await?;
        received += chunk.len() as u64;
    }
    sink.flush().await?;

    info!(object_id = %id, bytes = received, "Object downloaded");
    Ok(())
}
