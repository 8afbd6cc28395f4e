use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{error, info};

use crate::cli::{Destination, SendArgs, Source};
use crate::config::Config;
use crate::progress::Progress;
use crate::s3::{self, S3Remote, UploadSession};

const BUFFER_SIZE: usize = 1_048_576;

/// Where the bytes go.
enum Sink {
    Upload(UploadSession),
    Null,
}

impl Sink {
    async fn write(&mut self, data: &[u8]) -> s3::Result<()> {
        match self {
            Sink::Upload(session) => session.write(data).await,
            Sink::Null => Ok(()),
        }
    }

    async fn close(&mut self) -> s3::Result<()> {
        match self {
            Sink::Upload(session) => session.close().await,
            Sink::Null => Ok(()),
        }
    }

    async fn abort(&mut self) -> s3::Result<()> {
        match self {
            Sink::Upload(session) => session.abort().await,
            Sink::Null => Ok(()),
        }
    }
}

pub async fn run(args: SendArgs, config: &Config) -> anyhow::Result<()> {
    let reader: Box<dyn AsyncRead + Send + Unpin> = match &args.input {
        Source::Stdin => Box::new(tokio::io::stdin()),
        Source::File(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open input {}", path.display()))?,
        ),
    };

    let sink = match &args.output {
        Destination::Null => Sink::Null,
        Destination::S3 { bucket, key } => {
            let upload_config = args.upload_config();
            S3Remote::check_part_size(upload_config.part_size);

            let client = config.s3.client().await;
            let remote = Arc::new(S3Remote::new(client, bucket.as_str()));
            let mut session = UploadSession::new(remote, key.as_str(), upload_config)?;
            session
                .open()
                .await
                .with_context(|| format!("failed to start upload to {}", args.output))?;
            info!(
                bucket = %bucket,
                key = session.key(),
                upload_id = session.upload_id().unwrap_or_default(),
                "sending stream"
            );
            Sink::Upload(session)
        }
    };

    let start_time = Instant::now();
    let progress = Progress::new(!args.no_progress);
    let sent = transfer(reader, sink, &progress)
        .await
        .with_context(|| format!("failed to send {:?} to {}", args.input, args.output))?;

    info!(
        input = ?args.input,
        output = %args.output,
        bytes = sent,
        elapsed = ?start_time.elapsed(),
        "send finished"
    );
    Ok(())
}

/// Copies `reader` into `sink` and finalizes it. Any failure aborts the sink.
async fn transfer<R>(mut reader: R, mut sink: Sink, progress: &Progress) -> anyhow::Result<u64>
where
    R: AsyncRead + Unpin,
{
    match pump(&mut reader, &mut sink, progress).await {
        Ok(sent) => match sink.close().await {
            Ok(()) => {
                progress.finish();
                Ok(sent)
            }
            Err(err) => {
                progress.abandon();
                Err(err.into())
            }
        },
        Err(err) => {
            progress.abandon();
            if let Err(abort_err) = sink.abort().await {
                error!(error = %abort_err, "failed to abort upload");
                return Err(err.context(format!("aborting the upload also failed: {abort_err}")));
            }
            Err(err)
        }
    }
}

async fn pump<R>(reader: &mut R, sink: &mut Sink, progress: &Progress) -> anyhow::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut sent = 0u64;
    loop {
        let n = reader.read(&mut buffer).await.context("failed to read input")?;
        if n == 0 {
            return Ok(sent);
        }
        sink.write(&buffer[..n]).await?;
        sent += n as u64;
        progress.update(sent);
    }
}
