//! The binary weathervane-put-client: a content producer that reads a
//! weather observation from a flat text file and uploads it to an
//! aggregation server, retrying on failure.

use weathervane_aggregation_client::*;

#[derive(clap::Parser, Debug)]
#[command(version)]
pub struct Args {
    /// The aggregation server address, e.g. `127.0.0.1:4567`.
    pub addr: String,

    /// The observation file to upload: one `key: value` pair per line,
    /// including an `id` line naming the station.
    pub file: std::path::PathBuf,

    /// The stable producer id to upload under. A random id is
    /// generated when not given; pass one to keep liveness across
    /// repeated invocations.
    #[arg(long)]
    pub producer_id: Option<String>,

    /// How many upload attempts to make before giving up.
    #[arg(long, default_value_t = 3)]
    pub attempts: usize,

    /// Seconds to wait between upload attempts.
    #[arg(long, default_value_t = 15)]
    pub retry_interval_s: u64,

    /// Output tracing in json format.
    #[arg(long)]
    pub json: bool,
}

fn main() {
    let args = <Args as clap::Parser>::parse();

    let t = tracing_subscriber::fmt().with_env_filter(
        tracing_subscriber::EnvFilter::builder()
            .with_default_directive(tracing::Level::INFO.into())
            .from_env_lossy(),
    );

    if args.json {
        t.json().try_init()
    } else {
        t.try_init()
    }
    .expect("failed to init tracing");

    let producer_id =
        args.producer_id.unwrap_or_else(random_participant_id);

    let text = match std::fs::read_to_string(&args.file) {
        Ok(text) => text,
        Err(err) => {
            tracing::error!(?err, file = ?args.file, "cannot read observation file");
            std::process::exit(1);
        }
    };

    let observation = match text_to_json(&text) {
        Ok(observation) => observation,
        Err(err) => {
            tracing::error!(?err, file = ?args.file, "cannot parse observation file");
            std::process::exit(1);
        }
    };

    match blocking_put_with_retry(
        args.addr.as_str(),
        &producer_id,
        &observation,
        args.attempts,
        std::time::Duration::from_secs(args.retry_interval_s),
    ) {
        Ok(()) => {
            tracing::info!(%producer_id, "observation uploaded");
        }
        Err(err) => {
            tracing::error!(?err, "giving up on upload");
            std::process::exit(1);
        }
    }
}
