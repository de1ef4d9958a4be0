//! The binary weathervane-get-client: fetches the most recent visible
//! observation from an aggregation server and prints it as flat
//! `key: value` text.

use weathervane_aggregation_client::*;

#[derive(clap::Parser, Debug)]
#[command(version)]
pub struct Args {
    /// The aggregation server address, e.g. `127.0.0.1:4567`.
    pub addr: String,

    /// The station to query. When omitted the server answers for the
    /// station of the most recent upload.
    pub station_id: Option<String>,

    /// The stable client id to present. A random id is generated when
    /// not given.
    #[arg(long)]
    pub client_id: Option<String>,

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

    let client_id = args.client_id.unwrap_or_else(random_participant_id);

    match blocking_get(
        args.addr.as_str(),
        &client_id,
        args.station_id.as_deref(),
    ) {
        Ok(observation) => {
            print!("{}", json_to_text(&observation));
        }
        Err(err) => {
            tracing::error!(?err, "query failed");
            std::process::exit(1);
        }
    }
}
