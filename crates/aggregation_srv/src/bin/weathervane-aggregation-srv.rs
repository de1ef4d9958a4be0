//! The binary weathervane-aggregation-srv.

use weathervane_aggregation_srv::*;

#[derive(clap::Parser, Debug)]
#[command(version)]
pub struct Args {
    /// The tcp port to listen on.
    #[arg(default_value_t = 4567)]
    pub port: u16,

    /// By default, weathervane-aggregation-srv runs in "testing"
    /// configuration with very short poll timeouts and a long
    /// checkpoint interval. This testing mode should be more than
    /// enough for developer testing and continuous integration.
    ///
    /// To run with the timeouts and checkpoint cadence meant for a real
    /// deployment, set this "production" mode.
    #[arg(long)]
    pub production: bool,

    /// Output tracing in json format.
    #[arg(long)]
    pub json: bool,

    /// The path of the checkpoint file holding server state across
    /// restarts.
    #[arg(long, default_value = "data.json")]
    pub data_file: std::path::PathBuf,
}

fn main() {
    let args = <Args as clap::Parser>::parse();

    let t = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::DEBUG.into())
                .from_env_lossy(),
        )
        .with_file(true)
        .with_line_number(true);

    if args.json {
        t.json().try_init()
    } else {
        t.try_init()
    }
    .expect("failed to init tracing");

    let mut config = if args.production {
        Config::production()
    } else {
        Config::testing()
    };

    config.listen_address.set_port(args.port);
    config.checkpoint_path = args.data_file;

    tracing::info!(?config);

    let (send, recv) = std::sync::mpsc::channel();

    ctrlc::set_handler(move || {
        send.send(()).unwrap();
    })
    .unwrap();

    let srv = match AggregationSrv::new(config) {
        Ok(srv) => srv,
        Err(err) => {
            tracing::error!(?err, "failed to start server");
            std::process::exit(1);
        }
    };

    let _ = recv.recv();

    tracing::info!("Terminating...");
    drop(srv);
    tracing::info!("Exit Process.");
    std::process::exit(0);
}
