use clap::Parser;
use log::{error, info};
use rtucap::configuration::config::Args;
use rtucap::controller::controller_handler::Controller;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // RUST_LOG overrides the level chosen here
    env_logger::Builder::new()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .format_target(false)
        .parse_default_env()
        .init();

    let config = match args.resolve() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Run with --help for usage.");
            std::process::exit(1);
        }
    };

    let controller = Controller::new(config);
    match controller.run().await {
        Ok(summary) => {
            info!(
                "capture finished ({}): {} packets",
                summary.end, summary.stats.packets
            );
            // a reader blocked on the serial port or a pipe open must not
            // hold up process exit
            std::process::exit(0);
        }
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}
