use clap::Parser;

use procvisor::cli::Cli;
use procvisor::Supervisor;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cfg = Cli::parse().into_config();
    let mut supervisor = Supervisor::new(cfg);
    match supervisor.run().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("procvisor: {err}");
            std::process::exit(1);
        }
    }
}
