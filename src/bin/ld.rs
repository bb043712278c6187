use mold_rs::{driver, opt};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();

    let result = opt::parse_opts(&args).and_then(driver::link);

    if let Err(err) = result {
        eprintln!("mold: {err:#}");
        std::process::exit(1);
    }
}
