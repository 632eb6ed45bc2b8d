use surge_core::logging;

mod cli;

fn main() {
    logging::init();

    if let Err(err) = cli::run_from_args() {
        eprintln!("surge error: {:#}", err);
        std::process::exit(1);
    }
}
