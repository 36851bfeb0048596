use clap::Parser;

fn main() {
    let cli = avfetchctl::Cli::parse();
    if let Err(err) = avfetchctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
