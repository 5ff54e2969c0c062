use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = metubed::Cli::parse();
    metubed::init_tracing(&cli.log_level);
    if let Err(err) = metubed::run(cli).await {
        tracing::error!(error = %err, "metubed failed");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
