use clap::Parser;
use clinic_flow::cli::{self, Args};
use clinic_flow::logging;

#[tokio::main]
async fn main() -> clinic_flow::Result<()> {
    let args = Args::parse();
    let _logging = logging::init(&args)?;
    if let Err(err) = cli::run(args).await {
        tracing::error!(error = %err, "command failed");
        return Err(err);
    }
    Ok(())
}
