#[tokio::main]
async fn main() {
    if let Err(e) = colorbot_lib::run().await {
        tracing::error!(error = %e, "colorbot exited with error");
        eprintln!("colorbot: {e}");
        std::process::exit(1);
    }
}
