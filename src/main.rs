use canvas_sync::app;

#[tokio::main]
async fn main() {
    if let Err(err) = app::run().await {
        tracing::error!("Application failed to start: {}", err);
        std::process::exit(1);
    }
}
