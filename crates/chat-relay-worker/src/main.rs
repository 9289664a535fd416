#[tokio::main]
async fn main() {
    if let Err(e) = chat_relay_worker::run().await {
        eprintln!("worker error: {e}");
        std::process::exit(1);
    }
}
