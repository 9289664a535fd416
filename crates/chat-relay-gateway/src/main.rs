#[tokio::main]
async fn main() {
    if let Err(e) = chat_relay_gateway::run().await {
        eprintln!("gateway error: {e}");
        std::process::exit(1);
    }
}
