#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = eval_engine::run().await {
        eprintln!("eval-engine fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
