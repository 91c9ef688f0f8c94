#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = eval_engine::run_worker().await {
        eprintln!("eval-engine worker fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
