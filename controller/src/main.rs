mod host;
mod recorder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
