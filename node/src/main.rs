#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hab_node::host::run().await
}
