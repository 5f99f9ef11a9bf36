use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = exchange::arguments::Arguments::parse();
    exchange::run::run(args).await
}
