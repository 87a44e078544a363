use anyhow::Result;

use clap::Parser;
use storycaps::{session::PlanComponent, Args};

async fn run(args: Args) -> Result<()> {
    let fetch = args.fetch;
    let component = PlanComponent::new(args)?;
    component.run()?;
    if fetch {
        for path in component.fetch().await? {
            println!("{}", path.display());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = args.check()?;
    run(args).await
}
