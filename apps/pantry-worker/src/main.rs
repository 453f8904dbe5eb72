use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;
	let args = pantry_worker::Args::parse();
	pantry_worker::run(args).await
}
