//! agent-turn CLI binary entry point.

use agent_turn::cli::demo::{run_demo, stdout_sink};
use agent_turn::cli::{init_tracing, resolve_config, Cli, Commands, ConfigArgs, DemoArgs};

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse_args();

    let result = match cli.command {
        Commands::Demo(args) => handle_demo(args).await,
        Commands::Config(args) => handle_config(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn handle_demo(args: DemoArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(None)?;
    let report = run_demo(&args, config, stdout_sink()).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn handle_config(args: ConfigArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(args.path.as_deref())?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}
