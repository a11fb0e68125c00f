use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};

use repobuild::{
    cli::{
        args::{CliArgs, Command},
        exit_status,
    },
    config::RepobuildConfig,
    Error, Repobuild,
};

fn main() -> ExitCode {
    let cli_args = CliArgs::parse();
    let env = Env::default().default_filter_or(cli_args.log_filter());
    env_logger::Builder::from_env(env).init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Could not start the runtime: {}", e);
            return ExitCode::from(exit_status::UNEXPECTED);
        }
    };

    match runtime.block_on(run(cli_args)) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{}", e);
            ExitCode::from(exit_status::for_error(&e))
        }
    }
}

async fn run(cli_args: CliArgs) -> Result<u8, Error> {
    let mut config = RepobuildConfig::load(cli_args.config.as_deref())?;
    cli_args.apply(&mut config);
    let repobuild = Repobuild::builder().config(config).try_build()?;

    let cancellation = repobuild.cancellation().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping running builds");
            cancellation.cancel();
        }
    });

    let report = match cli_args.cmd {
        Command::Resolve => {
            let resolution = repobuild.resolve().await?;
            for level in &resolution.levels {
                info!("Level {}: {} packages", level.index, level.len());
            }
            info!(
                "{} packages had missing dependencies",
                resolution.unresolved.len()
            );
            if repobuild.cancellation().is_cancelled() {
                return Ok(exit_status::CANCELLED);
            }
            return Ok(exit_status::SUCCESS);
        }
        Command::Build { list } => repobuild.build_list(&list).await?,
        Command::Run => repobuild.run().await?,
    };

    for line in report.to_string().lines() {
        info!("{}", line);
    }
    if report.cancelled {
        return Ok(exit_status::CANCELLED);
    }
    Ok(exit_status::SUCCESS)
}
