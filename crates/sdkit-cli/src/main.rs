//! CLI entry point - the composition root.
//!
//! This is the only place where settings, flag mapping, bus, supervisor
//! and executors are wired together. All user-visible feedback flows
//! through the event bus; the printer task is its sole terminal sink.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use sdkit_cli::{printer, Cli, Commands, GenerateArgs};
use sdkit_core::{
    EventBus, FlagMap, GenerationRequest, GenerationResult, Generator, Settings,
};
use sdkit_runtime::{
    select_backend, BackendChoice, CliGenerator, LogRouter, ProcessSupervisor, ServerGenerator,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::load(&cli.config)
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;

    let Some(command) = cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        return Ok(());
    };

    match command {
        Commands::Generate(args) => generate(settings, args).await,
    }
}

async fn generate(settings: Settings, args: GenerateArgs) -> anyhow::Result<()> {
    let mapping = match settings.flags_mapping_path.as_deref() {
        Some(path) => FlagMap::load(path).context("loading flags mapping")?,
        None => FlagMap::default(),
    };

    let bus = EventBus::new();
    let printer = printer::spawn(&bus);
    let router = LogRouter::new(bus.clone());

    let output_dir = settings
        .output_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    let supervisor = Arc::new(ProcessSupervisor::new(
        router.clone(),
        output_dir.join("sd-server.log"),
    ));

    let request = GenerationRequest {
        model_path: args.model.clone(),
        prompt: args.prompt.clone(),
        params: args.request_params(),
        output_path: args.output.clone().unwrap_or_else(|| {
            output_dir.join(format!(
                "sdkit_{}.png",
                chrono::Local::now().format("%Y%m%d_%H%M%S")
            ))
        }),
        log_file_path: args.log_file.clone(),
    };

    let mode = args
        .mode
        .map_or_else(|| settings.effective_execution_mode(), Into::into);
    let choice = select_backend(mode, &mapping, &request.params, 0, &bus);

    let generator: Arc<dyn Generator> = match choice {
        BackendChoice::Cli => {
            let executable = settings
                .executable_path
                .clone()
                .context("executable_path is not configured")?;
            Arc::new(CliGenerator::new(executable, router))
        }
        BackendChoice::Server => Arc::new(ServerGenerator::new(
            settings,
            mapping,
            Arc::clone(&supervisor),
            router,
        )),
    };

    let (tx, rx) = tokio::sync::oneshot::channel::<(bool, GenerationResult)>();
    let runner = Arc::clone(&generator);
    let run = tokio::spawn(async move {
        runner
            .run(
                request,
                Box::new(move |ok, result| {
                    let _ = tx.send((ok, result));
                }),
            )
            .await;
    });

    let outcome = tokio::select! {
        outcome = rx => outcome,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, stopping generation");
            generator.stop();
            run.await.ok();
            return Err(anyhow::anyhow!("interrupted"));
        }
    };

    run.await.ok();
    supervisor.stop().await;

    // Release every bus sender so the printer drains and exits
    drop(generator);
    drop(supervisor);
    drop(bus);
    printer.await.ok();

    let (ok, result) = outcome.context("generation worker dropped its callback")?;
    if ok {
        for file in &result.files {
            println!("saved: {}", file.display());
        }
        if let Some(time) = result.generation_time {
            println!("done in {time}");
        }
        Ok(())
    } else {
        let reason = result.error.unwrap_or_else(|| "unknown error".to_string());
        Err(anyhow::anyhow!("generation failed: {reason}"))
    }
}
