//! Main CLI parser and top-level argument handling.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use sdkit_core::{ExecutionMode, RequestParam};

/// Command-line interface for driving a stable-diffusion.cpp backend.
#[derive(Parser)]
#[command(name = "sdkit")]
#[command(about = "Run image generations against a stable-diffusion.cpp backend")]
#[command(version)]
pub struct Cli {
    /// Settings file (JSON); missing file means built-in defaults
    #[arg(long, global = true, default_value = "sdkit.json")]
    pub config: PathBuf,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run one image generation
    Generate(GenerateArgs),
}

/// Executor selection from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Spawn the backend binary per request
    Cli,
    /// Use the HTTP server (supervised or external)
    Server,
    /// Decide per request
    Auto,
}

impl From<ModeArg> for ExecutionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Cli => ExecutionMode::CliOnly,
            ModeArg::Server => ExecutionMode::ServerOnly,
            ModeArg::Auto => ExecutionMode::Auto,
        }
    }
}

#[derive(Debug, clap::Args)]
pub struct GenerateArgs {
    /// Model file to load
    #[arg(short, long)]
    pub model: PathBuf,

    /// Prompt text
    #[arg(short, long)]
    pub prompt: String,

    /// Output image path (default: timestamped file in the output dir)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Extra backend flag, repeatable ("--steps=20" or "--verbose")
    #[arg(long = "set", value_name = "FLAG[=VALUE]", allow_hyphen_values = true)]
    pub params: Vec<String>,

    /// Per-request log file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Override the configured execution mode
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,
}

impl GenerateArgs {
    /// Parse the repeated `--set` arguments into request parameters.
    /// `FLAG=VALUE` splits on the first `=`; a bare flag is a switch.
    #[must_use]
    pub fn request_params(&self) -> Vec<RequestParam> {
        self.params
            .iter()
            .map(|raw| match raw.split_once('=') {
                Some((flag, value)) => RequestParam::new(flag, value),
                None => RequestParam::switch(raw.clone()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn parser_builds() {
        Cli::command().debug_assert();
    }

    #[test]
    fn generate_args_parse() {
        let cli = Cli::parse_from([
            "sdkit",
            "generate",
            "--model",
            "/models/sd.gguf",
            "--prompt",
            "a cat",
            "--set",
            "--steps=20",
            "--set",
            "--verbose",
            "--mode",
            "server",
        ]);
        let Some(Commands::Generate(args)) = cli.command else {
            panic!("expected generate subcommand");
        };
        assert_eq!(args.model, PathBuf::from("/models/sd.gguf"));
        assert_eq!(args.mode, Some(ModeArg::Server));
        assert_eq!(
            args.request_params(),
            vec![
                RequestParam::new("--steps", "20"),
                RequestParam::switch("--verbose"),
            ]
        );
    }

    #[test]
    fn value_with_equals_splits_once() {
        let args = GenerateArgs {
            model: PathBuf::new(),
            prompt: String::new(),
            output: None,
            params: vec!["--lora=name=0.8".to_string()],
            log_file: None,
            mode: None,
        };
        assert_eq!(
            args.request_params(),
            vec![RequestParam::new("--lora", "name=0.8")]
        );
    }
}
