//! CLI commands

mod generate;
mod pull;

pub use generate::{generate, GenerateArgs};
pub use pull::pull;

use clap::{Parser, Subcommand};

/// Batch text generation with nucleus sampling sweeps
#[derive(Parser)]
#[command(name = "batchgen")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate responses for a prompt file under every decoding strategy
    Generate(GenerateArgs),

    /// Pull model from HuggingFace Hub
    Pull {
        /// Repository ID (e.g., "TinyLlama/TinyLlama-1.1B-Chat-v1.0")
        repo: String,

        /// Specific file to download (e.g., "tinyllama-1.1b-chat-v1.0.Q8_0.gguf")
        #[arg(long)]
        file: Option<String>,

        /// Output directory
        #[arg(long, short, env = "BATCHGEN_MODEL_DIR")]
        output: Option<std::path::PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_generate() {
        let cli = Cli::try_parse_from([
            "batchgen",
            "generate",
            "--prompt-path",
            "prompts.txt",
            "--model",
            "gpt2",
            "--bsz",
            "8",
            "--top-p",
            "0.0",
            "0.9",
            "--no-cuda",
        ])
        .unwrap();

        match cli.command {
            Commands::Generate(args) => {
                assert_eq!(args.batch_size, Some(8));
                assert_eq!(args.top_p, vec![0.0, 0.9]);
                assert!(args.no_cuda);
            }
            _ => panic!("expected generate"),
        }
    }

    #[test]
    fn test_parse_pull() {
        let repo_id = "TinyLlama/TinyLlama-1.1B-Chat-v1.0";
        let cli = Cli::try_parse_from(["batchgen", "pull", repo_id]).unwrap();
        assert!(matches!(cli.command, Commands::Pull { ref repo, .. } if repo == repo_id));
    }
}
