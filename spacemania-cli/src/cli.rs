use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Interaction log written in the working directory, away from any index
/// directory that `build` replaces.
pub const DEFAULT_LOG_FILE: &str = "interactions.jsonl";

/// Build a searchable index from your documents and ask questions about them
#[derive(Parser, Debug)]
#[command(name = "spacemania", version, about, long_about = None)]
pub struct Cli {
    /// Model provider for embeddings and answers
    #[arg(long, value_enum, default_value_t = Provider::Gemini, global = true)]
    pub provider: Provider,

    /// JSONL interaction log
    #[arg(long, global = true, default_value = DEFAULT_LOG_FILE)]
    pub log: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract, chunk and embed documents, replacing the index
    Build {
        /// Index directory
        #[arg(short, long)]
        index: PathBuf,

        /// PDF or text files to index
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Answer a question from a built index
    Ask {
        /// Index directory
        #[arg(short, long)]
        index: PathBuf,

        /// Id of the user asking
        #[arg(short, long)]
        user: String,

        /// Number of chunks to retrieve
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// The question
        question: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provider {
    Gemini,
    Openai,
    /// Offline models, for trying things out
    Mock,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_build() {
        let cli =
            Cli::try_parse_from(["spacemania", "build", "--index", "idx", "a.pdf", "b.txt"]).unwrap();
        assert_eq!(cli.provider, Provider::Gemini);
        match cli.command {
            Command::Build { index, files } => {
                assert_eq!(index, PathBuf::from("idx"));
                assert_eq!(files, vec![PathBuf::from("a.pdf"), PathBuf::from("b.txt")]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn interaction_log_defaults_outside_the_index() {
        let cli = Cli::try_parse_from(["spacemania", "ask", "-i", "idx", "-u", "u1", "q"]).unwrap();
        assert_eq!(cli.log, PathBuf::from(DEFAULT_LOG_FILE));
        match cli.command {
            Command::Ask { index, .. } => assert!(!cli.log.starts_with(&index)),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn build_needs_at_least_one_file() {
        assert!(Cli::try_parse_from(["spacemania", "build", "--index", "idx"]).is_err());
    }

    #[test]
    fn parses_ask_with_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "spacemania",
            "ask",
            "--index",
            "idx",
            "--user",
            "u1",
            "-k",
            "2",
            "--provider",
            "mock",
            "--log",
            "log.jsonl",
            "What is the fuel capacity?",
        ])
        .unwrap();

        assert_eq!(cli.provider, Provider::Mock);
        assert_eq!(cli.log, PathBuf::from("log.jsonl"));
        match cli.command {
            Command::Ask { user, top_k, question, .. } => {
                assert_eq!(user, "u1");
                assert_eq!(top_k, Some(2));
                assert_eq!(question, "What is the fuel capacity?");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn ask_requires_a_user() {
        assert!(Cli::try_parse_from(["spacemania", "ask", "--index", "idx", "q"]).is_err());
    }

    #[test]
    fn rejects_unknown_provider() {
        let err = Cli::try_parse_from(["spacemania", "--provider", "x", "build", "-i", "i", "f"]);
        assert!(err.is_err());
    }
}
