//! Command line and environment settings
use clap::{Args, Parser, Subcommand};
use flock_core::config::{
    DEFAULT_EXCLUDED_TITLE_TERMS, PipelineSettings, ProviderSettings, QualitySettings,
};
use std::path::PathBuf;

/// Every setting can be passed as a flag or through the environment (`.env` is loaded first).
#[derive(Parser, Debug)]
#[command(name = "flock-worker")]
#[command(about = "Runs the Flock book data pipelines")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: String,

    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 2)]
    pub database_max_connections: u32,

    /// Bucket receiving `covers/{id}.jpg`
    #[arg(long, env = "IMAGES_BUCKET")]
    pub images_bucket: String,

    /// JSON subject table overriding the built-in one
    #[arg(long, env = "SUBJECTS_FILE")]
    pub subjects: Option<PathBuf>,

    /// Emit JSON log lines instead of human readable ones
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    pub log_json: bool,

    #[command(flatten)]
    pub providers: ProviderArgs,

    #[command(flatten)]
    pub quality: QualityArgs,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fill in placeholder books queued by id
    Populate(QueueArgs),
    /// Store AI recommendations for matched users
    Recommend(QueueArgs),
    /// Store the current NY Times bestsellers
    Sync,
    /// Retry covers of books flagged with a bad cover
    Refresh,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct QueueArgs {
    /// Queue to long-poll until interrupted
    #[arg(long, env = "QUEUE_URL", required_unless_present = "message")]
    pub queue_url: Option<String>,

    /// Process this single message body and exit
    #[arg(long, conflicts_with = "queue_url")]
    pub message: Option<String>,

    /// Seconds a received message stays invisible to other consumers
    #[arg(long, env = "QUEUE_VISIBILITY_TIMEOUT", default_value_t = 300)]
    pub visibility_timeout: i32,
}

#[derive(Args, Debug, Clone)]
pub struct ProviderArgs {
    #[arg(long, env = "ISBNDB_API_URL", default_value = "https://api2.isbndb.com")]
    pub isbndb_url: String,

    #[arg(long, env = "ISBNDB_API_KEY", default_value = "", hide_env_values = true)]
    pub isbndb_key: String,

    #[arg(long, env = "OPENLIBRARY_URL", default_value = "https://openlibrary.org")]
    pub openlibrary_url: String,

    #[arg(
        long,
        env = "GOOGLE_BOOKS_URL",
        default_value = "https://www.googleapis.com/books/v1"
    )]
    pub google_books_url: String,

    #[arg(
        long,
        env = "NY_TIMES_API_URL",
        default_value = "https://api.nytimes.com/svc/books/v3"
    )]
    pub nytimes_url: String,

    #[arg(long, env = "NY_TIMES_API_KEY", default_value = "", hide_env_values = true)]
    pub nytimes_key: String,

    #[arg(long, env = "OPEN_AI_API_URL", default_value = "https://api.openai.com/v1")]
    pub openai_url: String,

    #[arg(long, env = "OPEN_AI_API_KEY", default_value = "", hide_env_values = true)]
    pub openai_key: String,

    #[arg(long, env = "OPEN_AI_MODEL", default_value = "gpt-4o-mini")]
    pub openai_model: String,
}

#[derive(Args, Debug, Clone)]
pub struct QualityArgs {
    /// Covers smaller than this are considered placeholders
    #[arg(long, env = "MIN_COVER_BYTES", default_value_t = 5_000)]
    pub min_cover_bytes: usize,

    /// Bounding box edge of stored covers, in pixels
    #[arg(long, env = "COVER_SIZE", default_value_t = 400)]
    pub cover_size: u32,

    /// Comma separated title terms marking box sets and study guides
    #[arg(long, env = "EXCLUDED_TITLE_TERMS", value_delimiter = ',')]
    pub excluded_title_terms: Vec<String>,
}

impl QueueArgs {
    /// Long-poll wait in seconds, the SQS maximum
    pub const WAIT_SECONDS: i32 = 20;
}

impl Cli {
    pub fn pipeline_settings(&self) -> PipelineSettings {
        let args = &self.providers;
        let mut providers = ProviderSettings::default();
        providers.isbndb_url.clone_from(&args.isbndb_url);
        providers.isbndb_key.clone_from(&args.isbndb_key);
        providers.openlibrary_url.clone_from(&args.openlibrary_url);
        providers.google_books_url.clone_from(&args.google_books_url);
        providers.nytimes_url.clone_from(&args.nytimes_url);
        providers.nytimes_key.clone_from(&args.nytimes_key);
        providers.openai_url.clone_from(&args.openai_url);
        providers.openai_key.clone_from(&args.openai_key);
        providers.openai_model.clone_from(&args.openai_model);

        let mut quality = QualitySettings::default();
        quality.min_cover_bytes = self.quality.min_cover_bytes;
        quality.cover_size = self.quality.cover_size;
        let terms: Vec<String> = self
            .quality
            .excluded_title_terms
            .iter()
            .map(|term| term.trim().to_owned())
            .filter(|term| !term.is_empty())
            .collect();
        quality.excluded_title_terms = if terms.is_empty() {
            DEFAULT_EXCLUDED_TITLE_TERMS
                .iter()
                .map(|term| (*term).to_owned())
                .collect()
        } else {
            terms
        };

        PipelineSettings::new(providers, quality)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BASE: [&str; 5] = [
        "flock-worker",
        "--database-url",
        "postgres://localhost/flock",
        "--images-bucket",
        "images",
    ];

    fn parse(extra: &[&str]) -> Cli {
        Cli::try_parse_from(BASE.iter().chain(extra)).unwrap()
    }

    #[test]
    fn single_message_mode() {
        let cli = parse(&["populate", "--message", r#"{"Message":"x"}"#]);
        assert_eq!(
            cli.command,
            Command::Populate(QueueArgs {
                queue_url: None,
                message: Some(r#"{"Message":"x"}"#.to_owned()),
                visibility_timeout: 300,
            })
        );
    }

    #[test]
    fn quality_defaults_and_overrides() {
        let cli = parse(&["sync"]);
        let settings = cli.pipeline_settings();
        assert_eq!(settings.quality, QualitySettings::default());
        assert_eq!(settings.providers.isbndb_url, "https://api2.isbndb.com");

        let cli = parse(&[
            "--min-cover-bytes",
            "8000",
            "--excluded-title-terms",
            "Box Set, Omnibus",
            "refresh",
        ]);
        let settings = cli.pipeline_settings();
        assert_eq!(settings.quality.min_cover_bytes, 8000);
        assert_eq!(
            settings.quality.excluded_title_terms,
            vec!["Box Set".to_owned(), "Omnibus".to_owned()]
        );
    }
}
