use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "sqlite://science_roadmap.db?mode=rwc"
    )]
    database_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply the schema
    Migrate,

    /// Upsert the default forum categories and any extra names
    Categories {
        /// Extra category name, sanitized before it is stored; repeatable
        #[arg(long = "name")]
        names: Vec<String>,
    },

    /// List stored categories
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Migrate => seed::migrate(&args.database_url).await,
        Command::Categories { names } => seed::load_categories(&args.database_url, &names).await,
        Command::Check => seed::check_categories(&args.database_url).await,
    }
}
