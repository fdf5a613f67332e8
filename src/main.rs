use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tileforge::database::GameDatabase;
use tileforge::rng::ChaChaSource;
use tileforge::template::Template;
use tileforge::{GenerateError, Stage};

/// Generate a strategy map from a declarative template.
#[derive(Parser)]
#[command(name = "tileforge", version)]
struct Args {
    /// Template file (JSON).
    #[arg(long)]
    template: PathBuf,

    /// Game database file (JSON).
    #[arg(long)]
    database: PathBuf,

    /// Generation seed.
    #[arg(long)]
    seed: u64,

    /// Output map file (JSON).
    #[arg(long)]
    out: PathBuf,

    /// Stop the pipeline after the named stage (debugging aid).
    #[arg(long)]
    stop_after: Option<String>,
}

const EXIT_TEMPLATE_ERROR: u8 = 2;
const EXIT_GENERATION_ERROR: u8 = 3;

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let template_text = match std::fs::read_to_string(&args.template) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("cannot read template {}: {err}", args.template.display());
            return ExitCode::from(EXIT_TEMPLATE_ERROR);
        }
    };
    let template = match Template::from_json_str(&template_text) {
        Ok(template) => template,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(EXIT_TEMPLATE_ERROR);
        }
    };

    let database_text = match std::fs::read_to_string(&args.database) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("cannot read database {}: {err}", args.database.display());
            return ExitCode::from(EXIT_TEMPLATE_ERROR);
        }
    };
    let database = match GameDatabase::from_json_str(&database_text) {
        Ok(database) => database,
        Err(err) => {
            eprintln!("database parse error: {err}");
            return ExitCode::from(EXIT_TEMPLATE_ERROR);
        }
    };

    let stop_after = match &args.stop_after {
        None => None,
        Some(name) => match Stage::from_str(name) {
            Some(stage) => Some(stage),
            None => {
                eprintln!("unknown stage '{name}'");
                return ExitCode::from(EXIT_TEMPLATE_ERROR);
            }
        },
    };

    let mut rng = ChaChaSource::new(args.seed);
    let map = match tileforge::generate(&template, &database, &mut rng, stop_after) {
        Ok(map) => map,
        Err(GenerateError::Template(err)) => {
            eprintln!("{err}");
            return ExitCode::from(EXIT_TEMPLATE_ERROR);
        }
        Err(GenerateError::Generation(err)) => {
            eprintln!("{err}");
            return ExitCode::from(EXIT_GENERATION_ERROR);
        }
    };

    let serialized = match serde_json::to_string_pretty(&map) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("serialization error: {err}");
            return ExitCode::from(EXIT_GENERATION_ERROR);
        }
    };
    if let Err(err) = std::fs::write(&args.out, serialized) {
        eprintln!("cannot write {}: {err}", args.out.display());
        return ExitCode::from(EXIT_GENERATION_ERROR);
    }
    ExitCode::SUCCESS
}
