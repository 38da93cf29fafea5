use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use log::info;

use std::io::{stdin, stdout};
use std::path::PathBuf;

use connect4_solver::{
    opening_database::DEFAULT_DATABASE_PATH, OpeningDatabase, Position, Solver, SolverConfig,
};

mod shell;
use shell::Shell;

#[derive(Parser, Debug)]
#[command(author, version, about = "Exact solver for Connect 4", long_about = None)]
struct Args {
    /// Solver settings in TOML format
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Search every position without consulting an opening database
    #[arg(long)]
    no_book: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read commands from stdin (the default)
    Shell,
    /// Print the score and a best move of a position
    Solve {
        /// One-indexed columns played so far, e.g. 4453
        moves: String,
    },
    /// Solve every opening position and write them to a database file
    GenerateBook {
        /// Number of tiles played in the deepest stored positions, must match
        /// `opening_database_depth` of the config
        #[arg(long)]
        depth: Option<usize>,
        #[arg(long, default_value = DEFAULT_DATABASE_PATH)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, log_level),
    )
    .init();

    let mut config = match &args.config {
        Some(path) => SolverConfig::from_toml_file(path)?,
        None => SolverConfig::default(),
    };
    if args.no_book {
        config.opening_database_path = None;
    }

    match args.command.unwrap_or(Command::Shell) {
        Command::Shell => {
            let solver = Solver::with_config(Position::new(), &config);
            println!("Welcome to Connect 4, type 'help' for a list of commands\n");
            Shell::new(solver).run(stdin().lock(), stdout())
        }
        Command::Solve { moves } => {
            let position = Position::from_moves(&moves)?;
            if position.is_over() {
                bail!("the game is over: {}", position.outcome());
            }
            let mut solver = Solver::with_config(position, &config);
            let (score, best_move) = solver.solve();
            match best_move {
                Some(best_move) => println!("{}", shell::report(&solver, score, best_move)),
                None => bail!("no legal moves"),
            }
            info!("{} nodes searched", solver.node_count);
            Ok(())
        }
        Command::GenerateBook { depth, output } => {
            let depth = config.book_generation_depth(depth)?;
            OpeningDatabase::generate(
                &Position::new(),
                depth,
                &output,
                config.transposition_table_bits,
            )?;
            Ok(())
        }
    }
}
