use anyhow::{anyhow, bail, Result};
use log::debug;

use std::cmp::Ordering;
use std::io::{BufRead, Write};

use connect4_solver::{PlayError, Position, Solver, WIDTH};

const COMMANDS: [(&str, &str); 8] = [
    ("play <moves>", "play one or more tiles, columns are numbered 1 to 7"),
    ("undo", "take back the last tile"),
    ("clear", "start a new game"),
    ("board", "show the current position"),
    ("evaluate", "score every legal move"),
    ("solve", "score the position and pick a best move"),
    ("help", "list the commands"),
    ("quit", "leave the shell"),
];

/// Line based front end for a [`Solver`], one command per line
///
/// The solver and its transposition table live as long as the shell, so
/// positions analysed earlier speed up later commands.
pub struct Shell {
    solver: Solver,
}

impl Shell {
    pub fn new(solver: Solver) -> Self {
        Self { solver }
    }

    /// Executes commands from `input` until it ends or `quit` is read
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, mut output: W) -> Result<()> {
        for line in input.lines() {
            let line = line?;

            // skip empty lines and comments
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let parts: Vec<&str> = line.split_whitespace().collect();
            let command = parts[0].to_lowercase();
            if command == "quit" || command == "exit" {
                break;
            }

            match self.execute(&command, &parts[1..]) {
                Ok(response) => writeln!(output, "{}", response)?,
                Err(error) => writeln!(output, "error: {}", error)?,
            }
            output.flush()?;
        }
        Ok(())
    }

    fn execute(&mut self, command: &str, args: &[&str]) -> Result<String> {
        debug!("command {} {:?}", command, args);
        match command {
            "play" => {
                let moves = match args {
                    [moves] => *moves,
                    _ => bail!("play takes one argument, got {}", args.len()),
                };
                self.play(moves)
            }
            "undo" => {
                let column = self.solver.last_move().map(|column| column + 1);
                self.solver.try_undo()?;
                Ok(format!("took back column {}", column.unwrap_or_default()))
            }
            "clear" => {
                self.solver.set_position(Position::new());
                Ok("new game".to_owned())
            }
            "board" => Ok(format!("{}", *self.solver)),
            "evaluate" => self.evaluate(),
            "solve" => self.solve(),
            "help" => Ok(COMMANDS
                .iter()
                .map(|(usage, description)| format!("{:<14}{}", usage, description))
                .collect::<Vec<_>>()
                .join("\n")),
            _ => bail!("unknown command '{}', try 'help'", command),
        }
    }

    // all or nothing, a bad tile leaves the position untouched
    fn play(&mut self, moves: &str) -> Result<String> {
        let mut position = Position::clone(&self.solver);
        for column_char in moves.chars() {
            let column = match column_char.to_digit(10) {
                Some(column) if column > 0 => column as usize,
                _ => return Err(PlayError::InvalidCharacter(column_char).into()),
            };
            position.try_play(column - 1)?;
        }

        let outcome = position.outcome();
        self.solver.set_position(position);
        if outcome.is_decided() {
            Ok(format!("played {}, {}", moves, outcome))
        } else {
            Ok(format!("played {}", moves))
        }
    }

    fn evaluate(&mut self) -> Result<String> {
        if self.solver.is_over() {
            bail!("the game is over");
        }
        let scores = self.solver.move_scores();
        let best = scores
            .iter()
            .flatten()
            .max()
            .copied()
            .ok_or_else(|| anyhow!("no legal moves"))?;

        let lines: Vec<String> = (0..WIDTH)
            .map(|column| match scores[column] {
                Some(score) if score == best => format!("{}: {} (optimal)", column + 1, score),
                Some(score) => format!("{}: {}", column + 1, score),
                None => format!("{}: full", column + 1),
            })
            .collect();
        Ok(lines.join("\n"))
    }

    fn solve(&mut self) -> Result<String> {
        if self.solver.is_over() {
            bail!("the game is over");
        }
        let (score, best_move) = self.solver.solve();
        let best_move = best_move.ok_or_else(|| anyhow!("no legal moves"))?;

        Ok(report(&self.solver, score, best_move))
    }
}

/// Describes a solved position, as printed by `solve`
pub fn report(solver: &Solver, score: i32, best_move: usize) -> String {
    let win_distance = solver.score_to_win_distance(score);
    let move_string = if win_distance == 1 { "move" } else { "moves" };
    let player = solver.active_player();
    let summary = match score.cmp(&0) {
        Ordering::Greater => format!(
            "{:?} can force a win in at most {} {}.",
            player, win_distance, move_string
        ),
        Ordering::Less => format!(
            "{:?} can force a win in at most {} {}.",
            player.opponent(),
            win_distance,
            move_string
        ),
        Ordering::Equal => format!(
            "{:?} can at best force a draw, {} {} remaining.",
            player, win_distance, move_string
        ),
    };

    format!("score: {}\n{}\nbest move: {}", score, summary, best_move + 1)
}
