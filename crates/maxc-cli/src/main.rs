use std::{
    env, fs,
    io::{self, BufRead, Write},
    process::ExitCode,
};

use maxc::{ReplSession, Runner, StdPrint};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    match args.len() {
        1 => repl(),
        2 => run_file(&args[1]),
        _ => {
            eprintln!("usage: maxc <file>");
            ExitCode::FAILURE
        }
    }
}

fn run_file(path: &str) -> ExitCode {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error reading {path}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let runner = match Runner::new(&source, path) {
        Ok(runner) => runner,
        Err(diags) => {
            eprintln!("{diags}");
            return ExitCode::FAILURE;
        }
    };

    match runner.run(&mut StdPrint) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn repl() -> ExitCode {
    println!("Welcome to maxc repl mode!");

    let mut session = ReplSession::new();
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!(">> ");
        let _ = io::stdout().flush();

        let Some(Ok(line)) = lines.next() else {
            println!();
            break;
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == ":q" {
            println!("Good Bye");
            break;
        }

        match session.feed(&line, &mut StdPrint) {
            Ok(Some(echo)) => println!("{echo}"),
            Ok(None) => {}
            Err(err) => eprintln!("{err}"),
        }
    }

    ExitCode::SUCCESS
}
