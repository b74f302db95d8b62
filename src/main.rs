//! gradtape CLI entry point.
//!
//! Usage:
//!   gradtape lex "<formula>"            (dump tokens)
//!   gradtape parse "<formula>"          (dump AST)
//!   gradtape ad "<formula>" <var>...    (build and print the tape)

use gradtape::{make_autodiff, parse_expression, printer, Tokenizer};
use std::{env, process};

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: gradtape <command> \"<formula>\" [vars...]");
        eprintln!("Commands: lex, parse, ad");
        process::exit(64);
    }

    let command = &args[1];
    let formula = &args[2];

    match command.as_str() {
        "lex" => match Tokenizer::tokenize(formula) {
            Ok(tokenizer) => {
                for token in &tokenizer.tokens {
                    println!("{:?}", token);
                }
            }
            Err(e) => fail(e.into()),
        },

        "parse" => match parse_expression(formula) {
            Ok(parse) => println!("{:#?}", parse.root),
            Err(e) => fail(e),
        },

        "ad" => {
            let vars: Vec<&str> = args[3..].iter().map(String::as_str).collect();
            if vars.is_empty() {
                eprintln!("ad requires at least one variable name");
                process::exit(64);
            }
            match make_autodiff(formula, &vars) {
                Ok(tape) => print!("{}", printer::print_tape(&tape)),
                Err(e) => fail(e),
            }
        }

        _ => {
            eprintln!("Unknown command: {}", command);
            process::exit(64);
        }
    }
}

fn fail(err: gradtape::Error) -> ! {
    eprintln!("{:?}", miette::Report::new(err));
    process::exit(65);
}
