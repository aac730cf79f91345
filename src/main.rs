extern crate pretty_env_logger;

use std::path::Path;
use std::process::exit;

use accuvote_interpreter::ballot_card::load_oval_template;
use accuvote_interpreter::election::Election;
use accuvote_interpreter::interpret::{interpret_ballot_card, InterpretOptions};
use accuvote_interpreter::ovals::{
    OvalScoringMethod, OvalScoringOptions, DEFAULT_MAXIMUM_SEARCH_DISTANCE,
};
use clap::{arg, command, value_parser, ArgMatches, Command};

fn main() {
    pretty_env_logger::init_custom_env("LOG");

    let matches = cli().get_matches();
    let options = match interpret_options(&matches) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("Error: {}", message);
            exit(1);
        }
    };

    let (Some(side_a_path), Some(side_b_path)) = (
        matches.get_one::<String>("side_a_path"),
        matches.get_one::<String>("side_b_path"),
    ) else {
        eprintln!("Error: both ballot card images are required");
        exit(1);
    };

    match interpret_ballot_card(Path::new(side_a_path), Path::new(side_b_path), &options) {
        Ok(card) => match serde_json::to_string_pretty(&card) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing result: {}", e);
                exit(1);
            }
        },
        Err(e) => {
            eprintln!("Error: {}", e);
            if e.is_internal() {
                eprintln!("This is a bug in the interpreter, not a problem with the ballot.");
            }
            exit(1);
        }
    }
}

fn interpret_options(matches: &ArgMatches) -> Result<InterpretOptions, String> {
    let election_definition_path = matches
        .get_one::<String>("election")
        .ok_or("election path is required")?;
    let election_definition_json = std::fs::read_to_string(election_definition_path)
        .map_err(|e| format!("could not read election definition: {}", e))?;

    // parse contents of election_definition_path with serde_json
    let election: Election = serde_json::from_str(&election_definition_json)
        .map_err(|e| format!("could not parse election definition: {}", e))?;

    let oval_template = match matches.get_one::<String>("oval_template") {
        Some(path) => Some(
            load_oval_template(Path::new(path))
                .ok_or_else(|| format!("could not load oval template: {}", path))?,
        ),
        None => None,
    };

    let method = match matches.get_one::<String>("scoring") {
        Some(method) => method.parse::<OvalScoringMethod>()?,
        None => OvalScoringMethod::default(),
    };
    let maximum_search_distance = matches
        .get_one::<u32>("search_distance")
        .copied()
        .unwrap_or(DEFAULT_MAXIMUM_SEARCH_DISTANCE);

    let debug_font = match matches.get_one::<String>("debug_font") {
        Some(path) => Some(
            std::fs::read(path).map_err(|e| format!("could not read font {}: {}", path, e))?,
        ),
        None => None,
    };

    Ok(InterpretOptions {
        election,
        oval_template,
        oval_scoring: OvalScoringOptions {
            maximum_search_distance,
            method,
        },
        debug: matches.get_flag("debug"),
        debug_font,
    })
}

fn cli() -> Command {
    command!()
        .arg(arg!(-e --election <PATH> "Path to election.json file").required(true))
        .arg(arg!(-d --debug "Enable debug mode"))
        .arg(
            arg!(oval_template: --"oval-template" <PATH> "Path to a scanned blank oval")
                .required(false),
        )
        .arg(
            arg!(search_distance: --"search-distance" <PIXELS> "How far to search for each oval")
                .required(false)
                .value_parser(value_parser!(u32))
                .default_value("7"),
        )
        .arg(
            arg!(scoring: --scoring <METHOD> "How to score ovals")
                .required(false)
                .value_parser(["template-match", "shaded-ratio"])
                .default_value("template-match"),
        )
        .arg(
            arg!(debug_font: --"debug-font" <PATH> "TrueType font for debug image labels")
                .required(false),
        )
        .arg(arg!(side_a_path: <SIDE_A_IMAGE> "Path to image for side A").required(true))
        .arg(arg!(side_b_path: <SIDE_B_IMAGE> "Path to image for side B").required(true))
}
