use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use log::LevelFilter;
use publisher_attention::{is_publisher_id, Config, Resolution};
use std::process;

fn main() {
    let matches = Command::new("publisher-attention")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Attribute page visits to publishers and keep decaying attention scores")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("rules")
                .long("rules")
                .value_name("FILE")
                .help("Publisher rule table (YAML, or JSON with a .json extension)"),
        )
        .arg(
            Arg::new("state")
                .long("state")
                .value_name("FILE")
                .help("Synopsis state file"),
        )
        .arg(
            Arg::new("test-rules")
                .long("test-rules")
                .help("Validate the rule table and list its rules")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("resolve")
                .long("resolve")
                .value_name("URL")
                .help("Print the publisher a URL is attributed to"),
        )
        .arg(
            Arg::new("check-id")
                .long("check-id")
                .value_name("ID")
                .help("Check whether a string is a valid publisher id"),
        )
        .arg(
            Arg::new("visit")
                .long("visit")
                .value_name("URL")
                .requires("duration")
                .help("Record a visit in the state file"),
        )
        .arg(
            Arg::new("duration")
                .long("duration")
                .value_name("MS")
                .value_parser(clap::value_parser!(u64))
                .help("Visit duration in milliseconds"),
        )
        .arg(
            Arg::new("markup")
                .long("markup")
                .value_name("FILE")
                .help("Rendered page markup for rules that inspect the page"),
        )
        .arg(
            Arg::new("top")
                .long("top")
                .value_name("N")
                .value_parser(clap::value_parser!(usize))
                .help("Print the top N publishers with normalized weights (0 for all)"),
        )
        .arg(
            Arg::new("all")
                .long("all")
                .value_name("N")
                .value_parser(clap::value_parser!(usize))
                .help("Print every publisher in any scorekeeper's top N"),
        )
        .arg(
            Arg::new("winner")
                .long("winner")
                .value_name("N")
                .value_parser(clap::value_parser!(usize))
                .help("Draw a weighted winner from the top N publishers"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Err(e) = run(&matches) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn run(matches: &ArgMatches) -> anyhow::Result<()> {
    if let Some(path) = matches.get_one::<String>("generate-config") {
        Config::default().to_file(path)?;
        println!("Default configuration written to {path}");
        return Ok(());
    }

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Error loading configuration {path}"))?,
        None => Config::default(),
    };
    if let Some(rules) = matches.get_one::<String>("rules") {
        config.rules_file = Some(rules.clone());
    }
    if let Some(state) = matches.get_one::<String>("state") {
        config.state_file = state.clone();
    }

    let markup = matches
        .get_one::<String>("markup")
        .map(|path| {
            std::fs::read(path)
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .with_context(|| format!("Failed to read markup {path}"))
        })
        .transpose()?;

    if matches.get_flag("test-rules") {
        let resolver = config.resolver()?;
        println!("Number of rules: {}", resolver.rules().len());
        for (i, rule) in resolver.rules().rules().iter().enumerate() {
            println!(
                "  Rule {}: {}",
                i + 1,
                rule.description.as_deref().unwrap_or("(no description)")
            );
        }
        println!("Rule table is valid.");
        return Ok(());
    }

    if let Some(id) = matches.get_one::<String>("check-id") {
        println!("{id}: {}", if is_publisher_id(id) { "valid" } else { "invalid" });
        return Ok(());
    }

    if let Some(location) = matches.get_one::<String>("resolve") {
        match config.resolver()?.resolve(location, markup.as_deref())? {
            Resolution::Publisher(m) => {
                println!("{}", m.publisher);
                if let Some(favicon) = m.favicon_url {
                    println!("favicon: {favicon}");
                }
            }
            Resolution::Excluded { rule_index } => {
                println!("(none: excluded by rule {})", rule_index + 1)
            }
            Resolution::NotApplicable => println!("(none)"),
        }
        return Ok(());
    }

    let mut synopsis = config.load_synopsis()?;

    if let Some(location) = matches.get_one::<String>("visit") {
        let duration = matches
            .get_one::<u64>("duration")
            .copied()
            .context("--visit requires --duration")?;
        match synopsis.add_visit(location, duration, markup.as_deref()) {
            Some(publisher) => println!("{publisher}"),
            None => println!("(none)"),
        }
        config.save_synopsis(&mut synopsis)?;
        return Ok(());
    }

    if let Some(n) = matches.get_one::<usize>("top") {
        let top = synopsis.top_n(*n).unwrap_or_default();
        println!("{}", serde_json::to_string_pretty(&top)?);
        return Ok(());
    }

    if let Some(n) = matches.get_one::<usize>("all") {
        println!("{}", serde_json::to_string_pretty(&synopsis.all_n(*n))?);
        return Ok(());
    }

    if let Some(n) = matches.get_one::<usize>("winner") {
        match synopsis.winner(*n) {
            Some(publisher) => println!("{publisher}"),
            None => println!("(none)"),
        }
        return Ok(());
    }

    println!("Nothing to do; see --help");
    Ok(())
}
