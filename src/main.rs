use std::io::{self, Read, Write};

use lsysgen::analysis::growth_profile;
use lsysgen::{EngineConfig, Grammar, LSystem};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_GENERATIONS: usize = 10;
const DEFAULT_LOG_FILTER: &str = "lsysgen=warn";

struct Args {
    generations: usize,
    once: bool,
    presample: bool,
    seed: Option<u64>,
    lanes: Option<usize>,
    threshold: Option<usize>,
    prime: Option<usize>,
    count: bool,
    stats: bool,
    rules: bool,
    help: bool,
    version: bool,
    path: Option<String>,
}

fn value<T: std::str::FromStr>(argv: &[String], i: &mut usize, flag: &str) -> T {
    *i += 1;
    let Some(raw) = argv.get(*i) else {
        eprintln!("Error: {} requires a value", flag);
        std::process::exit(1);
    };
    raw.parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid value for {}: {}", flag, raw);
        std::process::exit(1);
    })
}

fn parse_args() -> Args {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let mut args = Args {
        generations: DEFAULT_GENERATIONS,
        once: false,
        presample: false,
        seed: None,
        lanes: None,
        threshold: None,
        prime: None,
        count: false,
        stats: false,
        rules: false,
        help: false,
        version: false,
        path: None,
    };

    let mut i = 0;
    while i < argv.len() {
        match argv[i].as_str() {
            "-V" | "--version" => args.version = true,
            "-h" | "--help" => args.help = true,
            "--once" => args.once = true,
            "--presample" => args.presample = true,
            "-c" | "--count" => args.count = true,
            "--stats" => args.stats = true,
            "--rules" => args.rules = true,
            "-n" | "--generations" => args.generations = value(&argv, &mut i, "--generations"),
            "--seed" => args.seed = Some(value(&argv, &mut i, "--seed")),
            "--lanes" => args.lanes = Some(value(&argv, &mut i, "--lanes")),
            "--threshold" => args.threshold = Some(value(&argv, &mut i, "--threshold")),
            "--prime" => args.prime = Some(value(&argv, &mut i, "--prime")),
            s if s.starts_with('-') => {
                eprintln!("Error: unknown option: {}", s);
                std::process::exit(1);
            }
            s => {
                if args.path.is_some() {
                    eprintln!("Error: only one grammar file may be given");
                    std::process::exit(1);
                }
                args.path = Some(s.to_string());
            }
        }
        i += 1;
    }
    args
}

fn print_help() {
    println!(
        "Usage: lsysgen [options] [grammar.json]\n\
         \n\
         Grow a stochastic L-system and print the resulting sequence.\n\
         \n\
         Options:\n\
         \x20 -n, --generations <n>  Generations to run (default: {})\n\
         \x20 --once                 Print every generation, one per line\n\
         \x20 --presample            Pre-sample rule outcomes\n\
         \x20 --seed <n>             Fixed random seed\n\
         \x20 --lanes <n>            Parallel lanes (default: 4)\n\
         \x20 --threshold <n>        Generations from which lanes run in parallel (default: 15)\n\
         \x20 --prime <n>            Sequential generations before distributing (default: 10)\n\
         \x20 -c, --count            Print only the sequence length\n\
         \x20 --stats                Print growth-rate statistics\n\
         \x20 --rules                Print the compiled rules\n\
         \x20 -V, --version          Show version\n\
         \x20 -h, --help             Show this help\n\
         \n\
         When no grammar file is given, reads it from stdin.\n\
         Grammar format: {{\"axiom\": \"A\", \"rules\": {{\"A\": \"0.5 A B; 0.5 A\"}}}}\n\
         Set RUST_LOG to change log verbosity (default: {}).",
        DEFAULT_GENERATIONS, DEFAULT_LOG_FILTER
    );
}

fn config_from(args: &Args) -> EngineConfig {
    let mut config = EngineConfig::default().with_presample(args.presample);
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    if let Some(lanes) = args.lanes {
        config = config.with_lanes(lanes);
    }
    if let Some(threshold) = args.threshold {
        config = config.with_parallel_threshold(threshold);
    }
    if let Some(prime) = args.prime {
        config = config.with_prime_generations(prime);
    }
    config
}

fn load_grammar(path: Option<&str>) -> Grammar {
    let loaded = match path {
        Some(p) => Grammar::from_path(p),
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf).unwrap_or_else(|e| {
                eprintln!("Error reading stdin: {}", e);
                std::process::exit(1);
            });
            Grammar::from_json(&buf)
        }
    };
    loaded.unwrap_or_else(|e| {
        eprintln!("Error: {}: {}", path.unwrap_or("stdin"), e);
        std::process::exit(1);
    })
}

fn print_generations(engine: &mut LSystem, generations: usize, count: bool) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    engine.reset();
    let axiom = engine.pool().read_all();
    if count {
        writeln!(out, "{}", axiom.len())?;
    } else {
        writeln!(out, "{}", engine.render(&axiom))?;
    }
    for _ in 0..generations {
        let ids = engine.iterate_once().to_vec();
        if count {
            writeln!(out, "{}", ids.len())?;
        } else {
            writeln!(out, "{}", engine.render(&ids))?;
        }
    }
    out.flush()
}

fn run(args: &Args, engine: &mut LSystem) -> io::Result<()> {
    if args.rules {
        print!("{}", engine);
        return Ok(());
    }
    if args.stats {
        let profile = growth_profile(engine, args.generations);
        println!("{:>10} length", "gen");
        for (generation, length) in profile.lengths.iter().enumerate() {
            println!("{:>10} {}", generation, length);
        }
        println!("mean growth {:.4}", profile.mean_growth());
        return Ok(());
    }
    if args.once {
        return print_generations(engine, args.generations, args.count);
    }

    let ids = engine.iterate_until(args.generations);
    if args.count {
        println!("{}", ids.len());
    } else {
        let stdout = io::stdout();
        let mut out = io::BufWriter::new(stdout.lock());
        writeln!(out, "{}", engine.render(&ids))?;
        out.flush()?;
    }
    Ok(())
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .init();

    let args = parse_args();

    if args.version {
        println!("lsysgen {}", VERSION);
        return;
    }
    if args.help {
        print_help();
        return;
    }

    let grammar = load_grammar(args.path.as_deref());
    let mut engine = grammar.build(config_from(&args)).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });
    tracing::info!(
        axiom = %engine.axiom(),
        generations = args.generations,
        seed = engine.seed(),
        "starting"
    );

    if let Err(e) = run(&args, &mut engine) {
        if e.kind() != io::ErrorKind::BrokenPipe {
            eprintln!("Error writing output: {}", e);
            std::process::exit(1);
        }
    }
}
