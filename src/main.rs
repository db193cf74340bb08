use clap::{Args, Parser, Subcommand};
use polyglot::{Comprehension, Config, RenderOptions, RequestedMode, StrategyRequest};
use std::fs;
use std::path::PathBuf;
use std::process;

#[derive(Parser, Debug)]
#[command(name = "polyglot", version)]
#[command(about = "Compile comprehension and reduction expressions to other languages")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render source for a target language
    Render(RenderArgs),
    /// Print the IR as JSON
    Ir(InputArgs),
    /// Print the strategy decision for the Julia back-end
    Explain(ExplainArgs),
    /// List registered targets
    Targets,
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Comprehension or reduction source text
    #[arg(short, long, conflicts_with = "ir")]
    code: Option<String>,

    /// IR JSON file to load instead of parsing source
    #[arg(long, value_name = "FILE")]
    ir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RenderArgs {
    #[command(flatten)]
    input: InputArgs,

    #[arg(short, long)]
    target: Option<String>,

    #[arg(long)]
    parallel: bool,

    /// auto, loops or broadcast
    #[arg(long)]
    mode: Option<String>,

    /// Omit strategy notes from the output
    #[arg(long)]
    no_explain: bool,

    /// Skip the cross-iteration dependency check
    #[arg(long = "unsafe")]
    unsafe_: bool,

    #[arg(long)]
    dialect: Option<String>,

    #[arg(long)]
    int_type: Option<String>,

    #[arg(long)]
    func_name: Option<String>,

    /// Config file; defaults to ./polyglot.toml when present
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ExplainArgs {
    #[command(flatten)]
    input: InputArgs,

    #[arg(long)]
    parallel: bool,

    #[arg(long, default_value = "auto")]
    mode: String,

    /// Element type checked against the associativity table
    #[arg(long, default_value = "Int")]
    elem_type: String,

    /// Element count used instead of the range estimate
    #[arg(long)]
    elem_count: Option<u64>,

    #[arg(long = "unsafe")]
    unsafe_: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Render(args) => cmd_render(args),
        Command::Ir(input) => cmd_ir(input),
        Command::Explain(args) => cmd_explain(args),
        Command::Targets => {
            for target in polyglot::targets() {
                println!("{}", target);
            }
        }
    }
}

fn cmd_render(args: RenderArgs) {
    let config = match &args.config {
        Some(path) => Config::load(path),
        None => Config::discover(&PathBuf::from(".")),
    }
    .unwrap_or_else(|e| fail(e));

    let target = args
        .target
        .clone()
        .or_else(|| config.target().map(String::from))
        .unwrap_or_else(|| "rust".to_string());

    let mut flags = RenderOptions::new();
    if args.parallel {
        flags.insert("parallel", true);
    }
    if args.no_explain {
        flags.insert("explain", false);
    }
    if args.unsafe_ {
        flags.insert("unsafe", true);
    }
    for (name, value) in [
        ("mode", &args.mode),
        ("dialect", &args.dialect),
        ("int_type", &args.int_type),
        ("func_name", &args.func_name),
    ] {
        if let Some(v) = value {
            flags.insert(name, v.as_str());
        }
    }
    let opts = config.to_options().merged(&flags);

    let ir = load_input(&args.input);
    match polyglot::render(&target, &ir, &opts) {
        Ok(text) => print!("{}", text),
        Err(e) => fail(e),
    }
}

fn cmd_ir(input: InputArgs) {
    let ir = load_input(&input);
    match polyglot::ir_to_json(&ir) {
        Ok(json) => println!("{}", json),
        Err(e) => fail(e),
    }
}

fn cmd_explain(args: ExplainArgs) {
    let ir = load_input(&args.input);
    let mode: RequestedMode = args.mode.parse().unwrap_or_else(|e: String| fail(e));
    let request = StrategyRequest {
        mode,
        elem_count_hint: args.elem_count,
        elem_type: args.elem_type,
        parallel_requested: args.parallel,
        unsafe_: args.unsafe_,
        ..StrategyRequest::for_ir(&ir)
    };
    let decision = polyglot::explain(&ir, &request);
    println!("mode: {}", decision.mode);
    println!("parallel: {}", decision.flavor);
    let notes = decision.explanation();
    if !notes.is_empty() {
        println!("{}", notes);
    }
}

fn load_input(input: &InputArgs) -> Comprehension {
    let loaded = match (&input.code, &input.ir) {
        (Some(code), _) => polyglot::parse(code),
        (None, Some(path)) => {
            let json = fs::read_to_string(path).unwrap_or_else(|e| {
                fail(format!("cannot read '{}': {}", path.display(), e))
            });
            polyglot::ir_from_json(&json)
        }
        (None, None) => fail("one of --code or --ir is required"),
    };
    loaded.unwrap_or_else(|e| fail(e))
}

fn fail(err: impl std::fmt::Display) -> ! {
    eprintln!("error: {}", err);
    process::exit(1);
}
