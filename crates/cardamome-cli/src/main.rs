//! `cardamome` renders one template to stdout or to a file.

mod logging;

use camino::{Utf8Path, Utf8PathBuf};
use cardamome::{Context, FileLoader, Loader, LoaderOptions, Mode, Value};
use eyre::{Result, eyre};
use facet::Facet;
use facet_args as args;
use owo_colors::OwoColorize;
use std::sync::Arc;

/// Command-line arguments
#[derive(Facet, Debug)]
struct Args {
    /// Template file to render
    #[facet(args::positional)]
    template: String,

    /// Output file (stdout if not specified)
    #[facet(args::positional, default)]
    output: Option<String>,

    /// Rendering mode for markup templates: xml, html or html5
    #[facet(args::named, args::short = 'm', default)]
    mode: Option<String>,

    /// Additional template search directory
    #[facet(args::named, args::short = 'i', default)]
    path: Vec<String>,

    /// Context variable as KEY=VALUE
    #[facet(args::named, args::short = 'v', default)]
    var: Vec<String>,

    /// JSON file holding an object of context variables
    #[facet(args::named, default)]
    json: Vec<String>,

    /// TOML file of context variables
    #[facet(args::named, default)]
    toml: Vec<String>,

    /// Escape expressions in text templates
    #[facet(args::named)]
    autoescape: bool,
}

fn print_usage() {
    eprintln!("{} cardamome <template> [output] [options]", "USAGE:".yellow());
    eprintln!("\n{}", "OPTIONS:".yellow());
    eprintln!("    -m, --mode       Force the markup mode (xml, html, html5)");
    eprintln!("    -i, --path       Additional template directory (repeatable)");
    eprintln!("    -v, --var        Context variable KEY=VALUE (repeatable)");
    eprintln!("    --json           JSON file of context variables (repeatable)");
    eprintln!("    --toml           TOML file of context variables (repeatable)");
    eprintln!("    --autoescape     Escape expressions in text templates");
    eprintln!("\n{}", "ENVIRONMENT:".yellow());
    eprintln!("    {}         Log filter (default: info)", "RUST_LOG".green());
}

fn parse_args() -> Result<Args> {
    let raw: Vec<String> = std::env::args().skip(1).collect();
    if raw.is_empty() {
        print_usage();
        return Err(eyre!("No template specified"));
    }
    if raw.iter().any(|arg| arg == "-h" || arg == "--help") {
        print_usage();
        std::process::exit(0);
    }

    let raw: Vec<&str> = raw.iter().map(String::as_str).collect();
    facet_args::from_slice(&raw).map_err(|e| {
        eprintln!("{:?}", miette::Report::from_err(e));
        eyre!("Failed to parse arguments")
    })
}

/// Print a template diagnostic with miette and turn it into an eyre error.
fn report(err: miette::Report, what: &str) -> eyre::Report {
    eprintln!("{err:?}");
    eyre!("Failed to {what}")
}

/// Split `dir/page.html` into the search directory and the template name.
fn split_template_path(path: &Utf8Path) -> Result<(Utf8PathBuf, String)> {
    let name = path
        .file_name()
        .ok_or_else(|| eyre!("Not a template file: {}", path))?;
    let dir = path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    Ok((dir.to_owned(), name.to_string()))
}

fn parse_var(var: &str) -> Result<(&str, &str)> {
    let (key, value) = var
        .split_once('=')
        .ok_or_else(|| eyre!("Expected KEY=VALUE, found `{}`", var))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(eyre!("Empty variable name in `{}`", var));
    }
    Ok((key, value))
}

/// Read a data file and parse it into a value.
fn load_data(file: &str, format: &str, parse: impl Fn(&str) -> Result<Value, String>) -> Result<Value> {
    let text = std::fs::read_to_string(file).map_err(|e| eyre!("Failed to read {}: {}", file, e))?;
    parse(&text).map_err(|e| eyre!("{} parse error in {}: {}", format, file, e))
}

fn parse_json(text: &str) -> Result<Value, String> {
    facet_json::from_str(text).map_err(|e| e.to_string())
}

fn parse_toml(text: &str) -> Result<Value, String> {
    facet_toml::from_str(text).map_err(|e| e.to_string())
}

/// JSON files, then TOML files, then `-v` variables; later ones win.
fn build_context(args: &Args) -> Result<Context> {
    let mut context = Context::new();
    let files = args
        .json
        .iter()
        .map(|file| load_data(file, "JSON", parse_json))
        .chain(args.toml.iter().map(|file| load_data(file, "TOML", parse_toml)));
    for value in files {
        context
            .extend_from_value(&value?)
            .map_err(|e| report(e, "load context data"))?;
    }
    for var in &args.var {
        let (key, value) = parse_var(var)?;
        context.set(key, value);
    }
    Ok(context)
}

fn run(args: Args) -> Result<()> {
    let (dir, name) = split_template_path(Utf8Path::new(&args.template))?;
    let mut paths = vec![dir];
    paths.extend(args.path.iter().map(Utf8PathBuf::from));

    let force_mode = args
        .mode
        .as_deref()
        .map(str::parse::<Mode>)
        .transpose()
        .map_err(|e| eyre!(e))?;

    let loader = Arc::new(FileLoader::new(LoaderOptions {
        paths,
        force_mode,
        autoescape_text: args.autoescape,
        ..LoaderOptions::default()
    }));
    let context = build_context(&args)?;
    tracing::debug!(template = %name, variables = ?context.variable_names(), "rendering");

    let template = loader.load(&name).map_err(|e| report(e, "load template"))?;
    let output = template
        .render(context, loader.clone())
        .map_err(|e| report(e, "render template"))?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, &output).map_err(|e| eyre!("Failed to write {}: {}", path, e))?;
            eprintln!("{} {}", "Wrote".green(), path);
        }
        None => print!("{output}"),
    }
    Ok(())
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok();
    logging::init_tracing();

    let args = parse_args()?;
    run(args)
}
