//! emx-inlinecheck CLI
//!
//! Check scripts against their inline directives.
//!
//! Exit status: 0 when every file passes or is skipped, 1 when any file
//! fails, 2 when a test file itself is broken or the arguments are invalid.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use emx_inlinecheck::{Checker, Config, MatchMode, SubstitutionMap, Verdict};

const EXIT_FAILED: u8 = 1;
const EXIT_BROKEN: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "emx-inlinecheck")]
#[command(author = "nzinfo <li.monan@gmail.com>")]
#[command(version)]
#[command(about = "Run scripts and check them against inline CHECK/EXIT/SIGNAL directives")]
struct Cli {
    /// Script files to check
    #[arg(required_unless_present = "list_conditions")]
    files: Vec<PathBuf>,

    /// Extra substitution for RUN templates (KEY=VALUE, used as %KEY)
    #[arg(short = 's', long = "subst")]
    substitutions: Vec<String>,

    /// Environment variables for the checked scripts (KEY=VALUE)
    #[arg(short = 'e', long = "env")]
    env_vars: Vec<String>,

    /// Compare CHECK lines literally; disables {{regex}} segments
    #[arg(long)]
    exact: bool,

    /// Fail when output continues past the last matched CHECK line
    #[arg(long = "strict-output")]
    strict_output: bool,

    /// Compare output with its ANSI color codes intact
    #[arg(long = "keep-color")]
    keep_color: bool,

    /// Do not trim leading/trailing whitespace before comparing
    #[arg(long = "keep-whitespace")]
    keep_whitespace: bool,

    /// Seconds a script may run before it is killed
    #[arg(long, default_value_t = 60)]
    timeout: u64,

    /// Verbose output: show diffs and the execution log
    #[arg(short, long)]
    verbose: bool,

    /// List available REQUIRES conditions
    #[arg(long = "list-conditions")]
    list_conditions: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.list_conditions {
        print_conditions();
        return ExitCode::SUCCESS;
    }

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(EXIT_BROKEN)
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let config = build_config(cli)?;
    let extra_subs = cli
        .substitutions
        .iter()
        .map(|s| parse_pair(s).with_context(|| format!("invalid --subst {:?}", s)))
        .collect::<Result<Vec<_>>>()?;

    let checker = Checker::new(config);
    let (mut passed, mut failed, mut skipped, mut broken) = (0, 0, 0, 0);

    for file in &cli.files {
        let mut subs = SubstitutionMap::for_script(file);
        for (k, v) in &extra_subs {
            subs.insert(k.clone(), v.clone());
        }

        let name = file.display();
        let outcome = match checker.check(file, &subs) {
            Ok(outcome) => outcome,
            Err(e) => {
                broken += 1;
                println!("ERROR {}", e);
                continue;
            }
        };

        match outcome.verdict {
            Verdict::Pass => {
                passed += 1;
                println!("PASS  {}", name);
            }
            Verdict::Skip => {
                skipped += 1;
                println!("SKIP  {} - {}", name, outcome.skip_reason.as_deref().unwrap_or(""));
            }
            Verdict::Fail => {
                failed += 1;
                println!("FAIL  {}", name);
                if cli.verbose {
                    for line in outcome.render_detail().lines() {
                        println!("      {}", line);
                    }
                } else {
                    for line in outcome.render() {
                        println!("      {}", line);
                    }
                }
            }
        }

        if cli.verbose && !outcome.log.is_empty() {
            println!("      --- log ---");
            for line in outcome.log.lines() {
                println!("      {}", line);
            }
        }
    }

    println!();
    println!("{} passed, {} failed, {} skipped, {} broken", passed, failed, skipped, broken);

    Ok(if broken > 0 {
        ExitCode::from(EXIT_BROKEN)
    } else if failed > 0 {
        ExitCode::from(EXIT_FAILED)
    } else {
        ExitCode::SUCCESS
    })
}

fn build_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::default()
        .match_mode(if cli.exact { MatchMode::Exact } else { MatchMode::Wildcard })
        .extra_output_is_error(cli.strict_output)
        .strip_color(!cli.keep_color)
        .normalize_whitespace(!cli.keep_whitespace)
        .timeout(Duration::from_secs(cli.timeout))
        // Deterministic messages from the programs under test
        .env("LANG", "C")
        .env("LC_ALL", "C");

    for pair in &cli.env_vars {
        let (k, v) = parse_pair(pair).with_context(|| format!("invalid --env {:?}", pair))?;
        config = config.env(k, v);
    }
    Ok(config)
}

fn parse_pair(s: &str) -> Result<(String, String)> {
    let Some((key, value)) = s.split_once('=') else {
        bail!("expected KEY=VALUE");
    };
    if key.is_empty() {
        bail!("empty key");
    }
    Ok((key.to_string(), value.to_string()))
}

fn print_conditions() {
    println!("Built-in conditions:");
    println!();

    let checker = Checker::default();
    let mut conds: Vec<_> = checker.conditions.iter().collect();
    conds.sort_by_key(|(name, _)| (*name).clone());

    for (name, cond) in &conds {
        let shown = if cond.is_prefix() { format!("{}:...", name) } else { name.to_string() };
        println!("  {:<12} {}", shown, cond.summary());
    }

    println!();
    println!("  <program>    true if <program> is on the PATH");
    println!("  !<cond>      negates a condition");
}
