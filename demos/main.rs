//! Small CLI that drives the library end-to-end against its built-in demo
//! instrumentor: init, run a handful of wrapped calls inside a guarded
//! trace, print a diagnostic report, shut down. Grounded on the teacher's
//! `main.rs` shape (clap for args, anyhow at the outer boundary,
//! tracing_subscriber::fmt for logs) with the GitHub-specific plumbing
//! replaced by calls into `agentops` itself.

use anyhow::Result;
use clap::{Arg, ArgAction, Command};

use agentops::instrumentors::demo::DemoInstrumentor;
use agentops::{InitOptions, SpanStatus};

const VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));

#[tokio::main]
async fn main() -> Result<()> {
    agentops::config::init_logging();

    let matches = Command::new("agentops-demo")
        .version(VERSION)
        .propagate_version(true)
        .author("Andrew Cowie")
        .about("Exercise the agentops SDK's built-in demo instrumentor end-to-end.")
        .disable_help_subcommand(true)
        .disable_help_flag(true)
        .disable_version_flag(true)
        .arg(
            Arg::new("help")
                .long("help")
                .long_help("Print help")
                .global(true)
                .hide(true)
                .action(ArgAction::Help),
        )
        .arg(
            Arg::new("version")
                .long("version")
                .long_help("Print version")
                .global(true)
                .hide(true)
                .action(ArgAction::Version),
        )
        .arg(
            Arg::new("prompt")
                .action(ArgAction::Set)
                .required(true)
                .help("Prompt to send to the demo client"),
        )
        .arg(
            Arg::new("stream")
                .long("stream")
                .long_help("Use the streaming call instead of the single-shot one")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let prompt = matches.get_one::<String>("prompt").unwrap().to_string();
    let stream = *matches.get_one::<bool>("stream").unwrap_or(&false);

    let session = agentops::init(InitOptions {
        service_name: Some("agentops-demo".to_string()),
        auto_start_session: Some(false),
        ..Default::default()
    });

    let instrumentor = DemoInstrumentor::new();
    instrumentor.complete_wrap.enable();
    let client = agentops::instrumentors::demo::DemoClient::new("demo-model-1");

    let guard = session.start_trace_guarded("demo-run", Default::default());

    if stream {
        for chunk in instrumentor.stream_complete(session.handle(), &client, &prompt) {
            match chunk {
                Ok(piece) => print!("{piece}"),
                Err(err) => eprintln!("demo client stream error: {err}"),
            }
        }
        println!();
    } else {
        match instrumentor.complete(session.provider(), &client, &prompt) {
            Ok(response) => println!("{response}"),
            Err(err) => eprintln!("demo client error: {err}"),
        }
    }

    guard.end(SpanStatus::Ok);

    let report = session.diagnose();
    print!("{report}");

    agentops::shutdown(session.config().shutdown_timeout).await;

    Ok(())
}
