use std::io::Write;

use clap::Parser;
use localgen_decoder::config::{load_config, ApiMode, AppConfig};
use localgen_decoder::observability::init_tracing;
use localgen_decoder::stream::{DecodeEvent, Outcome};
use localgen_decoder::transport::{GenerationRequest, HttpTransport};

#[derive(Parser, Debug)]
#[command(name = "localgen")]
#[command(about = "Stream one prompt through a local model server")]
struct CliArgs {
    /// Path to the YAML config file
    #[arg(long, env = "LOCALGEN_CONFIG", default_value = "config.yaml")]
    config: String,

    /// Use the chat endpoint instead of generate
    #[arg(long)]
    chat: bool,

    /// System prompt sent with the request
    #[arg(long)]
    system: Option<String>,

    /// Prompt text; multiple words are joined with spaces
    #[arg(required = true, trailing_var_arg = true)]
    prompt: Vec<String>,
}

fn main() {
    let args = CliArgs::parse();

    let mut config: AppConfig = load_config(&args.config).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        eprintln!("Please copy 'config.example.yaml' to 'config.yaml' and modify as needed.");
        std::process::exit(1);
    });
    if args.chat {
        config.server.api = ApiMode::Chat;
    }

    init_tracing(&config.features.log_level);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    let code = runtime.block_on(run(config, args));
    std::process::exit(code);
}

async fn run(config: AppConfig, args: CliArgs) -> i32 {
    let transport = match HttpTransport::new(&config) {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("{}", e.user_message());
            return 1;
        }
    };

    let mut request = GenerationRequest::new(args.prompt.join(" "));
    if let Some(system) = args.system {
        request = request.with_system(system);
    }

    tracing::info!(
        url = %transport.server().endpoint_url(),
        model = %transport.server().model,
        api = %transport.server().api,
        "sending prompt"
    );
    let (decoder, mut fragments) = transport.start(request);

    let interrupt = decoder.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, cancelling");
            interrupt.cancel();
        }
    });

    let mut stdout = std::io::stdout();
    while let Some(event) = fragments.next_event().await {
        match event {
            DecodeEvent::Fragment(text) => {
                let _ = stdout.write_all(text.as_bytes());
                let _ = stdout.flush();
            }
            DecodeEvent::Terminal(outcome) => {
                let _ = writeln!(stdout);
                return report(&outcome);
            }
        }
    }
    1
}

fn report(outcome: &Outcome) -> i32 {
    match outcome {
        Outcome::Finished { reason, .. } => {
            eprintln!("[finished: {reason}]");
            0
        }
        Outcome::Failed(error) => {
            eprintln!("{}", error.user_message());
            1
        }
        Outcome::Cancelled => {
            eprintln!("[cancelled]");
            130
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<CliArgs, clap::Error> {
        CliArgs::try_parse_from(std::iter::once("localgen").chain(list.iter().copied()))
    }

    #[test]
    fn joins_prompt_words() {
        let parsed = args(&["--chat", "why", "is", "the", "sky", "blue"]).unwrap();
        assert!(parsed.chat);
        assert_eq!(parsed.prompt.join(" "), "why is the sky blue");
        assert_eq!(parsed.config, "config.yaml");
    }

    #[test]
    fn reads_option_values() {
        let parsed = args(&["--config", "alt.yaml", "--system", "be terse", "hi"]).unwrap();
        assert_eq!(parsed.config, "alt.yaml");
        assert_eq!(parsed.system.as_deref(), Some("be terse"));
        assert!(!parsed.chat);
    }

    #[test]
    fn rejects_missing_prompt_and_unknown_flags() {
        assert!(args(&[]).is_err());
        assert!(args(&["--config"]).is_err());
        assert!(args(&["--verbose", "hi"]).is_err());
        assert_eq!(args(&["--", "--chat"]).unwrap().prompt, vec!["--chat"]);
    }
}
