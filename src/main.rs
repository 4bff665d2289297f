//! toolgate CLI: list installed tools, call one directly, or run an
//! interactive tool-calling chat.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;

use toolgate::chat::{AnthropicProvider, ChatEvent, ChatSession, OllamaProvider, OpenAiProvider};
use toolgate::{ChatConfig, ClientConfig, Invoker, Provider, ToolDispatch};

#[derive(Parser)]
#[command(name = "toolgate", version, about = "WASM tool registry client and chat loop")]
struct Cli {
    /// Registry base URL.
    #[arg(long, env = "TOOLGATE_BASE_URL")]
    base_url: Option<String>,

    /// Directory refresh interval in seconds. 0 disables auto-refresh.
    #[arg(long, default_value = "60")]
    tool_refresh: u64,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the tools installed in the registry profile.
    List,
    /// Call one tool with JSON input and print the result.
    Tool {
        /// Tool name.
        name: String,
        /// JSON arguments for the tool.
        #[arg(long, default_value = "{}")]
        input: String,
    },
    /// Interactive chat with tool calling.
    Chat {
        /// Which provider to talk to.
        #[arg(long, value_enum, default_value_t = ProviderKind::Openai)]
        provider: ProviderKind,
        /// Model name.
        #[arg(long)]
        model: String,
        /// Provider endpoint override.
        #[arg(long)]
        provider_url: Option<String>,
        /// System prompt override.
        #[arg(long)]
        system: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ProviderKind {
    Openai,
    Anthropic,
    Ollama,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "toolgate=debug" } else { "toolgate=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let mut config = ClientConfig::default();
    if let Some(base_url) = cli.base_url {
        config = config.with_base_url(base_url);
    }
    config = config.with_tool_refresh(match cli.tool_refresh {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    });

    let invoker = Arc::new(Invoker::connect(&config)?);

    match cli.command {
        Command::List => {
            let mut tools: Vec<_> = invoker.list_tools().await?.into_values().collect();
            tools.sort_by(|a, b| a.name.cmp(&b.name));
            for tool in tools {
                println!("{}\n    {}", tool.name, tool.description.replace('\n', " "));
            }
        }
        Command::Tool { name, input } => {
            let arguments: serde_json::Value = serde_json::from_str(&input)?;
            let response = invoker.call_tool(&name, arguments).await?;
            println!("{}", response.flatten());
        }
        Command::Chat {
            provider,
            model,
            provider_url,
            system,
        } => {
            let provider = build_provider(provider)?;
            let mut chat_config = ChatConfig::new(model);
            if let Some(url) = provider_url {
                chat_config = chat_config.with_base_url(url);
            }
            if let Some(system) = system {
                chat_config = chat_config.with_system(system);
            }

            run_chat(ChatSession::new(provider, invoker, chat_config)).await?;
        }
    }

    Ok(())
}

fn build_provider(kind: ProviderKind) -> anyhow::Result<Arc<dyn Provider>> {
    Ok(match kind {
        ProviderKind::Openai => {
            let key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY is not set"))?;
            Arc::new(OpenAiProvider::new(SecretString::from(key)))
        }
        ProviderKind::Anthropic => {
            let key = std::env::var("ANTHROPIC_API_KEY")
                .map_err(|_| anyhow::anyhow!("ANTHROPIC_API_KEY is not set"))?;
            Arc::new(AnthropicProvider::new(SecretString::from(key)))
        }
        ProviderKind::Ollama => Arc::new(OllamaProvider::new()),
    })
}

async fn run_chat(mut session: ChatSession) -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" || line == "/exit" {
            break;
        }
        if line == "/clear" {
            session.clear_history();
            println!("(history cleared)");
            continue;
        }

        match session.send_message(line).await {
            Ok(events) => {
                for event in events {
                    match event {
                        ChatEvent::Text(text) => println!("{}", text),
                        ChatEvent::ToolCall { name, arguments } => {
                            println!("[calling {} with {}]", name, arguments)
                        }
                        ChatEvent::ToolResult { name, content } => {
                            println!("[{} returned]\n{}", name, content)
                        }
                        ChatEvent::ToolError { message, .. } => println!("[{}]", message),
                    }
                }
            }
            Err(e) => eprintln!("error: {}", e),
        }
    }

    Ok(())
}
