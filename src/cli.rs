use crate::config::Config;
use crate::error::ChatError;
use crate::providers::Backend;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ethics-chat")]
#[command(version)]
#[command(about = "Chat with a local Ollama model or a hosted OpenRouter model, three questions at a time")]
pub struct Args {
    /// Backend to start with: local (Ollama) or remote (OpenRouter)
    #[arg(long, value_enum, default_value = "remote")]
    pub backend: Backend,

    /// Port for the web UI server
    #[arg(long, default_value = "8888")]
    pub port: u16,

    /// Chat in the terminal instead of launching the web UI
    #[arg(long)]
    pub terminal: bool,

    /// Don't try to open a browser when the web UI starts
    #[arg(long)]
    pub no_open: bool,

    /// TOML file with connection settings
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Ollama chat endpoint (overrides config and OLLAMA_URL)
    #[arg(long)]
    pub local_url: Option<String>,

    /// Ollama model tag
    #[arg(long)]
    pub local_model: Option<String>,

    /// OpenRouter model id (overrides config and MODEL_ID)
    #[arg(long)]
    pub remote_model: Option<String>,
}

impl Args {
    /// Defaults, then the config file, then the environment, then flags.
    pub fn resolve_config(&self) -> Result<Config, ChatError> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env();
        self.apply_overrides(&mut config);
        Ok(config)
    }

    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(url) = &self.local_url {
            config.local_url = url.clone();
        }
        if let Some(model) = &self.local_model {
            config.local_model = model.clone();
        }
        if let Some(model) = &self.remote_model {
            config.remote_model = model.clone();
        }
    }
}
