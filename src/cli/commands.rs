use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use colored::*;
use rustyline::DefaultEditor;
use tracing::{info, warn};

use super::progress::{spinner, ProgressBarSink};
use super::{Cli, Commands};
use crate::catalog::{build_backends, AliasTable, QuantTag};
use crate::chat::display::{display_backend_failures, display_candidates_table, display_local_models};
use crate::chat::{chat_loop, ChatSession, GenerationClient, SessionOptions};
use crate::config::Settings;
use crate::download::{DownloadCoordinator, FetchOptions};
use crate::registry::{LocalModel, ModelStore};
use crate::resolver::{Constraints, Resolution, ResolvedArtifact, Resolver, ResolverSettings, ScoredCandidate};

/// Everything a command needs, built once from settings.
pub struct App {
    settings: Settings,
    resolver: Resolver,
    store: ModelStore,
    downloader: DownloadCoordinator,
    client: GenerationClient,
}

impl App {
    pub fn new(settings: Settings) -> Result<Self> {
        let aliases = AliasTable::with_configured(&settings.aliases);
        let backends = build_backends(&settings).context("failed to set up catalog backends")?;
        if backends.is_empty() {
            warn!("No catalog backends are enabled");
        }
        let resolver = Resolver::new(
            aliases,
            backends,
            ResolverSettings::from(&settings.resolver),
            settings.models.directory.clone(),
        );
        let store = ModelStore::open(settings.models.directory.clone())
            .context("failed to open the models directory")?;
        let downloader =
            DownloadCoordinator::new(&settings.download).context("failed to set up the downloader")?;
        let client = GenerationClient::new(&settings.api).context("failed to set up the generation client")?;

        Ok(App {
            settings,
            resolver,
            store,
            downloader,
            client,
        })
    }

    fn constraints(&self, quant: Option<&str>) -> Result<Constraints> {
        let preferred = match quant.or(self.settings.models.preferred_quantization.as_deref()) {
            Some(tag) => Some(QuantTag::parse(tag).ok_or_else(|| anyhow!("unrecognized quantization '{}'", tag))?),
            None => None,
        };
        Ok(Constraints {
            quantization: preferred,
            prefer_instruct: self.settings.models.prefer_instruct,
        })
    }

    async fn search(&self, query: &str, limit: usize, quant: Option<&str>) -> Result<()> {
        let constraints = self.constraints(quant)?;
        let pb = spinner(&format!("Searching for '{}'...", query));
        let outcome = self.resolver.search(query, &constraints).await;
        pb.finish_and_clear();

        let outcome = outcome?;
        display_backend_failures(&outcome.failures);
        let shown = &outcome.candidates[..outcome.candidates.len().min(limit.max(1))];
        display_candidates_table(shown);
        Ok(())
    }

    /// Resolves `query`, asking the user when the result is ambiguous.
    async fn resolve(&self, query: &str, quant: Option<&str>) -> Result<Option<ResolvedArtifact>> {
        let constraints = self.constraints(quant)?;
        let pb = spinner(&format!("Resolving '{}'...", query));
        let resolution = self.resolver.resolve(query, &constraints).await;
        pb.finish_and_clear();

        match resolution? {
            Resolution::Selected(artifact) => {
                println!(
                    "{} {}/{}",
                    "Selected".green().bold(),
                    artifact.repo_id,
                    artifact.filename.yellow()
                );
                Ok(Some(artifact))
            }
            Resolution::Ambiguous(candidates) => {
                println!("{}", format!("'{}' matches several models:", query).yellow());
                display_candidates_table(&candidates);
                match choose(&candidates)? {
                    Some(picked) => Ok(Some(self.resolver.artifact_for(&picked.candidate)?)),
                    None => Ok(None),
                }
            }
        }
    }

    async fn fetch(&self, artifact: &ResolvedArtifact, force: bool) -> Result<LocalModel> {
        let sink = ProgressBarSink::new(&artifact.filename);
        let result = self
            .downloader
            .fetch(artifact, FetchOptions { force_refresh: force }, &sink)
            .await;
        match result {
            Ok(model) => {
                sink.finish("done");
                println!(
                    "{} {} ({:.2} GB)",
                    "Saved".green().bold(),
                    model.path.display(),
                    model.size_gb()
                );
                Ok(model)
            }
            Err(e) => {
                sink.abandon();
                Err(e.into())
            }
        }
    }

    async fn download(&self, query: &str, quant: Option<&str>, force: bool, activate: bool) -> Result<()> {
        let Some(artifact) = self.resolve(query, quant).await? else {
            println!("Nothing selected.");
            return Ok(());
        };
        let model = self.fetch(&artifact, force).await?;
        if activate {
            let active = self.store.activate(&model)?;
            println!("{} {}", "Active model:".green().bold(), active.name);
        }
        Ok(())
    }

    async fn chat(&self, query: Option<&str>, quant: Option<&str>) -> Result<()> {
        let model = match query {
            Some(query) => {
                let Some(artifact) = self.resolve(query, quant).await? else {
                    println!("Nothing selected.");
                    return Ok(());
                };
                let model = self.fetch(&artifact, false).await?;
                self.store.activate(&model)?
            }
            None => self
                .store
                .active_model()?
                .ok_or_else(|| anyhow!("no active model; run `llmpal chat <query>` or `llmpal activate <name>`"))?,
        };

        match self.client.health().await {
            Ok(status) => info!("Generation endpoint {} reports '{}'", self.client.base_url(), status),
            Err(e) => println!("{} {}", "warning:".yellow().bold(), e),
        }

        let mut session = ChatSession::new(
            model.name.clone(),
            Arc::new(self.client.clone()),
            SessionOptions::from(&self.settings.api),
        );
        chat_loop(&mut session).await
    }

    fn list(&self) -> Result<()> {
        display_local_models(&self.store.list()?);
        Ok(())
    }

    fn activate(&self, name: &str) -> Result<()> {
        let model = self.find(name)?;
        let active = self.store.activate(&model)?;
        println!("{} {}", "Active model:".green().bold(), active.name);
        Ok(())
    }

    fn remove(&self, name: &str, yes: bool) -> Result<()> {
        let model = self.find(name)?;
        if !yes && !confirm(&format!("Delete {} ({:.2} GB)? [y/N] ", model.name, model.size_gb()))? {
            println!("Kept {}", model.name);
            return Ok(());
        }
        self.store.remove(&model)?;
        println!("{} {}", "Removed".green().bold(), model.name);
        Ok(())
    }

    async fn status(&self) -> Result<()> {
        println!("{}", "llmpal status".cyan().bold());
        match self.client.health().await {
            Ok(status) => println!("  Endpoint:  {} ({})", self.client.base_url(), status.green()),
            Err(e) => println!("  Endpoint:  {} ({})", self.client.base_url(), e.to_string().red()),
        }

        let models = self.store.list()?;
        println!("  Models:    {} in {}", models.len(), self.store.models_dir().display());
        match models.iter().find(|m| m.is_active) {
            Some(active) => println!("  Active:    {}", active.name.green()),
            None => println!("  Active:    {}", "none".yellow()),
        }

        let backends = self.resolver.backend_names();
        if backends.is_empty() {
            println!("  Backends:  {}", "none enabled".yellow());
        } else {
            println!("  Backends:  {}", backends.join(", "));
        }
        Ok(())
    }

    fn find(&self, name: &str) -> Result<LocalModel> {
        self.store
            .find(name)?
            .ok_or_else(|| anyhow!("no local model named '{}'; see `llmpal list`", name))
    }
}

/// Asks for a 1-based pick from `candidates`; `None` when the user declines.
fn choose(candidates: &[ScoredCandidate]) -> Result<Option<&ScoredCandidate>> {
    let mut rl = DefaultEditor::new()?;
    loop {
        let prompt = format!("Select a model [1-{}, q to cancel]: ", candidates.len());
        let line = match rl.readline(&prompt) {
            Ok(line) => line,
            Err(_) => return Ok(None),
        };
        let answer = line.trim();
        if answer.is_empty() || answer.eq_ignore_ascii_case("q") {
            return Ok(None);
        }
        match answer.parse::<usize>() {
            Ok(n) if (1..=candidates.len()).contains(&n) => return Ok(Some(&candidates[n - 1])),
            _ => println!("{}", "Please enter one of the listed numbers".yellow()),
        }
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    let mut rl = DefaultEditor::new()?;
    match rl.readline(prompt) {
        Ok(line) => Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes")),
        Err(_) => Ok(false),
    }
}

/// Dispatches a parsed command line.
pub async fn run(cli: Cli, settings: Settings) -> Result<()> {
    let app = App::new(settings)?;
    match cli.command {
        Commands::Search { query, limit, quant } => app.search(&query, limit, quant.as_deref()).await,
        Commands::Download {
            query,
            quant,
            force,
            activate,
        } => app.download(&query, quant.as_deref(), force, activate).await,
        Commands::Chat { query, quant } => app.chat(query.as_deref(), quant.as_deref()).await,
        Commands::List => app.list(),
        Commands::Activate { name } => app.activate(&name),
        Commands::Remove { name, yes } => app.remove(&name, yes),
        Commands::Status => app.status().await,
    }
}
