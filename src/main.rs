use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lexsim::config::{load_config_from_file, SimulationConfig};
use lexsim::initial::{root_from_wordlist, synthesize_root, WeightDistribution};
use lexsim::io::gml::load_gml;
use lexsim::io::newick::load_tree;
use lexsim::io::wordlist::{read_records, reopen_for_resume, WordlistWriter};
use lexsim::simulation::driver::simulate_into;
use lexsim::{ConceptWeight, Coordinator, GeneratedLanguages, Language, Phylogeny, SemanticNetwork};

/// Simulate lexical change along a phylogeny and write the resulting
/// languages as a wordlist.
#[derive(Parser, Debug)]
#[command(name = "lexsim", version, about)]
struct Cli {
    /// TOML file with run parameters; flags override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Semantic network in GML format.
    #[arg(long)]
    semantic_network: PathBuf,

    /// GML edge attribute holding the edge weight.
    #[arg(long)]
    weight_attribute: Option<String>,

    #[arg(long)]
    neighbor_factor: Option<f64>,

    #[arg(long, value_enum)]
    concept_weight: Option<ConceptWeight>,

    #[arg(long)]
    seed: Option<u64>,

    /// Newick tree, inline or as a file path. Without one, a single long
    /// branch is simulated.
    #[arg(long)]
    tree: Option<String>,

    /// Length of the long branch as a power of two.
    #[arg(long)]
    branchlength: Option<u32>,

    /// Wordlist holding the root language.
    #[arg(long)]
    wordlist: Option<PathBuf>,

    /// Language of the wordlist to start from; defaults to the last one.
    #[arg(long, requires = "wordlist")]
    language: Option<String>,

    /// Distribution of initial weights, e.g. `100` or `poisson(10)`.
    #[arg(long)]
    weight: Option<String>,

    #[arg(long)]
    workers: Option<usize>,

    /// Give up when a node waits longer than this for its ancestor.
    #[arg(long)]
    ancestor_timeout_secs: Option<u64>,

    /// Continue a run whose output file is incomplete.
    #[arg(long, requires = "output")]
    resume: bool,

    /// Output wordlist; standard output if omitted.
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Record the run parameters as comments at the top of the output.
    #[arg(long)]
    embed_parameters: bool,
}

impl Cli {
    fn load_config(&self) -> Result<SimulationConfig> {
        let mut config = match &self.config {
            Some(path) => load_config_from_file(path)?,
            None => SimulationConfig::default(),
        };
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(factor) = self.neighbor_factor {
            config.neighbor_factor = factor;
        }
        if let Some(attribute) = &self.weight_attribute {
            config.weight_attribute = attribute.clone();
        }
        if let Some(transform) = self.concept_weight {
            config.concept_weight = transform;
        }
        if let Some(weight) = &self.weight {
            config.initial_weight = weight.clone();
        }
        if let Some(exponent) = self.branchlength {
            config.branch_length_exponent = exponent;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(timeout) = self.ancestor_timeout_secs {
            config.ancestor_timeout_secs = Some(timeout);
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Serialize)]
struct RunParameters<'a> {
    #[serde(flatten)]
    config: &'a SimulationConfig,
    semantic_network: &'a Path,
    wordlist: Option<&'a Path>,
    language: Option<&'a str>,
    tree: String,
}

fn root_language(
    cli: &Cli,
    config: &SimulationConfig,
    network: &Arc<SemanticNetwork>,
) -> Result<Language> {
    let distribution: WeightDistribution = config.initial_weight.parse()?;
    let Some(path) = &cli.wordlist else {
        return Ok(synthesize_root(network, &distribution, config.seed));
    };
    let file = File::open(path).with_context(|| format!("failed to open wordlist {:?}", path))?;
    let records = read_records(BufReader::new(file))?;
    let (name, language) = root_from_wordlist(
        &records,
        network,
        cli.language.as_deref(),
        &distribution,
        config.seed,
    )?;
    info!(root = %name, "starting from wordlist language");
    Ok(language)
}

/// Picks up an interrupted run: languages already in `path` are kept and
/// only the missing nodes are simulated and appended.
fn resume(
    path: &Path,
    config: &SimulationConfig,
    network: &Arc<SemanticNetwork>,
    tree: &Phylogeny,
    root: Language,
) -> Result<()> {
    let (wordlist, file) =
        reopen_for_resume(path).with_context(|| format!("failed to resume from {:?}", path))?;
    let generated = GeneratedLanguages::from_wordlist(&wordlist, network, tree)?;
    generated.set_origin(root);

    let mut writer = WordlistWriter::append(BufWriter::new(file));
    let results = Coordinator::new(config.workers, config.seed)
        .with_ancestor_timeout(config.ancestor_timeout())
        .simulate_remainder(tree, &generated, Some(&mut writer))?;
    info!(languages = results.len(), output = ?path, "resumed run complete");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("lexsim=info".parse()?))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.load_config()?;

    let network = Arc::new(load_gml(
        &cli.semantic_network,
        &config.weight_attribute,
        config.neighbor_factor,
        config.concept_weight,
    )?);
    info!(concepts = network.len(), "loaded semantic network");

    let tree = match &cli.tree {
        Some(source) => load_tree(source)?,
        None => Phylogeny::long_branch(config.branch_length_exponent),
    };
    let root = root_language(&cli, &config, &network)?;

    if cli.resume {
        let Some(path) = &cli.output else {
            bail!("--resume needs --output");
        };
        if path.exists() && fs::metadata(path)?.len() > 0 {
            return resume(path, &config, &network, &tree, root);
        }
        warn!(output = ?path, "nothing to resume, starting a fresh run");
    }

    let output: Box<dyn Write + Send> = match &cli.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {:?}", path))?,
        )),
        None => Box::new(BufWriter::new(io::stdout())),
    };
    let mut writer = WordlistWriter::new(output)?;
    if cli.embed_parameters {
        let parameters = RunParameters {
            config: &config,
            semantic_network: &cli.semantic_network,
            wordlist: cli.wordlist.as_deref(),
            language: cli.language.as_deref(),
            tree: tree.to_newick(),
        };
        writer.write_comment(&serde_json::to_string_pretty(&parameters)?)?;
    }

    let count = if config.workers == 1 {
        simulate_into(&tree, root, config.seed, &mut writer)?.len()
    } else {
        Coordinator::new(config.workers, config.seed)
            .with_ancestor_timeout(config.ancestor_timeout())
            .simulate(&tree, root, Some(&mut writer))?
            .len()
    };
    info!(languages = count, "run complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config_defaults() {
        let cli = Cli::try_parse_from([
            "lexsim",
            "--semantic-network",
            "clics.gml",
            "--workers",
            "4",
            "--ancestor-timeout-secs",
            "30",
        ])
        .unwrap();
        let config = cli.load_config().unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.ancestor_timeout(), Some(std::time::Duration::from_secs(30)));

        let cli = Cli::try_parse_from(["lexsim", "--semantic-network", "clics.gml"]).unwrap();
        assert_eq!(cli.load_config().unwrap().ancestor_timeout(), None);
    }
}
