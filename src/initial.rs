//! Building the language at the root of the tree.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rand::Rng;
use rand_distr::{Distribution, Geometric, Poisson};
use tracing::info;

use crate::error::WordlistError;
use crate::io::wordlist::{group_languages, WordlistRecord};
use crate::simulation::language::{Language, WordId};
use crate::simulation::network::SemanticNetwork;
use crate::simulation::seeding::root_stream;

/// Distribution of initial word weights, written like `100`,
/// `constant(100)`, `uniform(10)`, `geometric(10)` or `poisson(10)`.
#[derive(Debug, Clone, Copy)]
pub enum WeightDistribution {
    Constant(u64),
    /// Uniform over `1..=n`.
    Uniform(u64),
    /// Number of trials until the first success, with mean `n`.
    Geometric(Geometric),
    Poisson(Poisson<f64>),
}

impl WeightDistribution {
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        match self {
            WeightDistribution::Constant(n) => *n,
            WeightDistribution::Uniform(n) => rng.gen_range(1..=*n),
            WeightDistribution::Geometric(geometric) => geometric.sample(rng).saturating_add(1),
            WeightDistribution::Poisson(poisson) => poisson.sample(rng) as u64,
        }
    }
}

impl Default for WeightDistribution {
    fn default() -> Self {
        WeightDistribution::Constant(100)
    }
}

impl FromStr for WeightDistribution {
    type Err = WordlistError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || WordlistError::InvalidDistribution(text.to_string());
        let text = text.trim();
        let Some((name, rest)) = text.split_once('(') else {
            return text
                .parse::<u64>()
                .map(WeightDistribution::Constant)
                .map_err(|_| invalid());
        };
        let parameter = rest
            .strip_suffix(')')
            .and_then(|p| p.trim().parse::<u64>().ok())
            .ok_or_else(invalid)?;
        match (name.trim(), parameter) {
            ("constant", n) => Ok(WeightDistribution::Constant(n)),
            (_, 0) => Err(invalid()),
            ("uniform", n) => Ok(WeightDistribution::Uniform(n)),
            ("geometric", n) => Geometric::new(1.0 / n as f64)
                .map(WeightDistribution::Geometric)
                .map_err(|_| invalid()),
            ("poisson", n) => Poisson::new(n as f64)
                .map(WeightDistribution::Poisson)
                .map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for WeightDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightDistribution::Constant(n) => write!(f, "{}", n),
            WeightDistribution::Uniform(n) => write!(f, "uniform({})", n),
            WeightDistribution::Geometric(_) => write!(f, "geometric"),
            WeightDistribution::Poisson(_) => write!(f, "poisson"),
        }
    }
}

/// One fresh word per concept, numbered in network order, with weights
/// drawn from `distribution`.
pub fn synthesize_root(
    network: &Arc<SemanticNetwork>,
    distribution: &WeightDistribution,
    seed: u64,
) -> Language {
    let mut rng = root_stream(seed);
    let language = Language::from_records(
        Arc::clone(network),
        network
            .concepts()
            .enumerate()
            .map(|(i, concept)| (concept, WordId(i as u64), distribution.sample(&mut rng)))
            .collect::<Vec<_>>(),
    );
    info!(
        concepts = network.len(),
        total_weight = language.total_weight(),
        "synthesized root language"
    );
    language
}

/// Picks the root language out of a wordlist: the one called `name`, or
/// the last language in the table. Missing weights are drawn from
/// `distribution`.
pub fn root_from_wordlist(
    records: &[WordlistRecord],
    network: &Arc<SemanticNetwork>,
    name: Option<&str>,
    distribution: &WeightDistribution,
    seed: u64,
) -> Result<(String, Language), WordlistError> {
    let mut rng = root_stream(seed);
    let relevant: Vec<WordlistRecord> = records
        .iter()
        .filter(|record| name.map_or(true, |name| record.language == name))
        .cloned()
        .collect();
    let mut languages = group_languages(&relevant, network, || distribution.sample(&mut rng))?;
    let picked = match name {
        Some(name) => languages
            .into_iter()
            .find(|(language, _)| language == name)
            .ok_or_else(|| WordlistError::MissingLanguage(name.to_string()))?,
        None => languages.pop().ok_or(WordlistError::Empty)?,
    };
    info!(
        language = %picked.0,
        total_weight = picked.1.total_weight(),
        "loaded root language from wordlist"
    );
    Ok(picked)
}
