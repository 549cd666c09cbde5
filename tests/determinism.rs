use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Cursor, Write};
use std::sync::Arc;

use lexsim::initial::{synthesize_root, WeightDistribution};
use lexsim::io::newick::parse_newick;
use lexsim::io::wordlist::{
    group_languages, read_records, read_wordlist, reopen_for_resume, LanguageSink, WordlistWriter,
};
use lexsim::simulation::driver::simulate;
use lexsim::{Coordinator, GeneratedLanguages, Language, SemanticNetwork, WordlistError};

const TREE: &str = "((A:40,B:25)X:30,(C:10,(D:35,E:5)Y:20)Z:15)R:10;";
const SEED: u64 = 2024;

fn network() -> Arc<SemanticNetwork> {
    let mut builder = SemanticNetwork::builder();
    let labels = ["hand", "arm", "leg", "foot", "head", "eye", "see", "know"];
    for pair in labels.windows(2) {
        builder.add_labeled_edge(pair[0], pair[1], None).unwrap();
    }
    builder.add_labeled_edge("hand", "foot", Some(3.0)).unwrap();
    builder.add_labeled_edge("eye", "know", Some(2.0)).unwrap();
    Arc::new(builder.build().unwrap())
}

fn root(network: &Arc<SemanticNetwork>) -> Language {
    synthesize_root(network, &WeightDistribution::Constant(5), SEED)
}

fn sequential(network: &Arc<SemanticNetwork>) -> BTreeMap<String, Language> {
    let tree = parse_newick(TREE).unwrap();
    simulate(&tree, root(network), SEED)
        .map(Result::unwrap)
        .collect()
}

#[test]
fn repeated_runs_serialize_identically() {
    let network = network();
    let tree = parse_newick("(A:2,B:2)C:2;").unwrap();
    let render = || {
        let mut writer = WordlistWriter::new(Vec::new()).unwrap();
        for result in simulate(&tree, root(&network), SEED) {
            let (name, language) = result.unwrap();
            writer.write_language(&name, &language).unwrap();
        }
        writer.into_inner()
    };
    assert_eq!(render(), render());
}

#[test]
fn concurrent_runs_match_sequential() {
    let network = network();
    let expected = sequential(&network);
    assert_eq!(expected.len(), 9);
    let tree = parse_newick(TREE).unwrap();
    for workers in [1, 3, 6] {
        let results: BTreeMap<String, Language> = Coordinator::new(workers, SEED)
            .simulate(&tree, root(&network), None)
            .unwrap()
            .into_iter()
            .map(|(name, language)| (name, Language::clone(&language)))
            .collect();
        assert_eq!(results, expected, "{} workers", workers);
    }
}

#[test]
fn resumed_file_matches_uninterrupted_run() {
    let network = network();
    let expected = sequential(&network);
    let tree = parse_newick(TREE).unwrap();

    let file = tempfile::NamedTempFile::new().unwrap();
    {
        let mut writer = WordlistWriter::new(BufWriter::new(file.reopen().unwrap())).unwrap();
        writer.write_comment("interrupted run").unwrap();
        for name in ["R", "X", "A", "Z"] {
            writer.write_language(name, &expected[name]).unwrap();
        }
    }

    let (wordlist, appending) = reopen_for_resume(file.path()).unwrap();
    let generated = GeneratedLanguages::from_wordlist(&wordlist, &network, &tree).unwrap();
    generated.set_origin(root(&network));
    assert_eq!(generated.len(), 4);

    let mut writer = WordlistWriter::append(BufWriter::new(appending));
    Coordinator::new(4, SEED)
        .simulate_remainder(&tree, &generated, Some(&mut writer))
        .unwrap();
    drop(writer);

    let text = fs::read_to_string(file.path()).unwrap();
    let records = read_records(Cursor::new(text)).unwrap();
    let languages = group_languages(&records, &network, || 0).unwrap();
    assert_eq!(languages.len(), 9);
    let resumed: BTreeMap<String, Language> = languages.into_iter().collect();
    assert_eq!(resumed, expected);
}

#[test]
fn resume_rejects_languages_outside_the_tree() {
    let network = network();
    let tree = parse_newick(TREE).unwrap();
    let text = "Language_ID,Parameter_ID,Cognateset_ID,Weight\nQ,hand,0,5\n# end Q\n";
    let wordlist = read_wordlist(Cursor::new(text)).unwrap();
    assert!(matches!(
        GeneratedLanguages::from_wordlist(&wordlist, &network, &tree),
        Err(WordlistError::UnknownLanguage(name)) if name == "Q"
    ));
}

#[test]
fn resume_recomputes_a_node_cut_off_mid_write() {
    let network = network();
    let tree = parse_newick("((A:10)X:10)R:5;").unwrap();
    let expected: BTreeMap<String, Language> = simulate(&tree, root(&network), SEED)
        .map(Result::unwrap)
        .collect();

    let mut full = WordlistWriter::new(Vec::new()).unwrap();
    full.write_language("R", &expected["R"]).unwrap();
    full.write_language("X", &expected["X"]).unwrap();
    let text = String::from_utf8(full.into_inner()).unwrap();
    let x_start = text.find("\nX,").unwrap() + 1;
    let first_x_row = x_start + text[x_start..].find('\n').unwrap() + 1;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(text[..first_x_row].as_bytes()).unwrap();

    let (wordlist, appending) = reopen_for_resume(file.path()).unwrap();
    let generated = GeneratedLanguages::from_wordlist(&wordlist, &network, &tree).unwrap();
    generated.set_origin(root(&network));
    assert_eq!(generated.len(), 1);
    assert!(!generated.contains("X"));

    let mut writer = WordlistWriter::append(BufWriter::new(appending));
    let results = Coordinator::new(2, SEED)
        .simulate_remainder(&tree, &generated, Some(&mut writer))
        .unwrap();
    drop(writer);
    let results: BTreeMap<String, Language> = results
        .into_iter()
        .map(|(name, language)| (name, Language::clone(&language)))
        .collect();
    assert_eq!(results, expected);
    assert_eq!(results["A"].total_weight(), expected["R"].total_weight());

    let text = fs::read_to_string(file.path()).unwrap();
    let wordlist = read_wordlist(Cursor::new(text)).unwrap();
    assert_eq!(wordlist.languages().collect::<Vec<_>>(), vec!["R", "X", "A"]);
    let completed: Vec<_> = wordlist.completed_records().cloned().collect();
    let resumed: BTreeMap<String, Language> = group_languages(&completed, &network, || 0)
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(resumed, expected);
}
